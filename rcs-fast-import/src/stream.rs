use std::io::{self, BufRead, Read, Write};

/// Maximum allowed data block size to avoid pathological allocations from
/// malformed streams.
pub const MAX_DATA_BLOCK_SIZE: u64 = 500 * 1024 * 1024; // 500 MB

/// Payload encoding named by a `data` header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataHeader {
    Counted(u64),
    Delimited(Vec<u8>),
}

pub fn parse_data_header(line: &[u8]) -> io::Result<DataHeader> {
    let rest = line
        .strip_prefix(b"data ")
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "invalid data header"))?;
    if let Some(delim) = rest.strip_prefix(b"<<") {
        if delim.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "empty data delimiter",
            ));
        }
        return Ok(DataHeader::Delimited(delim.to_vec()));
    }
    let n = std::str::from_utf8(rest)
        .ok()
        .map(|s| s.trim())
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "invalid data header"))?;
    if n > MAX_DATA_BLOCK_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("data block size {} exceeds maximum {}", n, MAX_DATA_BLOCK_SIZE),
        ));
    }
    Ok(DataHeader::Counted(n))
}

/// Line-oriented reader over the import stream with one line of pushback
/// so the parser can peek at the next directive, and a line counter for
/// diagnostics. Lines are handed out without their trailing newline.
pub struct StreamReader<R: BufRead> {
    input: R,
    pushback: Option<Vec<u8>>,
    line_no: usize,
}

/// Counts payload newlines on the way to the sink so counted data blocks
/// keep the diagnostic line numbers honest.
struct CountingSink<'a> {
    inner: &'a mut dyn Write,
    newlines: usize,
}

impl<'a> Write for CountingSink<'a> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.newlines += memchr::memchr_iter(b'\n', &buf[..n]).count();
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<R: BufRead> StreamReader<R> {
    pub fn new(input: R) -> Self {
        StreamReader {
            input,
            pushback: None,
            line_no: 0,
        }
    }

    /// Line number of the most recently delivered line, 1-based.
    pub fn line_number(&self) -> usize {
        self.line_no
    }

    pub fn err_here(&self, msg: impl std::fmt::Display) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("stream line {}: {}", self.line_no, msg),
        )
    }

    /// Next line without its trailing newline, or `None` at end of stream.
    /// A pushed-back line is re-delivered without advancing the counter.
    pub fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        if let Some(line) = self.pushback.take() {
            return Ok(Some(line));
        }
        let mut line = Vec::with_capacity(128);
        let read = self.input.read_until(b'\n', &mut line)?;
        if read == 0 {
            return Ok(None);
        }
        self.line_no += 1;
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        Ok(Some(line))
    }

    pub fn push_back(&mut self, line: Vec<u8>) {
        debug_assert!(self.pushback.is_none(), "double pushback");
        self.pushback = Some(line);
    }

    /// Reads the payload described by an already-consumed `data` header
    /// into `sink`, returning the payload length. A single newline after
    /// the payload is consumed when present; any other following line is
    /// pushed back for the caller.
    pub fn read_data(&mut self, header: &DataHeader, sink: &mut dyn Write) -> io::Result<u64> {
        let len = match header {
            DataHeader::Counted(n) => {
                let mut counting = CountingSink {
                    inner: sink,
                    newlines: 0,
                };
                let copied = io::copy(&mut (&mut self.input).take(*n), &mut counting)?;
                if copied < *n {
                    return Err(self.err_here(format!(
                        "end of stream inside data block ({} of {} bytes)",
                        copied, n
                    )));
                }
                self.line_no += counting.newlines;
                copied
            }
            DataHeader::Delimited(delim) => {
                let mut total: u64 = 0;
                loop {
                    match self.read_line()? {
                        None => {
                            return Err(self.err_here(format!(
                                "end of stream before data delimiter {}",
                                String::from_utf8_lossy(delim)
                            )));
                        }
                        Some(line) if line == *delim => break,
                        Some(line) => {
                            sink.write_all(&line)?;
                            sink.write_all(b"\n")?;
                            total += line.len() as u64 + 1;
                        }
                    }
                }
                total
            }
        };
        // Tolerate producers that do or don't emit a newline after the
        // payload.
        if let Some(line) = self.read_line()? {
            if !line.is_empty() {
                self.push_back(line);
            }
        }
        Ok(len)
    }

    /// Reads exactly `n` raw bytes, bypassing line framing. Only valid
    /// while no line is pushed back (the parser calls this immediately
    /// after consuming a header line).
    pub fn read_bytes(&mut self, n: usize) -> io::Result<Vec<u8>> {
        if self.pushback.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "raw read while a line is pushed back",
            ));
        }
        let mut buf = vec![0u8; n];
        self.input.read_exact(&mut buf).map_err(|_| {
            self.err_here(format!("end of stream inside {}-byte field", n))
        })?;
        self.line_no += memchr::memchr_iter(b'\n', &buf).count();
        Ok(buf)
    }
}
