use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use memchr::memchr;
use regex::bytes::Regex;

use crate::event::{
    Attribution, Blob, BlobRef, Commit, Date, Event, FileOp, Mark, Repository, Reset, Tag,
};
use crate::pathutil::display_bytes;
use crate::progress;
use crate::scratch::ScratchDir;
use crate::stream::{parse_data_header, DataHeader, StreamReader};

/// Parses the whole stream into a `Repository` and resolves the event
/// graph (tags and resets to commits, modify ops to blobs).
pub fn parse<R: BufRead>(
    input: R,
    scratch: ScratchDir,
    interrupt: &AtomicBool,
) -> io::Result<Repository> {
    let mut parser = Parser::new(input, scratch);
    loop {
        if interrupt.load(Ordering::Relaxed) {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "interrupted"));
        }
        match parser.input.read_line()? {
            None => break,
            Some(line) => {
                if line.is_empty() {
                    continue;
                }
                parser.dispatch(line)?;
            }
        }
    }
    parser.resolve()?;
    Ok(parser.repo)
}

struct Parser<R: BufRead> {
    input: StreamReader<R>,
    repo: Repository,
    commit_seq: usize,
    person_re: Regex,
}

impl<R: BufRead> Parser<R> {
    fn new(input: R, scratch: ScratchDir) -> Self {
        Parser {
            input: StreamReader::new(input),
            repo: Repository::new(scratch),
            commit_seq: 0,
            person_re: Regex::new(r"^(.*?) ?<([^<>]*)> ?(.*)$").unwrap(),
        }
    }

    fn dispatch(&mut self, line: Vec<u8>) -> io::Result<()> {
        if line == b"blob" {
            return self.parse_blob();
        }
        if let Some(rest) = line.strip_prefix(b"commit ") {
            return self.parse_commit(rest.to_vec());
        }
        if let Some(rest) = line.strip_prefix(b"reset ") {
            return self.parse_reset(rest.to_vec());
        }
        if let Some(rest) = line.strip_prefix(b"tag ") {
            return self.parse_tag(rest.to_vec());
        }
        self.repo.events.push(Event::Passthrough(line));
        Ok(())
    }

    fn parse_blob(&mut self) -> io::Result<()> {
        let mark = match self.input.read_line()? {
            Some(line) => parse_mark_def(&line)
                .ok_or_else(|| self.input.err_here("blob is not followed by mark"))?,
            None => return Err(self.input.err_here("end of stream inside blob")),
        };
        let header = self.require_data_header()?;
        let file = self.repo.scratch.blob_file(mark);
        let mut sink = File::create(&file)?;
        self.input.read_data(&header, &mut sink)?;
        sink.flush()?;
        self.define_mark(mark)?;
        self.repo.events.push(Event::Blob(Blob {
            mark,
            file,
            first_path: None,
        }));
        Ok(())
    }

    fn parse_commit(&mut self, branch: Vec<u8>) -> io::Result<()> {
        let opening = self.input.line_number();
        self.commit_seq += 1;
        let commit_seq = self.commit_seq;
        let mut mark: Option<Mark> = None;
        let mut authors: Vec<Attribution> = Vec::new();
        let mut committer: Option<Attribution> = None;
        let mut comment: Vec<u8> = Vec::new();
        let mut parents: Vec<Mark> = Vec::new();
        let mut ops: Vec<FileOp> = Vec::new();
        let mut properties: BTreeMap<String, Option<Vec<u8>>> = BTreeMap::new();
        let mut inline_seq = 0usize;

        loop {
            let line = match self.input.read_line()? {
                Some(line) => line,
                None => break,
            };
            // Some exporters leave a stray newline after data payloads.
            if line.is_empty() {
                continue;
            }
            if let Some(rest) = line.strip_prefix(b"mark ") {
                mark = Some(
                    parse_mark_ref(rest)
                        .ok_or_else(|| self.input.err_here("malformed mark"))?,
                );
            } else if let Some(rest) = line.strip_prefix(b"author ") {
                let person = self.parse_attribution(rest)?;
                authors.push(person);
            } else if let Some(rest) = line.strip_prefix(b"committer ") {
                if committer.is_some() {
                    return Err(self.input.err_here("commit has more than one committer"));
                }
                committer = Some(self.parse_attribution(rest)?);
            } else if let Some(rest) = line.strip_prefix(b"property ") {
                self.parse_property(rest, &mut properties)?;
            } else if line.starts_with(b"data ") {
                let header =
                    parse_data_header(&line).map_err(|e| self.input.err_here(e))?;
                comment.clear();
                self.input.read_data(&header, &mut comment)?;
            } else if let Some(rest) = line.strip_prefix(b"from ") {
                parents.push(
                    parse_mark_ref(rest)
                        .ok_or_else(|| self.input.err_here("from does not name a mark"))?,
                );
            } else if let Some(rest) = line.strip_prefix(b"merge ") {
                parents.push(
                    parse_mark_ref(rest)
                        .ok_or_else(|| self.input.err_here("merge does not name a mark"))?,
                );
            } else if let Some(rest) = line.strip_prefix(b"M ") {
                let op = self.parse_modify(rest, commit_seq, &mut inline_seq)?;
                ops.push(op);
            } else if let Some(rest) = line.strip_prefix(b"D ") {
                ops.push(FileOp::Delete {
                    path: rest.to_vec(),
                });
            } else if let Some(rest) = line.strip_prefix(b"R ") {
                let (source, target) = self.parse_two_paths(rest, "R")?;
                ops.push(FileOp::Rename { source, target });
            } else if let Some(rest) = line.strip_prefix(b"C ") {
                let (source, target) = self.parse_two_paths(rest, "C")?;
                ops.push(FileOp::Copy { source, target });
            } else if line == b"deleteall" || line == b"filedeleteall" {
                ops.push(FileOp::DeleteAll);
            } else {
                self.input.push_back(line);
                break;
            }
        }

        let at_opening = |msg: &str| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("stream line {}: {}", opening, msg),
            )
        };
        let mark = mark.ok_or_else(|| at_opening("commit has no mark"))?;
        let committer = committer.ok_or_else(|| at_opening("commit has no committer"))?;
        self.define_mark(mark)?;
        self.repo.branches.insert(branch.clone());
        self.repo.events.push(Event::Commit(Commit {
            mark,
            branch,
            authors,
            committer,
            comment,
            parents,
            ops,
            properties,
            line: opening,
        }));
        Ok(())
    }

    fn parse_modify(
        &mut self,
        rest: &[u8],
        commit_seq: usize,
        inline_seq: &mut usize,
    ) -> io::Result<FileOp> {
        let sp1 = memchr(b' ', rest)
            .ok_or_else(|| self.input.err_here("malformed M directive"))?;
        let mode = rest[..sp1].to_vec();
        let after_mode = &rest[sp1 + 1..];
        let sp2 = memchr(b' ', after_mode)
            .ok_or_else(|| self.input.err_here("malformed M directive"))?;
        let reference = after_mode[..sp2].to_vec();
        let path = after_mode[sp2 + 1..].to_vec();
        if path.is_empty() {
            return Err(self.input.err_here("M directive has no path"));
        }
        let content = if reference == b"inline" {
            let header = self.require_data_header()?;
            *inline_seq += 1;
            let file = self.repo.scratch.inline_file(commit_seq, *inline_seq);
            let mut sink = File::create(&file)?;
            self.input.read_data(&header, &mut sink)?;
            sink.flush()?;
            BlobRef::Spilled(file)
        } else {
            BlobRef::Mark(parse_mark_ref(&reference).ok_or_else(|| {
                self.input.err_here(format!(
                    "M references neither a mark nor inline: {}",
                    display_bytes(&reference)
                ))
            })?)
        };
        Ok(FileOp::Modify {
            mode,
            content,
            path,
        })
    }

    /// `R` and `C` operands tokenize under shell-quoting rules so paths
    /// may carry whitespace.
    fn parse_two_paths(&self, rest: &[u8], op: &str) -> io::Result<(Vec<u8>, Vec<u8>)> {
        let text = String::from_utf8_lossy(rest);
        let words = shlex::split(&text)
            .ok_or_else(|| self.input.err_here(format!("{} has unbalanced quoting", op)))?;
        if words.len() != 2 {
            return Err(self
                .input
                .err_here(format!("{} expects a source and a destination", op)));
        }
        let mut it = words.into_iter();
        let source = it.next().unwrap().into_bytes();
        let target = it.next().unwrap().into_bytes();
        Ok((source, target))
    }

    /// Three shapes: `property NAME` (flag), `property NAME LEN VALUE…`
    /// where the value starts inline and may continue for LEN bytes
    /// across newlines, optionally followed by a newline.
    fn parse_property(
        &mut self,
        rest: &[u8],
        properties: &mut BTreeMap<String, Option<Vec<u8>>>,
    ) -> io::Result<()> {
        let sp = match memchr(b' ', rest) {
            None => {
                let name = String::from_utf8_lossy(rest).into_owned();
                properties.insert(name, None);
                return Ok(());
            }
            Some(sp) => sp,
        };
        let name = String::from_utf8_lossy(&rest[..sp]).into_owned();
        let after = &rest[sp + 1..];
        let (len_token, inline) = match memchr(b' ', after) {
            Some(i) => (&after[..i], &after[i + 1..]),
            None => (after, &b""[..]),
        };
        let declared = std::str::from_utf8(len_token)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| self.input.err_here("bad property length"))?;
        let mut value = inline.to_vec();
        if value.len() > declared {
            return Err(self.input.err_here(format!(
                "property {} value exceeds declared length {}",
                name, declared
            )));
        }
        if value.len() < declared {
            // The stripped line terminator is part of the value.
            value.push(b'\n');
            if value.len() < declared {
                let more = self.input.read_bytes(declared - value.len())?;
                value.extend_from_slice(&more);
            }
            if let Some(line) = self.input.read_line()? {
                if !line.is_empty() {
                    self.input.push_back(line);
                }
            }
        }
        properties.insert(name, Some(value));
        Ok(())
    }

    fn parse_reset(&mut self, ref_name: Vec<u8>) -> io::Result<()> {
        let committish = match self.input.read_line()? {
            Some(line) => match line.strip_prefix(b"from ") {
                Some(rest) => Some(parse_mark_ref(rest).ok_or_else(|| {
                    self.input.err_here("reset from does not name a mark")
                })?),
                None => {
                    self.input.push_back(line);
                    None
                }
            },
            None => None,
        };
        self.repo.events.push(Event::Reset(Reset {
            ref_name,
            committish,
        }));
        Ok(())
    }

    fn parse_tag(&mut self, name: Vec<u8>) -> io::Result<()> {
        let committish = match self.input.read_line()? {
            Some(line) => line
                .strip_prefix(b"from ")
                .and_then(parse_mark_ref)
                .ok_or_else(|| {
                    self.input.err_here(format!(
                        "tag {} is not followed by from",
                        display_bytes(&name)
                    ))
                })?,
            None => {
                return Err(self.input.err_here("end of stream inside tag"));
            }
        };
        let mut tagger = None;
        if let Some(line) = self.input.read_line()? {
            match line.strip_prefix(b"tagger ") {
                Some(rest) => tagger = Some(self.parse_attribution(rest)?),
                None => {
                    progress::warn(&format!(
                        "tag {} has no tagger",
                        display_bytes(&name)
                    ));
                    self.input.push_back(line);
                }
            }
        }
        let header = self.require_data_header()?;
        let mut comment = Vec::new();
        self.input.read_data(&header, &mut comment)?;
        self.repo.events.push(Event::Tag(Tag {
            name,
            committish,
            tagger,
            comment,
        }));
        Ok(())
    }

    fn parse_attribution(&self, rest: &[u8]) -> io::Result<Attribution> {
        let caps = self.person_re.captures(rest).ok_or_else(|| {
            self.input.err_here(format!(
                "malformed attribution: {}",
                display_bytes(rest)
            ))
        })?;
        let date = Date::parse(&caps[3]).map_err(|e| self.input.err_here(e))?;
        Ok(Attribution {
            name: caps[1].to_vec(),
            email: caps[2].to_vec(),
            date,
        })
    }

    fn require_data_header(&mut self) -> io::Result<DataHeader> {
        match self.input.read_line()? {
            Some(line) if line.starts_with(b"data ") => {
                parse_data_header(&line).map_err(|e| self.input.err_here(e))
            }
            Some(line) => Err(self.input.err_here(format!(
                "expected data, found {}",
                display_bytes(&line)
            ))),
            None => Err(self.input.err_here("expected data, found end of stream")),
        }
    }

    fn define_mark(&mut self, mark: Mark) -> io::Result<()> {
        let idx = self.repo.events.len();
        if self.repo.marks.insert(mark, idx).is_some() {
            return Err(self
                .input
                .err_here(format!("mark :{} defined twice", mark)));
        }
        Ok(())
    }

    /// Linear pass after the stream is consumed: link tags and resets to
    /// their commits, verify modify-op blob references, record each
    /// blob's first associated path, and index commit children for
    /// branch-tip detection. Parent marks themselves stay as marks.
    fn resolve(&mut self) -> io::Result<()> {
        let repo = &mut self.repo;
        let mut first_paths: Vec<(usize, Vec<u8>)> = Vec::new();
        for idx in 0..repo.events.len() {
            match &repo.events[idx] {
                Event::Commit(c) => {
                    for &p in &c.parents {
                        let target = repo.marks.get(&p).copied();
                        match target.map(|i| &repo.events[i]) {
                            Some(Event::Commit(_)) => {}
                            _ => {
                                return Err(semantic_err(format!(
                                    "stream line {}: commit :{} references unknown parent :{}",
                                    c.line, c.mark, p
                                )));
                            }
                        }
                        repo.children.entry(p).or_default().push(idx);
                    }
                    for op in &c.ops {
                        if let FileOp::Modify {
                            content: BlobRef::Mark(m),
                            path,
                            ..
                        } = op
                        {
                            let target = repo.marks.get(m).copied();
                            match target.map(|i| &repo.events[i]) {
                                Some(Event::Blob(_)) => {
                                    first_paths.push((target.unwrap(), path.clone()));
                                }
                                _ => {
                                    return Err(semantic_err(format!(
                                        "stream line {}: modify of {} references unknown blob :{}",
                                        c.line,
                                        display_bytes(path),
                                        m
                                    )));
                                }
                            }
                        }
                    }
                }
                Event::Tag(t) => {
                    let target = repo.marks.get(&t.committish).copied();
                    match target.map(|i| &repo.events[i]) {
                        Some(Event::Commit(c)) => {
                            repo.tags_for.entry(c.mark).or_default().push(idx);
                        }
                        _ => {
                            return Err(semantic_err(format!(
                                "tag {} references unknown commit :{}",
                                display_bytes(&t.name),
                                t.committish
                            )));
                        }
                    }
                }
                Event::Reset(r) => {
                    if let Some(m) = r.committish {
                        let target = repo.marks.get(&m).copied();
                        match target.map(|i| &repo.events[i]) {
                            Some(Event::Commit(c)) => {
                                repo.resets_for.entry(c.mark).or_default().push(idx);
                            }
                            _ => {
                                return Err(semantic_err(format!(
                                    "reset {} references unknown commit :{}",
                                    display_bytes(&r.ref_name),
                                    m
                                )));
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        for (blob_idx, path) in first_paths {
            if let Event::Blob(b) = &mut repo.events[blob_idx] {
                if b.first_path.is_none() {
                    b.first_path = Some(path);
                }
            }
        }
        Ok(())
    }
}

fn semantic_err(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Parses a `mark :<num>` body (the part after the keyword).
fn parse_mark_def(line: &[u8]) -> Option<Mark> {
    parse_mark_ref(line.strip_prefix(b"mark ")?)
}

/// Parses a `:<num>` token.
fn parse_mark_ref(token: &[u8]) -> Option<Mark> {
    let digits = token.strip_prefix(b":")?;
    let mut num: Mark = 0;
    let mut seen = false;
    for &b in digits {
        if b.is_ascii_digit() {
            seen = true;
            num = num.saturating_mul(10).saturating_add((b - b'0') as Mark);
        } else {
            break;
        }
    }
    if seen {
        Some(num)
    } else {
        None
    }
}
