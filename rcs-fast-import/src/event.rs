use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::path::PathBuf;

use crate::scratch::ScratchDir;

/// A stream-assigned `:N` token naming a blob or commit.
pub type Mark = u32;

/// Attribution date. The zone text rides along verbatim for
/// round-tripping; all arithmetic uses the epoch seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Date {
    pub raw: Vec<u8>,
    pub seconds: i64,
}

impl Date {
    /// Accepts `<unix-seconds> <±HHMM>` or an RFC-822 date.
    pub fn parse(raw: &[u8]) -> io::Result<Date> {
        let text = String::from_utf8_lossy(raw);
        let text = text.trim();
        if let Some((secs, zone)) = text.split_once(' ') {
            if !zone.is_empty() {
                if let Ok(n) = secs.parse::<i64>() {
                    return Ok(Date {
                        raw: raw.to_vec(),
                        seconds: n,
                    });
                }
            }
        }
        match chrono::DateTime::parse_from_rfc2822(text) {
            Ok(dt) => Ok(Date {
                raw: raw.to_vec(),
                seconds: dt.timestamp(),
            }),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unparseable date: {}", text),
            )),
        }
    }

    /// The `yyyy/mm/dd hh:mm:ss` UTC form RCS check-in dates use.
    pub fn rcs_form(&self) -> String {
        match chrono::DateTime::from_timestamp(self.seconds, 0) {
            Some(dt) => dt.format("%Y/%m/%d %H:%M:%S").to_string(),
            None => String::from("1970/01/01 00:00:00"),
        }
    }
}

/// (name, email, date) triple from `author`, `committer` and `tagger`
/// lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    pub name: Vec<u8>,
    pub email: Vec<u8>,
    pub date: Date,
}

impl Attribution {
    /// `name <email>` form used in envelope headers and tag lines.
    pub fn identity(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.name.len() + self.email.len() + 3);
        out.extend_from_slice(&self.name);
        if !self.name.is_empty() {
            out.push(b' ');
        }
        out.push(b'<');
        out.extend_from_slice(&self.email);
        out.push(b'>');
        out
    }
}

/// Content reference of a modify op: a prior blob's mark, or an inline
/// payload already spilled to the scratch directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobRef {
    Mark(Mark),
    Spilled(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOp {
    Modify {
        mode: Vec<u8>,
        content: BlobRef,
        path: Vec<u8>,
    },
    Delete {
        path: Vec<u8>,
    },
    Rename {
        source: Vec<u8>,
        target: Vec<u8>,
    },
    Copy {
        source: Vec<u8>,
        target: Vec<u8>,
    },
    DeleteAll,
}

/// A detached payload, streamed to its spill file at parse time. The
/// first path that references it is recorded for op tracing.
#[derive(Debug)]
pub struct Blob {
    pub mark: Mark,
    pub file: PathBuf,
    pub first_path: Option<Vec<u8>>,
}

#[derive(Debug)]
pub struct Commit {
    pub mark: Mark,
    pub branch: Vec<u8>,
    pub authors: Vec<Attribution>,
    pub committer: Attribution,
    pub comment: Vec<u8>,
    pub parents: Vec<Mark>,
    pub ops: Vec<FileOp>,
    /// name -> Some(value) for valued properties, None for flags.
    pub properties: BTreeMap<String, Option<Vec<u8>>>,
    /// Stream line the `commit` directive opened on, for diagnostics.
    pub line: usize,
}

#[derive(Debug)]
pub struct Reset {
    pub ref_name: Vec<u8>,
    pub committish: Option<Mark>,
}

#[derive(Debug)]
pub struct Tag {
    pub name: Vec<u8>,
    pub committish: Mark,
    pub tagger: Option<Attribution>,
    pub comment: Vec<u8>,
}

#[derive(Debug)]
pub enum Event {
    Blob(Blob),
    Commit(Commit),
    Reset(Reset),
    Tag(Tag),
    /// Unrecognized top-level line, retained verbatim.
    Passthrough(Vec<u8>),
}

/// The fully parsed stream: an append-only event list plus the lookup
/// tables the resolver builds over it. Owns the scratch directory so
/// spill files outlive every referencing commit until teardown.
#[derive(Debug)]
pub struct Repository {
    pub events: Vec<Event>,
    pub branches: BTreeSet<Vec<u8>>,
    pub marks: HashMap<Mark, usize>,
    /// commit mark -> event indices of its child commits.
    pub children: HashMap<Mark, Vec<usize>>,
    /// commit mark -> event indices of tags attached to it.
    pub tags_for: HashMap<Mark, Vec<usize>>,
    /// commit mark -> event indices of resets attached to it.
    pub resets_for: HashMap<Mark, Vec<usize>>,
    pub scratch: ScratchDir,
}

impl Repository {
    pub fn new(scratch: ScratchDir) -> Self {
        Repository {
            events: Vec::new(),
            branches: BTreeSet::new(),
            marks: HashMap::new(),
            children: HashMap::new(),
            tags_for: HashMap::new(),
            resets_for: HashMap::new(),
            scratch,
        }
    }

    pub fn commit_by_mark(&self, mark: Mark) -> Option<&Commit> {
        match self.marks.get(&mark) {
            Some(&idx) => match &self.events[idx] {
                Event::Commit(c) => Some(c),
                _ => None,
            },
            None => None,
        }
    }

    pub fn blob_by_mark(&self, mark: Mark) -> Option<&Blob> {
        match self.marks.get(&mark) {
            Some(&idx) => match &self.events[idx] {
                Event::Blob(b) => Some(b),
                _ => None,
            },
            None => None,
        }
    }

    /// A commit is its branch's tip when no child commit shares its
    /// branch name. Decides whether a branch symbol is (re)attached
    /// after each of its check-ins.
    pub fn is_branch_tip(&self, commit: &Commit) -> bool {
        match self.children.get(&commit.mark) {
            None => true,
            Some(kids) => !kids.iter().any(|&i| match &self.events[i] {
                Event::Commit(k) => k.branch == commit.branch,
                _ => false,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_unix_form_keeps_zone_verbatim() {
        let d = Date::parse(b"1000000000 +0530").unwrap();
        assert_eq!(d.seconds, 1_000_000_000);
        assert_eq!(d.raw, b"1000000000 +0530");
        assert_eq!(d.rcs_form(), "2001/09/09 01:46:40");
    }

    #[test]
    fn date_negative_epoch() {
        let d = Date::parse(b"-3600 +0000").unwrap();
        assert_eq!(d.seconds, -3600);
    }

    #[test]
    fn date_rfc822_form() {
        let d = Date::parse(b"Sun, 9 Sep 2001 01:46:40 +0000").unwrap();
        assert_eq!(d.seconds, 1_000_000_000);
    }

    #[test]
    fn date_garbage_is_rejected() {
        assert!(Date::parse(b"yesterday").is_err());
    }

    #[test]
    fn identity_formats_name_and_email() {
        let a = Attribution {
            name: b"A Hacker".to_vec(),
            email: b"a@example.com".to_vec(),
            date: Date::parse(b"0 +0000").unwrap(),
        };
        assert_eq!(a.identity(), b"A Hacker <a@example.com>");
    }
}
