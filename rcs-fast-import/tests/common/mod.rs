use std::fs;
use std::io::{self, Cursor};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use rcs_fast_import as rfi;

use rcs_fast_import::event::Repository;
use rcs_fast_import::pathutil::{display_bytes, master_path, working_path};
use rcs_fast_import::replay::{Replayer, VcsOps};
use rcs_fast_import::revision::RevId;
use rcs_fast_import::scratch::ScratchDir;
use tempfile::TempDir;

/// One recorded check-in, with the working file's content captured at
/// the moment the backend saw it.
#[derive(Debug, Clone)]
pub struct Checkin {
    pub file: String,
    pub rev: String,
    pub date: String,
    pub comment: Vec<u8>,
    pub state: Option<String>,
    pub content: Vec<u8>,
}

/// Test double for the RCS toolchain: records every call in order and
/// materializes enough filesystem state (masters, checked-out working
/// files) for the replay engine's own bookkeeping to work.
pub struct RecordingVcs {
    pub root: PathBuf,
    pub calls: Vec<String>,
    pub checkins: Vec<Checkin>,
}

impl RecordingVcs {
    pub fn new(root: PathBuf) -> Self {
        RecordingVcs {
            root,
            calls: Vec::new(),
            checkins: Vec::new(),
        }
    }

    pub fn checkins_of(&self, file: &str) -> Vec<&Checkin> {
        self.checkins.iter().filter(|c| c.file == file).collect()
    }
}

impl VcsOps for RecordingVcs {
    fn checkin(
        &mut self,
        file: &[u8],
        rev: &RevId,
        date: &str,
        comment: &[u8],
        state: Option<&str>,
    ) -> io::Result<()> {
        let master = master_path(&self.root, file);
        fs::create_dir_all(master.parent().unwrap())?;
        fs::write(&master, b"")?;
        let content = fs::read(working_path(&self.root, file)).unwrap_or_default();
        self.calls.push(format!("ci {} {}", display_bytes(file), rev));
        self.checkins.push(Checkin {
            file: display_bytes(file),
            rev: rev.to_string(),
            date: date.to_string(),
            comment: comment.to_vec(),
            state: state.map(|s| s.to_string()),
            content,
        });
        Ok(())
    }

    fn checkout(&mut self, file: &[u8], rev: Option<&RevId>, _locked: bool) -> io::Result<()> {
        let work = working_path(&self.root, file);
        fs::create_dir_all(work.parent().unwrap())?;
        let label = format!(
            "{}@{}",
            display_bytes(file),
            rev.map(|r| r.to_string()).unwrap_or_else(|| "head".into())
        );
        fs::write(&work, &label)?;
        self.calls.push(format!("co {}", label));
        Ok(())
    }

    fn lock(&mut self, file: &[u8], rev: &RevId) -> io::Result<()> {
        self.calls
            .push(format!("lock {} {}", display_bytes(file), rev));
        Ok(())
    }

    fn unlock(&mut self, file: &[u8]) -> io::Result<()> {
        self.calls.push(format!("unlock {}", display_bytes(file)));
        Ok(())
    }

    fn symbol(&mut self, file: &[u8], name: &[u8], rev: &str) -> io::Result<()> {
        self.calls.push(format!(
            "symbol {} {}={}",
            display_bytes(file),
            display_bytes(name),
            rev
        ));
        Ok(())
    }
}

pub fn parse_stream(stream: &str) -> io::Result<(Repository, TempDir)> {
    let base = TempDir::new().unwrap();
    let scratch = ScratchDir::create(base.path()).unwrap();
    let interrupt = AtomicBool::new(false);
    let repo = rfi::parser::parse(
        Cursor::new(stream.as_bytes().to_vec()),
        scratch,
        &interrupt,
    )?;
    Ok((repo, base))
}

pub struct Outcome {
    pub vcs: RecordingVcs,
    pub root: PathBuf,
    /// Keeps the scratch and working trees alive for assertions.
    pub base: TempDir,
}

pub fn replay_stream(stream: &str, opts: &rfi::Options) -> io::Result<Outcome> {
    let (repo, base) = parse_stream(stream)?;
    let root = base.path().join("work");
    fs::create_dir(&root).unwrap();
    let mut vcs = RecordingVcs::new(root.clone());
    let interrupt = AtomicBool::new(false);
    {
        let mut player = Replayer::new(&repo, opts, &mut vcs, root.clone(), &interrupt);
        player.replay()?;
        player.finish()?;
    }
    Ok(Outcome { vcs, root, base })
}
