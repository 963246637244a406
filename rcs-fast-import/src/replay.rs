use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::assign::Assigner;
use crate::event::{BlobRef, Commit, Event, FileOp, Repository, Tag};
use crate::opts::{CheckoutMode, Options};
use crate::pathutil::{display_bytes, master_path, rcs_dir, working_path};
use crate::progress;
use crate::revision::RevId;

/// Operations the replay engine needs from a version-control backend.
/// The production implementation drives the RCS command-line tools;
/// tests substitute a recording driver.
pub trait VcsOps {
    /// Check `file`'s working copy in as `rev`, keeping the lock.
    fn checkin(
        &mut self,
        file: &[u8],
        rev: &RevId,
        date: &str,
        comment: &[u8],
        state: Option<&str>,
    ) -> io::Result<()>;

    /// Produce a working copy of `file`; `None` means the head revision.
    fn checkout(&mut self, file: &[u8], rev: Option<&RevId>, locked: bool) -> io::Result<()>;

    fn lock(&mut self, file: &[u8], rev: &RevId) -> io::Result<()>;

    fn unlock(&mut self, file: &[u8]) -> io::Result<()>;

    /// Attach symbolic name `name` at `rev` (a revision or branch ID).
    fn symbol(&mut self, file: &[u8], name: &[u8], rev: &str) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileState {
    Live,
    Deleted,
}

/// How the working file gets its content before a check-in.
enum Content {
    /// Hard-link a spill file into place.
    Link(PathBuf),
    /// Write an empty working file (deletions).
    Empty,
    /// The working file is already in place (copy targets).
    InPlace,
}

pub struct Replayer<'a, V: VcsOps> {
    repo: &'a Repository,
    opts: &'a Options,
    vcs: &'a mut V,
    root: PathBuf,
    assigner: Assigner,
    /// (branch, path) -> live/deleted, driving DeleteAll expansion.
    state: BTreeMap<(Vec<u8>, Vec<u8>), FileState>,
    /// path -> revision most recently checked in, for relock detection.
    last_checkin: HashMap<Vec<u8>, RevId>,
    masters: BTreeSet<Vec<u8>>,
    tag_content: Vec<u8>,
    tag_rev: Option<RevId>,
    interrupt: &'a AtomicBool,
    commits: usize,
}

const TAG_FILE: &[u8] = b"ANNOTATED-TAGS";

impl<'a, V: VcsOps> Replayer<'a, V> {
    pub fn new(
        repo: &'a Repository,
        opts: &'a Options,
        vcs: &'a mut V,
        root: PathBuf,
        interrupt: &'a AtomicBool,
    ) -> Self {
        Replayer {
            repo,
            opts,
            vcs,
            root,
            assigner: Assigner::new(),
            state: BTreeMap::new(),
            last_checkin: HashMap::new(),
            masters: BTreeSet::new(),
            tag_content: Vec::new(),
            tag_rev: None,
            interrupt,
            commits: 0,
        }
    }

    /// Replays all events in stream order. Blobs were spilled at parse
    /// time; tags and resets act through their attached commits;
    /// passthroughs are never emitted to RCS.
    pub fn replay(&mut self) -> io::Result<()> {
        let mut baton = progress::Baton::start("importing");
        for event in &self.repo.events {
            if self.interrupt.load(Ordering::Relaxed) {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "interrupted"));
            }
            baton.twirl();
            if let Event::Commit(c) = event {
                self.replay_commit(c)?;
                self.commits += 1;
            }
        }
        baton.end(&format!("done ({} commits)", self.commits));
        Ok(())
    }

    /// Current tip revision for (path, branch).
    pub fn tip(&self, path: &[u8], branch: &[u8]) -> Option<RevId> {
        self.assigner.tip(path, branch).cloned()
    }

    /// Child branches observed at the commit with the given mark, in
    /// allocation order.
    pub fn child_branches(&self, mark: crate::event::Mark) -> &[Vec<u8>] {
        self.assigner.child_branches(mark)
    }

    /// Post-run disposition of the masters and working files.
    pub fn finish(&mut self) -> io::Result<()> {
        match self.opts.checkout {
            // Check-ins hold the locks already.
            CheckoutMode::Locked => {}
            CheckoutMode::Unlocked => {
                for master in &self.masters {
                    self.vcs.unlock(master)?;
                    self.vcs.checkout(master, None, false)?;
                }
            }
            CheckoutMode::None => {
                for master in &self.masters {
                    self.vcs.unlock(master)?;
                }
            }
        }
        Ok(())
    }

    fn replay_commit(&mut self, c: &Commit) -> io::Result<()> {
        self.precommit(c);
        let comment = self.comment_for(c);
        for op in &c.ops {
            if self.interrupt.load(Ordering::Relaxed) {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "interrupted"));
            }
            match op {
                FileOp::Modify {
                    mode,
                    content,
                    path,
                } => self.do_modify(c, &comment, mode, content, path)?,
                FileOp::Delete { path } => self.do_delete(c, &comment, path, "Delete")?,
                FileOp::Rename { source, target } => {
                    self.do_copy(c, &comment, source, target, "Rename")?;
                    self.do_delete(c, &comment, source, "Rename")?;
                }
                FileOp::Copy { source, target } => {
                    self.do_copy(c, &comment, source, target, "Copy")?
                }
                FileOp::DeleteAll => self.do_deleteall(c, &comment)?,
            }
        }
        self.postcommit(c)
    }

    // Reserved hook; today it only diagnoses merge commits, which RCS
    // cannot represent.
    fn precommit(&self, c: &Commit) {
        if c.parents.len() > 1 {
            progress::warn(&format!(
                "commit :{} merges {} parents; only the first is kept",
                c.mark,
                c.parents.len()
            ));
        }
    }

    fn postcommit(&mut self, c: &Commit) -> io::Result<()> {
        let indices = match self.repo.tags_for.get(&c.mark) {
            Some(v) => v.clone(),
            None => return Ok(()),
        };
        for i in indices {
            if let Event::Tag(t) = &self.repo.events[i] {
                self.do_annotated_tag(c, t)?;
            }
        }
        Ok(())
    }

    fn do_modify(
        &mut self,
        c: &Commit,
        comment: &[u8],
        mode: &[u8],
        content: &BlobRef,
        path: &[u8],
    ) -> io::Result<()> {
        match mode {
            b"100644" | b"100755" => {}
            b"120000" => {
                return Err(capability(format!(
                    "cannot import symbolic link {}",
                    display_bytes(path)
                )));
            }
            b"160000" => {
                return Err(capability(format!(
                    "cannot import submodule pointer {}",
                    display_bytes(path)
                )));
            }
            other => {
                return Err(capability(format!(
                    "unsupported file mode {} on {}",
                    display_bytes(other),
                    display_bytes(path)
                )));
            }
        }
        if progress::enabled(progress::OPS) {
            progress::note(&format!("modify {}", display_bytes(path)));
        }
        let spill = match content {
            BlobRef::Mark(m) => {
                let blob = self.repo.blob_by_mark(*m).ok_or_else(|| {
                    capability(format!("modify references unknown blob :{}", m))
                })?;
                blob.file.clone()
            }
            BlobRef::Spilled(p) => p.clone(),
        };
        self.checkin_file(c, comment, path, Content::Link(spill), None)?;
        self.state
            .insert((c.branch.clone(), path.to_vec()), FileState::Live);
        Ok(())
    }

    fn do_delete(
        &mut self,
        c: &Commit,
        comment: &[u8],
        path: &[u8],
        legend: &str,
    ) -> io::Result<()> {
        if progress::enabled(progress::OPS) {
            progress::note(&format!("{} {}", legend.to_lowercase(), display_bytes(path)));
        }
        self.checkin_file(c, comment, path, Content::Empty, Some("Deleted"))?;
        self.state
            .insert((c.branch.clone(), path.to_vec()), FileState::Deleted);
        Ok(())
    }

    /// History does not carry across a copy: the target starts as a
    /// fresh master holding the source tip's content.
    fn do_copy(
        &mut self,
        c: &Commit,
        comment: &[u8],
        source: &[u8],
        target: &[u8],
        legend: &str,
    ) -> io::Result<()> {
        if master_path(&self.root, target).exists() {
            return Err(capability(format!(
                "{} target {} is already versioned",
                legend.to_lowercase(),
                display_bytes(target)
            )));
        }
        let tip = self
            .assigner
            .tip(source, &c.branch)
            .cloned()
            .ok_or_else(|| {
                capability(format!(
                    "{} source {} has no revision on branch {}",
                    legend.to_lowercase(),
                    display_bytes(source),
                    display_bytes(&c.branch)
                ))
            })?;
        if progress::enabled(progress::SHUFFLE) {
            progress::note(&format!(
                "{}: {} ({}) -> {}",
                legend,
                display_bytes(source),
                tip,
                display_bytes(target)
            ));
        }
        self.vcs.checkout(source, Some(&tip), false)?;
        let src_work = working_path(&self.root, source);
        let dst_work = working_path(&self.root, target);
        if let Some(parent) = dst_work.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&src_work, &dst_work)?;
        self.checkin_file(c, comment, target, Content::InPlace, None)?;
        self.state
            .insert((c.branch.clone(), target.to_vec()), FileState::Live);
        Ok(())
    }

    fn do_deleteall(&mut self, c: &Commit, comment: &[u8]) -> io::Result<()> {
        let live: Vec<Vec<u8>> = self
            .state
            .iter()
            .filter(|((branch, _), st)| branch == &c.branch && **st == FileState::Live)
            .map(|((_, path), _)| path.clone())
            .collect();
        if progress::enabled(progress::DELETES) {
            progress::note(&format!(
                "deleteall removes {} paths on {}",
                live.len(),
                display_bytes(&c.branch)
            ));
        }
        for path in live {
            self.do_delete(c, comment, &path, "Delete")?;
        }
        Ok(())
    }

    fn do_annotated_tag(&mut self, c: &Commit, t: &Tag) -> io::Result<()> {
        // One line of headers+body per tag; the body's newlines are
        // flattened since RCS cannot hold the structure natively.
        let mut line = Vec::new();
        line.extend_from_slice(b"tag ");
        line.extend_from_slice(&t.name);
        if let Some(tagger) = &t.tagger {
            line.extend_from_slice(b" tagger ");
            line.extend_from_slice(&tagger.identity());
            line.push(b' ');
            line.extend_from_slice(&tagger.date.raw);
        }
        line.extend_from_slice(b": ");
        line.extend(
            t.comment
                .iter()
                .map(|&b| if b == b'\n' { b' ' } else { b }),
        );
        while line.last() == Some(&b' ') {
            line.pop();
        }
        line.push(b'\n');
        self.tag_content.extend_from_slice(&line);

        fs::create_dir_all(rcs_dir(&self.root, TAG_FILE))?;
        fs::write(working_path(&self.root, TAG_FILE), &self.tag_content)?;
        let rev = match &self.tag_rev {
            Some(r) => r.successor(),
            None => RevId::fresh(),
        };
        let date = t
            .tagger
            .as_ref()
            .map(|a| a.date.rcs_form())
            .unwrap_or_else(|| c.committer.date.rcs_form());
        let note = format!("Annotated tag {}", String::from_utf8_lossy(&t.name));
        self.vcs
            .checkin(TAG_FILE, &rev, &date, note.as_bytes(), None)?;
        remove_working(&self.root, TAG_FILE)?;
        self.last_checkin.insert(TAG_FILE.to_vec(), rev.clone());
        self.masters.insert(TAG_FILE.to_vec());
        self.tag_rev = Some(rev);

        // The tag name lands on every master at its latest revision.
        for master in &self.masters {
            if let Some(at) = self.last_checkin.get(master.as_slice()) {
                self.vcs.symbol(master, &t.name, &at.to_string())?;
            }
        }
        Ok(())
    }

    fn checkin_file(
        &mut self,
        c: &Commit,
        comment: &[u8],
        path: &[u8],
        content: Content,
        state: Option<&str>,
    ) -> io::Result<()> {
        fs::create_dir_all(rcs_dir(&self.root, path))?;
        let working = working_path(&self.root, path);
        match content {
            Content::Link(spill) => {
                if working.exists() {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("working file {} already exists", working.display()),
                    ));
                }
                fs::hard_link(&spill, &working)?;
            }
            Content::Empty => {
                fs::write(&working, b"")?;
            }
            Content::InPlace => {}
        }
        let master_exists = master_path(&self.root, path).exists();
        let rev = self.assigner.assign(self.repo, c, path, master_exists)?;
        if master_exists && self.last_checkin.get(path) != rev.parent().as_ref() {
            // Re-entering an older branch: move the lock to the new
            // revision's parent before checking in.
            let parent = rev.parent().ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("revision {} of existing master has no parent", rev),
                )
            })?;
            self.vcs.unlock(path)?;
            self.vcs.lock(path, &parent)?;
        }
        let date = c.committer.date.rcs_form();
        self.vcs.checkin(path, &rev, &date, comment, state)?;
        remove_working(&self.root, path)?;
        self.last_checkin.insert(path.to_vec(), rev.clone());
        self.masters.insert(path.to_vec());
        self.attach_symbols(c, path, &rev)
    }

    fn attach_symbols(&mut self, c: &Commit, path: &[u8], rev: &RevId) -> io::Result<()> {
        if self.repo.is_branch_tip(c) {
            self.vcs.symbol(path, &c.branch, &rev.branch_of())?;
        }
        if let Some(resets) = self.repo.resets_for.get(&c.mark) {
            for &i in resets {
                if let Event::Reset(r) = &self.repo.events[i] {
                    self.vcs.symbol(path, &r.ref_name, &rev.to_string())?;
                }
            }
        }
        Ok(())
    }

    /// The check-in comment: raw payload in plain mode, otherwise an
    /// RFC-822 envelope carrying the stream metadata RCS cannot store.
    fn comment_for(&self, c: &Commit) -> Vec<u8> {
        if self.opts.plain {
            return c.comment.clone();
        }
        let mut out = Vec::new();
        for (i, a) in c.authors.iter().enumerate() {
            let key = if i == 0 {
                String::from("Author")
            } else {
                format!("Author{}", i + 1)
            };
            push_header(&mut out, &key, &a.identity());
            push_header(&mut out, &format!("{}-Date", key), &a.date.raw);
        }
        push_header(&mut out, "Committer", &c.committer.identity());
        push_header(&mut out, "Committer-Date", &c.committer.date.raw);
        let mut flags: Vec<&str> = Vec::new();
        for (name, value) in &c.properties {
            match value {
                Some(v) => push_header(
                    &mut out,
                    &format!("Property-{}", capitalize(name)),
                    &fold(v),
                ),
                None => flags.push(name),
            }
        }
        if !flags.is_empty() {
            push_header(&mut out, "Empty-Properties", flags.join(", ").as_bytes());
        }
        push_header(&mut out, "Mark", format!(":{}", c.mark).as_bytes());
        if !c.parents.is_empty() {
            let parents = c
                .parents
                .iter()
                .map(|m| format!(":{}", m))
                .collect::<Vec<_>>()
                .join(", ");
            push_header(&mut out, "Parents", parents.as_bytes());
        }
        out.push(b'\n');
        out.extend_from_slice(&c.comment);
        out
    }
}

fn push_header(out: &mut Vec<u8>, key: &str, value: &[u8]) {
    out.extend_from_slice(key.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value);
    out.push(b'\n');
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// RFC-822 folding for multi-line property values.
fn fold(value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for &b in value {
        out.push(b);
        if b == b'\n' {
            out.push(b'\t');
        }
    }
    out
}

fn remove_working(root: &std::path::Path, path: &[u8]) -> io::Result<()> {
    match fs::remove_file(working_path(root, path)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn capability(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, msg)
}
