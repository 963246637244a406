use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

use crate::event::Mark;

/// Per-process spill area (`.rs<pid>` under the invocation directory) for
/// blob and inline payloads. Removed on every exit path: the guard's Drop
/// runs on success, on fatal error, and after an interrupt unwinds the run.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn create(base: &Path) -> io::Result<Self> {
        let path = base.join(format!(".rs{}", process::id()));
        fs::create_dir(&path).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("cannot create scratch directory {}: {}", path.display(), e),
            )
        })?;
        Ok(ScratchDir { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Spill path for the blob with the given mark; stable across the run
    /// so every later reference reuses the same file.
    pub fn blob_file(&self, mark: Mark) -> PathBuf {
        self.path.join(format!("blob-{}", mark))
    }

    /// Spill path for the n-th inline payload of the n-th commit.
    pub fn inline_file(&self, commit_seq: usize, op_seq: usize) -> PathBuf {
        self.path.join(format!("inline-{}-{}", commit_seq, op_seq))
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// Temporary working tree (`temp-import-<pid>`) the replay engine builds
/// the RCS tree in. `promote` moves the finished tree into the
/// destination; anything left behind is removed by Drop, so an aborted
/// run leaves the destination untouched.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    pub fn create(base: &Path) -> io::Result<Self> {
        let path = base.join(format!("temp-import-{}", process::id()));
        fs::create_dir(&path).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("cannot create working directory {}: {}", path.display(), e),
            )
        })?;
        Ok(WorkDir { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Renames each top-level entry of the working tree into `dest`.
    /// A pre-existing destination entry is fatal; nothing is moved
    /// partially in that case beyond entries already renamed.
    pub fn promote(&self, dest: &Path) -> io::Result<()> {
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let target = dest.join(entry.file_name());
            if target.exists() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("destination {} already exists", target.display()),
                ));
            }
            fs::rename(entry.path(), &target)?;
        }
        Ok(())
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn scratch_dir_is_removed_on_drop() {
        let base = TempDir::new().unwrap();
        let spill;
        {
            let scratch = ScratchDir::create(base.path()).unwrap();
            spill = scratch.blob_file(7);
            std::fs::write(&spill, b"payload").unwrap();
            assert!(spill.exists());
        }
        assert!(!spill.exists());
    }

    #[test]
    fn promote_moves_entries_and_refuses_conflicts() {
        let base = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let work = WorkDir::create(base.path()).unwrap();
        std::fs::create_dir_all(work.path().join("src/RCS")).unwrap();
        std::fs::write(work.path().join("src/RCS/a.c,v"), b"rcs").unwrap();
        work.promote(dest.path()).unwrap();
        assert!(dest.path().join("src/RCS/a.c,v").exists());

        // A second tree colliding with the first must be refused.
        let work2 = WorkDir::create(dest.path()).unwrap();
        std::fs::create_dir_all(work2.path().join("src")).unwrap();
        let err = work2.promote(dest.path()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }
}
