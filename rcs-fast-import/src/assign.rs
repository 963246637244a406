use std::collections::HashMap;
use std::io;

use crate::event::{Commit, Mark, Repository};
use crate::pathutil::display_bytes;
use crate::revision::RevId;

/// Maps the stream's DAG-with-named-branches model onto RCS per-file
/// revision trees. Owns the `(path, branch) -> tip` table and the
/// ordered child-branch lists that make branch numbering deterministic.
pub struct Assigner {
    tips: HashMap<(Vec<u8>, Vec<u8>), RevId>,
    /// (commit mark, path) -> revision checked in there; forks branch
    /// from the ancestor's own revision, not its branch's later tip.
    assigned: HashMap<(Mark, Vec<u8>), RevId>,
    child_branches: HashMap<Mark, Vec<Vec<u8>>>,
}

impl Assigner {
    pub fn new() -> Self {
        Assigner {
            tips: HashMap::new(),
            assigned: HashMap::new(),
            child_branches: HashMap::new(),
        }
    }

    /// Current tip revision for (path, branch), if any.
    pub fn tip(&self, path: &[u8], branch: &[u8]) -> Option<&RevId> {
        self.tips.get(&(path.to_vec(), branch.to_vec()))
    }

    /// Child branches observed forking off the given commit, in
    /// first-seen order.
    pub fn child_branches(&self, mark: Mark) -> &[Vec<u8>] {
        self.child_branches
            .get(&mark)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Picks the revision ID for a check-in of `path` at `commit` and
    /// records it as the new tip for (path, commit.branch).
    ///
    /// A fresh master gets 1.1. Otherwise the first-parent chain is
    /// climbed to the nearest ancestor that checked in a revision of
    /// the path: the same branch extends linearly from its tip, while a
    /// different branch forks a numbered child branch at the revision
    /// the ancestor itself holds.
    pub fn assign(
        &mut self,
        repo: &Repository,
        commit: &Commit,
        path: &[u8],
        master_exists: bool,
    ) -> io::Result<RevId> {
        if !master_exists {
            let rev = RevId::fresh();
            self.record(commit.mark, path, &commit.branch, rev.clone());
            return Ok(rev);
        }
        let mut cursor = commit.parents.first().copied();
        while let Some(mark) = cursor {
            let ancestor = repo.commit_by_mark(mark).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("commit :{} references unknown parent :{}", commit.mark, mark),
                )
            })?;
            let at = self
                .assigned
                .get(&(ancestor.mark, path.to_vec()))
                .cloned();
            if let Some(at) = at {
                let rev = if ancestor.branch == commit.branch {
                    self.tips
                        .get(&(path.to_vec(), commit.branch.clone()))
                        .cloned()
                        .unwrap_or(at)
                        .successor()
                } else {
                    let k = self.branch_number(ancestor.mark, &commit.branch);
                    at.branch_tip(k)
                };
                self.record(commit.mark, path, &commit.branch, rev.clone());
                return Ok(rev);
            }
            cursor = ancestor.parents.first().copied();
        }
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "no ancestor of commit :{} owns a revision of {} although its master exists",
                commit.mark,
                display_bytes(path)
            ),
        ))
    }

    /// 1-based branch number of `branch` among the children of the
    /// commit named by `mark`, allocating the next slot when new.
    fn branch_number(&mut self, mark: Mark, branch: &[u8]) -> u32 {
        let kids = self.child_branches.entry(mark).or_default();
        match kids.iter().position(|b| b == branch) {
            Some(i) => (i + 1) as u32,
            None => {
                kids.push(branch.to_vec());
                kids.len() as u32
            }
        }
    }

    fn record(&mut self, mark: Mark, path: &[u8], branch: &[u8], rev: RevId) {
        self.tips
            .insert((path.to_vec(), branch.to_vec()), rev.clone());
        self.assigned.insert((mark, path.to_vec()), rev);
    }
}
