//! Source repository access: commit resolution, ancestry intervals and
//! per-investigation working copies.

pub mod git;

use crate::error::Result;
use crate::types::CommitId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use git::{CommandRunner, GitRepo, ProcessCommandRunner};

/// What range and search logic needs from version control.
pub trait SourceRepository {
    /// Resolve a revision (full or abbreviated id, or ref name) to a full
    /// commit id, fetching from the remote when it is not present locally.
    fn resolve(&self, rev: &str) -> Result<CommitId>;

    /// Commits strictly between `good` and `bad` on the ancestry path,
    /// oldest first. Fails with `AncestryError` when `good` is not an
    /// ancestor of `bad`.
    fn ancestry_interval(&self, good: &CommitId, bad: &CommitId) -> Result<Vec<CommitId>>;
}

impl<T: SourceRepository + ?Sized> SourceRepository for &T {
    fn resolve(&self, rev: &str) -> Result<CommitId> {
        (**self).resolve(rev)
    }

    fn ancestry_interval(&self, good: &CommitId, bad: &CommitId) -> Result<Vec<CommitId>> {
        (**self).ancestry_interval(good, bad)
    }
}

/// A checked-out working copy owned by one investigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingCopyHandle {
    pub investigation_id: String,
    pub path: PathBuf,
    pub commit: CommitId,
}
