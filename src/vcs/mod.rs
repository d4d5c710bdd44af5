//! Version-control capability used by the diff engine and the fix-base
//! resolver.

pub mod git;

pub use git::GitRepository;

use crate::diff::DiffSource;
use anyhow::Result;

/// Raw, unparsed change tables for one [`DiffSource`].
///
/// `numstat` and `name_status` use git's `--numstat` / `--name-status`
/// text formats. Untracked files are listed separately and never appear in
/// either table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawDiff {
    pub base_ref: String,
    pub patch: String,
    pub numstat: String,
    pub name_status: String,
    pub untracked: Vec<String>,
}

/// Everything the orchestrator needs from version control.
pub trait VersionControl: Send + Sync {
    /// Current branch name, or `HEAD` when detached.
    fn current_branch(&self) -> Result<String>;

    /// Full SHA of the HEAD commit.
    fn head_commit(&self) -> Result<String>;

    /// Whether an object with this SHA is still present in the object store.
    fn object_exists(&self, sha: &str) -> bool;

    /// Whether `commit` is reachable from `branch` (i.e. already merged).
    fn is_ancestor(&self, commit: &str, branch: &str) -> Result<bool>;

    /// Record staged, unstaged and untracked content as a detached commit
    /// without touching the index file, HEAD, refs or the working tree.
    /// Returns HEAD itself when the tree is clean.
    fn snapshot_working_tree(&self) -> Result<String>;

    /// Produce the change tables for `source`.
    fn raw_diff(&self, source: &DiffSource) -> Result<RawDiff>;
}
