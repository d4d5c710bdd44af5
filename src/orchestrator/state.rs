//! Execution state: what the working tree looked like when the last run
//! finished, and how that record picks the diff anchor for the next one.
//!
//! The record lives in `<log_dir>/.execution_state`. It is rewritten at the
//! end of every invocation that got past the retry guard, survives normal
//! archiving, and is deleted only by auto-clean.

use crate::vcs::VersionControl;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const STATE_FILE_NAME: &str = ".execution_state";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub last_run_completed_at: DateTime<Utc>,
    pub branch: String,
    pub commit: String,
    /// Detached snapshot of staged, unstaged and untracked content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_tree_ref: Option<String>,
}

impl ExecutionState {
    pub fn path(log_dir: &Path) -> PathBuf {
        log_dir.join(STATE_FILE_NAME)
    }

    /// Record the current branch, HEAD and a working-tree snapshot.
    ///
    /// A failed snapshot is logged and recorded as absent; branch and HEAD
    /// are required.
    pub fn capture(vcs: &dyn VersionControl) -> Result<Self> {
        let branch = vcs.current_branch().context("Failed to read current branch")?;
        let commit = vcs.head_commit().context("Failed to read HEAD commit")?;
        let working_tree_ref = match vcs.snapshot_working_tree() {
            Ok(sha) => Some(sha),
            Err(e) => {
                tracing::warn!("Failed to snapshot working tree: {:#}", e);
                None
            }
        };
        Ok(Self {
            last_run_completed_at: Utc::now(),
            branch,
            commit,
            working_tree_ref,
        })
    }

    /// Load the record. Missing or unreadable records are `None`.
    pub fn load(log_dir: &Path) -> Option<Self> {
        let path = Self::path(log_dir);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!(path = %path.display(), "Ignoring corrupt execution state: {}", e);
                None
            }
        }
    }

    pub fn save(&self, log_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
        let path = Self::path(log_dir);
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize execution state")?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write execution state: {}", path.display()))
    }

    pub fn delete(log_dir: &Path) -> Result<()> {
        let path = Self::path(log_dir);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to delete execution state: {}", path.display()))?;
        }
        Ok(())
    }
}

/// Where a fresh run should measure changes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixBase {
    /// Diff against this ref. `degraded` means the snapshot was gone and
    /// the recorded commit stands in for it.
    Anchor { reference: String, degraded: bool },
    /// The recorded work has been merged into the base branch.
    Stale,
    /// Fall back to the full base-branch diff.
    NoAnchor,
}

fn recorded_commit_merged(state: &ExecutionState, vcs: &dyn VersionControl, base_branch: &str) -> bool {
    match vcs.is_ancestor(&state.commit, base_branch) {
        Ok(merged) => merged,
        Err(e) => {
            tracing::warn!(
                commit = %state.commit,
                base = base_branch,
                "Could not check whether recorded commit was merged: {:#}",
                e
            );
            false
        }
    }
}

/// Snapshot if it still exists, else the recorded commit (degraded).
fn surviving_anchor(state: &ExecutionState, vcs: &dyn VersionControl) -> Option<FixBase> {
    if let Some(snapshot) = &state.working_tree_ref
        && vcs.object_exists(snapshot)
    {
        return Some(FixBase::Anchor {
            reference: snapshot.clone(),
            degraded: false,
        });
    }

    if vcs.object_exists(&state.commit) {
        tracing::warn!(
            commit = %state.commit,
            "Working-tree snapshot is gone; scoping changes from the recorded commit instead"
        );
        return Some(FixBase::Anchor {
            reference: state.commit.clone(),
            degraded: true,
        });
    }

    None
}

/// Pick the diff anchor for a fresh run (no artifacts on disk).
///
/// Version-control errors never fail this: each step degrades to the next,
/// ending at [`FixBase::NoAnchor`].
pub fn resolve_fix_base(
    state: &ExecutionState,
    vcs: &dyn VersionControl,
    base_branch: &str,
) -> FixBase {
    if recorded_commit_merged(state, vcs, base_branch) {
        return FixBase::Stale;
    }
    surviving_anchor(state, vcs).unwrap_or(FixBase::NoAnchor)
}

/// Anchor for a verification run (artifacts exist): the recorded snapshot
/// scopes the iteration to the fixing agent's changes.
pub fn verification_anchor(state: &ExecutionState, vcs: &dyn VersionControl) -> FixBase {
    surviving_anchor(state, vcs).unwrap_or(FixBase::NoAnchor)
}

/// Why the recorded state must be discarded before a fresh run, if it must.
pub fn auto_clean_reason(
    state: &ExecutionState,
    vcs: &dyn VersionControl,
    base_branch: &str,
) -> Option<String> {
    match vcs.current_branch() {
        Ok(branch) if branch != state.branch => {
            return Some(format!(
                "branch changed from '{}' to '{}'",
                state.branch, branch
            ));
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("Could not read current branch: {:#}", e),
    }

    if recorded_commit_merged(state, vcs, base_branch) {
        return Some(format!(
            "recorded commit {} is merged into {}",
            crate::diff::short_sha(&state.commit),
            base_branch
        ));
    }

    None
}
