//! Diff & violation-scoping engine.
//!
//! Turns raw version-control output into:
//! - [`DiffRanges`]: per-file sets of added line numbers (the review window)
//! - [`DiffStats`]: categorised file and line counts
//! - [`ChangeSet`]: both of the above plus the patch text and file list
//!
//! ## Example
//!
//! ```
//! use gauntlet::diff::{is_valid_violation_location, parse_diff};
//!
//! let diff = "diff --git a/a.rs b/a.rs\n--- a/a.rs\n+++ b/a.rs\n@@ -1,1 +1,2 @@\n fn a() {}\n+fn b() {}\n";
//! let ranges = parse_diff(diff);
//! assert!(is_valid_violation_location("a.rs", Some(2), &ranges));
//! assert!(!is_valid_violation_location("a.rs", Some(1), &ranges));
//! ```

pub mod ranges;
pub mod stats;

pub use ranges::{DiffRanges, is_valid_violation_location, normalize_path, parse_diff};
pub use stats::{
    DiffStats, FileStatus, NameStatusEntry, NumstatEntry, parse_name_status, parse_numstat,
    summarize,
};

use crate::vcs::{RawDiff, VersionControl};
use anyhow::Result;
use std::fmt;

/// What the current change window is measured against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffSource {
    /// A single commit against its parent (root diff when it has none).
    Commit(String),
    /// Staged, unstaged and untracked changes against HEAD.
    Uncommitted,
    /// Everything since the merge-base with `base`. In CI mode only committed
    /// history is compared.
    BaseBranch { base: String, ci: bool },
    /// A recorded working-tree snapshot against the current tree.
    FixBase(String),
}

impl fmt::Display for DiffSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Commit(sha) => write!(f, "commit {}", short_sha(sha)),
            Self::Uncommitted => write!(f, "uncommitted changes"),
            Self::BaseBranch { base, ci: true } => write!(f, "{}...HEAD", base),
            Self::BaseBranch { base, ci: false } => write!(f, "{} (working tree)", base),
            Self::FixBase(sha) => write!(f, "fix base {}", short_sha(sha)),
        }
    }
}

/// Everything downstream components need to know about "what changed".
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub source: DiffSource,
    pub stats: DiffStats,
    /// Unified patch text handed to reviewers.
    pub patch: String,
    pub ranges: DiffRanges,
    /// Changed paths (including deleted and untracked), sorted and unique.
    pub files: Vec<String>,
}

impl ChangeSet {
    /// Build a change set from raw version-control output.
    pub fn from_raw(source: DiffSource, raw: RawDiff) -> Self {
        let numstat = parse_numstat(&raw.numstat);
        let name_status = parse_name_status(&raw.name_status);
        let untracked: Vec<String> = raw
            .untracked
            .into_iter()
            .filter(|p| !is_vcs_path(p))
            .collect();
        let name_status: Vec<NameStatusEntry> = name_status
            .into_iter()
            .filter(|e| !is_vcs_path(&e.path))
            .collect();

        let stats = summarize(&raw.base_ref, &numstat, &name_status, &untracked);
        let ranges = parse_diff(&raw.patch);

        let mut files: Vec<String> = name_status
            .iter()
            .map(|e| e.path.clone())
            .chain(untracked)
            .collect();
        files.sort();
        files.dedup();

        Self {
            source,
            stats,
            patch: raw.patch,
            ranges,
            files,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// The portion of the patch that touches files accepted by `keep`.
    pub fn patch_for(&self, mut keep: impl FnMut(&str) -> bool) -> String {
        let mut out = String::new();
        let mut include = false;
        for section in split_patch_sections(&self.patch) {
            if let Some(path) = section_path(section) {
                include = keep(&path);
            }
            if include {
                out.push_str(section);
            }
        }
        out
    }
}

/// Compute the full change set for `source`.
pub fn compute_changes(vcs: &dyn VersionControl, source: &DiffSource) -> Result<ChangeSet> {
    let raw = vcs.raw_diff(source)?;
    Ok(ChangeSet::from_raw(source.clone(), raw))
}

/// Compute only the statistics for `source`. Stable across repeated calls
/// against unchanged refs.
pub fn compute_diff_stats(vcs: &dyn VersionControl, source: &DiffSource) -> Result<DiffStats> {
    Ok(compute_changes(vcs, source)?.stats)
}

pub(crate) fn short_sha(sha: &str) -> &str {
    &sha[..sha.len().min(8)]
}

fn is_vcs_path(path: &str) -> bool {
    path == ".git" || path.starts_with(".git/") || path.contains("/.git/")
}

/// Split a patch into per-file sections, each starting at `diff --git`.
fn split_patch_sections(patch: &str) -> Vec<&str> {
    let mut sections = Vec::new();
    let mut start = 0;
    for (idx, _) in patch.match_indices("diff --git ") {
        if idx == 0 || patch.as_bytes()[idx - 1] == b'\n' {
            if idx > start {
                sections.push(&patch[start..idx]);
            }
            start = idx;
        }
    }
    if start < patch.len() {
        sections.push(&patch[start..]);
    }
    sections
}

fn section_path(section: &str) -> Option<String> {
    let header = section.lines().next()?.strip_prefix("diff --git ")?;
    let idx = header.rfind(" b/")?;
    Some(header[idx + 3..].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawDiff {
        RawDiff {
            base_ref: "main".to_string(),
            patch: "diff --git a/src/a.rs b/src/a.rs\n--- a/src/a.rs\n+++ b/src/a.rs\n@@ -1,1 +1,2 @@\n a\n+b\ndiff --git a/docs/x.md b/docs/x.md\n--- a/docs/x.md\n+++ b/docs/x.md\n@@ -1,0 +1,1 @@\n+hello\n".to_string(),
            numstat: "1\t0\tsrc/a.rs\n1\t0\tdocs/x.md\n".to_string(),
            name_status: "M\tsrc/a.rs\nM\tdocs/x.md\n".to_string(),
            untracked: vec!["notes.txt".to_string(), ".git/HEAD".to_string()],
        }
    }

    #[test]
    fn test_change_set_from_raw() {
        let changes = ChangeSet::from_raw(DiffSource::Uncommitted, raw());
        assert_eq!(changes.files, vec!["docs/x.md", "notes.txt", "src/a.rs"]);
        assert_eq!(changes.stats.files_total, 3);
        assert_eq!(changes.stats.files_new, 1);
        assert!(changes.ranges.contains("src/a.rs", 2));
        assert!(!changes.is_empty());
    }

    #[test]
    fn test_patch_for_filters_sections() {
        let changes = ChangeSet::from_raw(DiffSource::Uncommitted, raw());
        let patch = changes.patch_for(|p| p.starts_with("src/"));
        assert!(patch.contains("src/a.rs"));
        assert!(!patch.contains("docs/x.md"));
    }

    #[test]
    fn test_diff_source_display() {
        assert_eq!(
            DiffSource::BaseBranch {
                base: "origin/main".into(),
                ci: true
            }
            .to_string(),
            "origin/main...HEAD"
        );
        assert_eq!(
            DiffSource::FixBase("0123456789abcdef".into()).to_string(),
            "fix base 01234567"
        );
    }
}
