//! Categorised change statistics parsed from git's numstat and name-status
//! tables.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Summary of one change set. Derived on every invocation, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub base_ref: String,
    pub files_total: usize,
    pub files_new: usize,
    pub files_modified: usize,
    pub files_deleted: usize,
    pub lines_added: u64,
    pub lines_removed: u64,
}

impl fmt::Display for DiffStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} file(s) vs {} ({} new, {} modified, {} deleted), +{} -{}",
            self.files_total,
            self.base_ref,
            self.files_new,
            self.files_modified,
            self.files_deleted,
            self.lines_added,
            self.lines_removed
        )
    }
}

/// One row of a `--numstat` table. Binary files carry no line counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumstatEntry {
    pub path: String,
    pub added: Option<u64>,
    pub removed: Option<u64>,
}

impl NumstatEntry {
    pub fn is_binary(&self) -> bool {
        self.added.is_none() && self.removed.is_none()
    }
}

/// Status letter of a `--name-status` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileStatus {
    Added,
    Modified,
    Renamed,
    Copied,
    TypeChanged,
    Deleted,
}

impl FileStatus {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.chars().next()? {
            'A' => Some(Self::Added),
            'M' => Some(Self::Modified),
            'R' => Some(Self::Renamed),
            'C' => Some(Self::Copied),
            'T' => Some(Self::TypeChanged),
            'D' => Some(Self::Deleted),
            _ => None,
        }
    }

    pub fn code(&self) -> char {
        match self {
            Self::Added => 'A',
            Self::Modified => 'M',
            Self::Renamed => 'R',
            Self::Copied => 'C',
            Self::TypeChanged => 'T',
            Self::Deleted => 'D',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameStatusEntry {
    pub status: FileStatus,
    pub path: String,
    /// Source path for renames and copies.
    pub old_path: Option<String>,
}

/// Parse `added\tremoved\tpath` rows. `-\t-\tpath` marks a binary file.
pub fn parse_numstat(text: &str) -> Vec<NumstatEntry> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            let added = parts.next()?;
            let removed = parts.next()?;
            let path = parts.next()?.trim();
            if path.is_empty() {
                return None;
            }
            Some(NumstatEntry {
                path: rename_target(path),
                added: added.trim().parse().ok(),
                removed: removed.trim().parse().ok(),
            })
        })
        .collect()
}

/// Parse `X\tpath` and `R100\told\tnew` rows. Unknown codes are skipped.
pub fn parse_name_status(text: &str) -> Vec<NameStatusEntry> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.split('\t');
            let status = FileStatus::from_code(parts.next()?.trim())?;
            let first = parts.next()?.trim().to_string();
            match (status, parts.next()) {
                (FileStatus::Renamed | FileStatus::Copied, Some(second)) => Some(NameStatusEntry {
                    status,
                    path: second.trim().to_string(),
                    old_path: Some(first),
                }),
                _ => Some(NameStatusEntry {
                    status,
                    path: first,
                    old_path: None,
                }),
            }
        })
        .collect()
}

/// Combine both tables and the untracked-file list into categorised counts.
///
/// Untracked files count as new with an unknown line delta.
pub fn summarize(
    base_ref: &str,
    numstat: &[NumstatEntry],
    name_status: &[NameStatusEntry],
    untracked: &[String],
) -> DiffStats {
    let mut stats = DiffStats {
        base_ref: base_ref.to_string(),
        ..Default::default()
    };

    for entry in name_status {
        match entry.status {
            FileStatus::Added | FileStatus::Copied => stats.files_new += 1,
            FileStatus::Modified | FileStatus::Renamed | FileStatus::TypeChanged => {
                stats.files_modified += 1
            }
            FileStatus::Deleted => stats.files_deleted += 1,
        }
    }
    stats.files_new += untracked.len();
    stats.files_total = name_status.len() + untracked.len();

    for entry in numstat.iter().filter(|e| !e.is_binary()) {
        stats.lines_added += entry.added.unwrap_or(0);
        stats.lines_removed += entry.removed.unwrap_or(0);
    }

    stats
}

/// Resolve `old => new` and `dir/{old => new}/file` rename notation.
fn rename_target(path: &str) -> String {
    if let (Some(open), Some(close)) = (path.find('{'), path.rfind('}'))
        && open < close
        && let Some((_, new)) = path[open + 1..close].split_once(" => ")
    {
        let joined = format!("{}{}{}", &path[..open], new, &path[close + 1..]);
        return joined.replace("//", "/");
    }
    match path.split_once(" => ") {
        Some((_, new)) => new.to_string(),
        None => path.to_string(),
    }
}
