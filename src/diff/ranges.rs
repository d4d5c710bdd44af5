//! Unified-diff parsing into per-file sets of reviewable line numbers.
//!
//! The ranges computed here are the only thing that decides whether a
//! reviewer's violation points inside the change window.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

static HUNK_HEADER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("valid hunk regex")
});

/// Added line numbers (in the new version of each file), keyed by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffRanges {
    files: BTreeMap<String, BTreeSet<u32>>,
}

impl DiffRanges {
    pub fn lines(&self, file: &str) -> Option<&BTreeSet<u32>> {
        self.files.get(normalize_path(file))
    }

    pub fn contains(&self, file: &str, line: u32) -> bool {
        self.lines(file).is_some_and(|lines| lines.contains(&line))
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Drop every file for which `keep` returns false.
    pub fn retain_files(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.files.retain(|path, _| keep(path));
    }

    fn touch(&mut self, file: &str) {
        self.files.entry(file.to_string()).or_default();
    }

    fn insert(&mut self, file: &str, line: u32) {
        self.files.entry(file.to_string()).or_default().insert(line);
    }
}

/// Parse unified diff text into the set of added lines per file.
///
/// Hunk headers reset the target-line counter; `+` lines are recorded and
/// advance it, context lines only advance it, `-` lines never do. Files
/// under a `.git/` directory are excluded entirely.
pub fn parse_diff(diff: &str) -> DiffRanges {
    let mut ranges = DiffRanges::default();
    let mut current: Option<String> = None;
    let mut next_line: u32 = 0;
    let mut old_remaining: u32 = 0;
    let mut new_remaining: u32 = 0;

    for line in diff.lines() {
        let in_hunk = old_remaining > 0 || new_remaining > 0;

        if !in_hunk {
            if let Some(rest) = line.strip_prefix("diff --git ") {
                current = parse_git_header(rest).filter(|p| !is_vcs_metadata(p));
                if let Some(path) = &current {
                    ranges.touch(path);
                }
                continue;
            }
            if let Some(rest) = line.strip_prefix("+++ ") {
                let path = rest.trim_end();
                current = if path == "/dev/null" {
                    None
                } else {
                    Some(strip_prefixes(path).to_string()).filter(|p| !is_vcs_metadata(p))
                };
                if let Some(path) = &current {
                    ranges.touch(path);
                }
                continue;
            }
            if let Some(caps) = HUNK_HEADER_REGEX.captures(line) {
                let count = |idx: usize| {
                    caps.get(idx)
                        .and_then(|m| m.as_str().parse::<u32>().ok())
                        .unwrap_or(1)
                };
                next_line = caps[3].parse().unwrap_or(0);
                old_remaining = count(2);
                new_remaining = count(4);
            }
            continue;
        }

        match line.as_bytes().first() {
            Some(b'+') => {
                if let Some(file) = &current {
                    ranges.insert(file, next_line);
                }
                next_line += 1;
                new_remaining = new_remaining.saturating_sub(1);
            }
            Some(b'-') => {
                old_remaining = old_remaining.saturating_sub(1);
            }
            Some(b'\\') => {}
            // Context; some tools strip the leading space from blank lines.
            Some(b' ') | None => {
                next_line += 1;
                old_remaining = old_remaining.saturating_sub(1);
                new_remaining = new_remaining.saturating_sub(1);
            }
            Some(_) => {
                // Malformed hunk body: stop treating lines as part of it.
                old_remaining = 0;
                new_remaining = 0;
            }
        }
    }

    ranges
}

/// True only when `line` is present and falls on an added line of `file`.
pub fn is_valid_violation_location(file: &str, line: Option<u32>, ranges: &DiffRanges) -> bool {
    match line {
        Some(line) => ranges.contains(file, line),
        None => false,
    }
}

/// Strip `./` and the `a/` / `b/` prefixes git puts on diff paths.
pub fn normalize_path(path: &str) -> &str {
    let path = path.trim();
    path.strip_prefix("./").unwrap_or(path)
}

fn strip_prefixes(path: &str) -> &str {
    path.strip_prefix("b/")
        .or_else(|| path.strip_prefix("a/"))
        .unwrap_or(path)
}

fn parse_git_header(rest: &str) -> Option<String> {
    let idx = rest.rfind(" b/")?;
    Some(rest[idx + 3..].trim_end().to_string())
}

fn is_vcs_metadata(path: &str) -> bool {
    path == ".git" || path.starts_with(".git/") || path.contains("/.git/")
}
