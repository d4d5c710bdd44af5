//! Artifact filename encoding.
//!
//! Every artifact name packs `(job id, adapter, review index, run number)`
//! into one string:
//!
//! - check job: `<sanitizedJobId>.<run>.log`
//! - review slot: `<sanitizedJobId>_<adapter>@<index>.<run>.log` / `.json`
//!
//! [`ArtifactName`] is the in-memory form; [`ArtifactName::encode`] and
//! [`ArtifactName::parse`] are the only places the string layout lives.
//!
//! ```
//! use gauntlet::artifacts::naming::{ArtifactKind, ArtifactName};
//!
//! let name = ArtifactName::review("review:src:code-quality", "claude", 2, 3, ArtifactKind::Json);
//! assert_eq!(name.encode(), "review_src_code-quality_claude@2.3.json");
//!
//! let parsed = ArtifactName::parse("review_src_code-quality_claude@2.3.json").unwrap();
//! assert_eq!(parsed, name);
//! ```

use anyhow::{Context, Result};
use std::fmt;
use std::path::Path;

/// File extension of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Log,
    Json,
}

impl ArtifactKind {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Json => "json",
        }
    }

    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "log" => Some(Self::Log),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Review-slot part of an artifact name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotName {
    pub adapter: String,
    pub review_index: u32,
}

/// Structured form of an artifact filename.
///
/// `job` always holds the sanitized job id, since that is all a filename
/// can carry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactName {
    pub job: String,
    pub slot: Option<SlotName>,
    pub run_number: u32,
    pub kind: ArtifactKind,
}

impl ArtifactName {
    /// Name for a check job's log.
    pub fn check(job_id: &str, run_number: u32) -> Self {
        Self {
            job: sanitize_job_id(job_id),
            slot: None,
            run_number,
            kind: ArtifactKind::Log,
        }
    }

    /// Name for one review slot's log or JSON artifact.
    pub fn review(
        job_id: &str,
        adapter: &str,
        review_index: u32,
        run_number: u32,
        kind: ArtifactKind,
    ) -> Self {
        Self {
            job: sanitize_job_id(job_id),
            slot: Some(SlotName {
                adapter: adapter.to_string(),
                review_index,
            }),
            run_number,
            kind,
        }
    }

    pub fn review_index(&self) -> Option<u32> {
        self.slot.as_ref().map(|s| s.review_index)
    }

    pub fn adapter(&self) -> Option<&str> {
        self.slot.as_ref().map(|s| s.adapter.as_str())
    }

    /// Same name with a different extension.
    pub fn with_kind(&self, kind: ArtifactKind) -> Self {
        Self {
            kind,
            ..self.clone()
        }
    }

    pub fn encode(&self) -> String {
        match &self.slot {
            Some(slot) => format!(
                "{}_{}@{}.{}.{}",
                self.job,
                slot.adapter,
                slot.review_index,
                self.run_number,
                self.kind.extension()
            ),
            None => format!("{}.{}.{}", self.job, self.run_number, self.kind.extension()),
        }
    }

    /// Parse a filename back into its parts. Returns `None` for anything
    /// that is not an artifact (lock file, state file, foreign files).
    pub fn parse(file_name: &str) -> Option<Self> {
        let (stem, ext) = file_name.rsplit_once('.')?;
        let kind = ArtifactKind::from_extension(ext)?;
        let (head, run) = stem.rsplit_once('.')?;
        let run_number = parse_digits(run)?;

        let (job, slot) = match head.rsplit_once('@') {
            Some((prefix, index)) => {
                let review_index = parse_digits(index)?;
                let (job, adapter) = prefix.rsplit_once('_')?;
                if adapter.is_empty() {
                    return None;
                }
                (
                    job,
                    Some(SlotName {
                        adapter: adapter.to_string(),
                        review_index,
                    }),
                )
            }
            None => (head, None),
        };

        if job.is_empty() {
            return None;
        }

        Some(Self {
            job: job.to_string(),
            slot,
            run_number,
            kind,
        })
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

fn parse_digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Replace every character outside `[A-Za-z0-9-]` with `_`.
pub fn sanitize_job_id(job_id: &str) -> String {
    job_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Highest run number among the given file names, or 0.
pub fn max_run_number<'a>(names: impl IntoIterator<Item = &'a str>) -> u32 {
    names
        .into_iter()
        .filter_map(ArtifactName::parse)
        .map(|n| n.run_number)
        .max()
        .unwrap_or(0)
}

/// Regular-file names directly inside `dir`. A missing directory is empty.
pub fn list_artifact_dir(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read artifact directory: {}", dir.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// `1 + max(run number)` over every artifact in `dir`.
pub fn next_run_number(dir: &Path) -> Result<u32> {
    let names = list_artifact_dir(dir)?;
    Ok(max_run_number(names.iter().map(String::as_str)) + 1)
}
