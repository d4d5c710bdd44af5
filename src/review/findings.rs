//! Review findings types for review gate outputs.
//!
//! ## Types
//!
//! - [`Priority`]: severity classification for a violation
//! - [`ViolationStatus`]: lifecycle of a violation across iterations
//! - [`Violation`]: a single issue at a file location
//! - [`ReviewArtifact`]: the JSON file written per review slot per iteration
//! - [`ReviewerOutput`]: the JSON a reviewer must return
//!
//! ## Example
//!
//! ```
//! use gauntlet::review::findings::{Priority, Violation, ViolationStatus};
//!
//! let violation = Violation::new("src/auth.rs", Some(42), "Token compared with ==", Priority::High)
//!     .with_fix("Use a constant-time comparison");
//!
//! assert!(violation.is_blocking());
//! assert!(Priority::High.meets(Priority::Medium));
//! assert_eq!(violation.status, ViolationStatus::New);
//! ```

use crate::errors::GateError;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Priority of a violation.
///
/// Variants are ordered from most to least severe, so `Critical < Low`
/// under `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    /// Whether this priority is at or above `threshold`.
    ///
    /// ```
    /// use gauntlet::review::findings::Priority;
    ///
    /// assert!(Priority::Critical.meets(Priority::High));
    /// assert!(Priority::High.meets(Priority::High));
    /// assert!(!Priority::Medium.meets(Priority::High));
    /// ```
    pub fn meets(&self, threshold: Priority) -> bool {
        *self <= threshold
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => anyhow::bail!(
                "Invalid priority '{}'. Valid values: critical, high, medium, low",
                s
            ),
        }
    }
}

/// Where a violation is in its lifecycle.
///
/// Reviewers only ever create `New`. The fixing agent flips a violation to
/// `Fixed` or `Skipped` by editing the artifact between iterations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationStatus {
    #[default]
    New,
    Fixed,
    Skipped,
}

impl fmt::Display for ViolationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Fixed => "fixed",
            Self::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// A single issue reported by a reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub issue: String,
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
    #[serde(default)]
    pub status: ViolationStatus,
    /// Free-form note from the fixing agent (e.g. why it was skipped).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl Violation {
    pub fn new(
        file: impl Into<String>,
        line: Option<u32>,
        issue: impl Into<String>,
        priority: Priority,
    ) -> Self {
        Self {
            file: file.into(),
            line,
            issue: issue.into(),
            priority,
            fix: None,
            status: ViolationStatus::New,
            result: None,
        }
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = Some(fix.into());
        self
    }

    pub fn with_status(mut self, status: ViolationStatus) -> Self {
        self.status = status;
        self
    }

    /// Only unresolved violations block a pass.
    pub fn is_blocking(&self) -> bool {
        self.status == ViolationStatus::New
    }

    /// Whether `other` describes the same finding: same file, and either the
    /// same line or the same issue text.
    pub fn matches(&self, other: &Violation) -> bool {
        if crate::diff::normalize_path(&self.file) != crate::diff::normalize_path(&other.file) {
            return false;
        }
        let same_line = self.line.is_some() && self.line == other.line;
        same_line || normalize_issue(&self.issue) == normalize_issue(&other.issue)
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "[{}] {}:{} {}", self.priority, self.file, line, self.issue),
            None => write!(f, "[{}] {} {}", self.priority, self.file, self.issue),
        }
    }
}

fn normalize_issue(issue: &str) -> String {
    issue
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Status recorded in a review artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pass,
    Fail,
    SkippedPriorPass,
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::SkippedPriorPass => "skipped_prior_pass",
        };
        write!(f, "{}", s)
    }
}

/// The JSON artifact written for one review slot in one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewArtifact {
    pub adapter: String,
    pub timestamp: DateTime<Utc>,
    pub status: ReviewStatus,
    #[serde(default)]
    pub raw_output: String,
    #[serde(default)]
    pub violations: Vec<Violation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_iteration: Option<u32>,
}

impl ReviewArtifact {
    pub fn new(adapter: impl Into<String>, status: ReviewStatus) -> Self {
        Self {
            adapter: adapter.into(),
            timestamp: Utc::now(),
            status,
            raw_output: String::new(),
            violations: Vec::new(),
            pass_iteration: None,
        }
    }

    /// Artifact for a slot that was not invoked because it passed earlier.
    pub fn skipped_prior_pass(adapter: impl Into<String>, pass_iteration: u32) -> Self {
        let mut artifact = Self::new(adapter, ReviewStatus::SkippedPriorPass);
        artifact.pass_iteration = Some(pass_iteration);
        artifact
    }

    pub fn with_raw_output(mut self, raw: impl Into<String>) -> Self {
        self.raw_output = raw.into();
        self
    }

    pub fn with_violations(mut self, violations: Vec<Violation>) -> Self {
        self.violations = violations;
        self
    }

    pub fn blocking_count(&self) -> usize {
        self.violations.iter().filter(|v| v.is_blocking()).count()
    }

    pub fn count_with_status(&self, status: ViolationStatus) -> usize {
        self.violations.iter().filter(|v| v.status == status).count()
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read review artifact: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse review artifact: {}", path.display()))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize review artifact")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write review artifact: {}", path.display()))
    }
}

/// Verdict a reviewer is allowed to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewerVerdict {
    Pass,
    Fail,
}

/// The exact JSON shape a reviewer must produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewerOutput {
    pub status: ReviewerVerdict,
    pub violations: Vec<Violation>,
}

/// Parse reviewer text strictly.
///
/// The text must be a single JSON object matching [`ReviewerOutput`],
/// optionally wrapped in one markdown code fence. Nothing is guessed: any
/// other shape is a [`GateError::MalformedOutput`].
pub fn parse_reviewer_output(adapter: &str, text: &str) -> Result<ReviewerOutput, GateError> {
    let malformed = |reason: String| GateError::MalformedOutput {
        adapter: adapter.to_string(),
        reason,
    };

    let body = strip_code_fence(text.trim())
        .ok_or_else(|| malformed("unterminated code fence".to_string()))?;
    if !body.starts_with('{') {
        return Err(malformed("output is not a JSON object".to_string()));
    }

    let mut output: ReviewerOutput =
        serde_json::from_str(body).map_err(|e| malformed(e.to_string()))?;

    // Whatever a reviewer claims, a fresh finding starts out unresolved.
    for violation in &mut output.violations {
        violation.status = ViolationStatus::New;
        violation.result = None;
    }
    Ok(output)
}

fn strip_code_fence(text: &str) -> Option<&str> {
    let Some(rest) = text.strip_prefix("```") else {
        return Some(text);
    };
    let after_info = rest.find('\n').map(|idx| &rest[idx + 1..])?;
    let body = after_info.trim_end().strip_suffix("```")?;
    Some(body.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering_and_threshold() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::Medium < Priority::Low);
        assert!(Priority::Critical.meets(Priority::Low));
        assert!(!Priority::Low.meets(Priority::Medium));
    }

    #[test]
    fn test_priority_from_str() {
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_violation_status_serialization() {
        assert_eq!(serde_json::to_string(&ViolationStatus::Fixed).unwrap(), "\"fixed\"");
        assert_eq!(
            serde_json::to_string(&ReviewStatus::SkippedPriorPass).unwrap(),
            "\"skipped_prior_pass\""
        );
    }

    #[test]
    fn test_violation_defaults_to_new_when_status_missing() {
        let v: Violation = serde_json::from_str(
            r#"{"file":"a.rs","line":3,"issue":"x","priority":"low"}"#,
        )
        .unwrap();
        assert_eq!(v.status, ViolationStatus::New);
        assert!(v.is_blocking());
    }

    #[test]
    fn test_violation_matching() {
        let prior = Violation::new("src/a.rs", Some(10), "Unchecked unwrap", Priority::High);
        let same_line = Violation::new("./src/a.rs", Some(10), "Different words", Priority::Low);
        let same_issue = Violation::new("src/a.rs", Some(14), "unchecked   UNWRAP", Priority::Low);
        let other_file = Violation::new("src/b.rs", Some(10), "Unchecked unwrap", Priority::High);

        assert!(same_line.matches(&prior));
        assert!(same_issue.matches(&prior));
        assert!(!other_file.matches(&prior));
    }

    #[test]
    fn test_artifact_uses_camel_case_fields() {
        let artifact = ReviewArtifact::skipped_prior_pass("claude", 2);
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["status"], "skipped_prior_pass");
        assert_eq!(json["passIteration"], 2);
        assert!(json.get("rawOutput").is_some());
    }

    #[test]
    fn test_artifact_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("review.json");
        let artifact = ReviewArtifact::new("codex", ReviewStatus::Fail)
            .with_raw_output("{}")
            .with_violations(vec![
                Violation::new("a.rs", Some(1), "bad", Priority::High).with_fix("make it good"),
            ]);
        artifact.write(&path).unwrap();

        let read = ReviewArtifact::read(&path).unwrap();
        assert_eq!(read, artifact);
        assert_eq!(read.blocking_count(), 1);
    }

    #[test]
    fn test_parse_reviewer_output_plain_json() {
        let text = r#"{"status":"fail","violations":[{"file":"a.rs","line":2,"issue":"bug","priority":"critical","status":"fixed"}]}"#;
        let output = parse_reviewer_output("claude", text).unwrap();
        assert_eq!(output.status, ReviewerVerdict::Fail);
        assert_eq!(output.violations.len(), 1);
        assert_eq!(output.violations[0].status, ViolationStatus::New);
    }

    #[test]
    fn test_parse_reviewer_output_fenced() {
        let text = "```json\n{\"status\": \"pass\", \"violations\": []}\n```\n";
        let output = parse_reviewer_output("gemini", text).unwrap();
        assert_eq!(output.status, ReviewerVerdict::Pass);
    }

    #[test]
    fn test_parse_reviewer_output_rejects_prose() {
        let text = "Looks good to me! {\"status\": \"pass\", \"violations\": []}";
        let err = parse_reviewer_output("claude", text).unwrap_err();
        assert!(matches!(err, GateError::MalformedOutput { .. }));
    }

    #[test]
    fn test_parse_reviewer_output_rejects_missing_fields() {
        assert!(parse_reviewer_output("claude", r#"{"status":"pass"}"#).is_err());
        assert!(parse_reviewer_output("claude", r#"{"status":"skipped_prior_pass","violations":[]}"#).is_err());
        assert!(
            parse_reviewer_output(
                "claude",
                r#"{"status":"fail","violations":[{"file":"a.rs","issue":"x","priority":"urgent"}]}"#
            )
            .is_err()
        );
    }

    #[test]
    fn test_parse_reviewer_output_rejects_trailing_text() {
        let text = "{\"status\": \"pass\", \"violations\": []}\nThanks!";
        assert!(parse_reviewer_output("claude", text).is_err());
    }
}
