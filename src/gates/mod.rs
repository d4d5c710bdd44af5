//! Jobs and their results.
//!
//! A [`Job`] is one gate bound to one entry point. Jobs are created once per
//! invocation from the configuration and the change set (see
//! [`entry_points`]) and never change afterwards. Each job produces exactly
//! one [`GateResult`].

pub mod check;
pub mod entry_points;

pub use check::{preflight_failure, run_check};
pub use entry_points::{ExpandedEntryPoint, build_jobs, expand_entry_points};

use crate::artifacts::naming::sanitize_job_id;
use crate::config::{CheckGateConfig, ReviewGateConfig};
use crate::review::findings::{Violation, ViolationStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Check,
    Review,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Check => write!(f, "check"),
            Self::Review => write!(f, "review"),
        }
    }
}

/// Gate configuration carried by a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateSpec {
    Check(CheckGateConfig),
    Review(ReviewGateConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// `<kind>:<entry point>:<gate name>`
    pub id: String,
    pub kind: JobKind,
    pub name: String,
    pub entry_point: String,
    pub working_directory: PathBuf,
    pub gate: GateSpec,
    /// Changed files that made this entry point applicable.
    pub files: Vec<String>,
}

impl Job {
    pub fn make_id(kind: JobKind, entry_point: &str, name: &str) -> String {
        format!("{}:{}:{}", kind, entry_point, name)
    }

    /// Sanitized id used in artifact names and recovery keys.
    pub fn artifact_key(&self) -> String {
        sanitize_job_id(&self.id)
    }

    /// Whether the job may run in the parallel set.
    pub fn is_parallel(&self) -> bool {
        match &self.gate {
            GateSpec::Check(check) => check.parallel,
            GateSpec::Review(review) => review.parallel,
        }
    }

    /// Only check gates can stop the sequential set.
    pub fn is_fail_fast(&self) -> bool {
        matches!(&self.gate, GateSpec::Check(check) if check.fail_fast)
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateStatus {
    Pass,
    Fail,
    Error,
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Outcome of one job in one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct GateResult {
    pub job_id: String,
    pub kind: JobKind,
    pub status: GateStatus,
    pub duration_ms: u64,
    pub message: String,
    pub artifact_paths: Vec<PathBuf>,
    /// Review findings that survived filtering, across all slots.
    pub violations: Vec<Violation>,
}

impl GateResult {
    pub fn new(job: &Job, status: GateStatus, duration: Duration, message: impl Into<String>) -> Self {
        Self {
            job_id: job.id.clone(),
            kind: job.kind,
            status,
            duration_ms: duration.as_millis() as u64,
            message: message.into(),
            artifact_paths: Vec::new(),
            violations: Vec::new(),
        }
    }

    pub fn with_artifacts(mut self, paths: Vec<PathBuf>) -> Self {
        self.artifact_paths = paths;
        self
    }

    pub fn with_violations(mut self, violations: Vec<Violation>) -> Self {
        self.violations = violations;
        self
    }

    pub fn passed(&self) -> bool {
        self.status == GateStatus::Pass
    }

    pub fn new_violation_count(&self) -> usize {
        self.violations
            .iter()
            .filter(|v| v.status == ViolationStatus::New)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_job(parallel: bool, fail_fast: bool) -> Job {
        Job {
            id: Job::make_id(JobKind::Check, "src", "lint"),
            kind: JobKind::Check,
            name: "lint".to_string(),
            entry_point: "src".to_string(),
            working_directory: PathBuf::from("/tmp"),
            gate: GateSpec::Check(CheckGateConfig {
                command: "true".to_string(),
                working_directory: None,
                parallel,
                fail_fast,
                timeout_secs: 10,
            }),
            files: vec!["src/lib.rs".to_string()],
        }
    }

    #[test]
    fn test_job_id_and_key() {
        let job = check_job(true, false);
        assert_eq!(job.id, "check:src:lint");
        assert_eq!(job.artifact_key(), "check_src_lint");
        assert_eq!(job.to_string(), "check:src:lint");
    }

    #[test]
    fn test_parallel_and_fail_fast_flags() {
        assert!(check_job(true, false).is_parallel());
        assert!(check_job(false, true).is_fail_fast());

        let mut review = check_job(false, false);
        review.kind = JobKind::Review;
        review.gate = GateSpec::Review(ReviewGateConfig::default());
        assert!(review.is_parallel());
        assert!(!review.is_fail_fast());
    }

    #[test]
    fn test_gate_result_counts_new_violations() {
        use crate::review::findings::Priority;
        let result = GateResult::new(&check_job(true, false), GateStatus::Fail, Duration::from_millis(12), "x")
            .with_violations(vec![
                Violation::new("a.rs", Some(1), "x", Priority::High),
                Violation::new("a.rs", Some(2), "y", Priority::High).with_status(ViolationStatus::Fixed),
            ]);
        assert_eq!(result.new_violation_count(), 1);
        assert_eq!(result.duration_ms, 12);
        assert!(!result.passed());
    }
}
