//! Typed error hierarchy for the gauntlet orchestrator.
//!
//! Two top-level enums cover the two failure scopes:
//! - `GateError`: a single job or review slot failed, recorded as an `Error`
//!   result, never fatal to the run on its own
//! - `RunError`: the whole invocation cannot proceed

use std::path::PathBuf;
use thiserror::Error;

/// Failures scoped to one job or one review slot.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("Preflight failed for {job}: {reason}")]
    Preflight { job: String, reason: String },

    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{target} timed out after {secs}s")]
    Timeout { target: String, secs: u64 },

    #[error("Reviewer {adapter} failed: {message}")]
    AdapterFailed { adapter: String, message: String },

    #[error("Reviewer {adapter} returned malformed output: {reason}")]
    MalformedOutput { adapter: String, reason: String },
}

/// Failures that abort a whole invocation.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Another gauntlet run is active (lock {path} held by pid {owner})")]
    LockConflict { path: PathBuf, owner: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Version control error: {0}")]
    VersionControl(String),

    #[error("Artifact I/O failed at {path}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
