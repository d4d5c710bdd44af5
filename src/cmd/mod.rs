//! CLI command implementations.
//!
//! | Module     | Commands handled  |
//! |------------|-------------------|
//! | `run`      | `Run`             |
//! | `detect`   | `Detect`          |
//! | `clean`    | `Clean`           |
//! | `config`   | `Validate`        |
//!
//! Every command returns whether the process should exit successfully.

pub mod clean;
pub mod config;
pub mod detect;
pub mod run;

pub use clean::cmd_clean;
pub use config::cmd_validate;
pub use detect::cmd_detect;
pub use run::cmd_run;

use super::ScopeArgs;
use gauntlet::diff::DiffSource;
use gauntlet::orchestrator::RunOptions;

/// CI is detected from the environment the way most CI providers expose it.
pub fn is_ci() -> bool {
    ["CI", "GITHUB_ACTIONS"].iter().any(|var| {
        std::env::var(var)
            .map(|v| !v.is_empty() && v != "false" && v != "0")
            .unwrap_or(false)
    })
}

pub fn run_options(scope: &ScopeArgs) -> RunOptions {
    let diff_source = match (&scope.commit, scope.uncommitted) {
        (Some(sha), _) => Some(DiffSource::Commit(sha.clone())),
        (None, true) => Some(DiffSource::Uncommitted),
        (None, false) => None,
    };
    RunOptions {
        base_ref_override: scope.base_ref.clone(),
        gate_filter: scope.gate.clone(),
        diff_source,
        ci: is_ci(),
    }
}
