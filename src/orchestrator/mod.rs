//! Invocation driver and the execution-state record it persists.

pub mod runner;
pub mod state;

pub use runner::{Detection, RunOptions, RunOutcome, RunStatus, Runner};
pub use state::{ExecutionState, FixBase, STATE_FILE_NAME, resolve_fix_base, verification_anchor};
