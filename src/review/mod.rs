//! AI review gates.
//!
//! ## Components
//!
//! - [`findings`]: violations, review artifacts and strict output parsing
//! - [`adapters`]: the [`ReviewerAdapter`] capability and its registry
//! - [`prompt`]: reviewer prompt assembly
//! - [`dispatcher`]: slot planning, execution, filtering and aggregation
//!
//! ## Example
//!
//! ```
//! use gauntlet::review::plan_slots;
//!
//! let adapters = vec!["claude".to_string(), "codex".to_string()];
//!
//! // Both slots passed last iteration: slot 1 still runs.
//! let plan = plan_slots(2, &adapters, |_| Some(4));
//! assert!(plan[0].decision.executes());
//! assert!(!plan[1].decision.executes());
//! ```

pub mod adapters;
pub mod dispatcher;
pub mod findings;
pub mod prompt;

pub use adapters::{AdapterRegistry, CliReviewer, CliTool, ReviewRequest, ReviewerAdapter};
pub use dispatcher::{DispatchSettings, PlannedSlot, ReviewDispatcher, SlotDecision, plan_slots};
pub use findings::{
    Priority, ReviewArtifact, ReviewStatus, Violation, ViolationStatus, parse_reviewer_output,
};
