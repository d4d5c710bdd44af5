//! The artifact directory: numbered result files, the run lock and the
//! archive.

pub mod clean;
pub mod lock;
pub mod naming;
pub mod recovery;

pub use clean::{ARCHIVE_DIR_NAME, archive_artifacts, archive_dir, auto_clean};
pub use lock::{LOCK_FILE_NAME, RunLock, is_locked};
pub use naming::{ArtifactKind, ArtifactName, next_run_number, sanitize_job_id};
pub use recovery::{PassedSlot, RecoveredState, ResolutionCounts, recover, recover_from_dir};
