//! Artifact archiving: `gauntlet clean`.

use anyhow::Result;
use std::path::Path;

use gauntlet::artifacts::{RunLock, archive_artifacts, archive_dir};
use gauntlet::config::GauntletConfig;
use gauntlet::orchestrator::ExecutionState;

pub fn cmd_clean(project_dir: &Path, all: bool) -> Result<bool> {
    let config = GauntletConfig::load_or_default(project_dir)?;
    let log_dir = config.log_dir_path(project_dir);

    // Refuse to touch artifacts while a run owns the directory.
    let _lock = RunLock::acquire(&log_dir)?;

    let moved = archive_artifacts(&log_dir)?;
    if moved == 0 {
        println!("No artifacts to archive in {}", log_dir.display());
    } else {
        println!(
            "Archived {} artifact(s) to {}",
            moved,
            archive_dir(&log_dir).display()
        );
    }

    if all {
        ExecutionState::delete(&log_dir)?;
        println!("Deleted execution state.");
    }
    Ok(true)
}
