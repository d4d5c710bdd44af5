//! Artifact archiving.
//!
//! Archiving moves the current iteration history into `<log_dir>/previous/`
//! (replacing whatever was archived before), so the next invocation starts a
//! fresh run at run number 1. The lock file and the execution state stay put.

use super::naming::list_artifact_dir;
use crate::orchestrator::state::STATE_FILE_NAME;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub const ARCHIVE_DIR_NAME: &str = "previous";

fn is_artifact_file(name: &str) -> bool {
    name.ends_with(".log") || name.ends_with(".json")
}

pub fn archive_dir(log_dir: &Path) -> PathBuf {
    log_dir.join(ARCHIVE_DIR_NAME)
}

/// Move every `.log`/`.json` file into the archive. Returns how many files
/// were moved. Does nothing (and keeps the old archive) when there is
/// nothing to archive.
pub fn archive_artifacts(log_dir: &Path) -> Result<usize> {
    let names: Vec<String> = list_artifact_dir(log_dir)?
        .into_iter()
        .filter(|n| is_artifact_file(n))
        .collect();
    if names.is_empty() {
        return Ok(0);
    }

    let archive = archive_dir(log_dir);
    if archive.exists() {
        std::fs::remove_dir_all(&archive)
            .with_context(|| format!("Failed to clear archive: {}", archive.display()))?;
    }
    std::fs::create_dir_all(&archive)
        .with_context(|| format!("Failed to create archive: {}", archive.display()))?;

    for name in &names {
        std::fs::rename(log_dir.join(name), archive.join(name))
            .with_context(|| format!("Failed to archive {}", name))?;
    }

    tracing::info!(count = names.len(), dir = %archive.display(), "Archived artifacts");
    Ok(names.len())
}

/// Archive artifacts and forget the recorded execution state.
pub fn auto_clean(log_dir: &Path) -> Result<usize> {
    let moved = archive_artifacts(log_dir)?;
    let state_file = log_dir.join(STATE_FILE_NAME);
    if state_file.exists() {
        std::fs::remove_file(&state_file).with_context(|| {
            format!("Failed to delete execution state: {}", state_file.display())
        })?;
    }
    Ok(moved)
}
