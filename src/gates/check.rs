//! Check gate execution.

use super::{GateResult, GateSpec, GateStatus, Job};
use crate::artifacts::naming::ArtifactName;
use crate::command::{CommandExecutor, CommandOutput};
use crate::errors::GateError;
use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Run one check job and write `<job>.<run>.log`.
///
/// Exit code 0 is a pass, any other exit code a fail. Spawn failures and
/// timeouts are errors. Only a failure to write the log itself is returned
/// as `Err`.
pub async fn run_check(
    job: &Job,
    executor: &dyn CommandExecutor,
    log_dir: &Path,
    run_number: u32,
) -> Result<GateResult> {
    let GateSpec::Check(check) = &job.gate else {
        anyhow::bail!("Job {} is not a check gate", job.id);
    };

    let start = Instant::now();
    let timeout = Duration::from_secs(check.timeout_secs);
    let outcome = executor
        .run(&check.command, &job.working_directory, timeout)
        .await;
    let elapsed = start.elapsed();

    let mut log = String::new();
    writeln!(log, "job: {}", job.id)?;
    writeln!(log, "command: {}", check.command)?;
    writeln!(log, "working_directory: {}", job.working_directory.display())?;
    writeln!(log, "run: {}", run_number)?;

    let (status, message) = match &outcome {
        Ok(output) => {
            write_output(&mut log, output)?;
            if output.success() {
                (GateStatus::Pass, "passed".to_string())
            } else {
                let code = output
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                (GateStatus::Fail, format!("exited with {}", code))
            }
        }
        Err(e) => {
            writeln!(log, "error: {}", e)?;
            (GateStatus::Error, e.to_string())
        }
    };
    writeln!(log, "duration_ms: {}", elapsed.as_millis())?;
    writeln!(log, "status: {}", status)?;

    let path = write_log(log_dir, job, run_number, &log)?;
    tracing::info!(job = %job.id, %status, "Check finished");

    Ok(GateResult::new(job, status, elapsed, message).with_artifacts(vec![path]))
}

fn write_output(log: &mut String, output: &CommandOutput) -> std::fmt::Result {
    match output.exit_code {
        Some(code) => writeln!(log, "exit_code: {}", code)?,
        None => writeln!(log, "exit_code: none (terminated by signal)")?,
    }
    writeln!(log, "--- stdout ---")?;
    log.push_str(&output.stdout);
    if !output.stdout.ends_with('\n') {
        log.push('\n');
    }
    writeln!(log, "--- stderr ---")?;
    log.push_str(&output.stderr);
    if !output.stderr.ends_with('\n') {
        log.push('\n');
    }
    Ok(())
}

/// Record a job that failed preflight as an `Error` result with its own log.
pub fn preflight_failure(
    job: &Job,
    error: &GateError,
    log_dir: &Path,
    run_number: u32,
) -> Result<GateResult> {
    let log = format!(
        "job: {}\nrun: {}\nstatus: error\npreflight: {}\n",
        job.id, run_number, error
    );
    let path = write_log(log_dir, job, run_number, &log)?;
    tracing::warn!(job = %job.id, "{}", error);
    Ok(
        GateResult::new(job, GateStatus::Error, Duration::ZERO, error.to_string())
            .with_artifacts(vec![path]),
    )
}

fn write_log(log_dir: &Path, job: &Job, run_number: u32, content: &str) -> Result<PathBuf> {
    let path = log_dir.join(ArtifactName::check(&job.id, run_number).encode());
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write job log: {}", path.display()))?;
    Ok(path)
}
