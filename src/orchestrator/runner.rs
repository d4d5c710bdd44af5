//! The top-level driver: one [`Runner::run`] call per invocation.
//!
//! Order of operations:
//! 1. take the run lock
//! 2. compute the run number and apply the retry guard
//! 3. pick the diff source (fresh run: auto-clean + fix-base resolve;
//!    verification run: recorded snapshot)
//! 4. compute changes and build jobs
//! 5. recover prior review state, preflight, dispatch
//! 6. aggregate, archive on pass, persist execution state

use crate::artifacts::{
    RecoveredState, ResolutionCounts, RunLock, archive_artifacts, auto_clean, next_run_number,
    recover_from_dir,
};
use crate::command::{CommandExecutor, ShellExecutor};
use crate::config::GauntletConfig;
use crate::diff::{ChangeSet, DiffSource, DiffStats, compute_changes};
use crate::errors::{GateError, RunError};
use crate::gates::{GateResult, GateSpec, GateStatus, Job, JobKind, build_jobs, preflight_failure, run_check};
use crate::orchestrator::state::{
    ExecutionState, FixBase, auto_clean_reason, resolve_fix_base, verification_anchor,
};
use crate::review::adapters::AdapterRegistry;
use crate::review::dispatcher::{DispatchSettings, ReviewDispatcher};
use crate::vcs::{GitRepository, VersionControl};
use anyhow::Result;
use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Caller-supplied options for one invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides `base_branch` from the configuration.
    pub base_ref_override: Option<String>,
    /// Run only the gate with this name.
    pub gate_filter: Option<String>,
    /// Bypass fix-base resolution and diff against this source.
    pub diff_source: Option<DiffSource>,
    /// Compare committed history only when diffing against the base branch.
    pub ci: bool,
}

/// Terminal status of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Passed,
    PassedWithWarnings,
    Failed,
    RetryLimitExceeded,
    NoChanges,
    NoApplicableGates,
    LockConflict,
    Error,
}

impl RunStatus {
    /// Whether the caller should treat the invocation as successful.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Passed | Self::PassedWithWarnings | Self::NoChanges | Self::NoApplicableGates
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Passed => "passed",
            Self::PassedWithWarnings => "passed with warnings",
            Self::Failed => "failed",
            Self::RetryLimitExceeded => "retry limit exceeded",
            Self::NoChanges => "no changes",
            Self::NoApplicableGates => "no applicable gates",
            Self::LockConflict => "lock conflict",
            Self::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Aggregate result of one invocation.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub run_number: Option<u32>,
    pub fixed_count: usize,
    pub skipped_count: usize,
    pub failed_count: usize,
    pub retry_limit_exceeded: bool,
    pub results: Vec<GateResult>,
    pub diff_stats: Option<DiffStats>,
    pub message: Option<String>,
}

impl RunOutcome {
    fn terminal(status: RunStatus, run_number: Option<u32>, message: Option<String>) -> Self {
        Self {
            status,
            run_number,
            fixed_count: 0,
            skipped_count: 0,
            failed_count: 0,
            retry_limit_exceeded: status == RunStatus::RetryLimitExceeded,
            results: Vec::new(),
            diff_stats: None,
            message,
        }
    }

    fn from_error(error: &RunError, run_number: Option<u32>) -> Self {
        let status = match error {
            RunError::LockConflict { .. } => RunStatus::LockConflict,
            _ => RunStatus::Error,
        };
        Self::terminal(status, run_number, Some(format!("{:#}", error)))
    }
}

/// What a run would do, without doing it.
#[derive(Debug, Clone)]
pub struct Detection {
    pub source: DiffSource,
    pub changes: ChangeSet,
    pub jobs: Vec<Job>,
    pub run_number: u32,
}

pub struct Runner {
    project_dir: PathBuf,
    config: GauntletConfig,
    vcs: Arc<dyn VersionControl>,
    executor: Arc<dyn CommandExecutor>,
    registry: Arc<AdapterRegistry>,
}

impl Runner {
    pub fn new(
        project_dir: impl Into<PathBuf>,
        config: GauntletConfig,
        vcs: Arc<dyn VersionControl>,
        executor: Arc<dyn CommandExecutor>,
        registry: Arc<AdapterRegistry>,
    ) -> Self {
        Self {
            project_dir: project_dir.into(),
            config,
            vcs,
            executor,
            registry,
        }
    }

    /// Runner wired to git, `sh` and the built-in CLI reviewers.
    pub fn from_project(project_dir: &Path) -> Result<Self, RunError> {
        let config = GauntletConfig::load_or_default(project_dir)
            .map_err(|e| RunError::Configuration(format!("{:#}", e)))?;
        let vcs = GitRepository::open(project_dir)
            .map_err(|e| RunError::VersionControl(format!("{:#}", e)))?
            .with_excluded_dir(&config.log_dir);
        Ok(Self::new(
            project_dir,
            config,
            Arc::new(vcs),
            Arc::new(ShellExecutor),
            Arc::new(AdapterRegistry::with_builtin()),
        ))
    }

    pub fn config(&self) -> &GauntletConfig {
        &self.config
    }

    pub fn log_dir(&self) -> PathBuf {
        self.config.log_dir_path(&self.project_dir)
    }

    fn base_ref(&self, options: &RunOptions) -> String {
        options
            .base_ref_override
            .clone()
            .unwrap_or_else(|| self.config.base_branch.clone())
    }

    fn dispatcher(&self) -> ReviewDispatcher {
        let settings = DispatchSettings::new(&self.project_dir, self.log_dir())
            .with_preference(self.config.cli.default_preference.clone())
            .with_threshold(self.config.rerun_new_issue_threshold)
            .with_timeout(Duration::from_secs(self.config.cli.review_timeout_secs));
        ReviewDispatcher::new(self.registry.clone(), settings)
    }

    /// Execute one invocation. Never exits the process; every failure is
    /// reported through the returned status.
    pub async fn run(&self, options: RunOptions) -> RunOutcome {
        let errors = self.config.errors();
        if !errors.is_empty() {
            let error = RunError::Configuration(errors.join("; "));
            tracing::error!("{}", error);
            return RunOutcome::from_error(&error, None);
        }

        let log_dir = self.log_dir();
        let _lock = match RunLock::acquire(&log_dir) {
            Ok(lock) => lock,
            Err(e) => {
                tracing::warn!("{}", e);
                return RunOutcome::from_error(&e, None);
            }
        };

        let run_number = match next_run_number(&log_dir) {
            Ok(n) => n,
            Err(e) => return RunOutcome::from_error(&RunError::Other(e), None),
        };

        if run_number > self.config.max_retries + 1 {
            tracing::warn!(
                run_number,
                max_retries = self.config.max_retries,
                "Retry limit exceeded"
            );
            return RunOutcome::terminal(
                RunStatus::RetryLimitExceeded,
                Some(run_number),
                Some(format!(
                    "Run {} exceeds max_retries = {}; fix remaining issues manually or clean the log directory",
                    run_number, self.config.max_retries
                )),
            );
        }

        tracing::info!(run_number, "Starting gauntlet run");
        let outcome = match self.run_locked(&options, &log_dir, run_number).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("{:#}", e);
                RunOutcome::from_error(&e, Some(run_number))
            }
        };

        self.persist_state(&log_dir);
        tracing::info!(status = %outcome.status, "Gauntlet run finished");
        outcome
    }

    fn persist_state(&self, log_dir: &Path) {
        let saved = ExecutionState::capture(self.vcs.as_ref()).and_then(|s| s.save(log_dir));
        if let Err(e) = saved {
            tracing::warn!("Failed to record execution state: {:#}", e);
        }
    }

    /// Choose the diff source. With `apply` unset nothing on disk changes.
    fn select_source(
        &self,
        options: &RunOptions,
        log_dir: &Path,
        fresh: bool,
        apply: bool,
    ) -> Result<DiffSource, RunError> {
        let base = self.base_ref(options);
        let base_source = DiffSource::BaseBranch {
            base: base.clone(),
            ci: options.ci,
        };
        let state = ExecutionState::load(log_dir);

        if fresh
            && let Some(recorded) = &state
            && let Some(reason) = auto_clean_reason(recorded, self.vcs.as_ref(), &base)
        {
            tracing::info!("Discarding previous execution state: {}", reason);
            if apply {
                auto_clean(log_dir)?;
            }
            return Ok(options.diff_source.clone().unwrap_or(base_source));
        }

        if let Some(explicit) = &options.diff_source {
            return Ok(explicit.clone());
        }

        let Some(recorded) = state else {
            return Ok(base_source);
        };

        let anchor = if fresh {
            resolve_fix_base(&recorded, self.vcs.as_ref(), &base)
        } else {
            verification_anchor(&recorded, self.vcs.as_ref())
        };

        Ok(match anchor {
            FixBase::Anchor { reference, degraded } => {
                tracing::debug!(reference = %reference, degraded, "Scoping changes from fix base");
                DiffSource::FixBase(reference)
            }
            FixBase::Stale => {
                if apply {
                    auto_clean(log_dir)?;
                }
                base_source
            }
            FixBase::NoAnchor => base_source,
        })
    }

    /// Report the change set and jobs a run would use. Writes nothing.
    pub fn detect(&self, options: &RunOptions) -> Result<Detection, RunError> {
        let log_dir = self.log_dir();
        let run_number = next_run_number(&log_dir)?;
        let source = self.select_source(options, &log_dir, run_number == 1, false)?;
        let changes = compute_changes(self.vcs.as_ref(), &source)
            .map_err(|e| RunError::VersionControl(format!("{:#}", e)))?;
        let jobs = build_jobs(
            &self.config,
            &self.project_dir,
            &changes.files,
            options.gate_filter.as_deref(),
        )
        .map_err(|e| RunError::Configuration(format!("{:#}", e)))?;
        Ok(Detection {
            source,
            changes,
            jobs,
            run_number,
        })
    }

    async fn run_locked(
        &self,
        options: &RunOptions,
        log_dir: &Path,
        run_number: u32,
    ) -> Result<RunOutcome, RunError> {
        let fresh = run_number == 1;
        let source = self.select_source(options, log_dir, fresh, true)?;
        tracing::info!(source = %source, fresh, "Computing changes");

        let changes = compute_changes(self.vcs.as_ref(), &source)
            .map_err(|e| RunError::VersionControl(format!("{:#}", e)))?;
        let stats = changes.stats.clone();

        if changes.is_empty() {
            let mut outcome = RunOutcome::terminal(
                RunStatus::NoChanges,
                Some(run_number),
                Some(format!("No changes against {}", source)),
            );
            outcome.diff_stats = Some(stats);
            return Ok(outcome);
        }

        let jobs = build_jobs(
            &self.config,
            &self.project_dir,
            &changes.files,
            options.gate_filter.as_deref(),
        )
        .map_err(|e| RunError::Configuration(format!("{:#}", e)))?;

        if jobs.is_empty() {
            let mut outcome = RunOutcome::terminal(
                RunStatus::NoApplicableGates,
                Some(run_number),
                Some("No configured gate applies to the changed files".to_string()),
            );
            outcome.diff_stats = Some(stats);
            return Ok(outcome);
        }

        let recovered = if fresh {
            RecoveredState::default()
        } else {
            recover_from_dir(log_dir)?
        };

        let dispatcher = self.dispatcher();
        let results = Mutex::new(Vec::new());
        let (runnable, halted) = self
            .preflight(&jobs, &dispatcher, log_dir, run_number, &results)
            .await?;

        if halted {
            tracing::warn!("A fail-fast job failed preflight; nothing was dispatched");
        } else {
            self.dispatch(
                &runnable,
                &dispatcher,
                &changes,
                &recovered,
                run_number,
                &results,
            )
            .await?;
        }

        let mut results = results.into_inner();
        results.sort_by_key(|r| jobs.iter().position(|j| j.id == r.job_id));

        let last_attempt = run_number > self.config.max_retries;
        let outcome = aggregate(results, &jobs, &recovered, run_number, last_attempt, stats);
        if matches!(
            outcome.status,
            RunStatus::Passed | RunStatus::PassedWithWarnings
        ) {
            archive_artifacts(log_dir)?;
        }
        Ok(outcome)
    }

    /// Split jobs into runnable ones and preflight failures. Failures are
    /// recorded immediately. The flag is set when a fail-fast job failed.
    async fn preflight<'a>(
        &self,
        jobs: &'a [Job],
        dispatcher: &ReviewDispatcher,
        log_dir: &Path,
        run_number: u32,
        results: &Mutex<Vec<GateResult>>,
    ) -> Result<(Vec<&'a Job>, bool), RunError> {
        let mut runnable = Vec::new();
        let mut halted = false;

        for job in jobs {
            let failure = match &job.gate {
                GateSpec::Check(check) => (!self
                    .executor
                    .is_runnable(&check.command, &job.working_directory))
                .then(|| format!("command not found: {}", check.command)),
                GateSpec::Review(review) => {
                    let healthy = dispatcher.healthy_adapters(job).await.len();
                    if healthy == 0 {
                        Some("no healthy reviewer adapters".to_string())
                    } else {
                        if (healthy as u32) < review.num_reviews {
                            tracing::warn!(
                                job = %job.id,
                                healthy,
                                slots = review.num_reviews,
                                "Fewer healthy adapters than review slots; reusing adapters round-robin"
                            );
                        }
                        None
                    }
                }
            };

            match failure {
                None => runnable.push(job),
                Some(reason) => {
                    let error = GateError::Preflight {
                        job: job.id.clone(),
                        reason,
                    };
                    let result = preflight_failure(job, &error, log_dir, run_number)?;
                    results.lock().await.push(result);
                    halted |= job.is_fail_fast();
                }
            }
        }

        Ok((runnable, halted))
    }

    async fn execute_job(
        &self,
        job: &Job,
        dispatcher: &ReviewDispatcher,
        changes: &ChangeSet,
        recovered: &RecoveredState,
        run_number: u32,
    ) -> Result<GateResult> {
        match job.kind {
            JobKind::Check => {
                run_check(job, self.executor.as_ref(), &dispatcher.settings().log_dir, run_number)
                    .await
            }
            JobKind::Review => dispatcher.dispatch(job, changes, recovered, run_number).await,
        }
    }

    /// Parallel jobs run concurrently with the sequential chain. A failing
    /// fail-fast job in the chain cancels the rest of the chain only.
    async fn dispatch(
        &self,
        jobs: &[&Job],
        dispatcher: &ReviewDispatcher,
        changes: &ChangeSet,
        recovered: &RecoveredState,
        run_number: u32,
        results: &Mutex<Vec<GateResult>>,
    ) -> Result<(), RunError> {
        let (parallel, sequential): (Vec<&Job>, Vec<&Job>) = jobs
            .iter()
            .copied()
            .partition(|job| self.config.allow_parallel && job.is_parallel());
        tracing::debug!(
            parallel = parallel.len(),
            sequential = sequential.len(),
            "Dispatching jobs"
        );

        let token = CancellationToken::new();

        let parallel_set = async {
            let runs = parallel.iter().map(|job| async move {
                let result = self
                    .execute_job(job, dispatcher, changes, recovered, run_number)
                    .await?;
                results.lock().await.push(result);
                Ok::<(), anyhow::Error>(())
            });
            join_all(runs).await.into_iter().collect::<Result<Vec<()>>>()
        };

        let sequential_chain = async {
            for job in &sequential {
                if token.is_cancelled() {
                    tracing::info!(job = %job.id, "Skipped after fail-fast failure");
                    continue;
                }
                let result = self
                    .execute_job(job, dispatcher, changes, recovered, run_number)
                    .await?;
                if job.is_fail_fast() && result.status != GateStatus::Pass {
                    tracing::warn!(job = %job.id, "Fail-fast job failed; stopping sequential jobs");
                    token.cancel();
                }
                results.lock().await.push(result);
            }
            Ok::<(), anyhow::Error>(())
        };

        let (parallel_done, sequential_done) = tokio::join!(parallel_set, sequential_chain);
        parallel_done?;
        sequential_done?;
        Ok(())
    }
}

/// `last_attempt` is set on run `max_retries + 1`: a failure there cannot be
/// retried and is reported as `RetryLimitExceeded`.
fn aggregate(
    results: Vec<GateResult>,
    jobs: &[Job],
    recovered: &RecoveredState,
    run_number: u32,
    last_attempt: bool,
    stats: DiffStats,
) -> RunOutcome {
    let mut resolutions = ResolutionCounts::default();
    for result in &results {
        if let Some(job) = jobs.iter().find(|j| j.id == result.job_id) {
            resolutions += recovered.resolution(&job.artifact_key());
        }
    }

    let failed_count = results
        .iter()
        .map(|r| match r.kind {
            JobKind::Review => r.new_violation_count(),
            JobKind::Check => usize::from(r.status != GateStatus::Pass),
        })
        .sum();

    let all_passed = results.iter().all(GateResult::passed);
    let status = if !all_passed && last_attempt {
        RunStatus::RetryLimitExceeded
    } else if !all_passed {
        RunStatus::Failed
    } else if resolutions.skipped > 0 {
        RunStatus::PassedWithWarnings
    } else {
        RunStatus::Passed
    };

    RunOutcome {
        status,
        run_number: Some(run_number),
        fixed_count: resolutions.fixed,
        skipped_count: resolutions.skipped,
        failed_count,
        retry_limit_exceeded: status == RunStatus::RetryLimitExceeded,
        results,
        diff_stats: Some(stats),
        message: (status == RunStatus::RetryLimitExceeded).then(|| {
            format!(
                "Run {} was the last allowed attempt; fix remaining issues manually or clean the log directory",
                run_number
            )
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_success_classification() {
        assert!(RunStatus::Passed.is_success());
        assert!(RunStatus::PassedWithWarnings.is_success());
        assert!(RunStatus::NoChanges.is_success());
        assert!(RunStatus::NoApplicableGates.is_success());
        assert!(!RunStatus::Failed.is_success());
        assert!(!RunStatus::RetryLimitExceeded.is_success());
        assert!(!RunStatus::LockConflict.is_success());
        assert!(!RunStatus::Error.is_success());
    }

    #[test]
    fn test_outcome_from_lock_conflict() {
        let error = RunError::LockConflict {
            path: PathBuf::from("logs/.gauntlet-run.lock"),
            owner: "7".to_string(),
        };
        let outcome = RunOutcome::from_error(&error, None);
        assert_eq!(outcome.status, RunStatus::LockConflict);
        assert!(outcome.message.unwrap().contains("pid 7"));
    }

    #[test]
    fn test_aggregate_counts_and_precedence() {
        use crate::config::CheckGateConfig;
        use crate::review::findings::{Priority, Violation};

        let check = Job {
            id: "check:.:lint".to_string(),
            kind: JobKind::Check,
            name: "lint".to_string(),
            entry_point: ".".to_string(),
            working_directory: PathBuf::from("."),
            gate: GateSpec::Check(CheckGateConfig {
                command: "true".to_string(),
                working_directory: None,
                parallel: true,
                fail_fast: false,
                timeout_secs: 1,
            }),
            files: Vec::new(),
        };
        let mut review = check.clone();
        review.id = "review:.:q".to_string();
        review.kind = JobKind::Review;

        let jobs = vec![check.clone(), review.clone()];
        let mut recovered = RecoveredState::default();
        recovered.resolutions.insert(
            review.artifact_key(),
            ResolutionCounts {
                fixed: 2,
                skipped: 1,
            },
        );

        let passing = vec![
            GateResult::new(&check, GateStatus::Pass, Duration::ZERO, ""),
            GateResult::new(&review, GateStatus::Pass, Duration::ZERO, ""),
        ];
        let outcome = aggregate(passing, &jobs, &recovered, 2, false, DiffStats::default());
        assert_eq!(outcome.status, RunStatus::PassedWithWarnings);
        assert_eq!(outcome.fixed_count, 2);
        assert_eq!(outcome.skipped_count, 1);
        assert_eq!(outcome.failed_count, 0);

        let failing = vec![
            GateResult::new(&check, GateStatus::Error, Duration::ZERO, ""),
            GateResult::new(&review, GateStatus::Fail, Duration::ZERO, "").with_violations(vec![
                Violation::new("a.rs", Some(1), "x", Priority::High),
                Violation::new("a.rs", Some(2), "y", Priority::High),
            ]),
        ];
        let outcome = aggregate(
            failing.clone(),
            &jobs,
            &RecoveredState::default(),
            2,
            false,
            DiffStats::default(),
        );
        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(!outcome.retry_limit_exceeded);
        assert_eq!(outcome.failed_count, 3);

        let outcome = aggregate(
            failing,
            &jobs,
            &RecoveredState::default(),
            4,
            true,
            DiffStats::default(),
        );
        assert_eq!(outcome.status, RunStatus::RetryLimitExceeded);
        assert!(outcome.retry_limit_exceeded);
        assert_eq!(outcome.failed_count, 3);
    }
}
