//! Review dispatcher: runs one review gate for one iteration.
//!
//! The dispatcher:
//! - assigns adapters to slots round-robin over the healthy adapters
//! - skips slots that already passed, while keeping at least one slot running
//! - runs the executing slots concurrently and parses their output strictly
//! - filters findings to the diff and, when verifying, by priority
//! - writes one `.log` and one `.json` artifact per slot
//!
//! ## Usage
//!
//! ```no_run
//! use gauntlet::review::adapters::AdapterRegistry;
//! use gauntlet::review::dispatcher::{DispatchSettings, ReviewDispatcher};
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     job: &gauntlet::gates::Job,
//! #     changes: &gauntlet::diff::ChangeSet,
//! #     recovered: &gauntlet::artifacts::RecoveredState,
//! # ) -> anyhow::Result<()> {
//! let registry = Arc::new(AdapterRegistry::with_builtin());
//! let dispatcher = ReviewDispatcher::new(registry, DispatchSettings::new(".", "gauntlet_logs"));
//!
//! let result = dispatcher.dispatch(job, changes, recovered, 1).await?;
//! println!("{}: {}", result.job_id, result.status);
//! # Ok(())
//! # }
//! ```

use crate::artifacts::naming::{ArtifactKind, ArtifactName};
use crate::artifacts::recovery::RecoveredState;
use crate::config::{CONFIG_DIR, ReviewGateConfig};
use crate::diff::{ChangeSet, DiffRanges, is_valid_violation_location};
use crate::errors::GateError;
use crate::gates::{GateResult, GateSpec, GateStatus, Job};
use crate::review::adapters::{AdapterRegistry, ReviewRequest, ReviewerAdapter};
use crate::review::findings::{
    Priority, ReviewArtifact, ReviewStatus, Violation, parse_reviewer_output,
};
use crate::review::prompt::{build_prompt, previous_findings_context};
use anyhow::{Context, Result};
use futures::future::join_all;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default timeout for one reviewer invocation.
const DEFAULT_REVIEW_TIMEOUT_SECS: u64 = 600;

/// What happens to a slot this iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotDecision {
    Execute,
    /// Every slot had passed; this one runs anyway so the gate is checked.
    ForcedExecute,
    Skip { pass_iteration: u32 },
}

impl SlotDecision {
    pub fn executes(&self) -> bool {
        !matches!(self, Self::Skip { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedSlot {
    /// 1-based.
    pub review_index: u32,
    pub adapter: String,
    pub decision: SlotDecision,
}

/// Decide adapter and execute/skip for every slot of a gate.
///
/// `passed(i)` returns the iteration slot `i` last passed in, if any.
/// Decisions are final before any slot starts. With no adapters there is
/// nothing to plan.
pub fn plan_slots<F>(num_reviews: u32, adapters: &[String], passed: F) -> Vec<PlannedSlot>
where
    F: Fn(u32) -> Option<u32>,
{
    if adapters.is_empty() {
        return Vec::new();
    }

    let passes: Vec<Option<u32>> = (1..=num_reviews)
        .map(|i| if num_reviews > 1 { passed(i) } else { None })
        .collect();
    let all_passed = passes.iter().all(Option::is_some);

    (1..=num_reviews)
        .zip(passes)
        .map(|(review_index, pass)| {
            let adapter = adapters[(review_index as usize - 1) % adapters.len()].clone();
            let decision = match pass {
                Some(_) if all_passed && review_index == 1 => SlotDecision::ForcedExecute,
                Some(pass_iteration) => SlotDecision::Skip { pass_iteration },
                None => SlotDecision::Execute,
            };
            PlannedSlot {
                review_index,
                adapter,
                decision,
            }
        })
        .collect()
}

/// Settings shared by every review gate in an invocation.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub project_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Used when a gate has no `cli_preference`.
    pub default_preference: Vec<String>,
    /// New findings below this are dropped on verification runs.
    pub threshold: Priority,
    pub timeout: Duration,
}

impl DispatchSettings {
    pub fn new(project_dir: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            log_dir: log_dir.into(),
            default_preference: vec![
                "claude".to_string(),
                "codex".to_string(),
                "gemini".to_string(),
            ],
            threshold: Priority::High,
            timeout: Duration::from_secs(DEFAULT_REVIEW_TIMEOUT_SECS),
        }
    }

    pub fn with_preference(mut self, preference: Vec<String>) -> Self {
        self.default_preference = preference;
        self
    }

    pub fn with_threshold(mut self, threshold: Priority) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn preference_for(&self, review: &ReviewGateConfig) -> Vec<String> {
        review
            .cli_preference
            .clone()
            .unwrap_or_else(|| self.default_preference.clone())
    }
}

/// Outcome of one slot.
#[derive(Debug)]
enum SlotOutcome {
    Reviewed {
        status: ReviewStatus,
        violations: Vec<Violation>,
        paths: Vec<PathBuf>,
    },
    Skipped {
        path: PathBuf,
    },
    Errored {
        message: String,
        path: PathBuf,
    },
}

/// Inputs shared by all slots of one gate run.
struct GateRun<'a> {
    job: &'a Job,
    key: String,
    run_number: u32,
    prompt: String,
    diff: String,
    ranges: DiffRanges,
    recovered: &'a RecoveredState,
}

pub struct ReviewDispatcher {
    registry: Arc<AdapterRegistry>,
    settings: DispatchSettings,
}

impl ReviewDispatcher {
    pub fn new(registry: Arc<AdapterRegistry>, settings: DispatchSettings) -> Self {
        Self { registry, settings }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Healthy adapters for a review job, in preference order.
    pub async fn healthy_adapters(&self, job: &Job) -> Vec<Arc<dyn ReviewerAdapter>> {
        match &job.gate {
            GateSpec::Review(review) => {
                self.registry
                    .healthy_in_order(&self.settings.preference_for(review))
                    .await
            }
            GateSpec::Check(_) => Vec::new(),
        }
    }

    /// Run one review gate. Only artifact I/O failures are returned as `Err`.
    pub async fn dispatch(
        &self,
        job: &Job,
        changes: &ChangeSet,
        recovered: &RecoveredState,
        run_number: u32,
    ) -> Result<GateResult> {
        let start = Instant::now();
        let GateSpec::Review(review) = &job.gate else {
            anyhow::bail!("Job {} is not a review gate", job.id);
        };

        let config_dir = self.settings.project_dir.join(CONFIG_DIR);
        let instructions = match review.resolve_prompt(&config_dir) {
            Ok(text) => text,
            Err(e) => {
                return Ok(GateResult::new(
                    job,
                    GateStatus::Error,
                    start.elapsed(),
                    format!("{:#}", e),
                ));
            }
        };

        let adapters = self.healthy_adapters(job).await;
        let names: Vec<String> = adapters.iter().map(|a| a.name().to_string()).collect();
        let key = job.artifact_key();
        let plan = plan_slots(review.num_reviews, &names, |i| {
            recovered.passed_slot(&key, i).map(|p| p.pass_iteration)
        });
        if plan.is_empty() {
            return Ok(GateResult::new(
                job,
                GateStatus::Error,
                start.elapsed(),
                "No healthy reviewer adapters",
            ));
        }

        let mut ranges = changes.ranges.clone();
        ranges.retain_files(|f| job.files.iter().any(|j| j == f));
        let gate = GateRun {
            job,
            key,
            run_number,
            prompt: build_prompt(&job.name, &instructions),
            diff: changes.patch_for(|f| job.files.iter().any(|j| j == f)),
            ranges,
            recovered,
        };

        for slot in &plan {
            tracing::debug!(job = %job.id, slot = slot.review_index, adapter = %slot.adapter, decision = ?slot.decision, "Planned review slot");
        }

        let futures = plan.iter().map(|slot| {
            let adapter = adapters
                .iter()
                .find(|a| a.name() == slot.adapter)
                .cloned();
            let gate = &gate;
            async move {
                match (slot.decision, adapter) {
                    (SlotDecision::Skip { pass_iteration }, _) => {
                        self.write_skipped(gate, slot, pass_iteration)
                    }
                    (_, Some(adapter)) => self.run_slot(gate, slot, adapter.as_ref()).await,
                    (_, None) => anyhow::bail!("Adapter {} vanished", slot.adapter),
                }
            }
        });
        let outcomes = join_all(futures)
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        Ok(aggregate(job, outcomes, start.elapsed()))
    }

    async fn run_slot(
        &self,
        gate: &GateRun<'_>,
        slot: &PlannedSlot,
        adapter: &dyn ReviewerAdapter,
    ) -> Result<SlotOutcome> {
        let previous = gate.recovered.slot_failures(&gate.key, slot.review_index);
        // Any rerun filters new findings by threshold, including slots with no
        // carried failures (forced or previously errored).
        let verifying = !gate.recovered.is_empty();
        let request = ReviewRequest {
            prompt: gate.prompt.clone(),
            diff: gate.diff.clone(),
            context: previous_findings_context(previous),
            working_dir: self.settings.project_dir.clone(),
            timeout: self.settings.timeout,
        };

        let mut log = String::new();
        writeln!(log, "job: {}", gate.job.id)?;
        writeln!(log, "adapter: {}", adapter.name())?;
        writeln!(log, "review_index: {}", slot.review_index)?;
        writeln!(log, "run: {}", gate.run_number)?;
        if slot.decision == SlotDecision::ForcedExecute {
            writeln!(log, "forced: all slots had passed")?;
        }
        writeln!(log, "verification: {} ({} previous finding(s))", verifying, previous.len())?;
        writeln!(log, "prompt_chars: {}", request.full_prompt().len())?;

        let log_name = ArtifactName::review(
            &gate.job.id,
            adapter.name(),
            slot.review_index,
            gate.run_number,
            ArtifactKind::Log,
        );
        let log_path = self.settings.log_dir.join(log_name.encode());

        let raw = match adapter.execute(&request).await {
            Ok(raw) => raw,
            Err(e) => return self.errored(log, &log_path, &e),
        };
        writeln!(log, "--- raw output ---")?;
        log.push_str(&raw);
        if !raw.ends_with('\n') {
            log.push('\n');
        }

        let parsed = match parse_reviewer_output(adapter.name(), &raw) {
            Ok(parsed) => parsed,
            Err(e) => return self.errored(log, &log_path, &e),
        };

        let reported = parsed.violations.len();
        let mut out_of_scope = 0;
        let mut below_threshold = 0;
        let mut kept = Vec::new();
        for violation in parsed.violations {
            if !is_valid_violation_location(&violation.file, violation.line, &gate.ranges) {
                out_of_scope += 1;
                continue;
            }
            let known = previous.iter().any(|p| violation.matches(p));
            if verifying && !known && !violation.priority.meets(self.settings.threshold) {
                below_threshold += 1;
                continue;
            }
            kept.push(violation);
        }

        let status = if kept.is_empty() {
            ReviewStatus::Pass
        } else {
            ReviewStatus::Fail
        };
        writeln!(log, "--- result ---")?;
        writeln!(log, "reported: {}", reported)?;
        writeln!(log, "dropped_out_of_diff: {}", out_of_scope)?;
        writeln!(log, "dropped_below_threshold: {}", below_threshold)?;
        for violation in &kept {
            writeln!(log, "{}", violation)?;
        }
        writeln!(log, "status: {}", status)?;

        let json_path = self
            .settings
            .log_dir
            .join(log_name.with_kind(ArtifactKind::Json).encode());
        ReviewArtifact::new(adapter.name(), status)
            .with_raw_output(raw)
            .with_violations(kept.clone())
            .write(&json_path)?;
        write_file(&log_path, &log)?;

        tracing::info!(job = %gate.job.id, slot = slot.review_index, adapter = adapter.name(), %status, violations = kept.len(), "Review slot finished");
        Ok(SlotOutcome::Reviewed {
            status,
            violations: kept,
            paths: vec![log_path, json_path],
        })
    }

    fn errored(&self, mut log: String, log_path: &Path, error: &GateError) -> Result<SlotOutcome> {
        writeln!(log, "error: {}", error)?;
        writeln!(log, "status: error")?;
        write_file(log_path, &log)?;
        tracing::warn!("{}", error);
        Ok(SlotOutcome::Errored {
            message: error.to_string(),
            path: log_path.to_path_buf(),
        })
    }

    fn write_skipped(
        &self,
        gate: &GateRun<'_>,
        slot: &PlannedSlot,
        pass_iteration: u32,
    ) -> Result<SlotOutcome> {
        let name = ArtifactName::review(
            &gate.job.id,
            &slot.adapter,
            slot.review_index,
            gate.run_number,
            ArtifactKind::Json,
        );
        let path = self.settings.log_dir.join(name.encode());
        ReviewArtifact::skipped_prior_pass(&slot.adapter, pass_iteration).write(&path)?;
        tracing::debug!(job = %gate.job.id, slot = slot.review_index, pass_iteration, "Skipped previously passing slot");
        Ok(SlotOutcome::Skipped { path })
    }
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

fn aggregate(job: &Job, outcomes: Vec<SlotOutcome>, elapsed: Duration) -> GateResult {
    let mut paths = Vec::new();
    let mut violations = Vec::new();
    let mut errors = Vec::new();
    let (mut reviewed, mut skipped) = (0, 0);

    for outcome in outcomes {
        match outcome {
            SlotOutcome::Reviewed {
                violations: found,
                paths: written,
                ..
            } => {
                reviewed += 1;
                violations.extend(found);
                paths.extend(written);
            }
            SlotOutcome::Skipped { path } => {
                skipped += 1;
                paths.push(path);
            }
            SlotOutcome::Errored { message, path } => {
                errors.push(message);
                paths.push(path);
            }
        }
    }

    let blocking = violations.iter().filter(|v| v.is_blocking()).count();
    let (status, message) = if !errors.is_empty() {
        (GateStatus::Error, errors.join("; "))
    } else if blocking > 0 {
        (
            GateStatus::Fail,
            format!("{} violation(s) from {} reviewer(s)", blocking, reviewed),
        )
    } else {
        (
            GateStatus::Pass,
            format!("{} reviewed, {} skipped (prior pass)", reviewed, skipped),
        )
    };

    GateResult::new(job, status, elapsed, message)
        .with_artifacts(paths)
        .with_violations(violations)
}
