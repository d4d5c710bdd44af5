//! Rebuild prior review state from numbered artifacts.
//!
//! Nothing survives between invocations except the files in the artifact
//! directory. [`recover`] is a pure function of a directory listing plus a
//! reader for `.json` artifacts; every convergence decision downstream is
//! computed from its [`RecoveredState`].
//!
//! Per `(job, review index)` only the artifact with the highest run number
//! counts. Earlier iterations of a slot are ignored entirely.

use super::naming::{ArtifactKind, ArtifactName, list_artifact_dir};
use crate::review::findings::{ReviewArtifact, ReviewStatus, Violation, ViolationStatus};
use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;

/// A review slot whose latest artifact passed (or was skipped for having
/// passed earlier).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassedSlot {
    pub review_index: u32,
    pub pass_iteration: u32,
    pub adapter: String,
}

/// Fixed/skipped violation counts for one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolutionCounts {
    pub fixed: usize,
    pub skipped: usize,
}

impl std::ops::AddAssign for ResolutionCounts {
    fn add_assign(&mut self, other: Self) {
        self.fixed += other.fixed;
        self.skipped += other.skipped;
    }
}

/// Everything known about previous iterations. Keys are sanitized job ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveredState {
    pub failures: BTreeMap<String, BTreeMap<u32, Vec<Violation>>>,
    pub passed_slots: BTreeMap<String, BTreeMap<u32, PassedSlot>>,
    pub resolutions: BTreeMap<String, ResolutionCounts>,
    /// Highest run number seen among all artifacts (0 when empty).
    pub latest_run: u32,
}

impl RecoveredState {
    /// Violations carried forward for one slot (empty if none).
    pub fn slot_failures(&self, job: &str, review_index: u32) -> &[Violation] {
        self.failures
            .get(job)
            .and_then(|slots| slots.get(&review_index))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn passed_slot(&self, job: &str, review_index: u32) -> Option<&PassedSlot> {
        self.passed_slots
            .get(job)
            .and_then(|slots| slots.get(&review_index))
    }

    pub fn resolution(&self, job: &str) -> ResolutionCounts {
        self.resolutions.get(job).copied().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.latest_run == 0
    }
}

#[derive(Debug, Default)]
struct SlotLatest {
    run_number: u32,
    json_file: Option<String>,
    adapter: String,
}

/// Recover state from a listing of file names.
///
/// `read` loads a `.json` artifact by file name; `None` means missing or
/// unreadable, which makes that slot neither failed nor passed.
pub fn recover<'a, F>(listing: impl IntoIterator<Item = &'a str>, mut read: F) -> RecoveredState
where
    F: FnMut(&str) -> Option<ReviewArtifact>,
{
    let mut latest: BTreeMap<(String, u32), SlotLatest> = BTreeMap::new();
    let mut state = RecoveredState::default();

    for file_name in listing {
        let Some(name) = ArtifactName::parse(file_name) else {
            continue;
        };
        state.latest_run = state.latest_run.max(name.run_number);

        let Some(slot) = &name.slot else {
            continue;
        };
        let entry = latest
            .entry((name.job.clone(), slot.review_index))
            .or_default();

        if name.run_number > entry.run_number {
            *entry = SlotLatest {
                run_number: name.run_number,
                json_file: None,
                adapter: slot.adapter.clone(),
            };
        }
        if name.run_number == entry.run_number && name.kind == ArtifactKind::Json {
            entry.json_file = Some(file_name.to_string());
            entry.adapter = slot.adapter.clone();
        }
    }

    for ((job, review_index), slot) in latest {
        let Some(artifact) = slot.json_file.as_deref().and_then(&mut read) else {
            tracing::debug!(job = %job, slot = review_index, run = slot.run_number, "No readable result for latest slot artifact");
            continue;
        };

        *state.resolutions.entry(job.clone()).or_default() += ResolutionCounts {
            fixed: artifact.count_with_status(ViolationStatus::Fixed),
            skipped: artifact.count_with_status(ViolationStatus::Skipped),
        };

        match artifact.status {
            ReviewStatus::Fail => {
                let carried: Vec<Violation> = artifact
                    .violations
                    .into_iter()
                    .filter(|v| v.status != ViolationStatus::Skipped)
                    .collect();
                state
                    .failures
                    .entry(job)
                    .or_default()
                    .insert(review_index, carried);
            }
            ReviewStatus::Pass | ReviewStatus::SkippedPriorPass => {
                let pass_iteration = match artifact.status {
                    ReviewStatus::SkippedPriorPass => {
                        artifact.pass_iteration.unwrap_or(slot.run_number)
                    }
                    _ => slot.run_number,
                };
                state.passed_slots.entry(job).or_default().insert(
                    review_index,
                    PassedSlot {
                        review_index,
                        pass_iteration,
                        adapter: slot.adapter,
                    },
                );
            }
        }
    }

    state
}

/// [`recover`] over the files in `dir`.
pub fn recover_from_dir(dir: &Path) -> Result<RecoveredState> {
    let listing = list_artifact_dir(dir)?;
    Ok(recover(listing.iter().map(String::as_str), |file_name| {
        let path = dir.join(file_name);
        match ReviewArtifact::read(&path) {
            Ok(artifact) => Some(artifact),
            Err(e) => {
                tracing::warn!("Ignoring unreadable review artifact: {:#}", e);
                None
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::findings::Priority;
    use std::collections::HashMap;

    fn fail_artifact(adapter: &str, violations: Vec<Violation>) -> ReviewArtifact {
        ReviewArtifact::new(adapter, ReviewStatus::Fail).with_violations(violations)
    }

    fn recover_map(files: &HashMap<&str, ReviewArtifact>, extra: &[&str]) -> RecoveredState {
        let listing: Vec<&str> = files.keys().copied().chain(extra.iter().copied()).collect();
        recover(listing, |name| files.get(name).cloned())
    }

    #[test]
    fn test_empty_listing() {
        let state = recover(Vec::<&str>::new(), |_| None);
        assert!(state.is_empty());
        assert!(state.failures.is_empty());
        assert!(state.passed_slots.is_empty());
    }

    #[test]
    fn test_latest_run_supersedes_earlier() {
        let mut files = HashMap::new();
        files.insert(
            "review_src_q_claude@1.1.json",
            fail_artifact("claude", vec![Violation::new("a.rs", Some(1), "old", Priority::High)]),
        );
        files.insert(
            "review_src_q_codex@1.2.json",
            ReviewArtifact::new("codex", ReviewStatus::Pass),
        );

        let state = recover_map(&files, &["review_src_q_claude@1.1.log", "review_src_q_codex@1.2.log"]);

        assert!(state.slot_failures("review_src_q", 1).is_empty());
        let passed = state.passed_slot("review_src_q", 1).unwrap();
        assert_eq!(passed.pass_iteration, 2);
        assert_eq!(passed.adapter, "codex");
        assert_eq!(state.latest_run, 2);
    }

    #[test]
    fn test_fail_carries_new_and_fixed_but_not_skipped() {
        let mut files = HashMap::new();
        files.insert(
            "review_x_claude@2.3.json",
            fail_artifact(
                "claude",
                vec![
                    Violation::new("a.rs", Some(1), "n", Priority::High),
                    Violation::new("a.rs", Some(2), "f", Priority::High)
                        .with_status(ViolationStatus::Fixed),
                    Violation::new("a.rs", Some(3), "s", Priority::Low)
                        .with_status(ViolationStatus::Skipped),
                ],
            ),
        );

        let state = recover_map(&files, &[]);
        let carried = state.slot_failures("review_x", 2);
        assert_eq!(carried.len(), 2);
        assert!(carried.iter().all(|v| v.status != ViolationStatus::Skipped));
        assert_eq!(
            state.resolution("review_x"),
            ResolutionCounts {
                fixed: 1,
                skipped: 1
            }
        );
    }

    #[test]
    fn test_skipped_prior_pass_keeps_original_iteration() {
        let mut files = HashMap::new();
        files.insert(
            "review_x_claude@1.4.json",
            ReviewArtifact::skipped_prior_pass("claude", 2),
        );
        let state = recover_map(&files, &[]);
        assert_eq!(state.passed_slot("review_x", 1).unwrap().pass_iteration, 2);
    }

    #[test]
    fn test_skipped_prior_pass_without_iteration_uses_run_number() {
        let mut artifact = ReviewArtifact::skipped_prior_pass("claude", 2);
        artifact.pass_iteration = None;
        let mut files = HashMap::new();
        files.insert("review_x_claude@1.4.json", artifact);
        let state = recover_map(&files, &[]);
        assert_eq!(state.passed_slot("review_x", 1).unwrap().pass_iteration, 4);
    }

    #[test]
    fn test_errored_latest_slot_is_neither_failed_nor_passed() {
        let mut files = HashMap::new();
        files.insert(
            "review_x_claude@1.1.json",
            fail_artifact("claude", vec![Violation::new("a.rs", Some(1), "n", Priority::High)]),
        );
        // Run 2 errored: only a log was written.
        let state = recover_map(&files, &["review_x_claude@1.2.log"]);
        assert!(state.slot_failures("review_x", 1).is_empty());
        assert!(state.passed_slot("review_x", 1).is_none());
        assert_eq!(state.latest_run, 2);
    }

    #[test]
    fn test_unreadable_json_is_ignored() {
        let state = recover(vec!["review_x_claude@1.1.json"], |_| None);
        assert!(state.passed_slot("review_x", 1).is_none());
        assert!(state.slot_failures("review_x", 1).is_empty());
    }

    #[test]
    fn test_check_logs_only_contribute_run_number() {
        let state = recover(vec!["check_src_lint.5.log", "notes.md"], |_| None);
        assert_eq!(state.latest_run, 5);
        assert!(state.failures.is_empty());
    }

    #[test]
    fn test_recover_from_dir_round_trip_drops_only_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let violations = vec![
            Violation::new("src/a.rs", Some(10), "first", Priority::Critical),
            Violation::new("src/a.rs", Some(11), "second", Priority::Medium)
                .with_status(ViolationStatus::Fixed),
            Violation::new("src/b.rs", None, "third", Priority::Low)
                .with_status(ViolationStatus::Skipped),
        ];
        let name = ArtifactName::review("review:src:q", "claude", 1, 1, ArtifactKind::Json);
        fail_artifact("claude", violations.clone())
            .write(&dir.path().join(name.encode()))
            .unwrap();
        std::fs::write(dir.path().join("review_src_q_codex@2.1.json"), "not json").unwrap();

        let state = recover_from_dir(dir.path()).unwrap();
        let expected: Vec<Violation> = violations
            .into_iter()
            .filter(|v| v.status != ViolationStatus::Skipped)
            .collect();
        assert_eq!(state.slot_failures("review_src_q", 1), expected.as_slice());
        assert!(state.slot_failures("review_src_q", 2).is_empty());
    }
}
