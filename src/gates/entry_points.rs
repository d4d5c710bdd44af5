//! Entry-point expansion: which configured gates apply to the current
//! change set.
//!
//! - `.` applies to every changed file
//! - `dir` applies to files under `dir/`
//! - `dir/*` yields one entry point per direct child directory of `dir`
//!   that contains changes
//!
//! `exclude` globs drop files before any matching.

use super::{GateSpec, Job, JobKind};
use crate::config::{EntryPointConfig, GauntletConfig};
use anyhow::{Context, Result};
use glob::Pattern;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// A concrete entry point with the changed files it matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedEntryPoint {
    pub path: String,
    /// Index into `GauntletConfig::entry_points`.
    pub config_index: usize,
    pub files: Vec<String>,
}

/// Expand every configured entry point against `files`. Entry points with
/// no matching file are dropped.
pub fn expand_entry_points(
    config: &GauntletConfig,
    files: &[String],
) -> Result<Vec<ExpandedEntryPoint>> {
    let mut expanded = Vec::new();
    for (config_index, entry) in config.entry_points.iter().enumerate() {
        let candidates = apply_excludes(entry, files)?;
        for (path, files) in expand_one(entry, &candidates) {
            if !files.is_empty() {
                expanded.push(ExpandedEntryPoint {
                    path,
                    config_index,
                    files,
                });
            }
        }
    }
    Ok(expanded)
}

fn apply_excludes(entry: &EntryPointConfig, files: &[String]) -> Result<Vec<String>> {
    let patterns = entry
        .exclude
        .iter()
        .map(|p| Pattern::new(p).with_context(|| format!("Invalid exclude pattern '{}'", p)))
        .collect::<Result<Vec<_>>>()?;
    Ok(files
        .iter()
        .filter(|f| !patterns.iter().any(|p| p.matches(f)))
        .cloned()
        .collect())
}

fn expand_one(entry: &EntryPointConfig, files: &[String]) -> Vec<(String, Vec<String>)> {
    let path = entry.path.trim().trim_end_matches('/');

    if path == "." || path.is_empty() {
        return vec![(".".to_string(), files.to_vec())];
    }

    if let Some(parent) = path.strip_suffix("/*") {
        let prefix = format!("{}/", parent);
        let mut children: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for file in files {
            let Some(rest) = file.strip_prefix(&prefix) else {
                continue;
            };
            // Only files inside a child directory count.
            if let Some((child, _)) = rest.split_once('/') {
                children
                    .entry(format!("{}{}", prefix, child))
                    .or_default()
                    .push(file.clone());
            }
        }
        return children.into_iter().collect();
    }

    let prefix = format!("{}/", path);
    let matched = files
        .iter()
        .filter(|f| f.starts_with(&prefix))
        .cloned()
        .collect();
    vec![(path.to_string(), matched)]
}

/// Build the job list for this invocation, in configuration order: per
/// entry point, checks then reviews. `gate_filter` keeps only jobs for
/// that gate name.
pub fn build_jobs(
    config: &GauntletConfig,
    project_dir: &Path,
    files: &[String],
    gate_filter: Option<&str>,
) -> Result<Vec<Job>> {
    let mut jobs = Vec::new();
    let mut seen = HashSet::new();

    for expanded in expand_entry_points(config, files)? {
        let entry = &config.entry_points[expanded.config_index];
        let entry_dir = if expanded.path == "." {
            project_dir.to_path_buf()
        } else {
            project_dir.join(&expanded.path)
        };

        for name in &entry.checks {
            let check = config
                .checks
                .get(name)
                .with_context(|| format!("Unknown check gate '{}'", name))?;
            let working_directory = match &check.working_directory {
                Some(dir) => project_dir.join(dir),
                None => entry_dir.clone(),
            };
            push_job(
                &mut jobs,
                &mut seen,
                gate_filter,
                Job {
                    id: Job::make_id(JobKind::Check, &expanded.path, name),
                    kind: JobKind::Check,
                    name: name.clone(),
                    entry_point: expanded.path.clone(),
                    working_directory,
                    gate: GateSpec::Check(check.clone()),
                    files: expanded.files.clone(),
                },
            );
        }

        for name in &entry.reviews {
            let review = config
                .reviews
                .get(name)
                .with_context(|| format!("Unknown review gate '{}'", name))?;
            push_job(
                &mut jobs,
                &mut seen,
                gate_filter,
                Job {
                    id: Job::make_id(JobKind::Review, &expanded.path, name),
                    kind: JobKind::Review,
                    name: name.clone(),
                    entry_point: expanded.path.clone(),
                    working_directory: entry_dir.clone(),
                    gate: GateSpec::Review(review.clone()),
                    files: expanded.files.clone(),
                },
            );
        }
    }

    Ok(jobs)
}

fn push_job(jobs: &mut Vec<Job>, seen: &mut HashSet<String>, filter: Option<&str>, job: Job) {
    if filter.is_some_and(|f| f != job.name) {
        return;
    }
    if seen.insert(job.id.clone()) {
        jobs.push(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn files(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn config(toml: &str) -> GauntletConfig {
        GauntletConfig::parse(toml).unwrap()
    }

    #[test]
    fn test_root_entry_point_matches_everything() {
        let cfg = config("[[entry_points]]\npath = \".\"\n");
        let expanded = expand_entry_points(&cfg, &files(&["a.rs", "src/b.rs"])).unwrap();
        assert_eq!(expanded.len(), 1);
        assert_eq!(expanded[0].path, ".");
        assert_eq!(expanded[0].files.len(), 2);
    }

    #[test]
    fn test_directory_entry_point_requires_prefix() {
        let cfg = config("[[entry_points]]\npath = \"src/\"\n[[entry_points]]\npath = \"docs\"\n");
        let expanded =
            expand_entry_points(&cfg, &files(&["src/a.rs", "srcx/b.rs", "README.md"])).unwrap();
        assert_eq!(expanded.len(), 1);
        assert_eq!(expanded[0].path, "src");
        assert_eq!(expanded[0].files, vec!["src/a.rs"]);
    }

    #[test]
    fn test_wildcard_expands_changed_children() {
        let cfg = config("[[entry_points]]\npath = \"packages/*\"\n");
        let changed = files(&[
            "packages/api/src/lib.rs",
            "packages/web/index.ts",
            "packages/api/Cargo.toml",
            "packages/README.md",
            "other/x.rs",
        ]);
        let expanded = expand_entry_points(&cfg, &changed).unwrap();
        let paths: Vec<&str> = expanded.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["packages/api", "packages/web"]);
        assert_eq!(expanded[0].files.len(), 2);
    }

    #[test]
    fn test_excludes_drop_files_first() {
        let cfg = config(
            "[[entry_points]]\npath = \"src\"\nexclude = [\"**/*.snap\", \"src/generated/*\"]\n",
        );
        let expanded = expand_entry_points(
            &cfg,
            &files(&["src/__snapshots__/a.snap", "src/generated/x.rs"]),
        )
        .unwrap();
        assert!(expanded.is_empty());
    }

    #[test]
    fn test_build_jobs_order_and_working_directory() {
        let cfg = config(
            r#"
[[entry_points]]
path = "src"
checks = ["lint", "test"]
reviews = ["quality"]

[checks.lint]
command = "cargo clippy"

[checks.test]
command = "cargo test"
working_directory = "."

[reviews.quality]
prompt = "x"
"#,
        );
        let root = PathBuf::from("/repo");
        let jobs = build_jobs(&cfg, &root, &files(&["src/main.rs"]), None).unwrap();

        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["check:src:lint", "check:src:test", "review:src:quality"]);
        assert_eq!(jobs[0].working_directory, PathBuf::from("/repo/src"));
        assert_eq!(jobs[1].working_directory, PathBuf::from("/repo/."));
        assert_eq!(jobs[2].kind, JobKind::Review);
    }

    #[test]
    fn test_build_jobs_gate_filter_and_dedup() {
        let cfg = config(
            r#"
[[entry_points]]
path = "."
checks = ["lint"]
reviews = ["quality"]

[[entry_points]]
path = "."
checks = ["lint"]

[checks.lint]
command = "true"

[reviews.quality]
prompt = "x"
"#,
        );
        let root = PathBuf::from("/repo");
        let all = build_jobs(&cfg, &root, &files(&["a.rs"]), None).unwrap();
        assert_eq!(all.len(), 2);

        let filtered = build_jobs(&cfg, &root, &files(&["a.rs"]), Some("quality")).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "quality");
    }

    #[test]
    fn test_no_changes_no_jobs() {
        let cfg = config("[[entry_points]]\npath = \".\"\nchecks = [\"lint\"]\n[checks.lint]\ncommand = \"true\"\n");
        assert!(build_jobs(&cfg, Path::new("/repo"), &[], None).unwrap().is_empty());
    }
}
