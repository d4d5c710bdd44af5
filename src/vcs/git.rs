use super::{RawDiff, VersionControl};
use crate::diff::DiffSource;
use anyhow::{Context, Result, anyhow};
use git2::{
    Commit, Delta, Diff, DiffOptions, IndexAddOption, Oid, Patch, Repository, Signature, Tree,
};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// [`VersionControl`] backed by libgit2.
///
/// A fresh `Repository` handle is opened per call so the type stays
/// `Send + Sync` and never caches index state between calls.
pub struct GitRepository {
    root: PathBuf,
    /// Repository-relative path prefixes that never appear in diffs.
    excluded: Vec<String>,
}

impl GitRepository {
    pub fn open(project_dir: &Path) -> Result<Self> {
        let repo = Repository::open(project_dir).context("Failed to open git repository")?;
        let root = repo
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| anyhow!("Bare repositories are not supported"))?;
        Ok(Self {
            root,
            excluded: Vec::new(),
        })
    }

    /// Hide a repository-relative directory (e.g. the artifact directory).
    pub fn with_excluded_dir(mut self, dir: impl AsRef<str>) -> Self {
        let dir = dir.as_ref().trim_matches('/');
        if !dir.is_empty() && dir != "." {
            self.excluded.push(format!("{}/", dir));
        }
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn repo(&self) -> Result<Repository> {
        Repository::open(&self.root).context("Failed to open git repository")
    }

    fn is_excluded(&self, path: &str) -> bool {
        path.starts_with(".git/") || self.excluded.iter().any(|prefix| path.starts_with(prefix))
    }

    fn head_commit_of<'r>(repo: &'r Repository) -> Option<Commit<'r>> {
        repo.head().ok().and_then(|head| head.peel_to_commit().ok())
    }

    fn workdir_options() -> DiffOptions {
        let mut opts = DiffOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .show_untracked_content(true)
            .include_typechange(true);
        opts
    }

    fn tree_options() -> DiffOptions {
        let mut opts = DiffOptions::new();
        opts.include_typechange(true);
        opts
    }

    /// Tree of `base`'s merge-base with HEAD.
    fn merge_base_tree<'r>(repo: &'r Repository, base: &str) -> Result<Tree<'r>> {
        let base_commit = repo
            .revparse_single(base)
            .with_context(|| format!("Unknown base ref '{}'", base))?
            .peel_to_commit()?;
        let head = Self::head_commit_of(repo).ok_or_else(|| anyhow!("HEAD has no commits"))?;
        let merge_base = repo
            .merge_base(base_commit.id(), head.id())
            .with_context(|| format!("No merge base between {} and HEAD", base))?;
        Ok(repo.find_commit(merge_base)?.tree()?)
    }

    /// Flatten a libgit2 diff into the text tables the diff engine parses.
    fn collect(&self, diff: &Diff<'_>, raw: &mut RawDiff) -> Result<()> {
        for idx in 0..diff.deltas().len() {
            let Some(delta) = diff.get_delta(idx) else {
                continue;
            };
            let new_path = delta.new_file().path().map(path_str);
            let old_path = delta.old_file().path().map(path_str);
            let Some(path) = new_path.clone().or_else(|| old_path.clone()) else {
                continue;
            };
            if self.is_excluded(&path) {
                continue;
            }

            let code = match delta.status() {
                Delta::Added => "A".to_string(),
                Delta::Modified => "M".to_string(),
                Delta::Deleted => "D".to_string(),
                Delta::Typechange => "T".to_string(),
                Delta::Renamed => "R100".to_string(),
                Delta::Copied => "C100".to_string(),
                Delta::Untracked => {
                    raw.untracked.push(path.clone());
                    String::new()
                }
                _ => continue,
            };

            let mut patch = match Patch::from_diff(diff, idx)? {
                Some(patch) => patch,
                None => continue,
            };
            let buf = patch.to_buf()?;
            raw.patch.push_str(&String::from_utf8_lossy(&buf));

            if code.is_empty() {
                continue;
            }

            match (delta.status(), old_path) {
                (Delta::Renamed | Delta::Copied, Some(old)) => {
                    writeln!(raw.name_status, "{}\t{}\t{}", code, old, path)?
                }
                _ => writeln!(raw.name_status, "{}\t{}", code, path)?,
            }

            if patch.delta().flags().is_binary() {
                writeln!(raw.numstat, "-\t-\t{}", path)?;
            } else {
                let (_, added, removed) = patch.line_stats()?;
                writeln!(raw.numstat, "{}\t{}\t{}", added, removed, path)?;
            }
        }
        Ok(())
    }
}

impl VersionControl for GitRepository {
    fn current_branch(&self) -> Result<String> {
        let repo = self.repo()?;
        match repo.head() {
            Ok(head) if head.is_branch() => Ok(head.shorthand().unwrap_or("HEAD").to_string()),
            Ok(_) => Ok("HEAD".to_string()),
            Err(_) => {
                // Unborn branch: HEAD still points at the branch it will create.
                let head = repo.find_reference("HEAD")?;
                let target = head.symbolic_target().unwrap_or("HEAD");
                Ok(target.strip_prefix("refs/heads/").unwrap_or(target).to_string())
            }
        }
    }

    fn head_commit(&self) -> Result<String> {
        let repo = self.repo()?;
        Self::head_commit_of(&repo)
            .map(|c| c.id().to_string())
            .ok_or_else(|| anyhow!("HEAD has no commits"))
    }

    fn object_exists(&self, sha: &str) -> bool {
        let Ok(oid) = Oid::from_str(sha) else {
            return false;
        };
        self.repo()
            .map(|repo| repo.find_object(oid, None).is_ok())
            .unwrap_or(false)
    }

    fn is_ancestor(&self, commit: &str, branch: &str) -> Result<bool> {
        let repo = self.repo()?;
        let commit_oid = Oid::from_str(commit).context("Invalid commit SHA")?;
        let branch_oid = repo
            .revparse_single(branch)
            .with_context(|| format!("Unknown branch '{}'", branch))?
            .peel_to_commit()?
            .id();
        if commit_oid == branch_oid {
            return Ok(true);
        }
        Ok(repo.graph_descendant_of(branch_oid, commit_oid)?)
    }

    fn snapshot_working_tree(&self) -> Result<String> {
        let repo = self.repo()?;
        let head = Self::head_commit_of(&repo);

        // In-memory only: the index is never written back to disk.
        let mut index = repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        let tree_id = index.write_tree()?;

        if let Some(head) = &head
            && head.tree_id() == tree_id
        {
            return Ok(head.id().to_string());
        }

        let tree = repo.find_tree(tree_id)?;
        let sig = Signature::now("gauntlet", "gauntlet@localhost")?;
        let parents: Vec<&Commit<'_>> = head.iter().collect();
        let oid = repo.commit(
            None,
            &sig,
            &sig,
            "[gauntlet] working tree snapshot",
            &tree,
            &parents,
        )?;
        debug!(snapshot = %oid, "Created working tree snapshot");
        Ok(oid.to_string())
    }

    fn raw_diff(&self, source: &DiffSource) -> Result<RawDiff> {
        let repo = self.repo()?;
        let mut raw = RawDiff::default();

        match source {
            DiffSource::Commit(sha) => {
                let commit = repo
                    .revparse_single(sha)
                    .with_context(|| format!("Unknown commit '{}'", sha))?
                    .peel_to_commit()?;
                let tree = commit.tree()?;
                let parent_tree = match commit.parent(0) {
                    Ok(parent) => {
                        raw.base_ref = parent.id().to_string();
                        Some(parent.tree()?)
                    }
                    Err(_) => {
                        raw.base_ref = "(root)".to_string();
                        None
                    }
                };
                let mut diff = repo.diff_tree_to_tree(
                    parent_tree.as_ref(),
                    Some(&tree),
                    Some(&mut Self::tree_options()),
                )?;
                diff.find_similar(None)?;
                self.collect(&diff, &mut raw)?;
            }
            DiffSource::Uncommitted => {
                raw.base_ref = "HEAD".to_string();
                let head_tree = Self::head_commit_of(&repo).map(|c| c.tree()).transpose()?;
                let diff = repo.diff_tree_to_workdir_with_index(
                    head_tree.as_ref(),
                    Some(&mut Self::workdir_options()),
                )?;
                self.collect(&diff, &mut raw)?;
            }
            DiffSource::BaseBranch { base, ci: true } => {
                let head = Self::head_commit_of(&repo).ok_or_else(|| anyhow!("HEAD has no commits"))?;
                let head_tree = head.tree()?;
                let base_tree = match Self::merge_base_tree(&repo, base) {
                    Ok(tree) => {
                        raw.base_ref = base.clone();
                        Some(tree)
                    }
                    Err(e) => {
                        warn!(base = %base, error = %e, "Base ref unavailable, falling back to HEAD^...HEAD");
                        raw.base_ref = "HEAD^".to_string();
                        head.parent(0).ok().map(|p| p.tree()).transpose()?
                    }
                };
                let mut diff = repo.diff_tree_to_tree(
                    base_tree.as_ref(),
                    Some(&head_tree),
                    Some(&mut Self::tree_options()),
                )?;
                diff.find_similar(None)?;
                self.collect(&diff, &mut raw)?;
            }
            DiffSource::BaseBranch { base, ci: false } => {
                let base_tree = match Self::merge_base_tree(&repo, base) {
                    Ok(tree) => {
                        raw.base_ref = base.clone();
                        Some(tree)
                    }
                    Err(e) => {
                        warn!(base = %base, error = %e, "Base ref unavailable, diffing uncommitted changes only");
                        raw.base_ref = "HEAD".to_string();
                        Self::head_commit_of(&repo).map(|c| c.tree()).transpose()?
                    }
                };
                let diff = repo.diff_tree_to_workdir_with_index(
                    base_tree.as_ref(),
                    Some(&mut Self::workdir_options()),
                )?;
                self.collect(&diff, &mut raw)?;
            }
            DiffSource::FixBase(sha) => {
                raw.base_ref = sha.clone();
                let snapshot = repo
                    .find_commit(Oid::from_str(sha)?)
                    .with_context(|| format!("Fix base {} no longer exists", sha))?;
                let tree = snapshot.tree()?;
                // Compared straight against the working tree: files the
                // snapshot already captured as untracked are matched by
                // content and never reported as new again.
                let diff =
                    repo.diff_tree_to_workdir(Some(&tree), Some(&mut Self::workdir_options()))?;
                self.collect(&diff, &mut raw)?;
            }
        }

        Ok(raw)
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
