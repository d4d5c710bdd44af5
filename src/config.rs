//! Project configuration loaded from `.gauntlet/config.toml`.
//!
//! # Configuration File Format
//!
//! ```toml
//! base_branch = "origin/main"
//! log_dir = "gauntlet_logs"
//! max_retries = 3
//! allow_parallel = true
//! rerun_new_issue_threshold = "high"
//!
//! [cli]
//! default_preference = ["claude", "codex", "gemini"]
//! review_timeout_secs = 600
//!
//! [[entry_points]]
//! path = "src"
//! checks = ["lint"]
//! reviews = ["code-quality"]
//! exclude = ["**/*.snap"]
//!
//! [checks.lint]
//! command = "cargo clippy -- -D warnings"
//! parallel = true
//! fail_fast = false
//! timeout_secs = 300
//!
//! [reviews.code-quality]
//! prompt = "Review for correctness and clarity."
//! num_reviews = 2
//! cli_preference = ["claude", "codex"]
//! ```

use crate::review::findings::Priority;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const CONFIG_DIR: &str = ".gauntlet";
pub const CONFIG_FILE: &str = "config.toml";

/// Reviewer CLI settings shared by all review gates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliSection {
    /// Adapter names in preference order.
    #[serde(default = "default_preference")]
    pub default_preference: Vec<String>,
    /// Upper bound for one reviewer invocation.
    #[serde(default = "default_review_timeout_secs")]
    pub review_timeout_secs: u64,
}

fn default_preference() -> Vec<String> {
    vec![
        "claude".to_string(),
        "codex".to_string(),
        "gemini".to_string(),
    ]
}

fn default_review_timeout_secs() -> u64 {
    600
}

impl Default for CliSection {
    fn default() -> Self {
        Self {
            default_preference: default_preference(),
            review_timeout_secs: default_review_timeout_secs(),
        }
    }
}

/// A path the gates are bound to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPointConfig {
    /// `.`, a directory, or `dir/*` (one entry point per changed child).
    pub path: String,
    #[serde(default)]
    pub checks: Vec<String>,
    #[serde(default)]
    pub reviews: Vec<String>,
    /// Glob patterns for files that never trigger this entry point.
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// A deterministic command gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckGateConfig {
    pub command: String,
    /// Relative to the project root. Defaults to the entry point directory.
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default = "default_true")]
    pub parallel: bool,
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default = "default_check_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_check_timeout_secs() -> u64 {
    300
}

/// An AI review gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewGateConfig {
    #[serde(default)]
    pub prompt: Option<String>,
    /// Path relative to `.gauntlet/`.
    #[serde(default)]
    pub prompt_file: Option<String>,
    #[serde(default = "default_num_reviews")]
    pub num_reviews: u32,
    /// Overrides `[cli].default_preference` for this gate.
    #[serde(default)]
    pub cli_preference: Option<Vec<String>>,
    #[serde(default = "default_true")]
    pub parallel: bool,
}

fn default_num_reviews() -> u32 {
    1
}

impl Default for ReviewGateConfig {
    fn default() -> Self {
        Self {
            prompt: None,
            prompt_file: None,
            num_reviews: default_num_reviews(),
            cli_preference: None,
            parallel: true,
        }
    }
}

impl ReviewGateConfig {
    /// Gate instructions: inline prompt, else the prompt file, else empty.
    pub fn resolve_prompt(&self, config_dir: &Path) -> Result<String> {
        if let Some(prompt) = &self.prompt {
            return Ok(prompt.clone());
        }
        match &self.prompt_file {
            Some(file) => {
                let path = config_dir.join(file);
                std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read prompt file: {}", path.display()))
            }
            None => Ok(String::new()),
        }
    }
}

/// Parsed `.gauntlet/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GauntletConfig {
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_true")]
    pub allow_parallel: bool,
    /// New findings below this priority are dropped on verification runs.
    #[serde(default = "default_threshold")]
    pub rerun_new_issue_threshold: Priority,
    #[serde(default)]
    pub cli: CliSection,
    #[serde(default)]
    pub entry_points: Vec<EntryPointConfig>,
    #[serde(default)]
    pub checks: BTreeMap<String, CheckGateConfig>,
    #[serde(default)]
    pub reviews: BTreeMap<String, ReviewGateConfig>,
}

fn default_base_branch() -> String {
    "origin/main".to_string()
}

fn default_log_dir() -> String {
    "gauntlet_logs".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_threshold() -> Priority {
    Priority::High
}

impl Default for GauntletConfig {
    fn default() -> Self {
        Self {
            base_branch: default_base_branch(),
            log_dir: default_log_dir(),
            max_retries: default_max_retries(),
            allow_parallel: true,
            rerun_new_issue_threshold: default_threshold(),
            cli: CliSection::default(),
            entry_points: Vec::new(),
            checks: BTreeMap::new(),
            reviews: BTreeMap::new(),
        }
    }
}

impl GauntletConfig {
    pub fn config_path(project_dir: &Path) -> PathBuf {
        project_dir.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config.toml")
    }

    /// Load `.gauntlet/config.toml` under `project_dir`, or defaults when
    /// the file does not exist.
    pub fn load_or_default(project_dir: &Path) -> Result<Self> {
        let path = Self::config_path(project_dir);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn log_dir_path(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.log_dir)
    }

    /// Adapter preference for a review gate.
    pub fn preference_for(&self, review: &ReviewGateConfig) -> Vec<String> {
        review
            .cli_preference
            .clone()
            .unwrap_or_else(|| self.cli.default_preference.clone())
    }

    /// Problems that make the configuration unusable.
    pub fn errors(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (idx, entry) in self.entry_points.iter().enumerate() {
            if entry.path.trim().is_empty() {
                errors.push(format!("entry_points[{}] has an empty path", idx));
            }
            for name in &entry.checks {
                if !self.checks.contains_key(name) {
                    errors.push(format!(
                        "Entry point '{}' references unknown check gate '{}'",
                        entry.path, name
                    ));
                }
            }
            for name in &entry.reviews {
                if !self.reviews.contains_key(name) {
                    errors.push(format!(
                        "Entry point '{}' references unknown review gate '{}'",
                        entry.path, name
                    ));
                }
            }
            for pattern in &entry.exclude {
                if let Err(e) = glob::Pattern::new(pattern) {
                    errors.push(format!(
                        "Invalid exclude pattern '{}' in entry point '{}': {}",
                        pattern, entry.path, e
                    ));
                }
            }
        }

        for (name, check) in &self.checks {
            if check.command.trim().is_empty() {
                errors.push(format!("Check gate '{}' has an empty command", name));
            }
        }

        for (name, review) in &self.reviews {
            if review.num_reviews == 0 {
                errors.push(format!("Review gate '{}' has num_reviews = 0", name));
            }
            if self.preference_for(review).is_empty() {
                errors.push(format!("Review gate '{}' has no reviewer adapters", name));
            }
        }

        errors
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.entry_points.is_empty() {
            warnings.push("No entry points configured; every run will have no gates".to_string());
        }

        for (name, review) in &self.reviews {
            if review.prompt.is_some() && review.prompt_file.is_some() {
                warnings.push(format!(
                    "Review gate '{}' sets both prompt and prompt_file; prompt wins",
                    name
                ));
            }
            if review.prompt.is_none() && review.prompt_file.is_none() {
                warnings.push(format!(
                    "Review gate '{}' has no prompt; only the built-in instructions are sent",
                    name
                ));
            }
        }

        let referenced = |name: &String, checks: bool| {
            self.entry_points.iter().any(|e| {
                if checks {
                    e.checks.contains(name)
                } else {
                    e.reviews.contains(name)
                }
            })
        };
        for name in self.checks.keys().filter(|n| !referenced(n, true)) {
            warnings.push(format!("Check gate '{}' is not used by any entry point", name));
        }
        for name in self.reviews.keys().filter(|n| !referenced(n, false)) {
            warnings.push(format!("Review gate '{}' is not used by any entry point", name));
        }

        if self.max_retries == 0 {
            warnings.push("max_retries = 0 allows only a single run".to_string());
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
base_branch = "origin/develop"
max_retries = 2
rerun_new_issue_threshold = "medium"

[cli]
default_preference = ["codex", "claude"]

[[entry_points]]
path = "src"
checks = ["lint"]
reviews = ["code-quality"]
exclude = ["**/*.snap"]

[checks.lint]
command = "cargo clippy"
fail_fast = true

[reviews.code-quality]
prompt = "Be thorough."
num_reviews = 2
"#;

    #[test]
    fn test_defaults() {
        let config = GauntletConfig::parse("").unwrap();
        assert_eq!(config, GauntletConfig::default());
        assert_eq!(config.base_branch, "origin/main");
        assert_eq!(config.log_dir, "gauntlet_logs");
        assert_eq!(config.max_retries, 3);
        assert!(config.allow_parallel);
        assert_eq!(config.rerun_new_issue_threshold, Priority::High);
        assert_eq!(config.cli.default_preference, vec!["claude", "codex", "gemini"]);
        assert_eq!(config.cli.review_timeout_secs, 600);
    }

    #[test]
    fn test_parse_sample() {
        let config = GauntletConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.base_branch, "origin/develop");
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.rerun_new_issue_threshold, Priority::Medium);

        let lint = &config.checks["lint"];
        assert!(lint.parallel);
        assert!(lint.fail_fast);
        assert_eq!(lint.timeout_secs, 300);

        let review = &config.reviews["code-quality"];
        assert_eq!(review.num_reviews, 2);
        assert_eq!(config.preference_for(review), vec!["codex", "claude"]);
        assert!(config.errors().is_empty());
    }

    #[test]
    fn test_invalid_threshold_fails_to_parse() {
        assert!(GauntletConfig::parse("rerun_new_issue_threshold = \"urgent\"").is_err());
    }

    #[test]
    fn test_unknown_gate_reference_is_an_error() {
        let config = GauntletConfig::parse(
            "[[entry_points]]\npath = \".\"\nchecks = [\"missing\"]\nreviews = [\"nope\"]\n",
        )
        .unwrap();
        let errors = config.errors();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("missing"));
        assert!(errors[1].contains("nope"));
    }

    #[test]
    fn test_zero_reviews_is_an_error() {
        let config =
            GauntletConfig::parse("[reviews.q]\nprompt = \"x\"\nnum_reviews = 0\n").unwrap();
        assert!(config.errors().iter().any(|e| e.contains("num_reviews")));
    }

    #[test]
    fn test_validate_warnings() {
        let config = GauntletConfig::parse(
            "[checks.unused]\ncommand = \"true\"\n[reviews.q]\nnum_reviews = 1\n",
        )
        .unwrap();
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("No entry points")));
        assert!(warnings.iter().any(|w| w.contains("'unused' is not used")));
        assert!(warnings.iter().any(|w| w.contains("has no prompt")));
    }

    #[test]
    fn test_load_or_default_and_prompt_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            GauntletConfig::load_or_default(dir.path()).unwrap(),
            GauntletConfig::default()
        );

        let config_dir = dir.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("review.md"), "Check error handling.").unwrap();
        std::fs::write(
            config_dir.join(CONFIG_FILE),
            "[reviews.q]\nprompt_file = \"review.md\"\n",
        )
        .unwrap();

        let config = GauntletConfig::load_or_default(dir.path()).unwrap();
        let prompt = config.reviews["q"].resolve_prompt(&config_dir).unwrap();
        assert_eq!(prompt, "Check error handling.");
    }
}
