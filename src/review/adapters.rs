//! Reviewer adapters.
//!
//! A [`ReviewerAdapter`] wraps one external review tool behind a uniform
//! shape. Adapters are looked up by name through an [`AdapterRegistry`];
//! the built-in ones drive the `claude`, `codex` and `gemini` CLIs.

use crate::command::resolve_executable;
use crate::errors::GateError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(15);

/// One reviewer invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewRequest {
    /// Gate instructions plus the output schema.
    pub prompt: String,
    pub diff: String,
    /// Findings this slot reported last time, when verifying.
    pub context: Option<String>,
    pub working_dir: PathBuf,
    pub timeout: Duration,
}

impl ReviewRequest {
    /// The complete text sent to a CLI reviewer.
    pub fn full_prompt(&self) -> String {
        let mut text = self.prompt.clone();
        if let Some(context) = &self.context {
            text.push_str("\n\n");
            text.push_str(context);
        }
        text.push_str("\n\n## Diff\n\n```diff\n");
        text.push_str(&self.diff);
        if !self.diff.ends_with('\n') {
            text.push('\n');
        }
        text.push_str("```\n");
        text
    }
}

/// Uniform interface over an external review tool.
#[async_trait]
pub trait ReviewerAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap check: is the tool installed at all.
    async fn is_available(&self) -> bool;

    /// Whether the tool actually responds.
    async fn check_health(&self) -> bool;

    /// Run the review and return the tool's raw text output.
    async fn execute(&self, request: &ReviewRequest) -> Result<String, GateError>;
}

/// Supported reviewer CLIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CliTool {
    Claude,
    Codex,
    Gemini,
}

impl CliTool {
    pub const ALL: [CliTool; 3] = [CliTool::Claude, CliTool::Codex, CliTool::Gemini];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
        }
    }

    /// Non-interactive arguments; the prompt always goes to stdin.
    fn review_args(&self) -> &'static [&'static str] {
        match self {
            Self::Claude => &["--print"],
            Self::Codex => &["exec", "-"],
            Self::Gemini => &[],
        }
    }
}

/// Reviewer backed by a CLI tool reading the prompt from stdin.
#[derive(Debug, Clone)]
pub struct CliReviewer {
    tool: CliTool,
    program: String,
}

impl CliReviewer {
    pub fn new(tool: CliTool) -> Self {
        Self {
            tool,
            program: tool.name().to_string(),
        }
    }

    /// Use a different binary (e.g. a wrapper script) for this tool.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn failed(&self, message: impl Into<String>) -> GateError {
        GateError::AdapterFailed {
            adapter: self.tool.name().to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl ReviewerAdapter for CliReviewer {
    fn name(&self) -> &str {
        self.tool.name()
    }

    async fn is_available(&self) -> bool {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        resolve_executable(&self.program, &cwd).is_some()
    }

    async fn check_health(&self) -> bool {
        if !self.is_available().await {
            return false;
        }
        let status = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();
        match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, status).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                tracing::debug!(adapter = self.name(), "Health check failed: {}", e);
                false
            }
            Err(_) => {
                tracing::debug!(adapter = self.name(), "Health check timed out");
                false
            }
        }
    }

    async fn execute(&self, request: &ReviewRequest) -> Result<String, GateError> {
        let mut child = Command::new(&self.program)
            .args(self.tool.review_args())
            .current_dir(&request.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| GateError::SpawnFailed {
                program: self.program.clone(),
                source,
            })?;

        // Feed stdin while draining stdout so a large prompt cannot deadlock
        // on a full pipe.
        let stdin = child.stdin.take();
        let prompt = request.full_prompt();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(prompt.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };

        let (fed, output) = tokio::time::timeout(request.timeout, async {
            tokio::join!(feed, child.wait_with_output())
        })
        .await
        .map_err(|_| GateError::Timeout {
            target: format!("reviewer {}", self.name()),
            secs: request.timeout.as_secs(),
        })?;
        let output =
            output.map_err(|e| self.failed(format!("Failed to wait for process: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.failed(format!(
                "exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        fed.map_err(|e| self.failed(format!("Failed to write prompt to stdin: {}", e)))?;

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Name → adapter lookup with per-invocation health caching.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ReviewerAdapter>>,
    health: Mutex<HashMap<String, bool>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `claude`, `codex` and `gemini` CLI reviewers.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for tool in CliTool::ALL {
            registry.register(Arc::new(CliReviewer::new(tool)));
        }
        registry
    }

    /// Add or replace an adapter under its own name.
    pub fn register(&mut self, adapter: Arc<dyn ReviewerAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ReviewerAdapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether the named adapter is registered, available and healthy.
    /// Each adapter is probed at most once per registry.
    pub async fn is_healthy(&self, name: &str) -> bool {
        if let Some(&cached) = self.health.lock().await.get(name) {
            return cached;
        }
        let healthy = match self.get(name) {
            Some(adapter) => adapter.is_available().await && adapter.check_health().await,
            None => {
                tracing::warn!(adapter = name, "Unknown reviewer adapter");
                false
            }
        };
        self.health.lock().await.insert(name.to_string(), healthy);
        healthy
    }

    /// Healthy adapters in `preference` order, without duplicates.
    pub async fn healthy_in_order(&self, preference: &[String]) -> Vec<Arc<dyn ReviewerAdapter>> {
        let mut healthy = Vec::new();
        let mut seen = Vec::new();
        for name in preference {
            if seen.contains(name) {
                continue;
            }
            seen.push(name.clone());
            if self.is_healthy(name).await
                && let Some(adapter) = self.get(name)
            {
                healthy.push(adapter);
            }
        }
        healthy
    }
}
