use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod cmd;

#[derive(Parser)]
#[command(name = "gauntlet")]
#[command(version, about = "Run quality gates until checks and AI reviews converge")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project root (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by `run` and `detect`.
#[derive(Args, Clone, Debug, Default)]
pub struct ScopeArgs {
    /// Base ref to diff against (overrides base_branch)
    #[arg(long)]
    pub base_ref: Option<String>,

    /// Only run the gate with this name
    #[arg(long)]
    pub gate: Option<String>,

    /// Review a single commit against its parent
    #[arg(long, conflicts_with = "uncommitted")]
    pub commit: Option<String>,

    /// Review staged, unstaged and untracked changes only
    #[arg(long)]
    pub uncommitted: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run every applicable check and review gate
    Run {
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Show the change set and the jobs a run would execute
    Detect {
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Archive gate artifacts so the next run starts fresh
    Clean {
        /// Also delete the recorded execution state
        #[arg(long)]
        all: bool,
    },
    /// Validate .gauntlet/config.toml
    Validate,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    gauntlet::logging::init(cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let success = match &cli.command {
        Commands::Run { scope } => cmd::cmd_run(&project_dir, scope).await?,
        Commands::Detect { scope } => cmd::cmd_detect(&project_dir, scope)?,
        Commands::Clean { all } => cmd::cmd_clean(&project_dir, *all)?,
        Commands::Validate => cmd::cmd_validate(&project_dir)?,
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
