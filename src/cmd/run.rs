//! Gate execution: `gauntlet run`.

use anyhow::Result;
use console::style;
use std::path::Path;

use super::super::ScopeArgs;
use gauntlet::gates::{GateResult, GateStatus};
use gauntlet::orchestrator::{RunOutcome, RunStatus, Runner};

pub async fn cmd_run(project_dir: &Path, scope: &ScopeArgs) -> Result<bool> {
    let runner = Runner::from_project(project_dir)?;
    let options = super::run_options(scope);

    let outcome = runner.run(options).await;
    print_outcome(&outcome);
    Ok(outcome.status.is_success())
}

fn status_label(status: GateStatus) -> console::StyledObject<&'static str> {
    match status {
        GateStatus::Pass => style("PASS").green().bold(),
        GateStatus::Fail => style("FAIL").red().bold(),
        GateStatus::Error => style("ERROR").yellow().bold(),
    }
}

fn print_result(result: &GateResult) {
    println!(
        "  {:<5} {} {}",
        status_label(result.status),
        result.job_id,
        style(format!("({} ms)", result.duration_ms)).dim()
    );
    if !result.message.is_empty() {
        println!("        {}", result.message);
    }
    for violation in &result.violations {
        println!("        - {}", violation);
    }
    for path in &result.artifact_paths {
        println!("        {}", style(path.display()).dim());
    }
}

pub fn print_outcome(outcome: &RunOutcome) {
    println!();
    match outcome.run_number {
        Some(run) => println!("{} (run {})", style("Gauntlet").bold().cyan(), run),
        None => println!("{}", style("Gauntlet").bold().cyan()),
    }
    if let Some(stats) = &outcome.diff_stats {
        println!("  {}", style(stats).dim());
    }
    println!();

    for result in &outcome.results {
        print_result(result);
    }
    if !outcome.results.is_empty() {
        println!();
    }

    if outcome.fixed_count + outcome.skipped_count + outcome.failed_count > 0 {
        println!(
            "Fixed: {}  Skipped: {}  Failed: {}",
            outcome.fixed_count, outcome.skipped_count, outcome.failed_count
        );
    }

    let status = match outcome.status {
        RunStatus::Passed => style(outcome.status.to_string()).green().bold(),
        RunStatus::PassedWithWarnings | RunStatus::NoChanges | RunStatus::NoApplicableGates => {
            style(outcome.status.to_string()).yellow().bold()
        }
        _ => style(outcome.status.to_string()).red().bold(),
    };
    println!("Status: {}", status);
    if let Some(message) = &outcome.message {
        println!("{}", message);
    }
    println!();
}
