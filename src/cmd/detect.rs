//! Dry inspection: `gauntlet detect`.

use anyhow::Result;
use console::style;
use std::path::Path;

use super::super::ScopeArgs;
use gauntlet::orchestrator::Runner;

pub fn cmd_detect(project_dir: &Path, scope: &ScopeArgs) -> Result<bool> {
    let runner = Runner::from_project(project_dir)?;
    let detection = runner.detect(&super::run_options(scope))?;

    println!();
    println!(
        "{} against {}",
        style("Changes").bold().cyan(),
        detection.source
    );
    println!("  {}", detection.changes.stats);
    println!("  next run number: {}", detection.run_number);
    println!();

    if detection.changes.files.is_empty() {
        println!("No changed files.");
        println!();
        return Ok(true);
    }

    for file in &detection.changes.files {
        println!("  {}", file);
    }
    println!();

    if detection.jobs.is_empty() {
        println!("No configured gate applies to these files.");
    } else {
        println!("{}", style("Jobs").bold().cyan());
        for job in &detection.jobs {
            println!(
                "  {} {}",
                job.id,
                style(format!("({} files)", job.files.len())).dim()
            );
        }
    }
    println!();
    Ok(true)
}
