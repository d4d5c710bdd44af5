//! Configuration validation: `gauntlet validate`.

use anyhow::Result;
use std::path::Path;

use gauntlet::config::GauntletConfig;

pub fn cmd_validate(project_dir: &Path) -> Result<bool> {
    let config_path = GauntletConfig::config_path(project_dir);

    println!();
    println!("Validating configuration...");
    println!();

    if !config_path.exists() {
        println!("No config found at {}. Using defaults (valid).", config_path.display());
        println!();
        return Ok(true);
    }

    let config = GauntletConfig::load(&config_path)?;
    let errors = config.errors();
    let warnings = config.validate();

    if !errors.is_empty() {
        println!("Configuration errors:");
        for error in &errors {
            println!("  - {}", error);
        }
    }
    if !warnings.is_empty() {
        println!("Configuration warnings:");
        for warning in &warnings {
            println!("  - {}", warning);
        }
    }
    if errors.is_empty() && warnings.is_empty() {
        println!("Configuration is valid.");
    }
    println!();
    Ok(errors.is_empty())
}
