//! Configuration view and validation: `conductor config`.

use anyhow::{Context, Result};
use conductor::config::{Config, EXECUTOR_DIR_ENV};
use conductor::exit_codes;
use conductor::phase::phase_name_key;
use console::style;

use super::super::ConfigCommands;

pub fn cmd_config(config: &Config, command: Option<ConfigCommands>) -> Result<i32> {
    let config_path = config.config_file();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Conductor Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No conductor.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            let rendered = toml::to_string_pretty(config.toml())
                .context("Failed to render configuration")?;
            for line in rendered.lines() {
                println!("  {}", line);
            }
            println!();

            println!("Effective paths (with env overrides):");
            println!("  phases_file   = {}", config.phases_file.display());
            println!("  criteria_file = {}", config.criteria_file.display());
            println!("  state_file    = {}", config.state_file.display());
            println!("  snapshot_dir  = {}", config.snapshot_dir.display());
            println!("  output_dir    = {}", config.output_dir.display());
            println!("  executor_dir  = {}", config.executor_dir.display());
            if std::env::var(EXECUTOR_DIR_ENV).is_ok() {
                println!("                  {}", style(format!("(from {})", EXECUTOR_DIR_ENV)).dim());
            }

            if let Ok(phases) = config.load_phases() {
                println!();
                println!("Resolved phases:");
                for phase in phases {
                    println!(
                        "  {:>3}  {:<28} timeout {}s  deps {:?}  output {}.json",
                        phase.phase,
                        phase.name,
                        phase.timeout_seconds,
                        phase.dependencies,
                        phase_name_key(&phase.name)
                    );
                }
            }
            println!();
            Ok(exit_codes::SUCCESS)
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let mut warnings = config.toml().validate();
            let mut errors = Vec::new();
            if config.phases_file.exists() {
                if let Err(e) = config.load_plan() {
                    errors.push(format!("{:#}", e));
                }
            } else {
                warnings.push(format!(
                    "No phase configuration at {}",
                    config.phases_file.display()
                ));
            }
            if let Err(e) = config.load_criteria() {
                errors.push(format!("{:#}", e));
            }

            if errors.is_empty() && warnings.is_empty() {
                println!("Configuration is valid.");
            }
            if !warnings.is_empty() {
                println!("Configuration warnings:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }
            if !errors.is_empty() {
                println!("{}", style("Configuration errors:").red().bold());
                for error in &errors {
                    println!("  - {}", error);
                }
            }
            println!();

            Ok(if errors.is_empty() {
                exit_codes::SUCCESS
            } else {
                exit_codes::HARD_FAILURE
            })
        }
    }
}
