//! Snapshot commands: `conductor snapshot create|list|restore`.

use anyhow::Result;
use conductor::checkpoint::CheckpointManager;
use conductor::clock::system_clock;
use conductor::config::Config;
use conductor::exit_codes;
use conductor::recovery::SessionRecovery;
use console::style;

use super::super::SnapshotCommands;

pub fn cmd_snapshot(config: &Config, command: SnapshotCommands) -> Result<i32> {
    let clock = system_clock();
    let checkpoints = CheckpointManager::new(&config.snapshot_dir, clock.clone());

    match command {
        SnapshotCommands::Create { name } => {
            // Creating a snapshot also records a reference in the live state.
            let (_lock, mut store) = super::open_locked(config, clock)?;
            let name = checkpoints.create_snapshot(&mut store, name.as_deref())?;
            println!(
                "Created snapshot {} at {}",
                style(&name).cyan(),
                checkpoints.snapshot_path(&name).display()
            );
            Ok(exit_codes::SUCCESS)
        }
        SnapshotCommands::List => {
            let snapshots = checkpoints.list_snapshots()?;
            if snapshots.is_empty() {
                println!("No snapshots in {}", checkpoints.dir().display());
                return Ok(exit_codes::SUCCESS);
            }
            println!("{:<40} {}", style("NAME").bold(), style("TIMESTAMP").bold());
            for snapshot in snapshots {
                println!(
                    "{:<40} {}",
                    snapshot.name,
                    snapshot.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
            Ok(exit_codes::SUCCESS)
        }
        SnapshotCommands::Restore { name } => {
            let (_lock, mut store) = super::open_locked(config, clock)?;
            let mut recovery = SessionRecovery::new(checkpoints, &config.project_dir);
            if !recovery.recover_from_checkpoint(&mut store, Some(&name))? {
                eprintln!("Snapshot '{}' not found; state unchanged.", name);
                return Ok(exit_codes::HARD_FAILURE);
            }
            println!("Restored snapshot {}", style(&name).cyan());
            let report = recovery.validate_recovery(&store);
            recovery.record_report(&mut store, &report)?;
            Ok(super::recover::print_recovery_report(&report))
        }
    }
}
