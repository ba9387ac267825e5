//! Project initialization: `conductor init`.

use anyhow::Result;
use conductor::exit_codes;
use std::path::Path;

pub fn cmd_init(project_dir: &Path) -> Result<i32> {
    use conductor::init::init_project;

    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "Initialized conductor project at {}",
            result.conductor_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .conductor/");
        println!("  ├── conductor.toml  # Settings");
        println!("  ├── phases.json     # Phase configuration (example)");
        println!("  ├── snapshots/      # Checkpoints");
        println!("  ├── outputs/        # Executor output documents");
        println!("  └── logs/           # Log files");
        println!("  phase_executors/    # phase_<N>_executor programs");
        println!();
        println!("Next steps:");
        println!("  1. Edit .conductor/phases.json to describe your pipeline");
        println!("  2. Add executors under phase_executors/");
        println!("  3. Run `conductor run --mode dry-run` to check the plan");
    } else {
        println!(
            "Conductor project already initialized at {}",
            result.conductor_dir.display()
        );
        if result.wrote_config {
            println!("Created missing conductor.toml.");
        }
        if result.wrote_phases {
            println!("Created example phases.json.");
        }
        println!("Directory structure verified.");
    }

    Ok(exit_codes::SUCCESS)
}
