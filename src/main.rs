use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;

use debris_disk_engine::io::checkpoint;
use debris_disk_engine::{run_simulation, Config, Driver, OutputSinks};

#[derive(Parser)]
#[command(author, version, about = "Dusty debris-disk evolution engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs a simulation from a TOML configuration file.
    Run {
        /// Configuration file.
        #[arg(short, long)]
        config: PathBuf,

        /// Output directory for run artifacts.
        #[arg(short, long, default_value = "out")]
        output: PathBuf,
    },

    /// Resumes a run from the most recent checkpoint in an output directory.
    Resume {
        #[arg(short, long)]
        config: PathBuf,

        /// Output directory holding `checkpoints/`.
        #[arg(short, long, default_value = "out")]
        output: PathBuf,
    },

    /// Loads and validates a configuration without running it.
    Check {
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let start_time = Instant::now();

    match cli.command {
        Commands::Run { config, output } => {
            println!("--- Debris Disk Engine ---");
            println!("Reading configuration from {:?}...", config);
            let cfg = Config::load(&config)?;
            println!(
                "-> {} cells, {} size bins.",
                cfg.cells.radii_rmars.len(),
                cfg.grid.k
            );

            let summary = run_simulation(cfg, &output, None)?;

            println!("\nSuccess!");
            print_summary(&summary);
            println!("Artifacts written to {:?}.", output);
            println!("Done in {:.2?}", start_time.elapsed());
        }

        Commands::Resume { config, output } => {
            let cfg = Config::load(&config)?;
            let ckpt_dir = output.join("checkpoints");
            let latest = checkpoint::latest(&ckpt_dir)?
                .with_context(|| format!("no checkpoint found under {:?}", ckpt_dir))?;
            println!("Resuming from {:?}...", latest);

            let snapshot = checkpoint::load(&latest, Some(&cfg.hash()))?;
            let mut driver = Driver::restore(cfg.clone(), &snapshot)?;
            let mut sinks = OutputSinks::in_dir(&output, cfg.output.psd_stride > 0)?;
            let summary = driver.run(&mut sinks, Some(ckpt_dir.as_path()), None)?;
            summary.write(&output.join("summary.json"))?;

            println!("\nSuccess!");
            print_summary(&summary);
            println!("Done in {:.2?}", start_time.elapsed());
        }

        Commands::Check { config } => {
            let cfg = Config::load(&config)?;
            println!("Configuration OK (hash {}).", cfg.hash());
        }
    }

    Ok(())
}

fn print_summary(summary: &debris_disk_engine::RunSummary) {
    println!(
        "t_end = {:.3e} s over {} steps, max mass-budget error {:.2e}",
        summary.t_end_s, summary.n_steps, summary.max_eps_mass
    );
    for cell in &summary.cells {
        println!(
            "  cell {}: {} | sigma_surf {:.3e} kg/m^2 | blow-out loss {:.3e} | sink loss {:.3e}",
            cell.cell_index,
            cell.stop_reason,
            cell.sigma_surf_final,
            cell.m_loss_blow,
            cell.m_loss_sink
        );
    }
}
