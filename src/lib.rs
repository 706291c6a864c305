// ============================================================================
// MODULE DECLARATIONS
// ============================================================================
pub mod collisions;
pub mod core;
pub mod error;
pub mod integrate;
pub mod io;
pub mod math;
pub mod physics;

// ============================================================================
// RE-EXPORTS (Public API)
// ============================================================================
pub use crate::core::grid::SizeGrid;
pub use crate::core::state::{clone_state, CellState, CellStatus, StopReason};
pub use crate::error::{EngineError, EngineResult};
pub use crate::integrate::driver::Driver;
pub use crate::integrate::imex::{ImexConfig, ImexIntegrator};
pub use crate::io::config::Config;
pub use crate::io::series::OutputSinks;
pub use crate::io::summary::RunSummary;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::atomic::AtomicBool;

// ============================================================================
// HIGH-LEVEL INTERFACE
// ============================================================================

/// The master pipeline: builds the engine from a validated configuration,
/// runs the time loop, and writes the run artifacts into `out_dir`
/// (series.csv, mass_budget.csv, optional psd_history.csv, summary.json,
/// checkpoints).
pub fn run_simulation(
    config: Config,
    out_dir: &Path,
    cancel: Option<&AtomicBool>,
) -> Result<RunSummary> {
    // 1. ENGINE CONSTRUCTION (tables, models, cells)
    let mut driver = Driver::new(config.clone()).context("engine construction failed")?;

    // 2. OUTPUT SINKS (flush-on-drop guards)
    let with_psd = config.output.psd_stride > 0;
    let mut sinks = OutputSinks::in_dir(out_dir, with_psd).context("output setup failed")?;

    // 3. TIME LOOP
    let checkpoint_dir = out_dir.join("checkpoints");
    let summary = driver
        .run(
            &mut sinks,
            if config.numerics.checkpoint.enabled {
                Some(checkpoint_dir.as_path())
            } else {
                None
            },
            cancel,
        )
        .context("simulation failed")?;

    // 4. SUMMARY ARTIFACT
    summary
        .write(&out_dir.join("summary.json"))
        .context("summary write failed")?;

    Ok(summary)
}

/// Convenience entry point used by the CLI and batch tests: load, validate,
/// run, summarise.
pub fn run_from_config_file(
    config_path: &Path,
    out_dir: &Path,
    cancel: Option<&AtomicBool>,
) -> Result<RunSummary> {
    let config = Config::load(config_path)
        .with_context(|| format!("loading configuration {config_path:?}"))?;
    run_simulation(config, out_dir, cancel)
}
