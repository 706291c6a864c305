use crate::core::grid::SizeGrid;
use crate::core::state::{CellState, CellStatus, CumulativeLosses, Workspace};
use crate::error::{EngineError, EngineResult};
use crate::physics::phase::Phase;
use glob::glob;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const SCHEMA_VERSION: u32 = 1;

/// Serialisable image of one cell; the workspace is rebuilt on restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellSnapshot {
    pub cell_index: usize,
    pub r_m: f64,
    pub n_bins: Vec<f64>,
    pub sigma_surf: f64,
    pub sigma_deep: f64,
    pub s_min_eff: f64,
    pub tau_los_prev: f64,
    pub phase: Phase,
    pub feedback_scale: f64,
    pub reservoir_remaining: f64,
    pub initial_mass_per_bin: Vec<f64>,
    pub cum: CumulativeLosses,
    pub status: CellStatus,
    /// Per-cell RNG child seed; the stream is only consumed at
    /// initialisation, so the seed fully describes the RNG state.
    pub rng_seed: u64,
}

/// Self-describing state snapshot written at checkpoint intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub schema_version: u32,
    pub config_hash: String,
    pub time_s: f64,
    pub step: u64,
    pub grid: SizeGrid,
    pub cells: Vec<CellSnapshot>,
}

impl Snapshot {
    pub fn capture(config_hash: &str, time_s: f64, step: u64, grid: &SizeGrid, cells: &[CellState]) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            config_hash: config_hash.to_string(),
            time_s,
            step,
            grid: grid.clone(),
            cells: cells
                .iter()
                .map(|c| CellSnapshot {
                    cell_index: c.cell_index,
                    r_m: c.r,
                    n_bins: c.n_bins.iter().copied().collect(),
                    sigma_surf: c.sigma_surf,
                    sigma_deep: c.sigma_deep,
                    s_min_eff: c.s_min_eff,
                    tau_los_prev: c.tau_los_prev,
                    phase: c.phase,
                    feedback_scale: c.feedback_scale,
                    reservoir_remaining: c.reservoir_remaining,
                    initial_mass_per_bin: c.initial_mass_per_bin.iter().copied().collect(),
                    cum: c.cum,
                    status: c.status,
                    rng_seed: c.seed,
                })
                .collect(),
        }
    }

    /// Rebuilds the mutable cell states (with fresh workspaces).
    pub fn restore_cells(&self) -> Vec<CellState> {
        let k_bins = self.grid.n_bins();
        self.cells
            .iter()
            .map(|snap| CellState {
                cell_index: snap.cell_index,
                r: snap.r_m,
                n_bins: DVector::from_vec(snap.n_bins.clone()),
                sigma_surf: snap.sigma_surf,
                sigma_deep: snap.sigma_deep,
                s_min_eff: snap.s_min_eff,
                tau_los_prev: snap.tau_los_prev,
                phase: snap.phase,
                feedback_scale: snap.feedback_scale,
                reservoir_remaining: snap.reservoir_remaining,
                initial_mass_per_bin: DVector::from_vec(snap.initial_mass_per_bin.clone()),
                cum: snap.cum,
                status: snap.status,
                seed: snap.rng_seed,
                workspace: Workspace::new(k_bins),
            })
            .collect()
    }
}

/// Writes `checkpoint_step<NNNNNNNN>.json` into `dir` and prunes old files
/// beyond `keep_last_n`.
pub fn save(dir: &Path, snapshot: &Snapshot, keep_last_n: usize) -> EngineResult<PathBuf> {
    std::fs::create_dir_all(dir)
        .map_err(|e| EngineError::Io(format!("could not create checkpoint dir {dir:?}: {e}")))?;
    let path = dir.join(format!("checkpoint_step{:08}.json", snapshot.step));
    let payload = serde_json::to_string_pretty(snapshot)
        .map_err(|e| EngineError::Io(format!("checkpoint serialisation failed: {e}")))?;
    std::fs::write(&path, payload)
        .map_err(|e| EngineError::Io(format!("could not write checkpoint {path:?}: {e}")))?;

    if keep_last_n > 0 {
        let mut existing = list(dir)?;
        while existing.len() > keep_last_n {
            let oldest = existing.remove(0);
            if let Err(e) = std::fs::remove_file(&oldest) {
                warn!(path = ?oldest, "could not prune old checkpoint: {e}");
            }
        }
    }
    Ok(path)
}

/// All checkpoints in `dir`, oldest first (the step number is zero-padded
/// so the lexicographic glob order is chronological).
pub fn list(dir: &Path) -> EngineResult<Vec<PathBuf>> {
    let pattern = dir.join("checkpoint_step*.json");
    let pattern = pattern
        .to_str()
        .ok_or_else(|| EngineError::Io(format!("non-UTF8 checkpoint dir {dir:?}")))?;
    let mut paths: Vec<PathBuf> = glob(pattern)
        .map_err(|e| EngineError::Io(format!("bad checkpoint pattern: {e}")))?
        .filter_map(Result::ok)
        .collect();
    paths.sort();
    Ok(paths)
}

/// Most recent checkpoint in `dir`, if any.
pub fn latest(dir: &Path) -> EngineResult<Option<PathBuf>> {
    Ok(list(dir)?.pop())
}

/// Loads a snapshot, checking the schema version and the config hash.
/// A hash mismatch is downgraded to a warning: comparison restores against
/// tweaked configs are a legitimate workflow.
pub fn load(path: &Path, expected_hash: Option<&str>) -> EngineResult<Snapshot> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| EngineError::Io(format!("could not read checkpoint {path:?}: {e}")))?;
    let snapshot: Snapshot = serde_json::from_str(&text)
        .map_err(|e| EngineError::Io(format!("malformed checkpoint {path:?}: {e}")))?;
    if snapshot.schema_version != SCHEMA_VERSION {
        return Err(EngineError::Io(format!(
            "checkpoint schema version {} does not match engine version {}",
            snapshot.schema_version, SCHEMA_VERSION
        )));
    }
    if let Some(expected) = expected_hash {
        if snapshot.config_hash != expected {
            warn!(
                found = %snapshot.config_hash,
                expected = %expected,
                "checkpoint was written under a different configuration"
            );
        }
    }
    Ok(snapshot)
}
