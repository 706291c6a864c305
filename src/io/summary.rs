use crate::core::state::CellState;
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellSummary {
    pub cell_index: usize,
    pub r_m: f64,
    pub stop_reason: String,
    pub sigma_surf_final: f64,
    pub sigma_deep_final: f64,
    pub m_loss_blow: f64,
    pub m_loss_sink: f64,
    pub m_supplied: f64,
    /// Time-averaged supplied rate over the run [kg m^-2 s^-1].
    pub effective_production_rate: f64,
}

/// End-of-run artifact with cumulative totals and per-cell outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub schema_version: u32,
    pub t_end_s: f64,
    pub n_steps: u64,
    /// Largest accepted per-step mass-budget error over the run.
    pub max_eps_mass: f64,
    pub total_m_loss_blow: f64,
    pub total_m_loss_sink: f64,
    pub total_m_supplied: f64,
    pub cells: Vec<CellSummary>,
}

impl RunSummary {
    /// `fallback_reason` documents cells that were still running when the
    /// loop ended (e.g. "horizon").
    pub fn from_cells(
        t_end_s: f64,
        n_steps: u64,
        max_eps_mass: f64,
        cells: &[CellState],
        fallback_reason: &str,
    ) -> Self {
        let cell_rows: Vec<CellSummary> = cells
            .iter()
            .map(|c| CellSummary {
                cell_index: c.cell_index,
                r_m: c.r,
                stop_reason: c
                    .stop_reason()
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| fallback_reason.to_string()),
                sigma_surf_final: c.sigma_surf,
                sigma_deep_final: c.sigma_deep,
                m_loss_blow: c.cum.m_loss_blow,
                m_loss_sink: c.cum.m_loss_sink,
                m_supplied: c.cum.m_supplied,
                effective_production_rate: if t_end_s > 0.0 {
                    c.cum.m_supplied / t_end_s
                } else {
                    0.0
                },
            })
            .collect();
        Self {
            schema_version: crate::io::checkpoint::SCHEMA_VERSION,
            t_end_s,
            n_steps,
            max_eps_mass,
            total_m_loss_blow: cell_rows.iter().map(|c| c.m_loss_blow).sum(),
            total_m_loss_sink: cell_rows.iter().map(|c| c.m_loss_sink).sum(),
            total_m_supplied: cell_rows.iter().map(|c| c.m_supplied).sum(),
            cells: cell_rows,
        }
    }

    pub fn write(&self, path: &Path) -> EngineResult<()> {
        let payload = serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::Io(format!("summary serialisation failed: {e}")))?;
        std::fs::write(path, payload)
            .map_err(|e| EngineError::Io(format!("could not write summary {path:?}: {e}")))
    }
}
