use crate::error::{EngineError, EngineResult};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// One time-series row: everything the driver knows about a cell at the end
/// of an outer step.
#[derive(Debug, Clone, Default)]
pub struct SeriesRecord {
    pub time_s: f64,
    pub dt_s: f64,
    pub cell_index: usize,
    pub r_m: f64,
    pub t_mars_k: f64,
    pub beta_ref: f64,
    pub s_blow_m: f64,
    pub s_min_m: f64,
    pub kappa_surf: f64,
    pub tau_los: f64,
    pub tau_perp: f64,
    pub sigma_surf: f64,
    pub sigma_deep: f64,
    pub sigma_tau1: f64,
    pub supply_nominal: f64,
    pub supply_scaled: f64,
    pub supply_applied: f64,
    pub prod_to_deep: f64,
    pub deep_to_surf: f64,
    pub headroom: f64,
    pub supply_clip_factor: f64,
    pub feedback_scale: f64,
    pub temperature_scale: f64,
    pub reservoir_remaining: f64,
    pub m_out_dot: f64,
    pub m_sink_dot: f64,
    pub m_loss_cum: f64,
    pub m_sink_cum: f64,
    pub t_coll_min_s: f64,
    pub t_blow_s: f64,
    pub dt_eff_s: f64,
    pub dt_over_t_blow: f64,
    pub fast_blowout_flags: String,
    pub n_substeps: u32,
    pub phase: String,
    pub gates: String,
    pub stop_reason: String,
}

const SERIES_HEADER: &str = "time_s,dt_s,cell_index,r_m,T_M_K,beta_ref,s_blow_m,s_min_m,\
kappa_surf,tau_los,tau_perp,sigma_surf,sigma_deep,sigma_tau1,\
supply_nominal,supply_scaled,supply_applied,prod_to_deep,deep_to_surf,headroom,\
supply_clip_factor,feedback_scale,temperature_scale,reservoir_remaining,\
M_out_dot,M_sink_dot,M_loss_cum,M_sink_cum,\
t_coll_min_s,t_blow_s,dt_eff_s,dt_over_t_blow,fast_blowout_flags,n_substeps,\
phase,gates,stop_reason";

/// Buffered CSV writer for the per-step time series.
///
/// Flushes on drop so partial output survives a fatal error or a
/// cancellation mid-run.
#[derive(Debug)]
pub struct SeriesWriter {
    writer: BufWriter<File>,
}

impl SeriesWriter {
    pub fn create(path: &Path) -> EngineResult<Self> {
        let file = File::create(path)
            .map_err(|e| EngineError::Io(format!("could not create series file {path:?}: {e}")))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{SERIES_HEADER}")
            .map_err(|e| EngineError::Io(format!("series header write failed: {e}")))?;
        Ok(Self { writer })
    }

    pub fn write(&mut self, rec: &SeriesRecord) -> EngineResult<()> {
        writeln!(
            self.writer,
            "{:.6e},{:.6e},{},{:.6e},{:.4},{:.4e},{:.4e},{:.4e},\
             {:.6e},{:.6e},{:.6e},{:.6e},{:.6e},{:.6e},\
             {:.6e},{:.6e},{:.6e},{:.6e},{:.6e},{:.6e},\
             {:.4},{:.4},{:.4},{:.6e},\
             {:.6e},{:.6e},{:.6e},{:.6e},\
             {:.4e},{:.4e},{:.4e},{:.4},{},{},\
             {},{},{}",
            rec.time_s,
            rec.dt_s,
            rec.cell_index,
            rec.r_m,
            rec.t_mars_k,
            rec.beta_ref,
            rec.s_blow_m,
            rec.s_min_m,
            rec.kappa_surf,
            rec.tau_los,
            rec.tau_perp,
            rec.sigma_surf,
            rec.sigma_deep,
            rec.sigma_tau1,
            rec.supply_nominal,
            rec.supply_scaled,
            rec.supply_applied,
            rec.prod_to_deep,
            rec.deep_to_surf,
            rec.headroom,
            rec.supply_clip_factor,
            rec.feedback_scale,
            rec.temperature_scale,
            rec.reservoir_remaining,
            rec.m_out_dot,
            rec.m_sink_dot,
            rec.m_loss_cum,
            rec.m_sink_cum,
            rec.t_coll_min_s,
            rec.t_blow_s,
            rec.dt_eff_s,
            rec.dt_over_t_blow,
            rec.fast_blowout_flags,
            rec.n_substeps,
            rec.phase,
            rec.gates,
            rec.stop_reason,
        )
        .map_err(|e| EngineError::Io(format!("series row write failed: {e}")))
    }

    pub fn flush(&mut self) -> EngineResult<()> {
        self.writer
            .flush()
            .map_err(|e| EngineError::Io(format!("series flush failed: {e}")))
    }
}

impl Drop for SeriesWriter {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// PSD history rows: one per (time, cell, bin) at the configured stride.
#[derive(Debug)]
pub struct PsdWriter {
    writer: BufWriter<File>,
}

impl PsdWriter {
    pub fn create(path: &Path) -> EngineResult<Self> {
        let file = File::create(path)
            .map_err(|e| EngineError::Io(format!("could not create PSD file {path:?}: {e}")))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "time_s,cell_index,bin_index,s_center_m,N_bin,sigma_surf_bin")
            .map_err(|e| EngineError::Io(format!("PSD header write failed: {e}")))?;
        Ok(Self { writer })
    }

    pub fn write_bin(
        &mut self,
        time_s: f64,
        cell_index: usize,
        bin_index: usize,
        s_center: f64,
        n_bin: f64,
        sigma_bin: f64,
    ) -> EngineResult<()> {
        writeln!(
            self.writer,
            "{time_s:.6e},{cell_index},{bin_index},{s_center:.6e},{n_bin:.6e},{sigma_bin:.6e}"
        )
        .map_err(|e| EngineError::Io(format!("PSD row write failed: {e}")))
    }
}

impl Drop for PsdWriter {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// Per-step mass-budget log.
#[derive(Debug)]
pub struct MassBudgetLog {
    writer: BufWriter<File>,
}

impl MassBudgetLog {
    pub fn create(path: &Path) -> EngineResult<Self> {
        let file = File::create(path).map_err(|e| {
            EngineError::Io(format!("could not create mass-budget log {path:?}: {e}"))
        })?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "time_s,cell_index,eps_mass,n_bisect")
            .map_err(|e| EngineError::Io(format!("budget header write failed: {e}")))?;
        Ok(Self { writer })
    }

    pub fn write(
        &mut self,
        time_s: f64,
        cell_index: usize,
        eps_mass: f64,
        n_bisect: u32,
    ) -> EngineResult<()> {
        writeln!(self.writer, "{time_s:.6e},{cell_index},{eps_mass:.6e},{n_bisect}")
            .map_err(|e| EngineError::Io(format!("budget row write failed: {e}")))
    }
}

impl Drop for MassBudgetLog {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// Bundle of the optional per-run output sinks; the driver holds this for
/// the whole loop and the drop guards flush whatever was written.
#[derive(Debug, Default)]
pub struct OutputSinks {
    pub series: Option<SeriesWriter>,
    pub psd: Option<PsdWriter>,
    pub budget: Option<MassBudgetLog>,
}

impl OutputSinks {
    /// Standard artifact set inside `dir`.
    pub fn in_dir(dir: &Path, with_psd: bool) -> EngineResult<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| EngineError::Io(format!("could not create output dir {dir:?}: {e}")))?;
        Ok(Self {
            series: Some(SeriesWriter::create(&dir.join("series.csv"))?),
            psd: if with_psd {
                Some(PsdWriter::create(&dir.join("psd_history.csv"))?)
            } else {
                None
            },
            budget: Some(MassBudgetLog::create(&dir.join("mass_budget.csv"))?),
        })
    }

    pub fn flush_all(&mut self) {
        if let Some(s) = self.series.as_mut() {
            let _ = s.flush();
        }
    }
}
