use crate::core::grid::SizeGrid;
use crate::error::{EngineError, EngineResult};
use crate::physics::phase::Phase;
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Why a cell stopped receiving updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// tau_los exceeded tau_stop (1 + tol).
    Tau,
    /// s_min,eff reached the configured floor with stop_on_blowout_below_smin.
    Blowout,
    /// T_M fell to or below T_stop.
    Temperature,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Tau => write!(f, "stopped_tau"),
            StopReason::Blowout => write!(f, "stopped_blowout"),
            StopReason::Temperature => write!(f, "stopped_temperature"),
        }
    }
}

/// One-way per-cell state machine: RUNNING -> STOPPED_*.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellStatus {
    Running,
    Stopped(StopReason),
}

impl CellStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, CellStatus::Running)
    }
}

/// Monotone cumulative mass diagnostics [kg m^-2].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CumulativeLosses {
    /// Mass removed by radiation-pressure blow-out (plus sublimation mass
    /// crossing s_min,eff in the mass-conserving pathway).
    pub m_loss_blow: f64,
    /// Mass removed by sublimation/vapor sinks.
    pub m_loss_sink: f64,
    /// Mass delivered by the supply pipeline.
    pub m_supplied: f64,
}

/// Pre-allocated hot-path buffers owned by one cell. Nothing on the step
/// path allocates after construction.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub c_ij: DMatrix<f64>,
    pub lambda_coll: DVector<f64>,
    pub sink_blow: DVector<f64>,
    pub sink_sub: DVector<f64>,
    pub sink_ext: DVector<f64>,
    pub gain: DVector<f64>,
    pub source: DVector<f64>,
    pub loss_total: DVector<f64>,
    pub n_trial: DVector<f64>,
}

impl Workspace {
    pub fn new(k_bins: usize) -> Self {
        Self {
            c_ij: DMatrix::zeros(k_bins, k_bins),
            lambda_coll: DVector::zeros(k_bins),
            sink_blow: DVector::zeros(k_bins),
            sink_sub: DVector::zeros(k_bins),
            sink_ext: DVector::zeros(k_bins),
            gain: DVector::zeros(k_bins),
            source: DVector::zeros(k_bins),
            loss_total: DVector::zeros(k_bins),
            n_trial: DVector::zeros(k_bins),
        }
    }
}

/// Full mutable state of one disk cell.
///
/// Only the integrator and the driver mutate this; tables and models are
/// shared read-only. `Clone` gives the deep copy used by comparison runs.
#[derive(Debug, Clone)]
pub struct CellState {
    pub cell_index: usize,
    /// Representative orbital radius [m].
    pub r: f64,
    /// Number surface density per bin [m^-2].
    pub n_bins: DVector<f64>,
    /// Surface-layer mass density [kg m^-2].
    pub sigma_surf: f64,
    /// Deep-reservoir mass density [kg m^-2].
    pub sigma_deep: f64,
    /// Lowest resolved size, >= max(s_cfg_min, s_blow) [m].
    pub s_min_eff: f64,
    /// tau_los from the previous accepted step (Phi lookup input).
    pub tau_los_prev: f64,
    pub phase: Phase,
    /// PI feedback controller state, clipped each step.
    pub feedback_scale: f64,
    /// Remaining finite-reservoir mass [kg m^-2].
    pub reservoir_remaining: f64,
    /// Initial mass-per-bin distribution, kept for `initial_psd` injection.
    pub initial_mass_per_bin: DVector<f64>,
    pub cum: CumulativeLosses,
    pub status: CellStatus,
    /// Child seed this cell's RNG stream was split from.
    pub seed: u64,
    pub workspace: Workspace,
}

impl CellState {
    /// Builds a cell from normalised initial weights.
    ///
    /// `weights` are relative mass weights on bin centres; they are scaled
    /// so that sum_k m_k N_k = sigma_surf0 to round-off (the P12 contract).
    /// `jitter_sigma > 0` perturbs the weights with lognormal noise drawn
    /// from this cell's RNG stream.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cell_index: usize,
        r: f64,
        grid: &SizeGrid,
        weights: &[f64],
        sigma_surf0: f64,
        reservoir_total: f64,
        seed: u64,
        jitter_sigma: f64,
    ) -> EngineResult<Self> {
        let k_bins = grid.n_bins();
        if weights.len() != k_bins {
            return Err(EngineError::Domain(format!(
                "initial PSD has {} weights for {} bins",
                weights.len(),
                k_bins
            )));
        }
        if weights.iter().any(|&w| w < 0.0 || !w.is_finite()) {
            return Err(EngineError::Domain(
                "initial PSD weights must be finite and non-negative".into(),
            ));
        }
        if sigma_surf0 < 0.0 {
            return Err(EngineError::Domain(format!(
                "initial surface density must be non-negative, got {sigma_surf0}"
            )));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut mass_weights: Vec<f64> = weights.to_vec();
        if jitter_sigma > 0.0 {
            for w in &mut mass_weights {
                // Box-Muller normal draw in log space.
                let (u1, u2): (f64, f64) = (rng.gen_range(f64::EPSILON..1.0), rng.gen());
                let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
                *w *= (jitter_sigma * z).exp();
            }
        }

        let total: f64 = mass_weights.iter().sum();
        if total <= 0.0 {
            return Err(EngineError::Domain(
                "initial PSD weights sum to zero".into(),
            ));
        }

        let mut n_bins = DVector::zeros(k_bins);
        let mut initial_mass_per_bin = DVector::zeros(k_bins);
        for k in 0..k_bins {
            let mass_k = mass_weights[k] / total * sigma_surf0;
            initial_mass_per_bin[k] = mass_k;
            n_bins[k] = mass_k / grid.masses[k];
        }

        Ok(Self {
            cell_index,
            r,
            n_bins,
            sigma_surf: sigma_surf0,
            sigma_deep: 0.0,
            s_min_eff: grid.edges[0],
            tau_los_prev: 0.0,
            phase: Phase::Solid,
            feedback_scale: 1.0,
            reservoir_remaining: reservoir_total,
            initial_mass_per_bin,
            cum: CumulativeLosses::default(),
            status: CellStatus::Running,
            seed,
            workspace: Workspace::new(k_bins),
        })
    }

    /// Tracks the lowest resolved size. Monotone non-decreasing within a
    /// run; bins below it are emptied by the blow-out sink over t_blow, not
    /// cleared here.
    pub fn update_s_min(&mut self, s_cfg_min: f64, s_blow: f64) {
        self.s_min_eff = self.s_min_eff.max(s_cfg_min.max(s_blow));
    }

    /// Recomputes Sigma_surf from the PSD (the default, non-TL2003 closure).
    pub fn sync_sigma_from_psd(&mut self, grid: &SizeGrid) {
        self.sigma_surf = grid.total_mass(&self.n_bins);
    }

    /// One-way transition into a stopped state; later reasons are ignored.
    pub fn stop(&mut self, reason: StopReason) {
        if self.status.is_running() {
            self.status = CellStatus::Stopped(reason);
        }
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        match self.status {
            CellStatus::Running => None,
            CellStatus::Stopped(reason) => Some(reason),
        }
    }
}

/// Deep copy for side-by-side comparison runs.
pub fn clone_state(cell: &CellState) -> CellState {
    cell.clone()
}
