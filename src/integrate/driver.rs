use crate::collisions::fragments::{FragmentationModel, QdStar};
use crate::collisions::kernel::{CollisionKernel, VelocityClosure};
use crate::core::constants::{omega_kepler, R_MARS, YEAR};
use crate::core::grid::SizeGrid;
use crate::core::state::{CellState, StopReason};
use crate::error::{EngineError, EngineResult};
use crate::integrate::imex::{ImexConfig, ImexIntegrator, StepStats};
use crate::io::checkpoint::{self, Snapshot};
use crate::io::config::*;
use crate::io::series::{OutputSinks, SeriesRecord};
use crate::io::summary::RunSummary;
use crate::io::tables::{
    PsatModel, QprModel, QprTable, SupplyRateTable, Tables, TemperatureDriver,
};
use crate::math::interp::EdgeMode;
use crate::math::powerlaw;
use crate::physics::phase::{GateState, PhaseModel, TemperatureInput};
use crate::physics::radiation::{BlowoutState, ChiBlow, RadiationModel};
use crate::physics::shielding::{OpticalState, ShieldingMode, ShieldingModel, TauField};
use crate::physics::sublimation::{SublimationMode, SublimationModel};
use crate::physics::supply::{
    DepletionMode, FeedbackConfig, HeadroomGate, HeadroomPolicy, InjectionMode, ReservoirConfig,
    SupplyMode, SupplyModel, TemperatureCoupling, TemperatureCouplingMode, TransportMode,
};
use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Run horizon: a fixed duration or a temperature floor.
#[derive(Debug, Clone, Copy)]
enum Horizon {
    Time(f64),
    Temperature(f64),
}

/// Immutable per-run collaborators shared by every cell.
struct Shared {
    grid: SizeGrid,
    tables: Tables,
    radiation: RadiationModel,
    shielding: ShieldingModel,
    phase: PhaseModel,
    supply: SupplyModel,
    sublimation: SublimationModel,
    kernel: CollisionKernel,
    fragmentation: Option<FragmentationModel>,
    integrator: ImexIntegrator,
    s_cfg_min: f64,
    s_ref: f64,
    t_stop_k: f64,
    tau_stop: f64,
    tau_stop_tol: f64,
    stop_on_blowout_below_smin: bool,
}

/// Everything one cell step produced, for diagnostics emission.
struct CellStepOutput {
    stats: StepStats,
    supply: crate::physics::supply::SupplyOutcome,
    optical: OpticalState,
    blowout: BlowoutState,
    t_coll_min: f64,
    gates: GateState,
}

/// The global time loop: temperature driver, per-cell component chain,
/// diagnostics aggregation, stop conditions, checkpoint hooks.
pub struct Driver {
    config: Config,
    config_hash: String,
    shared: Shared,
    pub cells: Vec<CellState>,
    injection_weights: Vec<Option<DVector<f64>>>,
    pub time_s: f64,
    pub step: u64,
    horizon: Horizon,
    max_eps_mass: f64,
    next_checkpoint_s: f64,
}

impl Driver {
    pub fn new(config: Config) -> EngineResult<Self> {
        config.validate()?;
        let config_hash = config.hash();

        let grid = SizeGrid::new(config.grid.s_min, config.grid.s_max, config.grid.k, config.grid.rho)?;
        let tables = load_tables(&config)?;
        let shared = build_shared(&config, grid, tables)?;

        // validate() rejects setting both; silence means a one-year run.
        let horizon = match (config.numerics.t_end_years, config.numerics.t_end_until_temperature_k)
        {
            (_, Some(t_k)) => Horizon::Temperature(t_k),
            (years, None) => Horizon::Time(years.unwrap_or(1.0) * YEAR),
        };

        let (cells, injection_weights) = init_cells(&config, &shared)?;

        info!(
            n_cells = cells.len(),
            k_bins = shared.grid.n_bins(),
            "engine initialised"
        );

        Ok(Self {
            config,
            config_hash,
            shared,
            cells,
            injection_weights,
            time_s: 0.0,
            step: 0,
            horizon,
            max_eps_mass: 0.0,
            next_checkpoint_s: 0.0,
        })
    }

    /// Rebuilds a driver from a checkpoint snapshot taken under the same
    /// (or an intentionally tweaked) configuration.
    pub fn restore(config: Config, snapshot: &Snapshot) -> EngineResult<Self> {
        let mut driver = Self::new(config)?;
        if snapshot.grid.n_bins() != driver.shared.grid.n_bins() {
            return Err(EngineError::Config(format!(
                "checkpoint grid has {} bins, configuration builds {}",
                snapshot.grid.n_bins(),
                driver.shared.grid.n_bins()
            )));
        }
        driver.cells = snapshot.restore_cells();
        driver.time_s = snapshot.time_s;
        driver.step = snapshot.step;
        driver.next_checkpoint_s = snapshot.time_s;
        Ok(driver)
    }

    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    pub fn grid(&self) -> &SizeGrid {
        &self.shared.grid
    }

    /// Runs until every cell is stopped or the horizon is reached.
    ///
    /// `cancel` is a cooperative flag checked only at outer step boundaries,
    /// so a cancelled run always leaves internally consistent state.
    pub fn run(
        &mut self,
        sinks: &mut OutputSinks,
        checkpoint_dir: Option<&Path>,
        cancel: Option<&AtomicBool>,
    ) -> EngineResult<RunSummary> {
        let checkpoint_interval_s = self.config.numerics.checkpoint.interval_years * YEAR;

        loop {
            if let Some(flag) = cancel {
                if flag.load(Ordering::Relaxed) {
                    info!(step = self.step, "cancellation requested, stopping cleanly");
                    break;
                }
            }

            // Horizon clipping keeps the last step from overshooting; the
            // epsilon guard swallows round-off slivers of the horizon.
            let dt_init = self.config.numerics.dt_init_s;
            let dt = match self.horizon {
                Horizon::Time(t_end) => {
                    if self.time_s >= t_end - 1e-9 * dt_init {
                        break;
                    }
                    dt_init.min(t_end - self.time_s)
                }
                Horizon::Temperature(_) => dt_init,
            };

            let t_mars = self.shared.tables.temperature.eval(self.time_s);
            if !(t_mars > 0.0) {
                return Err(EngineError::Domain(format!(
                    "temperature driver returned T_M = {t_mars} K at t = {} s",
                    self.time_s
                )));
            }
            if let Horizon::Temperature(t_floor) = self.horizon {
                if t_mars <= t_floor {
                    for cell in &mut self.cells {
                        cell.stop(StopReason::Temperature);
                    }
                    break;
                }
            }

            // Per-cell component chain in the normative order. Stopped cells
            // receive no state updates but still contribute frozen rows.
            let mut outputs: Vec<CellStepOutput> = Vec::with_capacity(self.cells.len());
            for (cell, weights) in self.cells.iter_mut().zip(&self.injection_weights) {
                if !cell.status.is_running() {
                    let omega = omega_kepler(cell.r);
                    outputs.push(idle_output(&self.shared, cell, t_mars, omega));
                    continue;
                }
                let out = step_cell(&self.shared, cell, weights.as_ref(), dt, t_mars, self.time_s)?;
                self.max_eps_mass = self.max_eps_mass.max(out.stats.eps_mass_max);
                outputs.push(out);
            }

            if self.config.numerics.diffusion.enabled {
                self.diffuse_across_cells();
            }

            self.time_s += dt;
            self.step += 1;

            self.emit_diagnostics(sinks, dt, t_mars, &outputs)?;

            if self.config.numerics.checkpoint.enabled {
                if let Some(dir) = checkpoint_dir {
                    if self.time_s >= self.next_checkpoint_s + checkpoint_interval_s {
                        let snap = Snapshot::capture(
                            &self.config_hash,
                            self.time_s,
                            self.step,
                            &self.shared.grid,
                            &self.cells,
                        );
                        let path =
                            checkpoint::save(dir, &snap, self.config.numerics.checkpoint.keep_last_n)?;
                        debug!(path = ?path, "checkpoint written");
                        self.next_checkpoint_s = self.time_s;
                    }
                }
            }

            if self.cells.iter().all(|c| !c.status.is_running()) {
                break;
            }
        }

        sinks.flush_all();

        // Cells still alive at the horizon report the documented "horizon"
        // reason without being transitioned, so a restored run can continue.
        Ok(RunSummary::from_cells(
            self.time_s,
            self.step,
            self.max_eps_mass,
            &self.cells,
            "horizon",
        ))
    }

    /// Operator-split Neumann diffusion of the PSD across adjacent running
    /// cells (zero-gradient boundaries). Pairwise fluxes conserve mass.
    fn diffuse_across_cells(&mut self) {
        let c = self.config.numerics.diffusion.coefficient;
        let k_bins = self.shared.grid.n_bins();
        for l in 0..self.cells.len() - 1 {
            let (left, right) = self.cells.split_at_mut(l + 1);
            let a = &mut left[l];
            let b = &mut right[0];
            if !(a.status.is_running() && b.status.is_running()) {
                continue;
            }
            for k in 0..k_bins {
                let flux = c * (b.n_bins[k] - a.n_bins[k]);
                a.n_bins[k] += flux;
                b.n_bins[k] -= flux;
            }
            a.sync_sigma_from_psd(&self.shared.grid);
            b.sync_sigma_from_psd(&self.shared.grid);
        }
    }

    fn emit_diagnostics(
        &mut self,
        sinks: &mut OutputSinks,
        dt: f64,
        t_mars: f64,
        outputs: &[CellStepOutput],
    ) -> EngineResult<()> {
        let stride = self.config.output.series_stride.max(1);
        let emit_series = self.step % stride as u64 == 0;
        let psd_stride = self.config.output.psd_stride;
        let emit_psd = psd_stride > 0 && self.step % psd_stride as u64 == 0;

        for (cell, out) in self.cells.iter().zip(outputs) {
            if let Some(budget) = sinks.budget.as_mut() {
                budget.write(self.time_s, cell.cell_index, out.stats.eps_mass_max, out.stats.n_bisect)?;
            }

            if emit_series {
                if let Some(series) = sinks.series.as_mut() {
                    let flags = match (out.stats.flag_gt10, out.stats.flag_gt3) {
                        (true, _) => "gt10",
                        (false, true) => "gt3",
                        _ => "-",
                    };
                    series.write(&SeriesRecord {
                        time_s: self.time_s,
                        dt_s: dt,
                        cell_index: cell.cell_index,
                        r_m: cell.r,
                        t_mars_k: t_mars,
                        beta_ref: out.blowout.beta_ref,
                        s_blow_m: out.blowout.s_blow,
                        s_min_m: cell.s_min_eff,
                        kappa_surf: out.optical.kappa_surf,
                        tau_los: out.optical.tau_los,
                        tau_perp: out.optical.tau_perp,
                        sigma_surf: cell.sigma_surf,
                        sigma_deep: cell.sigma_deep,
                        sigma_tau1: out.optical.sigma_tau1,
                        supply_nominal: out.supply.nominal,
                        supply_scaled: out.supply.scaled,
                        supply_applied: out.supply.applied,
                        prod_to_deep: out.supply.to_deep,
                        deep_to_surf: out.supply.deep_to_surf,
                        headroom: out.supply.headroom,
                        supply_clip_factor: out.supply.clip_factor,
                        feedback_scale: out.supply.feedback_scale,
                        temperature_scale: out.supply.temperature_scale,
                        reservoir_remaining: cell.reservoir_remaining,
                        m_out_dot: out.stats.m_out_rate,
                        m_sink_dot: out.stats.m_sink_rate,
                        m_loss_cum: cell.cum.m_loss_blow,
                        m_sink_cum: cell.cum.m_loss_sink,
                        t_coll_min_s: out.t_coll_min,
                        t_blow_s: out.blowout.t_blow,
                        dt_eff_s: out.stats.dt_eff_min,
                        dt_over_t_blow: out.stats.dt_over_t_blow,
                        fast_blowout_flags: flags.to_string(),
                        n_substeps: out.stats.n_substeps,
                        phase: cell.phase.to_string(),
                        gates: out.gates.flags(),
                        stop_reason: cell
                            .stop_reason()
                            .map(|r| r.to_string())
                            .unwrap_or_else(|| "-".into()),
                    })?;
                }
            }

            if emit_psd {
                if let Some(psd) = sinks.psd.as_mut() {
                    for k in 0..self.shared.grid.n_bins() {
                        psd.write_bin(
                            self.time_s,
                            cell.cell_index,
                            k,
                            self.shared.grid.centers[k],
                            cell.n_bins[k],
                            self.shared.grid.masses[k] * cell.n_bins[k],
                        )?;
                    }
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// PER-CELL STEP (normative component order)
// ============================================================================

fn step_cell(
    shared: &Shared,
    cell: &mut CellState,
    weights: Option<&DVector<f64>>,
    dt: f64,
    t_mars: f64,
    t_now: f64,
) -> EngineResult<CellStepOutput> {
    let grid = &shared.grid;
    let omega = omega_kepler(cell.r);

    // Temperature stop precedes any state change.
    if shared.t_stop_k > 0.0 && t_mars <= shared.t_stop_k {
        cell.stop(StopReason::Temperature);
        return Ok(idle_output(shared, cell, t_mars, omega));
    }

    // 1. Radiation globals and the resolved-size floor.
    let blowout = shared
        .radiation
        .blowout_state(&shared.tables.qpr, t_mars, omega, shared.s_ref);
    cell.update_s_min(shared.s_cfg_min, blowout.s_blow);
    if shared.stop_on_blowout_below_smin && cell.s_min_eff >= grid.edges[grid.n_bins()] {
        cell.stop(StopReason::Blowout);
        return Ok(idle_output(shared, cell, t_mars, omega));
    }

    // 2. Opacity and optical depth, one self-consistent evaluation.
    let kappa_surf = shared.shielding.kappa_surf(
        grid,
        &shared.tables.qpr,
        &cell.n_bins,
        cell.sigma_surf,
        t_mars,
    );
    let optical = shared.shielding.evaluate(
        shared.tables.phi.as_ref(),
        kappa_surf,
        cell.sigma_surf,
        cell.tau_los_prev,
    );
    if optical.tau_los > shared.tau_stop * (1.0 + shared.tau_stop_tol) {
        cell.stop(StopReason::Tau);
        return Ok(idle_output(shared, cell, t_mars, omega));
    }

    // 3. Phase and gates.
    cell.phase = shared.phase.advance(cell.phase, t_mars, cell.r);
    let gates = shared
        .phase
        .gates(cell.phase, optical.tau(shared.phase.tau_field));

    // 4. Sublimation shrinkage rate at the particle temperature.
    let t_particle = shared.phase.phase_temperature(t_mars, cell.r);
    let ds_dt = match (shared.sublimation.mode, shared.tables.psat.as_ref()) {
        (SublimationMode::None, _) | (_, None) => 0.0,
        (_, Some(psat)) => shared.sublimation.ds_dt(psat, t_particle, grid.rho),
    };

    // 5. Sink assembly.
    SublimationModel::fill_timescale_sink(
        &grid.centers,
        if shared.sublimation.mode == SublimationMode::Timescale {
            ds_dt
        } else {
            0.0
        },
        &mut cell.workspace.sink_sub,
    );
    shared.phase.fill_vapor_sink(cell.phase, &mut cell.workspace.sink_ext);
    // In the gas-rich (TL2003) path the surface ODE owns blow-out; the
    // per-bin sink stays off so the loss is not double-counted.
    let allow_tl2003 = shared.integrator.config.allow_tl2003;
    RadiationModel::fill_blowout_sink(
        &grid.centers,
        &blowout,
        gates.allow_blowout && !allow_tl2003,
        &mut cell.workspace.sink_blow,
    );

    // 6. Supply pipeline and per-bin source.
    let supply = shared.supply.compute(
        dt,
        t_now,
        omega,
        blowout.t_blow,
        t_mars,
        &optical,
        gates.allow_supply,
        shared.tables.supply_rate.as_ref(),
        &mut cell.feedback_scale,
        &mut cell.reservoir_remaining,
        cell.sigma_surf,
        &mut cell.sigma_deep,
    );
    cell.workspace.source.fill(0.0);
    if supply.applied > 0.0 {
        if let Some(w) = weights {
            for k in 0..grid.n_bins() {
                cell.workspace.source[k] = supply.applied * w[k] / grid.masses[k];
            }
        }
    }

    // 7. Collision kernel, loss rates, fragment gain.
    let t_coll_min = match &shared.fragmentation {
        Some(frag) => {
            let v_k = omega * cell.r;
            let v_ij = shared.kernel.relative_velocity(v_k);
            shared
                .kernel
                .fill(grid, &cell.n_bins, v_ij, cell.r, &mut cell.workspace.c_ij);
            CollisionKernel::loss_rates(
                &cell.workspace.c_ij,
                &cell.n_bins,
                &mut cell.workspace.lambda_coll,
            );
            frag.accumulate_gain(grid, &cell.workspace.c_ij, v_ij, &mut cell.workspace.gain);
            CollisionKernel::t_coll_min(&cell.workspace.lambda_coll)
        }
        None => {
            cell.workspace.lambda_coll.fill(0.0);
            cell.workspace.gain.fill(0.0);
            f64::INFINITY
        }
    };

    // 8. IMEX update.
    let stats = shared
        .integrator
        .step(grid, cell, dt, t_coll_min, blowout.t_blow)?;

    // 9. Gas-rich surface ODE: Sigma_surf evolves separably from the PSD.
    if allow_tl2003 {
        let t_blow_ode = if gates.allow_blowout {
            blowout.t_blow
        } else {
            f64::INFINITY
        };
        let t_sink_ode = shared
            .phase
            .vapor_sink_timescale_s
            .filter(|_| cell.phase == crate::physics::phase::Phase::Vapor)
            .unwrap_or(f64::INFINITY);
        let (sigma_next, blow_flux) = ImexIntegrator::surface_ode(
            cell.sigma_surf,
            dt,
            supply.applied,
            t_blow_ode,
            t_coll_min,
            t_sink_ode,
        );
        cell.sigma_surf = sigma_next;
        cell.cum.m_loss_blow += blow_flux * dt;
    }

    // 10. Mass-conserving sublimation advection (operator split).
    if shared.sublimation.mode == SublimationMode::MassConserving && ds_dt < 0.0 {
        let lost = SublimationModel::advect_mass_conserving(
            grid,
            &mut cell.n_bins,
            ds_dt.abs() * dt,
            cell.s_min_eff,
        );
        cell.cum.m_loss_blow += lost;
        if !allow_tl2003 {
            cell.sync_sigma_from_psd(grid);
        }
    }

    cell.tau_los_prev = optical.tau_los;

    Ok(CellStepOutput {
        stats,
        supply,
        optical,
        blowout,
        t_coll_min,
        gates,
    })
}

/// Output for a cell that stopped before its update this step.
fn idle_output(shared: &Shared, cell: &CellState, t_mars: f64, omega: f64) -> CellStepOutput {
    let blowout = shared
        .radiation
        .blowout_state(&shared.tables.qpr, t_mars, omega, shared.s_ref);
    let kappa_surf = shared.shielding.kappa_surf(
        &shared.grid,
        &shared.tables.qpr,
        &cell.n_bins,
        cell.sigma_surf,
        t_mars,
    );
    let optical = shared.shielding.evaluate(
        shared.tables.phi.as_ref(),
        kappa_surf,
        cell.sigma_surf,
        cell.tau_los_prev,
    );
    CellStepOutput {
        stats: StepStats::default(),
        supply: Default::default(),
        optical,
        blowout,
        t_coll_min: f64::INFINITY,
        gates: GateState {
            allow_supply: false,
            allow_blowout: false,
        },
    }
}

// ============================================================================
// CONSTRUCTION HELPERS
// ============================================================================

fn load_tables(config: &Config) -> EngineResult<Tables> {
    let qpr = match config.radiation.qpr.mode {
        QprMode::Constant => QprModel::Constant(config.radiation.qpr.value),
        QprMode::Table => {
            let path = config.radiation.qpr.table_path.as_ref().ok_or_else(|| {
                EngineError::Config("radiation.qpr table mode without a path".into())
            })?;
            QprModel::Table(QprTable::from_file(path)?)
        }
    };

    let phi = match &config.shielding.phi_table_path {
        Some(path) => Some(crate::io::tables::PhiTable::from_file(path)?),
        None => None,
    };

    let temperature = match config.temperature.mode {
        TemperatureModeConfig::Constant => TemperatureDriver::Constant {
            t_k: config.temperature.value_k,
        },
        TemperatureModeConfig::Table => {
            let path = config.temperature.table_path.as_ref().ok_or_else(|| {
                EngineError::Config("temperature table mode without a path".into())
            })?;
            let edge = match config.temperature.edge {
                TableEdgeConfig::Hold => EdgeMode::Hold,
                TableEdgeConfig::Extrapolate => EdgeMode::Extrapolate,
            };
            TemperatureDriver::table_from_file(path, edge)?
        }
        TemperatureModeConfig::Slab => TemperatureDriver::Slab {
            t0_k: config.temperature.t0_k,
            tau_cool_s: config.temperature.tau_cool_yr * YEAR,
        },
        TemperatureModeConfig::Linear => TemperatureDriver::Linear {
            t0_k: config.temperature.t0_k,
            slope_k_per_s: config.temperature.slope_k_per_yr / YEAR,
            floor_k: config.temperature.floor_k,
        },
    };

    let psat = if config.sublimation.mode == SublimationModeConfig::None {
        None
    } else {
        match &config.sublimation.psat_table_path {
            Some(path) => Some(PsatModel::table_from_file(path)?),
            None => Some(PsatModel::Clausius {
                a: config.sublimation.a,
                b: config.sublimation.b,
                t_min: config.sublimation.t_valid_min_k,
                t_max: config.sublimation.t_valid_max_k,
                warned: Default::default(),
            }),
        }
    };

    let supply_rate = match &config.supply.table_path {
        Some(path) if config.supply.mode == SupplyModeConfig::Table => {
            Some(SupplyRateTable::from_file(path)?)
        }
        _ => None,
    };

    Ok(Tables {
        qpr,
        phi,
        temperature,
        psat,
        supply_rate,
    })
}

fn map_tau_field(field: TauFieldConfig) -> TauField {
    match field {
        TauFieldConfig::Los => TauField::Los,
        TauFieldConfig::Perp => TauField::Perp,
    }
}

fn build_shared(config: &Config, grid: SizeGrid, tables: Tables) -> EngineResult<Shared> {
    let radiation = RadiationModel {
        rho: config.grid.rho,
        chi_blow: match &config.radiation.chi_blow {
            ChiBlowConfig::Keyword(_) => ChiBlow::Auto,
            ChiBlowConfig::Fixed(chi) => ChiBlow::Fixed(*chi),
        },
    };

    let shielding = ShieldingModel {
        mode: match config.shielding.mode {
            ShieldingModeConfig::Off => ShieldingMode::Off,
            ShieldingModeConfig::Psitau => ShieldingMode::PsiTau,
            ShieldingModeConfig::FixedTau1 => ShieldingMode::FixedTau1,
        },
        f_los: config.shielding.f_los,
        omega0: config.shielding.omega0,
        g_asym: config.shielding.g_asym,
        fixed_sigma_tau1: config.shielding.fixed_sigma_tau1,
    };

    let phase = PhaseModel {
        enabled: config.phase.enabled,
        input: match config.phase.temperature_input {
            TemperatureInputConfig::MarsSurface => TemperatureInput::MarsSurface,
            TemperatureInputConfig::Particle => TemperatureInput::Particle,
        },
        q_abs_mean: config.phase.q_abs_mean,
        t_condense: config.phase.t_condense_k,
        t_vaporize: config.phase.t_vaporize_k,
        tau_gate: config.phase.tau_gate,
        tau_field: map_tau_field(config.phase.tau_field),
        vapor_sink_timescale_s: config.phase.vapor_sink_timescale_s,
    };

    let supply = SupplyModel {
        mode: match config.supply.mode {
            SupplyModeConfig::Off => SupplyMode::Off,
            SupplyModeConfig::Const => SupplyMode::Const {
                mu_orbit10pct: config.supply.mu_orbit10pct,
            },
            SupplyModeConfig::ConstRate => SupplyMode::ConstRate {
                rate_kg_m2_s: config.supply.rate_kg_m2_s.ok_or_else(|| {
                    EngineError::Config("supply const_rate mode without rate_kg_m2_s".into())
                })?,
            },
            SupplyModeConfig::Powerlaw => SupplyMode::Powerlaw {
                mu0: config.supply.powerlaw_mu0,
                t0_s: config.supply.powerlaw_t0_yr * YEAR,
                index: config.supply.powerlaw_index,
            },
            SupplyModeConfig::Table => SupplyMode::Table,
            SupplyModeConfig::Piecewise => SupplyMode::Piecewise {
                times_s: config
                    .supply
                    .piecewise_times_yr
                    .iter()
                    .map(|t| t * YEAR)
                    .collect(),
                rates: config.supply.piecewise_rates.clone(),
            },
        },
        eps_mix: config.supply.eps_mix,
        orbit_fraction: config.supply.orbit_fraction,
        injection: match config.supply.injection_mode {
            InjectionModeConfig::MinBin => InjectionMode::MinBin {
                bin: config.supply.injection_bin,
            },
            InjectionModeConfig::PowerlawBins => InjectionMode::PowerlawBins {
                q: config.supply.injection_q,
                s_floor: config.supply.injection_s_floor,
                s_ceil: config.supply.injection_s_ceil,
            },
            InjectionModeConfig::InitialPsd => InjectionMode::InitialPsd,
        },
        reservoir: ReservoirConfig {
            enabled: config.supply.reservoir.enabled,
            m_total: config.supply.reservoir.m_total,
            depletion: match config.supply.reservoir.depletion_mode {
                DepletionModeConfig::HardStop => DepletionMode::HardStop,
                DepletionModeConfig::Taper => DepletionMode::Taper,
            },
            taper_fraction: config.supply.reservoir.taper_fraction,
        },
        feedback: FeedbackConfig {
            enabled: config.supply.feedback.enabled,
            target_tau: config.supply.feedback.target_tau,
            gain: config.supply.feedback.gain,
            response_s: config.supply.feedback.response_yr * YEAR,
            tau_field: map_tau_field(config.supply.feedback.tau_field),
            min_scale: config.supply.feedback.min_scale,
            max_scale: config.supply.feedback.max_scale,
        },
        temperature: TemperatureCoupling {
            enabled: config.supply.temperature.enabled,
            mode: match config.supply.temperature.mode {
                TemperatureCouplingModeConfig::Powerlaw => TemperatureCouplingMode::Powerlaw {
                    ref_k: config.supply.temperature.ref_k,
                    exponent: config.supply.temperature.exponent,
                },
                TemperatureCouplingModeConfig::Table => TemperatureCouplingMode::Table {
                    temp_k: config.supply.temperature.table_temp_k.clone(),
                    factor: config.supply.temperature.table_factor.clone(),
                },
            },
            floor: config.supply.temperature.floor,
            cap: config.supply.temperature.cap,
        },
        transport: match config.supply.transport.mode {
            TransportModeConfig::Direct => TransportMode::Direct,
            TransportModeConfig::DeepMixing => TransportMode::DeepMixing,
        },
        t_mix_orbits: config.supply.transport.t_mix_orbits,
        headroom_gate: match config.supply.transport.headroom_gate {
            HeadroomGateConfig::Hard => HeadroomGate::Hard,
            HeadroomGateConfig::Soft => HeadroomGate::Soft,
        },
        headroom_policy: match config.supply.headroom_policy {
            HeadroomPolicyConfig::Clip => HeadroomPolicy::Clip,
            HeadroomPolicyConfig::Off => HeadroomPolicy::Off,
        },
    };

    let sublimation = SublimationModel {
        mode: match (config.sublimation.mode, config.sublimation.mass_conserving) {
            (SublimationModeConfig::None, _) => SublimationMode::None,
            (SublimationModeConfig::Hkl, true) => SublimationMode::MassConserving,
            (SublimationModeConfig::Hkl, false) | (SublimationModeConfig::Timescale, _) => {
                SublimationMode::Timescale
            }
        },
        alpha_evap: config.sublimation.alpha_evap,
        mu_molar: config.sublimation.mu_molar,
        p_gas: config.sublimation.p_gas,
    };

    let kernel = CollisionKernel {
        eccentricity: config.dynamics.e,
        inclination: config.dynamics.i,
        h_factor: config.dynamics.h_factor,
        closure: match config.dynamics.velocity_closure {
            VelocityClosureConfig::RayleighLowE => VelocityClosure::RayleighLowE,
            VelocityClosureConfig::Pericenter => VelocityClosure::Pericenter,
        },
    };

    let fragmentation = if config.collisions.enabled {
        let units = match config.collisions.coeff_units {
            CoeffUnitsConfig::Si => crate::collisions::fragments::CoeffUnits::Si,
            CoeffUnitsConfig::Ba99Cgs => crate::collisions::fragments::CoeffUnits::Ba99Cgs,
        };
        let qd = QdStar::new(
            config.collisions.v_ref.clone(),
            config.collisions.q_s.clone(),
            config.collisions.a_s.clone(),
            config.collisions.b_grav.clone(),
            config.collisions.b_exp.clone(),
            units,
        )?;
        Some(FragmentationModel::new(
            &grid,
            qd,
            config.collisions.alpha_frag,
            config.collisions.mu_ls,
            config.collisions.f_min,
        ))
    } else {
        None
    };

    let integrator = ImexIntegrator::new(ImexConfig {
        safety: config.numerics.safety,
        mass_tol: config.numerics.mass_tol,
        max_halvings: config.numerics.max_halvings,
        eps_floor: 1e-300,
        substep_fast_blowout: config.numerics.substep_fast_blowout,
        substep_max_ratio: config.numerics.substep_max_ratio,
        allow_tl2003: config.numerics.allow_tl2003,
    });

    Ok(Shared {
        s_cfg_min: config.grid.s_min,
        s_ref: config.radiation.s_ref,
        t_stop_k: config.radiation.t_stop_k,
        tau_stop: config.shielding.tau_stop,
        tau_stop_tol: config.shielding.tau_stop_tol,
        stop_on_blowout_below_smin: config.numerics.stop_on_blowout_below_smin,
        grid,
        tables,
        radiation,
        shielding,
        phase,
        supply,
        sublimation,
        kernel,
        fragmentation,
        integrator,
    })
}

/// Initial PSD mass weights on bin centres for the configured kind.
fn initial_weights(config: &Config, grid: &SizeGrid) -> EngineResult<Vec<f64>> {
    match config.initial_psd.kind {
        InitialPsdKind::Powerlaw => {
            // q is the number-density index; the mass weight per bin is the
            // integral of s^3 n(s) over the bin.
            let mass_index = config.initial_psd.q - 3.0;
            powerlaw::powerlaw_bin_weights(&grid.edges, mass_index, grid.edges[0], grid.edges[grid.n_bins()])
                .ok_or_else(|| {
                    EngineError::Domain("power-law initial PSD has zero total weight".into())
                })
        }
        InitialPsdKind::LognormalMixture => {
            let mut w = vec![0.0; grid.n_bins()];
            for comp in &config.initial_psd.components {
                if comp.mean_s <= 0.0 || comp.sigma <= 0.0 {
                    return Err(EngineError::Config(
                        "lognormal components need positive mean_s and sigma".into(),
                    ));
                }
                for (k, &s) in grid.centers.iter().enumerate() {
                    let z = (s.ln() - comp.mean_s.ln()) / comp.sigma;
                    w[k] += comp.amplitude * (-0.5 * z * z).exp();
                }
            }
            Ok(w)
        }
        InitialPsdKind::Weights => Ok(config.initial_psd.weights.clone()),
    }
}

fn init_cells(config: &Config, shared: &Shared) -> EngineResult<(Vec<CellState>, Vec<Option<DVector<f64>>>)> {
    let grid = &shared.grid;
    let weights = initial_weights(config, grid)?;
    let t0 = shared.tables.temperature.eval(0.0);
    if !(t0 > 0.0) {
        return Err(EngineError::Domain(format!(
            "temperature driver returned T_M = {t0} K at t = 0"
        )));
    }

    // tau0 scaling: with kappa_surf scale-invariant, a single evaluation of
    // Phi at the target tau fixes Sigma_surf(t0) in closed form.
    let tau0_target = if config.initial_psd.scale_to_tau1 {
        Some(1.0)
    } else {
        config.initial_psd.tau0_target
    };

    let mut master = StdRng::seed_from_u64(config.dynamics.rng_seed);
    let mut cells = Vec::with_capacity(config.cells.radii_rmars.len());
    let mut injection = Vec::with_capacity(config.cells.radii_rmars.len());

    for (idx, &r_rm) in config.cells.radii_rmars.iter().enumerate() {
        let r = r_rm * R_MARS;
        let child_seed: u64 = master.gen();

        let sigma0 = match tau0_target {
            None => config.initial_psd.sigma_surf0,
            Some(tau0) => {
                // kappa from the unnormalised weights: N proportional to w/m.
                let mut cross = 0.0;
                let mut mass = 0.0;
                for (k, &w) in weights.iter().enumerate() {
                    let s = grid.centers[k];
                    let qpr = shared.tables.qpr.eval(s, t0);
                    cross += std::f64::consts::PI * s * s * qpr * w / grid.masses[k];
                    mass += w;
                }
                if cross <= 0.0 || mass <= 0.0 {
                    return Err(EngineError::Domain(
                        "cannot scale to tau0: initial PSD carries no cross-section".into(),
                    ));
                }
                let kappa_surf = cross / mass;
                let phi0 = match shared.shielding.mode {
                    ShieldingMode::Off | ShieldingMode::FixedTau1 => 1.0,
                    ShieldingMode::PsiTau => match shared.tables.phi.as_ref() {
                        Some(table) => {
                            table.eval(tau0, shared.shielding.omega0, shared.shielding.g_asym)
                        }
                        None => (-tau0).exp(),
                    },
                };
                tau0 / (shared.shielding.f_los * phi0 * kappa_surf)
            }
        };

        let mut cell = CellState::new(
            idx,
            r,
            grid,
            &weights,
            sigma0,
            config.supply.reservoir.m_total,
            child_seed,
            config.initial_psd.jitter_sigma,
        )?;
        cell.update_s_min(config.grid.s_min, 0.0);
        if let Some(tau0) = tau0_target {
            cell.tau_los_prev = tau0;
        } else {
            // One unshielded evaluation seeds the Phi lookup input.
            let kappa = shared.shielding.kappa_surf(grid, &shared.tables.qpr, &cell.n_bins, cell.sigma_surf, t0);
            cell.tau_los_prev = shared.shielding.f_los * kappa * cell.sigma_surf;
        }

        let w_inj = shared.supply.injection_weights(grid, &cell.initial_mass_per_bin);
        if w_inj.is_none() && !matches!(shared.supply.mode, SupplyMode::Off) {
            return Err(EngineError::Config(
                "supply injection weights are empty; check injection window against the grid".into(),
            ));
        }
        cells.push(cell);
        injection.push(w_inj);
    }

    Ok((cells, injection))
}
