use crate::core::grid::SizeGrid;
use crate::io::tables::SupplyRateTable;
use crate::math::interp::{self, EdgeMode};
use crate::math::powerlaw;
use crate::physics::shielding::{OpticalState, TauField};
use nalgebra::DVector;
use tracing::debug;

/// External mass-supply rate convention.
///
/// `Const` uses the canonical orbital form; `ConstRate` is the direct
/// kg m^-2 s^-1 convention. Both exist in the source corpus; the config
/// validator rejects runs that set both.
#[derive(Debug, Clone)]
pub enum SupplyMode {
    Off,
    /// mu_orbit10pct scaled by orbit_fraction against Sigma_{tau=1}.
    Const { mu_orbit10pct: f64 },
    /// Direct area-mass rate.
    ConstRate { rate_kg_m2_s: f64 },
    /// Time power law mu(t) = mu0 ((t + t0)/t0)^index on the canonical form.
    Powerlaw { mu0: f64, t0_s: f64, index: f64 },
    /// Prescribed Sigma_dot_in(t) table.
    Table,
    /// Piecewise-constant segments (rate i applies from times[i] onward).
    Piecewise { times_s: Vec<f64>, rates: Vec<f64> },
}

/// Where injected mass lands on the size grid.
#[derive(Debug, Clone)]
pub enum InjectionMode {
    /// All mass into one designated bin.
    MinBin { bin: usize },
    /// w_k from a power-law integral over [s_floor, s_ceil].
    PowerlawBins { q: f64, s_floor: f64, s_ceil: f64 },
    /// Proportional to the initial mass-per-bin distribution.
    InitialPsd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Direct,
    DeepMixing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadroomGate {
    /// Deep-reservoir drainage also respects the headroom.
    Hard,
    Soft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadroomPolicy {
    /// applied = min(scaled, (Sigma_{tau=1} - Sigma_surf)/dt).
    Clip,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepletionMode {
    HardStop,
    Taper,
}

#[derive(Debug, Clone)]
pub struct ReservoirConfig {
    pub enabled: bool,
    /// Total extractable surface mass density [kg m^-2].
    pub m_total: f64,
    pub depletion: DepletionMode,
    /// Remaining fraction below which the taper ramps to zero.
    pub taper_fraction: f64,
}

#[derive(Debug, Clone)]
pub struct FeedbackConfig {
    pub enabled: bool,
    /// Target optical depth tau*.
    pub target_tau: f64,
    /// Proportional-integral gain.
    pub gain: f64,
    /// Controller response time [s].
    pub response_s: f64,
    /// Which optical-depth field the controller tracks.
    pub tau_field: TauField,
    pub min_scale: f64,
    pub max_scale: f64,
}

#[derive(Debug, Clone)]
pub enum TemperatureCouplingMode {
    Powerlaw { ref_k: f64, exponent: f64 },
    /// Tabulated multiplier over temperature, linear interpolation.
    Table { temp_k: Vec<f64>, factor: Vec<f64> },
}

#[derive(Debug, Clone)]
pub struct TemperatureCoupling {
    pub enabled: bool,
    pub mode: TemperatureCouplingMode,
    pub floor: f64,
    pub cap: f64,
}

/// Full supply pipeline: nominal -> scaled -> applied, with routing.
#[derive(Debug, Clone)]
pub struct SupplyModel {
    pub mode: SupplyMode,
    /// Mixing efficiency epsilon_mix.
    pub eps_mix: f64,
    /// Fraction of an orbit the canonical rate refers to.
    pub orbit_fraction: f64,
    pub injection: InjectionMode,
    pub reservoir: ReservoirConfig,
    pub feedback: FeedbackConfig,
    pub temperature: TemperatureCoupling,
    pub transport: TransportMode,
    /// Deep-reservoir mixing time in orbits.
    pub t_mix_orbits: f64,
    pub headroom_gate: HeadroomGate,
    pub headroom_policy: HeadroomPolicy,
}

/// Per-step supply diagnostics, one row's worth of series columns.
#[derive(Debug, Clone, Copy, Default)]
pub struct SupplyOutcome {
    pub nominal: f64,
    pub scaled: f64,
    /// Rate actually injected into the surface this step (incl. deep drain).
    pub applied: f64,
    pub to_deep: f64,
    pub deep_to_surf: f64,
    pub headroom: f64,
    pub clip_factor: f64,
    pub feedback_scale: f64,
    pub temperature_scale: f64,
    pub reservoir_factor: f64,
}

impl SupplyModel {
    /// Precomputes the per-bin injection mass weights w_k (sum = 1).
    /// `initial_mass_per_bin` is m_k N_k(t0).
    pub fn injection_weights(
        &self,
        grid: &SizeGrid,
        initial_mass_per_bin: &DVector<f64>,
    ) -> Option<DVector<f64>> {
        match &self.injection {
            InjectionMode::MinBin { bin } => {
                if *bin >= grid.n_bins() {
                    return None;
                }
                let mut w = DVector::zeros(grid.n_bins());
                w[*bin] = 1.0;
                Some(w)
            }
            InjectionMode::PowerlawBins { q, s_floor, s_ceil } => {
                powerlaw::powerlaw_bin_weights(&grid.edges, *q, *s_floor, *s_ceil)
                    .map(DVector::from_vec)
            }
            InjectionMode::InitialPsd => {
                let total: f64 = initial_mass_per_bin.iter().sum();
                if total <= 0.0 {
                    return None;
                }
                Some(initial_mass_per_bin / total)
            }
        }
    }

    /// Base rate of the canonical form, before mixing efficiency.
    fn base_rate(
        &self,
        t_now: f64,
        t_blow: f64,
        sigma_tau1: f64,
        table: Option<&SupplyRateTable>,
    ) -> f64 {
        let sigma_ref = if sigma_tau1.is_finite() { sigma_tau1 } else { 0.0 };
        match &self.mode {
            SupplyMode::Off => 0.0,
            SupplyMode::Const { mu_orbit10pct } => {
                mu_orbit10pct * self.orbit_fraction * sigma_ref / (self.eps_mix * t_blow)
            }
            SupplyMode::ConstRate { rate_kg_m2_s } => rate_kg_m2_s / self.eps_mix,
            SupplyMode::Powerlaw { mu0, t0_s, index } => {
                let mu = mu0 * ((t_now + t0_s) / t0_s).powf(*index);
                mu * self.orbit_fraction * sigma_ref / (self.eps_mix * t_blow)
            }
            SupplyMode::Table => match table {
                Some(tab) => tab.eval(t_now) / self.eps_mix,
                None => 0.0,
            },
            SupplyMode::Piecewise { times_s, rates } => {
                let mut rate = rates.first().copied().unwrap_or(0.0);
                for (i, &t_seg) in times_s.iter().enumerate() {
                    if t_now >= t_seg {
                        rate = rates[i];
                    }
                }
                rate / self.eps_mix
            }
        }
    }

    /// Advances the first-order PI feedback scale held per cell.
    fn advance_feedback(&self, dt: f64, tau: f64, scale: &mut f64) -> f64 {
        if !self.feedback.enabled {
            return 1.0;
        }
        let fb = &self.feedback;
        let error = (fb.target_tau - tau) / fb.target_tau;
        *scale += dt / fb.response_s * fb.gain * error;
        *scale = scale.clamp(fb.min_scale, fb.max_scale);
        *scale
    }

    fn temperature_scale(&self, t_mars: f64) -> f64 {
        if !self.temperature.enabled {
            return 1.0;
        }
        let raw = match &self.temperature.mode {
            TemperatureCouplingMode::Powerlaw { ref_k, exponent } => {
                (t_mars / ref_k).powf(*exponent)
            }
            TemperatureCouplingMode::Table { temp_k, factor } => {
                interp::linear(temp_k, factor, t_mars, EdgeMode::Hold)
            }
        };
        raw.clamp(self.temperature.floor, self.temperature.cap)
    }

    fn reservoir_factor(&self, remaining: f64) -> f64 {
        if !self.reservoir.enabled {
            return 1.0;
        }
        match self.reservoir.depletion {
            DepletionMode::HardStop => {
                if remaining > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            DepletionMode::Taper => {
                let knee = self.reservoir.taper_fraction * self.reservoir.m_total;
                if knee <= 0.0 {
                    if remaining > 0.0 {
                        1.0
                    } else {
                        0.0
                    }
                } else {
                    (remaining / knee).clamp(0.0, 1.0)
                }
            }
        }
    }

    /// Runs the full pipeline for one cell and one outer step.
    ///
    /// Mutates the per-cell feedback scale, reservoir remaining mass, and
    /// deep-reservoir density; the returned `applied` rate is what the
    /// integrator injects into the PSD over `dt`.
    #[allow(clippy::too_many_arguments)]
    pub fn compute(
        &self,
        dt: f64,
        t_now: f64,
        omega: f64,
        t_blow: f64,
        t_mars: f64,
        optical: &OpticalState,
        allow_supply: bool,
        table: Option<&SupplyRateTable>,
        feedback_scale: &mut f64,
        reservoir_remaining: &mut f64,
        sigma_surf: f64,
        sigma_deep: &mut f64,
    ) -> SupplyOutcome {
        let mut out = SupplyOutcome {
            clip_factor: 1.0,
            feedback_scale: *feedback_scale,
            temperature_scale: 1.0,
            reservoir_factor: 1.0,
            headroom: f64::INFINITY,
            ..Default::default()
        };

        // The supply gate cuts external delivery only: the deep reservoir is
        // mass already delivered and buffered below the surface, so its
        // drain is internal transport and continues while gated, still
        // subject to the hard headroom gate.
        let t_mix = self.t_mix_orbits * 2.0 * std::f64::consts::PI / omega;
        let mut deep_drain = if self.transport == TransportMode::DeepMixing && t_mix > 0.0 {
            *sigma_deep / t_mix
        } else {
            0.0
        };

        let headroom = if optical.sigma_tau1.is_finite() {
            ((optical.sigma_tau1 - sigma_surf) / dt).max(0.0)
        } else {
            f64::INFINITY
        };
        out.headroom = headroom;

        if !allow_supply {
            // Gated: no external supply, but the deep pathway still empties.
            if self.headroom_gate == HeadroomGate::Hard {
                deep_drain = deep_drain.min(headroom);
            }
            *sigma_deep = (*sigma_deep - deep_drain * dt).max(0.0);
            out.deep_to_surf = deep_drain;
            out.applied = deep_drain;
            return out;
        }

        // 1-2. Canonical base rate and nominal rate.
        let r_base = self.base_rate(t_now, t_blow, optical.sigma_tau1, table);
        out.nominal = (self.eps_mix * r_base).max(0.0);

        // 3. Feedback and temperature coupling.
        out.feedback_scale =
            self.advance_feedback(dt, optical.tau(self.feedback.tau_field), feedback_scale);
        out.temperature_scale = self.temperature_scale(t_mars);
        let mut scaled = out.nominal * out.temperature_scale * out.feedback_scale;
        if scaled < 0.0 {
            debug!(scaled, "negative scaled supply rate clipped to zero");
            scaled = 0.0;
        }

        // 4. Finite-reservoir gate.
        out.reservoir_factor = self.reservoir_factor(*reservoir_remaining);
        scaled *= out.reservoir_factor;
        out.scaled = scaled;

        // 5. Headroom policy and the surface/deep split. An infinite
        //    Sigma_{tau=1} (kappa_eff <= 0) degenerates `clip` to `off`.
        let clipped = match self.headroom_policy {
            HeadroomPolicy::Clip if headroom.is_finite() => scaled.min(headroom),
            _ => scaled,
        };
        out.clip_factor = if scaled > 0.0 { clipped / scaled } else { 1.0 };

        let (to_surface, to_deep) = match self.transport {
            TransportMode::Direct => (clipped, 0.0),
            TransportMode::DeepMixing => (clipped, scaled - clipped),
        };
        out.to_deep = to_deep;

        if self.headroom_gate == HeadroomGate::Hard {
            deep_drain = deep_drain.min((headroom - to_surface).max(0.0));
        }
        out.deep_to_surf = deep_drain;

        // Book-keeping on the mutable per-cell stores.
        *sigma_deep = (*sigma_deep + (to_deep - deep_drain) * dt).max(0.0);
        if self.reservoir.enabled {
            *reservoir_remaining = (*reservoir_remaining - (to_surface + to_deep) * dt).max(0.0);
        }

        out.applied = to_surface + deep_drain;
        out
    }
}
