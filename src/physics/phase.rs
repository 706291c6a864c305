use crate::core::constants::R_MARS;
use crate::physics::shielding::TauField;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// Bulk phase of the condensed material in a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Solid,
    Vapor,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Solid => write!(f, "solid"),
            Phase::Vapor => write!(f, "vapor"),
        }
    }
}

/// Which temperature the phase logic compares against the thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureInput {
    MarsSurface,
    /// Particle equilibrium temperature T_p = T_M <Q_abs>^(1/4) sqrt(R_M / 2r).
    Particle,
}

/// Pathway activation derived from phase and optical depth.
#[derive(Debug, Clone, Copy)]
pub struct GateState {
    pub allow_supply: bool,
    pub allow_blowout: bool,
}

impl GateState {
    /// Compact "SB"/"S-"/"--" notation for the series output.
    pub fn flags(&self) -> String {
        format!(
            "{}{}",
            if self.allow_supply { 'S' } else { '-' },
            if self.allow_blowout { 'B' } else { '-' }
        )
    }
}

/// Solid/vapor determination with hysteresis, plus the tau-gates.
///
/// Hysteresis: a solid cell vaporises above `t_vaporize`; a vapor cell
/// condenses below `t_condense`; between the two thresholds the phase
/// holds its previous value. Requires t_condense < t_vaporize.
#[derive(Debug, Clone)]
pub struct PhaseModel {
    pub enabled: bool,
    pub input: TemperatureInput,
    /// Mean absorption efficiency for the particle-temperature estimate.
    pub q_abs_mean: f64,
    pub t_condense: f64,
    pub t_vaporize: f64,
    /// Optical-depth threshold gating supply and blow-out.
    pub tau_gate: f64,
    /// Which optical-depth field the gate reads.
    pub tau_field: TauField,
    /// Alternative vapor-phase sink timescale (e.g. hydrodynamic escape);
    /// None disables the sink selector.
    pub vapor_sink_timescale_s: Option<f64>,
}

impl PhaseModel {
    /// Temperature the phase thresholds are compared against.
    pub fn phase_temperature(&self, t_mars: f64, r: f64) -> f64 {
        match self.input {
            TemperatureInput::MarsSurface => t_mars,
            TemperatureInput::Particle => {
                t_mars * self.q_abs_mean.powf(0.25) * (R_MARS / (2.0 * r)).sqrt()
            }
        }
    }

    /// Advances the phase one step with hysteresis.
    pub fn advance(&self, current: Phase, t_mars: f64, r: f64) -> Phase {
        if !self.enabled {
            return Phase::Solid;
        }
        let t = self.phase_temperature(t_mars, r);
        match current {
            Phase::Solid if t > self.t_vaporize => Phase::Vapor,
            Phase::Vapor if t < self.t_condense => Phase::Solid,
            other => other,
        }
    }

    /// Gate logic of the supply and blow-out pathways. `tau` is the value
    /// of whichever field `tau_field` selects.
    pub fn gates(&self, phase: Phase, tau: f64) -> GateState {
        let solid = phase == Phase::Solid;
        GateState {
            allow_supply: solid && tau < self.tau_gate,
            allow_blowout: solid && tau < self.tau_gate,
        }
    }

    /// Vapor-phase sink selector: fills the uniform per-bin 1/t_sink rate
    /// when the cell is in the vapor phase, zero otherwise.
    pub fn fill_vapor_sink(&self, phase: Phase, sink: &mut DVector<f64>) {
        let rate = match (phase, self.vapor_sink_timescale_s) {
            (Phase::Vapor, Some(t_sink)) if t_sink > 0.0 => 1.0 / t_sink,
            _ => 0.0,
        };
        sink.fill(rate);
    }
}
