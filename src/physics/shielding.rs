use crate::core::grid::SizeGrid;
use crate::io::tables::{PhiTable, QprModel};
use nalgebra::DVector;

/// Shielding / optical-depth mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShieldingMode {
    /// No attenuation: Phi = 1.
    Off,
    /// Phi(tau, omega_0, g) from the table, or exp(-tau) absorption-only
    /// when no table is loaded.
    PsiTau,
    /// Diagnostic mode pinning Sigma_{tau=1} to a fixed value.
    FixedTau1,
}

#[derive(Debug, Clone)]
pub struct ShieldingModel {
    pub mode: ShieldingMode,
    /// Line-of-sight geometry factor.
    pub f_los: f64,
    /// Single-scattering albedo fed to the Phi lookup.
    pub omega0: f64,
    /// Asymmetry parameter fed to the Phi lookup.
    pub g_asym: f64,
    /// Sigma_{tau=1} override for `FixedTau1`.
    pub fixed_sigma_tau1: f64,
}

/// Which optical-depth field a gate or controller reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TauField {
    /// Line-of-sight depth, the canonical gate/stop field.
    Los,
    /// Vertical depth, kept for comparison studies.
    Perp,
}

/// Optical-depth quantities for one cell at one step.
#[derive(Debug, Clone, Copy)]
pub struct OpticalState {
    /// PSD-derived surface opacity [m^2 kg^-1].
    pub kappa_surf: f64,
    /// Shielded effective opacity Phi * kappa_surf [m^2 kg^-1].
    pub kappa_eff: f64,
    /// Line-of-sight optical depth (canonical gate/stop field).
    pub tau_los: f64,
    /// Vertical optical depth, diagnostic only.
    pub tau_perp: f64,
    /// Surface density at which tau reaches unity; +inf when kappa_eff <= 0.
    pub sigma_tau1: f64,
    /// Shielding factor actually applied.
    pub phi: f64,
}

impl OpticalState {
    pub fn tau(&self, field: TauField) -> f64 {
        match field {
            TauField::Los => self.tau_los,
            TauField::Perp => self.tau_perp,
        }
    }
}

impl ShieldingModel {
    /// PSD-derived surface opacity kappa_surf = sum pi s_k^2 Q_pr N_k / Sigma_surf.
    pub fn kappa_surf(
        &self,
        grid: &SizeGrid,
        qpr: &QprModel,
        n_bins: &DVector<f64>,
        sigma_surf: f64,
        t_mars: f64,
    ) -> f64 {
        if sigma_surf <= 0.0 {
            return 0.0;
        }
        let cross: f64 = grid
            .centers
            .iter()
            .zip(n_bins.iter())
            .map(|(&s, &n)| std::f64::consts::PI * s * s * qpr.eval(s, t_mars) * n)
            .sum();
        cross / sigma_surf
    }

    /// One self-consistent evaluation at the current state.
    ///
    /// The Phi <-> tau cycle is broken by looking Phi up at the previous
    /// step's tau_los; the scheme is first order and never iterates here.
    pub fn evaluate(
        &self,
        phi_table: Option<&PhiTable>,
        kappa_surf: f64,
        sigma_surf: f64,
        tau_prev: f64,
    ) -> OpticalState {
        let phi = match self.mode {
            ShieldingMode::Off => 1.0,
            ShieldingMode::FixedTau1 => 1.0,
            ShieldingMode::PsiTau => match phi_table {
                Some(table) => table.eval(tau_prev, self.omega0, self.g_asym),
                None => (-tau_prev).exp(),
            },
        };
        let kappa_eff = phi * kappa_surf;
        let tau_los = self.f_los * kappa_eff * sigma_surf;
        let tau_perp = kappa_surf * sigma_surf;
        let sigma_tau1 = match self.mode {
            ShieldingMode::FixedTau1 => self.fixed_sigma_tau1,
            _ => {
                if kappa_eff > 0.0 {
                    1.0 / kappa_eff
                } else {
                    f64::INFINITY
                }
            }
        };
        OpticalState {
            kappa_surf,
            kappa_eff,
            tau_los,
            tau_perp,
            sigma_tau1,
            phi,
        }
    }
}
