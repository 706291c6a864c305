use crate::core::grid::SizeGrid;
use nalgebra::{DMatrix, DVector};

/// Closure mapping orbital elements to the pairwise relative velocity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VelocityClosure {
    /// Low-e, low-i Rayleigh dispersion: v = v_K sqrt(1.25 e^2 + i^2).
    RayleighLowE,
    /// Pericentre crossing velocity: v = v_K sqrt((1 + e)/(1 - e)).
    Pericenter,
}

/// Binary collision-rate kernel over the size grid.
#[derive(Debug, Clone)]
pub struct CollisionKernel {
    pub eccentricity: f64,
    pub inclination: f64,
    /// Scale height prefactor: H = h_factor * i * r.
    pub h_factor: f64,
    pub closure: VelocityClosure,
}

impl CollisionKernel {
    /// Pairwise relative velocity [m s^-1] for Keplerian speed `v_k`.
    pub fn relative_velocity(&self, v_k: f64) -> f64 {
        match self.closure {
            VelocityClosure::RayleighLowE => {
                v_k * (1.25 * self.eccentricity * self.eccentricity
                    + self.inclination * self.inclination)
                    .sqrt()
            }
            VelocityClosure::Pericenter => {
                v_k * ((1.0 + self.eccentricity) / (1.0 - self.eccentricity)).sqrt()
            }
        }
    }

    /// Vertical interaction scale H_ij = sqrt(H_i^2 + H_j^2) [m].
    ///
    /// A single dynamical temperature makes every bin share H = h_factor i r.
    pub fn h_ij(&self, r: f64) -> f64 {
        std::f64::consts::SQRT_2 * self.h_factor * self.inclination * r
    }

    /// Fills the symmetric collision-rate matrix
    /// C_ij = N_i N_j / (1 + delta_ij) * pi (s_i + s_j)^2 * v / (sqrt(2 pi) H_ij)
    /// [collisions m^-2 s^-1]. Only the upper triangle including the
    /// diagonal is written; the lower triangle mirrors it.
    pub fn fill(
        &self,
        grid: &SizeGrid,
        n_bins: &DVector<f64>,
        v_ij: f64,
        r: f64,
        c_ij: &mut DMatrix<f64>,
    ) {
        let k_bins = grid.n_bins();
        let geom = v_ij / ((2.0 * std::f64::consts::PI).sqrt() * self.h_ij(r));
        for i in 0..k_bins {
            let n_i = n_bins[i];
            if n_i <= 0.0 {
                for j in i..k_bins {
                    c_ij[(i, j)] = 0.0;
                    c_ij[(j, i)] = 0.0;
                }
                continue;
            }
            for j in i..k_bins {
                let n_j = n_bins[j];
                let pair_guard = if i == j { 0.5 } else { 1.0 };
                let s_sum = grid.centers[i] + grid.centers[j];
                let rate = pair_guard * n_i * n_j * std::f64::consts::PI * s_sum * s_sum * geom;
                c_ij[(i, j)] = rate;
                c_ij[(j, i)] = rate;
            }
        }
    }

    /// Per-bin collisional loss rate lambda_k = (sum_j C_kj + C_kk) / N_k.
    ///
    /// The self pair enters twice: once through the row sum (with its 1/2
    /// symmetry factor) and once through the explicit C_kk addend, so each
    /// same-bin collision removes both participants.
    pub fn loss_rates(
        c_ij: &DMatrix<f64>,
        n_bins: &DVector<f64>,
        lambda: &mut DVector<f64>,
    ) {
        let k_bins = n_bins.len();
        for k in 0..k_bins {
            let n_k = n_bins[k];
            if n_k <= 0.0 {
                lambda[k] = 0.0;
                continue;
            }
            let mut row_sum = 0.0;
            for j in 0..k_bins {
                row_sum += c_ij[(k, j)];
            }
            lambda[k] = (row_sum + c_ij[(k, k)]) / n_k;
        }
    }

    /// Shortest collisional timescale min_k 1/lambda_k over populated bins.
    pub fn t_coll_min(lambda: &DVector<f64>) -> f64 {
        lambda
            .iter()
            .filter(|&&l| l > 0.0)
            .map(|&l| 1.0 / l)
            .fold(f64::INFINITY, f64::min)
    }
}
