use crate::error::{EngineError, EngineResult};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// Logarithmic particle-size grid.
///
/// Edges and centres are fixed at construction; the grid is shared read-only
/// by every cell of a run. Centres are geometric means of the bounding edges,
/// so the grid is uniform in log-space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeGrid {
    /// Bin edges s_{k-1/2}, length K+1, strictly increasing [m].
    pub edges: Vec<f64>,
    /// Bin centres s_k = sqrt(s_{k-1/2} * s_{k+1/2}) [m].
    pub centers: Vec<f64>,
    /// Bin widths s_{k+1/2} - s_{k-1/2} [m].
    pub widths: Vec<f64>,
    /// Per-bin particle mass m_k = (4/3) pi rho s_k^3 [kg].
    pub masses: Vec<f64>,
    /// Internal grain density [kg m^-3].
    pub rho: f64,
}

impl SizeGrid {
    /// Builds a K-bin logarithmic grid spanning [s_min, s_max].
    pub fn new(s_min: f64, s_max: f64, k: usize, rho: f64) -> EngineResult<Self> {
        if k == 0 {
            return Err(EngineError::Domain("size grid needs K >= 1 bins".into()));
        }
        if !(s_min > 0.0 && s_max > s_min) {
            return Err(EngineError::Domain(format!(
                "size grid requires 0 < s_min < s_max, got s_min={s_min}, s_max={s_max}"
            )));
        }
        if !(rho > 0.0) {
            return Err(EngineError::Domain(format!(
                "grain density must be positive, got {rho}"
            )));
        }

        let log_min = s_min.ln();
        let step = (s_max.ln() - log_min) / k as f64;
        let edges: Vec<f64> = (0..=k).map(|i| (log_min + step * i as f64).exp()).collect();

        let centers: Vec<f64> = edges.windows(2).map(|w| (w[0] * w[1]).sqrt()).collect();
        let widths: Vec<f64> = edges.windows(2).map(|w| w[1] - w[0]).collect();
        let masses: Vec<f64> = centers
            .iter()
            .map(|&s| 4.0 / 3.0 * std::f64::consts::PI * rho * s * s * s)
            .collect();

        Ok(Self {
            edges,
            centers,
            widths,
            masses,
            rho,
        })
    }

    pub fn n_bins(&self) -> usize {
        self.centers.len()
    }

    /// Index of the bin whose [edge, edge) interval contains size `s`,
    /// or None outside the grid.
    pub fn bin_of(&self, s: f64) -> Option<usize> {
        if s < self.edges[0] || s >= self.edges[self.edges.len() - 1] {
            return None;
        }
        // Uniform in log-space, so the index is direct.
        let log_min = self.edges[0].ln();
        let step = (self.edges[self.edges.len() - 1].ln() - log_min) / self.n_bins() as f64;
        let idx = ((s.ln() - log_min) / step).floor() as usize;
        Some(idx.min(self.n_bins() - 1))
    }

    /// Index of the bin whose particle mass is closest below-or-equal to `m`,
    /// clamped to bin 0 for masses under the smallest bin. Used to place
    /// collision remnants.
    pub fn bin_of_mass(&self, m: f64) -> usize {
        let mut k_lr = 0;
        for (k, &mk) in self.masses.iter().enumerate() {
            if mk <= m {
                k_lr = k;
            } else {
                break;
            }
        }
        k_lr
    }

    /// Total surface mass density of a number-density vector [kg m^-2].
    pub fn total_mass(&self, n_bins: &DVector<f64>) -> f64 {
        self.masses
            .iter()
            .zip(n_bins.iter())
            .map(|(&m, &n)| m * n)
            .sum()
    }
}
