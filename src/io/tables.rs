use crate::error::{EngineError, EngineResult};
use crate::math::interp::{self, EdgeMode, Pchip};
use anyhow::Context;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// Emits one clamping warning per (table, axis) pair per run.
#[derive(Debug, Default)]
pub struct ClampGuard(AtomicBool);

impl ClampGuard {
    fn fire(&self, table: &str, axis: &str) {
        if !self.0.swap(true, Ordering::Relaxed) {
            warn!(table, axis, "query outside table domain, clamping to edge");
        }
    }
}

fn parse_float(token: &str) -> EngineResult<f64> {
    token
        .parse::<f64>()
        .map_err(|_| EngineError::Table(format!("failed to parse '{token}' as float")))
}

/// Reads a whitespace-separated numeric table, skipping blank lines and
/// `#` comments. Every row must have the same column count.
fn read_rows(path: &Path) -> EngineResult<Vec<Vec<f64>>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("could not read table file {:?}", path))
        .map_err(|e| EngineError::Table(format!("{e:#}")))?;

    let mut rows: Vec<Vec<f64>> = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let row = line
            .split_whitespace()
            .map(parse_float)
            .collect::<EngineResult<Vec<f64>>>()?;
        if let Some(first) = rows.first() {
            if row.len() != first.len() {
                return Err(EngineError::Table(format!(
                    "ragged table {:?}: expected {} columns, found {}",
                    path,
                    first.len(),
                    row.len()
                )));
            }
        }
        rows.push(row);
    }
    if rows.is_empty() {
        return Err(EngineError::Table(format!("table {:?} has no data rows", path)));
    }
    Ok(rows)
}

// ============================================================================
// RADIATION-PRESSURE EFFICIENCY
// ============================================================================

/// Planck-averaged radiation-pressure efficiency <Q_pr>(s, T_M).
///
/// Matrix file layout: the first data row holds the temperature axis [K]
/// behind a numeric placeholder in column one; each following row is
/// `s [m]` followed by the efficiencies at each temperature.
#[derive(Debug)]
pub struct QprTable {
    s_axis: Vec<f64>,
    t_axis: Vec<f64>,
    /// Row-major in s: values[i * n_t + j].
    values: Vec<f64>,
    warned_s: ClampGuard,
    warned_t: ClampGuard,
}

impl QprTable {
    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let rows = read_rows(path)?;
        if rows.len() < 3 || rows[0].len() < 3 {
            return Err(EngineError::Table(format!(
                "Q_pr table {:?} needs at least 2 sizes x 2 temperatures",
                path
            )));
        }
        let t_axis: Vec<f64> = rows[0][1..].to_vec();
        let mut s_axis = Vec::with_capacity(rows.len() - 1);
        let mut values = Vec::with_capacity((rows.len() - 1) * t_axis.len());
        for row in &rows[1..] {
            s_axis.push(row[0]);
            values.extend_from_slice(&row[1..]);
        }
        interp::check_axis("Q_pr size", &s_axis)?;
        interp::check_axis("Q_pr temperature", &t_axis)?;
        Ok(Self {
            s_axis,
            t_axis,
            values,
            warned_s: ClampGuard::default(),
            warned_t: ClampGuard::default(),
        })
    }

    pub fn eval(&self, s: f64, t_mars: f64) -> f64 {
        let (v, clamped_s, clamped_t) =
            interp::bilinear(&self.s_axis, &self.t_axis, &self.values, s, t_mars);
        if clamped_s {
            self.warned_s.fire("Q_pr", "size");
        }
        if clamped_t {
            self.warned_t.fire("Q_pr", "temperature");
        }
        v
    }
}

/// Q_pr supplied either as a grey-grain constant or a bilinear table.
#[derive(Debug)]
pub enum QprModel {
    Constant(f64),
    Table(QprTable),
}

impl QprModel {
    pub fn eval(&self, s: f64, t_mars: f64) -> f64 {
        match self {
            QprModel::Constant(q) => *q,
            QprModel::Table(t) => t.eval(s, t_mars),
        }
    }

    /// True when Q_pr varies with grain size, which makes s_blow implicit.
    pub fn depends_on_size(&self) -> bool {
        matches!(self, QprModel::Table(_))
    }
}

// ============================================================================
// SHIELDING FACTOR
// ============================================================================

/// Shielding factor Phi(tau, omega_0, g), long-format file with columns
/// `tau omega0 g phi` on a complete regular grid. A single g value reduces
/// the lookup to bilinear.
#[derive(Debug)]
pub struct PhiTable {
    tau_axis: Vec<f64>,
    omega_axis: Vec<f64>,
    g_axis: Vec<f64>,
    values: Vec<f64>,
    warned: ClampGuard,
}

impl PhiTable {
    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let rows = read_rows(path)?;
        if rows[0].len() != 4 {
            return Err(EngineError::Table(format!(
                "Phi table {:?} must have 4 columns (tau omega0 g phi), found {}",
                path,
                rows[0].len()
            )));
        }
        let mut tau_axis = dedup_sorted(rows.iter().map(|r| r[0]));
        let mut omega_axis = dedup_sorted(rows.iter().map(|r| r[1]));
        let mut g_axis = dedup_sorted(rows.iter().map(|r| r[2]));
        tau_axis.shrink_to_fit();
        omega_axis.shrink_to_fit();
        g_axis.shrink_to_fit();

        let expected = tau_axis.len() * omega_axis.len() * g_axis.len();
        if rows.len() != expected {
            return Err(EngineError::Table(format!(
                "Phi table {:?} is not a complete grid: {} rows for {}x{}x{} axes",
                path,
                rows.len(),
                tau_axis.len(),
                omega_axis.len(),
                g_axis.len()
            )));
        }

        // z (g) fastest, matching math::interp::trilinear layout.
        let (ny, nz) = (omega_axis.len(), g_axis.len());
        let mut values = vec![f64::NAN; expected];
        for row in &rows {
            let i = index_of(&tau_axis, row[0]);
            let j = index_of(&omega_axis, row[1]);
            let k = index_of(&g_axis, row[2]);
            values[(i * ny + j) * nz + k] = row[3];
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(EngineError::Table(format!(
                "Phi table {:?} has duplicate or missing grid points",
                path
            )));
        }

        // tau and omega0 must support interpolation; a single g slice
        // degrades gracefully to a bilinear lookup.
        interp::check_axis("Phi tau", &tau_axis)?;
        interp::check_axis("Phi omega0", &omega_axis)?;
        if g_axis.len() >= 2 {
            interp::check_axis("Phi g", &g_axis)?;
        }

        Ok(Self {
            tau_axis,
            omega_axis,
            g_axis,
            values,
            warned: ClampGuard::default(),
        })
    }

    pub fn eval(&self, tau: f64, omega0: f64, g: f64) -> f64 {
        // Degenerate single-point axes collapse the interpolation order.
        if self.g_axis.len() == 1 {
            let (v, cx, cy) = interp::bilinear(
                &self.tau_axis,
                &self.omega_axis,
                &self.values,
                tau,
                omega0,
            );
            if cx || cy {
                self.warned.fire("Phi", "tau/omega0");
            }
            return v;
        }
        let (v, clamped) = interp::trilinear(
            &self.tau_axis,
            &self.omega_axis,
            &self.g_axis,
            &self.values,
            tau,
            omega0,
            g,
        );
        if clamped.iter().any(|&c| c) {
            self.warned.fire("Phi", "tau/omega0/g");
        }
        v
    }
}

fn dedup_sorted(iter: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut v: Vec<f64> = iter.collect();
    v.sort_by(|a, b| a.total_cmp(b));
    v.dedup_by(|a, b| (*a - *b).abs() < 1e-12 * a.abs().max(1.0));
    v
}

fn index_of(axis: &[f64], x: f64) -> usize {
    axis.iter()
        .position(|&a| (a - x).abs() <= 1e-12 * a.abs().max(1.0))
        .unwrap_or(0)
}

// ============================================================================
// TEMPERATURE DRIVER
// ============================================================================

/// Mars surface temperature history T_M(t).
#[derive(Debug)]
pub enum TemperatureDriver {
    Constant {
        t_k: f64,
    },
    /// Tabulated history, linear in t.
    Table {
        time_s: Vec<f64>,
        temp_k: Vec<f64>,
        edge: EdgeMode,
    },
    /// Radiative slab cooling T(t) = T0 (1 + 3 t / tau_cool)^(-1/3).
    Slab {
        t0_k: f64,
        tau_cool_s: f64,
    },
    /// Constant-flux linear ramp with a floor.
    Linear {
        t0_k: f64,
        slope_k_per_s: f64,
        floor_k: f64,
    },
}

impl TemperatureDriver {
    pub fn table_from_file(path: &Path, edge: EdgeMode) -> EngineResult<Self> {
        let rows = read_rows(path)?;
        if rows[0].len() != 2 {
            return Err(EngineError::Table(format!(
                "temperature table {:?} must have 2 columns (t_s T_K)",
                path
            )));
        }
        let time_s: Vec<f64> = rows.iter().map(|r| r[0]).collect();
        let temp_k: Vec<f64> = rows.iter().map(|r| r[1]).collect();
        interp::check_axis("T_M time", &time_s)?;
        if temp_k.iter().any(|&t| !(t > 0.0)) {
            return Err(EngineError::Domain(format!(
                "temperature table {:?} contains non-positive temperatures",
                path
            )));
        }
        Ok(Self::Table {
            time_s,
            temp_k,
            edge,
        })
    }

    pub fn eval(&self, t: f64) -> f64 {
        match self {
            TemperatureDriver::Constant { t_k } => *t_k,
            TemperatureDriver::Table {
                time_s,
                temp_k,
                edge,
            } => interp::linear(time_s, temp_k, t, *edge),
            TemperatureDriver::Slab { t0_k, tau_cool_s } => {
                t0_k * (1.0 + 3.0 * t / tau_cool_s).powf(-1.0 / 3.0)
            }
            TemperatureDriver::Linear {
                t0_k,
                slope_k_per_s,
                floor_k,
            } => (t0_k + slope_k_per_s * t).max(*floor_k),
        }
    }

    /// Analytic time at which the driver first reaches `t_target`,
    /// if the driver admits one (used by temperature-horizon stops).
    pub fn time_to_reach(&self, t_target: f64) -> Option<f64> {
        match self {
            TemperatureDriver::Slab { t0_k, tau_cool_s } => {
                if t_target >= *t0_k || t_target <= 0.0 {
                    return None;
                }
                Some(tau_cool_s / 3.0 * ((t0_k / t_target).powi(3) - 1.0))
            }
            TemperatureDriver::Linear {
                t0_k,
                slope_k_per_s,
                ..
            } => {
                if *slope_k_per_s >= 0.0 || t_target >= *t0_k {
                    return None;
                }
                Some((t_target - t0_k) / slope_k_per_s)
            }
            _ => None,
        }
    }
}

// ============================================================================
// SATURATION VAPOUR PRESSURE
// ============================================================================

/// P_sat(T) [Pa], either a two-coefficient Clausius form or a PCHIP table
/// of log10 P.
#[derive(Debug)]
pub enum PsatModel {
    /// 10^(A - B/T), valid on [t_min, t_max]; queries outside are clamped.
    Clausius {
        a: f64,
        b: f64,
        t_min: f64,
        t_max: f64,
        warned: ClampGuard,
    },
    Table {
        log10_p: Pchip,
    },
}

impl PsatModel {
    pub fn table_from_file(path: &Path) -> EngineResult<Self> {
        let rows = read_rows(path)?;
        if rows[0].len() != 2 {
            return Err(EngineError::Table(format!(
                "P_sat table {:?} must have 2 columns (T_K log10P)",
                path
            )));
        }
        let t: Vec<f64> = rows.iter().map(|r| r[0]).collect();
        let logp: Vec<f64> = rows.iter().map(|r| r[1]).collect();
        Ok(Self::Table {
            log10_p: Pchip::new(t, logp)?,
        })
    }

    pub fn eval(&self, t: f64) -> f64 {
        match self {
            PsatModel::Clausius {
                a,
                b,
                t_min,
                t_max,
                warned,
            } => {
                let tc = t.clamp(*t_min, *t_max);
                if tc != t {
                    warned.fire("P_sat", "temperature");
                }
                10f64.powf(a - b / tc)
            }
            PsatModel::Table { log10_p } => 10f64.powf(log10_p.eval(t)),
        }
    }
}

// ============================================================================
// PRESCRIBED SUPPLY RATE
// ============================================================================

/// Optional prescribed supply rate table Sigma_dot_in(t) [kg m^-2 s^-1].
#[derive(Debug)]
pub struct SupplyRateTable {
    time_s: Vec<f64>,
    rate: Vec<f64>,
}

impl SupplyRateTable {
    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let rows = read_rows(path)?;
        if rows[0].len() != 2 {
            return Err(EngineError::Table(format!(
                "supply table {:?} must have 2 columns (t_s rate)",
                path
            )));
        }
        let time_s: Vec<f64> = rows.iter().map(|r| r[0]).collect();
        let rate: Vec<f64> = rows.iter().map(|r| r[1]).collect();
        interp::check_axis("supply time", &time_s)?;
        if rate.iter().any(|&r| r < 0.0) {
            return Err(EngineError::Domain(format!(
                "supply table {:?} contains negative rates",
                path
            )));
        }
        Ok(Self { time_s, rate })
    }

    pub fn eval(&self, t: f64) -> f64 {
        interp::linear(&self.time_s, &self.rate, t, EdgeMode::Hold)
    }
}

/// Immutable bundle of all input tables, shared read-only across cells.
#[derive(Debug)]
pub struct Tables {
    pub qpr: QprModel,
    pub phi: Option<PhiTable>,
    pub temperature: TemperatureDriver,
    pub psat: Option<PsatModel>,
    pub supply_rate: Option<SupplyRateTable>,
}
