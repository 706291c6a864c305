use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

// ============================================================================
// CONFIG RECORD
// ============================================================================

/// Immutable run configuration, deserialised from TOML and validated
/// field-by-field. Every optional block carries its own defaults so a
/// minimal file stays short.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub cells: CellsConfig,
    #[serde(default)]
    pub initial_psd: InitialPsdConfig,
    #[serde(default)]
    pub dynamics: DynamicsConfig,
    #[serde(default)]
    pub radiation: RadiationConfig,
    #[serde(default)]
    pub shielding: ShieldingConfig,
    #[serde(default)]
    pub supply: SupplyConfig,
    #[serde(default)]
    pub sublimation: SublimationConfig,
    #[serde(default)]
    pub collisions: CollisionsConfig,
    #[serde(default)]
    pub phase: PhaseConfig,
    #[serde(default)]
    pub temperature: TemperatureConfig,
    #[serde(default)]
    pub numerics: NumericsConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GridConfig {
    /// Smallest resolved grain size [m].
    pub s_min: f64,
    /// Largest resolved grain size [m].
    pub s_max: f64,
    /// Number of logarithmic bins.
    pub k: usize,
    /// Internal grain density [kg m^-3].
    pub rho: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            s_min: 1e-7,
            s_max: 1e-2,
            k: 40,
            rho: 3270.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CellsConfig {
    /// Representative orbital radii in Mars radii, one cell each.
    pub radii_rmars: Vec<f64>,
}

impl Default for CellsConfig {
    fn default() -> Self {
        Self {
            radii_rmars: vec![2.0],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialPsdKind {
    Powerlaw,
    LognormalMixture,
    Weights,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LognormalComponent {
    /// Mixture-component median size [m].
    pub mean_s: f64,
    /// Log-space width.
    pub sigma: f64,
    pub amplitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct InitialPsdConfig {
    pub kind: InitialPsdKind,
    /// Number-density power-law index n(s) ~ s^-q for `powerlaw`.
    pub q: f64,
    pub components: Vec<LognormalComponent>,
    /// Explicit per-bin mass weights for `weights`.
    pub weights: Vec<f64>,
    /// Initial surface density [kg m^-2]; ignored when tau0_target scales it.
    pub sigma_surf0: f64,
    /// Scale the initial state so tau_los(t0) hits this value.
    pub tau0_target: Option<f64>,
    /// Legacy alias for tau0_target = 1; conflicts with tau0_target.
    pub scale_to_tau1: bool,
    /// Lognormal weight jitter drawn from the per-cell RNG stream.
    pub jitter_sigma: f64,
}

impl Default for InitialPsdConfig {
    fn default() -> Self {
        Self {
            kind: InitialPsdKind::Powerlaw,
            q: 3.5,
            components: Vec::new(),
            weights: Vec::new(),
            sigma_surf0: 1.0,
            tau0_target: None,
            scale_to_tau1: false,
            jitter_sigma: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VelocityClosureConfig {
    RayleighLowE,
    Pericenter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DynamicsConfig {
    pub e: f64,
    pub i: f64,
    pub h_factor: f64,
    pub rng_seed: u64,
    pub velocity_closure: VelocityClosureConfig,
}

impl Default for DynamicsConfig {
    fn default() -> Self {
        Self {
            e: 0.05,
            i: 0.025,
            h_factor: 1.0,
            rng_seed: 42,
            velocity_closure: VelocityClosureConfig::RayleighLowE,
        }
    }
}

/// chi_blow accepts the literal string "auto" or a number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ChiBlowConfig {
    Keyword(String),
    Fixed(f64),
}

impl Default for ChiBlowConfig {
    fn default() -> Self {
        ChiBlowConfig::Fixed(1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QprMode {
    Constant,
    Table,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct QprConfig {
    pub mode: QprMode,
    pub value: f64,
    pub table_path: Option<PathBuf>,
}

impl Default for QprConfig {
    fn default() -> Self {
        Self {
            mode: QprMode::Constant,
            value: 1.0,
            table_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RadiationConfig {
    pub chi_blow: ChiBlowConfig,
    /// Cell stop temperature [K].
    pub t_stop_k: f64,
    pub qpr: QprConfig,
    /// Reference size for the beta diagnostic column [m].
    pub s_ref: f64,
}

impl Default for RadiationConfig {
    fn default() -> Self {
        Self {
            chi_blow: ChiBlowConfig::default(),
            t_stop_k: 0.0,
            qpr: QprConfig::default(),
            s_ref: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShieldingModeConfig {
    Off,
    Psitau,
    FixedTau1,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ShieldingConfig {
    pub mode: ShieldingModeConfig,
    /// Sigma_{tau=1} override for `fixed_tau1` [kg m^-2].
    pub fixed_sigma_tau1: f64,
    pub tau_stop: f64,
    pub tau_stop_tol: f64,
    pub f_los: f64,
    pub omega0: f64,
    pub g_asym: f64,
    pub phi_table_path: Option<PathBuf>,
}

impl Default for ShieldingConfig {
    fn default() -> Self {
        Self {
            mode: ShieldingModeConfig::Psitau,
            fixed_sigma_tau1: 1.0,
            tau_stop: 10.0,
            tau_stop_tol: 1e-3,
            f_los: 1.0,
            omega0: 0.9,
            g_asym: 0.6,
            phi_table_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupplyModeConfig {
    Off,
    Const,
    ConstRate,
    Powerlaw,
    Table,
    Piecewise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionModeConfig {
    MinBin,
    PowerlawBins,
    InitialPsd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepletionModeConfig {
    HardStop,
    Taper,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ReservoirConfigFile {
    pub enabled: bool,
    /// Total extractable mass [kg m^-2].
    pub m_total: f64,
    pub depletion_mode: DepletionModeConfig,
    pub taper_fraction: f64,
}

impl Default for ReservoirConfigFile {
    fn default() -> Self {
        Self {
            enabled: false,
            m_total: 0.0,
            depletion_mode: DepletionModeConfig::HardStop,
            taper_fraction: 0.1,
        }
    }
}

/// Which optical-depth field a consumer reads. The line-of-sight depth is
/// the canonical gate/stop field; the vertical depth is available for
/// comparison studies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TauFieldConfig {
    Los,
    Perp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FeedbackConfigFile {
    pub enabled: bool,
    pub target_tau: f64,
    pub gain: f64,
    pub response_yr: f64,
    pub tau_field: TauFieldConfig,
    pub min_scale: f64,
    pub max_scale: f64,
}

impl Default for FeedbackConfigFile {
    fn default() -> Self {
        Self {
            enabled: false,
            target_tau: 1.0,
            gain: 1.0,
            response_yr: 0.1,
            tau_field: TauFieldConfig::Los,
            min_scale: 0.0,
            max_scale: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureCouplingModeConfig {
    Powerlaw,
    Table,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SupplyTemperatureConfig {
    pub enabled: bool,
    pub mode: TemperatureCouplingModeConfig,
    pub ref_k: f64,
    pub exponent: f64,
    pub table_temp_k: Vec<f64>,
    pub table_factor: Vec<f64>,
    pub floor: f64,
    pub cap: f64,
}

impl Default for SupplyTemperatureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: TemperatureCouplingModeConfig::Powerlaw,
            ref_k: 4000.0,
            exponent: 0.0,
            table_temp_k: Vec::new(),
            table_factor: Vec::new(),
            floor: 0.0,
            cap: f64::INFINITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportModeConfig {
    Direct,
    DeepMixing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadroomGateConfig {
    Hard,
    Soft,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TransportConfig {
    pub mode: TransportModeConfig,
    pub t_mix_orbits: f64,
    pub headroom_gate: HeadroomGateConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportModeConfig::Direct,
            t_mix_orbits: 10.0,
            headroom_gate: HeadroomGateConfig::Hard,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadroomPolicyConfig {
    Clip,
    Off,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SupplyConfig {
    pub mode: SupplyModeConfig,
    pub mu_orbit10pct: f64,
    /// Direct-rate convention; conflicts with mu_orbit10pct.
    pub rate_kg_m2_s: Option<f64>,
    pub orbit_fraction: f64,
    pub eps_mix: f64,
    /// Power-law mode parameters.
    pub powerlaw_mu0: f64,
    pub powerlaw_t0_yr: f64,
    pub powerlaw_index: f64,
    pub table_path: Option<PathBuf>,
    pub piecewise_times_yr: Vec<f64>,
    pub piecewise_rates: Vec<f64>,
    pub injection_mode: InjectionModeConfig,
    pub injection_q: f64,
    pub injection_s_floor: f64,
    pub injection_s_ceil: f64,
    pub injection_bin: usize,
    pub reservoir: ReservoirConfigFile,
    pub feedback: FeedbackConfigFile,
    pub temperature: SupplyTemperatureConfig,
    pub transport: TransportConfig,
    pub headroom_policy: HeadroomPolicyConfig,
}

impl Default for SupplyConfig {
    fn default() -> Self {
        Self {
            mode: SupplyModeConfig::Off,
            mu_orbit10pct: 1.0,
            rate_kg_m2_s: None,
            orbit_fraction: 0.1,
            eps_mix: 1.0,
            powerlaw_mu0: 1.0,
            powerlaw_t0_yr: 1.0,
            powerlaw_index: 0.0,
            table_path: None,
            piecewise_times_yr: Vec::new(),
            piecewise_rates: Vec::new(),
            injection_mode: InjectionModeConfig::InitialPsd,
            injection_q: 3.5,
            injection_s_floor: 0.0,
            injection_s_ceil: f64::INFINITY,
            injection_bin: 0,
            reservoir: ReservoirConfigFile::default(),
            feedback: FeedbackConfigFile::default(),
            temperature: SupplyTemperatureConfig::default(),
            transport: TransportConfig::default(),
            headroom_policy: HeadroomPolicyConfig::Clip,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SublimationModeConfig {
    None,
    Hkl,
    Timescale,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SublimationConfig {
    pub mode: SublimationModeConfig,
    pub alpha_evap: f64,
    /// Molar mass [kg mol^-1].
    pub mu_molar: f64,
    /// Clausius coefficients of log10 P_sat = a - b/T.
    pub a: f64,
    pub b: f64,
    pub t_valid_min_k: f64,
    pub t_valid_max_k: f64,
    /// Ambient pressure [Pa].
    pub p_gas: f64,
    pub mass_conserving: bool,
    pub psat_table_path: Option<PathBuf>,
}

impl Default for SublimationConfig {
    fn default() -> Self {
        Self {
            mode: SublimationModeConfig::None,
            alpha_evap: 0.1,
            mu_molar: 0.044,
            a: 13.176,
            b: 24605.0,
            t_valid_min_k: 500.0,
            t_valid_max_k: 6000.0,
            p_gas: 0.0,
            mass_conserving: false,
            psat_table_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoeffUnitsConfig {
    Si,
    Ba99Cgs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CollisionsConfig {
    pub enabled: bool,
    pub alpha_frag: f64,
    /// Largest-remnant velocity-scaling exponent.
    pub mu_ls: f64,
    pub f_min: f64,
    pub coeff_units: CoeffUnitsConfig,
    /// Q_D* coefficients per reference velocity.
    pub v_ref: Vec<f64>,
    pub q_s: Vec<f64>,
    pub a_s: Vec<f64>,
    pub b_grav: Vec<f64>,
    pub b_exp: Vec<f64>,
}

impl Default for CollisionsConfig {
    fn default() -> Self {
        // Basalt-like strength curve in SI at a single reference velocity.
        Self {
            enabled: true,
            alpha_frag: 3.5,
            mu_ls: 0.5,
            f_min: 1e-4,
            coeff_units: CoeffUnitsConfig::Si,
            v_ref: vec![3000.0],
            q_s: vec![3.5e3],
            a_s: vec![-0.38],
            b_grav: vec![3e-8],
            b_exp: vec![1.36],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureInputConfig {
    MarsSurface,
    Particle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PhaseConfig {
    pub enabled: bool,
    pub temperature_input: TemperatureInputConfig,
    pub q_abs_mean: f64,
    pub t_condense_k: f64,
    pub t_vaporize_k: f64,
    pub tau_gate: f64,
    pub tau_field: TauFieldConfig,
    pub vapor_sink_timescale_s: Option<f64>,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            temperature_input: TemperatureInputConfig::MarsSurface,
            q_abs_mean: 1.0,
            t_condense_k: 1800.0,
            t_vaporize_k: 2200.0,
            tau_gate: f64::INFINITY,
            tau_field: TauFieldConfig::Los,
            vapor_sink_timescale_s: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureModeConfig {
    Constant,
    Table,
    Slab,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableEdgeConfig {
    Hold,
    Extrapolate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TemperatureConfig {
    pub mode: TemperatureModeConfig,
    pub value_k: f64,
    pub table_path: Option<PathBuf>,
    pub edge: TableEdgeConfig,
    /// Slab / linear driver parameters.
    pub t0_k: f64,
    pub tau_cool_yr: f64,
    pub slope_k_per_yr: f64,
    pub floor_k: f64,
}

impl Default for TemperatureConfig {
    fn default() -> Self {
        Self {
            mode: TemperatureModeConfig::Constant,
            value_k: 4000.0,
            table_path: None,
            edge: TableEdgeConfig::Hold,
            t0_k: 4000.0,
            tau_cool_yr: 1.0,
            slope_k_per_yr: -1000.0,
            floor_k: 100.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DiffusionConfig {
    pub enabled: bool,
    /// Dimensionless smoothing weight per step, in (0, 0.5].
    pub coefficient: f64,
}

impl Default for DiffusionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            coefficient: 0.25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointFormat {
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CheckpointConfig {
    pub enabled: bool,
    pub interval_years: f64,
    pub keep_last_n: usize,
    pub format: CheckpointFormat,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_years: 0.1,
            keep_last_n: 3,
            format: CheckpointFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct NumericsConfig {
    /// Outer step [s].
    pub dt_init_s: f64,
    pub safety: f64,
    pub mass_tol: f64,
    pub max_halvings: u32,
    pub stop_on_blowout_below_smin: bool,
    /// At most one horizon: a fixed duration or a temperature floor.
    /// Leaving both unset falls back to a one-year duration.
    pub t_end_years: Option<f64>,
    pub t_end_until_temperature_k: Option<f64>,
    pub substep_fast_blowout: bool,
    pub substep_max_ratio: f64,
    pub allow_tl2003: bool,
    pub diffusion: DiffusionConfig,
    pub checkpoint: CheckpointConfig,
}

impl Default for NumericsConfig {
    fn default() -> Self {
        Self {
            dt_init_s: 1000.0,
            safety: 0.1,
            mass_tol: 5e-3,
            max_halvings: 20,
            stop_on_blowout_below_smin: false,
            t_end_years: None,
            t_end_until_temperature_k: None,
            substep_fast_blowout: false,
            substep_max_ratio: 3.0,
            allow_tl2003: false,
            diffusion: DiffusionConfig::default(),
            checkpoint: CheckpointConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OutputConfig {
    /// Emit a series row every n-th outer step.
    pub series_stride: usize,
    /// Emit PSD history rows every n-th outer step (0 disables).
    pub psd_stride: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            series_stride: 1,
            psd_stride: 0,
        }
    }
}

// ============================================================================
// LOADING & VALIDATION
// ============================================================================

impl Config {
    pub fn load(path: &Path) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("could not read config {path:?}: {e}")))?;
        let config: Config = toml::from_str(&text)
            .map_err(|e| EngineError::Config(format!("could not parse config {path:?}: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Stable hash of the effective configuration, stored in checkpoints so
    /// a restore against a different setup is detectable. JSON is the
    /// canonical form: unlike TOML it can represent unset optional fields.
    pub fn hash(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = DefaultHasher::new();
        canonical.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    pub fn validate(&self) -> EngineResult<()> {
        let fail = |msg: String| Err(EngineError::Config(msg));

        if self.grid.k == 0 {
            return fail("grid.k must be >= 1".into());
        }
        if !(self.grid.s_min > 0.0 && self.grid.s_max > self.grid.s_min) {
            return fail(format!(
                "grid requires 0 < s_min < s_max, got [{}, {}]",
                self.grid.s_min, self.grid.s_max
            ));
        }
        if self.cells.radii_rmars.is_empty() {
            return fail("cells.radii_rmars must name at least one cell".into());
        }
        if self.cells.radii_rmars.iter().any(|&r| r <= 1.0) {
            return fail("cell radii must lie above the Mars surface (> 1 R_M)".into());
        }

        if !(0.0..1.0).contains(&self.dynamics.e) {
            return fail(format!("dynamics.e must be in [0, 1), got {}", self.dynamics.e));
        }
        if self.dynamics.i < 0.0 || self.dynamics.h_factor <= 0.0 {
            return fail("dynamics.i must be >= 0 and h_factor > 0".into());
        }

        if let ChiBlowConfig::Keyword(word) = &self.radiation.chi_blow {
            if word != "auto" {
                return fail(format!(
                    "radiation.chi_blow must be a number or \"auto\", got \"{word}\""
                ));
            }
        }
        if let ChiBlowConfig::Fixed(chi) = &self.radiation.chi_blow {
            if !(*chi > 0.0) {
                return fail(format!("radiation.chi_blow must be positive, got {chi}"));
            }
        }
        if self.radiation.qpr.mode == QprMode::Table && self.radiation.qpr.table_path.is_none() {
            return fail("radiation.qpr.mode = \"table\" needs qpr.table_path".into());
        }

        if self.shielding.tau_stop <= 0.0 || self.shielding.tau_stop_tol < 0.0 {
            return fail("shielding.tau_stop must be > 0 and tau_stop_tol >= 0".into());
        }
        if self.shielding.f_los <= 0.0 {
            return fail("shielding.f_los must be positive".into());
        }
        if self.shielding.mode == ShieldingModeConfig::FixedTau1
            && self.shielding.fixed_sigma_tau1 <= 0.0
        {
            return fail("shielding.fixed_sigma_tau1 must be positive in fixed_tau1 mode".into());
        }

        self.validate_initial_psd()?;
        self.validate_supply()?;
        self.validate_sublimation()?;
        self.validate_collisions()?;
        self.validate_phase_and_temperature()?;
        self.validate_numerics()
    }

    fn validate_initial_psd(&self) -> EngineResult<()> {
        let psd = &self.initial_psd;
        // The legacy flag and the explicit target are the same knob twice.
        if psd.scale_to_tau1 && psd.tau0_target.is_some() {
            return Err(EngineError::Config(
                "initial_psd.scale_to_tau1 and initial_psd.tau0_target are mutually exclusive"
                    .into(),
            ));
        }
        if let Some(tau0) = psd.tau0_target {
            if !(tau0 > 0.0) {
                return Err(EngineError::Config(format!(
                    "initial_psd.tau0_target must be positive, got {tau0}"
                )));
            }
        }
        match psd.kind {
            InitialPsdKind::LognormalMixture if psd.components.is_empty() => {
                Err(EngineError::Config(
                    "initial_psd.kind = \"lognormal_mixture\" needs at least one component".into(),
                ))
            }
            InitialPsdKind::Weights if psd.weights.len() != self.grid.k => {
                Err(EngineError::Config(format!(
                    "initial_psd.weights has {} entries for {} bins",
                    psd.weights.len(),
                    self.grid.k
                )))
            }
            _ => Ok(()),
        }
    }

    fn validate_supply(&self) -> EngineResult<()> {
        let sup = &self.supply;
        if sup.mode == SupplyModeConfig::Off {
            return Ok(());
        }
        if sup.eps_mix <= 0.0 || sup.orbit_fraction <= 0.0 {
            return Err(EngineError::Config(
                "supply.eps_mix and supply.orbit_fraction must be positive".into(),
            ));
        }
        // Overlap detection between the two mass-rate conventions.
        if sup.mode == SupplyModeConfig::Const && sup.rate_kg_m2_s.is_some() {
            return Err(EngineError::Config(
                "supply.rate_kg_m2_s conflicts with the mu_orbit10pct convention; \
                 use mode = \"const_rate\""
                    .into(),
            ));
        }
        if sup.mode == SupplyModeConfig::ConstRate && sup.rate_kg_m2_s.is_none() {
            return Err(EngineError::Config(
                "supply.mode = \"const_rate\" needs supply.rate_kg_m2_s".into(),
            ));
        }
        if sup.mode == SupplyModeConfig::Table && sup.table_path.is_none() {
            return Err(EngineError::Config(
                "supply.mode = \"table\" needs supply.table_path".into(),
            ));
        }
        if sup.mode == SupplyModeConfig::Piecewise {
            if sup.piecewise_times_yr.len() != sup.piecewise_rates.len()
                || sup.piecewise_times_yr.is_empty()
            {
                return Err(EngineError::Config(
                    "supply piecewise mode needs matching non-empty times/rates lists".into(),
                ));
            }
        }
        if sup.injection_mode == InjectionModeConfig::MinBin && sup.injection_bin >= self.grid.k {
            return Err(EngineError::Config(format!(
                "supply.injection_bin {} is outside the {}-bin grid",
                sup.injection_bin, self.grid.k
            )));
        }
        if sup.feedback.enabled {
            let fb = &sup.feedback;
            if fb.target_tau <= 0.0 || fb.response_yr <= 0.0 || fb.min_scale > fb.max_scale {
                return Err(EngineError::Config(
                    "supply.feedback needs target_tau > 0, response_yr > 0, min <= max".into(),
                ));
            }
        }
        if sup.temperature.enabled
            && sup.temperature.mode == TemperatureCouplingModeConfig::Table
            && (sup.temperature.table_temp_k.len() != sup.temperature.table_factor.len()
                || sup.temperature.table_temp_k.len() < 2)
        {
            return Err(EngineError::Config(
                "supply.temperature table mode needs matching lists of >= 2 points".into(),
            ));
        }
        if sup.reservoir.enabled && sup.reservoir.m_total <= 0.0 {
            return Err(EngineError::Config(
                "supply.reservoir.m_total must be positive when the reservoir is enabled".into(),
            ));
        }
        Ok(())
    }

    fn validate_sublimation(&self) -> EngineResult<()> {
        let sub = &self.sublimation;
        if sub.mode == SublimationModeConfig::None {
            return Ok(());
        }
        if sub.alpha_evap <= 0.0 || sub.mu_molar <= 0.0 {
            return Err(EngineError::Config(
                "sublimation.alpha_evap and mu_molar must be positive".into(),
            ));
        }
        if sub.psat_table_path.is_none() && sub.t_valid_min_k >= sub.t_valid_max_k {
            return Err(EngineError::Config(
                "sublimation Clausius validity range needs t_valid_min_k < t_valid_max_k".into(),
            ));
        }
        Ok(())
    }

    fn validate_collisions(&self) -> EngineResult<()> {
        let col = &self.collisions;
        if !col.enabled {
            return Ok(());
        }
        let n = col.v_ref.len();
        if n == 0
            || col.q_s.len() != n
            || col.a_s.len() != n
            || col.b_grav.len() != n
            || col.b_exp.len() != n
        {
            return Err(EngineError::Config(
                "collisions Q_D* coefficient lists must be non-empty and share v_ref's length"
                    .into(),
            ));
        }
        if !(col.f_min > 0.0 && col.f_min <= 1.0) {
            return Err(EngineError::Config(format!(
                "collisions.f_min must lie in (0, 1], got {}",
                col.f_min
            )));
        }
        // A flat disk has no vertical interaction volume.
        if self.dynamics.i <= 0.0 {
            return Err(EngineError::Config(
                "collisions need a non-zero inclination dispersion".into(),
            ));
        }
        Ok(())
    }

    fn validate_phase_and_temperature(&self) -> EngineResult<()> {
        if self.phase.enabled && self.phase.t_condense_k >= self.phase.t_vaporize_k {
            return Err(EngineError::Config(format!(
                "phase hysteresis needs t_condense_k < t_vaporize_k, got {} >= {}",
                self.phase.t_condense_k, self.phase.t_vaporize_k
            )));
        }
        let temp = &self.temperature;
        match temp.mode {
            TemperatureModeConfig::Constant if temp.value_k <= 0.0 => Err(EngineError::Config(
                format!("temperature.value_k must be positive, got {}", temp.value_k),
            )),
            TemperatureModeConfig::Table if temp.table_path.is_none() => Err(EngineError::Config(
                "temperature.mode = \"table\" needs temperature.table_path".into(),
            )),
            TemperatureModeConfig::Slab if temp.t0_k <= 0.0 || temp.tau_cool_yr <= 0.0 => {
                Err(EngineError::Config(
                    "slab cooling needs positive t0_k and tau_cool_yr".into(),
                ))
            }
            _ => Ok(()),
        }
    }

    fn validate_numerics(&self) -> EngineResult<()> {
        let num = &self.numerics;
        if num.dt_init_s <= 0.0 || num.safety <= 0.0 || num.mass_tol <= 0.0 {
            return Err(EngineError::Config(
                "numerics.dt_init_s, safety, and mass_tol must be positive".into(),
            ));
        }
        if num.t_end_years.is_some() && num.t_end_until_temperature_k.is_some() {
            return Err(EngineError::Config(
                "numerics.t_end_years and t_end_until_temperature_k are mutually exclusive".into(),
            ));
        }
        if num.substep_fast_blowout && num.substep_max_ratio <= 0.0 {
            return Err(EngineError::Config(
                "numerics.substep_max_ratio must be positive".into(),
            ));
        }
        if num.diffusion.enabled {
            if self.cells.radii_rmars.len() < 2 {
                return Err(EngineError::Config(
                    "radial diffusion needs at least two cells".into(),
                ));
            }
            if !(num.diffusion.coefficient > 0.0 && num.diffusion.coefficient <= 0.5) {
                return Err(EngineError::Config(
                    "numerics.diffusion.coefficient must lie in (0, 0.5]".into(),
                ));
            }
        }
        Ok(())
    }
}
