use debris_disk_engine::core::constants::{omega_kepler, R_MARS, YEAR};
use debris_disk_engine::io::checkpoint::Snapshot;
use debris_disk_engine::io::config::*;
use debris_disk_engine::io::series::OutputSinks;
use debris_disk_engine::{run_simulation, Config, Driver};

fn assert_close(a: f64, b: f64, rel: f64, what: &str) {
    let denom = b.abs().max(1e-300);
    assert!(
        ((a - b) / denom).abs() <= rel,
        "{what}: {a} vs {b} (rel tol {rel})"
    );
}

/// Quiet baseline: one cell at 2 R_M, constant 4000 K, every pathway off.
fn base_config() -> Config {
    let mut config = Config::default();
    config.cells.radii_rmars = vec![2.0];
    config.temperature.mode = TemperatureModeConfig::Constant;
    config.temperature.value_k = 4000.0;
    config.supply.mode = SupplyModeConfig::Off;
    config.sublimation.mode = SublimationModeConfig::None;
    config.collisions.enabled = false;
    config.shielding.mode = ShieldingModeConfig::Off;
    config.shielding.tau_stop = 1e12;
    config
}

fn run_quiet(config: Config) -> (Driver, debris_disk_engine::RunSummary) {
    let mut driver = Driver::new(config).expect("driver construction");
    let mut sinks = OutputSinks::default();
    let summary = driver.run(&mut sinks, None, None).expect("run");
    (driver, summary)
}

// ----------------------------------------------------------------------------
// Scenario 1: constant T, no supply, no sublimation, single-bin blow-out.
// ----------------------------------------------------------------------------

#[test]
fn single_bin_blowout_decays_exponentially() {
    let omega = omega_kepler(2.0 * R_MARS);
    let t_blow = 1.0 / omega;

    let mut config = base_config();
    config.grid = GridConfig {
        s_min: 1e-6,
        s_max: 2e-6,
        k: 1,
        rho: 3270.0,
    };
    config.initial_psd.kind = InitialPsdKind::Weights;
    config.initial_psd.weights = vec![1.0];
    config.initial_psd.sigma_surf0 = 1.0;
    config.radiation.chi_blow = ChiBlowConfig::Fixed(1.0);
    config.numerics.dt_init_s = 20.0;
    config.numerics.t_end_years = Some(10.0 * t_blow / YEAR);

    let (driver, summary) = run_quiet(config);
    let cell = &driver.cells[0];

    // M_loss_blow(horizon) within 1% of Sigma_surf(0) (1 - exp(-10)).
    let expected_loss = 1.0 - (-10.0f64).exp();
    assert_close(cell.cum.m_loss_blow, expected_loss, 1e-2, "cumulative blow-out loss");

    // The BDF(1) update compounds (1 + dt/t_blow)^-1; at dt = 20 s the
    // surviving column agrees with exp(-t Omega) to a few percent.
    let expected_sigma = (-10.0f64).exp();
    assert_close(cell.sigma_surf, expected_sigma, 5e-2, "surface density decay");

    assert!(summary.max_eps_mass <= 5e-3, "mass budget");
    assert_eq!(summary.cells[0].stop_reason, "horizon");
}

// ----------------------------------------------------------------------------
// P6 accuracy: small steps converge onto the analytic exponential.
// ----------------------------------------------------------------------------

#[test]
fn pure_blowout_matches_analytic_decay_at_small_steps() {
    let omega = omega_kepler(2.0 * R_MARS);
    let t_blow = 1.0 / omega;

    let mut config = base_config();
    config.grid = GridConfig {
        s_min: 1e-6,
        s_max: 2e-6,
        k: 1,
        rho: 3270.0,
    };
    config.initial_psd.kind = InitialPsdKind::Weights;
    config.initial_psd.weights = vec![1.0];
    config.initial_psd.sigma_surf0 = 1.0;
    config.radiation.chi_blow = ChiBlowConfig::Fixed(1.0);
    config.numerics.dt_init_s = 0.002 * t_blow;
    config.numerics.t_end_years = Some(5.0 * t_blow / YEAR);

    let (driver, _) = run_quiet(config);
    assert_close(
        driver.cells[0].sigma_surf,
        (-5.0f64).exp(),
        1e-2,
        "Sigma(5 t_blow) vs analytic",
    );
}

// ----------------------------------------------------------------------------
// P5: all sources and sinks disabled -> mass frozen to round-off.
// ----------------------------------------------------------------------------

#[test]
fn quiet_disk_conserves_mass_over_many_steps() {
    let mut config = base_config();
    config.grid = GridConfig {
        s_min: 1e-5,
        s_max: 1e-3,
        k: 20,
        rho: 3270.0,
    };
    // Grains comfortably above s_blow so the blow-out sink stays empty.
    config.initial_psd.sigma_surf0 = 1.0;
    config.numerics.dt_init_s = 100.0;
    config.numerics.t_end_years = Some(100.0 * 1e4 / YEAR);

    let (driver, summary) = run_quiet(config);
    assert!(summary.n_steps >= 10_000, "wanted 1e4 steps, got {}", summary.n_steps);
    assert_close(driver.cells[0].sigma_surf, 1.0, 1e-8, "mass conservation");
    assert_eq!(driver.cells[0].cum.m_loss_blow, 0.0);
}

// ----------------------------------------------------------------------------
// Scenario 2: pure collisional cascade.
// ----------------------------------------------------------------------------

#[test]
fn collisional_cascade_keeps_interior_powerlaw_and_mass() {
    let mut config = base_config();
    config.grid = GridConfig {
        s_min: 1e-5,
        s_max: 1e-4,
        k: 40,
        rho: 3270.0,
    };
    config.collisions.enabled = true;
    config.collisions.alpha_frag = 3.5;
    config.dynamics.e = 0.5;
    config.dynamics.i = 0.05;
    config.initial_psd.kind = InitialPsdKind::Powerlaw;
    config.initial_psd.q = 3.5;
    config.initial_psd.tau0_target = Some(0.01);
    // The whole grid sits above s_blow (~6e-6 m at 4000 K): no sinks.
    config.numerics.dt_init_s = 500.0;
    config.numerics.t_end_years = Some(0.02);

    let (driver, summary) = run_quiet(config);
    let cell = &driver.cells[0];
    let grid = driver.grid();

    // Mass drift bounded by the per-step budget tolerance.
    let mass: f64 = grid.total_mass(&cell.n_bins);
    let initial: f64 = cell.initial_mass_per_bin.iter().sum();
    assert_close(mass, initial, 5e-2, "cascade mass drift");
    assert!(summary.max_eps_mass <= 5e-3, "per-step budget");

    // Interior differential slope stays Dohnanyi-like: fit ln(N/width)
    // against ln s over the interior bins.
    let (mut sx, mut sy, mut sxx, mut sxy, mut n) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for k in 10..30 {
        if cell.n_bins[k] <= 0.0 {
            continue;
        }
        let x = grid.centers[k].ln();
        let y = (cell.n_bins[k] / grid.widths[k]).ln();
        sx += x;
        sy += y;
        sxx += x * x;
        sxy += x * y;
        n += 1.0;
    }
    let slope = (n * sxy - sx * sy) / (n * sxx - sx * sx);
    assert!(
        (-4.5..=-2.5).contains(&slope),
        "interior differential slope {slope} left the Dohnanyi band"
    );
}

// ----------------------------------------------------------------------------
// Scenario 3: supply-blow-out balance under the headroom clip.
// ----------------------------------------------------------------------------

#[test]
fn supply_balances_blowout_below_the_tau1_ceiling() {
    let mut config = base_config();
    config.grid = GridConfig {
        s_min: 1e-6,
        s_max: 1e-4,
        k: 16,
        rho: 3270.0,
    };
    config.shielding.mode = ShieldingModeConfig::Psitau;
    config.shielding.tau_stop = 10.0;
    config.initial_psd.kind = InitialPsdKind::Powerlaw;
    config.initial_psd.q = 3.5;
    config.initial_psd.scale_to_tau1 = true;
    config.supply.mode = SupplyModeConfig::Const;
    config.supply.mu_orbit10pct = 1.0;
    config.supply.orbit_fraction = 0.05;
    config.supply.eps_mix = 0.5;
    config.supply.injection_mode = InjectionModeConfig::InitialPsd;
    config.supply.headroom_policy = HeadroomPolicyConfig::Clip;
    config.numerics.dt_init_s = 5000.0;
    config.numerics.t_end_years = Some(2.0);

    let (driver, summary) = run_quiet(config);
    let cell = &driver.cells[0];
    let sigma0 = cell.initial_mass_per_bin.iter().sum::<f64>();

    assert!(cell.cum.m_supplied > 0.0, "supply must deliver mass");
    assert!(cell.cum.m_loss_blow > 0.0, "blow-out must drain mass");
    assert!(cell.sigma_surf > 0.0, "surface survives");

    // The headroom clip keeps Sigma_surf at or below the tau = 1 ceiling
    // evaluated at the final state's own shielding factor.
    let kappa_surf: f64 = driver
        .grid()
        .centers
        .iter()
        .zip(cell.n_bins.iter())
        .map(|(&s, &nk)| std::f64::consts::PI * s * s * nk)
        .sum::<f64>()
        / cell.sigma_surf;
    let kappa_eff = (-cell.tau_los_prev).exp() * kappa_surf;
    let sigma_tau1 = 1.0 / kappa_eff;
    assert!(
        cell.sigma_surf <= 1.05 * sigma_tau1,
        "overshoot: sigma {} vs ceiling {}",
        cell.sigma_surf,
        sigma_tau1
    );
    assert!(
        cell.sigma_surf > 0.2 * sigma0,
        "balance collapsed: sigma {} vs initial {}",
        cell.sigma_surf,
        sigma0
    );
    assert!(summary.max_eps_mass <= 5e-3);
}

// ----------------------------------------------------------------------------
// Scenario 4: IMEX step-size control with a fast collisional clock.
// ----------------------------------------------------------------------------

#[test]
fn imex_refines_below_the_collisional_timescale() {
    let mut config = base_config();
    config.grid = GridConfig {
        s_min: 1e-5,
        s_max: 2e-5,
        k: 1,
        rho: 3270.0,
    };
    config.collisions.enabled = true;
    config.dynamics.e = 0.1;
    config.dynamics.i = 0.05;
    config.initial_psd.kind = InitialPsdKind::Weights;
    config.initial_psd.weights = vec![1.0];
    // Dense enough that t_coll ~ 1 s while dt_init = 1000 s.
    config.initial_psd.sigma_surf0 = 60.0;
    config.numerics.dt_init_s = 1000.0;
    config.numerics.t_end_years = Some(1000.0 / YEAR);

    let dir = tempfile::tempdir().expect("tempdir");
    let summary = run_simulation(config, dir.path(), None).expect("run");

    assert!(summary.max_eps_mass <= 5e-3, "refined steps meet the budget");

    // The series records the refined dt_eff, far below the outer step.
    let series = std::fs::read_to_string(dir.path().join("series.csv")).expect("series");
    let last = series.lines().last().expect("rows");
    let dt_eff: f64 = last.split(',').nth(30).expect("dt_eff column").parse().expect("float");
    assert!(
        dt_eff < 10.0,
        "dt_eff {dt_eff} was not refined below the collisional clock"
    );
}

// ----------------------------------------------------------------------------
// Scenario 5: blow-out carves the PSD near s_blow.
// ----------------------------------------------------------------------------

#[test]
fn blowout_carves_depression_below_s_blow_with_survivors_above() {
    let mut config = base_config();
    config.grid = GridConfig {
        s_min: 1e-6,
        s_max: 1e-4,
        k: 40,
        rho: 3270.0,
    };
    config.collisions.enabled = true;
    config.initial_psd.kind = InitialPsdKind::Powerlaw;
    config.initial_psd.q = 3.5;
    config.initial_psd.tau0_target = Some(0.01);
    // Power-law injection from s_blow to 10 s_blow.
    config.supply.mode = SupplyModeConfig::Const;
    config.supply.mu_orbit10pct = 1.0;
    config.supply.orbit_fraction = 0.05;
    config.supply.injection_mode = InjectionModeConfig::PowerlawBins;
    config.supply.injection_q = 3.5;
    config.supply.injection_s_floor = 6e-6;
    config.supply.injection_s_ceil = 6e-5;
    config.numerics.dt_init_s = 500.0;
    config.numerics.t_end_years = Some(0.02);

    let (driver, _) = run_quiet(config);
    let cell = &driver.cells[0];
    let grid = driver.grid();

    // s_blow ~ 6e-6 m at 4000 K for these grains.
    let k_blow = grid.centers.iter().position(|&s| s > 6e-6).expect("s_blow inside grid");

    let survival = |k: usize| cell.n_bins[k] * grid.masses[k] / cell.initial_mass_per_bin[k].max(1e-300);
    // Bins below blow-out are carved out; the first bins above survive.
    let below = survival(k_blow.saturating_sub(2));
    let above = survival(k_blow + 2);
    assert!(
        below < 0.1 * above,
        "no depression: survival below {below} vs above {above}"
    );
}

// ----------------------------------------------------------------------------
// Scenario 6: slab cooling reaches the temperature stop on schedule.
// ----------------------------------------------------------------------------

#[test]
fn slab_cooling_stops_at_the_analytic_time() {
    let tau_cool_s = 2000.0;
    let mut config = base_config();
    config.grid = GridConfig {
        s_min: 1e-5,
        s_max: 1e-3,
        k: 10,
        rho: 3270.0,
    };
    config.temperature.mode = TemperatureModeConfig::Slab;
    config.temperature.t0_k = 4000.0;
    config.temperature.tau_cool_yr = tau_cool_s / YEAR;
    config.numerics.dt_init_s = 500.0;
    config.numerics.t_end_years = None;
    config.numerics.t_end_until_temperature_k = Some(1000.0);

    let (driver, summary) = run_quiet(config);

    // T(t) = T0 (1 + 3 t/tau)^(-1/3) reaches 1000 K at tau/3 * (4^3 - 1).
    let analytic = tau_cool_s / 3.0 * ((4000.0f64 / 1000.0).powi(3) - 1.0);
    assert_close(summary.t_end_s, analytic, 5e-2, "stop time vs slab cooling");
    for cell in &driver.cells {
        assert_eq!(cell.stop_reason().map(|r| r.to_string()).as_deref(), Some("stopped_temperature"));
    }
    assert!(summary.max_eps_mass <= 5e-3);
}

// ----------------------------------------------------------------------------
// P8: sub-stepping is the identity when r_fb stays under the ratio.
// ----------------------------------------------------------------------------

#[test]
fn substepping_is_idempotent_below_the_ratio() {
    let omega = omega_kepler(2.0 * R_MARS);
    let t_blow = 1.0 / omega;

    let build = |substep: bool| {
        let mut config = base_config();
        config.grid = GridConfig {
            s_min: 1e-6,
            s_max: 2e-6,
            k: 1,
            rho: 3270.0,
        };
        config.initial_psd.kind = InitialPsdKind::Weights;
        config.initial_psd.weights = vec![1.0];
        config.initial_psd.sigma_surf0 = 1.0;
        config.radiation.chi_blow = ChiBlowConfig::Fixed(1.0);
        // r_fb = 2 stays below the default ratio of 3.
        config.numerics.dt_init_s = 2.0 * t_blow;
        config.numerics.t_end_years = Some(20.0 * t_blow / YEAR);
        config.numerics.substep_fast_blowout = substep;
        config
    };

    let (driver_a, _) = run_quiet(build(false));
    let (driver_b, _) = run_quiet(build(true));
    let a = driver_a.cells[0].cum.m_loss_blow;
    let b = driver_b.cells[0].cum.m_loss_blow;
    assert_close(a, b, 1e-4, "delta M_out between the two integrators");
}

// ----------------------------------------------------------------------------
// P9: deterministic replay.
// ----------------------------------------------------------------------------

#[test]
fn identical_configs_replay_bitwise() {
    let build = || {
        let mut config = base_config();
        config.grid = GridConfig {
            s_min: 1e-6,
            s_max: 1e-4,
            k: 16,
            rho: 3270.0,
        };
        config.collisions.enabled = true;
        config.initial_psd.tau0_target = Some(0.01);
        config.initial_psd.jitter_sigma = 0.2;
        config.dynamics.rng_seed = 1234;
        config.numerics.dt_init_s = 500.0;
        config.numerics.t_end_years = Some(0.001);
        config
    };

    let (driver_a, _) = run_quiet(build());
    let (driver_b, _) = run_quiet(build());
    for k in 0..driver_a.grid().n_bins() {
        assert_eq!(
            driver_a.cells[0].n_bins[k], driver_b.cells[0].n_bins[k],
            "bin {k} diverged between identical runs"
        );
    }
    assert_eq!(driver_a.cells[0].cum.m_loss_blow, driver_b.cells[0].cum.m_loss_blow);
}

// ----------------------------------------------------------------------------
// P10: sublimation advection plus boundary losses close the budget.
// ----------------------------------------------------------------------------

#[test]
fn mass_conserving_sublimation_closes_the_global_budget() {
    let mut config = base_config();
    config.grid = GridConfig {
        s_min: 1e-5,
        s_max: 1e-4,
        k: 20,
        rho: 3270.0,
    };
    config.temperature.value_k = 1500.0;
    config.sublimation.mode = SublimationModeConfig::Hkl;
    config.sublimation.mass_conserving = true;
    config.initial_psd.sigma_surf0 = 1.0;
    config.numerics.dt_init_s = 2000.0;
    config.numerics.t_end_years = Some(2e6 / YEAR);

    let (driver, _) = run_quiet(config);
    let cell = &driver.cells[0];
    let remaining = driver.grid().total_mass(&cell.n_bins);
    let closure = remaining + cell.cum.m_loss_blow + cell.cum.m_loss_sink;
    assert_close(closure, 1.0, 1e-6, "sublimation mass closure");
    assert!(cell.cum.m_loss_blow > 0.0, "boundary crossing mass must register");
}

// ----------------------------------------------------------------------------
// P11: checkpoint restore reproduces an uninterrupted run.
// ----------------------------------------------------------------------------

#[test]
fn checkpoint_restore_matches_single_run() {
    let omega = omega_kepler(2.0 * R_MARS);
    let t_blow = 1.0 / omega;
    let t_half = 200.0 * 20.0; // 200 steps of 20 s
    let t_total = 400.0 * 20.0;

    let build = |t_end_s: f64| {
        let mut config = base_config();
        config.grid = GridConfig {
            s_min: 1e-6,
            s_max: 2e-6,
            k: 1,
            rho: 3270.0,
        };
        config.initial_psd.kind = InitialPsdKind::Weights;
        config.initial_psd.weights = vec![1.0];
        config.initial_psd.sigma_surf0 = 1.0;
        config.radiation.chi_blow = ChiBlowConfig::Fixed(1.0);
        config.numerics.dt_init_s = 20.0;
        config.numerics.t_end_years = Some(t_end_s / YEAR);
        config
    };
    assert!(t_total < 10.0 * t_blow, "keep the test inside the decay");

    // Uninterrupted reference run.
    let (reference, _) = run_quiet(build(t_total));

    // Half run, snapshot, restore, continue.
    let (half, _) = run_quiet(build(t_half));
    let snapshot = Snapshot::capture(
        half.config_hash(),
        half.time_s,
        half.step,
        half.grid(),
        &half.cells,
    );
    let mut restored = Driver::restore(build(t_total), &snapshot).expect("restore");
    let mut sinks = OutputSinks::default();
    restored.run(&mut sinks, None, None).expect("continuation");

    assert_close(
        restored.cells[0].sigma_surf,
        reference.cells[0].sigma_surf,
        1e-9,
        "restored continuation vs single run",
    );
    assert_close(
        restored.cells[0].cum.m_loss_blow,
        reference.cells[0].cum.m_loss_blow,
        1e-9,
        "cumulative losses after restore",
    );
}

// ----------------------------------------------------------------------------
// Checkpoint files: save, prune, reload through the on-disk entry points.
// ----------------------------------------------------------------------------

#[test]
fn checkpoint_files_roundtrip_on_disk() {
    use debris_disk_engine::io::checkpoint;

    let (driver, _) = run_quiet({
        let mut config = base_config();
        config.grid = GridConfig {
            s_min: 1e-6,
            s_max: 2e-6,
            k: 1,
            rho: 3270.0,
        };
        config.initial_psd.kind = InitialPsdKind::Weights;
        config.initial_psd.weights = vec![1.0];
        config.initial_psd.sigma_surf0 = 1.0;
        config.numerics.dt_init_s = 20.0;
        config.numerics.t_end_years = Some(2000.0 / YEAR);
        config
    });

    let dir = tempfile::tempdir().expect("tempdir");
    let snap = Snapshot::capture(
        driver.config_hash(),
        driver.time_s,
        driver.step,
        driver.grid(),
        &driver.cells,
    );
    // Three saves with keep_last_n = 2 leaves exactly two files.
    for step in 0..3u64 {
        let mut numbered = snap.clone();
        numbered.step = step;
        checkpoint::save(dir.path(), &numbered, 2).expect("save");
    }
    let files = checkpoint::list(dir.path()).expect("list");
    assert_eq!(files.len(), 2, "retention pruning");

    let latest = checkpoint::latest(dir.path()).expect("latest").expect("some");
    let loaded = checkpoint::load(&latest, Some(driver.config_hash())).expect("load");
    assert_eq!(loaded.step, 2);
    assert_eq!(loaded.cells.len(), 1);
    assert_close(
        loaded.cells[0].sigma_surf,
        driver.cells[0].sigma_surf,
        1e-12,
        "snapshot payload",
    );
}

// ----------------------------------------------------------------------------
// Multi-cell runs: cells evolve independently, inner orbits drain faster.
// ----------------------------------------------------------------------------

#[test]
fn cells_at_different_radii_evolve_independently() {
    let mut config = base_config();
    config.cells.radii_rmars = vec![2.0, 4.0];
    config.grid = GridConfig {
        s_min: 1e-6,
        s_max: 2e-6,
        k: 1,
        rho: 3270.0,
    };
    config.initial_psd.kind = InitialPsdKind::Weights;
    config.initial_psd.weights = vec![1.0];
    config.initial_psd.sigma_surf0 = 1.0;
    config.radiation.chi_blow = ChiBlowConfig::Fixed(1.0);
    config.numerics.dt_init_s = 50.0;
    config.numerics.t_end_years = Some(10_000.0 / YEAR);

    let (driver, summary) = run_quiet(config);
    assert_eq!(summary.cells.len(), 2);

    // t_blow = 1/Omega grows with r^1.5: the inner cell must have lost more.
    let inner = &driver.cells[0];
    let outer = &driver.cells[1];
    assert!(
        inner.cum.m_loss_blow > outer.cum.m_loss_blow,
        "inner cell loses faster: {} vs {}",
        inner.cum.m_loss_blow,
        outer.cum.m_loss_blow
    );
    assert!(outer.cum.m_loss_blow > 0.0);
    assert_close(
        summary.total_m_loss_blow,
        inner.cum.m_loss_blow + outer.cum.m_loss_blow,
        1e-12,
        "summary aggregates per-cell losses",
    );
}

// ----------------------------------------------------------------------------
// Shipped sample configuration loads and builds a driver.
// ----------------------------------------------------------------------------

#[test]
fn nominal_sample_config_builds() {
    let root_dir = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let path = root_dir.join("configs/nominal.toml");
    assert!(path.exists(), "sample config not found: {:?}", path);

    let config = Config::load(&path).expect("nominal.toml must validate");
    assert_eq!(config.grid.k, 40);
    assert!(config.supply.feedback.enabled);

    let driver = Driver::new(config).expect("driver builds from the sample");
    assert_eq!(driver.cells.len(), 1);
    assert!(driver.cells[0].sigma_surf > 0.0);
}

// ----------------------------------------------------------------------------
// Full artifact set through the master pipeline.
// ----------------------------------------------------------------------------

#[test]
fn run_simulation_writes_all_artifacts() {
    let mut config = base_config();
    config.grid = GridConfig {
        s_min: 1e-6,
        s_max: 2e-6,
        k: 1,
        rho: 3270.0,
    };
    config.initial_psd.kind = InitialPsdKind::Weights;
    config.initial_psd.weights = vec![1.0];
    config.initial_psd.sigma_surf0 = 1.0;
    config.numerics.dt_init_s = 100.0;
    config.numerics.t_end_years = Some(5000.0 / YEAR);
    config.output.psd_stride = 10;

    let dir = tempfile::tempdir().expect("tempdir");
    let summary = run_simulation(config, dir.path(), None).expect("run");

    assert!(dir.path().join("series.csv").exists());
    assert!(dir.path().join("psd_history.csv").exists());
    assert!(dir.path().join("mass_budget.csv").exists());
    assert!(dir.path().join("summary.json").exists());

    let series = std::fs::read_to_string(dir.path().join("series.csv")).unwrap();
    assert!(series.lines().count() > 10, "series rows were emitted");
    assert!(series.lines().next().unwrap().starts_with("time_s,dt_s,cell_index"));

    let json = std::fs::read_to_string(dir.path().join("summary.json")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).expect("valid JSON summary");
    assert_eq!(parsed["cells"].as_array().unwrap().len(), 1);
    assert!(summary.n_steps >= 50);
}
