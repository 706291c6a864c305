//! Physical constants in SI units.

/// Gravitational constant [m^3 kg^-1 s^-2].
pub const G: f64 = 6.674_30e-11;

/// Stefan-Boltzmann constant [W m^-2 K^-4].
pub const SIGMA_SB: f64 = 5.670_374_419e-8;

/// Speed of light [m s^-1].
pub const C_LIGHT: f64 = 2.997_924_58e8;

/// Universal gas constant [J mol^-1 K^-1].
pub const R_GAS: f64 = 8.314_462_618;

/// Mars mass [kg].
pub const M_MARS: f64 = 6.417_1e23;

/// Mars mean radius [m].
pub const R_MARS: f64 = 3.389_5e6;

/// Julian year [s].
pub const YEAR: f64 = 3.155_76e7;

/// Keplerian angular frequency at orbital radius `r` [rad s^-1].
pub fn omega_kepler(r: f64) -> f64 {
    (G * M_MARS / (r * r * r)).sqrt()
}

/// Orbital period at radius `r` [s].
pub fn orbital_period(r: f64) -> f64 {
    2.0 * std::f64::consts::PI / omega_kepler(r)
}
