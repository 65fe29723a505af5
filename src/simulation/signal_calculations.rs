//! Radio signal calculations.
//!
//! Contains helpers for:
//! - Power unit conversions (dBm, mW, dB, linear)
//! - Thermal noise floor of a receiver
//! - Path loss models: free space, two-ray ground reflection and
//!   log-distance with optional log-normal shadowing
//! - Propagation delay
//!
//! Units:
//! - Power: dBm, mW
//! - Distance: meters
//! - Frequency: Hz

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;
use std::f64::consts::PI;
use std::time::Duration;

use super::types::SPEED_OF_LIGHT;

/// Boltzmann constant in J/K.
pub const BOLTZMANN_CONSTANT: f64 = 1.380_649e-23;

/// Distances below this are evaluated at this distance.
pub const MIN_PATH_LOSS_DISTANCE: f64 = 1.0;

/// Path loss model selection.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum PathLossModel {
    /// Friis free-space propagation.
    FreeSpace,
    /// Free space up to the crossover distance, then ground-reflection (d⁴) loss.
    TwoRay,
    /// `PL(d) = PL(d₀) + 10 × n × log₁₀(d/d₀)` with d₀ = 1 m.
    LogDistance {
        /// Path loss exponent (n). 2.0 free space, 2.7 to 3.5 urban.
        path_loss_exponent: f64,
        /// Path loss at the 1 m reference distance in dB.
        path_loss_at_reference_distance: f64,
    },
}

/// Parameters defining the radio channel propagation model.
#[derive(Debug, Deserialize, Clone)]
pub struct PathLossParameters {
    #[serde(flatten)]
    pub model: PathLossModel,
    /// Standard deviation for log-normal shadowing (σ) in dB. 0 disables shadowing.
    #[serde(default)]
    pub shadowing_sigma: f64,
}

/// Link geometry needed by the frequency- and height-dependent models.
#[derive(Debug, Clone, Copy)]
pub struct LinkGeometry {
    pub frequency_hz: f64,
    pub tx_antenna_height: f64,
    pub rx_antenna_height: f64,
}

/// Convert power from dBm to milliwatts: `P(mW) = 10^(P(dBm) / 10)`.
///
/// ```text
/// 0 dBm   → 1 mW
/// 20 dBm  → 100 mW
/// -10 dBm → 0.1 mW
/// ```
pub fn dbm_to_mw(dbm: f64) -> f64 {
    10f64.powf(dbm / 10.0)
}

/// Convert power from milliwatts to dBm: `P(dBm) = 10 × log₁₀(P(mW))`.
///
/// Returns `-inf` for zero power.
pub fn mw_to_dbm(mw: f64) -> f64 {
    10.0 * mw.log10()
}

pub fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

pub fn linear_to_db(linear: f64) -> f64 {
    10.0 * linear.log10()
}

/// Thermal noise power (mW) seen by a receiver.
///
/// ```text
/// N = k × T × F × B
/// ```
///
/// with `k` the Boltzmann constant, `T` the temperature in Kelvin, `F` the
/// linear noise factor and `B` the bandwidth in Hz. The product is in watts
/// and is scaled to milliwatts.
pub fn thermal_noise_mw(temperature_k: f64, noise_factor: f64, bandwidth_hz: f64) -> f64 {
    BOLTZMANN_CONSTANT * temperature_k * noise_factor * bandwidth_hz * 1000.0
}

pub fn wavelength(frequency_hz: f64) -> f64 {
    SPEED_OF_LIGHT / frequency_hz
}

/// Free-space path loss in dB: `20 log₁₀(4πd / λ)`.
pub fn free_space_path_loss(distance: f64, frequency_hz: f64) -> f64 {
    let d = distance.max(MIN_PATH_LOSS_DISTANCE);
    20.0 * (4.0 * PI * d / wavelength(frequency_hz)).log10()
}

/// Two-ray ground reflection path loss in dB.
///
/// Below the crossover distance `4π h_t h_r / λ` the free-space model applies;
/// beyond it the loss is `40 log₁₀(d) − 20 log₁₀(h_t h_r)`.
pub fn two_ray_path_loss(distance: f64, geometry: &LinkGeometry) -> f64 {
    let d = distance.max(MIN_PATH_LOSS_DISTANCE);
    let heights = geometry.tx_antenna_height * geometry.rx_antenna_height;
    let crossover = 4.0 * PI * heights / wavelength(geometry.frequency_hz);
    if d < crossover {
        free_space_path_loss(d, geometry.frequency_hz)
    } else {
        40.0 * d.log10() - 20.0 * heights.log10()
    }
}

/// Deterministic path loss in dB (no shadowing term).
pub fn mean_path_loss(distance: f64, params: &PathLossParameters, geometry: &LinkGeometry) -> f64 {
    match &params.model {
        PathLossModel::FreeSpace => free_space_path_loss(distance, geometry.frequency_hz),
        PathLossModel::TwoRay => two_ray_path_loss(distance, geometry),
        PathLossModel::LogDistance {
            path_loss_exponent,
            path_loss_at_reference_distance,
        } => {
            let d = distance.max(MIN_PATH_LOSS_DISTANCE);
            path_loss_at_reference_distance + 10.0 * path_loss_exponent * d.log10()
        }
    }
}

/// Path loss in dB including a log-normal shadowing sample `X_σ ~ Normal(0, σ)`.
///
/// Each call samples a new shadowing value, so repeated calls with the same
/// distance yield different results when `shadowing_sigma > 0`.
pub fn sample_path_loss<R: Rng + ?Sized>(distance: f64, params: &PathLossParameters, geometry: &LinkGeometry, rng: &mut R) -> f64 {
    let mean = mean_path_loss(distance, params, geometry);
    if params.shadowing_sigma <= 0.0 {
        return mean;
    }
    match Normal::new(0.0, params.shadowing_sigma) {
        Ok(normal) => mean + normal.sample(rng),
        Err(err) => {
            log::warn!("Invalid shadowing sigma {}: {}", params.shadowing_sigma, err);
            mean
        }
    }
}

/// Time for a signal to travel `distance` meters.
pub fn propagation_delay(distance: f64) -> Duration {
    Duration::from_secs_f64(distance.max(0.0) / SPEED_OF_LIGHT)
}
