//! Propagation range search.
//!
//! Finds the distance at which the packet error rate of a frame crosses a
//! threshold using the deterministic path loss (no shadowing, no obstacles).
//! The upper bound is found by doubling an initial guess, then the interval is
//! bisected down to the requested tolerance.

use serde::Serialize;

use super::ber::{ReceptionModel, packet_error_rate};
use super::phy::PhyError;
use super::phy_802_11::PhyProfile;
use super::signal_calculations::{LinkGeometry, MIN_PATH_LOSS_DISTANCE, PathLossParameters, mean_path_loss, mw_to_dbm};

#[derive(Debug, Clone)]
pub struct RangeQuery {
    pub data_rate: usize,
    pub payload_bytes: usize,
    pub reception_model: ReceptionModel,
    pub tx_power_dbm: f64,
    pub tx_gain_dbi: f64,
    pub rx_gain_dbi: f64,
    pub per_threshold: f64,
    pub tolerance_m: f64,
    pub initial_guess_m: f64,
    pub max_distance_m: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RangeResult {
    pub data_rate_mbps: f64,
    pub distance_m: f64,
    pub packet_error_rate: f64,
    /// The search hit `max_distance_m` without crossing the threshold.
    pub capped: bool,
}

/// PER of a frame received at `distance` meters.
///
/// A received power below the sensitivity of the data rate cannot be locked
/// and counts as a lost frame. Bits are counted over the whole frame duration,
/// preamble included, the same way the PHY evaluates a locked signal.
pub fn packet_error_rate_at(distance: f64, query: &RangeQuery, profile: &PhyProfile, path_loss: &PathLossParameters, geometry: &LinkGeometry, noise_mw: f64) -> Result<f64, PhyError> {
    let rate = profile.rate(query.data_rate).ok_or(PhyError::UnknownDataRate(query.data_rate))?;
    let table = profile.ber_table(query.data_rate).ok_or(PhyError::UnknownDataRate(query.data_rate))?;

    let rx_dbm = query.tx_power_dbm + query.tx_gain_dbi + query.rx_gain_dbi - mean_path_loss(distance, path_loss, geometry);
    if rx_dbm < rate.sensitivity_dbm {
        return Ok(1.0);
    }
    let sinr_db = rx_dbm - mw_to_dbm(noise_mw);
    match query.reception_model {
        ReceptionModel::SnrThreshold { threshold_db } => Ok(if sinr_db < threshold_db { 1.0 } else { 0.0 }),
        ReceptionModel::BerBased => {
            let duration = profile.frame_duration(query.data_rate, query.payload_bytes).ok_or(PhyError::UnknownDataRate(query.data_rate))?;
            let bits = duration.as_secs_f64() * rate.bits_per_second;
            Ok(packet_error_rate(table.lookup(sinr_db), bits))
        }
    }
}

/// Largest distance at which the PER stays at or below `per_threshold`.
///
/// Returns a distance of zero when even the minimum path loss distance fails.
pub fn propagation_range(query: &RangeQuery, profile: &PhyProfile, path_loss: &PathLossParameters, geometry: &LinkGeometry, noise_mw: f64) -> Result<RangeResult, PhyError> {
    let per = |d: f64| packet_error_rate_at(d, query, profile, path_loss, geometry, noise_mw);
    let data_rate_mbps = profile.rate(query.data_rate).map_or(0.0, |r| r.mbps());
    let result = |distance_m: f64, packet_error_rate: f64, capped: bool| RangeResult {
        data_rate_mbps,
        distance_m,
        packet_error_rate,
        capped,
    };

    let min_distance = MIN_PATH_LOSS_DISTANCE;
    let at_min = per(min_distance)?;
    if at_min > query.per_threshold {
        log::debug!("PER {:.3} already above threshold at {} m", at_min, min_distance);
        return Ok(result(0.0, at_min, false));
    }

    let max_distance = query.max_distance_m.max(min_distance);
    let mut lower = min_distance;
    let mut upper = query.initial_guess_m.clamp(min_distance, max_distance);
    loop {
        if per(upper)? > query.per_threshold {
            break;
        }
        lower = upper;
        if upper >= max_distance {
            log::warn!("range search capped at {} m", max_distance);
            let at_max = per(max_distance)?;
            return Ok(result(max_distance, at_max, true));
        }
        upper = (upper * 2.0).min(max_distance);
    }

    let tolerance = query.tolerance_m.max(f64::EPSILON);
    let mut iterations = 0;
    while upper - lower > tolerance {
        let mid = 0.5 * (lower + upper);
        // Adjacent floats: the interval cannot shrink any further.
        if mid <= lower || mid >= upper {
            break;
        }
        if per(mid)? <= query.per_threshold {
            lower = mid;
        } else {
            upper = mid;
        }
        iterations += 1;
    }
    log::debug!("range search converged after {} bisections: {:.2} m", iterations, lower);
    Ok(result(lower, per(lower)?, false))
}
