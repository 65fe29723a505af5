//! Antenna gain models.
//!
//! Omnidirectional antennas have a constant gain. Steerable and switched-beam
//! antennas receive with their omni gain while idle; when the PHY locks onto a
//! signal the antenna is pointed toward it and subsequent arrivals see the
//! directional pattern until the lock is released.

use serde::Deserialize;
use std::f64::consts::PI;

use super::geometry::{angle_between, normalize_angle};

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AntennaConfig {
    Omnidirectional {
        #[serde(default)]
        gain_dbi: f64,
    },
    /// Beam that can be pointed at any bearing.
    Steerable {
        main_lobe_gain_dbi: f64,
        beamwidth_deg: f64,
        side_lobe_gain_dbi: f64,
        #[serde(default)]
        omni_gain_dbi: f64,
    },
    /// Fixed sectors; the sector containing the target bearing is selected.
    SwitchedBeam {
        sector_count: u32,
        main_lobe_gain_dbi: f64,
        side_lobe_gain_dbi: f64,
        #[serde(default)]
        omni_gain_dbi: f64,
    },
}

impl Default for AntennaConfig {
    fn default() -> Self {
        AntennaConfig::Omnidirectional { gain_dbi: 0.0 }
    }
}

/// Runtime antenna state of one radio.
#[derive(Debug, Clone)]
pub struct Antenna {
    config: AntennaConfig,
    /// Bearing the antenna is locked to while receiving.
    locked_bearing: Option<f64>,
}

impl Antenna {
    pub fn new(config: AntennaConfig) -> Self {
        Self { config, locked_bearing: None }
    }

    pub fn is_directional(&self) -> bool {
        !matches!(self.config, AntennaConfig::Omnidirectional { .. })
    }

    #[cfg(test)]
    pub fn locked_bearing(&self) -> Option<f64> {
        self.locked_bearing
    }

    /// Point the antenna toward `bearing`. For switched-beam antennas the lock
    /// snaps to the center of the sector containing the bearing. No effect on
    /// omnidirectional antennas.
    pub fn lock_toward(&mut self, bearing: f64) {
        self.locked_bearing = match &self.config {
            AntennaConfig::Omnidirectional { .. } => None,
            AntennaConfig::Steerable { .. } => Some(normalize_angle(bearing)),
            AntennaConfig::SwitchedBeam { sector_count, .. } => {
                let width = sector_width(*sector_count);
                let sector = (normalize_angle(bearing) / width).floor();
                Some(normalize_angle((sector + 0.5) * width))
            }
        };
    }

    pub fn unlock(&mut self) {
        self.locked_bearing = None;
    }

    /// Receive gain for a signal arriving from `bearing` given the current lock.
    pub fn rx_gain_dbi(&self, bearing: f64) -> f64 {
        match self.locked_bearing {
            Some(steer) => self.pattern_gain(steer, bearing),
            None => self.omni_gain(),
        }
    }

    /// Transmit gain toward `bearing` with the beam pointed at `direction`,
    /// or the omni gain when no direction is given.
    pub fn tx_gain_dbi(&self, bearing: f64, direction: Option<f64>) -> f64 {
        match direction {
            Some(steer) if self.is_directional() => {
                let steer = match &self.config {
                    AntennaConfig::SwitchedBeam { sector_count, .. } => {
                        let width = sector_width(*sector_count);
                        (normalize_angle(steer) / width).floor() * width + width / 2.0
                    }
                    _ => steer,
                };
                self.pattern_gain(steer, bearing)
            }
            _ => self.omni_gain(),
        }
    }

    fn omni_gain(&self) -> f64 {
        match &self.config {
            AntennaConfig::Omnidirectional { gain_dbi } => *gain_dbi,
            AntennaConfig::Steerable { omni_gain_dbi, .. } | AntennaConfig::SwitchedBeam { omni_gain_dbi, .. } => *omni_gain_dbi,
        }
    }

    fn pattern_gain(&self, steer: f64, bearing: f64) -> f64 {
        match &self.config {
            AntennaConfig::Omnidirectional { gain_dbi } => *gain_dbi,
            AntennaConfig::Steerable {
                main_lobe_gain_dbi,
                beamwidth_deg,
                side_lobe_gain_dbi,
                ..
            } => {
                if angle_between(steer, bearing) <= beamwidth_deg.to_radians() / 2.0 {
                    *main_lobe_gain_dbi
                } else {
                    *side_lobe_gain_dbi
                }
            }
            AntennaConfig::SwitchedBeam {
                sector_count,
                main_lobe_gain_dbi,
                side_lobe_gain_dbi,
                ..
            } => {
                let width = sector_width(*sector_count);
                let steer_sector = (normalize_angle(steer) / width).floor();
                let bearing_sector = (normalize_angle(bearing) / width).floor();
                if steer_sector == bearing_sector {
                    *main_lobe_gain_dbi
                } else {
                    *side_lobe_gain_dbi
                }
            }
        }
    }
}

fn sector_width(sector_count: u32) -> f64 {
    2.0 * PI / f64::from(sector_count.max(1))
}
