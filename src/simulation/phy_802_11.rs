//! 802.11a/b rate tables and frame timing.
//!
//! A `PhyProfile` bundles everything that is shared by all radios of one
//! standard: the data rates with their modulation and sensitivity, the
//! channel bandwidth, PLCP timing and one BER table per data rate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::ber::{BerTable, Modulation};
use super::signal_calculations::dbm_to_mw;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum PhyStandard {
    #[serde(rename = "802.11a")]
    Ieee80211a,
    #[serde(rename = "802.11b")]
    Ieee80211b,
}

/// One entry of the rate table.
#[derive(Debug, Clone)]
pub struct DataRate {
    pub bits_per_second: f64,
    pub modulation: Modulation,
    /// Coding gain applied on top of the uncoded modulation curve.
    pub coding_gain_db: f64,
    /// Minimum received power for the PHY to lock onto a frame at this rate.
    pub sensitivity_dbm: f64,
    /// Data bits per OFDM symbol (802.11a only).
    pub data_bits_per_symbol: u32,
}

impl DataRate {
    pub fn mbps(&self) -> f64 {
        self.bits_per_second / 1e6
    }
}

// 802.11a OFDM timing.
const OFDM_PREAMBLE: Duration = Duration::from_micros(16);
const OFDM_SIGNAL: Duration = Duration::from_micros(4);
const OFDM_SYMBOL_MICROS: u64 = 4;
const OFDM_SERVICE_BITS: u64 = 16;
const OFDM_TAIL_BITS: u64 = 6;

// 802.11b DSSS long preamble (144 µs) plus PLCP header (48 µs).
const DSSS_PLCP_OVERHEAD: Duration = Duration::from_micros(192);

/// (Mbps, modulation, coding gain dB, sensitivity dBm, data bits per symbol)
const RATES_80211A: [(f64, Modulation, f64, f64, u32); 8] = [
    (6.0, Modulation::Bpsk, 5.0, -82.0, 24),
    (9.0, Modulation::Bpsk, 3.0, -81.0, 36),
    (12.0, Modulation::Qpsk, 5.0, -79.0, 48),
    (18.0, Modulation::Qpsk, 3.0, -77.0, 72),
    (24.0, Modulation::Qam16, 5.0, -74.0, 96),
    (36.0, Modulation::Qam16, 3.0, -70.0, 144),
    (48.0, Modulation::Qam64, 4.0, -66.0, 192),
    (54.0, Modulation::Qam64, 3.0, -65.0, 216),
];

const RATES_80211B: [(f64, Modulation, f64, f64, u32); 4] = [
    (1.0, Modulation::Dbpsk, 0.0, -94.0, 0),
    (2.0, Modulation::Dqpsk, 0.0, -91.0, 0),
    (5.5, Modulation::Cck55, 0.0, -87.0, 0),
    (11.0, Modulation::Cck11, 0.0, -83.0, 0),
];

/// Shared, read-only description of a PHY standard.
#[derive(Debug, Clone)]
pub struct PhyProfile {
    pub standard: PhyStandard,
    pub bandwidth_hz: f64,
    rates: Vec<DataRate>,
    ber_tables: Vec<BerTable>,
}

impl PhyProfile {
    /// Build the default profile of `standard` with analytically generated BER tables.
    pub fn new(standard: PhyStandard) -> Self {
        let (bandwidth_hz, table): (f64, &[(f64, Modulation, f64, f64, u32)]) = match standard {
            PhyStandard::Ieee80211a => (20e6, &RATES_80211A),
            PhyStandard::Ieee80211b => (22e6, &RATES_80211B),
        };
        let rates: Vec<DataRate> = table
            .iter()
            .map(|&(mbps, modulation, coding_gain_db, sensitivity_dbm, data_bits_per_symbol)| DataRate {
                bits_per_second: mbps * 1e6,
                modulation,
                coding_gain_db,
                sensitivity_dbm,
                data_bits_per_symbol,
            })
            .collect();
        let ber_tables = rates
            .iter()
            .map(|rate| BerTable::generate(rate.modulation, bandwidth_hz, rate.bits_per_second, rate.coding_gain_db))
            .collect();
        Self {
            standard,
            bandwidth_hz,
            rates,
            ber_tables,
        }
    }

    /// Replace the BER table of one data rate (e.g. with a table loaded from file).
    pub fn set_ber_table(&mut self, rate_index: usize, table: BerTable) -> bool {
        match self.ber_tables.get_mut(rate_index) {
            Some(slot) => {
                *slot = table;
                true
            }
            None => false,
        }
    }

    pub fn rates(&self) -> &[DataRate] {
        &self.rates
    }

    pub fn rate(&self, index: usize) -> Option<&DataRate> {
        self.rates.get(index)
    }

    pub fn ber_table(&self, index: usize) -> Option<&BerTable> {
        self.ber_tables.get(index)
    }

    /// Index of the rate with the given nominal speed in Mbps.
    pub fn rate_index(&self, mbps: f64) -> Option<usize> {
        self.rates.iter().position(|r| (r.mbps() - mbps).abs() < 1e-6)
    }

    /// Sensitivity of the most robust rate; drives carrier sensing.
    pub fn carrier_sense_threshold_mw(&self) -> f64 {
        self.rates.first().map_or(f64::INFINITY, |r| dbm_to_mw(r.sensitivity_dbm))
    }

    /// On-air duration of a frame of `payload_bytes` at `rate_index`, PLCP
    /// preamble and header included. `None` for an unknown rate.
    pub fn frame_duration(&self, rate_index: usize, payload_bytes: usize) -> Option<Duration> {
        let rate = self.rates.get(rate_index)?;
        let payload_bits = payload_bytes as u64 * 8;
        let duration = match self.standard {
            PhyStandard::Ieee80211a => {
                let bits = OFDM_SERVICE_BITS + payload_bits + OFDM_TAIL_BITS;
                let symbols = bits.div_ceil(u64::from(rate.data_bits_per_symbol));
                OFDM_PREAMBLE + OFDM_SIGNAL + Duration::from_micros(symbols * OFDM_SYMBOL_MICROS)
            }
            PhyStandard::Ieee80211b => {
                let micros = (payload_bits as f64 / rate.mbps()).ceil() as u64;
                DSSS_PLCP_OVERHEAD + Duration::from_micros(micros)
            }
        };
        Some(duration)
    }
}
