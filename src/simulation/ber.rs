//! Bit error model.
//!
//! A `BerTable` maps SINR (dB) to a bit error rate. Tables are either
//! generated from closed-form modulation curves or loaded from a text file
//! with one `snr_db ber` pair per line. Lookups interpolate linearly between
//! entries and clamp outside the table range.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

use super::signal_calculations::db_to_linear;

/// SINR range (dB) and step covered by generated tables.
const GENERATED_MIN_SNR_DB: f64 = -10.0;
const GENERATED_MAX_SNR_DB: f64 = 40.0;
const GENERATED_STEP_DB: f64 = 0.5;

/// Modulations the 802.11a/b rate tables are built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modulation {
    Bpsk,
    Qpsk,
    Qam16,
    Qam64,
    Dbpsk,
    Dqpsk,
    Cck55,
    Cck11,
}

/// How the PHY decides that a locked packet is corrupted.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReceptionModel {
    /// Stochastic bit errors drawn from the BER table of the data rate.
    #[default]
    BerBased,
    /// The packet is lost as soon as the SINR drops below the threshold.
    SnrThreshold { threshold_db: f64 },
}

#[derive(Debug, Error)]
pub enum BerTableError {
    #[error("BER table is empty")]
    Empty,
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("SNR values must be strictly increasing (entry {index})")]
    NotIncreasing { index: usize },
    #[error("BER {ber} at entry {index} is outside [0, 1]")]
    InvalidBer { index: usize, ber: f64 },
    #[error("failed to read BER table: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BerEntry {
    pub snr_db: f64,
    pub ber: f64,
}

/// SNR-indexed bit error rate table.
#[derive(Debug, Clone)]
pub struct BerTable {
    entries: Vec<BerEntry>,
}

impl BerTable {
    /// Build a table from `(snr_db, ber)` pairs sorted by strictly increasing SNR.
    pub fn from_entries(pairs: impl IntoIterator<Item = (f64, f64)>) -> Result<Self, BerTableError> {
        let entries: Vec<BerEntry> = pairs.into_iter().map(|(snr_db, ber)| BerEntry { snr_db, ber }).collect();
        if entries.is_empty() {
            return Err(BerTableError::Empty);
        }
        for (index, entry) in entries.iter().enumerate() {
            if !(0.0..=1.0).contains(&entry.ber) {
                return Err(BerTableError::InvalidBer { index, ber: entry.ber });
            }
            if index > 0 && entry.snr_db <= entries[index - 1].snr_db {
                return Err(BerTableError::NotIncreasing { index });
            }
        }
        Ok(Self { entries })
    }

    /// Parse the text format: whitespace separated `snr_db ber` pairs, one per
    /// line. Blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Result<Self, BerTableError> {
        let mut pairs = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (Some(snr), Some(ber), None) = (fields.next(), fields.next(), fields.next()) else {
                return Err(BerTableError::Parse {
                    line: idx + 1,
                    message: format!("expected two columns, got '{line}'"),
                });
            };
            let parse = |field: &str| {
                field.parse::<f64>().map_err(|e| BerTableError::Parse {
                    line: idx + 1,
                    message: format!("'{field}': {e}"),
                })
            };
            pairs.push((parse(snr)?, parse(ber)?));
        }
        Self::from_entries(pairs)
    }

    pub fn load(path: &Path) -> Result<Self, BerTableError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Generate a table from the closed-form curve of `modulation`.
    ///
    /// The SINR is converted to Eb/N0 with the bandwidth-to-bitrate ratio and
    /// the coding gain of the forward error correction is added on top.
    pub fn generate(modulation: Modulation, bandwidth_hz: f64, bit_rate: f64, coding_gain_db: f64) -> Self {
        let processing_gain = bandwidth_hz / bit_rate;
        let steps = ((GENERATED_MAX_SNR_DB - GENERATED_MIN_SNR_DB) / GENERATED_STEP_DB).round() as usize;
        let entries = (0..=steps)
            .map(|i| {
                let snr_db = GENERATED_MIN_SNR_DB + i as f64 * GENERATED_STEP_DB;
                let eb_n0 = db_to_linear(snr_db + coding_gain_db) * processing_gain;
                BerEntry {
                    snr_db,
                    ber: modulation_ber(modulation, eb_n0),
                }
            })
            .collect();
        Self { entries }
    }

    #[cfg(test)]
    pub fn entries(&self) -> &[BerEntry] {
        &self.entries
    }

    /// BER at `sinr_db`, linearly interpolated between neighbouring entries.
    pub fn lookup(&self, sinr_db: f64) -> f64 {
        let first = self.entries[0];
        let last = self.entries[self.entries.len() - 1];
        if sinr_db.is_nan() || sinr_db <= first.snr_db {
            return first.ber;
        }
        if sinr_db >= last.snr_db {
            return last.ber;
        }
        // First entry strictly above the SINR; guaranteed to be in 1..len.
        let upper = self.entries.partition_point(|e| e.snr_db <= sinr_db);
        let lo = self.entries[upper - 1];
        let hi = self.entries[upper];
        let t = (sinr_db - lo.snr_db) / (hi.snr_db - lo.snr_db);
        lo.ber + t * (hi.ber - lo.ber)
    }
}

/// Probability that at least one of `bits` bits is corrupted, assuming
/// independent errors: `1 − (1 − BER)^bits`.
pub fn packet_error_rate(ber: f64, bits: f64) -> f64 {
    if bits <= 0.0 || ber <= 0.0 {
        return 0.0;
    }
    if ber >= 1.0 {
        return 1.0;
    }
    // ln_1p keeps precision for tiny BERs.
    (1.0 - (bits * (-ber).ln_1p()).exp()).clamp(0.0, 1.0)
}

/// Closed-form BER approximations as a function of linear Eb/N0.
fn modulation_ber(modulation: Modulation, eb_n0: f64) -> f64 {
    let ber = match modulation {
        Modulation::Bpsk | Modulation::Qpsk => q_function((2.0 * eb_n0).sqrt()),
        Modulation::Qam16 => 0.375 * erfc((0.4 * eb_n0).sqrt()),
        Modulation::Qam64 => (7.0 / 24.0) * erfc((eb_n0 / 7.0).sqrt()),
        Modulation::Dbpsk => 0.5 * (-eb_n0).exp(),
        // Differential detection costs about 2.3 dB against coherent QPSK.
        Modulation::Dqpsk => q_function((2.0 * eb_n0 / 1.7).sqrt()),
        // CCK: QPSK chips with a reduced spreading gain at the higher rate.
        Modulation::Cck55 => q_function((2.0 * eb_n0 / 1.3).sqrt()),
        Modulation::Cck11 => q_function((2.0 * eb_n0 / 2.0).sqrt()),
    };
    ber.clamp(0.0, 0.5)
}

/// Q-function: `Q(x) = 0.5 × erfc(x / √2)`.
fn q_function(x: f64) -> f64 {
    0.5 * erfc(x / std::f64::consts::SQRT_2)
}

/// Complementary error function (Abramowitz & Stegun 7.1.26, error < 1.5e-7).
fn erfc(x: f64) -> f64 {
    if x < 0.0 {
        return 2.0 - erfc(-x);
    }
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t * (0.254_829_592 + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    poly * (-x * x).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_interpolates_and_clamps() {
        let table = BerTable::from_entries([(0.0, 0.1), (10.0, 0.001), (20.0, 0.0)]).unwrap();
        assert_eq!(table.lookup(-5.0), 0.1);
        assert_eq!(table.lookup(25.0), 0.0);
        assert!((table.lookup(5.0) - 0.0505).abs() < 1e-12);
        assert!((table.lookup(15.0) - 0.0005).abs() < 1e-12);
        assert_eq!(table.lookup(10.0), 0.001);
    }

    #[test]
    fn from_entries_rejects_bad_tables() {
        assert!(matches!(BerTable::from_entries(Vec::new()), Err(BerTableError::Empty)));
        assert!(matches!(
            BerTable::from_entries([(1.0, 0.1), (1.0, 0.01)]),
            Err(BerTableError::NotIncreasing { index: 1 })
        ));
        assert!(matches!(BerTable::from_entries([(1.0, 1.5)]), Err(BerTableError::InvalidBer { index: 0, .. })));
    }

    #[test]
    fn parse_skips_comments_and_reports_lines() {
        let text = "# snr ber\n\n0.0 0.5\n5.0 1e-3 # trailing\n10.0 0\n";
        let table = BerTable::parse(text).unwrap();
        assert_eq!(table.entries().len(), 3);
        assert_eq!(table.entries()[1], BerEntry { snr_db: 5.0, ber: 1e-3 });

        match BerTable::parse("0.0 0.5\n1.0\n") {
            Err(BerTableError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(BerTable::parse("abc 0.1"), Err(BerTableError::Parse { line: 1, .. })));
    }

    #[test]
    fn erfc_known_values() {
        assert!((erfc(0.0) - 1.0).abs() < 1e-6);
        assert!((erfc(1.0) - 0.157_299_2).abs() < 1e-6);
        assert!((erfc(-1.0) - 1.842_700_8).abs() < 1e-6);
    }

    #[test]
    fn generated_tables_are_monotonic_and_ordered_by_robustness() {
        let bpsk = BerTable::generate(Modulation::Bpsk, 20e6, 6e6, 0.0);
        let qam64 = BerTable::generate(Modulation::Qam64, 20e6, 54e6, 0.0);
        for pair in bpsk.entries().windows(2) {
            assert!(pair[1].ber <= pair[0].ber);
        }
        for snr in [0.0, 5.0, 10.0, 15.0] {
            assert!(bpsk.lookup(snr) < qam64.lookup(snr), "at {snr} dB");
        }
        assert!(bpsk.lookup(40.0) < 1e-12);
        assert!(qam64.lookup(-10.0) > 0.1);
    }

    #[test]
    fn packet_error_rate_grows_with_bits() {
        assert_eq!(packet_error_rate(0.0, 8000.0), 0.0);
        assert_eq!(packet_error_rate(1e-3, 0.0), 0.0);
        assert_eq!(packet_error_rate(1.0, 1.0), 1.0);
        let short = packet_error_rate(1e-5, 800.0);
        let long = packet_error_rate(1e-5, 8000.0);
        assert!(short < long);
        assert!((long - (1.0 - (1.0 - 1e-5f64).powf(8000.0))).abs() < 1e-12);
    }
}
