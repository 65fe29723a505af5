//! Radio PHY state machine.
//!
//! Each radio owns a `PhyState` that tracks its mode, the interference it
//! hears, its thermal noise floor and at most one locked incoming signal.
//! The channel layer (`network`) feeds it signal arrival and end events; the
//! MAC drives transmissions. Every call returns the indications destined for
//! the MAC, in the order they happened.
//!
//! ```text
//!            lock                     end of locked signal
//!   Idle ───────────▶ Receiving ─────────────────────────────▶ Idle / Sensing
//!    ▲ │ I+N ≥ CS         │ start_transmit (lock dropped)
//!    │ ▼                  ▼
//!  Sensing           Transmitting ──end_transmit──▶ Idle / Sensing
//! ```
//!
//! `TrxOff` is entered and left explicitly with `turn_off` / `turn_on`.

use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::antenna::Antenna;
use super::ber::{ReceptionModel, packet_error_rate};
use super::phy_802_11::PhyProfile;
use super::signal_calculations::{dbm_to_mw, linear_to_db, mw_to_dbm};
use super::types::{Frame, NodeId, Signal, SignalId, SimTime};

/// Interference below this is treated as zero once no interferer remains.
const INTERFERENCE_EPSILON_MW: f64 = 1e-18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PhyMode {
    Idle,
    Sensing,
    Receiving,
    Transmitting,
    TrxOff,
}

impl fmt::Display for PhyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PhyMode::Idle => "IDLE",
            PhyMode::Sensing => "SENSING",
            PhyMode::Receiving => "RECEIVING",
            PhyMode::Transmitting => "TRANSMITTING",
            PhyMode::TrxOff => "TRX_OFF",
        };
        f.write_str(name)
    }
}

/// Notifications from the PHY to its MAC.
#[derive(Debug, Clone, PartialEq)]
pub enum PhyIndication {
    ModeChanged { old: PhyMode, new: PhyMode },
    FrameReceived { frame: Frame, sender: NodeId, rssi_dbm: f64, sinr_db: f64 },
    FrameError { frame: Frame, sender: NodeId, sinr_db: f64 },
    TransmissionFinished,
}

#[derive(Debug, Error, PartialEq)]
pub enum PhyError {
    #[error("radio is switched off")]
    TransceiverOff,
    #[error("radio is transmitting")]
    Transmitting,
    #[error("no transmission in progress")]
    NotTransmitting,
    #[error("unknown data rate index {0}")]
    UnknownDataRate(usize),
}

/// A transmission handed to the channel by `start_transmit`.
#[derive(Debug, Clone)]
pub struct Transmission {
    pub sender: NodeId,
    pub channel: usize,
    pub frame: Frame,
    pub data_rate: usize,
    pub power_dbm: f64,
    /// Beam direction for directional antennas, `None` for omni.
    pub direction: Option<f64>,
    pub start: SimTime,
    pub duration: Duration,
}

/// Per-radio counters reported at the end of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PhyStats {
    pub signals_transmitted: u64,
    pub signals_locked: u64,
    pub signals_received: u64,
    pub signals_with_errors: u64,
    pub receptions_aborted: u64,
    /// Receptions lost while another signal overlapped them.
    pub collisions: u64,
    #[serde(skip)]
    sinr_sum_db: f64,
}

impl PhyStats {
    /// Mean SINR of the signals forwarded to the MAC, `None` if there were none.
    pub fn average_sinr_db(&self) -> Option<f64> {
        (self.signals_received > 0).then(|| self.sinr_sum_db / self.signals_received as f64)
    }
}

#[derive(Debug, Clone)]
struct LockedSignal {
    signal: Signal,
    power_mw: f64,
    last_evaluated: SimTime,
    error: bool,
    /// Another signal arrived while this one was locked.
    overlapped: bool,
}

pub struct PhyState {
    node_id: NodeId,
    profile: Arc<PhyProfile>,
    reception_model: ReceptionModel,
    mode: PhyMode,
    channel: usize,
    antenna: Antenna,
    tx_power_dbm: f64,
    tx_data_rate: usize,
    noise_mw: f64,
    carrier_sense_mw: f64,
    interference_mw: f64,
    interferers: HashMap<SignalId, f64>,
    locked: Option<LockedSignal>,
    stats: PhyStats,
}

impl PhyState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: NodeId,
        profile: Arc<PhyProfile>,
        reception_model: ReceptionModel,
        antenna: Antenna,
        channel: usize,
        tx_power_dbm: f64,
        tx_data_rate: usize,
        noise_mw: f64,
    ) -> Result<Self, PhyError> {
        if profile.rate(tx_data_rate).is_none() {
            return Err(PhyError::UnknownDataRate(tx_data_rate));
        }
        let carrier_sense_mw = profile.carrier_sense_threshold_mw();
        let mut phy = Self {
            node_id,
            profile,
            reception_model,
            mode: PhyMode::Idle,
            channel,
            antenna,
            tx_power_dbm,
            tx_data_rate,
            noise_mw,
            carrier_sense_mw,
            interference_mw: 0.0,
            interferers: HashMap::new(),
            locked: None,
            stats: PhyStats::default(),
        };
        // A noise floor above the carrier-sense threshold keeps the radio sensing.
        phy.mode = phy.sensed_mode();
        Ok(phy)
    }

    pub fn mode(&self) -> PhyMode {
        self.mode
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn antenna(&self) -> &Antenna {
        &self.antenna
    }

    #[cfg(test)]
    pub fn interference_mw(&self) -> f64 {
        self.interference_mw
    }

    pub fn stats(&self) -> &PhyStats {
        &self.stats
    }

    pub fn locked_signal_id(&self) -> Option<SignalId> {
        self.locked.as_ref().map(|l| l.signal.id)
    }

    /// True when the medium is free for a transmission.
    pub fn is_medium_idle(&self) -> bool {
        self.mode == PhyMode::Idle
    }

    /// Carrier sense: busy when interference plus noise reaches the sensitivity
    /// of the most robust data rate.
    pub fn carrier_sense(&self) -> bool {
        self.interference_mw + self.noise_mw >= self.carrier_sense_mw
    }

    fn sensed_mode(&self) -> PhyMode {
        if self.carrier_sense() { PhyMode::Sensing } else { PhyMode::Idle }
    }

    fn change_mode(&mut self, new: PhyMode, out: &mut Vec<PhyIndication>) {
        if self.mode == new {
            return;
        }
        let old = self.mode;
        self.mode = new;
        log::trace!("[{}] PHY {} -> {}", self.node_id, old, new);
        out.push(PhyIndication::ModeChanged { old, new });
    }

    fn add_interference(&mut self, id: SignalId, power_mw: f64) {
        self.interferers.insert(id, power_mw);
        self.interference_mw += power_mw;
    }

    fn remove_interference(&mut self, id: SignalId) -> bool {
        let Some(power_mw) = self.interferers.remove(&id) else {
            return false;
        };
        if self.interferers.is_empty() {
            self.interference_mw = 0.0;
        } else {
            self.interference_mw -= power_mw;
            // Subtraction drift: rebuild from the remaining interferers.
            if self.interference_mw < INTERFERENCE_EPSILON_MW {
                self.interference_mw = self.interferers.values().sum::<f64>().max(0.0);
            }
        }
        true
    }

    fn is_tracked(&self, id: SignalId) -> bool {
        self.interferers.contains_key(&id) || self.locked_signal_id() == Some(id)
    }

    fn current_sinr_db(&self, power_mw: f64) -> f64 {
        linear_to_db(power_mw / (self.interference_mw + self.noise_mw))
    }

    /// Advance the error state of the locked packet to `now` using the
    /// interference that was present since the previous evaluation.
    fn evaluate_locked_error<R: Rng + ?Sized>(&mut self, now: SimTime, rng: &mut R) {
        let noise_plus_interference = self.noise_mw + self.interference_mw;
        let Some(locked) = self.locked.as_mut() else {
            return;
        };
        if !locked.error {
            let sinr_db = linear_to_db(locked.power_mw / noise_plus_interference);
            match self.reception_model {
                ReceptionModel::SnrThreshold { threshold_db } => {
                    if sinr_db < threshold_db {
                        locked.error = true;
                    }
                }
                ReceptionModel::BerBased => {
                    let rate = locked.signal.data_rate;
                    if let (Some(table), Some(data_rate)) = (self.profile.ber_table(rate), self.profile.rate(rate)) {
                        let bits = now.duration_since(locked.last_evaluated).as_secs_f64() * data_rate.bits_per_second;
                        let error_probability = packet_error_rate(table.lookup(sinr_db), bits);
                        if error_probability > 0.0 && rng.gen_range(0.0..1.0) < error_probability {
                            locked.error = true;
                        }
                    }
                }
            }
            if locked.error {
                log::trace!("[{}] signal {} corrupted at {} (SINR {:.2} dB)", self.node_id, locked.signal.id, now, sinr_db);
            }
        }
        locked.last_evaluated = now;
    }

    /// Drop the current reception. When `keep_as_interference` is set the
    /// signal stays on the air for this radio and is counted as interference.
    fn terminate_reception(&mut self, keep_as_interference: bool) {
        if let Some(locked) = self.locked.take() {
            self.antenna.unlock();
            self.stats.receptions_aborted += 1;
            log::debug!("[{}] reception of signal {} aborted", self.node_id, locked.signal.id);
            if keep_as_interference {
                self.add_interference(locked.signal.id, locked.power_mw);
            }
        }
    }

    /// First bit of `signal` reaches this radio.
    pub fn signal_arrival<R: Rng + ?Sized>(&mut self, now: SimTime, signal: Signal, rng: &mut R) -> Vec<PhyIndication> {
        let mut out = Vec::new();
        if self.is_tracked(signal.id) {
            log::warn!("[{}] duplicate arrival of signal {} ignored", self.node_id, signal.id);
            return out;
        }

        let power_dbm = signal.power_dbm + self.antenna.rx_gain_dbi(signal.arrival_bearing);
        let power_mw = dbm_to_mw(power_dbm);

        match self.mode {
            PhyMode::Idle | PhyMode::Sensing => {
                let lockable = self.profile.rate(signal.data_rate).is_some_and(|rate| power_dbm >= rate.sensitivity_dbm);
                if lockable {
                    // Point a directional antenna at the sender; the locked power
                    // is re-evaluated with the steered pattern.
                    let locked_power_mw = if self.antenna.is_directional() {
                        self.antenna.lock_toward(signal.arrival_bearing);
                        dbm_to_mw(signal.power_dbm + self.antenna.rx_gain_dbi(signal.arrival_bearing))
                    } else {
                        power_mw
                    };
                    log::trace!(
                        "[{}] locked signal {} from {} at {:.2} dBm",
                        self.node_id,
                        signal.id,
                        signal.sender,
                        mw_to_dbm(locked_power_mw)
                    );
                    self.locked = Some(LockedSignal {
                        signal,
                        power_mw: locked_power_mw,
                        last_evaluated: now,
                        error: false,
                        overlapped: false,
                    });
                    self.stats.signals_locked += 1;
                    self.change_mode(PhyMode::Receiving, &mut out);
                } else {
                    self.add_interference(signal.id, power_mw);
                    let sensed = self.sensed_mode();
                    self.change_mode(sensed, &mut out);
                }
            }
            PhyMode::Receiving => {
                self.evaluate_locked_error(now, rng);
                if let Some(locked) = self.locked.as_mut() {
                    locked.overlapped = true;
                }
                self.add_interference(signal.id, power_mw);
            }
            PhyMode::Transmitting | PhyMode::TrxOff => {
                self.add_interference(signal.id, power_mw);
            }
        }
        out
    }

    /// Last bit of signal `id` has passed this radio.
    pub fn signal_end<R: Rng + ?Sized>(&mut self, now: SimTime, id: SignalId, rng: &mut R) -> Vec<PhyIndication> {
        let mut out = Vec::new();

        if self.locked_signal_id() == Some(id) {
            self.evaluate_locked_error(now, rng);
            let Some(locked) = self.locked.take() else {
                return out;
            };
            self.antenna.unlock();
            let sinr_db = self.current_sinr_db(locked.power_mw);

            let sensed = self.sensed_mode();
            self.change_mode(sensed, &mut out);

            if locked.error {
                self.stats.signals_with_errors += 1;
                if locked.overlapped {
                    self.stats.collisions += 1;
                }
                log::debug!("[{}] signal {} from {} received with errors", self.node_id, id, locked.signal.sender);
                out.push(PhyIndication::FrameError {
                    frame: locked.signal.frame,
                    sender: locked.signal.sender,
                    sinr_db,
                });
            } else {
                self.stats.signals_received += 1;
                self.stats.sinr_sum_db += sinr_db;
                out.push(PhyIndication::FrameReceived {
                    frame: locked.signal.frame,
                    sender: locked.signal.sender,
                    rssi_dbm: mw_to_dbm(locked.power_mw),
                    sinr_db,
                });
            }
            return out;
        }

        if !self.interferers.contains_key(&id) {
            log::trace!("[{}] end of untracked signal {} ignored", self.node_id, id);
            return out;
        }

        if self.mode == PhyMode::Receiving {
            self.evaluate_locked_error(now, rng);
        }
        self.remove_interference(id);
        if matches!(self.mode, PhyMode::Idle | PhyMode::Sensing) {
            let sensed = self.sensed_mode();
            self.change_mode(sensed, &mut out);
        }
        out
    }

    /// Hand a frame to the radio for transmission at its configured rate and power.
    ///
    /// An ongoing reception is terminated first; its signal keeps counting as
    /// interference until it ends.
    pub fn start_transmit(&mut self, now: SimTime, frame: Frame, direction: Option<f64>) -> Result<(Transmission, Vec<PhyIndication>), PhyError> {
        match self.mode {
            PhyMode::TrxOff => return Err(PhyError::TransceiverOff),
            PhyMode::Transmitting => return Err(PhyError::Transmitting),
            PhyMode::Receiving => self.terminate_reception(true),
            PhyMode::Idle | PhyMode::Sensing => {}
        }
        let duration = self
            .profile
            .frame_duration(self.tx_data_rate, frame.size_bytes)
            .ok_or(PhyError::UnknownDataRate(self.tx_data_rate))?;

        let mut out = Vec::new();
        self.change_mode(PhyMode::Transmitting, &mut out);
        self.stats.signals_transmitted += 1;

        let transmission = Transmission {
            sender: self.node_id,
            channel: self.channel,
            frame,
            data_rate: self.tx_data_rate,
            power_dbm: self.tx_power_dbm,
            direction,
            start: now,
            duration,
        };
        Ok((transmission, out))
    }

    /// The last bit of our own transmission has left the antenna.
    pub fn end_transmit(&mut self, _now: SimTime) -> Result<Vec<PhyIndication>, PhyError> {
        if self.mode != PhyMode::Transmitting {
            return Err(PhyError::NotTransmitting);
        }
        let mut out = Vec::new();
        let sensed = self.sensed_mode();
        self.change_mode(sensed, &mut out);
        out.push(PhyIndication::TransmissionFinished);
        Ok(out)
    }

    /// Switch the transceiver off. Signals keep being tracked as interference
    /// so carrier sense is correct when the radio comes back.
    pub fn turn_off(&mut self, _now: SimTime) -> Result<Vec<PhyIndication>, PhyError> {
        if self.mode == PhyMode::Transmitting {
            return Err(PhyError::Transmitting);
        }
        self.terminate_reception(true);
        let mut out = Vec::new();
        self.change_mode(PhyMode::TrxOff, &mut out);
        Ok(out)
    }

    pub fn turn_on(&mut self, _now: SimTime) -> Vec<PhyIndication> {
        let mut out = Vec::new();
        if self.mode == PhyMode::TrxOff {
            let sensed = self.sensed_mode();
            self.change_mode(sensed, &mut out);
        }
        out
    }

    /// Retune the radio to `channel`.
    ///
    /// Everything heard on the old channel is forgotten, including a locked
    /// signal. `in_flight` lists the signals already on the air on the new
    /// channel; they are joined mid-frame and can only interfere.
    pub fn switch_channel(&mut self, _now: SimTime, channel: usize, in_flight: impl IntoIterator<Item = Signal>) -> Result<Vec<PhyIndication>, PhyError> {
        if self.mode == PhyMode::Transmitting {
            return Err(PhyError::Transmitting);
        }
        let mut out = Vec::new();
        if channel == self.channel {
            return Ok(out);
        }
        log::debug!("[{}] switching from channel {} to {}", self.node_id, self.channel, channel);
        self.terminate_reception(false);
        self.interferers.clear();
        self.interference_mw = 0.0;
        self.channel = channel;

        for signal in in_flight {
            if signal.channel != channel || signal.sender == self.node_id {
                continue;
            }
            let power_mw = dbm_to_mw(signal.power_dbm + self.antenna.rx_gain_dbi(signal.arrival_bearing));
            self.add_interference(signal.id, power_mw);
        }

        if self.mode != PhyMode::TrxOff {
            let sensed = self.sensed_mode();
            self.change_mode(sensed, &mut out);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::antenna::AntennaConfig;
    use crate::simulation::ber::BerTable;
    use crate::simulation::phy_802_11::PhyStandard;
    use crate::simulation::signal_calculations::thermal_noise_mw;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn phy_with(model: ReceptionModel, antenna: AntennaConfig) -> PhyState {
        let profile = Arc::new(PhyProfile::new(PhyStandard::Ieee80211a));
        let noise = thermal_noise_mw(290.0, 10.0, profile.bandwidth_hz);
        PhyState::new(1, profile, model, Antenna::new(antenna), 0, 15.0, 0, noise).unwrap()
    }

    fn phy() -> PhyState {
        phy_with(ReceptionModel::BerBased, AntennaConfig::default())
    }

    fn signal(id: SignalId, power_dbm: f64, start_us: u64, end_us: u64) -> Signal {
        Signal {
            id,
            sender: 100 + id as NodeId,
            channel: 0,
            frame: Frame {
                source: 100 + id as NodeId,
                destination: None,
                flow_id: 0,
                sequence: id as u32,
                size_bytes: 500,
                created: SimTime::ZERO,
            },
            data_rate: 0,
            power_dbm,
            arrival_bearing: 0.0,
            start: SimTime::from_micros(start_us),
            end: SimTime::from_micros(end_us),
        }
    }

    fn mode_changes(indications: &[PhyIndication]) -> Vec<(PhyMode, PhyMode)> {
        indications
            .iter()
            .filter_map(|i| match i {
                PhyIndication::ModeChanged { old, new } => Some((*old, *new)),
                _ => None,
            })
            .collect()
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn strong_signal_is_locked_and_delivered() {
        let mut phy = phy();
        let mut rng = rng();
        assert_eq!(phy.mode(), PhyMode::Idle);

        let out = phy.signal_arrival(SimTime::from_micros(0), signal(1, -50.0, 0, 700), &mut rng);
        assert_eq!(mode_changes(&out), vec![(PhyMode::Idle, PhyMode::Receiving)]);
        assert_eq!(phy.locked_signal_id(), Some(1));

        let out = phy.signal_end(SimTime::from_micros(700), 1, &mut rng);
        assert_eq!(mode_changes(&out), vec![(PhyMode::Receiving, PhyMode::Idle)]);
        match out.last() {
            Some(PhyIndication::FrameReceived { sender, rssi_dbm, sinr_db, .. }) => {
                assert_eq!(*sender, 101);
                assert!((rssi_dbm + 50.0).abs() < 1e-9);
                assert!(*sinr_db > 40.0);
            }
            other => panic!("unexpected indication {other:?}"),
        }
        assert_eq!(phy.stats().signals_received, 1);
        assert_eq!(phy.locked_signal_id(), None);
        assert!(phy.stats().average_sinr_db().unwrap() > 40.0);
    }

    #[test]
    fn weak_signal_only_adds_interference() {
        let mut phy = phy();
        let mut rng = rng();
        // Below the 6 Mbps sensitivity and below carrier sense.
        let out = phy.signal_arrival(SimTime::ZERO, signal(1, -95.0, 0, 100), &mut rng);
        assert!(out.is_empty());
        assert_eq!(phy.mode(), PhyMode::Idle);
        assert!(phy.interference_mw() > 0.0);

        let out = phy.signal_end(SimTime::from_micros(100), 1, &mut rng);
        assert!(out.is_empty());
        assert_eq!(phy.interference_mw(), 0.0);
    }

    #[test]
    fn aggregate_interference_triggers_sensing_once() {
        let mut phy = phy();
        let mut rng = rng();
        // Each alone is below -82 dBm; four together exceed it.
        let mut changes = Vec::new();
        for id in 0..4 {
            let out = phy.signal_arrival(SimTime::from_micros(id), signal(id, -86.0, id, 500), &mut rng);
            changes.extend(mode_changes(&out));
        }
        assert_eq!(phy.mode(), PhyMode::Sensing);
        assert_eq!(changes, vec![(PhyMode::Idle, PhyMode::Sensing)]);

        let mut changes = Vec::new();
        for id in 0..4 {
            let out = phy.signal_end(SimTime::from_micros(500 + id), id, &mut rng);
            changes.extend(mode_changes(&out));
        }
        assert_eq!(changes, vec![(PhyMode::Sensing, PhyMode::Idle)]);
        assert_eq!(phy.interference_mw(), 0.0);
    }

    #[test]
    fn only_one_signal_is_locked_at_a_time() {
        let mut phy = phy();
        let mut rng = rng();
        phy.signal_arrival(SimTime::ZERO, signal(1, -60.0, 0, 1000), &mut rng);
        let out = phy.signal_arrival(SimTime::from_micros(10), signal(2, -40.0, 10, 900), &mut rng);
        assert!(out.is_empty());
        assert_eq!(phy.locked_signal_id(), Some(1));
        assert!((phy.interference_mw() - dbm_to_mw(-40.0)).abs() < 1e-15);
    }

    #[test]
    fn strong_interference_corrupts_the_locked_packet() {
        let mut phy = phy();
        let mut rng = rng();
        phy.signal_arrival(SimTime::ZERO, signal(1, -70.0, 0, 2000), &mut rng);
        // 20 dB stronger interferer for most of the frame.
        phy.signal_arrival(SimTime::from_micros(100), signal(2, -50.0, 100, 1900), &mut rng);
        phy.signal_end(SimTime::from_micros(1900), 2, &mut rng);
        let out = phy.signal_end(SimTime::from_micros(2000), 1, &mut rng);
        assert!(out.iter().any(|i| matches!(i, PhyIndication::FrameError { sender: 101, .. })));
        assert_eq!(phy.stats().signals_with_errors, 1);
        assert_eq!(phy.stats().collisions, 1);
        assert_eq!(phy.stats().signals_received, 0);
        assert_eq!(phy.mode(), PhyMode::Idle);
    }

    #[test]
    fn snr_threshold_model_rejects_on_dip() {
        let mut phy = phy_with(ReceptionModel::SnrThreshold { threshold_db: 10.0 }, AntennaConfig::default());
        let mut rng = rng();
        phy.signal_arrival(SimTime::ZERO, signal(1, -60.0, 0, 1000), &mut rng);
        phy.signal_arrival(SimTime::from_micros(100), signal(2, -65.0, 100, 200), &mut rng);
        // The dip is only detected once the interval with the interferer is evaluated.
        phy.signal_end(SimTime::from_micros(200), 2, &mut rng);
        let out = phy.signal_end(SimTime::from_micros(1000), 1, &mut rng);
        assert!(out.iter().any(|i| matches!(i, PhyIndication::FrameError { .. })));

        let mut rng = StdRng::seed_from_u64(1);
        phy.signal_arrival(SimTime::from_micros(2000), signal(3, -60.0, 2000, 3000), &mut rng);
        phy.signal_arrival(SimTime::from_micros(2100), signal(4, -80.0, 2100, 2200), &mut rng);
        phy.signal_end(SimTime::from_micros(2200), 4, &mut rng);
        let out = phy.signal_end(SimTime::from_micros(3000), 3, &mut rng);
        assert!(out.iter().any(|i| matches!(i, PhyIndication::FrameReceived { .. })));
    }

    #[test]
    fn transmitting_drops_the_lock_and_keeps_its_power_as_interference() {
        let mut phy = phy();
        let mut rng = rng();
        phy.signal_arrival(SimTime::ZERO, signal(1, -60.0, 0, 1000), &mut rng);
        let frame = signal(9, 0.0, 0, 0).frame;
        let (tx, out) = phy.start_transmit(SimTime::from_micros(50), frame, None).unwrap();
        assert_eq!(mode_changes(&out), vec![(PhyMode::Receiving, PhyMode::Transmitting)]);
        assert_eq!(phy.locked_signal_id(), None);
        assert_eq!(phy.stats().receptions_aborted, 1);
        assert!((phy.interference_mw() - dbm_to_mw(-60.0)).abs() < 1e-15);
        assert_eq!(tx.sender, 1);
        assert_eq!(tx.power_dbm, 15.0);

        // Arrivals while transmitting cannot be locked.
        phy.signal_arrival(SimTime::from_micros(60), signal(2, -40.0, 60, 900), &mut rng);
        assert_eq!(phy.locked_signal_id(), None);

        assert_eq!(phy.start_transmit(SimTime::from_micros(70), signal(3, 0.0, 0, 0).frame, None).unwrap_err(), PhyError::Transmitting);

        let end = SimTime::from_micros(50) + tx.duration;
        let out = phy.end_transmit(end).unwrap();
        assert_eq!(mode_changes(&out), vec![(PhyMode::Transmitting, PhyMode::Sensing)]);
        assert_eq!(out.last(), Some(&PhyIndication::TransmissionFinished));

        // The aborted signal ends as plain interference, no delivery.
        let out = phy.signal_end(SimTime::from_micros(1000), 1, &mut rng);
        assert!(!out.iter().any(|i| matches!(i, PhyIndication::FrameReceived { .. } | PhyIndication::FrameError { .. })));
        phy.signal_end(SimTime::from_micros(1000), 2, &mut rng);
        assert_eq!(phy.mode(), PhyMode::Idle);
        assert_eq!(phy.end_transmit(SimTime::from_micros(1001)).unwrap_err(), PhyError::NotTransmitting);
    }

    #[test]
    fn interference_never_goes_negative() {
        let mut phy = phy();
        let mut rng = rng();
        let powers = [-85.0, -70.3, -91.7, -60.1, -88.8];
        for (i, p) in powers.iter().enumerate() {
            phy.start_transmit(SimTime::ZERO, signal(99, 0.0, 0, 0).frame, None).ok();
            phy.signal_arrival(SimTime::from_micros(i as u64), signal(i as SignalId, *p, 0, 10), &mut rng);
        }
        for i in (0..powers.len()).rev() {
            phy.signal_end(SimTime::from_micros(10), i as SignalId, &mut rng);
            assert!(phy.interference_mw() >= 0.0);
        }
        assert_eq!(phy.interference_mw(), 0.0);
        // Unknown and repeated ends are harmless.
        assert!(phy.signal_end(SimTime::from_micros(11), 3, &mut rng).is_empty());
        assert!(phy.signal_end(SimTime::from_micros(11), 777, &mut rng).is_empty());
        assert_eq!(phy.interference_mw(), 0.0);
    }

    #[test]
    fn duplicate_arrival_is_ignored() {
        let mut phy = phy();
        let mut rng = rng();
        phy.signal_arrival(SimTime::ZERO, signal(1, -90.0, 0, 10), &mut rng);
        let before = phy.interference_mw();
        phy.signal_arrival(SimTime::ZERO, signal(1, -90.0, 0, 10), &mut rng);
        assert_eq!(phy.interference_mw(), before);
    }

    #[test]
    fn trx_off_blocks_locking_and_transmitting() {
        let mut phy = phy();
        let mut rng = rng();
        let out = phy.turn_off(SimTime::ZERO).unwrap();
        assert_eq!(mode_changes(&out), vec![(PhyMode::Idle, PhyMode::TrxOff)]);
        phy.signal_arrival(SimTime::ZERO, signal(1, -40.0, 0, 100), &mut rng);
        assert_eq!(phy.locked_signal_id(), None);
        assert_eq!(phy.mode(), PhyMode::TrxOff);
        assert_eq!(phy.start_transmit(SimTime::ZERO, signal(2, 0.0, 0, 0).frame, None).unwrap_err(), PhyError::TransceiverOff);

        // Turning on mid-signal senses the medium busy.
        let out = phy.turn_on(SimTime::from_micros(50));
        assert_eq!(mode_changes(&out), vec![(PhyMode::TrxOff, PhyMode::Sensing)]);
        assert!(phy.turn_on(SimTime::from_micros(60)).is_empty());
        let out = phy.signal_end(SimTime::from_micros(100), 1, &mut rng);
        assert_eq!(mode_changes(&out), vec![(PhyMode::Sensing, PhyMode::Idle)]);
    }

    #[test]
    fn channel_switch_forgets_old_channel_and_joins_in_flight_signals() {
        let mut phy = phy();
        let mut rng = rng();
        phy.signal_arrival(SimTime::ZERO, signal(1, -60.0, 0, 1000), &mut rng);
        phy.signal_arrival(SimTime::from_micros(5), signal(2, -88.0, 5, 1000), &mut rng);

        let mut busy = signal(3, -70.0, 0, 800);
        busy.channel = 2;
        let out = phy.switch_channel(SimTime::from_micros(10), 2, vec![busy]).unwrap();
        assert_eq!(mode_changes(&out), vec![(PhyMode::Receiving, PhyMode::Sensing)]);
        assert_eq!(phy.channel(), 2);
        assert_eq!(phy.locked_signal_id(), None);
        assert!((phy.interference_mw() - dbm_to_mw(-70.0)).abs() < 1e-15);

        // Ends of old-channel signals are ignored.
        assert!(phy.signal_end(SimTime::from_micros(1000), 1, &mut rng).is_empty());
        assert!(phy.signal_end(SimTime::from_micros(1000), 2, &mut rng).is_empty());
        let out = phy.signal_end(SimTime::from_micros(800), 3, &mut rng);
        assert_eq!(mode_changes(&out), vec![(PhyMode::Sensing, PhyMode::Idle)]);

        assert!(phy.switch_channel(SimTime::from_micros(900), 2, Vec::new()).unwrap().is_empty());
        phy.start_transmit(SimTime::from_micros(900), signal(4, 0.0, 0, 0).frame, None).unwrap();
        assert_eq!(phy.switch_channel(SimTime::from_micros(901), 0, Vec::new()).unwrap_err(), PhyError::Transmitting);
    }

    #[test]
    fn directional_antenna_steers_toward_locked_signal() {
        let antenna = AntennaConfig::Steerable {
            main_lobe_gain_dbi: 10.0,
            beamwidth_deg: 30.0,
            side_lobe_gain_dbi: -15.0,
            omni_gain_dbi: 0.0,
        };
        let mut phy = phy_with(ReceptionModel::BerBased, antenna);
        let mut rng = rng();
        let mut wanted = signal(1, -75.0, 0, 1000);
        wanted.arrival_bearing = 0.0;
        phy.signal_arrival(SimTime::ZERO, wanted, &mut rng);
        assert_eq!(phy.antenna().locked_bearing(), Some(0.0));

        // An interferer from behind is attenuated by the side lobe.
        let mut behind = signal(2, -60.0, 10, 500);
        behind.arrival_bearing = std::f64::consts::PI;
        phy.signal_arrival(SimTime::from_micros(10), behind, &mut rng);
        assert!((phy.interference_mw() - dbm_to_mw(-75.0)).abs() < 1e-15);

        phy.signal_end(SimTime::from_micros(500), 2, &mut rng);
        let out = phy.signal_end(SimTime::from_micros(1000), 1, &mut rng);
        match out.last() {
            Some(PhyIndication::FrameReceived { rssi_dbm, .. }) => assert!((rssi_dbm + 65.0).abs() < 1e-9),
            other => panic!("unexpected indication {other:?}"),
        }
        assert_eq!(phy.antenna().locked_bearing(), None);
    }

    #[test]
    fn unknown_tx_rate_is_rejected() {
        let profile = Arc::new(PhyProfile::new(PhyStandard::Ieee80211b));
        let result = PhyState::new(1, profile, ReceptionModel::BerBased, Antenna::new(AntennaConfig::default()), 0, 15.0, 7, 1e-12);
        assert!(matches!(result, Err(PhyError::UnknownDataRate(7))));
    }

    /// 6 Mbps radio whose BER is 1e-4 at every SINR.
    fn constant_ber_phy() -> PhyState {
        let mut profile = PhyProfile::new(PhyStandard::Ieee80211a);
        let table = BerTable::from_entries([(-20.0, 1e-4), (60.0, 1e-4)]).unwrap();
        assert!(profile.set_ber_table(0, table));
        let noise = thermal_noise_mw(290.0, 10.0, profile.bandwidth_hz);
        PhyState::new(1, Arc::new(profile), ReceptionModel::BerBased, Antenna::new(AntennaConfig::default()), 0, 15.0, 0, noise).unwrap()
    }

    /// Fraction of 700 us receptions that end in error, optionally cut into
    /// three evaluation intervals by a faint overlapping signal.
    fn error_fraction(split: bool, trials: u64) -> f64 {
        let mut phy = constant_ber_phy();
        let mut rng = StdRng::seed_from_u64(7);
        let mut errors = 0;
        for trial in 0..trials {
            let start = trial * 1000;
            let id = 2 * trial;
            phy.signal_arrival(SimTime::from_micros(start), signal(id, -50.0, start, start + 700), &mut rng);
            if split {
                phy.signal_arrival(SimTime::from_micros(start + 350), signal(id + 1, -150.0, start + 350, start + 600), &mut rng);
                phy.signal_end(SimTime::from_micros(start + 600), id + 1, &mut rng);
            }
            let out = phy.signal_end(SimTime::from_micros(start + 700), id, &mut rng);
            if matches!(out.last(), Some(PhyIndication::FrameError { .. })) {
                errors += 1;
            }
        }
        assert_eq!(phy.stats().signals_locked, trials);
        errors as f64 / trials as f64
    }

    #[test]
    fn error_rate_matches_packet_error_rate() {
        // 700 us at 6 Mbps is 4200 bits, PER ~0.34.
        let expected = packet_error_rate(1e-4, 4200.0);
        assert!(expected > 0.3 && expected < 0.7);
        let trials = 4000;
        let whole = error_fraction(false, trials);
        assert!((whole - expected).abs() < 0.04, "{whole} vs {expected}");
    }

    #[test]
    fn split_evaluation_keeps_the_error_rate() {
        let expected = packet_error_rate(1e-4, 4200.0);
        let split = error_fraction(true, 4000);
        assert!((split - expected).abs() < 0.04, "{split} vs {expected}");
    }
}
