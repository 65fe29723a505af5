//! Minimal CSMA MAC.
//!
//! Frames are queued and sent one at a time. An attempt transmits at once when
//! the PHY reports an idle medium; otherwise the MAC waits for the medium to
//! become idle and then backs off for DIFS plus a random number of slots. The
//! contention window doubles every time a backoff ends on a busy medium and is
//! reset after each transmission. There are no acknowledgements.
//!
//! The MAC does not own a clock. It returns a `MacAction` and the network
//! driver schedules the next attempt.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

use super::phy::{PhyIndication, PhyMode};
use super::types::{Frame, NodeId};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MacParameters {
    pub slot_time_us: u64,
    pub difs_us: u64,
    pub cw_min: u32,
    pub cw_max: u32,
    pub queue_limit: usize,
}

impl Default for MacParameters {
    fn default() -> Self {
        // 802.11a OFDM timing.
        Self {
            slot_time_us: 9,
            difs_us: 34,
            cw_min: 15,
            cw_max: 1023,
            queue_limit: 64,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MacStats {
    pub frames_queued: u64,
    pub frames_dropped: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    /// Frames decoded correctly but addressed to another node.
    pub frames_overheard: u64,
    pub frames_with_errors: u64,
    pub busy_deferrals: u64,
}

/// What the driver has to do after a MAC call.
#[derive(Debug, Clone, PartialEq)]
pub enum MacAction {
    /// Hand the frame to the PHY now.
    Transmit(Frame),
    /// Call `on_attempt` again after this delay.
    Defer(Duration),
    Nothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MacState {
    /// Queue empty, nothing scheduled.
    Idle,
    /// An attempt is scheduled.
    Deferring,
    /// Medium was busy; waiting for the PHY to report idle.
    WaitingForIdle,
    Transmitting,
}

pub struct CsmaMac {
    node_id: NodeId,
    params: MacParameters,
    queue: VecDeque<Frame>,
    state: MacState,
    contention_window: u32,
    stats: MacStats,
}

impl CsmaMac {
    pub fn new(node_id: NodeId, params: MacParameters) -> Self {
        let contention_window = params.cw_min;
        Self {
            node_id,
            params,
            queue: VecDeque::new(),
            state: MacState::Idle,
            contention_window,
            stats: MacStats::default(),
        }
    }

    pub fn stats(&self) -> &MacStats {
        &self.stats
    }

    #[cfg(test)]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    #[cfg(test)]
    pub fn contention_window(&self) -> u32 {
        self.contention_window
    }

    /// Queue a frame from the traffic source.
    pub fn enqueue(&mut self, frame: Frame) -> MacAction {
        if self.queue.len() >= self.params.queue_limit {
            self.stats.frames_dropped += 1;
            log::debug!("[{}] MAC queue full, frame {} dropped", self.node_id, frame.sequence);
            return MacAction::Nothing;
        }
        self.queue.push_back(frame);
        self.stats.frames_queued += 1;
        if self.state == MacState::Idle {
            self.state = MacState::Deferring;
            return MacAction::Defer(Duration::ZERO);
        }
        MacAction::Nothing
    }

    /// A scheduled attempt fired. `medium_idle` is the PHY's current view.
    pub fn on_attempt(&mut self, medium_idle: bool) -> MacAction {
        if self.state != MacState::Deferring {
            return MacAction::Nothing;
        }
        if !medium_idle {
            self.stats.busy_deferrals += 1;
            self.contention_window = (self.contention_window * 2 + 1).min(self.params.cw_max);
            self.state = MacState::WaitingForIdle;
            return MacAction::Nothing;
        }
        match self.queue.pop_front() {
            Some(frame) => {
                self.state = MacState::Transmitting;
                self.stats.frames_sent += 1;
                MacAction::Transmit(frame)
            }
            None => {
                self.state = MacState::Idle;
                MacAction::Nothing
            }
        }
    }

    /// The PHY refused a frame handed over by `Transmit`; put it back and retry
    /// once the medium is idle.
    pub fn transmit_failed(&mut self, frame: Frame) {
        self.stats.frames_sent = self.stats.frames_sent.saturating_sub(1);
        self.queue.push_front(frame);
        self.state = MacState::WaitingForIdle;
    }

    pub fn on_indication<R: Rng + ?Sized>(&mut self, indication: &PhyIndication, rng: &mut R) -> MacAction {
        match indication {
            PhyIndication::ModeChanged { new: PhyMode::Idle, .. } if self.state == MacState::WaitingForIdle => self.start_backoff(rng),
            PhyIndication::ModeChanged { .. } => MacAction::Nothing,
            PhyIndication::TransmissionFinished => {
                self.contention_window = self.params.cw_min;
                if self.queue.is_empty() {
                    self.state = MacState::Idle;
                    MacAction::Nothing
                } else {
                    self.start_backoff(rng)
                }
            }
            PhyIndication::FrameReceived { frame, sender, sinr_db, .. } => {
                if frame.is_for(self.node_id) {
                    self.stats.frames_received += 1;
                    log::trace!("[{}] frame {}/{} from {} received (SINR {:.1} dB)", self.node_id, frame.flow_id, frame.sequence, sender, sinr_db);
                } else {
                    self.stats.frames_overheard += 1;
                }
                MacAction::Nothing
            }
            PhyIndication::FrameError { .. } => {
                self.stats.frames_with_errors += 1;
                MacAction::Nothing
            }
        }
    }

    fn start_backoff<R: Rng + ?Sized>(&mut self, rng: &mut R) -> MacAction {
        let slots = rng.gen_range(0..=self.contention_window);
        self.state = MacState::Deferring;
        let delay = Duration::from_micros(self.params.difs_us + u64::from(slots) * self.params.slot_time_us);
        MacAction::Defer(delay)
    }
}
