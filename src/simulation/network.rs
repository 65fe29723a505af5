//! Discrete-event network driver.
//!
//! Owns every node's PHY and MAC, the traffic flows and the event queue.
//! High-level flow of a transmission:
//! 1) A flow generates a frame and hands it to the source MAC.
//! 2) The MAC asks for an attempt; when the PHY reports an idle medium the
//!    frame is handed to the PHY, which returns the `Transmission`.
//! 3) The channel computes one signal copy per receiver (antenna gains,
//!    sampled path loss, obstacle attenuation, propagation delay) and
//!    schedules its arrival and end at the receiver.
//! 4) PHY indications are dispatched back to the MAC, which may schedule the
//!    next attempt.
//!
//! Signals are delivered to a receiver's PHY only while it is tuned to the
//! signal's channel, but every receiver keeps track of what is on the air so a
//! channel switch can join ongoing signals as interference.

use anyhow::Context;
use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::common::scene::{ChannelConfig, FlowConfig, NodeAction, Scene};

use super::antenna::Antenna;
use super::geometry::{bearing, distance, obstacle_loss_db};
use super::mac::{CsmaMac, MacAction, MacStats};
use super::phy::{PhyError, PhyIndication, PhyMode, PhyState, PhyStats, Transmission};
use super::phy_802_11::PhyProfile;
use super::signal_calculations::{LinkGeometry, PathLossParameters, propagation_delay, sample_path_loss, thermal_noise_mw};
use super::types::{Frame, NodeId, Obstacle, Point, Signal, SignalId, SimTime};

#[derive(Debug, Clone)]
enum EventKind {
    Traffic { flow: usize },
    MacAttempt { node: usize },
    SignalArrival { node: usize, signal: Signal },
    SignalEnd { node: usize, signal: SignalId },
    TransmissionEnd { node: usize },
    Action { node: usize, action: NodeAction },
}

#[derive(Debug, Clone)]
struct Event {
    time: SimTime,
    seq: u64,
    kind: EventKind,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest time first, then FIFO)
        other.time.cmp(&self.time).then_with(|| other.seq.cmp(&self.seq))
    }
}

struct SimNode {
    id: NodeId,
    position: Point,
    phy: PhyState,
    mac: CsmaMac,
    /// Signals currently on the air at this node, on any channel.
    on_air: HashMap<SignalId, Signal>,
    /// End of the node's own ongoing transmission.
    transmitting_until: Option<SimTime>,
}

struct FlowState {
    config: FlowConfig,
    source: usize,
    generated: u32,
}

/// Network-wide counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Totals {
    pub frames_generated: u64,
    pub frames_dropped: u64,
    pub transmissions: u64,
    /// Frames decoded by the node they were addressed to (every node for broadcasts).
    pub frames_delivered: u64,
    pub frame_errors: u64,
    pub collisions: u64,
    pub receptions_aborted: u64,
    pub signals_below_limit: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub node_id: NodeId,
    pub channel: usize,
    pub final_mode: PhyMode,
    pub average_sinr_db: Option<f64>,
    pub phy: PhyStats,
    pub mac: MacStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub generated_at: String,
    pub seed: u64,
    pub simulated_time_s: f64,
    pub events_processed: u64,
    pub totals: Totals,
    pub nodes: Vec<NodeReport>,
}

pub struct Network {
    nodes: Vec<SimNode>,
    index: HashMap<NodeId, usize>,
    flows: Vec<FlowState>,
    channels: Vec<ChannelConfig>,
    path_loss: PathLossParameters,
    obstacles: Vec<Obstacle>,
    antenna_height_m: f64,
    propagation_limit_dbm: f64,
    queue: BinaryHeap<Event>,
    next_seq: u64,
    next_signal: SignalId,
    now: SimTime,
    end_time: SimTime,
    seed: u64,
    rng: StdRng,
    events_processed: u64,
    totals: Totals,
}

fn millis(ms: f64) -> SimTime {
    SimTime::from_nanos((ms * 1e6).round().max(0.0) as u64)
}

impl Network {
    pub fn new(scene: &Scene, profile: Arc<PhyProfile>) -> anyhow::Result<Self> {
        let radio = &scene.radio;
        let noise_mw = thermal_noise_mw(radio.temperature_k, radio.noise_factor, profile.bandwidth_hz);
        log::info!(
            "Building network: {} nodes, {} channels, {} flows, noise floor {:.2} dBm",
            scene.nodes.len(),
            scene.channels.len(),
            scene.flows.len(),
            10.0 * noise_mw.log10()
        );

        let mut nodes = Vec::with_capacity(scene.nodes.len());
        let mut index = HashMap::new();
        for config in &scene.nodes {
            let mbps = config.data_rate_mbps.unwrap_or(radio.data_rate_mbps);
            let rate = profile
                .rate_index(mbps)
                .with_context(|| format!("Node {} uses unsupported data rate {} Mbps", config.node_id, mbps))?;
            let antenna = Antenna::new(config.antenna.clone().unwrap_or_else(|| radio.antenna.clone()));
            let phy = PhyState::new(
                config.node_id,
                Arc::clone(&profile),
                radio.reception_model,
                antenna,
                config.channel,
                config.tx_power_dbm.unwrap_or(radio.tx_power_dbm),
                rate,
                noise_mw,
            )
            .with_context(|| format!("Failed to create PHY of node {}", config.node_id))?;
            index.insert(config.node_id, nodes.len());
            nodes.push(SimNode {
                id: config.node_id,
                position: config.position,
                phy,
                mac: CsmaMac::new(config.node_id, scene.mac.clone()),
                on_air: HashMap::new(),
                transmitting_until: None,
            });
        }

        let mut flows = Vec::with_capacity(scene.flows.len());
        for flow in &scene.flows {
            let source = *index.get(&flow.source).with_context(|| format!("Flow source {} is not a node", flow.source))?;
            flows.push(FlowState {
                config: flow.clone(),
                source,
                generated: 0,
            });
        }

        let mut network = Self {
            nodes,
            index,
            flows,
            channels: scene.channels.clone(),
            path_loss: scene.path_loss.clone(),
            obstacles: scene.obstacles.clone(),
            antenna_height_m: radio.antenna_height_m,
            propagation_limit_dbm: radio.propagation_limit_dbm,
            queue: BinaryHeap::new(),
            next_seq: 0,
            next_signal: 0,
            now: SimTime::ZERO,
            end_time: millis(scene.duration_ms),
            seed: scene.seed,
            rng: StdRng::seed_from_u64(scene.seed),
            events_processed: 0,
            totals: Totals::default(),
        };

        // Scheduled actions go first so they win ties against traffic.
        for entry in &scene.schedule {
            let node = *network.index.get(&entry.node_id).with_context(|| format!("Schedule refers to unknown node {}", entry.node_id))?;
            network.schedule(
                millis(entry.at_ms),
                EventKind::Action {
                    node,
                    action: entry.action.clone(),
                },
            );
        }
        for flow in 0..network.flows.len() {
            let start = millis(network.flows[flow].config.start_ms);
            network.schedule(start, EventKind::Traffic { flow });
        }
        Ok(network)
    }

    #[cfg(test)]
    pub fn phy(&self, node_id: NodeId) -> Option<&PhyState> {
        self.index.get(&node_id).map(|&i| &self.nodes[i].phy)
    }

    #[cfg(test)]
    pub fn mac_stats(&self, node_id: NodeId) -> Option<&MacStats> {
        self.index.get(&node_id).map(|&i| self.nodes[i].mac.stats())
    }

    fn schedule(&mut self, time: SimTime, kind: EventKind) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Event { time, seq, kind });
    }

    /// Run until the queue is empty or the end time is reached.
    pub fn run(&mut self) -> SimulationReport {
        while let Some(event) = self.queue.pop() {
            if event.time > self.end_time {
                break;
            }
            self.now = event.time;
            self.events_processed += 1;
            self.handle(event.kind);
        }
        self.now = self.end_time;
        log::info!(
            "Simulation finished at {}: {} events, {} transmissions, {} delivered, {} errors",
            self.now,
            self.events_processed,
            self.totals.transmissions,
            self.totals.frames_delivered,
            self.totals.frame_errors
        );
        self.report()
    }

    fn handle(&mut self, kind: EventKind) {
        match kind {
            EventKind::Traffic { flow } => self.generate_frame(flow),
            EventKind::MacAttempt { node } => {
                let idle = self.nodes[node].phy.is_medium_idle();
                let action = self.nodes[node].mac.on_attempt(idle);
                self.apply_mac_action(node, action);
            }
            EventKind::SignalArrival { node, signal } => {
                let n = &mut self.nodes[node];
                n.on_air.insert(signal.id, signal.clone());
                if n.phy.channel() != signal.channel {
                    return;
                }
                let indications = n.phy.signal_arrival(self.now, signal, &mut self.rng);
                self.dispatch(node, indications);
            }
            EventKind::SignalEnd { node, signal } => {
                let n = &mut self.nodes[node];
                if n.on_air.remove(&signal).is_none() {
                    return;
                }
                let indications = n.phy.signal_end(self.now, signal, &mut self.rng);
                self.dispatch(node, indications);
            }
            EventKind::TransmissionEnd { node } => {
                let n = &mut self.nodes[node];
                n.transmitting_until = None;
                match n.phy.end_transmit(self.now) {
                    Ok(indications) => self.dispatch(node, indications),
                    Err(e) => log::warn!("[{}] end of transmission: {}", n.id, e),
                }
            }
            EventKind::Action { node, action } => self.apply_node_action(node, action),
        }
    }

    fn generate_frame(&mut self, flow_idx: usize) {
        let now = self.now;
        let flow = &mut self.flows[flow_idx];
        let frame = Frame {
            source: flow.config.source,
            destination: flow.config.destination,
            flow_id: flow_idx,
            sequence: flow.generated,
            size_bytes: flow.config.payload_bytes,
            created: now,
        };
        flow.generated += 1;
        let mut more = flow.config.count.is_none_or(|count| flow.generated < count);
        // An interval beyond the range of `Duration` never fires again.
        let next = match Duration::try_from_secs_f64(flow.config.interval_ms / 1000.0) {
            Ok(interval) => now + interval,
            Err(e) => {
                log::warn!("flow {} stops: interval {} ms ({})", flow_idx, flow.config.interval_ms, e);
                more = false;
                now
            }
        };
        let source = flow.source;

        self.totals.frames_generated += 1;
        let dropped_before = self.nodes[source].mac.stats().frames_dropped;
        let action = self.nodes[source].mac.enqueue(frame);
        if self.nodes[source].mac.stats().frames_dropped > dropped_before {
            self.totals.frames_dropped += 1;
        }
        self.apply_mac_action(source, action);

        if more && next <= self.end_time {
            self.schedule(next, EventKind::Traffic { flow: flow_idx });
        }
    }

    fn apply_mac_action(&mut self, node: usize, action: MacAction) {
        match action {
            MacAction::Transmit(frame) => self.transmit(node, frame),
            MacAction::Defer(delay) => {
                let at = self.now + delay;
                self.schedule(at, EventKind::MacAttempt { node });
            }
            MacAction::Nothing => {}
        }
    }

    fn dispatch(&mut self, node: usize, indications: Vec<PhyIndication>) {
        let node_id = self.nodes[node].id;
        for indication in indications {
            match &indication {
                PhyIndication::FrameReceived { frame, .. } if frame.is_for(node_id) => self.totals.frames_delivered += 1,
                PhyIndication::FrameError { .. } => self.totals.frame_errors += 1,
                _ => {}
            }
            let n = &mut self.nodes[node];
            let action = n.mac.on_indication(&indication, &mut self.rng);
            self.apply_mac_action(node, action);
        }
    }

    fn transmit(&mut self, node: usize, frame: Frame) {
        let direction = {
            let n = &self.nodes[node];
            match frame.destination.and_then(|dest| self.index.get(&dest)) {
                Some(&dest) if n.phy.antenna().is_directional() => Some(bearing(&n.position, &self.nodes[dest].position)),
                _ => None,
            }
        };
        let n = &mut self.nodes[node];
        match n.phy.start_transmit(self.now, frame.clone(), direction) {
            Ok((transmission, indications)) => {
                let end = self.now + transmission.duration;
                n.transmitting_until = Some(end);
                log::debug!(
                    "[{}] transmitting frame {}/{} ({} bytes) on channel {} until {}",
                    n.id,
                    frame.flow_id,
                    frame.sequence,
                    frame.size_bytes,
                    transmission.channel,
                    end
                );
                self.totals.transmissions += 1;
                self.schedule(end, EventKind::TransmissionEnd { node });
                self.propagate(node, &transmission);
                self.dispatch(node, indications);
            }
            Err(e) => {
                log::warn!("[{}] PHY refused frame {}: {}", n.id, frame.sequence, e);
                n.mac.transmit_failed(frame);
            }
        }
    }

    /// Schedule one signal copy per receiver.
    fn propagate(&mut self, sender: usize, transmission: &Transmission) {
        let id = self.next_signal;
        self.next_signal += 1;

        let Some(channel) = self.channels.get(transmission.channel) else {
            log::warn!("[{}] transmission on undefined channel {}", transmission.sender, transmission.channel);
            return;
        };
        let geometry = LinkGeometry {
            frequency_hz: channel.frequency_hz,
            tx_antenna_height: self.antenna_height_m,
            rx_antenna_height: self.antenna_height_m,
        };
        let tx_position = self.nodes[sender].position;

        let mut copies = Vec::new();
        for (receiver, node) in self.nodes.iter().enumerate() {
            if receiver == sender {
                continue;
            }
            let d = distance(&tx_position, &node.position);
            let tx_gain = self.nodes[sender].phy.antenna().tx_gain_dbi(bearing(&tx_position, &node.position), transmission.direction);
            let loss = sample_path_loss(d, &self.path_loss, &geometry, &mut self.rng) + obstacle_loss_db(&tx_position, &node.position, &self.obstacles);
            let power_dbm = transmission.power_dbm + tx_gain - loss;
            if power_dbm < self.propagation_limit_dbm {
                self.totals.signals_below_limit += 1;
                continue;
            }
            let start = transmission.start + propagation_delay(d);
            let signal = Signal {
                id,
                sender: transmission.sender,
                channel: transmission.channel,
                frame: transmission.frame.clone(),
                data_rate: transmission.data_rate,
                power_dbm,
                arrival_bearing: bearing(&node.position, &tx_position),
                start,
                end: start + transmission.duration,
            };
            log::trace!("[{}] signal {} from {} arrives at {:.2} dBm", node.id, id, transmission.sender, power_dbm);
            copies.push((receiver, signal));
        }

        for (receiver, signal) in copies {
            let (start, end) = (signal.start, signal.end);
            self.schedule(start, EventKind::SignalArrival { node: receiver, signal });
            self.schedule(end, EventKind::SignalEnd { node: receiver, signal: id });
        }
    }

    fn apply_node_action(&mut self, node: usize, action: NodeAction) {
        let now = self.now;
        let n = &mut self.nodes[node];
        let result = match &action {
            NodeAction::SwitchChannel { channel } => {
                let in_flight: Vec<Signal> = n.on_air.values().filter(|s| s.channel == *channel).cloned().collect();
                n.phy.switch_channel(now, *channel, in_flight)
            }
            NodeAction::TurnOff => n.phy.turn_off(now),
            NodeAction::TurnOn => Ok(n.phy.turn_on(now)),
        };
        match result {
            Ok(indications) => {
                log::info!("[{}] {:?} at {}", n.id, action, now);
                self.dispatch(node, indications);
            }
            Err(PhyError::Transmitting) => {
                // Retry once the ongoing transmission is over.
                let retry = n.transmitting_until.unwrap_or(now);
                log::debug!("[{}] {:?} postponed to {}", n.id, action, retry);
                self.schedule(retry, EventKind::Action { node, action });
            }
            Err(e) => log::warn!("[{}] {:?} failed: {}", n.id, action, e),
        }
    }

    pub fn report(&self) -> SimulationReport {
        let mut totals = self.totals.clone();
        totals.collisions = self.nodes.iter().map(|n| n.phy.stats().collisions).sum();
        totals.receptions_aborted = self.nodes.iter().map(|n| n.phy.stats().receptions_aborted).sum();
        SimulationReport {
            generated_at: Utc::now().to_rfc3339(),
            seed: self.seed,
            simulated_time_s: self.now.as_secs_f64(),
            events_processed: self.events_processed,
            totals,
            nodes: self
                .nodes
                .iter()
                .map(|n| NodeReport {
                    node_id: n.id,
                    channel: n.phy.channel(),
                    final_mode: n.phy.mode(),
                    average_sinr_db: n.phy.stats().average_sinr_db(),
                    phy: n.phy.stats().clone(),
                    mac: n.mac.stats().clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::scene::{ScheduledAction, parse_scene, validate_scene};

    /// A at the origin, B 36 m away, C 60 m from A behind a thick wall so A
    /// and C cannot hear each other but both reach B.
    fn hidden_terminal_scene(c_channel: usize, c_flow: bool) -> Scene {
        let c_flow = if c_flow {
            r#", { "source": 3, "payload_bytes": 500, "interval_ms": 10, "count": 5 }"#
        } else {
            ""
        };
        let text = format!(
            r#"{{
            "radio": {{ "standard": "802.11a", "tx_power_dbm": 15, "data_rate_mbps": 54 }},
            "channels": [{{ "frequency_hz": 5.2e9 }}, {{ "frequency_hz": 5.3e9 }}],
            "path_loss": {{ "model": "free_space" }},
            "obstacles": [
                {{ "type": "rectangle", "top-left-position": {{ "x": 28, "y": -3 }}, "bottom-right-position": {{ "x": 32, "y": 3 }}, "attenuation_db": 60 }}
            ],
            "nodes": [
                {{ "node_id": 1, "position": {{ "x": 0, "y": 0 }} }},
                {{ "node_id": 2, "position": {{ "x": 30, "y": 20 }} }},
                {{ "node_id": 3, "position": {{ "x": 60, "y": 0 }}, "channel": {c_channel} }}
            ],
            "flows": [
                {{ "source": 1, "payload_bytes": 500, "interval_ms": 10, "count": 5 }}{c_flow}
            ],
            "duration_ms": 100,
            "seed": 1
        }}"#
        );
        parse_scene(&text).unwrap()
    }

    fn run(scene: &Scene) -> (Network, SimulationReport) {
        let profile = Arc::new(scene.build_profile().unwrap());
        let mut network = Network::new(scene, profile).unwrap();
        let report = network.run();
        (network, report)
    }

    #[test]
    fn events_pop_in_time_then_fifo_order() {
        let mut heap = BinaryHeap::new();
        for (seq, micros) in [(0, 30), (1, 10), (2, 10), (3, 20)] {
            heap.push(Event {
                time: SimTime::from_micros(micros),
                seq,
                kind: EventKind::MacAttempt { node: 0 },
            });
        }
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop()).map(|e| e.seq).collect();
        assert_eq!(order, vec![1, 2, 3, 0]);
    }

    #[test]
    fn oversized_interval_stops_the_flow() {
        let mut scene = hidden_terminal_scene(0, false);
        scene.flows[0].interval_ms = 1e30;
        assert!(validate_scene(&scene).is_ok());
        let (_, report) = run(&scene);
        assert_eq!(report.totals.frames_generated, 1);
        assert_eq!(report.totals.frames_delivered, 1);
    }

    #[test]
    fn clean_link_delivers_every_frame() {
        let (network, report) = run(&hidden_terminal_scene(0, false));
        assert_eq!(report.totals.frames_generated, 5);
        assert_eq!(report.totals.transmissions, 5);
        // Broadcast: B decodes all five, C is behind the wall.
        assert_eq!(network.mac_stats(2).unwrap().frames_received, 5);
        assert_eq!(network.mac_stats(3).unwrap().frames_received, 0);
        assert_eq!(report.totals.frames_delivered, 5);
        assert_eq!(report.totals.frame_errors, 0);
        assert!(report.totals.signals_below_limit >= 5);
        assert_eq!(network.phy(2).unwrap().mode(), PhyMode::Idle);
    }

    #[test]
    fn hidden_terminals_collide_at_the_middle_node() {
        let (network, report) = run(&hidden_terminal_scene(0, true));
        assert_eq!(report.totals.transmissions, 10);
        let b = network.phy(2).unwrap().stats();
        assert_eq!(b.signals_locked, 5);
        assert_eq!(b.signals_received, 0);
        assert_eq!(b.collisions, 5);
        assert_eq!(report.totals.collisions, 5);
    }

    #[test]
    fn other_channel_does_not_interfere() {
        let (network, report) = run(&hidden_terminal_scene(1, true));
        assert_eq!(report.totals.transmissions, 10);
        assert_eq!(network.mac_stats(2).unwrap().frames_received, 5);
        assert_eq!(report.totals.collisions, 0);
    }

    #[test]
    fn scheduled_actions_gate_reception() {
        let mut scene = hidden_terminal_scene(0, false);
        scene.flows[0].count = Some(10);
        scene.schedule.push(ScheduledAction {
            at_ms: 0.0,
            node_id: 2,
            action: NodeAction::TurnOff,
        });
        scene.schedule.push(ScheduledAction {
            at_ms: 45.0,
            node_id: 2,
            action: NodeAction::TurnOn,
        });
        let (network, _) = run(&scene);
        assert_eq!(network.mac_stats(2).unwrap().frames_received, 5);

        let mut scene = hidden_terminal_scene(0, false);
        scene.flows[0].count = Some(10);
        scene.nodes[1].channel = 1;
        scene.schedule.push(ScheduledAction {
            at_ms: 45.0,
            node_id: 2,
            action: NodeAction::SwitchChannel { channel: 0 },
        });
        let (network, _) = run(&scene);
        assert_eq!(network.mac_stats(2).unwrap().frames_received, 5);
        assert_eq!(network.phy(2).unwrap().channel(), 0);
    }

    #[test]
    fn same_seed_same_outcome() {
        let mut scene = hidden_terminal_scene(0, true);
        scene.path_loss.shadowing_sigma = 6.0;
        let (_, first) = run(&scene);
        let (_, second) = run(&scene);
        assert_eq!(first.events_processed, second.events_processed);
        assert_eq!(first.totals.frames_delivered, second.totals.frames_delivered);
        assert_eq!(first.totals.signals_below_limit, second.totals.signals_below_limit);
    }

    #[test]
    fn report_serializes_to_json() {
        let (_, report) = run(&hidden_terminal_scene(0, false));
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["generated_at"].as_str().is_some());
        assert_eq!(json["nodes"].as_array().unwrap().len(), 3);
        assert_eq!(json["nodes"][0]["final_mode"], "Idle");
        assert_eq!(json["totals"]["transmissions"], 5);
    }
}
