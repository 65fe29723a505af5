//! Type definitions for the simulation.
//!
//! Contains the data structures shared across the simulation:
//! - Virtual time (`SimTime`) and its arithmetic with `std::time::Duration`
//! - World geometry (points, obstacles)
//! - Frames handed between MAC and PHY, and the signals the channel delivers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;
use std::time::Duration;

/// Identifier of a node (one radio per node).
pub type NodeId = u32;

/// Identifier of a transmission on the air. All copies of the same
/// transmission delivered to different receivers share the id.
pub type SignalId = u64;

/// Speed of light in m/s, used for propagation delay.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Virtual simulation timestamp with nanosecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct SimTime(u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);

    pub const fn from_nanos(nanos: u64) -> Self {
        SimTime(nanos)
    }

    pub const fn from_micros(micros: u64) -> Self {
        SimTime(micros * 1_000)
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1e9
    }

    /// Time elapsed since `earlier`, saturating at zero.
    pub fn duration_since(&self, earlier: SimTime) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Duration) -> SimTime {
        SimTime(self.0.saturating_add(rhs.as_nanos() as u64))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}

/// Simple 2D point in meters.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Rectangle position with two corners
#[derive(Debug, Deserialize, Clone)]
pub struct RectPos {
    #[serde(rename = "top-left-position")]
    pub top_left: Point,
    #[serde(rename = "bottom-right-position")]
    pub bottom_right: Point,
}

/// Circle position defined by its center
#[derive(Debug, Deserialize, Clone)]
pub struct CirclePos {
    #[serde(rename = "center_position")]
    pub center: Point,
    pub radius: f64,
}

fn default_obstacle_attenuation() -> f64 {
    20.0
}

/// Obstacles expressed in world coordinates. Every obstacle crossed by the
/// straight line between transmitter and receiver adds its attenuation (dB)
/// to the path loss.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type")]
pub enum Obstacle {
    #[serde(rename = "rectangle")]
    Rectangle {
        #[serde(flatten)]
        position: RectPos,
        #[serde(default = "default_obstacle_attenuation")]
        attenuation_db: f64,
    },
    #[serde(rename = "circle")]
    Circle {
        #[serde(flatten)]
        position: CirclePos,
        #[serde(default = "default_obstacle_attenuation")]
        attenuation_db: f64,
    },
}

impl Obstacle {
    pub fn attenuation_db(&self) -> f64 {
        match self {
            Obstacle::Rectangle { attenuation_db, .. } | Obstacle::Circle { attenuation_db, .. } => *attenuation_db,
        }
    }
}

/// A MAC frame carried by a transmission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    /// Originating node.
    pub source: NodeId,
    /// Addressed node, `None` for broadcast.
    pub destination: Option<NodeId>,
    /// Index of the traffic flow that generated the frame.
    pub flow_id: usize,
    /// Per-flow sequence number.
    pub sequence: u32,
    /// Payload size in bytes (MAC header included).
    pub size_bytes: usize,
    /// Time the frame was handed to the MAC.
    pub created: SimTime,
}

impl Frame {
    pub fn is_for(&self, node_id: NodeId) -> bool {
        self.destination.is_none_or(|dest| dest == node_id)
    }
}

/// A copy of a transmission as seen by one receiver.
///
/// `power_dbm` already includes transmit power, transmit antenna gain, path
/// loss, shadowing and obstacle attenuation. The receiving antenna gain is
/// applied by the PHY, because it depends on the receiver's antenna state at
/// the moment of arrival.
#[derive(Debug, Clone)]
pub struct Signal {
    pub id: SignalId,
    pub sender: NodeId,
    pub channel: usize,
    pub frame: Frame,
    /// Index into the PHY rate table.
    pub data_rate: usize,
    pub power_dbm: f64,
    /// Bearing (radians, 0 = +x axis) from the receiver toward the sender.
    pub arrival_bearing: f64,
    /// First bit at the receiver.
    pub start: SimTime,
    /// Last bit at the receiver.
    pub end: SimTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_time_arithmetic_saturates() {
        let t = SimTime::from_micros(10) + Duration::from_micros(5);
        assert_eq!(t, SimTime::from_micros(15));
        assert_eq!(t.duration_since(SimTime::from_micros(20)), Duration::ZERO);
        assert_eq!(t.duration_since(SimTime::from_micros(5)), Duration::from_micros(10));
    }

    #[test]
    fn broadcast_frames_are_for_everyone() {
        let mut frame = Frame {
            source: 1,
            destination: None,
            flow_id: 0,
            sequence: 0,
            size_bytes: 100,
            created: SimTime::ZERO,
        };
        assert!(frame.is_for(7));
        frame.destination = Some(2);
        assert!(frame.is_for(2));
        assert!(!frame.is_for(7));
    }
}
