//! Radio PHY simulation core module.
//!
//! ## Module Organization
//!
//! - `types`: Core data structures (time, geometry, frames, signals)
//! - `signal_calculations`: Power conversions, thermal noise, path loss, delay
//! - `geometry`: Distances, bearings and obstacle intersection logic
//! - `ber`: BER tables and packet error probability
//! - `phy_802_11`: 802.11a/b data rates and frame timing
//! - `antenna`: Omnidirectional, steerable and switched-beam antennas
//! - `phy`: The per-radio PHY state machine
//! - `mac`: Minimal CSMA MAC driving the PHY
//! - `range`: Propagation range search
//! - `network`: Discrete-event driver tying nodes, channel and traffic together

pub mod antenna;
pub mod ber;
pub mod geometry;
pub mod mac;
pub mod network;
pub mod phy;
pub mod phy_802_11;
pub mod range;
pub mod signal_calculations;
pub mod types;

pub use network::Network;
