//! Scene loading, parsing, and validation logic.
//!
//! A scene is a JSON file describing the radio parameters shared by all
//! nodes, the channels, the propagation environment, the nodes themselves,
//! the traffic flows and a schedule of channel switches and transceiver on/off
//! actions. BER table paths are resolved relative to the scene file.

use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::simulation::antenna::AntennaConfig;
use crate::simulation::ber::{BerTable, BerTableError, ReceptionModel};
use crate::simulation::mac::MacParameters;
use crate::simulation::phy_802_11::{PhyProfile, PhyStandard};
use crate::simulation::signal_calculations::{PathLossModel, PathLossParameters};
use crate::simulation::types::{NodeId, Obstacle, Point};

/// Error type for scene loading failures.
#[derive(Debug, Error)]
pub enum SceneLoadError {
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("BER table {path}: {source}")]
    BerTable {
        path: PathBuf,
        #[source]
        source: BerTableError,
    },
}

fn default_tx_power() -> f64 {
    15.0
}

fn default_temperature() -> f64 {
    290.0
}

fn default_noise_factor() -> f64 {
    10.0
}

fn default_antenna_height() -> f64 {
    1.5
}

fn default_propagation_limit() -> f64 {
    -111.0
}

/// BER table file overriding the generated table of one data rate.
#[derive(Debug, Deserialize, Clone)]
pub struct BerTableFile {
    pub data_rate_mbps: f64,
    pub path: PathBuf,
}

/// Radio parameters shared by every node unless overridden per node.
#[derive(Debug, Deserialize, Clone)]
pub struct RadioParameters {
    pub standard: PhyStandard,
    #[serde(default = "default_tx_power")]
    pub tx_power_dbm: f64,
    pub data_rate_mbps: f64,
    /// Receiver temperature in Kelvin.
    #[serde(default = "default_temperature")]
    pub temperature_k: f64,
    /// Linear noise factor of the receiver.
    #[serde(default = "default_noise_factor")]
    pub noise_factor: f64,
    #[serde(default = "default_antenna_height")]
    pub antenna_height_m: f64,
    #[serde(default)]
    pub antenna: AntennaConfig,
    #[serde(default)]
    pub reception_model: ReceptionModel,
    #[serde(default)]
    pub ber_tables: Vec<BerTableFile>,
    /// Signals weaker than this are not delivered to a receiver at all.
    #[serde(default = "default_propagation_limit")]
    pub propagation_limit_dbm: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChannelConfig {
    pub frequency_hz: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NodeConfig {
    pub node_id: NodeId,
    pub position: Point,
    /// Initial channel index.
    #[serde(default)]
    pub channel: usize,
    #[serde(default)]
    pub tx_power_dbm: Option<f64>,
    #[serde(default)]
    pub data_rate_mbps: Option<f64>,
    #[serde(default)]
    pub antenna: Option<AntennaConfig>,
}

/// Periodic traffic from one node, unicast or broadcast.
#[derive(Debug, Deserialize, Clone)]
pub struct FlowConfig {
    pub source: NodeId,
    /// `None` broadcasts.
    #[serde(default)]
    pub destination: Option<NodeId>,
    pub payload_bytes: usize,
    pub interval_ms: f64,
    #[serde(default)]
    pub start_ms: f64,
    /// Number of frames, unlimited when absent.
    #[serde(default)]
    pub count: Option<u32>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NodeAction {
    SwitchChannel { channel: usize },
    TurnOff,
    TurnOn,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduledAction {
    pub at_ms: f64,
    pub node_id: NodeId,
    #[serde(flatten)]
    pub action: NodeAction,
}

/// Root structure representing the entire scene.
#[derive(Debug, Deserialize, Clone)]
pub struct Scene {
    pub radio: RadioParameters,
    pub channels: Vec<ChannelConfig>,
    pub path_loss: PathLossParameters,
    #[serde(default)]
    pub obstacles: Vec<Obstacle>,
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub flows: Vec<FlowConfig>,
    #[serde(default)]
    pub schedule: Vec<ScheduledAction>,
    #[serde(default)]
    pub mac: MacParameters,
    pub duration_ms: f64,
    #[serde(default)]
    pub seed: u64,
}

impl Scene {
    /// Build the PHY profile of the scene's standard, replacing generated BER
    /// tables with the configured files.
    pub fn build_profile(&self) -> Result<PhyProfile, SceneLoadError> {
        let mut profile = PhyProfile::new(self.radio.standard);
        for file in &self.radio.ber_tables {
            let table = BerTable::load(&file.path).map_err(|source| SceneLoadError::BerTable {
                path: file.path.clone(),
                source,
            })?;
            let index = profile
                .rate_index(file.data_rate_mbps)
                .ok_or_else(|| SceneLoadError::Validation(format!("BER table {} refers to unknown data rate {} Mbps", file.path.display(), file.data_rate_mbps)))?;
            profile.set_ber_table(index, table);
            log::info!("Loaded BER table {} for {} Mbps", file.path.display(), file.data_rate_mbps);
        }
        Ok(profile)
    }
}

/// Load and parse a scene from a file.
///
/// Relative BER table paths are resolved against the scene's directory.
pub fn load_scene(path: &Path) -> Result<Scene, SceneLoadError> {
    let data = fs::read_to_string(path).map_err(|source| SceneLoadError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    let mut scene = parse_scene(&data)?;

    if let Some(parent_dir) = path.parent() {
        for file in &mut scene.radio.ber_tables {
            if file.path.is_relative() {
                file.path = parent_dir.join(&file.path);
            }
        }
    }
    Ok(scene)
}

/// Parse and validate a scene from its JSON text.
pub fn parse_scene(data: &str) -> Result<Scene, SceneLoadError> {
    let scene: Scene = serde_json::from_str(data)?;
    validate_scene(&scene).map_err(SceneLoadError::Validation)?;
    Ok(scene)
}

/// Validate scene configuration to reject malformed inputs.
///
/// # Returns
///
/// `Ok(())` if validation passes, `Err(String)` with error description otherwise.
pub fn validate_scene(scene: &Scene) -> Result<(), String> {
    const MAX_WORLD_COORD: f64 = 100_000.0;
    const MAX_NODES: usize = 10000;
    const MIN_TX_POWER: f64 = -50.0;
    const MAX_TX_POWER: f64 = 50.0;

    if scene.nodes.is_empty() {
        return Err("Scene must contain at least one node".to_string());
    }
    if scene.nodes.len() > MAX_NODES {
        return Err(format!("Node count {} exceeds maximum of {}", scene.nodes.len(), MAX_NODES));
    }
    if scene.duration_ms <= 0.0 {
        return Err("duration_ms must be positive".to_string());
    }

    // Radio parameters
    let profile = PhyProfile::new(scene.radio.standard);
    let check_rate = |mbps: f64, owner: &str| {
        if profile.rate_index(mbps).is_none() {
            let known: Vec<String> = profile.rates().iter().map(|r| r.mbps().to_string()).collect();
            return Err(format!("{} uses data rate {} Mbps, not one of {}", owner, mbps, known.join(", ")));
        }
        Ok(())
    };
    let check_power = |dbm: f64, owner: &str| {
        if !(MIN_TX_POWER..=MAX_TX_POWER).contains(&dbm) {
            return Err(format!("{} tx power {} dBm outside realistic range ({} to {} dBm)", owner, dbm, MIN_TX_POWER, MAX_TX_POWER));
        }
        Ok(())
    };
    check_rate(scene.radio.data_rate_mbps, "radio")?;
    check_power(scene.radio.tx_power_dbm, "radio")?;
    if scene.radio.temperature_k <= 0.0 {
        return Err("temperature_k must be positive".to_string());
    }
    if scene.radio.noise_factor < 1.0 {
        return Err(format!("noise_factor {} must be at least 1", scene.radio.noise_factor));
    }
    if scene.radio.antenna_height_m <= 0.0 {
        return Err("antenna_height_m must be positive".to_string());
    }
    validate_antenna(&scene.radio.antenna).map_err(|e| format!("radio antenna: {}", e))?;
    for file in &scene.radio.ber_tables {
        check_rate(file.data_rate_mbps, &format!("BER table {}", file.path.display()))?;
    }

    // Channels
    if scene.channels.is_empty() {
        return Err("Scene must define at least one channel".to_string());
    }
    for (idx, channel) in scene.channels.iter().enumerate() {
        if channel.frequency_hz <= 0.0 {
            return Err(format!("Channel {} frequency must be positive", idx));
        }
    }

    // Path loss
    match scene.path_loss.model {
        PathLossModel::LogDistance { path_loss_exponent, .. } if path_loss_exponent <= 0.0 => {
            return Err("Invalid path_loss_exponent, must be positive".to_string());
        }
        _ => {}
    }
    if scene.path_loss.shadowing_sigma < 0.0 {
        return Err("Invalid shadowing_sigma, must be non-negative".to_string());
    }

    // Nodes
    let mut node_ids = HashSet::new();
    for node in &scene.nodes {
        if !node_ids.insert(node.node_id) {
            return Err(format!("Duplicate node_id found: {}", node.node_id));
        }
    }
    for node in &scene.nodes {
        let owner = format!("Node {}", node.node_id);
        if node.position.x.abs() > MAX_WORLD_COORD || node.position.y.abs() > MAX_WORLD_COORD {
            return Err(format!(
                "Node {} position ({}, {}) exceeds world bounds (±{})",
                node.node_id, node.position.x, node.position.y, MAX_WORLD_COORD
            ));
        }
        if node.channel >= scene.channels.len() {
            return Err(format!("Node {} uses undefined channel {}", node.node_id, node.channel));
        }
        if let Some(power) = node.tx_power_dbm {
            check_power(power, &owner)?;
        }
        if let Some(rate) = node.data_rate_mbps {
            check_rate(rate, &owner)?;
        }
        if let Some(antenna) = &node.antenna {
            validate_antenna(antenna).map_err(|e| format!("{} antenna: {}", owner, e))?;
        }
    }

    // Traffic
    for (idx, flow) in scene.flows.iter().enumerate() {
        if !node_ids.contains(&flow.source) {
            return Err(format!("Flow {} source {} is not a node", idx, flow.source));
        }
        if let Some(destination) = flow.destination {
            if !node_ids.contains(&destination) {
                return Err(format!("Flow {} destination {} is not a node", idx, destination));
            }
            if destination == flow.source {
                return Err(format!("Flow {} sends to its own source", idx));
            }
        }
        if flow.payload_bytes == 0 {
            return Err(format!("Flow {} payload_bytes must be positive", idx));
        }
        if flow.interval_ms <= 0.0 || flow.start_ms < 0.0 {
            return Err(format!("Flow {} needs a positive interval_ms and a non-negative start_ms", idx));
        }
    }

    for (idx, entry) in scene.schedule.iter().enumerate() {
        if !node_ids.contains(&entry.node_id) {
            return Err(format!("Schedule entry {} refers to unknown node {}", idx, entry.node_id));
        }
        if entry.at_ms < 0.0 {
            return Err(format!("Schedule entry {} has a negative time", idx));
        }
        if let NodeAction::SwitchChannel { channel } = entry.action {
            if channel >= scene.channels.len() {
                return Err(format!("Schedule entry {} switches to undefined channel {}", idx, channel));
            }
        }
    }

    // MAC
    if scene.mac.cw_min > scene.mac.cw_max {
        return Err(format!("mac cw_min {} exceeds cw_max {}", scene.mac.cw_min, scene.mac.cw_max));
    }
    if scene.mac.queue_limit == 0 {
        return Err("mac queue_limit must be positive".to_string());
    }

    // Obstacles
    for (idx, obstacle) in scene.obstacles.iter().enumerate() {
        if obstacle.attenuation_db() < 0.0 {
            return Err(format!("Obstacle {} has a negative attenuation", idx));
        }
        match obstacle {
            Obstacle::Rectangle { position, .. } => {
                if position.top_left.x >= position.bottom_right.x || position.top_left.y >= position.bottom_right.y {
                    return Err(format!(
                        "Obstacle {} (rectangle) has invalid geometry: top-left ({}, {}) must be strictly less than bottom-right ({}, {})",
                        idx, position.top_left.x, position.top_left.y, position.bottom_right.x, position.bottom_right.y
                    ));
                }
            }
            Obstacle::Circle { position, .. } => {
                if position.radius <= 0.0 {
                    return Err(format!("Obstacle {} (circle) has non-positive radius", idx));
                }
            }
        }
    }

    Ok(())
}

fn validate_antenna(antenna: &AntennaConfig) -> Result<(), String> {
    match antenna {
        AntennaConfig::Omnidirectional { .. } => Ok(()),
        AntennaConfig::Steerable { beamwidth_deg, .. } => {
            if *beamwidth_deg <= 0.0 || *beamwidth_deg > 360.0 {
                return Err(format!("beamwidth {} must be in (0, 360] degrees", beamwidth_deg));
            }
            Ok(())
        }
        AntennaConfig::SwitchedBeam { sector_count, .. } => {
            if *sector_count == 0 {
                return Err("sector_count must be positive".to_string());
            }
            Ok(())
        }
    }
}
