//! Command line front end of the radio PHY simulator.
//!
//! Usage:
//!     radio-phy-simulator run scenes/office.json
//!     radio-phy-simulator run scenes/office.json --seed 3 --report out.json
//!     radio-phy-simulator range scenes/office.json --rate 6

use anyhow::Context;
use clap::{Parser, Subcommand};
use env_logger::Builder;
use log::{LevelFilter, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod common;
mod simulation;

use common::config::SimulatorConfig;
use common::scene::{Scene, load_scene};
use simulation::Network;
use simulation::antenna::Antenna;
use simulation::range::{RangeQuery, RangeResult, propagation_range};
use simulation::signal_calculations::{LinkGeometry, thermal_noise_mw};

#[derive(Parser, Debug)]
#[command(name = "radio-phy-simulator")]
#[command(about = "Discrete-event simulator of 802.11 radio PHYs")]
#[command(version)]
struct Cli {
    /// Runtime config (default: config.toml next to the scene)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Simulate a scene and write the JSON report
    Run {
        scene: PathBuf,
        /// Override the scene's random seed
        #[arg(long)]
        seed: Option<u64>,
        /// Report path (default: report-path from the config)
        #[arg(short, long)]
        report: Option<PathBuf>,
    },
    /// Find the distance where the packet error rate crosses the threshold
    Range {
        scene: PathBuf,
        /// Only search this data rate (Mbps); all rates otherwise
        #[arg(long)]
        rate: Option<f64>,
        /// Print the results as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Command {
    fn scene(&self) -> &Path {
        match self {
            Command::Run { scene, .. } | Command::Range { scene, .. } => scene,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(|| SimulatorConfig::config_path_from_scene(cli.command.scene()));
    let config = SimulatorConfig::load_or_default(&config_path)
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("Invalid config {}", config_path.display()))?;

    // Logging setup; RUST_LOG overrides the config file.
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("radio_phy_simulator"), config.level_filter().unwrap_or(LevelFilter::Debug))
        .parse_default_env()
        .init();

    info!("Starting up");

    let scene_path = cli.command.scene().to_path_buf();
    let mut scene = load_scene(&scene_path).with_context(|| format!("Failed to load scene {}", scene_path.display()))?;
    info!("Loaded scene {}: {} nodes, standard {:?}", scene_path.display(), scene.nodes.len(), scene.radio.standard);

    match cli.command {
        Command::Run { seed, report, .. } => {
            if let Some(seed) = seed {
                scene.seed = seed;
            }
            let report_path = report.unwrap_or_else(|| scene_path.parent().unwrap_or(Path::new(".")).join(&config.report_path));
            run_scene(&scene, &report_path)
        }
        Command::Range { rate, json, .. } => range_scene(&scene, &config, rate, json),
    }
}

fn run_scene(scene: &Scene, report_path: &Path) -> anyhow::Result<()> {
    let profile = Arc::new(scene.build_profile()?);
    let mut network = Network::new(scene, profile)?;
    let report = network.run();

    let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
    fs::write(report_path, json).with_context(|| format!("Failed to write report {}", report_path.display()))?;
    info!(
        "Report written to {} ({} delivered, {} errors, {} collisions)",
        report_path.display(),
        report.totals.frames_delivered,
        report.totals.frame_errors,
        report.totals.collisions
    );
    Ok(())
}

fn range_scene(scene: &Scene, config: &SimulatorConfig, only_rate: Option<f64>, json: bool) -> anyhow::Result<()> {
    let profile = scene.build_profile()?;
    let radio = &scene.radio;
    let channel = scene.channels.first().context("Scene has no channel")?;
    let geometry = LinkGeometry {
        frequency_hz: channel.frequency_hz,
        tx_antenna_height: radio.antenna_height_m,
        rx_antenna_height: radio.antenna_height_m,
    };
    let noise_mw = thermal_noise_mw(radio.temperature_k, radio.noise_factor, profile.bandwidth_hz);
    // Both ends use the omni gain of the default antenna.
    let gain = Antenna::new(radio.antenna.clone()).rx_gain_dbi(0.0);

    let rates: Vec<usize> = match only_rate {
        Some(mbps) => vec![profile.rate_index(mbps).with_context(|| format!("{} Mbps is not a {:?} rate", mbps, radio.standard))?],
        None => (0..profile.rates().len()).collect(),
    };

    let mut results: Vec<RangeResult> = Vec::with_capacity(rates.len());
    for data_rate in rates {
        let query = RangeQuery {
            data_rate,
            payload_bytes: config.range.payload_bytes,
            reception_model: radio.reception_model,
            tx_power_dbm: radio.tx_power_dbm,
            tx_gain_dbi: gain,
            rx_gain_dbi: gain,
            per_threshold: config.range.per_threshold,
            tolerance_m: config.range.tolerance_m,
            initial_guess_m: config.range.initial_guess_m,
            max_distance_m: config.range.max_distance_m,
        };
        results.push(propagation_range(&query, &profile, &scene.path_loss, &geometry, noise_mw)?);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        println!("{:>10} {:>12} {:>8}", "Mbps", "range (m)", "PER");
        for r in &results {
            let note = if r.capped { " (capped)" } else { "" };
            println!("{:>10} {:>12.1} {:>8.4}{}", r.data_rate_mbps, r.distance_m, r.packet_error_rate, note);
        }
    }
    Ok(())
}
