#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the heat map viewport synchronizer.
//!
//! Runs the synchronizer against a real clustering backend without a map:
//! `watch` follows viewport changes typed (or piped) on stdin and prints
//! every state change as a JSON line.

mod input;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use heat_map_geocoder::{AddressResolver, ProviderChain};
use heat_map_sync::{FetchOutcome, HeatMapSync, SyncConfig};
use heat_map_viewport_models::{Bounds, Coordinates, ViewportQuery};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

/// How often `watch` checks for outstanding work after stdin closes.
const SETTLE_POLL: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "heat_map_cli", about = "Heat map viewport synchronizer")]
struct Cli {
    /// TOML config file (built-in defaults otherwise)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the initial view, then follow viewport lines read from stdin
    /// (`view <zoom> <west> <south> <east> <north>`, `refresh ...`,
    /// `snapshot`)
    Watch,
    /// Fetch one viewport and print its points and stats
    Fetch {
        /// Map zoom level (1-20)
        #[arg(long, default_value = "11")]
        zoom: u8,
        /// Bounding box as `west,south,east,north`. Without one, the
        /// initial window around the caller's position is fetched.
        #[arg(long, value_parser = input::parse_bbox, allow_hyphen_values = true)]
        bbox: Option<Bounds>,
    },
    /// Resolve the address nearest to a coordinate
    Reverse {
        /// Latitude in degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        /// Longitude in degrees
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_custom_env("RUST_LOG");
    let cli = Cli::parse();
    let config = SyncConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Watch => watch(config).await?,
        Commands::Fetch { zoom, bbox } => fetch(config, zoom, bbox).await?,
        Commands::Reverse { lat, lng } => {
            let client = config.http_client()?;
            let chain = ProviderChain::from_registry(&client)?;
            let resolver = AddressResolver::new(Arc::new(chain));
            println!("{}", resolver.resolve(Coordinates::new(lat, lng)).await);
        }
    }

    Ok(())
}

async fn fetch(
    config: SyncConfig,
    zoom: u8,
    bbox: Option<Bounds>,
) -> Result<(), Box<dyn std::error::Error>> {
    let sync = HeatMapSync::from_config(config)?;

    let outcome = match bbox {
        Some(bounds) => sync.refresh(ViewportQuery::new(zoom, Some(bounds))).await,
        None => sync.start().await,
    };
    report(&outcome);

    println!("{}", serde_json::to_string_pretty(&sync.snapshot())?);
    Ok(())
}

async fn watch(config: SyncConfig) -> Result<(), Box<dyn std::error::Error>> {
    let sync = HeatMapSync::from_config(config)?;

    let mut events = sync.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => println!("{json}"),
                    Err(e) => log::error!("Failed to serialize event: {e}"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Event printer fell behind, skipped {skipped} events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    report(&sync.start().await);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match input::parse_line(&line) {
            Ok(input::Command::Viewport { bounds, zoom }) => {
                sync.handle_viewport_change(bounds, zoom);
            }
            Ok(input::Command::Refresh { bounds, zoom }) => {
                report(&sync.refresh(ViewportQuery::new(zoom, Some(bounds))).await);
            }
            Ok(input::Command::Snapshot) => {
                println!("{}", serde_json::to_string(&sync.snapshot())?);
            }
            Ok(input::Command::Skip) => {}
            Err(e) => log::warn!("Ignoring line {line:?}: {e}"),
        }
    }

    while !sync.is_idle() {
        tokio::time::sleep(SETTLE_POLL).await;
    }
    println!("{}", serde_json::to_string(&sync.snapshot())?);

    sync.shutdown();
    printer.abort();
    Ok(())
}

fn report(outcome: &FetchOutcome) {
    match outcome {
        FetchOutcome::Applied { point_count } => log::info!("Loaded {point_count} points"),
        FetchOutcome::Failed { message } => log::error!("{message}"),
        FetchOutcome::Superseded => log::debug!("Fetch superseded"),
    }
}
