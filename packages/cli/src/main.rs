#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Headless incident map.
//!
//! Loads every incident once, subscribes to the backend's live push
//! events and logs the filtered view and camera each time they change,
//! until interrupted with Ctrl-C. With `--once` it only performs the bulk
//! load and prints the filtered list.

mod render;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use incident_map_client::HttpIncidentSource;
use incident_map_filter::{FilterError, FilterState, TypeSelector};
use incident_map_incident_models::{Coordinates, IncidentId, Severity};
use incident_map_sync::config::MapConfig;
use incident_map_sync::driver::MapView;
use incident_map_sync::loader::{self, LoadState};
use incident_map_sync::location::{FixedLocation, LocationProvider, NoLocation};
use incident_map_sync::session::{MapSession, SessionEvent};

/// Live incident map.
#[derive(Parser)]
#[command(name = "incident_map")]
#[command(about = "Stream live incidents and log the filtered map view")]
struct Cli {
    /// Backend base URL (overrides config and `INCIDENT_MAP_API_URL`).
    #[arg(long)]
    api_url: Option<String>,

    /// TOML file overriding the built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Radius around the user location, in km (1-50).
    #[arg(long)]
    radius: Option<f64>,

    /// Severity levels to show, comma separated (e.g. `HIGH,MEDIUM`).
    #[arg(long, value_delimiter = ',', value_parser = parse_severity)]
    severity: Vec<Severity>,

    /// Incident type to show (`ALL` or e.g. `FIRE`).
    #[arg(long = "type")]
    incident_type: Option<TypeSelector>,

    /// Incident to highlight and focus.
    #[arg(long)]
    highlight: Option<String>,

    /// User latitude.
    #[arg(long, requires = "lon", allow_hyphen_values = true)]
    lat: Option<f64>,

    /// User longitude.
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    lon: Option<f64>,

    /// Load once, print the filtered incidents and exit.
    #[arg(long)]
    once: bool,
}

fn parse_severity(value: &str) -> Result<Severity, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("unknown severity '{value}' (expected HIGH, MEDIUM or LOW)"))
}

impl Cli {
    fn filters(&self, base: &FilterState) -> Result<FilterState, FilterError> {
        let mut filters = base.clone();
        if let Some(radius) = self.radius {
            filters = filters.with_radius(radius)?;
        }
        if !self.severity.is_empty() {
            filters = FilterState::new(
                filters.radius_km(),
                self.severity.iter().copied(),
                filters.type_selector(),
            )?;
        }
        if let Some(selector) = self.incident_type {
            filters = filters.with_type(selector);
        }
        Ok(filters)
    }

    fn location(&self) -> Arc<dyn LocationProvider> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Arc::new(FixedLocation(Coordinates::new(lat, lon))),
            _ => Arc::new(NoLocation),
        }
    }

    fn highlight(&self) -> Option<IncidentId> {
        self.highlight.as_deref().map(IncidentId::new)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let args = Cli::parse();

    let mut config = MapConfig::load(args.config.as_deref())?;
    if let Some(api_url) = &args.api_url {
        config = config.with_api_url(api_url.as_str())?;
    }
    let filters = args.filters(&config.filters)?;

    log::info!(
        "Radius {} km, severities {:?}, type {}",
        filters.radius_km(),
        filters.severities(),
        filters.type_selector()
    );

    if args.once {
        return run_once(&args, &config, filters).await;
    }

    let deps = incident_map_client::dependencies(&config, args.location())?;
    let view = MapView::start(deps, filters, config.viewport_settings(), args.highlight());

    let mut frames = view.frames();
    log::info!("{}", render::summary(&frames.borrow_and_update()));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            changed = frames.changed() => {
                if changed.is_err() {
                    break;
                }
                let frame = frames.borrow_and_update().clone();
                log::info!("{}", render::summary(&frame));
                for line in render::incident_lines(&frame) {
                    log::debug!("{line}");
                }
            }
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    log::warn!("Failed to listen for Ctrl-C: {e}");
                }
                log::info!("Received Ctrl-C");
                break;
            }
        }
    }

    view.shutdown().await;
    Ok(())
}

async fn run_once(
    args: &Cli,
    config: &MapConfig,
    filters: FilterState,
) -> Result<(), Box<dyn std::error::Error>> {
    let source = HttpIncidentSource::new(&config.api_base_url());
    let location = args.location().current_position().await;

    let mut session = MapSession::new(filters, config.viewport_settings());
    session.apply(SessionEvent::HighlightChanged(args.highlight()));
    session.apply(SessionEvent::LocationResolved(location));
    session.apply(SessionEvent::BulkLoaded(loader::fetch(&source).await));

    if let LoadState::Failed { message } = session.load_state() {
        return Err(message.clone().into());
    }

    let frame = session.frame();
    println!("{}", render::summary(&frame));
    for line in render::incident_lines(&frame) {
        println!("{line}");
    }

    Ok(())
}
