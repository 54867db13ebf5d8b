#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Network implementations of the incident map I/O traits.
//!
//! [`http::HttpIncidentSource`] performs the one-shot bulk fetch over REST
//! and [`socket_io::SocketIoChannel`] subscribes to the backend's Socket.IO
//! push events. [`dependencies`] wires both up from a [`MapConfig`].

pub mod http;
pub mod socket_io;

use std::sync::Arc;

use incident_map_sync::ConfigError;
use incident_map_sync::config::MapConfig;
use incident_map_sync::driver::MapDependencies;
use incident_map_sync::location::LocationProvider;

pub use http::HttpIncidentSource;
pub use socket_io::SocketIoChannel;

/// Builds the network-backed dependencies of a map session.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if the configured API URL cannot be
/// turned into a websocket URL.
pub fn dependencies(
    config: &MapConfig,
    location: Arc<dyn LocationProvider>,
) -> Result<MapDependencies, ConfigError> {
    let api_base_url = config.api_base_url();
    let channel = SocketIoChannel::from_config(config)?;

    log::debug!(
        "Using API {api_base_url} and push channel {}",
        channel.url()
    );

    Ok(MapDependencies {
        source: Arc::new(HttpIncidentSource::new(&api_base_url)),
        channel: Arc::new(channel),
        location,
    })
}
