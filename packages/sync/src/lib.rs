#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Live incident synchronization engine backing the map view.
//!
//! Merges a one-shot bulk fetch ([`loader`]) with an unbounded push-event
//! stream ([`events`]) into a single [`store::IncidentStore`], then derives
//! the filtered view, deep-link highlight and camera for every change.
//!
//! All state transitions go through [`session::MapSession::apply`], a
//! reducer over [`session::SessionEvent`]s. [`driver::MapView`] feeds that
//! reducer from a single consumer task so that fetch completions, location
//! results and push events are applied strictly one at a time, in arrival
//! order, and never after teardown.
//!
//! I/O lives behind the [`loader::IncidentSource`],
//! [`events::PushChannel`] and [`location::LocationProvider`] traits.

pub mod config;
pub mod driver;
pub mod events;
pub mod loader;
pub mod location;
pub mod session;
pub mod store;

use thiserror::Error;

/// Errors from the one-shot bulk fetch.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The request could not be sent or the connection failed.
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// The response body was not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from normalizing a push-channel payload.
#[derive(Debug, Error)]
pub enum EventError {
    /// The (unwrapped) payload is not a JSON object.
    #[error("payload for '{event}' is not an object")]
    NotAnObject {
        /// Event name.
        event: String,
    },

    /// The record has no usable identifier.
    #[error("payload for '{event}' has no identifier")]
    MissingIdentifier {
        /// Event name.
        event: String,
    },

    /// The record could not be decoded into an incident.
    #[error("payload for '{event}' could not be decoded: {source}")]
    Decode {
        /// Event name.
        event: String,
        /// Underlying decode error.
        source: serde_json::Error,
    },
}

/// Errors from the push-channel transport.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel URL could not be built.
    #[error("Invalid channel URL: {0}")]
    InvalidUrl(String),

    /// The underlying connection failed.
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The server violated the channel protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Errors from the device location request.
#[derive(Debug, Clone, Error)]
pub enum LocationError {
    /// The user or platform refused access.
    #[error("location access denied")]
    Denied,

    /// No position could be determined.
    #[error("location unavailable: {0}")]
    Unavailable(String),
}

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading a config file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A config document is not valid TOML or does not match the schema.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A value is syntactically valid but unusable.
    #[error("Invalid config value for {key}: {message}")]
    Invalid {
        /// Config key.
        key: &'static str,
        /// What is wrong with it.
        message: String,
    },
}
