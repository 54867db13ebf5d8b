#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Viewport control for the incident map.
//!
//! The [`controller`] module resolves competing camera intents (highlight,
//! manual override, auto-fit, user location, static fallback) into a single
//! [`Viewport`]. The [`deep_link`] module turns an externally supplied
//! incident identifier into a one-time highlight command once that incident
//! shows up in the store with coordinates.

pub mod controller;
pub mod deep_link;

use incident_map_incident_models::Coordinates;
use serde::Serialize;

pub use controller::{CameraCommand, CameraTier, ViewportController, ViewportSettings};
pub use deep_link::{DeepLinkResolver, DeepLinkState, HighlightCommand};

/// Camera state used to render the map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Viewport {
    /// Center of the map.
    pub center: Coordinates,
    /// Zoom level.
    pub zoom: u8,
}

impl Viewport {
    /// Creates a viewport.
    #[must_use]
    pub const fn new(center: Coordinates, zoom: u8) -> Self {
        Self { center, zoom }
    }
}
