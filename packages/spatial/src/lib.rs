#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Spatial helpers for the incident map.
//!
//! Provides the haversine great-circle distance used by the radius filter,
//! minimal bounding boxes over incident coordinates, and the Web-Mercator
//! fit-bounds computation that turns a bounding box into a camera center
//! and zoom level for a viewport of known pixel size.

use geo::{BoundingRect, MultiPoint, Point};
use incident_map_incident_models::Coordinates;
use serde::Serialize;

/// Mean Earth radius in kilometres used by [`haversine_km`].
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Size in pixels of a single Web-Mercator tile at zoom 0.
const TILE_SIZE_PX: f64 = 256.0;

/// Latitude limit of the Web-Mercator projection.
const MAX_MERCATOR_LATITUDE: f64 = 85.051_128_779_806_59;

/// Great-circle distance in kilometres between two points.
///
/// `a = sin²(Δlat/2) + cos(lat1)·cos(lat2)·sin²(Δlon/2)`,
/// `d = 2·R·atan2(√a, √(1−a))`.
#[must_use]
pub fn haversine_km(from: Coordinates, to: Coordinates) -> f64 {
    let d_lat = (to.latitude - from.latitude).to_radians();
    let d_lon = (to.longitude - from.longitude).to_radians();

    let a = (d_lat / 2.0).sin() * (d_lat / 2.0).sin()
        + from.latitude.to_radians().cos()
            * to.latitude.to_radians().cos()
            * (d_lon / 2.0).sin()
            * (d_lon / 2.0).sin();
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// An axis-aligned latitude/longitude rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bounds {
    /// Southern edge (minimum latitude).
    pub south: f64,
    /// Western edge (minimum longitude).
    pub west: f64,
    /// Northern edge (maximum latitude).
    pub north: f64,
    /// Eastern edge (maximum longitude).
    pub east: f64,
}

impl Bounds {
    /// Minimal rectangle enclosing every point, or `None` for an empty input.
    #[must_use]
    pub fn enclosing(points: impl IntoIterator<Item = Coordinates>) -> Option<Self> {
        let multi: MultiPoint<f64> = points
            .into_iter()
            .map(|c| Point::new(c.longitude, c.latitude))
            .collect();

        multi.bounding_rect().map(|rect| Self {
            south: rect.min().y,
            west: rect.min().x,
            north: rect.max().y,
            east: rect.max().x,
        })
    }

    /// Whether the rectangle collapses to a single point.
    #[must_use]
    pub fn is_point(&self) -> bool {
        (self.north - self.south).abs() < f64::EPSILON && (self.east - self.west).abs() < f64::EPSILON
    }
}

/// Pixel dimensions and fitting constraints of the rendered map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    /// Viewport width in pixels.
    pub width_px: f64,
    /// Viewport height in pixels.
    pub height_px: f64,
    /// Padding applied on every side, in pixels.
    pub padding_px: f64,
    /// Upper bound for the resulting zoom level.
    pub max_zoom: u8,
}

/// Center and zoom that make `bounds` visible inside the padded viewport.
///
/// The zoom is the largest integer level at which the projected bounds fit,
/// clamped to `0..=max_zoom`. A single-point box always yields `max_zoom`.
#[must_use]
pub fn fit_bounds(bounds: &Bounds, options: &FitOptions) -> (Coordinates, u8) {
    let (west_x, north_y) = project(bounds.north, bounds.west);
    let (east_x, south_y) = project(bounds.south, bounds.east);

    let center = unproject(f64::midpoint(west_x, east_x), f64::midpoint(north_y, south_y));

    let span_x = (east_x - west_x).abs();
    let span_y = (south_y - north_y).abs();
    let available_x = 2.0f64.mul_add(-options.padding_px, options.width_px);
    let available_y = 2.0f64.mul_add(-options.padding_px, options.height_px);

    if span_x <= f64::EPSILON && span_y <= f64::EPSILON {
        return (center, options.max_zoom);
    }
    if available_x <= 0.0 || available_y <= 0.0 {
        return (center, 0);
    }

    let scale_x = if span_x > f64::EPSILON {
        available_x / span_x
    } else {
        f64::INFINITY
    };
    let scale_y = if span_y > f64::EPSILON {
        available_y / span_y
    } else {
        f64::INFINITY
    };
    let zoom = scale_x.min(scale_y).log2().floor();

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let zoom = zoom.clamp(0.0, f64::from(options.max_zoom)) as u8;

    (center, zoom)
}

/// Projects a coordinate to zoom-0 Web-Mercator pixel space.
fn project(latitude: f64, longitude: f64) -> (f64, f64) {
    let lat = latitude
        .clamp(-MAX_MERCATOR_LATITUDE, MAX_MERCATOR_LATITUDE)
        .to_radians();
    let x = (longitude + 180.0) / 360.0 * TILE_SIZE_PX;
    let y = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / std::f64::consts::PI) / 2.0 * TILE_SIZE_PX;
    (x, y)
}

/// Inverse of [`project`].
fn unproject(x: f64, y: f64) -> Coordinates {
    let longitude = x / TILE_SIZE_PX * 360.0 - 180.0;
    let n = std::f64::consts::PI * (1.0 - 2.0 * y / TILE_SIZE_PX);
    let latitude = n.sinh().atan().to_degrees();
    Coordinates::new(latitude, longitude)
}
