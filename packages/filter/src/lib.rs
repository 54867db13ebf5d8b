#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Filtering of incident records for the map view.
//!
//! [`matches`] is a pure predicate over an incident, the user's
//! [`FilterState`], the (optional) user location and the (optional)
//! deep-link highlight target. Steps short-circuit in a fixed order:
//!
//! 1. the highlighted incident always passes;
//! 2. the type selector must match the primary or legacy type field;
//! 3. the severity must be in the selected set;
//! 4. with a known user location, the haversine distance must not exceed
//!    the radius.
//!
//! [`FilterState`] values are never mutated in place; the helpers return new
//! values for the caller to supply.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use incident_map_incident_models::{Coordinates, Incident, IncidentId, IncidentType, Severity};
use incident_map_spatial::haversine_km;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest selectable radius in kilometres.
pub const MIN_RADIUS_KM: f64 = 1.0;

/// Largest selectable radius in kilometres.
pub const MAX_RADIUS_KM: f64 = 50.0;

/// Errors from constructing or adjusting a [`FilterState`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    /// Radius outside the selectable range.
    #[error("radius {radius_km} km is outside 1-50 km")]
    RadiusOutOfRange {
        /// The rejected radius.
        radius_km: f64,
    },

    /// The severity set would become empty.
    #[error("at least one severity level must remain selected")]
    EmptySeverities,

    /// A type selector string matched neither `ALL` nor a catalogue value.
    #[error("unknown incident type selector: {0}")]
    UnknownType(String),
}

/// Either every type or exactly one catalogue type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TypeSelector {
    /// No type restriction.
    #[default]
    All,
    /// Only incidents of this type.
    Only(IncidentType),
}

impl TypeSelector {
    /// Whether `incident` satisfies this selector.
    #[must_use]
    pub fn admits(self, incident: &Incident) -> bool {
        match self {
            Self::All => true,
            Self::Only(ty) => incident.has_type(ty),
        }
    }
}

impl fmt::Display for TypeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("ALL"),
            Self::Only(ty) => f.write_str(ty.as_ref()),
        }
    }
}

impl FromStr for TypeSelector {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("ALL") {
            return Ok(Self::All);
        }
        IncidentType::all()
            .iter()
            .copied()
            .find(|ty| ty.as_ref().eq_ignore_ascii_case(s))
            .map(Self::Only)
            .ok_or_else(|| FilterError::UnknownType(s.to_string()))
    }
}

impl TryFrom<String> for TypeSelector {
    type Error = FilterError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TypeSelector> for String {
    fn from(value: TypeSelector) -> Self {
        value.to_string()
    }
}

/// User-selected filter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFilterState")]
pub struct FilterState {
    radius_km: f64,
    severities: BTreeSet<Severity>,
    type_selector: TypeSelector,
}

#[derive(Deserialize)]
struct RawFilterState {
    radius_km: f64,
    severities: BTreeSet<Severity>,
    #[serde(default)]
    type_selector: TypeSelector,
}

impl TryFrom<RawFilterState> for FilterState {
    type Error = FilterError;

    fn try_from(raw: RawFilterState) -> Result<Self, Self::Error> {
        Self::new(raw.radius_km, raw.severities, raw.type_selector)
    }
}

impl Default for FilterState {
    /// 50 km, every severity, every type.
    fn default() -> Self {
        Self {
            radius_km: MAX_RADIUS_KM,
            severities: Severity::all().iter().copied().collect(),
            type_selector: TypeSelector::All,
        }
    }
}

impl FilterState {
    /// Creates a validated filter state.
    ///
    /// # Errors
    ///
    /// * [`FilterError::RadiusOutOfRange`] if `radius_km` is not within
    ///   [`MIN_RADIUS_KM`]..=[`MAX_RADIUS_KM`]
    /// * [`FilterError::EmptySeverities`] if `severities` is empty
    pub fn new(
        radius_km: f64,
        severities: impl IntoIterator<Item = Severity>,
        type_selector: TypeSelector,
    ) -> Result<Self, FilterError> {
        let severities: BTreeSet<Severity> = severities.into_iter().collect();
        validate_radius(radius_km)?;
        if severities.is_empty() {
            return Err(FilterError::EmptySeverities);
        }
        Ok(Self {
            radius_km,
            severities,
            type_selector,
        })
    }

    /// Radius in kilometres.
    #[must_use]
    pub const fn radius_km(&self) -> f64 {
        self.radius_km
    }

    /// Selected severity levels.
    #[must_use]
    pub const fn severities(&self) -> &BTreeSet<Severity> {
        &self.severities
    }

    /// Type selector.
    #[must_use]
    pub const fn type_selector(&self) -> TypeSelector {
        self.type_selector
    }

    /// Returns a copy with a different radius.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::RadiusOutOfRange`] for radii outside 1-50 km.
    pub fn with_radius(&self, radius_km: f64) -> Result<Self, FilterError> {
        validate_radius(radius_km)?;
        Ok(Self {
            radius_km,
            ..self.clone()
        })
    }

    /// Returns a copy with a different type selector.
    #[must_use]
    pub fn with_type(&self, type_selector: TypeSelector) -> Self {
        Self {
            type_selector,
            ..self.clone()
        }
    }

    /// Returns a copy with `level` added if absent or removed if present.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::EmptySeverities`] when removing the last
    /// selected level.
    pub fn toggle_severity(&self, level: Severity) -> Result<Self, FilterError> {
        let mut severities = self.severities.clone();
        if !severities.remove(&level) {
            severities.insert(level);
        }
        if severities.is_empty() {
            return Err(FilterError::EmptySeverities);
        }
        Ok(Self {
            severities,
            ..self.clone()
        })
    }
}

fn validate_radius(radius_km: f64) -> Result<(), FilterError> {
    if (MIN_RADIUS_KM..=MAX_RADIUS_KM).contains(&radius_km) {
        Ok(())
    } else {
        Err(FilterError::RadiusOutOfRange { radius_km })
    }
}

/// Whether `incident` belongs in the filtered view.
///
/// An incident without coordinates is not excluded by the radius step; it is
/// kept out of rendering by the absence of a marker position instead.
#[must_use]
pub fn matches(
    incident: &Incident,
    filter: &FilterState,
    user_location: Option<Coordinates>,
    highlight: Option<&IncidentId>,
) -> bool {
    if highlight.is_some_and(|id| *id == incident.id) {
        return true;
    }

    if !filter.type_selector.admits(incident) {
        return false;
    }

    if !filter.severities.contains(&incident.severity) {
        return false;
    }

    if let (Some(user), Some(position)) = (user_location, incident.coordinates())
        && haversine_km(user, position) > filter.radius_km
    {
        return false;
    }

    true
}

/// Filters `incidents` in order, keeping those that satisfy [`matches`].
#[must_use]
pub fn filter_incidents<'a>(
    incidents: impl IntoIterator<Item = &'a Incident>,
    filter: &FilterState,
    user_location: Option<Coordinates>,
    highlight: Option<&IncidentId>,
) -> Vec<&'a Incident> {
    incidents
        .into_iter()
        .filter(|incident| matches(incident, filter, user_location, highlight))
        .collect()
}
