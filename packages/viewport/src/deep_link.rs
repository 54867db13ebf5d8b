//! Deep-link highlight resolution.
//!
//! `Idle` → `Pending(id)` when an identifier is supplied → `Resolved(id)` the
//! first time the store holds that incident with coordinates. Exactly one
//! [`HighlightCommand`] is issued per distinct identifier; later store
//! mutations are ignored until the identifier changes.

use incident_map_incident_models::{Coordinates, IncidentId};

/// Resolver state.
#[derive(Debug, Clone, PartialEq)]
pub enum DeepLinkState {
    /// No deep link.
    Idle,
    /// Waiting for the incident (with coordinates) to appear.
    Pending(IncidentId),
    /// Highlight command already issued.
    Resolved {
        /// Highlighted incident.
        id: IncidentId,
        /// Where the camera was sent.
        coordinates: Coordinates,
    },
}

/// One-time instruction to focus the camera on a highlighted incident.
#[derive(Debug, Clone, PartialEq)]
pub struct HighlightCommand {
    /// Highlighted incident.
    pub id: IncidentId,
    /// Its coordinates.
    pub coordinates: Coordinates,
}

/// Tracks the deep-link target and fires its highlight command once.
#[derive(Debug, Clone)]
pub struct DeepLinkResolver {
    state: DeepLinkState,
}

impl Default for DeepLinkResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DeepLinkResolver {
    /// Creates an idle resolver.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: DeepLinkState::Idle,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &DeepLinkState {
        &self.state
    }

    /// The identifier being highlighted, pending or resolved.
    #[must_use]
    pub const fn target(&self) -> Option<&IncidentId> {
        match &self.state {
            DeepLinkState::Idle => None,
            DeepLinkState::Pending(id) | DeepLinkState::Resolved { id, .. } => Some(id),
        }
    }

    /// Updates the external identifier. Supplying the current identifier
    /// again is a no-op; a different one restarts at `Pending`.
    ///
    /// Returns `true` if the target changed.
    pub fn set_target(&mut self, target: Option<IncidentId>) -> bool {
        if self.target() == target.as_ref() {
            return false;
        }

        self.state = match target {
            Some(id) => {
                log::debug!("Deep link target set to {id}");
                DeepLinkState::Pending(id)
            }
            None => DeepLinkState::Idle,
        };
        true
    }

    /// Checks whether a pending target can now be resolved. `locate` returns
    /// the coordinates of the incident with the given identifier if the
    /// store holds it with coordinates.
    pub fn observe<F>(&mut self, locate: F) -> Option<HighlightCommand>
    where
        F: FnOnce(&IncidentId) -> Option<Coordinates>,
    {
        let DeepLinkState::Pending(id) = &self.state else {
            return None;
        };

        let coordinates = locate(id)?;
        let id = id.clone();

        log::info!(
            "Deep link {id} resolved at ({}, {})",
            coordinates.latitude,
            coordinates.longitude
        );

        self.state = DeepLinkState::Resolved {
            id: id.clone(),
            coordinates,
        };
        Some(HighlightCommand { id, coordinates })
    }
}
