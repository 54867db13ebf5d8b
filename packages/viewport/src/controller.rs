//! Camera intent resolution.
//!
//! Tiers are evaluated in strict priority order and the first applicable one
//! wins:
//!
//! 1. [`CameraTier::Highlight`]: a resolved deep-link target, at
//!    `highlight_zoom`. Suppresses auto-fit.
//! 2. [`CameraTier::Manual`]: an explicitly set view, kept until
//!    [`ViewportController::recenter`].
//! 3. [`CameraTier::AutoFit`]: bounding box of the filtered incidents that
//!    have coordinates, padded and capped at the fit max zoom.
//! 4. [`CameraTier::UserLocation`]: the user's position at
//!    `user_location_zoom`.
//! 5. [`CameraTier::Fallback`]: the static default center.

use incident_map_incident_models::{Coordinates, Incident};
use incident_map_spatial::{Bounds, FitOptions, fit_bounds};
use serde::Serialize;
use strum_macros::{AsRefStr, Display};

use crate::Viewport;

/// Which intent produced a [`CameraCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Display, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CameraTier {
    /// Centered on the deep-linked incident.
    Highlight,
    /// Explicitly set by the user or left over from a previous highlight.
    Manual,
    /// Fitted to the filtered incidents.
    AutoFit,
    /// Centered on the user's detected location.
    UserLocation,
    /// Hard-coded default center.
    Fallback,
}

/// A resolved camera instruction for the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CameraCommand {
    /// Target camera state.
    pub viewport: Viewport,
    /// Tier that produced it.
    pub tier: CameraTier,
    /// Bounds being fitted, for [`CameraTier::AutoFit`] only.
    pub bounds: Option<Bounds>,
}

/// Fixed parameters of the viewport tiers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportSettings {
    /// Static fallback center.
    pub default_center: Coordinates,
    /// Zoom used with the fallback center.
    pub default_zoom: u8,
    /// Zoom used when centering on the user.
    pub user_location_zoom: u8,
    /// Zoom used when centering on a highlighted incident.
    pub highlight_zoom: u8,
    /// Viewport size, padding and max zoom for auto-fit.
    pub fit: FitOptions,
}

impl Default for ViewportSettings {
    fn default() -> Self {
        Self {
            default_center: Coordinates::new(28.6139, 77.2090),
            default_zoom: 13,
            user_location_zoom: 13,
            highlight_zoom: 16,
            fit: FitOptions {
                width_px: 1024.0,
                height_px: 768.0,
                padding_px: 50.0,
                max_zoom: 15,
            },
        }
    }
}

/// Holds the stateful camera intents (highlight focus and manual override)
/// and resolves them together with the derived inputs.
#[derive(Debug, Clone)]
pub struct ViewportController {
    settings: ViewportSettings,
    highlight: Option<Coordinates>,
    manual: Option<Viewport>,
}

impl ViewportController {
    /// Creates a controller with no highlight and no manual override.
    #[must_use]
    pub const fn new(settings: ViewportSettings) -> Self {
        Self {
            settings,
            highlight: None,
            manual: None,
        }
    }

    /// Settings in use.
    #[must_use]
    pub const fn settings(&self) -> &ViewportSettings {
        &self.settings
    }

    /// Focuses the camera on a highlighted incident.
    pub fn focus_highlight(&mut self, coordinates: Coordinates) {
        self.highlight = Some(coordinates);
    }

    /// Ends the highlight focus. The highlighted view stays in place as a
    /// manual override until [`Self::recenter`] is called.
    pub fn release_highlight(&mut self) {
        if let Some(center) = self.highlight.take() {
            self.manual = Some(Viewport::new(center, self.settings.highlight_zoom));
        }
    }

    /// Pins the camera to an explicit view.
    pub fn set_manual(&mut self, viewport: Viewport) {
        self.manual = Some(viewport);
    }

    /// Whether a manual override is in effect.
    #[must_use]
    pub const fn has_manual_override(&self) -> bool {
        self.manual.is_some()
    }

    /// Drops the highlight focus and manual override so the next resolution
    /// falls through to auto-fit, user location or the fallback.
    pub fn recenter(&mut self) {
        log::debug!("Recentering viewport");
        self.highlight = None;
        self.manual = None;
    }

    /// Resolves the camera for the current filtered view and user location.
    #[must_use]
    pub fn resolve(
        &self,
        filtered: &[&Incident],
        user_location: Option<Coordinates>,
    ) -> CameraCommand {
        if let Some(center) = self.highlight {
            return CameraCommand {
                viewport: Viewport::new(center, self.settings.highlight_zoom),
                tier: CameraTier::Highlight,
                bounds: None,
            };
        }

        if let Some(viewport) = self.manual {
            return CameraCommand {
                viewport,
                tier: CameraTier::Manual,
                bounds: None,
            };
        }

        if let Some(bounds) = Bounds::enclosing(filtered.iter().filter_map(|i| i.coordinates())) {
            let (center, zoom) = fit_bounds(&bounds, &self.settings.fit);
            return CameraCommand {
                viewport: Viewport::new(center, zoom),
                tier: CameraTier::AutoFit,
                bounds: Some(bounds),
            };
        }

        if let Some(center) = user_location {
            return CameraCommand {
                viewport: Viewport::new(center, self.settings.user_location_zoom),
                tier: CameraTier::UserLocation,
                bounds: None,
            };
        }

        CameraCommand {
            viewport: Viewport::new(self.settings.default_center, self.settings.default_zoom),
            tier: CameraTier::Fallback,
            bounds: None,
        }
    }
}
