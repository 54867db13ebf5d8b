//! Device location providers.
//!
//! The session asks for the user's position once at startup. A failure is
//! not an error for the map: it simply leaves the user-location camera tier
//! unavailable.

use incident_map_incident_models::Coordinates;

use crate::LocationError;

/// Produces the user's current position.
#[async_trait::async_trait]
pub trait LocationProvider: Send + Sync {
    /// Requests the current position.
    ///
    /// # Errors
    ///
    /// Returns [`LocationError`] if access is denied or no fix is available.
    async fn current_position(&self) -> Result<Coordinates, LocationError>;
}

/// Always reports the same position.
///
/// A position outside the valid latitude/longitude range is reported as
/// [`LocationError::Unavailable`].
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub Coordinates);

#[async_trait::async_trait]
impl LocationProvider for FixedLocation {
    async fn current_position(&self) -> Result<Coordinates, LocationError> {
        let Coordinates {
            latitude,
            longitude,
        } = self.0;
        if (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude) {
            Ok(self.0)
        } else {
            Err(LocationError::Unavailable(format!(
                "({latitude}, {longitude}) is not a valid position"
            )))
        }
    }
}

/// Behaves as if the user refused location access.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocation;

#[async_trait::async_trait]
impl LocationProvider for NoLocation {
    async fn current_position(&self) -> Result<Coordinates, LocationError> {
        Err(LocationError::Denied)
    }
}
