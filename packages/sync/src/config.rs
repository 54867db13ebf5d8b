//! Map configuration.
//!
//! Defaults are embedded at compile time from `config/default.toml`. A user
//! file only needs the keys it overrides; tables are merged key by key. The
//! API URL can additionally be overridden through [`API_URL_ENV`].

use std::path::Path;
use std::time::Duration;

use incident_map_filter::FilterState;
use incident_map_incident_models::Coordinates;
use incident_map_spatial::FitOptions;
use incident_map_viewport::ViewportSettings;
use serde::Deserialize;

use crate::ConfigError;

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Environment variable overriding [`MapConfig::api_url`].
pub const API_URL_ENV: &str = "INCIDENT_MAP_API_URL";

const API_SUFFIX: &str = "/api";
const SOCKET_IO_PATH: &str = "/socket.io/?EIO=4&transport=websocket";
const MAX_ZOOM: u8 = 22;

/// Camera parameters.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ViewportConfig {
    /// Fallback center when nothing else applies.
    pub default_center: Coordinates,
    /// Zoom used with the fallback center.
    pub default_zoom: u8,
    /// Zoom used when centering on the user.
    pub user_location_zoom: u8,
    /// Zoom used when centering on a highlighted incident.
    pub highlight_zoom: u8,
    /// Padding around fitted bounds, in pixels.
    pub fit_padding_px: f64,
    /// Upper bound on the fitted zoom.
    pub fit_max_zoom: u8,
    /// Assumed map width, in pixels.
    pub width_px: f64,
    /// Assumed map height, in pixels.
    pub height_px: f64,
}

/// Push-channel reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    /// First reconnect delay.
    pub reconnect_delay_ms: u64,
    /// Cap for the doubling reconnect delay.
    pub reconnect_delay_max_ms: u64,
}

impl ChannelConfig {
    /// First reconnect delay.
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Reconnect delay cap.
    #[must_use]
    pub const fn reconnect_delay_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_max_ms)
    }
}

/// Complete map configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MapConfig {
    /// Backend base URL as configured, before normalization.
    pub api_url: String,
    /// Initial filter state.
    pub filters: FilterState,
    /// Camera parameters.
    pub viewport: ViewportConfig,
    /// Push-channel reconnect policy.
    pub channel: ChannelConfig,
}

impl Default for MapConfig {
    /// The embedded defaults.
    ///
    /// # Panics
    ///
    /// Panics if the embedded default TOML is malformed, which is fixed at
    /// compile time.
    fn default() -> Self {
        Self::from_toml(None).unwrap_or_else(|e| panic!("Failed to parse default.toml: {e}"))
    }
}

impl MapConfig {
    /// Builds a config from the embedded defaults merged with `overrides`.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::Toml`] if either document is malformed
    /// * [`ConfigError::Invalid`] if a merged value is unusable
    pub fn from_toml(overrides: Option<&str>) -> Result<Self, ConfigError> {
        let mut table: toml::Table = DEFAULT_CONFIG.parse()?;

        if let Some(overrides) = overrides {
            let overrides: toml::Table = overrides.parse()?;
            merge_tables(&mut table, overrides);
        }

        let config: Self = toml::Value::Table(table).try_into()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the embedded defaults, the optional file at `path` and the
    /// process environment.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::Io`] if the file cannot be read
    /// * any error from [`Self::from_toml`]
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Like [`Self::load`] with an explicit environment lookup.
    ///
    /// # Errors
    ///
    /// See [`Self::load`].
    pub fn load_with_env(
        path: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let overrides = match path {
            Some(path) => {
                log::debug!("Reading config from {}", path.display());
                Some(std::fs::read_to_string(path)?)
            }
            None => None,
        };

        let mut config = Self::from_toml(overrides.as_deref())?;

        if let Some(api_url) = env(API_URL_ENV).filter(|v| !v.trim().is_empty()) {
            log::debug!("Using {API_URL_ENV}={api_url}");
            config.api_url = api_url;
            config.validate()?;
        }

        Ok(config)
    }

    /// Returns a copy pointing at a different backend.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `api_url` is not an http(s) URL.
    pub fn with_api_url(&self, api_url: impl Into<String>) -> Result<Self, ConfigError> {
        let config = Self {
            api_url: api_url.into(),
            ..self.clone()
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let url = self.api_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                key: "api_url",
                message: format!("'{url}' is not an http(s) URL"),
            });
        }

        let viewport = &self.viewport;
        for (key, zoom) in [
            ("viewport.default_zoom", viewport.default_zoom),
            ("viewport.user_location_zoom", viewport.user_location_zoom),
            ("viewport.highlight_zoom", viewport.highlight_zoom),
            ("viewport.fit_max_zoom", viewport.fit_max_zoom),
        ] {
            if zoom > MAX_ZOOM {
                return Err(ConfigError::Invalid {
                    key,
                    message: format!("zoom {zoom} exceeds {MAX_ZOOM}"),
                });
            }
        }

        if viewport.width_px.is_nan()
            || viewport.height_px.is_nan()
            || viewport.width_px <= 0.0
            || viewport.height_px <= 0.0
        {
            return Err(ConfigError::Invalid {
                key: "viewport.width_px",
                message: "viewport size must be positive".to_string(),
            });
        }

        if viewport.fit_padding_px.is_nan() || viewport.fit_padding_px < 0.0 {
            return Err(ConfigError::Invalid {
                key: "viewport.fit_padding_px",
                message: "padding must not be negative".to_string(),
            });
        }

        if self.channel.reconnect_delay_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "channel.reconnect_delay_ms",
                message: "must be positive".to_string(),
            });
        }

        if self.channel.reconnect_delay_max_ms < self.channel.reconnect_delay_ms {
            return Err(ConfigError::Invalid {
                key: "channel.reconnect_delay_max_ms",
                message: "must not be below reconnect_delay_ms".to_string(),
            });
        }

        Ok(())
    }

    /// The API base URL, always ending in `/api`.
    #[must_use]
    pub fn api_base_url(&self) -> String {
        let trimmed = self.api_url.trim().trim_end_matches('/');
        if trimmed.ends_with(API_SUFFIX) {
            trimmed.to_string()
        } else {
            format!("{trimmed}{API_SUFFIX}")
        }
    }

    /// The push-channel origin: the API base URL without `/api`.
    #[must_use]
    pub fn socket_base_url(&self) -> String {
        let api = self.api_base_url();
        api.strip_suffix(API_SUFFIX).unwrap_or(&api).to_string()
    }

    /// The websocket URL of the Socket.IO endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the base URL has no http(s)
    /// scheme.
    pub fn socket_url(&self) -> Result<String, ConfigError> {
        let base = self.socket_base_url();
        let ws = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(ConfigError::Invalid {
                key: "api_url",
                message: format!("'{base}' is not an http(s) URL"),
            });
        };
        Ok(format!("{ws}{SOCKET_IO_PATH}"))
    }

    /// Camera settings derived from [`Self::viewport`].
    #[must_use]
    pub const fn viewport_settings(&self) -> ViewportSettings {
        let v = &self.viewport;
        ViewportSettings {
            default_center: v.default_center,
            default_zoom: v.default_zoom,
            user_location_zoom: v.user_location_zoom,
            highlight_zoom: v.highlight_zoom,
            fit: FitOptions {
                width_px: v.width_px,
                height_px: v.height_px,
                padding_px: v.fit_padding_px,
                max_zoom: v.fit_max_zoom,
            },
        }
    }
}

/// Recursively merges `overrides` into `base`: nested tables merge key by
/// key, every other value replaces.
fn merge_tables(base: &mut toml::Table, overrides: toml::Table) {
    for (key, value) in overrides {
        match value {
            toml::Value::Table(incoming) => {
                if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                    merge_tables(existing, incoming);
                } else {
                    base.insert(key, toml::Value::Table(incoming));
                }
            }
            value => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use incident_map_filter::TypeSelector;
    use incident_map_incident_models::{IncidentType, Severity};

    use super::*;

    fn with_url(url: &str) -> MapConfig {
        MapConfig {
            api_url: url.to_string(),
            ..MapConfig::default()
        }
    }

    #[test]
    fn embedded_defaults() {
        let config = MapConfig::default();
        assert_eq!(config.api_base_url(), "http://localhost:3001/api");
        assert_eq!(config.filters, FilterState::default());
        assert_eq!(config.viewport_settings(), ViewportSettings::default());
        assert_eq!(config.channel.reconnect_delay(), Duration::from_secs(1));
        assert_eq!(config.channel.reconnect_delay_max(), Duration::from_secs(5));
    }

    #[test]
    fn api_url_gets_api_suffix() {
        assert_eq!(with_url("http://h:1").api_base_url(), "http://h:1/api");
        assert_eq!(with_url("http://h:1/").api_base_url(), "http://h:1/api");
        assert_eq!(with_url("http://h:1/api").api_base_url(), "http://h:1/api");
        assert_eq!(with_url("http://h:1/api/").api_base_url(), "http://h:1/api");
        assert_eq!(
            with_url("https://api.example.com").api_base_url(),
            "https://api.example.com/api"
        );
    }

    #[test]
    fn socket_url_drops_api_and_switches_scheme() {
        let config = with_url("https://example.com/api");
        assert_eq!(config.socket_base_url(), "https://example.com");
        assert_eq!(
            config.socket_url().unwrap(),
            "wss://example.com/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            MapConfig::default().socket_url().unwrap(),
            "ws://localhost:3001/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn partial_override_merges_tables() {
        let config = MapConfig::from_toml(Some(
            r#"
            [filters]
            radius_km = 10.0
            severities = ["HIGH"]
            type_selector = "FIRE"

            [viewport]
            highlight_zoom = 17
            "#,
        ))
        .unwrap();

        assert!((config.filters.radius_km() - 10.0).abs() < f64::EPSILON);
        assert_eq!(
            config.filters.severities().iter().copied().collect::<Vec<_>>(),
            [Severity::High]
        );
        assert_eq!(
            config.filters.type_selector(),
            TypeSelector::Only(IncidentType::Fire)
        );
        assert_eq!(config.viewport.highlight_zoom, 17);
        assert_eq!(config.viewport.default_zoom, 13);
    }

    #[test]
    fn env_overrides_api_url() {
        let config = MapConfig::load_with_env(None, |key| {
            (key == API_URL_ENV).then(|| "https://incidents.example.org".to_string())
        })
        .unwrap();
        assert_eq!(config.api_base_url(), "https://incidents.example.org/api");
    }

    #[test]
    fn with_api_url_validates() {
        let config = MapConfig::default();
        assert_eq!(
            config.with_api_url("https://x.org/").unwrap().api_base_url(),
            "https://x.org/api"
        );
        assert!(config.with_api_url("x.org").is_err());
    }

    #[test]
    fn blank_env_is_ignored() {
        let config = MapConfig::load_with_env(None, |_| Some("  ".to_string())).unwrap();
        assert_eq!(config.api_base_url(), "http://localhost:3001/api");
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            MapConfig::from_toml(Some("api_url = \"ftp://x\"")),
            Err(ConfigError::Invalid { key: "api_url", .. })
        ));
        assert!(matches!(
            MapConfig::from_toml(Some("[viewport]\nhighlight_zoom = 30")),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            MapConfig::from_toml(Some("[channel]\nreconnect_delay_max_ms = 10")),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn rejects_out_of_range_filters_and_unknown_keys() {
        assert!(matches!(
            MapConfig::from_toml(Some("[filters]\nradius_km = 80.0")),
            Err(ConfigError::Toml(_))
        ));
        assert!(matches!(
            MapConfig::from_toml(Some("colour = \"red\"")),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = MapConfig::load_with_env(Some(Path::new("/nonexistent/map.toml")), |_| None);
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
