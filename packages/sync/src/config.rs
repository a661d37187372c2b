//! Synchronizer configuration.
//!
//! Built-in defaults, optionally overridden by a TOML file and then by
//! environment variables:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `HEAT_MAP_CLUSTER_URL` | `cluster_url` |
//! | `HEAT_MAP_DEBOUNCE_MS` | `debounce_ms` |
//! | `HEAT_MAP_IP_LOCATION_URL` | `ip_location_url` |

use std::path::Path;
use std::time::Duration;

use heat_map_viewport_models::{Coordinates, INITIAL_WINDOW_DEGREES};
use serde::Deserialize;

use crate::ConfigError;

/// Plaza de la Constitución, Mexico City.
pub const DEFAULT_CENTER: Coordinates = Coordinates::new(19.4326, -99.1332);

/// Zoom of the first query.
pub const DEFAULT_ZOOM: u8 = 11;

/// Quiet period before a viewport change is sent.
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

/// Bound on the one-shot geolocation read.
pub const DEFAULT_GEOLOCATION_TIMEOUT_MS: u64 = 10_000;

/// Tunables for [`crate::HeatMapSync`] and the clients it is built from.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Cluster query endpoint.
    pub cluster_url: String,
    /// Debounce quiet period in milliseconds.
    pub debounce_ms: u64,
    /// Zoom of the initial query.
    pub initial_zoom: u8,
    /// Half-width in degrees of the initial bounds window.
    pub initial_window_degrees: f64,
    /// Center used when geolocation fails.
    pub fallback_center: Coordinates,
    /// Bound on the geolocation read in milliseconds.
    pub geolocation_timeout_ms: u64,
    /// IP geolocation endpoint. Without one, the fallback center is used.
    pub ip_location_url: Option<String>,
    /// Per-request HTTP timeout. Unset means no timeout beyond the
    /// transport's own.
    pub request_timeout_ms: Option<u64>,
    /// `User-Agent` sent with every request (Nominatim requires one).
    pub user_agent: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cluster_url: "http://127.0.0.1:8080/api/intervenciones/heatmap".to_string(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            initial_zoom: DEFAULT_ZOOM,
            initial_window_degrees: INITIAL_WINDOW_DEGREES,
            fallback_center: DEFAULT_CENTER,
            geolocation_timeout_ms: DEFAULT_GEOLOCATION_TIMEOUT_MS,
            ip_location_url: None,
            request_timeout_ms: None,
            user_agent: concat!("heat_map_sync/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl SyncConfig {
    /// Parses a TOML document. Missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Toml`] if the document is not valid.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::de::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads defaults, then `path` if given, then environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or an
    /// environment variable holds an unparseable value.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                log::info!("Loading config from {}", path.display());
                Self::from_toml_str(&std::fs::read_to_string(path)?)?
            }
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides from `lookup` (normally the process environment).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Env`] if a numeric variable does not parse.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup("HEAT_MAP_CLUSTER_URL") {
            self.cluster_url = url;
        }
        if let Some(value) = lookup("HEAT_MAP_DEBOUNCE_MS") {
            self.debounce_ms = value.trim().parse().map_err(|_| ConfigError::Env {
                name: "HEAT_MAP_DEBOUNCE_MS",
                value,
            })?;
        }
        if let Some(url) = lookup("HEAT_MAP_IP_LOCATION_URL") {
            self.ip_location_url = Some(url).filter(|u| !u.is_empty());
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster_url.is_empty() {
            return Err(ConfigError::Invalid {
                message: "cluster_url must not be empty".to_string(),
            });
        }
        if !self.fallback_center.is_valid() {
            return Err(ConfigError::Invalid {
                message: format!("fallback_center out of range: {}", self.fallback_center),
            });
        }
        if !(self.initial_window_degrees > 0.0 && self.initial_window_degrees <= 90.0) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "initial_window_degrees must be in (0, 90], got {}",
                    self.initial_window_degrees
                ),
            });
        }
        Ok(())
    }

    /// Debounce quiet period.
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Bound on the geolocation read.
    #[must_use]
    pub const fn geolocation_timeout(&self) -> Duration {
        Duration::from_millis(self.geolocation_timeout_ms)
    }

    /// Builds the shared HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Http`] if the TLS backend cannot be
    /// initialized.
    pub fn http_client(&self) -> Result<reqwest::Client, ConfigError> {
        let mut builder = reqwest::Client::builder().user_agent(&self.user_agent);
        if let Some(ms) = self.request_timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        Ok(builder.build()?)
    }
}
