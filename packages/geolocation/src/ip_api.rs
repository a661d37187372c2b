//! IP-based geolocation against an `ip-api.com`-compatible endpoint.
//!
//! The endpoint answers `GET <url>` with
//! `{ "status": "success", "lat": .., "lon": .. }` or
//! `{ "status": "fail", "message": ".." }`. The free tier is limited to
//! 45 requests per minute, which is far above the one read per session
//! this crate performs.
//!
//! See <https://ip-api.com/docs/api:json>

use async_trait::async_trait;
use heat_map_viewport_models::Coordinates;

use crate::{GeolocationError, LocationProvider};

/// Default public endpoint.
pub const DEFAULT_URL: &str = "http://ip-api.com/json";

/// Looks up the caller's approximate position from their public IP.
#[derive(Debug, Clone)]
pub struct IpApiLocation {
    client: reqwest::Client,
    url: String,
}

impl IpApiLocation {
    /// Creates a provider for the given endpoint.
    #[must_use]
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl LocationProvider for IpApiLocation {
    async fn current_position(&self) -> Result<Coordinates, GeolocationError> {
        let resp = self
            .client
            .get(&self.url)
            .query(&[("fields", "status,message,lat,lon")])
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::FORBIDDEN {
            return Err(GeolocationError::PermissionDenied);
        }

        let body: serde_json::Value = resp.error_for_status()?.json().await?;
        parse_response(&body)
    }
}

/// Parses an `ip-api` JSON response.
fn parse_response(body: &serde_json::Value) -> Result<Coordinates, GeolocationError> {
    match body["status"].as_str() {
        Some("success") => {}
        Some("fail") => {
            return Err(GeolocationError::Unavailable {
                message: body["message"]
                    .as_str()
                    .unwrap_or("unknown reason")
                    .to_string(),
            });
        }
        _ => {
            return Err(GeolocationError::Parse {
                message: "Missing status in ip-api response".to_string(),
            });
        }
    }

    let lat = body["lat"].as_f64().ok_or_else(|| GeolocationError::Parse {
        message: "Missing lat in ip-api response".to_string(),
    })?;

    let lon = body["lon"].as_f64().ok_or_else(|| GeolocationError::Parse {
        message: "Missing lon in ip-api response".to_string(),
    })?;

    Ok(Coordinates::new(lat, lon))
}
