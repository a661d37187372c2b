//! Nominatim / OpenStreetMap reverse geocoder client.
//!
//! The public instance allows **1 request per second** and requires an
//! identifying `User-Agent`; the client passed in is expected to carry
//! one. Viewport-center lookups happen at most once per debounced map
//! movement, which stays well under that limit.
//!
//! See <https://nominatim.org/release-docs/develop/api/Reverse/>

use async_trait::async_trait;
use heat_map_viewport_models::Coordinates;

use crate::{GeocodeError, ReverseGeocoder};

/// Reverse geocoder backed by a Nominatim instance.
#[derive(Debug, Clone)]
pub struct Nominatim {
    client: reqwest::Client,
    base_url: String,
    language: Option<String>,
}

impl Nominatim {
    /// Creates a client for the instance at `base_url` (without the
    /// trailing `/reverse`).
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        language: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            language,
        }
    }
}

#[async_trait]
impl ReverseGeocoder for Nominatim {
    fn name(&self) -> &'static str {
        "nominatim"
    }

    async fn reverse(&self, center: Coordinates) -> Result<Option<String>, GeocodeError> {
        let url = format!("{}/reverse", self.base_url.trim_end_matches('/'));
        let lat = center.latitude.to_string();
        let lon = center.longitude.to_string();

        let mut req = self
            .client
            .get(&url)
            .query(&[("lat", lat.as_str()), ("lon", lon.as_str()), ("format", "jsonv2")]);

        if let Some(language) = &self.language {
            req = req.query(&[("accept-language", language.as_str())]);
        }

        let resp = req.send().await?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(GeocodeError::RateLimited);
        }

        let body: serde_json::Value = resp.error_for_status()?.json().await?;
        parse_response(&body)
    }
}

/// Parses a Nominatim reverse JSON response.
///
/// Points in the ocean (or otherwise unmatched) come back as
/// `{ "error": "Unable to geocode" }`, which maps to `Ok(None)`.
fn parse_response(body: &serde_json::Value) -> Result<Option<String>, GeocodeError> {
    if body.get("error").is_some() {
        return Ok(None);
    }

    let display_name = body["display_name"]
        .as_str()
        .ok_or_else(|| GeocodeError::Parse {
            message: "Missing display_name in Nominatim response".to_string(),
        })?
        .trim();

    if display_name.is_empty() {
        return Ok(None);
    }

    Ok(Some(display_name.to_string()))
}
