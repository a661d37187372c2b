//! Pelias reverse geocoder client for self-hosted instances.
//!
//! Pelias exposes a `/v1/reverse` endpoint that returns `GeoJSON`
//! `FeatureCollection` responses ordered by distance from the point.
//!
//! See <https://github.com/pelias/documentation/blob/master/reverse.md>

use async_trait::async_trait;
use heat_map_viewport_models::Coordinates;

use crate::{GeocodeError, ReverseGeocoder};

/// Reverse geocoder backed by a Pelias instance.
#[derive(Debug, Clone)]
pub struct Pelias {
    client: reqwest::Client,
    base_url: String,
    language: Option<String>,
}

impl Pelias {
    /// Creates a client for the instance at `base_url`.
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
impl ReverseGeocoder for Pelias {
    fn name(&self) -> &'static str {
        "pelias"
    }

    async fn reverse(&self, center: Coordinates) -> Result<Option<String>, GeocodeError> {
        let url = format!("{}/v1/reverse", self.base_url.trim_end_matches('/'));
        let lat = center.latitude.to_string();
        let lon = center.longitude.to_string();

        let mut req = self.client.get(&url).query(&[
            ("point.lat", lat.as_str()),
            ("point.lon", lon.as_str()),
            ("size", "1"),
        ]);

        if let Some(language) = &self.language {
            req = req.query(&[("lang", language.as_str())]);
        }

        let resp = req.send().await?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(GeocodeError::RateLimited);
        }

        if !resp.status().is_success() {
            return Err(GeocodeError::Parse {
                message: format!("Pelias returned status {}", resp.status()),
            });
        }

        let body: serde_json::Value = resp.json().await?;
        parse_response(&body)
    }
}

/// Parses a Pelias `GeoJSON` `FeatureCollection` response into the label
/// of the nearest feature.
fn parse_response(body: &serde_json::Value) -> Result<Option<String>, GeocodeError> {
    let features = body
        .get("features")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| GeocodeError::Parse {
            message: "Pelias response missing 'features' array".to_string(),
        })?;

    let Some(first) = features.first() else {
        return Ok(None);
    };

    Ok(first
        .pointer("/properties/label")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(String::from))
}
