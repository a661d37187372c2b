//! Cluster query endpoint client.
//!
//! The backend clusters intervention records by zoom level and answers
//! `GET <cluster_url>?zoom=<z>[&north=..&south=..&east=..&west=..]` with a
//! JSON array of `{ latitud, longitud, count }`.

use async_trait::async_trait;
use heat_map_viewport_models::{ClusterPoint, Coordinates, ViewportQuery};

use crate::FetchError;

/// Maximum length of the response body preview included in error logs.
const BODY_PREVIEW_LEN: usize = 500;

/// A backend that returns cluster points for a viewport.
#[async_trait]
pub trait ClusterSource: Send + Sync {
    /// Fetches the points visible in `query`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on transport failures, non-success statuses,
    /// or malformed response bodies.
    async fn fetch_clusters(&self, query: &ViewportQuery) -> Result<Vec<ClusterPoint>, FetchError>;
}

/// [`ClusterSource`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpClusterSource {
    client: reqwest::Client,
    url: String,
}

impl HttpClusterSource {
    /// Creates a source for the endpoint at `url`.
    #[must_use]
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ClusterSource for HttpClusterSource {
    async fn fetch_clusters(&self, query: &ViewportQuery) -> Result<Vec<ClusterPoint>, FetchError> {
        let resp = self
            .client
            .get(&self.url)
            .query(&query.to_query_params())
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let text = resp.text().await?;
        parse_points(&text)
    }
}

/// Parses and validates a cluster endpoint body.
fn parse_points(text: &str) -> Result<Vec<ClusterPoint>, FetchError> {
    let points: Vec<ClusterPoint> = serde_json::from_str(text).map_err(|e| {
        let preview = if text.len() > BODY_PREVIEW_LEN {
            format!("{}...", text.chars().take(BODY_PREVIEW_LEN).collect::<String>())
        } else {
            text.to_string()
        };
        log::error!(
            "Cluster response is not a point array.\n  \
             received: {} bytes\n  \
             parse error: {e}\n  \
             body preview: {preview}",
            text.len(),
        );
        FetchError::Malformed {
            message: e.to_string(),
        }
    })?;

    if let Some(bad) = points
        .iter()
        .find(|p| !Coordinates::new(p.latitude, p.longitude).is_valid())
    {
        return Err(FetchError::Malformed {
            message: format!("point out of range: {}, {}", bad.latitude, bad.longitude),
        });
    }

    Ok(points)
}
