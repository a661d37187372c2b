#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! One-shot geolocation of the caller.
//!
//! [`GeolocationResolver`] asks a [`LocationProvider`] for the current
//! position exactly once, bounded by a timeout. Any failure (permission
//! denied, timeout, unsupported, transport error) resolves to `None` and
//! the caller falls back to a fixed location. Failures are logged, never
//! surfaced.
//!
//! Providers:
//!
//! 1. [`FixedLocation`]: a configured coordinate (or none at all).
//! 2. [`ip_api::IpApiLocation`]: IP-based lookup against an
//!    `ip-api.com`-compatible endpoint.

pub mod ip_api;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use heat_map_viewport_models::Coordinates;
use thiserror::Error;
use tokio::sync::OnceCell;

/// Default bound on how long a position read may take.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from a position read.
#[derive(Debug, Error)]
pub enum GeolocationError {
    /// The user or platform refused access to the position.
    #[error("Permission denied")]
    PermissionDenied,

    /// The provider answered but could not determine a position.
    #[error("Position unavailable: {message}")]
    Unavailable {
        /// Provider-supplied reason.
        message: String,
    },

    /// The read did not finish within the allotted time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// No position source is available.
    #[error("Geolocation is not supported")]
    Unsupported,

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response parsing failed.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parsing failure.
        message: String,
    },
}

/// A source of the caller's current coordinates.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Reads the current position once.
    ///
    /// # Errors
    ///
    /// Returns [`GeolocationError`] if no position can be obtained.
    async fn current_position(&self) -> Result<Coordinates, GeolocationError>;
}

/// A provider that always answers with the same configured position, or
/// reports [`GeolocationError::Unsupported`] when none is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedLocation(pub Option<Coordinates>);

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn current_position(&self) -> Result<Coordinates, GeolocationError> {
        self.0.ok_or(GeolocationError::Unsupported)
    }
}

/// Resolves the caller's position at most once.
///
/// Concurrent callers of [`Self::resolve`] share the single read. The
/// stored result never changes afterwards.
pub struct GeolocationResolver {
    provider: Arc<dyn LocationProvider>,
    timeout: Duration,
    result: OnceCell<Option<Coordinates>>,
}

impl GeolocationResolver {
    /// Creates a resolver. Nothing is read until [`Self::resolve`].
    #[must_use]
    pub fn new(provider: Arc<dyn LocationProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            result: OnceCell::new(),
        }
    }

    /// `true` until the one read has completed, successfully or not.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        !self.result.initialized()
    }

    /// The resolved position: `None` while loading, `Some(None)` when the
    /// read failed.
    #[must_use]
    pub fn result(&self) -> Option<Option<Coordinates>> {
        self.result.get().copied()
    }

    /// Performs the read (the first time only) and returns its outcome.
    pub async fn resolve(&self) -> Option<Coordinates> {
        *self
            .result
            .get_or_init(|| async {
                match read_position(self.provider.as_ref(), self.timeout).await {
                    Ok(coords) => {
                        log::info!("Resolved caller position: {coords}");
                        Some(coords)
                    }
                    Err(e) => {
                        log::warn!("Geolocation failed, using fallback location: {e}");
                        None
                    }
                }
            })
            .await
    }

    /// Resolves and substitutes `fallback` on failure.
    pub async fn resolve_or(&self, fallback: Coordinates) -> Coordinates {
        self.resolve().await.unwrap_or(fallback)
    }
}

async fn read_position(
    provider: &dyn LocationProvider,
    timeout: Duration,
) -> Result<Coordinates, GeolocationError> {
    let coords = tokio::time::timeout(timeout, provider.current_position())
        .await
        .map_err(|_| GeolocationError::Timeout(timeout))??;

    if !coords.is_valid() {
        return Err(GeolocationError::Parse {
            message: format!("position out of range: {coords}"),
        });
    }

    Ok(coords)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FALLBACK: Coordinates = Coordinates::new(19.4326, -99.1332);

    struct CountingProvider {
        calls: AtomicUsize,
        delay: Duration,
        answer: Option<Coordinates>,
    }

    #[async_trait]
    impl LocationProvider for CountingProvider {
        async fn current_position(&self) -> Result<Coordinates, GeolocationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.answer.ok_or(GeolocationError::PermissionDenied)
        }
    }

    #[tokio::test]
    async fn fixed_location_resolves() {
        let here = Coordinates::new(40.4168, -3.7038);
        let resolver =
            GeolocationResolver::new(Arc::new(FixedLocation(Some(here))), DEFAULT_TIMEOUT);

        assert!(resolver.is_loading());
        assert_eq!(resolver.resolve().await, Some(here));
        assert!(!resolver.is_loading());
        assert_eq!(resolver.result(), Some(Some(here)));
    }

    #[tokio::test]
    async fn unsupported_falls_back() {
        let resolver = GeolocationResolver::new(Arc::new(FixedLocation(None)), DEFAULT_TIMEOUT);
        assert_eq!(resolver.resolve_or(FALLBACK).await, FALLBACK);
        assert_eq!(resolver.result(), Some(None));
        assert!(!resolver.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_falls_back() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            delay: Duration::from_secs(60),
            answer: Some(Coordinates::new(1.0, 1.0)),
        });
        let resolver = GeolocationResolver::new(provider, Duration::from_secs(5));

        assert_eq!(resolver.resolve_or(FALLBACK).await, FALLBACK);
        assert!(!resolver.is_loading());
    }

    #[tokio::test]
    async fn reads_only_once() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            answer: None,
        });
        let resolver = GeolocationResolver::new(provider.clone(), DEFAULT_TIMEOUT);

        assert_eq!(resolver.resolve().await, None);
        assert_eq!(resolver.resolve().await, None);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn out_of_range_position_is_rejected() {
        let resolver = GeolocationResolver::new(
            Arc::new(FixedLocation(Some(Coordinates::new(120.0, 0.0)))),
            DEFAULT_TIMEOUT,
        );
        assert_eq!(resolver.resolve().await, None);
    }
}
