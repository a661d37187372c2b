#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Best-effort reverse geocoding of the map viewport center.
//!
//! Turns a coordinate into a human-readable address by asking each
//! provider in the [`providers`] table in turn: a self-hosted Pelias
//! (shipped disabled) and then public Nominatim. A [`ProviderChain`] does
//! the fallback. The [`AddressResolver`] wraps the chain with its own
//! loading flag and, when every provider fails, falls back to the
//! coordinates formatted to 4 decimal places.

pub mod nominatim;
pub mod pelias;
pub mod providers;

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use heat_map_viewport_models::Coordinates;
use providers::ProviderEntry;
use thiserror::Error;

/// Errors from reverse-geocoding operations.
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response parsing failed.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parsing failure.
        message: String,
    },

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// The provider table is not valid TOML or has unknown fields.
    #[error("Provider table error: {0}")]
    Table(#[from] toml::de::Error),

    /// A provider entry is unusable.
    #[error("Invalid provider: {message}")]
    InvalidProvider {
        /// What is wrong with the entry.
        message: String,
    },
}

/// A service that turns a coordinate into an address string.
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    /// Short provider name for logging.
    fn name(&self) -> &'static str;

    /// Looks up the address nearest to `center`.
    ///
    /// Returns `Ok(None)` when the provider answered but had no match.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError`] if the HTTP request or response parsing
    /// fails.
    async fn reverse(&self, center: Coordinates) -> Result<Option<String>, GeocodeError>;
}

/// Formats the coordinate fallback shown when no address is available,
/// e.g. `"19.4326, -99.1332"`.
#[must_use]
pub fn format_coordinates(center: Coordinates) -> String {
    center.to_string()
}

/// Tries each provider in order until one returns an address.
pub struct ProviderChain {
    providers: Vec<Box<dyn ReverseGeocoder>>,
}

impl ProviderChain {
    /// Creates a chain from already-ordered providers.
    #[must_use]
    pub fn new(providers: Vec<Box<dyn ReverseGeocoder>>) -> Self {
        Self { providers }
    }

    /// Connects every entry, keeping the given order.
    #[must_use]
    pub fn from_entries(client: &reqwest::Client, entries: &[ProviderEntry]) -> Self {
        Self {
            providers: entries.iter().map(|entry| entry.connect(client)).collect(),
        }
    }

    /// Chain over the enabled entries of the built-in provider table.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError`] if the built-in table does not parse.
    pub fn from_registry(client: &reqwest::Client) -> Result<Self, GeocodeError> {
        Ok(Self::from_entries(client, &providers::built_in()?))
    }

    /// Number of providers in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the chain has no providers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[async_trait]
impl ReverseGeocoder for ProviderChain {
    fn name(&self) -> &'static str {
        "chain"
    }

    async fn reverse(&self, center: Coordinates) -> Result<Option<String>, GeocodeError> {
        let mut last_err = None;

        for provider in &self.providers {
            match provider.reverse(center).await {
                Ok(Some(address)) => return Ok(Some(address)),
                Ok(None) => {
                    log::debug!("{} found no address for {center}", provider.name());
                }
                Err(e) => {
                    log::warn!("{} reverse geocode failed for {center}: {e}", provider.name());
                    last_err = Some(e);
                }
            }
        }

        last_err.map_or(Ok(None), Err)
    }
}

#[derive(Debug, Default)]
struct AddressState {
    address: Option<String>,
    loading: bool,
    generation: u64,
}

/// Resolves and holds the address of the current viewport center.
///
/// Runs independently of point fetching. A lookup that finishes after a
/// newer one was started does not overwrite the newer address.
pub struct AddressResolver {
    geocoder: Arc<dyn ReverseGeocoder>,
    state: Mutex<AddressState>,
}

impl AddressResolver {
    /// Creates a resolver with no address yet.
    #[must_use]
    pub fn new(geocoder: Arc<dyn ReverseGeocoder>) -> Self {
        Self {
            geocoder,
            state: Mutex::new(AddressState::default()),
        }
    }

    /// Current address, if any lookup has completed.
    #[must_use]
    pub fn address(&self) -> Option<String> {
        self.lock().address.clone()
    }

    /// Whether a lookup is in progress.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.lock().loading
    }

    /// Looks up `center` and stores the result, substituting the formatted
    /// coordinates on failure. Returns the address this lookup produced.
    ///
    /// If this future is dropped before finishing, `loading` is still
    /// cleared unless a newer lookup has started since.
    pub async fn resolve(&self, center: Coordinates) -> String {
        let generation = {
            let mut state = self.lock();
            state.generation += 1;
            state.loading = true;
            state.generation
        };
        let _loading = LoadingGuard {
            state: &self.state,
            generation,
        };

        let address = match self.geocoder.reverse(center).await {
            Ok(Some(address)) => address,
            Ok(None) => format_coordinates(center),
            Err(e) => {
                log::warn!("Reverse geocoding failed for {center}, using coordinates: {e}");
                format_coordinates(center)
            }
        };

        let mut state = self.lock();
        if state.generation == generation {
            state.address = Some(address.clone());
        } else {
            log::debug!("Discarding stale address lookup #{generation} for {center}");
        }
        drop(state);

        address
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AddressState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears `loading` when its lookup ends, including by cancellation, as
/// long as no newer lookup has started.
struct LoadingGuard<'a> {
    state: &'a Mutex<AddressState>,
    generation: u64,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.generation == self.generation {
            state.loading = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Fixed(Result<Option<&'static str>, ()>);

    #[async_trait]
    impl ReverseGeocoder for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn reverse(&self, _center: Coordinates) -> Result<Option<String>, GeocodeError> {
            self.0
                .map(|a| a.map(String::from))
                .map_err(|()| GeocodeError::RateLimited)
        }
    }

    /// Answers with the latitude after sleeping for `latitude` seconds.
    struct SlowEcho;

    #[async_trait]
    impl ReverseGeocoder for SlowEcho {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn reverse(&self, center: Coordinates) -> Result<Option<String>, GeocodeError> {
            tokio::time::sleep(Duration::from_secs_f64(center.latitude)).await;
            Ok(Some(format!("lat {}", center.latitude)))
        }
    }

    #[test]
    fn formats_fallback_to_four_decimals() {
        assert_eq!(
            format_coordinates(Coordinates::new(19.43, -99.13)),
            "19.4300, -99.1300"
        );
        assert_eq!(
            format_coordinates(Coordinates::new(19.432_612, -99.133_21)),
            "19.4326, -99.1332"
        );
    }

    #[tokio::test]
    async fn failure_falls_back_to_coordinates() {
        let resolver = AddressResolver::new(Arc::new(Fixed(Err(()))));
        let address = resolver.resolve(Coordinates::new(19.43, -99.13)).await;

        assert_eq!(address, "19.4300, -99.1300");
        assert_eq!(resolver.address().as_deref(), Some("19.4300, -99.1300"));
        assert!(!resolver.is_loading());
    }

    #[tokio::test]
    async fn stores_resolved_address() {
        let resolver = AddressResolver::new(Arc::new(Fixed(Ok(Some("Centro, CDMX")))));
        assert!(resolver.address().is_none());
        resolver.resolve(Coordinates::new(19.43, -99.13)).await;
        assert_eq!(resolver.address().as_deref(), Some("Centro, CDMX"));
    }

    #[tokio::test]
    async fn chain_falls_through_to_next_provider() {
        let chain = ProviderChain::new(vec![
            Box::new(Fixed(Err(()))),
            Box::new(Fixed(Ok(None))),
            Box::new(Fixed(Ok(Some("Roma Norte")))),
        ]);
        let address = chain.reverse(Coordinates::new(19.41, -99.16)).await.unwrap();
        assert_eq!(address.as_deref(), Some("Roma Norte"));
    }

    #[tokio::test]
    async fn chain_reports_last_error_when_nothing_matches() {
        let chain = ProviderChain::new(vec![Box::new(Fixed(Ok(None))), Box::new(Fixed(Err(())))]);
        assert!(matches!(
            chain.reverse(Coordinates::new(0.0, 0.0)).await,
            Err(GeocodeError::RateLimited)
        ));

        let empty = ProviderChain::new(Vec::new());
        assert!(empty.is_empty());
        assert!(empty.reverse(Coordinates::new(0.0, 0.0)).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn late_lookup_does_not_overwrite_newer_one() {
        let resolver = Arc::new(AddressResolver::new(Arc::new(SlowEcho)));

        let slow = tokio::spawn({
            let resolver = resolver.clone();
            async move { resolver.resolve(Coordinates::new(5.0, 0.0)).await }
        });
        tokio::task::yield_now().await;
        assert!(resolver.is_loading());

        resolver.resolve(Coordinates::new(1.0, 0.0)).await;
        assert_eq!(resolver.address().as_deref(), Some("lat 1"));

        assert_eq!(slow.await.unwrap(), "lat 5");
        assert_eq!(resolver.address().as_deref(), Some("lat 1"));
        assert!(!resolver.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_lookup_clears_loading() {
        let resolver = Arc::new(AddressResolver::new(Arc::new(SlowEcho)));

        let lookup = tokio::spawn({
            let resolver = resolver.clone();
            async move { resolver.resolve(Coordinates::new(5.0, 0.0)).await }
        });
        tokio::task::yield_now().await;
        assert!(resolver.is_loading());

        lookup.abort();
        assert!(lookup.await.unwrap_err().is_cancelled());
        assert!(!resolver.is_loading());
        assert!(resolver.address().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_stale_lookup_keeps_newer_one_loading() {
        let resolver = Arc::new(AddressResolver::new(Arc::new(SlowEcho)));

        let stale = tokio::spawn({
            let resolver = resolver.clone();
            async move { resolver.resolve(Coordinates::new(5.0, 0.0)).await }
        });
        tokio::task::yield_now().await;
        let newer = tokio::spawn({
            let resolver = resolver.clone();
            async move { resolver.resolve(Coordinates::new(2.0, 0.0)).await }
        });
        tokio::task::yield_now().await;

        stale.abort();
        assert!(stale.await.unwrap_err().is_cancelled());
        assert!(resolver.is_loading());

        assert_eq!(newer.await.unwrap(), "lat 2");
        assert!(!resolver.is_loading());
        assert_eq!(resolver.address().as_deref(), Some("lat 2"));
    }

    #[test]
    fn registry_chain_uses_enabled_services() {
        let client = reqwest::Client::new();
        let chain = ProviderChain::from_registry(&client).unwrap();
        assert_eq!(chain.len(), providers::built_in().unwrap().len());
        assert!(!chain.is_empty());
    }
}
