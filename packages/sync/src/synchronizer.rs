//! The heat map synchronizer facade.

use std::sync::{Arc, Mutex, PoisonError};

use heat_map_geocoder::{AddressResolver, ProviderChain, ReverseGeocoder};
use heat_map_geolocation::ip_api::IpApiLocation;
use heat_map_geolocation::{FixedLocation, GeolocationResolver, LocationProvider};
use heat_map_viewport_models::{
    ActivityStats, Bounds, ClusterPoint, Coordinates, ViewportQuery,
    build_initial_query_with_window, build_query_from_viewport,
};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::client::{ClusterSource, HttpClusterSource};
use crate::{ConfigError, SyncEvent};
use crate::config::SyncConfig;
use crate::debounce::Debouncer;
use crate::lifecycle::{FetchMode, FetchOutcome, RequestLifecycleManager};

const EVENT_CAPACITY: usize = 64;

/// Everything the presentation layer renders, read at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSnapshot {
    /// Current point set.
    pub points: Vec<ClusterPoint>,
    /// Stats derived from `points`.
    pub stats: ActivityStats,
    /// A blocking fetch is in flight.
    pub loading: bool,
    /// A silent fetch is in flight.
    pub silent_loading: bool,
    /// Message of the last failed fetch.
    pub error: Option<String>,
    /// Address of the viewport center.
    pub center_address: Option<String>,
    /// An address lookup is in flight.
    pub address_loading: bool,
    /// The caller's resolved position, if geolocation succeeded.
    pub user_location: Option<Coordinates>,
    /// Geolocation has not finished yet.
    pub geolocation_loading: bool,
}

/// Keeps the heat map's cluster points in step with the map viewport.
///
/// Call [`Self::start`] once, then feed every pan/zoom into
/// [`Self::handle_viewport_change`]. Read state with [`Self::snapshot`] or
/// listen on [`Self::subscribe`].
pub struct HeatMapSync {
    config: SyncConfig,
    manager: RequestLifecycleManager,
    geolocation: GeolocationResolver,
    address: Arc<AddressResolver>,
    events: broadcast::Sender<SyncEvent>,
    debouncer: Debouncer<ViewportQuery>,
    address_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl HeatMapSync {
    /// Wires the synchronizer to its collaborators. Nothing is fetched
    /// until [`Self::start`].
    #[must_use]
    pub fn new(
        config: SyncConfig,
        source: Arc<dyn ClusterSource>,
        location: Arc<dyn LocationProvider>,
        geocoder: Arc<dyn ReverseGeocoder>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let manager = RequestLifecycleManager::new(source, events.clone());
        let address = Arc::new(AddressResolver::new(geocoder));
        let address_task = Arc::new(Mutex::new(None));

        let debouncer = Debouncer::new(config.debounce(), {
            let manager = manager.clone();
            let address = address.clone();
            let events = events.clone();
            let address_task = address_task.clone();
            move |query: ViewportQuery| {
                // The session is current before the debouncer task ends.
                tokio::spawn(manager.dispatch(query, FetchMode::Silent));
                if let Some(center) = query.center() {
                    spawn_address_lookup(&address, &events, &address_task, center);
                }
            }
        });

        Self {
            geolocation: GeolocationResolver::new(location, config.geolocation_timeout()),
            config,
            manager,
            address,
            events,
            debouncer,
            address_task,
        }
    }

    /// Builds the HTTP-backed synchronizer described by `config`: the
    /// cluster endpoint, IP geolocation when `ip_location_url` is set (the
    /// fallback center otherwise), and the enabled reverse geocoders from
    /// the built-in provider table.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the HTTP client cannot be built or the
    /// provider table does not load.
    pub fn from_config(config: SyncConfig) -> Result<Self, ConfigError> {
        let client = config.http_client()?;

        let source = Arc::new(HttpClusterSource::new(
            client.clone(),
            config.cluster_url.clone(),
        ));

        let location: Arc<dyn LocationProvider> = match &config.ip_location_url {
            Some(url) => Arc::new(IpApiLocation::new(client.clone(), url.clone())),
            None => Arc::new(FixedLocation(None)),
        };

        let geocoder = ProviderChain::from_registry(&client)?;
        if geocoder.is_empty() {
            log::warn!("No reverse geocoders enabled; center address will show coordinates");
        }

        Ok(Self::new(config, source, location, Arc::new(geocoder)))
    }

    /// Resolves the caller's position (once), then issues the initial
    /// blocking query around it without debounce. The center address is
    /// looked up in the background.
    pub async fn start(&self) -> FetchOutcome {
        let center = self
            .geolocation
            .resolve_or(self.config.fallback_center)
            .await;
        let query = build_initial_query_with_window(
            center,
            self.config.initial_zoom,
            self.config.initial_window_degrees,
        );

        log::info!(
            "Initial heat map load around {center} at zoom {}",
            query.zoom()
        );

        spawn_address_lookup(&self.address, &self.events, &self.address_task, center);
        self.manager.dispatch(query, FetchMode::Blocking).await
    }

    /// Records a pan/zoom. Only the last change of a burst is fetched,
    /// once the map has been still for the debounce period.
    pub fn handle_viewport_change(&self, bounds: Bounds, zoom: u8) {
        let query = build_query_from_viewport(bounds, zoom);
        log::trace!("Viewport changed: zoom {} {bounds:?}", query.zoom());
        self.debouncer.schedule(query);
    }

    /// Explicit reload of `query`. Not debounced; shows the loading
    /// indicator.
    pub async fn refresh(&self, query: ViewportQuery) -> FetchOutcome {
        self.manager.dispatch(query, FetchMode::Blocking).await
    }

    /// A consistent copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> SyncSnapshot {
        let fetch = self.manager.snapshot();
        SyncSnapshot {
            points: fetch.points,
            stats: fetch.stats,
            loading: fetch.loading,
            silent_loading: fetch.silent_loading,
            error: fetch.error,
            center_address: self.address.address(),
            address_loading: self.address.is_loading(),
            user_location: self.geolocation.result().flatten(),
            geolocation_loading: self.geolocation.is_loading(),
        }
    }

    /// Subscribes to state-change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// No viewport change is waiting and no fetch is in flight.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        !self.debouncer.is_pending() && !self.manager.is_in_flight()
    }

    /// Drops any pending viewport change and aborts in-flight work.
    pub fn shutdown(&self) {
        self.debouncer.cancel();
        self.manager.cancel_current();
        if let Some(task) = self
            .address_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

impl Drop for HeatMapSync {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Starts a background address lookup for `center`. The previous lookup
/// keeps running; the resolver discards it if it finishes late.
fn spawn_address_lookup(
    address: &Arc<AddressResolver>,
    events: &broadcast::Sender<SyncEvent>,
    slot: &Mutex<Option<JoinHandle<()>>>,
    center: Coordinates,
) {
    let address = address.clone();
    let events = events.clone();
    let task = tokio::spawn(async move {
        let resolved = address.resolve(center).await;
        if address.address().as_deref() == Some(resolved.as_str()) {
            let _ = events.send(SyncEvent::AddressResolved { address: resolved });
        }
    });
    *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
}
