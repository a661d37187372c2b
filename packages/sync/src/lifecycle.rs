//! Request lifecycle for cluster fetches.
//!
//! At most one fetch session is current at a time. Starting a new one
//! aborts the previous session's network future, and every commit is
//! checked against the current session id, so a superseded session can
//! never write points, stats, or errors even if its response arrives after
//! it was replaced.

use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{AbortHandle, Abortable, Aborted};
use heat_map_viewport_models::{ActivityStats, ClusterPoint, ViewportQuery};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::client::ClusterSource;
use crate::{FetchError, SyncEvent};

/// Identifier of one fetch attempt. Strictly increasing per manager.
pub type SessionId = u64;

/// How a fetch presents itself to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FetchMode {
    /// First load or explicit refresh: shows the loading indicator.
    Blocking,
    /// Viewport-driven refresh: current points stay visible.
    Silent,
}

/// What the manager is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "mode", rename_all = "camelCase")]
pub enum FetchPhase {
    /// No fetch in flight.
    Idle,
    /// A fetch of the given mode is in flight.
    Fetching(FetchMode),
}

/// How a dispatch ended.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// The response became the visible point set.
    Applied {
        /// Number of points now visible.
        point_count: usize,
    },
    /// The fetch failed; points and stats were reset.
    Failed {
        /// The message recorded as the visible error.
        message: String,
    },
    /// A newer dispatch replaced this one. Not an error.
    Superseded,
}

/// Everything the manager owns that the presentation layer reads, copied
/// under one lock.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchSnapshot {
    /// Current point set.
    pub points: Vec<ClusterPoint>,
    /// Stats derived from `points`.
    pub stats: ActivityStats,
    /// A blocking fetch is in flight.
    pub loading: bool,
    /// A silent fetch is in flight.
    pub silent_loading: bool,
    /// Message of the last failed fetch, cleared when a new one starts.
    pub error: Option<String>,
}

#[derive(Debug)]
struct FetchSession {
    id: SessionId,
    mode: FetchMode,
    abort: AbortHandle,
}

#[derive(Debug, Default)]
struct FetchState {
    points: Vec<ClusterPoint>,
    stats: ActivityStats,
    error: Option<String>,
    current: Option<FetchSession>,
    last_session: SessionId,
}

impl FetchState {
    fn phase(&self) -> FetchPhase {
        self.current
            .as_ref()
            .map_or(FetchPhase::Idle, |s| FetchPhase::Fetching(s.mode))
    }

    fn is_current(&self, id: SessionId) -> bool {
        self.current.as_ref().is_some_and(|s| s.id == id)
    }
}

struct Inner {
    source: Arc<dyn ClusterSource>,
    state: Mutex<FetchState>,
    events: broadcast::Sender<SyncEvent>,
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, FetchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the point set, its stats, and the single current fetch session.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RequestLifecycleManager {
    inner: Arc<Inner>,
}

impl RequestLifecycleManager {
    /// Creates an idle manager with no points.
    #[must_use]
    pub fn new(source: Arc<dyn ClusterSource>, events: broadcast::Sender<SyncEvent>) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                state: Mutex::new(FetchState::default()),
                events,
            }),
        }
    }

    /// Fetches `query`, replacing whatever session is current.
    ///
    /// The session becomes current as soon as this is called, before the
    /// returned future is first polled, so a caller that spawns it is never
    /// observed as idle in between. The future resolves once this session
    /// is applied, has failed, or has been superseded. Dropping it releases
    /// the session.
    pub fn dispatch(
        &self,
        query: ViewportQuery,
        mode: FetchMode,
    ) -> impl Future<Output = FetchOutcome> + Send + use<> {
        let (abort, registration) = AbortHandle::new_pair();
        let id = self.begin(mode, abort);
        let guard = SessionGuard {
            inner: self.inner.clone(),
            id,
        };

        log::debug!(
            "Session {id} ({mode:?}) fetching zoom {} bounds {:?}",
            query.zoom(),
            query.bounds()
        );

        let manager = self.clone();
        async move {
            let _guard = guard;
            let source = manager.inner.source.clone();
            let fetch = Abortable::new(
                async move { source.fetch_clusters(&query).await },
                registration,
            );

            match fetch.await {
                Ok(result) => manager.commit(id, result),
                Err(Aborted) => {
                    log::debug!("Session {id} aborted");
                    FetchOutcome::Superseded
                }
            }
        }
    }

    /// Aborts the current session, if any, without starting another.
    pub fn cancel_current(&self) {
        if let Some(session) = self.inner.lock().current.take() {
            log::debug!("Cancelling session {}", session.id);
            session.abort.abort();
        }
    }

    /// Whether a session is in flight.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.inner.lock().current.is_some()
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> FetchPhase {
        self.inner.lock().phase()
    }

    /// A consistent copy of the visible state.
    #[must_use]
    pub fn snapshot(&self) -> FetchSnapshot {
        let state = self.inner.lock();
        let phase = state.phase();
        FetchSnapshot {
            points: state.points.clone(),
            stats: state.stats,
            loading: phase == FetchPhase::Fetching(FetchMode::Blocking),
            silent_loading: phase == FetchPhase::Fetching(FetchMode::Silent),
            error: state.error.clone(),
        }
    }

    fn begin(&self, mode: FetchMode, abort: AbortHandle) -> SessionId {
        let mut state = self.inner.lock();

        if let Some(previous) = state.current.take() {
            log::debug!("Session {} superseded", previous.id);
            previous.abort.abort();
        }

        state.last_session += 1;
        let id = state.last_session;
        state.current = Some(FetchSession { id, mode, abort });
        state.error = None;
        id
    }

    fn commit(&self, id: SessionId, result: Result<Vec<ClusterPoint>, FetchError>) -> FetchOutcome {
        let (outcome, event) = {
            let mut state = self.inner.lock();
            if !state.is_current(id) {
                log::debug!("Discarding result of superseded session {id}");
                return FetchOutcome::Superseded;
            }
            state.current = None;

            match result {
                Ok(points) => {
                    let stats = ActivityStats::from_points(&points);
                    let point_count = points.len();
                    state.points = points;
                    state.stats = stats;
                    state.error = None;
                    log::debug!(
                        "Session {id} applied {point_count} points ({} records)",
                        stats.total_count
                    );
                    (
                        FetchOutcome::Applied { point_count },
                        SyncEvent::PointsUpdated { point_count, stats },
                    )
                }
                Err(e) => {
                    log::error!("Session {id} failed: {e}");
                    let message = e.to_string();
                    state.points = Vec::new();
                    state.stats = ActivityStats::default();
                    state.error = Some(message.clone());
                    (
                        FetchOutcome::Failed {
                            message: message.clone(),
                        },
                        SyncEvent::FetchFailed { message },
                    )
                }
            }
        };

        // Nobody listening is fine.
        let _ = self.inner.events.send(event);
        outcome
    }
}

/// Releases the session on every exit path of [`RequestLifecycleManager::dispatch`],
/// including the future being dropped mid-fetch or never polled. Only
/// clears the slot if this session still owns it.
struct SessionGuard {
    inner: Arc<Inner>,
    id: SessionId,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        if state.is_current(self.id) {
            state.current = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedSource, points};
    use std::time::Duration;

    fn manager(
        source: &Arc<ScriptedSource>,
    ) -> (RequestLifecycleManager, broadcast::Receiver<SyncEvent>) {
        let (tx, rx) = broadcast::channel(16);
        (RequestLifecycleManager::new(source.clone(), tx), rx)
    }

    fn query() -> ViewportQuery {
        ViewportQuery::new(12, None)
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_fetch_applies_points_and_stats() {
        let source = Arc::new(ScriptedSource::new());
        source.reply_after(Duration::from_millis(200), Ok(points(&[10, 40, 60])));
        let (manager, mut events) = manager(&source);

        let task = tokio::spawn({
            let manager = manager.clone();
            async move { manager.dispatch(query(), FetchMode::Blocking).await }
        });
        tokio::task::yield_now().await;

        let during = manager.snapshot();
        assert!(during.loading);
        assert!(!during.silent_loading);
        assert!(manager.is_in_flight());

        assert_eq!(task.await.unwrap(), FetchOutcome::Applied { point_count: 3 });

        let after = manager.snapshot();
        assert!(!after.loading);
        assert_eq!(after.points.len(), 3);
        assert_eq!(after.stats.total_count, 110);
        assert_eq!(after.stats.low_activity_count, 1);
        assert_eq!(after.stats.medium_activity_count, 1);
        assert_eq!(after.stats.high_activity_count, 1);
        assert_eq!(manager.phase(), FetchPhase::Idle);
        assert!(matches!(
            events.recv().await.unwrap(),
            SyncEvent::PointsUpdated { point_count: 3, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_fetch_keeps_previous_points_visible() {
        let source = Arc::new(ScriptedSource::new());
        source.reply(Ok(points(&[5, 5])));
        source.reply_after(Duration::from_millis(500), Ok(points(&[70])));
        let (manager, _events) = manager(&source);

        manager.dispatch(query(), FetchMode::Blocking).await;

        let task = tokio::spawn({
            let manager = manager.clone();
            async move { manager.dispatch(query(), FetchMode::Silent).await }
        });
        tokio::task::yield_now().await;

        let during = manager.snapshot();
        assert!(during.silent_loading);
        assert!(!during.loading);
        assert_eq!(during.points.len(), 2);

        task.await.unwrap();
        let after = manager.snapshot();
        assert_eq!(after.points.len(), 1);
        assert_eq!(after.stats.high_activity_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_dispatch_supersedes_older_one() {
        let source = Arc::new(ScriptedSource::new());
        source.reply_after(Duration::from_secs(5), Ok(points(&[1, 1, 1])));
        source.reply_after(Duration::from_secs(1), Ok(points(&[99])));
        let (manager, _events) = manager(&source);

        let first = tokio::spawn({
            let manager = manager.clone();
            async move { manager.dispatch(query(), FetchMode::Blocking).await }
        });
        tokio::task::yield_now().await;

        let second = manager.dispatch(query(), FetchMode::Silent).await;
        assert_eq!(second, FetchOutcome::Applied { point_count: 1 });
        assert_eq!(first.await.unwrap(), FetchOutcome::Superseded);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.points, points(&[99]));
        assert!(!manager.is_in_flight());
    }

    #[test]
    fn late_result_of_replaced_session_is_discarded() {
        let source = Arc::new(ScriptedSource::new());
        let (manager, _events) = manager(&source);

        let (old_abort, _) = AbortHandle::new_pair();
        let old = manager.begin(FetchMode::Blocking, old_abort);
        let (new_abort, _) = AbortHandle::new_pair();
        let new = manager.begin(FetchMode::Silent, new_abort);

        assert_eq!(
            manager.commit(old, Ok(points(&[80]))),
            FetchOutcome::Superseded
        );
        assert_eq!(
            manager.commit(old, Err(FetchError::Malformed { message: "x".into() })),
            FetchOutcome::Superseded
        );
        assert!(manager.snapshot().points.is_empty());
        assert!(manager.snapshot().error.is_none());
        assert_eq!(manager.phase(), FetchPhase::Fetching(FetchMode::Silent));

        assert_eq!(
            manager.commit(new, Ok(points(&[80]))),
            FetchOutcome::Applied { point_count: 1 }
        );
    }

    #[tokio::test]
    async fn failure_resets_points_and_stats() {
        let source = Arc::new(ScriptedSource::new());
        source.reply(Ok(points(&[10, 35, 55])));
        source.reply(Err(FetchError::Status(reqwest::StatusCode::BAD_GATEWAY)));
        source.reply(Ok(points(&[1])));
        let (manager, mut events) = manager(&source);

        manager.dispatch(query(), FetchMode::Blocking).await;
        let _ = events.recv().await;

        let outcome = manager.dispatch(query(), FetchMode::Silent).await;
        assert!(matches!(outcome, FetchOutcome::Failed { .. }));

        let failed = manager.snapshot();
        assert!(failed.points.is_empty());
        assert_eq!(failed.stats, ActivityStats::default());
        assert!(failed.error.is_some());
        assert!(!failed.loading && !failed.silent_loading);
        assert!(matches!(
            events.recv().await.unwrap(),
            SyncEvent::FetchFailed { .. }
        ));

        // Still usable after a failure.
        let outcome = manager.dispatch(query(), FetchMode::Silent).await;
        assert_eq!(outcome, FetchOutcome::Applied { point_count: 1 });
        assert!(manager.snapshot().error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_dispatch_releases_the_session() {
        let source = Arc::new(ScriptedSource::new());
        source.reply_after(Duration::from_secs(30), Ok(points(&[1])));
        let (manager, _events) = manager(&source);

        let task = tokio::spawn({
            let manager = manager.clone();
            async move { manager.dispatch(query(), FetchMode::Blocking).await }
        });
        tokio::task::yield_now().await;
        assert!(manager.is_in_flight());

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(!manager.is_in_flight());
        assert!(!manager.snapshot().loading);
    }

    #[test]
    fn dispatch_is_in_flight_before_first_poll() {
        let source = Arc::new(ScriptedSource::new());
        let (manager, _events) = manager(&source);

        let pending = manager.dispatch(query(), FetchMode::Silent);
        assert!(manager.is_in_flight());
        assert!(manager.snapshot().silent_loading);

        drop(pending);
        assert!(!manager.is_in_flight());
        assert_eq!(manager.phase(), FetchPhase::Idle);
        assert!(source.queries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_current_stops_the_fetch() {
        let source = Arc::new(ScriptedSource::new());
        source.reply_after(Duration::from_secs(3), Ok(points(&[1])));
        let (manager, _events) = manager(&source);

        let task = tokio::spawn({
            let manager = manager.clone();
            async move { manager.dispatch(query(), FetchMode::Blocking).await }
        });
        tokio::task::yield_now().await;

        manager.cancel_current();
        assert_eq!(task.await.unwrap(), FetchOutcome::Superseded);
        assert!(manager.snapshot().points.is_empty());
        assert_eq!(manager.phase(), FetchPhase::Idle);
    }
}
