//! Trailing-edge debounce.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

/// Collapses bursts of values into one call made after `delay` of quiet.
///
/// Every [`Self::schedule`] cancels the pending emission and restarts the
/// timer, so only the most recent value is ever delivered. Values are
/// never batched. Dropping the debouncer cancels whatever is pending.
pub struct Debouncer<T> {
    delay: Duration,
    callback: Arc<dyn Fn(T) + Send + Sync>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> Debouncer<T> {
    /// Creates a debouncer that calls `callback` after `delay` of quiet.
    pub fn new(delay: Duration, callback: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            delay,
            callback: Arc::new(callback),
            pending: Mutex::new(None),
        }
    }

    /// Quiet period before emission.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Replaces any pending value with `value` and restarts the timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, value: T) {
        let callback = self.callback.clone();
        let delay = self.delay;

        let mut pending = self.lock();
        if let Some(handle) = pending.take() {
            handle.abort();
        }
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback(value);
        }));
    }

    /// Drops the pending value, if any, without emitting it.
    pub fn cancel(&self) {
        if let Some(handle) = self.lock().take() {
            handle.abort();
        }
    }

    /// Whether a value is waiting for its quiet period to elapse.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        let pending = self
            .pending
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = pending.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording(delay: Duration) -> (Debouncer<u32>, Arc<Mutex<Vec<u32>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let debouncer = Debouncer::new(delay, move |v| sink.lock().unwrap().push(v));
        (debouncer, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn emits_only_last_value_of_a_burst() {
        let (debouncer, seen) = recording(Duration::from_millis(300));

        for v in 1..=5 {
            debouncer.schedule(v);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(debouncer.is_pending());
        assert!(seen.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(*seen.lock().unwrap(), vec![5]);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn separate_bursts_emit_separately() {
        let (debouncer, seen) = recording(Duration::from_millis(300));

        debouncer.schedule(1);
        tokio::time::sleep(Duration::from_millis(400)).await;
        debouncer.schedule(2);
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_restarts_the_timer() {
        let (debouncer, seen) = recording(Duration::from_millis(300));

        debouncer.schedule(1);
        tokio::time::sleep(Duration::from_millis(250)).await;
        debouncer.schedule(2);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(seen.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*seen.lock().unwrap(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_and_drop_suppress_emission() {
        let (debouncer, seen) = recording(Duration::from_millis(300));
        debouncer.schedule(1);
        debouncer.cancel();
        assert!(!debouncer.is_pending());

        debouncer.schedule(2);
        drop(debouncer);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(seen.lock().unwrap().is_empty());
    }
}
