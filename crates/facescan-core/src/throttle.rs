//! Rate limiting for the gallery search call.
//!
//! Attempts arriving too soon after the previous call, or while a call is
//! still outstanding, are dropped rather than queued: a fresher frame will
//! come along shortly.

use std::cell::Cell;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_MATCH_INTERVAL: Duration = Duration::from_millis(700);

/// Non-queuing gate around an asynchronous call.
///
/// State lives in `Cell`s: the throttle is driven from a single task, and the
/// in-flight flag only guards against re-entry across `.await` points.
#[derive(Debug)]
pub struct MatchThrottle {
    interval: Duration,
    last_call: Cell<Option<Instant>>,
    in_flight: Cell<bool>,
}

impl Default for MatchThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_INTERVAL)
    }
}

impl MatchThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_call: Cell::new(None),
            in_flight: Cell::new(false),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.get()
    }

    /// Claim the gate, or `None` if the attempt must be dropped.
    ///
    /// The returned guard clears the in-flight flag when dropped.
    pub fn try_acquire(&self) -> Option<InFlightGuard<'_>> {
        if self.in_flight.get() {
            tracing::debug!("match search dropped: previous call still in flight");
            return None;
        }

        let now = Instant::now();
        if let Some(last) = self.last_call.get() {
            let elapsed = now.duration_since(last);
            if elapsed < self.interval {
                tracing::debug!(elapsed_ms = elapsed.as_millis() as u64, "match search dropped: too soon");
                return None;
            }
        }

        self.in_flight.set(true);
        self.last_call.set(Some(now));
        Some(InFlightGuard { throttle: self })
    }

    /// Run `f` if the gate is open; `None` means the call was dropped.
    ///
    /// The in-flight flag is released whether `f` succeeds, fails, panics or
    /// is cancelled.
    pub async fn call<F, Fut, T>(&self, f: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.try_acquire()?;
        Some(f().await)
    }

    /// Forget the last call time and any in-flight marker.
    pub fn reset(&self) {
        self.last_call.set(None);
        self.in_flight.set(false);
    }
}

/// Holds the throttle's in-flight flag for the duration of one call.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    throttle: &'a MatchThrottle,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.throttle.in_flight.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test(start_paused = true)]
    async fn test_calls_100ms_apart_drop_second() {
        let throttle = MatchThrottle::default();
        assert_eq!(throttle.call(|| async { 1 }).await, Some(1));

        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(throttle.call(|| async { 2 }).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_800ms_apart_both_proceed() {
        let throttle = MatchThrottle::default();
        assert_eq!(throttle.call(|| async { 1 }).await, Some(1));

        tokio::time::advance(Duration::from_millis(800)).await;
        assert_eq!(throttle.call(|| async { 2 }).await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_call_does_not_reset_window() {
        let throttle = MatchThrottle::default();
        assert!(throttle.call(|| async {}).await.is_some());

        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(throttle.call(|| async {}).await.is_none());

        // 700ms after the first accepted call, not the dropped one.
        tokio::time::advance(Duration::from_millis(300)).await;
        assert!(throttle.call(|| async {}).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_call_blocks_second() {
        let throttle = MatchThrottle::default();
        let (tx, rx) = oneshot::channel::<u32>();

        let first = throttle.call(|| async move { rx.await.unwrap_or(0) });
        let second = async {
            tokio::time::advance(Duration::from_millis(800)).await;
            assert!(throttle.is_in_flight());
            let dropped = throttle.call(|| async { 2 }).await;
            tx.send(1).unwrap();
            dropped
        };

        let (a, b) = tokio::join!(first, second);
        assert_eq!(a, Some(1));
        assert_eq!(b, None);
        assert!(!throttle.is_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_on_error() {
        let throttle = MatchThrottle::default();
        let result: Option<Result<(), &str>> = throttle.call(|| async { Err("search failed") }).await;
        assert_eq!(result, Some(Err("search failed")));
        assert!(!throttle.is_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_on_cancellation() {
        let throttle = MatchThrottle::default();

        tokio::select! {
            biased;
            _ = throttle.call(|| std::future::pending::<()>()) => unreachable!(),
            _ = tokio::time::sleep(Duration::from_millis(10)) => {}
        }

        assert!(!throttle.is_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_window() {
        let throttle = MatchThrottle::default();
        assert!(throttle.call(|| async {}).await.is_some());
        throttle.reset();
        assert!(throttle.call(|| async {}).await.is_some());
    }
}
