//! Live synchronizer: keeps the store current by polling on a fixed interval.
//!
//! Each poll fetches the open-ended window starting one fifth of an interval
//! before the previous successful poll. Events that show up late or out of
//! order at the boundary are caught by the overlap; the re-delivered ones
//! are absorbed by the store's idempotent insert.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument, Span};

use tezdel_store::DelegationStore;
use tezdel_types::{format_timestamp, parse_timestamp};

use crate::client::{DelegationClient, FetchOptions};
use crate::metrics::SyncMetrics;
use crate::SyncError;

/// Shortest accepted polling interval. Below one second the overlap would
/// vanish under the wire format's second precision.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Longest accepted polling interval.
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// The overlap is `interval / OVERLAP_DIVISOR`.
const OVERLAP_DIVISOR: u32 = 5;

/// Check `interval` against [`MIN_INTERVAL`] and [`MAX_INTERVAL`] and return
/// the matching overlap.
pub fn validate_interval(interval: Duration) -> Result<chrono::Duration, SyncError> {
    if interval.is_zero() {
        return Err(SyncError::NoInterval);
    }
    if interval < MIN_INTERVAL {
        return Err(SyncError::IntervalTooShort {
            interval,
            minimum: MIN_INTERVAL,
        });
    }
    if interval > MAX_INTERVAL {
        return Err(SyncError::IntervalOutOfRange(interval));
    }
    chrono::Duration::from_std(interval / OVERLAP_DIVISOR)
        .map_err(|_| SyncError::IntervalOutOfRange(interval))
}

/// Cursor state and the poll step, owned by exactly one task at a time.
pub struct LivePoller {
    client: DelegationClient,
    store: Arc<dyn DelegationStore>,
    metrics: Arc<SyncMetrics>,
    overlap: chrono::Duration,
    upper_bound: Option<String>,
    last: DateTime<Utc>,
}

impl LivePoller {
    /// Validates `interval` and positions the cursor at `last`.
    pub fn new(
        client: DelegationClient,
        store: Arc<dyn DelegationStore>,
        metrics: Arc<SyncMetrics>,
        interval: Duration,
        upper_bound: Option<String>,
        last: DateTime<Utc>,
    ) -> Result<Self, SyncError> {
        let overlap = validate_interval(interval)?;
        if last.checked_sub_signed(overlap).is_none() {
            return Err(SyncError::IntervalOutOfRange(interval));
        }

        Ok(Self {
            client,
            store,
            metrics,
            overlap,
            upper_bound: upper_bound.filter(|s| !s.is_empty()),
            last,
        })
    }

    /// Time of the last successful fetch (or the starting point).
    pub fn last_sync(&self) -> DateTime<Utc> {
        self.last
    }

    /// The request the next poll will send.
    pub fn window(&self) -> FetchOptions {
        FetchOptions {
            from: Some(format_timestamp(
                self.last
                    .checked_sub_signed(self.overlap)
                    .unwrap_or(DateTime::<Utc>::MIN_UTC),
            )),
            to: self.upper_bound.clone(),
            limit: 0,
        }
    }

    /// One poll step. Returns how many delegations were newly stored.
    ///
    /// The cursor moves to "now" as soon as a page comes back, empty or not;
    /// a failed fetch leaves it where it was so the window is retried.
    pub async fn poll(&mut self) -> Result<usize, SyncError> {
        let window = self.window();
        debug!(from = ?window.from, to = ?window.to, "sync live");
        self.metrics.live_polls.inc();

        let delegations = self.client.fetch(&window).await?;
        self.last = Utc::now();
        self.metrics
            .live_last_sync_seconds
            .set(self.last.timestamp());

        if delegations.is_empty() {
            return Ok(0);
        }
        self.metrics
            .delegations_fetched
            .inc_by(delegations.len() as u64);

        debug!(delegations = delegations.len(), "insert delegations");
        let inserted = self.store.insert(&delegations)?;
        self.metrics.delegations_inserted.inc_by(inserted as u64);
        Ok(inserted)
    }
}

enum LiveState {
    Idle,
    Running {
        cancel: CancellationToken,
        handle: JoinHandle<()>,
    },
    Stopped,
}

/// Continuous live synchronizer.
///
/// Idle until [`start`](Self::start) succeeds, then polls in a background
/// task until [`stop`](Self::stop). A stopped instance cannot be restarted.
pub struct LiveSync {
    client: DelegationClient,
    store: Arc<dyn DelegationStore>,
    metrics: Arc<SyncMetrics>,
    interval: Duration,
    upper_bound: Option<String>,
    span: Span,
    state: LiveState,
}

impl LiveSync {
    pub fn new(
        client: DelegationClient,
        interval: Duration,
        store: Arc<dyn DelegationStore>,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        let span = info_span!("live_sync", api = %client.api());
        Self {
            client,
            store,
            metrics,
            interval,
            upper_bound: None,
            span,
            state: LiveState::Idle,
        }
    }

    /// Bound every poll window above by `to` (exclusive).
    pub fn with_upper_bound(mut self, to: impl Into<String>) -> Self {
        self.upper_bound = Some(to.into());
        self
    }

    /// Log under `span` instead of the default `live_sync` span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn is_running(&self) -> bool {
        matches!(&self.state, LiveState::Running { handle, .. } if !handle.is_finished())
    }

    /// Run one poll immediately, then keep polling every interval in the
    /// background.
    ///
    /// The interval is checked before anything else, then the state, then
    /// `from`.
    ///
    /// `from` (RFC3339) positions the first window; it defaults to now. If
    /// the first poll fails its error is returned and nothing is spawned.
    /// Cancelling `parent` stops the background task like [`stop`](Self::stop)
    /// does, minus the wait.
    pub async fn start(
        &mut self,
        parent: &CancellationToken,
        from: Option<&str>,
    ) -> Result<(), SyncError> {
        validate_interval(self.interval)?;
        if !matches!(self.state, LiveState::Idle) {
            return Err(SyncError::AlreadyStarted);
        }

        let last = match from.filter(|s| !s.is_empty()) {
            Some(from) => parse_timestamp(from)?,
            None => Utc::now(),
        };
        let mut poller = LivePoller::new(
            self.client.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.metrics),
            self.interval,
            self.upper_bound.clone(),
            last,
        )?;

        self.span.in_scope(|| {
            info!(from = %format_timestamp(last), interval = ?self.interval, "start live sync")
        });

        if let Err(e) = poller.poll().instrument(self.span.clone()).await {
            self.metrics.live_poll_failures.inc();
            return Err(e);
        }

        let cancel = parent.child_token();
        let task = poll_loop(
            poller,
            self.interval,
            cancel.clone(),
            Arc::clone(&self.metrics),
        );
        let handle = tokio::spawn(task.instrument(self.span.clone()));
        self.state = LiveState::Running { cancel, handle };
        Ok(())
    }

    /// Cancel the background task and wait until it has exited. No-op if
    /// never started.
    pub async fn stop(&mut self) {
        let state = std::mem::replace(&mut self.state, LiveState::Stopped);
        match state {
            LiveState::Idle => self.state = LiveState::Idle,
            LiveState::Stopped => {}
            LiveState::Running { cancel, handle } => {
                cancel.cancel();
                if let Err(e) = handle.await {
                    self.span.in_scope(|| error!(error = %e, "live sync task failed"));
                }
            }
        }
    }
}

impl Drop for LiveSync {
    fn drop(&mut self) {
        if let LiveState::Running { cancel, .. } = &self.state {
            cancel.cancel();
        }
    }
}

async fn poll_loop(
    mut poller: LivePoller,
    interval: Duration,
    cancel: CancellationToken,
    metrics: Arc<SyncMetrics>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = poller.poll() => result,
        };
        if let Err(e) = result {
            metrics.live_poll_failures.inc();
            error!(error = %e, "failed to sync");
        }
    }

    info!("live sync stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tezdel_nullables::{NullDelegationStore, NullUpstream, ScriptedResponse};

    const PAGE: &str = r#"[{"timestamp":"2024-10-29T10:22:25Z","sender":{"address":"tz1L6FGN8F2o3j8CsGCoktiFDdDLkbECEDms"},"amount":13814013,"level":6976378,"id":1401626186219520},{"timestamp":"2024-10-29T10:10:00Z","sender":{"address":"tz29LqGEjCrSR1HFhzMoujZvXi5Rgdhxe7mP"},"amount":2548493,"level":6976305,"id":1401610442899456}]"#;

    fn poller(
        url: &str,
        store: Arc<NullDelegationStore>,
        interval: Duration,
        last: DateTime<Utc>,
    ) -> LivePoller {
        LivePoller::new(
            DelegationClient::new(url).unwrap(),
            store,
            Arc::new(SyncMetrics::new()),
            interval,
            None,
            last,
        )
        .unwrap()
    }

    fn live(url: &str, store: Arc<NullDelegationStore>, interval: Duration) -> LiveSync {
        LiveSync::new(
            DelegationClient::new(url).unwrap(),
            interval,
            store,
            Arc::new(SyncMetrics::new()),
        )
    }

    #[test]
    fn window_starts_one_fifth_interval_back() {
        let last = parse_timestamp("2024-10-29T10:00:00Z").unwrap();
        let p = poller(
            "http://localhost:1",
            Arc::new(NullDelegationStore::new()),
            Duration::from_secs(60),
            last,
        );
        let window = p.window();
        assert_eq!(window.from.as_deref(), Some("2024-10-29T09:59:48Z"));
        assert_eq!(window.to, None);
        assert_eq!(window.limit, 0);
    }

    #[test]
    fn window_carries_upper_bound() {
        let p = LivePoller::new(
            DelegationClient::new("http://localhost:1").unwrap(),
            Arc::new(NullDelegationStore::new()),
            Arc::new(SyncMetrics::new()),
            Duration::from_secs(10),
            Some("2025-01-01T00:00:00Z".into()),
            parse_timestamp("2024-12-31T23:00:00Z").unwrap(),
        )
        .unwrap();
        assert_eq!(p.window().to.as_deref(), Some("2025-01-01T00:00:00Z"));
        assert_eq!(p.window().from.as_deref(), Some("2024-12-31T22:59:58Z"));
    }

    #[test]
    fn interval_validation() {
        let build = |interval| {
            LivePoller::new(
                DelegationClient::new("http://localhost:1").unwrap(),
                Arc::new(NullDelegationStore::new()),
                Arc::new(SyncMetrics::new()),
                interval,
                None,
                Utc::now(),
            )
        };
        assert!(matches!(build(Duration::ZERO), Err(SyncError::NoInterval)));
        assert!(matches!(
            build(Duration::from_millis(999)),
            Err(SyncError::IntervalTooShort { .. })
        ));
        assert!(build(MIN_INTERVAL).is_ok());
        assert!(build(MAX_INTERVAL).is_ok());
        assert!(matches!(
            build(MAX_INTERVAL + Duration::from_secs(1)),
            Err(SyncError::IntervalOutOfRange(_))
        ));
        assert!(matches!(
            build(Duration::from_secs(500_000_000_000_000)),
            Err(SyncError::IntervalOutOfRange(_))
        ));
    }

    #[test]
    fn overlap_before_earliest_date_is_rejected() {
        let result = LivePoller::new(
            DelegationClient::new("http://localhost:1").unwrap(),
            Arc::new(NullDelegationStore::new()),
            Arc::new(SyncMetrics::new()),
            Duration::from_secs(60),
            None,
            DateTime::<Utc>::MIN_UTC,
        );
        assert!(matches!(result, Err(SyncError::IntervalOutOfRange(_))));
    }

    #[tokio::test]
    async fn poll_advances_cursor_on_empty_page() {
        let upstream = NullUpstream::start().await;
        let store = Arc::new(NullDelegationStore::new());
        let last = parse_timestamp("2024-10-29T10:00:00Z").unwrap();
        let mut p = poller(&upstream.url(), Arc::clone(&store), Duration::from_secs(60), last);

        let started = Utc::now();
        assert_eq!(p.poll().await.unwrap(), 0);
        assert!(p.last_sync() >= started);
        assert!(store.insert_calls().is_empty());
        assert_eq!(
            upstream.requests()[0].param("timestamp.ge"),
            Some("2024-10-29T09:59:48Z")
        );
    }

    #[tokio::test]
    async fn poll_forwards_page_to_store() {
        let upstream = NullUpstream::start().await;
        upstream.push(ScriptedResponse::ok(PAGE));
        let store = Arc::new(NullDelegationStore::new());
        let mut p = poller(&upstream.url(), Arc::clone(&store), Duration::from_secs(60), Utc::now());

        assert_eq!(p.poll().await.unwrap(), 2);
        assert_eq!(store.insert_calls().len(), 1);
        assert_eq!(store.insert_calls()[0].len(), 2);
    }

    #[tokio::test]
    async fn failed_fetch_keeps_cursor() {
        let upstream = NullUpstream::start().await;
        upstream.push(ScriptedResponse::status(502, ""));
        let store = Arc::new(NullDelegationStore::new());
        let last = parse_timestamp("2024-10-29T10:00:00Z").unwrap();
        let mut p = poller(&upstream.url(), store, Duration::from_secs(60), last);

        assert!(matches!(p.poll().await, Err(SyncError::InvalidStatusCode(502))));
        assert_eq!(p.last_sync(), last);
    }

    #[tokio::test]
    async fn store_failure_propagates_but_cursor_advances() {
        let upstream = NullUpstream::start().await;
        upstream.push(ScriptedResponse::ok(PAGE));
        let store = Arc::new(NullDelegationStore::new());
        store.fail_inserts(true);
        let last = parse_timestamp("2024-10-29T10:00:00Z").unwrap();
        let mut p = poller(&upstream.url(), store, Duration::from_secs(60), last);

        assert!(matches!(p.poll().await, Err(SyncError::Store(_))));
        assert!(p.last_sync() > last);
    }

    #[tokio::test]
    async fn start_with_zero_interval_fails_without_fetching() {
        let upstream = NullUpstream::start().await;
        let store = Arc::new(NullDelegationStore::new());
        let mut sync = live(&upstream.url(), store, Duration::ZERO);

        let err = sync.start(&CancellationToken::new(), None).await.unwrap_err();
        assert!(matches!(err, SyncError::NoInterval));
        assert!(!sync.is_running());
        assert_eq!(upstream.request_count(), 0);
    }

    #[tokio::test]
    async fn start_with_empty_first_page_succeeds_without_insert() {
        let upstream = NullUpstream::start().await;
        let store = Arc::new(NullDelegationStore::new());
        let mut sync = live(&upstream.url(), Arc::clone(&store), Duration::from_secs(60));

        sync.start(&CancellationToken::new(), None).await.unwrap();
        assert!(sync.is_running());
        assert!(store.insert_calls().is_empty());
        sync.stop().await;
        assert!(!sync.is_running());
    }

    #[tokio::test]
    async fn start_fails_fast_when_first_poll_fails() {
        let upstream = NullUpstream::start().await;
        upstream.push(ScriptedResponse::status(500, "boom"));
        let store = Arc::new(NullDelegationStore::new());
        let mut sync = live(&upstream.url(), store, Duration::from_secs(60));

        let err = sync.start(&CancellationToken::new(), None).await.unwrap_err();
        assert_eq!(err.status_code(), Some(500));
        assert!(!sync.is_running());
    }

    #[tokio::test]
    async fn start_fails_when_first_insert_fails() {
        let upstream = NullUpstream::start().await;
        upstream.push(ScriptedResponse::ok(PAGE));
        let store = Arc::new(NullDelegationStore::new());
        store.fail_inserts(true);
        let mut sync = live(&upstream.url(), store, Duration::from_secs(60));

        let err = sync.start(&CancellationToken::new(), None).await.unwrap_err();
        assert!(matches!(err, SyncError::Store(_)));
        assert!(!sync.is_running());
    }

    #[tokio::test]
    async fn start_checks_interval_before_from() {
        let upstream = NullUpstream::start().await;
        let mut sync = live(
            &upstream.url(),
            Arc::new(NullDelegationStore::new()),
            Duration::ZERO,
        );
        let err = sync
            .start(&CancellationToken::new(), Some("not a timestamp"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NoInterval));
        assert_eq!(upstream.request_count(), 0);
    }

    #[tokio::test]
    async fn start_applies_upper_bound_to_every_window() {
        let upstream = NullUpstream::start().await;
        let mut sync = live(
            &upstream.url(),
            Arc::new(NullDelegationStore::new()),
            Duration::from_secs(60),
        )
        .with_upper_bound("2025-01-01T00:00:00Z");

        sync.start(&CancellationToken::new(), Some("2024-12-31T00:00:00Z"))
            .await
            .unwrap();
        sync.stop().await;

        let requests = upstream.requests();
        assert_eq!(requests[0].param("timestamp.lt"), Some("2025-01-01T00:00:00Z"));
        assert_eq!(requests[0].param("timestamp.ge"), Some("2024-12-30T23:59:48Z"));
    }

    #[tokio::test]
    async fn start_rejects_unparsable_from() {
        let upstream = NullUpstream::start().await;
        let mut sync = live(
            &upstream.url(),
            Arc::new(NullDelegationStore::new()),
            Duration::from_secs(60),
        );
        let err = sync
            .start(&CancellationToken::new(), Some("last tuesday"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidTimestamp(_)));
        assert_eq!(upstream.request_count(), 0);
    }

    #[tokio::test]
    async fn start_from_positions_first_window() {
        let upstream = NullUpstream::start().await;
        let mut sync = live(
            &upstream.url(),
            Arc::new(NullDelegationStore::new()),
            Duration::from_secs(60),
        );
        sync.start(&CancellationToken::new(), Some("2024-10-29T10:00:00Z"))
            .await
            .unwrap();
        sync.stop().await;
        assert_eq!(
            upstream.requests()[0].param("timestamp.ge"),
            Some("2024-10-29T09:59:48Z")
        );
    }

    #[tokio::test]
    async fn stop_without_start_is_noop_and_restart_is_rejected() {
        let upstream = NullUpstream::start().await;
        let mut sync = live(
            &upstream.url(),
            Arc::new(NullDelegationStore::new()),
            Duration::from_secs(60),
        );
        sync.stop().await;
        sync.start(&CancellationToken::new(), None).await.unwrap();
        sync.stop().await;
        sync.stop().await;

        let err = sync.start(&CancellationToken::new(), None).await.unwrap_err();
        assert!(matches!(err, SyncError::AlreadyStarted));
    }

    #[tokio::test]
    async fn parent_cancellation_ends_background_task() {
        let upstream = NullUpstream::start().await;
        let mut sync = live(
            &upstream.url(),
            Arc::new(NullDelegationStore::new()),
            Duration::from_secs(60),
        );
        let parent = CancellationToken::new();
        sync.start(&parent, None).await.unwrap();
        parent.cancel();

        tokio::time::timeout(Duration::from_secs(2), async {
            while sync.is_running() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("task should exit after parent cancellation");
    }
}
