//! One-shot historical backfill.
//!
//! Walks `[from, to)` in pages of [`BATCH_SIZE`], using the timestamp of the
//! last element of each full page as the next inclusive lower bound. The
//! boundary event is therefore fetched twice; the store's idempotent insert
//! absorbs it.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument, Span};

use tezdel_store::DelegationStore;
use tezdel_types::{format_timestamp, parse_timestamp, Delegation};

use crate::client::{DelegationClient, FetchOptions};
use crate::metrics::SyncMetrics;
use crate::SyncError;

/// Page size requested from upstream.
pub const BATCH_SIZE: usize = 10_000;

/// Timestamp of the first delegation on chain. Default lower bound for an
/// empty store.
pub const FIRST_DELEGATION: &str = "2018-06-30T19:30:27Z";

/// Cursor for the page after `page`, or `None` when `page` was the last one.
///
/// A page shorter than `limit` means upstream has nothing more in range.
pub fn next_cursor(page: &[Delegation], limit: usize) -> Option<String> {
    if page.len() < limit {
        return None;
    }
    page.last().map(|d| d.timestamp.clone())
}

/// Bounded historical synchronizer.
///
/// At most one [`sync`](Self::sync) runs at a time per instance; `stop` may
/// be called from any task holding a reference.
pub struct HistorySync {
    client: DelegationClient,
    store: Arc<dyn DelegationStore>,
    metrics: Arc<SyncMetrics>,
    batch_size: usize,
    span: Span,
    cancel: Mutex<Option<CancellationToken>>,
    running: watch::Sender<bool>,
}

impl HistorySync {
    pub fn new(
        client: DelegationClient,
        store: Arc<dyn DelegationStore>,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        let span = info_span!("history_sync", api = %client.api());
        let (running, _) = watch::channel(false);
        Self {
            client,
            store,
            metrics,
            batch_size: BATCH_SIZE,
            span,
            cancel: Mutex::new(None),
            running,
        }
    }

    /// Override the page size. Clamped to at least 1.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Backfill `[from, to)` and return when done, cancelled, or failed.
    ///
    /// `from` defaults to the newest stored delegation, or
    /// [`FIRST_DELEGATION`] for an empty store. `to` defaults to the time of
    /// the call and stays fixed for the whole run; events newer than that
    /// are left to the live synchronizer.
    ///
    /// Cancellation (of `parent` or through [`stop`](Self::stop)) ends the
    /// run with `Ok(())`, even mid-request.
    pub async fn sync(
        &self,
        parent: &CancellationToken,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<(), SyncError> {
        let cancel = self.begin(parent)?;
        let _guard = RunningGuard { sync: self };
        self.run(&cancel, from, to).instrument(self.span.clone()).await
    }

    fn begin(&self, parent: &CancellationToken) -> Result<CancellationToken, SyncError> {
        let mut slot = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(SyncError::AlreadyStarted);
        }
        let cancel = parent.child_token();
        *slot = Some(cancel.clone());
        self.running.send_replace(true);
        Ok(cancel)
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<(), SyncError> {
        let mut cursor = match non_empty(from) {
            Some(from) => normalize(from)?,
            None => self.resume_point()?,
        };
        let to = match non_empty(to) {
            Some(to) => normalize(to)?,
            None => format_timestamp(Utc::now()),
        };
        info!(from = %cursor, to = %to, "start history sync");

        let mut batches = 0u64;
        loop {
            if cancel.is_cancelled() {
                info!(cursor = %cursor, batches, "history sync cancelled");
                return Ok(());
            }

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(cursor = %cursor, batches, "history sync cancelled");
                    return Ok(());
                }
                next = self.batch(&cursor, &to) => next?,
            };
            batches += 1;

            match next {
                Some(next) if next == cursor => {
                    return Err(SyncError::Stalled { cursor });
                }
                Some(next) if next <= to => cursor = next,
                _ => break,
            }
        }

        info!(batches, "history sync done");
        Ok(())
    }

    fn resume_point(&self) -> Result<String, SyncError> {
        let last = self
            .store
            .last_delegation()
            .map_err(SyncError::LastDelegation)?;
        Ok(last
            .map(|d| d.timestamp)
            .unwrap_or_else(|| FIRST_DELEGATION.to_string()))
    }

    async fn batch(&self, from: &str, to: &str) -> Result<Option<String>, SyncError> {
        debug!(from, to, "sync batch");
        let opts = FetchOptions {
            from: Some(from.to_string()),
            to: Some(to.to_string()),
            limit: self.batch_size,
        };
        let page = self
            .client
            .fetch(&opts)
            .await
            .map_err(|e| SyncError::Batch(Box::new(e)))?;
        self.metrics.history_batches.inc();

        if !page.is_empty() {
            self.metrics.delegations_fetched.inc_by(page.len() as u64);
            let inserted = self.store.insert(&page)?;
            self.metrics.delegations_inserted.inc_by(inserted as u64);
            debug!(fetched = page.len(), inserted, "batch stored");
        }

        Ok(next_cursor(&page, self.batch_size))
    }

    /// Cancel a running backfill and wait until it has returned. No-op when
    /// nothing is running.
    pub async fn stop(&self) {
        let cancel = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(cancel) = cancel else {
            return;
        };
        cancel.cancel();

        let mut running = self.running.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = running.wait_for(|running| !running).await;
    }
}

struct RunningGuard<'a> {
    sync: &'a HistorySync,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self
            .sync
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = None;
        self.sync.running.send_replace(false);
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}

fn normalize(ts: &str) -> Result<String, SyncError> {
    Ok(format_timestamp(parse_timestamp(ts)?))
}
