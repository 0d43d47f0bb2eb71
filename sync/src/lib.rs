//! Delegation ingestion engine.
//!
//! Two synchronizers feed the same [`DelegationStore`](tezdel_store::DelegationStore):
//! - [`LiveSync`] polls the upstream API on a fixed interval, fetching only
//!   the slice of events since its last successful poll (plus an overlap).
//! - [`HistorySync`] performs a one-shot, cursor-driven backfill over a
//!   bounded historical range.
//!
//! Both go through the [`DelegationClient`], which builds the filtered page
//! request and streams the JSON body through [`decode_delegations`].
//! Duplicate deliveries (live overlap, backfill/live overlap) are absorbed
//! by the store's idempotent insert.

pub mod client;
pub mod decode;
pub mod error;
pub mod history;
pub mod live;
pub mod metrics;

pub use client::{DelegationClient, FetchOptions, DEFAULT_API, FETCH_TIMEOUT, SELECT_FIELDS};
pub use decode::{decode_delegations, DecodeError};
pub use error::SyncError;
pub use history::{next_cursor, HistorySync, BATCH_SIZE, FIRST_DELEGATION};
pub use live::{validate_interval, LivePoller, LiveSync, MAX_INTERVAL, MIN_INTERVAL};
pub use metrics::SyncMetrics;
