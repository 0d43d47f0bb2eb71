//! HTTP client for the upstream delegations endpoint.
//!
//! `GET {api}?select=timestamp,sender,amount,level,id[&timestamp.ge=..][&timestamp.lt=..][&limit=N]`
//! returns a JSON array of delegations in ascending id (hence time) order.
//! Bodies are decoded as they stream in and never buffered whole.

use std::io::{self, BufReader};
use std::time::Duration;

use futures_util::TryStreamExt;
use reqwest::StatusCode;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::trace;

use tezdel_types::Delegation;

use crate::decode::decode_delegations;
use crate::SyncError;

/// TzKT's delegation operations endpoint.
pub const DEFAULT_API: &str = "https://api.tzkt.io/v1/operations/delegations";

/// Timeout applied to every page request, body included.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(2);

/// Fixed column projection requested from the upstream API.
pub const SELECT_FIELDS: &str = "timestamp,sender,amount,level,id";

/// Filters for a single page request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Inclusive lower bound, RFC3339.
    pub from: Option<String>,
    /// Exclusive upper bound, RFC3339.
    pub to: Option<String>,
    /// Page size; `0` leaves it to the upstream default.
    pub limit: usize,
}

impl FetchOptions {
    /// The query parameters this request sends: the projection, plus each
    /// filter that is set.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("select", SELECT_FIELDS.to_string())];
        if let Some(from) = self.from.as_deref().filter(|s| !s.is_empty()) {
            pairs.push(("timestamp.ge", from.to_string()));
        }
        if let Some(to) = self.to.as_deref().filter(|s| !s.is_empty()) {
            pairs.push(("timestamp.lt", to.to_string()));
        }
        if self.limit > 0 {
            pairs.push(("limit", self.limit.to_string()));
        }
        pairs
    }
}

/// Fetches pages of delegations from the upstream API.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone, Debug)]
pub struct DelegationClient {
    api: String,
    http: reqwest::Client,
}

impl DelegationClient {
    /// Client for `api` (falls back to [`DEFAULT_API`] when empty) with the
    /// standard [`FETCH_TIMEOUT`].
    pub fn new(api: &str) -> Result<Self, SyncError> {
        Self::with_timeout(api, FETCH_TIMEOUT)
    }

    pub fn with_timeout(api: &str, timeout: Duration) -> Result<Self, SyncError> {
        let api = if api.is_empty() { DEFAULT_API } else { api };
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api: api.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn api(&self) -> &str {
        &self.api
    }

    /// Fetch one page.
    ///
    /// Any status other than 200 is [`SyncError::InvalidStatusCode`] and the
    /// body is left unread. Failures before the body starts, timeouts
    /// included, surface as [`SyncError::Transport`]. The body is decoded on
    /// a blocking thread while it arrives, so a connection lost mid-body is
    /// a [`SyncError::Decode`].
    pub async fn fetch(&self, opts: &FetchOptions) -> Result<Vec<Delegation>, SyncError> {
        let response = self
            .http
            .get(&self.api)
            .query(&opts.query_pairs())
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(SyncError::InvalidStatusCode(status.as_u16()));
        }

        let body = response.bytes_stream().map_err(io::Error::other);
        let reader = BufReader::new(SyncIoBridge::new(StreamReader::new(Box::pin(body))));
        let limit = opts.limit;
        let delegations =
            tokio::task::spawn_blocking(move || decode_delegations(reader, limit)).await??;
        trace!(count = delegations.len(), "received delegation page");
        Ok(delegations)
    }
}
