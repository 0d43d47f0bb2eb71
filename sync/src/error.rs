use std::time::Duration;

use thiserror::Error;

use tezdel_store::StoreError;
use tezdel_types::TypesError;

use crate::decode::DecodeError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no interval")]
    NoInterval,

    #[error("interval {interval:?} is shorter than the minimum {minimum:?}")]
    IntervalTooShort { interval: Duration, minimum: Duration },

    #[error("interval {0:?} is out of range")]
    IntervalOutOfRange(Duration),

    #[error("synchronizer already started")]
    AlreadyStarted,

    #[error(transparent)]
    InvalidTimestamp(#[from] TypesError),

    #[error("invalid status code : {0}")]
    InvalidStatusCode(u16),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error("page decoder task failed: {0}")]
    DecodeTask(#[from] tokio::task::JoinError),

    #[error("failed to get delegations: {0}")]
    Batch(#[source] Box<SyncError>),

    #[error("failed to insert delegations: {0}")]
    Store(#[from] StoreError),

    #[error("failed to get last delegation: {0}")]
    LastDelegation(#[source] StoreError),

    #[error("backfill cannot advance past {cursor}: a full page shares one timestamp")]
    Stalled { cursor: String },
}

impl SyncError {
    /// The upstream status code carried by this error, looking through
    /// batch wrapping.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            SyncError::InvalidStatusCode(code) => Some(*code),
            SyncError::Batch(inner) => inner.status_code(),
            _ => None,
        }
    }
}
