//! Delegation storage trait.

use tezdel_types::Delegation;

use crate::StoreError;

/// Durable set of delegations keyed by their upstream `id`.
///
/// Implementations must be safe to share between the live and history
/// synchronizers and the read API, which may all call in concurrently.
pub trait DelegationStore: Send + Sync {
    /// Persist `delegations`, silently skipping any whose `id` is already
    /// stored. Returns how many records were newly written. An empty slice
    /// is a no-op.
    fn insert(&self, delegations: &[Delegation]) -> Result<usize, StoreError>;

    /// The most recent delegation by timestamp, or `None` when the store is
    /// empty.
    fn last_delegation(&self) -> Result<Option<Delegation>, StoreError>;

    /// All delegations of a four-digit `year`, newest first.
    fn get_by_year(&self, year: &str) -> Result<Vec<Delegation>, StoreError>;

    /// Delete every delegation.
    fn empty(&self) -> Result<(), StoreError>;

    /// Number of stored delegations.
    fn count(&self) -> Result<u64, StoreError>;

    /// Flush and release the underlying resources.
    fn close(&self) -> Result<(), StoreError>;
}

/// Whether `year` is exactly four ASCII digits.
pub fn is_valid_year(year: &str) -> bool {
    year.len() == 4 && year.bytes().all(|b| b.is_ascii_digit())
}
