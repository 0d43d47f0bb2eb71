//! Abstract storage contract for the tezdel delegation indexer.
//!
//! Every storage backend (LMDB, in-memory for testing) implements
//! [`DelegationStore`]. The synchronizers and the read API depend only on
//! the trait.

pub mod delegation;
pub mod error;

pub use delegation::{is_valid_year, DelegationStore};
pub use error::StoreError;
