//! LMDB storage backend for the tezdel delegation indexer.
//!
//! Implements [`tezdel_store::DelegationStore`] using the `heed` LMDB
//! bindings. Records live in one database keyed by id; a second database
//! indexes them by timestamp for the "latest" and per-year reads.

pub mod delegation;
pub mod environment;
pub mod error;
pub mod integrity;

pub use delegation::LmdbDelegationStore;
pub use environment::{open_env, DEFAULT_MAP_SIZE};
pub use error::LmdbError;
pub use integrity::{check_data_dir, check_integrity, IntegrityReport};
