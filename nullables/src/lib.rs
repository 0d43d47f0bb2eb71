//! Nullable infrastructure for deterministic testing.
//!
//! The synchronizers only ever talk to two external collaborators: the
//! delegation store and the upstream HTTP API. This crate provides
//! test-friendly stand-ins for both that:
//! - Return deterministic values
//! - Can be controlled programmatically
//! - Record what they were asked for, for assertions
//!
//! Usage: swap real implementations for nullables in tests.

pub mod store;
pub mod upstream;

pub use store::NullDelegationStore;
pub use upstream::{NullUpstream, RecordedRequest, ScriptedResponse};
