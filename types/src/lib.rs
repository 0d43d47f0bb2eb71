//! Fundamental types for the tezdel delegation indexer.
//!
//! This crate defines the types shared across every other crate in the workspace:
//! the [`Delegation`] record and the wire timestamp format used as the
//! pagination cursor.

pub mod delegation;
pub mod error;
pub mod time;

pub use delegation::Delegation;
pub use error::TypesError;
pub use time::{format_timestamp, parse_timestamp, year_of, WIRE_FORMAT};
