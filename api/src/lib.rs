//! Read-only HTTP API over the delegation store.
//!
//! - `GET /xzt/delegations?year=YYYY`: delegations of one calendar year,
//!   newest first.
//! - `GET /metrics`: synchronizer metrics in the Prometheus text format.

pub mod error;
pub mod handlers;
pub mod server;

pub use error::ApiError;
pub use handlers::DelegationView;
pub use server::{router, ApiServer, AppState};
