//! tezdel service node.
//!
//! Owns the long-running pieces and their lifecycle:
//! - the LMDB delegation store,
//! - the one-shot history backfill and the live poller,
//! - the read API,
//! - logging setup and signal-driven shutdown.

pub mod config;
pub mod error;
pub mod logging;
pub mod service;
pub mod shutdown;
pub mod tracing_spans;

pub use config::NodeConfig;
pub use error::NodeError;
pub use logging::{init_logging, LogFormat};
pub use service::{backfill, empty_store, open_store, TezdelNode, SHUTDOWN_TIMEOUT};
pub use shutdown::ShutdownController;
