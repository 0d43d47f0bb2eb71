//! Span constructors shared by the node's long-running tasks, so log lines
//! from each task carry the same name and fields.

use std::net::SocketAddr;

use tracing::{info_span, Span};

pub fn live_sync_span(api: &str) -> Span {
    info_span!("live_sync", api = %api)
}

pub fn history_sync_span(api: &str) -> Span {
    info_span!("history_sync", api = %api)
}

pub fn api_span(addr: SocketAddr) -> Span {
    info_span!("api", %addr)
}
