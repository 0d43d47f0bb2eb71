//! Axum router and server lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use tezdel_store::DelegationStore;
use tezdel_sync::SyncMetrics;

use crate::error::ApiError;
use crate::handlers;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DelegationStore>,
    pub metrics: Arc<SyncMetrics>,
}

impl AppState {
    pub fn new(store: Arc<dyn DelegationStore>, metrics: Arc<SyncMetrics>) -> Self {
        Self { store, metrics }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/xzt/delegations", get(handlers::delegations))
        .route("/metrics", get(handlers::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A bound listener, ready to serve.
///
/// Binding is split from serving so callers learn about a taken port before
/// anything else starts, and tests can bind port 0 and read the real one.
pub struct ApiServer {
    listener: TcpListener,
    state: AppState,
}

impl ApiServer {
    pub async fn bind(addr: SocketAddr, state: AppState) -> Result<Self, ApiError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ApiError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` is cancelled, then drain in-flight requests.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ApiError> {
        let addr = self.local_addr()?;
        info!(%addr, "api listening");
        axum::serve(self.listener, router(self.state))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        info!("api stopped");
        Ok(())
    }

    /// Bind `addr` and serve until `shutdown` is cancelled.
    pub async fn serve(
        addr: SocketAddr,
        state: AppState,
        shutdown: CancellationToken,
    ) -> Result<(), ApiError> {
        Self::bind(addr, state).await?.run(shutdown).await
    }
}
