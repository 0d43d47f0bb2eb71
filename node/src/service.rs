//! The tezdel node: store, synchronizers and read API under one lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

use tezdel_api::{ApiServer, AppState};
use tezdel_store::DelegationStore;
use tezdel_store_lmdb::{check_data_dir, check_integrity, LmdbDelegationStore};
use tezdel_sync::{DelegationClient, HistorySync, LiveSync, SyncMetrics};

use crate::tracing_spans::{api_span, history_sync_span, live_sync_span};
use crate::{NodeConfig, NodeError, ShutdownController};

/// Upper bound on [`TezdelNode::stop`] waiting for its tasks.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Open the LMDB store at `config.db_path`, logging any integrity problems.
pub fn open_store(config: &NodeConfig) -> Result<Arc<LmdbDelegationStore>, NodeError> {
    if let Err(e) = check_data_dir(&config.db_path) {
        warn!("{e}");
    }
    let store = LmdbDelegationStore::open(&config.db_path, config.map_size)?;

    let report = check_integrity(&store)?;
    if !report.is_healthy() {
        for problem in &report.errors {
            warn!(problem = %problem, "store integrity");
        }
    }
    info!(
        path = %config.db_path.display(),
        delegations = report.delegations,
        "store opened"
    );
    Ok(Arc::new(store))
}

/// Backfill `[from, to)` into the configured store and return.
///
/// Returns early, without error, once `shutdown` fires.
pub async fn backfill(
    config: &NodeConfig,
    from: Option<&str>,
    to: Option<&str>,
    shutdown: &ShutdownController,
) -> Result<(), NodeError> {
    config.validate()?;
    let store = open_store(config)?;
    let client = DelegationClient::new(&config.api)?;
    let history = HistorySync::new(client, store.clone(), Arc::new(SyncMetrics::new()))
        .with_span(history_sync_span(&config.api));

    let result = history.sync(shutdown.token(), from, to).await;
    store.close()?;
    info!(ok = result.is_ok(), "backfill finished");
    Ok(result?)
}

/// Delete every delegation in the configured store. Returns how many there
/// were.
pub fn empty_store(config: &NodeConfig) -> Result<u64, NodeError> {
    let store = open_store(config)?;
    let removed = store.count()?;
    store.empty()?;
    store.close()?;
    info!(removed, "store emptied");
    Ok(removed)
}

/// A running (or ready to run) tezdel service.
pub struct TezdelNode {
    config: NodeConfig,
    store: Arc<LmdbDelegationStore>,
    metrics: Arc<SyncMetrics>,
    shutdown: Arc<ShutdownController>,
    live: LiveSync,
    history: Arc<HistorySync>,
    history_handle: Option<JoinHandle<()>>,
    api_cancel: CancellationToken,
    api_handle: Option<JoinHandle<()>>,
    api_addr: Option<SocketAddr>,
    started: bool,
    stopped: bool,
}

impl TezdelNode {
    /// Validate `config`, open the store and build both synchronizers.
    /// Nothing runs until [`start`](Self::start).
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        config.validate()?;
        let store = open_store(&config)?;
        let metrics = Arc::new(SyncMetrics::new());
        let shutdown = Arc::new(ShutdownController::new());
        let client = DelegationClient::new(&config.api)?;

        let live = LiveSync::new(
            client.clone(),
            config.sync_interval(),
            store.clone(),
            Arc::clone(&metrics),
        )
        .with_span(live_sync_span(client.api()));
        let history = HistorySync::new(client.clone(), store.clone(), Arc::clone(&metrics))
            .with_span(history_sync_span(client.api()));
        let api_cancel = shutdown.child_token();

        Ok(Self {
            config,
            store,
            metrics,
            shutdown,
            live,
            history: Arc::new(history),
            history_handle: None,
            api_cancel,
            api_handle: None,
            api_addr: None,
            started: false,
            stopped: false,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn DelegationStore> {
        self.store.clone()
    }

    pub fn metrics(&self) -> Arc<SyncMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Address the API is bound to, once started.
    pub fn api_addr(&self) -> Option<SocketAddr> {
        self.api_addr
    }

    pub fn is_history_running(&self) -> bool {
        self.history.is_running()
    }

    /// Start the backfill (if enabled) in the background, the live poller,
    /// and the API.
    ///
    /// A failing first live poll fails the start; a failing backfill is
    /// logged and triggers node shutdown.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        if self.started {
            return Err(NodeError::AlreadyStarted);
        }
        self.started = true;
        info!(
            api = %self.config.api,
            db = %self.config.db_path.display(),
            interval = ?self.config.sync_interval(),
            history = self.config.history,
            "tezdel node starting"
        );

        if self.config.history {
            self.spawn_history();
        }

        if let Err(e) = self.live.start(self.shutdown.token(), None).await {
            error!(error = %e, "failed to start live sync");
            self.shutdown.shutdown();
            if let Err(stop_err) = self.stop().await {
                warn!(error = %stop_err, "cleanup after failed start");
            }
            return Err(e.into());
        }

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let state = AppState::new(self.store.clone(), Arc::clone(&self.metrics));
        let server = match ApiServer::bind(addr, state).await {
            Ok(server) => server,
            Err(e) => {
                self.shutdown.shutdown();
                if let Err(stop_err) = self.stop().await {
                    warn!(error = %stop_err, "cleanup after failed start");
                }
                return Err(e.into());
            }
        };
        let local = server.local_addr()?;
        self.api_addr = Some(local);

        let cancel = self.api_cancel.clone();
        let shutdown = Arc::clone(&self.shutdown);
        self.api_handle = Some(tokio::spawn(
            async move {
                if let Err(e) = server.run(cancel).await {
                    error!(error = %e, "api server failed");
                    shutdown.shutdown();
                }
            }
            .instrument(api_span(local)),
        ));

        info!(api_addr = %local, "tezdel node started");
        Ok(())
    }

    fn spawn_history(&mut self) {
        let history = Arc::clone(&self.history);
        let shutdown = Arc::clone(&self.shutdown);
        self.history_handle = Some(tokio::spawn(async move {
            match history.sync(shutdown.token(), None, None).await {
                Ok(()) => info!("history sync finished"),
                Err(e) => {
                    error!(error = %e, "history sync failed");
                    shutdown.shutdown();
                }
            }
        }));
    }

    /// Start, block until SIGINT/SIGTERM or an internal shutdown, then stop.
    pub async fn run(&mut self) -> Result<(), NodeError> {
        self.start().await?;
        self.shutdown.wait_for_signal().await;
        self.stop().await
    }

    /// Stop the live poller, then the backfill, then the API, and finally
    /// close the store.
    ///
    /// The first three steps share [`SHUTDOWN_TIMEOUT`]; the store is closed
    /// even when they overrun. Calling it again is a no-op.
    pub async fn stop(&mut self) -> Result<(), NodeError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        info!("tezdel node stopping");

        let timed_out = tokio::time::timeout(SHUTDOWN_TIMEOUT, self.wind_down())
            .await
            .is_err();
        if timed_out {
            warn!(
                "shutdown timeout ({:?}), some tasks may still be running",
                SHUTDOWN_TIMEOUT
            );
        }

        self.shutdown.shutdown();
        self.store.close()?;
        info!("tezdel node stopped");

        if timed_out {
            return Err(NodeError::ShutdownTimeout);
        }
        Ok(())
    }

    async fn wind_down(&mut self) {
        self.live.stop().await;

        self.history.stop().await;
        if let Some(handle) = self.history_handle.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "history task panicked");
            }
        }

        self.api_cancel.cancel();
        if let Some(handle) = self.api_handle.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "api task panicked");
            }
        }
    }
}
