use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("sync error: {0}")]
    Sync(#[from] tezdel_sync::SyncError),

    #[error("store error: {0}")]
    Store(#[from] tezdel_store::StoreError),

    #[error("LMDB error: {0}")]
    Lmdb(#[from] tezdel_store_lmdb::LmdbError),

    #[error("API server error: {0}")]
    Api(#[from] tezdel_api::ApiError),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("node already started")]
    AlreadyStarted,

    #[error("shutdown timeout")]
    ShutdownTimeout,
}
