use loopguard_store::StoreError;
use thiserror::Error;

/// Errors surfaced by loop detection operations.
///
/// Request-path operations swallow these into safe defaults; only the
/// administrative operations return them to the caller.
#[derive(Error, Debug)]
pub enum LoopError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("document encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("cannot clear loop detection data for user '{user}' without a device id")]
    UserWithoutDevice { user: String },
}

pub type Result<T> = std::result::Result<T, LoopError>;
