use thiserror::Error;

/// Common error types used across the application.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An upstream collaborator (data service, oracle) could not deliver.
    /// Aborts the affected user-day only.
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Liquidation {tx_hash}#{log_index} was already expanded")]
    DuplicateLiquidation { tx_hash: String, log_index: u64 },

    #[error("Insufficient price history: {0}")]
    InsufficientHistory(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether this error only invalidates the current user-day.
    pub fn is_data_unavailable(&self) -> bool {
        matches!(
            self,
            AppError::DataUnavailable(_) | AppError::Rpc(_) | AppError::Decode(_)
        )
    }
}
