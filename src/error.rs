//! Error types for the interop swapper

use thiserror::Error;

/// Main error type for the swapper
#[derive(Error, Debug)]
pub enum SwapError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Chain connection error for platform {platform}: {message}")]
    ChainConnection { platform: String, message: String },

    #[error("Block {block} not found on platform {platform}")]
    BlockNotFound { platform: String, block: String },

    /// Invalid oracle request or an unsupported transaction shape
    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Platform {0} is not registered")]
    UnknownPlatform(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Signer error: {0}")]
    Signer(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Price feed error: {0}")]
    PriceFeed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SwapError {
    /// Check if error is a transient external failure worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SwapError::ChainConnection { .. }
                | SwapError::BlockNotFound { .. }
                | SwapError::PriceFeed(_)
        )
    }

    /// Endpoint flakiness that is logged without detail
    pub fn is_block_not_found(&self) -> bool {
        matches!(self, SwapError::BlockNotFound { .. })
    }

    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            SwapError::Signer(_) | SwapError::Config(_) | SwapError::Database(_)
        )
    }
}

/// Result type for swapper operations
pub type SwapResult<T> = Result<T, SwapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let missing = SwapError::BlockNotFound {
            platform: "neo".to_string(),
            block: "12".to_string(),
        };
        assert!(missing.is_retryable());
        assert!(missing.is_block_not_found());

        let ambiguous = SwapError::Oracle("multiple sources".to_string());
        assert!(!ambiguous.is_retryable());
        assert!(!ambiguous.should_alert());

        assert!(SwapError::Signer("locked".to_string()).should_alert());
    }
}
