// SPDX-License-Identifier: MIT

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation failed for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Token {symbol} not found on chain {chain_id}")]
    TokenNotFound { symbol: String, chain_id: u64 },

    #[error("Insufficient user approval: required {required}, approved {approved}")]
    InsufficientUserApproval { required: String, approved: String },

    #[error("Insufficient balance of {token}: required {required}, available {available}")]
    InsufficientBalance {
        token: String,
        required: String,
        available: String,
    },

    #[error("Insufficient ETH for tx value: required {required}, available {available}")]
    InsufficientEth { required: String, available: String },

    #[error("Quote unavailable: {0}")]
    QuoteUnavailable(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Nonce error: {0}")]
    Nonce(String),

    #[error("Transaction reverted: {reason}")]
    Reverted { hash: Option<String>, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Unknown(#[from] anyhow::Error),
}

impl EngineError {
    /// Transport-shaped failures that a backoff retry may recover.
    pub fn is_network(&self) -> bool {
        crate::common::retry::is_network_message(&self.to_string())
    }

    /// Stale-nonce failures that a cache reset plus retry may recover.
    pub fn is_nonce(&self) -> bool {
        crate::common::retry::is_nonce_message(&self.to_string())
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Database(err.to_string())
    }
}
