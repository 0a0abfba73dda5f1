//! Typed error taxonomy for the pricing and settlement kernel
//!
//! Validation, state, and resource errors are all rejected before any
//! mutation; integrity errors mean a store broke its contract mid-operation
//! and the caller should expect a compensating ledger entry.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::types::MarketStatus;

#[derive(Debug, Error)]
pub enum CoreError {
    // Validation
    #[error("stake must be a positive number of points")]
    InvalidStake,
    #[error("amount must be a positive number of points")]
    InvalidAmount,
    #[error("seed liquidity must be a positive number of points")]
    InvalidSeed,
    #[error("side must be yes or no")]
    InvalidSide,

    // State
    #[error("market is not open for trading")]
    MarketNotOpen,
    #[error("market stopped accepting trades at {close_at}")]
    MarketExpired { close_at: DateTime<Utc> },
    #[error("invalid market transition from {from} to {to}")]
    InvalidTransition {
        from: MarketStatus,
        to: MarketStatus,
    },
    #[error("market is not resolved")]
    MarketNotResolved,
    #[error("payout for this market has already been settled for the user")]
    AlreadySettled,
    #[error("market {0} not found")]
    MarketNotFound(Uuid),
    #[error("position {0} not found")]
    PositionNotFound(Uuid),

    // Resources
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: f64, available: f64 },
    #[error("could not acquire lock for key {key}")]
    LockUnavailable { key: String },

    // Authorization
    #[error("caller does not own this position")]
    Forbidden,

    // Integrity
    #[error("reserve invariant violated: {0}")]
    InvariantViolation(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl CoreError {
    /// Whether the same call may succeed if retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::LockUnavailable { .. } | CoreError::Storage(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
