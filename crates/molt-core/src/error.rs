//! Error types for molt-core.

use thiserror::Error;

/// Errors that can occur in MOLT core operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoltError {
    /// Malformed coin (bad denomination or amount text).
    #[error("invalid coin: {0}")]
    InvalidCoin(String),

    /// Arithmetic between coins of different denominations.
    #[error("denomination mismatch: {left} vs {right}")]
    DenomMismatch {
        /// Denomination of the left operand.
        left: String,
        /// Denomination of the right operand.
        right: String,
    },

    /// Addition overflowed.
    #[error("coin overflow")]
    Overflow,

    /// Subtraction would go below zero.
    #[error("insufficient amount: have {have}, need {need}")]
    Underflow {
        /// Amount available.
        have: String,
        /// Amount requested.
        need: String,
    },

    /// Address failed format validation.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Identifier failed to parse.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Cryptographic operation failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Invalid signature.
    #[error("invalid signature")]
    InvalidSignature,
}
