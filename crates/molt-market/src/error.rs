//! Error types for molt-market.

use molt_core::{BidId, Coin, DepositError, LeaseId, MoltError, OrderId};
use thiserror::Error;

use crate::authz::AuthzError;
use crate::escrow::EscrowError;
use crate::usage::UsageId;

/// Errors that can occur in marketplace operations.
///
/// Structural variants are raised by `validate_basic` before any state is
/// read. The rest are raised by the stateful pass; either way the market is
/// left exactly as it was before the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarketError {
    /// Invalid market parameters.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Malformed identifier.
    #[error("invalid id: {0}")]
    InvalidId(String),

    /// Malformed or out-of-range amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Deposit sources failed validation.
    #[error("invalid deposit source: {0}")]
    InvalidDepositSource(DepositError),

    /// Escrow request is inconsistent with the escrow or lease.
    #[error("invalid escrow: {0}")]
    InvalidEscrow(String),

    /// Usage record is missing a field or inconsistent.
    #[error("invalid usage record: {0}")]
    InvalidUsageRecord(String),

    /// Signature missing or not valid for the signer.
    #[error("invalid signature")]
    InvalidSignature,

    /// Sender may not perform this action.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Order not found.
    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    /// Order already exists.
    #[error("order already exists: {0}")]
    OrderExists(OrderId),

    /// Order is closed.
    #[error("order not open: {0}")]
    OrderNotOpen(OrderId),

    /// Order already holds the maximum number of open bids.
    #[error("order {order} already has {max} open bids")]
    OrderMaxBidsExceeded {
        /// The order.
        order: OrderId,
        /// Module limit.
        max: u32,
    },

    /// Bid deposit is below the module minimum.
    #[error("insufficient deposit: required {required}, provided {provided}")]
    InsufficientDeposit {
        /// Minimum deposit.
        required: Coin,
        /// Offered deposit.
        provided: Coin,
    },

    /// Bid not found.
    #[error("bid not found: {0}")]
    BidNotFound(BidId),

    /// Bid already exists.
    #[error("bid already exists: {0}")]
    BidExists(BidId),

    /// Bid is not open.
    #[error("bid not open: {0}")]
    BidNotOpen(BidId),

    /// Bid cannot be turned into a lease.
    #[error("bid not matched: {0}")]
    BidNotMatched(BidId),

    /// Bid price exceeds the order's ceiling or uses another denomination.
    #[error("bid price {price} exceeds order ceiling {ceiling}")]
    BidPriceTooHigh {
        /// Offered price.
        price: Coin,
        /// Order ceiling.
        ceiling: Coin,
    },

    /// Bid does not offer the resources the order requests.
    #[error("bid {0} does not cover the order's resources")]
    BidResourcesMismatch(BidId),

    /// Lease not found.
    #[error("lease not found: {0}")]
    LeaseNotFound(LeaseId),

    /// Lease already exists.
    #[error("lease already exists: {0}")]
    LeaseExists(LeaseId),

    /// Lease is closed.
    #[error("lease not active: {0}")]
    LeaseNotActive(LeaseId),

    /// Lease is not awaiting its manifest.
    #[error("lease not pending: {0}")]
    LeaseNotPending(LeaseId),

    /// Escrow account not found.
    #[error("escrow account not found: {0}")]
    EscrowNotFound(String),

    /// Escrow account already exists.
    #[error("escrow account already exists: {0}")]
    EscrowExists(String),

    /// Escrow account cannot cover the amount owed.
    #[error("escrow {account} balance {balance} cannot cover {required}")]
    EscrowInsufficientBalance {
        /// Account key.
        account: String,
        /// Current balance.
        balance: String,
        /// Amount owed.
        required: String,
    },

    /// Spendable balance too low.
    #[error("insufficient funds for {address}: available {available}, required {required}")]
    InsufficientFunds {
        /// Account address.
        address: String,
        /// Spendable balance.
        available: Coin,
        /// Amount required.
        required: Coin,
    },

    /// Usage record not found.
    #[error("usage record not found: {0}")]
    UsageNotFound(UsageId),

    /// Escrow ledger error.
    #[error("escrow error: {0}")]
    Escrow(EscrowError),

    /// Deposit authorization error.
    #[error("authorization error: {0}")]
    Authz(#[from] AuthzError),

    /// Primitive error (coin arithmetic, addresses, ids).
    #[error(transparent)]
    Core(#[from] MoltError),
}

impl From<EscrowError> for MarketError {
    fn from(e: EscrowError) -> Self {
        match e {
            EscrowError::InvalidId(msg) => Self::InvalidId(msg),
            EscrowError::NotFound(account) => Self::EscrowNotFound(account),
            EscrowError::InsufficientFunds {
                account,
                balance,
                requested,
            } => Self::EscrowInsufficientBalance {
                account,
                balance,
                required: requested,
            },
            EscrowError::InvalidDeposit(e) => Self::InvalidDepositSource(e),
            other => Self::Escrow(other),
        }
    }
}

impl From<DepositError> for MarketError {
    fn from(e: DepositError) -> Self {
        Self::InvalidDepositSource(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escrow_shortfall_maps_to_insufficient_balance() {
        let err: MarketError = EscrowError::InsufficientFunds {
            account: "deployment/x/1/1/1".into(),
            balance: "1uve".into(),
            requested: "2uve".into(),
        }
        .into();
        assert!(matches!(err, MarketError::EscrowInsufficientBalance { .. }));
    }

    #[test]
    fn escrow_deposit_error_maps_to_invalid_source() {
        let err: MarketError = EscrowError::InvalidDeposit(DepositError::EmptySources).into();
        assert_eq!(err, MarketError::InvalidDepositSource(DepositError::EmptySources));
    }

    #[test]
    fn disputed_stays_escrow_error() {
        let err: MarketError = EscrowError::Disputed("deployment/x/1/1/1".into()).into();
        assert!(matches!(err, MarketError::Escrow(EscrowError::Disputed(_))));
    }
}
