//! Error types for molt-agent.

use molt_core::{LeaseId, OrderId, ResourceSpec};
use molt_market::MarketError;
use thiserror::Error;

/// Reservation tracker failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReservationError {
    /// The order already holds a live reservation.
    #[error("order {0} already has a reservation")]
    AlreadyReserved(OrderId),

    /// The cluster cannot hold the requested resources.
    #[error("insufficient capacity: requested {requested:?}, available {available:?}")]
    InsufficientCapacity {
        /// Requested resources.
        requested: ResourceSpec,
        /// Unreserved capacity.
        available: ResourceSpec,
    },

    /// The resource group is empty or its total overflows.
    #[error("invalid resource group for order {0}")]
    InvalidGroup(OrderId),
}

/// Transaction broadcast failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BroadcastError {
    /// The ledger endpoint could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// The transaction could not be signed.
    #[error("signing error: {0}")]
    Signing(String),

    /// The ledger rejected the transaction.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Errors that can occur in provider agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Reservation failed.
    #[error(transparent)]
    Reservation(#[from] ReservationError),

    /// Broadcast failed.
    #[error(transparent)]
    Broadcast(#[from] BroadcastError),

    /// A message could not be built or was invalid.
    #[error("market error: {0}")]
    Market(#[from] MarketError),

    /// A watchdog already guards this lease.
    #[error("watchdog already armed for lease {0}")]
    WatchdogExists(LeaseId),
}
