//! # molt-agent
//!
//! Provider agent for the MOLT compute marketplace.
//!
//! This crate provides:
//!
//! - **Reservations**: [`ReservationTracker`] holds cluster capacity for
//!   outstanding bids and running leases
//! - **Bid watchdog**: [`watchdog::arm`] closes a won bid whose manifest
//!   never arrives
//! - **Pricing**: [`PricingConfig`] turns requested resources into a bid price
//! - **Provider service**: [`ProviderService`] ties these together and reacts
//!   to market events
//!
//! ## Example
//!
//! ```rust
//! use molt_agent::{ReservationTracker, ReservationError};
//! use molt_core::{OrderId, ResourceGroup, ResourceSpec, Wallet};
//!
//! let tracker = ReservationTracker::with_capacity(ResourceSpec::new(2000, 0, 0, 0));
//! let tenant = Wallet::new().address().clone();
//! let group = ResourceGroup::single("web", ResourceSpec::new(1500, 0, 0, 0), 1);
//!
//! let first = tracker.reserve(&OrderId::new(tenant.clone(), 1, 1, 1), &group).unwrap();
//! let second = tracker.reserve(&OrderId::new(tenant, 2, 1, 1), &group);
//! assert!(matches!(second, Err(ReservationError::InsufficientCapacity { .. })));
//!
//! first.release();
//! assert_eq!(tracker.status().reservations, 0);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broadcast;
pub mod config;
pub mod error;
pub mod provider;
pub mod reservation;
pub mod strategy;
pub mod watchdog;

pub use broadcast::{BoxFuture, ChannelBroadcaster, TxBroadcaster};
pub use config::ProviderConfig;
pub use error::{AgentError, BroadcastError, ReservationError};
pub use provider::ProviderService;
pub use reservation::{
    CapacityBackend, CapacityStatus, Reservation, ReservationId, ReservationTracker, StaticCapacity,
};
pub use strategy::{PricingConfig, PricingStrategy, ResourceCosts};
pub use watchdog::{WatchdogHandle, WatchdogOutcome};
