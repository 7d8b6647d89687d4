//! # molt-market
//!
//! Marketplace state machine for the MOLT compute network.
//!
//! Tenants open orders for resource groups, providers bid with a locked
//! deposit, and the cheapest bid becomes a lease. Tenants fund the lease
//! through a deployment escrow; providers report signed usage, tenants
//! acknowledge it, and the escrow pays out acknowledged usage at settlement.
//!
//! All state changes go through [`Market::deliver`], which applies one
//! message atomically and returns the events it produced.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod authz;
pub mod bank;
pub mod error;
pub mod escrow;
pub mod event;
mod funding;
pub mod market;
pub mod msg;
pub mod orderbook;
pub mod params;
mod settlement;
pub mod state;
pub mod usage;

pub use authz::{AcceptResponse, AuthzError, DepositAuthorization, GrantStore};
pub use bank::Bank;
pub use error::MarketError;
pub use escrow::{AccountId, EscrowAccount, EscrowError, EscrowLedger, EscrowState, Scope};
pub use event::MarketEvent;
pub use market::Market;
pub use msg::MarketMsg;
pub use orderbook::{Bid, BidState, Lease, LeaseCloseReason, LeaseState, Order, OrderState};
pub use params::MarketParams;
pub use state::{BlockContext, MarketState};
pub use usage::{UsageClaim, UsageId, UsageRecord, UsageStore, UsageType};
