//! Market state and message dispatch.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use molt_core::{BidId, LeaseId, OrderId, SignatureVerifier};

use crate::authz::GrantStore;
use crate::bank::Bank;
use crate::error::MarketError;
use crate::escrow::EscrowLedger;
use crate::event::MarketEvent;
use crate::msg::MarketMsg;
use crate::orderbook::{Bid, Lease, Order};
use crate::params::MarketParams;
use crate::usage::UsageStore;

/// Height and time of the block a message executes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockContext {
    /// Block height.
    pub height: u64,
    /// Block time.
    pub time: DateTime<Utc>,
}

impl BlockContext {
    /// Creates a block context.
    #[must_use]
    pub const fn new(height: u64, time: DateTime<Utc>) -> Self {
        Self { height, time }
    }
}

/// Everything a handler reads besides the state it mutates.
pub(crate) struct Env<'a> {
    pub(crate) block: &'a BlockContext,
    pub(crate) params: &'a MarketParams,
    pub(crate) verifier: &'a dyn SignatureVerifier,
}

/// All ledger state: the orderbook, escrow accounts, balances, grants and
/// usage records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarketState {
    pub(crate) orders: BTreeMap<OrderId, Order>,
    pub(crate) bids: BTreeMap<BidId, Bid>,
    pub(crate) leases: BTreeMap<LeaseId, Lease>,
    pub(crate) escrow: EscrowLedger,
    pub(crate) bank: Bank,
    pub(crate) grants: GrantStore,
    pub(crate) usage: UsageStore,
}

impl MarketState {
    /// Looks up an order.
    #[must_use]
    pub fn order(&self, id: &OrderId) -> Option<&Order> {
        self.orders.get(id)
    }

    /// Looks up a bid.
    #[must_use]
    pub fn bid(&self, id: &BidId) -> Option<&Bid> {
        self.bids.get(id)
    }

    /// Looks up a lease.
    #[must_use]
    pub fn lease(&self, id: &LeaseId) -> Option<&Lease> {
        self.leases.get(id)
    }

    /// All orders in id order.
    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    /// Bids placed on an order, in id order.
    pub fn bids_for_order<'a>(&'a self, order: &'a OrderId) -> impl Iterator<Item = &'a Bid> + 'a {
        self.bids.values().filter(move |b| &b.id.order == order)
    }

    /// All leases in id order.
    pub fn leases(&self) -> impl Iterator<Item = &Lease> {
        self.leases.values()
    }

    /// Escrow accounts.
    #[must_use]
    pub const fn escrow(&self) -> &EscrowLedger {
        &self.escrow
    }

    /// Account balances.
    #[must_use]
    pub const fn bank(&self) -> &Bank {
        &self.bank
    }

    /// Deposit authorizations.
    #[must_use]
    pub const fn grants(&self) -> &GrantStore {
        &self.grants
    }

    /// Usage records.
    #[must_use]
    pub const fn usage(&self) -> &UsageStore {
        &self.usage
    }

    /// Routes a message to its handler. The caller owns atomicity: on error
    /// `self` may be partially modified and must be discarded.
    pub(crate) fn apply(
        &mut self,
        env: &Env<'_>,
        msg: &MarketMsg,
    ) -> Result<Vec<MarketEvent>, MarketError> {
        match msg {
            MarketMsg::CreateOrder(m) => self.create_order(env, m),
            MarketMsg::CloseOrder(m) => self.close_order(env, m),
            MarketMsg::CreateBid(m) => self.create_bid(env, m),
            MarketMsg::CloseBid(m) => self.close_bid(env, m),
            MarketMsg::CreateLease(m) => self.create_lease(env, m),
            MarketMsg::ManifestReceived(m) => self.manifest_received(env, m),
            MarketMsg::CloseLease(m) => self.close_lease(env, m),
            MarketMsg::WithdrawLease(m) => self.withdraw_lease(env, m),
            MarketMsg::AccountDeposit(m) => self.account_deposit(env, m),
            MarketMsg::CreateEscrow(m) => self.create_escrow(env, m),
            MarketMsg::ActivateEscrow(m) => self.activate_escrow(env, m),
            MarketMsg::ReleaseEscrow(m) => self.release_escrow(env, m),
            MarketMsg::RefundEscrow(m) => self.refund_escrow(env, m),
            MarketMsg::DisputeEscrow(m) => self.dispute_escrow(env, m),
            MarketMsg::ResolveDispute(m) => self.resolve_dispute(env, m),
            MarketMsg::RecordUsage(m) => self.record_usage(env, m),
            MarketMsg::AcknowledgeUsage(m) => self.acknowledge_usage(env, m),
            MarketMsg::ClaimRewards(m) => self.claim_rewards(env, m),
            MarketMsg::SettleOrder(m) => self.settle_order(env, m),
        }
    }
}
