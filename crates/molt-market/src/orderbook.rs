//! Orders, bids and leases.
//!
//! An order is open until a bid is matched or the tenant closes it. Matching
//! turns the winning bid into a pending lease, closes every other bid with a
//! deposit refund, and closes the order. A lease becomes active once the
//! provider reports the manifest and closes when either party ends it, its
//! escrow runs dry, or its bid is closed.
//!
//! Winner selection depends on ledger data only: lowest price, then earliest
//! bid sequence, then provider address.

use std::cmp::Ordering;
use std::fmt;

use molt_core::{BidId, Coin, LeaseId, OrderId, ResourceGroup, ResourceSpec};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::MarketError;
use crate::escrow::{AccountId, EscrowState};
use crate::event::MarketEvent;
use crate::msg::{
    MarketMsg, MsgCloseBid, MsgCloseLease, MsgCloseOrder, MsgCreateBid, MsgCreateLease,
    MsgCreateOrder, MsgManifestReceived,
};
use crate::state::{Env, MarketState};

/// Order lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Accepting bids.
    Open,
    /// Matched or withdrawn.
    Closed,
}

/// A tenant's request for one resource group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order id.
    pub id: OrderId,
    /// Current state.
    pub state: OrderState,
    /// Requested resources.
    pub group: ResourceGroup,
    /// Highest acceptable price per unit-hour.
    pub price_ceiling: Coin,
    /// Sequence the next bid receives.
    pub next_bid_seq: u64,
    /// Height the order was created at.
    pub created_at: u64,
}

impl Order {
    /// Total resources requested. Overflowing groups are rejected at creation.
    #[must_use]
    pub fn resources(&self) -> ResourceSpec {
        self.group.total().unwrap_or(ResourceSpec::ZERO)
    }
}

/// Bid lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidState {
    /// Competing for the order.
    Open,
    /// Won the order; a lease exists.
    Matched,
    /// Lost, withdrawn, or its lease ended.
    Closed,
}

impl fmt::Display for BidState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Matched => write!(f, "matched"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// A provider's priced offer for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    /// Bid id.
    pub id: BidId,
    /// Arrival order within the order.
    pub seq: u64,
    /// Current state.
    pub state: BidState,
    /// Price per unit-hour.
    pub price: Coin,
    /// Deposit locked in the bid's escrow account.
    pub deposit: Coin,
    /// Resources the provider holds.
    pub resources: ResourceSpec,
    /// Height the bid was placed at.
    pub created_at: u64,
}

/// Ranks bids for selection: lower price, then lower sequence, then
/// provider address.
#[must_use]
pub fn bid_rank(a: &Bid, b: &Bid) -> Ordering {
    a.price
        .amount()
        .cmp(&b.price.amount())
        .then(a.seq.cmp(&b.seq))
        .then_with(|| a.id.provider.cmp(&b.id.provider))
}

/// Picks the winning open bid, if any.
pub fn select_winner<'a>(bids: impl IntoIterator<Item = &'a Bid>) -> Option<&'a Bid> {
    bids.into_iter()
        .filter(|b| b.state == BidState::Open)
        .min_by(|a, b| bid_rank(a, b))
}

/// Lease lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseState {
    /// Waiting for the tenant's manifest.
    Pending,
    /// Workload running.
    Active,
    /// Ended.
    Closed,
}

/// Why a lease ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseCloseReason {
    /// Tenant closed it.
    Owner,
    /// Provider closed it.
    Provider,
    /// The provider closed the underlying bid.
    BidClosed,
    /// Its escrow was exhausted.
    InsufficientFunds,
    /// Its escrow was refunded to the tenant.
    EscrowRefunded,
    /// The order was settled.
    Settled,
}

/// The contract between tenant and provider for a matched bid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Lease id.
    pub id: LeaseId,
    /// Current state.
    pub state: LeaseState,
    /// Price per unit-hour.
    pub price: Coin,
    /// Height the lease was created at.
    pub created_at: u64,
    /// Height the manifest was reported at.
    pub activated_at: Option<u64>,
    /// Height the lease closed at.
    pub closed_at: Option<u64>,
    /// Why it closed.
    pub close_reason: Option<LeaseCloseReason>,
}

impl MarketState {
    pub(crate) fn create_order(
        &mut self,
        env: &Env<'_>,
        msg: &MsgCreateOrder,
    ) -> Result<Vec<MarketEvent>, MarketError> {
        if self.orders.contains_key(&msg.id) {
            return Err(MarketError::OrderExists(msg.id.clone()));
        }
        self.orders.insert(
            msg.id.clone(),
            Order {
                id: msg.id.clone(),
                state: OrderState::Open,
                group: msg.group.clone(),
                price_ceiling: msg.price_ceiling.clone(),
                next_bid_seq: 0,
                created_at: env.block.height,
            },
        );
        info!(order = %msg.id, ceiling = %msg.price_ceiling, "order created");
        Ok(vec![MarketEvent::OrderCreated {
            order: msg.id.clone(),
        }])
    }

    pub(crate) fn close_order(
        &mut self,
        _env: &Env<'_>,
        msg: &MsgCloseOrder,
    ) -> Result<Vec<MarketEvent>, MarketError> {
        let order = self
            .orders
            .get_mut(&msg.id)
            .ok_or_else(|| MarketError::OrderNotFound(msg.id.clone()))?;
        if order.state != OrderState::Open {
            return Err(MarketError::OrderNotOpen(msg.id.clone()));
        }
        order.state = OrderState::Closed;

        let mut events = Vec::new();
        for bid in self.open_bid_ids(&msg.id) {
            self.close_open_bid(&bid, &mut events)?;
        }
        info!(order = %msg.id, "order closed by owner");
        events.push(MarketEvent::OrderClosed {
            order: msg.id.clone(),
        });
        Ok(events)
    }

    pub(crate) fn create_bid(
        &mut self,
        env: &Env<'_>,
        msg: &MsgCreateBid,
    ) -> Result<Vec<MarketEvent>, MarketError> {
        let bid_id = msg.bid_id();
        let order = self
            .orders
            .get(&msg.order_id)
            .ok_or_else(|| MarketError::OrderNotFound(msg.order_id.clone()))?;
        if order.state != OrderState::Open {
            return Err(MarketError::OrderNotOpen(msg.order_id.clone()));
        }
        if self.bids.contains_key(&bid_id) {
            return Err(MarketError::BidExists(bid_id));
        }
        if !msg.price.same_denom(&order.price_ceiling)
            || msg.price.amount() > order.price_ceiling.amount()
        {
            return Err(MarketError::BidPriceTooHigh {
                price: msg.price.clone(),
                ceiling: order.price_ceiling.clone(),
            });
        }
        if !order.resources().fits_within(&msg.resources) {
            return Err(MarketError::BidResourcesMismatch(bid_id));
        }

        let open_bids = self.open_bid_ids(&msg.order_id).len();
        let max = env.params.max_bids_per_order;
        if open_bids >= max as usize {
            return Err(MarketError::OrderMaxBidsExceeded {
                order: msg.order_id.clone(),
                max,
            });
        }

        let min = &env.params.min_bid_deposit;
        if !msg.deposit.amount.same_denom(min) || msg.deposit.amount.amount() < min.amount() {
            return Err(MarketError::InsufficientDeposit {
                required: min.clone(),
                provided: msg.deposit.amount.clone(),
            });
        }

        let mut events = Vec::new();
        let spend = MarketMsg::CreateBid(msg.clone());
        self.fund_deposit(
            env,
            &spend,
            &AccountId::for_bid(&bid_id),
            &msg.provider,
            &msg.deposit,
            &mut events,
        )?;

        let order = self
            .orders
            .get_mut(&msg.order_id)
            .ok_or_else(|| MarketError::OrderNotFound(msg.order_id.clone()))?;
        let seq = order.next_bid_seq;
        order.next_bid_seq += 1;

        self.bids.insert(
            bid_id.clone(),
            Bid {
                id: bid_id.clone(),
                seq,
                state: BidState::Open,
                price: msg.price.clone(),
                deposit: msg.deposit.amount.clone(),
                resources: msg.resources,
                created_at: env.block.height,
            },
        );
        info!(bid = %bid_id, price = %msg.price, seq, "bid created");
        events.push(MarketEvent::BidCreated {
            bid: bid_id,
            price: msg.price.clone(),
            seq,
        });
        Ok(events)
    }

    pub(crate) fn close_bid(
        &mut self,
        env: &Env<'_>,
        msg: &MsgCloseBid,
    ) -> Result<Vec<MarketEvent>, MarketError> {
        let state = self
            .bids
            .get(&msg.bid_id)
            .map(|b| b.state)
            .ok_or_else(|| MarketError::BidNotFound(msg.bid_id.clone()))?;

        let mut events = Vec::new();
        match state {
            BidState::Open => self.close_open_bid(&msg.bid_id, &mut events)?,
            BidState::Matched => {
                self.close_lease_with(env, &msg.bid_id.lease(), LeaseCloseReason::BidClosed, &mut events)?;
            }
            BidState::Closed => return Err(MarketError::BidNotOpen(msg.bid_id.clone())),
        }
        Ok(events)
    }

    pub(crate) fn create_lease(
        &mut self,
        env: &Env<'_>,
        msg: &MsgCreateLease,
    ) -> Result<Vec<MarketEvent>, MarketError> {
        let bid = self
            .bids
            .get(&msg.bid_id)
            .ok_or_else(|| MarketError::BidNotFound(msg.bid_id.clone()))?;
        let lease_id = msg.bid_id.lease();
        if self.leases.contains_key(&lease_id) {
            return Err(MarketError::LeaseExists(lease_id));
        }
        if bid.state != BidState::Open {
            return Err(MarketError::BidNotMatched(msg.bid_id.clone()));
        }
        self.accept_bid(env, &msg.bid_id)
    }

    /// Matches `bid_id` against its order: the bid becomes the lease, every
    /// other open bid is closed with a refund, and the order closes.
    pub(crate) fn accept_bid(
        &mut self,
        env: &Env<'_>,
        bid_id: &BidId,
    ) -> Result<Vec<MarketEvent>, MarketError> {
        let order_id = &bid_id.order;
        let bid = self
            .bids
            .get_mut(bid_id)
            .ok_or_else(|| MarketError::BidNotFound(bid_id.clone()))?;
        if bid.state != BidState::Open {
            return Err(MarketError::BidNotMatched(bid_id.clone()));
        }
        bid.state = BidState::Matched;
        let price = bid.price.clone();

        let order = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| MarketError::OrderNotFound(order_id.clone()))?;
        if order.state != OrderState::Open {
            return Err(MarketError::OrderNotOpen(order_id.clone()));
        }
        order.state = OrderState::Closed;

        let mut events = Vec::new();
        for loser in self.open_bid_ids(order_id) {
            self.close_open_bid(&loser, &mut events)?;
        }

        let lease_id = bid_id.lease();
        if self.leases.contains_key(&lease_id) {
            return Err(MarketError::LeaseExists(lease_id));
        }
        self.leases.insert(
            lease_id.clone(),
            Lease {
                id: lease_id.clone(),
                state: LeaseState::Pending,
                price: price.clone(),
                created_at: env.block.height,
                activated_at: None,
                closed_at: None,
                close_reason: None,
            },
        );

        info!(lease = %lease_id, price = %price, "bid matched, lease pending");
        events.push(MarketEvent::OrderClosed {
            order: order_id.clone(),
        });
        events.push(MarketEvent::LeaseCreated {
            lease: lease_id,
            price,
        });
        Ok(events)
    }

    pub(crate) fn manifest_received(
        &mut self,
        env: &Env<'_>,
        msg: &MsgManifestReceived,
    ) -> Result<Vec<MarketEvent>, MarketError> {
        let lease = self
            .leases
            .get_mut(&msg.lease_id)
            .ok_or_else(|| MarketError::LeaseNotFound(msg.lease_id.clone()))?;
        if lease.state != LeaseState::Pending {
            return Err(MarketError::LeaseNotPending(msg.lease_id.clone()));
        }
        lease.state = LeaseState::Active;
        lease.activated_at = Some(env.block.height);
        info!(lease = %msg.lease_id, "manifest received, lease active");
        Ok(vec![MarketEvent::LeaseActivated {
            lease: msg.lease_id.clone(),
        }])
    }

    pub(crate) fn close_lease(
        &mut self,
        env: &Env<'_>,
        msg: &MsgCloseLease,
    ) -> Result<Vec<MarketEvent>, MarketError> {
        let reason = if msg.sender == msg.lease_id.order.owner {
            LeaseCloseReason::Owner
        } else {
            LeaseCloseReason::Provider
        };
        let mut events = Vec::new();
        self.close_lease_with(env, &msg.lease_id, reason, &mut events)?;
        Ok(events)
    }

    /// Closes a pending or active lease: closes and refunds its bid, and
    /// settles its escrow unless the escrow is disputed.
    pub(crate) fn close_lease_with(
        &mut self,
        env: &Env<'_>,
        lease_id: &LeaseId,
        reason: LeaseCloseReason,
        events: &mut Vec<MarketEvent>,
    ) -> Result<(), MarketError> {
        let lease = self
            .leases
            .get_mut(lease_id)
            .ok_or_else(|| MarketError::LeaseNotFound(lease_id.clone()))?;
        if lease.state == LeaseState::Closed {
            return Err(MarketError::LeaseNotActive(lease_id.clone()));
        }
        lease.state = LeaseState::Closed;
        lease.closed_at = Some(env.block.height);
        lease.close_reason = Some(reason);

        let bid_id = lease_id.bid();
        if let Some(bid) = self.bids.get_mut(&bid_id) {
            bid.state = BidState::Closed;
        }
        self.refund_bid_deposit(&bid_id, events)?;
        events.push(MarketEvent::BidClosed { bid: bid_id });

        let account_id = AccountId::for_order(&lease_id.order);
        let bound = self
            .escrow
            .get(&account_id)
            .filter(|a| a.lease.as_ref() == Some(lease_id))
            .map(|a| a.state);
        match bound {
            Some(EscrowState::Disputed) => {
                warn!(lease = %lease_id, account = %account_id, "lease closed with escrow under dispute, funds stay frozen");
            }
            Some(_) => {
                self.settle_escrow(&account_id, Some(lease_id), events)?;
            }
            None => debug!(lease = %lease_id, "no escrow bound to closed lease"),
        }

        info!(lease = %lease_id, ?reason, "lease closed");
        events.push(MarketEvent::LeaseClosed {
            lease: lease_id.clone(),
            reason,
        });
        Ok(())
    }

    fn open_bid_ids(&self, order: &OrderId) -> Vec<BidId> {
        self.bids
            .values()
            .filter(|b| &b.id.order == order && b.state == BidState::Open)
            .map(|b| b.id.clone())
            .collect()
    }

    fn close_open_bid(&mut self, bid_id: &BidId, events: &mut Vec<MarketEvent>) -> Result<(), MarketError> {
        let bid = self
            .bids
            .get_mut(bid_id)
            .ok_or_else(|| MarketError::BidNotFound(bid_id.clone()))?;
        if bid.state != BidState::Open {
            return Err(MarketError::BidNotOpen(bid_id.clone()));
        }
        bid.state = BidState::Closed;
        self.refund_bid_deposit(bid_id, events)?;
        debug!(bid = %bid_id, "bid closed");
        events.push(MarketEvent::BidClosed { bid: bid_id.clone() });
        Ok(())
    }

    /// Orders that are open and have at least one open bid, in id order.
    pub(crate) fn matchable_orders(&self) -> Vec<BidId> {
        self.orders
            .values()
            .filter(|o| o.state == OrderState::Open)
            .filter_map(|o| select_winner(self.bids.values().filter(|b| b.id.order == o.id)))
            .map(|b| b.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use molt_core::coin::DEFAULT_DENOM;
    use molt_core::{Address, Wallet};

    fn bid(order: &OrderId, provider: Address, price: u128, seq: u64) -> Bid {
        Bid {
            id: BidId::new(order.clone(), provider),
            seq,
            state: BidState::Open,
            price: Coin::new(DEFAULT_DENOM, price),
            deposit: Coin::new(DEFAULT_DENOM, 500_000),
            resources: ResourceSpec::new(1000, 0, 0, 0),
            created_at: 1,
        }
    }

    fn order() -> OrderId {
        OrderId::new(Wallet::new().address().clone(), 1, 1, 1)
    }

    #[test]
    fn lowest_price_wins() {
        let order = order();
        let bids = vec![
            bid(&order, Wallet::new().address().clone(), 120, 0),
            bid(&order, Wallet::new().address().clone(), 100, 1),
            bid(&order, Wallet::new().address().clone(), 110, 2),
        ];
        assert_eq!(select_winner(&bids).unwrap().seq, 1);
    }

    #[test]
    fn equal_price_earliest_sequence_wins() {
        let order = order();
        let bids = vec![
            bid(&order, Wallet::new().address().clone(), 100, 3),
            bid(&order, Wallet::new().address().clone(), 100, 1),
        ];
        assert_eq!(select_winner(&bids).unwrap().seq, 1);
    }

    #[test]
    fn address_breaks_remaining_ties() {
        let order = order();
        let mut a = Wallet::from_bytes(&[1u8; 32]).address().clone();
        let mut b = Wallet::from_bytes(&[2u8; 32]).address().clone();
        if b < a {
            std::mem::swap(&mut a, &mut b);
        }
        let bids = vec![bid(&order, b, 100, 0), bid(&order, a.clone(), 100, 0)];
        assert_eq!(select_winner(&bids).unwrap().id.provider, a);
    }

    #[test]
    fn closed_bids_never_win() {
        let order = order();
        let mut cheap = bid(&order, Wallet::new().address().clone(), 1, 0);
        cheap.state = BidState::Closed;
        let bids = vec![cheap, bid(&order, Wallet::new().address().clone(), 100, 1)];
        assert_eq!(select_winner(&bids).unwrap().seq, 1);
    }

    #[test]
    fn no_open_bids_no_winner() {
        assert!(select_winner(&Vec::<Bid>::new()).is_none());
    }

    #[test]
    fn selection_ignores_input_order() {
        let order = order();
        let mut bids = vec![
            bid(&order, Wallet::new().address().clone(), 100, 2),
            bid(&order, Wallet::new().address().clone(), 90, 5),
            bid(&order, Wallet::new().address().clone(), 90, 4),
        ];
        let first = select_winner(&bids).unwrap().id.clone();
        bids.reverse();
        assert_eq!(select_winner(&bids).unwrap().id, first);
    }
}
