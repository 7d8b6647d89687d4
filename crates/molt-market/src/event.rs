//! Events emitted by successful market transitions.

use molt_core::{Address, BidId, Coin, LeaseId, OrderId};
use serde::{Deserialize, Serialize};

use crate::escrow::{AccountId, EscrowState};
use crate::msg::DisputeOutcome;
use crate::orderbook::LeaseCloseReason;
use crate::usage::UsageId;

/// Something that happened while applying a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MarketEvent {
    /// Order opened.
    OrderCreated {
        /// Order.
        order: OrderId,
    },
    /// Order closed.
    OrderClosed {
        /// Order.
        order: OrderId,
    },
    /// Bid placed.
    BidCreated {
        /// Bid.
        bid: BidId,
        /// Price per unit-hour.
        price: Coin,
        /// Bid sequence within the order.
        seq: u64,
    },
    /// Bid closed without becoming a lease (or its lease ended).
    BidClosed {
        /// Bid.
        bid: BidId,
    },
    /// Lease created from a matched bid; awaiting its manifest.
    LeaseCreated {
        /// Lease.
        lease: LeaseId,
        /// Price per unit-hour.
        price: Coin,
    },
    /// Manifest received; the lease is running.
    LeaseActivated {
        /// Lease.
        lease: LeaseId,
    },
    /// Lease ended.
    LeaseClosed {
        /// Lease.
        lease: LeaseId,
        /// Why.
        reason: LeaseCloseReason,
    },
    /// Funds added to an escrow account.
    EscrowDeposited {
        /// Account.
        account: AccountId,
        /// Amount.
        amount: Coin,
    },
    /// Escrow bound to a lease.
    EscrowActivated {
        /// Account.
        account: AccountId,
        /// Lease.
        lease: LeaseId,
    },
    /// Funds paid to a recipient.
    EscrowReleased {
        /// Account.
        account: AccountId,
        /// Recipient.
        recipient: Address,
        /// Amount.
        amount: Coin,
    },
    /// Funds returned to the owner.
    EscrowRefunded {
        /// Account.
        account: AccountId,
        /// Owner.
        owner: Address,
        /// Amount.
        amount: Coin,
    },
    /// Escrow frozen.
    EscrowDisputed {
        /// Account.
        account: AccountId,
        /// Why.
        reason: String,
    },
    /// Dispute resolved.
    EscrowResolved {
        /// Account.
        account: AccountId,
        /// Resolution.
        outcome: DisputeOutcome,
    },
    /// Escrow reached a terminal state and was removed.
    EscrowClosed {
        /// Account.
        account: AccountId,
        /// Final state.
        state: EscrowState,
    },
    /// Usage recorded.
    UsageRecorded {
        /// Record.
        usage: UsageId,
        /// Lease.
        lease: LeaseId,
        /// Billable value.
        value: Coin,
    },
    /// Usage acknowledged by the tenant.
    UsageAcknowledged {
        /// Record.
        usage: UsageId,
    },
    /// Provider collected acknowledged usage.
    RewardsClaimed {
        /// Provider.
        provider: Address,
        /// Total paid.
        amount: Coin,
    },
    /// Order's escrow reconciled and closed.
    OrderSettled {
        /// Order.
        order: OrderId,
        /// Paid to the provider.
        paid: Coin,
        /// Returned to the tenant.
        refunded: Coin,
    },
}
