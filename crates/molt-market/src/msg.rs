//! Market messages and their stateless checks.
//!
//! Every message has a `validate_basic` that looks only at the message
//! itself. The market runs it before touching any state.

use molt_core::{
    Address, BidId, Coin, Deposit, LeaseId, OrderId, ResourceGroup, ResourceSpec, SourceSet,
};
use serde::{Deserialize, Serialize};

use crate::error::MarketError;
use crate::escrow::{AccountId, Scope};
use crate::usage::{UsageClaim, UsageId, UsageType};

fn require_sender(sender: &Address, expected: &Address, what: &str) -> Result<(), MarketError> {
    if sender == expected {
        Ok(())
    } else {
        Err(MarketError::Unauthorized(format!("{sender} is not the {what}")))
    }
}

fn validate_price(coin: &Coin, field: &str) -> Result<(), MarketError> {
    coin.validate()
        .map_err(|e| MarketError::InvalidAmount(format!("{field}: {e}")))
}

fn validate_positive(coin: &Coin, field: &str) -> Result<(), MarketError> {
    validate_price(coin, field)?;
    if coin.is_zero() {
        return Err(MarketError::InvalidAmount(format!("{field} must be positive")));
    }
    Ok(())
}

fn validate_deployment_escrow(id: &AccountId) -> Result<(), MarketError> {
    id.validate()?;
    if id.scope != Scope::Deployment {
        return Err(MarketError::InvalidEscrow(format!(
            "{} is not a deployment escrow",
            id.key()
        )));
    }
    Ok(())
}

fn require_reason(reason: &str) -> Result<(), MarketError> {
    if reason.trim().is_empty() {
        return Err(MarketError::InvalidEscrow("reason is required".to_string()));
    }
    Ok(())
}

/// Tenant opens an order for a resource group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCreateOrder {
    /// Tenant.
    pub owner: Address,
    /// New order id; its owner must be the sender.
    pub id: OrderId,
    /// Requested resources.
    pub group: ResourceGroup,
    /// Highest acceptable price per unit-hour.
    pub price_ceiling: Coin,
}

impl MsgCreateOrder {
    /// Stateless checks.
    ///
    /// # Errors
    ///
    /// Returns the first structural problem found.
    pub fn validate_basic(&self) -> Result<(), MarketError> {
        require_sender(&self.owner, &self.id.owner, "order owner")?;
        if self.group.is_empty() {
            return Err(MarketError::InvalidMessage("resource group is empty".to_string()));
        }
        if self.group.total().is_none() {
            return Err(MarketError::InvalidMessage("resource group overflows".to_string()));
        }
        validate_price(&self.price_ceiling, "price ceiling")
    }
}

/// Tenant closes an open order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCloseOrder {
    /// Tenant.
    pub owner: Address,
    /// Order to close.
    pub id: OrderId,
}

impl MsgCloseOrder {
    /// Stateless checks.
    ///
    /// # Errors
    ///
    /// Fails if the sender does not own the order.
    pub fn validate_basic(&self) -> Result<(), MarketError> {
        require_sender(&self.owner, &self.id.owner, "order owner")
    }
}

/// Provider bids on an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCreateBid {
    /// Bidding provider.
    pub provider: Address,
    /// Order bid on.
    pub order_id: OrderId,
    /// Price per unit-hour.
    pub price: Coin,
    /// Deposit backing the bid.
    pub deposit: Deposit,
    /// Resources the provider holds for the order.
    pub resources: ResourceSpec,
}

impl MsgCreateBid {
    /// The id the bid will have.
    #[must_use]
    pub fn bid_id(&self) -> BidId {
        BidId::new(self.order_id.clone(), self.provider.clone())
    }

    /// Stateless checks.
    ///
    /// # Errors
    ///
    /// Fails on a malformed price or deposit or an empty resource offer.
    pub fn validate_basic(&self) -> Result<(), MarketError> {
        if self.provider == self.order_id.owner {
            return Err(MarketError::InvalidMessage(
                "provider cannot bid on its own order".to_string(),
            ));
        }
        validate_price(&self.price, "price")?;
        self.deposit.validate(&SourceSet::default())?;
        if self.resources.is_zero() {
            return Err(MarketError::InvalidMessage("bid offers no resources".to_string()));
        }
        Ok(())
    }
}

/// Provider withdraws a bid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCloseBid {
    /// Provider.
    pub provider: Address,
    /// Bid to close.
    pub bid_id: BidId,
}

impl MsgCloseBid {
    /// Stateless checks.
    ///
    /// # Errors
    ///
    /// Fails if the sender is not the bid's provider.
    pub fn validate_basic(&self) -> Result<(), MarketError> {
        require_sender(&self.provider, &self.bid_id.provider, "bid provider")
    }
}

/// Tenant accepts a bid, creating a lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCreateLease {
    /// Tenant.
    pub owner: Address,
    /// Bid to accept.
    pub bid_id: BidId,
}

impl MsgCreateLease {
    /// Stateless checks.
    ///
    /// # Errors
    ///
    /// Fails if the sender does not own the order.
    pub fn validate_basic(&self) -> Result<(), MarketError> {
        require_sender(&self.owner, &self.bid_id.order.owner, "order owner")
    }
}

/// Provider reports that the tenant's manifest arrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgManifestReceived {
    /// Provider.
    pub provider: Address,
    /// Pending lease.
    pub lease_id: LeaseId,
}

impl MsgManifestReceived {
    /// Stateless checks.
    ///
    /// # Errors
    ///
    /// Fails if the sender is not the lease's provider.
    pub fn validate_basic(&self) -> Result<(), MarketError> {
        require_sender(&self.provider, &self.lease_id.provider, "lease provider")
    }
}

/// Tenant or provider closes a lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCloseLease {
    /// Tenant or provider.
    pub sender: Address,
    /// Lease to close.
    pub lease_id: LeaseId,
}

impl MsgCloseLease {
    /// Stateless checks.
    ///
    /// # Errors
    ///
    /// Fails if the sender is neither party to the lease.
    pub fn validate_basic(&self) -> Result<(), MarketError> {
        if self.sender == self.lease_id.order.owner || self.sender == self.lease_id.provider {
            Ok(())
        } else {
            Err(MarketError::Unauthorized(format!(
                "{} is not a party to lease {}",
                self.sender, self.lease_id
            )))
        }
    }
}

/// Provider withdraws what a lease owes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgWithdrawLease {
    /// Provider.
    pub provider: Address,
    /// Lease to withdraw from.
    pub lease_id: LeaseId,
}

impl MsgWithdrawLease {
    /// Stateless checks.
    ///
    /// # Errors
    ///
    /// Fails if the sender is not the lease's provider.
    pub fn validate_basic(&self) -> Result<(), MarketError> {
        require_sender(&self.provider, &self.lease_id.provider, "lease provider")
    }
}

/// Adds funds to an existing escrow account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgAccountDeposit {
    /// Depositing address. Grant sources draw from the account owner on its behalf.
    pub signer: Address,
    /// Account to fund.
    pub account_id: AccountId,
    /// Amount and sources.
    pub deposit: Deposit,
}

impl MsgAccountDeposit {
    /// Stateless checks.
    ///
    /// # Errors
    ///
    /// `InvalidId` for a malformed account id, `InvalidDepositSource` for bad
    /// sources or amount.
    pub fn validate_basic(&self) -> Result<(), MarketError> {
        self.account_id.validate()?;
        self.deposit.validate(&SourceSet::default())?;
        Ok(())
    }
}

/// Tenant locks funds for an order's lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCreateEscrow {
    /// Tenant.
    pub sender: Address,
    /// Order the escrow pays for.
    pub order_id: OrderId,
    /// Amount to lock.
    pub amount: Coin,
    /// Blocks until an unactivated escrow is refunded.
    pub expires_in: u64,
}

impl MsgCreateEscrow {
    /// The escrow account this message opens.
    #[must_use]
    pub fn escrow_id(&self) -> AccountId {
        AccountId::for_order(&self.order_id)
    }

    /// Stateless checks.
    ///
    /// # Errors
    ///
    /// `InvalidAmount` unless `amount > 0`; `InvalidEscrow` unless `expires_in > 0`.
    pub fn validate_basic(&self) -> Result<(), MarketError> {
        validate_positive(&self.amount, "escrow amount")?;
        if self.expires_in == 0 {
            return Err(MarketError::InvalidEscrow("expires_in must be positive".to_string()));
        }
        Ok(())
    }
}

/// Tenant binds an escrow to a lease and its provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgActivateEscrow {
    /// Tenant.
    pub sender: Address,
    /// Escrow to activate.
    pub escrow_id: AccountId,
    /// Lease it pays for.
    pub lease_id: LeaseId,
    /// Provider receiving releases.
    pub recipient: Address,
}

impl MsgActivateEscrow {
    /// Stateless checks.
    ///
    /// # Errors
    ///
    /// `InvalidEscrow` if the escrow, lease and recipient do not line up.
    pub fn validate_basic(&self) -> Result<(), MarketError> {
        validate_deployment_escrow(&self.escrow_id)?;
        if self.escrow_id != AccountId::for_order(&self.lease_id.order) {
            return Err(MarketError::InvalidEscrow(format!(
                "lease {} does not belong to {}",
                self.lease_id,
                self.escrow_id.key()
            )));
        }
        if self.recipient != self.lease_id.provider {
            return Err(MarketError::InvalidEscrow(format!(
                "recipient {} is not the lease provider",
                self.recipient
            )));
        }
        Ok(())
    }
}

/// Tenant releases escrowed funds to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgReleaseEscrow {
    /// Tenant.
    pub sender: Address,
    /// Escrow to release from.
    pub escrow_id: AccountId,
    /// Amount to release; everything when absent.
    pub amount: Option<Coin>,
}

impl MsgReleaseEscrow {
    /// Stateless checks.
    ///
    /// # Errors
    ///
    /// `InvalidAmount` for a zero or malformed partial amount.
    pub fn validate_basic(&self) -> Result<(), MarketError> {
        validate_deployment_escrow(&self.escrow_id)?;
        if let Some(amount) = &self.amount {
            validate_positive(amount, "release amount")?;
        }
        Ok(())
    }
}

/// Returns an escrow's remaining funds to the tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgRefundEscrow {
    /// Tenant before activation, provider after.
    pub sender: Address,
    /// Escrow to refund.
    pub escrow_id: AccountId,
    /// Why.
    pub reason: String,
}

impl MsgRefundEscrow {
    /// Stateless checks.
    ///
    /// # Errors
    ///
    /// `InvalidEscrow` for a malformed id or empty reason.
    pub fn validate_basic(&self) -> Result<(), MarketError> {
        validate_deployment_escrow(&self.escrow_id)?;
        require_reason(&self.reason)
    }
}

/// Freezes an escrow pending arbitration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgDisputeEscrow {
    /// Tenant or provider.
    pub sender: Address,
    /// Escrow to freeze.
    pub escrow_id: AccountId,
    /// Why.
    pub reason: String,
}

impl MsgDisputeEscrow {
    /// Stateless checks.
    ///
    /// # Errors
    ///
    /// `InvalidEscrow` for a malformed id or empty reason.
    pub fn validate_basic(&self) -> Result<(), MarketError> {
        validate_deployment_escrow(&self.escrow_id)?;
        require_reason(&self.reason)
    }
}

/// How a dispute ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeOutcome {
    /// Unfreeze; the escrow continues paying the provider.
    Resume,
    /// Return the remaining funds to the tenant.
    Refund,
}

/// Dispute authority settles a frozen escrow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgResolveDispute {
    /// Configured dispute authority.
    pub authority: Address,
    /// Disputed escrow.
    pub escrow_id: AccountId,
    /// Resolution.
    pub outcome: DisputeOutcome,
}

impl MsgResolveDispute {
    /// Stateless checks.
    ///
    /// # Errors
    ///
    /// Fails for a malformed escrow id.
    pub fn validate_basic(&self) -> Result<(), MarketError> {
        validate_deployment_escrow(&self.escrow_id)
    }
}

/// Provider reports signed usage for a lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgRecordUsage {
    /// Provider.
    pub sender: Address,
    /// Order the lease fulfils.
    pub order_id: OrderId,
    /// Lease consumed.
    pub lease_id: LeaseId,
    /// Units consumed.
    pub usage_units: u64,
    /// What was consumed.
    pub usage_type: UsageType,
    /// Period start, unix seconds.
    pub period_start: i64,
    /// Period end, unix seconds.
    pub period_end: i64,
    /// Provider signature over [`UsageClaim::sign_bytes`].
    pub signature: Vec<u8>,
}

impl MsgRecordUsage {
    /// The signed claim carried by this message.
    #[must_use]
    pub fn claim(&self) -> UsageClaim {
        UsageClaim {
            order: self.order_id.clone(),
            lease: self.lease_id.clone(),
            units: self.usage_units,
            usage_type: self.usage_type,
            period_start: self.period_start,
            period_end: self.period_end,
        }
    }

    /// Stateless checks.
    ///
    /// # Errors
    ///
    /// `InvalidUsageRecord` for zero units, an empty period or a lease from
    /// another order; `InvalidSignature` for an empty signature.
    pub fn validate_basic(&self) -> Result<(), MarketError> {
        if self.usage_units == 0 {
            return Err(MarketError::InvalidUsageRecord("usage units must be positive".to_string()));
        }
        if self.period_start >= self.period_end {
            return Err(MarketError::InvalidUsageRecord(format!(
                "period start {} is not before end {}",
                self.period_start, self.period_end
            )));
        }
        if self.lease_id.order != self.order_id {
            return Err(MarketError::InvalidUsageRecord(format!(
                "lease {} does not fulfil order {}",
                self.lease_id, self.order_id
            )));
        }
        if self.signature.is_empty() {
            return Err(MarketError::InvalidSignature);
        }
        require_sender(&self.sender, &self.lease_id.provider, "lease provider")
    }
}

/// Tenant acknowledges a usage record, making it billable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgAcknowledgeUsage {
    /// Tenant.
    pub sender: Address,
    /// Record to acknowledge.
    pub usage_id: UsageId,
    /// Tenant signature over the record's claim bytes.
    pub signature: Vec<u8>,
}

impl MsgAcknowledgeUsage {
    /// Stateless checks.
    ///
    /// # Errors
    ///
    /// `InvalidSignature` for an empty signature.
    pub fn validate_basic(&self) -> Result<(), MarketError> {
        if self.signature.is_empty() {
            return Err(MarketError::InvalidSignature);
        }
        Ok(())
    }
}

/// Provider collects acknowledged usage value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgClaimRewards {
    /// Provider.
    pub sender: Address,
    /// Restrict the claim to one lease.
    pub source: Option<LeaseId>,
}

impl MsgClaimRewards {
    /// Stateless checks.
    ///
    /// # Errors
    ///
    /// Fails if `source` is a lease of another provider.
    pub fn validate_basic(&self) -> Result<(), MarketError> {
        match &self.source {
            Some(lease) => require_sender(&self.sender, &lease.provider, "lease provider"),
            None => Ok(()),
        }
    }
}

/// Final reconciliation of an order's escrow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgSettleOrder {
    /// Tenant or the lease's provider.
    pub sender: Address,
    /// Order to settle.
    pub order_id: OrderId,
}

impl MsgSettleOrder {
    /// The escrow account this message settles.
    #[must_use]
    pub fn escrow_id(&self) -> AccountId {
        AccountId::for_order(&self.order_id)
    }

    /// Stateless checks. Party membership is checked against the lease.
    ///
    /// # Errors
    ///
    /// Never fails; present for uniformity.
    pub fn validate_basic(&self) -> Result<(), MarketError> {
        Ok(())
    }
}

/// Every message the market accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketMsg {
    /// See [`MsgCreateOrder`].
    CreateOrder(MsgCreateOrder),
    /// See [`MsgCloseOrder`].
    CloseOrder(MsgCloseOrder),
    /// See [`MsgCreateBid`].
    CreateBid(MsgCreateBid),
    /// See [`MsgCloseBid`].
    CloseBid(MsgCloseBid),
    /// See [`MsgCreateLease`].
    CreateLease(MsgCreateLease),
    /// See [`MsgManifestReceived`].
    ManifestReceived(MsgManifestReceived),
    /// See [`MsgCloseLease`].
    CloseLease(MsgCloseLease),
    /// See [`MsgWithdrawLease`].
    WithdrawLease(MsgWithdrawLease),
    /// See [`MsgAccountDeposit`].
    AccountDeposit(MsgAccountDeposit),
    /// See [`MsgCreateEscrow`].
    CreateEscrow(MsgCreateEscrow),
    /// See [`MsgActivateEscrow`].
    ActivateEscrow(MsgActivateEscrow),
    /// See [`MsgReleaseEscrow`].
    ReleaseEscrow(MsgReleaseEscrow),
    /// See [`MsgRefundEscrow`].
    RefundEscrow(MsgRefundEscrow),
    /// See [`MsgDisputeEscrow`].
    DisputeEscrow(MsgDisputeEscrow),
    /// See [`MsgResolveDispute`].
    ResolveDispute(MsgResolveDispute),
    /// See [`MsgRecordUsage`].
    RecordUsage(MsgRecordUsage),
    /// See [`MsgAcknowledgeUsage`].
    AcknowledgeUsage(MsgAcknowledgeUsage),
    /// See [`MsgClaimRewards`].
    ClaimRewards(MsgClaimRewards),
    /// See [`MsgSettleOrder`].
    SettleOrder(MsgSettleOrder),
}

impl MarketMsg {
    /// Decodes a message from its tagged JSON form.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::InvalidMessage` for malformed input, including
    /// missing fields and invalid addresses.
    pub fn from_json(json: &str) -> Result<Self, MarketError> {
        serde_json::from_str(json).map_err(|e| MarketError::InvalidMessage(e.to_string()))
    }

    /// Snake-case message name, as used in the JSON tag.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::CreateOrder(_) => "create_order",
            Self::CloseOrder(_) => "close_order",
            Self::CreateBid(_) => "create_bid",
            Self::CloseBid(_) => "close_bid",
            Self::CreateLease(_) => "create_lease",
            Self::ManifestReceived(_) => "manifest_received",
            Self::CloseLease(_) => "close_lease",
            Self::WithdrawLease(_) => "withdraw_lease",
            Self::AccountDeposit(_) => "account_deposit",
            Self::CreateEscrow(_) => "create_escrow",
            Self::ActivateEscrow(_) => "activate_escrow",
            Self::ReleaseEscrow(_) => "release_escrow",
            Self::RefundEscrow(_) => "refund_escrow",
            Self::DisputeEscrow(_) => "dispute_escrow",
            Self::ResolveDispute(_) => "resolve_dispute",
            Self::RecordUsage(_) => "record_usage",
            Self::AcknowledgeUsage(_) => "acknowledge_usage",
            Self::ClaimRewards(_) => "claim_rewards",
            Self::SettleOrder(_) => "settle_order",
        }
    }

    /// The address that signed the message.
    #[must_use]
    pub const fn signer(&self) -> &Address {
        match self {
            Self::CreateOrder(m) => &m.owner,
            Self::CloseOrder(m) => &m.owner,
            Self::CreateBid(m) => &m.provider,
            Self::CloseBid(m) => &m.provider,
            Self::CreateLease(m) => &m.owner,
            Self::ManifestReceived(m) => &m.provider,
            Self::CloseLease(m) => &m.sender,
            Self::WithdrawLease(m) => &m.provider,
            Self::AccountDeposit(m) => &m.signer,
            Self::CreateEscrow(m) => &m.sender,
            Self::ActivateEscrow(m) => &m.sender,
            Self::ReleaseEscrow(m) => &m.sender,
            Self::RefundEscrow(m) => &m.sender,
            Self::DisputeEscrow(m) => &m.sender,
            Self::ResolveDispute(m) => &m.authority,
            Self::RecordUsage(m) => &m.sender,
            Self::AcknowledgeUsage(m) => &m.sender,
            Self::ClaimRewards(m) => &m.sender,
            Self::SettleOrder(m) => &m.sender,
        }
    }

    /// Runs the wrapped message's stateless checks.
    ///
    /// # Errors
    ///
    /// Returns the message's structural error.
    pub fn validate_basic(&self) -> Result<(), MarketError> {
        match self {
            Self::CreateOrder(m) => m.validate_basic(),
            Self::CloseOrder(m) => m.validate_basic(),
            Self::CreateBid(m) => m.validate_basic(),
            Self::CloseBid(m) => m.validate_basic(),
            Self::CreateLease(m) => m.validate_basic(),
            Self::ManifestReceived(m) => m.validate_basic(),
            Self::CloseLease(m) => m.validate_basic(),
            Self::WithdrawLease(m) => m.validate_basic(),
            Self::AccountDeposit(m) => m.validate_basic(),
            Self::CreateEscrow(m) => m.validate_basic(),
            Self::ActivateEscrow(m) => m.validate_basic(),
            Self::ReleaseEscrow(m) => m.validate_basic(),
            Self::RefundEscrow(m) => m.validate_basic(),
            Self::DisputeEscrow(m) => m.validate_basic(),
            Self::ResolveDispute(m) => m.validate_basic(),
            Self::RecordUsage(m) => m.validate_basic(),
            Self::AcknowledgeUsage(m) => m.validate_basic(),
            Self::ClaimRewards(m) => m.validate_basic(),
            Self::SettleOrder(m) => m.validate_basic(),
        }
    }
}

macro_rules! impl_from_msg {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for MarketMsg {
                fn from(msg: $ty) -> Self {
                    Self::$variant(msg)
                }
            }
        )*
    };
}

impl_from_msg! {
    CreateOrder => MsgCreateOrder,
    CloseOrder => MsgCloseOrder,
    CreateBid => MsgCreateBid,
    CloseBid => MsgCloseBid,
    CreateLease => MsgCreateLease,
    ManifestReceived => MsgManifestReceived,
    CloseLease => MsgCloseLease,
    WithdrawLease => MsgWithdrawLease,
    AccountDeposit => MsgAccountDeposit,
    CreateEscrow => MsgCreateEscrow,
    ActivateEscrow => MsgActivateEscrow,
    ReleaseEscrow => MsgReleaseEscrow,
    RefundEscrow => MsgRefundEscrow,
    DisputeEscrow => MsgDisputeEscrow,
    ResolveDispute => MsgResolveDispute,
    RecordUsage => MsgRecordUsage,
    AcknowledgeUsage => MsgAcknowledgeUsage,
    ClaimRewards => MsgClaimRewards,
    SettleOrder => MsgSettleOrder,
}
