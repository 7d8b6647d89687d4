//! Escrow account ledger.
//!
//! Accounts hold locked funds for one order of a deployment or for a bid. Each
//! account is keyed by its scope and external id
//! (`deployment/<owner>/<dseq>/<gseq>/<oseq>` or
//! `bid/<owner>/<dseq>/<gseq>/<oseq>/<provider>`), is opened on its first
//! deposit, and is removed from the ledger once it reaches a terminal state
//! with nothing left in it.
//!
//! Every account keeps running totals so that
//! `balance == deposited - transferred - refunded` holds after any sequence of
//! operations.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use molt_core::{Address, BidId, Coin, Deposit, LeaseId, OrderId, SourceSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// What an escrow account is locked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Tenant funds paying for the lease of one of a deployment's orders.
    Deployment,
    /// Provider funds backing a bid.
    Bid,
}

impl Scope {
    /// Number of `/`-separated fields in this scope's external id.
    #[must_use]
    pub const fn field_count(self) -> usize {
        match self {
            Self::Deployment => 4,
            Self::Bid => 5,
        }
    }

    /// Returns the scope's key prefix.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Deployment => "deployment",
            Self::Bid => "bid",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scope {
    type Err = EscrowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deployment" => Ok(Self::Deployment),
            "bid" => Ok(Self::Bid),
            other => Err(EscrowError::InvalidId(format!("unknown scope {other:?}"))),
        }
    }
}

/// Errors raised by the escrow ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EscrowError {
    /// Account id does not match its scope's layout.
    #[error("invalid escrow id: {0}")]
    InvalidId(String),

    /// No account with this id.
    #[error("escrow account not found: {0}")]
    NotFound(String),

    /// The account has less than the requested amount.
    #[error("insufficient funds in {account}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// Account key.
        account: String,
        /// Current balance.
        balance: String,
        /// Requested amount.
        requested: String,
    },

    /// The account is disputed; releases and refunds are frozen.
    #[error("escrow account {0} is disputed")]
    Disputed(String),

    /// The requested state change is not allowed.
    #[error("invalid escrow transition for {account}: {from} -> {to}")]
    InvalidTransition {
        /// Account key.
        account: String,
        /// Current state.
        from: EscrowState,
        /// Attempted state.
        to: EscrowState,
    },

    /// Coin denomination differs from the account's.
    #[error("denomination mismatch for {account}: expected {expected}, got {got}")]
    DenomMismatch {
        /// Account key.
        account: String,
        /// Account denomination.
        expected: String,
        /// Offered denomination.
        got: String,
    },

    /// The deposit failed validation.
    #[error("invalid deposit: {0}")]
    InvalidDeposit(#[from] molt_core::DepositError),

    /// Arithmetic overflow.
    #[error("escrow arithmetic overflow in {0}")]
    Overflow(String),

    /// No payment with this id.
    #[error("escrow payment not found: {0}")]
    PaymentNotFound(String),
}

/// Identifies an escrow account: a scope plus an external id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId {
    /// Account scope.
    pub scope: Scope,
    /// External id, `/`-separated.
    pub xid: String,
}

impl AccountId {
    /// Creates and validates an account id.
    ///
    /// # Errors
    ///
    /// Returns `EscrowError::InvalidId` if the external id does not match
    /// the scope.
    pub fn new(scope: Scope, xid: impl Into<String>) -> Result<Self, EscrowError> {
        let id = Self {
            scope,
            xid: xid.into(),
        };
        id.validate()?;
        Ok(id)
    }

    /// The deployment account funding one order. Every group of a
    /// deployment gets its own account.
    #[must_use]
    pub fn for_order(order: &OrderId) -> Self {
        Self {
            scope: Scope::Deployment,
            xid: order.to_string(),
        }
    }

    /// The account holding a bid's deposit.
    #[must_use]
    pub fn for_bid(bid: &BidId) -> Self {
        Self {
            scope: Scope::Bid,
            xid: bid.to_string(),
        }
    }

    /// Store key: `scope/xid`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.scope, self.xid)
    }

    /// The owner encoded in the external id: the tenant for deployment
    /// accounts, the provider for bid accounts.
    ///
    /// # Errors
    ///
    /// Returns `EscrowError::InvalidId` if the id is malformed.
    pub fn owner(&self) -> Result<Address, EscrowError> {
        let owner = match self.scope {
            Scope::Deployment => self.xid.split('/').next(),
            Scope::Bid => self.xid.rsplit('/').next(),
        };
        owner
            .unwrap_or_default()
            .parse::<Address>()
            .map_err(|e| EscrowError::InvalidId(format!("{}: {e}", self.key())))
    }

    /// Checks field count, sequence numbers and embedded addresses.
    ///
    /// # Errors
    ///
    /// Returns `EscrowError::InvalidId` describing the first problem.
    pub fn validate(&self) -> Result<(), EscrowError> {
        let fields: Vec<&str> = self.xid.split('/').collect();
        if fields.len() != self.scope.field_count() {
            return Err(EscrowError::InvalidId(format!(
                "{} id {:?} has {} fields, expected {}",
                self.scope,
                self.xid,
                fields.len(),
                self.scope.field_count()
            )));
        }

        let invalid = |e: molt_core::MoltError| EscrowError::InvalidId(format!("{}: {e}", self.key()));
        match self.scope {
            Scope::Deployment => {
                self.xid.parse::<OrderId>().map_err(invalid)?;
            }
            Scope::Bid => {
                self.xid.parse::<BidId>().map_err(invalid)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.xid)
    }
}

impl FromStr for AccountId {
    type Err = EscrowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scope, xid) = s
            .split_once('/')
            .ok_or_else(|| EscrowError::InvalidId(format!("missing scope in {s:?}")))?;
        Self::new(scope.parse()?, xid)
    }
}

/// Lifecycle of an escrow account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowState {
    /// Funded, not yet bound to a lease.
    Created,
    /// Bound to a lease; releases and refunds allowed.
    Active,
    /// Frozen pending arbitration.
    Disputed,
    /// All funds paid out to the recipient.
    Released,
    /// Remaining funds returned to the owner.
    Refunded,
}

impl EscrowState {
    /// Checks if a transition to the target state is valid.
    #[must_use]
    pub const fn can_transition_to(&self, target: &Self) -> bool {
        use EscrowState::{Active, Created, Disputed, Refunded, Released};

        matches!(
            (self, target),
            (Created, Active | Refunded)
                | (Active, Disputed | Released | Refunded)
                | (Disputed, Active | Refunded)
        )
    }

    /// Returns true for Released and Refunded.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Refunded)
    }
}

impl fmt::Display for EscrowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Active => write!(f, "active"),
            Self::Disputed => write!(f, "disputed"),
            Self::Released => write!(f, "released"),
            Self::Refunded => write!(f, "refunded"),
        }
    }
}

/// Identifies a payment stream: account key plus payment id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PaymentId {
    /// Account the payment draws on.
    pub account: AccountId,
    /// Payment id within the account (`gseq/oseq/provider` for leases).
    pub pid: String,
}

impl PaymentId {
    /// The payment stream for a lease.
    #[must_use]
    pub fn for_lease(lease: &LeaseId) -> Self {
        Self {
            account: AccountId::for_order(&lease.order),
            pid: format!("{}/{}/{}", lease.order.gseq, lease.order.oseq, lease.provider),
        }
    }

    /// Store key: account key + `/` + payment id.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.account.key(), self.pid)
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// A disbursement stream paying a lease's provider from an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowPayment {
    /// Payment id within the account.
    pub pid: String,
    /// Provider receiving the payments.
    pub owner: Address,
    /// Lease price the stream bills at.
    pub rate: Coin,
    /// Total paid out so far.
    pub withdrawn: Coin,
    /// False once the lease has closed.
    pub open: bool,
}

/// A locked-fund account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowAccount {
    /// Account id.
    pub id: AccountId,
    /// Address refunds are returned to.
    pub owner: Address,
    /// Current state.
    pub state: EscrowState,
    /// Funds currently locked.
    pub balance: Coin,
    /// Total ever deposited.
    pub deposited: Coin,
    /// Total released to recipients.
    pub transferred: Coin,
    /// Total refunded to the owner.
    pub refunded: Coin,
    /// Order the account pays for, when created through settlement.
    pub order: Option<OrderId>,
    /// Lease the account is bound to once active.
    pub lease: Option<LeaseId>,
    /// Provider receiving releases once active.
    pub recipient: Option<Address>,
    /// Height the account was opened at.
    pub created_at: u64,
    /// Height after which an unactivated account is refunded.
    pub expires_at: Option<u64>,
    /// Reason given when disputed.
    pub dispute_reason: Option<String>,
    /// Payment streams keyed by payment id.
    pub payments: BTreeMap<String, EscrowPayment>,
}

impl EscrowAccount {
    fn new(id: AccountId, owner: Address, denom: &str, height: u64) -> Self {
        Self {
            id,
            owner,
            state: EscrowState::Created,
            balance: Coin::zero(denom),
            deposited: Coin::zero(denom),
            transferred: Coin::zero(denom),
            refunded: Coin::zero(denom),
            order: None,
            lease: None,
            recipient: None,
            created_at: height,
            expires_at: None,
            dispute_reason: None,
            payments: BTreeMap::new(),
        }
    }

    /// Returns true if `balance == deposited - transferred - refunded`.
    #[must_use]
    pub fn is_conserved(&self) -> bool {
        self.deposited
            .checked_sub(&self.transferred)
            .and_then(|c| c.checked_sub(&self.refunded))
            .is_ok_and(|expected| expected == self.balance)
    }

    /// Returns true if the account can be dropped from the ledger.
    #[must_use]
    pub fn is_prunable(&self) -> bool {
        self.state.is_terminal()
            && self.balance.is_zero()
            && self.payments.values().all(|p| !p.open)
    }

    fn transition_to(&mut self, target: EscrowState) -> Result<(), EscrowError> {
        if self.state.can_transition_to(&target) {
            self.state = target;
            Ok(())
        } else if self.state == EscrowState::Disputed {
            Err(EscrowError::Disputed(self.id.key()))
        } else {
            Err(EscrowError::InvalidTransition {
                account: self.id.key(),
                from: self.state,
                to: target,
            })
        }
    }

    fn check_denom(&self, coin: &Coin) -> Result<(), EscrowError> {
        if coin.same_denom(&self.balance) {
            Ok(())
        } else {
            Err(EscrowError::DenomMismatch {
                account: self.id.key(),
                expected: self.balance.denom().to_string(),
                got: coin.denom().to_string(),
            })
        }
    }

    fn debit(&mut self, amount: &Coin) -> Result<(), EscrowError> {
        self.check_denom(amount)?;
        self.balance = self
            .balance
            .checked_sub(amount)
            .map_err(|_| EscrowError::InsufficientFunds {
                account: self.id.key(),
                balance: self.balance.to_string(),
                requested: amount.to_string(),
            })?;
        Ok(())
    }

    fn ensure_movable(&self) -> Result<(), EscrowError> {
        match self.state {
            EscrowState::Created | EscrowState::Active => Ok(()),
            EscrowState::Disputed => Err(EscrowError::Disputed(self.id.key())),
            terminal => Err(EscrowError::InvalidTransition {
                account: self.id.key(),
                from: terminal,
                to: terminal,
            }),
        }
    }
}

/// The set of open escrow accounts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EscrowLedger {
    accounts: BTreeMap<AccountId, EscrowAccount>,
}

impl EscrowLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up an account.
    #[must_use]
    pub fn get(&self, id: &AccountId) -> Option<&EscrowAccount> {
        self.accounts.get(id)
    }

    /// Iterates accounts in key order.
    pub fn iter(&self) -> impl Iterator<Item = &EscrowAccount> {
        self.accounts.values()
    }

    /// Number of open accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Returns true if no accounts are open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub(crate) fn get_mut(&mut self, id: &AccountId) -> Result<&mut EscrowAccount, EscrowError> {
        self.accounts
            .get_mut(id)
            .ok_or_else(|| EscrowError::NotFound(id.key()))
    }

    /// Opens an account explicitly.
    ///
    /// # Errors
    ///
    /// Fails on an invalid id. Opening an existing account returns it unchanged.
    pub fn open(
        &mut self,
        id: &AccountId,
        owner: &Address,
        denom: &str,
        height: u64,
    ) -> Result<&mut EscrowAccount, EscrowError> {
        id.validate()?;
        Ok(self.accounts.entry(id.clone()).or_insert_with(|| {
            debug!(account = %id, owner = %owner, "opening escrow account");
            EscrowAccount::new(id.clone(), owner.clone(), denom, height)
        }))
    }

    /// Adds a validated deposit to an account, opening it if needed.
    ///
    /// # Errors
    ///
    /// Fails if the deposit is invalid, the denomination differs, or the
    /// account is terminal.
    pub fn deposit(
        &mut self,
        id: &AccountId,
        owner: &Address,
        deposit: &Deposit,
        sources: &SourceSet,
        height: u64,
    ) -> Result<&EscrowAccount, EscrowError> {
        deposit.validate(sources)?;
        let account = self.open(id, owner, deposit.amount.denom(), height)?;
        if account.state.is_terminal() {
            return Err(EscrowError::InvalidTransition {
                account: id.key(),
                from: account.state,
                to: account.state,
            });
        }
        account.check_denom(&deposit.amount)?;

        let overflow = |_| EscrowError::Overflow(id.key());
        account.balance = account.balance.checked_add(&deposit.amount).map_err(overflow)?;
        account.deposited = account.deposited.checked_add(&deposit.amount).map_err(overflow)?;
        debug!(account = %id, amount = %deposit.amount, balance = %account.balance, "escrow deposit");
        Ok(account)
    }

    /// Moves an account from Created to Active, binding it to a lease.
    ///
    /// # Errors
    ///
    /// Fails unless the account is Created.
    pub fn activate(
        &mut self,
        id: &AccountId,
        lease: &LeaseId,
        rate: &Coin,
    ) -> Result<&EscrowAccount, EscrowError> {
        let account = self.get_mut(id)?;
        account.transition_to(EscrowState::Active)?;
        let payment = PaymentId::for_lease(lease);
        account.payments.insert(
            payment.pid.clone(),
            EscrowPayment {
                pid: payment.pid,
                owner: lease.provider.clone(),
                rate: rate.clone(),
                withdrawn: Coin::zero(rate.denom()),
                open: true,
            },
        );
        account.lease = Some(lease.clone());
        account.recipient = Some(lease.provider.clone());
        Ok(account)
    }

    /// Releases `amount` from an account to its recipient.
    ///
    /// The account becomes Released when its balance reaches zero.
    ///
    /// # Errors
    ///
    /// Fails with `InsufficientFunds` if `amount` exceeds the balance and with
    /// `Disputed` while the account is frozen.
    pub fn release(&mut self, id: &AccountId, amount: &Coin) -> Result<&EscrowAccount, EscrowError> {
        let account = self.get_mut(id)?;
        match account.state {
            EscrowState::Active => {}
            EscrowState::Disputed => return Err(EscrowError::Disputed(id.key())),
            from => {
                return Err(EscrowError::InvalidTransition {
                    account: id.key(),
                    from,
                    to: EscrowState::Released,
                });
            }
        }
        account.debit(amount)?;
        account.transferred = account
            .transferred
            .checked_add(amount)
            .map_err(|_| EscrowError::Overflow(id.key()))?;
        if account.balance.is_zero() {
            account.transition_to(EscrowState::Released)?;
        }
        Ok(account)
    }

    /// Pays a lease's provider through its payment stream.
    ///
    /// # Errors
    ///
    /// Same as [`EscrowLedger::release`], plus `PaymentNotFound`.
    pub fn withdraw_payment(
        &mut self,
        payment: &PaymentId,
        amount: &Coin,
    ) -> Result<&EscrowAccount, EscrowError> {
        if !self.get_mut(&payment.account)?.payments.contains_key(&payment.pid) {
            return Err(EscrowError::PaymentNotFound(payment.key()));
        }
        self.release(&payment.account, amount)?;
        let account = self.get_mut(&payment.account)?;
        if let Some(p) = account.payments.get_mut(&payment.pid) {
            p.withdrawn = p
                .withdrawn
                .checked_add(amount)
                .map_err(|_| EscrowError::Overflow(payment.key()))?;
        }
        Ok(account)
    }

    /// Marks a payment stream closed.
    ///
    /// # Errors
    ///
    /// Fails if the account or payment is unknown.
    pub fn close_payment(&mut self, payment: &PaymentId) -> Result<(), EscrowError> {
        let account = self.get_mut(&payment.account)?;
        let p = account
            .payments
            .get_mut(&payment.pid)
            .ok_or_else(|| EscrowError::PaymentNotFound(payment.key()))?;
        p.open = false;
        Ok(())
    }

    /// Returns `amount` from an account to its owner.
    ///
    /// The account becomes Refunded when its balance reaches zero.
    ///
    /// # Errors
    ///
    /// Fails with `InsufficientFunds` if `amount` exceeds the balance and with
    /// `Disputed` while the account is frozen.
    pub fn refund(&mut self, id: &AccountId, amount: &Coin) -> Result<&EscrowAccount, EscrowError> {
        let account = self.get_mut(id)?;
        account.ensure_movable()?;
        account.debit(amount)?;
        account.refunded = account
            .refunded
            .checked_add(amount)
            .map_err(|_| EscrowError::Overflow(id.key()))?;
        if account.balance.is_zero() {
            account.transition_to(EscrowState::Refunded)?;
        }
        Ok(account)
    }

    /// Refunds everything left in an account. Returns the refunded amount.
    ///
    /// # Errors
    ///
    /// Fails while the account is disputed or already terminal.
    pub fn refund_all(&mut self, id: &AccountId) -> Result<Coin, EscrowError> {
        let account = self.get_mut(id)?;
        account.ensure_movable()?;
        let amount = account.balance.clone();
        if amount.is_zero() {
            account.transition_to(EscrowState::Refunded)?;
        } else {
            self.refund(id, &amount)?;
        }
        Ok(amount)
    }

    /// Freezes an active account.
    ///
    /// # Errors
    ///
    /// Fails unless the account is Active.
    pub fn dispute(&mut self, id: &AccountId, reason: &str) -> Result<&EscrowAccount, EscrowError> {
        let account = self.get_mut(id)?;
        account.transition_to(EscrowState::Disputed)?;
        account.dispute_reason = Some(reason.to_string());
        Ok(account)
    }

    /// Lifts a dispute, returning the account to Active.
    ///
    /// # Errors
    ///
    /// Fails unless the account is Disputed.
    pub fn resume(&mut self, id: &AccountId) -> Result<&EscrowAccount, EscrowError> {
        let account = self.get_mut(id)?;
        if account.state != EscrowState::Disputed {
            return Err(EscrowError::InvalidTransition {
                account: id.key(),
                from: account.state,
                to: EscrowState::Active,
            });
        }
        account.transition_to(EscrowState::Active)?;
        account.dispute_reason = None;
        Ok(account)
    }

    /// Resolves a dispute in the owner's favour, refunding the balance.
    ///
    /// # Errors
    ///
    /// Fails unless the account is Disputed.
    pub fn resolve_refund(&mut self, id: &AccountId) -> Result<Coin, EscrowError> {
        let account = self.get_mut(id)?;
        if account.state != EscrowState::Disputed {
            return Err(EscrowError::InvalidTransition {
                account: id.key(),
                from: account.state,
                to: EscrowState::Refunded,
            });
        }
        account.state = EscrowState::Active;
        account.dispute_reason = None;
        self.refund_all(id)
    }

    /// Removes an account if it is terminal, empty and has no open payments.
    /// Returns the removed account.
    pub fn prune(&mut self, id: &AccountId) -> Option<EscrowAccount> {
        if self.accounts.get(id).is_some_and(EscrowAccount::is_prunable) {
            debug!(account = %id, "removing settled escrow account");
            self.accounts.remove(id)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use molt_core::coin::DEFAULT_DENOM;
    use molt_core::Wallet;

    fn uve(amount: u128) -> Coin {
        Coin::new(DEFAULT_DENOM, amount)
    }

    fn deployment() -> (Address, AccountId) {
        let owner = Wallet::new().address().clone();
        let id = AccountId::for_order(&OrderId::new(owner.clone(), 7, 1, 1));
        (owner, id)
    }

    fn lease(owner: &Address) -> LeaseId {
        LeaseId::new(
            OrderId::new(owner.clone(), 7, 1, 1),
            Wallet::new().address().clone(),
        )
    }

    fn funded(amount: u128) -> (EscrowLedger, AccountId, Address) {
        let mut ledger = EscrowLedger::new();
        let (owner, id) = deployment();
        ledger
            .deposit(&id, &owner, &Deposit::from_balance(uve(amount)), &SourceSet::default(), 1)
            .unwrap();
        (ledger, id, owner)
    }

    // =========================================================================
    // Ids
    // =========================================================================

    #[test]
    fn account_key_is_scope_slash_xid() {
        let (owner, id) = deployment();
        assert_eq!(id.key(), format!("deployment/{owner}/7/1/1"));
        assert_eq!(id.owner().unwrap(), owner);
    }

    #[test]
    fn deployment_account_is_per_order() {
        let owner = Wallet::new().address().clone();
        let first = AccountId::for_order(&OrderId::new(owner.clone(), 1, 1, 1));
        let second = AccountId::for_order(&OrderId::new(owner.clone(), 1, 2, 1));
        assert_ne!(first, second);
        assert!(AccountId::new(Scope::Deployment, format!("{owner}/1")).is_err());
        assert_eq!(second.key().parse::<AccountId>().unwrap(), second);
    }

    #[test]
    fn bid_account_requires_five_fields() {
        let owner = Wallet::new().address().clone();
        let err = AccountId::new(Scope::Bid, format!("{owner}/1")).unwrap_err();
        assert!(matches!(err, EscrowError::InvalidId(_)));
    }

    #[test]
    fn bid_account_validates_embedded_provider() {
        let owner = Wallet::new().address().clone();
        let err = AccountId::new(Scope::Bid, format!("{owner}/1/1/1/not!an!address")).unwrap_err();
        assert!(matches!(err, EscrowError::InvalidId(_)));
    }

    #[test]
    fn bid_account_roundtrips_through_text() {
        let owner = Wallet::new().address().clone();
        let provider = Wallet::new().address().clone();
        let bid = BidId::new(OrderId::new(owner, 1, 2, 3), provider);
        let id = AccountId::for_bid(&bid);
        assert_eq!(id.key().parse::<AccountId>().unwrap(), id);
    }

    #[test]
    fn payment_key_extends_account_key() {
        let (owner, id) = deployment();
        let lease = lease(&owner);
        let payment = PaymentId::for_lease(&lease);
        assert_eq!(payment.account, id);
        assert_eq!(payment.key(), format!("{}/1/1/{}", id.key(), lease.provider));
    }

    // =========================================================================
    // State machine
    // =========================================================================

    #[test]
    fn valid_transitions() {
        use EscrowState::*;
        assert!(Created.can_transition_to(&Active));
        assert!(Created.can_transition_to(&Refunded));
        assert!(Active.can_transition_to(&Disputed));
        assert!(Active.can_transition_to(&Released));
        assert!(Active.can_transition_to(&Refunded));
        assert!(Disputed.can_transition_to(&Active));
        assert!(Disputed.can_transition_to(&Refunded));
    }

    #[test]
    fn invalid_transitions() {
        use EscrowState::*;
        assert!(!Created.can_transition_to(&Released));
        assert!(!Created.can_transition_to(&Disputed));
        assert!(!Disputed.can_transition_to(&Released));
        for terminal in [Released, Refunded] {
            for target in [Created, Active, Disputed, Released, Refunded] {
                assert!(!terminal.can_transition_to(&target));
            }
        }
    }

    // =========================================================================
    // Ledger operations
    // =========================================================================

    #[test]
    fn first_deposit_opens_account() {
        let (ledger, id, owner) = funded(1000);
        let account = ledger.get(&id).unwrap();
        assert_eq!(account.state, EscrowState::Created);
        assert_eq!(account.balance, uve(1000));
        assert_eq!(account.owner, owner);
    }

    #[test]
    fn repeated_deposits_add() {
        let (mut ledger, id, owner) = funded(1000);
        let deposit = Deposit::from_balance(uve(1000));
        ledger.deposit(&id, &owner, &deposit, &SourceSet::default(), 2).unwrap();
        assert_eq!(ledger.get(&id).unwrap().balance, uve(2000));
    }

    #[test]
    fn deposit_rejects_other_denom() {
        let (mut ledger, id, owner) = funded(1000);
        let deposit = Deposit::from_balance(Coin::new("uakt", 5));
        let err = ledger
            .deposit(&id, &owner, &deposit, &SourceSet::default(), 2)
            .unwrap_err();
        assert!(matches!(err, EscrowError::DenomMismatch { .. }));
    }

    #[test]
    fn deposit_rejects_invalid_sources() {
        let mut ledger = EscrowLedger::new();
        let (owner, id) = deployment();
        let deposit = Deposit::new(uve(5), vec![]);
        let err = ledger
            .deposit(&id, &owner, &deposit, &SourceSet::default(), 1)
            .unwrap_err();
        assert!(matches!(err, EscrowError::InvalidDeposit(_)));
        assert!(ledger.get(&id).is_none());
    }

    #[test]
    fn release_more_than_balance_fails() {
        let (mut ledger, id, owner) = funded(500);
        ledger.activate(&id, &lease(&owner), &uve(10)).unwrap();
        let err = ledger.release(&id, &uve(501)).unwrap_err();
        assert!(matches!(err, EscrowError::InsufficientFunds { .. }));
        assert_eq!(ledger.get(&id).unwrap().balance, uve(500));
    }

    #[test]
    fn partial_release_keeps_account_active() {
        let (mut ledger, id, owner) = funded(500);
        ledger.activate(&id, &lease(&owner), &uve(10)).unwrap();
        let account = ledger.release(&id, &uve(200)).unwrap();
        assert_eq!(account.state, EscrowState::Active);
        assert_eq!(account.balance, uve(300));
        assert_eq!(account.transferred, uve(200));
    }

    #[test]
    fn full_release_is_terminal_and_prunable() {
        let (mut ledger, id, owner) = funded(500);
        let lease = lease(&owner);
        ledger.activate(&id, &lease, &uve(10)).unwrap();
        ledger.release(&id, &uve(500)).unwrap();
        assert_eq!(ledger.get(&id).unwrap().state, EscrowState::Released);
        assert!(ledger.prune(&id).is_none(), "open payment keeps the account");
        ledger.close_payment(&PaymentId::for_lease(&lease)).unwrap();
        assert!(ledger.prune(&id).is_some());
        assert!(ledger.get(&id).is_none());
    }

    #[test]
    fn release_requires_active() {
        let (mut ledger, id, _) = funded(500);
        let err = ledger.release(&id, &uve(1)).unwrap_err();
        assert!(matches!(err, EscrowError::InvalidTransition { .. }));
    }

    #[test]
    fn refund_from_created() {
        let (mut ledger, id, _) = funded(500);
        assert_eq!(ledger.refund_all(&id).unwrap(), uve(500));
        assert_eq!(ledger.get(&id).unwrap().state, EscrowState::Refunded);
        assert!(ledger.prune(&id).is_some());
    }

    #[test]
    fn dispute_freezes_release_and_refund() {
        let (mut ledger, id, owner) = funded(500);
        ledger.activate(&id, &lease(&owner), &uve(10)).unwrap();
        ledger.dispute(&id, "no service").unwrap();

        assert_eq!(ledger.release(&id, &uve(1)).unwrap_err(), EscrowError::Disputed(id.key()));
        assert_eq!(ledger.refund(&id, &uve(1)).unwrap_err(), EscrowError::Disputed(id.key()));
        assert_eq!(ledger.get(&id).unwrap().balance, uve(500));
    }

    #[test]
    fn resume_after_dispute() {
        let (mut ledger, id, owner) = funded(500);
        ledger.activate(&id, &lease(&owner), &uve(10)).unwrap();
        ledger.dispute(&id, "late").unwrap();
        let account = ledger.resume(&id).unwrap();
        assert_eq!(account.state, EscrowState::Active);
        assert!(account.dispute_reason.is_none());
        assert!(ledger.release(&id, &uve(100)).is_ok());
    }

    #[test]
    fn resolve_refund_returns_balance() {
        let (mut ledger, id, owner) = funded(500);
        ledger.activate(&id, &lease(&owner), &uve(10)).unwrap();
        ledger.release(&id, &uve(100)).unwrap();
        ledger.dispute(&id, "late").unwrap();
        assert_eq!(ledger.resolve_refund(&id).unwrap(), uve(400));
        let account = ledger.get(&id).unwrap();
        assert_eq!(account.state, EscrowState::Refunded);
        assert!(account.is_conserved());
    }

    #[test]
    fn withdraw_payment_tracks_withdrawn() {
        let (mut ledger, _, owner) = funded(500);
        let lease = lease(&owner);
        let payment = PaymentId::for_lease(&lease);
        ledger.activate(&payment.account, &lease, &uve(10)).unwrap();
        let account = ledger.withdraw_payment(&payment, &uve(120)).unwrap();
        assert_eq!(account.payments[&payment.pid].withdrawn, uve(120));
        assert_eq!(account.balance, uve(380));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Deposit(u32),
            Release(u32),
            Refund(u32),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0u32..1000).prop_map(Op::Deposit),
                (0u32..1000).prop_map(Op::Release),
                (0u32..1000).prop_map(Op::Refund),
            ]
        }

        proptest! {
            #[test]
            fn balance_is_conserved(ops in prop::collection::vec(op(), 1..40)) {
                let (mut ledger, id, owner) = funded(1);
                ledger.activate(&id, &lease(&owner), &uve(1)).unwrap();
                let (mut deposits, mut releases, mut refunds) = (1u128, 0u128, 0u128);

                for op in ops {
                    if ledger.get(&id).is_none_or(|a| a.state.is_terminal()) {
                        break;
                    }
                    match op {
                        Op::Deposit(n) => {
                            let d = Deposit::from_balance(uve(n.into()));
                            if ledger.deposit(&id, &owner, &d, &SourceSet::default(), 2).is_ok() {
                                deposits += u128::from(n);
                            }
                        }
                        Op::Release(n) => {
                            if ledger.release(&id, &uve(n.into())).is_ok() {
                                releases += u128::from(n);
                            }
                        }
                        Op::Refund(n) => {
                            if ledger.refund(&id, &uve(n.into())).is_ok() {
                                refunds += u128::from(n);
                            }
                        }
                    }
                    let account = ledger.get(&id).unwrap();
                    prop_assert!(account.is_conserved());
                    prop_assert_eq!(account.balance.amount(), deposits - releases - refunds);
                }
            }
        }
    }
}
