//! Settlement engine.
//!
//! A tenant locks funds for an order in a deployment escrow, binds it to the
//! lease once matched, and the provider is paid from it for usage the tenant
//! has acknowledged. Settling an order pays out everything acknowledged,
//! returns the rest and closes the account.

use molt_core::{Address, Coin, LeaseId};
use tracing::{debug, info, warn};

use crate::error::MarketError;
use crate::escrow::{AccountId, EscrowState, PaymentId};
use crate::event::MarketEvent;
use crate::msg::{
    DisputeOutcome, MarketMsg, MsgAcknowledgeUsage, MsgActivateEscrow, MsgClaimRewards,
    MsgCreateEscrow, MsgDisputeEscrow, MsgRecordUsage, MsgRefundEscrow, MsgReleaseEscrow,
    MsgResolveDispute, MsgSettleOrder, MsgWithdrawLease,
};
use crate::orderbook::{LeaseCloseReason, LeaseState};
use crate::state::{Env, MarketState};
use crate::usage::usage_cost;

impl MarketState {
    pub(crate) fn create_escrow(
        &mut self,
        env: &Env<'_>,
        msg: &MsgCreateEscrow,
    ) -> Result<Vec<MarketEvent>, MarketError> {
        if !self.orders.contains_key(&msg.order_id) {
            return Err(MarketError::OrderNotFound(msg.order_id.clone()));
        }
        if msg.sender != msg.order_id.owner {
            return Err(MarketError::Unauthorized(format!(
                "{} does not own order {}",
                msg.sender, msg.order_id
            )));
        }
        let (min, max) = (env.params.min_escrow_duration, env.params.max_escrow_duration);
        if !(min..=max).contains(&msg.expires_in) {
            return Err(MarketError::InvalidEscrow(format!(
                "expires_in {} outside [{min}, {max}]",
                msg.expires_in
            )));
        }
        let escrow_id = msg.escrow_id();
        if self.escrow.get(&escrow_id).is_some() {
            return Err(MarketError::EscrowExists(escrow_id.key()));
        }

        let mut events = Vec::new();
        let deposit = molt_core::Deposit::from_balance(msg.amount.clone());
        let spend = MarketMsg::CreateEscrow(msg.clone());
        self.fund_deposit(env, &spend, &escrow_id, &msg.sender, &deposit, &mut events)?;

        let account = self.escrow.get_mut(&escrow_id)?;
        account.order = Some(msg.order_id.clone());
        account.expires_at = Some(env.block.height.saturating_add(msg.expires_in));
        info!(escrow = %escrow_id, amount = %msg.amount, expires_at = ?account.expires_at, "escrow created");
        Ok(events)
    }

    pub(crate) fn activate_escrow(
        &mut self,
        _env: &Env<'_>,
        msg: &MsgActivateEscrow,
    ) -> Result<Vec<MarketEvent>, MarketError> {
        let account = self
            .escrow
            .get(&msg.escrow_id)
            .ok_or_else(|| MarketError::EscrowNotFound(msg.escrow_id.key()))?;
        if msg.sender != account.owner {
            return Err(MarketError::Unauthorized(format!(
                "{} does not own {}",
                msg.sender,
                msg.escrow_id.key()
            )));
        }
        if account.order.as_ref() != Some(&msg.lease_id.order) {
            return Err(MarketError::InvalidEscrow(format!(
                "{} does not fund the order of lease {}",
                msg.escrow_id.key(),
                msg.lease_id
            )));
        }
        let lease = self
            .leases
            .get(&msg.lease_id)
            .ok_or_else(|| MarketError::LeaseNotFound(msg.lease_id.clone()))?;
        if lease.state == LeaseState::Closed {
            return Err(MarketError::LeaseNotActive(msg.lease_id.clone()));
        }
        let price = lease.price.clone();

        self.escrow.activate(&msg.escrow_id, &msg.lease_id, &price)?;
        info!(escrow = %msg.escrow_id, lease = %msg.lease_id, "escrow active");
        Ok(vec![MarketEvent::EscrowActivated {
            account: msg.escrow_id.clone(),
            lease: msg.lease_id.clone(),
        }])
    }

    pub(crate) fn release_escrow(
        &mut self,
        env: &Env<'_>,
        msg: &MsgReleaseEscrow,
    ) -> Result<Vec<MarketEvent>, MarketError> {
        let account = self
            .escrow
            .get(&msg.escrow_id)
            .ok_or_else(|| MarketError::EscrowNotFound(msg.escrow_id.key()))?;
        if msg.sender != account.owner {
            return Err(MarketError::Unauthorized(format!(
                "{} does not own {}",
                msg.sender,
                msg.escrow_id.key()
            )));
        }
        let Some(lease) = account.lease.clone() else {
            return Err(MarketError::InvalidEscrow(format!(
                "{} is not bound to a lease",
                msg.escrow_id.key()
            )));
        };
        let amount = msg.amount.clone().unwrap_or_else(|| account.balance.clone());

        let mut events = Vec::new();
        self.pay_provider(&lease, &amount, &mut events)?;
        self.close_if_exhausted(env, &msg.escrow_id, &mut events)?;
        Ok(events)
    }

    pub(crate) fn refund_escrow(
        &mut self,
        env: &Env<'_>,
        msg: &MsgRefundEscrow,
    ) -> Result<Vec<MarketEvent>, MarketError> {
        let account = self
            .escrow
            .get(&msg.escrow_id)
            .ok_or_else(|| MarketError::EscrowNotFound(msg.escrow_id.key()))?;
        let allowed = match account.state {
            EscrowState::Created => msg.sender == account.owner,
            EscrowState::Active => account.recipient.as_ref() == Some(&msg.sender),
            _ => true,
        };
        if !allowed {
            return Err(MarketError::Unauthorized(format!(
                "{} may not refund {} while {}",
                msg.sender,
                msg.escrow_id.key(),
                account.state
            )));
        }

        let mut events = Vec::new();
        info!(escrow = %msg.escrow_id, reason = %msg.reason, "escrow refund requested");
        self.refund_escrow_remaining(env, &msg.escrow_id, &mut events)?;
        Ok(events)
    }

    pub(crate) fn dispute_escrow(
        &mut self,
        _env: &Env<'_>,
        msg: &MsgDisputeEscrow,
    ) -> Result<Vec<MarketEvent>, MarketError> {
        let account = self
            .escrow
            .get(&msg.escrow_id)
            .ok_or_else(|| MarketError::EscrowNotFound(msg.escrow_id.key()))?;
        if msg.sender != account.owner && account.recipient.as_ref() != Some(&msg.sender) {
            return Err(MarketError::Unauthorized(format!(
                "{} is not a party to {}",
                msg.sender,
                msg.escrow_id.key()
            )));
        }
        self.escrow.dispute(&msg.escrow_id, &msg.reason)?;
        warn!(escrow = %msg.escrow_id, reason = %msg.reason, "escrow disputed");
        Ok(vec![MarketEvent::EscrowDisputed {
            account: msg.escrow_id.clone(),
            reason: msg.reason.clone(),
        }])
    }

    pub(crate) fn resolve_dispute(
        &mut self,
        env: &Env<'_>,
        msg: &MsgResolveDispute,
    ) -> Result<Vec<MarketEvent>, MarketError> {
        if env.params.dispute_authority.as_ref() != Some(&msg.authority) {
            return Err(MarketError::Unauthorized(format!(
                "{} is not the dispute authority",
                msg.authority
            )));
        }
        let mut events = Vec::new();
        match msg.outcome {
            DisputeOutcome::Resume => {
                self.escrow.resume(&msg.escrow_id)?;
            }
            DisputeOutcome::Refund => {
                let account = self
                    .escrow
                    .get(&msg.escrow_id)
                    .ok_or_else(|| MarketError::EscrowNotFound(msg.escrow_id.key()))?;
                let owner = account.owner.clone();
                let lease = account.lease.clone();
                let amount = self.escrow.resolve_refund(&msg.escrow_id)?;
                self.finish_refund(env, &msg.escrow_id, &owner, amount, lease.as_ref(), &mut events)?;
            }
        }
        info!(escrow = %msg.escrow_id, outcome = ?msg.outcome, "dispute resolved");
        events.push(MarketEvent::EscrowResolved {
            account: msg.escrow_id.clone(),
            outcome: msg.outcome,
        });
        Ok(events)
    }

    pub(crate) fn record_usage(
        &mut self,
        env: &Env<'_>,
        msg: &MsgRecordUsage,
    ) -> Result<Vec<MarketEvent>, MarketError> {
        let lease = self
            .leases
            .get(&msg.lease_id)
            .ok_or_else(|| MarketError::LeaseNotFound(msg.lease_id.clone()))?;
        if lease.state != LeaseState::Active {
            return Err(MarketError::LeaseNotActive(msg.lease_id.clone()));
        }
        if msg.period_end > env.block.time.timestamp() {
            return Err(MarketError::InvalidUsageRecord(format!(
                "period ends at {} after block time {}",
                msg.period_end,
                env.block.time.timestamp()
            )));
        }
        if let Some(last) = self.usage.last_period_end(&msg.lease_id) {
            if msg.period_start < last {
                return Err(MarketError::InvalidUsageRecord(format!(
                    "period starting {} overlaps usage recorded up to {last}",
                    msg.period_start
                )));
            }
        }

        let claim = msg.claim();
        env.verifier
            .verify(&msg.sender, &claim.sign_bytes(), &msg.signature)
            .map_err(|_| MarketError::InvalidSignature)?;

        let value = usage_cost(claim.units, claim.period_secs(), lease.price.amount())
            .map(|amount| Coin::new(lease.price.denom(), amount))
            .ok_or_else(|| MarketError::InvalidAmount("usage value overflows".to_string()))?;

        let id = self.usage.insert(
            claim,
            msg.sender.clone(),
            msg.signature.clone(),
            value.clone(),
            env.block.height,
        );
        debug!(usage = id, lease = %msg.lease_id, units = msg.usage_units, value = %value, "usage recorded");
        Ok(vec![MarketEvent::UsageRecorded {
            usage: id,
            lease: msg.lease_id.clone(),
            value,
        }])
    }

    pub(crate) fn acknowledge_usage(
        &mut self,
        env: &Env<'_>,
        msg: &MsgAcknowledgeUsage,
    ) -> Result<Vec<MarketEvent>, MarketError> {
        let record = self
            .usage
            .get(msg.usage_id)
            .ok_or(MarketError::UsageNotFound(msg.usage_id))?;
        if msg.sender != record.claim.order.owner {
            return Err(MarketError::Unauthorized(format!(
                "{} does not own order {}",
                msg.sender, record.claim.order
            )));
        }
        env.verifier
            .verify(&msg.sender, &record.claim.sign_bytes(), &msg.signature)
            .map_err(|_| MarketError::InvalidSignature)?;
        if record.acknowledged {
            debug!(usage = msg.usage_id, "usage already acknowledged");
            return Ok(Vec::new());
        }

        if let Some(record) = self.usage.get_mut(msg.usage_id) {
            record.acknowledged = true;
        }
        Ok(vec![MarketEvent::UsageAcknowledged {
            usage: msg.usage_id,
        }])
    }

    pub(crate) fn claim_rewards(
        &mut self,
        env: &Env<'_>,
        msg: &MsgClaimRewards,
    ) -> Result<Vec<MarketEvent>, MarketError> {
        let mut events = Vec::new();
        if let Some(lease) = &msg.source {
            self.claim_lease(env, lease, &mut events)?;
            return Ok(events);
        }

        let leases: Vec<LeaseId> = self
            .leases
            .keys()
            .filter(|id| id.provider == msg.sender)
            .filter(|id| !self.usage.billable_ids(id).is_empty())
            .cloned()
            .collect();

        for lease in leases {
            let account = AccountId::for_order(&lease.order);
            let claimable = self
                .escrow
                .get(&account)
                .is_some_and(|a| a.lease.as_ref() == Some(&lease) && a.state == EscrowState::Active);
            if claimable {
                self.claim_lease(env, &lease, &mut events)?;
            } else {
                debug!(lease = %lease, "skipping claim, escrow not claimable");
            }
        }
        Ok(events)
    }

    pub(crate) fn withdraw_lease(
        &mut self,
        env: &Env<'_>,
        msg: &MsgWithdrawLease,
    ) -> Result<Vec<MarketEvent>, MarketError> {
        if !self.leases.contains_key(&msg.lease_id) {
            return Err(MarketError::LeaseNotFound(msg.lease_id.clone()));
        }
        let mut events = Vec::new();
        self.claim_lease(env, &msg.lease_id, &mut events)?;
        Ok(events)
    }

    pub(crate) fn settle_order(
        &mut self,
        env: &Env<'_>,
        msg: &MsgSettleOrder,
    ) -> Result<Vec<MarketEvent>, MarketError> {
        if !self.orders.contains_key(&msg.order_id) {
            return Err(MarketError::OrderNotFound(msg.order_id.clone()));
        }
        let lease = self
            .leases
            .keys()
            .find(|id| id.order == msg.order_id)
            .cloned();
        let is_party = msg.sender == msg.order_id.owner
            || lease.as_ref().is_some_and(|l| l.provider == msg.sender);
        if !is_party {
            return Err(MarketError::Unauthorized(format!(
                "{} is not a party to order {}",
                msg.sender, msg.order_id
            )));
        }

        let escrow_id = msg.escrow_id();
        let account = self
            .escrow
            .get(&escrow_id)
            .ok_or_else(|| MarketError::EscrowNotFound(escrow_id.key()))?;
        if account.order.as_ref() != Some(&msg.order_id) {
            return Err(MarketError::InvalidEscrow(format!(
                "{} does not fund order {}",
                escrow_id.key(),
                msg.order_id
            )));
        }
        let bound = account.lease.clone();

        let mut events = Vec::new();
        let (paid, refunded) = self.settle_escrow(&escrow_id, bound.as_ref(), &mut events)?;
        if let Some(lease) = &lease {
            if self.leases.get(lease).is_some_and(|l| l.state != LeaseState::Closed) {
                self.close_lease_with(env, lease, LeaseCloseReason::Settled, &mut events)?;
            }
        }

        info!(order = %msg.order_id, paid = %paid, refunded = %refunded, "order settled");
        events.push(MarketEvent::OrderSettled {
            order: msg.order_id.clone(),
            paid,
            refunded,
        });
        Ok(events)
    }

    /// Pays every billable usage record of `lease` from its escrow. Fails
    /// without paying anything if the escrow cannot cover the total.
    fn claim_lease(
        &mut self,
        env: &Env<'_>,
        lease: &LeaseId,
        events: &mut Vec<MarketEvent>,
    ) -> Result<(), MarketError> {
        let escrow_id = AccountId::for_order(&lease.order);
        let account = self
            .escrow
            .get(&escrow_id)
            .ok_or_else(|| MarketError::EscrowNotFound(escrow_id.key()))?;
        if account.lease.as_ref() != Some(lease) {
            return Err(MarketError::InvalidEscrow(format!(
                "{} is not bound to lease {lease}",
                escrow_id.key()
            )));
        }

        let records = self.usage.billable_ids(lease);
        let owed = self.sum_usage(&records, account.balance.denom())?;
        if owed.is_zero() {
            return Ok(());
        }
        if owed.amount() > account.balance.amount() {
            return Err(MarketError::EscrowInsufficientBalance {
                account: escrow_id.key(),
                balance: account.balance.to_string(),
                required: owed.to_string(),
            });
        }

        self.pay_provider(lease, &owed, events)?;
        self.mark_claimed(&records);
        events.push(MarketEvent::RewardsClaimed {
            provider: lease.provider.clone(),
            amount: owed,
        });
        self.close_if_exhausted(env, &escrow_id, events)
    }

    /// Terminal reconciliation of an escrow: pays billable usage of the bound
    /// lease (capped at the balance), refunds the rest and removes the account.
    /// Returns `(paid, refunded)`.
    pub(crate) fn settle_escrow(
        &mut self,
        escrow_id: &AccountId,
        lease: Option<&LeaseId>,
        events: &mut Vec<MarketEvent>,
    ) -> Result<(Coin, Coin), MarketError> {
        let account = self
            .escrow
            .get(escrow_id)
            .ok_or_else(|| MarketError::EscrowNotFound(escrow_id.key()))?;
        if account.state == EscrowState::Disputed {
            return Err(crate::escrow::EscrowError::Disputed(escrow_id.key()).into());
        }
        let denom = account.balance.denom().to_string();
        let balance = account.balance.clone();
        let owner = account.owner.clone();
        let state = account.state;

        let mut paid = Coin::zero(&denom);
        if let (Some(lease), EscrowState::Active) = (lease, state) {
            let records = self.usage.billable_ids(lease);
            let owed = self.sum_usage(&records, &denom)?;
            paid = owed.checked_min(&balance)?;
            if owed.amount() > paid.amount() {
                warn!(escrow = %escrow_id, owed = %owed, paid = %paid, "escrow short of acknowledged usage at settlement");
            }
            if !paid.is_zero() {
                self.pay_provider(lease, &paid, events)?;
            }
            self.mark_claimed(&records);
        }
        if let Some(lease) = lease {
            let payment = PaymentId::for_lease(lease);
            if self
                .escrow
                .get(escrow_id)
                .is_some_and(|a| a.payments.contains_key(&payment.pid))
            {
                self.escrow.close_payment(&payment)?;
            }
            let pruned = self.usage.prune_claimed(lease);
            if pruned > 0 {
                debug!(lease = %lease, pruned, "claimed usage records removed");
            }
        }

        let mut refunded = Coin::zero(&denom);
        let terminal = self.escrow.get(escrow_id).is_some_and(|a| a.state.is_terminal());
        if !terminal {
            refunded = self.escrow.refund_all(escrow_id)?;
            self.bank.credit(&owner, &refunded)?;
            if !refunded.is_zero() {
                events.push(MarketEvent::EscrowRefunded {
                    account: escrow_id.clone(),
                    owner,
                    amount: refunded.clone(),
                });
            }
        }
        self.prune_escrow(escrow_id, events);
        Ok((paid, refunded))
    }

    /// Refunds whatever is left in a deployment escrow, closes its payment
    /// and closes the bound lease if it is still running.
    fn refund_escrow_remaining(
        &mut self,
        env: &Env<'_>,
        escrow_id: &AccountId,
        events: &mut Vec<MarketEvent>,
    ) -> Result<(), MarketError> {
        let account = self
            .escrow
            .get(escrow_id)
            .ok_or_else(|| MarketError::EscrowNotFound(escrow_id.key()))?;
        let owner = account.owner.clone();
        let lease = account.lease.clone();
        let amount = self.escrow.refund_all(escrow_id)?;
        self.finish_refund(env, escrow_id, &owner, amount, lease.as_ref(), events)
    }

    fn finish_refund(
        &mut self,
        env: &Env<'_>,
        escrow_id: &AccountId,
        owner: &Address,
        amount: Coin,
        lease: Option<&LeaseId>,
        events: &mut Vec<MarketEvent>,
    ) -> Result<(), MarketError> {
        self.bank.credit(owner, &amount)?;
        events.push(MarketEvent::EscrowRefunded {
            account: escrow_id.clone(),
            owner: owner.clone(),
            amount,
        });
        if let Some(lease) = lease {
            self.escrow.close_payment(&PaymentId::for_lease(lease))?;
        }
        self.prune_escrow(escrow_id, events);

        if let Some(lease) = lease {
            if self.leases.get(lease).is_some_and(|l| l.state != LeaseState::Closed) {
                self.close_lease_with(env, lease, LeaseCloseReason::EscrowRefunded, events)?;
            }
        }
        Ok(())
    }

    /// Releases `amount` from a lease's escrow to its provider.
    fn pay_provider(
        &mut self,
        lease: &LeaseId,
        amount: &Coin,
        events: &mut Vec<MarketEvent>,
    ) -> Result<(), MarketError> {
        let payment = PaymentId::for_lease(lease);
        self.escrow.withdraw_payment(&payment, amount)?;
        self.bank.credit(&lease.provider, amount)?;
        debug!(lease = %lease, amount = %amount, "escrow released to provider");
        events.push(MarketEvent::EscrowReleased {
            account: payment.account,
            recipient: lease.provider.clone(),
            amount: amount.clone(),
        });
        Ok(())
    }

    /// Closes the bound lease once its escrow has been paid out in full.
    fn close_if_exhausted(
        &mut self,
        env: &Env<'_>,
        escrow_id: &AccountId,
        events: &mut Vec<MarketEvent>,
    ) -> Result<(), MarketError> {
        let exhausted = self
            .escrow
            .get(escrow_id)
            .filter(|a| a.state == EscrowState::Released)
            .and_then(|a| a.lease.clone());
        let Some(lease) = exhausted else {
            return Ok(());
        };
        info!(escrow = %escrow_id, lease = %lease, "escrow exhausted");
        if self.leases.get(&lease).is_some_and(|l| l.state != LeaseState::Closed) {
            self.close_lease_with(env, &lease, LeaseCloseReason::InsufficientFunds, events)?;
        } else {
            self.escrow.close_payment(&PaymentId::for_lease(&lease))?;
            self.prune_escrow(escrow_id, events);
        }
        Ok(())
    }

    /// Refunds a deployment escrow that was never activated and has expired.
    pub(crate) fn expire_escrow(
        &mut self,
        env: &Env<'_>,
        escrow_id: &AccountId,
    ) -> Result<Vec<MarketEvent>, MarketError> {
        let account = self
            .escrow
            .get(escrow_id)
            .ok_or_else(|| MarketError::EscrowNotFound(escrow_id.key()))?;
        let expired = account.state == EscrowState::Created
            && account.expires_at.is_some_and(|at| at <= env.block.height);
        if !expired {
            return Ok(Vec::new());
        }
        info!(escrow = %escrow_id, height = env.block.height, "escrow expired before activation");
        let mut events = Vec::new();
        self.refund_escrow_remaining(env, escrow_id, &mut events)?;
        Ok(events)
    }

    /// Deployment escrows that are still waiting for activation past expiry.
    pub(crate) fn expired_escrows(&self, height: u64) -> Vec<AccountId> {
        self.escrow
            .iter()
            .filter(|a| a.state == EscrowState::Created)
            .filter(|a| a.expires_at.is_some_and(|at| at <= height))
            .map(|a| a.id.clone())
            .collect()
    }

    fn sum_usage(&self, records: &[u64], denom: &str) -> Result<Coin, MarketError> {
        records
            .iter()
            .filter_map(|id| self.usage.get(*id))
            .try_fold(Coin::zero(denom), |acc, r| acc.checked_add(&r.value))
            .map_err(MarketError::from)
    }

    fn mark_claimed(&mut self, records: &[u64]) {
        for id in records {
            if let Some(record) = self.usage.get_mut(*id) {
                record.claimed = true;
            }
        }
    }
}
