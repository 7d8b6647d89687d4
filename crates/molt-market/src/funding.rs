//! Drawing deposits from their sources and returning bid deposits.

use molt_core::{Address, BidId, Coin, Deposit, DepositError, DepositSource};
use tracing::debug;

use crate::authz::DepositAuthorization;
use crate::error::MarketError;
use crate::escrow::{AccountId, Scope};
use crate::event::MarketEvent;
use crate::msg::{MarketMsg, MsgAccountDeposit};
use crate::state::{Env, MarketState};

impl MarketState {
    /// Draws `deposit` from its sources in order and credits `account`.
    ///
    /// `balance` debits the signer. `grant` spends authorizations granted to
    /// the signer and debits their granters. Sources that cannot
    /// contribute are skipped; any shortfall fails the whole deposit.
    pub(crate) fn fund_deposit(
        &mut self,
        env: &Env<'_>,
        msg: &MarketMsg,
        account: &AccountId,
        signer: &Address,
        deposit: &Deposit,
        events: &mut Vec<MarketEvent>,
    ) -> Result<(), MarketError> {
        deposit.validate(&env.params.deposit_sources)?;
        let owner = account.owner()?;
        let (scope, _) = DepositAuthorization::spend_of(msg)?;

        let mut remaining = deposit.amount.clone();
        for &source in &deposit.sources {
            if remaining.is_zero() {
                break;
            }
            let drawn = match source {
                DepositSource::Balance => {
                    let take = self.bank.balance(signer, remaining.denom()).checked_min(&remaining)?;
                    self.bank.debit(signer, &take)?;
                    take
                }
                DepositSource::Grant => self.draw_grants(&owner, signer, scope, &remaining)?,
                DepositSource::Unspecified => {
                    return Err(DepositError::InvalidSource(source).into());
                }
            };
            debug!(account = %account, %source, amount = %drawn, "deposit drawn");
            remaining = remaining.checked_sub(&drawn)?;
        }

        if !remaining.is_zero() {
            return Err(MarketError::InsufficientFunds {
                address: signer.to_string(),
                available: deposit.amount.checked_sub(&remaining)?,
                required: deposit.amount.clone(),
            });
        }

        self.escrow.deposit(
            account,
            &owner,
            deposit,
            &env.params.deposit_sources,
            env.block.height,
        )?;
        events.push(MarketEvent::EscrowDeposited {
            account: account.clone(),
            amount: deposit.amount.clone(),
        });
        Ok(())
    }

    /// Spends grants made to `signer` until `remaining` is covered or they
    /// run dry, debiting each granter. The account owner's grant is tried
    /// first, then the others in granter address order.
    fn draw_grants(
        &mut self,
        owner: &Address,
        signer: &Address,
        scope: Scope,
        remaining: &Coin,
    ) -> Result<Coin, MarketError> {
        let mut granters = self.grants.granters_of(signer);
        if let Some(pos) = granters.iter().position(|g| g == owner) {
            let first = granters.remove(pos);
            granters.insert(0, first);
        }

        let mut drawn = Coin::zero(remaining.denom());
        for granter in granters {
            let left = remaining.checked_sub(&drawn)?;
            if left.is_zero() {
                break;
            }
            let Some(take) = self.grant_allowance(&granter, signer, scope, &left)? else {
                continue;
            };
            self.grants.spend(&granter, signer, scope, &take)?;
            self.bank.debit(&granter, &take)?;
            debug!(granter = %granter, grantee = %signer, amount = %take, "grant spent");
            drawn = drawn.checked_add(&take)?;
        }
        Ok(drawn)
    }

    /// How much the grant from `granter` to `grantee` can contribute, bounded
    /// by the granter's balance. `None` when it cannot contribute anything.
    fn grant_allowance(
        &self,
        granter: &Address,
        grantee: &Address,
        scope: Scope,
        remaining: &Coin,
    ) -> Result<Option<Coin>, MarketError> {
        let Some(grant) = self.grants.get(granter, grantee) else {
            return Ok(None);
        };
        if !grant.scopes.contains(&scope) || !grant.spend_limit.same_denom(remaining) {
            return Ok(None);
        }
        let take = grant
            .spend_limit
            .checked_min(remaining)?
            .checked_min(&self.bank.balance(granter, remaining.denom()))?;
        Ok((!take.is_zero()).then_some(take))
    }

    /// Returns everything left in a bid's deposit account to the provider.
    pub(crate) fn refund_bid_deposit(
        &mut self,
        bid: &BidId,
        events: &mut Vec<MarketEvent>,
    ) -> Result<(), MarketError> {
        let account = AccountId::for_bid(bid);
        if self.escrow.get(&account).is_none() {
            return Ok(());
        }
        let amount = self.escrow.refund_all(&account)?;
        self.bank.credit(&bid.provider, &amount)?;
        events.push(MarketEvent::EscrowRefunded {
            account: account.clone(),
            owner: bid.provider.clone(),
            amount,
        });
        self.prune_escrow(&account, events);
        Ok(())
    }

    /// Removes a settled account and records its final state.
    pub(crate) fn prune_escrow(&mut self, account: &AccountId, events: &mut Vec<MarketEvent>) {
        if let Some(closed) = self.escrow.prune(account) {
            events.push(MarketEvent::EscrowClosed {
                account: closed.id,
                state: closed.state,
            });
        }
    }

    pub(crate) fn account_deposit(
        &mut self,
        env: &Env<'_>,
        msg: &MsgAccountDeposit,
    ) -> Result<Vec<MarketEvent>, MarketError> {
        if self.escrow.get(&msg.account_id).is_none() {
            return Err(MarketError::EscrowNotFound(msg.account_id.key()));
        }
        let mut events = Vec::new();
        let spend = MarketMsg::AccountDeposit(msg.clone());
        self.fund_deposit(env, &spend, &msg.account_id, &msg.signer, &msg.deposit, &mut events)?;
        Ok(events)
    }
}
