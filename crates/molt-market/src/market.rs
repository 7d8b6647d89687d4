//! The market: applies messages to [`MarketState`] atomically.
//!
//! Each message runs against a copy of the state and is committed only when
//! its handler succeeds, so a failed message leaves no partial effects.
//! Block-level work (matching open orders, expiring escrows) runs one
//! transaction per item so one bad item does not hold up the rest.

use std::sync::Arc;

use molt_core::{Address, Coin, Ed25519Verifier, SignatureVerifier};
use tracing::{debug, info, warn};

use crate::authz::DepositAuthorization;
use crate::error::MarketError;
use crate::event::MarketEvent;
use crate::msg::MarketMsg;
use crate::params::MarketParams;
use crate::state::{BlockContext, Env, MarketState};

/// Market module.
#[derive(Debug, Clone)]
pub struct Market {
    params: MarketParams,
    verifier: Arc<dyn SignatureVerifier>,
    state: MarketState,
}

impl Market {
    /// Creates an empty market verifying Ed25519 signatures.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::Config` if the parameters are invalid.
    pub fn new(params: MarketParams) -> Result<Self, MarketError> {
        Self::with_verifier(params, Arc::new(Ed25519Verifier))
    }

    /// Creates an empty market with a custom signature verifier.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::Config` if the parameters are invalid.
    pub fn with_verifier(
        params: MarketParams,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Result<Self, MarketError> {
        params.validate()?;
        info!(
            max_bids_per_order = params.max_bids_per_order,
            min_bid_deposit = %params.min_bid_deposit,
            "market initialized"
        );
        Ok(Self {
            params,
            verifier,
            state: MarketState::default(),
        })
    }

    /// Module parameters.
    #[must_use]
    pub const fn params(&self) -> &MarketParams {
        &self.params
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &MarketState {
        &self.state
    }

    /// Mints `coin` into an address's balance (genesis and tests).
    ///
    /// # Errors
    ///
    /// Fails for an invalid coin or on overflow.
    pub fn fund(&mut self, address: &Address, coin: &Coin) -> Result<(), MarketError> {
        coin.validate()?;
        self.state.bank.credit(address, coin)
    }

    /// Lets `grantee` draw deposits from `granter`'s balance.
    ///
    /// # Errors
    ///
    /// Fails for an invalid authorization or a self-grant.
    pub fn grant(
        &mut self,
        granter: Address,
        grantee: Address,
        authorization: DepositAuthorization,
    ) -> Result<(), MarketError> {
        self.state.grants.grant(granter, grantee, authorization)?;
        Ok(())
    }

    /// Removes a deposit authorization.
    pub fn revoke(&mut self, granter: &Address, grantee: &Address) -> Option<DepositAuthorization> {
        self.state.grants.revoke(granter, grantee)
    }

    /// Applies one message. On error the state is unchanged.
    ///
    /// # Errors
    ///
    /// Returns the first stateless or stateful check that failed.
    pub fn deliver(
        &mut self,
        block: &BlockContext,
        msg: impl Into<MarketMsg>,
    ) -> Result<Vec<MarketEvent>, MarketError> {
        let msg = msg.into();
        let kind = msg.type_name();
        msg.validate_basic()?;
        match self.transact(block, |state, env| state.apply(env, &msg)) {
            Ok(events) => {
                debug!(msg = kind, signer = %msg.signer(), height = block.height, events = events.len(), "message applied");
                Ok(events)
            }
            Err(e) => {
                debug!(msg = kind, signer = %msg.signer(), height = block.height, error = %e, "message rejected");
                Err(e)
            }
        }
    }

    /// Matches every open order that has bids to its best bid.
    pub fn match_open_orders(&mut self, block: &BlockContext) -> Vec<MarketEvent> {
        let winners = self.state.matchable_orders();
        let mut events = Vec::new();
        for bid in winners {
            match self.transact(block, |state, env| state.accept_bid(env, &bid)) {
                Ok(mut matched) => events.append(&mut matched),
                Err(e) => warn!(bid = %bid, error = %e, "failed to match order"),
            }
        }
        events
    }

    /// Refunds deployment escrows that expired before activation.
    pub fn expire_escrows(&mut self, block: &BlockContext) -> Vec<MarketEvent> {
        let expired = self.state.expired_escrows(block.height);
        let mut events = Vec::new();
        for account in expired {
            match self.transact(block, |state, env| state.expire_escrow(env, &account)) {
                Ok(mut refunded) => events.append(&mut refunded),
                Err(e) => warn!(account = %account, error = %e, "failed to expire escrow"),
            }
        }
        events
    }

    fn transact<F>(&mut self, block: &BlockContext, f: F) -> Result<Vec<MarketEvent>, MarketError>
    where
        F: FnOnce(&mut MarketState, &Env<'_>) -> Result<Vec<MarketEvent>, MarketError>,
    {
        let env = Env {
            block,
            params: &self.params,
            verifier: self.verifier.as_ref(),
        };
        let mut next = self.state.clone();
        let events = f(&mut next, &env)?;
        self.state = next;
        Ok(events)
    }
}
