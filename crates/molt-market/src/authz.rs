//! Deposit authorizations.
//!
//! An owner (granter) can let another address (grantee) fund escrow deposits
//! from the owner's balance, capped by a spend limit and restricted to a set
//! of escrow scopes. Accepting a spend never mutates the authorization; it
//! returns the updated authorization and a delete flag, and the
//! [`GrantStore`] persists or removes it accordingly.

use std::collections::{BTreeMap, BTreeSet};

use molt_core::{Address, Coin};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::escrow::Scope;
use crate::msg::MarketMsg;

/// Errors raised when evaluating an authorization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthzError {
    /// Spend exceeds the remaining limit.
    #[error("insufficient funds: limit {limit}, requested {requested}")]
    InsufficientFunds {
        /// Remaining limit.
        limit: Coin,
        /// Requested spend.
        requested: Coin,
    },

    /// The message is not a spend message.
    #[error("message type {0} is not a deposit spend")]
    InvalidType(&'static str),

    /// The authorization does not cover this scope.
    #[error("authorization does not cover {0} deposits")]
    Unauthorized(Scope),

    /// Spend denomination differs from the limit's.
    #[error("denomination mismatch: limit in {limit}, spend in {requested}")]
    DenomMismatch {
        /// Limit denomination.
        limit: String,
        /// Spend denomination.
        requested: String,
    },

    /// The authorization itself is malformed.
    #[error("invalid authorization: {0}")]
    Invalid(String),

    /// No authorization from granter to grantee.
    #[error("no deposit authorization from {granter} to {grantee}")]
    NotFound {
        /// Granting owner.
        granter: Address,
        /// Authorized spender.
        grantee: Address,
    },
}

/// Result of accepting a spend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptResponse {
    /// True when the limit reached zero and the authorization should be removed.
    pub delete: bool,
    /// The authorization with its limit reduced by the spend.
    pub updated: DepositAuthorization,
}

/// A capped permission to fund deposits on the granter's behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositAuthorization {
    /// Remaining amount that may be spent.
    pub spend_limit: Coin,
    /// Escrow scopes the authorization covers.
    pub scopes: BTreeSet<Scope>,
}

impl DepositAuthorization {
    /// Creates an authorization.
    pub fn new(spend_limit: Coin, scopes: impl IntoIterator<Item = Scope>) -> Self {
        Self {
            spend_limit,
            scopes: scopes.into_iter().collect(),
        }
    }

    /// Checks the limit is a valid coin and at least one scope is covered.
    ///
    /// # Errors
    ///
    /// Returns `AuthzError::Invalid`.
    pub fn validate(&self) -> Result<(), AuthzError> {
        self.spend_limit
            .validate()
            .map_err(|e| AuthzError::Invalid(e.to_string()))?;
        if self.scopes.is_empty() {
            return Err(AuthzError::Invalid("no scopes".to_string()));
        }
        Ok(())
    }

    /// Returns the escrow scope and amount a message spends.
    ///
    /// # Errors
    ///
    /// Returns `AuthzError::InvalidType` for messages that do not fund a deposit.
    pub fn spend_of(msg: &MarketMsg) -> Result<(Scope, &Coin), AuthzError> {
        match msg {
            MarketMsg::AccountDeposit(m) => Ok((m.account_id.scope, &m.deposit.amount)),
            MarketMsg::CreateBid(m) => Ok((Scope::Bid, &m.deposit.amount)),
            MarketMsg::CreateEscrow(m) => Ok((Scope::Deployment, &m.amount)),
            MarketMsg::CreateOrder(_)
            | MarketMsg::CloseOrder(_)
            | MarketMsg::CloseBid(_)
            | MarketMsg::CreateLease(_)
            | MarketMsg::ManifestReceived(_)
            | MarketMsg::CloseLease(_)
            | MarketMsg::WithdrawLease(_)
            | MarketMsg::ActivateEscrow(_)
            | MarketMsg::ReleaseEscrow(_)
            | MarketMsg::RefundEscrow(_)
            | MarketMsg::DisputeEscrow(_)
            | MarketMsg::ResolveDispute(_)
            | MarketMsg::RecordUsage(_)
            | MarketMsg::AcknowledgeUsage(_)
            | MarketMsg::ClaimRewards(_)
            | MarketMsg::SettleOrder(_) => Err(AuthzError::InvalidType(msg.type_name())),
        }
    }

    /// Evaluates a message against this authorization.
    ///
    /// # Errors
    ///
    /// See [`DepositAuthorization::authorize_spend`]; also `InvalidType` for
    /// non-spend messages.
    pub fn accept(&self, msg: &MarketMsg) -> Result<AcceptResponse, AuthzError> {
        let (scope, amount) = Self::spend_of(msg)?;
        self.authorize_spend(scope, amount)
    }

    /// Accepts a spend of `amount` in `scope`, returning the reduced
    /// authorization. `delete` is set when the limit reaches exactly zero.
    ///
    /// # Errors
    ///
    /// - `Unauthorized` if `scope` is not covered
    /// - `DenomMismatch` if `amount` is in another denomination
    /// - `InsufficientFunds` if `amount` exceeds the limit
    pub fn authorize_spend(&self, scope: Scope, amount: &Coin) -> Result<AcceptResponse, AuthzError> {
        if !self.scopes.contains(&scope) {
            return Err(AuthzError::Unauthorized(scope));
        }
        if !amount.same_denom(&self.spend_limit) {
            return Err(AuthzError::DenomMismatch {
                limit: self.spend_limit.denom().to_string(),
                requested: amount.denom().to_string(),
            });
        }
        let remaining =
            self.spend_limit
                .checked_sub(amount)
                .map_err(|_| AuthzError::InsufficientFunds {
                    limit: self.spend_limit.clone(),
                    requested: amount.clone(),
                })?;

        Ok(AcceptResponse {
            delete: remaining.is_zero(),
            updated: Self {
                spend_limit: remaining,
                scopes: self.scopes.clone(),
            },
        })
    }
}

/// Authorizations keyed by (granter, grantee).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantStore {
    grants: BTreeMap<(Address, Address), DepositAuthorization>,
}

impl GrantStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an authorization, replacing any existing one.
    ///
    /// # Errors
    ///
    /// Returns `AuthzError::Invalid` for a malformed authorization or a
    /// self-grant.
    pub fn grant(
        &mut self,
        granter: Address,
        grantee: Address,
        authorization: DepositAuthorization,
    ) -> Result<(), AuthzError> {
        authorization.validate()?;
        if granter == grantee {
            return Err(AuthzError::Invalid("granter and grantee are the same".to_string()));
        }
        debug!(granter = %granter, grantee = %grantee, limit = %authorization.spend_limit, "deposit authorization granted");
        self.grants.insert((granter, grantee), authorization);
        Ok(())
    }

    /// Removes an authorization. Returns it if one existed.
    pub fn revoke(&mut self, granter: &Address, grantee: &Address) -> Option<DepositAuthorization> {
        self.grants.remove(&(granter.clone(), grantee.clone()))
    }

    /// Looks up an authorization.
    #[must_use]
    pub fn get(&self, granter: &Address, grantee: &Address) -> Option<&DepositAuthorization> {
        self.grants.get(&(granter.clone(), grantee.clone()))
    }

    /// Granters holding an authorization for `grantee`, in address order.
    #[must_use]
    pub fn granters_of(&self, grantee: &Address) -> Vec<Address> {
        self.grants
            .keys()
            .filter(|(_, g)| g == grantee)
            .map(|(granter, _)| granter.clone())
            .collect()
    }

    /// Spends against an authorization, persisting the reduced limit or
    /// deleting the authorization once exhausted.
    ///
    /// # Errors
    ///
    /// `NotFound` if there is no authorization, otherwise as
    /// [`DepositAuthorization::authorize_spend`].
    pub fn spend(
        &mut self,
        granter: &Address,
        grantee: &Address,
        scope: Scope,
        amount: &Coin,
    ) -> Result<AcceptResponse, AuthzError> {
        let key = (granter.clone(), grantee.clone());
        let authorization = self.grants.get(&key).ok_or_else(|| AuthzError::NotFound {
            granter: granter.clone(),
            grantee: grantee.clone(),
        })?;
        let response = authorization.authorize_spend(scope, amount)?;
        if response.delete {
            debug!(granter = %granter, grantee = %grantee, "deposit authorization exhausted");
            self.grants.remove(&key);
        } else {
            self.grants.insert(key, response.updated.clone());
        }
        Ok(response)
    }
}
