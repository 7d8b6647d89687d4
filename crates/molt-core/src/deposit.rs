//! Deposits backing bids and deployments.
//!
//! A [`Deposit`] names an amount and the ordered list of sources it may be
//! drawn from. Validation is a pure function of the deposit and the set of
//! sources the marketplace accepts.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Coin;

/// Where deposit funds come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositSource {
    /// Wire default when no source was set. Never accepted.
    Unspecified,
    /// The owner's spendable balance.
    Balance,
    /// A deposit authorization granted to the sender by the owner.
    Grant,
}

impl fmt::Display for DepositSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unspecified => write!(f, "unspecified"),
            Self::Balance => write!(f, "balance"),
            Self::Grant => write!(f, "grant"),
        }
    }
}

/// The set of deposit sources the marketplace accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceSet(BTreeSet<DepositSource>);

impl SourceSet {
    /// Creates a set from the given sources.
    pub fn new(sources: impl IntoIterator<Item = DepositSource>) -> Self {
        Self(sources.into_iter().collect())
    }

    /// Returns true if `source` is accepted.
    #[must_use]
    pub fn contains(&self, source: DepositSource) -> bool {
        self.0.contains(&source)
    }

    /// Returns true if no source is accepted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for SourceSet {
    fn default() -> Self {
        Self::new([DepositSource::Balance, DepositSource::Grant])
    }
}

/// Reasons a deposit fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DepositError {
    /// No sources listed.
    #[error("deposit has no sources")]
    EmptySources,

    /// A listed source is not accepted.
    #[error("invalid deposit source: {0}")]
    InvalidSource(DepositSource),

    /// The same source kind is listed twice.
    #[error("duplicate deposit source: {0}")]
    DuplicateSource(DepositSource),

    /// The amount is malformed.
    #[error("invalid deposit amount: {0}")]
    InvalidAmount(String),
}

/// Funds backing a deposit-bearing action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    /// Amount to lock.
    pub amount: Coin,
    /// Sources to draw from, in order of preference.
    pub sources: Vec<DepositSource>,
}

impl Deposit {
    /// Creates a deposit.
    #[must_use]
    pub const fn new(amount: Coin, sources: Vec<DepositSource>) -> Self {
        Self { amount, sources }
    }

    /// Creates a deposit drawn from the owner's balance only.
    #[must_use]
    pub fn from_balance(amount: Coin) -> Self {
        Self::new(amount, vec![DepositSource::Balance])
    }

    /// Validates the deposit against the accepted sources.
    ///
    /// # Errors
    ///
    /// Returns the first violation found, checking sources before the amount.
    pub fn validate(&self, accepted: &SourceSet) -> Result<(), DepositError> {
        if self.sources.is_empty() {
            return Err(DepositError::EmptySources);
        }

        let mut seen = BTreeSet::new();
        for &source in &self.sources {
            if source == DepositSource::Unspecified || !accepted.contains(source) {
                return Err(DepositError::InvalidSource(source));
            }
            if !seen.insert(source) {
                return Err(DepositError::DuplicateSource(source));
            }
        }

        self.amount
            .validate()
            .map_err(|e| DepositError::InvalidAmount(e.to_string()))
    }
}
