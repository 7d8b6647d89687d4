//! Spendable balances.

use std::collections::BTreeMap;

use molt_core::{Address, Coin};
use serde::{Deserialize, Serialize};

use crate::error::MarketError;

/// Spendable balances per address and denomination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bank {
    balances: BTreeMap<Address, BTreeMap<String, u128>>,
}

impl Bank {
    /// Creates an empty bank.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the spendable balance of `address` in `denom`.
    #[must_use]
    pub fn balance(&self, address: &Address, denom: &str) -> Coin {
        let amount = self
            .balances
            .get(address)
            .and_then(|coins| coins.get(denom))
            .copied()
            .unwrap_or(0);
        Coin::new(denom, amount)
    }

    /// Sum of all balances in `denom`.
    #[must_use]
    pub fn total(&self, denom: &str) -> u128 {
        self.balances
            .values()
            .filter_map(|coins| coins.get(denom))
            .sum()
    }

    /// Adds `coin` to `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if the coin is malformed or the balance would overflow.
    pub fn credit(&mut self, address: &Address, coin: &Coin) -> Result<(), MarketError> {
        coin.validate()?;
        if coin.is_zero() {
            return Ok(());
        }
        let slot = self
            .balances
            .entry(address.clone())
            .or_default()
            .entry(coin.denom().to_string())
            .or_insert(0);
        *slot = slot
            .checked_add(coin.amount())
            .ok_or_else(|| MarketError::InvalidAmount(format!("balance overflow for {address}")))?;
        Ok(())
    }

    /// Removes `coin` from `address`.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::InsufficientFunds` if the balance is too low.
    pub fn debit(&mut self, address: &Address, coin: &Coin) -> Result<(), MarketError> {
        coin.validate()?;
        if coin.is_zero() {
            return Ok(());
        }
        let available = self.balance(address, coin.denom());
        let remaining = available
            .amount()
            .checked_sub(coin.amount())
            .ok_or_else(|| MarketError::InsufficientFunds {
                address: address.to_string(),
                available: available.clone(),
                required: coin.clone(),
            })?;

        if let Some(coins) = self.balances.get_mut(address) {
            if remaining == 0 {
                coins.remove(coin.denom());
            } else {
                coins.insert(coin.denom().to_string(), remaining);
            }
            if coins.is_empty() {
                self.balances.remove(address);
            }
        }
        Ok(())
    }
}
