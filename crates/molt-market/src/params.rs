//! Market module parameters.
//!
//! Parameters are plain data handed to [`crate::Market::new`]; nothing in the
//! market reads process-wide registries.

use std::path::Path;

use molt_core::coin::DEFAULT_DENOM;
use molt_core::{Address, Coin, SourceSet};
use serde::{Deserialize, Serialize};

use crate::error::MarketError;

/// Default bid cap per order.
pub const DEFAULT_MAX_BIDS_PER_ORDER: u32 = 20;

/// Default minimum bid deposit, in micro-units.
pub const DEFAULT_MIN_BID_DEPOSIT: u128 = 500_000;

/// Roughly one year of 6-second blocks.
pub const DEFAULT_MAX_ESCROW_DURATION: u64 = 5_256_000;

/// Tunable market parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketParams {
    /// Maximum open bids per order.
    pub max_bids_per_order: u32,
    /// Minimum deposit backing a bid.
    pub min_bid_deposit: Coin,
    /// Deposit sources the market accepts.
    pub deposit_sources: SourceSet,
    /// Shortest escrow lifetime, in blocks.
    pub min_escrow_duration: u64,
    /// Longest escrow lifetime, in blocks.
    pub max_escrow_duration: u64,
    /// Address allowed to resolve escrow disputes. Disputes cannot be
    /// resolved when unset.
    pub dispute_authority: Option<Address>,
}

impl Default for MarketParams {
    fn default() -> Self {
        Self {
            max_bids_per_order: DEFAULT_MAX_BIDS_PER_ORDER,
            min_bid_deposit: Coin::new(DEFAULT_DENOM, DEFAULT_MIN_BID_DEPOSIT),
            deposit_sources: SourceSet::default(),
            min_escrow_duration: 1,
            max_escrow_duration: DEFAULT_MAX_ESCROW_DURATION,
            dispute_authority: None,
        }
    }
}

impl MarketParams {
    /// Loads parameters from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MarketError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            MarketError::Config(format!(
                "failed to read params file '{}': {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_json(&content)
    }

    /// Parses parameters from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or fails validation.
    pub fn from_json(content: &str) -> Result<Self, MarketError> {
        let params: Self = serde_json::from_str(content)
            .map_err(|e| MarketError::Config(format!("invalid JSON: {e}")))?;
        params.validate()?;
        Ok(params)
    }

    /// Validates the parameters.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::Config` describing the first problem.
    pub fn validate(&self) -> Result<(), MarketError> {
        if self.max_bids_per_order == 0 {
            return Err(MarketError::Config(
                "max_bids_per_order must be greater than 0".to_string(),
            ));
        }
        self.min_bid_deposit
            .validate()
            .map_err(|e| MarketError::Config(format!("min_bid_deposit: {e}")))?;
        if self.deposit_sources.is_empty() {
            return Err(MarketError::Config(
                "deposit_sources cannot be empty".to_string(),
            ));
        }
        if self.min_escrow_duration == 0 {
            return Err(MarketError::Config(
                "min_escrow_duration must be greater than 0".to_string(),
            ));
        }
        if self.min_escrow_duration > self.max_escrow_duration {
            return Err(MarketError::Config(format!(
                "min_escrow_duration ({}) exceeds max_escrow_duration ({})",
                self.min_escrow_duration, self.max_escrow_duration
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use molt_core::{DepositSource, Wallet};

    #[test]
    fn defaults_are_valid() {
        let params = MarketParams::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.max_bids_per_order, 20);
        assert_eq!(params.min_bid_deposit.to_string(), "500000uve");
    }

    #[test]
    fn empty_json_uses_defaults() {
        let params = MarketParams::from_json("{}").unwrap();
        assert_eq!(params, MarketParams::default());
    }

    #[test]
    fn json_overrides() {
        let authority = Wallet::new().address().clone();
        let json = format!(
            r#"{{
                "max_bids_per_order": 5,
                "min_bid_deposit": "10uve",
                "deposit_sources": ["balance"],
                "dispute_authority": "{authority}"
            }}"#
        );
        let params = MarketParams::from_json(&json).unwrap();
        assert_eq!(params.max_bids_per_order, 5);
        assert_eq!(params.min_bid_deposit.amount(), 10);
        assert!(params.deposit_sources.contains(DepositSource::Balance));
        assert!(!params.deposit_sources.contains(DepositSource::Grant));
        assert_eq!(params.dispute_authority, Some(authority));
    }

    #[test]
    fn rejects_zero_max_bids() {
        let err = MarketParams::from_json(r#"{"max_bids_per_order": 0}"#).unwrap_err();
        assert!(matches!(err, MarketError::Config(_)));
    }

    #[test]
    fn rejects_empty_sources() {
        let err = MarketParams::from_json(r#"{"deposit_sources": []}"#).unwrap_err();
        assert!(matches!(err, MarketError::Config(_)));
    }

    #[test]
    fn rejects_inverted_escrow_bounds() {
        let params = MarketParams {
            min_escrow_duration: 10,
            max_escrow_duration: 5,
            ..MarketParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            MarketParams::from_json("{not json"),
            Err(MarketError::Config(_))
        ));
    }

    #[test]
    fn from_file_reports_missing_path() {
        let err = MarketParams::from_file("/nonexistent/market.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/market.json"));
    }
}
