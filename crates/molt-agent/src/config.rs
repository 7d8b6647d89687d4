//! Provider configuration.

use std::path::Path;
use std::time::Duration;

use molt_core::coin::DEFAULT_DENOM;
use molt_core::{Address, Coin, Deposit, ResourceSpec};
use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::strategy::PricingConfig;

/// Default time a pending lease waits for its manifest.
pub const DEFAULT_BID_TIMEOUT_SECS: u64 = 300;

/// Provider agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// The provider's on-chain address.
    pub provider: Address,
    /// Seconds a pending lease waits for its manifest before the bid is
    /// closed.
    #[serde(default = "default_bid_timeout_secs")]
    pub bid_timeout_secs: u64,
    /// Cluster capacity offered to the market.
    pub capacity: ResourceSpec,
    /// Pricing.
    #[serde(default)]
    pub pricing: PricingConfig,
    /// Deposit attached to every bid.
    #[serde(default = "default_bid_deposit")]
    pub bid_deposit: Deposit,
}

const fn default_bid_timeout_secs() -> u64 {
    DEFAULT_BID_TIMEOUT_SECS
}

fn default_bid_deposit() -> Deposit {
    Deposit::from_balance(Coin::new(DEFAULT_DENOM, 500_000))
}

impl ProviderConfig {
    /// Creates a configuration with default timeout, pricing and deposit.
    #[must_use]
    pub fn new(provider: Address, capacity: ResourceSpec) -> Self {
        Self {
            provider,
            bid_timeout_secs: DEFAULT_BID_TIMEOUT_SECS,
            capacity,
            pricing: PricingConfig::default(),
            bid_deposit: default_bid_deposit(),
        }
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            AgentError::Config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or fails validation.
    pub fn from_json(content: &str) -> Result<Self, AgentError> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| AgentError::Config(format!("invalid JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Watchdog deadline.
    #[must_use]
    pub const fn bid_timeout(&self) -> Duration {
        Duration::from_secs(self.bid_timeout_secs)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.bid_timeout_secs == 0 {
            return Err(AgentError::Config("bid_timeout_secs must be positive".to_string()));
        }
        if self.capacity.is_zero() {
            return Err(AgentError::Config("capacity cannot be zero".to_string()));
        }
        if !molt_core::coin::is_valid_denom(&self.pricing.denom) {
            return Err(AgentError::Config(format!(
                "invalid pricing denom '{}'",
                self.pricing.denom
            )));
        }
        self.bid_deposit
            .amount
            .validate()
            .map_err(|e| AgentError::Config(format!("bid_deposit: {e}")))?;
        if self.bid_deposit.amount.is_zero() || self.bid_deposit.sources.is_empty() {
            return Err(AgentError::Config(
                "bid_deposit needs a positive amount and at least one source".to_string(),
            ));
        }
        Ok(())
    }
}
