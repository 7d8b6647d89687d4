//! Bid pricing.
//!
//! A provider prices an order from the hourly cost of the resources it asks
//! for, then applies a markup. All arithmetic is integer; partial units round
//! up so the provider never quotes below cost.

use molt_core::coin::DEFAULT_DENOM;
use molt_core::{Coin, ResourceSpec};
use serde::{Deserialize, Serialize};

const MILLIS_PER_CORE: u128 = 1000;
const BYTES_PER_GIB: u128 = 1024 * 1024 * 1024;

/// Pricing strategy for bid calculation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingStrategy {
    /// 20% over cost.
    #[default]
    FixedMarkup,
    /// 10% over cost when idle, rising linearly to 100% when full.
    UtilizationBased,
}

impl PricingStrategy {
    /// Marks up `base_cost` for the current utilization (0 to 100).
    ///
    /// Returns `None` on overflow.
    #[must_use]
    pub const fn calculate_price(&self, base_cost: u128, utilization_percent: u8) -> Option<u128> {
        let percent = match self {
            Self::FixedMarkup => 120,
            Self::UtilizationBased => {
                let util = if utilization_percent > 100 {
                    100
                } else {
                    utilization_percent as u128
                };
                110 + util * 90 / 100
            }
        };
        match base_cost.checked_mul(percent) {
            Some(scaled) => Some(scaled.div_ceil(100)),
            None => None,
        }
    }
}

/// Hourly cost of each resource dimension, in the smallest unit of `denom`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceCosts {
    /// Per CPU core.
    pub cpu_core: u128,
    /// Per GiB of memory.
    pub memory_gib: u128,
    /// Per GiB of storage.
    pub storage_gib: u128,
    /// Per GPU.
    pub gpu: u128,
}

impl Default for ResourceCosts {
    fn default() -> Self {
        Self {
            cpu_core: 10,
            memory_gib: 5,
            storage_gib: 1,
            gpu: 500,
        }
    }
}

impl ResourceCosts {
    /// Hourly cost of `resources`. Returns `None` on overflow.
    #[must_use]
    pub fn cost_of(&self, resources: &ResourceSpec) -> Option<u128> {
        let cpu = u128::from(resources.cpu_millis)
            .checked_mul(self.cpu_core)?
            .div_ceil(MILLIS_PER_CORE);
        let memory = u128::from(resources.memory_bytes)
            .checked_mul(self.memory_gib)?
            .div_ceil(BYTES_PER_GIB);
        let storage = u128::from(resources.storage_bytes)
            .checked_mul(self.storage_gib)?
            .div_ceil(BYTES_PER_GIB);
        let gpu = u128::from(resources.gpus).checked_mul(self.gpu)?;
        cpu.checked_add(memory)?.checked_add(storage)?.checked_add(gpu)
    }
}

/// How the provider prices bids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Markup strategy.
    pub strategy: PricingStrategy,
    /// Resource costs.
    pub costs: ResourceCosts,
    /// Denomination of bid prices.
    pub denom: String,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            strategy: PricingStrategy::default(),
            costs: ResourceCosts::default(),
            denom: DEFAULT_DENOM.to_string(),
        }
    }
}

impl PricingConfig {
    /// Bid price for `resources` at the given utilization. Never zero.
    /// Returns `None` on overflow.
    #[must_use]
    pub fn quote(&self, resources: &ResourceSpec, utilization_percent: u8) -> Option<Coin> {
        let cost = self.costs.cost_of(resources)?;
        let price = self.strategy.calculate_price(cost, utilization_percent)?.max(1);
        Some(Coin::new(self.denom.clone(), price))
    }
}
