//! Usage records reported by providers against leases.

use std::collections::BTreeMap;
use std::fmt;

use molt_core::{Address, Coin, LeaseId, OrderId};
use serde::{Deserialize, Serialize};

/// Sequential usage record id.
pub type UsageId = u64;

/// Seconds per hour, the unit lease prices are quoted in.
pub const SECONDS_PER_HOUR: u128 = 3600;

/// Kind of resource a usage record measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageType {
    /// CPU time.
    Compute,
    /// Memory residency.
    Memory,
    /// Persistent storage.
    Storage,
    /// GPU time.
    Gpu,
    /// Network egress.
    Bandwidth,
}

impl fmt::Display for UsageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compute => write!(f, "compute"),
            Self::Memory => write!(f, "memory"),
            Self::Storage => write!(f, "storage"),
            Self::Gpu => write!(f, "gpu"),
            Self::Bandwidth => write!(f, "bandwidth"),
        }
    }
}

/// The signed portion of a usage report.
///
/// Providers sign the record with [`UsageClaim::sign_bytes`]; tenants sign
/// the same bytes to acknowledge it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageClaim {
    /// Order the lease fulfils.
    pub order: OrderId,
    /// Lease consumed.
    pub lease: LeaseId,
    /// Units consumed.
    pub units: u64,
    /// What was consumed.
    pub usage_type: UsageType,
    /// Period start, unix seconds.
    pub period_start: i64,
    /// Period end, unix seconds.
    pub period_end: i64,
}

impl UsageClaim {
    /// Period length in seconds. Zero if the period is inverted.
    #[must_use]
    pub fn period_secs(&self) -> u64 {
        u64::try_from(self.period_end.saturating_sub(self.period_start)).unwrap_or(0)
    }

    /// BLAKE3 digest of the claim's canonical JSON encoding.
    #[must_use]
    pub fn sign_bytes(&self) -> [u8; 32] {
        // Serializing plain fields cannot fail.
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        *blake3::hash(&encoded).as_bytes()
    }
}

/// Computes what a usage period costs at a per-unit-hour price.
///
/// Formula: `ceil(units * period_secs * price / 3600)`. Rounds up so the
/// provider is never underpaid by truncation. Returns `None` on overflow.
#[must_use]
pub const fn usage_cost(units: u64, period_secs: u64, price_per_unit_hour: u128) -> Option<u128> {
    if units == 0 || period_secs == 0 || price_per_unit_hour == 0 {
        return Some(0);
    }
    let Some(unit_secs) = (units as u128).checked_mul(period_secs as u128) else {
        return None;
    };
    let Some(numerator) = unit_secs.checked_mul(price_per_unit_hour) else {
        return None;
    };
    Some(numerator.div_ceil(SECONDS_PER_HOUR))
}

/// A recorded usage report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Record id.
    pub id: UsageId,
    /// Reported usage.
    pub claim: UsageClaim,
    /// Reporting provider.
    pub provider: Address,
    /// Provider signature over the claim.
    pub signature: Vec<u8>,
    /// Billable value at the lease price.
    pub value: Coin,
    /// Set once the tenant acknowledges the record.
    pub acknowledged: bool,
    /// Set once the value has been paid out.
    pub claimed: bool,
    /// Height the record was written at.
    pub recorded_at: u64,
}

impl UsageRecord {
    /// Returns true if the record is acknowledged and not yet paid.
    #[must_use]
    pub const fn is_billable(&self) -> bool {
        self.acknowledged && !self.claimed
    }
}

/// Usage records keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStore {
    records: BTreeMap<UsageId, UsageRecord>,
    next_id: UsageId,
}

impl UsageStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a record.
    #[must_use]
    pub fn get(&self, id: UsageId) -> Option<&UsageRecord> {
        self.records.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: UsageId) -> Option<&mut UsageRecord> {
        self.records.get_mut(&id)
    }

    /// Records for a lease, in id order.
    pub fn for_lease<'a>(&'a self, lease: &'a LeaseId) -> impl Iterator<Item = &'a UsageRecord> + 'a {
        self.records.values().filter(move |r| &r.claim.lease == lease)
    }

    /// End of the latest period recorded for a lease.
    #[must_use]
    pub fn last_period_end(&self, lease: &LeaseId) -> Option<i64> {
        self.for_lease(lease).map(|r| r.claim.period_end).max()
    }

    /// Ids of acknowledged, unpaid records for a lease.
    #[must_use]
    pub fn billable_ids(&self, lease: &LeaseId) -> Vec<UsageId> {
        self.for_lease(lease)
            .filter(|r| r.is_billable())
            .map(|r| r.id)
            .collect()
    }

    /// Drops the paid-out records of a lease. Returns how many were removed.
    pub(crate) fn prune_claimed(&mut self, lease: &LeaseId) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| !(r.claimed && &r.claim.lease == lease));
        before - self.records.len()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn insert(
        &mut self,
        claim: UsageClaim,
        provider: Address,
        signature: Vec<u8>,
        value: Coin,
        height: u64,
    ) -> UsageId {
        let id = self.next_id;
        self.next_id += 1;
        self.records.insert(
            id,
            UsageRecord {
                id,
                claim,
                provider,
                signature,
                value,
                acknowledged: false,
                claimed: false,
                recorded_at: height,
            },
        );
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use molt_core::Wallet;
    use test_case::test_case;

    fn claim() -> UsageClaim {
        let order = OrderId::new(Wallet::new().address().clone(), 1, 1, 1);
        UsageClaim {
            lease: LeaseId::new(order.clone(), Wallet::new().address().clone()),
            order,
            units: 2,
            usage_type: UsageType::Gpu,
            period_start: 1_700_000_000,
            period_end: 1_700_003_600,
        }
    }

    #[test_case(1, 3600, 100, 100 ; "one unit hour")]
    #[test_case(2, 1800, 100, 100 ; "two units half hour")]
    #[test_case(1, 1, 1, 1 ; "rounds up")]
    #[test_case(1, 3599, 1, 1 ; "just under an hour rounds up")]
    #[test_case(0, 3600, 100, 0 ; "zero units")]
    #[test_case(3, 7200, 0, 0 ; "free")]
    fn cost(units: u64, secs: u64, price: u128, expected: u128) {
        assert_eq!(usage_cost(units, secs, price), Some(expected));
    }

    #[test]
    fn cost_overflow_is_none() {
        assert_eq!(usage_cost(u64::MAX, u64::MAX, u128::MAX), None);
    }

    #[test]
    fn sign_bytes_change_with_claim() {
        let a = claim();
        let mut b = a.clone();
        b.units += 1;
        assert_eq!(a.sign_bytes(), a.clone().sign_bytes());
        assert_ne!(a.sign_bytes(), b.sign_bytes());
    }

    #[test]
    fn inverted_period_has_zero_length() {
        let mut c = claim();
        std::mem::swap(&mut c.period_start, &mut c.period_end);
        assert_eq!(c.period_secs(), 0);
    }

    #[test]
    fn store_assigns_sequential_ids() {
        let mut store = UsageStore::new();
        let provider = Wallet::new().address().clone();
        let c = claim();
        let value = Coin::new("uve", 10);
        let a = store.insert(c.clone(), provider.clone(), vec![1], value.clone(), 1);
        let b = store.insert(c.clone(), provider, vec![1], value, 1);
        assert_eq!((a, b), (0, 1));
        assert_eq!(store.last_period_end(&c.lease), Some(c.period_end));
        assert!(store.billable_ids(&c.lease).is_empty());
    }

    #[test]
    fn prune_claimed_keeps_unpaid_and_other_leases() {
        let mut store = UsageStore::new();
        let provider = Wallet::new().address().clone();
        let c = claim();
        let other = claim();
        let value = Coin::new("uve", 10);
        let paid = store.insert(c.clone(), provider.clone(), vec![1], value.clone(), 1);
        let unpaid = store.insert(c.clone(), provider.clone(), vec![1], value.clone(), 1);
        let elsewhere = store.insert(other, provider, vec![1], value, 1);
        for id in [paid, elsewhere] {
            let record = store.get_mut(id).unwrap();
            record.acknowledged = true;
            record.claimed = true;
        }

        assert_eq!(store.prune_claimed(&c.lease), 1);
        assert!(store.get(paid).is_none());
        assert!(store.get(unpaid).is_some());
        assert!(store.get(elsewhere).is_some());
        assert_eq!(store.len(), 2);
    }
}
