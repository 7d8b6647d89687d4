//! Compute resource quantities.

use serde::{Deserialize, Serialize};

/// A quantity of compute resources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// CPU in millicores.
    pub cpu_millis: u64,
    /// Memory in bytes.
    pub memory_bytes: u64,
    /// Ephemeral storage in bytes.
    pub storage_bytes: u64,
    /// GPU count.
    pub gpus: u32,
}

impl ResourceSpec {
    /// An empty resource quantity.
    pub const ZERO: Self = Self {
        cpu_millis: 0,
        memory_bytes: 0,
        storage_bytes: 0,
        gpus: 0,
    };

    /// Creates a resource quantity.
    #[must_use]
    pub const fn new(cpu_millis: u64, memory_bytes: u64, storage_bytes: u64, gpus: u32) -> Self {
        Self {
            cpu_millis,
            memory_bytes,
            storage_bytes,
            gpus,
        }
    }

    /// Returns true if every dimension is zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.cpu_millis == 0 && self.memory_bytes == 0 && self.storage_bytes == 0 && self.gpus == 0
    }

    /// Returns true if every dimension of `self` is within `limit`.
    #[must_use]
    pub const fn fits_within(&self, limit: &Self) -> bool {
        self.cpu_millis <= limit.cpu_millis
            && self.memory_bytes <= limit.memory_bytes
            && self.storage_bytes <= limit.storage_bytes
            && self.gpus <= limit.gpus
    }

    /// Checked addition. Returns `None` if any dimension overflows.
    #[must_use]
    pub const fn checked_add(&self, rhs: &Self) -> Option<Self> {
        let (Some(cpu), Some(mem), Some(storage), Some(gpus)) = (
            self.cpu_millis.checked_add(rhs.cpu_millis),
            self.memory_bytes.checked_add(rhs.memory_bytes),
            self.storage_bytes.checked_add(rhs.storage_bytes),
            self.gpus.checked_add(rhs.gpus),
        ) else {
            return None;
        };
        Some(Self::new(cpu, mem, storage, gpus))
    }

    /// Checked subtraction. Returns `None` if any dimension underflows.
    #[must_use]
    pub const fn checked_sub(&self, rhs: &Self) -> Option<Self> {
        let (Some(cpu), Some(mem), Some(storage), Some(gpus)) = (
            self.cpu_millis.checked_sub(rhs.cpu_millis),
            self.memory_bytes.checked_sub(rhs.memory_bytes),
            self.storage_bytes.checked_sub(rhs.storage_bytes),
            self.gpus.checked_sub(rhs.gpus),
        ) else {
            return None;
        };
        Some(Self::new(cpu, mem, storage, gpus))
    }

    /// Saturating subtraction, clamping each dimension at zero.
    #[must_use]
    pub const fn saturating_sub(&self, rhs: &Self) -> Self {
        Self::new(
            self.cpu_millis.saturating_sub(rhs.cpu_millis),
            self.memory_bytes.saturating_sub(rhs.memory_bytes),
            self.storage_bytes.saturating_sub(rhs.storage_bytes),
            self.gpus.saturating_sub(rhs.gpus),
        )
    }

    /// Multiplies every dimension by `count`.
    #[must_use]
    pub const fn checked_mul(&self, count: u32) -> Option<Self> {
        let n = count as u64;
        let (Some(cpu), Some(mem), Some(storage), Some(gpus)) = (
            self.cpu_millis.checked_mul(n),
            self.memory_bytes.checked_mul(n),
            self.storage_bytes.checked_mul(n),
            self.gpus.checked_mul(count),
        ) else {
            return None;
        };
        Some(Self::new(cpu, mem, storage, gpus))
    }
}

/// A replicated unit of resources within a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUnit {
    /// Resources per replica.
    pub resources: ResourceSpec,
    /// Number of replicas.
    pub count: u32,
}

/// A named set of resource units requested together by one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroup {
    /// Group name.
    pub name: String,
    /// Units making up the group.
    pub units: Vec<ResourceUnit>,
}

impl ResourceGroup {
    /// Creates a group with a single unit.
    #[must_use]
    pub fn single(name: impl Into<String>, resources: ResourceSpec, count: u32) -> Self {
        Self {
            name: name.into(),
            units: vec![ResourceUnit { resources, count }],
        }
    }

    /// Total resources across all units. Returns `None` on overflow.
    #[must_use]
    pub fn total(&self) -> Option<ResourceSpec> {
        self.units.iter().try_fold(ResourceSpec::ZERO, |acc, unit| {
            acc.checked_add(&unit.resources.checked_mul(unit.count)?)
        })
    }

    /// Returns true if the group requests nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty() || self.total().is_some_and(|t| t.is_zero())
    }
}
