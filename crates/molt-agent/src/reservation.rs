//! Provider-side capacity reservations.
//!
//! A [`Reservation`] holds cluster capacity for an order the provider bids
//! on. It is released by consuming it with [`Reservation::release`]; dropping
//! it releases as well, so a reservation can neither be released twice nor
//! leak.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use molt_core::{OrderId, ResourceGroup, ResourceSpec};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ReservationError;

/// Identifies a reservation within one tracker.
pub type ReservationId = u64;

/// Source of the cluster's allocatable resources.
pub trait CapacityBackend: Send + Sync + fmt::Debug {
    /// Resources the cluster can currently allocate in total.
    fn allocatable(&self) -> ResourceSpec;
}

/// A backend with fixed capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticCapacity(pub ResourceSpec);

impl CapacityBackend for StaticCapacity {
    fn allocatable(&self) -> ResourceSpec {
        self.0
    }
}

/// Snapshot of the tracker's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityStatus {
    /// Allocatable resources reported by the backend.
    pub capacity: ResourceSpec,
    /// Held by live reservations.
    pub reserved: ResourceSpec,
    /// Capacity minus reserved.
    pub available: ResourceSpec,
    /// Live reservations.
    pub reservations: usize,
}

impl CapacityStatus {
    /// Reserved share of capacity in percent, taking the busiest dimension.
    #[must_use]
    pub fn utilization_percent(&self) -> u8 {
        fn pct(used: u64, total: u64) -> u64 {
            if total == 0 {
                0
            } else {
                used.saturating_mul(100) / total
            }
        }
        let busiest = [
            pct(self.reserved.cpu_millis, self.capacity.cpu_millis),
            pct(self.reserved.memory_bytes, self.capacity.memory_bytes),
            pct(self.reserved.storage_bytes, self.capacity.storage_bytes),
            pct(u64::from(self.reserved.gpus), u64::from(self.capacity.gpus)),
        ]
        .into_iter()
        .max()
        .unwrap_or(0);
        u8::try_from(busiest.min(100)).unwrap_or(100)
    }
}

#[derive(Debug)]
struct Entry {
    id: ReservationId,
    resources: ResourceSpec,
    allocated: bool,
}

#[derive(Debug, Default)]
struct Inner {
    reserved: ResourceSpec,
    entries: HashMap<OrderId, Entry>,
    next_id: ReservationId,
}

impl Inner {
    fn release(&mut self, order: &OrderId, id: ReservationId) -> bool {
        match self.entries.get(order) {
            Some(entry) if entry.id == id => {
                self.reserved = self.reserved.saturating_sub(&entry.resources);
                self.entries.remove(order);
                true
            }
            _ => false,
        }
    }
}

/// Tracks capacity held by outstanding bids and leases.
#[derive(Debug, Clone)]
pub struct ReservationTracker {
    backend: Arc<dyn CapacityBackend>,
    inner: Arc<Mutex<Inner>>,
}

impl ReservationTracker {
    /// Creates a tracker over `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn CapacityBackend>) -> Self {
        Self {
            backend,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Creates a tracker with fixed capacity.
    #[must_use]
    pub fn with_capacity(capacity: ResourceSpec) -> Self {
        Self::new(Arc::new(StaticCapacity(capacity)))
    }

    /// Holds capacity for `group` on behalf of `order`.
    ///
    /// # Errors
    ///
    /// - `AlreadyReserved` if the order holds a live reservation
    /// - `InvalidGroup` if the group is empty or overflows
    /// - `InsufficientCapacity` if the unreserved capacity is too small
    pub fn reserve(
        &self,
        order: &OrderId,
        group: &ResourceGroup,
    ) -> Result<Reservation, ReservationError> {
        let requested = group
            .total()
            .filter(|_| !group.is_empty())
            .ok_or_else(|| ReservationError::InvalidGroup(order.clone()))?;
        let capacity = self.backend.allocatable();

        let mut inner = self.inner.lock();
        if inner.entries.contains_key(order) {
            return Err(ReservationError::AlreadyReserved(order.clone()));
        }
        let available = capacity.saturating_sub(&inner.reserved);
        if !requested.fits_within(&available) {
            return Err(ReservationError::InsufficientCapacity {
                requested,
                available,
            });
        }
        let reserved = inner
            .reserved
            .checked_add(&requested)
            .ok_or_else(|| ReservationError::InvalidGroup(order.clone()))?;

        let id = inner.next_id;
        inner.next_id += 1;
        inner.reserved = reserved;
        inner.entries.insert(
            order.clone(),
            Entry {
                id,
                resources: requested,
                allocated: false,
            },
        );
        drop(inner);

        debug!(order = %order, reservation = id, "capacity reserved");
        Ok(Reservation {
            id,
            order: order.clone(),
            group: group.clone(),
            inner: Some(Arc::clone(&self.inner)),
        })
    }

    /// Current counters.
    #[must_use]
    pub fn status(&self) -> CapacityStatus {
        let capacity = self.backend.allocatable();
        let inner = self.inner.lock();
        CapacityStatus {
            capacity,
            reserved: inner.reserved,
            available: capacity.saturating_sub(&inner.reserved),
            reservations: inner.entries.len(),
        }
    }

    /// Returns true if `order` holds a live reservation.
    #[must_use]
    pub fn is_reserved(&self, order: &OrderId) -> bool {
        self.inner.lock().entries.contains_key(order)
    }

    /// Returns true if `order`'s reservation backs a running workload.
    #[must_use]
    pub fn is_allocated(&self, order: &OrderId) -> bool {
        self.inner
            .lock()
            .entries
            .get(order)
            .is_some_and(|e| e.allocated)
    }
}

/// Capacity held for one order.
#[must_use = "dropping a reservation releases it"]
pub struct Reservation {
    id: ReservationId,
    order: OrderId,
    group: ResourceGroup,
    inner: Option<Arc<Mutex<Inner>>>,
}

impl Reservation {
    /// Reservation id.
    pub const fn id(&self) -> ReservationId {
        self.id
    }

    /// The order the capacity is held for.
    pub const fn order(&self) -> &OrderId {
        &self.order
    }

    /// The reserved resource group.
    pub const fn resources(&self) -> &ResourceGroup {
        &self.group
    }

    /// Marks the capacity as backing a running workload.
    pub fn mark_allocated(&self) {
        if let Some(inner) = &self.inner {
            if let Some(entry) = inner.lock().entries.get_mut(&self.order) {
                entry.allocated = true;
            }
        }
    }

    /// Returns the capacity to the tracker.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(inner) = self.inner.take() {
            if inner.lock().release(&self.order, self.id) {
                info!(order = %self.order, reservation = self.id, "reservation released");
            }
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("id", &self.id)
            .field("order", &self.order)
            .field("released", &self.inner.is_none())
            .finish_non_exhaustive()
    }
}
