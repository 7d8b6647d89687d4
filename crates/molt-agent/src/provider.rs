//! Provider service.
//!
//! Drives a provider through the market: decides which orders to bid on,
//! holds capacity for each bid, guards pending leases with a watchdog and
//! returns capacity when bids lose or leases end.
//!
//! Capacity moves through three places, each owning its [`Reservation`]:
//! `pending` while the bid is open, the lease's watchdog while the lease
//! waits for its manifest, and `active` while the workload runs.

use std::collections::HashMap;
use std::sync::Arc;

use molt_core::{BidId, DeploymentId, LeaseId, OrderId};
use molt_market::msg::{MsgCreateBid, MsgManifestReceived};
use molt_market::{MarketEvent, Order, OrderState};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broadcast::TxBroadcaster;
use crate::config::ProviderConfig;
use crate::error::{AgentError, ReservationError};
use crate::reservation::{CapacityStatus, Reservation, ReservationTracker};
use crate::watchdog::{self, WatchdogHandle, WatchdogOutcome};

/// Provider-side market participant.
pub struct ProviderService {
    config: ProviderConfig,
    tracker: ReservationTracker,
    broadcaster: Arc<dyn TxBroadcaster>,
    shutdown: CancellationToken,
    pending: Mutex<HashMap<OrderId, Reservation>>,
    watchdogs: tokio::sync::Mutex<HashMap<LeaseId, WatchdogHandle>>,
    active: Mutex<HashMap<LeaseId, Reservation>>,
    timed_out: Mutex<Vec<DeploymentId>>,
}

impl ProviderService {
    /// Creates a service over an existing tracker.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::Config` if the configuration is invalid.
    pub fn new(
        config: ProviderConfig,
        tracker: ReservationTracker,
        broadcaster: Arc<dyn TxBroadcaster>,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        info!(provider = %config.provider, timeout_secs = config.bid_timeout_secs, "provider service started");
        Ok(Self {
            config,
            tracker,
            broadcaster,
            shutdown: CancellationToken::new(),
            pending: Mutex::new(HashMap::new()),
            watchdogs: tokio::sync::Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            timed_out: Mutex::new(Vec::new()),
        })
    }

    /// Creates a service whose tracker uses the configured capacity.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::Config` if the configuration is invalid.
    pub fn with_static_capacity(
        config: ProviderConfig,
        broadcaster: Arc<dyn TxBroadcaster>,
    ) -> Result<Self, AgentError> {
        let tracker = ReservationTracker::with_capacity(config.capacity);
        Self::new(config, tracker, broadcaster)
    }

    /// Configuration.
    pub const fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Capacity counters.
    pub fn status(&self) -> CapacityStatus {
        self.tracker.status()
    }

    /// Number of pending leases under a watchdog.
    pub async fn watched_leases(&self) -> usize {
        self.watchdogs.lock().await.len()
    }

    /// Number of running workloads.
    pub fn active_leases(&self) -> usize {
        self.active.lock().len()
    }

    /// Decides whether to bid on `order`. On yes, holds capacity for it and
    /// returns the bid to broadcast.
    ///
    /// # Errors
    ///
    /// Fails if the order's resource group is malformed or the bid does not
    /// pass message validation.
    pub fn on_order(&self, order: &Order) -> Result<Option<MsgCreateBid>, AgentError> {
        if self.shutdown.is_cancelled() || order.state != OrderState::Open {
            return Ok(None);
        }
        let resources = order.resources();
        let utilization = self.tracker.status().utilization_percent();
        let Some(price) = self.config.pricing.quote(&resources, utilization) else {
            debug!(order = %order.id, "cannot price order");
            return Ok(None);
        };
        if !price.same_denom(&order.price_ceiling) || price.amount() > order.price_ceiling.amount() {
            debug!(order = %order.id, price = %price, ceiling = %order.price_ceiling, "order below our price");
            return Ok(None);
        }

        let reservation = match self.tracker.reserve(&order.id, &order.group) {
            Ok(reservation) => reservation,
            Err(
                e @ (ReservationError::InsufficientCapacity { .. }
                | ReservationError::AlreadyReserved(_)),
            ) => {
                debug!(order = %order.id, reason = %e, "declining order");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let msg = MsgCreateBid {
            provider: self.config.provider.clone(),
            order_id: order.id.clone(),
            price,
            deposit: self.config.bid_deposit.clone(),
            resources,
        };
        msg.validate_basic()?;

        info!(order = %order.id, price = %msg.price, "bidding on order");
        self.pending.lock().insert(order.id.clone(), reservation);
        Ok(Some(msg))
    }

    /// Bids on `order` and broadcasts the bid. Returns the bid id, or `None`
    /// if the provider declined.
    ///
    /// # Errors
    ///
    /// Fails as [`ProviderService::on_order`] does, or if the broadcast
    /// fails; the reservation is released in that case.
    pub async fn bid(&self, order: &Order) -> Result<Option<BidId>, AgentError> {
        let Some(msg) = self.on_order(order)? else {
            return Ok(None);
        };
        let bid = msg.bid_id();
        if let Err(e) = self.broadcaster.broadcast(msg.into()).await {
            warn!(order = %order.id, error = %e, "bid broadcast failed");
            self.on_bid_rejected(&order.id);
            return Err(e.into());
        }
        Ok(Some(bid))
    }

    /// Releases the capacity held for a bid that lost or was refused.
    /// Returns false if no bid was pending for the order.
    pub fn on_bid_rejected(&self, order: &OrderId) -> bool {
        let Some(reservation) = self.pending.lock().remove(order) else {
            return false;
        };
        debug!(order = %order, "bid closed, releasing capacity");
        reservation.release();
        true
    }

    /// Arms a watchdog for a lease won by this provider. Returns false if the
    /// lease is not ours or no bid is pending for it.
    ///
    /// # Errors
    ///
    /// Returns `WatchdogExists` if the lease is already guarded.
    pub async fn on_lease_created(&self, lease: &LeaseId) -> Result<bool, AgentError> {
        if lease.provider != self.config.provider {
            return Ok(false);
        }
        let mut watchdogs = self.watchdogs.lock().await;
        if watchdogs.contains_key(lease) {
            return Err(AgentError::WatchdogExists(lease.clone()));
        }
        let Some(reservation) = self.pending.lock().remove(&lease.order) else {
            debug!(lease = %lease, "no pending bid for lease");
            return Ok(false);
        };
        if self.shutdown.is_cancelled() {
            reservation.release();
            return Ok(false);
        }

        let handle = watchdog::arm(
            lease.clone(),
            reservation,
            self.config.bid_timeout(),
            Arc::clone(&self.broadcaster),
            &self.shutdown,
        );
        watchdogs.insert(lease.clone(), handle);
        info!(lease = %lease, "lease pending, waiting for manifest");
        Ok(true)
    }

    /// Handles the tenant's manifest: stops the watchdog, keeps the capacity
    /// for the workload and reports the manifest on chain. Returns false if
    /// the watchdog had already finished.
    pub async fn on_manifest(&self, lease: &LeaseId) -> bool {
        let Some(mut handle) = self.watchdogs.lock().await.remove(lease) else {
            debug!(lease = %lease, "manifest for unknown lease");
            return false;
        };
        handle.manifest_received();
        match handle.join().await {
            WatchdogOutcome::ManifestReceived(reservation) => {
                reservation.mark_allocated();
                self.active.lock().insert(lease.clone(), reservation);
                let msg = MsgManifestReceived {
                    provider: self.config.provider.clone(),
                    lease_id: lease.clone(),
                };
                if let Err(e) = self.broadcaster.broadcast(msg.into()).await {
                    error!(lease = %lease, error = %e, "manifest broadcast failed");
                }
                true
            }
            outcome => {
                warn!(lease = %lease, outcome = outcome.name(), "manifest arrived too late");
                false
            }
        }
    }

    /// Returns the capacity of a closed lease. Returns false if the lease
    /// held none.
    pub async fn on_lease_closed(&self, lease: &LeaseId) -> bool {
        if let Some(reservation) = self.active.lock().remove(lease) {
            info!(lease = %lease, "lease closed, releasing capacity");
            reservation.release();
            return true;
        }
        let handle = self.watchdogs.lock().await.remove(lease);
        if let Some(handle) = handle {
            handle.cancel();
            match handle.join().await {
                WatchdogOutcome::TimedOut { deployment, .. } => {
                    info!(lease = %lease, deployment = %deployment, "deployment released after watchdog timeout");
                    self.timed_out.lock().push(deployment);
                }
                WatchdogOutcome::ManifestReceived(reservation) => {
                    info!(lease = %lease, "lease closed, releasing capacity");
                    reservation.release();
                }
                WatchdogOutcome::Cancelled => {
                    debug!(lease = %lease, "watchdog stopped by lease closure");
                }
            }
            return true;
        }
        lease.provider == self.config.provider && self.on_bid_rejected(&lease.order)
    }

    /// Reacts to market events that concern this provider.
    ///
    /// # Errors
    ///
    /// Fails if a watchdog cannot be armed.
    pub async fn handle_event(&self, event: &MarketEvent) -> Result<(), AgentError> {
        match event {
            MarketEvent::LeaseCreated { lease, .. } => {
                self.on_lease_created(lease).await?;
            }
            MarketEvent::BidClosed { bid } if bid.provider == self.config.provider => {
                self.on_bid_rejected(&bid.order);
            }
            MarketEvent::LeaseClosed { lease, .. } if lease.provider == self.config.provider => {
                self.on_lease_closed(lease).await;
            }
            _ => {}
        }
        Ok(())
    }

    /// Collects watchdogs that timed out. Returns the deployments whose bids
    /// were closed; their capacity is already released. Timeouts observed
    /// while handling a lease closure are reported here too.
    pub async fn reap(&self) -> Vec<DeploymentId> {
        let finished: Vec<WatchdogHandle> = {
            let mut watchdogs = self.watchdogs.lock().await;
            let done: Vec<LeaseId> = watchdogs
                .iter()
                .filter(|(_, h)| h.is_finished())
                .map(|(lease, _)| lease.clone())
                .collect();
            done.iter().filter_map(|lease| watchdogs.remove(lease)).collect()
        };

        let mut released = std::mem::take(&mut *self.timed_out.lock());
        for handle in finished {
            let lease = handle.lease().clone();
            match handle.join().await {
                WatchdogOutcome::TimedOut { deployment, .. } => released.push(deployment),
                WatchdogOutcome::ManifestReceived(reservation) => {
                    reservation.mark_allocated();
                    self.active.lock().insert(lease, reservation);
                }
                WatchdogOutcome::Cancelled => {}
            }
        }
        released
    }

    /// Stops every watchdog without closing bids and releases all capacity.
    /// Returns the number of watchdogs stopped.
    pub async fn shutdown(&self) -> usize {
        self.shutdown.cancel();
        let handles: Vec<WatchdogHandle> = self.watchdogs.lock().await.drain().map(|(_, h)| h).collect();
        let stopped = handles.len();
        for handle in handles {
            handle.join().await;
        }
        let pending: Vec<Reservation> = self.pending.lock().drain().map(|(_, r)| r).collect();
        let active: Vec<Reservation> = self.active.lock().drain().map(|(_, r)| r).collect();
        for reservation in pending.into_iter().chain(active) {
            reservation.release();
        }
        info!(watchdogs = stopped, "provider service stopped");
        stopped
    }
}

impl std::fmt::Debug for ProviderService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderService")
            .field("provider", &self.config.provider)
            .field("tracker", &self.tracker)
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::ChannelBroadcaster;
    use molt_core::coin::DEFAULT_DENOM;
    use molt_core::{Address, Coin, ResourceGroup, ResourceSpec, Wallet};
    use molt_market::MarketMsg;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const GIB: u64 = 1024 * 1024 * 1024;

    struct Setup {
        service: ProviderService,
        rx: mpsc::UnboundedReceiver<MarketMsg>,
        provider: Address,
        tenant: Address,
    }

    fn setup() -> Setup {
        let provider = Wallet::new().address().clone();
        let tenant = Wallet::new().address().clone();
        let config = ProviderConfig::new(provider.clone(), ResourceSpec::new(4000, 16 * GIB, 0, 0));
        let (broadcaster, rx) = ChannelBroadcaster::new();
        let service = ProviderService::with_static_capacity(config, Arc::new(broadcaster)).unwrap();
        Setup {
            service,
            rx,
            provider,
            tenant,
        }
    }

    fn order(tenant: &Address, oseq: u32, cpu: u64, ceiling: u128) -> Order {
        Order {
            id: OrderId::new(tenant.clone(), 1, 1, oseq),
            state: OrderState::Open,
            group: ResourceGroup::single("web", ResourceSpec::new(cpu, GIB, 0, 0), 1),
            price_ceiling: Coin::new(DEFAULT_DENOM, ceiling),
            next_bid_seq: 0,
            created_at: 1,
        }
    }

    // ==================== Bidding ====================

    #[test]
    fn bids_within_ceiling_and_reserves() {
        let s = setup();
        let msg = s.service.on_order(&order(&s.tenant, 1, 1000, 1_000)).unwrap().unwrap();

        // 1 core = 10, 1 GiB = 5, 20% markup
        assert_eq!(msg.price, Coin::new(DEFAULT_DENOM, 18));
        assert_eq!(msg.provider, s.provider);
        assert_eq!(s.service.status().reservations, 1);
    }

    #[test]
    fn declines_order_below_price() {
        let s = setup();
        assert!(s.service.on_order(&order(&s.tenant, 1, 1000, 17)).unwrap().is_none());
        assert_eq!(s.service.status().reservations, 0);
    }

    #[test]
    fn declines_when_capacity_exhausted() {
        let s = setup();
        assert!(s.service.on_order(&order(&s.tenant, 1, 4000, 1_000)).unwrap().is_some());
        assert!(s.service.on_order(&order(&s.tenant, 2, 1000, 1_000)).unwrap().is_none());
    }

    #[test]
    fn rejected_bid_releases_capacity() {
        let s = setup();
        let o = order(&s.tenant, 1, 1000, 1_000);
        s.service.on_order(&o).unwrap();
        assert!(s.service.on_bid_rejected(&o.id));
        assert!(!s.service.on_bid_rejected(&o.id));
        assert_eq!(s.service.status().reservations, 0);
    }

    #[tokio::test]
    async fn bid_broadcasts_create_bid() {
        let mut s = setup();
        let o = order(&s.tenant, 1, 1000, 1_000);
        let bid = s.service.bid(&o).await.unwrap().unwrap();

        let sent = s.rx.recv().await.unwrap();
        assert!(matches!(sent, MarketMsg::CreateBid(m) if m.bid_id() == bid));
    }

    #[tokio::test]
    async fn failed_bid_broadcast_releases_capacity() {
        let s = setup();
        drop(s.rx);
        let err = s.service.bid(&order(&s.tenant, 1, 1000, 1_000)).await.unwrap_err();
        assert!(matches!(err, AgentError::Broadcast(_)));
        assert_eq!(s.service.status().reservations, 0);
    }

    // ==================== Leases ====================

    #[tokio::test(start_paused = true)]
    async fn manifest_keeps_capacity_until_lease_closes() {
        let mut s = setup();
        let o = order(&s.tenant, 1, 1000, 1_000);
        s.service.on_order(&o).unwrap();
        let lease = LeaseId::new(o.id.clone(), s.provider.clone());

        assert!(s.service.on_lease_created(&lease).await.unwrap());
        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(s.service.on_manifest(&lease).await);

        assert!(matches!(s.rx.recv().await.unwrap(), MarketMsg::ManifestReceived(_)));
        assert_eq!(s.service.active_leases(), 1);
        assert!(s.service.tracker.is_allocated(&o.id));

        assert!(s.service.on_lease_closed(&lease).await);
        assert_eq!(s.service.status().reservations, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_closes_bid_and_reaps() {
        let mut s = setup();
        let o = order(&s.tenant, 1, 1000, 1_000);
        s.service.on_order(&o).unwrap();
        let lease = LeaseId::new(o.id.clone(), s.provider.clone());
        s.service.on_lease_created(&lease).await.unwrap();

        tokio::time::advance(Duration::from_secs(300)).await;
        let sent = s.rx.recv().await.unwrap();
        assert!(matches!(sent, MarketMsg::CloseBid(m) if m.bid_id == lease.bid()));

        let mut released = Vec::new();
        while released.is_empty() {
            tokio::task::yield_now().await;
            released = s.service.reap().await;
        }
        assert_eq!(released, vec![lease.deployment()]);
        assert_eq!(s.service.status().reservations, 0);
        assert!(!s.service.on_manifest(&lease).await);
    }

    #[tokio::test(start_paused = true)]
    async fn lease_closed_after_timeout_still_reports_release() {
        let mut s = setup();
        let o = order(&s.tenant, 1, 1000, 1_000);
        s.service.on_order(&o).unwrap();
        let lease = LeaseId::new(o.id.clone(), s.provider.clone());
        s.service.on_lease_created(&lease).await.unwrap();

        tokio::time::advance(Duration::from_secs(300)).await;
        assert!(matches!(s.rx.recv().await.unwrap(), MarketMsg::CloseBid(_)));

        // The close-bid lands before the watchdog is reaped.
        assert!(s.service.on_lease_closed(&lease).await);
        assert_eq!(s.service.watched_leases().await, 0);
        assert_eq!(s.service.status().reservations, 0);
        assert_eq!(s.service.reap().await, vec![lease.deployment()]);
        assert!(s.service.reap().await.is_empty());
    }

    #[tokio::test]
    async fn foreign_lease_is_ignored() {
        let s = setup();
        let lease = LeaseId::new(order(&s.tenant, 1, 1000, 1_000).id, Wallet::new().address().clone());
        assert!(!s.service.on_lease_created(&lease).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_releases_everything_without_closing_bids() {
        let mut s = setup();
        let won = order(&s.tenant, 1, 1000, 1_000);
        let open = order(&s.tenant, 2, 1000, 1_000);
        s.service.on_order(&won).unwrap();
        s.service.on_order(&open).unwrap();
        let lease = LeaseId::new(won.id.clone(), s.provider.clone());
        s.service.on_lease_created(&lease).await.unwrap();

        assert_eq!(s.service.shutdown().await, 1);
        tokio::time::advance(Duration::from_secs(600)).await;

        assert_eq!(s.service.status().reservations, 0);
        assert!(s.rx.try_recv().is_err());
        assert!(s.service.on_order(&order(&s.tenant, 3, 1000, 1_000)).unwrap().is_none());
    }

    #[tokio::test]
    async fn events_drive_the_lifecycle() {
        let s = setup();
        let o = order(&s.tenant, 1, 1000, 1_000);
        s.service.on_order(&o).unwrap();
        let lease = LeaseId::new(o.id.clone(), s.provider.clone());

        s.service
            .handle_event(&MarketEvent::LeaseCreated {
                lease: lease.clone(),
                price: Coin::new(DEFAULT_DENOM, 18),
            })
            .await
            .unwrap();
        assert_eq!(s.service.watched_leases().await, 1);

        s.service
            .handle_event(&MarketEvent::LeaseClosed {
                lease,
                reason: molt_market::LeaseCloseReason::Owner,
            })
            .await
            .unwrap();
        assert_eq!(s.service.watched_leases().await, 0);
        assert_eq!(s.service.status().reservations, 0);
    }
}
