//! Bid watchdog.
//!
//! Once a bid becomes a pending lease the provider waits for the tenant's
//! manifest. A watchdog task races that signal against a deadline and a
//! cancellation token:
//!
//! - manifest first: the reservation is handed back for the running workload
//! - deadline first: a close-bid transaction is broadcast and the reservation
//!   is released
//! - cancelled first: the reservation is released and nothing is broadcast
//!
//! When several are ready at once they are taken in that priority order, with
//! cancellation ahead of both. Cancellation is checked again after the
//! deadline fires, so a shutdown requested before the broadcast always
//! suppresses it.

use std::sync::Arc;
use std::time::Duration;

use molt_core::{DeploymentId, LeaseId};
use molt_market::msg::MsgCloseBid;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broadcast::TxBroadcaster;
use crate::error::BroadcastError;
use crate::reservation::Reservation;

/// How a watchdog ended.
#[derive(Debug)]
pub enum WatchdogOutcome {
    /// The manifest arrived in time. The reservation now backs the workload.
    ManifestReceived(Reservation),
    /// The deadline passed. The reservation has been released.
    TimedOut {
        /// Deployment of the abandoned lease.
        deployment: DeploymentId,
        /// Result of broadcasting the close-bid transaction. Failures are
        /// not retried.
        broadcast: Result<(), BroadcastError>,
    },
    /// Shut down before the deadline. The reservation has been released.
    Cancelled,
}

impl WatchdogOutcome {
    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ManifestReceived(_) => "manifest_received",
            Self::TimedOut { .. } => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Handle to a running watchdog.
#[derive(Debug)]
pub struct WatchdogHandle {
    lease: LeaseId,
    deadline: Instant,
    cancel: CancellationToken,
    manifest: Option<oneshot::Sender<()>>,
    task: JoinHandle<WatchdogOutcome>,
}

impl WatchdogHandle {
    /// The lease being watched.
    pub const fn lease(&self) -> &LeaseId {
        &self.lease
    }

    /// When the close-bid fires.
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Returns true once the task has produced its outcome.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Delivers the manifest signal. Returns false if it was already sent or
    /// the watchdog has finished.
    pub fn manifest_received(&mut self) -> bool {
        self.manifest.take().is_some_and(|tx| tx.send(()).is_ok())
    }

    /// Requests cancellation without waiting.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the outcome.
    pub async fn join(self) -> WatchdogOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                // The reservation was dropped with the task, which released it.
                error!(lease = %self.lease, error = %e, "watchdog task failed");
                WatchdogOutcome::Cancelled
            }
        }
    }
}

/// Starts a watchdog for a pending lease.
///
/// The watchdog owns `reservation` until it finishes. It stops when `parent`
/// is cancelled.
pub fn arm(
    lease: LeaseId,
    reservation: Reservation,
    timeout: Duration,
    broadcaster: Arc<dyn TxBroadcaster>,
    parent: &CancellationToken,
) -> WatchdogHandle {
    let deadline = Instant::now() + timeout;
    let cancel = parent.child_token();
    let (manifest_tx, manifest_rx) = oneshot::channel();
    debug!(lease = %lease, timeout_secs = timeout.as_secs(), "watchdog armed");

    let task = tokio::spawn(run(
        lease.clone(),
        reservation,
        deadline,
        broadcaster,
        cancel.clone(),
        manifest_rx,
    ));
    WatchdogHandle {
        lease,
        deadline,
        cancel,
        manifest: Some(manifest_tx),
        task,
    }
}

async fn run(
    lease: LeaseId,
    reservation: Reservation,
    deadline: Instant,
    broadcaster: Arc<dyn TxBroadcaster>,
    cancel: CancellationToken,
    mut manifest: oneshot::Receiver<()>,
) -> WatchdogOutcome {
    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            debug!(lease = %lease, "watchdog cancelled");
            reservation.release();
            return WatchdogOutcome::Cancelled;
        }
        Ok(()) = &mut manifest => {
            info!(lease = %lease, "manifest received before deadline");
            return WatchdogOutcome::ManifestReceived(reservation);
        }
        () = tokio::time::sleep_until(deadline) => {}
    }

    if cancel.is_cancelled() {
        reservation.release();
        return WatchdogOutcome::Cancelled;
    }

    warn!(lease = %lease, "no manifest before deadline, closing bid");
    let msg = MsgCloseBid {
        provider: lease.provider.clone(),
        bid_id: lease.bid(),
    };
    let broadcast = broadcaster.broadcast(msg.into()).await;
    if let Err(e) = &broadcast {
        error!(lease = %lease, error = %e, "close-bid broadcast failed, bid stays open");
    }
    reservation.release();
    WatchdogOutcome::TimedOut {
        deployment: lease.deployment(),
        broadcast,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::BoxFuture;
    use crate::reservation::ReservationTracker;
    use molt_core::{OrderId, ResourceGroup, ResourceSpec, Wallet};
    use molt_market::MarketMsg;
    use parking_lot::Mutex;

    const TIMEOUT: Duration = Duration::from_secs(300);

    struct Recorder {
        sent: Mutex<Vec<MarketMsg>>,
        fail: bool,
    }

    impl TxBroadcaster for Recorder {
        fn broadcast<'a>(&'a self, msg: MarketMsg) -> BoxFuture<'a, Result<(), BroadcastError>> {
            Box::pin(async move {
                if self.fail {
                    return Err(BroadcastError::Network("unreachable".to_string()));
                }
                self.sent.lock().push(msg);
                Ok(())
            })
        }
    }

    struct Setup {
        tracker: ReservationTracker,
        recorder: Arc<Recorder>,
        lease: LeaseId,
        parent: CancellationToken,
    }

    impl Setup {
        fn new(fail: bool) -> Self {
            let tenant = Wallet::new().address().clone();
            let provider = Wallet::new().address().clone();
            Self {
                tracker: ReservationTracker::with_capacity(ResourceSpec::new(4000, 0, 0, 0)),
                recorder: Arc::new(Recorder {
                    sent: Mutex::new(Vec::new()),
                    fail,
                }),
                lease: LeaseId::new(OrderId::new(tenant, 9, 1, 1), provider),
                parent: CancellationToken::new(),
            }
        }

        fn arm(&self) -> WatchdogHandle {
            let group = ResourceGroup::single("web", ResourceSpec::new(1000, 0, 0, 0), 1);
            let reservation = self.tracker.reserve(&self.lease.order, &group).unwrap();
            arm(
                self.lease.clone(),
                reservation,
                TIMEOUT,
                self.recorder.clone(),
                &self.parent,
            )
        }
    }

    #[tokio::test(start_paused = true)]
    async fn manifest_before_deadline_keeps_reservation() {
        let s = Setup::new(false);
        let mut handle = s.arm();

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(handle.manifest_received());

        let outcome = handle.join().await;
        let WatchdogOutcome::ManifestReceived(reservation) = outcome else {
            panic!("expected manifest");
        };
        assert!(s.recorder.sent.lock().is_empty());
        assert!(s.tracker.is_reserved(&s.lease.order));
        reservation.release();
        assert!(!s.tracker.is_reserved(&s.lease.order));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_broadcasts_close_bid_and_releases() {
        let s = Setup::new(false);
        let handle = s.arm();

        tokio::time::advance(TIMEOUT).await;
        let outcome = handle.join().await;

        let WatchdogOutcome::TimedOut { deployment, broadcast } = outcome else {
            panic!("expected timeout");
        };
        assert_eq!(deployment, s.lease.deployment());
        assert!(broadcast.is_ok());
        let sent = s.recorder.sent.lock();
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0], MarketMsg::CloseBid(m) if m.bid_id == s.lease.bid()));
        assert!(!s.tracker.is_reserved(&s.lease.order));
    }

    #[tokio::test(start_paused = true)]
    async fn manifest_after_deadline_has_no_effect() {
        let s = Setup::new(false);
        let mut handle = s.arm();

        tokio::time::advance(TIMEOUT + Duration::from_secs(1)).await;
        while !handle.is_finished() {
            tokio::task::yield_now().await;
        }
        assert!(!handle.manifest_received());
        assert!(matches!(handle.join().await, WatchdogOutcome::TimedOut { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancellation_suppresses_close_bid() {
        let s = Setup::new(false);
        let handle = s.arm();

        tokio::time::advance(Duration::from_secs(10)).await;
        s.parent.cancel();
        tokio::time::advance(TIMEOUT).await;

        assert!(matches!(handle.join().await, WatchdogOutcome::Cancelled));
        assert!(s.recorder.sent.lock().is_empty());
        assert!(!s.tracker.is_reserved(&s.lease.order));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_racing_deadline_wins() {
        let s = Setup::new(false);
        let handle = s.arm();

        // Both become ready in the same poll.
        s.parent.cancel();
        tokio::time::advance(TIMEOUT).await;

        assert!(matches!(handle.join().await, WatchdogOutcome::Cancelled));
        assert!(s.recorder.sent.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_broadcast_still_releases() {
        let s = Setup::new(true);
        let handle = s.arm();

        tokio::time::advance(TIMEOUT).await;
        let outcome = handle.join().await;

        assert!(matches!(
            outcome,
            WatchdogOutcome::TimedOut {
                broadcast: Err(BroadcastError::Network(_)),
                ..
            }
        ));
        assert!(!s.tracker.is_reserved(&s.lease.order));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_manifest_sender_waits_for_deadline() {
        let s = Setup::new(false);
        let mut handle = s.arm();
        drop(handle.manifest.take());

        tokio::time::advance(TIMEOUT).await;
        assert!(matches!(handle.join().await, WatchdogOutcome::TimedOut { .. }));
    }
}
