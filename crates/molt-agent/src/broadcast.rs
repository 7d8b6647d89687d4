//! Transaction broadcasting.

use std::future::Future;
use std::pin::Pin;

use molt_market::MarketMsg;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::BroadcastError;

/// Boxed future type for async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Signs and submits market messages on behalf of the provider.
pub trait TxBroadcaster: Send + Sync {
    /// Submits one message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message could not be signed or delivered.
    fn broadcast<'a>(&'a self, msg: MarketMsg) -> BoxFuture<'a, Result<(), BroadcastError>>;
}

/// Hands messages to a local consumer over a channel, typically the task that
/// owns the ledger connection.
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    tx: mpsc::UnboundedSender<MarketMsg>,
}

impl ChannelBroadcaster {
    /// Creates a broadcaster and the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MarketMsg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TxBroadcaster for ChannelBroadcaster {
    fn broadcast<'a>(&'a self, msg: MarketMsg) -> BoxFuture<'a, Result<(), BroadcastError>> {
        Box::pin(async move {
            let kind = msg.type_name();
            self.tx
                .send(msg)
                .map_err(|_| BroadcastError::Network("broadcast channel closed".to_string()))?;
            debug!(msg = kind, "transaction queued");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use molt_core::{BidId, OrderId, Wallet};
    use molt_market::msg::MsgCloseBid;

    fn close_bid() -> MarketMsg {
        let provider = Wallet::new().address().clone();
        let order = OrderId::new(Wallet::new().address().clone(), 1, 1, 1);
        MsgCloseBid {
            provider: provider.clone(),
            bid_id: BidId::new(order, provider),
        }
        .into()
    }

    #[tokio::test]
    async fn channel_delivers_messages_in_order() {
        let (broadcaster, mut rx) = ChannelBroadcaster::new();
        let first = close_bid();
        let second = close_bid();
        broadcaster.broadcast(first.clone()).await.unwrap();
        broadcaster.broadcast(second.clone()).await.unwrap();

        assert_eq!(rx.recv().await, Some(first));
        assert_eq!(rx.recv().await, Some(second));
    }

    #[tokio::test]
    async fn closed_channel_is_a_network_error() {
        let (broadcaster, rx) = ChannelBroadcaster::new();
        drop(rx);
        let err = broadcaster.broadcast(close_bid()).await.unwrap_err();
        assert!(matches!(err, BroadcastError::Network(_)));
    }
}
