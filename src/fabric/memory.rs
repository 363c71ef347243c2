//! In-process fabric for tests and single-node deployments.
//!
//! Same contract as the NATS fabric but without external dependencies:
//! queue addresses round-robin across their subscribers, topic addresses
//! broadcast to all of them.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use super::{MessageFabric, Subscription};
use crate::channels::{ChannelAddress, ChannelKind};
use crate::types::Result;

const SUBSCRIPTION_BUFFER: usize = 256;

#[derive(Default)]
struct ChannelState {
    senders: Vec<mpsc::Sender<Bytes>>,
    /// Round-robin cursor for queue delivery.
    next: usize,
}

/// In-memory publish/subscribe fabric.
#[derive(Clone, Default)]
pub struct MemoryFabric {
    channels: Arc<RwLock<HashMap<ChannelAddress, ChannelState>>>,
}

impl MemoryFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscribers on an address (test helper).
    pub async fn subscriber_count(&self, addr: &ChannelAddress) -> usize {
        let channels = self.channels.read().await;
        channels
            .get(addr)
            .map(|state| {
                state
                    .senders
                    .iter()
                    .filter(|sender| !sender.is_closed())
                    .count()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageFabric for MemoryFabric {
    async fn publish(&self, addr: &ChannelAddress, payload: Bytes) -> Result<()> {
        let mut channels = self.channels.write().await;
        let Some(state) = channels.get_mut(addr) else {
            debug!("No subscribers on {}, dropping message", addr);
            return Ok(());
        };
        state.senders.retain(|sender| !sender.is_closed());
        if state.senders.is_empty() {
            debug!("No live subscribers on {}, dropping message", addr);
            return Ok(());
        }
        match addr.kind() {
            ChannelKind::Topic => {
                for sender in &state.senders {
                    let _ = sender.try_send(payload.clone());
                }
            }
            ChannelKind::Queue => {
                let index = state.next % state.senders.len();
                state.next = state.next.wrapping_add(1);
                let _ = state.senders[index].try_send(payload);
            }
        }
        Ok(())
    }

    async fn subscribe(&self, addr: &ChannelAddress) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let mut channels = self.channels.write().await;
        channels.entry(addr.clone()).or_default().senders.push(tx);
        Ok(Subscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelAddress;

    #[tokio::test]
    async fn test_topic_broadcasts_to_all() {
        let fabric = MemoryFabric::new();
        let topic = ChannelAddress::topic("T_COMMON_NODE_STATUS");
        let mut a = fabric.subscribe(&topic).await.unwrap();
        let mut b = fabric.subscribe(&topic).await.unwrap();

        fabric
            .publish(&topic, Bytes::from_static(b"ready"))
            .await
            .unwrap();

        assert_eq!(a.next().await.unwrap(), Bytes::from_static(b"ready"));
        assert_eq!(b.next().await.unwrap(), Bytes::from_static(b"ready"));
    }

    #[tokio::test]
    async fn test_queue_delivers_to_exactly_one() {
        let fabric = MemoryFabric::new();
        let queue = ChannelAddress::queue("T_KB_ANY_NODE");
        let mut a = fabric.subscribe(&queue).await.unwrap();
        let mut b = fabric.subscribe(&queue).await.unwrap();

        fabric
            .publish(&queue, Bytes::from_static(b"one"))
            .await
            .unwrap();
        fabric
            .publish(&queue, Bytes::from_static(b"two"))
            .await
            .unwrap();

        // Round-robin: one message each, never both to the same listener.
        assert_eq!(a.next().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(b.next().await.unwrap(), Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let fabric = MemoryFabric::new();
        let queue = ChannelAddress::queue("T_KB_ANY_NODE");
        assert!(fabric
            .publish(&queue, Bytes::from_static(b"dropped"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let fabric = MemoryFabric::new();
        let queue = ChannelAddress::queue("T_KB_ANY_NODE");
        let mut keep = fabric.subscribe(&queue).await.unwrap();
        let gone = fabric.subscribe(&queue).await.unwrap();
        drop(gone);

        fabric
            .publish(&queue, Bytes::from_static(b"m1"))
            .await
            .unwrap();
        fabric
            .publish(&queue, Bytes::from_static(b"m2"))
            .await
            .unwrap();

        assert_eq!(keep.next().await.unwrap(), Bytes::from_static(b"m1"));
        assert_eq!(keep.next().await.unwrap(), Bytes::from_static(b"m2"));
        assert_eq!(fabric.subscriber_count(&queue).await, 1);
    }
}
