//! Message fabric abstraction.
//!
//! Components talk to channel addresses, never to transports. Two fabrics
//! exist: [`NatsFabric`] for distributed deployments and [`MemoryFabric`]
//! for tests and single-process runs. Queue addresses deliver each message
//! to exactly one subscriber; topic addresses deliver to all of them.

pub mod memory;
pub mod messages;
pub mod nats;

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::channels::ChannelAddress;
use crate::types::{ArchiveError, Result};

pub use memory::MemoryFabric;
pub use messages::{ArchiveMessage, BatchFailure, BatchSpec, StoreOutcome, PROTOCOL_VERSION};
pub use nats::{FabricArgs, NatsFabric};

/// A stream of raw payloads delivered to one subscription.
pub struct Subscription {
    rx: mpsc::Receiver<Bytes>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self { rx }
    }

    /// Next payload, or None once the fabric drops the subscription.
    pub async fn next(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

/// Transport-independent publish/subscribe contract.
#[async_trait]
pub trait MessageFabric: Send + Sync {
    /// Publish a payload to an address. Publishing to an address nobody
    /// listens on is not an error; the message is simply dropped.
    async fn publish(&self, addr: &ChannelAddress, payload: Bytes) -> Result<()>;

    /// Subscribe to an address. Queue subscriptions compete for messages;
    /// topic subscriptions each receive every message.
    async fn subscribe(&self, addr: &ChannelAddress) -> Result<Subscription>;
}

/// One request/reply exchange: subscribe a fresh reply inbox, publish the
/// request, await a single decoded reply within the timeout.
///
/// Timing out maps to [`ArchiveError::Timeout`] naming the target channel,
/// so callers can count it like a failure while logging it distinctly.
pub async fn request(
    fabric: &dyn MessageFabric,
    target: &ChannelAddress,
    reply_addr: &ChannelAddress,
    msg: &ArchiveMessage,
    timeout: Duration,
) -> Result<ArchiveMessage> {
    let mut sub = fabric.subscribe(reply_addr).await?;
    fabric.publish(target, msg.to_bytes()?).await?;
    match tokio::time::timeout(timeout, sub.next()).await {
        Ok(Some(payload)) => ArchiveMessage::from_bytes(&payload),
        Ok(None) => Err(ArchiveError::Fabric(format!(
            "reply subscription on {reply_addr} closed"
        ))),
        Err(_) => Err(ArchiveError::Timeout {
            channel: target.to_string(),
        }),
    }
}

/// Publish a decoded message.
pub async fn publish_message(
    fabric: &dyn MessageFabric,
    addr: &ChannelAddress,
    msg: &ArchiveMessage,
) -> Result<()> {
    fabric.publish(addr, msg.to_bytes()?).await
}
