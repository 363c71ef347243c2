//! NATS-backed message fabric.
//!
//! Connection management and the channel-to-subject mapping: queue
//! addresses become queue-group subscriptions (the group name is the
//! channel name, so all listeners on the same address compete for
//! messages), topic addresses become plain subscriptions.

use async_nats::ConnectOptions;
use async_trait::async_trait;
use bytes::Bytes;
use clap::Parser;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{MessageFabric, Subscription};
use crate::channels::{ChannelAddress, ChannelKind};
use crate::types::{ArchiveError, Result};

/// Keep-alive ping interval.
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);

const SUBSCRIPTION_BUFFER: usize = 256;

/// Fabric connection settings, shared by both daemons.
#[derive(Parser, Debug, Clone)]
pub struct FabricArgs {
    /// NATS server URL
    #[arg(long, env = "FABRIC_URL", default_value = "nats://127.0.0.1:4222")]
    pub fabric_url: String,

    /// NATS username (optional)
    #[arg(long, env = "FABRIC_USER")]
    pub fabric_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "FABRIC_PASSWORD")]
    pub fabric_password: Option<String>,
}

/// NATS client wrapper implementing the fabric contract.
#[derive(Clone)]
pub struct NatsFabric {
    client: async_nats::Client,
}

impl NatsFabric {
    /// Connect to NATS. Fails fast when the server is unreachable;
    /// reconnection is handled by the client after the first success.
    pub async fn connect(args: &FabricArgs, name: &str) -> Result<Self> {
        info!("Connecting to fabric at {}", args.fabric_url);

        let mut options = ConnectOptions::new()
            .name(name)
            .ping_interval(DEFAULT_PING_INTERVAL)
            .connection_timeout(Duration::from_secs(5));

        if let (Some(user), Some(pass)) = (&args.fabric_user, &args.fabric_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(&args.fabric_url)
            .await
            .map_err(|e| ArchiveError::Fabric(format!("Failed to connect: {e}")))?;

        info!("Connected to fabric at {}", args.fabric_url);

        Ok(Self { client })
    }

    /// Flush pending messages.
    pub async fn flush(&self) -> Result<()> {
        self.client
            .flush()
            .await
            .map_err(|e| ArchiveError::Fabric(format!("Flush failed: {e}")))
    }
}

#[async_trait]
impl MessageFabric for NatsFabric {
    async fn publish(&self, addr: &ChannelAddress, payload: Bytes) -> Result<()> {
        self.client
            .publish(addr.name().to_string(), payload)
            .await
            .map_err(|e| ArchiveError::Fabric(format!("Publish to {addr} failed: {e}")))
    }

    async fn subscribe(&self, addr: &ChannelAddress) -> Result<Subscription> {
        let mut subscriber = match addr.kind() {
            // The queue group is the channel name itself: every listener on
            // the same address joins one group, so each message reaches
            // exactly one of them.
            ChannelKind::Queue => self
                .client
                .queue_subscribe(addr.name().to_string(), addr.name().to_string())
                .await
                .map_err(|e| ArchiveError::Fabric(format!("Subscribe to {addr} failed: {e}")))?,
            ChannelKind::Topic => self
                .client
                .subscribe(addr.name().to_string())
                .await
                .map_err(|e| ArchiveError::Fabric(format!("Subscribe to {addr} failed: {e}")))?,
        };

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let channel = addr.clone();
        tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                if tx.send(message.payload).await.is_err() {
                    // Receiver dropped; unsubscribe by falling out.
                    break;
                }
            }
            if let Err(e) = subscriber.unsubscribe().await {
                warn!("Unsubscribe from {} failed: {}", channel, e);
            }
        });

        Ok(Subscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    // Exercising this transport needs a running NATS server; the fabric
    // contract itself is covered against MemoryFabric in fabric::memory.
}
