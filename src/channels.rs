//! Channel directory: deterministic construction of fabric addresses.
//!
//! Every component routes messages through addresses built here. An address
//! is a pure function of {environment, replica-or-COMMON, role, optional
//! node/instance qualifiers}; two addresses with equal derivation are equal
//! regardless of object identity, so they can key listener tables.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{ArchiveError, ReplicaId, Result};

/// Replica slot for channels shared by all replicas.
pub const COMMON: &str = "COMMON";

/// Queue shared by all storage nodes of one replica (work distribution).
const ROLE_ANY_NODE: &str = "ANY_NODE";
/// Unicast queue for one specific node process.
const ROLE_THIS_NODE: &str = "THIS_NODE";
/// Client-facing entry queue of the repository coordinator.
const ROLE_THE_REPO: &str = "THE_REPO";
/// Queue of the preservation reconciler.
const ROLE_THE_RECONCILER: &str = "THE_RECONCILER";
/// Broadcast topic for node readiness and status.
const ROLE_NODE_STATUS: &str = "NODE_STATUS";
/// Prefix for per-exchange reply inboxes.
const ROLE_REPLY: &str = "REPLY";

/// Delivery semantics of a channel.
///
/// Queue: exactly one of possibly many listeners receives a given message.
/// Topic: every listener receives every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Queue,
    Topic,
}

/// A logical fabric address. Topic-vs-queue is a property of the address
/// value, not encoded in the name string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelAddress {
    name: String,
    kind: ChannelKind,
}

impl ChannelAddress {
    pub fn queue(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ChannelKind::Queue,
        }
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ChannelKind::Topic,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ChannelKind::Queue => write!(f, "[Queue '{}']", self.name),
            ChannelKind::Topic => write!(f, "[Topic '{}']", self.name),
        }
    }
}

/// Directory of channel addresses for one environment.
///
/// Built once at startup from validated configuration and shared read-only;
/// all resolvers are pure and never touch the network.
#[derive(Debug, Clone)]
pub struct ChannelDirectory {
    environment: String,
    instance_id: String,
}

impl ChannelDirectory {
    /// Create a directory for an environment (e.g. "PROD").
    ///
    /// Fails with a configuration error when the environment name is unset,
    /// since every address would be ambiguous across deployments.
    pub fn new(environment: impl Into<String>, instance_id: impl Into<String>) -> Result<Self> {
        let environment = environment.into();
        if environment.trim().is_empty() {
            return Err(ArchiveError::Configuration(
                "environment name must not be empty".to_string(),
            ));
        }
        if environment.contains(char::is_whitespace) {
            return Err(ArchiveError::Configuration(format!(
                "environment name '{environment}' must not contain whitespace"
            )));
        }
        Ok(Self {
            environment,
            instance_id: sanitize(&instance_id.into()),
        })
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Work-distribution queue shared by all nodes of a replica. Any one
    /// listening node consumes each message.
    pub fn any_node(&self, replica: &ReplicaId) -> ChannelAddress {
        ChannelAddress::queue(self.derive(replica.as_str(), ROLE_ANY_NODE, None))
    }

    /// Unicast queue of one specific node process of a replica.
    pub fn this_node(&self, replica: &ReplicaId, node_id: &str) -> ChannelAddress {
        ChannelAddress::queue(self.derive(replica.as_str(), ROLE_THIS_NODE, Some(node_id)))
    }

    /// Client-facing entry queue of the repository coordinator.
    pub fn the_coordinator(&self) -> ChannelAddress {
        ChannelAddress::queue(self.derive(COMMON, ROLE_THE_REPO, None))
    }

    /// Queue of the preservation reconciler.
    pub fn the_reconciler(&self) -> ChannelAddress {
        ChannelAddress::queue(self.derive(COMMON, ROLE_THE_RECONCILER, None))
    }

    /// Broadcast topic carrying node readiness and status. Every listener
    /// sees every message.
    pub fn node_status(&self) -> ChannelAddress {
        ChannelAddress::topic(self.derive(COMMON, ROLE_NODE_STATUS, None))
    }

    /// A fresh unicast reply inbox for one request/reply exchange.
    pub fn reply_inbox(&self, role: &str) -> ChannelAddress {
        let unique = format!("{}_{}", sanitize(role), uuid::Uuid::new_v4().simple());
        ChannelAddress::queue(self.derive(COMMON, ROLE_REPLY, Some(&unique)))
    }

    /// `<environment>_<replicaOrCOMMON>_<role>[_<qualifier>[_<instanceId>]]`
    fn derive(&self, replica: &str, role: &str, qualifier: Option<&str>) -> String {
        let mut name = format!("{}_{}_{}", self.environment, replica, role);
        if let Some(q) = qualifier {
            name.push('_');
            name.push_str(&sanitize(q));
            if !self.instance_id.is_empty() {
                name.push('_');
                name.push_str(&self.instance_id);
            }
        }
        name
    }
}

/// Qualifiers may carry dots and colons (IP addresses, host names); fold
/// them into the underscore-separated name format.
fn sanitize(raw: &str) -> String {
    raw.replace(['.', ':', ' '], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> ChannelDirectory {
        ChannelDirectory::new("TEST", "").unwrap()
    }

    #[test]
    fn test_rejects_empty_environment() {
        assert!(ChannelDirectory::new("", "").is_err());
        assert!(ChannelDirectory::new("   ", "").is_err());
        assert!(ChannelDirectory::new("two words", "").is_err());
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let replica = ReplicaId::new("KB");
        let a = directory().any_node(&replica);
        let b = directory().any_node(&replica);
        assert_eq!(a, b);
        assert_eq!(a.name(), "TEST_KB_ANY_NODE");
        assert_eq!(a.kind(), ChannelKind::Queue);
    }

    #[test]
    fn test_equal_addresses_hash_alike() {
        use std::collections::HashMap;
        let replica = ReplicaId::new("KB");
        let mut table = HashMap::new();
        table.insert(directory().any_node(&replica), 1);
        assert_eq!(table.get(&directory().any_node(&replica)), Some(&1));
    }

    #[test]
    fn test_queue_and_topic_differ() {
        let queue = ChannelAddress::queue("TEST_COMMON_NODE_STATUS");
        let topic = directory().node_status();
        assert_eq!(queue.name(), topic.name());
        assert_ne!(queue, topic);
    }

    #[test]
    fn test_common_channels() {
        assert_eq!(directory().the_coordinator().name(), "TEST_COMMON_THE_REPO");
        assert_eq!(
            directory().the_reconciler().name(),
            "TEST_COMMON_THE_RECONCILER"
        );
        assert_eq!(directory().node_status().kind(), ChannelKind::Topic);
    }

    #[test]
    fn test_node_qualifier_includes_instance() {
        let dir = ChannelDirectory::new("TEST", "BAKB").unwrap();
        let addr = dir.this_node(&ReplicaId::new("KB"), "10.0.0.7");
        assert_eq!(addr.name(), "TEST_KB_THIS_NODE_10_0_0_7_BAKB");
    }

    #[test]
    fn test_reply_inboxes_are_unique() {
        let dir = directory();
        assert_ne!(dir.reply_inbox("store"), dir.reply_inbox("store"));
    }
}
