//! Reliquary - replicated bit-archive for harvested web content.
//!
//! Preserves large immutable archival records across independent storage
//! replicas and guards their long-term integrity by cross-replica checksum
//! comparison. All operations travel over a named publish/subscribe
//! message fabric.
//!
//! ## Components
//!
//! - **Channels**: deterministic fabric addresses per environment
//! - **Fabric**: NATS-backed and in-process publish/subscribe transports
//! - **Storage**: replica-local file store with spillover placement
//! - **Batch**: per-file jobs aggregated across storage roots
//! - **Checksum**: content-free integrity witness replica
//! - **Coordinator**: one logical store fanned out to every replica
//! - **Preservation**: cross-replica audit and corrective-action queue

pub mod batch;
pub mod channels;
pub mod checksum;
pub mod config;
pub mod coordinator;
pub mod fabric;
pub mod freespace;
pub mod logging;
pub mod node;
pub mod preservation;
pub mod storage;
pub mod types;

pub use channels::{ChannelAddress, ChannelDirectory, ChannelKind};
pub use coordinator::{CoordinatorService, RepositoryCoordinator, StoreReport};
pub use preservation::{PreservationReconciler, PreservationReport, PreservationState};
pub use types::{ArchiveError, ReplicaId, ReplicaKind, ReplicaSpec, Result};
