//! Replica-local storage of immutable archive files.

pub mod ledger;
pub mod node;

pub use ledger::{Ledger, LedgerEntry};
pub use node::{ArchiveFile, StorageNode, StorageNodeConfig};
