//! Tracing setup and the audit event stream.
//!
//! Removals and corrective decisions are rare, deliberate administrative
//! actions; they are emitted on the dedicated `audit` target so operators
//! can route them to durable storage independently of operational logs.

use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber for a daemon.
///
/// `RUST_LOG` wins when set; otherwise the crate logs at `log_level` and
/// everything else at info.
pub fn init(log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("reliquary={log_level},info").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Audit record for an administrative file removal.
pub fn audit_removal(filename: &str, checksum: &str, size: u64, quarantined_to: &Path) {
    tracing::info!(
        target: "audit",
        filename,
        checksum,
        size,
        quarantined_to = %quarantined_to.display(),
        "file removed and quarantined"
    );
}

/// Audit record for a corrective action queued by the reconciler.
/// Queued only: nothing is executed without explicit confirmation.
pub fn audit_corrective_action(filename: &str, replica: &str, action: &str) {
    tracing::info!(
        target: "audit",
        filename,
        replica,
        action,
        "corrective action queued"
    );
}
