//! Reliquary replica node daemon.
//!
//! Run one per replica instance, full-content or checksum-only. Serves
//! store/retrieve/remove/checksum/batch requests from the replica's
//! fabric channels.
//!
//! Usage:
//!   reliquary-node --environment PROD --replica-id KB \
//!       --storage-roots /archive/dir1,/archive/dir2
//!
//! A checksum-only replica instead runs with:
//!   reliquary-node --environment PROD --replica-id CS \
//!       --replica-kind checksum --ledger-path /archive/cs-ledger

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use reliquary::{
    channels::ChannelDirectory,
    checksum::ChecksumArchive,
    config::NodeArgs,
    fabric::NatsFabric,
    logging,
    node::{NodeService, ReplicaBackend},
    storage::{StorageNode, StorageNodeConfig},
    types::ReplicaKind,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let args = NodeArgs::parse();
    logging::init(&args.log_level);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }
    let kind = args.kind().expect("validated above");

    info!(
        "Starting replica node {} of {} ({:?}, fabric: {})",
        args.node_id(),
        args.replica_id,
        kind,
        args.fabric.fabric_url
    );

    let directory = match ChannelDirectory::new(&args.environment, &args.instance_id) {
        Ok(directory) => directory,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let backend = match build_backend(&args, kind) {
        Ok(backend) => backend,
        Err(e) => {
            error!("Failed to open replica storage: {}", e);
            std::process::exit(1);
        }
    };

    let fabric = match NatsFabric::connect(
        &args.fabric,
        &format!("reliquary-node-{}-{}", args.replica_id, args.node_id()),
    )
    .await
    {
        Ok(fabric) => Arc::new(fabric),
        Err(e) => {
            error!("Fabric connection failed: {}", e);
            std::process::exit(1);
        }
    };

    let service = Arc::new(NodeService::new(
        fabric,
        directory,
        args.replica(),
        args.node_id(),
        backend,
    ));

    let runner = Arc::clone(&service);
    let server = tokio::spawn(async move {
        if let Err(e) = runner.run().await {
            error!("Node service error: {}", e);
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            service.cancel_batches();
        }
        result = server => {
            if let Err(e) = result {
                error!("Node task error: {}", e);
            }
        }
    }

    info!("Replica node shutting down");
    Ok(())
}

fn build_backend(args: &NodeArgs, kind: ReplicaKind) -> reliquary::Result<ReplicaBackend> {
    match kind {
        ReplicaKind::FullContent => {
            let node = StorageNode::open(
                StorageNodeConfig {
                    roots: args.root_paths(),
                    min_space_left: args.min_space_left,
                    ledger_path: args.ledger_path()?,
                },
                args.free_space_provider()?,
            )?;
            Ok(ReplicaBackend::Full(Arc::new(node)))
        }
        ReplicaKind::ChecksumOnly => {
            let archive = ChecksumArchive::open(&args.ledger_path()?)?;
            Ok(ReplicaBackend::ChecksumOnly(Arc::new(archive)))
        }
    }
}
