//! Reliquary coordinator daemon.
//!
//! Assembles the component graph once at startup - channel directory,
//! fabric connection, repository coordinator, reconciler - and serves
//! client requests from the coordinator entry queue until shutdown.

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

use reliquary::{
    channels::ChannelDirectory,
    config::Args,
    coordinator::{CoordinatorService, RepositoryCoordinator},
    fabric::NatsFabric,
    logging,
    preservation::PreservationReconciler,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    logging::init(&args.log_level);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }
    let replicas = args.replica_specs().expect("validated above");

    info!("======================================");
    info!("  Reliquary - bit-archive coordinator");
    info!("======================================");
    info!("Environment: {}", args.environment);
    info!("Replicas: {}", args.replicas);
    info!(
        "Quorum: {}",
        if args.quorum == 0 {
            "all full-content".to_string()
        } else {
            args.quorum.to_string()
        }
    );
    info!("Store retries: {}", args.store_retries);
    info!("Reply timeout: {}s", args.reply_timeout_secs);
    info!("Fabric: {}", args.fabric.fabric_url);
    info!("======================================");

    let directory = match ChannelDirectory::new(&args.environment, &args.instance_id) {
        Ok(directory) => directory,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let fabric = match NatsFabric::connect(&args.fabric, "reliquary-coordinator").await {
        Ok(fabric) => Arc::new(fabric),
        Err(e) => {
            error!("Fabric connection failed: {}", e);
            std::process::exit(1);
        }
    };

    let coordinator = Arc::new(RepositoryCoordinator::new(
        fabric.clone(),
        directory,
        replicas,
        args.coordinator_settings(),
    )?);

    // Periodic reconciliation, when configured.
    if args.reconcile_interval_secs > 0 {
        let reconciler = PreservationReconciler::new(Arc::clone(&coordinator));
        let interval = std::time::Duration::from_secs(args.reconcile_interval_secs);
        let report_dir = args.report_dir.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                match reconciler.run().await {
                    Ok(report) => {
                        if let Some(dir) = &report_dir {
                            if let Err(e) = write_report(dir, &report) {
                                warn!("Failed to write preservation report: {}", e);
                            }
                        }
                    }
                    Err(e) => warn!("Reconciliation run failed: {}", e),
                }
            }
        });
        info!(
            "Reconciler scheduled every {}s",
            args.reconcile_interval_secs
        );
    } else {
        info!("Reconciler runs on demand only");
    }

    let service = CoordinatorService::new(fabric, coordinator);
    let server = tokio::spawn(async move {
        if let Err(e) = service.run().await {
            error!("Coordinator service error: {}", e);
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server => {
            if let Err(e) = result {
                error!("Coordinator task error: {}", e);
            }
        }
    }

    info!("Coordinator shutting down");
    Ok(())
}

fn write_report(
    dir: &std::path::Path,
    report: &reliquary::PreservationReport,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!(
        "preservation-{}.json",
        report.generated_at.format("%Y%m%dT%H%M%S")
    ));
    std::fs::write(&path, serde_json::to_vec_pretty(report)?)?;
    info!("Preservation report written to {}", path.display());
    Ok(())
}
