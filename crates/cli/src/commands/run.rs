//! `run` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{info, warn};

use contracts::{AcquisitionMode, RigBlueprint};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::rig::{Rig, RigConfig};

/// Execute the `run` command
pub async fn run_rig(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let mode_override = args.mode.map(AcquisitionMode::from);
    if let Some(mode) = mode_override {
        info!(mode = mode.label(), "Overriding acquisition mode from CLI");
    }
    let batches = args.batches.unwrap_or(blueprint.rig.batches);

    info!(
        rig = %blueprint.rig.name,
        projectors = blueprint.projectors.len(),
        cameras = blueprint.cameras.len(),
        sync_groups = blueprint.sync_groups.len(),
        batches,
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint, mode_override);
        return Ok(());
    }

    let config = RigConfig {
        blueprint,
        batches,
        mode_override,
        batch_timeout: (args.batch_timeout > 0).then(|| Duration::from_secs(args.batch_timeout)),
        preview: Duration::from_millis(args.preview_ms),
        metrics_port: (args.metrics_port > 0).then_some(args.metrics_port),
    };

    // Device threads block; keep them off the async runtime
    let rig = tokio::task::spawn_blocking(move || Rig::build(config))
        .await
        .context("Rig setup task failed")??;

    info!("Starting acquisition...");
    let mut acquisition = tokio::task::spawn_blocking(move || rig.run());

    tokio::select! {
        joined = &mut acquisition => {
            let stats = joined
                .context("Acquisition task failed")?
                .context("Acquisition failed")?;
            info!(
                frames_projected = stats.frames_projected(),
                frames_captured = stats.frames_captured(),
                duration_secs = stats.duration.as_secs_f64(),
                drop_rate = format!("{:.2}%", stats.drop_rate()),
                "Acquisition completed successfully"
            );
            stats.print_summary();
        }
        _ = setup_shutdown_signal() => {
            warn!("Received shutdown signal, exiting without waiting for the running batch");
        }
    }

    info!("scanrig finished");
    Ok(())
}

/// Ctrl+C and SIGTERM
async fn setup_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &RigBlueprint, mode_override: Option<AcquisitionMode>) {
    println!("\n=== Configuration Summary ===\n");
    println!("Rig: {}", blueprint.rig.name);
    println!("  Batches: {}", blueprint.rig.batches);
    println!("  Batch end timeout: {} ms", blueprint.rig.batch_end_timeout_ms);

    println!("\nProjectors ({}):", blueprint.projectors.len());
    for projector in &blueprint.projectors {
        let mode = mode_override.unwrap_or(projector.mode);
        let cameras = blueprint
            .cameras
            .iter()
            .filter(|c| c.projector == projector.id)
            .count();
        println!(
            "  - {} ({} Hz, {} intervals, {} ms delay, {}) - {} patterns, {} cameras",
            projector.id,
            projector.refresh_hz,
            projector.present_intervals,
            projector.delay_ms,
            mode.label(),
            projector.patterns.count,
            cameras
        );
    }

    if !blueprint.sync_groups.is_empty() {
        println!("\nSync Groups:");
        for group in &blueprint.sync_groups {
            println!("  - {}: {}", group.name, group.members.join(", "));
        }
    }

    println!();
}
