//! `info` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::info;

use contracts::{ProjectorConfig, RigBlueprint};
use sync_engine::{DisplaySettings, TimingBudget};

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    rig: RigInfo,
    projectors: Vec<ProjectorInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sync_groups: Vec<SyncGroupInfo>,
}

#[derive(Serialize)]
struct RigInfo {
    name: String,
    batches: u32,
    batch_end_timeout_ms: u64,
}

#[derive(Serialize)]
struct ProjectorInfo {
    id: String,
    refresh_hz: f64,
    present_intervals: u32,
    delay_ms: f64,
    mode: String,
    patterns: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cameras: Vec<CameraInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timing: Option<TimingInfo>,
}

#[derive(Serialize)]
struct CameraInfo {
    id: String,
    exposure_ms: f64,
    readout_ms: f64,
}

#[derive(Serialize)]
struct TimingInfo {
    refresh_interval_us: f64,
    present_us: f64,
    delay_whole_intervals: u32,
    delay_fraction_us: f64,
    recommended_offset_us: f64,
    latest_offset_us: f64,
}

#[derive(Serialize)]
struct SyncGroupInfo {
    name: String,
    members: Vec<String>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&blueprint, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint, args);
    }

    Ok(())
}

/// Timing budget of a projector with the longest exposure among its cameras
fn timing_for(blueprint: &RigBlueprint, projector: &ProjectorConfig) -> Option<TimingInfo> {
    let exposure_ms = blueprint
        .cameras
        .iter()
        .filter(|c| c.projector == projector.id)
        .map(|c| c.exposure_ms)
        .fold(0.0, f64::max);
    let budget = TimingBudget::for_rate(
        projector.refresh_rate(),
        DisplaySettings {
            present_intervals: projector.present_intervals,
            delay_ms: projector.delay_ms,
        },
        Duration::from_secs_f64(exposure_ms / 1000.0),
    )
    .ok()?;

    let us = |ticks: i64| ticks as f64 / 1_000.0;
    Some(TimingInfo {
        refresh_interval_us: budget.refresh_ticks / 1_000.0,
        present_us: us(budget.present_ticks),
        delay_whole_intervals: budget.delay_whole_intervals,
        delay_fraction_us: us(budget.delay_fraction_ticks),
        recommended_offset_us: us(budget.recommended_offset),
        latest_offset_us: us(budget.latest_offset),
    })
}

fn build_config_info(blueprint: &RigBlueprint, args: &InfoArgs) -> ConfigInfo {
    let projectors = blueprint
        .projectors
        .iter()
        .map(|p| ProjectorInfo {
            id: p.id.clone(),
            refresh_hz: p.refresh_hz,
            present_intervals: p.present_intervals,
            delay_ms: p.delay_ms,
            mode: p.mode.label().to_string(),
            patterns: p.patterns.count,
            cameras: if args.cameras {
                blueprint
                    .cameras
                    .iter()
                    .filter(|c| c.projector == p.id)
                    .map(|c| CameraInfo {
                        id: c.id.clone(),
                        exposure_ms: c.exposure_ms,
                        readout_ms: c.readout_ms,
                    })
                    .collect()
            } else {
                Vec::new()
            },
            timing: if args.timing {
                timing_for(blueprint, p)
            } else {
                None
            },
        })
        .collect();

    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        rig: RigInfo {
            name: blueprint.rig.name.clone(),
            batches: blueprint.rig.batches,
            batch_end_timeout_ms: blueprint.rig.batch_end_timeout_ms,
        },
        projectors,
        sync_groups: blueprint
            .sync_groups
            .iter()
            .map(|g| SyncGroupInfo {
                name: g.name.clone(),
                members: g.members.clone(),
            })
            .collect(),
    }
}

fn print_config_info(blueprint: &RigBlueprint, args: &InfoArgs) {
    println!("=== scanrig configuration ===\n");

    println!("Rig");
    println!("   ├─ Version: {:?}", blueprint.version);
    println!("   ├─ Name: {}", blueprint.rig.name);
    println!("   ├─ Batches: {}", blueprint.rig.batches);
    println!(
        "   └─ Batch end timeout: {} ms",
        blueprint.rig.batch_end_timeout_ms
    );

    println!("\nProjectors ({})", blueprint.projectors.len());
    for (i, projector) in blueprint.projectors.iter().enumerate() {
        let is_last = i == blueprint.projectors.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let child_prefix = if is_last { "   " } else { "│  " };

        println!(
            "   {} {} ({} Hz, {} x interval, {} ms delay, {})",
            prefix,
            projector.id,
            projector.refresh_hz,
            projector.present_intervals,
            projector.delay_ms,
            projector.mode.label()
        );

        let cameras: Vec<_> = blueprint
            .cameras
            .iter()
            .filter(|c| c.projector == projector.id)
            .collect();
        if args.cameras && !cameras.is_empty() {
            for (j, camera) in cameras.iter().enumerate() {
                let camera_prefix = if j == cameras.len() - 1 { "└─" } else { "├─" };
                println!(
                    "   {}  {} {} (exposure {} ms, readout {} ms)",
                    child_prefix, camera_prefix, camera.id, camera.exposure_ms, camera.readout_ms
                );
            }
        } else {
            println!("   {}  └─ {} cameras", child_prefix, cameras.len());
        }

        if args.timing {
            match timing_for(blueprint, projector) {
                Some(timing) => println!(
                    "   {}     timing: delay = {} intervals + {:.1} us, window = [+{:.1} us, +{:.1} us)",
                    child_prefix,
                    timing.delay_whole_intervals,
                    timing.delay_fraction_us,
                    timing.recommended_offset_us,
                    timing.latest_offset_us
                ),
                None => println!("   {}     timing: unavailable", child_prefix),
            }
        }
    }

    if !blueprint.sync_groups.is_empty() {
        println!("\nSync Groups ({})", blueprint.sync_groups.len());
        for (i, group) in blueprint.sync_groups.iter().enumerate() {
            let prefix = if i == blueprint.sync_groups.len() - 1 {
                "└─"
            } else {
                "├─"
            };
            println!("   {} {}: {}", prefix, group.name, group.members.join(", "));
        }
    }

    println!();
}
