//! `validate` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use contracts::{AcquisitionMode, RigBlueprint};

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    rig: String,
    projector_count: usize,
    camera_count: usize,
    sync_group_count: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: (!warnings.is_empty()).then_some(warnings),
                summary: Some(ConfigSummary {
                    version: format!("{:?}", blueprint.version),
                    rig: blueprint.rig.name.clone(),
                    projector_count: blueprint.projectors.len(),
                    camera_count: blueprint.cameras.len(),
                    sync_group_count: blueprint.sync_groups.len(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &RigBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    for projector in &blueprint.projectors {
        let cameras = blueprint
            .cameras
            .iter()
            .filter(|c| c.projector == projector.id)
            .collect::<Vec<_>>();
        if cameras.is_empty() {
            warnings.push(format!(
                "Projector '{}' has no cameras - batches only project",
                projector.id
            ));
        }

        if projector.mode == AcquisitionMode::NonBlocking {
            let present_ms = f64::from(projector.present_intervals) * 1000.0 / projector.refresh_hz;
            for camera in cameras.iter().filter(|c| c.exposure_ms >= present_ms) {
                warnings.push(format!(
                    "Camera '{}' exposes {} ms, longer than a frame of '{}' ({:.2} ms) - triggers will be dropped",
                    camera.id, camera.exposure_ms, projector.id, present_ms
                ));
            }
        }
    }

    for group in &blueprint.sync_groups {
        let modes: Vec<AcquisitionMode> = blueprint
            .projectors
            .iter()
            .filter(|p| group.members.contains(&p.id))
            .map(|p| p.mode)
            .collect();
        if modes.windows(2).any(|w| w[0] != w[1]) {
            warnings.push(format!(
                "Sync group '{}' mixes acquisition modes",
                group.name
            ));
        }
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Rig: {}", summary.rig);
            println!("  Projectors: {}", summary.projector_count);
            println!("  Cameras: {}", summary.camera_count);
            println!("  Sync groups: {}", summary.sync_group_count);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const RIG: &str = r#"
[rig]
name = "bench"

[[projectors]]
id = "left"
refresh_hz = 120.0
present_intervals = 2
delay_ms = 10.0
mode = { kind = "non_blocking" }
patterns = { count = 4, width = 8, height = 8 }

[[projectors]]
id = "right"
refresh_hz = 120.0
patterns = { count = 4, width = 8, height = 8 }

[[cameras]]
id = "cam-left"
projector = "left"
exposure_ms = 20.0

[[sync_groups]]
name = "pair"
members = ["left", "right"]
"#;

    #[test]
    fn test_warnings_for_rig() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        file.write_all(RIG.as_bytes()).unwrap();

        let result = validate_config(&ValidateArgs {
            config: file.path().to_path_buf(),
            json: true,
        });
        assert!(result.valid, "{:?}", result.error);
        let warnings = result.warnings.unwrap();
        assert!(warnings.iter().any(|w| w.contains("'right' has no cameras")));
        assert!(warnings.iter().any(|w| w.contains("'cam-left' exposes")));
        assert!(warnings.iter().any(|w| w.contains("mixes acquisition modes")));
    }

    #[test]
    fn test_missing_file() {
        let result = validate_config(&ValidateArgs {
            config: "/nonexistent/rig.toml".into(),
            json: false,
        });
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("File not found"));
    }
}
