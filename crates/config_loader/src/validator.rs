//! Configuration validation
//!
//! Field rules come from the `validator` derives on the blueprint; the
//! cross-field rules live here:
//! - projector ids unique, camera ids unique
//! - every camera attached to an existing projector
//! - sync group members exist, appear in at most one group, no duplicates
//! - delay finite

use std::collections::HashSet;

use contracts::{ContractError, RigBlueprint};
use validator::Validate;

/// Validate a RigBlueprint
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(blueprint: &RigBlueprint) -> Result<(), ContractError> {
    validate_fields(blueprint)?;
    validate_projector_ids(blueprint)?;
    validate_delays(blueprint)?;
    validate_cameras(blueprint)?;
    validate_sync_groups(blueprint)?;
    Ok(())
}

/// Derived field rules (ranges, lengths)
fn validate_fields(blueprint: &RigBlueprint) -> Result<(), ContractError> {
    blueprint.validate().map_err(|errors| {
        let field = errors
            .field_errors()
            .keys()
            .next()
            .map(|k| k.to_string())
            .unwrap_or_else(|| "blueprint".to_string());
        ContractError::config_validation(field, errors.to_string())
    })
}

fn validate_projector_ids(blueprint: &RigBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for projector in &blueprint.projectors {
        if !seen.insert(projector.id.as_str()) {
            return Err(ContractError::config_validation(
                format!("projectors[id={}]", projector.id),
                "duplicate projector id",
            ));
        }
    }
    Ok(())
}

fn validate_delays(blueprint: &RigBlueprint) -> Result<(), ContractError> {
    for projector in &blueprint.projectors {
        if !projector.delay_ms.is_finite() {
            return Err(ContractError::config_validation(
                format!("projectors[{}].delay_ms", projector.id),
                format!("delay_ms must be finite, got {}", projector.delay_ms),
            ));
        }
    }
    Ok(())
}

fn validate_cameras(blueprint: &RigBlueprint) -> Result<(), ContractError> {
    let projectors: HashSet<_> = blueprint.projectors.iter().map(|p| p.id.as_str()).collect();
    let mut seen = HashSet::new();

    for camera in &blueprint.cameras {
        if !seen.insert(camera.id.as_str()) {
            return Err(ContractError::config_validation(
                format!("cameras[id={}]", camera.id),
                "duplicate camera id",
            ));
        }
        if !projectors.contains(camera.projector.as_str()) {
            return Err(ContractError::config_validation(
                format!("cameras[{}].projector", camera.id),
                format!("projector '{}' not defined", camera.projector),
            ));
        }
    }
    Ok(())
}

fn validate_sync_groups(blueprint: &RigBlueprint) -> Result<(), ContractError> {
    let projectors: HashSet<_> = blueprint.projectors.iter().map(|p| p.id.as_str()).collect();
    let mut grouped = HashSet::new();

    for group in &blueprint.sync_groups {
        let mut members = HashSet::new();
        for member in &group.members {
            if !projectors.contains(member.as_str()) {
                return Err(ContractError::config_validation(
                    format!("sync_groups[{}].members", group.name),
                    format!("projector '{member}' not defined"),
                ));
            }
            if !members.insert(member.as_str()) {
                return Err(ContractError::config_validation(
                    format!("sync_groups[{}].members", group.name),
                    format!("duplicate member '{member}'"),
                ));
            }
            if !grouped.insert(member.as_str()) {
                return Err(ContractError::config_validation(
                    format!("sync_groups[{}].members", group.name),
                    format!("projector '{member}' already belongs to another sync group"),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{
        AcquisitionMode, CameraConfig, ConfigVersion, PatternSetConfig, PixelFormat,
        ProjectorConfig, RigSettings, SyncGroupConfig,
    };

    fn projector(id: &str) -> ProjectorConfig {
        ProjectorConfig {
            id: id.into(),
            refresh_hz: 60.0,
            present_intervals: 1,
            delay_ms: 20.0,
            mode: AcquisitionMode::default(),
            fixed_captures: 1,
            patterns: PatternSetConfig {
                count: 4,
                width: 16,
                height: 16,
                format: PixelFormat::Gray8,
            },
        }
    }

    fn camera(id: &str, projector: &str) -> CameraConfig {
        CameraConfig {
            id: id.into(),
            projector: projector.into(),
            exposure_ms: 5.0,
            readout_ms: 1.0,
        }
    }

    fn minimal_blueprint() -> RigBlueprint {
        RigBlueprint {
            version: ConfigVersion::V1,
            rig: RigSettings {
                name: "bench".into(),
                batch_end_timeout_ms: 15_000,
                batches: 1,
            },
            projectors: vec![projector("p0"), projector("p1")],
            cameras: vec![camera("c0", "p0"), camera("c1", "p1")],
            sync_groups: vec![SyncGroupConfig {
                name: "pair".into(),
                members: vec!["p0".into(), "p1".into()],
            }],
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&minimal_blueprint()).is_ok());
    }

    #[test]
    fn test_duplicate_projector_id() {
        let mut bp = minimal_blueprint();
        bp.projectors[1].id = "p0".into();
        let err = validate(&bp).unwrap_err();
        assert!(err.to_string().contains("duplicate projector id"));
    }

    #[test]
    fn test_camera_unknown_projector() {
        let mut bp = minimal_blueprint();
        bp.cameras.push(camera("c2", "nowhere"));
        let err = validate(&bp).unwrap_err();
        assert!(err.to_string().contains("not defined"));
    }

    #[test]
    fn test_duplicate_camera_id() {
        let mut bp = minimal_blueprint();
        bp.cameras.push(camera("c0", "p1"));
        assert!(validate(&bp).is_err());
    }

    #[test]
    fn test_sync_group_needs_two_members() {
        let mut bp = minimal_blueprint();
        bp.sync_groups[0].members.pop();
        assert!(matches!(
            validate(&bp),
            Err(ContractError::ConfigValidation { .. })
        ));
    }

    #[test]
    fn test_projector_in_two_groups() {
        let mut bp = minimal_blueprint();
        bp.projectors.push(projector("p2"));
        bp.sync_groups.push(SyncGroupConfig {
            name: "second".into(),
            members: vec!["p1".into(), "p2".into()],
        });
        let err = validate(&bp).unwrap_err();
        assert!(err.to_string().contains("another sync group"));
    }

    #[test]
    fn test_infinite_delay_rejected() {
        let mut bp = minimal_blueprint();
        bp.projectors[0].delay_ms = f64::INFINITY;
        assert!(validate(&bp).is_err());
    }

    #[test]
    fn test_zero_present_intervals_rejected() {
        let mut bp = minimal_blueprint();
        bp.projectors[0].present_intervals = 0;
        assert!(validate(&bp).is_err());
    }
}
