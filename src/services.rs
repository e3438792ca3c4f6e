//! Service-call parsing
//!
//! Turns a service name plus its JSON data into a typed intent: either a
//! camera action handled by the pipeline or a [`VacuumCommand`] for the
//! translator. Service names may carry the integration domain prefix.

use crate::command::{lenient_int, VacuumCommand, ValidationError};
use crate::render::MAX_OBSTACLE_COORD;
use serde_json::Value;

/// Integration domain used as service prefix
pub const DOMAIN: &str = "mqtt_vacuum_camera";

/// Camera-side actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraService {
    /// Reload the integration (delegated to the platform)
    Reload,
    TurnOn,
    TurnOff,
    Snapshot { filename: String },
    ResetTrims { entity_ids: Vec<String> },
    /// Re-render with an obstacle marker at map coordinates
    ObstacleView { x: u32, y: u32 },
}

/// A parsed service call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    Camera(CameraService),
    Vacuum(VacuumCommand),
}

impl ServiceCall {
    /// Parse a service call
    pub fn parse(service: &str, data: &Value) -> Result<Self, ValidationError> {
        let name = service
            .strip_prefix(DOMAIN)
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(service);

        let call = match name {
            "reload" => ServiceCall::Camera(CameraService::Reload),
            "turn_on" => ServiceCall::Camera(CameraService::TurnOn),
            "turn_off" => ServiceCall::Camera(CameraService::TurnOff),
            "snapshot" => {
                let filename = data
                    .get("filename")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or(ValidationError::MissingField("filename"))?;
                ServiceCall::Camera(CameraService::Snapshot {
                    filename: filename.to_string(),
                })
            }
            "reset_trims" => {
                let entity_ids = entity_ids(data);
                if entity_ids.is_empty() {
                    return Err(ValidationError::NoEntityIdProvided);
                }
                ServiceCall::Camera(CameraService::ResetTrims { entity_ids })
            }
            "obstacle_view" => ServiceCall::Camera(CameraService::ObstacleView {
                x: obstacle_coordinate(data, "coordinates_x")?,
                y: obstacle_coordinate(data, "coordinates_y")?,
            }),
            "vacuum_go_to" => ServiceCall::Vacuum(VacuumCommand::go_to(data)?),
            "vacuum_clean_zone" => ServiceCall::Vacuum(VacuumCommand::clean_zone(data)?),
            "vacuum_clean_segments" => ServiceCall::Vacuum(VacuumCommand::clean_segments(data)?),
            "vacuum_map_save" => ServiceCall::Vacuum(VacuumCommand::map_save(data)?),
            "vacuum_map_load" => ServiceCall::Vacuum(VacuumCommand::map_load(data)?),
            other => return Err(ValidationError::UnknownService(other.to_string())),
        };
        Ok(call)
    }
}

/// Target entity ids, given as a string or a list of strings
///
/// Looks at `entity_id` and the nested `target.entity_id` form.
pub fn entity_ids(data: &Value) -> Vec<String> {
    let raw = data
        .get("entity_id")
        .or_else(|| data.get("target").and_then(|t| t.get("entity_id")));
    let ids: Vec<&str> = match raw {
        Some(Value::String(s)) => s.split(',').collect(),
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };
    ids.into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Obstacle coordinate, clamped to 0..=90000
fn obstacle_coordinate(data: &Value, field: &'static str) -> Result<u32, ValidationError> {
    let raw = data
        .get(field)
        .filter(|v| !v.is_null())
        .ok_or(ValidationError::MissingField(field))?;
    let value = lenient_int(raw).ok_or_else(|| ValidationError::InvalidField {
        field,
        reason: format!("{} is not an integer", raw),
    })?;
    Ok(value.clamp(0, MAX_OBSTACLE_COORD as i64) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_camera_services() {
        assert_eq!(
            ServiceCall::parse("mqtt_vacuum_camera.turn_off", &json!({})).unwrap(),
            ServiceCall::Camera(CameraService::TurnOff)
        );
        assert_eq!(
            ServiceCall::parse("snapshot", &json!({ "filename": "/tmp/snap.png" })).unwrap(),
            ServiceCall::Camera(CameraService::Snapshot {
                filename: "/tmp/snap.png".to_string()
            })
        );
        assert_eq!(
            ServiceCall::parse("snapshot", &json!({})).unwrap_err(),
            ValidationError::MissingField("filename")
        );
    }

    #[test]
    fn test_reset_trims_needs_entities() {
        let err = ServiceCall::parse("reset_trims", &json!({})).unwrap_err();
        assert_eq!(err.translation_key(), "no_entity_id_provided");

        let call = ServiceCall::parse(
            "reset_trims",
            &json!({ "entity_id": ["camera.robot", "camera.other"] }),
        )
        .unwrap();
        assert_eq!(
            call,
            ServiceCall::Camera(CameraService::ResetTrims {
                entity_ids: vec!["camera.robot".to_string(), "camera.other".to_string()]
            })
        );
    }

    #[test]
    fn test_entity_ids_forms() {
        assert_eq!(entity_ids(&json!({ "entity_id": "camera.a, camera.b" })), vec![
            "camera.a".to_string(),
            "camera.b".to_string()
        ]);
        assert_eq!(
            entity_ids(&json!({ "target": { "entity_id": ["camera.a"] } })),
            vec!["camera.a".to_string()]
        );
        assert!(entity_ids(&json!({ "entity_id": "" })).is_empty());
    }

    #[test]
    fn test_obstacle_view_clamps() {
        let call = ServiceCall::parse(
            "obstacle_view",
            &json!({ "coordinates_x": "-20", "coordinates_y": 100000 }),
        )
        .unwrap();
        assert_eq!(
            call,
            ServiceCall::Camera(CameraService::ObstacleView { x: 0, y: 90000 })
        );
    }

    #[test]
    fn test_vacuum_services_route_to_translator() {
        let call = ServiceCall::parse(
            "vacuum_clean_segments",
            &json!({ "segments": [1, 2], "repeats": 2 }),
        )
        .unwrap();
        assert!(matches!(call, ServiceCall::Vacuum(VacuumCommand::CleanSegments(_))));

        let err = ServiceCall::parse("vacuum_dance", &json!({})).unwrap_err();
        assert_eq!(err, ValidationError::UnknownService("vacuum_dance".to_string()));
    }
}
