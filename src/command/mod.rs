//! Command translator
//!
//! Validates structured vacuum intents and turns each accepted one into a
//! single outbound payload for the target's dialect. Translation is pure:
//! nothing here touches renderer or palette state, and failures go back to
//! the caller without retries.
//!
//! Numeric fields accept JSON numbers or numeric strings, since service
//! calls coming from UI forms often carry `"26300"` rather than `26300`.

mod dispatch;

pub use self::dispatch::{CommandDispatcher, DispatchError};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Allowed cleaning repeat counts
pub const REPEATS_RANGE: std::ops::RangeInclusive<i64> = 1..=3;

/// Command validation errors, each with a user-facing translation key
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("No entity id provided")]
    NoEntityIdProvided,
    #[error("Either zone or zone_ids is required")]
    MissingZoneOrZoneIds,
    #[error("zone must be a list of [x1, y1, x2, y2] lists")]
    ZoneMustBeList,
    #[error("zone_ids must be a list of names")]
    ZoneIdMustBeList,
    #[error("zone entry {index} has {len} values, expected 4")]
    ZoneListLength { index: usize, len: usize },
    #[error("zone and zone_ids are mutually exclusive")]
    ConflictingZoneSelection,
    #[error("{feature} is not supported by {dialect} vacuums")]
    UnsupportedDialect {
        feature: &'static str,
        dialect: Dialect,
    },
    #[error("Missing required field {0}")]
    MissingField(&'static str),
    #[error("Invalid value for {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("repeats = {0} outside 1..=3")]
    RepeatsOutOfRange(i64),
    #[error("{field} = {value} is out of range")]
    CoordinateOutOfRange { field: &'static str, value: i64 },
    #[error("Unknown service {0}")]
    UnknownService(String),
}

impl ValidationError {
    /// Translation key shown to the user
    pub fn translation_key(&self) -> &'static str {
        match self {
            ValidationError::NoEntityIdProvided => "no_entity_id_provided",
            ValidationError::MissingZoneOrZoneIds => "missing_zone_or_zone_ids",
            ValidationError::ZoneMustBeList => "zone_must_be_list",
            ValidationError::ZoneIdMustBeList => "zoneid_must_be_list",
            ValidationError::ZoneListLength { .. } => "zone_list_length",
            ValidationError::ConflictingZoneSelection => "conflicting_zone_selection",
            ValidationError::UnsupportedDialect { .. } => "unsupported_dialect",
            ValidationError::MissingField(_) => "missing_field",
            ValidationError::InvalidField { .. } => "invalid_field",
            ValidationError::RepeatsOutOfRange(_) => "repeats_out_of_range",
            ValidationError::CoordinateOutOfRange { .. } => "coordinate_out_of_range",
            ValidationError::UnknownService(_) => "unknown_service",
        }
    }
}

/// Device command dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Valetudo,
    Rand256,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Valetudo => write!(f, "Valetudo"),
            Dialect::Rand256 => write!(f, "Rand256"),
        }
    }
}

/// The vacuum a command is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VacuumTarget {
    /// Topic prefix identifying the vacuum
    pub topic: String,
    pub dialect: Dialect,
}

impl VacuumTarget {
    pub fn new(topic: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            topic: topic.into(),
            dialect,
        }
    }

    fn topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.topic.trim_end_matches('/'), suffix)
    }
}

/// Go-to destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GoToSpec {
    Coordinates { x: i64, y: i64 },
    /// Named spot (Rand256 only)
    Spot(String),
}

/// Which zones to clean
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneSelection {
    /// Rectangles as `[x1, y1, x2, y2]` in map units
    Rects(Vec<[i64; 4]>),
    /// Named zones (Rand256 only)
    Ids(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneSpec {
    pub selection: ZoneSelection,
    pub repeats: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSpec {
    pub segments: Vec<u32>,
    pub repeats: u8,
}

/// A validated vacuum intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VacuumCommand {
    GoTo(GoToSpec),
    CleanZone(ZoneSpec),
    CleanSegments(SegmentSpec),
    MapSave { name: String },
    MapLoad { name: String },
}

/// Payload ready for the transport
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundCommand {
    pub topic: String,
    pub payload: Value,
}

impl VacuumCommand {
    /// Validate `vacuum_go_to` fields
    pub fn go_to(data: &Value) -> Result<Self, ValidationError> {
        if let Some(spot) = optional(data, "spot_id") {
            let name = spot
                .as_str()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| ValidationError::InvalidField {
                    field: "spot_id",
                    reason: "expected a non-empty name".to_string(),
                })?;
            return Ok(VacuumCommand::GoTo(GoToSpec::Spot(name.to_string())));
        }

        let x = coordinate(data, "x_coord")?;
        let y = coordinate(data, "y_coord")?;
        Ok(VacuumCommand::GoTo(GoToSpec::Coordinates { x, y }))
    }

    /// Validate `vacuum_clean_zone` fields
    pub fn clean_zone(data: &Value) -> Result<Self, ValidationError> {
        let repeats = repeats(data)?;
        let selection = match (optional(data, "zone"), optional(data, "zone_ids")) {
            (None, None) => return Err(ValidationError::MissingZoneOrZoneIds),
            (Some(_), Some(_)) => return Err(ValidationError::ConflictingZoneSelection),
            (Some(zone), None) => ZoneSelection::Rects(zone_rects(zone)?),
            (None, Some(ids)) => ZoneSelection::Ids(zone_ids(ids)?),
        };
        Ok(VacuumCommand::CleanZone(ZoneSpec { selection, repeats }))
    }

    /// Validate `vacuum_clean_segments` fields
    pub fn clean_segments(data: &Value) -> Result<Self, ValidationError> {
        let repeats = repeats(data)?;
        let raw = optional(data, "segments").ok_or(ValidationError::MissingField("segments"))?;
        let items = match raw {
            Value::Array(items) => items.as_slice(),
            single => std::slice::from_ref(single),
        };
        if items.is_empty() {
            return Err(ValidationError::MissingField("segments"));
        }

        let segments = items
            .iter()
            .map(|item| match lenient_int(item) {
                Some(id) if id > 0 && id <= u32::MAX as i64 => Ok(id as u32),
                _ => Err(ValidationError::InvalidField {
                    field: "segments",
                    reason: format!("{} is not a positive segment id", item),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(VacuumCommand::CleanSegments(SegmentSpec { segments, repeats }))
    }

    /// Validate `vacuum_map_save`
    pub fn map_save(data: &Value) -> Result<Self, ValidationError> {
        Ok(VacuumCommand::MapSave {
            name: map_name(data)?,
        })
    }

    /// Validate `vacuum_map_load`
    pub fn map_load(data: &Value) -> Result<Self, ValidationError> {
        Ok(VacuumCommand::MapLoad {
            name: map_name(data)?,
        })
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            VacuumCommand::GoTo(_) => "go_to",
            VacuumCommand::CleanZone(_) => "clean_zone",
            VacuumCommand::CleanSegments(_) => "clean_segments",
            VacuumCommand::MapSave { .. } => "map_save",
            VacuumCommand::MapLoad { .. } => "map_load",
        }
    }

    /// Translate into the target's dialect
    pub fn translate(&self, target: &VacuumTarget) -> Result<OutboundCommand, ValidationError> {
        match target.dialect {
            Dialect::Valetudo => self.translate_valetudo(target),
            Dialect::Rand256 => Ok(self.translate_rand256(target)),
        }
    }

    fn translate_valetudo(&self, target: &VacuumTarget) -> Result<OutboundCommand, ValidationError> {
        let unsupported = |feature| ValidationError::UnsupportedDialect {
            feature,
            dialect: Dialect::Valetudo,
        };

        let (topic, payload) = match self {
            VacuumCommand::GoTo(GoToSpec::Coordinates { x, y }) => (
                "GoToLocationCapability/go/set",
                json!({ "coordinates": { "x": x, "y": y } }),
            ),
            VacuumCommand::GoTo(GoToSpec::Spot(_)) => return Err(unsupported("spot_id")),
            VacuumCommand::CleanZone(ZoneSpec {
                selection: ZoneSelection::Rects(rects),
                repeats,
            }) => {
                let zones: Vec<Value> = rects
                    .iter()
                    .map(|[x1, y1, x2, y2]| {
                        json!({
                            "points": {
                                "pA": { "x": x1, "y": y1 },
                                "pB": { "x": x2, "y": y1 },
                                "pC": { "x": x2, "y": y2 },
                                "pD": { "x": x1, "y": y2 },
                            }
                        })
                    })
                    .collect();
                (
                    "ZoneCleaningCapability/start/set",
                    json!({ "zones": zones, "iterations": repeats }),
                )
            }
            VacuumCommand::CleanZone(ZoneSpec {
                selection: ZoneSelection::Ids(_),
                ..
            }) => return Err(unsupported("zone_ids")),
            VacuumCommand::CleanSegments(job) => {
                let ids: Vec<String> = job.segments.iter().map(u32::to_string).collect();
                (
                    "MapSegmentationCapability/clean/set",
                    json!({
                        "segment_ids": ids,
                        "iterations": job.repeats,
                        "customOrder": true,
                    }),
                )
            }
            VacuumCommand::MapSave { .. } => return Err(unsupported("vacuum_map_save")),
            VacuumCommand::MapLoad { .. } => return Err(unsupported("vacuum_map_load")),
        };

        Ok(OutboundCommand {
            topic: target.topic(topic),
            payload,
        })
    }

    fn translate_rand256(&self, target: &VacuumTarget) -> OutboundCommand {
        let payload = match self {
            VacuumCommand::GoTo(GoToSpec::Coordinates { x, y }) => json!({
                "command": "go_to",
                "spot_coordinates": { "x": x, "y": y },
            }),
            VacuumCommand::GoTo(GoToSpec::Spot(name)) => json!({
                "command": "go_to",
                "spot_id": name,
            }),
            VacuumCommand::CleanZone(ZoneSpec {
                selection: ZoneSelection::Rects(rects),
                repeats,
            }) => {
                let zones: Vec<Value> = rects
                    .iter()
                    .map(|[x1, y1, x2, y2]| {
                        json!({ "x1": x1, "y1": y1, "x2": x2, "y2": y2, "repeats": repeats })
                    })
                    .collect();
                json!({ "command": "zoned_cleanup", "zone_coordinates": zones })
            }
            VacuumCommand::CleanZone(ZoneSpec {
                selection: ZoneSelection::Ids(ids),
                repeats,
            }) => json!({
                "command": "zoned_cleanup",
                "zone_ids": ids,
                "repeats": repeats,
            }),
            VacuumCommand::CleanSegments(job) => json!({
                "command": "segmented_cleanup",
                "segment_ids": job.segments,
                "repeats": job.repeats,
            }),
            VacuumCommand::MapSave { name } => json!({ "command": "store_map", "name": name }),
            VacuumCommand::MapLoad { name } => json!({ "command": "load_map", "name": name }),
        };

        OutboundCommand {
            topic: target.topic("custom_command"),
            payload,
        }
    }
}

/// A field that is present and not null
fn optional<'a>(data: &'a Value, field: &str) -> Option<&'a Value> {
    data.get(field).filter(|v| !v.is_null())
}

/// Integer from a number or a numeric string
///
/// Whole floats are accepted only when they fit an `i64` exactly.
pub(crate) fn lenient_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(whole_i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(whole_i64))
        }
        _ => None,
    }
}

fn whole_i64(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, which is already out of range
    let in_range = f >= i64::MIN as f64 && f < i64::MAX as f64;
    (f.is_finite() && f.fract() == 0.0 && in_range).then_some(f as i64)
}

fn coordinate(data: &Value, field: &'static str) -> Result<i64, ValidationError> {
    let raw = optional(data, field).ok_or(ValidationError::MissingField(field))?;
    let value = lenient_int(raw).ok_or_else(|| ValidationError::InvalidField {
        field,
        reason: format!("{} is not an integer", raw),
    })?;
    if value < 0 {
        return Err(ValidationError::CoordinateOutOfRange { field, value });
    }
    Ok(value)
}

fn repeats(data: &Value) -> Result<u8, ValidationError> {
    let Some(raw) = optional(data, "repeats") else {
        return Ok(1);
    };
    let value = lenient_int(raw).ok_or_else(|| ValidationError::InvalidField {
        field: "repeats",
        reason: format!("{} is not an integer", raw),
    })?;
    if !REPEATS_RANGE.contains(&value) {
        return Err(ValidationError::RepeatsOutOfRange(value));
    }
    Ok(value as u8)
}

fn zone_rects(zone: &Value) -> Result<Vec<[i64; 4]>, ValidationError> {
    let entries = zone.as_array().ok_or(ValidationError::ZoneMustBeList)?;
    if entries.is_empty() {
        return Err(ValidationError::MissingZoneOrZoneIds);
    }

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let values = entry.as_array().ok_or(ValidationError::ZoneMustBeList)?;
            if values.len() != 4 {
                return Err(ValidationError::ZoneListLength {
                    index,
                    len: values.len(),
                });
            }
            let mut rect = [0i64; 4];
            for (slot, value) in rect.iter_mut().zip(values) {
                *slot = lenient_int(value).ok_or_else(|| ValidationError::InvalidField {
                    field: "zone",
                    reason: format!("{} is not an integer", value),
                })?;
                if *slot < 0 {
                    return Err(ValidationError::CoordinateOutOfRange {
                        field: "zone",
                        value: *slot,
                    });
                }
            }
            Ok(rect)
        })
        .collect()
}

fn zone_ids(ids: &Value) -> Result<Vec<String>, ValidationError> {
    let entries = ids.as_array().ok_or(ValidationError::ZoneIdMustBeList)?;
    if entries.is_empty() {
        return Err(ValidationError::MissingZoneOrZoneIds);
    }
    entries
        .iter()
        .map(|entry| {
            entry
                .as_str()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or(ValidationError::ZoneIdMustBeList)
        })
        .collect()
}

fn map_name(data: &Value) -> Result<String, ValidationError> {
    optional(data, "map_name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or(ValidationError::MissingField("map_name"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valetudo() -> VacuumTarget {
        VacuumTarget::new("valetudo/robot", Dialect::Valetudo)
    }

    fn rand256() -> VacuumTarget {
        VacuumTarget::new("valetudo/rockrobo/", Dialect::Rand256)
    }

    #[test]
    fn test_lenient_int() {
        assert_eq!(lenient_int(&json!(26300)), Some(26300));
        assert_eq!(lenient_int(&json!("26300")), Some(26300));
        assert_eq!(lenient_int(&json!(" 42 ")), Some(42));
        assert_eq!(lenient_int(&json!(12.0)), Some(12));
        assert_eq!(lenient_int(&json!(12.5)), None);
        assert_eq!(lenient_int(&json!("abc")), None);
        assert_eq!(lenient_int(&json!(null)), None);
    }

    #[test]
    fn test_lenient_int_out_of_range() {
        assert_eq!(lenient_int(&json!(1e30)), None);
        assert_eq!(lenient_int(&json!("1e30")), None);
        assert_eq!(lenient_int(&json!(-1e30)), None);
        assert_eq!(lenient_int(&json!("1e3")), Some(1000));

        let err = VacuumCommand::go_to(&json!({ "x_coord": 1e30, "y_coord": 5 })).unwrap_err();
        assert_eq!(err.translation_key(), "invalid_field");
        let err = VacuumCommand::clean_zone(&json!({ "zone": [[0, 0, "1e30", 10]] })).unwrap_err();
        assert_eq!(err.translation_key(), "invalid_field");
    }

    #[test]
    fn test_go_to_requires_coordinates() {
        let err = VacuumCommand::go_to(&json!({ "x_coord": 10 })).unwrap_err();
        assert_eq!(err, ValidationError::MissingField("y_coord"));

        let err = VacuumCommand::go_to(&json!({ "x_coord": -1, "y_coord": 5 })).unwrap_err();
        assert_eq!(err.translation_key(), "coordinate_out_of_range");
    }

    #[test]
    fn test_go_to_spot_on_rand256() {
        let cmd = VacuumCommand::go_to(&json!({ "spot_id": "Kitchen" })).unwrap();
        let out = cmd.translate(&rand256()).unwrap();
        assert_eq!(out.topic, "valetudo/rockrobo/custom_command");
        assert_eq!(out.payload, json!({ "command": "go_to", "spot_id": "Kitchen" }));
    }

    #[test]
    fn test_zone_ids_valetudo_unsupported() {
        let cmd = VacuumCommand::clean_zone(&json!({ "zone_ids": ["Bedroom"] })).unwrap();
        let err = cmd.translate(&valetudo()).unwrap_err();
        assert_eq!(err.translation_key(), "unsupported_dialect");
    }

    #[test]
    fn test_zone_errors() {
        assert_eq!(
            VacuumCommand::clean_zone(&json!({ "zone": "1,2,3,4" })).unwrap_err(),
            ValidationError::ZoneMustBeList
        );
        assert_eq!(
            VacuumCommand::clean_zone(&json!({ "zone": [1, 2, 3, 4] })).unwrap_err(),
            ValidationError::ZoneMustBeList
        );
        assert_eq!(
            VacuumCommand::clean_zone(&json!({ "zone_ids": "Bedroom" })).unwrap_err(),
            ValidationError::ZoneIdMustBeList
        );
        assert_eq!(
            VacuumCommand::clean_zone(&json!({ "zone": [], "zone_ids": null })).unwrap_err(),
            ValidationError::MissingZoneOrZoneIds
        );
        assert_eq!(
            VacuumCommand::clean_zone(&json!({ "zone": [[1, 2, 3, 4]], "zone_ids": ["a"] }))
                .unwrap_err(),
            ValidationError::ConflictingZoneSelection
        );
        assert_eq!(
            VacuumCommand::clean_zone(&json!({ "zone": [[1, 2, 3, 4]], "repeats": 4 }))
                .unwrap_err(),
            ValidationError::RepeatsOutOfRange(4)
        );
    }

    #[test]
    fn test_zone_rects_rand256() {
        let cmd = VacuumCommand::clean_zone(&json!({
            "zone": [["100", 200, 300, 400]],
            "repeats": "3",
        }))
        .unwrap();
        let out = cmd.translate(&rand256()).unwrap();
        assert_eq!(
            out.payload,
            json!({
                "command": "zoned_cleanup",
                "zone_coordinates": [
                    { "x1": 100, "y1": 200, "x2": 300, "y2": 400, "repeats": 3 }
                ],
            })
        );
    }

    #[test]
    fn test_segments() {
        let cmd = VacuumCommand::clean_segments(&json!({ "segments": [3, "7"] })).unwrap();
        assert_eq!(
            cmd,
            VacuumCommand::CleanSegments(SegmentSpec {
                segments: vec![3, 7],
                repeats: 1,
            })
        );

        let out = cmd.translate(&valetudo()).unwrap();
        assert_eq!(out.topic, "valetudo/robot/MapSegmentationCapability/clean/set");
        assert_eq!(
            out.payload,
            json!({ "segment_ids": ["3", "7"], "iterations": 1, "customOrder": true })
        );

        let out = cmd.translate(&rand256()).unwrap();
        assert_eq!(
            out.payload,
            json!({ "command": "segmented_cleanup", "segment_ids": [3, 7], "repeats": 1 })
        );

        assert_eq!(
            VacuumCommand::clean_segments(&json!({ "segments": [] })).unwrap_err(),
            ValidationError::MissingField("segments")
        );
        assert!(VacuumCommand::clean_segments(&json!({ "segments": [0] })).is_err());
    }

    #[test]
    fn test_map_save_load() {
        let save = VacuumCommand::map_save(&json!({ "map_name": "upstairs" })).unwrap();
        assert_eq!(
            save.translate(&rand256()).unwrap().payload,
            json!({ "command": "store_map", "name": "upstairs" })
        );
        let load = VacuumCommand::map_load(&json!({ "map_name": "upstairs" })).unwrap();
        assert_eq!(
            load.translate(&rand256()).unwrap().payload,
            json!({ "command": "load_map", "name": "upstairs" })
        );
        assert!(save.translate(&valetudo()).is_err());
        assert_eq!(
            VacuumCommand::map_load(&json!({ "map_name": "  " })).unwrap_err(),
            ValidationError::MissingField("map_name")
        );
    }
}
