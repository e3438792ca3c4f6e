//! Valetudo JSON map decoding
//!
//! Layers carry cell coordinates (`compressedPixels` runs or plain
//! `pixels` pairs); entities carry points in centimeters.

use super::{
    Cell, CellRaster, DecodeError, DecodedMap, MapFormat, MapGrid, MapLine, MapPoint, MapRect,
    Pose, RoomCollector,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::debug;

/// Map versions this decoder understands
const SUPPORTED_VERSIONS: [u32; 2] = [1, 2];

/// Upper bound on either grid dimension, in cells
const MAX_GRID_DIMENSION: u32 = 8192;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMap {
    #[serde(default)]
    meta_data: Option<RawMapMeta>,
    size: RawSize,
    pixel_size: f64,
    #[serde(default)]
    layers: Vec<RawLayer>,
    #[serde(default)]
    entities: Vec<RawEntity>,
}

#[derive(Debug, Deserialize)]
struct RawMapMeta {
    #[serde(default)]
    version: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawSize {
    x: f64,
    y: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLayer {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    pixels: Vec<i64>,
    #[serde(default)]
    compressed_pixels: Option<Vec<i64>>,
    #[serde(default)]
    meta_data: RawLayerMeta,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLayerMeta {
    #[serde(default)]
    segment_id: Option<JsonValue>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEntity {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    points: Vec<f64>,
    #[serde(default)]
    meta_data: RawEntityMeta,
}

#[derive(Debug, Default, Deserialize)]
struct RawEntityMeta {
    #[serde(default)]
    angle: Option<f64>,
}

/// Decode a Valetudo JSON map
pub(super) fn decode(payload: &[u8]) -> Result<DecodedMap, DecodeError> {
    let raw: RawMap = serde_json::from_slice(payload)?;

    let version = raw.meta_data.and_then(|m| m.version).unwrap_or(1);
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(DecodeError::UnsupportedVersion(version));
    }

    if !(raw.pixel_size > 0.0) {
        return Err(DecodeError::Corrupt(format!(
            "invalid pixel size {}",
            raw.pixel_size
        )));
    }
    let width = grid_dimension(raw.size.x, raw.pixel_size)?;
    let height = grid_dimension(raw.size.y, raw.pixel_size)?;

    let mut raster = CellRaster::new(width, height);
    let mut rooms = RoomCollector::new();

    // Paint by layer kind so the result does not depend on layer order
    for layer in raw.layers.iter().filter(|l| l.kind == "floor") {
        for (x, y) in layer_pixels(layer, width, height)? {
            raster.set(x, y, Cell::Floor);
        }
    }
    for layer in raw.layers.iter().filter(|l| l.kind == "segment") {
        let segment_id = match &layer.meta_data.segment_id {
            Some(JsonValue::String(s)) => s.clone(),
            Some(JsonValue::Number(n)) => n.to_string(),
            _ => return Err(DecodeError::Corrupt("segment layer without segmentId".into())),
        };
        let slot = rooms.slot(&segment_id, layer.meta_data.name.as_deref());
        for (x, y) in layer_pixels(layer, width, height)? {
            match slot {
                Some(room) => {
                    raster.set(x, y, Cell::Room(room));
                    rooms.mark(room, x, y);
                }
                None => raster.set(x, y, Cell::Floor),
            }
        }
    }
    for layer in raw.layers.iter().filter(|l| l.kind == "wall") {
        for (x, y) in layer_pixels(layer, width, height)? {
            raster.set(x, y, Cell::Wall);
        }
    }

    let grid = MapGrid::new(raster, raw.pixel_size, 0.0, 0.0, false);
    let mut map = DecodedMap::empty(MapFormat::Valetudo, grid);
    map.rooms = rooms.finish();

    for entity in &raw.entities {
        let points = entity_points(entity)?;
        match entity.kind.as_str() {
            "robot_position" => map.robot = first_pose(&points, entity),
            "charger_location" => map.charger = first_pose(&points, entity),
            "path" => map.path.extend(points),
            "active_zone" => map.active_zones.extend(MapRect::bounding(&points)),
            "no_go_area" | "no_mop_area" => map.no_go_zones.extend(MapRect::bounding(&points)),
            "virtual_wall" => {
                if let [from, to, ..] = points[..] {
                    map.virtual_walls.push(MapLine { from, to });
                }
            }
            "go_to_target" => map.go_to_target = points.first().copied(),
            "obstacle" => map.obstacles.extend(points.first().copied()),
            other => debug!("Ignoring map entity {}", other),
        }
    }

    Ok(map)
}

fn grid_dimension(size: f64, pixel_size: f64) -> Result<u32, DecodeError> {
    let cells = (size / pixel_size).ceil();
    if !(cells >= 1.0) || cells > MAX_GRID_DIMENSION as f64 {
        return Err(DecodeError::Corrupt(format!(
            "grid dimension {} out of range",
            cells
        )));
    }
    Ok(cells as u32)
}

/// Expand a layer's pixels, rejecting anything outside the grid
fn layer_pixels(layer: &RawLayer, width: u32, height: u32) -> Result<Vec<(u32, u32)>, DecodeError> {
    let check = |x: i64, y: i64| -> Result<(u32, u32), DecodeError> {
        if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
            return Err(DecodeError::PixelOutOfBounds {
                x,
                y,
                width,
                height,
            });
        }
        Ok((x as u32, y as u32))
    };

    let mut out = Vec::new();
    match &layer.compressed_pixels {
        Some(runs) => {
            if runs.len() % 3 != 0 {
                return Err(DecodeError::Corrupt(format!(
                    "{} layer has {} compressed values, not a multiple of 3",
                    layer.kind,
                    runs.len()
                )));
            }
            for run in runs.chunks_exact(3) {
                let (x, y, count) = (run[0], run[1], run[2]);
                if count <= 0 {
                    continue;
                }
                // Check both ends of the run
                check(x, y)?;
                let last = x.checked_add(count - 1).ok_or_else(|| {
                    DecodeError::Corrupt(format!("{} layer run length {} overflows", layer.kind, count))
                })?;
                check(last, y)?;
                for dx in 0..count {
                    out.push(((x + dx) as u32, y as u32));
                }
            }
        }
        None => {
            if layer.pixels.len() % 2 != 0 {
                return Err(DecodeError::Corrupt(format!(
                    "{} layer has an odd pixel coordinate count",
                    layer.kind
                )));
            }
            for pair in layer.pixels.chunks_exact(2) {
                out.push(check(pair[0], pair[1])?);
            }
        }
    }
    Ok(out)
}

fn entity_points(entity: &RawEntity) -> Result<Vec<MapPoint>, DecodeError> {
    if entity.points.len() % 2 != 0 {
        return Err(DecodeError::Corrupt(format!(
            "{} entity has an odd point coordinate count",
            entity.kind
        )));
    }
    Ok(entity
        .points
        .chunks_exact(2)
        .map(|p| MapPoint::new(p[0], p[1]))
        .collect())
}

fn first_pose(points: &[MapPoint], entity: &RawEntity) -> Option<Pose> {
    points.first().map(|p| Pose {
        x: p.x,
        y: p.y,
        angle: entity.meta_data.angle.unwrap_or(0.0),
    })
}
