//! Decoded map model and payload decoding
//!
//! Both device encodings (Valetudo JSON and Rand256 binary) decode into the
//! same [`DecodedMap`] shape: a classified cell grid, room descriptors and
//! the entities reported alongside it, all in device map units.

mod rand256;
mod valetudo;

use crate::palette::{RoomId, ROOM_SLOTS};
use serde::Serialize;
use tracing::debug;

/// Map decoding errors
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Unsupported map payload format")]
    UnsupportedFormat,
    #[error("Unsupported map version: {0}")]
    UnsupportedVersion(u32),
    #[error("Corrupt map payload: {0}")]
    Corrupt(String),
    #[error("Cell count mismatch: expected {expected} cells, got {actual}")]
    CellCountMismatch { expected: usize, actual: usize },
    #[error("Pixel ({x}, {y}) outside {width}x{height} grid")]
    PixelOutOfBounds {
        x: i64,
        y: i64,
        width: u32,
        height: u32,
    },
    #[error("Invalid map JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Which device encoding a map came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MapFormat {
    Valetudo,
    Rand256,
}

/// Classification of one grid cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Cell {
    #[default]
    Unknown,
    Floor,
    Wall,
    Room(RoomId),
}

impl Cell {
    pub fn is_known(self) -> bool {
        self != Cell::Unknown
    }
}

/// Rectangle in cell coordinates, right/bottom exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CellRect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl CellRect {
    pub fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn is_degenerate(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Overlap with another rectangle, `None` if they don't intersect
    pub fn intersect(&self, other: &CellRect) -> Option<CellRect> {
        let rect = CellRect {
            left: self.left.max(other.left),
            top: self.top.max(other.top),
            right: self.right.min(other.right),
            bottom: self.bottom.min(other.bottom),
        };
        (!rect.is_degenerate()).then_some(rect)
    }

    fn include(&mut self, x: u32, y: u32) {
        self.left = self.left.min(x);
        self.top = self.top.min(y);
        self.right = self.right.max(x + 1);
        self.bottom = self.bottom.max(y + 1);
    }
}

/// Plain 2-D array of cells
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellRaster {
    width: u32,
    height: u32,
    cells: Vec<Cell>,
}

impl CellRaster {
    /// Create a raster of unknown cells
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            cells: vec![Cell::Unknown; width as usize * height as usize],
        }
    }

    /// Wrap existing cells, checking the count against the dimensions
    pub fn from_cells(width: u32, height: u32, cells: Vec<Cell>) -> Result<Self, DecodeError> {
        let expected = width as usize * height as usize;
        if cells.len() != expected {
            return Err(DecodeError::CellCountMismatch {
                expected,
                actual: cells.len(),
            });
        }
        Ok(Self {
            width,
            height,
            cells,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn get(&self, x: u32, y: u32) -> Cell {
        if x < self.width && y < self.height {
            self.cells[(y * self.width + x) as usize]
        } else {
            Cell::Unknown
        }
    }

    pub fn set(&mut self, x: u32, y: u32, cell: Cell) {
        if x < self.width && y < self.height {
            self.cells[(y * self.width + x) as usize] = cell;
        }
    }

    /// Copy of the cells inside `rect`
    pub fn crop(&self, rect: &CellRect) -> CellRaster {
        let mut out = CellRaster::new(rect.width(), rect.height());
        for y in 0..rect.height() {
            for x in 0..rect.width() {
                out.set(x, y, self.get(rect.left + x, rect.top + y));
            }
        }
        out
    }
}

/// Mapping from device map units to grid cells
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// Map units per cell
    pub cell_size: f64,
    /// Cell-unit offset of the grid's first column
    pub origin_x: f64,
    /// Cell-unit offset of the grid's first (or, flipped, last) row
    pub origin_y: f64,
    /// Rows are stored bottom-up in map space
    pub flip_y: bool,
    pub height: u32,
}

impl Projection {
    /// Continuous cell coordinates of a point in map units
    pub fn to_cell(&self, x: f64, y: f64) -> (f64, f64) {
        let px = x / self.cell_size;
        let py = y / self.cell_size;
        let cy = if self.flip_y {
            self.height as f64 - (py - self.origin_y)
        } else {
            py - self.origin_y
        };
        (px - self.origin_x, cy)
    }

    /// Length in map units converted to cells
    pub fn to_cells(&self, length: f64) -> f64 {
        length / self.cell_size
    }
}

/// Classified grid plus its placement in map space
///
/// Immutable once produced by the decoder; cropping yields a new grid.
#[derive(Debug, Clone, PartialEq)]
pub struct MapGrid {
    raster: CellRaster,
    cell_size: f64,
    origin_x: f64,
    origin_y: f64,
    flip_y: bool,
}

impl MapGrid {
    pub fn new(raster: CellRaster, cell_size: f64, origin_x: f64, origin_y: f64, flip_y: bool) -> Self {
        Self {
            raster,
            cell_size,
            origin_x,
            origin_y,
            flip_y,
        }
    }

    pub fn width(&self) -> u32 {
        self.raster.width()
    }

    pub fn height(&self) -> u32 {
        self.raster.height()
    }

    pub fn raster(&self) -> &CellRaster {
        &self.raster
    }

    pub fn cell(&self, x: u32, y: u32) -> Cell {
        self.raster.get(x, y)
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn full_rect(&self) -> CellRect {
        CellRect::new(0, 0, self.width(), self.height())
    }

    pub fn projection(&self) -> Projection {
        Projection {
            cell_size: self.cell_size,
            origin_x: self.origin_x,
            origin_y: self.origin_y,
            flip_y: self.flip_y,
            height: self.height(),
        }
    }

    /// Bounding box of every non-unknown cell
    pub fn occupied_bounds(&self) -> Option<CellRect> {
        let mut bounds: Option<CellRect> = None;
        for y in 0..self.height() {
            for x in 0..self.width() {
                if self.cell(x, y).is_known() {
                    match bounds.as_mut() {
                        Some(rect) => rect.include(x, y),
                        None => bounds = Some(CellRect::new(x, y, x + 1, y + 1)),
                    }
                }
            }
        }
        bounds
    }

    /// Sub-grid covering `rect`, keeping map-unit projection consistent
    pub fn crop(&self, rect: &CellRect) -> MapGrid {
        let rect = rect.intersect(&self.full_rect()).unwrap_or(CellRect::new(0, 0, 0, 0));
        let origin_y = if self.flip_y {
            self.origin_y + (self.height() - rect.bottom) as f64
        } else {
            self.origin_y + rect.top as f64
        };
        MapGrid {
            raster: self.raster.crop(&rect),
            cell_size: self.cell_size,
            origin_x: self.origin_x + rect.left as f64,
            origin_y,
            flip_y: self.flip_y,
        }
    }
}

/// Point in map units
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MapPoint {
    pub x: f64,
    pub y: f64,
}

impl MapPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle in map units
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MapRect {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl MapRect {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Bounding rectangle of a point list
    pub fn bounding(points: &[MapPoint]) -> Option<Self> {
        let first = points.first()?;
        let mut rect = MapRect::new(first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            rect.x1 = rect.x1.min(p.x);
            rect.y1 = rect.y1.min(p.y);
            rect.x2 = rect.x2.max(p.x);
            rect.y2 = rect.y2.max(p.y);
        }
        Some(rect)
    }
}

/// Position and heading in map units/degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub angle: f64,
}

/// A colorable room of the decoded map
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomDescriptor {
    /// Palette slot
    pub id: u8,
    /// Device segment id
    pub segment_id: String,
    pub name: String,
    pub bounds: CellRect,
    pub cell_count: usize,
}

/// Line segment in map units
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MapLine {
    pub from: MapPoint,
    pub to: MapPoint,
}

/// Output of the decoder, one per map update
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMap {
    pub format: MapFormat,
    pub grid: MapGrid,
    pub rooms: Vec<RoomDescriptor>,
    pub robot: Option<Pose>,
    pub charger: Option<Pose>,
    pub active_zones: Vec<MapRect>,
    pub no_go_zones: Vec<MapRect>,
    pub virtual_walls: Vec<MapLine>,
    pub path: Vec<MapPoint>,
    pub go_to_target: Option<MapPoint>,
    pub obstacles: Vec<MapPoint>,
}

impl DecodedMap {
    fn empty(format: MapFormat, grid: MapGrid) -> Self {
        Self {
            format,
            grid,
            rooms: Vec::new(),
            robot: None,
            charger: None,
            active_zones: Vec::new(),
            no_go_zones: Vec::new(),
            virtual_walls: Vec::new(),
            path: Vec::new(),
            go_to_target: None,
            obstacles: Vec::new(),
        }
    }

    pub fn room(&self, id: RoomId) -> Option<&RoomDescriptor> {
        self.rooms.iter().find(|room| room.id == id.get())
    }
}

/// Decode a raw map payload, detecting its encoding
///
/// Payloads starting with `rr` are Rand256 binary maps; payloads starting
/// with a JSON object are Valetudo maps.
pub fn decode(payload: &[u8]) -> Result<DecodedMap, DecodeError> {
    let map = if payload.starts_with(&rand256::MAGIC) {
        rand256::decode(payload)?
    } else if payload
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|&b| b == b'{')
    {
        valetudo::decode(payload)?
    } else {
        return Err(DecodeError::UnsupportedFormat);
    };

    debug!(
        "Decoded {:?} map: {}x{} cells, {} rooms",
        map.format,
        map.grid.width(),
        map.grid.height(),
        map.rooms.len()
    );
    Ok(map)
}

/// Collects room cells while decoding and hands out palette slots
struct RoomCollector {
    rooms: Vec<RoomDescriptor>,
    overflow: usize,
}

impl RoomCollector {
    fn new() -> Self {
        Self {
            rooms: Vec::new(),
            overflow: 0,
        }
    }

    /// Slot for a segment, registering it on first sight
    fn slot(&mut self, segment_id: &str, name: Option<&str>) -> Option<RoomId> {
        if let Some(room) = self.rooms.iter().find(|r| r.segment_id == segment_id) {
            return RoomId::new(room.id);
        }
        if self.rooms.len() >= ROOM_SLOTS {
            self.overflow += 1;
            return None;
        }
        let id = self.rooms.len() as u8;
        self.rooms.push(RoomDescriptor {
            id,
            segment_id: segment_id.to_string(),
            name: name.map(str::to_string).unwrap_or_else(|| format!("Room {}", segment_id)),
            bounds: CellRect::new(u32::MAX, u32::MAX, 0, 0),
            cell_count: 0,
        });
        RoomId::new(id)
    }

    fn mark(&mut self, room: RoomId, x: u32, y: u32) {
        if let Some(desc) = self.rooms.get_mut(room.get() as usize) {
            desc.bounds.include(x, y);
            desc.cell_count += 1;
        }
    }

    fn finish(self) -> Vec<RoomDescriptor> {
        if self.overflow > 0 {
            tracing::warn!(
                "Map has more than {} segments, {} painted as floor",
                ROOM_SLOTS,
                self.overflow
            );
        }
        self.rooms
            .into_iter()
            .map(|mut room| {
                if room.cell_count == 0 {
                    room.bounds = CellRect::new(0, 0, 0, 0);
                }
                room
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_from_rows(rows: &[&str]) -> MapGrid {
        let height = rows.len() as u32;
        let width = rows[0].len() as u32;
        let mut raster = CellRaster::new(width, height);
        for (y, row) in rows.iter().enumerate() {
            for (x, c) in row.chars().enumerate() {
                let cell = match c {
                    '#' => Cell::Wall,
                    '.' => Cell::Floor,
                    _ => Cell::Unknown,
                };
                raster.set(x as u32, y as u32, cell);
            }
        }
        MapGrid::new(raster, 5.0, 0.0, 0.0, false)
    }

    #[test]
    fn test_occupied_bounds() {
        let grid = grid_from_rows(&["    ", " #. ", " .. ", "    "]);
        assert_eq!(grid.occupied_bounds(), Some(CellRect::new(1, 1, 3, 3)));
    }

    #[test]
    fn test_occupied_bounds_empty() {
        let grid = grid_from_rows(&["   ", "   "]);
        assert_eq!(grid.occupied_bounds(), None);
    }

    #[test]
    fn test_crop_keeps_projection() {
        let grid = grid_from_rows(&["    ", " #. ", " .. ", "    "]);
        let cropped = grid.crop(&CellRect::new(1, 1, 3, 3));
        assert_eq!(cropped.width(), 2);
        assert_eq!(cropped.cell(0, 0), Cell::Wall);

        // Map point at the center of source cell (2, 1)
        let (cx, cy) = cropped.projection().to_cell(12.5, 7.5);
        assert_eq!((cx, cy), (1.5, 0.5));
    }

    #[test]
    fn test_crop_flipped_projection() {
        let raster = CellRaster::new(4, 4);
        let grid = MapGrid::new(raster, 50.0, 10.0, 20.0, true);
        // Point in source cell row 0 (top of image) is py = origin_y + height - 1
        let (_, cy) = grid.projection().to_cell(0.0, (20.0 + 3.5) * 50.0);
        assert_eq!(cy, 0.5);

        let cropped = grid.crop(&CellRect::new(0, 1, 4, 3));
        let (_, cy) = cropped.projection().to_cell(0.0, (20.0 + 1.5) * 50.0);
        // Source row 2 lands on cropped row 1
        assert_eq!(cy, 1.5);
    }

    #[test]
    fn test_raster_count_mismatch() {
        let result = CellRaster::from_cells(3, 3, vec![Cell::Floor; 8]);
        assert!(matches!(
            result,
            Err(DecodeError::CellCountMismatch {
                expected: 9,
                actual: 8
            })
        ));
    }

    #[test]
    fn test_unsupported_format() {
        assert!(matches!(decode(b"\x89PNG"), Err(DecodeError::UnsupportedFormat)));
        assert!(matches!(decode(b""), Err(DecodeError::UnsupportedFormat)));
    }

    #[test]
    fn test_room_collector_overflow() {
        let mut collector = RoomCollector::new();
        for i in 0..ROOM_SLOTS {
            assert!(collector.slot(&i.to_string(), None).is_some());
        }
        assert!(collector.slot("overflow", None).is_none());
        assert_eq!(collector.slot("3", None), RoomId::new(3));
        assert_eq!(collector.finish().len(), ROOM_SLOTS);
    }
}
