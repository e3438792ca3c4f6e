//! Geometry engine: rotation, zoom, aspect ratio and margins
//!
//! [`layout`] turns a cropped grid into a [`Placement`]: the rotated cell
//! raster, its integer pixel scale and offset inside the frame, and a
//! [`FrameTransform`] that maps device map units to frame pixels. Overlays
//! go through the same transform, so zones, obstacles and the robot rotate
//! together with the grid.

use crate::map::{CellRaster, MapPoint, Projection};
use crate::render::canvas::PixelRect;
use crate::trims::{CroppedMap, Margins};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest frame edge, in pixels
pub const MAX_FRAME_EDGE: u32 = 8192;

/// Largest term accepted in a forced aspect ratio
pub const MAX_ASPECT_TERM: u32 = 100;

/// Layout errors
#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("Invalid rotation {0}, expected 0, 90, 180 or 270")]
    InvalidRotation(u16),
    #[error("Invalid aspect ratio {0:?}")]
    InvalidAspectRatio(String),
    #[error("Nothing to lay out: cropped grid is empty")]
    EmptyGrid,
    #[error("Frame {width}x{height} exceeds the {MAX_FRAME_EDGE} pixel edge limit")]
    FrameTooLarge { width: u64, height: u64 },
}

/// Clockwise rotation in quarter turns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl TryFrom<u16> for Rotation {
    type Error = LayoutError;

    fn try_from(degrees: u16) -> Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(LayoutError::InvalidRotation(other)),
        }
    }
}

impl From<Rotation> for u16 {
    fn from(rotation: Rotation) -> u16 {
        rotation.degrees()
    }
}

impl Rotation {
    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// This rotation followed by `other`
    pub fn then(self, other: Rotation) -> Rotation {
        let total = (self.degrees() + other.degrees()) % 360;
        match total {
            90 => Rotation::Deg90,
            180 => Rotation::Deg180,
            270 => Rotation::Deg270,
            _ => Rotation::Deg0,
        }
    }

    fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }

    /// Size of a `width` x `height` area after rotation
    pub fn rotated_size(self, width: u32, height: u32) -> (u32, u32) {
        if self.swaps_axes() {
            (height, width)
        } else {
            (width, height)
        }
    }

    /// Rotate a continuous point inside a `width` x `height` area
    pub fn rotate_point(self, x: f64, y: f64, width: f64, height: f64) -> (f64, f64) {
        match self {
            Rotation::Deg0 => (x, y),
            Rotation::Deg90 => (height - y, x),
            Rotation::Deg180 => (width - x, height - y),
            Rotation::Deg270 => (y, width - x),
        }
    }

    /// Rotate a raster, cell for cell
    pub fn rotate_raster(self, raster: &CellRaster) -> CellRaster {
        let (w, h) = (raster.width(), raster.height());
        if self == Rotation::Deg0 {
            return raster.clone();
        }
        let (rw, rh) = self.rotated_size(w, h);
        let mut out = CellRaster::new(rw, rh);
        for y in 0..h {
            for x in 0..w {
                let (nx, ny) = match self {
                    Rotation::Deg0 => (x, y),
                    Rotation::Deg90 => (h - 1 - y, x),
                    Rotation::Deg180 => (w - 1 - x, h - 1 - y),
                    Rotation::Deg270 => (y, w - 1 - x),
                };
                out.set(nx, ny, raster.get(x, y));
            }
        }
        out
    }
}

/// Frame aspect ratio policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AspectRatio {
    /// Keep the ratio of the cropped map
    #[default]
    Detected,
    /// Pad the frame to `width:height`
    Forced { width: u32, height: u32 },
}

impl FromStr for AspectRatio {
    type Err = LayoutError;

    /// Parses `"None"` or `"W, H"` (also `"W:H"`), terms 1..=[`MAX_ASPECT_TERM`]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
            return Ok(AspectRatio::Detected);
        }
        let invalid = || LayoutError::InvalidAspectRatio(s.to_string());
        let (w, h) = trimmed
            .split_once(',')
            .or_else(|| trimmed.split_once(':'))
            .ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        let term = 1..=MAX_ASPECT_TERM;
        if !term.contains(&width) || !term.contains(&height) {
            return Err(invalid());
        }
        Ok(AspectRatio::Forced { width, height })
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AspectRatio::Detected => write!(f, "None"),
            AspectRatio::Forced { width, height } => write!(f, "{}, {}", width, height),
        }
    }
}

/// Validated image options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutOptions {
    pub rotation: Rotation,
    pub aspect_ratio: AspectRatio,
    /// Scale the map to fill the target frame
    pub auto_zoom: bool,
    pub target_width: u32,
    pub target_height: u32,
    /// Pixels per cell when not auto-zooming
    pub cell_pixels: u32,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            rotation: Rotation::Deg0,
            aspect_ratio: AspectRatio::Detected,
            auto_zoom: false,
            target_width: 1024,
            target_height: 1024,
            cell_pixels: 1,
        }
    }
}

/// Maps device map units and grid cells to frame pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTransform {
    projection: Projection,
    rotation: Rotation,
    /// Cropped grid size before rotation
    grid_width: u32,
    grid_height: u32,
    scale: f64,
    offset_x: f64,
    offset_y: f64,
}

impl FrameTransform {
    /// Frame position of continuous (unrotated) cell coordinates
    pub fn cell_to_frame(&self, cx: f64, cy: f64) -> (f64, f64) {
        let (rx, ry) = self.rotation.rotate_point(
            cx,
            cy,
            self.grid_width as f64,
            self.grid_height as f64,
        );
        (self.offset_x + rx * self.scale, self.offset_y + ry * self.scale)
    }

    /// Frame position of a point in map units
    pub fn map_to_frame(&self, point: MapPoint) -> (f64, f64) {
        let (cx, cy) = self.projection.to_cell(point.x, point.y);
        self.cell_to_frame(cx, cy)
    }

    /// Map-unit length in frame pixels
    pub fn map_length(&self, length: f64) -> f64 {
        self.projection.to_cells(length) * self.scale
    }

    /// Frame pixels per cell
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Heading in frame degrees (clockwise from +x) for a device angle
    pub fn heading(&self, angle: f64) -> f64 {
        let base = if self.projection.flip_y { -angle } else { angle };
        base + self.rotation.degrees() as f64
    }
}

/// Where and how big the map is drawn
#[derive(Debug, Clone)]
pub struct Placement {
    /// Cropped grid, already rotated
    pub raster: CellRaster,
    pub transform: FrameTransform,
    /// Integer pixels per cell
    pub scale: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Frame pixels covered by the grid
    pub content: PixelRect,
    pub margins: Margins,
}

/// Compute frame geometry for a cropped map
pub fn layout(cropped: &CroppedMap, options: &LayoutOptions) -> Result<Placement, LayoutError> {
    let grid = &cropped.grid;
    if grid.width() == 0 || grid.height() == 0 {
        return Err(LayoutError::EmptyGrid);
    }

    let rotation = options.rotation;
    let raster = rotation.rotate_raster(grid.raster());
    let (w, h) = (raster.width(), raster.height());
    let margins = cropped.margins;

    let scale = if options.auto_zoom {
        let avail_w = options.target_width.saturating_sub(margins.horizontal());
        let avail_h = options.target_height.saturating_sub(margins.vertical());
        (avail_w / w).min(avail_h / h).max(1)
    } else {
        options.cell_pixels.max(1)
    };
    // Keep the frame within bounds even for huge grids
    let room_w = MAX_FRAME_EDGE.saturating_sub(margins.horizontal());
    let room_h = MAX_FRAME_EDGE.saturating_sub(margins.vertical());
    let scale = scale.min((room_w / w).min(room_h / h)).max(1);

    let content_w = w as u64 * scale as u64;
    let content_h = h as u64 * scale as u64;
    let (mut base_w, mut base_h) = (
        content_w + margins.horizontal() as u64,
        content_h + margins.vertical() as u64,
    );
    if options.auto_zoom {
        base_w = base_w.max(options.target_width as u64);
        base_h = base_h.max(options.target_height as u64);
    }
    let (width, height) = apply_aspect(base_w, base_h, options.aspect_ratio);
    if width > MAX_FRAME_EDGE as u64 || height > MAX_FRAME_EDGE as u64 {
        return Err(LayoutError::FrameTooLarge { width, height });
    }
    // Both edges are at most MAX_FRAME_EDGE from here on
    let (frame_width, frame_height) = (width as u32, height as u32);
    let (content_w, content_h) = (content_w as u32, content_h as u32);

    // Center the content in whatever space the margins leave
    let inner_w = frame_width.saturating_sub(margins.horizontal());
    let inner_h = frame_height.saturating_sub(margins.vertical());
    let left = margins.left + inner_w.saturating_sub(content_w) / 2;
    let top = margins.top + inner_h.saturating_sub(content_h) / 2;

    let transform = FrameTransform {
        projection: grid.projection(),
        rotation,
        grid_width: grid.width(),
        grid_height: grid.height(),
        scale: scale as f64,
        offset_x: left as f64,
        offset_y: top as f64,
    };

    Ok(Placement {
        raster,
        transform,
        scale,
        frame_width,
        frame_height,
        content: PixelRect::new(
            left as i64,
            top as i64,
            (left + content_w) as i64,
            (top + content_h) as i64,
        ),
        margins,
    })
}

/// Grow one frame edge so the frame matches a forced ratio
fn apply_aspect(width: u64, height: u64, aspect: AspectRatio) -> (u64, u64) {
    match aspect {
        AspectRatio::Detected => (width, height),
        AspectRatio::Forced {
            width: rw,
            height: rh,
        } => {
            let (w, h) = (width as u128, height as u128);
            let (rw, rh) = (rw.max(1) as u128, rh.max(1) as u128);
            let edge = |v: u128| u64::try_from(v).unwrap_or(u64::MAX);
            if w * rh >= h * rw {
                // Too wide: grow height
                (width, edge((w * rh).div_ceil(rw)))
            } else {
                (edge((h * rw).div_ceil(rh)), height)
            }
        }
    }
}
