//! Renderer
//!
//! Composites a laid-out grid through the palette into an RGBA [`Frame`],
//! then paints the dynamic overlays. Paint order is fixed so identical
//! inputs always produce identical frames:
//!
//! 1. background
//! 2. walls and floor
//! 3. rooms, blended over the floor with their alpha
//! 4. cleaning zones, then no-go zones
//! 5. virtual walls, path, go-to marker
//! 6. obstacle markers
//! 7. charger, then robot, so a docked robot stays visible
//! 8. status text
//!
//! Map overlays are clipped to the area covered by the grid; the status
//! text may use the whole frame.

pub mod canvas;
pub mod font;

use self::canvas::{Canvas, PixelRect};
use crate::layout::Placement;
use crate::map::{Cell, DecodedMap, MapLine, MapPoint, MapRect, Pose};
use crate::palette::{MapClass, Palette, ResolvedColor, RoomId};
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

/// Largest accepted obstacle coordinate, in map units
pub const MAX_OBSTACLE_COORD: f64 = 90000.0;

/// Largest status text scale
pub const MAX_TEXT_SIZE: u32 = 8;

/// Final RGBA raster of one render cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    image: RgbaImage,
}

impl Frame {
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba<u8>> {
        (x < self.width() && y < self.height()).then(|| *self.image.get_pixel(x, y))
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }
}

/// Vertical placement of the status text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextPosition {
    #[default]
    Top,
    Bottom,
}

/// Built-in font weight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontWeight {
    #[default]
    Regular,
    Bold,
}

/// How the status text is drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTextOptions {
    pub position: TextPosition,
    /// Frame pixels per font pixel, 1-8
    pub size: u32,
    pub font: FontWeight,
}

impl Default for StatusTextOptions {
    fn default() -> Self {
        Self {
            position: TextPosition::Top,
            size: 2,
            font: FontWeight::Regular,
        }
    }
}

/// Status line painted over the map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusText {
    pub text: String,
    pub options: StatusTextOptions,
}

impl StatusText {
    /// `NAME: STATE, 80%` from the vacuum's reported status
    pub fn from_status(
        name: &str,
        state: &str,
        battery: Option<u8>,
        options: StatusTextOptions,
    ) -> Self {
        let mut text = format!("{}: {}", name, state.replace('_', " "));
        if let Some(level) = battery {
            text.push_str(&format!(", {}%", level.min(100)));
        }
        Self { text, options }
    }
}

/// Everything drawn on top of the grid
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overlays {
    pub active_zones: Vec<MapRect>,
    pub no_go_zones: Vec<MapRect>,
    pub virtual_walls: Vec<MapLine>,
    pub path: Vec<MapPoint>,
    pub go_to_target: Option<MapPoint>,
    pub obstacles: Vec<MapPoint>,
    pub charger: Option<Pose>,
    pub robot: Option<Pose>,
    pub status: Option<StatusText>,
}

impl Overlays {
    /// Overlays reported with a decoded map
    pub fn from_map(map: &DecodedMap) -> Self {
        Self {
            active_zones: map.active_zones.clone(),
            no_go_zones: map.no_go_zones.clone(),
            virtual_walls: map.virtual_walls.clone(),
            path: map.path.clone(),
            go_to_target: map.go_to_target,
            obstacles: map.obstacles.clone(),
            charger: map.charger,
            robot: map.robot,
            status: None,
        }
    }

    /// Add an obstacle marker, clamped to the accepted coordinate range
    pub fn with_obstacle(mut self, x: f64, y: f64) -> Self {
        self.obstacles.push(clamp_obstacle(MapPoint::new(x, y)));
        self
    }

    pub fn with_status(mut self, status: Option<StatusText>) -> Self {
        self.status = status;
        self
    }
}

fn clamp_obstacle(point: MapPoint) -> MapPoint {
    MapPoint::new(
        point.x.clamp(0.0, MAX_OBSTACLE_COORD),
        point.y.clamp(0.0, MAX_OBSTACLE_COORD),
    )
}

/// Paint a frame
pub fn render(placement: &Placement, palette: &Palette, overlays: &Overlays) -> Frame {
    let mut canvas = Canvas::new(
        placement.frame_width,
        placement.frame_height,
        palette.class(MapClass::Background).opaque(),
    );

    paint_grid(&mut canvas, placement, palette);

    canvas.set_clip(placement.content);
    paint_overlays(&mut canvas, placement, palette, overlays);
    canvas.reset_clip();

    if let Some(status) = &overlays.status {
        paint_status(&mut canvas, palette.text(), status);
    }

    Frame::new(canvas.into_image())
}

fn paint_grid(canvas: &mut Canvas, placement: &Placement, palette: &Palette) {
    let raster = &placement.raster;
    let scale = placement.scale as i64;
    let wall = palette.class(MapClass::Wall).opaque();
    let floor = RoomId::new(0).map_or(wall, |room| palette.room(room).opaque());

    let cell_rect = |x: u32, y: u32| {
        let left = placement.content.left + x as i64 * scale;
        let top = placement.content.top + y as i64 * scale;
        PixelRect::new(left, top, left + scale, top + scale)
    };

    // Base classes first, rooms second
    for y in 0..raster.height() {
        for x in 0..raster.width() {
            let color = match raster.get(x, y) {
                Cell::Unknown => continue,
                Cell::Wall => wall,
                Cell::Floor | Cell::Room(_) => floor,
            };
            canvas.fill_pixels(cell_rect(x, y), color);
        }
    }
    for y in 0..raster.height() {
        for x in 0..raster.width() {
            if let Cell::Room(room) = raster.get(x, y) {
                canvas.fill_pixels(cell_rect(x, y), palette.room(room));
            }
        }
    }
}

fn paint_overlays(canvas: &mut Canvas, placement: &Placement, palette: &Palette, overlays: &Overlays) {
    let transform = &placement.transform;
    let scale = transform.scale();
    let thin = (scale / 2.0).round().max(1.0) as i64;

    let zone = palette.class(MapClass::Zone);
    for rect in &overlays.active_zones {
        paint_zone(canvas, placement, rect, zone, thin);
    }
    let no_go = palette.class(MapClass::NoGo);
    for rect in &overlays.no_go_zones {
        paint_zone(canvas, placement, rect, no_go, thin);
    }

    for wall in &overlays.virtual_walls {
        let (x1, y1) = transform.map_to_frame(wall.from);
        let (x2, y2) = transform.map_to_frame(wall.to);
        canvas.line(x1, y1, x2, y2, scale.round().max(1.0) as i64, no_go);
    }

    let path = palette.class(MapClass::Path);
    for pair in overlays.path.windows(2) {
        let (x1, y1) = transform.map_to_frame(pair[0]);
        let (x2, y2) = transform.map_to_frame(pair[1]);
        canvas.line(x1, y1, x2, y2, thin, path);
    }

    if let Some(target) = overlays.go_to_target {
        let (x, y) = transform.map_to_frame(target);
        canvas.circle(x, y, (scale * 2.0).max(2.0), palette.class(MapClass::GoTo));
    }

    // Off-grid obstacles land outside the clip and vanish
    let marker = no_go.opaque();
    for obstacle in &overlays.obstacles {
        let (x, y) = transform.map_to_frame(clamp_obstacle(*obstacle));
        canvas.circle(x, y, (scale * 1.5).max(2.0), marker);
    }

    if let Some(charger) = overlays.charger {
        let (x, y) = transform.map_to_frame(MapPoint::new(charger.x, charger.y));
        canvas.circle(x, y, (scale * 2.5).max(3.0), palette.class(MapClass::Charger));
    }

    if let Some(robot) = overlays.robot {
        let (x, y) = transform.map_to_frame(MapPoint::new(robot.x, robot.y));
        let radius = (scale * 3.0).max(3.0);
        canvas.circle(x, y, radius, palette.class(MapClass::Robot));

        let heading = transform.heading(robot.angle).to_radians();
        let tip_x = x + heading.cos() * radius;
        let tip_y = y + heading.sin() * radius;
        canvas.line(x, y, tip_x, tip_y, thin, palette.class(MapClass::Background));
    }
}

fn paint_zone(
    canvas: &mut Canvas,
    placement: &Placement,
    rect: &MapRect,
    color: ResolvedColor,
    thickness: i64,
) {
    let (ax, ay) = placement.transform.map_to_frame(MapPoint::new(rect.x1, rect.y1));
    let (bx, by) = placement.transform.map_to_frame(MapPoint::new(rect.x2, rect.y2));
    canvas.fill_rect(ax, ay, bx, by, color);
    canvas.outline_rect(ax, ay, bx, by, thickness, color.opaque());
}

fn paint_status(canvas: &mut Canvas, color: ResolvedColor, status: &StatusText) {
    let size = status.options.size.clamp(1, MAX_TEXT_SIZE) as i64;
    let bold = status.options.font == FontWeight::Bold;
    let pad = 2 * size;
    let glyph_h = font::GLYPH_HEIGHT as i64 * size;
    let top = match status.options.position {
        TextPosition::Top => pad,
        TextPosition::Bottom => canvas.height() as i64 - glyph_h - pad,
    };

    let advance = if bold { font::ADVANCE + 1 } else { font::ADVANCE } as i64 * size;
    let width = if bold { font::GLYPH_WIDTH + 1 } else { font::GLYPH_WIDTH };
    let mut left = pad;
    for c in status.text.chars() {
        let glyph = font::glyph(c);
        for row in 0..font::GLYPH_HEIGHT {
            for col in 0..width {
                // Bold repeats each column one pixel to the right
                let set = font::is_set(&glyph, col, row)
                    || (bold && col > 0 && font::is_set(&glyph, col - 1, row));
                if set {
                    let x = left + col as i64 * size;
                    let y = top + row as i64 * size;
                    canvas.fill_pixels(PixelRect::new(x, y, x + size, y + size), color);
                }
            }
        }
        left += advance;
    }
}
