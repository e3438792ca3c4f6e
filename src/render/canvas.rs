//! Drawing primitives over an RGBA buffer
//!
//! Shapes are rasterized with `imageproc`; [`Canvas`] is its draw target,
//! so every pixel it is handed gets clipped and then blended source-over
//! with the color's own alpha. Alpha 0 leaves the destination untouched,
//! alpha 255 replaces it.
//!
//! Outlines are drawn with opaque pens. Fills, lines and disks cover each
//! pixel exactly once, so translucent colors blend a single time; lines
//! and disks are rasterized into a coverage mask first for that.

use crate::palette::ResolvedColor;
use image::{GrayImage, Luma, Rgba, RgbaImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut,
    draw_polygon_mut, Canvas as DrawTarget,
};
use imageproc::point::Point;
use imageproc::rect::Rect;

const INK: Luma<u8> = Luma([255]);

/// Pixel rectangle, right/bottom exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

impl PixelRect {
    pub fn new(left: i64, top: i64, right: i64, bottom: i64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }

    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    pub fn intersect(&self, other: &PixelRect) -> PixelRect {
        PixelRect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        )
    }

    /// Grown by `by` pixels on every side
    fn inflate(&self, by: i64) -> PixelRect {
        PixelRect::new(
            self.left.saturating_sub(by),
            self.top.saturating_sub(by),
            self.right.saturating_add(by),
            self.bottom.saturating_add(by),
        )
    }

    /// As an `imageproc` rect, `None` when empty
    fn to_rect(self) -> Option<Rect> {
        if self.is_empty() {
            return None;
        }
        let left = i32::try_from(self.left).ok()?;
        let top = i32::try_from(self.top).ok()?;
        let width = u32::try_from(self.right - self.left).ok()?;
        let height = u32::try_from(self.bottom - self.top).ok()?;
        Some(Rect::at(left, top).of_size(width, height))
    }
}

/// Blend `src` over `dst`
pub fn blend(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let a = src[3] as u32;
    if a == 255 {
        return src;
    }
    if a == 0 {
        return dst;
    }
    let inv = 255 - a;
    let mix = |s: u8, d: u8| ((s as u32 * a + d as u32 * inv + 127) / 255) as u8;
    Rgba([
        mix(src[0], dst[0]),
        mix(src[1], dst[1]),
        mix(src[2], dst[2]),
        (a + (dst[3] as u32 * inv + 127) / 255) as u8,
    ])
}

/// RGBA frame under construction
pub struct Canvas {
    image: RgbaImage,
    clip: PixelRect,
}

impl DrawTarget for Canvas {
    type Pixel = Rgba<u8>;

    fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn get_pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        *self.image.get_pixel(x, y)
    }

    fn draw_pixel(&mut self, x: u32, y: u32, color: Rgba<u8>) {
        if !self.clip.contains(x as i64, y as i64) {
            return;
        }
        let pixel = self.image.get_pixel_mut(x, y);
        *pixel = blend(*pixel, color);
    }
}

impl Canvas {
    /// Canvas filled with one color
    pub fn new(width: u32, height: u32, fill: ResolvedColor) -> Self {
        Self {
            image: RgbaImage::from_pixel(width, height, fill.to_rgba()),
            clip: PixelRect::new(0, 0, width as i64, height as i64),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    fn bounds(&self) -> PixelRect {
        PixelRect::new(0, 0, self.width() as i64, self.height() as i64)
    }

    /// Restrict drawing to `rect` (intersected with the canvas)
    pub fn set_clip(&mut self, rect: PixelRect) {
        self.clip = rect.intersect(&self.bounds());
    }

    /// Allow drawing anywhere on the canvas
    pub fn reset_clip(&mut self) {
        self.clip = self.bounds();
    }

    /// Fill a rectangle given in continuous frame coordinates
    ///
    /// Covers every pixel whose center lies inside the rectangle.
    pub fn fill_rect(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, color: ResolvedColor) {
        let (left, right) = pixel_span(x1.min(x2), x1.max(x2));
        let (top, bottom) = pixel_span(y1.min(y2), y1.max(y2));
        self.fill_pixels(PixelRect::new(left, top, right, bottom), color);
    }

    /// Fill whole pixels
    pub fn fill_pixels(&mut self, rect: PixelRect, color: ResolvedColor) {
        if let Some(rect) = rect.intersect(&self.clip).to_rect() {
            draw_filled_rect_mut(self, rect, color.to_rgba());
        }
    }

    /// Opaque rectangle outline `thickness` pixels wide, inside the rectangle
    pub fn outline_rect(
        &mut self,
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        thickness: i64,
        color: ResolvedColor,
    ) {
        let (left, right) = pixel_span(x1.min(x2), x1.max(x2));
        let (top, bottom) = pixel_span(y1.min(y2), y1.max(y2));
        let t = thickness.max(1);
        // Sides beyond the clip stay beyond it, just closer
        let reach = self.clip.inflate(t + 1);
        let outer = PixelRect::new(
            left.clamp(reach.left, reach.right),
            top.clamp(reach.top, reach.bottom),
            right.clamp(reach.left, reach.right),
            bottom.clamp(reach.top, reach.bottom),
        );

        let pen = color.opaque().to_rgba();
        for inset in 0..t {
            match outer.inflate(-inset).to_rect() {
                Some(rect) => draw_hollow_rect_mut(self, rect, pen),
                None => break,
            }
        }
    }

    /// Straight line `thickness` pixels wide
    ///
    /// The segment is clipped before rasterizing, so endpoints far off the
    /// canvas cost no more than the visible part.
    pub fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, thickness: i64, color: ResolvedColor) {
        let t = thickness.max(1);
        let Some((ax, ay, bx, by)) = clip_segment(x1, y1, x2, y2, &self.clip.inflate(t)) else {
            return;
        };
        let area = PixelRect::new(
            ax.min(bx).floor() as i64 - t,
            ay.min(by).floor() as i64 - t,
            ax.max(bx).floor() as i64 + t + 1,
            ay.max(by).floor() as i64 + t + 1,
        )
        .intersect(&self.clip);
        if area.is_empty() {
            return;
        }

        let mut mask = coverage_mask(&area);
        let (ax, ay) = (ax - area.left as f64, ay - area.top as f64);
        let (bx, by) = (bx - area.left as f64, by - area.top as f64);
        let (dx, dy) = (bx - ax, by - ay);
        let length = dx.hypot(dy);

        if t == 1 || length < 1.0 {
            let start = (ax.floor() as f32, ay.floor() as f32);
            let end = (bx.floor() as f32, by.floor() as f32);
            draw_line_segment_mut(&mut mask, start, end, INK);
            if t > 1 {
                let x = ax.floor() as i32 - (t as i32 - 1) / 2;
                let y = ay.floor() as i32 - (t as i32 - 1) / 2;
                draw_filled_rect_mut(&mut mask, Rect::at(x, y).of_size(t as u32, t as u32), INK);
            }
        } else {
            let half = (t - 1) as f64 / 2.0;
            let (nx, ny) = (-dy / length * half, dx / length * half);
            let corner = |x: f64, y: f64| Point::new(x.round() as i32, y.round() as i32);
            let mut quad = vec![
                corner(ax + nx, ay + ny),
                corner(bx + nx, by + ny),
                corner(bx - nx, by - ny),
                corner(ax - nx, ay - ny),
            ];
            quad.dedup();
            if quad.len() < 3 || quad.first() == quad.last() {
                draw_line_segment_mut(&mut mask, (ax as f32, ay as f32), (bx as f32, by as f32), INK);
            } else {
                draw_polygon_mut(&mut mask, &quad, INK);
            }
        }
        self.blend_mask(&area, &mask, color.to_rgba());
    }

    /// Filled disk
    pub fn circle(&mut self, cx: f64, cy: f64, radius: f64, color: ResolvedColor) {
        let r = radius.max(0.5);
        if !(cx.is_finite() && cy.is_finite() && r.is_finite()) {
            return;
        }
        let (left, right) = pixel_span(cx - r, cx + r);
        let (top, bottom) = pixel_span(cy - r, cy + r);
        let area = PixelRect::new(left, top, right, bottom).intersect(&self.clip);
        if area.is_empty() {
            return;
        }

        let mut mask = coverage_mask(&area);
        let center = (
            (cx.floor() as i64 - area.left) as i32,
            (cy.floor() as i64 - area.top) as i32,
        );
        draw_filled_circle_mut(&mut mask, center, r.round() as i32, INK);
        self.blend_mask(&area, &mask, color.to_rgba());
    }

    /// Blend `color` into every pixel the mask covers
    fn blend_mask(&mut self, area: &PixelRect, mask: &GrayImage, color: Rgba<u8>) {
        for (x, y, coverage) in mask.enumerate_pixels() {
            if coverage[0] > 0 {
                self.draw_pixel(area.left as u32 + x, area.top as u32 + y, color);
            }
        }
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }
}

/// Blank mask covering `area`, which must be non-empty and on the canvas
fn coverage_mask(area: &PixelRect) -> GrayImage {
    GrayImage::new((area.right - area.left) as u32, (area.bottom - area.top) as u32)
}

/// Pixels whose centers fall in `[from, to)`, at least one pixel wide
fn pixel_span(from: f64, to: f64) -> (i64, i64) {
    let start = (from - 0.5).ceil() as i64;
    let end = (to - 0.5).ceil() as i64;
    if end <= start {
        let single = from.floor() as i64;
        (single, single.saturating_add(1))
    } else {
        (start, end)
    }
}

/// Liang-Barsky clipping of a segment to `rect`
fn clip_segment(
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    rect: &PixelRect,
) -> Option<(f64, f64, f64, f64)> {
    if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) || rect.is_empty() {
        return None;
    }
    let (dx, dy) = (x2 - x1, y2 - y1);
    let mut enter = 0.0f64;
    let mut exit = 1.0f64;
    for (p, q) in [
        (-dx, x1 - rect.left as f64),
        (dx, rect.right as f64 - x1),
        (-dy, y1 - rect.top as f64),
        (dy, rect.bottom as f64 - y1),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else {
            let t = q / p;
            if p < 0.0 {
                enter = enter.max(t);
            } else {
                exit = exit.min(t);
            }
        }
    }
    if enter > exit {
        return None;
    }
    Some((x1 + dx * enter, y1 + dy * enter, x1 + dx * exit, y1 + dy * exit))
}
