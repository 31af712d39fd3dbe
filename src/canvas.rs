use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{EditorError, Result};

/// Fully transparent pixel.
pub const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

// ============================================================================
// PIXEL RECTANGLES
// ============================================================================

/// Axis-aligned pixel rectangle. `x`/`y` may be negative while a stroke is
/// being bounded; `width`/`height` of 0 means empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle spanning two inclusive corners in any order.
    pub fn from_corners(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        let (min_x, max_x) = (x0.min(x1), x0.max(x1));
        let (min_y, max_y) = (y0.min(y1), y0.max(y1));
        Self {
            x: min_x,
            y: min_y,
            width: max_x.abs_diff(min_x).saturating_add(1),
            height: max_y.abs_diff(min_y).saturating_add(1),
        }
    }

    /// Bounding box of a set of points. Empty for no points.
    pub fn from_points<I>(points: I) -> Self
    where
        I: IntoIterator<Item = (i32, i32)>,
    {
        let mut iter = points.into_iter();
        let Some((fx, fy)) = iter.next() else {
            return Self::default();
        };
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (fx, fy, fx, fy);
        for (x, y) in iter {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        Self::from_corners(min_x, min_y, max_x, max_y)
    }

    /// Exclusive right edge, saturating at `i32::MAX`.
    pub fn right(&self) -> i32 {
        self.x.saturating_add_unsigned(self.width)
    }

    /// Exclusive bottom edge, saturating at `i32::MAX`.
    pub fn bottom(&self) -> i32 {
        self.y.saturating_add_unsigned(self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn contains_rect(&self, other: &PixelRect) -> bool {
        other.is_empty()
            || (other.x >= self.x
                && other.y >= self.y
                && other.right() <= self.right()
                && other.bottom() <= self.bottom())
    }

    /// Smallest rectangle covering both. Empty inputs are ignored.
    pub fn union(&self, other: &PixelRect) -> PixelRect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        PixelRect::new(x, y, right.abs_diff(x), bottom.abs_diff(y))
    }

    /// Overlap of both rectangles, or an empty rect.
    pub fn intersect(&self, other: &PixelRect) -> PixelRect {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= x || bottom <= y {
            return PixelRect::default();
        }
        PixelRect::new(x, y, right.abs_diff(x), bottom.abs_diff(y))
    }

    /// Grow by `dx` columns left and right and `dy` rows top and bottom.
    pub fn expand(&self, dx: u32, dy: u32) -> PixelRect {
        if self.is_empty() {
            return *self;
        }
        PixelRect::new(
            self.x.saturating_sub_unsigned(dx),
            self.y.saturating_sub_unsigned(dy),
            self.width.saturating_add(dx.saturating_mul(2)),
            self.height.saturating_add(dy.saturating_mul(2)),
        )
    }

    /// Intersect with a `width`x`height` canvas anchored at the origin.
    pub fn clamp_to(&self, width: u32, height: u32) -> PixelRect {
        self.intersect(&PixelRect::new(0, 0, width, height))
    }

    /// Iterate `(x, y)` over every pixel, row-major.
    pub fn points(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        let (x0, x1) = (self.x, self.right());
        (self.y..self.bottom()).flat_map(move |y| (x0..x1).map(move |x| (x, y)))
    }
}

/// Quarter-turn rotations of a whole canvas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rotation {
    Cw90,
    Ccw90,
    Half,
}

impl Rotation {
    /// Canvas size after rotating a `width`x`height` canvas.
    pub fn rotated_size(self, width: u32, height: u32) -> (u32, u32) {
        match self {
            Rotation::Cw90 | Rotation::Ccw90 => (height, width),
            Rotation::Half => (width, height),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Rotation::Cw90 => "Rotate 90° Clockwise",
            Rotation::Ccw90 => "Rotate 90° Counter-Clockwise",
            Rotation::Half => "Rotate 180°",
        }
    }
}

// ============================================================================
// RASTER BUFFER
// ============================================================================

/// Fixed-size grid of straight-alpha RGBA pixels.
///
/// Every in-range coordinate holds a defined pixel. Checked accessors reject
/// out-of-range coordinates with `OutOfBounds`; the `*_wrapped` family reduces
/// them modulo the buffer size instead.
#[derive(Clone, Debug, PartialEq)]
pub struct RasterBuffer {
    pixels: RgbaImage,
}

impl RasterBuffer {
    /// Transparent buffer.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        Self::filled(width, height, TRANSPARENT)
    }

    pub fn filled(width: u32, height: u32, color: Rgba<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(EditorError::InvalidDimensions { width, height });
        }
        Ok(Self {
            pixels: RgbaImage::from_pixel(width, height, color),
        })
    }

    pub fn from_rgba_image(image: RgbaImage) -> Result<Self> {
        if image.width() == 0 || image.height() == 0 {
            return Err(EditorError::InvalidDimensions {
                width: image.width(),
                height: image.height(),
            });
        }
        Ok(Self { pixels: image })
    }

    /// Build from tightly packed RGBA bytes.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(EditorError::InvalidDimensions { width, height });
        }
        RgbaImage::from_raw(width, height, data)
            .map(|pixels| Self { pixels })
            .ok_or(EditorError::InvalidDimensions { width, height })
    }

    pub fn as_rgba_image(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_rgba_image(self) -> RgbaImage {
        self.pixels
    }

    pub fn as_raw(&self) -> &[u8] {
        self.pixels.as_raw()
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// Full extent as a rectangle at the origin.
    pub fn rect(&self) -> PixelRect {
        PixelRect::new(0, 0, self.width(), self.height())
    }

    #[inline]
    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width() && (y as u32) < self.height()
    }

    /// Reduce any coordinate onto the torus.
    #[inline]
    pub fn wrap_coords(&self, x: i32, y: i32) -> (u32, u32) {
        (
            (x as i64).rem_euclid(self.width() as i64) as u32,
            (y as i64).rem_euclid(self.height() as i64) as u32,
        )
    }

    pub fn get(&self, x: i32, y: i32) -> Result<Rgba<u8>> {
        if !self.in_bounds(x, y) {
            return Err(self.oob(x, y));
        }
        Ok(*self.pixels.get_pixel(x as u32, y as u32))
    }

    pub fn set(&mut self, x: i32, y: i32, pixel: Rgba<u8>) -> Result<()> {
        if !self.in_bounds(x, y) {
            return Err(self.oob(x, y));
        }
        self.pixels.put_pixel(x as u32, y as u32, pixel);
        Ok(())
    }

    pub fn get_wrapped(&self, x: i32, y: i32) -> Rgba<u8> {
        let (wx, wy) = self.wrap_coords(x, y);
        *self.pixels.get_pixel(wx, wy)
    }

    pub fn set_wrapped(&mut self, x: i32, y: i32, pixel: Rgba<u8>) {
        let (wx, wy) = self.wrap_coords(x, y);
        self.pixels.put_pixel(wx, wy, pixel);
    }

    /// Unchecked read for coordinates already validated by the caller.
    #[inline]
    pub(crate) fn pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        *self.pixels.get_pixel(x, y)
    }

    #[inline]
    pub(crate) fn put(&mut self, x: u32, y: u32, pixel: Rgba<u8>) {
        self.pixels.put_pixel(x, y, pixel);
    }

    fn oob(&self, x: i32, y: i32) -> EditorError {
        EditorError::out_of_bounds(x as i64, y as i64, self.width(), self.height())
    }

    fn check_same_size(&self, other: &RasterBuffer) -> Result<()> {
        if self.dimensions() != other.dimensions() {
            return Err(EditorError::SizeMismatch {
                expected: self.dimensions(),
                actual: other.dimensions(),
            });
        }
        Ok(())
    }

    /// Composite `other` onto this buffer at `opacity` using straight alpha.
    ///
    /// Rows are blended in parallel.
    pub fn blend_over(&mut self, other: &RasterBuffer, opacity: f32) -> Result<()> {
        self.check_same_size(other)?;
        let opacity = opacity.clamp(0.0, 1.0);
        if opacity <= 0.0 {
            return Ok(());
        }
        let row_bytes = self.width() as usize * 4;
        let src = other.pixels.as_raw();
        let dst: &mut [u8] = &mut self.pixels;
        dst.par_chunks_mut(row_bytes)
            .zip(src.par_chunks(row_bytes))
            .for_each(|(dst_row, src_row)| {
                for (d, s) in dst_row.chunks_exact_mut(4).zip(src_row.chunks_exact(4)) {
                    let out = blend_pixel(
                        Rgba([d[0], d[1], d[2], d[3]]),
                        Rgba([s[0], s[1], s[2], s[3]]),
                        opacity,
                    );
                    d.copy_from_slice(&out.0);
                }
            });
        Ok(())
    }

    /// Independent copy of `rect`, which must lie inside the buffer.
    pub fn sub_region(&self, rect: PixelRect) -> Result<RasterBuffer> {
        if rect.is_empty() {
            return Err(EditorError::InvalidDimensions {
                width: rect.width,
                height: rect.height,
            });
        }
        if !self.rect().contains_rect(&rect) {
            return Err(self.oob(rect.right() - 1, rect.bottom() - 1));
        }
        let view = imageops::crop_imm(
            &self.pixels,
            rect.x as u32,
            rect.y as u32,
            rect.width,
            rect.height,
        );
        Ok(RasterBuffer {
            pixels: view.to_image(),
        })
    }

    /// Copy `src` with its top-left at `(x, y)`, replacing pixels. Parts that
    /// fall outside are dropped. Returns the rectangle actually written.
    pub fn blit(&mut self, src: &RasterBuffer, x: i32, y: i32) -> PixelRect {
        let target = PixelRect::new(x, y, src.width(), src.height()).intersect(&self.rect());
        for (px, py) in target.points() {
            let p = src.pixel((px - x) as u32, (py - y) as u32);
            self.put(px as u32, py as u32, p);
        }
        target
    }

    pub fn fill(&mut self, color: Rgba<u8>) {
        for p in self.pixels.pixels_mut() {
            *p = color;
        }
    }

    pub fn clear(&mut self) {
        self.fill(TRANSPARENT);
    }

    pub fn flip_horizontal(&mut self) {
        imageops::flip_horizontal_in_place(&mut self.pixels);
    }

    pub fn flip_vertical(&mut self) {
        imageops::flip_vertical_in_place(&mut self.pixels);
    }

    pub fn rotate_180(&mut self) {
        imageops::rotate180_in_place(&mut self.pixels);
    }

    pub fn rotated_90_cw(&self) -> RasterBuffer {
        RasterBuffer {
            pixels: imageops::rotate90(&self.pixels),
        }
    }

    pub fn rotated_90_ccw(&self) -> RasterBuffer {
        RasterBuffer {
            pixels: imageops::rotate270(&self.pixels),
        }
    }

    pub fn rotated(&self, rotation: Rotation) -> RasterBuffer {
        match rotation {
            Rotation::Cw90 => self.rotated_90_cw(),
            Rotation::Ccw90 => self.rotated_90_ccw(),
            Rotation::Half => {
                let mut out = self.clone();
                out.rotate_180();
                out
            }
        }
    }

    /// Change the canvas size without scaling. Content stays anchored at the
    /// top-left; new area is transparent.
    pub fn with_canvas_size(&self, width: u32, height: u32) -> Result<RasterBuffer> {
        let mut out = RasterBuffer::new(width, height)?;
        out.blit(self, 0, 0);
        Ok(out)
    }

    /// Nearest-neighbour rescale, which keeps pixel art crisp.
    pub fn resized(&self, width: u32, height: u32) -> Result<RasterBuffer> {
        if width == 0 || height == 0 {
            return Err(EditorError::InvalidDimensions { width, height });
        }
        if (width, height) == self.dimensions() {
            return Ok(self.clone());
        }
        Ok(RasterBuffer {
            pixels: imageops::resize(&self.pixels, width, height, FilterType::Nearest),
        })
    }

    /// Crop to `rect` after clamping it to the buffer.
    pub fn cropped(&self, rect: PixelRect) -> Result<RasterBuffer> {
        self.sub_region(rect.clamp_to(self.width(), self.height()))
    }

    /// `(x, y, pixel)` for every pixel, row-major.
    pub fn iter_pixels(&self) -> impl Iterator<Item = (u32, u32, Rgba<u8>)> + '_ {
        self.pixels.enumerate_pixels().map(|(x, y, p)| (x, y, *p))
    }

    pub fn memory_size(&self) -> usize {
        self.pixels.as_raw().len()
    }
}

/// Straight-alpha "over" of `top` onto `base` at `opacity`.
///
/// With an opaque base this is `top*a + base*(1-a)` per channel where
/// `a = top.alpha * opacity`.
pub fn blend_pixel(base: Rgba<u8>, top: Rgba<u8>, opacity: f32) -> Rgba<u8> {
    if top[3] == 0 || opacity <= 0.0 {
        return base;
    }
    if opacity >= 1.0 && top[3] == 255 {
        return top;
    }

    let top_a = (top[3] as f32 / 255.0) * opacity.min(1.0);
    let base_a = base[3] as f32 / 255.0;
    let out_a = top_a + base_a * (1.0 - top_a);
    if out_a <= 0.0 {
        return TRANSPARENT;
    }

    let channel = |t: u8, b: u8| -> u8 {
        let t = t as f32 / 255.0;
        let b = b as f32 / 255.0;
        let c = (t * top_a + b * base_a * (1.0 - top_a)) / out_a;
        (c * 255.0).round().clamp(0.0, 255.0) as u8
    };

    Rgba([
        channel(top[0], base[0]),
        channel(top[1], base[1]),
        channel(top[2], base[2]),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}
