// ============================================================================
// STROKE ENGINE: brush stamping, lines, shapes, mirroring, wraparound
// ============================================================================
//
// The engine never writes to a layer. It accumulates a sparse coverage map
// (`StrokeRaster`) recording which canvas pixels a gesture touches and, for
// each, the primary-stroke coordinate it came from. Painting that coverage onto a
// scratch copy of the dirty rectangle yields the "after" patch of a command.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::canvas::{PixelRect, RasterBuffer, TRANSPARENT, blend_pixel};
use crate::components::tools::{BrushShape, DrawingContext, MAX_BRUSH_WIDTH};
use crate::error::{EditorError, Result};
use crate::selection::{Selection, permits};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShapeKind {
    Line,
    Rectangle,
    Ellipse,
}

/// Modifier keys for two-point shape gestures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShapeModifiers {
    /// Equal width and height (lines snap to 45 degree steps).
    pub constrain: bool,
    /// The drag start is the centre rather than a corner.
    pub center: bool,
    /// Fill the interior of rectangles and ellipses.
    pub filled: bool,
}

#[inline]
fn sign(v: i32) -> i32 {
    if v < 0 { -1 } else { 1 }
}

/// Rectangle spanned by a drag from `start` to `end`.
pub fn shape_rect(start: (i32, i32), end: (i32, i32), modifiers: ShapeModifiers) -> PixelRect {
    let (mut dx, mut dy) = (end.0 - start.0, end.1 - start.1);
    if modifiers.constrain {
        let m = dx.abs().min(dy.abs());
        dx = m * sign(dx);
        dy = m * sign(dy);
    }
    if modifiers.center {
        PixelRect::from_corners(
            start.0 - dx.abs(),
            start.1 - dy.abs(),
            start.0 + dx.abs(),
            start.1 + dy.abs(),
        )
    } else {
        PixelRect::from_corners(start.0, start.1, start.0 + dx, start.1 + dy)
    }
}

/// Endpoints of a line gesture after modifiers.
pub fn line_endpoints(
    start: (i32, i32),
    end: (i32, i32),
    modifiers: ShapeModifiers,
) -> ((i32, i32), (i32, i32)) {
    let (mut dx, mut dy) = (end.0 - start.0, end.1 - start.1);
    if modifiers.constrain {
        let (adx, ady) = (dx.abs(), dy.abs());
        if adx > ady * 2 {
            dy = 0;
        } else if ady > adx * 2 {
            dx = 0;
        } else {
            let m = adx.max(ady);
            dx = m * sign(dx);
            dy = m * sign(dy);
        }
    }
    if modifiers.center {
        ((start.0 - dx, start.1 - dy), (start.0 + dx, start.1 + dy))
    } else {
        (start, (start.0 + dx, start.1 + dy))
    }
}

/// Bresenham's line, endpoints inclusive, 8-connected with no gaps.
pub fn bresenham(from: (i32, i32), to: (i32, i32)) -> Vec<(i32, i32)> {
    let (mut x0, mut y0) = from;
    let (x1, y1) = to;
    let dx = (x1 - x0).abs();
    let dy = (y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx - dy;
    let mut points = Vec::with_capacity((dx.max(dy) + 1) as usize);

    loop {
        points.push((x0, y0));
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 > -dy {
            err -= dy;
            x0 += sx;
        }
        if e2 < dx {
            err += dx;
            y0 += sy;
        }
    }
    points
}

/// Clip the segment `a`-`b` to `window` (Liang-Barsky). Endpoints are rounded
/// back onto the pixel grid.
fn clip_segment(a: (i32, i32), b: (i32, i32), window: PixelRect) -> Option<((i32, i32), (i32, i32))> {
    if window.is_empty() {
        return None;
    }
    let (x0, y0) = (a.0 as f64, a.1 as f64);
    let (dx, dy) = (b.0 as f64 - x0, b.1 as f64 - y0);
    let (xmin, ymin) = (window.x as f64, window.y as f64);
    let (xmax, ymax) = ((window.right() - 1) as f64, (window.bottom() - 1) as f64);
    let (mut t0, mut t1) = (0.0f64, 1.0f64);
    for (p, q) in [(-dx, x0 - xmin), (dx, xmax - x0), (-dy, y0 - ymin), (dy, ymax - y0)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }
    let at = |t: f64| {
        (
            (x0 + t * dx).round().clamp(xmin, xmax) as i32,
            (y0 + t * dy).round().clamp(ymin, ymax) as i32,
        )
    };
    Some((at(t0), at(t1)))
}

/// Drop the corner pixel of every L-shaped triple so 1px freehand lines
/// stay single-pixel wide.
pub fn thin_pixel_perfect(points: &[(i32, i32)]) -> Vec<(i32, i32)> {
    let orthogonal = |a: (i32, i32), b: (i32, i32)| (a.0 - b.0).abs() + (a.1 - b.1).abs() == 1;
    let mut out: Vec<(i32, i32)> = Vec::with_capacity(points.len());
    for &p in points {
        if out.last() == Some(&p) {
            continue;
        }
        out.push(p);
        let n = out.len();
        if n >= 3 {
            let (a, b, c) = (out[n - 3], out[n - 2], out[n - 1]);
            if orthogonal(a, b)
                && orthogonal(b, c)
                && (a.0 - c.0).abs() == 1
                && (a.1 - c.1).abs() == 1
            {
                out.remove(n - 2);
            }
        }
    }
    out
}

/// Quadrant-plotted midpoint ellipse inscribed in `rect`. Returns the
/// outline points and, per outline row, the horizontal span it bounds.
fn midpoint_ellipse(rect: PixelRect) -> (Vec<(i32, i32)>, Vec<(i32, i32, i32)>) {
    let x1 = rect.right() - 1;
    let y1 = rect.bottom() - 1;
    let a = (rect.width as i64 - 1) / 2;
    let b = (rect.height as i64 - 1) / 2;
    // Even sizes have a two-pixel-wide centre: left/right (top/bottom)
    // quadrants hang off different centre columns (rows).
    let (xl, xr) = (rect.x + a as i32, x1 - a as i32);
    let (yt, yb) = (rect.y + b as i32, y1 - b as i32);

    let mut outline = Vec::new();
    let mut spans = Vec::new();
    let mut plot = |x: i64, y: i64| {
        let (x, y) = (x as i32, y as i32);
        outline.extend_from_slice(&[(xr + x, yb + y), (xl - x, yb + y), (xr + x, yt - y), (xl - x, yt - y)]);
        spans.push((yb + y, xl - x, xr + x));
        spans.push((yt - y, xl - x, xr + x));
    };

    let (aa, bb) = ((a * a) as f64, (b * b) as f64);
    let (mut x, mut y) = (0i64, b);
    let mut dx = 0.0f64;
    let mut dy = 2.0 * aa * y as f64;
    let mut d1 = bb - aa * b as f64 + 0.25 * aa;
    while dx < dy {
        plot(x, y);
        x += 1;
        dx += 2.0 * bb;
        if d1 < 0.0 {
            d1 += dx + bb;
        } else {
            y -= 1;
            dy -= 2.0 * aa;
            d1 += dx - dy + bb;
        }
    }

    let mut d2 = bb * (x as f64 + 0.5).powi(2) + aa * ((y - 1) as f64).powi(2) - aa * bb;
    while y >= 0 {
        plot(x, y);
        y -= 1;
        dy -= 2.0 * aa;
        if d2 > 0.0 {
            d2 += aa - dy;
        } else {
            x += 1;
            dx += 2.0 * bb;
            d2 += dx - dy + aa;
        }
    }

    outline.sort_unstable();
    outline.dedup();
    (outline, spans)
}

// ============================================================================
// COVERAGE
// ============================================================================

/// Pixels touched by one gesture.
#[derive(Clone, Debug, PartialEq)]
pub struct StrokeRaster {
    width: u32,
    height: u32,
    /// Covered canvas pixel -> the primary (pre-wrap, pre-mirror) coordinate
    /// that produced the write. Mirrored copies share their source's
    /// coordinate, so they sample the same pattern color.
    sources: HashMap<(i32, i32), (i32, i32)>,
    dirty: PixelRect,
    /// Bounding box of primary coverage before wrapping; the pattern anchor.
    footprint: PixelRect,
}

impl StrokeRaster {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            sources: HashMap::new(),
            dirty: PixelRect::default(),
            footprint: PixelRect::default(),
        }
    }

    /// Minimal bounding box of touched canvas pixels.
    pub fn dirty(&self) -> PixelRect {
        self.dirty
    }

    pub fn footprint(&self) -> PixelRect {
        self.footprint
    }

    pub fn covered_count(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn is_covered(&self, x: i32, y: i32) -> bool {
        self.sources.contains_key(&(x, y))
    }

    /// Covered canvas pixels, row-major.
    pub fn covered_pixels(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.dirty.points().filter(|&(x, y)| self.is_covered(x, y))
    }

    /// Paint the coverage onto `target`, whose pixel (0, 0) sits at canvas
    /// coordinate `origin`. Pixels outside `target` are skipped.
    pub fn paint(&self, ctx: &DrawingContext, target: &mut RasterBuffer, origin: (i32, i32)) {
        let pattern = ctx.active_pattern();
        let anchor = (self.footprint.x, self.footprint.y);
        for (x, y) in self.dirty.points() {
            let Some(&source) = self.sources.get(&(x, y)) else {
                continue;
            };
            let (tx, ty) = (x - origin.0, y - origin.1);
            if !target.in_bounds(tx, ty) {
                continue;
            }
            let dst = target.pixel(tx as u32, ty as u32);
            let out = if ctx.erase {
                TRANSPARENT
            } else if let Some(pattern) = pattern {
                let px = (source.0 - anchor.0).rem_euclid(pattern.width() as i32) as u32;
                let py = (source.1 - anchor.1).rem_euclid(pattern.height() as i32) as u32;
                blend_pixel(dst, pattern.pixel(px, py), 1.0)
            } else {
                blend_pixel(dst, ctx.color, 1.0)
            };
            target.put(tx as u32, ty as u32, out);
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Rasterizes gestures for one context and selection.
pub struct StrokeEngine<'a> {
    ctx: &'a DrawingContext,
    selection: Option<&'a Selection>,
    raster: StrokeRaster,
}

impl<'a> StrokeEngine<'a> {
    pub fn new(
        ctx: &'a DrawingContext,
        selection: Option<&'a Selection>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(EditorError::InvalidDimensions { width, height });
        }
        if let Some(selection) = selection {
            selection.check_dimensions(width, height)?;
        }
        Ok(Self {
            ctx,
            selection,
            raster: StrokeRaster::new(width, height),
        })
    }

    pub fn finish(self) -> StrokeRaster {
        self.raster
    }

    /// Record a primary write at pre-wrap `(x, y)` plus its reflections,
    /// after wrapping or clipping and selection filtering.
    fn cover(&mut self, x: i32, y: i32) {
        let (w, h) = (self.raster.width, self.raster.height);
        self.raster.footprint = self.raster.footprint.union(&PixelRect::new(x, y, 1, 1));
        let positions = self.ctx.mirror.positions(x, y, w, h);
        for &(px, py) in positions.iter() {
            let (tx, ty) = if self.ctx.wrap {
                let (wx, wy) = (
                    (px as i64).rem_euclid(w as i64) as i32,
                    (py as i64).rem_euclid(h as i64) as i32,
                );
                (wx, wy)
            } else if px >= 0 && py >= 0 && (px as u32) < w && (py as u32) < h {
                (px, py)
            } else {
                continue;
            };
            if !permits(self.selection, tx, ty) {
                continue;
            }
            if let std::collections::hash_map::Entry::Vacant(slot) = self.raster.sources.entry((tx, ty)) {
                slot.insert((x, y));
                self.raster.dirty = self.raster.dirty.union(&PixelRect::new(tx, ty, 1, 1));
            }
        }
    }

    /// Canvas-space window outside which a primary write cannot land on the
    /// canvas, even reflected: the canvas and its mirror images, grown by the
    /// brush and pattern reach. Only meaningful without wraparound.
    fn reach(&self) -> PixelRect {
        let (w, h) = (self.raster.width, self.raster.height);
        let corners = [(0, 0), (w as i32 - 1, h as i32 - 1)];
        let images = corners
            .iter()
            .flat_map(|&(x, y)| self.ctx.mirror.positions(x, y, w, h).iter().copied().collect::<Vec<_>>());
        let mut pad = self.ctx.brush_width.clamp(1, MAX_BRUSH_WIDTH) / 2 + 1;
        if let Some(pattern) = self.ctx.active_pattern() {
            pad += pattern.width().max(pattern.height());
        }
        PixelRect::from_points(images).expand(pad, pad)
    }

    /// Cover every pixel of `rect`. Pixels that cannot reach the canvas are
    /// skipped; with wraparound at most one period per axis is visited,
    /// since later periods lose to first-write-wins anyway.
    fn cover_rect(&mut self, rect: PixelRect) {
        if rect.is_empty() {
            return;
        }
        self.raster.footprint = self.raster.footprint.union(&rect);
        let visit = if self.ctx.wrap {
            PixelRect::new(
                rect.x,
                rect.y,
                rect.width.min(self.raster.width),
                rect.height.min(self.raster.height),
            )
        } else {
            rect.intersect(&self.reach())
        };
        for (x, y) in visit.points() {
            self.cover(x, y);
        }
    }

    /// Stamp the brush footprint centred on `(cx, cy)`.
    pub fn stamp(&mut self, cx: i32, cy: i32) {
        let ctx = self.ctx;
        let n = ctx.brush_width.clamp(1, MAX_BRUSH_WIDTH);
        match (ctx.brush_shape, ctx.active_pattern()) {
            (BrushShape::Pattern, Some(pattern)) => {
                let (pw, ph) = pattern.dimensions();
                let (x0, y0) = (cx - (pw / 2) as i32, cy - (ph / 2) as i32);
                for dy in 0..ph as i32 {
                    for dx in 0..pw as i32 {
                        self.cover(x0 + dx, y0 + dy);
                    }
                }
            }
            (BrushShape::Circle, _) => {
                // Squared-distance test over the integer window keeps odd and
                // even widths symmetric about the centre pixel.
                let r = n as f32 / 2.0;
                let r2 = r * r;
                let lo = (-r).floor() as i32;
                let hi = r.floor() as i32;
                for dy in lo..=hi {
                    for dx in lo..=hi {
                        if ((dx * dx + dy * dy) as f32) <= r2 {
                            self.cover(cx + dx, cy + dy);
                        }
                    }
                }
            }
            // A pattern brush without a captured pattern stamps solid squares.
            (BrushShape::Square, _) | (BrushShape::Pattern, None) => {
                let (x0, y0) = (cx - (n / 2) as i32, cy - (n / 2) as i32);
                for dy in 0..n as i32 {
                    for dx in 0..n as i32 {
                        self.cover(x0 + dx, y0 + dy);
                    }
                }
            }
        }
    }

    /// With wraparound, step toward `to` the short way across an edge.
    fn unwrap_towards(&self, from: (i32, i32), to: (i32, i32)) -> (i32, i32) {
        if !self.ctx.wrap {
            return to;
        }
        let (w, h) = (self.raster.width as i32, self.raster.height as i32);
        let (mut x, mut y) = to;
        if 2 * (to.0 - from.0).abs() > w {
            x += if to.0 < from.0 { w } else { -w };
        }
        if 2 * (to.1 - from.1).abs() > h {
            y += if to.1 < from.1 { h } else { -h };
        }
        (x, y)
    }

    /// Centre points the brush visits along `points`.
    ///
    /// With wraparound, samples are first reduced onto the torus. Without it,
    /// segments are clipped to the region that can still reach the canvas.
    pub fn trail(&self, points: &[(i32, i32)]) -> Vec<(i32, i32)> {
        let (w, h) = (self.raster.width as i32, self.raster.height as i32);
        let points: Vec<(i32, i32)> = if self.ctx.wrap {
            points.iter().map(|&(x, y)| (x.rem_euclid(w), y.rem_euclid(h))).collect()
        } else {
            points.to_vec()
        };
        let reach = if self.ctx.wrap { None } else { Some(self.reach()) };
        let segment = |a: (i32, i32), b: (i32, i32)| match reach {
            Some(window) if !window.contains(a.0, a.1) || !window.contains(b.0, b.1) => clip_segment(a, b, window),
            _ => Some((a, b)),
        };
        match points.as_slice() {
            [] => Vec::new(),
            [only] => match reach {
                Some(window) if !window.contains(only.0, only.1) => Vec::new(),
                _ => vec![*only],
            },
            _ => {
                let mut trail: Vec<(i32, i32)> = Vec::new();
                for pair in points.windows(2) {
                    let end = self.unwrap_towards(pair[0], pair[1]);
                    let Some((from, to)) = segment(pair[0], end) else {
                        continue;
                    };
                    for p in bresenham(from, to) {
                        if trail.last() != Some(&p) {
                            trail.push(p);
                        }
                    }
                }
                if self.ctx.pixel_perfect && self.ctx.brush_width <= 1 {
                    thin_pixel_perfect(&trail)
                } else {
                    trail
                }
            }
        }
    }

    /// Freehand path: stamps along Bresenham segments between samples.
    pub fn path(&mut self, points: &[(i32, i32)]) {
        for (x, y) in self.trail(points) {
            self.stamp(x, y);
        }
    }

    pub fn line(&mut self, from: (i32, i32), to: (i32, i32)) {
        self.path(&[from, to]);
    }

    /// Rectangle outline stroked with the brush. `filled`, or a rect whose
    /// shorter side is at most twice the brush width, covers the whole block.
    /// A 1px brush traces the edge pixels directly.
    pub fn rectangle(&mut self, rect: PixelRect, filled: bool) {
        if rect.is_empty() {
            return;
        }
        let width = self.ctx.brush_width.clamp(1, MAX_BRUSH_WIDTH);
        if filled || rect.width.min(rect.height) <= 2 * width {
            self.cover_rect(rect);
            return;
        }
        let (x0, y0, x1, y1) = (rect.x, rect.y, rect.right() - 1, rect.bottom() - 1);
        if width <= 1 && self.ctx.active_pattern().is_none() {
            self.cover_rect(PixelRect::new(x0, y0, rect.width, 1));
            self.cover_rect(PixelRect::new(x0, y1, rect.width, 1));
            self.cover_rect(PixelRect::new(x0, y0, 1, rect.height));
            self.cover_rect(PixelRect::new(x1, y0, 1, rect.height));
            return;
        }
        self.path(&[(x0, y0), (x1, y0), (x1, y1), (x0, y1), (x0, y0)]);
    }

    /// Midpoint ellipse inscribed in `rect`.
    pub fn ellipse(&mut self, rect: PixelRect, filled: bool) {
        if rect.is_empty() {
            return;
        }
        if rect.width <= 2 || rect.height <= 2 {
            // Too thin to curve.
            self.cover_rect(rect);
            return;
        }
        let (outline, spans) = midpoint_ellipse(rect);
        if filled {
            for (y, xa, xb) in spans {
                for x in xa..=xb {
                    self.cover(x, y);
                }
            }
        }
        for (x, y) in outline {
            self.stamp(x, y);
        }
    }

    /// Two-point shape gesture.
    pub fn shape(&mut self, kind: ShapeKind, start: (i32, i32), end: (i32, i32), modifiers: ShapeModifiers) {
        match kind {
            ShapeKind::Line => {
                let (a, b) = line_endpoints(start, end, modifiers);
                self.line(a, b);
            }
            ShapeKind::Rectangle => self.rectangle(shape_rect(start, end, modifiers), modifiers.filled),
            ShapeKind::Ellipse => self.ellipse(shape_rect(start, end, modifiers), modifiers.filled),
        }
    }

    /// Conservative bound of what a freehand path over `points` may touch:
    /// the path and each mirrored copy, grown by the brush radius plus one
    /// pixel and by half the pattern size, clipped to the canvas. With
    /// wraparound anything may be touched, so it is the whole canvas.
    pub fn bounding_rect(ctx: &DrawingContext, points: &[(i32, i32)], width: u32, height: u32) -> PixelRect {
        if points.is_empty() {
            return PixelRect::default();
        }
        if ctx.wrap {
            return PixelRect::new(0, 0, width, height);
        }
        let all = points
            .iter()
            .flat_map(|&(x, y)| ctx.mirror.positions(x, y, width, height).iter().copied().collect::<Vec<_>>());
        let pad = (ctx.brush_width.clamp(1, MAX_BRUSH_WIDTH) + 1) / 2 + 1;
        let (mut pad_x, mut pad_y) = (pad, pad);
        if let Some(pattern) = ctx.active_pattern() {
            pad_x += (pattern.width() + 1) / 2;
            pad_y += (pattern.height() + 1) / 2;
        }
        PixelRect::from_points(all)
            .expand(pad_x, pad_y)
            .clamp_to(width, height)
    }
}

/// Rasterize a freehand path in one call.
pub fn rasterize_path(
    ctx: &DrawingContext,
    selection: Option<&Selection>,
    width: u32,
    height: u32,
    points: &[(i32, i32)],
) -> Result<StrokeRaster> {
    let mut engine = StrokeEngine::new(ctx, selection, width, height)?;
    engine.path(points);
    Ok(engine.finish())
}

/// Rasterize a two-point shape in one call.
pub fn rasterize_shape(
    ctx: &DrawingContext,
    selection: Option<&Selection>,
    width: u32,
    height: u32,
    kind: ShapeKind,
    start: (i32, i32),
    end: (i32, i32),
    modifiers: ShapeModifiers,
) -> Result<StrokeRaster> {
    let mut engine = StrokeEngine::new(ctx, selection, width, height)?;
    engine.shape(kind, start, end, modifiers);
    Ok(engine.finish())
}

/// Convenience for callers that own the target outright, such as scripts
/// drawing into a scratch buffer.
pub fn paint_path(
    target: &mut RasterBuffer,
    ctx: &DrawingContext,
    selection: Option<&Selection>,
    points: &[(i32, i32)],
) -> Result<PixelRect> {
    let raster = rasterize_path(ctx, selection, target.width(), target.height(), points)?;
    raster.paint(ctx, target, (0, 0));
    Ok(raster.dirty())
}
