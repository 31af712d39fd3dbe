//! Flood fill and region growing.
//!
//! Regions grow 4-connected from a seed over pixels exactly equal to the seed
//! color. The frontier is an explicit stack of packed flat indices, and the
//! output mask doubles as the visited set, so memory is bounded by the canvas.
//! Mirrored fills grow one region per distinct reflected seed.

use image::Rgba;

use crate::canvas::{PixelRect, RasterBuffer};
use crate::components::tools::MirrorConfig;
use crate::selection::{Selection, permits};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FloodOptions {
    /// Treat the buffer as a torus: neighbours wrap across edges.
    pub toroidal: bool,
    /// When false, every pixel matching the seed color is part of the region.
    pub contiguous: bool,
}

impl Default for FloodOptions {
    fn default() -> Self {
        Self {
            toroidal: false,
            contiguous: true,
        }
    }
}

/// Pixels belonging to a grown region.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FloodRegion {
    /// Row-major, canvas-sized.
    pub mask: Vec<bool>,
    pub count: usize,
    pub bounds: PixelRect,
    pub target: Rgba<u8>,
}

/// Grow the region around `seed`. Returns `None` when the seed is off-canvas
/// (and not toroidal) or masked out by the selection.
pub fn flood_region(
    buffer: &RasterBuffer,
    seed: (i32, i32),
    options: FloodOptions,
    selection: Option<&Selection>,
) -> Option<FloodRegion> {
    let (w, h) = buffer.dimensions();
    let (sx, sy) = if options.toroidal {
        buffer.wrap_coords(seed.0, seed.1)
    } else if buffer.in_bounds(seed.0, seed.1) {
        (seed.0 as u32, seed.1 as u32)
    } else {
        return None;
    };
    if !permits(selection, sx as i32, sy as i32) {
        return None;
    }

    let wu = w as usize;
    let target = buffer.pixel(sx, sy);
    let mut mask = vec![false; wu * h as usize];
    let accepts = |x: u32, y: u32| buffer.pixel(x, y) == target && permits(selection, x as i32, y as i32);

    if !options.contiguous {
        let mut points = Vec::new();
        for (x, y, p) in buffer.iter_pixels() {
            if p == target && permits(selection, x as i32, y as i32) {
                mask[y as usize * wu + x as usize] = true;
                points.push((x as i32, y as i32));
            }
        }
        let count = points.len();
        return Some(FloodRegion {
            mask,
            count,
            bounds: PixelRect::from_points(points),
            target,
        });
    }

    let (mut min_x, mut min_y, mut max_x, mut max_y) = (sx, sy, sx, sy);
    let mut count = 0usize;
    let mut stack: Vec<u32> = Vec::with_capacity(1024);
    let seed_idx = sy as usize * wu + sx as usize;
    mask[seed_idx] = true;
    stack.push(seed_idx as u32);

    while let Some(idx) = stack.pop() {
        let x = (idx as usize % wu) as u32;
        let y = (idx as usize / wu) as u32;
        count += 1;
        min_x = min_x.min(x);
        max_x = max_x.max(x);
        min_y = min_y.min(y);
        max_y = max_y.max(y);

        for (nx, ny) in neighbours(x, y, w, h, options.toroidal).into_iter().flatten() {
            let ni = ny as usize * wu + nx as usize;
            if !mask[ni] && accepts(nx, ny) {
                mask[ni] = true;
                stack.push(ni as u32);
            }
        }
    }

    Some(FloodRegion {
        mask,
        count,
        bounds: PixelRect::from_corners(min_x as i32, min_y as i32, max_x as i32, max_y as i32),
        target,
    })
}

/// Left, right, up, down. Off-canvas neighbours are `None` unless wrapping.
fn neighbours(x: u32, y: u32, w: u32, h: u32, toroidal: bool) -> [Option<(u32, u32)>; 4] {
    if toroidal {
        return [
            Some(((x + w - 1) % w, y)),
            Some(((x + 1) % w, y)),
            Some((x, (y + h - 1) % h)),
            Some((x, (y + 1) % h)),
        ];
    }
    [
        (x > 0).then(|| (x - 1, y)),
        (x + 1 < w).then(|| (x + 1, y)),
        (y > 0).then(|| (x, y - 1)),
        (y + 1 < h).then(|| (x, y + 1)),
    ]
}

/// Fill the region around `seed` with `color`. Returns the dirty rectangle,
/// or `None` when nothing changed (including filling a region with its own
/// color).
pub fn flood_fill(
    buffer: &mut RasterBuffer,
    seed: (i32, i32),
    color: Rgba<u8>,
    options: FloodOptions,
    selection: Option<&Selection>,
) -> Option<PixelRect> {
    let region = flood_region(buffer, seed, options, selection)?;
    if region.target == color {
        return None;
    }
    let wu = buffer.width() as usize;
    for (idx, _) in region.mask.iter().enumerate().filter(|(_, v)| **v) {
        buffer.put((idx % wu) as u32, (idx / wu) as u32, color);
    }
    Some(region.bounds)
}

/// `seed` followed by its reflections under `mirror`. Off-canvas seeds wrap
/// when toroidal and are dropped otherwise; duplicates (a seed on an axis)
/// appear once.
pub fn mirrored_seeds(
    mirror: &MirrorConfig,
    seed: (i32, i32),
    width: u32,
    height: u32,
    toroidal: bool,
) -> Vec<(i32, i32)> {
    let mut seeds = Vec::with_capacity(4);
    for &(x, y) in mirror.positions(seed.0, seed.1, width, height).iter() {
        let point = if toroidal {
            (x.rem_euclid(width as i32), y.rem_euclid(height as i32))
        } else if x >= 0 && y >= 0 && (x as u32) < width && (y as u32) < height {
            (x, y)
        } else {
            continue;
        };
        if !seeds.contains(&point) {
            seeds.push(point);
        }
    }
    seeds
}

/// Fill from every seed in turn on the same buffer. A seed already covered
/// by an earlier region now holds `color` and is skipped. Returns the union
/// of the dirty rectangles.
pub fn flood_fill_seeds(
    buffer: &mut RasterBuffer,
    seeds: &[(i32, i32)],
    color: Rgba<u8>,
    options: FloodOptions,
    selection: Option<&Selection>,
) -> Option<PixelRect> {
    let mut dirty: Option<PixelRect> = None;
    for &seed in seeds {
        if let Some(rect) = flood_fill(buffer, seed, color, options, selection) {
            dirty = Some(dirty.map_or(rect, |d| d.union(&rect)));
        }
    }
    dirty
}
