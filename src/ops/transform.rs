// ============================================================================
// SELECTION TRANSFORMS: move, rotate and scale the selected pixels of a layer
// ============================================================================
//
// The selected pixels are lifted off the layer (leaving transparency behind),
// transformed as one block and composited back at their new place. Without a
// selection the whole layer is the block. The selection mask travels with the
// pixels.

use image::Rgba;

use crate::canvas::{PixelRect, RasterBuffer, Rotation, TRANSPARENT, blend_pixel};
use crate::error::Result;
use crate::selection::{Selection, permits};

const MASK_ON: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// How a lifted block is placed back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionTransform {
    /// Offset by whole pixels.
    Move { dx: i32, dy: i32 },
    /// Quarter turns about the centre of the block.
    Rotate(Rotation),
    /// Nearest-neighbour resize to `width`x`height`, keeping the centre.
    Scale { width: u32, height: u32 },
}

impl SelectionTransform {
    pub fn label(&self) -> &'static str {
        match self {
            SelectionTransform::Move { .. } => "Move Selection",
            SelectionTransform::Rotate(_) => "Rotate Selection",
            SelectionTransform::Scale { .. } => "Scale Selection",
        }
    }

    /// Transform `block` lifted from `region`; returns the result and where
    /// its top-left lands.
    fn place(&self, block: &RasterBuffer, region: PixelRect) -> Result<(RasterBuffer, (i32, i32))> {
        let out = match *self {
            SelectionTransform::Move { dx, dy } => {
                return Ok((block.clone(), (region.x.saturating_add(dx), region.y.saturating_add(dy))));
            }
            SelectionTransform::Rotate(rotation) => block.rotated(rotation),
            SelectionTransform::Scale { width, height } => block.resized(width, height)?,
        };
        let x = region.x + (region.width as i64 - out.width() as i64).div_euclid(2) as i32;
        let y = region.y + (region.height as i64 - out.height() as i64).div_euclid(2) as i32;
        Ok((out, (x, y)))
    }
}

/// Outcome of a transform: the new layer pixels, the rectangle that may
/// differ from the source, and the moved selection.
#[derive(Clone, Debug, PartialEq)]
pub struct Relocated {
    pub pixels: RasterBuffer,
    pub dirty: PixelRect,
    pub selection: Option<Selection>,
}

/// Apply `transform` to the pixels of `source` under `selection`. Returns
/// `None` when nothing is selected.
pub fn transform_selection(
    source: &RasterBuffer,
    selection: Option<&Selection>,
    transform: SelectionTransform,
) -> Result<Option<Relocated>> {
    let (w, h) = source.dimensions();
    if let Some(sel) = selection {
        sel.check_dimensions(w, h)?;
    }
    let region = selection.map_or_else(|| source.rect(), Selection::bounds);
    if region.is_empty() {
        return Ok(None);
    }

    let mut block = source.sub_region(region)?;
    let mut mask = RasterBuffer::new(region.width, region.height)?;
    let mut pixels = source.clone();
    for (x, y) in region.points() {
        let (bx, by) = ((x - region.x) as u32, (y - region.y) as u32);
        if permits(selection, x, y) {
            mask.put(bx, by, MASK_ON);
            pixels.put(x as u32, y as u32, TRANSPARENT);
        } else {
            block.put(bx, by, TRANSPARENT);
        }
    }

    let (moved, at) = transform.place(&block, region)?;
    let target = PixelRect::new(at.0, at.1, moved.width(), moved.height());
    let visible = target.clamp_to(w, h);
    for (x, y) in visible.points() {
        let src = moved.pixel((x - at.0) as u32, (y - at.1) as u32);
        let dst = pixels.pixel(x as u32, y as u32);
        pixels.put(x as u32, y as u32, blend_pixel(dst, src, 1.0));
    }

    let moved_selection = match selection {
        Some(_) => {
            let (moved_mask, _) = transform.place(&mask, region)?;
            let mut bits = vec![false; w as usize * h as usize];
            for (x, y) in visible.points() {
                if moved_mask.pixel((x - at.0) as u32, (y - at.1) as u32)[3] > 0 {
                    bits[y as usize * w as usize + x as usize] = true;
                }
            }
            let moved = Selection::from_mask(w, h, bits)?;
            (!moved.is_empty()).then_some(moved)
        }
        None => None,
    };

    Ok(Some(Relocated {
        pixels,
        dirty: region.union(&visible).clamp_to(w, h),
        selection: moved_selection,
    }))
}
