//! Selection masks.
//!
//! A present [`Selection`] is a boolean mask with exactly the canvas
//! dimensions. "No selection" is modelled as `Option::<Selection>::None` and
//! behaves like an all-true mask for paint operations.

use image::Rgba;
use serde::{Deserialize, Serialize};

use crate::canvas::{PixelRect, RasterBuffer};
use crate::error::{EditorError, Result};
use crate::ops::fill::{FloodOptions, flood_region};

/// How a new selection shape interacts with the existing mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SelectionMode {
    /// Drop the existing selection and use the new shape.
    #[default]
    Replace,
    /// Union with the existing mask.
    Add,
    /// Remove the shape from the existing mask.
    Subtract,
    /// Keep only pixels present in both.
    Intersect,
}

/// Geometric or color-based description of a selection, rasterized on demand.
#[derive(Clone, Debug, PartialEq)]
pub enum SelectionShape {
    Rectangle(PixelRect),
    /// Ellipse inscribed in the rectangle.
    Ellipse(PixelRect),
    /// Freeform closed polygon, filled with the even-odd rule.
    Lasso(Vec<(i32, i32)>),
    /// Region grown from a seed pixel of the source image.
    FloodByColor { seed: (i32, i32), contiguous: bool },
    /// Every pixel of the source image equal to the color.
    ColorMatch(Rgba<u8>),
    /// Every pixel of the source image with non-zero alpha.
    Opaque,
}

impl SelectionShape {
    /// Whether rasterizing this shape samples an image.
    pub fn needs_source(&self) -> bool {
        matches!(
            self,
            SelectionShape::FloodByColor { .. } | SelectionShape::ColorMatch(_) | SelectionShape::Opaque
        )
    }

    /// Rasterize into a canvas-sized mask. Color-based shapes read `source`,
    /// which must have the canvas dimensions.
    pub fn rasterize(
        &self,
        width: u32,
        height: u32,
        source: Option<&RasterBuffer>,
    ) -> Result<Selection> {
        let mut selection = Selection::empty(width, height)?;
        match self {
            SelectionShape::Rectangle(rect) => {
                for (x, y) in rect.clamp_to(width, height).points() {
                    selection.set(x as u32, y as u32, true);
                }
            }
            SelectionShape::Ellipse(rect) => {
                if rect.is_empty() {
                    return Ok(selection);
                }
                let rx = rect.width as f32 / 2.0;
                let ry = rect.height as f32 / 2.0;
                let cx = rect.x as f32 + rx;
                let cy = rect.y as f32 + ry;
                for (x, y) in rect.clamp_to(width, height).points() {
                    let dx = (x as f32 + 0.5 - cx) / rx;
                    let dy = (y as f32 + 0.5 - cy) / ry;
                    if dx * dx + dy * dy <= 1.0 {
                        selection.set(x as u32, y as u32, true);
                    }
                }
            }
            SelectionShape::Lasso(points) => {
                if points.len() < 3 {
                    return Ok(selection);
                }
                let bounds = PixelRect::from_points(points.iter().copied()).clamp_to(width, height);
                for (x, y) in bounds.points() {
                    if point_in_polygon(x as f32 + 0.5, y as f32 + 0.5, points) {
                        selection.set(x as u32, y as u32, true);
                    }
                }
            }
            SelectionShape::FloodByColor { seed, contiguous } => {
                let source = Self::require_source(source, width, height)?;
                let options = FloodOptions {
                    toroidal: false,
                    contiguous: *contiguous,
                };
                if let Some(region) = flood_region(source, *seed, options, None) {
                    selection.mask = region.mask;
                }
            }
            SelectionShape::ColorMatch(color) => {
                let source = Self::require_source(source, width, height)?;
                for (x, y, p) in source.iter_pixels() {
                    if p == *color {
                        selection.set(x, y, true);
                    }
                }
            }
            SelectionShape::Opaque => {
                let source = Self::require_source(source, width, height)?;
                for (x, y, p) in source.iter_pixels() {
                    if p[3] > 0 {
                        selection.set(x, y, true);
                    }
                }
            }
        }
        Ok(selection)
    }

    fn require_source(
        source: Option<&RasterBuffer>,
        width: u32,
        height: u32,
    ) -> Result<&RasterBuffer> {
        let source = source.ok_or_else(|| {
            EditorError::InvalidSelection("color selection needs a source image".into())
        })?;
        if source.dimensions() != (width, height) {
            return Err(EditorError::InvalidSelection(format!(
                "source is {}x{}, canvas is {}x{}",
                source.width(),
                source.height(),
                width,
                height
            )));
        }
        Ok(source)
    }
}

/// Even-odd crossing test against a closed polygon.
fn point_in_polygon(px: f32, py: f32, points: &[(i32, i32)]) -> bool {
    let mut inside = false;
    let mut j = points.len() - 1;
    for i in 0..points.len() {
        let (xi, yi) = (points[i].0 as f32, points[i].1 as f32);
        let (xj, yj) = (points[j].0 as f32, points[j].1 as f32);
        if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Boolean mask over the canvas.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    width: u32,
    height: u32,
    mask: Vec<bool>,
}

impl Selection {
    /// Mask with nothing selected.
    pub fn empty(width: u32, height: u32) -> Result<Self> {
        Self::filled(width, height, false)
    }

    /// Mask with everything selected.
    pub fn all(width: u32, height: u32) -> Result<Self> {
        Self::filled(width, height, true)
    }

    fn filled(width: u32, height: u32, value: bool) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(EditorError::InvalidSelection(format!(
                "mask dimensions {width}x{height}"
            )));
        }
        Ok(Self {
            width,
            height,
            mask: vec![value; width as usize * height as usize],
        })
    }

    /// Wrap a row-major mask; its length must be `width * height`.
    pub fn from_mask(width: u32, height: u32, mask: Vec<bool>) -> Result<Self> {
        if width == 0 || height == 0 || mask.len() != width as usize * height as usize {
            return Err(EditorError::InvalidSelection(format!(
                "mask of {} entries does not cover {}x{}",
                mask.len(),
                width,
                height
            )));
        }
        Ok(Self { width, height, mask })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    /// Fails with `InvalidSelection` unless the mask matches the canvas.
    pub fn check_dimensions(&self, width: u32, height: u32) -> Result<()> {
        if (self.width, self.height) != (width, height) {
            return Err(EditorError::InvalidSelection(format!(
                "mask is {}x{}, canvas is {}x{}",
                self.width, self.height, width, height
            )));
        }
        Ok(())
    }

    /// False for out-of-range coordinates.
    #[inline]
    pub fn contains(&self, x: i32, y: i32) -> bool {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return false;
        }
        self.mask[y as usize * self.width as usize + x as usize]
    }

    #[inline]
    fn set(&mut self, x: u32, y: u32, value: bool) {
        let idx = y as usize * self.width as usize + x as usize;
        self.mask[idx] = value;
    }

    pub fn count(&self) -> usize {
        self.mask.iter().filter(|&&v| v).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.mask.iter().any(|&v| v)
    }

    /// Bounding box of the selected pixels (empty rect if none).
    pub fn bounds(&self) -> PixelRect {
        let w = self.width as usize;
        PixelRect::from_points(
            self.mask
                .iter()
                .enumerate()
                .filter(|(_, v)| **v)
                .map(|(i, _)| ((i % w) as i32, (i / w) as i32)),
        )
    }

    pub fn inverted(&self) -> Selection {
        Selection {
            width: self.width,
            height: self.height,
            mask: self.mask.iter().map(|v| !v).collect(),
        }
    }

    /// Merge `other` into this mask according to `mode`.
    pub fn combine(&mut self, other: &Selection, mode: SelectionMode) -> Result<()> {
        other.check_dimensions(self.width, self.height)?;
        for (dst, &src) in self.mask.iter_mut().zip(other.mask.iter()) {
            *dst = match mode {
                SelectionMode::Replace => src,
                SelectionMode::Add => *dst || src,
                SelectionMode::Subtract => *dst && !src,
                SelectionMode::Intersect => *dst && src,
            };
        }
        Ok(())
    }

    /// Resolve the selection that results from applying `shape` in `mode` on
    /// top of `current`. An existing absent selection combines as an empty
    /// mask; a result with no selected pixels collapses to `None`.
    pub fn resolve(
        current: Option<&Selection>,
        shape: Selection,
        mode: SelectionMode,
    ) -> Result<Option<Selection>> {
        let combined = match (mode, current) {
            (SelectionMode::Replace, _) | (SelectionMode::Add, None) => shape,
            (_, None) => Selection::empty(shape.width, shape.height)?,
            (_, Some(existing)) => {
                let mut merged = existing.clone();
                merged.combine(&shape, mode)?;
                merged
            }
        };
        Ok(if combined.is_empty() { None } else { Some(combined) })
    }
}

/// Whether `(x, y)` may be written under an optional selection.
#[inline]
pub fn permits(selection: Option<&Selection>, x: i32, y: i32) -> bool {
    selection.is_none_or(|s| s.contains(x, y))
}
