use image::Rgba;
use uuid::Uuid;

use crate::canvas::{PixelRect, RasterBuffer, Rotation, TRANSPARENT};
use crate::error::{EditorError, Result};
use crate::selection::Selection;

// ============================================================================
// LAYER
// ============================================================================

/// One named raster in the stack.
#[derive(Clone, Debug, PartialEq)]
pub struct Layer {
    pub id: Uuid,
    name: String,
    pub visible: bool,
    opacity: f32,
    pub pixels: RasterBuffer,
}

impl Layer {
    /// Transparent layer of the given size.
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Result<Self> {
        Self::from_buffer(name, RasterBuffer::new(width, height)?)
    }

    pub fn filled(name: impl Into<String>, width: u32, height: u32, color: Rgba<u8>) -> Result<Self> {
        Self::from_buffer(name, RasterBuffer::filled(width, height, color)?)
    }

    pub fn from_buffer(name: impl Into<String>, pixels: RasterBuffer) -> Result<Self> {
        let name = validate_name(name.into())?;
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            visible: true,
            opacity: 1.0,
            pixels,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Blank or whitespace-only names are rejected.
    pub fn set_name(&mut self, name: impl Into<String>) -> Result<()> {
        self.name = validate_name(name.into())?;
        Ok(())
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    /// Clamped to `[0, 1]`; NaN becomes fully opaque.
    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = if opacity.is_nan() { 1.0 } else { opacity.clamp(0.0, 1.0) };
    }

    /// Copy with a fresh id and a `" copy"` suffix.
    pub fn duplicate(&self) -> Layer {
        Layer {
            id: Uuid::new_v4(),
            name: format!("{} copy", self.name),
            visible: self.visible,
            opacity: self.opacity,
            pixels: self.pixels.clone(),
        }
    }

    pub fn memory_size(&self) -> usize {
        self.pixels.memory_size() + self.name.len() + std::mem::size_of::<Self>()
    }
}

fn validate_name(name: String) -> Result<String> {
    if name.trim().is_empty() {
        return Err(EditorError::InvalidLayerName);
    }
    Ok(name)
}

// ============================================================================
// LAYER STACK
// ============================================================================

/// What removing the only layer does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LastLayerPolicy {
    /// Fail with `LastLayer`.
    #[default]
    Reject,
    /// Swap in a blank "Background" layer.
    ReplaceWithBlank,
}

/// Result of a successful `LayerStack::remove`.
#[derive(Clone, Debug, PartialEq)]
pub struct RemovedLayer {
    pub layer: Layer,
    pub index: usize,
    /// The stack held only this layer and a blank one took its place.
    pub replaced_with_blank: bool,
}

/// Ordered layers, index 0 at the bottom. Never empty.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerStack {
    layers: Vec<Layer>,
    active_index: usize,
    width: u32,
    height: u32,
    policy: LastLayerPolicy,
}

impl LayerStack {
    /// Single transparent "Background" layer.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let background = Layer::new("Background", width, height)?;
        Ok(Self {
            layers: vec![background],
            active_index: 0,
            width,
            height,
            policy: LastLayerPolicy::default(),
        })
    }

    /// Wrap existing layers, which must be non-empty and all the same size.
    pub fn from_layers(layers: Vec<Layer>, active_index: usize) -> Result<Self> {
        let Some(first) = layers.first() else {
            return Err(EditorError::LastLayer);
        };
        let (width, height) = first.pixels.dimensions();
        for layer in &layers {
            if layer.pixels.dimensions() != (width, height) {
                return Err(EditorError::SizeMismatch {
                    expected: (width, height),
                    actual: layer.pixels.dimensions(),
                });
            }
        }
        if active_index >= layers.len() {
            return Err(EditorError::index(active_index, layers.len()));
        }
        Ok(Self {
            layers,
            active_index,
            width,
            height,
            policy: LastLayerPolicy::default(),
        })
    }

    pub fn with_policy(mut self, policy: LastLayerPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> LastLayerPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: LastLayerPolicy) {
        self.policy = policy;
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter()
    }

    pub fn get(&self, index: usize) -> Result<&Layer> {
        let len = self.layers.len();
        self.layers.get(index).ok_or(EditorError::index(index, len))
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut Layer> {
        let len = self.layers.len();
        self.layers.get_mut(index).ok_or(EditorError::index(index, len))
    }

    pub fn active_index(&self) -> usize {
        self.active_index
    }

    pub fn active(&self) -> &Layer {
        &self.layers[self.active_index]
    }

    pub fn active_mut(&mut self) -> &mut Layer {
        &mut self.layers[self.active_index]
    }

    pub fn set_active(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        self.active_index = index;
        Ok(())
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.layers.len() {
            return Err(EditorError::index(index, self.layers.len()));
        }
        Ok(())
    }

    fn check_layer_size(&self, layer: &Layer) -> Result<()> {
        if layer.pixels.dimensions() != (self.width, self.height) {
            return Err(EditorError::SizeMismatch {
                expected: (self.width, self.height),
                actual: layer.pixels.dimensions(),
            });
        }
        Ok(())
    }

    /// Insert at `index` (`len` appends on top); the new layer becomes active.
    pub fn add(&mut self, layer: Layer, index: usize) -> Result<()> {
        if index > self.layers.len() {
            return Err(EditorError::index(index, self.layers.len()));
        }
        self.check_layer_size(&layer)?;
        self.layers.insert(index, layer);
        self.active_index = index;
        Ok(())
    }

    /// Remove the layer at `index`.
    ///
    /// The active index moves down by one when it sat at or above the removed
    /// layer, so the layer that was below becomes active.
    pub fn remove(&mut self, index: usize) -> Result<RemovedLayer> {
        self.check_index(index)?;
        if self.layers.len() == 1 {
            return match self.policy {
                LastLayerPolicy::Reject => Err(EditorError::LastLayer),
                LastLayerPolicy::ReplaceWithBlank => {
                    let blank = Layer::new("Background", self.width, self.height)?;
                    let layer = std::mem::replace(&mut self.layers[0], blank);
                    self.active_index = 0;
                    Ok(RemovedLayer {
                        layer,
                        index,
                        replaced_with_blank: true,
                    })
                }
            };
        }
        let layer = self.layers.remove(index);
        if self.active_index >= index && self.active_index > 0 {
            self.active_index -= 1;
        }
        self.active_index = self.active_index.min(self.layers.len() - 1);
        Ok(RemovedLayer {
            layer,
            index,
            replaced_with_blank: false,
        })
    }

    /// Reorder; the active layer keeps being the same layer.
    pub fn move_layer(&mut self, from: usize, to: usize) -> Result<()> {
        self.check_index(from)?;
        self.check_index(to)?;
        if from == to {
            return Ok(());
        }
        let layer = self.layers.remove(from);
        self.layers.insert(to, layer);

        let active = self.active_index;
        self.active_index = if active == from {
            to
        } else if from < active && to >= active {
            active - 1
        } else if from > active && to <= active {
            active + 1
        } else {
            active
        };
        Ok(())
    }

    /// Blend layer `index` onto the one below at its opacity and remove it.
    /// Hidden layers are dropped without contributing pixels.
    pub fn merge_down(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        if index == 0 {
            return Err(EditorError::NoLayerBelow(index));
        }
        let (below, above) = self.layers.split_at_mut(index);
        let top = &above[0];
        if top.visible {
            below[index - 1].pixels.blend_over(&top.pixels, top.opacity)?;
        }
        self.layers.remove(index);
        if self.active_index >= index {
            self.active_index -= 1;
        }
        Ok(())
    }

    /// Insert a copy directly above `index` and make it active.
    pub fn duplicate(&mut self, index: usize) -> Result<usize> {
        let copy = self.get(index)?.duplicate();
        self.layers.insert(index + 1, copy);
        self.active_index = index + 1;
        Ok(index + 1)
    }

    pub fn set_opacity(&mut self, index: usize, opacity: f32) -> Result<()> {
        self.get_mut(index)?.set_opacity(opacity);
        Ok(())
    }

    pub fn set_visible(&mut self, index: usize, visible: bool) -> Result<()> {
        self.get_mut(index)?.visible = visible;
        Ok(())
    }

    pub fn rename(&mut self, index: usize, name: impl Into<String>) -> Result<()> {
        self.get_mut(index)?.set_name(name)
    }

    /// Bottom-to-top blend of visible layers. With `selection`, pixels
    /// outside the mask come out transparent.
    pub fn composite(&self, selection: Option<&Selection>) -> Result<RasterBuffer> {
        self.composite_filtered(selection, |_| true)
    }

    /// Composite without the layer at `index`.
    pub fn composite_except(&self, index: usize) -> Result<RasterBuffer> {
        self.check_index(index)?;
        self.composite_filtered(None, |i| i != index)
    }

    fn composite_filtered(
        &self,
        selection: Option<&Selection>,
        include: impl Fn(usize) -> bool,
    ) -> Result<RasterBuffer> {
        if let Some(selection) = selection {
            selection.check_dimensions(self.width, self.height)?;
        }
        let mut out = RasterBuffer::new(self.width, self.height)?;
        for (i, layer) in self.layers.iter().enumerate() {
            if !layer.visible || !include(i) {
                continue;
            }
            out.blend_over(&layer.pixels, layer.opacity)?;
        }
        if let Some(selection) = selection {
            for (x, y) in out.rect().points().collect::<Vec<_>>() {
                if !selection.contains(x, y) {
                    out.put(x as u32, y as u32, TRANSPARENT);
                }
            }
        }
        Ok(out)
    }

    /// Collapse every layer into one that keeps the bottom layer's name.
    /// Returns the layers that were replaced.
    pub fn flatten(&mut self) -> Result<Vec<Layer>> {
        let merged = self.composite(None)?;
        let mut flat = Layer::from_buffer(self.layers[0].name.clone(), merged)?;
        flat.id = self.layers[0].id;
        let previous = std::mem::replace(&mut self.layers, vec![flat]);
        self.active_index = 0;
        Ok(previous)
    }

    // ------------------------------------------------------------------
    // Whole-stack transforms
    // ------------------------------------------------------------------

    fn map_buffers(&mut self, mut f: impl FnMut(&RasterBuffer) -> Result<RasterBuffer>) -> Result<()> {
        let mapped = self
            .layers
            .iter()
            .map(|layer| f(&layer.pixels))
            .collect::<Result<Vec<_>>>()?;
        let Some((width, height)) = mapped.first().map(RasterBuffer::dimensions) else {
            return Ok(());
        };
        for (layer, pixels) in self.layers.iter_mut().zip(mapped) {
            layer.pixels = pixels;
        }
        self.width = width;
        self.height = height;
        Ok(())
    }

    /// Change the canvas size without scaling content.
    pub fn resize_canvas(&mut self, width: u32, height: u32) -> Result<()> {
        self.map_buffers(|buf| buf.with_canvas_size(width, height))
    }

    /// Nearest-neighbour rescale of every layer.
    pub fn scale(&mut self, width: u32, height: u32) -> Result<()> {
        self.map_buffers(|buf| buf.resized(width, height))
    }

    pub fn crop(&mut self, rect: PixelRect) -> Result<()> {
        let rect = rect.clamp_to(self.width, self.height);
        self.map_buffers(|buf| buf.sub_region(rect))
    }

    pub fn rotate(&mut self, rotation: Rotation) -> Result<()> {
        self.map_buffers(|buf| Ok(buf.rotated(rotation)))
    }

    pub fn flip(&mut self, horizontal: bool, vertical: bool) {
        for layer in &mut self.layers {
            if horizontal {
                layer.pixels.flip_horizontal();
            }
            if vertical {
                layer.pixels.flip_vertical();
            }
        }
    }

    pub fn memory_size(&self) -> usize {
        self.layers.iter().map(Layer::memory_size).sum()
    }

    // ------------------------------------------------------------------
    // Raw access for command inversion. These bypass the policy checks and
    // must only be used to restore a previously valid state.
    // ------------------------------------------------------------------

    pub(crate) fn insert_raw(&mut self, index: usize, layer: Layer, active_index: usize) -> Result<()> {
        if index > self.layers.len() {
            return Err(EditorError::index(index, self.layers.len()));
        }
        self.check_layer_size(&layer)?;
        self.layers.insert(index, layer);
        self.active_index = active_index.min(self.layers.len() - 1);
        Ok(())
    }

    pub(crate) fn take_raw(&mut self, index: usize, active_index: usize) -> Result<Layer> {
        self.check_index(index)?;
        if self.layers.len() == 1 {
            return Err(EditorError::LastLayer);
        }
        let layer = self.layers.remove(index);
        self.active_index = active_index.min(self.layers.len() - 1);
        Ok(layer)
    }

    pub(crate) fn replace_raw(&mut self, index: usize, layer: Layer) -> Result<Layer> {
        self.check_index(index)?;
        self.check_layer_size(&layer)?;
        Ok(std::mem::replace(&mut self.layers[index], layer))
    }

    /// Swap in a complete set of layers and dimensions.
    pub(crate) fn replace_all(&mut self, layers: Vec<Layer>, active_index: usize) -> Result<Vec<Layer>> {
        let restored = LayerStack::from_layers(layers, active_index)?;
        let previous = std::mem::replace(&mut self.layers, restored.layers);
        self.active_index = restored.active_index;
        self.width = restored.width;
        self.height = restored.height;
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

    fn stack_of(names: &[&str]) -> LayerStack {
        let mut stack = LayerStack::new(4, 4).unwrap();
        stack.rename(0, names[0]).unwrap();
        for (i, name) in names.iter().enumerate().skip(1) {
            stack.add(Layer::new(*name, 4, 4).unwrap(), i).unwrap();
        }
        stack
    }

    fn names(stack: &LayerStack) -> Vec<&str> {
        stack.iter().map(Layer::name).collect()
    }

    #[test]
    fn test_new_has_background() {
        let stack = LayerStack::new(3, 2).unwrap();
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.active().name(), "Background");
        assert_eq!(stack.dimensions(), (3, 2));
    }

    #[test]
    fn test_add_bounds_and_size() {
        let mut stack = stack_of(&["a"]);
        assert!(matches!(
            stack.add(Layer::new("x", 4, 4).unwrap(), 5),
            Err(EditorError::IndexOutOfRange { index: 5, len: 1 })
        ));
        assert!(matches!(
            stack.add(Layer::new("x", 2, 4).unwrap(), 1),
            Err(EditorError::SizeMismatch { .. })
        ));
        stack.add(Layer::new("top", 4, 4).unwrap(), 1).unwrap();
        assert_eq!(stack.active_index(), 1);
    }

    #[test]
    fn test_remove_last_layer_policies() {
        let mut stack = LayerStack::new(2, 2).unwrap();
        assert_eq!(stack.remove(0), Err(EditorError::LastLayer));
        assert_eq!(stack.len(), 1);

        stack.set_policy(LastLayerPolicy::ReplaceWithBlank);
        stack.active_mut().pixels.fill(RED);
        let removed = stack.remove(0).unwrap();
        assert!(removed.replaced_with_blank);
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.active().pixels.get(0, 0).unwrap(), TRANSPARENT);
        assert_eq!(removed.layer.pixels.get(0, 0).unwrap(), RED);
    }

    #[test]
    fn test_remove_shifts_active() {
        let mut stack = stack_of(&["a", "b", "c"]);
        assert_eq!(stack.active_index(), 2);
        stack.remove(2).unwrap();
        assert_eq!(stack.active_index(), 1);
        stack.set_active(0).unwrap();
        stack.remove(1).unwrap();
        assert_eq!(stack.active_index(), 0);
        assert_eq!(names(&stack), vec!["a", "c"]);
    }

    #[test]
    fn test_move_keeps_active_identity() {
        let mut stack = stack_of(&["a", "b", "c"]);
        stack.set_active(1).unwrap();
        stack.move_layer(0, 2).unwrap();
        assert_eq!(names(&stack), vec!["b", "c", "a"]);
        assert_eq!(stack.active().name(), "b");
        assert!(stack.move_layer(0, 3).is_err());
    }

    #[test]
    fn test_merge_down() {
        let mut stack = stack_of(&["bottom", "top"]);
        stack.get_mut(0).unwrap().pixels.fill(BLUE);
        stack.get_mut(1).unwrap().pixels.set(1, 1, RED).unwrap();
        stack.set_opacity(1, 0.5).unwrap();
        assert_eq!(stack.merge_down(0), Err(EditorError::NoLayerBelow(0)));
        assert!(matches!(stack.merge_down(2), Err(EditorError::IndexOutOfRange { .. })));
        stack.merge_down(1).unwrap();
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.active_index(), 0);
        assert_eq!(stack.get(0).unwrap().pixels.get(1, 1).unwrap(), Rgba([128, 0, 128, 255]));
        assert_eq!(stack.get(0).unwrap().pixels.get(0, 0).unwrap(), BLUE);
    }

    #[test]
    fn test_failed_merge_keeps_layers() {
        let mut stack = stack_of(&["bottom", "top"]);
        stack.get_mut(1).unwrap().pixels = RasterBuffer::new(2, 2).unwrap();
        assert!(matches!(stack.merge_down(1), Err(EditorError::SizeMismatch { .. })));
        assert_eq!(names(&stack), vec!["bottom", "top"]);
        assert_eq!(stack.active_index(), 1);
    }

    #[test]
    fn test_duplicate_names_copy() {
        let mut stack = stack_of(&["ink"]);
        let idx = stack.duplicate(0).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(names(&stack), vec!["ink", "ink copy"]);
        assert_ne!(stack.get(0).unwrap().id, stack.get(1).unwrap().id);
        assert_eq!(stack.active_index(), 1);
    }

    #[test]
    fn test_composite_skips_hidden_and_masks() {
        let mut stack = stack_of(&["a", "b"]);
        stack.get_mut(0).unwrap().pixels.fill(BLUE);
        stack.get_mut(1).unwrap().pixels.fill(RED);
        assert_eq!(stack.composite(None).unwrap().get(0, 0).unwrap(), RED);
        stack.set_visible(1, false).unwrap();
        assert_eq!(stack.composite(None).unwrap().get(0, 0).unwrap(), BLUE);

        let mut mask = vec![false; 16];
        mask[5] = true;
        let sel = Selection::from_mask(4, 4, mask).unwrap();
        let clipped = stack.composite(Some(&sel)).unwrap();
        assert_eq!(clipped.get(1, 1).unwrap(), BLUE);
        assert_eq!(clipped.get(0, 0).unwrap(), TRANSPARENT);
        assert_eq!(stack.composite_except(0).unwrap().get(0, 0).unwrap(), TRANSPARENT);
    }

    #[test]
    fn test_rename_rejects_blank() {
        let mut stack = stack_of(&["a"]);
        assert_eq!(stack.rename(0, "   "), Err(EditorError::InvalidLayerName));
        assert_eq!(stack.get(0).unwrap().name(), "a");
    }

    #[test]
    fn test_opacity_clamped() {
        let mut layer = Layer::new("a", 1, 1).unwrap();
        layer.set_opacity(3.0);
        assert_eq!(layer.opacity(), 1.0);
        layer.set_opacity(-1.0);
        assert_eq!(layer.opacity(), 0.0);
    }

    #[test]
    fn test_flatten_and_transforms() {
        let mut stack = stack_of(&["base", "detail"]);
        stack.get_mut(1).unwrap().pixels.set(0, 0, RED).unwrap();
        let previous = stack.flatten().unwrap();
        assert_eq!(previous.len(), 2);
        assert_eq!(names(&stack), vec!["base"]);
        assert_eq!(stack.active().pixels.get(0, 0).unwrap(), RED);

        stack.resize_canvas(6, 2).unwrap();
        assert_eq!(stack.dimensions(), (6, 2));
        assert_eq!(stack.active().pixels.get(0, 0).unwrap(), RED);
        stack.rotate(Rotation::Cw90).unwrap();
        assert_eq!(stack.dimensions(), (2, 6));
        assert_eq!(stack.active().pixels.get(1, 0).unwrap(), RED);
        stack.crop(PixelRect::new(1, 0, 1, 1)).unwrap();
        assert_eq!(stack.dimensions(), (1, 1));
    }
}
