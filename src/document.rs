use std::path::PathBuf;

use image::Rgba;
use uuid::Uuid;

use crate::canvas::{PixelRect, RasterBuffer, Rotation, TRANSPARENT, blend_pixel};
use crate::components::history::{CanvasSnapshot, Command, PixelPatch, UndoEngine};
use crate::components::layers::{Layer, LayerStack};
use crate::components::tools::{DrawingContext, ToolAction};
use crate::error::{EditorError, Result};
use crate::ops;
use crate::ops::fill::{FloodOptions, flood_fill_seeds, mirrored_seeds};
use crate::ops::stroke::{ShapeKind, ShapeModifiers, StrokeRaster, rasterize_path, rasterize_shape};
use crate::ops::transform::SelectionTransform;
use crate::selection::{Selection, SelectionMode, SelectionShape, permits};
use crate::settings::EditorSettings;

/// Smallest output region edge, unless the canvas itself is smaller.
pub const MIN_OUTPUT_REGION: u32 = 32;

/// Everything commands mutate: the layers and the active selection.
#[derive(Clone, Debug, PartialEq)]
pub struct CanvasState {
    pub layers: LayerStack,
    /// `None` means everything is editable.
    pub selection: Option<Selection>,
}

impl CanvasState {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        Ok(Self {
            layers: LayerStack::new(width, height)?,
            selection: None,
        })
    }

    pub fn width(&self) -> u32 {
        self.layers.width()
    }

    pub fn height(&self) -> u32 {
        self.layers.height()
    }
}

/// Whether a flip touches the active layer or every layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlipScope {
    Layer,
    Document,
}

/// What `Document::perform` did with a finished gesture.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ToolOutcome {
    /// A command was recorded.
    Applied,
    /// The gesture touched nothing.
    Unchanged,
    /// Read-only sample from the picker.
    Picked(Rgba<u8>),
}

/// Clamp an output region to a `width`x`height` canvas.
pub fn clamp_output_region(rect: PixelRect, width: u32, height: u32) -> PixelRect {
    let min_w = MIN_OUTPUT_REGION.min(width);
    let min_h = MIN_OUTPUT_REGION.min(height);
    let w = rect.width.clamp(min_w, width);
    let h = rect.height.clamp(min_h, height);
    let x = rect.x.clamp(0, (width - w) as i32);
    let y = rect.y.clamp(0, (height - h) as i32);
    PixelRect::new(x, y, w, h)
}

/// Single open document.
pub struct Document {
    pub id: Uuid,
    /// Display name (derived from path or "Untitled-X").
    pub name: String,
    /// `None` for unsaved/untitled files.
    pub path: Option<PathBuf>,
    state: CanvasState,
    history: UndoEngine,
    dirty: bool,
    output_region: PixelRect,
}

impl Document {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Result<Self> {
        Ok(Self::from_state(name, CanvasState::new(width, height)?))
    }

    pub fn new_untitled(untitled_counter: usize, width: u32, height: u32) -> Result<Self> {
        Self::new(format!("Untitled-{untitled_counter}"), width, height)
    }

    pub fn from_layers(name: impl Into<String>, layers: LayerStack) -> Self {
        Self::from_state(
            name,
            CanvasState {
                layers,
                selection: None,
            },
        )
    }

    fn from_state(name: impl Into<String>, state: CanvasState) -> Self {
        let output_region = PixelRect::new(0, 0, state.width(), state.height());
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            path: None,
            state,
            history: UndoEngine::default(),
            dirty: false,
            output_region,
        }
    }

    /// Apply history limits and the last-layer policy from settings.
    pub fn with_settings(mut self, settings: &EditorSettings) -> Self {
        self.history = settings.undo_engine();
        self.state.layers.set_policy(settings.last_layer_policy);
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.state.width()
    }

    pub fn height(&self) -> u32 {
        self.state.height()
    }

    pub fn layers(&self) -> &LayerStack {
        &self.state.layers
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.state.selection.as_ref()
    }

    pub fn state(&self) -> &CanvasState {
        &self.state
    }

    pub fn history(&self) -> &UndoEngine {
        &self.history
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_saved(&mut self) {
        self.dirty = false;
    }

    pub fn update_name_from_path(&mut self) {
        if let Some(ref path) = self.path {
            self.name = path
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "Unknown".to_string());
        }
    }

    /// Name with a `*` while there are unsaved changes.
    pub fn display_title(&self) -> String {
        if self.dirty {
            format!("{}*", self.name)
        } else {
            self.name.clone()
        }
    }

    pub fn output_region(&self) -> PixelRect {
        self.output_region
    }

    pub fn set_output_region(&mut self, rect: PixelRect) {
        self.output_region = clamp_output_region(rect, self.width(), self.height());
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    /// Run `command` through the undo engine.
    pub fn apply(&mut self, command: Command) -> Result<()> {
        self.history.apply(command, &mut self.state)?;
        self.after_change();
        Ok(())
    }

    pub fn undo(&mut self) -> Result<Option<String>> {
        let label = self.history.undo(&mut self.state)?;
        if label.is_some() {
            self.after_change();
        }
        Ok(label)
    }

    pub fn redo(&mut self) -> Result<Option<String>> {
        let label = self.history.redo(&mut self.state)?;
        if label.is_some() {
            self.after_change();
        }
        Ok(label)
    }

    fn after_change(&mut self) {
        self.dirty = true;
        self.output_region = clamp_output_region(self.output_region, self.width(), self.height());
    }

    /// Drop all history, e.g. after loading.
    pub fn reset_history(&mut self) {
        self.history.clear();
        self.dirty = false;
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    /// Flattened image for display or export.
    pub fn composite(&self) -> Result<RasterBuffer> {
        self.state.layers.composite(None)
    }

    /// Visible color at `(x, y)` across all layers.
    pub fn sample_color(&self, x: i32, y: i32) -> Result<Rgba<u8>> {
        if !self.state.layers.active().pixels.in_bounds(x, y) {
            return Err(EditorError::out_of_bounds(x as i64, y as i64, self.width(), self.height()));
        }
        let mut color = TRANSPARENT;
        for layer in self.state.layers.iter().filter(|l| l.visible) {
            color = blend_pixel(color, layer.pixels.get(x, y)?, layer.opacity());
        }
        Ok(color)
    }

    // ------------------------------------------------------------------
    // Painting
    // ------------------------------------------------------------------

    /// Turn a coverage map into a patch command on the active layer.
    fn commit_raster(&mut self, label: &str, ctx: &DrawingContext, raster: &StrokeRaster) -> Result<bool> {
        if raster.is_empty() {
            return Ok(false);
        }
        let rect = raster.dirty();
        let layer = self.state.layers.active_index();
        let before = PixelPatch::capture(&self.state.layers.active().pixels, rect)?;
        let mut scratch = before.pixels.clone();
        raster.paint(ctx, &mut scratch, (rect.x, rect.y));
        let after = PixelPatch::new(rect, scratch)?;
        self.apply(Command::draw(label, layer, before, after, Some(ctx.clone()))?)?;
        Ok(true)
    }

    /// Freehand stroke on the active layer. Returns whether anything was
    /// painted.
    pub fn stroke(&mut self, ctx: &DrawingContext, points: &[(i32, i32)]) -> Result<bool> {
        self.stroke_labeled(if ctx.erase { "Eraser Stroke" } else { "Brush Stroke" }, ctx, points)
    }

    fn stroke_labeled(&mut self, label: &str, ctx: &DrawingContext, points: &[(i32, i32)]) -> Result<bool> {
        let raster = rasterize_path(ctx, self.selection(), self.width(), self.height(), points)?;
        self.commit_raster(label, ctx, &raster)
    }

    pub fn draw_shape(
        &mut self,
        ctx: &DrawingContext,
        kind: ShapeKind,
        start: (i32, i32),
        end: (i32, i32),
        modifiers: ShapeModifiers,
    ) -> Result<bool> {
        let raster = rasterize_shape(ctx, self.selection(), self.width(), self.height(), kind, start, end, modifiers)?;
        let label = match kind {
            ShapeKind::Line => "Line",
            ShapeKind::Rectangle => "Rectangle",
            ShapeKind::Ellipse => "Ellipse",
        };
        self.commit_raster(label, ctx, &raster)
    }

    /// Bucket fill from `seed` and its mirrored seeds; wraparound makes the
    /// fill toroidal.
    pub fn fill(&mut self, ctx: &DrawingContext, seed: (i32, i32), contiguous: bool) -> Result<bool> {
        let color = if ctx.erase { TRANSPARENT } else { ctx.color };
        let options = FloodOptions {
            toroidal: ctx.wrap,
            contiguous,
        };
        let seeds = mirrored_seeds(&ctx.mirror, seed, self.width(), self.height(), ctx.wrap);
        let layer = self.state.layers.active_index();
        let original = &self.state.layers.active().pixels;
        let mut filled = original.clone();
        let Some(rect) = flood_fill_seeds(&mut filled, &seeds, color, options, self.selection()) else {
            return Ok(false);
        };
        let before = PixelPatch::capture(original, rect)?;
        let after = PixelPatch::capture(&filled, rect)?;
        self.apply(Command::draw("Fill", layer, before, after, Some(ctx.clone()))?)?;
        Ok(true)
    }

    /// Clear the active layer, or only the selected pixels of it.
    pub fn clear_layer(&mut self) -> Result<bool> {
        let layer = self.state.layers.active_index();
        let buffer = &self.state.layers.active().pixels;
        let rect = match self.selection() {
            Some(sel) => sel.bounds(),
            None => buffer.rect(),
        };
        if rect.is_empty() {
            return Ok(false);
        }
        let before = PixelPatch::capture(buffer, rect)?;
        let mut scratch = before.pixels.clone();
        for (x, y) in rect.points() {
            if permits(self.selection(), x, y) {
                scratch.put((x - rect.x) as u32, (y - rect.y) as u32, TRANSPARENT);
            }
        }
        let after = PixelPatch::new(rect, scratch)?;
        self.apply(Command::draw("Clear", layer, before, after, None)?)?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    fn set_selection(&mut self, after: Option<Selection>) -> Result<bool> {
        if after == self.state.selection {
            return Ok(false);
        }
        let before = self.state.selection.clone();
        self.apply(Command::Selection { before, after })?;
        Ok(true)
    }

    /// Combine `shape` into the selection. Color-based shapes sample the
    /// active layer.
    pub fn select(&mut self, shape: &SelectionShape, mode: SelectionMode) -> Result<bool> {
        let source = shape.needs_source().then(|| &self.state.layers.active().pixels);
        let mask = shape.rasterize(self.width(), self.height(), source)?;
        let after = Selection::resolve(self.selection(), mask, mode)?;
        self.set_selection(after)
    }

    pub fn select_all(&mut self) -> Result<bool> {
        let all = Selection::all(self.width(), self.height())?;
        self.set_selection(Some(all))
    }

    pub fn select_none(&mut self) -> Result<bool> {
        self.set_selection(None)
    }

    /// Swap selected and unselected pixels. Without a selection there is
    /// nothing to invert.
    pub fn invert_selection(&mut self) -> Result<bool> {
        let Some(current) = self.selection() else {
            return Ok(false);
        };
        let inverted = current.inverted();
        self.set_selection((!inverted.is_empty()).then_some(inverted))
    }

    // ------------------------------------------------------------------
    // Transforms
    // ------------------------------------------------------------------

    fn flip_command(&self, label: &str, index: usize, horizontal: bool, vertical: bool) -> Result<Command> {
        let buffer = &self.state.layers.get(index)?.pixels;
        let rect = buffer.rect();
        let before = PixelPatch::capture(buffer, rect)?;
        let mut flipped = buffer.clone();
        if horizontal {
            flipped.flip_horizontal();
        }
        if vertical {
            flipped.flip_vertical();
        }
        Command::draw(label, index, before, PixelPatch::new(rect, flipped)?, None)
    }

    pub fn flip(&mut self, horizontal: bool, vertical: bool, scope: FlipScope) -> Result<bool> {
        if !horizontal && !vertical {
            return Ok(false);
        }
        let command = match scope {
            FlipScope::Layer => {
                self.flip_command("Flip Layer", self.state.layers.active_index(), horizontal, vertical)?
            }
            FlipScope::Document => {
                let commands = (0..self.state.layers.len())
                    .map(|i| self.flip_command("Flip Layer", i, horizontal, vertical))
                    .collect::<Result<Vec<_>>>()?;
                Command::composite("Flip Canvas", commands)
            }
        };
        self.apply(command)?;
        Ok(true)
    }

    /// Run a whole-stack transform on a copy and record both states.
    fn reshape(&mut self, label: &str, f: impl FnOnce(&mut LayerStack) -> Result<()>) -> Result<()> {
        let before = CanvasSnapshot::capture(&self.state);
        let mut layers = self.state.layers.clone();
        f(&mut layers)?;
        let after = CanvasSnapshot {
            layers: layers.layers().to_vec(),
            active_index: layers.active_index(),
            // Masks do not survive a change of geometry.
            selection: None,
        };
        self.apply(Command::Resize {
            label: label.to_string(),
            before: Box::new(before),
            after: Box::new(after),
        })
    }

    pub fn rotate_canvas(&mut self, rotation: Rotation) -> Result<()> {
        self.reshape(rotation.label(), |layers| layers.rotate(rotation))
    }

    /// New canvas size; content stays at the top-left and is not scaled.
    pub fn resize_canvas(&mut self, width: u32, height: u32) -> Result<()> {
        self.reshape("Resize Canvas", |layers| layers.resize_canvas(width, height))
    }

    /// Nearest-neighbour rescale of every layer.
    pub fn scale_image(&mut self, width: u32, height: u32) -> Result<()> {
        self.reshape("Resize Image", |layers| layers.scale(width, height))
    }

    /// Crop every layer to the selection bounds.
    pub fn crop_to_selection(&mut self) -> Result<()> {
        let Some(selection) = self.selection() else {
            return Err(EditorError::InvalidSelection("nothing is selected".to_string()));
        };
        let rect = selection.bounds();
        self.reshape("Crop to Selection", |layers| layers.crop(rect))
    }

    /// Lift the selected pixels of the active layer, transform them and drop
    /// them back. The selection follows the pixels. One undo step.
    pub fn transform_selection(&mut self, transform: SelectionTransform) -> Result<bool> {
        let layer = self.state.layers.active_index();
        let source = &self.state.layers.active().pixels;
        let Some(moved) = ops::transform::transform_selection(source, self.selection(), transform)? else {
            return Ok(false);
        };
        let before = PixelPatch::capture(source, moved.dirty)?;
        let after = PixelPatch::capture(&moved.pixels, moved.dirty)?;
        let draw = Command::draw(transform.label(), layer, before, after, None)?;
        let command = if moved.selection == self.state.selection {
            draw
        } else {
            let select = Command::Selection {
                before: self.state.selection.clone(),
                after: moved.selection,
            };
            Command::composite(transform.label(), vec![draw, select])
        };
        self.apply(command)?;
        Ok(true)
    }

    pub fn move_selection(&mut self, dx: i32, dy: i32) -> Result<bool> {
        if dx == 0 && dy == 0 {
            return Ok(false);
        }
        self.transform_selection(SelectionTransform::Move { dx, dy })
    }

    pub fn rotate_selection(&mut self, rotation: Rotation) -> Result<bool> {
        self.transform_selection(SelectionTransform::Rotate(rotation))
    }

    pub fn scale_selection(&mut self, width: u32, height: u32) -> Result<bool> {
        self.transform_selection(SelectionTransform::Scale { width, height })
    }

    // ------------------------------------------------------------------
    // Clipboard
    // ------------------------------------------------------------------

    /// Visible pixels under the selection, cropped to its bounds. Without a
    /// selection this is the whole composite.
    pub fn copy_selection(&self) -> Result<RasterBuffer> {
        match self.selection() {
            Some(sel) => self.state.layers.composite(Some(sel))?.cropped(sel.bounds()),
            None => self.composite(),
        }
    }

    /// Paste `buffer` as a new layer above the active one with its top-left
    /// at `at`. Parts outside the canvas are cropped.
    pub fn paste_as_layer(&mut self, buffer: &RasterBuffer, at: (i32, i32)) -> Result<usize> {
        let mut layer = Layer::new("Pasted Layer", self.width(), self.height())?;
        layer.pixels.blit(buffer, at.0, at.1);
        let index = self.state.layers.active_index() + 1;
        self.apply(Command::AddLayer {
            index,
            layer,
            previous_active: self.state.layers.active_index(),
        })?;
        Ok(index)
    }

    /// Paste into the active layer at the selection's top-left, writing only
    /// selected pixels.
    pub fn paste_into_selection(&mut self, buffer: &RasterBuffer) -> Result<bool> {
        let origin = self
            .selection()
            .map(|s| s.bounds())
            .filter(|r| !r.is_empty())
            .map_or((0, 0), |r| (r.x, r.y));
        let target = PixelRect::new(origin.0, origin.1, buffer.width(), buffer.height())
            .clamp_to(self.width(), self.height());
        if target.is_empty() {
            return Ok(false);
        }
        let layer = self.state.layers.active_index();
        let before = PixelPatch::capture(&self.state.layers.active().pixels, target)?;
        let mut scratch = before.pixels.clone();
        for (x, y) in target.points() {
            if permits(self.selection(), x, y) {
                let src = buffer.pixel((x - origin.0) as u32, (y - origin.1) as u32);
                let (sx, sy) = ((x - target.x) as u32, (y - target.y) as u32);
                scratch.put(sx, sy, blend_pixel(scratch.pixel(sx, sy), src, 1.0));
            }
        }
        let after = PixelPatch::new(target, scratch)?;
        self.apply(Command::draw("Paste", layer, before, after, None)?)?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Layers
    // ------------------------------------------------------------------

    /// New transparent layer above the active one. Returns its index.
    pub fn add_layer(&mut self, name: impl Into<String>) -> Result<usize> {
        let layer = Layer::new(name, self.width(), self.height())?;
        let index = self.state.layers.active_index() + 1;
        self.apply(Command::AddLayer {
            index,
            layer,
            previous_active: self.state.layers.active_index(),
        })?;
        Ok(index)
    }

    /// Default name for the next added layer.
    pub fn next_layer_name(&self) -> String {
        format!("Layer {}", self.state.layers.len() + 1)
    }

    pub fn remove_layer(&mut self, index: usize) -> Result<()> {
        self.apply(Command::RemoveLayer {
            index,
            removed: None,
            previous_active: self.state.layers.active_index(),
        })
    }

    pub fn move_layer(&mut self, from: usize, to: usize) -> Result<()> {
        self.apply(Command::MoveLayer { from, to })
    }

    pub fn merge_down(&mut self, index: usize) -> Result<()> {
        self.apply(Command::MergeDown {
            index,
            merged: None,
            previous_active: self.state.layers.active_index(),
        })
    }

    pub fn duplicate_layer(&mut self, index: usize) -> Result<()> {
        self.apply(Command::DuplicateLayer {
            index,
            previous_active: self.state.layers.active_index(),
        })
    }

    pub fn set_layer_opacity(&mut self, index: usize, opacity: f32) -> Result<()> {
        self.apply(Command::SetOpacity {
            layer: index,
            opacity,
            previous: None,
        })
    }

    pub fn set_layer_visible(&mut self, index: usize, visible: bool) -> Result<()> {
        self.apply(Command::SetVisibility {
            layer: index,
            visible,
            previous: None,
        })
    }

    pub fn rename_layer(&mut self, index: usize, name: impl Into<String>) -> Result<()> {
        self.apply(Command::Rename {
            layer: index,
            name: name.into(),
            previous: None,
        })
    }

    pub fn set_active_layer(&mut self, index: usize) -> Result<()> {
        self.apply(Command::SetActive { index, previous: None })
    }

    pub fn flatten(&mut self) -> Result<()> {
        self.apply(Command::Flatten {
            previous: None,
            previous_active: self.state.layers.active_index(),
        })
    }

    // ------------------------------------------------------------------
    // Tools
    // ------------------------------------------------------------------

    /// Carry out a finished tool gesture with the context it was made with.
    pub fn perform(&mut self, action: ToolAction) -> Result<ToolOutcome> {
        let changed = match action {
            ToolAction::Stroke { label, ctx, points } => self.stroke_labeled(label, &ctx, &points)?,
            ToolAction::Shape {
                ctx,
                kind,
                start,
                end,
                modifiers,
            } => self.draw_shape(&ctx, kind, start, end, modifiers)?,
            ToolAction::Fill { ctx, seed, contiguous } => self.fill(&ctx, seed, contiguous)?,
            ToolAction::Select { shape, mode } => self.select(&shape, mode)?,
            ToolAction::Move { dx, dy } => self.move_selection(dx, dy)?,
            ToolAction::Pick { point } => {
                return Ok(ToolOutcome::Picked(self.sample_color(point.0, point.1)?));
            }
        };
        Ok(if changed { ToolOutcome::Applied } else { ToolOutcome::Unchanged })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::tools::{BrushShape, Tool, ToolSession};

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

    fn pen() -> DrawingContext {
        DrawingContext::default().with_color(RED).with_shape(BrushShape::Square)
    }

    #[test]
    fn test_stroke_marks_dirty_and_undoes() {
        let mut doc = Document::new("art", 8, 8).unwrap();
        assert!(!doc.is_dirty());
        assert!(doc.stroke(&pen(), &[(1, 1), (4, 1)]).unwrap());
        assert!(doc.is_dirty());
        assert_eq!(doc.display_title(), "art*");
        doc.mark_saved();
        assert_eq!(doc.display_title(), "art");

        doc.undo().unwrap();
        assert!(doc.is_dirty());
        assert_eq!(doc.composite().unwrap(), RasterBuffer::new(8, 8).unwrap());
    }

    #[test]
    fn test_stroke_outside_canvas_records_nothing() {
        let mut doc = Document::new("art", 8, 8).unwrap();
        assert!(!doc.stroke(&pen(), &[(20, 20), (30, 20)]).unwrap());
        assert_eq!(doc.history().undo_count(), 0);
        assert!(!doc.is_dirty());
    }

    #[test]
    fn test_draw_patch_is_stroke_sized() {
        let mut doc = Document::new("art", 64, 64).unwrap();
        doc.stroke(&pen(), &[(10, 10), (12, 10)]).unwrap();
        // 3x1 patch twice (before + after) plus bookkeeping, far below a layer.
        assert!(doc.history().memory_usage() < 64 * 64 * 4);
    }

    #[test]
    fn test_output_region_clamping() {
        let mut doc = Document::new("art", 100, 50).unwrap();
        assert_eq!(doc.output_region(), PixelRect::new(0, 0, 100, 50));
        doc.set_output_region(PixelRect::new(90, -5, 4, 400));
        assert_eq!(doc.output_region(), PixelRect::new(68, 0, 32, 50));

        let mut tiny = Document::new("tiny", 16, 8).unwrap();
        tiny.set_output_region(PixelRect::new(3, 3, 1, 1));
        assert_eq!(tiny.output_region(), PixelRect::new(0, 0, 16, 8));

        doc.resize_canvas(40, 40).unwrap();
        assert_eq!(doc.output_region(), PixelRect::new(8, 0, 32, 40));
    }

    #[test]
    fn test_fill_and_sample() {
        let mut doc = Document::new("art", 6, 6).unwrap();
        let ctx = pen();
        assert!(doc.fill(&ctx, (0, 0), true).unwrap());
        assert_eq!(doc.sample_color(5, 5).unwrap(), RED);
        assert!(!doc.fill(&ctx, (0, 0), true).unwrap());
        assert!(doc.sample_color(6, 0).is_err());
    }

    #[test]
    fn test_selection_commands() {
        let mut doc = Document::new("art", 8, 8).unwrap();
        doc.select(&SelectionShape::Rectangle(PixelRect::new(0, 0, 4, 8)), SelectionMode::Replace)
            .unwrap();
        assert_eq!(doc.selection().map(Selection::count), Some(32));
        doc.invert_selection().unwrap();
        assert!(doc.selection().unwrap().contains(4, 0));
        assert!(!doc.selection().unwrap().contains(3, 0));
        doc.select(&SelectionShape::Rectangle(PixelRect::new(4, 0, 4, 8)), SelectionMode::Subtract)
            .unwrap();
        assert!(doc.selection().is_none());
        doc.undo().unwrap();
        assert!(doc.selection().is_some());
        assert!(doc.select_none().unwrap());
        assert!(doc.selection().is_none());
        assert!(!doc.select_none().unwrap());
    }

    #[test]
    fn test_clear_respects_selection() {
        let mut doc = Document::new("art", 4, 4).unwrap();
        doc.fill(&pen(), (0, 0), true).unwrap();
        doc.select(&SelectionShape::Rectangle(PixelRect::new(0, 0, 2, 4)), SelectionMode::Replace)
            .unwrap();
        doc.clear_layer().unwrap();
        assert_eq!(doc.sample_color(1, 1).unwrap(), TRANSPARENT);
        assert_eq!(doc.sample_color(2, 1).unwrap(), RED);
    }

    #[test]
    fn test_copy_and_paste() {
        let mut doc = Document::new("art", 8, 8).unwrap();
        doc.fill(&pen(), (0, 0), true).unwrap();
        doc.select(&SelectionShape::Rectangle(PixelRect::new(2, 2, 3, 2)), SelectionMode::Replace)
            .unwrap();
        let copied = doc.copy_selection().unwrap();
        assert_eq!(copied.dimensions(), (3, 2));
        assert_eq!(copied.get(0, 0).unwrap(), RED);

        let idx = doc.paste_as_layer(&copied, (6, 6)).unwrap();
        assert_eq!(doc.layers().len(), 2);
        let pasted = &doc.layers().get(idx).unwrap().pixels;
        assert_eq!(pasted.get(7, 7).unwrap(), RED);
        assert_eq!(pasted.get(5, 5).unwrap(), TRANSPARENT);

        let blue = RasterBuffer::filled(8, 8, BLUE).unwrap();
        doc.paste_into_selection(&blue).unwrap();
        let active = &doc.layers().active().pixels;
        assert_eq!(active.get(2, 2).unwrap(), BLUE);
        assert_eq!(active.get(5, 2).unwrap(), TRANSPARENT);
    }

    #[test]
    fn test_flip_and_rotate_undo() {
        let mut doc = Document::new("art", 4, 2).unwrap();
        doc.stroke(&pen(), &[(0, 0)]).unwrap();
        doc.add_layer("top").unwrap();
        doc.stroke(&pen(), &[(0, 1)]).unwrap();
        let before = doc.composite().unwrap();

        doc.flip(true, false, FlipScope::Document).unwrap();
        assert_eq!(doc.sample_color(3, 0).unwrap(), RED);
        doc.rotate_canvas(Rotation::Cw90).unwrap();
        assert_eq!((doc.width(), doc.height()), (2, 4));

        doc.undo().unwrap();
        doc.undo().unwrap();
        assert_eq!(doc.composite().unwrap(), before);
    }

    #[test]
    fn test_crop_requires_selection() {
        let mut doc = Document::new("art", 8, 8).unwrap();
        assert!(matches!(doc.crop_to_selection(), Err(EditorError::InvalidSelection(_))));
        doc.select(&SelectionShape::Rectangle(PixelRect::new(2, 2, 3, 3)), SelectionMode::Replace)
            .unwrap();
        doc.crop_to_selection().unwrap();
        assert_eq!((doc.width(), doc.height()), (3, 3));
        assert!(doc.selection().is_none());
        doc.undo().unwrap();
        assert_eq!((doc.width(), doc.height()), (8, 8));
        assert!(doc.selection().is_some());
    }

    #[test]
    fn test_move_selection_is_one_undo_step() {
        let mut doc = Document::new("art", 8, 8).unwrap();
        doc.stroke(&pen(), &[(1, 1), (2, 1)]).unwrap();
        let before = doc.composite().unwrap();
        doc.select(&SelectionShape::Rectangle(PixelRect::new(0, 0, 3, 2)), SelectionMode::Replace)
            .unwrap();
        let steps = doc.history().undo_count();

        assert!(doc.move_selection(3, 4).unwrap());
        assert_eq!(doc.history().undo_count(), steps + 1);
        assert_eq!(doc.sample_color(4, 5).unwrap(), RED);
        assert_eq!(doc.sample_color(5, 5).unwrap(), RED);
        assert_eq!(doc.sample_color(1, 1).unwrap(), TRANSPARENT);
        assert_eq!(doc.selection().unwrap().bounds(), PixelRect::new(3, 4, 3, 2));

        doc.undo().unwrap();
        assert_eq!(doc.composite().unwrap(), before);
        assert_eq!(doc.selection().unwrap().bounds(), PixelRect::new(0, 0, 3, 2));
        assert!(!doc.move_selection(0, 0).unwrap());
    }

    #[test]
    fn test_rotate_and_scale_without_selection() {
        let mut doc = Document::new("art", 4, 4).unwrap();
        doc.stroke(&pen(), &[(0, 0), (3, 0)]).unwrap();
        assert!(doc.rotate_selection(Rotation::Cw90).unwrap());
        for y in 0..4 {
            assert_eq!(doc.sample_color(3, y).unwrap(), RED);
        }
        assert_eq!(doc.sample_color(0, 0).unwrap(), TRANSPARENT);
        assert!(doc.selection().is_none());

        assert!(doc.scale_selection(2, 2).unwrap());
        assert_eq!(doc.sample_color(3, 0).unwrap(), TRANSPARENT);
        assert!(doc.scale_selection(0, 2).is_err());
        assert_eq!(doc.history().undo_count(), 3);
    }

    #[test]
    fn test_perform_tool_session() {
        let mut doc = Document::new("art", 8, 8).unwrap();
        let ctx = pen();
        let mut session = ToolSession::new(Tool::Rectangle);
        session.on_point(&ctx, (1, 1), ShapeModifiers::default());
        let action = session.on_release((3, 3), ShapeModifiers::default()).unwrap();
        assert_eq!(doc.perform(action).unwrap(), ToolOutcome::Applied);
        assert_eq!(doc.history().labels(), vec!["Rectangle".to_string()]);

        let mut picker = ToolSession::new(Tool::Picker);
        picker.on_point(&ctx, (1, 1), ShapeModifiers::default());
        let pick = picker.on_release((1, 1), ShapeModifiers::default()).unwrap();
        assert_eq!(doc.perform(pick).unwrap(), ToolOutcome::Picked(RED));
    }

    #[test]
    fn test_perform_uses_gesture_context() {
        let mut doc = Document::new("art", 8, 8).unwrap();
        doc.stroke(&pen().with_width(1), &[(0, 2), (7, 2)]).unwrap();
        let mut eraser = ToolSession::new(Tool::Eraser);
        eraser.on_point(&pen().with_width(1), (0, 2), ShapeModifiers::default());
        let action = eraser.on_release((3, 2), ShapeModifiers::default()).unwrap();
        assert_eq!(doc.perform(action).unwrap(), ToolOutcome::Applied);
        assert_eq!(doc.sample_color(2, 2).unwrap(), TRANSPARENT);
        assert_eq!(doc.sample_color(5, 2).unwrap(), RED);
    }

    #[test]
    fn test_layer_operations_roundtrip() {
        let mut doc = Document::new("art", 4, 4).unwrap();
        doc.add_layer(doc.next_layer_name()).unwrap();
        assert_eq!(doc.layers().active().name(), "Layer 2");
        doc.duplicate_layer(1).unwrap();
        doc.set_layer_visible(0, false).unwrap();
        doc.rename_layer(2, "ink").unwrap();
        doc.set_layer_opacity(2, 0.5).unwrap();
        doc.move_layer(2, 0).unwrap();
        doc.set_active_layer(1).unwrap();
        doc.merge_down(2).unwrap();
        doc.remove_layer(0).unwrap();
        doc.flatten().unwrap();
        assert_eq!(doc.layers().len(), 1);
        while doc.undo().unwrap().is_some() {}
        assert_eq!(doc.layers().len(), 1);
        assert_eq!(doc.layers().active().name(), "Background");
        assert!(doc.rename_layer(0, "").is_err());
    }
}
