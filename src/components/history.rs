use std::collections::VecDeque;

use crate::canvas::{PixelRect, RasterBuffer};
use crate::components::layers::{Layer, RemovedLayer};
use crate::components::tools::DrawingContext;
use crate::document::CanvasState;
use crate::error::{EditorError, Result};
use crate::selection::Selection;

/// Default number of undo steps kept.
pub const DEFAULT_MAX_HISTORY: usize = 50;
/// Default memory cap for both stacks together.
pub const DEFAULT_MAX_MEMORY_BYTES: usize = 100 * 1024 * 1024;

// ============================================================================
// PIXEL PATCH - rectangle of pixels for patch-based undo
// ============================================================================

/// A rectangular patch of pixel data for efficient undo/redo.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelPatch {
    pub rect: PixelRect,
    pub pixels: RasterBuffer,
}

impl PixelPatch {
    /// Copy `rect` out of `buffer`. The rect must lie inside it.
    pub fn capture(buffer: &RasterBuffer, rect: PixelRect) -> Result<Self> {
        Ok(Self {
            rect,
            pixels: buffer.sub_region(rect)?,
        })
    }

    pub fn new(rect: PixelRect, pixels: RasterBuffer) -> Result<Self> {
        if pixels.dimensions() != (rect.width, rect.height) {
            return Err(EditorError::SizeMismatch {
                expected: (rect.width, rect.height),
                actual: pixels.dimensions(),
            });
        }
        Ok(Self { rect, pixels })
    }

    /// Write the patch back. Fails without touching `buffer` if the patch
    /// does not fit.
    pub fn apply(&self, buffer: &mut RasterBuffer) -> Result<()> {
        if !buffer.rect().contains_rect(&self.rect) {
            return Err(EditorError::out_of_bounds(
                self.rect.right() as i64 - 1,
                self.rect.bottom() as i64 - 1,
                buffer.width(),
                buffer.height(),
            ));
        }
        buffer.blit(&self.pixels, self.rect.x, self.rect.y);
        Ok(())
    }

    pub fn memory_size(&self) -> usize {
        self.pixels.memory_size() + std::mem::size_of::<Self>()
    }
}

// ============================================================================
// CANVAS SNAPSHOT - whole-document state for resize, crop and rotate
// ============================================================================

/// Layers, active index and selection of a document at one moment. The
/// canvas size is implied by the layer buffers.
#[derive(Clone, Debug, PartialEq)]
pub struct CanvasSnapshot {
    pub layers: Vec<Layer>,
    pub active_index: usize,
    pub selection: Option<Selection>,
}

impl CanvasSnapshot {
    pub fn capture(state: &CanvasState) -> Self {
        Self {
            layers: state.layers.layers().to_vec(),
            active_index: state.layers.active_index(),
            selection: state.selection.clone(),
        }
    }

    pub fn restore_into(&self, state: &mut CanvasState) -> Result<()> {
        if let (Some(selection), Some(first)) = (&self.selection, self.layers.first()) {
            let (w, h) = first.pixels.dimensions();
            selection.check_dimensions(w, h)?;
        }
        state.layers.replace_all(self.layers.clone(), self.active_index)?;
        state.selection = self.selection.clone();
        Ok(())
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.layers.first().map(|l| l.pixels.dimensions())
    }

    fn memory_bytes(&self) -> usize {
        self.layers.iter().map(Layer::memory_size).sum::<usize>()
            + self.selection.as_ref().map_or(0, |s| s.mask().len())
    }
}

// ============================================================================
// COMMAND
// ============================================================================

/// A reversible edit. Every variant keeps what it needs to invert itself;
/// `apply` followed by `undo` restores the state bit for bit.
///
/// `apply` and `undo` validate before mutating, so a failing call leaves the
/// state untouched.
#[derive(Clone, Debug)]
pub enum Command {
    /// Pixel edit on one layer, stored as before/after patches of the dirty
    /// rectangle.
    Draw {
        label: String,
        layer: usize,
        before: PixelPatch,
        after: PixelPatch,
        /// Brush settings the edit was made with, if any.
        context: Option<Box<DrawingContext>>,
    },
    AddLayer {
        index: usize,
        layer: Layer,
        previous_active: usize,
    },
    RemoveLayer {
        index: usize,
        removed: Option<RemovedLayer>,
        previous_active: usize,
    },
    MoveLayer {
        from: usize,
        to: usize,
    },
    MergeDown {
        index: usize,
        /// `(bottom before merge, removed top)` once applied.
        merged: Option<(Layer, Layer)>,
        previous_active: usize,
    },
    DuplicateLayer {
        index: usize,
        previous_active: usize,
    },
    SetOpacity {
        layer: usize,
        opacity: f32,
        previous: Option<f32>,
    },
    SetVisibility {
        layer: usize,
        visible: bool,
        previous: Option<bool>,
    },
    Rename {
        layer: usize,
        name: String,
        previous: Option<String>,
    },
    SetActive {
        index: usize,
        previous: Option<usize>,
    },
    Flatten {
        previous: Option<Vec<Layer>>,
        previous_active: usize,
    },
    /// Whole-document change that alters dimensions (resize, scale, crop,
    /// rotate).
    Resize {
        label: String,
        before: Box<CanvasSnapshot>,
        after: Box<CanvasSnapshot>,
    },
    Selection {
        before: Option<Selection>,
        after: Option<Selection>,
    },
    /// Ordered sub-commands applied and undone as one unit.
    Composite {
        label: String,
        commands: Vec<Command>,
    },
}

impl Command {
    /// Pixel edit command from the two states of `rect`.
    pub fn draw(
        label: impl Into<String>,
        layer: usize,
        before: PixelPatch,
        after: PixelPatch,
        context: Option<DrawingContext>,
    ) -> Result<Self> {
        if before.rect != after.rect {
            return Err(EditorError::SizeMismatch {
                expected: (before.rect.width, before.rect.height),
                actual: (after.rect.width, after.rect.height),
            });
        }
        Ok(Command::Draw {
            label: label.into(),
            layer,
            before,
            after,
            context: context.map(Box::new),
        })
    }

    pub fn composite(label: impl Into<String>, commands: Vec<Command>) -> Self {
        Command::Composite {
            label: label.into(),
            commands,
        }
    }

    pub fn description(&self) -> String {
        match self {
            Command::Draw { label, .. } => label.clone(),
            Command::AddLayer { .. } => "Add Layer".to_string(),
            Command::RemoveLayer { .. } => "Delete Layer".to_string(),
            Command::MoveLayer { .. } => "Move Layer".to_string(),
            Command::MergeDown { .. } => "Merge Down".to_string(),
            Command::DuplicateLayer { .. } => "Duplicate Layer".to_string(),
            Command::SetOpacity { .. } => "Layer Opacity".to_string(),
            Command::SetVisibility { visible, .. } => {
                (if *visible { "Show Layer" } else { "Hide Layer" }).to_string()
            }
            Command::Rename { .. } => "Rename Layer".to_string(),
            Command::SetActive { .. } => "Select Layer".to_string(),
            Command::Flatten { .. } => "Flatten Image".to_string(),
            Command::Resize { label, .. } => label.clone(),
            Command::Selection { after, .. } => {
                (if after.is_some() { "Select" } else { "Deselect" }).to_string()
            }
            Command::Composite { label, .. } => label.clone(),
        }
    }

    /// Approximate heap footprint, used for the history memory cap.
    pub fn memory_size(&self) -> usize {
        let base = std::mem::size_of::<Self>();
        base + match self {
            Command::Draw { label, before, after, .. } => {
                label.len() + before.memory_size() + after.memory_size()
            }
            Command::AddLayer { layer, .. } => layer.memory_size(),
            Command::RemoveLayer { removed, .. } => {
                removed.as_ref().map_or(0, |r| r.layer.memory_size())
            }
            Command::MergeDown { merged, .. } => merged
                .as_ref()
                .map_or(0, |(bottom, top)| bottom.memory_size() + top.memory_size()),
            Command::Rename { name, previous, .. } => {
                name.len() + previous.as_ref().map_or(0, String::len)
            }
            Command::Flatten { previous, .. } => previous
                .as_ref()
                .map_or(0, |layers| layers.iter().map(Layer::memory_size).sum()),
            Command::Resize { before, after, .. } => before.memory_bytes() + after.memory_bytes(),
            Command::Selection { before, after } => {
                before.as_ref().map_or(0, |s| s.mask().len())
                    + after.as_ref().map_or(0, |s| s.mask().len())
            }
            Command::Composite { commands, .. } => commands.iter().map(Command::memory_size).sum(),
            Command::MoveLayer { .. }
            | Command::DuplicateLayer { .. }
            | Command::SetOpacity { .. }
            | Command::SetVisibility { .. }
            | Command::SetActive { .. } => 0,
        }
    }

    pub fn apply(&mut self, state: &mut CanvasState) -> Result<()> {
        match self {
            Command::Draw { layer, after, .. } => {
                let target = state.layers.get_mut(*layer)?;
                after.apply(&mut target.pixels)
            }
            Command::AddLayer {
                index,
                layer,
                previous_active,
            } => {
                *previous_active = state.layers.active_index();
                state.layers.add(layer.clone(), *index)
            }
            Command::RemoveLayer {
                index,
                removed,
                previous_active,
            } => {
                *previous_active = state.layers.active_index();
                *removed = Some(state.layers.remove(*index)?);
                Ok(())
            }
            Command::MoveLayer { from, to } => state.layers.move_layer(*from, *to),
            Command::MergeDown {
                index,
                merged,
                previous_active,
            } => {
                if *index == 0 || *index >= state.layers.len() {
                    return state.layers.merge_down(*index);
                }
                let bottom = state.layers.get(*index - 1)?.clone();
                let top = state.layers.get(*index)?.clone();
                *previous_active = state.layers.active_index();
                state.layers.merge_down(*index)?;
                *merged = Some((bottom, top));
                Ok(())
            }
            Command::DuplicateLayer {
                index,
                previous_active,
            } => {
                *previous_active = state.layers.active_index();
                state.layers.duplicate(*index).map(|_| ())
            }
            Command::SetOpacity {
                layer,
                opacity,
                previous,
            } => {
                let target = state.layers.get_mut(*layer)?;
                *previous = Some(target.opacity());
                target.set_opacity(*opacity);
                Ok(())
            }
            Command::SetVisibility {
                layer,
                visible,
                previous,
            } => {
                let target = state.layers.get_mut(*layer)?;
                *previous = Some(target.visible);
                target.visible = *visible;
                Ok(())
            }
            Command::Rename {
                layer,
                name,
                previous,
            } => {
                let target = state.layers.get_mut(*layer)?;
                let old = target.name().to_string();
                target.set_name(name.clone())?;
                *previous = Some(old);
                Ok(())
            }
            Command::SetActive { index, previous } => {
                let old = state.layers.active_index();
                state.layers.set_active(*index)?;
                *previous = Some(old);
                Ok(())
            }
            Command::Flatten {
                previous,
                previous_active,
            } => {
                *previous_active = state.layers.active_index();
                *previous = Some(state.layers.flatten()?);
                Ok(())
            }
            Command::Resize { after, .. } => after.restore_into(state),
            Command::Selection { after, .. } => set_selection(state, after.clone()),
            Command::Composite { label, commands } => apply_all(label, commands, state),
        }
    }

    pub fn undo(&mut self, state: &mut CanvasState) -> Result<()> {
        match self {
            Command::Draw { layer, before, .. } => {
                let target = state.layers.get_mut(*layer)?;
                before.apply(&mut target.pixels)
            }
            Command::AddLayer {
                index,
                previous_active,
                ..
            } => state.layers.take_raw(*index, *previous_active).map(|_| ()),
            Command::RemoveLayer {
                removed,
                previous_active,
                ..
            } => {
                let Some(entry) = removed.as_ref() else {
                    return Err(not_applied("Delete Layer"));
                };
                if entry.replaced_with_blank {
                    state.layers.replace_raw(entry.index, entry.layer.clone())?;
                    state.layers.set_active(*previous_active)?;
                } else {
                    state
                        .layers
                        .insert_raw(entry.index, entry.layer.clone(), *previous_active)?;
                }
                *removed = None;
                Ok(())
            }
            Command::MoveLayer { from, to } => state.layers.move_layer(*to, *from),
            Command::MergeDown {
                index,
                merged,
                previous_active,
            } => {
                let Some((bottom, top)) = merged.as_ref() else {
                    return Err(not_applied("Merge Down"));
                };
                if *index == 0 || *index > state.layers.len() {
                    return Err(EditorError::index(*index, state.layers.len()));
                }
                state.layers.insert_raw(*index, top.clone(), *previous_active)?;
                state.layers.replace_raw(*index - 1, bottom.clone())?;
                *merged = None;
                Ok(())
            }
            Command::DuplicateLayer {
                index,
                previous_active,
            } => state.layers.take_raw(*index + 1, *previous_active).map(|_| ()),
            Command::SetOpacity { layer, previous, .. } => {
                let old = previous.ok_or_else(|| not_applied("Layer Opacity"))?;
                state.layers.get_mut(*layer)?.set_opacity(old);
                Ok(())
            }
            Command::SetVisibility { layer, previous, .. } => {
                let old = previous.ok_or_else(|| not_applied("Layer Visibility"))?;
                state.layers.get_mut(*layer)?.visible = old;
                Ok(())
            }
            Command::Rename { layer, previous, .. } => {
                let old = previous.clone().ok_or_else(|| not_applied("Rename Layer"))?;
                state.layers.get_mut(*layer)?.set_name(old)
            }
            Command::SetActive { previous, .. } => {
                let old = previous.ok_or_else(|| not_applied("Select Layer"))?;
                state.layers.set_active(old)
            }
            Command::Flatten {
                previous,
                previous_active,
            } => {
                let layers = previous.take().ok_or_else(|| not_applied("Flatten Image"))?;
                if let Err(e) = state.layers.replace_all(layers.clone(), *previous_active) {
                    *previous = Some(layers);
                    return Err(e);
                }
                Ok(())
            }
            Command::Resize { before, .. } => before.restore_into(state),
            Command::Selection { before, .. } => set_selection(state, before.clone()),
            Command::Composite { label, commands } => undo_all(label, commands, state),
        }
    }
}

fn not_applied(label: &str) -> EditorError {
    EditorError::CommandNotApplied(label.to_string())
}

fn set_selection(state: &mut CanvasState, selection: Option<Selection>) -> Result<()> {
    if let Some(sel) = &selection {
        sel.check_dimensions(state.layers.width(), state.layers.height())?;
    }
    state.selection = selection;
    Ok(())
}

/// Apply in order; on failure roll back what was applied and report which
/// sub-command broke.
fn apply_all(label: &str, commands: &mut [Command], state: &mut CanvasState) -> Result<()> {
    for i in 0..commands.len() {
        if let Err(source) = commands[i].apply(state) {
            for done in commands[..i].iter_mut().rev() {
                if let Err(e) = done.undo(state) {
                    log::warn!("{label}: rollback of '{}' failed: {e}", done.description());
                }
            }
            return Err(EditorError::CommandApplyFailure {
                index: i,
                label: commands[i].description(),
                source: Box::new(source),
            });
        }
    }
    Ok(())
}

/// Undo in reverse order; on failure re-apply what was undone.
fn undo_all(label: &str, commands: &mut [Command], state: &mut CanvasState) -> Result<()> {
    let n = commands.len();
    for i in (0..n).rev() {
        if let Err(source) = commands[i].undo(state) {
            for done in commands[i + 1..].iter_mut() {
                if let Err(e) = done.apply(state) {
                    log::warn!("{label}: re-apply of '{}' failed: {e}", done.description());
                }
            }
            return Err(EditorError::CommandApplyFailure {
                index: i,
                label: commands[i].description(),
                source: Box::new(source),
            });
        }
    }
    Ok(())
}

// ============================================================================
// UNDO ENGINE - Manages undo/redo stacks with memory limits
// ============================================================================

/// Undo/redo history with a step cap and a memory cap.
pub struct UndoEngine {
    undo_stack: VecDeque<Command>,
    redo_stack: VecDeque<Command>,
    max_history_size: usize,
    /// Optional memory cap in bytes.
    max_memory_bytes: Option<usize>,
    /// Running memory total across both stacks.
    total_memory: usize,
}

impl Default for UndoEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl UndoEngine {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_history_size: max_history_size.max(1),
            max_memory_bytes: Some(DEFAULT_MAX_MEMORY_BYTES),
            total_memory: 0,
        }
    }

    pub fn with_memory_limit(mut self, max_memory_bytes: Option<usize>) -> Self {
        self.max_memory_bytes = max_memory_bytes;
        self.prune();
        self
    }

    /// Run `command` and record it. On failure nothing is recorded and the
    /// redo stack survives.
    pub fn apply(&mut self, mut command: Command, state: &mut CanvasState) -> Result<()> {
        command.apply(state)?;

        // A new action invalidates everything that could be redone.
        for cmd in self.redo_stack.drain(..) {
            self.total_memory = self.total_memory.saturating_sub(cmd.memory_size());
        }

        log::debug!("applied '{}'", command.description());
        self.total_memory += command.memory_size();
        self.undo_stack.push_back(command);
        self.prune();
        Ok(())
    }

    /// Revert the newest command. `Ok(None)` when there is nothing to undo.
    pub fn undo(&mut self, state: &mut CanvasState) -> Result<Option<String>> {
        let Some(mut command) = self.undo_stack.pop_back() else {
            log::debug!("undo: history is empty");
            return Ok(None);
        };
        let description = command.description();
        let before = command.memory_size();
        if let Err(e) = command.undo(state) {
            self.undo_stack.push_back(command);
            return Err(e);
        }
        self.rebalance(before, command.memory_size());
        self.redo_stack.push_back(command);
        Ok(Some(description))
    }

    /// Re-apply the newest undone command. `Ok(None)` when there is nothing
    /// to redo.
    pub fn redo(&mut self, state: &mut CanvasState) -> Result<Option<String>> {
        let Some(mut command) = self.redo_stack.pop_back() else {
            log::debug!("redo: nothing to redo");
            return Ok(None);
        };
        let description = command.description();
        let before = command.memory_size();
        if let Err(e) = command.apply(state) {
            self.redo_stack.push_back(command);
            return Err(e);
        }
        self.rebalance(before, command.memory_size());
        self.undo_stack.push_back(command);
        Ok(Some(description))
    }

    fn rebalance(&mut self, before: usize, after: usize) {
        self.total_memory = self.total_memory.saturating_sub(before) + after;
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_description(&self) -> Option<String> {
        self.undo_stack.back().map(Command::description)
    }

    pub fn redo_description(&self) -> Option<String> {
        self.redo_stack.back().map(Command::description)
    }

    /// Undo descriptions, most recent first.
    pub fn labels(&self) -> Vec<String> {
        self.undo_stack.iter().rev().map(Command::description).collect()
    }

    /// O(1) via the cached total.
    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    fn prune(&mut self) {
        while self.undo_stack.len() > self.max_history_size {
            if let Some(removed) = self.undo_stack.pop_front() {
                self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
            }
        }

        // Always keep the newest step, however large.
        if let Some(max_bytes) = self.max_memory_bytes {
            while self.total_memory > max_bytes && self.undo_stack.len() > 1 {
                if let Some(removed) = self.undo_stack.pop_front() {
                    self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
                    log::debug!("history over memory cap, dropped '{}'", removed.description());
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.total_memory = 0;
    }

    /// Undo `steps` times, stopping early at an empty stack. Returns how many
    /// steps were undone.
    pub fn undo_to(&mut self, steps: usize, state: &mut CanvasState) -> Result<usize> {
        let mut undone = 0;
        while undone < steps && self.undo(state)?.is_some() {
            undone += 1;
        }
        Ok(undone)
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn max_history_size(&self) -> usize {
        self.max_history_size
    }
}
