use std::sync::Arc;

use image::Rgba;
use serde::{Deserialize, Serialize};

use crate::canvas::RasterBuffer;
use crate::error::Result;
use crate::ops::stroke::{ShapeKind, ShapeModifiers, StrokeEngine, StrokeRaster};
use crate::selection::{Selection, SelectionMode, SelectionShape};

// ============================================================================
// DRAWING CONTEXT
// ============================================================================

/// Widest brush the stamper honors; wider settings are clamped.
pub const MAX_BRUSH_WIDTH: u32 = 256;

/// Stamp footprint of the brush.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BrushShape {
    #[default]
    Circle,
    Square,
    /// Stamps the captured pattern instead of a solid color.
    Pattern,
}

/// Mirror symmetry mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MirrorMode {
    #[default]
    None,
    /// Reflect across a vertical axis (`x' = 2*axis_x - x`).
    X,
    /// Reflect across a horizontal axis (`y' = 2*axis_y - y`).
    Y,
    /// 4-way symmetry.
    Both,
}

impl MirrorMode {
    /// Cycle to the next mode.
    pub fn next(self) -> Self {
        match self {
            MirrorMode::None => MirrorMode::X,
            MirrorMode::X => MirrorMode::Y,
            MirrorMode::Y => MirrorMode::Both,
            MirrorMode::Both => MirrorMode::None,
        }
    }

    pub fn is_active(self) -> bool {
        self != MirrorMode::None
    }

    pub fn mirrors_x(self) -> bool {
        matches!(self, MirrorMode::X | MirrorMode::Both)
    }

    pub fn mirrors_y(self) -> bool {
        matches!(self, MirrorMode::Y | MirrorMode::Both)
    }
}

/// Mirror mode plus optional axis positions. An unset axis sits on the
/// canvas centre, `(size - 1) / 2`.
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct MirrorConfig {
    pub mode: MirrorMode,
    pub axis_x: Option<f32>,
    pub axis_y: Option<f32>,
}

impl MirrorConfig {
    pub fn new(mode: MirrorMode) -> Self {
        Self {
            mode,
            axis_x: None,
            axis_y: None,
        }
    }

    pub fn with_axes(mut self, axis_x: Option<f32>, axis_y: Option<f32>) -> Self {
        self.axis_x = axis_x;
        self.axis_y = axis_y;
        self
    }

    pub fn resolve_axis(position: Option<f32>, size: u32) -> f32 {
        position.unwrap_or((size as f32 - 1.0) / 2.0)
    }

    #[inline]
    fn reflect(value: i32, axis: f32) -> i32 {
        (2.0 * axis - value as f32).round() as i32
    }

    /// The point itself followed by its reflections (up to 4 entries, no
    /// heap allocation).
    pub fn positions(&self, x: i32, y: i32, width: u32, height: u32) -> MirrorPositions {
        let ax = Self::resolve_axis(self.axis_x, width);
        let ay = Self::resolve_axis(self.axis_y, height);
        let mx = Self::reflect(x, ax);
        let my = Self::reflect(y, ay);
        match self.mode {
            MirrorMode::None => MirrorPositions { data: [(x, y), (0, 0), (0, 0), (0, 0)], len: 1 },
            MirrorMode::X => MirrorPositions { data: [(x, y), (mx, y), (0, 0), (0, 0)], len: 2 },
            MirrorMode::Y => MirrorPositions { data: [(x, y), (x, my), (0, 0), (0, 0)], len: 2 },
            MirrorMode::Both => MirrorPositions { data: [(x, y), (mx, y), (x, my), (mx, my)], len: 4 },
        }
    }
}

/// Inline array of up to 4 mirrored positions.
pub struct MirrorPositions {
    pub data: [(i32, i32); 4],
    pub len: usize,
}

impl MirrorPositions {
    pub fn iter(&self) -> impl Iterator<Item = &(i32, i32)> {
        self.data[..self.len].iter()
    }
}

/// Per-stroke brush configuration.
///
/// Tools hold one of these while the user edits settings; a clone is taken
/// when a gesture starts and that clone travels into the resulting command,
/// so later edits never reach back into history.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawingContext {
    pub brush_width: u32,
    pub brush_shape: BrushShape,
    pub color: Rgba<u8>,
    pub mirror: MirrorConfig,
    pub wrap: bool,
    /// Captured stamp source, only consulted when `brush_shape` is `Pattern`.
    pub pattern: Option<Arc<RasterBuffer>>,
    /// Write transparency instead of color.
    pub erase: bool,
    /// Remove staircase doubles from 1px lines.
    pub pixel_perfect: bool,
}

impl Default for DrawingContext {
    fn default() -> Self {
        Self {
            brush_width: 1,
            brush_shape: BrushShape::Circle,
            color: Rgba([0, 0, 0, 255]),
            mirror: MirrorConfig::default(),
            wrap: false,
            pattern: None,
            erase: false,
            pixel_perfect: false,
        }
    }
}

impl DrawingContext {
    pub fn with_color(mut self, color: Rgba<u8>) -> Self {
        self.color = color;
        self
    }

    /// Widths below 1 are raised to 1.
    pub fn with_width(mut self, width: u32) -> Self {
        self.brush_width = width.clamp(1, MAX_BRUSH_WIDTH);
        self
    }

    pub fn with_shape(mut self, shape: BrushShape) -> Self {
        self.brush_shape = shape;
        self
    }

    pub fn with_mirror(mut self, mirror: MirrorConfig) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn with_wrap(mut self, wrap: bool) -> Self {
        self.wrap = wrap;
        self
    }

    /// Switch to pattern stamping from a captured buffer.
    pub fn with_pattern(mut self, pattern: RasterBuffer) -> Self {
        self.pattern = Some(Arc::new(pattern));
        self.brush_shape = BrushShape::Pattern;
        self
    }

    pub fn with_erase(mut self, erase: bool) -> Self {
        self.erase = erase;
        self
    }

    pub fn with_pixel_perfect(mut self, pixel_perfect: bool) -> Self {
        self.pixel_perfect = pixel_perfect;
        self
    }

    /// Pattern in effect, if the brush is a pattern brush with a source.
    pub fn active_pattern(&self) -> Option<&RasterBuffer> {
        match self.brush_shape {
            BrushShape::Pattern => self.pattern.as_deref(),
            _ => None,
        }
    }
}

// ============================================================================
// TOOLS
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Tool {
    /// 1px, pixel-perfect freehand.
    Pencil,
    #[default]
    Brush,
    Eraser,
    Line,
    Rectangle,
    Ellipse,
    Bucket,
    SelectRect,
    SelectEllipse,
    SelectLasso,
    SelectColor,
    /// Drag the selected pixels, or the whole layer without a selection.
    Move,
    Picker,
}

impl Tool {
    pub fn label(&self) -> &'static str {
        match self {
            Tool::Pencil => "Pencil",
            Tool::Brush => "Brush",
            Tool::Eraser => "Eraser",
            Tool::Line => "Line",
            Tool::Rectangle => "Rectangle",
            Tool::Ellipse => "Ellipse",
            Tool::Bucket => "Fill",
            Tool::SelectRect => "Select Rectangle",
            Tool::SelectEllipse => "Select Ellipse",
            Tool::SelectLasso => "Select Lasso",
            Tool::SelectColor => "Select Color",
            Tool::Move => "Move",
            Tool::Picker => "Color Picker",
        }
    }

    /// Tools that render a live stroke preview while dragging.
    pub fn paints(&self) -> bool {
        matches!(
            self,
            Tool::Pencil | Tool::Brush | Tool::Eraser | Tool::Line | Tool::Rectangle | Tool::Ellipse
        )
    }

    fn shape_kind(&self) -> Option<ShapeKind> {
        match self {
            Tool::Line => Some(ShapeKind::Line),
            Tool::Rectangle => Some(ShapeKind::Rectangle),
            Tool::Ellipse => Some(ShapeKind::Ellipse),
            _ => None,
        }
    }

    /// Adjust the user's context for this tool.
    fn specialize(&self, mut ctx: DrawingContext) -> DrawingContext {
        match self {
            Tool::Pencil => {
                ctx.brush_width = 1;
                ctx.pixel_perfect = true;
                if ctx.brush_shape == BrushShape::Pattern {
                    ctx.brush_shape = BrushShape::Square;
                }
            }
            Tool::Eraser => ctx.erase = true,
            _ => {}
        }
        ctx
    }
}

/// Resolved outcome of a finished gesture, consumed by `Document::perform`.
/// Painting actions carry the tool-specialized context snapshot.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolAction {
    Stroke {
        label: &'static str,
        ctx: DrawingContext,
        points: Vec<(i32, i32)>,
    },
    Shape {
        ctx: DrawingContext,
        kind: ShapeKind,
        start: (i32, i32),
        end: (i32, i32),
        modifiers: ShapeModifiers,
    },
    Fill {
        ctx: DrawingContext,
        seed: (i32, i32),
        contiguous: bool,
    },
    Select {
        shape: SelectionShape,
        mode: SelectionMode,
    },
    Move {
        dx: i32,
        dy: i32,
    },
    Pick {
        point: (i32, i32),
    },
}

/// One gesture in progress: press, drags, release.
///
/// The context is captured on `on_point`; nothing touches a layer until
/// `on_release` hands back a [`ToolAction`]. `cancel` discards the gesture.
#[derive(Clone, Debug)]
pub struct ToolSession {
    tool: Tool,
    context: DrawingContext,
    selection_mode: SelectionMode,
    contiguous: bool,
    points: Vec<(i32, i32)>,
    modifiers: ShapeModifiers,
    active: bool,
}

impl ToolSession {
    pub fn new(tool: Tool) -> Self {
        Self {
            tool,
            context: DrawingContext::default(),
            selection_mode: SelectionMode::Replace,
            contiguous: true,
            points: Vec::new(),
            modifiers: ShapeModifiers::default(),
            active: false,
        }
    }

    pub fn with_selection_mode(mut self, mode: SelectionMode) -> Self {
        self.selection_mode = mode;
        self
    }

    pub fn with_contiguous(mut self, contiguous: bool) -> Self {
        self.contiguous = contiguous;
        self
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Context snapshot in effect for the current gesture.
    pub fn context(&self) -> &DrawingContext {
        &self.context
    }

    pub fn points(&self) -> &[(i32, i32)] {
        &self.points
    }

    /// Press. Snapshots `ctx` for the whole gesture.
    pub fn on_point(&mut self, ctx: &DrawingContext, point: (i32, i32), modifiers: ShapeModifiers) {
        self.context = self.tool.specialize(ctx.clone());
        self.points.clear();
        self.points.push(point);
        self.modifiers = modifiers;
        self.active = true;
    }

    /// Motion with the button held.
    pub fn on_drag(&mut self, point: (i32, i32), modifiers: ShapeModifiers) {
        if !self.active {
            return;
        }
        self.modifiers = modifiers;
        match self.tool {
            Tool::Pencil | Tool::Brush | Tool::Eraser | Tool::SelectLasso => {
                if self.points.last() != Some(&point) {
                    self.points.push(point);
                }
            }
            _ => {
                // Two-point gestures: keep the anchor, replace the end.
                self.points.truncate(1);
                self.points.push(point);
            }
        }
    }

    /// Release. Returns the action to perform, or `None` if no gesture was
    /// in progress.
    pub fn on_release(&mut self, point: (i32, i32), modifiers: ShapeModifiers) -> Option<ToolAction> {
        if !self.active {
            return None;
        }
        self.on_drag(point, modifiers);
        self.active = false;
        let points = std::mem::take(&mut self.points);
        let start = *points.first()?;
        let end = *points.last()?;

        let action = match self.tool {
            Tool::Pencil | Tool::Brush | Tool::Eraser => ToolAction::Stroke {
                label: match self.tool {
                    Tool::Pencil => "Pencil Stroke",
                    Tool::Eraser => "Eraser Stroke",
                    _ => "Brush Stroke",
                },
                ctx: self.context.clone(),
                points,
            },
            Tool::Line | Tool::Rectangle | Tool::Ellipse => ToolAction::Shape {
                ctx: self.context.clone(),
                kind: self.tool.shape_kind()?,
                start,
                end,
                modifiers: self.modifiers,
            },
            Tool::Bucket => ToolAction::Fill {
                ctx: self.context.clone(),
                seed: end,
                contiguous: self.contiguous,
            },
            Tool::SelectRect => ToolAction::Select {
                shape: SelectionShape::Rectangle(
                    crate::ops::stroke::shape_rect(start, end, self.modifiers),
                ),
                mode: self.selection_mode,
            },
            Tool::SelectEllipse => ToolAction::Select {
                shape: SelectionShape::Ellipse(
                    crate::ops::stroke::shape_rect(start, end, self.modifiers),
                ),
                mode: self.selection_mode,
            },
            Tool::SelectLasso => ToolAction::Select {
                shape: SelectionShape::Lasso(points),
                mode: self.selection_mode,
            },
            Tool::SelectColor => ToolAction::Select {
                shape: SelectionShape::FloodByColor {
                    seed: end,
                    contiguous: self.contiguous,
                },
                mode: self.selection_mode,
            },
            Tool::Move => ToolAction::Move {
                dx: end.0.saturating_sub(start.0),
                dy: end.1.saturating_sub(start.1),
            },
            Tool::Picker => ToolAction::Pick { point: end },
        };
        Some(action)
    }

    /// Abort the gesture; nothing is produced.
    pub fn cancel(&mut self) {
        self.active = false;
        self.points.clear();
    }

    /// Rasterize the in-progress gesture for display. Visual only: the
    /// returned coverage is never committed.
    pub fn preview(
        &self,
        width: u32,
        height: u32,
        selection: Option<&Selection>,
    ) -> Result<Option<StrokeRaster>> {
        if !self.active || !self.tool.paints() || self.points.is_empty() {
            return Ok(None);
        }
        let mut engine = StrokeEngine::new(&self.context, selection, width, height)?;
        match self.tool.shape_kind() {
            Some(kind) => {
                let start = self.points[0];
                let end = *self.points.last().unwrap_or(&start);
                engine.shape(kind, start, end, self.modifiers);
            }
            None => engine.path(&self.points),
        }
        Ok(Some(engine.finish()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_positions_default_axis() {
        let m = MirrorConfig::new(MirrorMode::Both);
        let pts: Vec<_> = m.positions(1, 2, 8, 6).iter().copied().collect();
        assert_eq!(pts, vec![(1, 2), (6, 2), (1, 3), (6, 3)]);
    }

    #[test]
    fn test_mirror_custom_axis() {
        let m = MirrorConfig::new(MirrorMode::X).with_axes(Some(4.0), None);
        let pts: Vec<_> = m.positions(1, 0, 8, 8).iter().copied().collect();
        assert_eq!(pts, vec![(1, 0), (7, 0)]);
    }

    #[test]
    fn test_mirror_mode_cycle() {
        assert_eq!(MirrorMode::None.next(), MirrorMode::X);
        assert_eq!(MirrorMode::Both.next(), MirrorMode::None);
        assert!(MirrorMode::Y.mirrors_y());
        assert!(!MirrorMode::Y.mirrors_x());
    }

    #[test]
    fn test_session_snapshots_context() {
        let mut ctx = DrawingContext::default().with_color(Rgba([255, 0, 0, 255]));
        let mut session = ToolSession::new(Tool::Brush);
        session.on_point(&ctx, (1, 1), ShapeModifiers::default());
        ctx.color = Rgba([0, 255, 0, 255]);
        assert_eq!(session.context().color, Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_brush_session_collects_points() {
        let ctx = DrawingContext::default();
        let mut session = ToolSession::new(Tool::Brush);
        session.on_point(&ctx, (0, 0), ShapeModifiers::default());
        session.on_drag((1, 0), ShapeModifiers::default());
        session.on_drag((1, 0), ShapeModifiers::default());
        let action = session.on_release((2, 1), ShapeModifiers::default()).unwrap();
        assert_eq!(
            action,
            ToolAction::Stroke {
                label: "Brush Stroke",
                ctx: ctx.clone(),
                points: vec![(0, 0), (1, 0), (2, 1)],
            }
        );
        assert!(!session.is_active());
    }

    #[test]
    fn test_shape_session_keeps_anchor() {
        let ctx = DrawingContext::default();
        let mut session = ToolSession::new(Tool::Rectangle);
        session.on_point(&ctx, (2, 2), ShapeModifiers::default());
        session.on_drag((5, 9), ShapeModifiers::default());
        let action = session.on_release((6, 6), ShapeModifiers::default()).unwrap();
        match action {
            ToolAction::Shape { start, end, kind, .. } => {
                assert_eq!(kind, ShapeKind::Rectangle);
                assert_eq!(start, (2, 2));
                assert_eq!(end, (6, 6));
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn test_cancel_produces_nothing() {
        let ctx = DrawingContext::default();
        let mut session = ToolSession::new(Tool::Pencil);
        session.on_point(&ctx, (0, 0), ShapeModifiers::default());
        session.cancel();
        assert!(session.on_release((3, 3), ShapeModifiers::default()).is_none());
        assert!(session.preview(8, 8, None).unwrap().is_none());
    }

    #[test]
    fn test_pencil_and_eraser_specialize_context() {
        let ctx = DrawingContext::default().with_width(5);
        let mut pencil = ToolSession::new(Tool::Pencil);
        pencil.on_point(&ctx, (0, 0), ShapeModifiers::default());
        assert_eq!(pencil.context().brush_width, 1);
        assert!(pencil.context().pixel_perfect);

        let mut eraser = ToolSession::new(Tool::Eraser);
        eraser.on_point(&ctx, (0, 0), ShapeModifiers::default());
        assert!(eraser.context().erase);
        match eraser.on_release((2, 0), ShapeModifiers::default()).unwrap() {
            ToolAction::Stroke { ctx, .. } => assert!(ctx.erase),
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn test_move_gesture_reports_offset() {
        let ctx = DrawingContext::default();
        let mut session = ToolSession::new(Tool::Move);
        session.on_point(&ctx, (4, 4), ShapeModifiers::default());
        session.on_drag((9, 9), ShapeModifiers::default());
        let action = session.on_release((2, 7), ShapeModifiers::default());
        assert_eq!(action, Some(ToolAction::Move { dx: -2, dy: 3 }));
    }

    #[test]
    fn test_preview_does_not_need_layer() {
        let ctx = DrawingContext::default();
        let mut session = ToolSession::new(Tool::Line);
        session.on_point(&ctx, (0, 0), ShapeModifiers::default());
        session.on_drag((3, 0), ShapeModifiers::default());
        let raster = session.preview(8, 8, None).unwrap().unwrap();
        assert_eq!(raster.covered_count(), 4);
    }
}
