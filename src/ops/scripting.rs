use std::sync::{Arc, Mutex};
use std::time::Instant;

use image::Rgba;
use rhai::{AST, Array, Dynamic, Engine, EvalAltResult, ImmutableString, Position, Scope};

use crate::canvas::{PixelRect, RasterBuffer, TRANSPARENT, blend_pixel};
use crate::components::history::{Command, PixelPatch};
use crate::components::layers::Layer;
use crate::components::tools::{BrushShape, DrawingContext, MAX_BRUSH_WIDTH, MirrorConfig, MirrorMode};
use crate::document::{CanvasState, Document};
use crate::error::EditorError;
use crate::ops::fill::{FloodOptions, flood_fill_seeds, mirrored_seeds};
use crate::ops::stroke::rasterize_path;
use crate::selection::{Selection, SelectionMode, SelectionShape, permits};

/// History label for a script run.
pub const SCRIPT_LABEL: &str = "Run Script";

// ============================================================================
// Error type
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptError {
    pub message: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl ScriptError {
    fn at(message: String, pos: Position) -> Self {
        Self {
            message,
            line: pos.line().filter(|&l| l > 0),
            column: pos.position().filter(|&c| c > 0),
        }
    }
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let (Some(line), Some(col)) = (self.line, self.column) {
            write!(f, "Line {}, Col {}: {}", line, col, self.message)
        } else if let Some(line) = self.line {
            write!(f, "Line {}: {}", line, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ScriptError {}

impl From<Box<EvalAltResult>> for ScriptError {
    fn from(e: Box<EvalAltResult>) -> Self {
        let pos = e.position();
        Self::at(e.to_string(), pos)
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, Default)]
pub struct ScriptOutcome {
    /// Whether a command was recorded on the document.
    pub applied: bool,
    pub console_output: Vec<String>,
    pub elapsed_ms: u64,
}

// ============================================================================
// Script context: shared mutable state between engine and host functions
// ============================================================================

/// Uncommitted pixel edits on one layer.
struct PendingEdit {
    layer: usize,
    original: RasterBuffer,
    dirty: PixelRect,
}

struct ScriptContext {
    /// Working copy of the document; the real one is only touched on success.
    state: CanvasState,
    brush: DrawingContext,
    /// Fresh (never applied) commands reproducing every change made to `state`.
    commands: Vec<Command>,
    pending: Option<PendingEdit>,
    console_output: Vec<String>,
}

type SharedContext = Arc<Mutex<ScriptContext>>;

/// A document shared with the scripting host.
pub type SharedDocument = Arc<Mutex<Document>>;

type HostResult<T> = Result<T, Box<EvalAltResult>>;

fn host_err(e: EditorError) -> Box<EvalAltResult> {
    e.to_string().into()
}

impl ScriptContext {
    fn new(state: CanvasState, brush: DrawingContext) -> Self {
        Self {
            state,
            brush,
            commands: Vec::new(),
            pending: None,
            console_output: Vec::new(),
        }
    }

    /// Start (or continue) a pixel edit on the active layer.
    fn begin_edit(&mut self) -> Result<(), EditorError> {
        let active = self.state.layers.active_index();
        if self.pending.as_ref().is_some_and(|p| p.layer == active) {
            return Ok(());
        }
        self.flush()?;
        self.pending = Some(PendingEdit {
            layer: active,
            original: self.state.layers.active().pixels.clone(),
            dirty: PixelRect::default(),
        });
        Ok(())
    }

    fn mark_dirty(&mut self, rect: PixelRect) {
        if let Some(pending) = &mut self.pending {
            pending.dirty = pending.dirty.union(&rect);
        }
    }

    /// Turn accumulated pixel edits into one patch command.
    fn flush(&mut self) -> Result<(), EditorError> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        if pending.dirty.is_empty() {
            return Ok(());
        }
        let before = PixelPatch::capture(&pending.original, pending.dirty)?;
        let after = PixelPatch::capture(&self.state.layers.get(pending.layer)?.pixels, pending.dirty)?;
        if before == after {
            return Ok(());
        }
        self.commands
            .push(Command::draw("Script Edit", pending.layer, before, after, Some(self.brush.clone()))?);
        Ok(())
    }

    /// Record a structural command and run it on the working copy.
    fn structural(&mut self, command: Command) -> Result<(), EditorError> {
        self.flush()?;
        let mut applied = command.clone();
        applied.apply(&mut self.state)?;
        self.commands.push(command);
        Ok(())
    }

    fn paint_color(&self) -> Rgba<u8> {
        if self.brush.erase { TRANSPARENT } else { self.brush.color }
    }
}

fn channel(v: i64) -> u8 {
    v.clamp(0, 255) as u8
}

/// Largest coordinate or extent magnitude a script may pass.
const MAX_SCRIPT_COORD: u32 = 1 << 24;

fn coord(name: &str, v: i64) -> HostResult<i32> {
    i32::try_from(v)
        .ok()
        .filter(|c| c.unsigned_abs() <= MAX_SCRIPT_COORD)
        .ok_or_else(|| format!("{name} {v} is out of range").into())
}

fn extent(name: &str, v: i64) -> HostResult<u32> {
    coord(name, v.max(0)).map(|v| v as u32)
}

fn lock(ctx: &SharedContext) -> std::sync::MutexGuard<'_, ScriptContext> {
    ctx.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// Engine construction with full sandbox + API registration
// ============================================================================

fn sandboxed_engine() -> Engine {
    let mut engine = Engine::new();

    // ── Sandbox limits ──
    engine.set_max_operations(50_000_000);
    engine.set_max_call_levels(64);
    engine.set_max_expr_depths(64, 64);
    engine.set_max_string_size(10_000);
    engine.set_max_array_size(10_000);
    engine.set_max_map_size(1_000);

    engine
}

fn create_engine(ctx: SharedContext) -> Engine {
    let mut engine = sandboxed_engine();

    register_canvas_api(&mut engine, ctx.clone());
    register_pixel_api(&mut engine, ctx.clone());
    register_layer_api(&mut engine, ctx.clone());
    register_selection_api(&mut engine, ctx.clone());
    register_brush_api(&mut engine, ctx.clone());

    let c = ctx;
    engine.on_print(move |msg| {
        lock(&c).console_output.push(msg.to_string());
    });

    engine
}

// ============================================================================
// Canvas info API
// ============================================================================

fn register_canvas_api(engine: &mut Engine, ctx: SharedContext) {
    let c = ctx.clone();
    engine.register_fn("width", move || -> i64 { lock(&c).state.width() as i64 });

    let c = ctx.clone();
    engine.register_fn("height", move || -> i64 { lock(&c).state.height() as i64 });

    let c = ctx.clone();
    engine.register_fn("layer_count", move || -> i64 { lock(&c).state.layers.len() as i64 });

    let c = ctx;
    engine.register_fn("active_layer", move || -> i64 { lock(&c).state.layers.active_index() as i64 });
}

// ============================================================================
// Pixel API (active layer)
// ============================================================================

fn register_pixel_api(engine: &mut Engine, ctx: SharedContext) {
    // get_pixel(x, y) -> [r, g, b, a]; out of range reads as transparent
    let c = ctx.clone();
    engine.register_fn("get_pixel", move |x: i64, y: i64| -> Array {
        let lock = lock(&c);
        let px = i32::try_from(x)
            .ok()
            .zip(i32::try_from(y).ok())
            .and_then(|(x, y)| lock.state.layers.active().pixels.get(x, y).ok())
            .unwrap_or(TRANSPARENT);
        px.0.iter().map(|&v| Dynamic::from(v as i64)).collect()
    });

    // set_pixel(x, y, r, g, b, a): replaces the pixel, honoring the selection
    let c = ctx.clone();
    engine.register_fn(
        "set_pixel",
        move |x: i64, y: i64, r: i64, g: i64, b: i64, a: i64| -> HostResult<()> {
            let mut lock = lock(&c);
            let (Ok(x), Ok(y)) = (i32::try_from(x), i32::try_from(y)) else {
                return Ok(());
            };
            if !lock.state.layers.active().pixels.in_bounds(x, y) || !permits(lock.state.selection.as_ref(), x, y) {
                return Ok(());
            }
            lock.begin_edit().map_err(host_err)?;
            let color = Rgba([channel(r), channel(g), channel(b), channel(a)]);
            lock.state.layers.active_mut().pixels.set(x, y, color).map_err(host_err)?;
            lock.mark_dirty(PixelRect::new(x, y, 1, 1));
            Ok(())
        },
    );

    // fill_rect(x, y, w, h) with the brush color, clipped to canvas + selection
    let c = ctx.clone();
    engine.register_fn("fill_rect", move |x: i64, y: i64, w: i64, h: i64| -> HostResult<()> {
        let rect = PixelRect::new(coord("x", x)?, coord("y", y)?, extent("width", w)?, extent("height", h)?);
        let mut guard = lock(&c);
        let ctx = &mut *guard;
        let rect = rect.clamp_to(ctx.state.width(), ctx.state.height());
        if rect.is_empty() {
            return Ok(());
        }
        ctx.begin_edit().map_err(host_err)?;
        let color = ctx.paint_color();
        let erase = ctx.brush.erase;
        let selection = ctx.state.selection.as_ref();
        let pixels = &mut ctx.state.layers.active_mut().pixels;
        for (px, py) in rect.points() {
            if !permits(selection, px, py) {
                continue;
            }
            let (ux, uy) = (px as u32, py as u32);
            let out = if erase { TRANSPARENT } else { blend_pixel(pixels.pixel(ux, uy), color, 1.0) };
            pixels.put(ux, uy, out);
        }
        ctx.mark_dirty(rect);
        Ok(())
    });

    // draw_line(x0, y0, x1, y1) with the current brush
    let c = ctx.clone();
    engine.register_fn("draw_line", move |x0: i64, y0: i64, x1: i64, y1: i64| -> HostResult<()> {
        let points = [(coord("x0", x0)?, coord("y0", y0)?), (coord("x1", x1)?, coord("y1", y1)?)];
        let mut guard = lock(&c);
        let ctx = &mut *guard;
        let raster = rasterize_path(
            &ctx.brush,
            ctx.state.selection.as_ref(),
            ctx.state.width(),
            ctx.state.height(),
            &points,
        )
        .map_err(host_err)?;
        if raster.is_empty() {
            return Ok(());
        }
        ctx.begin_edit().map_err(host_err)?;
        raster.paint(&ctx.brush, &mut ctx.state.layers.active_mut().pixels, (0, 0));
        ctx.mark_dirty(raster.dirty());
        Ok(())
    });

    // flood_fill(x, y): contiguous, mirrored like the brush, toroidal when
    // wrap is on
    let c = ctx;
    engine.register_fn("flood_fill", move |x: i64, y: i64| -> HostResult<bool> {
        let seed = (coord("x", x)?, coord("y", y)?);
        let mut guard = lock(&c);
        let ctx = &mut *guard;
        let options = FloodOptions {
            toroidal: ctx.brush.wrap,
            contiguous: true,
        };
        let color = ctx.paint_color();
        let seeds = mirrored_seeds(&ctx.brush.mirror, seed, ctx.state.width(), ctx.state.height(), ctx.brush.wrap);
        ctx.begin_edit().map_err(host_err)?;
        let selection = ctx.state.selection.as_ref();
        let pixels = &mut ctx.state.layers.active_mut().pixels;
        let filled = flood_fill_seeds(pixels, &seeds, color, options, selection);
        if let Some(rect) = filled {
            ctx.mark_dirty(rect);
        }
        Ok(filled.is_some())
    });
}

// ============================================================================
// Layer API (structural: each call is its own command)
// ============================================================================

fn register_layer_api(engine: &mut Engine, ctx: SharedContext) {
    fn add_layer(ctx: &SharedContext, name: Option<&str>) -> HostResult<i64> {
        let mut lock = lock(ctx);
        let (w, h) = (lock.state.width(), lock.state.height());
        let name = match name {
            Some(n) => n.to_string(),
            None => format!("Layer {}", lock.state.layers.len() + 1),
        };
        let layer = Layer::new(name, w, h).map_err(host_err)?;
        let previous_active = lock.state.layers.active_index();
        let index = previous_active + 1;
        lock.structural(Command::AddLayer {
            index,
            layer,
            previous_active,
        })
        .map_err(host_err)?;
        Ok(index as i64)
    }

    let c = ctx.clone();
    engine.register_fn("add_layer", move || add_layer(&c, None));

    let c = ctx.clone();
    engine.register_fn("add_layer", move |name: ImmutableString| add_layer(&c, Some(name.as_str())));

    let c = ctx;
    engine.register_fn("set_active_layer", move |index: i64| -> HostResult<()> {
        let Ok(index) = usize::try_from(index) else {
            return Err(format!("layer index {index} out of range").into());
        };
        let mut lock = lock(&c);
        if index == lock.state.layers.active_index() {
            return Ok(());
        }
        lock.structural(Command::SetActive { index, previous: None })
            .map_err(host_err)
    });
}

// ============================================================================
// Selection API
// ============================================================================

fn register_selection_api(engine: &mut Engine, ctx: SharedContext) {
    fn set_selection(ctx: &mut ScriptContext, after: Option<Selection>) -> HostResult<()> {
        if after == ctx.state.selection {
            return Ok(());
        }
        let before = ctx.state.selection.clone();
        ctx.structural(Command::Selection { before, after }).map_err(host_err)
    }

    let c = ctx.clone();
    engine.register_fn("select_rect", move |x: i64, y: i64, w: i64, h: i64| -> HostResult<()> {
        let rect = PixelRect::new(coord("x", x)?, coord("y", y)?, extent("width", w)?, extent("height", h)?);
        let mut guard = lock(&c);
        let ctx = &mut *guard;
        let mask = SelectionShape::Rectangle(rect)
            .rasterize(ctx.state.width(), ctx.state.height(), None)
            .map_err(host_err)?;
        let after = Selection::resolve(ctx.state.selection.as_ref(), mask, SelectionMode::Replace).map_err(host_err)?;
        set_selection(ctx, after)
    });

    let c = ctx;
    engine.register_fn("select_none", move || -> HostResult<()> { set_selection(&mut lock(&c), None) });
}

// ============================================================================
// Brush settings API
// ============================================================================

fn register_brush_api(engine: &mut Engine, ctx: SharedContext) {
    let c = ctx.clone();
    engine.register_fn("set_color", move |r: i64, g: i64, b: i64, a: i64| {
        lock(&c).brush.color = Rgba([channel(r), channel(g), channel(b), channel(a)]);
    });

    let c = ctx.clone();
    engine.register_fn("set_color", move |r: i64, g: i64, b: i64| {
        lock(&c).brush.color = Rgba([channel(r), channel(g), channel(b), 255]);
    });

    let c = ctx.clone();
    engine.register_fn("set_brush", move |width: i64| {
        let mut lock = lock(&c);
        lock.brush.brush_width = width.clamp(1, MAX_BRUSH_WIDTH as i64) as u32;
    });

    let c = ctx.clone();
    engine.register_fn("set_brush", move |width: i64, shape: ImmutableString| -> HostResult<()> {
        let shape = match shape.as_str() {
            "circle" => BrushShape::Circle,
            "square" => BrushShape::Square,
            other => return Err(format!("unknown brush shape '{other}' (use \"circle\" or \"square\")").into()),
        };
        let mut lock = lock(&c);
        lock.brush.brush_width = width.clamp(1, MAX_BRUSH_WIDTH as i64) as u32;
        lock.brush.brush_shape = shape;
        Ok(())
    });

    let c = ctx.clone();
    engine.register_fn("set_mirror", move |mode: ImmutableString| -> HostResult<()> {
        let mode = match mode.as_str() {
            "none" => MirrorMode::None,
            "x" => MirrorMode::X,
            "y" => MirrorMode::Y,
            "both" => MirrorMode::Both,
            other => return Err(format!("unknown mirror mode '{other}'").into()),
        };
        lock(&c).brush.mirror = MirrorConfig::new(mode);
        Ok(())
    });

    let c = ctx.clone();
    engine.register_fn("set_wrap", move |wrap: bool| {
        lock(&c).brush.wrap = wrap;
    });

    let c = ctx;
    engine.register_fn("set_erase", move |erase: bool| {
        lock(&c).brush.erase = erase;
    });
}

// ============================================================================
// Public execution API
// ============================================================================

/// Compile a script without running it.
pub fn compile_script(source: &str) -> Result<AST, ScriptError> {
    sandboxed_engine()
        .compile(source)
        .map_err(|e| ScriptError::at(e.to_string(), e.position()))
}

/// Run `source` against `doc`, starting from the brush in `brush`.
///
/// The script works on a copy of the document. On success every change is
/// applied as a single composite command, so one undo reverts the whole run.
/// On failure the document is left untouched.
pub fn run_script(doc: &mut Document, source: &str, brush: &DrawingContext) -> Result<ScriptOutcome, ScriptError> {
    let start = Instant::now();
    let ctx = Arc::new(Mutex::new(ScriptContext::new(doc.state().clone(), brush.clone())));
    let engine = create_engine(ctx.clone());

    let ast = engine
        .compile(source)
        .map_err(|e| ScriptError::at(e.to_string(), e.position()))?;
    let mut scope = Scope::new();
    engine.run_ast_with_scope(&mut scope, &ast)?;
    drop(engine);

    let mut lock = lock(&ctx);
    lock.flush().map_err(|e| ScriptError::at(e.to_string(), Position::NONE))?;
    let commands = std::mem::take(&mut lock.commands);
    let console_output = std::mem::take(&mut lock.console_output);
    drop(lock);

    let applied = !commands.is_empty();
    if applied {
        doc.apply(Command::composite(SCRIPT_LABEL, commands))
            .map_err(|e| ScriptError::at(e.to_string(), Position::NONE))?;
    }

    let elapsed_ms = start.elapsed().as_millis() as u64;
    log::debug!("script finished in {elapsed_ms} ms (applied: {applied})");
    Ok(ScriptOutcome {
        applied,
        console_output,
        elapsed_ms,
    })
}

/// Run a script against a shared document, holding its lock for the run.
pub fn run_script_shared(
    doc: &SharedDocument,
    source: &str,
    brush: &DrawingContext,
) -> Result<ScriptOutcome, ScriptError> {
    let mut guard = doc.lock().unwrap_or_else(|e| e.into_inner());
    run_script(&mut guard, source, brush)
}
