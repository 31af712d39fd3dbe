use std::collections::HashSet;

use image::Rgba;

use pixelportal::canvas::{PixelRect, RasterBuffer, Rotation};
use pixelportal::components::history::{Command, PixelPatch};
use pixelportal::components::layers::{LastLayerPolicy, Layer, LayerStack};
use pixelportal::components::tools::{BrushShape, DrawingContext, MirrorConfig, MirrorMode};
use pixelportal::document::{Document, FlipScope};
use pixelportal::error::EditorError;
use pixelportal::ops::fill::{FloodOptions, flood_fill, flood_region};
use pixelportal::ops::stroke::{ShapeKind, ShapeModifiers};
use pixelportal::selection::{SelectionMode, SelectionShape};
use pixelportal::settings::EditorSettings;

const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

fn painted(buffer: &RasterBuffer) -> HashSet<(i32, i32)> {
    buffer
        .iter_pixels()
        .filter(|(_, _, p)| p.0[3] != 0)
        .map(|(x, y, _)| (x as i32, y as i32))
        .collect()
}

fn changed(before: &RasterBuffer, after: &RasterBuffer) -> HashSet<(i32, i32)> {
    before
        .iter_pixels()
        .zip(after.iter_pixels())
        .filter(|((_, _, a), (_, _, b))| a != b)
        .map(|((x, y, _), _)| (x as i32, y as i32))
        .collect()
}

// ----------------------------------------------------------------------------
// Undo / redo
// ----------------------------------------------------------------------------

#[test]
fn undo_then_redo_reproduces_every_composite() {
    let mut doc = Document::new("round-trip", 24, 20).unwrap();
    let mut states = vec![doc.composite().unwrap()];
    // Keep one composite per recorded history step.
    fn record(doc: &Document, states: &mut Vec<RasterBuffer>) {
        if doc.history().undo_count() == states.len() {
            states.push(doc.composite().unwrap());
        }
    }

    let pen = DrawingContext::default().with_color(RED).with_width(3);
    let mirrored = pen
        .clone()
        .with_color(BLUE)
        .with_mirror(MirrorConfig::new(MirrorMode::Both));
    let wrapped = pen.clone().with_shape(BrushShape::Square).with_wrap(true).with_width(4);

    doc.stroke(&pen, &[(2, 2), (10, 6), (12, 15)]).unwrap();
    record(&doc, &mut states);
    doc.stroke(&mirrored, &[(1, 1), (5, 3)]).unwrap();
    record(&doc, &mut states);
    doc.stroke(&wrapped, &[(23, 19), (22, 0)]).unwrap();
    record(&doc, &mut states);
    doc.add_layer("Top").unwrap();
    record(&doc, &mut states);
    doc.draw_shape(
        &pen,
        ShapeKind::Ellipse,
        (3, 3),
        (15, 11),
        ShapeModifiers {
            filled: true,
            ..Default::default()
        },
    )
    .unwrap();
    record(&doc, &mut states);
    doc.set_layer_opacity(1, 0.4).unwrap();
    record(&doc, &mut states);
    doc.fill(&DrawingContext::default().with_color(WHITE), (0, 19), true)
        .unwrap();
    record(&doc, &mut states);
    doc.select(&SelectionShape::Rectangle(PixelRect::new(4, 4, 10, 10)), SelectionMode::Replace)
        .unwrap();
    record(&doc, &mut states);
    doc.clear_layer().unwrap();
    record(&doc, &mut states);
    doc.move_layer(1, 0).unwrap();
    record(&doc, &mut states);
    doc.flip(true, false, FlipScope::Document).unwrap();
    record(&doc, &mut states);
    doc.rotate_canvas(Rotation::Cw90).unwrap();
    record(&doc, &mut states);
    doc.merge_down(1).unwrap();
    record(&doc, &mut states);
    doc.resize_canvas(30, 30).unwrap();
    record(&doc, &mut states);

    let steps = doc.history().undo_count();
    assert_eq!(steps, states.len() - 1);
    assert!(steps >= 12);

    for i in (0..steps).rev() {
        doc.undo().unwrap();
        assert_eq!(doc.composite().unwrap(), states[i], "after undoing to step {i}");
    }
    assert_eq!(doc.composite().unwrap().as_raw(), states[0].as_raw());

    for (i, expected) in states.iter().enumerate().skip(1) {
        doc.redo().unwrap();
        assert_eq!(&doc.composite().unwrap(), expected, "after redoing step {i}");
    }
    assert_eq!(doc.undo().unwrap().as_deref(), Some("Resize Canvas"));
}

// ----------------------------------------------------------------------------
// Mirror
// ----------------------------------------------------------------------------

#[test]
fn mirrored_stamps_land_on_reflection_with_same_color() {
    let axis = 5.0;
    let ctx = DrawingContext::default()
        .with_color(RED)
        .with_mirror(MirrorConfig::new(MirrorMode::X).with_axes(Some(axis), None));

    for &(x, y) in &[(0, 0), (2, 7), (5, 3), (9, 9), (12, 4)] {
        let mut doc = Document::new("mirror", 16, 12).unwrap();
        doc.stroke(&ctx, &[(x, y)]).unwrap();
        let mx = (2.0 * axis) as i32 - x;
        assert_eq!(doc.sample_color(x, y).unwrap(), RED);
        if (0..16).contains(&mx) {
            assert_eq!(doc.sample_color(mx, y).unwrap(), RED, "reflection of ({x},{y})");
        }
    }
}

#[test]
fn pattern_strokes_stay_symmetric() {
    let mut pattern = RasterBuffer::new(3, 2).unwrap();
    pattern.set(0, 0, RED).unwrap();
    pattern.set(1, 0, BLUE).unwrap();
    pattern.set(2, 0, WHITE).unwrap();
    pattern.set(0, 1, BLACK).unwrap();
    pattern.set(1, 1, Rgba([0, 255, 0, 255])).unwrap();
    pattern.set(2, 1, Rgba([9, 9, 9, 255])).unwrap();

    let ctx = DrawingContext::default()
        .with_pattern(pattern)
        .with_mirror(MirrorConfig::new(MirrorMode::X));
    let mut doc = Document::new("pattern", 17, 9).unwrap();
    doc.stroke(&ctx, &[(2, 2), (6, 5), (3, 7)]).unwrap();

    let layer = &doc.layers().active().pixels;
    let covered = painted(layer);
    assert!(!covered.is_empty());
    for &(x, y) in &covered {
        // axis (17 - 1) / 2 = 8
        let mx = 16 - x;
        assert_eq!(layer.get(x, y).unwrap(), layer.get(mx, y).unwrap(), "({x},{y}) vs ({mx},{y})");
    }
}

#[test]
fn mirror_respects_selection_on_each_side() {
    let mut doc = Document::new("mirror-sel", 16, 8).unwrap();
    doc.select(&SelectionShape::Rectangle(PixelRect::new(0, 0, 8, 8)), SelectionMode::Replace)
        .unwrap();
    let ctx = DrawingContext::default()
        .with_color(RED)
        .with_mirror(MirrorConfig::new(MirrorMode::X));
    doc.stroke(&ctx, &[(3, 3)]).unwrap();
    assert_eq!(doc.sample_color(3, 3).unwrap().0[3], 255);
    assert_eq!(doc.sample_color(12, 3).unwrap().0[3], 0);
}

// ----------------------------------------------------------------------------
// Wraparound
// ----------------------------------------------------------------------------

#[test]
fn stamp_straddling_right_edge() {
    let brush = DrawingContext::default()
        .with_color(RED)
        .with_shape(BrushShape::Square)
        .with_width(4);
    // A 4px square centred on (15, 4) spans columns 13..=16 and rows 2..=5.
    let rows = 2..6;

    let mut clipped = Document::new("clip", 16, 8).unwrap();
    clipped.stroke(&brush, &[(15, 4)]).unwrap();
    let expected: HashSet<_> = (13..16).flat_map(|x| rows.clone().map(move |y| (x, y))).collect();
    assert_eq!(painted(&clipped.layers().active().pixels), expected);

    let mut wrapped = Document::new("wrap", 16, 8).unwrap();
    wrapped.stroke(&brush.clone().with_wrap(true), &[(15, 4)]).unwrap();
    let mut expected_wrapped = expected.clone();
    expected_wrapped.extend(rows.clone().map(|y| (0, y)));
    assert_eq!(painted(&wrapped.layers().active().pixels), expected_wrapped);

    wrapped.undo().unwrap();
    assert!(painted(&wrapped.layers().active().pixels).is_empty());
}

// ----------------------------------------------------------------------------
// Selection clipping
// ----------------------------------------------------------------------------

fn paint_session(doc: &mut Document) {
    let pen = DrawingContext::default().with_color(RED).with_width(3);
    doc.stroke(&pen, &[(0, 0), (19, 19)]).unwrap();
    doc.stroke(&pen.clone().with_shape(BrushShape::Square), &[(0, 10), (19, 10)])
        .unwrap();
    doc.draw_shape(
        &pen.clone().with_color(BLUE).with_width(1),
        ShapeKind::Rectangle,
        (2, 2),
        (17, 14),
        ShapeModifiers::default(),
    )
    .unwrap();
}

#[test]
fn selection_mask_clips_every_write() {
    let mask_rect = PixelRect::new(4, 4, 8, 8);
    let mut doc = Document::new("clip", 20, 20).unwrap();
    let blank = doc.layers().active().pixels.clone();

    doc.select(&SelectionShape::Rectangle(mask_rect), SelectionMode::Replace)
        .unwrap();
    paint_session(&mut doc);
    doc.fill(&DrawingContext::default().with_color(WHITE), (5, 5), true)
        .unwrap();
    let masked = changed(&blank, &doc.layers().active().pixels);
    assert!(!masked.is_empty());
    assert!(masked.iter().all(|&(x, y)| mask_rect.contains(x, y)));

    // Same strokes without a mask reach the excluded pixels too.
    let mut free = Document::new("free", 20, 20).unwrap();
    paint_session(&mut free);
    let unmasked = changed(&blank, &free.layers().active().pixels);
    let strokes_only = {
        let mut d = Document::new("strokes", 20, 20).unwrap();
        d.select(&SelectionShape::Rectangle(mask_rect), SelectionMode::Replace)
            .unwrap();
        paint_session(&mut d);
        changed(&blank, &d.layers().active().pixels)
    };
    let inside: HashSet<_> = unmasked
        .iter()
        .copied()
        .filter(|&(x, y)| mask_rect.contains(x, y))
        .collect();
    assert_eq!(inside, strokes_only);
    assert!(unmasked.iter().any(|&(x, y)| !mask_rect.contains(x, y)));
}

// ----------------------------------------------------------------------------
// Flood fill
// ----------------------------------------------------------------------------

#[test]
fn flood_fill_covers_exactly_the_enclosed_region() {
    let mut buffer = RasterBuffer::filled(12, 10, WHITE).unwrap();
    // Closed ring from (2,2) to (7,6); interior is 4x3.
    for x in 2..=7 {
        buffer.set(x, 2, BLACK).unwrap();
        buffer.set(x, 6, BLACK).unwrap();
    }
    for y in 2..=6 {
        buffer.set(2, y, BLACK).unwrap();
        buffer.set(7, y, BLACK).unwrap();
    }
    let original = buffer.clone();

    let region = flood_region(&buffer, (4, 4), FloodOptions::default(), None).unwrap();
    assert_eq!(region.count, 12);

    let rect = flood_fill(&mut buffer, (4, 4), RED, FloodOptions::default(), None).unwrap();
    assert_eq!(rect, PixelRect::new(3, 3, 4, 3));
    let touched = changed(&original, &buffer);
    assert_eq!(touched.len(), 12);
    assert!(touched.iter().all(|&(x, y)| (3..7).contains(&x) && (3..6).contains(&y)));
}

#[test]
fn toroidal_flood_spans_the_edge() {
    let mut buffer = RasterBuffer::filled(10, 6, WHITE).unwrap();
    for y in 0..6 {
        buffer.set(2, y, BLACK).unwrap();
        buffer.set(7, y, BLACK).unwrap();
    }
    let original = buffer.clone();
    let toroidal = FloodOptions {
        toroidal: true,
        contiguous: true,
    };

    // Columns 8, 9, 0 and 1 join across the edge.
    assert_eq!(flood_region(&buffer, (0, 0), toroidal, None).unwrap().count, 24);
    assert_eq!(flood_region(&buffer, (0, 0), FloodOptions::default(), None).unwrap().count, 12);

    flood_fill(&mut buffer, (9, 3), RED, toroidal, None).unwrap();
    let touched = changed(&original, &buffer);
    assert_eq!(touched.len(), 24);
    assert!(touched.iter().all(|&(x, _)| [8, 9, 0, 1].contains(&x)));
    assert_eq!(buffer.get(5, 3).unwrap(), WHITE);
}

/// 12x10 white canvas split into four 5x4 rooms by a black cross on the
/// mirror axes.
fn four_rooms() -> Document {
    let mut doc = Document::new("rooms", 12, 10).unwrap();
    let white = DrawingContext::default().with_color(WHITE);
    doc.fill(&white, (0, 0), true).unwrap();
    let wall = DrawingContext::default().with_color(BLACK).with_shape(BrushShape::Square);
    let solid = ShapeModifiers {
        filled: true,
        ..ShapeModifiers::default()
    };
    doc.draw_shape(&wall, ShapeKind::Rectangle, (5, 0), (6, 9), solid).unwrap();
    doc.draw_shape(&wall, ShapeKind::Rectangle, (0, 4), (11, 5), solid).unwrap();
    doc
}

#[test]
fn mirrored_fill_fills_both_sides() {
    let room = |x: i32, y: i32| (x < 5, y < 4);
    let cases = [
        (MirrorMode::X, vec![(true, true), (false, true)]),
        (MirrorMode::Y, vec![(true, true), (true, false)]),
        (MirrorMode::Both, vec![(true, true), (false, true), (true, false), (false, false)]),
    ];
    for (mode, rooms) in cases {
        let mut doc = four_rooms();
        let original = doc.composite().unwrap();
        let steps = doc.history().undo_count();
        let ctx = DrawingContext::default()
            .with_color(RED)
            .with_mirror(MirrorConfig::new(mode));

        assert!(doc.fill(&ctx, (1, 1), true).unwrap());
        assert_eq!(doc.history().undo_count(), steps + 1, "{mode:?}");
        let touched = changed(&original, &doc.composite().unwrap());
        assert_eq!(touched.len(), 20 * rooms.len(), "{mode:?}");
        assert!(touched.iter().all(|&(x, y)| rooms.contains(&room(x, y))), "{mode:?}");

        doc.undo().unwrap();
        assert_eq!(doc.composite().unwrap(), original);
    }
}

#[test]
fn mirrored_fill_seeded_on_the_axis() {
    // Odd width puts the vertical axis on column 5; the seed is its own
    // reflection.
    let mut doc = Document::new("axis", 11, 5).unwrap();
    let ctx = DrawingContext::default()
        .with_color(RED)
        .with_mirror(MirrorConfig::new(MirrorMode::X));
    assert!(doc.fill(&ctx, (5, 2), true).unwrap());
    assert_eq!(doc.history().undo_count(), 1);
    assert_eq!(painted(&doc.composite().unwrap()).len(), 55);
}

// ----------------------------------------------------------------------------
// Shapes
// ----------------------------------------------------------------------------

#[test]
fn thick_brush_small_rect_is_solid() {
    for (width, end) in [(4, (5, 4)), (3, (5, 5)), (2, (3, 6))] {
        let mut doc = Document::new("rect", 16, 16).unwrap();
        let ctx = DrawingContext::default()
            .with_color(RED)
            .with_shape(BrushShape::Square)
            .with_width(width);
        doc.draw_shape(&ctx, ShapeKind::Rectangle, (2, 2), end, ShapeModifiers::default())
            .unwrap();
        let expected: HashSet<_> = PixelRect::from_corners(2, 2, end.0, end.1).points().collect();
        assert_eq!(painted(&doc.composite().unwrap()), expected, "width {width}");
    }

    // Wide enough to keep a hole.
    let mut doc = Document::new("rect", 16, 16).unwrap();
    let ctx = DrawingContext::default().with_color(RED).with_width(1);
    doc.draw_shape(&ctx, ShapeKind::Rectangle, (2, 2), (8, 8), ShapeModifiers::default())
        .unwrap();
    assert_eq!(doc.sample_color(5, 5).unwrap().0[3], 0);
    assert_eq!(painted(&doc.composite().unwrap()).len(), 24);
}

// ----------------------------------------------------------------------------
// Composite atomicity
// ----------------------------------------------------------------------------

#[test]
fn failing_composite_leaves_document_untouched() {
    let mut doc = Document::new("atomic", 8, 8).unwrap();
    doc.stroke(&DrawingContext::default().with_color(RED), &[(1, 1), (6, 6)])
        .unwrap();
    doc.add_layer("Upper").unwrap();

    let layers_before = doc.layers().clone();
    let composite_before = doc.composite().unwrap();
    let depth_before = doc.history().undo_count();

    let rect = PixelRect::new(0, 0, 4, 4);
    let buffer = &doc.layers().active().pixels;
    let before = PixelPatch::capture(buffer, rect).unwrap();
    let after = PixelPatch::new(rect, RasterBuffer::filled(4, 4, BLUE).unwrap()).unwrap();
    let draw = Command::draw("Paint", 1, before, after, None).unwrap();
    let add = Command::AddLayer {
        index: 0,
        layer: Layer::new("Extra", 8, 8).unwrap(),
        previous_active: 1,
    };
    let broken = Command::SetOpacity {
        layer: 42,
        opacity: 0.5,
        previous: None,
    };

    let err = doc
        .apply(Command::composite("Batch", vec![draw, add, broken]))
        .unwrap_err();
    assert!(matches!(err, EditorError::CommandApplyFailure { index: 2, .. }));

    assert_eq!(doc.layers(), &layers_before);
    assert_eq!(doc.composite().unwrap(), composite_before);
    assert_eq!(doc.history().undo_count(), depth_before);
    assert!(!doc.history().can_redo());
}

// ----------------------------------------------------------------------------
// Last layer
// ----------------------------------------------------------------------------

#[test]
fn removing_last_layer_is_rejected() {
    let mut doc = Document::new("reject", 6, 6).unwrap();
    let err = doc.remove_layer(0).unwrap_err();
    assert!(matches!(err, EditorError::LastLayer));
    assert_eq!(doc.layers().len(), 1);
    assert!(!doc.history().can_undo());
}

#[test]
fn removing_last_layer_can_leave_a_blank_one() {
    let settings = EditorSettings {
        last_layer_policy: LastLayerPolicy::ReplaceWithBlank,
        ..Default::default()
    };
    let mut doc = Document::new("blank", 6, 6).unwrap().with_settings(&settings);
    doc.stroke(&DrawingContext::default().with_color(RED).with_width(2), &[(2, 2)])
        .unwrap();
    let old = doc.layers().active().clone();

    doc.remove_layer(0).unwrap();
    assert_eq!(doc.layers().len(), 1);
    let fresh = doc.layers().active();
    assert_ne!(fresh.id, old.id);
    assert!(painted(&fresh.pixels).is_empty());

    doc.undo().unwrap();
    assert_eq!(doc.layers().len(), 1);
    assert_eq!(doc.layers().active(), &old);
}

#[test]
fn layer_stack_never_empties() {
    for policy in [LastLayerPolicy::Reject, LastLayerPolicy::ReplaceWithBlank] {
        let mut stack = LayerStack::new(4, 4).unwrap().with_policy(policy);
        stack.add(Layer::new("a", 4, 4).unwrap(), 1).unwrap();
        for _ in 0..3 {
            let _ = stack.remove(0);
            assert!(!stack.is_empty());
        }
        assert_eq!(stack.len(), 1);
    }
}
