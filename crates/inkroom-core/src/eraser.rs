//! Vector eraser: splits strokes into fragments instead of clearing pixels.

use kurbo::Point;

use crate::geometry::{bounding_box, boxes_intersect, is_point_near_polyline, resample_points};
use crate::stroke::{Stroke, StrokeKind, generate_stroke_id};

/// Resampling spacing as a fraction of the eraser width. Fine spacing keeps
/// erase boundaries accurate to well under one segment length.
const RESAMPLE_DIVISOR: f64 = 8.0;

/// Outcome of running the eraser against one stroke.
#[derive(Debug, Clone)]
pub enum EraseOutcome {
    /// The eraser never touched the stroke; nothing to delete or insert.
    Untouched,
    /// The stroke was hit: delete the original and insert these fragments
    /// (possibly none, when the stroke was erased entirely).
    Split(Vec<Stroke>),
}

impl EraseOutcome {
    pub fn is_untouched(&self) -> bool {
        matches!(self, EraseOutcome::Untouched)
    }
}

/// Run an eraser gesture against a committed stroke.
///
/// The dominant fast path is an O(1) bounding-box reject: the stroke box is
/// padded by half its width, the eraser path by half the eraser width. When
/// the boxes overlap, the stroke is resampled at fine spacing and each
/// sample is classified kept or erased; contiguous kept runs become new
/// fragment strokes with fresh identities. Single-point runs survive, so
/// erasing through a thick line leaves its freckles.
///
/// Erase geometry ignores `feather`; only the raw sizes matter.
pub fn erase_stroke(stroke: &Stroke, eraser_points: &[Point], eraser_width: f64) -> EraseOutcome {
    if stroke.kind != StrokeKind::Pen || stroke.points.is_empty() || eraser_points.is_empty() {
        return EraseOutcome::Untouched;
    }

    let stroke_box = bounding_box(&stroke.points, stroke.size / 2.0);
    let eraser_box = bounding_box(eraser_points, eraser_width / 2.0);
    match (stroke_box, eraser_box) {
        (Some(a), Some(b)) if boxes_intersect(a, b) => {}
        _ => return EraseOutcome::Untouched,
    }

    let spacing = (eraser_width / RESAMPLE_DIVISOR).max(0.5);
    let resampled = resample_points(&stroke.points, spacing);
    let radius = eraser_width / 2.0;

    let mut fragments: Vec<Stroke> = Vec::new();
    let mut run: Vec<Point> = Vec::new();
    let mut erased_any = false;

    for &p in &resampled {
        if is_point_near_polyline(p, eraser_points, radius) {
            erased_any = true;
            if !run.is_empty() {
                fragments.push(make_fragment(stroke, std::mem::take(&mut run)));
            }
        } else {
            run.push(p);
        }
    }
    if !run.is_empty() {
        fragments.push(make_fragment(stroke, run));
    }

    if !erased_any {
        // Boxes overlapped but no sample fell inside the eraser radius.
        return EraseOutcome::Untouched;
    }

    EraseOutcome::Split(fragments)
}

/// Run the eraser against a whole stroke list, returning the ids to delete
/// paired with their replacement fragments.
///
/// Tests against the strokes as passed in, so rapid successive erases must
/// hand in the *current* committed state, never a stale snapshot.
pub fn erase_against_all(
    strokes: &[Stroke],
    eraser_points: &[Point],
    eraser_width: f64,
) -> Vec<(Stroke, Vec<Stroke>)> {
    strokes
        .iter()
        .filter_map(|s| match erase_stroke(s, eraser_points, eraser_width) {
            EraseOutcome::Untouched => None,
            EraseOutcome::Split(fragments) => Some((s.clone(), fragments)),
        })
        .collect()
}

fn make_fragment(original: &Stroke, points: Vec<Point>) -> Stroke {
    Stroke {
        id: generate_stroke_id(original.timestamp),
        kind: original.kind,
        color: original.color.clone(),
        size: original.size,
        feather: original.feather,
        points,
        text: None,
        timestamp: original.timestamp,
        is_complete: true,
    }
}
