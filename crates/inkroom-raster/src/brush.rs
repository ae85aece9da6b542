//! Stroke rasterization: smoothing, flattening, and disc stamping.
//!
//! Raw pointer samples are smoothed with midpoint quadratics (each sample
//! becomes a control point, segment endpoints are the midpoints between
//! neighbors), flattened to a polyline, then stamped with round brush
//! discs at a sub-radius spacing so the result reads as one continuous
//! mark.

use kurbo::{flatten, BezPath, PathEl, Point};

use inkroom_core::stroke::{hex_to_rgb, Stroke, StrokeKind};

use crate::pixmap::{Pixmap, Rgba};

/// Curve flattening tolerance in pixels.
const FLATTEN_TOLERANCE: f64 = 0.25;

/// Disc spacing as a fraction of the brush radius.
const STAMP_SPACING_FACTOR: f64 = 0.4;

/// Smooth a raw sample polyline with midpoint quadratics and flatten it
/// back to a dense polyline.
///
/// Fewer than three samples pass through unchanged; smoothing a segment
/// or a dot has nothing to round off.
pub fn smooth_polyline(points: &[Point]) -> Vec<Point> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let mut path = BezPath::new();
    path.move_to(points[0]);
    for i in 1..points.len() - 1 {
        let control = points[i];
        let end = midpoint(points[i], points[i + 1]);
        path.quad_to(control, end);
    }
    // The final midpoint stops short of the last sample; close the gap.
    path.line_to(points[points.len() - 1]);

    let mut out = vec![points[0]];
    flatten(path.elements().iter().copied(), FLATTEN_TOLERANCE, |el| match el {
        PathEl::MoveTo(p) | PathEl::LineTo(p) => out.push(p),
        _ => {}
    });
    out
}

fn midpoint(a: Point, b: Point) -> Point {
    Point::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
}

/// Stamp one round brush disc.
///
/// Coverage falls off over a half-pixel band for a hard brush, or over
/// `feather` pixels for a soft one. `erase` knocks out alpha instead of
/// painting.
pub fn stamp_disc(
    pixmap: &mut Pixmap,
    center: Point,
    radius: f64,
    color: Rgba,
    feather: f64,
    erase: bool,
) {
    let radius = radius.max(0.5);
    let reach = radius + feather.max(0.0) + 1.0;
    let x0 = ((center.x - reach).floor().max(0.0)) as u32;
    let y0 = ((center.y - reach).floor().max(0.0)) as u32;
    let x1 = ((center.x + reach).ceil().min(pixmap.width() as f64)) as u32;
    let y1 = ((center.y + reach).ceil().min(pixmap.height() as f64)) as u32;

    let falloff = if feather > 0.0 { feather } else { 0.5 };
    for y in y0..y1 {
        for x in x0..x1 {
            let dx = x as f64 + 0.5 - center.x;
            let dy = y as f64 + 0.5 - center.y;
            let dist = (dx * dx + dy * dy).sqrt();
            let coverage = ((radius - dist) / falloff + 1.0).clamp(0.0, 1.0);
            if coverage <= 0.0 {
                continue;
            }
            if erase {
                pixmap.erase_pixel(x, y, coverage);
            } else {
                pixmap.blend_pixel(x, y, color, coverage);
            }
        }
    }
}

/// Stamp discs along a polyline at sub-radius spacing.
fn stamp_polyline(
    pixmap: &mut Pixmap,
    polyline: &[Point],
    radius: f64,
    color: Rgba,
    feather: f64,
    erase: bool,
) {
    let spacing = (radius * STAMP_SPACING_FACTOR).max(0.5);
    let mut carry = 0.0;
    match polyline {
        [] => {}
        [only] => stamp_disc(pixmap, *only, radius, color, feather, erase),
        _ => {
            stamp_disc(pixmap, polyline[0], radius, color, feather, erase);
            for pair in polyline.windows(2) {
                let (a, b) = (pair[0], pair[1]);
                let seg = b.distance(a);
                if seg <= f64::EPSILON {
                    continue;
                }
                let mut t = spacing - carry;
                while t <= seg {
                    let p = Point::new(
                        a.x + (b.x - a.x) * (t / seg),
                        a.y + (b.y - a.y) * (t / seg),
                    );
                    stamp_disc(pixmap, p, radius, color, feather, erase);
                    t += spacing;
                }
                carry = seg - (t - spacing);
            }
            // Round cap on the end regardless of where the spacing landed.
            stamp_disc(pixmap, polyline[polyline.len() - 1], radius, color, feather, erase);
        }
    }
}

/// Rasterize one pen or eraser stroke onto the pixmap.
///
/// Other kinds (text, fill, background) are composited elsewhere; calling
/// this with them is a no-op.
pub fn render_stroke(pixmap: &mut Pixmap, stroke: &Stroke) {
    render_stroke_with_alpha(pixmap, stroke, 255);
}

/// Rasterize with an alpha override, used for peer ghost previews.
pub fn render_stroke_with_alpha(pixmap: &mut Pixmap, stroke: &Stroke, alpha: u8) {
    let erase = match stroke.kind {
        StrokeKind::Pen => false,
        StrokeKind::Eraser => true,
        _ => return,
    };
    if stroke.points.is_empty() {
        return;
    }
    let rgb = hex_to_rgb(&stroke.color).unwrap_or([0, 0, 0]);
    let color = [rgb[0], rgb[1], rgb[2], alpha];
    let radius = (stroke.size / 2.0).max(0.5);
    let feather = stroke.feather.unwrap_or(0.0);
    let polyline = smooth_polyline(&stroke.points);
    stamp_polyline(pixmap, &polyline, radius, color, feather, erase);
}
