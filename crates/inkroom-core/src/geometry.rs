//! Pure geometry utilities shared by hit-testing, erasing and rendering.

use kurbo::{Point, Rect, Vec2};

/// Distance from a point to a line segment (a→b).
///
/// The projection parameter is clamped to [0, 1], so the result is the
/// distance to the nearest point *on* the segment, not on the infinite line.
pub fn distance_to_segment(point: Point, a: Point, b: Point) -> f64 {
    let seg = Vec2::new(b.x - a.x, b.y - a.y);
    let pv = Vec2::new(point.x - a.x, point.y - a.y);
    let len_sq = seg.hypot2();
    if len_sq < f64::EPSILON {
        return pv.hypot();
    }
    let t = (pv.dot(seg) / len_sq).clamp(0.0, 1.0);
    let proj = Point::new(a.x + t * seg.x, a.y + t * seg.y);
    ((point.x - proj.x).powi(2) + (point.y - proj.y).powi(2)).sqrt()
}

/// True if `point` lies within `threshold` of any segment of the polyline.
///
/// A single-point polyline degenerates to a plain distance check, so a
/// tap-and-release stroke is still hittable.
pub fn is_point_near_polyline(point: Point, points: &[Point], threshold: f64) -> bool {
    match points {
        [] => false,
        [only] => {
            let d = Vec2::new(point.x - only.x, point.y - only.y).hypot();
            d <= threshold
        }
        _ => points
            .windows(2)
            .any(|w| distance_to_segment(point, w[0], w[1]) <= threshold),
    }
}

/// Insert evenly spaced interpolated points so consecutive output points are
/// at most `spacing` apart. All original vertices are preserved in order.
///
/// Raw pointer-move samples can be far sparser than eraser or hit-test
/// precision needs; resampling closes those gaps.
pub fn resample_points(points: &[Point], spacing: f64) -> Vec<Point> {
    if points.len() < 2 || spacing <= 0.0 {
        return points.to_vec();
    }

    let mut out = Vec::with_capacity(points.len());
    out.push(points[0]);

    for w in points.windows(2) {
        let (a, b) = (w[0], w[1]);
        let dist = Vec2::new(b.x - a.x, b.y - a.y).hypot();
        if dist > spacing {
            let steps = (dist / spacing).ceil() as usize;
            for i in 1..steps {
                let t = i as f64 / steps as f64;
                out.push(Point::new(a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t));
            }
        }
        out.push(b);
    }

    out
}

/// Axis-aligned bounding box of a point set, inflated by `padding` on all
/// sides. Returns `None` for an empty input.
pub fn bounding_box(points: &[Point], padding: f64) -> Option<Rect> {
    let first = points.first()?;
    let mut min_x = first.x;
    let mut min_y = first.y;
    let mut max_x = first.x;
    let mut max_y = first.y;

    for p in &points[1..] {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }

    Some(Rect::new(min_x, min_y, max_x, max_y).inflate(padding, padding))
}

/// O(1) box overlap test, used as a reject step before per-point work.
pub fn boxes_intersect(a: Rect, b: Rect) -> bool {
    a.x0 <= b.x1 && b.x0 <= a.x1 && a.y0 <= b.y1 && b.y0 <= a.y1
}
