//! Flood fill over the committed raster, with edge-leak detection.
//!
//! A fill stroke persists only its seed point and color; the filled
//! region is recomputed against whatever raster the stroke order
//! produces, then cached per stroke id so repaints stay cheap.

use std::collections::HashMap;

use kurbo::Point;

use inkroom_core::stroke::{hex_to_rgb, StrokeId};

use crate::pixmap::{Pixmap, Rgba};

/// Per-channel match tolerance on a 0..=255 scale. Anti-aliased stroke
/// edges sit within this band of the region color, so the fill reaches
/// the stroke instead of leaving a halo.
pub const FILL_TOLERANCE: u8 = 35;

/// The filled region, cropped to its bounding box.
#[derive(Debug, Clone, PartialEq)]
pub struct FillPatch {
    /// Offset of the patch within the source raster.
    pub x: u32,
    pub y: u32,
    /// The seed the region was grown from. A cached patch is only valid
    /// while its stroke still carries this seed; a drag moves the seed
    /// and forces a recompute.
    pub seed: Point,
    /// Patch pixels; transparent outside the filled region.
    pub pixels: Pixmap,
}

#[inline]
fn matches(p: Rgba, target: Rgba, tol: u8) -> bool {
    // Two fully transparent pixels match whatever their RGB says.
    if target[3] == 0 && p[3] == 0 {
        return true;
    }
    let tol = tol as i32;
    let d = |a: u8, b: u8| (a as i32 - b as i32).abs();
    d(p[0], target[0]) <= tol
        && d(p[1], target[1]) <= tol
        && d(p[2], target[2]) <= tol
        && d(p[3], target[3]) <= tol
}

/// Flood fill `source` from `seed` with `fill_color`.
///
/// Returns `None` when the fill cannot or should not happen: seed out of
/// bounds, seed already the fill color, or the region leaks off the
/// raster edge (an unbounded region filling the entire surface is never
/// what a user meant, so it aborts instead).
pub fn flood_fill(source: &Pixmap, seed: Point, fill_color: &str) -> Option<FillPatch> {
    let width = source.width();
    let height = source.height();
    if seed.x < 0.0 || seed.y < 0.0 {
        return None;
    }
    let sx = seed.x as u32;
    let sy = seed.y as u32;
    if sx >= width || sy >= height {
        return None;
    }

    let rgb = hex_to_rgb(fill_color)?;
    let fill: Rgba = [rgb[0], rgb[1], rgb[2], 255];
    let target = source.pixel(sx, sy)?;
    if matches(fill, target, FILL_TOLERANCE) {
        log::debug!("flood fill no-op: seed already target color");
        return None;
    }

    let wu = width as usize;
    // Mask doubles as the visited set and the region output.
    let mut mask = vec![false; wu * height as usize];
    let mut stack = vec![(sx, sy)];
    mask[sy as usize * wu + sx as usize] = true;

    let mut min_x = sx;
    let mut max_x = sx;
    let mut min_y = sy;
    let mut max_y = sy;
    let mut leaked = false;

    while let Some((x, y)) = stack.pop() {
        if x == 0 || y == 0 || x == width - 1 || y == height - 1 {
            // Region reaches the raster edge: unbounded, abort.
            leaked = true;
            break;
        }
        min_x = min_x.min(x);
        max_x = max_x.max(x);
        min_y = min_y.min(y);
        max_y = max_y.max(y);

        let neighbors = [(x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)];
        for (nx, ny) in neighbors {
            let idx = ny as usize * wu + nx as usize;
            if mask[idx] {
                continue;
            }
            if let Some(p) = source.pixel(nx, ny) {
                if matches(p, target, FILL_TOLERANCE) {
                    mask[idx] = true;
                    stack.push((nx, ny));
                }
            }
        }
    }

    if leaked {
        log::debug!("flood fill aborted: region leaks past the raster edge");
        return None;
    }

    let mut pixels = Pixmap::new(max_x - min_x + 1, max_y - min_y + 1);
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            if mask[y as usize * wu + x as usize] {
                pixels.set_pixel(x - min_x, y - min_y, fill);
            }
        }
    }

    Some(FillPatch { x: min_x, y: min_y, seed, pixels })
}

/// Computed fill regions keyed by stroke id.
///
/// Entries are evicted when their stroke is deleted or anything below it
/// in z-order changes; a missing entry just recomputes. Each patch
/// remembers its seed, so a stale entry for a dragged fill is detected
/// at repaint time.
#[derive(Debug, Default)]
pub struct FillCache {
    patches: HashMap<StrokeId, FillPatch>,
}

impl FillCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&FillPatch> {
        self.patches.get(id)
    }

    pub fn insert(&mut self, id: StrokeId, patch: FillPatch) {
        self.patches.insert(id, patch);
    }

    pub fn evict(&mut self, id: &str) {
        self.patches.remove(id);
    }

    pub fn clear(&mut self) {
        self.patches.clear();
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }
}
