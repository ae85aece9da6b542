//! Dual-layer compositing: the committed raster and the live overlay.
//!
//! The committed layer repaints only when the persisted stroke list
//! changes; the overlay (peer ghosts, local preview, cursors) is cheap
//! and repaints every frame. Background color is not baked into the
//! committed layer; it is derived per frame so an undone background
//! stroke reverts instantly.

use kurbo::Point;

use inkroom_core::presence::UserPresence;
use inkroom_core::stroke::{current_background, hex_to_rgb, Stroke, StrokeKind};

use crate::brush::{render_stroke, render_stroke_with_alpha, stamp_disc};
use crate::fill::{flood_fill, FillCache, FillPatch};
use crate::pixmap::{needs_resize, Pixmap, Rgba};

/// Ghost alpha for peers' in-progress strokes.
const GHOST_ALPHA: u8 = 140;

/// Selection halo: extra radius and alpha.
const GLOW_EXTRA_RADIUS: f64 = 3.0;
const GLOW_ALPHA: u8 = 90;
const GLOW_COLOR: [u8; 3] = [59, 130, 246];

/// Peer cursor marker radius.
const CURSOR_RADIUS: f64 = 4.0;

/// The two raster layers plus the fill cache that amortizes flood fills
/// across repaints.
#[derive(Debug)]
pub struct SceneLayers {
    committed: Pixmap,
    overlay: Pixmap,
    fill_cache: FillCache,
    committed_dirty: bool,
}

impl SceneLayers {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            committed: Pixmap::new(width, height),
            overlay: Pixmap::new(width, height),
            fill_cache: FillCache::new(),
            committed_dirty: true,
        }
    }

    pub fn committed(&self) -> &Pixmap {
        &self.committed
    }

    pub fn overlay(&self) -> &Pixmap {
        &self.overlay
    }

    /// Mark the committed layer stale. Call on any stroke list change.
    pub fn invalidate(&mut self) {
        self.committed_dirty = true;
    }

    /// Drop a deleted stroke's cached fill region.
    pub fn evict_fill(&mut self, id: &str) {
        self.fill_cache.evict(id);
        self.committed_dirty = true;
    }

    /// Resize both layers if the target differs by more than a rounding
    /// pixel (device-pixel-ratio changes jitter by one). Contents are
    /// discarded; the caller repaints.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        if !needs_resize((self.committed.width(), self.committed.height()), (width, height)) {
            return false;
        }
        self.committed = Pixmap::new(width, height);
        self.overlay = Pixmap::new(width, height);
        self.fill_cache.clear();
        self.committed_dirty = true;
        true
    }

    /// Repaint the committed layer if stale.
    ///
    /// Strokes rasterize in list order. Background strokes are skipped
    /// (the background is a clear color underneath, see
    /// [`background_rgba`]); a stroke being edited inline is skipped so
    /// it doesn't render twice; the selected stroke gets a halo behind
    /// it. Returns whether a repaint happened.
    pub fn repaint_committed(
        &mut self,
        strokes: &[Stroke],
        skip: Option<&str>,
        selected: Option<&str>,
    ) -> bool {
        if !self.committed_dirty {
            return false;
        }
        self.committed.clear();

        for stroke in strokes {
            if Some(stroke.id.as_str()) == skip {
                continue;
            }
            match stroke.kind {
                StrokeKind::Background => {}
                StrokeKind::Fill => {
                    let seed = stroke.points.first().copied().unwrap_or(Point::ZERO);
                    // A cached patch is only reusable while the stroke
                    // still sits on the seed it was grown from; a dragged
                    // fill recomputes at its new seed.
                    let cached = self
                        .fill_cache
                        .get(&stroke.id)
                        .filter(|p| p.seed == seed)
                        .cloned();
                    let patch = match cached {
                        Some(patch) => Some(patch),
                        None => {
                            // Filled against the raster as painted so far,
                            // so strokes above the fill stay above it.
                            let computed = flood_fill(&self.committed, seed, &stroke.color);
                            match &computed {
                                Some(patch) => {
                                    self.fill_cache.insert(stroke.id.clone(), patch.clone());
                                }
                                None => self.fill_cache.evict(&stroke.id),
                            }
                            computed
                        }
                    };
                    if let Some(patch) = patch {
                        if Some(stroke.id.as_str()) == selected {
                            paint_patch_glow(&mut self.committed, &patch);
                        }
                        self.committed.composite_over(
                            &patch.pixels,
                            patch.x as i64,
                            patch.y as i64,
                        );
                    }
                }
                StrokeKind::Pen | StrokeKind::Eraser => {
                    if Some(stroke.id.as_str()) == selected {
                        paint_glow(&mut self.committed, stroke);
                    }
                    render_stroke(&mut self.committed, stroke);
                }
                // Text rasterization happens in the platform text layer.
                StrokeKind::Text => {}
            }
        }

        self.committed_dirty = false;
        true
    }

    /// Repaint the overlay: peer ghosts and cursors, plus the local
    /// in-progress stroke. Runs every frame.
    ///
    /// Eraser ghosts paint in the background color rather than clearing,
    /// so a peer's in-flight erase previews as removal without touching
    /// the committed layer.
    pub fn repaint_overlay(
        &mut self,
        peers: &[UserPresence],
        local_preview: Option<&Stroke>,
        background: Rgba,
    ) {
        self.overlay.clear();

        for peer in peers {
            if let Some(ghost) = &peer.current_stroke {
                paint_ghost(&mut self.overlay, ghost, background);
            }
        }
        if let Some(preview) = local_preview {
            paint_ghost(&mut self.overlay, preview, background);
        }
        for peer in peers {
            if let Some(cursor) = peer.cursor {
                let rgb = hex_to_rgb(&peer.color).unwrap_or([100, 100, 100]);
                stamp_disc(
                    &mut self.overlay,
                    cursor,
                    CURSOR_RADIUS,
                    [rgb[0], rgb[1], rgb[2], 255],
                    0.0,
                    false,
                );
            }
        }
    }
}

/// Local tool cursor shapes painted on the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorShape {
    /// Small filled dot in the brush color (pen).
    Dot,
    /// Hollow ring showing the erase footprint (eraser).
    Ring,
}

impl SceneLayers {
    /// Paint the local tool cursor onto the overlay, after
    /// [`SceneLayers::repaint_overlay`] for the current frame.
    pub fn paint_cursor(&mut self, shape: CursorShape, position: Point, size: f64, color: Rgba) {
        match shape {
            CursorShape::Dot => {
                stamp_disc(&mut self.overlay, position, (size / 4.0).max(1.5), color, 0.0, false);
            }
            CursorShape::Ring => {
                let radius = (size / 2.0).max(1.0);
                // Annulus: a disc with its interior knocked back out.
                stamp_disc(&mut self.overlay, position, radius, color, 0.0, false);
                stamp_disc(&mut self.overlay, position, (radius - 1.5).max(0.0), color, 0.0, true);
            }
        }
    }
}

/// Start-once guard for the render tick.
///
/// The embedder drives frames from whatever timer its platform offers;
/// this guard makes sure only one loop runs and gives teardown a cancel
/// handle.
#[derive(Debug, Default)]
pub struct FrameLoop {
    running: bool,
}

impl FrameLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the loop. False if a loop already runs; the caller must not
    /// start a second one.
    pub fn start(&mut self) -> bool {
        if self.running {
            return false;
        }
        self.running = true;
        true
    }

    /// Release the loop; the driving timer should stop on next tick.
    pub fn cancel(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

fn paint_ghost(overlay: &mut Pixmap, stroke: &Stroke, background: Rgba) {
    match stroke.kind {
        StrokeKind::Eraser => {
            let mut as_pen = stroke.clone();
            as_pen.kind = StrokeKind::Pen;
            as_pen.color = format!(
                "#{:02X}{:02X}{:02X}",
                background[0], background[1], background[2]
            );
            render_stroke(overlay, &as_pen);
        }
        StrokeKind::Pen => render_stroke_with_alpha(overlay, stroke, GHOST_ALPHA),
        _ => {}
    }
}

/// Halo for a selected fill: a translucent frame around the patch
/// bounds, since the region itself has no polyline to fatten.
fn paint_patch_glow(pixmap: &mut Pixmap, patch: &FillPatch) {
    let pad = GLOW_EXTRA_RADIUS.ceil() as i64;
    let left = patch.x as i64;
    let top = patch.y as i64;
    let right = left + patch.pixels.width() as i64;
    let bottom = top + patch.pixels.height() as i64;
    let color = [GLOW_COLOR[0], GLOW_COLOR[1], GLOW_COLOR[2], 255];
    let coverage = GLOW_ALPHA as f64 / 255.0;

    for y in (top - pad)..(bottom + pad) {
        for x in (left - pad)..(right + pad) {
            let inside = x >= left && x < right && y >= top && y < bottom;
            if inside || x < 0 || y < 0 {
                continue;
            }
            pixmap.blend_pixel(x as u32, y as u32, color, coverage);
        }
    }
}

fn paint_glow(pixmap: &mut Pixmap, stroke: &Stroke) {
    let mut halo = stroke.clone();
    halo.kind = StrokeKind::Pen;
    halo.size += GLOW_EXTRA_RADIUS * 2.0;
    halo.color = format!(
        "#{:02X}{:02X}{:02X}",
        GLOW_COLOR[0], GLOW_COLOR[1], GLOW_COLOR[2]
    );
    render_stroke_with_alpha(pixmap, &halo, GLOW_ALPHA);
}

/// The derived background as RGBA, for clearing underneath the committed
/// layer and for export flattening.
pub fn background_rgba(strokes: &[Stroke]) -> Rgba {
    let rgb = hex_to_rgb(current_background(strokes)).unwrap_or([255, 255, 255]);
    [rgb[0], rgb[1], rgb[2], 255]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pen(points: Vec<Point>, color: &str, ts: i64) -> Stroke {
        Stroke::new(StrokeKind::Pen, color, 4.0, points, ts)
    }

    #[test]
    fn test_repaint_skips_when_clean() {
        let mut layers = SceneLayers::new(20, 20);
        let strokes = vec![pen(vec![Point::new(10.0, 10.0)], "#FF0000", 1)];
        assert!(layers.repaint_committed(&strokes, None, None));
        assert!(!layers.repaint_committed(&strokes, None, None));
        layers.invalidate();
        assert!(layers.repaint_committed(&strokes, None, None));
    }

    #[test]
    fn test_background_stroke_not_rasterized() {
        let mut layers = SceneLayers::new(20, 20);
        let strokes = vec![Stroke::background("#00FF00", 1)];
        layers.repaint_committed(&strokes, None, None);
        // Committed layer stays transparent; background is derived
        assert_eq!(layers.committed().pixel(10, 10).unwrap()[3], 0);
        assert_eq!(background_rgba(&strokes), [0, 255, 0, 255]);
    }

    #[test]
    fn test_background_default_white() {
        assert_eq!(background_rgba(&[]), [255, 255, 255, 255]);
    }

    #[test]
    fn test_skip_id_omitted_from_committed() {
        let mut layers = SceneLayers::new(20, 20);
        let stroke = pen(vec![Point::new(10.0, 10.0)], "#FF0000", 1);
        let id = stroke.id.clone();
        let strokes = vec![stroke];
        layers.repaint_committed(&strokes, Some(&id), None);
        assert_eq!(layers.committed().pixel(10, 10).unwrap()[3], 0);
    }

    /// Closed square outline from (10,10) to (30,30), for fill tests.
    fn square_outline() -> Vec<Point> {
        let mut outline = Vec::new();
        for x in 10..=30 {
            outline.push(Point::new(x as f64, 10.0));
        }
        for y in 10..=30 {
            outline.push(Point::new(30.0, y as f64));
        }
        for x in (10..=30).rev() {
            outline.push(Point::new(x as f64, 30.0));
        }
        for y in (10..=30).rev() {
            outline.push(Point::new(10.0, y as f64));
        }
        outline
    }

    #[test]
    fn test_fill_stroke_composites_patch_and_caches() {
        let mut layers = SceneLayers::new(40, 40);
        let border = Stroke::new(StrokeKind::Pen, "#000000", 4.0, square_outline(), 1);
        let fill = Stroke::fill(Point::new(20.0, 20.0), "#FF0000", 2);
        let fill_id = fill.id.clone();
        let strokes = vec![border, fill];

        layers.repaint_committed(&strokes, None, None);
        assert_eq!(layers.committed().pixel(20, 20), Some([255, 0, 0, 255]));
        assert!(layers.fill_cache.get(&fill_id).is_some());

        layers.evict_fill(&fill_id);
        assert!(layers.fill_cache.get(&fill_id).is_none());
    }

    #[test]
    fn test_dragged_fill_does_not_repaint_old_region() {
        let mut layers = SceneLayers::new(40, 40);
        let border = Stroke::new(StrokeKind::Pen, "#000000", 4.0, square_outline(), 1);
        let fill = Stroke::fill(Point::new(20.0, 20.0), "#FF0000", 2);
        let fill_id = fill.id.clone();
        let mut strokes = vec![border, fill];

        layers.repaint_committed(&strokes, None, None);
        assert_eq!(layers.committed().pixel(20, 20), Some([255, 0, 0, 255]));

        // Drag the fill into the open area outside the square. The new
        // seed leaks off the edge so nothing paints, and the cached
        // region from the old seed must not come back.
        strokes[1].translate(-15.0, -15.0);
        layers.invalidate();
        layers.repaint_committed(&strokes, None, None);
        assert_eq!(layers.committed().pixel(20, 20).unwrap()[3], 0);
        assert!(layers.fill_cache.get(&fill_id).is_none());
    }

    #[test]
    fn test_selected_fill_gets_halo() {
        let border = Stroke::new(StrokeKind::Pen, "#000000", 4.0, square_outline(), 1);
        let fill = Stroke::fill(Point::new(20.0, 20.0), "#FF0000", 2);
        let fill_id = fill.id.clone();
        let strokes = vec![border, fill];

        let mut plain = SceneLayers::new(40, 40);
        plain.repaint_committed(&strokes, None, None);
        let mut selected = SceneLayers::new(40, 40);
        selected.repaint_committed(&strokes, None, Some(&fill_id));

        // The halo frame tints the pixels just outside the patch bounds.
        let patch = selected.fill_cache.get(&fill_id).cloned().unwrap();
        let frame = (patch.x - 1, patch.y + patch.pixels.height() / 2);
        assert_ne!(
            selected.committed().pixel(frame.0, frame.1),
            plain.committed().pixel(frame.0, frame.1)
        );
        // The filled region itself still composites on top.
        assert_eq!(selected.committed().pixel(20, 20), Some([255, 0, 0, 255]));
    }

    #[test]
    fn test_overlay_ghost_and_cursor() {
        use inkroom_core::presence::{SessionIdentity, UserPresence};

        let mut layers = SceneLayers::new(40, 40);
        let identity = SessionIdentity::generate("peer");
        let mut peer = UserPresence::new(&identity, 0);
        peer.cursor = Some(Point::new(5.0, 5.0));
        let mut ghost = pen(vec![Point::new(20.0, 20.0)], "#FF0000", 1);
        ghost.is_complete = false;
        peer.current_stroke = Some(ghost);

        layers.repaint_overlay(&[peer], None, [255, 255, 255, 255]);
        // Ghost at reduced alpha
        let g = layers.overlay().pixel(20, 20).unwrap();
        assert!(g[3] > 0 && g[3] < 255);
        // Cursor marker painted
        assert!(layers.overlay().pixel(5, 5).unwrap()[3] > 0);
    }

    #[test]
    fn test_eraser_ghost_paints_background_color() {
        let mut layers = SceneLayers::new(20, 20);
        let mut ghost = Stroke::new(
            StrokeKind::Eraser,
            "#000000",
            8.0,
            vec![Point::new(10.0, 10.0)],
            1,
        );
        ghost.is_complete = false;
        layers.repaint_overlay(&[], Some(&ghost), [0, 255, 0, 255]);
        let px = layers.overlay().pixel(10, 10).unwrap();
        assert_eq!([px[0], px[1], px[2]], [0, 255, 0]);
        assert_eq!(px[3], 255);
    }

    #[test]
    fn test_eraser_ring_cursor_is_hollow() {
        let mut layers = SceneLayers::new(40, 40);
        layers.paint_cursor(CursorShape::Ring, Point::new(20.0, 20.0), 16.0, [0, 0, 0, 255]);
        // Rim painted, center knocked back out
        assert!(layers.overlay().pixel(27, 20).unwrap()[3] > 0);
        assert_eq!(layers.overlay().pixel(20, 20).unwrap()[3], 0);
    }

    #[test]
    fn test_frame_loop_starts_once() {
        let mut frame_loop = FrameLoop::new();
        assert!(frame_loop.start());
        assert!(!frame_loop.start());
        assert!(frame_loop.is_running());
        frame_loop.cancel();
        assert!(!frame_loop.is_running());
        assert!(frame_loop.start());
    }

    #[test]
    fn test_resize_tolerates_dpr_jitter() {
        let mut layers = SceneLayers::new(800, 600);
        assert!(!layers.resize(801, 600));
        assert!(layers.resize(400, 300));
        assert_eq!(layers.committed().width(), 400);
    }
}
