//! Flat RGBA8 pixel buffer with source-over compositing.

/// Premultiplication is not used; alpha blending happens in straight
/// (non-premultiplied) space, matching the wire color format.
pub type Rgba = [u8; 4];

pub const TRANSPARENT: Rgba = [0, 0, 0, 0];

/// A width x height RGBA8 buffer, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Pixmap {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Pixmap {
    /// Create a transparent pixmap. Zero dimensions yield an empty buffer.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; (width as usize) * (height as usize) * 4],
        }
    }

    /// Create a pixmap filled with a solid color.
    pub fn filled(width: u32, height: u32, color: Rgba) -> Self {
        let mut pixmap = Self::new(width, height);
        for chunk in pixmap.data.chunks_exact_mut(4) {
            chunk.copy_from_slice(&color);
        }
        pixmap
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGBA bytes, row-major.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    /// Pixel at (x, y), or `None` out of bounds.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = self.index(x, y);
        Some([self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]])
    }

    /// Overwrite a pixel without blending. Out of bounds is a no-op.
    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, color: Rgba) {
        if x >= self.width || y >= self.height {
            return;
        }
        let i = self.index(x, y);
        self.data[i..i + 4].copy_from_slice(&color);
    }

    /// Source-over blend `color` scaled by `coverage` (0..=1) onto (x, y).
    #[inline]
    pub fn blend_pixel(&mut self, x: u32, y: u32, color: Rgba, coverage: f64) {
        if x >= self.width || y >= self.height || coverage <= 0.0 {
            return;
        }
        let src_a = (color[3] as f64 / 255.0) * coverage.min(1.0);
        if src_a <= 0.0 {
            return;
        }
        let i = self.index(x, y);
        let dst_a = self.data[i + 3] as f64 / 255.0;
        let out_a = src_a + dst_a * (1.0 - src_a);
        if out_a <= 0.0 {
            self.data[i..i + 4].copy_from_slice(&TRANSPARENT);
            return;
        }
        for c in 0..3 {
            let src = color[c] as f64;
            let dst = self.data[i + c] as f64;
            let out = (src * src_a + dst * dst_a * (1.0 - src_a)) / out_a;
            self.data[i + c] = out.round().clamp(0.0, 255.0) as u8;
        }
        self.data[i + 3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    }

    /// Knock alpha out of a pixel by `coverage` (destination-out). Used by
    /// the committed-layer eraser pass.
    #[inline]
    pub fn erase_pixel(&mut self, x: u32, y: u32, coverage: f64) {
        if x >= self.width || y >= self.height || coverage <= 0.0 {
            return;
        }
        let i = self.index(x, y);
        let keep = 1.0 - coverage.min(1.0);
        let a = (self.data[i + 3] as f64 * keep).round() as u8;
        self.data[i + 3] = a;
        if a == 0 {
            self.data[i..i + 3].copy_from_slice(&[0, 0, 0]);
        }
    }

    /// Reset every pixel to transparent.
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// Composite `src` over self at an integer offset, source-over.
    pub fn composite_over(&mut self, src: &Pixmap, offset_x: i64, offset_y: i64) {
        for sy in 0..src.height {
            let dy = sy as i64 + offset_y;
            if dy < 0 || dy >= self.height as i64 {
                continue;
            }
            for sx in 0..src.width {
                let dx = sx as i64 + offset_x;
                if dx < 0 || dx >= self.width as i64 {
                    continue;
                }
                if let Some(p) = src.pixel(sx, sy) {
                    if p[3] > 0 {
                        self.blend_pixel(dx as u32, dy as u32, p, 1.0);
                    }
                }
            }
        }
    }

    /// Flatten onto an opaque background color, producing a buffer with
    /// alpha forced to 255. Used by export.
    pub fn flatten_onto(&self, background: Rgba) -> Pixmap {
        let mut out = Pixmap::filled(self.width, self.height, [background[0], background[1], background[2], 255]);
        out.composite_over(self, 0, 0);
        for chunk in out.data.chunks_exact_mut(4) {
            chunk[3] = 255;
        }
        out
    }
}

/// Whether two buffer sizes differ by more than a rounding pixel. Device
/// pixel ratio changes produce fractional sizes that round differently,
/// so a 1px delta is not a real resize.
pub fn needs_resize(current: (u32, u32), target: (u32, u32)) -> bool {
    let dw = (current.0 as i64 - target.0 as i64).abs();
    let dh = (current.1 as i64 - target.1 as i64).abs();
    dw > 1 || dh > 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_transparent() {
        let p = Pixmap::new(4, 4);
        assert_eq!(p.pixel(0, 0), Some(TRANSPARENT));
        assert_eq!(p.pixel(3, 3), Some(TRANSPARENT));
        assert_eq!(p.pixel(4, 0), None);
    }

    #[test]
    fn test_blend_opaque_replaces() {
        let mut p = Pixmap::new(2, 2);
        p.blend_pixel(0, 0, [255, 0, 0, 255], 1.0);
        assert_eq!(p.pixel(0, 0), Some([255, 0, 0, 255]));
    }

    #[test]
    fn test_blend_half_coverage_over_white() {
        let mut p = Pixmap::filled(1, 1, [255, 255, 255, 255]);
        p.blend_pixel(0, 0, [0, 0, 0, 255], 0.5);
        let px = p.pixel(0, 0).unwrap();
        // Halfway between white and black, alpha stays opaque
        assert!((px[0] as i32 - 128).abs() <= 1);
        assert_eq!(px[3], 255);
    }

    #[test]
    fn test_erase_pixel_knocks_out_alpha() {
        let mut p = Pixmap::filled(1, 1, [10, 20, 30, 255]);
        p.erase_pixel(0, 0, 1.0);
        assert_eq!(p.pixel(0, 0), Some(TRANSPARENT));
    }

    #[test]
    fn test_composite_with_offset() {
        let mut dst = Pixmap::new(4, 4);
        let src = Pixmap::filled(2, 2, [0, 255, 0, 255]);
        dst.composite_over(&src, 2, 2);
        assert_eq!(dst.pixel(1, 1), Some(TRANSPARENT));
        assert_eq!(dst.pixel(2, 2), Some([0, 255, 0, 255]));
        assert_eq!(dst.pixel(3, 3), Some([0, 255, 0, 255]));
    }

    #[test]
    fn test_flatten_forces_opaque() {
        let mut p = Pixmap::new(2, 1);
        p.blend_pixel(0, 0, [255, 0, 0, 128], 1.0);
        let flat = p.flatten_onto([255, 255, 255, 255]);
        let px = flat.pixel(0, 0).unwrap();
        assert_eq!(px[3], 255);
        // Red over white at half alpha lands pink
        assert!(px[0] > 200 && px[1] > 100 && px[1] < 160);
        assert_eq!(flat.pixel(1, 0), Some([255, 255, 255, 255]));
    }

    #[test]
    fn test_needs_resize_ignores_rounding_pixel() {
        assert!(!needs_resize((800, 600), (800, 600)));
        assert!(!needs_resize((800, 600), (801, 599)));
        assert!(needs_resize((800, 600), (802, 600)));
    }
}
