//! Stroke data model for the canvas.

use kurbo::{Point, Rect};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for strokes.
///
/// A string of the capture timestamp plus random entropy, so ids sort
/// roughly by creation even when generated on different clients.
pub type StrokeId = String;

/// Default canvas background when no background stroke exists.
pub const DEFAULT_BACKGROUND: &str = "#FFFFFF";

/// Approximate glyph width as a fraction of font size, used for text
/// hit-test bounds when no real font metrics are available.
const TEXT_CHAR_WIDTH_FACTOR: f64 = 0.55;

/// Persisted stroke kinds.
///
/// `Select` is a transient tool *mode*, not a stroke kind; only these five
/// variants ever reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrokeKind {
    Pen,
    Eraser,
    Text,
    Fill,
    Background,
}

impl StrokeKind {
    /// Kinds that participate in select/drag hit-testing.
    pub fn is_selectable(self) -> bool {
        matches!(self, StrokeKind::Pen | StrokeKind::Text | StrokeKind::Fill)
    }
}

/// The atomic drawable unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stroke {
    /// Identity used for matching across local/remote state.
    pub id: StrokeId,
    /// Stroke kind.
    pub kind: StrokeKind,
    /// Normalized `#RRGGBB` color string.
    pub color: String,
    /// Stroke width; 0 for the sizeless fill/background kinds.
    pub size: f64,
    /// Optional blur radius for a soft brush (pen only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feather: Option<f64>,
    /// Ordered samples in canvas-local space; length >= 1. Fill strokes
    /// carry a single seed point, background strokes a placeholder.
    pub points: Vec<Point>,
    /// Present only for text strokes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Capture time in milliseconds; orders the initial load.
    pub timestamp: i64,
    /// False only for a peer's in-progress broadcast; such strokes are
    /// ghost-rendered and never persisted.
    pub is_complete: bool,
}

impl Stroke {
    /// Create a completed stroke with a fresh id.
    pub fn new(kind: StrokeKind, color: &str, size: f64, points: Vec<Point>, timestamp: i64) -> Self {
        Self {
            id: generate_stroke_id(timestamp),
            kind,
            color: normalize_hex_color(color).unwrap_or_else(|| "#000000".to_string()),
            size: size.max(0.0),
            feather: None,
            points,
            text: None,
            timestamp,
            is_complete: true,
        }
    }

    /// Create a text stroke anchored at `position`.
    pub fn text(position: Point, text: String, color: &str, font_size: f64, timestamp: i64) -> Self {
        let mut stroke = Self::new(StrokeKind::Text, color, font_size, vec![position], timestamp);
        stroke.text = Some(text);
        stroke
    }

    /// Create a fill stroke with a single seed point.
    pub fn fill(seed: Point, color: &str, timestamp: i64) -> Self {
        Self::new(StrokeKind::Fill, color, 0.0, vec![seed], timestamp)
    }

    /// Create a background stroke; the single point is an unused placeholder.
    pub fn background(color: &str, timestamp: i64) -> Self {
        Self::new(StrokeKind::Background, color, 0.0, vec![Point::ZERO], timestamp)
    }

    /// Translate every point by (dx, dy).
    pub fn translate(&mut self, dx: f64, dy: f64) {
        for p in &mut self.points {
            p.x += dx;
            p.y += dy;
        }
    }

    /// The anchor point (first sample).
    pub fn anchor(&self) -> Option<Point> {
        self.points.first().copied()
    }

    /// Approximate bounding box of a text stroke from its font size.
    ///
    /// Returns `None` for non-text strokes. Multi-line text grows the box
    /// by one line height per newline.
    pub fn text_bounds(&self) -> Option<Rect> {
        if self.kind != StrokeKind::Text {
            return None;
        }
        let anchor = self.anchor()?;
        let text = self.text.as_deref().unwrap_or("");
        let line_count = text.lines().count().max(1) as f64;
        let max_line_len = text.lines().map(|l| l.chars().count()).max().unwrap_or(0) as f64;
        let width = (max_line_len * self.size * TEXT_CHAR_WIDTH_FACTOR).max(self.size);
        let height = line_count * self.size * 1.2;
        Some(Rect::new(anchor.x, anchor.y, anchor.x + width, anchor.y + height))
    }

    /// Apply a partial field update.
    pub fn apply_patch(&mut self, patch: &StrokePatch) {
        if let Some(color) = &patch.color {
            if let Some(normalized) = normalize_hex_color(color) {
                self.color = normalized;
            }
        }
        if let Some(size) = patch.size {
            self.size = size.max(0.0);
        }
        if let Some(points) = &patch.points {
            self.points = points.clone();
        }
        if let Some(text) = &patch.text {
            self.text = Some(text.clone());
        }
        if let Some(is_complete) = patch.is_complete {
            self.is_complete = is_complete;
        }
    }
}

/// Typed partial update for a stroke's mutable fields.
///
/// Every field is optional; absent fields leave the stroke untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrokePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<Point>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_complete: Option<bool>,
}

impl StrokePatch {
    /// Patch moving a stroke to a new point set.
    pub fn points(points: Vec<Point>) -> Self {
        Self {
            points: Some(points),
            ..Self::default()
        }
    }

    /// Patch replacing the text content.
    pub fn text(text: String) -> Self {
        Self {
            text: Some(text),
            ..Self::default()
        }
    }

    /// Patch replacing the color.
    pub fn color(color: String) -> Self {
        Self {
            color: Some(color),
            ..Self::default()
        }
    }
}

/// Generate a stroke id from capture time plus random entropy.
pub fn generate_stroke_id(timestamp: i64) -> StrokeId {
    format!("{}-{}", timestamp, Uuid::new_v4().simple())
}

/// The current canvas background: the most recently created background
/// stroke, or white if none exists.
///
/// Derived by scanning in reverse-creation order every time; there is no
/// single mutable background field.
pub fn current_background(strokes: &[Stroke]) -> &str {
    strokes
        .iter()
        .rev()
        .find(|s| s.kind == StrokeKind::Background)
        .map(|s| s.color.as_str())
        .unwrap_or(DEFAULT_BACKGROUND)
}

/// Normalize a hex color string to `#RRGGBB` form.
///
/// Accepts `#rgb`, `#rrggbb` and `#rrggbbaa` (alpha is dropped); returns
/// `None` for anything else.
pub fn normalize_hex_color(color: &str) -> Option<String> {
    let hex = color.strip_prefix('#')?.trim();
    let expand = |c: char| -> String { format!("{c}{c}") };
    let normalized = match hex.len() {
        3 => hex.chars().map(expand).collect::<String>(),
        6 => hex.to_string(),
        8 => hex[..6].to_string(),
        _ => return None,
    };
    if !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("#{}", normalized.to_uppercase()))
}

/// Parse a normalized hex color into RGB channels.
pub fn hex_to_rgb(color: &str) -> Option<[u8; 3]> {
    let hex = normalize_hex_color(color)?;
    let hex = &hex[1..];
    Some([
        u8::from_str_radix(&hex[0..2], 16).ok()?,
        u8::from_str_radix(&hex[2..4], 16).ok()?,
        u8::from_str_radix(&hex[4..6], 16).ok()?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stroke_is_complete() {
        let s = Stroke::new(
            StrokeKind::Pen,
            "#FF0000",
            4.0,
            vec![Point::new(0.0, 0.0)],
            1000,
        );
        assert!(s.is_complete);
        assert_eq!(s.kind, StrokeKind::Pen);
        assert_eq!(s.color, "#FF0000");
        assert!(s.id.starts_with("1000-"));
    }

    #[test]
    fn test_negative_size_clamped() {
        let s = Stroke::new(StrokeKind::Pen, "#000000", -3.0, vec![Point::ZERO], 0);
        assert_eq!(s.size, 0.0);
    }

    #[test]
    fn test_background_derivation_latest_wins() {
        let strokes = vec![
            Stroke::background("#FFFFFF", 1),
            Stroke::new(StrokeKind::Pen, "#FF0000", 2.0, vec![Point::ZERO], 2),
            Stroke::background("#000000", 3),
        ];
        assert_eq!(current_background(&strokes), "#000000");
    }

    #[test]
    fn test_background_defaults_to_white() {
        assert_eq!(current_background(&[]), DEFAULT_BACKGROUND);
        let pen_only = vec![Stroke::new(
            StrokeKind::Pen,
            "#123456",
            1.0,
            vec![Point::ZERO],
            1,
        )];
        assert_eq!(current_background(&pen_only), DEFAULT_BACKGROUND);
    }

    #[test]
    fn test_normalize_hex_color() {
        assert_eq!(normalize_hex_color("#abc").as_deref(), Some("#AABBCC"));
        assert_eq!(normalize_hex_color("#ff0000").as_deref(), Some("#FF0000"));
        assert_eq!(normalize_hex_color("#11223344").as_deref(), Some("#112233"));
        assert_eq!(normalize_hex_color("red"), None);
        assert_eq!(normalize_hex_color("#12345"), None);
        assert_eq!(normalize_hex_color("#gggggg"), None);
    }

    #[test]
    fn test_hex_to_rgb() {
        assert_eq!(hex_to_rgb("#FF8000"), Some([255, 128, 0]));
        assert_eq!(hex_to_rgb("nope"), None);
    }

    #[test]
    fn test_apply_patch() {
        let mut s = Stroke::new(StrokeKind::Pen, "#000000", 4.0, vec![Point::ZERO], 1);
        s.apply_patch(&StrokePatch {
            color: Some("#ff0000".to_string()),
            size: Some(8.0),
            ..StrokePatch::default()
        });
        assert_eq!(s.color, "#FF0000");
        assert_eq!(s.size, 8.0);
        // Untouched fields survive
        assert_eq!(s.points, vec![Point::ZERO]);

        // Invalid color in a patch is ignored, not propagated
        s.apply_patch(&StrokePatch::color("oops".to_string()));
        assert_eq!(s.color, "#FF0000");
    }

    #[test]
    fn test_text_bounds_contains_anchor_region() {
        let s = Stroke::text(Point::new(50.0, 50.0), "Hi".to_string(), "#000000", 20.0, 1);
        let b = s.text_bounds().unwrap();
        assert!(b.contains(Point::new(55.0, 55.0)));
        assert!(!b.contains(Point::new(500.0, 500.0)));
    }

    #[test]
    fn test_text_bounds_non_text_is_none() {
        let s = Stroke::new(StrokeKind::Pen, "#000000", 2.0, vec![Point::ZERO], 1);
        assert!(s.text_bounds().is_none());
    }

    #[test]
    fn test_serde_roundtrip_skips_absent_options() {
        let s = Stroke::new(StrokeKind::Pen, "#FF0000", 4.0, vec![Point::new(1.0, 2.0)], 9);
        let json = serde_json::to_string(&s).unwrap();
        assert!(!json.contains("feather"));
        assert!(!json.contains("\"text\""));
        let back: Stroke = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, s.id);
        assert_eq!(back.points, s.points);
    }
}
