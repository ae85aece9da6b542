//! Per-tool gesture handling: the drawing input state machine.
//!
//! Pointer events come in, finished strokes (or erase commits, fill
//! requests, text sessions) come out through the reconciler and a small
//! set of side effects the caller executes. Live feedback reads the raw
//! point buffer every frame; network-facing broadcasts ride the throttles
//! declared in [`crate::timing`].

use kurbo::{Point, Vec2};

use crate::geometry::is_point_near_polyline;
use crate::reconciler::Reconciler;
use crate::stroke::{Stroke, StrokeId, StrokeKind, StrokePatch, generate_stroke_id};
use crate::timing::{CURSOR_THROTTLE_MS, DRAG_SYNC_THROTTLE_MS, STROKE_PREVIEW_THROTTLE_MS, Throttle};

/// Extra slop added to pen hit-testing beyond half the stroke width.
const HIT_TEST_SLOP: f64 = 4.0;

/// The active tool mode. `Select` is a mode only; it never produces a
/// persisted stroke of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Pen,
    Eraser,
    Text,
    Fill,
    Select,
}

/// An in-flight text editing session.
#[derive(Debug, Clone)]
pub struct TextSession {
    /// Target stroke when editing existing text; `None` in create mode.
    pub editing: Option<StrokeId>,
    /// Anchor position for the text.
    pub position: Point,
    /// Text to pre-fill the editor with (existing content in edit mode).
    pub initial_text: String,
}

#[derive(Debug, Clone)]
enum GestureState {
    Idle,
    Drawing {
        /// Stable identity for the in-progress broadcast.
        gesture_id: StrokeId,
        /// Raw, unresampled samples; splitting/resampling happens at
        /// commit or erase time only.
        points: Vec<Point>,
    },
    Dragging {
        id: StrokeId,
        /// Pointer position at grab time.
        grab: Point,
        /// Deep copy of the pre-drag stroke, for the undo record.
        snapshot: Stroke,
        moved: bool,
    },
    Typing(TextSession),
}

/// Side effects the embedding layer must carry out.
#[derive(Debug, Clone)]
pub enum ToolEffect {
    /// Publish (or clear, with `None`) this session's in-progress stroke.
    BroadcastPreview(Option<Stroke>),
    /// Publish the cursor position to presence.
    BroadcastCursor(Point),
    /// Run the flood fill engine at `seed` against the committed raster;
    /// commit a fill stroke only if it returns a patch.
    RequestFill { seed: Point },
    /// A text session opened; show the editor.
    TextSessionStarted(TextSession),
}

/// Gesture state machine for the drawing surface.
#[derive(Debug)]
pub struct ToolController {
    tool: Tool,
    /// Current pen color (normalized upstream by the stroke constructor).
    pub color: String,
    /// Current pen/eraser width.
    pub size: f64,
    /// Soft-brush blur radius (pen only).
    pub feather: Option<f64>,
    state: GestureState,
    selected: Option<StrokeId>,
    preview_throttle: Throttle,
    drag_throttle: Throttle,
    cursor_throttle: Throttle,
}

impl ToolController {
    pub fn new() -> Self {
        Self {
            tool: Tool::Pen,
            color: "#000000".to_string(),
            size: 4.0,
            feather: None,
            state: GestureState::Idle,
            selected: None,
            preview_throttle: Throttle::new(STROKE_PREVIEW_THROTTLE_MS),
            drag_throttle: Throttle::new(DRAG_SYNC_THROTTLE_MS),
            cursor_throttle: Throttle::new(CURSOR_THROTTLE_MS),
        }
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    /// Switch tools. Abandons an unfinished draw buffer, emitting the
    /// preview-clearing broadcast so peers drop the ghost; a typing session
    /// stays open and must be committed or cancelled explicitly.
    pub fn set_tool(&mut self, tool: Tool) -> Vec<ToolEffect> {
        let mut effects = Vec::new();
        if matches!(self.state, GestureState::Drawing { .. }) {
            effects.push(ToolEffect::BroadcastPreview(None));
        }
        if matches!(self.state, GestureState::Drawing { .. } | GestureState::Dragging { .. }) {
            self.state = GestureState::Idle;
        }
        if tool != Tool::Select {
            self.selected = None;
        }
        self.tool = tool;
        effects
    }

    /// The currently selected stroke. Feed this into
    /// [`Reconciler::set_suppressed`] every render so echo suppression
    /// stays current.
    pub fn selected(&self) -> Option<&StrokeId> {
        self.selected.as_ref()
    }

    /// The raw in-progress point buffer, for per-frame overlay rendering.
    pub fn live_points(&self) -> Option<&[Point]> {
        match &self.state {
            GestureState::Drawing { points, .. } => Some(points),
            _ => None,
        }
    }

    /// Whether a text session is open.
    pub fn is_typing(&self) -> bool {
        matches!(self.state, GestureState::Typing(_))
    }

    /// The stroke currently being edited inline (skipped by the
    /// committed-layer painter to avoid a double-render flash).
    pub fn editing_text_id(&self) -> Option<&StrokeId> {
        match &self.state {
            GestureState::Typing(session) => session.editing.as_ref(),
            _ => None,
        }
    }

    // --- Pointer events ---

    pub fn pointer_down(
        &mut self,
        point: Point,
        reconciler: &mut Reconciler,
        now_ms: i64,
    ) -> Vec<ToolEffect> {
        let mut effects = Vec::new();
        match (&self.state, self.tool) {
            (GestureState::Idle, Tool::Pen | Tool::Eraser) => {
                self.state = GestureState::Drawing {
                    gesture_id: generate_stroke_id(now_ms),
                    points: vec![point],
                };
            }
            (GestureState::Idle, Tool::Select) => {
                let hit = self
                    .hit_test(reconciler, point)
                    .and_then(|id| reconciler.get(&id).cloned());
                match hit {
                    Some(snapshot) => {
                        // Snapshot before any movement, for the undo record.
                        self.selected = Some(snapshot.id.clone());
                        self.drag_throttle.reset();
                        self.state = GestureState::Dragging {
                            id: snapshot.id.clone(),
                            grab: point,
                            snapshot,
                            moved: false,
                        };
                    }
                    None => {
                        self.selected = None;
                    }
                }
            }
            (GestureState::Idle, Tool::Text) => {
                let existing = self
                    .hit_test_text(reconciler, point)
                    .and_then(|id| reconciler.get(&id).cloned());
                let session = match existing {
                    Some(existing) => TextSession {
                        position: existing.anchor().unwrap_or(point),
                        initial_text: existing.text.clone().unwrap_or_default(),
                        editing: Some(existing.id),
                    },
                    None => TextSession {
                        editing: None,
                        position: point,
                        initial_text: String::new(),
                    },
                };
                effects.push(ToolEffect::TextSessionStarted(session.clone()));
                self.state = GestureState::Typing(session);
            }
            (GestureState::Idle, Tool::Fill) => {
                // Dispatched for the caller to run after the busy cursor
                // has a chance to paint; no drag phase exists.
                effects.push(ToolEffect::RequestFill { seed: point });
            }
            // Starting anything while typing is ignored; the session must
            // be committed or cancelled first.
            (GestureState::Typing(_), _) => {}
            _ => {}
        }
        effects
    }

    pub fn pointer_move(
        &mut self,
        point: Point,
        reconciler: &mut Reconciler,
        now_ms: i64,
    ) -> Vec<ToolEffect> {
        let mut effects = Vec::new();
        if self.cursor_throttle.should_fire(now_ms) {
            effects.push(ToolEffect::BroadcastCursor(point));
        }

        match &mut self.state {
            GestureState::Drawing { gesture_id, points } => {
                points.push(point);
                if self.preview_throttle.should_fire(now_ms) {
                    let preview = preview_stroke(
                        gesture_id.clone(),
                        self.tool,
                        &self.color,
                        self.size,
                        self.feather,
                        points.clone(),
                        now_ms,
                    );
                    effects.push(ToolEffect::BroadcastPreview(Some(preview)));
                }
            }
            GestureState::Dragging { id, grab, snapshot, moved } => {
                let delta = Vec2::new(point.x - grab.x, point.y - grab.y);
                let new_points: Vec<Point> = snapshot
                    .points
                    .iter()
                    .map(|p| Point::new(p.x + delta.x, p.y + delta.y))
                    .collect();
                *moved = true;
                let id = id.clone();
                // Fast local, slow network: the stroke moves every frame
                // locally while writes ride the drag throttle.
                reconciler.update_live(&id, StrokePatch::points(new_points), now_ms);
                if self.drag_throttle.should_fire(now_ms) {
                    reconciler.flush_pending(&id);
                }
            }
            _ => {}
        }
        effects
    }

    pub fn pointer_up(
        &mut self,
        point: Point,
        reconciler: &mut Reconciler,
        now_ms: i64,
    ) -> Vec<ToolEffect> {
        let mut effects = Vec::new();
        match std::mem::replace(&mut self.state, GestureState::Idle) {
            GestureState::Drawing { mut points, .. } => {
                if points.last() != Some(&point) {
                    points.push(point);
                }
                if points.is_empty() {
                    // Degenerate gesture: silently discarded.
                    return effects;
                }
                match self.tool {
                    Tool::Pen => {
                        let mut stroke =
                            Stroke::new(StrokeKind::Pen, &self.color, self.size, points, now_ms);
                        stroke.feather = self.feather;
                        reconciler.add(stroke);
                    }
                    Tool::Eraser => {
                        // The gesture itself is never persisted; it becomes
                        // deletions/fragmentations of intersecting strokes.
                        reconciler.commit_erase(&points, self.size);
                    }
                    _ => {}
                }
                effects.push(ToolEffect::BroadcastPreview(None));
            }
            GestureState::Dragging { id, snapshot, moved, .. } => {
                if moved {
                    if let Some(current) = reconciler.get(&id).cloned() {
                        if current.points != snapshot.points {
                            // One history entry for the whole drag.
                            reconciler.finalize_update(snapshot, current);
                        }
                    }
                }
            }
            other => self.state = other,
        }
        effects
    }

    // --- Text sessions ---

    /// Commit a text session with the composed text. Empty (trimmed) text
    /// discards the session: nothing is created, and an edited stroke is
    /// deleted rather than kept empty.
    pub fn commit_text(&mut self, text: &str, reconciler: &mut Reconciler, now_ms: i64) {
        let GestureState::Typing(session) = std::mem::replace(&mut self.state, GestureState::Idle)
        else {
            return;
        };
        let trimmed = text.trim();
        match session.editing {
            Some(id) => {
                if trimmed.is_empty() {
                    reconciler.delete(&id);
                } else if let Some(original) = reconciler.get(&id).cloned() {
                    if original.text.as_deref() != Some(trimmed) {
                        let mut new = original.clone();
                        new.text = Some(trimmed.to_string());
                        reconciler.finalize_update(original, new);
                    }
                }
            }
            None => {
                if !trimmed.is_empty() {
                    let stroke = Stroke::text(
                        session.position,
                        trimmed.to_string(),
                        &self.color,
                        self.size.max(16.0),
                        now_ms,
                    );
                    reconciler.add(stroke);
                }
            }
        }
    }

    /// Abandon a text session without committing.
    pub fn cancel_text(&mut self) {
        if matches!(self.state, GestureState::Typing(_)) {
            self.state = GestureState::Idle;
        }
    }

    // --- One-shot operations ---

    /// Place a background stroke; the most recent one wins at render time.
    pub fn place_background(&self, color: &str, reconciler: &mut Reconciler, now_ms: i64) {
        reconciler.add(Stroke::background(color, now_ms));
    }

    /// Commit the result of a fill request (called after the flood fill
    /// engine produced a patch; a leak/no-op result never reaches here).
    pub fn commit_fill(&self, seed: Point, reconciler: &mut Reconciler, now_ms: i64) {
        reconciler.add(Stroke::fill(seed, &self.color, now_ms));
    }

    // --- Hit testing ---

    /// Topmost stroke under `point`, testing in reverse z-order. Background
    /// strokes are never hit; text uses its metrics box, the pen family
    /// uses distance-to-polyline.
    pub fn hit_test(&self, reconciler: &Reconciler, point: Point) -> Option<StrokeId> {
        reconciler
            .strokes()
            .iter()
            .rev()
            .filter(|s| s.kind.is_selectable())
            .find(|s| match s.kind {
                StrokeKind::Text => s
                    .text_bounds()
                    .is_some_and(|b| b.contains(point)),
                _ => is_point_near_polyline(
                    point,
                    &s.points,
                    s.size / 2.0 + HIT_TEST_SLOP,
                ),
            })
            .map(|s| s.id.clone())
    }

    /// Topmost *text* stroke under `point`.
    fn hit_test_text(&self, reconciler: &Reconciler, point: Point) -> Option<StrokeId> {
        reconciler
            .strokes()
            .iter()
            .rev()
            .filter(|s| s.kind == StrokeKind::Text)
            .find(|s| s.text_bounds().is_some_and(|b| b.contains(point)))
            .map(|s| s.id.clone())
    }
}

impl Default for ToolController {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the `is_complete = false` stroke broadcast for ghost rendering.
fn preview_stroke(
    id: StrokeId,
    tool: Tool,
    color: &str,
    size: f64,
    feather: Option<f64>,
    points: Vec<Point>,
    now_ms: i64,
) -> Stroke {
    let kind = match tool {
        Tool::Eraser => StrokeKind::Eraser,
        _ => StrokeKind::Pen,
    };
    let mut stroke = Stroke::new(kind, color, size, points, now_ms);
    stroke.id = id;
    stroke.feather = feather;
    stroke.is_complete = false;
    stroke
}
