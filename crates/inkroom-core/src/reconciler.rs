//! Sync & history reconciler.
//!
//! Owns the authoritative local stroke list. Local edits apply
//! optimistically before any network round-trip; the matching store
//! operations are queued and drained by the I/O layer (fire-and-forget with
//! error logging). Remote events merge in through `apply_remote`, with echo
//! suppression for the stroke under active local manipulation.

use std::collections::HashMap;

use kurbo::Point;

use crate::eraser::erase_against_all;
use crate::history::{History, HistoryAction};
use crate::stroke::{Stroke, StrokeId, StrokePatch, current_background};
use crate::timing::{Debounce, UPDATE_DEBOUNCE_MS};

/// A queued store operation awaiting propagation.
#[derive(Debug, Clone)]
pub enum StoreOp {
    Insert(Stroke),
    Update { id: StrokeId, patch: StrokePatch },
    Delete(StrokeId),
    DeleteAll,
}

/// Remote event feed into the reconciler.
#[derive(Debug, Clone)]
pub enum RemoteEvent {
    Inserted(Stroke),
    Updated { id: StrokeId, patch: StrokePatch },
    Deleted(StrokeId),
}

#[derive(Debug)]
struct PendingUpdate {
    patch: StrokePatch,
    debounce: Debounce,
}

/// Reconciles optimistic local mutations with the remote stream.
#[derive(Debug)]
pub struct Reconciler {
    strokes: Vec<Stroke>,
    history: History,
    outgoing: Vec<StoreOp>,
    /// Per-stroke-id coalesced updates; a new patch for the same id
    /// replaces the pending timer, it never stacks.
    pending_updates: HashMap<StrokeId, PendingUpdate>,
    /// The stroke under active local manipulation, if any. Remote updates
    /// for it are dropped so the lagging authoritative snapshot cannot
    /// snap it back mid-drag.
    suppressed: Option<StrokeId>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            strokes: Vec::new(),
            history: History::new(),
            outgoing: Vec::new(),
            pending_updates: HashMap::new(),
            suppressed: None,
        }
    }

    /// Seed local state from the initial fetch, ordered by creation time
    /// so last-write-on-top holds.
    pub fn load_initial(&mut self, mut strokes: Vec<Stroke>) {
        strokes.sort_by_key(|s| s.timestamp);
        strokes.retain(|s| s.is_complete);
        self.strokes = strokes;
        self.history.clear();
    }

    /// The committed stroke list, in paint order (oldest first).
    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn get(&self, id: &str) -> Option<&Stroke> {
        self.strokes.iter().find(|s| s.id == id)
    }

    /// Current derived background color.
    pub fn background(&self) -> &str {
        current_background(&self.strokes)
    }

    // --- Local operations ---

    /// Append a stroke locally, record history, queue the insert.
    pub fn add(&mut self, stroke: Stroke) {
        debug_assert!(stroke.is_complete, "only completed strokes are persisted");
        self.history.record(HistoryAction::Add {
            stroke: stroke.clone(),
        });
        self.strokes.push(stroke.clone());
        self.outgoing.push(StoreOp::Insert(stroke));
    }

    /// Splice partial fields into a stroke immediately; network
    /// propagation is debounced per stroke id. Live edits record no
    /// history; call [`Reconciler::finalize_update`] at gesture end.
    pub fn update_live(&mut self, id: &str, patch: StrokePatch, now_ms: i64) {
        let Some(stroke) = self.strokes.iter_mut().find(|s| s.id == id) else {
            return;
        };
        stroke.apply_patch(&patch);

        let pending = self
            .pending_updates
            .entry(id.to_string())
            .or_insert_with(|| PendingUpdate {
                patch: StrokePatch::default(),
                debounce: Debounce::new(UPDATE_DEBOUNCE_MS),
            });
        merge_patch(&mut pending.patch, patch);
        pending.debounce.poke(now_ms);
    }

    /// Record the one history entry for a finished continuous edit and
    /// flush its final state to the network immediately.
    pub fn finalize_update(&mut self, original: Stroke, new: Stroke) {
        let id = new.id.clone();
        // The final write supersedes anything still debouncing.
        self.pending_updates.remove(&id);
        self.history.record(HistoryAction::Update {
            original,
            new: new.clone(),
        });
        self.outgoing.push(StoreOp::Update {
            id,
            patch: full_patch(&new),
        });
    }

    /// Remove a stroke locally, record history with a full copy for
    /// undo-restore, queue the delete.
    pub fn delete(&mut self, id: &str) {
        let Some(pos) = self.strokes.iter().position(|s| s.id == id) else {
            return;
        };
        let stroke = self.strokes.remove(pos);
        self.pending_updates.remove(id);
        self.history.record(HistoryAction::Delete {
            stroke: stroke.clone(),
        });
        self.outgoing.push(StoreOp::Delete(stroke.id));
    }

    /// Convert a completed eraser gesture into deletions and fragment
    /// inserts against the current committed strokes. The eraser stroke
    /// itself is never persisted.
    ///
    /// Each replaced original records a delete plus one add per fragment;
    /// untouched strokes generate no mutations at all.
    pub fn commit_erase(&mut self, eraser_points: &[Point], eraser_width: f64) {
        let replacements = erase_against_all(&self.strokes, eraser_points, eraser_width);
        for (original, fragments) in replacements {
            self.delete(&original.id);
            for fragment in fragments {
                self.add(fragment);
            }
        }
    }

    // --- Undo / redo ---

    /// Invert the most recent action locally and over the network.
    pub fn undo(&mut self) -> bool {
        let Some(action) = self.history.pop_undo() else {
            return false;
        };
        self.apply_action(&action.inverted());
        true
    }

    /// Re-apply the most recently undone action.
    pub fn redo(&mut self) -> bool {
        let Some(action) = self.history.pop_redo() else {
            return false;
        };
        self.apply_action(&action);
        true
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Apply an action's forward effect locally and queue the network op,
    /// without touching history.
    fn apply_action(&mut self, action: &HistoryAction) {
        match action {
            HistoryAction::Add { stroke } => {
                self.strokes.push(stroke.clone());
                self.outgoing.push(StoreOp::Insert(stroke.clone()));
            }
            HistoryAction::Update { new, .. } => {
                if let Some(existing) = self.strokes.iter_mut().find(|s| s.id == new.id) {
                    *existing = new.clone();
                }
                self.outgoing.push(StoreOp::Update {
                    id: new.id.clone(),
                    patch: full_patch(new),
                });
            }
            HistoryAction::Delete { stroke } => {
                self.strokes.retain(|s| s.id != stroke.id);
                self.outgoing.push(StoreOp::Delete(stroke.id.clone()));
            }
        }
    }

    // --- Remote merge ---

    /// The single stroke whose remote updates should currently be ignored
    /// (the locally selected/dragged one). Keep this current every render.
    pub fn set_suppressed(&mut self, id: Option<StrokeId>) {
        self.suppressed = id;
    }

    /// Merge a remote event into local state.
    pub fn apply_remote(&mut self, event: RemoteEvent) {
        match event {
            RemoteEvent::Inserted(stroke) => {
                if !stroke.is_complete {
                    return;
                }
                // An echo of our own optimistic insert is already present.
                if self.strokes.iter().any(|s| s.id == stroke.id) {
                    return;
                }
                self.strokes.push(stroke);
            }
            RemoteEvent::Updated { id, patch } => {
                if self.suppressed.as_deref() == Some(id.as_str()) {
                    log::debug!("suppressing remote update for locally manipulated {id}");
                    return;
                }
                if let Some(stroke) = self.strokes.iter_mut().find(|s| s.id == id) {
                    stroke.apply_patch(&patch);
                }
            }
            RemoteEvent::Deleted(id) => {
                self.strokes.retain(|s| s.id != id);
            }
        }
    }

    // --- Propagation ---

    /// Flush debounced updates whose quiet period has elapsed, then drain
    /// every queued store operation for the I/O layer to issue.
    pub fn take_ops(&mut self, now_ms: i64) -> Vec<StoreOp> {
        let due: Vec<StrokeId> = self
            .pending_updates
            .iter_mut()
            .filter_map(|(id, p)| p.debounce.fire_if_due(now_ms).then(|| id.clone()))
            .collect();
        for id in due {
            if let Some(pending) = self.pending_updates.remove(&id) {
                self.outgoing.push(StoreOp::Update {
                    id,
                    patch: pending.patch,
                });
            }
        }
        std::mem::take(&mut self.outgoing)
    }

    /// Flush one stroke's pending debounced update immediately. Used by the
    /// drag throttle so peers see movement mid-gesture instead of only
    /// after the quiet period.
    pub fn flush_pending(&mut self, id: &str) {
        if let Some(pending) = self.pending_updates.remove(id) {
            self.outgoing.push(StoreOp::Update {
                id: id.to_string(),
                patch: pending.patch,
            });
        }
    }

    /// Whether any debounced update is still waiting for its quiet period.
    pub fn has_pending_updates(&self) -> bool {
        !self.pending_updates.is_empty()
    }

    /// Wipe local state and history immediately; queue the bulk delete.
    pub fn clear_room(&mut self) {
        self.strokes.clear();
        self.pending_updates.clear();
        self.history.clear();
        self.outgoing.push(StoreOp::DeleteAll);
    }
}

/// Fold `incoming` over `base`, later fields winning.
fn merge_patch(base: &mut StrokePatch, incoming: StrokePatch) {
    if incoming.color.is_some() {
        base.color = incoming.color;
    }
    if incoming.size.is_some() {
        base.size = incoming.size;
    }
    if incoming.points.is_some() {
        base.points = incoming.points;
    }
    if incoming.text.is_some() {
        base.text = incoming.text;
    }
    if incoming.is_complete.is_some() {
        base.is_complete = incoming.is_complete;
    }
}

/// A patch carrying every mutable field of the stroke, for final writes.
fn full_patch(stroke: &Stroke) -> StrokePatch {
    StrokePatch {
        color: Some(stroke.color.clone()),
        size: Some(stroke.size),
        points: Some(stroke.points.clone()),
        text: stroke.text.clone(),
        is_complete: Some(stroke.is_complete),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stroke::StrokeKind;
    use crate::timing::UPDATE_DEBOUNCE_MS;

    fn pen(points: Vec<Point>, timestamp: i64) -> Stroke {
        Stroke::new(StrokeKind::Pen, "#FF0000", 4.0, points, timestamp)
    }

    #[test]
    fn test_add_is_optimistic_and_queued() {
        let mut rec = Reconciler::new();
        let stroke = pen(
            vec![
                Point::new(0.0, 0.0),
                Point::new(5.0, 5.0),
                Point::new(10.0, 5.0),
                Point::new(15.0, 0.0),
                Point::new(20.0, 0.0),
            ],
            1,
        );
        let id = stroke.id.clone();
        rec.add(stroke);

        // Visible before any network round-trip
        assert_eq!(rec.strokes().len(), 1);
        assert_eq!(rec.get(&id).unwrap().points.len(), 5);
        assert!(rec.get(&id).unwrap().is_complete);

        let ops = rec.take_ops(0);
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], StoreOp::Insert(s) if s.id == id));
    }

    #[test]
    fn test_undo_add_then_redo_restores_identical_stroke() {
        let mut rec = Reconciler::new();
        let stroke = pen(vec![Point::ZERO], 1);
        let id = stroke.id.clone();
        rec.add(stroke.clone());
        rec.take_ops(0);

        assert!(rec.undo());
        assert!(rec.get(&id).is_none());
        let ops = rec.take_ops(0);
        assert!(matches!(&ops[0], StoreOp::Delete(d) if *d == id));

        assert!(rec.redo());
        let restored = rec.get(&id).unwrap();
        assert_eq!(restored.points, stroke.points);
        assert_eq!(restored.color, stroke.color);
        assert_eq!(restored.size, stroke.size);
    }

    #[test]
    fn test_undo_delete_restores_full_copy() {
        let mut rec = Reconciler::new();
        let stroke = pen(vec![Point::new(3.0, 4.0)], 1);
        let id = stroke.id.clone();
        rec.add(stroke);
        rec.delete(&id);
        assert!(rec.get(&id).is_none());

        assert!(rec.undo());
        assert_eq!(rec.get(&id).unwrap().points, vec![Point::new(3.0, 4.0)]);
    }

    #[test]
    fn test_live_updates_debounce_per_id() {
        let mut rec = Reconciler::new();
        let stroke = pen(vec![Point::ZERO], 1);
        let id = stroke.id.clone();
        rec.add(stroke);
        rec.take_ops(0);

        rec.update_live(&id, StrokePatch::color("#00FF00".to_string()), 0);
        rec.update_live(&id, StrokePatch::color("#0000FF".to_string()), 50);

        // Local state reflects the latest patch immediately
        assert_eq!(rec.get(&id).unwrap().color, "#0000FF");
        // Nothing flushes inside the quiet period
        assert!(rec.take_ops(50 + UPDATE_DEBOUNCE_MS - 1).is_empty());

        // One coalesced write carrying the latest value
        let ops = rec.take_ops(50 + UPDATE_DEBOUNCE_MS);
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            StoreOp::Update { id: op_id, patch } => {
                assert_eq!(op_id, &id);
                assert_eq!(patch.color.as_deref(), Some("#0000FF"));
            }
            other => panic!("unexpected op {other:?}"),
        }
        assert!(!rec.has_pending_updates());
    }

    #[test]
    fn test_live_updates_record_no_history() {
        let mut rec = Reconciler::new();
        let stroke = pen(vec![Point::ZERO], 1);
        let id = stroke.id.clone();
        rec.add(stroke);
        assert!(rec.can_undo());
        rec.undo();
        rec.redo();

        rec.update_live(&id, StrokePatch::color("#00FF00".to_string()), 0);
        // Still just the add on the stack
        rec.undo();
        assert!(!rec.can_undo());
    }

    #[test]
    fn test_finalize_update_records_one_action() {
        let mut rec = Reconciler::new();
        let stroke = pen(vec![Point::ZERO], 1);
        let id = stroke.id.clone();
        rec.add(stroke.clone());
        rec.take_ops(0);

        // Drag: many live updates, one finalize
        for i in 1..=10 {
            let moved = vec![Point::new(i as f64, 0.0)];
            rec.update_live(&id, StrokePatch::points(moved), i * 10);
        }
        let new = rec.get(&id).unwrap().clone();
        rec.finalize_update(stroke.clone(), new.clone());

        // Final write flushes immediately and clears the debounce
        let ops = rec.take_ops(0);
        assert_eq!(ops.len(), 1);
        assert!(!rec.has_pending_updates());

        // One undo returns to the pre-drag snapshot
        assert!(rec.undo());
        assert_eq!(rec.get(&id).unwrap().points, stroke.points);
        assert!(rec.redo());
        assert_eq!(rec.get(&id).unwrap().points, new.points);
    }

    #[test]
    fn test_echo_suppression_for_selected_stroke() {
        let mut rec = Reconciler::new();
        let stroke = pen(vec![Point::ZERO], 1);
        let id = stroke.id.clone();
        rec.add(stroke);

        rec.set_suppressed(Some(id.clone()));
        rec.apply_remote(RemoteEvent::Updated {
            id: id.clone(),
            patch: StrokePatch::points(vec![Point::new(99.0, 99.0)]),
        });
        // The lagging remote snapshot must not snap the drag back
        assert_eq!(rec.get(&id).unwrap().points, vec![Point::ZERO]);

        rec.set_suppressed(None);
        rec.apply_remote(RemoteEvent::Updated {
            id: id.clone(),
            patch: StrokePatch::points(vec![Point::new(99.0, 99.0)]),
        });
        assert_eq!(rec.get(&id).unwrap().points, vec![Point::new(99.0, 99.0)]);
    }

    #[test]
    fn test_remote_insert_ignores_echo_and_incomplete() {
        let mut rec = Reconciler::new();
        let stroke = pen(vec![Point::ZERO], 1);
        rec.add(stroke.clone());

        rec.apply_remote(RemoteEvent::Inserted(stroke.clone()));
        assert_eq!(rec.strokes().len(), 1);

        let mut ghost = pen(vec![Point::ZERO], 2);
        ghost.is_complete = false;
        rec.apply_remote(RemoteEvent::Inserted(ghost));
        assert_eq!(rec.strokes().len(), 1);
    }

    #[test]
    fn test_commit_erase_splits_and_deletes_original() {
        let mut rec = Reconciler::new();
        let points = (0..=20).step_by(5).map(|x| Point::new(x as f64, 0.0)).collect();
        let stroke = Stroke::new(StrokeKind::Pen, "#000000", 10.0, points, 1);
        let id = stroke.id.clone();
        rec.add(stroke);
        rec.take_ops(0);

        rec.commit_erase(&[Point::new(8.0, 0.0), Point::new(12.0, 0.0)], 10.0);

        assert!(rec.get(&id).is_none());
        assert_eq!(rec.strokes().len(), 2);
        let ops = rec.take_ops(0);
        assert!(matches!(&ops[0], StoreOp::Delete(d) if *d == id));
        assert_eq!(
            ops.iter().filter(|op| matches!(op, StoreOp::Insert(_))).count(),
            2
        );
    }

    #[test]
    fn test_commit_erase_miss_is_silent() {
        let mut rec = Reconciler::new();
        rec.add(pen(vec![Point::ZERO, Point::new(10.0, 0.0)], 1));
        rec.take_ops(0);

        rec.commit_erase(&[Point::new(500.0, 500.0)], 10.0);
        assert_eq!(rec.strokes().len(), 1);
        assert!(rec.take_ops(0).is_empty());
    }

    #[test]
    fn test_initial_load_sorts_and_drops_incomplete() {
        let mut rec = Reconciler::new();
        let mut ghost = pen(vec![Point::ZERO], 15);
        ghost.is_complete = false;
        rec.load_initial(vec![pen(vec![Point::ZERO], 20), ghost, pen(vec![Point::ZERO], 10)]);

        let times: Vec<_> = rec.strokes().iter().map(|s| s.timestamp).collect();
        assert_eq!(times, vec![10, 20]);
    }

    #[test]
    fn test_clear_room() {
        let mut rec = Reconciler::new();
        rec.add(pen(vec![Point::ZERO], 1));
        rec.take_ops(0);

        rec.clear_room();
        assert!(rec.strokes().is_empty());
        assert!(!rec.can_undo());
        let ops = rec.take_ops(0);
        assert!(matches!(ops[0], StoreOp::DeleteAll));
    }

    #[test]
    fn test_background_derivation() {
        let mut rec = Reconciler::new();
        rec.add(Stroke::background("#FFFFFF", 1));
        rec.add(pen(vec![Point::ZERO], 2));
        rec.add(Stroke::background("#000000", 3));
        assert_eq!(rec.background(), "#000000");
    }
}
