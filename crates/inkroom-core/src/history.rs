//! Undo/redo history of stroke mutations.

use crate::stroke::Stroke;

/// Maximum number of undoable actions to keep.
pub const MAX_UNDO_HISTORY: usize = 50;

/// One undoable mutation.
///
/// Each action captures enough state to invert itself: deletes carry the
/// full removed stroke, updates carry both sides of the edit.
#[derive(Debug, Clone)]
pub enum HistoryAction {
    /// A stroke was added.
    Add { stroke: Stroke },
    /// A stroke was edited (moved, recolored, retexted).
    Update { original: Stroke, new: Stroke },
    /// A stroke was deleted.
    Delete { stroke: Stroke },
}

impl HistoryAction {
    /// The inverse action (used when undoing, so that redo sees the
    /// forward form again).
    pub fn inverted(&self) -> HistoryAction {
        match self {
            HistoryAction::Add { stroke } => HistoryAction::Delete {
                stroke: stroke.clone(),
            },
            HistoryAction::Update { original, new } => HistoryAction::Update {
                original: new.clone(),
                new: original.clone(),
            },
            HistoryAction::Delete { stroke } => HistoryAction::Add {
                stroke: stroke.clone(),
            },
        }
    }
}

/// Bounded undo/redo stacks.
#[derive(Debug, Default)]
pub struct History {
    undo_stack: Vec<HistoryAction>,
    redo_stack: Vec<HistoryAction>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new action. Clears the redo stack: a fresh edit forks away
    /// from whatever was undone.
    pub fn record(&mut self, action: HistoryAction) {
        self.undo_stack.push(action);
        self.redo_stack.clear();
        if self.undo_stack.len() > MAX_UNDO_HISTORY {
            self.undo_stack.remove(0);
        }
    }

    /// Pop the most recent action for undoing; it moves to the redo stack.
    pub fn pop_undo(&mut self) -> Option<HistoryAction> {
        let action = self.undo_stack.pop()?;
        self.redo_stack.push(action.clone());
        Some(action)
    }

    /// Pop the most recent undone action for redoing; it moves back onto
    /// the undo stack.
    pub fn pop_redo(&mut self) -> Option<HistoryAction> {
        let action = self.redo_stack.pop()?;
        self.undo_stack.push(action.clone());
        Some(action)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Wipe both stacks (room clear).
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stroke::StrokeKind;
    use kurbo::Point;

    fn pen() -> Stroke {
        Stroke::new(StrokeKind::Pen, "#000000", 2.0, vec![Point::ZERO], 1)
    }

    #[test]
    fn test_record_and_pop() {
        let mut history = History::new();
        assert!(!history.can_undo());

        history.record(HistoryAction::Add { stroke: pen() });
        assert!(history.can_undo());
        assert!(!history.can_redo());

        let action = history.pop_undo().unwrap();
        assert!(matches!(action, HistoryAction::Add { .. }));
        assert!(history.can_redo());
        assert!(!history.can_undo());

        history.pop_redo().unwrap();
        assert!(history.can_undo());
        assert!(!history.can_redo());
    }

    #[test]
    fn test_new_action_clears_redo() {
        let mut history = History::new();
        history.record(HistoryAction::Add { stroke: pen() });
        history.pop_undo();
        assert!(history.can_redo());

        history.record(HistoryAction::Add { stroke: pen() });
        assert!(!history.can_redo());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = History::new();
        for _ in 0..(MAX_UNDO_HISTORY + 10) {
            history.record(HistoryAction::Add { stroke: pen() });
        }
        let mut count = 0;
        while history.pop_undo().is_some() {
            count += 1;
        }
        assert_eq!(count, MAX_UNDO_HISTORY);
    }

    #[test]
    fn test_inverted() {
        let a = pen();
        let mut b = a.clone();
        b.translate(5.0, 0.0);

        let inv = HistoryAction::Update {
            original: a.clone(),
            new: b.clone(),
        }
        .inverted();
        match inv {
            HistoryAction::Update { original, new } => {
                assert_eq!(original.points, b.points);
                assert_eq!(new.points, a.points);
            }
            _ => panic!("update inverts to update"),
        }

        assert!(matches!(
            HistoryAction::Add { stroke: a.clone() }.inverted(),
            HistoryAction::Delete { .. }
        ));
        assert!(matches!(
            HistoryAction::Delete { stroke: a }.inverted(),
            HistoryAction::Add { .. }
        ));
    }
}
