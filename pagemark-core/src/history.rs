//! Snapshot-based undo/redo over the canonical markup sequence.

use std::sync::Arc;

use crate::markup::Markup;

/// Immutable copy of the complete markup sequence at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot(Arc<[Markup]>);

impl Snapshot {
    pub fn capture(markups: &[Markup]) -> Self {
        Self(Arc::from(markups))
    }

    pub fn markups(&self) -> &[Markup] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<Markup> {
        self.0.to_vec()
    }
}

/// Undo and redo stacks. Depth is unbounded.
///
/// While `replaying` is set, captures are ignored: installing a snapshot
/// makes the backends fire their own change callbacks and none of those may
/// turn into a history entry.
#[derive(Debug, Default)]
pub struct History {
    undo: Vec<Snapshot>,
    redo: Vec<Snapshot>,
    replaying: bool,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `snapshot` as the state to return to, dropping any redo
    /// branch. Returns `false` when suppressed by an ongoing replay.
    pub fn record(&mut self, snapshot: Snapshot) -> bool {
        if self.replaying {
            return false;
        }
        self.undo.push(snapshot);
        self.redo.clear();
        true
    }

    pub fn capture(&mut self, current: &[Markup]) -> bool {
        if self.replaying {
            return false;
        }
        self.record(Snapshot::capture(current))
    }

    /// Pops the most recent undo snapshot, parking `current` on the redo
    /// stack. The caller installs the returned sequence.
    pub fn undo(&mut self, current: &[Markup]) -> Option<Vec<Markup>> {
        let previous = self.undo.pop()?;
        self.redo.push(Snapshot::capture(current));
        Some(previous.to_vec())
    }

    pub fn redo(&mut self, current: &[Markup]) -> Option<Vec<Markup>> {
        let next = self.redo.pop()?;
        self.undo.push(Snapshot::capture(current));
        Some(next.to_vec())
    }

    pub fn set_replaying(&mut self, replaying: bool) {
        self.replaying = replaying;
    }

    pub fn is_replaying(&self) -> bool {
        self.replaying
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo.len()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::geometry::Bounds;

    fn highlight(page: usize) -> Markup {
        Markup::highlight(page, Bounds::new(0.1, 0.1, 0.1, 0.1), Color::HIGHLIGHT)
    }

    #[test]
    fn capture_clears_redo_branch() {
        let mut history = History::new();
        let mut current = vec![];
        history.capture(&current);
        current.push(highlight(0));

        let restored = history.undo(&current).unwrap();
        assert!(restored.is_empty());
        assert!(history.can_redo());

        history.capture(&restored);
        assert!(!history.can_redo());
        assert_eq!(history.undo_depth(), 1);
    }

    #[test]
    fn undo_then_redo_round_trips_a_sequence_of_edits() {
        let mut history = History::new();
        let mut current: Vec<Markup> = Vec::new();
        let mut states = vec![current.clone()];

        for page in 0..5 {
            history.capture(&current);
            current.push(highlight(page));
            states.push(current.clone());
        }
        history.capture(&current);
        current.remove(1);
        states.push(current.clone());

        let steps = states.len() - 1;
        for expected in states.iter().rev().skip(1) {
            current = history.undo(&current).unwrap();
            assert_eq!(&current, expected);
        }
        assert!(history.undo(&current).is_none());

        for _ in 0..steps {
            current = history.redo(&current).unwrap();
        }
        assert_eq!(&current, states.last().unwrap());
        assert!(history.redo(&current).is_none());
    }

    #[test]
    fn replay_suppresses_capture() {
        let mut history = History::new();
        history.set_replaying(true);
        assert!(!history.capture(&[highlight(0)]));
        history.set_replaying(false);
        assert!(history.capture(&[highlight(0)]));
        assert_eq!(history.undo_depth(), 1);
    }

    #[test]
    fn snapshots_are_detached_from_later_edits() {
        let mut markups = vec![highlight(0)];
        let snapshot = Snapshot::capture(&markups);
        markups[0].page = 9;
        assert_eq!(snapshot.markups()[0].page, 0);
    }
}
