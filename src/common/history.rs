use std::cell::Cell;
use std::fmt::Debug;
use std::rc::Rc;
use std::sync::Arc;

/// A reversible edit.
pub trait Edit: Clone + Debug {
    /// Coalesces `next` into `self` when both describe the same action on the same element,
    /// keeping `self`'s starting state and `next`'s final state.
    fn merge(&self, next: &Self) -> Option<Self>;
    /// The same edit running the other way.
    fn inverse(&self) -> Self;
    fn info_text(&self) -> Arc<String>;
}

/// Anything able to apply an edit's target state.
pub trait Playback<E: Edit> {
    fn playback(&mut self, edit: &E);
}

#[derive(Clone, Debug)]
pub enum HistoryEntry<E: Edit> {
    Single { edit: E, stackable: bool },
    Group { edits: Vec<E>, stackable: bool },
}

impl<E: Edit> HistoryEntry<E> {
    pub fn info_text(&self) -> Arc<String> {
        match self {
            HistoryEntry::Single { edit, .. } => edit.info_text(),
            HistoryEntry::Group { edits, .. } => match edits.first() {
                Some(first) if edits.len() == 1 => first.info_text(),
                Some(first) => Arc::new(format!("{} (+{} more)", first.info_text(), edits.len() - 1)),
                None => Arc::new("Nothing".to_owned()),
            },
        }
    }

    pub fn edits(&self) -> &[E] {
        match self {
            HistoryEntry::Single { edit, .. } => std::slice::from_ref(edit),
            HistoryEntry::Group { edits, .. } => edits,
        }
    }

    /// Edits to play back, in order, to revert this entry.
    pub fn undo_sequence(&self) -> Vec<E> {
        self.edits().iter().rev().map(|e| e.inverse()).collect()
    }

    /// Edits to play back, in order, to reapply this entry.
    pub fn redo_sequence(&self) -> Vec<E> {
        self.edits().to_vec()
    }
}

/// Marks a replay in progress for as long as it lives.
pub struct ReplayGuard {
    flag: Rc<Cell<bool>>,
    previous: bool,
}

impl ReplayGuard {
    fn new(flag: Rc<Cell<bool>>) -> Self {
        let previous = flag.replace(true);
        Self { flag, previous }
    }
}

impl Drop for ReplayGuard {
    fn drop(&mut self) {
        self.flag.set(self.previous);
    }
}

#[derive(Debug)]
struct Transaction<E: Edit> {
    depth: usize,
    edits: Vec<(E, bool)>,
}

/// Undo and redo logs of recorded edits.
#[derive(Debug)]
pub struct History<E: Edit> {
    undo_log: Vec<HistoryEntry<E>>,
    redo_log: Vec<HistoryEntry<E>>,
    transaction: Option<Transaction<E>>,
    replaying: Rc<Cell<bool>>,
    sealed: bool,
    limit: Option<usize>,
}

impl<E: Edit> Default for History<E> {
    fn default() -> Self {
        Self::new(None)
    }
}

impl<E: Edit> History<E> {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            undo_log: Vec::new(),
            redo_log: Vec::new(),
            transaction: None,
            replaying: Rc::new(Cell::new(false)),
            sealed: false,
            limit,
        }
    }

    pub fn undo_log(&self) -> &[HistoryEntry<E>] {
        &self.undo_log
    }

    pub fn redo_log(&self) -> &[HistoryEntry<E>] {
        &self.redo_log
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_log.is_empty() && self.transaction.is_none()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_log.is_empty() && self.transaction.is_none()
    }

    pub fn is_replaying(&self) -> bool {
        self.replaying.get()
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    pub fn clear(&mut self) {
        self.undo_log.clear();
        self.redo_log.clear();
        self.transaction = None;
        self.sealed = false;
    }

    /// Stops the next record from coalescing into the last entry, e.g. at the end of a drag.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn record(&mut self, edit: E, stackable: bool) {
        if self.replaying.get() {
            return;
        }

        if let Some(t) = self.transaction.as_mut() {
            let merged = match t.edits.last_mut() {
                Some((last, true)) if stackable => last.merge(&edit).map(|m| *last = m),
                _ => None,
            };
            if merged.is_none() {
                t.edits.push((edit, stackable));
            }
            return;
        }

        if stackable && self.coalesce(std::slice::from_ref(&edit)) {
            tracing::trace!(edit = %edit.info_text(), "history merge");
            return;
        }

        tracing::debug!(edit = %edit.info_text(), stackable, "history record");
        self.push(HistoryEntry::Single { edit, stackable });
    }

    /// Opens (or nests into) a transaction; everything recorded until the matching
    /// `commit` becomes one undo step.
    pub fn begin(&mut self) {
        match self.transaction.as_mut() {
            Some(t) => t.depth += 1,
            None => {
                self.transaction = Some(Transaction { depth: 1, edits: Vec::new() });
            }
        }
    }

    pub fn commit(&mut self) {
        let Some(t) = self.transaction.as_mut() else {
            tracing::debug!("commit without begin ignored");
            return;
        };
        t.depth -= 1;
        if t.depth > 0 {
            return;
        }
        let Some(t) = self.transaction.take() else {
            return;
        };
        let stackable = t.edits.iter().all(|e| e.1);
        let mut edits: Vec<_> = t.edits.into_iter().map(|e| e.0).collect();
        if edits.is_empty() {
            return;
        }
        if stackable && self.coalesce(&edits) {
            tracing::trace!(edits = edits.len(), "history merge on commit");
            return;
        }
        if edits.len() == 1 {
            let edit = edits.remove(0);
            tracing::debug!(edit = %edit.info_text(), "history commit");
            self.push(HistoryEntry::Single { edit, stackable });
        } else {
            tracing::debug!(edits = edits.len(), "history commit");
            self.push(HistoryEntry::Group { edits, stackable });
        }
    }

    /// Folds stackable `incoming` edits into the newest entry. Each one merges into the edit
    /// it continues or is appended; nothing changes unless the first one continues an edit.
    fn coalesce(&mut self, incoming: &[E]) -> bool {
        if self.sealed {
            return false;
        }
        let mut edits = match self.undo_log.last() {
            Some(HistoryEntry::Single { edit, stackable: true }) => vec![edit.clone()],
            Some(HistoryEntry::Group { edits, stackable: true }) => edits.clone(),
            _ => return false,
        };
        for (i, next) in incoming.iter().enumerate() {
            match edits.iter().enumerate().find_map(|(j, e)| e.merge(next).map(|m| (j, m))) {
                Some((j, merged)) => edits[j] = merged,
                None if i == 0 => return false,
                None => edits.push(next.clone()),
            }
        }
        let entry = if edits.len() == 1 {
            HistoryEntry::Single { edit: edits.remove(0), stackable: true }
        } else {
            HistoryEntry::Group { edits, stackable: true }
        };
        if let Some(last) = self.undo_log.last_mut() {
            *last = entry;
        }
        self.redo_log.clear();
        true
    }

    fn push(&mut self, entry: HistoryEntry<E>) {
        self.undo_log.push(entry);
        self.redo_log.clear();
        self.sealed = false;
        if let Some(limit) = self.limit {
            if self.undo_log.len() > limit {
                let excess = self.undo_log.len() - limit;
                self.undo_log.drain(..excess);
            }
        }
    }

    /// Moves the newest undo entry onto the redo log and hands back what to play.
    pub fn take_undo(&mut self) -> Option<Vec<E>> {
        if self.transaction.is_some() || self.replaying.get() {
            tracing::debug!("undo refused while a transaction or replay is open");
            return None;
        }
        let entry = self.undo_log.pop()?;
        tracing::debug!(entry = %entry.info_text(), "undo");
        let sequence = entry.undo_sequence();
        self.redo_log.push(entry);
        self.sealed = true;
        Some(sequence)
    }

    /// Moves the newest redo entry back onto the undo log and hands back what to play.
    pub fn take_redo(&mut self) -> Option<Vec<E>> {
        if self.transaction.is_some() || self.replaying.get() {
            tracing::debug!("redo refused while a transaction or replay is open");
            return None;
        }
        let entry = self.redo_log.pop()?;
        tracing::debug!(entry = %entry.info_text(), "redo");
        let sequence = entry.redo_sequence();
        self.undo_log.push(entry);
        self.sealed = true;
        Some(sequence)
    }

    /// Suppresses recording until dropped. Released on unwind as well.
    pub fn replay_guard(&self) -> ReplayGuard {
        ReplayGuard::new(self.replaying.clone())
    }

    pub fn undo<T: Playback<E>>(&mut self, target: &mut T) -> bool {
        let Some(sequence) = self.take_undo() else {
            return false;
        };
        let _guard = self.replay_guard();
        for edit in &sequence {
            target.playback(edit);
        }
        true
    }

    pub fn redo<T: Playback<E>>(&mut self, target: &mut T) -> bool {
        let Some(sequence) = self.take_redo() else {
            return false;
        };
        let _guard = self.replay_guard();
        for edit in &sequence {
            target.playback(edit);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    #[derive(Clone, Debug, PartialEq)]
    enum TestEdit {
        Drag { ctx: u32, from: i64, to: i64 },
        Rename { ctx: u32, from: String, to: String },
    }

    impl Edit for TestEdit {
        fn merge(&self, next: &Self) -> Option<Self> {
            match (self, next) {
                (TestEdit::Drag { ctx: c1, from, .. }, TestEdit::Drag { ctx: c2, to, .. }) if c1 == c2 => {
                    Some(TestEdit::Drag { ctx: *c1, from: *from, to: *to })
                }
                _ => None,
            }
        }

        fn inverse(&self) -> Self {
            match self.clone() {
                TestEdit::Drag { ctx, from, to } => TestEdit::Drag { ctx, from: to, to: from },
                TestEdit::Rename { ctx, from, to } => TestEdit::Rename { ctx, from: to, to: from },
            }
        }

        fn info_text(&self) -> Arc<String> {
            Arc::new(format!("{:?}", self))
        }
    }

    #[derive(Default)]
    struct Board {
        positions: HashMap<u32, i64>,
        names: HashMap<u32, String>,
    }

    impl Playback<TestEdit> for Board {
        fn playback(&mut self, edit: &TestEdit) {
            match edit {
                TestEdit::Drag { ctx, to, .. } => {
                    self.positions.insert(*ctx, *to);
                }
                TestEdit::Rename { ctx, to, .. } => {
                    self.names.insert(*ctx, to.clone());
                }
            }
        }
    }

    #[test]
    fn consecutive_stackable_drags_coalesce() {
        let mut h = History::default();
        h.record(TestEdit::Drag { ctx: 1, from: 0, to: 5 }, true);
        h.record(TestEdit::Drag { ctx: 1, from: 5, to: 9 }, true);
        assert_eq!(h.undo_log().len(), 1);
        assert_eq!(h.undo_log()[0].edits(), &[TestEdit::Drag { ctx: 1, from: 0, to: 9 }]);
    }

    #[test]
    fn different_context_or_unstackable_does_not_coalesce() {
        let mut h = History::default();
        h.record(TestEdit::Drag { ctx: 1, from: 0, to: 5 }, true);
        h.record(TestEdit::Drag { ctx: 2, from: 0, to: 5 }, true);
        h.record(TestEdit::Drag { ctx: 2, from: 5, to: 7 }, false);
        assert_eq!(h.undo_log().len(), 3);
    }

    #[test]
    fn seal_ends_coalescing() {
        let mut h = History::default();
        h.record(TestEdit::Drag { ctx: 1, from: 0, to: 5 }, true);
        h.seal();
        h.record(TestEdit::Drag { ctx: 1, from: 5, to: 9 }, true);
        assert_eq!(h.undo_log().len(), 2);
    }

    #[test]
    fn undo_redo_round_trip() {
        let mut board = Board::default();
        let mut h = History::default();

        board.positions.insert(1, 5);
        h.record(TestEdit::Drag { ctx: 1, from: 0, to: 5 }, true);

        assert!(h.undo(&mut board));
        assert_eq!(board.positions[&1], 0);
        assert_eq!(h.redo_log().len(), 1);
        assert!(h.redo(&mut board));
        assert_eq!(board.positions[&1], 5);
        assert!(!h.redo(&mut board));
    }

    #[test]
    fn empty_logs_are_noops() {
        let mut board = Board::default();
        let mut h: History<TestEdit> = History::default();
        assert!(!h.undo(&mut board));
        assert!(!h.redo(&mut board));
        assert!(board.positions.is_empty());
    }

    #[test]
    fn fresh_record_clears_redo() {
        let mut board = Board::default();
        let mut h = History::default();
        h.record(TestEdit::Drag { ctx: 1, from: 0, to: 5 }, false);
        h.undo(&mut board);
        assert!(h.can_redo());
        h.record(TestEdit::Drag { ctx: 1, from: 0, to: 3 }, false);
        assert!(!h.can_redo());
    }

    #[test]
    fn transaction_is_one_step() {
        let mut board = Board::default();
        let mut h = History::default();

        h.begin();
        board.positions.insert(1, 5);
        h.record(TestEdit::Drag { ctx: 1, from: 0, to: 5 }, true);
        h.begin();
        board.names.insert(1, "b".to_owned());
        h.record(TestEdit::Rename { ctx: 1, from: "a".to_owned(), to: "b".to_owned() }, false);
        h.commit();
        assert!(!h.can_undo());
        h.commit();

        assert_eq!(h.undo_log().len(), 1);
        assert!(h.undo(&mut board));
        assert_eq!(board.positions[&1], 0);
        assert_eq!(board.names[&1], "a");
        assert!(h.redo(&mut board));
        assert_eq!(board.positions[&1], 5);
        assert_eq!(board.names[&1], "b");
    }

    #[test]
    fn stackable_transactions_continue_the_last_entry() {
        let mut board = Board::default();
        let mut h = History::default();
        h.record(TestEdit::Drag { ctx: 1, from: 0, to: 5 }, true);

        h.begin();
        h.record(TestEdit::Drag { ctx: 1, from: 5, to: 9 }, true);
        h.record(TestEdit::Drag { ctx: 2, from: 0, to: 3 }, true);
        h.commit();
        h.begin();
        h.record(TestEdit::Drag { ctx: 1, from: 9, to: 11 }, true);
        h.record(TestEdit::Drag { ctx: 2, from: 3, to: 4 }, true);
        h.commit();

        assert_eq!(h.undo_log().len(), 1);
        assert_eq!(
            h.undo_log()[0].edits(),
            &[
                TestEdit::Drag { ctx: 1, from: 0, to: 11 },
                TestEdit::Drag { ctx: 2, from: 0, to: 4 },
            ]
        );
        board.positions.insert(1, 11);
        board.positions.insert(2, 4);
        assert!(h.undo(&mut board));
        assert_eq!(board.positions[&1], 0);
        assert_eq!(board.positions[&2], 0);
    }

    #[test]
    fn transaction_with_unstackable_edit_stands_alone() {
        let mut h = History::default();
        h.record(TestEdit::Drag { ctx: 1, from: 0, to: 5 }, true);
        h.begin();
        h.record(TestEdit::Drag { ctx: 1, from: 5, to: 9 }, true);
        h.record(TestEdit::Rename { ctx: 1, from: "a".to_owned(), to: "b".to_owned() }, false);
        h.commit();
        assert_eq!(h.undo_log().len(), 2);

        // a single stackable edit committed alone keeps coalescing
        h.begin();
        h.record(TestEdit::Drag { ctx: 3, from: 0, to: 1 }, true);
        h.commit();
        h.record(TestEdit::Drag { ctx: 3, from: 1, to: 2 }, true);
        assert_eq!(h.undo_log().len(), 3);
    }

    #[test]
    fn empty_transaction_records_nothing() {
        let mut h: History<TestEdit> = History::default();
        h.begin();
        h.commit();
        h.commit();
        assert!(h.undo_log().is_empty());
    }

    struct Recorder<'a> {
        history: &'a mut History<TestEdit>,
    }

    impl Playback<TestEdit> for Recorder<'_> {
        fn playback(&mut self, edit: &TestEdit) {
            self.history.record(edit.clone(), false);
        }
    }

    #[test]
    fn recording_is_suppressed_during_replay() {
        let mut h = History::default();
        h.record(TestEdit::Drag { ctx: 1, from: 0, to: 5 }, false);
        let sequence = h.take_undo().unwrap();
        {
            let _guard = h.replay_guard();
            let mut r = Recorder { history: &mut h };
            for e in &sequence {
                r.playback(e);
            }
        }
        assert!(h.undo_log().is_empty());
        assert_eq!(h.redo_log().len(), 1);
        assert!(!h.is_replaying());
    }

    struct Exploding;

    impl Playback<TestEdit> for Exploding {
        fn playback(&mut self, _edit: &TestEdit) {
            panic!("playback failed");
        }
    }

    #[test]
    fn guard_released_when_playback_panics() {
        let mut h = History::default();
        h.record(TestEdit::Drag { ctx: 1, from: 0, to: 5 }, false);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            h.undo(&mut Exploding);
        }));
        assert!(result.is_err());
        assert!(!h.is_replaying());
        h.record(TestEdit::Drag { ctx: 2, from: 0, to: 1 }, false);
        assert_eq!(h.undo_log().len(), 1);
    }

    #[test]
    fn limit_drops_oldest_entries() {
        let mut h = History::new(Some(2));
        for i in 0..4 {
            h.record(TestEdit::Drag { ctx: i, from: 0, to: 1 }, false);
        }
        assert_eq!(h.undo_log().len(), 2);
        assert_eq!(h.undo_log()[0].edits(), &[TestEdit::Drag { ctx: 2, from: 0, to: 1 }]);
    }

    proptest! {
        #[test]
        fn undo_all_then_redo_all(moves in proptest::collection::vec((0u32..4, -100i64..100), 1..20), n in 0usize..20) {
            let mut board = Board::default();
            let mut h = History::default();
            let mut snapshots = vec![board.positions.clone()];
            for (ctx, to) in moves {
                let from = board.positions.get(&ctx).copied().unwrap_or(0);
                board.positions.insert(ctx, to);
                h.record(TestEdit::Drag { ctx, from, to }, false);
                snapshots.push(board.positions.clone());
            }
            let normalize = |m: &HashMap<u32, i64>| {
                let mut v: Vec<_> = m.iter().filter(|e| *e.1 != 0).map(|(k, v)| (*k, *v)).collect();
                v.sort();
                v
            };
            let depth = h.undo_log().len();
            let n = n.min(depth);
            for _ in 0..n {
                prop_assert!(h.undo(&mut board));
            }
            prop_assert_eq!(normalize(&board.positions), normalize(&snapshots[depth - n]));
            for _ in 0..n {
                prop_assert!(h.redo(&mut board));
            }
            prop_assert_eq!(normalize(&board.positions), normalize(&snapshots[depth]));
        }
    }
}
