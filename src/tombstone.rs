//! Deferred-tombstone emitter (`# 4.F`).
//!
//! Operates on a key's *raw*, unreduced history — entirely independent
//! of bucket reduction — because the overwrite relationships it tracks
//! are a property of the input order, not of what survives compaction.

use tracing::{debug, error, trace};

use crate::error::{HandlerError, WriteIteratorError};
use crate::statement::{Statement, StatementFormat, StatementType};

/// A handler for secondary-index tombstones, owned exclusively by one
/// write iterator (`# 5`). Called synchronously; implementations must
/// not re-enter the iterator.
pub trait DeferredDeleteHandler<P> {
    /// Called exactly once per deferred-delete trigger. `old.type !=
    /// Delete`, `new.type ∈ {Replace, Delete}`, `new.has_deferred_delete()`.
    fn process(&mut self, old: &Statement<P>, new: &Statement<P>) -> Result<(), HandlerError>;

    /// Called from `close()`; releases references and buffered output.
    fn destroy(&mut self) {}
}

/// An in-memory handler that buffers surrogate deletes for inspection —
/// the concrete implementation a caller without a real secondary-index
/// layer plugs in, and what the test suite uses.
#[derive(Debug, Default)]
pub struct BufferingHandler<P> {
    buffered: Vec<Statement<P>>,
}

impl<P: Clone> DeferredDeleteHandler<P> for BufferingHandler<P> {
    fn process(&mut self, old: &Statement<P>, new: &Statement<P>) -> Result<(), HandlerError> {
        // The surrogate carries old's key columns at new's LSN (`# 3`
        // invariant 6); the caller's `StatementFormat` already built it,
        // this handler only needs old's key to label it for inspection.
        let _ = old;
        self.buffered.push(new.clone());
        Ok(())
    }

    fn destroy(&mut self) {
        self.buffered.clear();
    }
}

impl<P> BufferingHandler<P> {
    pub fn new() -> Self {
        Self { buffered: Vec::new() }
    }

    /// The surrogate deletes received so far, in the order `process` was
    /// called (LSN DESC, per `# 5`'s ordering guarantee).
    pub fn buffered(&self) -> &[Statement<P>] {
        &self.buffered
    }
}

/// Scans a key's raw history (LSN-descending, as received from the
/// merging source) for adjacent pairs that trigger a deferred tombstone,
/// and dispatches each to `handler`.
///
/// Triggers iff `new_stmt.has_deferred_delete()`, `new_stmt.stmt_type()
/// ∈ {Replace, Delete}`, and `old_stmt.stmt_type() != Delete`.
/// `old.type == Delete` is not fatal: it only means `old` already has no
/// live row for a secondary index to protect, so the pair is skipped
/// rather than dispatched.
pub fn process_deferred_deletes<F: StatementFormat>(
    raw_history_desc: &[Statement<F::Payload>],
    format: &F,
    handler: &mut dyn DeferredDeleteHandler<F::Payload>,
) -> Result<(), WriteIteratorError> {
    for pair in raw_history_desc.windows(2) {
        let [new_stmt, old_stmt] = pair else { unreachable!() };

        if !new_stmt.has_deferred_delete() {
            continue;
        }
        if !matches!(new_stmt.stmt_type(), StatementType::Replace | StatementType::Delete) {
            continue;
        }
        if old_stmt.stmt_type() == StatementType::Delete {
            // old already carries no live row to protect in a secondary
            // index; the obligation new was flagged for is moot.
            trace!(
                old_lsn = old_stmt.lsn(),
                new_lsn = new_stmt.lsn(),
                "deferred tombstone: skipping, old already deleted"
            );
            continue;
        }

        let surrogate = format.make_surrogate_delete(old_stmt, new_stmt.lsn());
        trace!(
            old_lsn = old_stmt.lsn(),
            new_lsn = new_stmt.lsn(),
            "deferred tombstone: dispatching surrogate delete"
        );
        handler.process(old_stmt, &surrogate).map_err(|e| {
            error!(old_lsn = old_stmt.lsn(), new_lsn = new_stmt.lsn(), err = %e, "deferred-delete handler failed");
            WriteIteratorError::Handler(e)
        })?;
    }
    Ok(())
}

/// Re-emits the oldest surviving `DEFERRED_DELETE`-flagged statement for
/// a key into the reduced output, unless it was overwritten by a
/// strictly newer terminal in this compaction or a read view already
/// surfaces it (so the obligation is not dropped, nor duplicated).
pub fn reemit_oldest_deferred<P: Clone>(
    raw_history_desc: &[Statement<P>],
    reduced_outputs: &mut Vec<Statement<P>>,
) {
    let Some((idx, oldest_deferred)) = raw_history_desc
        .iter()
        .enumerate()
        .rev()
        .find(|(_, s)| s.has_deferred_delete())
    else {
        return;
    };

    let overwritten_by_newer_terminal = raw_history_desc[..idx]
        .iter()
        .any(|s| s.stmt_type().is_terminal());
    if overwritten_by_newer_terminal {
        return;
    }

    let already_present = reduced_outputs
        .iter()
        .any(|s| s.lsn() == oldest_deferred.lsn());
    if already_present {
        return;
    }

    debug!(
        lsn = oldest_deferred.lsn(),
        "deferred tombstone: re-emitting unresolved obligation"
    );
    reduced_outputs.push(oldest_deferred.clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::flags;

    struct TestFormat;

    impl StatementFormat for TestFormat {
        type Payload = i32;

        fn merge_upsert(
            &self,
            older: &Statement<i32>,
            newer_upsert: &Statement<i32>,
        ) -> Statement<i32> {
            Statement::new(
                older.key().to_vec(),
                StatementType::Replace,
                older.lsn(),
                0,
                older.payload() + newer_upsert.payload(),
            )
        }

        fn make_surrogate_delete(&self, s: &Statement<i32>, lsn: u64) -> Statement<i32> {
            Statement::new(s.key().to_vec(), StatementType::Delete, lsn, 0, *s.payload())
        }
    }

    fn s(lsn: u64, t: StatementType, deferred: bool, v: i32) -> Statement<i32> {
        let f = if deferred { flags::DEFERRED_DELETE } else { 0 };
        Statement::new(b"1".to_vec(), t, lsn, f, v)
    }

    #[test]
    fn scenario_deferred_deletes_dispatch_in_order() {
        let history = vec![
            s(16, StatementType::Replace, true, 8),
            s(15, StatementType::Insert, false, 7),
            s(14, StatementType::Delete, true, 0),
            s(13, StatementType::Insert, false, 6),
            s(12, StatementType::Delete, false, 0),
            s(11, StatementType::Replace, true, 5),
            s(10, StatementType::Delete, false, 0),
            s(9, StatementType::Delete, true, 0),
            s(8, StatementType::Delete, true, 0),
            s(7, StatementType::Replace, false, 4),
            s(6, StatementType::Replace, true, 3),
            s(5, StatementType::Delete, true, 0),
            s(4, StatementType::Replace, true, 2),
        ];
        let mut handler = BufferingHandler::new();
        process_deferred_deletes(&history, &TestFormat, &mut handler).unwrap();

        let lsns: Vec<u64> = handler.buffered().iter().map(|s| s.lsn()).collect();
        assert_eq!(lsns, vec![16, 14, 8, 5]);
        let values: Vec<i32> = handler.buffered().iter().map(|s| *s.payload()).collect();
        assert_eq!(values, vec![7, 6, 4, 2]);
    }

    #[test]
    fn old_already_deleted_is_skipped_not_fatal() {
        let history = vec![
            s(6, StatementType::Replace, true, 1),
            s(5, StatementType::Delete, false, 0),
        ];
        let mut handler = BufferingHandler::new();
        process_deferred_deletes(&history, &TestFormat, &mut handler).unwrap();
        assert!(handler.buffered().is_empty());
    }

    #[test]
    fn reemits_unresolved_obligation_once() {
        let history = vec![
            s(9, StatementType::Upsert, false, 1),
            s(5, StatementType::Replace, true, 2),
        ];
        let mut reduced = vec![s(9, StatementType::Upsert, false, 1)];
        reemit_oldest_deferred(&history, &mut reduced);
        let lsns: Vec<u64> = reduced.iter().map(|s| s.lsn()).collect();
        assert_eq!(lsns, vec![9, 5]);
    }

    #[test]
    fn does_not_reemit_when_already_surfaced() {
        let history = vec![s(5, StatementType::Replace, true, 2)];
        let mut reduced = vec![s(5, StatementType::Replace, false, 2)];
        reemit_oldest_deferred(&history, &mut reduced);
        assert_eq!(reduced.len(), 1);
    }

    #[test]
    fn does_not_reemit_when_overwritten_by_newer_terminal() {
        let history = vec![
            s(9, StatementType::Replace, false, 9),
            s(5, StatementType::Replace, true, 2),
        ];
        let mut reduced = vec![s(9, StatementType::Replace, false, 9)];
        reemit_oldest_deferred(&history, &mut reduced);
        assert_eq!(reduced.len(), 1);
    }
}
