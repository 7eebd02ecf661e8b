//! Reduction engine (`# 4.E`) — the heart of the transform.
//!
//! Processes one key's buckets (newest-to-oldest storage order, but
//! *reduced* oldest-to-newest so each bucket can peek at its immediately
//! older neighbor's already-reduced output) through four passes:
//!
//! 1. per-bucket classify + fold (terminal absorption, upsert squashing)
//! 2. inter-bucket dedup of equal adjacent payloads
//! 3. last-level-only tombstone pruning
//! 4. leading-DELETE pruning and the INSERT/REPLACE rewrite

use tracing::{debug, trace};

use crate::history::{Bucket, KeyHistory};
use crate::statement::{Statement, StatementFormat, StatementType};

/// Reduces a single bucket to at most one output statement.
///
/// `prev_reduced` is the immediately *older* bucket's already-reduced
/// output (buckets are processed oldest-to-newest for this reason, even
/// though a bucket's own statements remain stored newest-first). It is
/// only consulted when this bucket has no terminal of its own — a pure
/// UPSERT chain may be promoted to REPLACE by peeking at an older
/// terminal when no read view separates them.
fn reduce_bucket<F: StatementFormat>(
    bucket: &Bucket<F::Payload>,
    prev_reduced: Option<&Statement<F::Payload>>,
    format: &F,
) -> Statement<F::Payload> {
    let stmts = &bucket.statements;

    if let Some(i) = stmts.iter().position(|s| s.stmt_type().is_terminal()) {
        let mut acc = stmts[i].clone();
        if i > 0 {
            trace!(
                terminal_lsn = acc.lsn(),
                discarded = stmts.len() - 1 - i,
                "bucket: absorbing newer upserts into terminal"
            );
        }
        for newer in stmts[..i].iter().rev() {
            acc = format.merge_upsert(&acc, newer);
        }
        if i + 1 < stmts.len() {
            trace!(
                terminal_lsn = stmts[i].lsn(),
                count = stmts.len() - i - 1,
                "bucket: discarding statements older than terminal"
            );
        }
        acc.set_lsn(bucket.newest_lsn());
        acc
    } else {
        // Pure UPSERT chain: fold oldest-to-newest.
        let mut iter = stmts.iter().rev();
        let mut acc = iter
            .next()
            .expect("bucket statements is never empty")
            .clone();
        for newer in iter {
            acc = format.merge_upsert(&acc, newer);
        }
        if let Some(prev) = prev_reduced {
            if prev.stmt_type().is_terminal() {
                debug!(
                    bucket_lsn = bucket.newest_lsn(),
                    prev_lsn = prev.lsn(),
                    "bucket: squashing upsert chain onto older terminal"
                );
                acc = format.merge_upsert(prev, &acc);
            }
        }
        acc.set_lsn(bucket.newest_lsn());
        acc
    }
}

/// After bucket reduction, nullify an older output that is byte-equal in
/// payload to the nearest newer surviving output, provided neither is a
/// DELETE. `outputs` is newest-first, matching bucket order.
fn dedup_adjacent<P: PartialEq>(outputs: &mut [Option<Statement<P>>]) {
    let mut last_surviving: Option<usize> = None;
    for i in 0..outputs.len() {
        if outputs[i].is_none() {
            continue;
        }
        if let Some(j) = last_surviving {
            let newer = outputs[j].as_ref().unwrap();
            let older = outputs[i].as_ref().unwrap();
            let both_non_delete =
                newer.stmt_type() != StatementType::Delete && older.stmt_type() != StatementType::Delete;
            if both_non_delete && newer.payload() == older.payload() {
                trace!(lsn = older.lsn(), "dedup: nullifying read-view-redundant output");
                outputs[i] = None;
                continue;
            }
        }
        last_surviving = Some(i);
    }
}

/// `is_last_level`-only pruning: drops the oldest bucket's DELETE (no
/// older data left to mask) and collapses tautological DELETE chains.
fn apply_last_level_pruning<P>(outputs: &mut [Option<Statement<P>>]) {
    if let Some(last) = outputs.len().checked_sub(1) {
        if let Some(s) = &outputs[last] {
            if s.stmt_type() == StatementType::Delete {
                debug!(lsn = s.lsn(), "last level: dropping oldest-bucket tombstone");
                outputs[last] = None;
            }
        }
    }

    let mut last_surviving: Option<usize> = None;
    for i in 0..outputs.len() {
        if outputs[i].is_none() {
            continue;
        }
        if let Some(j) = last_surviving {
            let newer_is_delete = outputs[j].as_ref().unwrap().stmt_type() == StatementType::Delete;
            let cur_is_delete = outputs[i].as_ref().unwrap().stmt_type() == StatementType::Delete;
            if newer_is_delete && cur_is_delete {
                trace!(
                    lsn = outputs[i].as_ref().unwrap().lsn(),
                    "last level: collapsing tautological tombstone"
                );
                outputs[i] = None;
                continue;
            }
        }
        last_surviving = Some(i);
    }
}

/// Leading-DELETE pruning and the INSERT/REPLACE rewrite.
///
/// `oldest_is_insert` reflects the *true* oldest raw statement for this
/// key (across its entire input history, not just what survived so
/// far) — this is independent of `is_last_level`.
fn apply_insert_rewrites<P>(
    outputs: &mut [Option<Statement<P>>],
    oldest_is_insert: bool,
    is_last_level: bool,
) {
    if oldest_is_insert {
        for i in (0..outputs.len()).rev() {
            match &outputs[i] {
                Some(s) if s.stmt_type() == StatementType::Delete => {
                    debug!(lsn = s.lsn(), "leading-delete pruning: discarding");
                    outputs[i] = None;
                }
                Some(_) => break,
                None => continue,
            }
        }
        if let Some(i) = outputs.iter().rposition(|o| o.is_some()) {
            let s = outputs[i].as_mut().unwrap();
            if s.stmt_type() != StatementType::Insert {
                debug!(lsn = s.lsn(), "promoting surviving oldest statement to INSERT");
                s.set_type(StatementType::Insert);
            }
        }
    } else if !is_last_level {
        if let Some(i) = outputs.iter().rposition(|o| o.is_some()) {
            let s = outputs[i].as_mut().unwrap();
            if s.stmt_type() == StatementType::Insert {
                debug!(lsn = s.lsn(), "demoting oldest surviving INSERT to REPLACE");
                s.set_type(StatementType::Replace);
            }
        }
    }
}

/// Runs the full reduction pipeline for one key's partitioned history,
/// returning outputs newest-first (LSN DESC), matching `# 4.E`'s
/// emission order.
pub fn reduce_key<F: StatementFormat>(
    history: &KeyHistory<F::Payload>,
    is_last_level: bool,
    format: &F,
) -> Vec<Statement<F::Payload>> {
    let oldest_is_insert = history.oldest_is_insert();

    let mut prev: Option<Statement<F::Payload>> = None;
    let mut reduced_oldest_to_newest = Vec::with_capacity(history.buckets.len());
    for bucket in history.buckets.iter().rev() {
        let out = reduce_bucket(bucket, prev.as_ref(), format);
        prev = Some(out.clone());
        reduced_oldest_to_newest.push(out);
    }

    let mut outputs: Vec<Option<Statement<F::Payload>>> =
        reduced_oldest_to_newest.into_iter().rev().map(Some).collect();

    dedup_adjacent(&mut outputs);
    if is_last_level {
        apply_last_level_pruning(&mut outputs);
    }
    apply_insert_rewrites(&mut outputs, oldest_is_insert, is_last_level);

    outputs.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_view::ReadViewSet;

    /// A minimal additive format used only to exercise the reduction
    /// engine in isolation: payload is an `i32`, UPSERT adds its delta
    /// onto the base, and a terminal base always yields REPLACE.
    struct AdditiveFormat;

    impl StatementFormat for AdditiveFormat {
        type Payload = i32;

        fn merge_upsert(
            &self,
            older: &Statement<i32>,
            newer_upsert: &Statement<i32>,
        ) -> Statement<i32> {
            let value = older.payload() + newer_upsert.payload();
            let ty = if older.stmt_type().is_terminal() {
                StatementType::Replace
            } else {
                StatementType::Upsert
            };
            Statement::new(older.key().to_vec(), ty, older.lsn(), 0, value)
        }

        fn make_surrogate_delete(&self, s: &Statement<i32>, lsn: u64) -> Statement<i32> {
            Statement::new(s.key().to_vec(), StatementType::Delete, lsn, 0, 0)
        }
    }

    fn s(lsn: u64, t: StatementType, v: i32) -> Statement<i32> {
        Statement::new(b"1".to_vec(), t, lsn, 0, v)
    }

    fn lsns(out: &[Statement<i32>]) -> Vec<(u64, StatementType, i32)> {
        out.iter()
            .map(|s| (s.lsn(), s.stmt_type(), *s.payload()))
            .collect()
    }

    #[test]
    fn scenario_bucketed_replaces() {
        let views = ReadViewSet::new(vec![7, 9, 12]);
        let stmts: Vec<_> = (5..=14)
            .rev()
            .map(|lsn| s(lsn, StatementType::Replace, (lsn - 4) as i32))
            .collect();
        let history = KeyHistory::partition(stmts, &views);
        let out = reduce_key(&history, true, &AdditiveFormat);
        assert_eq!(
            lsns(&out),
            vec![
                (14, StatementType::Replace, 10),
                (12, StatementType::Replace, 8),
                (9, StatementType::Replace, 5),
                (7, StatementType::Replace, 3),
            ]
        );
    }

    #[test]
    fn scenario_leading_deletes_before_insert() {
        let views = ReadViewSet::new(vec![3, 5, 7, 8, 9]);
        let stmts = vec![
            s(9, StatementType::Replace, 6),
            s(8, StatementType::Insert, 5),
            s(7, StatementType::Replace, 4),
            s(6, StatementType::Replace, 3),
            s(5, StatementType::Delete, 0),
            s(4, StatementType::Replace, 2),
            s(3, StatementType::Delete, 0),
            s(2, StatementType::Insert, 1),
        ];
        let history = KeyHistory::partition(stmts, &views);
        let out = reduce_key(&history, false, &AdditiveFormat);
        assert_eq!(
            lsns(&out),
            vec![
                (9, StatementType::Replace, 6),
                (8, StatementType::Insert, 5),
                (7, StatementType::Insert, 4),
            ]
        );
    }

    #[test]
    fn scenario_insert_demoted_to_replace() {
        let views = ReadViewSet::new(vec![6, 7]);
        let stmts = vec![
            s(9, StatementType::Insert, 4),
            s(8, StatementType::Delete, 0),
            s(7, StatementType::Replace, 3),
            s(6, StatementType::Insert, 2),
            s(5, StatementType::Delete, 0),
            s(4, StatementType::Insert, 1),
            s(3, StatementType::Delete, 0),
        ];
        let history = KeyHistory::partition(stmts, &views);
        let out = reduce_key(&history, false, &AdditiveFormat);
        assert_eq!(
            lsns(&out),
            vec![
                (9, StatementType::Insert, 4),
                (7, StatementType::Replace, 3),
                (6, StatementType::Replace, 2),
            ]
        );
    }

    #[test]
    fn scenario_last_level_drops_oldest_tombstone() {
        let views = ReadViewSet::new(vec![7, 8]);
        let stmts = vec![s(8, StatementType::Replace, 1), s(7, StatementType::Delete, 0)];
        let history = KeyHistory::partition(stmts, &views);

        let out = reduce_key(&history, true, &AdditiveFormat);
        assert_eq!(lsns(&out), vec![(8, StatementType::Replace, 1)]);

        let out = reduce_key(&history, false, &AdditiveFormat);
        assert_eq!(
            lsns(&out),
            vec![(8, StatementType::Replace, 1), (7, StatementType::Delete, 0)]
        );
    }

    #[test]
    fn pure_upsert_chains_stay_upsert_across_bucket_boundaries() {
        let views = ReadViewSet::new(vec![6, 10, 13]);
        let stmts: Vec<_> = (5..=14)
            .rev()
            .map(|lsn| s(lsn, StatementType::Upsert, (lsn - 4) as i32))
            .collect();
        let history = KeyHistory::partition(stmts, &views);
        let out = reduce_key(&history, false, &AdditiveFormat);
        let lsns_only: Vec<u64> = out.iter().map(|s| s.lsn()).collect();
        assert_eq!(lsns_only, vec![14, 13, 10, 6]);
        assert!(out.iter().all(|s| s.stmt_type() == StatementType::Upsert));
    }

    #[test]
    fn upsert_chain_promotes_to_replace_when_peeking_older_terminal() {
        let views = ReadViewSet::new(vec![5]);
        let stmts = vec![
            s(8, StatementType::Upsert, 3),
            s(7, StatementType::Upsert, 2),
            s(4, StatementType::Replace, 10),
        ];
        let history = KeyHistory::partition(stmts, &views);
        let out = reduce_key(&history, false, &AdditiveFormat);
        assert_eq!(
            lsns(&out),
            vec![(8, StatementType::Replace, 15), (4, StatementType::Replace, 10)]
        );
    }
}
