//! Per-key history buffer (`# 4.D`).
//!
//! Drains all same-key statements from the merging source into `H`,
//! most recent first, then partitions `H` into read-view buckets. Since
//! input arrives strictly LSN-descending (`# 3` invariant 1) and bucket
//! index is monotone non-decreasing as LSN decreases, the partition is a
//! single linear pass — no sort required.

use crate::read_view::ReadViewSet;
use crate::statement::Statement;

/// One read-view bucket's statements, newest-first (LSN DESC), all
/// sharing the same bucket index.
#[derive(Debug)]
pub struct Bucket<P> {
    pub index: usize,
    pub statements: Vec<Statement<P>>,
}

impl<P> Bucket<P> {
    /// The bucket's newest LSN — residuals are normalized to this LSN
    /// regardless of which statement within the bucket they derive from.
    pub fn newest_lsn(&self) -> u64 {
        self.statements[0].lsn()
    }
}

/// All same-key statements, partitioned into buckets `B_1 .. B_m` where
/// `B_1` (first in `buckets`) is the newest. Transient: built, reduced,
/// and discarded per key.
#[derive(Debug)]
pub struct KeyHistory<P> {
    pub key: Vec<u8>,
    /// Buckets newest-to-oldest, matching input arrival order.
    pub buckets: Vec<Bucket<P>>,
}

impl<P> KeyHistory<P> {
    /// Partitions a same-key run of statements (already LSN-descending)
    /// into read-view buckets. `statements` must be non-empty.
    pub fn partition(statements: Vec<Statement<P>>, views: &ReadViewSet) -> Self {
        debug_assert!(!statements.is_empty());
        let key = statements[0].key().to_vec();

        let mut buckets: Vec<Bucket<P>> = Vec::new();
        for stmt in statements {
            let idx = views.bucket_of(stmt.lsn());
            match buckets.last_mut() {
                Some(last) if last.index == idx => last.statements.push(stmt),
                _ => buckets.push(Bucket {
                    index: idx,
                    statements: vec![stmt],
                }),
            }
        }

        Self { key, buckets }
    }

    /// True iff the oldest raw input statement for this key (the very
    /// last entry of the oldest bucket) is an INSERT. Drives the
    /// leading-DELETE pruning and INSERT/REPLACE rewrite rules (`# 4.E`).
    pub fn oldest_is_insert(&self) -> bool {
        use crate::statement::StatementType;
        self.buckets
            .last()
            .and_then(|b| b.statements.last())
            .map(|s| s.stmt_type() == StatementType::Insert)
            .unwrap_or(false)
    }
}
