//! Merging source (`# 4.C`).
//!
//! The core only requires a lazy stream yielding statements in
//! `(key ASC, lsn DESC)` order, drawn from arbitrarily many input runs.
//! Concrete run implementations (memtable iterators, SSTable block
//! iterators) are external collaborators out of scope here; this module
//! supplies the trait seam plus the heap-based N-way merger, grounded on
//! the same min-heap-over-reversed-`Ord` technique used to merge sorted
//! record streams elsewhere in this codebase.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::SourceError;
use crate::statement::Statement;

/// One input run: an already-sorted, read-only stream of statements in
/// `(key ASC, lsn DESC)` order. The merging source never retracts a run
/// once it starts advancing it (`# 4.C`).
pub trait Run<P> {
    /// Returns the next statement, or `Ok(None)` at end of stream.
    /// `Err` is fatal and propagates as [`SourceError`].
    fn next(&mut self) -> Result<Option<Statement<P>>, SourceError>;
}

/// A `Run` backed by an in-memory, pre-sorted `Vec` — the concrete
/// collaborator used by tests and benches in place of a real
/// memtable/SSTable run.
pub struct VecRun<P> {
    statements: std::vec::IntoIter<Statement<P>>,
}

impl<P> VecRun<P> {
    /// `statements` must already be sorted `(key ASC, lsn DESC)`.
    pub fn new(statements: Vec<Statement<P>>) -> Self {
        Self {
            statements: statements.into_iter(),
        }
    }
}

impl<P> Run<P> for VecRun<P> {
    fn next(&mut self) -> Result<Option<Statement<P>>, SourceError> {
        Ok(self.statements.next())
    }
}

struct HeapEntry<P> {
    statement: Statement<P>,
    run_idx: usize,
}

impl<P> PartialEq for HeapEntry<P> {
    fn eq(&self, other: &Self) -> bool {
        self.statement == other.statement
    }
}

impl<P> Eq for HeapEntry<P> {}

impl<P> PartialOrd for HeapEntry<P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P> Ord for HeapEntry<P> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: reverse `Statement`'s (key ASC, lsn DESC) ordering so
        // the smallest key / highest LSN pops first.
        self.statement.cmp(&other.statement).reverse()
    }
}

/// A heap-based `(key ASC, lsn DESC)` merger over N input runs.
///
/// This is the concrete [`Run`] the stream driver (`# 4.G`) primes on
/// `start()`: it owns the runs added via `add_source` and exposes the
/// same single `next()` the core consumes, as called out in `# 9`'s
/// design notes ("a single `next()` returning `Option<Statement>`").
pub struct HeapMergingSource<P> {
    runs: Vec<Box<dyn Run<P>>>,
    heap: BinaryHeap<HeapEntry<P>>,
    primed: bool,
}

impl<P> Default for HeapMergingSource<P> {
    fn default() -> Self {
        Self {
            runs: Vec::new(),
            heap: BinaryHeap::new(),
            primed: false,
        }
    }
}

impl<P> HeapMergingSource<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an input run. Only valid before the first `next()`
    /// call (`# 4.C`: `add_source` precedes `start`).
    pub fn add_source(&mut self, run: Box<dyn Run<P>>) {
        debug_assert!(!self.primed, "add_source after the merge has started");
        self.runs.push(run);
    }

    /// Pulls one statement from each run to prime the heap. Idempotent.
    pub(crate) fn prime(&mut self) -> Result<(), SourceError> {
        if self.primed {
            return Ok(());
        }
        for (idx, run) in self.runs.iter_mut().enumerate() {
            if let Some(statement) = run.next()? {
                self.heap.push(HeapEntry {
                    statement,
                    run_idx: idx,
                });
            }
        }
        self.primed = true;
        Ok(())
    }
}

impl<P> Run<P> for HeapMergingSource<P> {
    fn next(&mut self) -> Result<Option<Statement<P>>, SourceError> {
        if !self.primed {
            self.prime()?;
        }

        let Some(entry) = self.heap.pop() else {
            return Ok(None);
        };
        let idx = entry.run_idx;

        if let Some(next_statement) = self.runs[idx].next()? {
            self.heap.push(HeapEntry {
                statement: next_statement,
                run_idx: idx,
            });
        }

        Ok(Some(entry.statement))
    }
}
