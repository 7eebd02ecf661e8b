//! # write-iterator
//!
//! The write iterator of an LSM-tree storage engine: the merging/
//! compaction transform that consumes the time-ordered history of
//! statements for each key held in one or more source runs and produces
//! the minimal, read-view-preserving sequence of statements for a new,
//! denser run. Concurrent readers snapshot the database at specific
//! sequence numbers (read views); every such snapshot must observe
//! exactly the same data after compaction as before.
//!
//! The transform fuses three concerns:
//!
//! 1. **Read-view preservation** — every read view sees the same data
//!    before and after compaction.
//! 2. **History compression** — within one read view, an arbitrary
//!    chain of inserts, replaces, upserts and deletes collapses to at
//!    most one terminal statement.
//! 3. **Semantic rewrites** — leading delete chains before an INSERT are
//!    pruned, a surviving INSERT may need demotion to REPLACE, upserts
//!    squash against older statements only, and compaction against the
//!    oldest level drops superfluous tombstones.
//!
//! As a side channel, the transform also emits **deferred tombstones**
//! required to keep secondary indexes consistent with a primary index
//! whose rows may carry an unresolved prior version.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                       WriteIterator                          │
//! │                                                               │
//! │  HeapMergingSource ──► KeyHistory ──► reduce_key ──► pending  │
//! │  (N runs, key ASC,     (per-key        (classify,     queue,  │
//! │   lsn DESC)            bucketing        squash,       drained │
//! │                        via ReadViewSet) prune,        by      │
//! │                                         rewrite)      next()  │
//! │                             │                                │
//! │                             ▼                                │
//! │                   process_deferred_deletes                   │
//! │                   ──► DeferredDeleteHandler                  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`statement`] | Typed statement model, key comparator, tuple-format seam |
//! | [`read_view`] | Ordered read-view set and bucket lookup |
//! | [`source`] | Merging-source trait and heap-based N-way merger |
//! | [`history`] | Per-key history buffer, partitioned into read-view buckets |
//! | [`reduce`] | The reduction engine: classify, squash, prune, rewrite |
//! | [`tombstone`] | Deferred-tombstone emitter and handler trait |
//! | [`iterator`] | The `WriteIterator` stream driver |
//! | [`error`] | Error taxonomy |
//!
//! ## Out of scope
//!
//! The memtable/run data structures feeding a [`source::Run`], the key
//! comparator beyond [`statement::KeyComparator`]'s seam, the tuple
//! format and statement constructors beyond [`statement::StatementFormat`],
//! physical file layout, block compression, bloom filters, compaction
//! scheduling, crash recovery of the run being written, and statement
//! wire encoding are all external collaborators or non-goals.
//!
//! ## Quick start
//!
//! ```rust
//! use write_iterator::error::HandlerError;
//! use write_iterator::iterator::{WriteIterator, WriteIteratorConfig};
//! use write_iterator::read_view::ReadViewSet;
//! use write_iterator::source::VecRun;
//! use write_iterator::statement::{Statement, StatementFormat, StatementType};
//! use write_iterator::tombstone::DeferredDeleteHandler;
//!
//! struct IntFormat;
//!
//! impl StatementFormat for IntFormat {
//!     type Payload = i32;
//!
//!     fn merge_upsert(&self, older: &Statement<i32>, newer: &Statement<i32>) -> Statement<i32> {
//!         let value = older.payload() + newer.payload();
//!         let ty = if older.stmt_type().is_terminal() {
//!             StatementType::Replace
//!         } else {
//!             StatementType::Upsert
//!         };
//!         Statement::new(older.key().to_vec(), ty, older.lsn(), 0, value)
//!     }
//!
//!     fn make_surrogate_delete(&self, s: &Statement<i32>, lsn: u64) -> Statement<i32> {
//!         Statement::new(s.key().to_vec(), StatementType::Delete, lsn, 0, 0)
//!     }
//! }
//!
//! struct NoopHandler;
//! impl DeferredDeleteHandler<i32> for NoopHandler {
//!     fn process(&mut self, _old: &Statement<i32>, _new: &Statement<i32>) -> Result<(), HandlerError> {
//!         Ok(())
//!     }
//! }
//!
//! let config = WriteIteratorConfig { is_primary: false, is_last_level: true };
//! let views = ReadViewSet::new(vec![7, 9, 12]);
//! let mut it = WriteIterator::new(config, views, IntFormat);
//! it.add_source(Box::new(VecRun::new(vec![
//!     Statement::new(b"k".to_vec(), StatementType::Replace, 14, 0, 10),
//!     Statement::new(b"k".to_vec(), StatementType::Replace, 7, 0, 3),
//! ]))).unwrap();
//! it.start().unwrap();
//!
//! while let Some(stmt) = it.next().unwrap() {
//!     println!("{:?} @ {}", stmt.stmt_type(), stmt.lsn());
//! }
//! it.close();
//! ```

pub mod error;
pub mod history;
pub mod iterator;
pub mod read_view;
pub mod reduce;
pub mod source;
pub mod statement;
pub mod tombstone;

pub use error::WriteIteratorError;
pub use iterator::{WriteIterator, WriteIteratorConfig};
pub use read_view::ReadViewSet;
pub use statement::{Statement, StatementFormat, StatementType};
