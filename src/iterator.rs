//! Stream driver (`# 4.G`) — ties the statement model, read-view set,
//! merging source, history buffer, reduction engine, and deferred-
//! tombstone emitter together behind `add_source / start / next / stop /
//! close`.

use std::collections::VecDeque;
use std::fmt;

use tracing::{debug, error};

use crate::error::WriteIteratorError;
use crate::history::KeyHistory;
use crate::read_view::ReadViewSet;
use crate::reduce::reduce_key;
use crate::source::{HeapMergingSource, Run};
use crate::statement::{Statement, StatementFormat};
use crate::tombstone::{process_deferred_deletes, reemit_oldest_deferred, DeferredDeleteHandler};

/// The `# 6` external inputs that are not supplied per-call: read views
/// and sources are set on the iterator itself, the handler via
/// [`WriteIterator::with_handler`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteIteratorConfig {
    /// Deferred tombstones are only emitted when this is set (`# 3`
    /// invariant 5); a handler is required iff this is true.
    pub is_primary: bool,
    /// Enables the last-level-only pruning rules in `# 4.E`.
    pub is_last_level: bool,
}

/// Stream driver states (`# 4.G`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Started,
    Draining,
    Drained,
    Stopped,
    Closed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Observability counters with no bearing on correctness.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub keys_processed: u64,
    pub statements_emitted: u64,
    pub statements_discarded: u64,
    pub deferred_tombstones_emitted: u64,
}

/// The write iterator itself: consumes a merging source and produces
/// the minimal, read-view-preserving output sequence for a new run,
/// emitting deferred tombstones to `handler` as a side channel.
pub struct WriteIterator<F: StatementFormat> {
    config: WriteIteratorConfig,
    views: ReadViewSet,
    format: F,
    source: HeapMergingSource<F::Payload>,
    handler: Option<Box<dyn DeferredDeleteHandler<F::Payload>>>,
    state: State,
    pending: VecDeque<Statement<F::Payload>>,
    lookahead: Option<Statement<F::Payload>>,
    stats: Stats,
}

impl<F: StatementFormat> WriteIterator<F> {
    pub fn new(config: WriteIteratorConfig, views: ReadViewSet, format: F) -> Self {
        Self {
            config,
            views,
            format,
            source: HeapMergingSource::new(),
            handler: None,
            state: State::Created,
            pending: VecDeque::new(),
            lookahead: None,
            stats: Stats::default(),
        }
    }

    /// Registers the deferred-delete handler. Required iff `is_primary`
    /// (`# 6`).
    pub fn with_handler(mut self, handler: Box<dyn DeferredDeleteHandler<F::Payload>>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Registers an input run. Only valid in `Created` (`# 4.G`).
    pub fn add_source(&mut self, run: Box<dyn Run<F::Payload>>) -> Result<(), WriteIteratorError> {
        self.require_state(State::Created)?;
        self.source.add_source(run);
        Ok(())
    }

    /// Transitions to `Started`, priming the merge heap.
    pub fn start(&mut self) -> Result<(), WriteIteratorError> {
        self.require_state(State::Created)?;
        if self.config.is_primary && self.handler.is_none() {
            let msg = "is_primary requires a deferred-delete handler".to_string();
            error!(%msg, "write iterator: fatal");
            return Err(WriteIteratorError::InvariantViolation(msg));
        }
        debug!("write iterator: starting");
        self.source.prime().map_err(|e| {
            error!(err = %e, "write iterator: merging source failed to prime");
            WriteIteratorError::Source(e)
        })?;
        self.state = State::Started;
        Ok(())
    }

    /// Returns the next output statement, or `None` at the end sentinel
    /// (transitioning to `Drained`). Valid in `Started`/`Draining`.
    pub fn next(&mut self) -> Result<Option<Statement<F::Payload>>, WriteIteratorError> {
        match self.state {
            State::Started | State::Draining => {}
            State::Drained => return Ok(None),
            other => {
                let msg = format!("next() called in state {other}");
                error!(%msg, "write iterator: fatal");
                return Err(WriteIteratorError::InvariantViolation(msg));
            }
        }

        loop {
            if let Some(stmt) = self.pending.pop_front() {
                self.state = State::Draining;
                return Ok(Some(stmt));
            }
            if !self.process_next_key()? {
                debug!(stats = ?self.stats, "write iterator: drained");
                self.state = State::Drained;
                return Ok(None);
            }
        }
    }

    /// Releases iteration state but preserves the handler's buffered
    /// tombstones for inspection by the caller (`# 4.G`).
    pub fn stop(&mut self) {
        debug!(state = %self.state, "write iterator: stopping");
        self.pending.clear();
        self.lookahead = None;
        self.state = State::Stopped;
    }

    /// Releases everything, including the handler.
    pub fn close(&mut self) {
        debug!(state = %self.state, "write iterator: closing");
        self.pending.clear();
        self.lookahead = None;
        if let Some(handler) = self.handler.as_mut() {
            handler.destroy();
        }
        self.handler = None;
        self.state = State::Closed;
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    fn log_source_error(e: crate::error::SourceError) -> WriteIteratorError {
        error!(err = %e, "write iterator: merging source failed");
        WriteIteratorError::Source(e)
    }

    fn require_state(&self, expected: State) -> Result<(), WriteIteratorError> {
        if self.state != expected {
            let msg = format!("expected state {expected}, found {}", self.state);
            error!(%msg, "write iterator: fatal");
            return Err(WriteIteratorError::InvariantViolation(msg));
        }
        Ok(())
    }

    /// Drains one key's worth of statements from the source, reduces
    /// them, runs the deferred-tombstone emitter, and queues the result
    /// onto `pending`. Returns `false` when the source is exhausted.
    fn process_next_key(&mut self) -> Result<bool, WriteIteratorError> {
        let first = match self.lookahead.take() {
            Some(s) => s,
            None => match self.source.next().map_err(Self::log_source_error)? {
                Some(s) => s,
                None => return Ok(false),
            },
        };

        let mut raw = vec![first];
        loop {
            match self.source.next().map_err(Self::log_source_error)? {
                Some(s) => {
                    if s.same_key(&raw[0]) {
                        raw.push(s);
                    } else {
                        self.lookahead = Some(s);
                        break;
                    }
                }
                None => break,
            }
        }

        let history = KeyHistory::partition(raw.clone(), &self.views);
        let mut reduced = reduce_key(&history, self.config.is_last_level, &self.format);

        if self.config.is_primary {
            let before = self.stats.deferred_tombstones_emitted;
            let handler = self
                .handler
                .as_deref_mut()
                .expect("start() enforces a handler when is_primary");
            let mut counting = CountingHandler { inner: handler, count: 0 };
            process_deferred_deletes(&raw, &self.format, &mut counting)?;
            self.stats.deferred_tombstones_emitted = before + counting.count as u64;
            reemit_oldest_deferred(&raw, &mut reduced);
        }

        self.stats.keys_processed += 1;
        self.stats.statements_emitted += reduced.len() as u64;
        self.stats.statements_discarded += raw.len().saturating_sub(reduced.len()) as u64;
        self.pending.extend(reduced);
        Ok(true)
    }
}

/// Wraps the caller's handler just to count dispatched tombstones for
/// [`Stats`], without altering its behavior.
struct CountingHandler<'a, P> {
    inner: &'a mut dyn DeferredDeleteHandler<P>,
    count: usize,
}

impl<P> DeferredDeleteHandler<P> for CountingHandler<'_, P> {
    fn process(
        &mut self,
        old: &Statement<P>,
        new: &Statement<P>,
    ) -> Result<(), crate::error::HandlerError> {
        self.count += 1;
        self.inner.process(old, new)
    }

    fn destroy(&mut self) {
        self.inner.destroy();
    }
}
