//! Statement model (`# 4.A`).
//!
//! A [`Statement`] is an immutable value the core treats almost entirely
//! as opaque: it compares keys, reads the LSN and flags, and hands the
//! payload to collaborators (`merge_upsert`, `make_surrogate_delete`, the
//! deferred-delete handler, the output sink) without inspecting it.

use std::cmp::Ordering;

/// The four statement kinds the core distinguishes.
///
/// INSERT, REPLACE, and DELETE are **terminal**: each resolves a key's
/// value absolutely and anything older in the same bucket is absorbed
/// into it. UPSERT is a differential update that only merges with
/// strictly older statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementType {
    Insert,
    Replace,
    Delete,
    Upsert,
}

impl StatementType {
    /// INSERT, REPLACE, and DELETE resolve a key absolutely.
    pub fn is_terminal(self) -> bool {
        !matches!(self, StatementType::Upsert)
    }
}

/// Bit flags material to the core.
pub mod flags {
    /// On a non-DELETE statement, records that the row it overwrites was
    /// not yet tombstoned in secondary indexes. Triggers `# 4.F`.
    pub const DEFERRED_DELETE: u32 = 1 << 0;
}

/// A single versioned mutation of one key.
///
/// `P` is the opaque payload type; the core never inspects it beyond
/// passing it through [`StatementFormat::merge_upsert`] and
/// [`StatementFormat::make_surrogate_delete`].
#[derive(Debug, Clone)]
pub struct Statement<P> {
    key: Vec<u8>,
    stmt_type: StatementType,
    lsn: u64,
    flags: u32,
    payload: P,
}

impl<P> Statement<P> {
    /// Builds a new statement. `lsn` must be strictly positive and unique
    /// among same-key statements in the input (`# 3` invariant 1).
    pub fn new(key: Vec<u8>, stmt_type: StatementType, lsn: u64, flags: u32, payload: P) -> Self {
        debug_assert!(lsn > 0, "LSN must be strictly positive");
        Self {
            key,
            stmt_type,
            lsn,
            flags,
            payload,
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn stmt_type(&self) -> StatementType {
        self.stmt_type
    }

    pub fn lsn(&self) -> u64 {
        self.lsn
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn has_deferred_delete(&self) -> bool {
        self.flags & flags::DEFERRED_DELETE != 0
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn into_payload(self) -> P {
        self.payload
    }

    /// Rewrites the LSN in place (used when an UPSERT chain is squashed
    /// or a bucket's residual is normalized to the bucket's newest LSN).
    pub fn set_lsn(&mut self, lsn: u64) {
        self.lsn = lsn;
    }

    /// Rewrites the statement's type in place (INSERT/REPLACE/DELETE
    /// rewrites in `# 4.E` mutate type without touching key or payload).
    pub fn set_type(&mut self, stmt_type: StatementType) {
        self.stmt_type = stmt_type;
    }

    /// Two statements are same-key iff their keys compare equal.
    pub fn same_key(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

// Ordering is (key ASC, lsn DESC): same convention as the merge source
// (`# 4.C`) and the global output order (`# 3`).

impl<P> PartialEq for Statement<P> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.lsn == other.lsn
    }
}

impl<P> Eq for Statement<P> {}

impl<P> PartialOrd for Statement<P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P> Ord for Statement<P> {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.key.cmp(&other.key) {
            Ordering::Equal => other.lsn.cmp(&self.lsn),
            ord => ord,
        }
    }
}

/// A supplied total order over keys (`# 6`: "the key comparator (provided)").
///
/// Statements in this crate's own streams compare keys as raw bytes via
/// `Ord`, so `ByteOrderComparator` is sufficient for every concrete type
/// here; a host embedding the core with a richer key encoding supplies
/// its own implementation.
pub trait KeyComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Default comparator: plain byte-lexicographic order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteOrderComparator;

impl KeyComparator for ByteOrderComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// The tuple format and statement constructors the core treats as
/// external collaborators (`# 1`): it never inspects payload fields
/// beyond what this trait exposes.
pub trait StatementFormat {
    /// Opaque per-statement payload.
    type Payload: Clone + PartialEq;

    /// Merges an UPSERT payload into an older statement's payload.
    ///
    /// Returns a statement of type REPLACE if `older` is terminal,
    /// otherwise UPSERT (`# 4.A`). The returned statement's LSN and key
    /// are the caller's responsibility to normalize; this only fuses
    /// payloads and picks the resulting type.
    fn merge_upsert(
        &self,
        older: &Statement<Self::Payload>,
        newer_upsert: &Statement<Self::Payload>,
    ) -> Statement<Self::Payload>;

    /// Synthesizes a DELETE-typed statement carrying only the key
    /// columns of `s`, at LSN `lsn` (the overwriting statement's LSN).
    fn make_surrogate_delete(&self, s: &Statement<Self::Payload>, lsn: u64)
    -> Statement<Self::Payload>;
}
