//! Content-addressed record store.
//!
//! Each node keeps its own [`Dht`]: a map from [`Hash`] to [`Record`] behind
//! a read-write lock, so puts and gets on different keys never wait on each
//! other for long and no cross-key locking exists.
//!
//! # Status and masks
//!
//! Every record carries a [`Status`]. Gets take a status filter (a bitmask;
//! a record matches when its status shares a bit with the filter) and a
//! [`GetMask`] selecting which parts of the record to return. A record that
//! exists but does not match the filter is reported exactly like a missing
//! one: [`DhtError::NotFound`].
//!
//! # Replication
//!
//! Records arrive from peers through [`Dht::hold`]. Holding is idempotent:
//! the same payload under the same address only merges the source list.
//! Visibility on other nodes is eventually consistent; see [`poll`] for the
//! bounded retry primitive.

pub mod poll;

pub use poll::{PollPolicy, poll};

use std::collections::HashMap;
use std::collections::hash_map::Entry as Slot;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::ErrorCode;
use crate::hash::Hash;
use crate::header::Header;
use crate::peer::NodeId;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a stored record, used as a bitmask filter on reads.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Status(u8);

impl Status {
    pub const LIVE: Self = Self(0x01);
    pub const REJECTED: Self = Self(0x02);
    pub const DELETED: Self = Self(0x04);
    pub const MODIFIED: Self = Self(0x08);
    pub const QUEUED: Self = Self(0x10);
    pub const ANY: Self = Self(0xff);

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether a record with this status passes `filter`.
    #[must_use]
    pub const fn matches(self, filter: Self) -> bool {
        self.0 & filter.0 != 0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Tombstoned and superseded records never return to live.
    const fn is_terminal(self) -> bool {
        self.0 & (Self::DELETED.0 | Self::MODIFIED.0 | Self::REJECTED.0) != 0
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Status({self})")
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::LIVE => "live",
            Self::REJECTED => "rejected",
            Self::DELETED => "deleted",
            Self::MODIFIED => "modified",
            Self::QUEUED => "queued",
            Self::ANY => "any",
            Self(bits) => return write!(f, "{bits:#04x}"),
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// GetMask
// ---------------------------------------------------------------------------

/// Selects which parts of a record a get returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GetMask(u8);

impl GetMask {
    /// Same as [`GetMask::ENTRY`].
    pub const DEFAULT: Self = Self(0x00);
    pub const ENTRY: Self = Self(0x01);
    pub const ENTRY_TYPE: Self = Self(0x02);
    pub const SOURCES: Self = Self(0x04);
    pub const HEADER: Self = Self(0x08);
    pub const ALL: Self = Self(0xff);

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn contains(self, part: Self) -> bool {
        let bits = if self.0 == 0 { Self::ENTRY.0 } else { self.0 };
        bits & part.0 == part.0
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One stored DHT value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Marshaled entry bytes.
    pub entry: Vec<u8>,
    pub entry_type: String,
    pub header: Option<Header>,
    pub status: Status,
    /// Nodes known to hold or have published this record.
    pub sources: Vec<NodeId>,
    /// For modified records, the address of the replacement.
    pub replaced_by: Option<Hash>,
}

/// The parts of a record selected by a [`GetMask`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetResponse {
    pub entry: Option<Vec<u8>>,
    pub entry_type: Option<String>,
    pub sources: Vec<NodeId>,
    pub header: Option<Header>,
    /// Set when the record was modified; readers may follow it.
    pub follow: Option<Hash>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// DHT store errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DhtError {
    /// Absent, or present but filtered out by status.
    #[error("hash not found: {0}")]
    NotFound(Hash),

    /// A different payload is already stored under this address.
    #[error("different payload already stored at {0}")]
    HashCollision(Hash),
}

impl DhtError {
    /// Return the machine-readable error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::RecordNotFound,
            Self::HashCollision(_) => ErrorCode::HashCollision,
        }
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// A node's local view of the DHT.
#[derive(Debug)]
pub struct Dht {
    node: NodeId,
    records: RwLock<HashMap<Hash, Record>>,
}

impl Dht {
    #[must_use]
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// The node this store belongs to.
    #[must_use]
    pub const fn node(&self) -> &NodeId {
        &self.node
    }

    /// Store a record published by `source`.
    ///
    /// # Errors
    ///
    /// [`DhtError::HashCollision`] if a different payload already occupies
    /// `hash`.
    pub fn put(
        &self,
        hash: Hash,
        entry_type: &str,
        entry: Vec<u8>,
        header: Option<Header>,
        status: Status,
        source: NodeId,
    ) -> Result<(), DhtError> {
        debug!(node = %self.node, %hash, %status, "dht put");
        self.hold(
            hash,
            Record {
                entry,
                entry_type: entry_type.to_string(),
                header,
                status,
                sources: vec![source],
                replaced_by: None,
            },
        )
    }

    /// Accept a record replicated from a peer.
    ///
    /// # Errors
    ///
    /// [`DhtError::HashCollision`] if a different payload already occupies
    /// `hash`.
    pub fn hold(&self, hash: Hash, record: Record) -> Result<(), DhtError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let existing = match records.entry(hash) {
            Slot::Vacant(slot) => {
                trace!(node = %self.node, %hash, "holding new record");
                slot.insert(record);
                return Ok(());
            }
            Slot::Occupied(slot) => slot.into_mut(),
        };

        if existing.entry != record.entry {
            return Err(DhtError::HashCollision(hash));
        }
        for source in record.sources {
            if !existing.sources.contains(&source) {
                existing.sources.push(source);
            }
        }
        if existing.header.is_none() {
            existing.header = record.header;
        }
        if record.status.is_terminal() && !existing.status.is_terminal() {
            existing.status = record.status;
            existing.replaced_by = record.replaced_by;
        }
        Ok(())
    }

    /// Read the parts of a record selected by `mask`.
    ///
    /// # Errors
    ///
    /// [`DhtError::NotFound`] if the record is absent or its status does not
    /// match `filter`.
    pub fn get(&self, hash: &Hash, filter: Status, mask: GetMask) -> Result<GetResponse, DhtError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let record = records
            .get(hash)
            .filter(|r| r.status.matches(filter))
            .ok_or(DhtError::NotFound(*hash))?;

        Ok(GetResponse {
            entry: mask
                .contains(GetMask::ENTRY)
                .then(|| record.entry.clone()),
            entry_type: mask
                .contains(GetMask::ENTRY_TYPE)
                .then(|| record.entry_type.clone()),
            sources: if mask.contains(GetMask::SOURCES) {
                record.sources.clone()
            } else {
                Vec::new()
            },
            header: if mask.contains(GetMask::HEADER) {
                record.header.clone()
            } else {
                None
            },
            follow: record.replaced_by,
        })
    }

    /// Bounded retry of [`Dht::get`], sleeping between attempts.
    ///
    /// Useful when another thread is delivering replicated records.
    ///
    /// # Errors
    ///
    /// The last [`DhtError::NotFound`] once the attempt budget is spent, or
    /// any other error immediately.
    pub fn get_polling(
        &self,
        hash: &Hash,
        filter: Status,
        mask: GetMask,
        policy: &PollPolicy,
    ) -> Result<GetResponse, DhtError> {
        poll(
            policy,
            || self.get(hash, filter, mask),
            |_| std::thread::sleep(policy.backoff()),
        )
    }

    /// Mark `old` as modified and superseded by `new`.
    ///
    /// # Errors
    ///
    /// [`DhtError::NotFound`] if `old` is not stored.
    pub fn modify(&self, old: &Hash, new: Hash) -> Result<(), DhtError> {
        self.transition(old, Status::MODIFIED, Some(new))
    }

    /// Mark a record deleted.
    ///
    /// # Errors
    ///
    /// [`DhtError::NotFound`] if `hash` is not stored.
    pub fn delete(&self, hash: &Hash) -> Result<(), DhtError> {
        self.transition(hash, Status::DELETED, None)
    }

    fn transition(
        &self,
        hash: &Hash,
        status: Status,
        replaced_by: Option<Hash>,
    ) -> Result<(), DhtError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let record = records.get_mut(hash).ok_or(DhtError::NotFound(*hash))?;
        debug!(node = %self.node, %hash, from = %record.status, to = %status, "dht status change");
        record.status = status;
        record.replaced_by = replaced_by;
        Ok(())
    }

    /// Put back what [`Dht::record`] returned for `hash` before a write,
    /// removing the record if there was none.
    pub fn restore(&self, hash: Hash, prior: Option<Record>) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        debug!(node = %self.node, %hash, existed = prior.is_some(), "dht restore");
        match prior {
            Some(record) => {
                records.insert(hash, record);
            }
            None => {
                records.remove(&hash);
            }
        }
    }

    /// Clone of the full stored record, regardless of status.
    #[must_use]
    pub fn record(&self, hash: &Hash) -> Option<Record> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(hash)
            .cloned()
    }

    /// Whether a record matching `filter` is stored.
    #[must_use]
    pub fn exists(&self, hash: &Hash, filter: Status) -> bool {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(hash)
            .is_some_and(|r| r.status.matches(filter))
    }

    /// All stored addresses, sorted.
    #[must_use]
    pub fn hashes(&self) -> Vec<Hash> {
        let mut out: Vec<Hash> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        out.sort();
        out
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn store() -> Dht {
        Dht::new(NodeId::new("n0"))
    }

    fn put_live(dht: &Dht, payload: &[u8]) -> Hash {
        let hash = Hash::sum(payload);
        dht.put(hash, "post", payload.to_vec(), None, Status::LIVE, NodeId::new("n0"))
            .expect("put");
        hash
    }

    #[test]
    fn get_after_put_is_byte_identical() {
        let dht = store();
        let hash = put_live(&dht, b"payload");
        let got = dht.get(&hash, Status::LIVE, GetMask::ENTRY).expect("get");
        assert_eq!(got.entry.as_deref(), Some(&b"payload"[..]));
        assert_eq!(got.entry_type, None);
        assert!(got.sources.is_empty());
    }

    #[test]
    fn default_mask_returns_entry() {
        let dht = store();
        let hash = put_live(&dht, b"payload");
        let got = dht.get(&hash, Status::LIVE, GetMask::DEFAULT).expect("get");
        assert_eq!(got.entry.as_deref(), Some(&b"payload"[..]));
    }

    #[test]
    fn mask_selects_fields() {
        let dht = store();
        let hash = put_live(&dht, b"payload");
        let got = dht
            .get(&hash, Status::LIVE, GetMask::ENTRY_TYPE.union(GetMask::SOURCES))
            .expect("get");
        assert_eq!(got.entry, None);
        assert_eq!(got.entry_type.as_deref(), Some("post"));
        assert_eq!(got.sources, vec![NodeId::new("n0")]);
    }

    #[test]
    fn missing_is_not_found() {
        let dht = store();
        let hash = Hash::sum(b"nothing");
        assert_eq!(
            dht.get(&hash, Status::ANY, GetMask::ALL),
            Err(DhtError::NotFound(hash))
        );
    }

    #[test]
    fn identical_reput_is_idempotent_and_merges_sources() {
        let dht = store();
        let hash = put_live(&dht, b"same");
        dht.put(hash, "post", b"same".to_vec(), None, Status::LIVE, NodeId::new("n1"))
            .expect("reput");
        dht.put(hash, "post", b"same".to_vec(), None, Status::LIVE, NodeId::new("n1"))
            .expect("reput twice");
        let got = dht.get(&hash, Status::LIVE, GetMask::SOURCES).expect("get");
        assert_eq!(got.sources, vec![NodeId::new("n0"), NodeId::new("n1")]);
        assert_eq!(dht.len(), 1);
    }

    #[test]
    fn conflicting_payload_is_collision() {
        let dht = store();
        let hash = put_live(&dht, b"first");
        let err = dht
            .put(hash, "post", b"second".to_vec(), None, Status::LIVE, NodeId::new("n1"))
            .unwrap_err();
        assert_eq!(err, DhtError::HashCollision(hash));
        assert_eq!(err.code(), ErrorCode::HashCollision);
    }

    #[test]
    fn modified_record_hidden_from_live_filter() {
        let dht = store();
        let old = put_live(&dht, b"v1");
        let new = put_live(&dht, b"v2");
        dht.modify(&old, new).expect("modify");

        assert!(dht.get(&old, Status::LIVE, GetMask::ENTRY).is_err());
        let got = dht.get(&old, Status::ANY, GetMask::ENTRY).expect("any");
        assert_eq!(got.follow, Some(new));
        assert!(dht.exists(&old, Status::MODIFIED));
    }

    #[test]
    fn deleted_record_hidden_from_live_filter() {
        let dht = store();
        let hash = put_live(&dht, b"gone soon");
        dht.delete(&hash).expect("delete");
        assert_eq!(
            dht.get(&hash, Status::LIVE, GetMask::ENTRY),
            Err(DhtError::NotFound(hash))
        );
        assert!(dht.get(&hash, Status::DELETED, GetMask::ENTRY).is_ok());
    }

    #[test]
    fn hold_does_not_resurrect_deleted() {
        let dht = store();
        let hash = put_live(&dht, b"x");
        let live = dht.record(&hash).expect("record");
        dht.delete(&hash).expect("delete");
        dht.hold(hash, live).expect("hold");
        assert!(!dht.exists(&hash, Status::LIVE));
    }

    #[test]
    fn hold_adopts_later_tombstone() {
        let dht = store();
        let hash = put_live(&dht, b"x");
        let mut tomb = dht.record(&hash).expect("record");
        tomb.status = Status::DELETED;
        dht.hold(hash, tomb).expect("hold");
        assert!(dht.exists(&hash, Status::DELETED));
    }

    #[test]
    fn restore_undoes_a_put() {
        let dht = store();
        let kept = put_live(&dht, b"kept");
        let before = dht.record(&kept);
        dht.put(kept, "post", b"kept".to_vec(), None, Status::LIVE, NodeId::new("n1"))
            .expect("merge");
        dht.restore(kept, before.clone());
        assert_eq!(dht.record(&kept), before);

        let fresh = Hash::sum(b"fresh");
        let absent = dht.record(&fresh);
        put_live(&dht, b"fresh");
        dht.restore(fresh, absent);
        assert!(dht.record(&fresh).is_none());
        assert_eq!(dht.hashes(), vec![kept]);
    }

    #[test]
    fn transition_of_missing_is_not_found() {
        let dht = store();
        let hash = Hash::sum(b"?");
        assert_eq!(dht.delete(&hash), Err(DhtError::NotFound(hash)));
    }

    #[test]
    fn status_display() {
        assert_eq!(Status::LIVE.to_string(), "live");
        assert_eq!(Status::LIVE.union(Status::MODIFIED).to_string(), "0x09");
    }

    #[test]
    fn get_polling_sees_concurrent_put() {
        let dht = Arc::new(store());
        let hash = Hash::sum(b"late");
        let writer = {
            let dht = Arc::clone(&dht);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                dht.put(hash, "post", b"late".to_vec(), None, Status::LIVE, NodeId::new("n9"))
                    .expect("put");
            })
        };
        let policy = PollPolicy {
            attempts: 200,
            backoff_ms: 5,
        };
        let got = dht
            .get_polling(&hash, Status::LIVE, GetMask::ENTRY, &policy)
            .expect("eventually visible");
        assert_eq!(got.entry.as_deref(), Some(&b"late"[..]));
        writer.join().expect("writer thread");
    }
}
