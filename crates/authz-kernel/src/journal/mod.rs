pub mod fs;
pub mod mem;

use authz_types::{
    Authorization, CodecError, GrantKey, Principal, Timestamp, TypeTag, to_canonical_cbor,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fs::FsJournal;
pub use mem::MemJournal;

/// Monotonic cursor assigned to every persisted journal entry.
pub type JournalSeq = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalKind {
    /// Grant created, replaced, consumed, expired or removed.
    GrantLifecycle,
    /// Outcome of a top-level `execute` call.
    Execution,
}

/// Typed payloads stored in a journal entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "record_kind", rename_all = "snake_case")]
pub enum JournalRecord {
    GrantSaved(GrantSavedRecord),
    GrantRevoked(GrantKeyRecord),
    GrantUpdated(GrantUpdatedRecord),
    GrantExhausted(GrantKeyRecord),
    GrantExpired(GrantKeyRecord),
    GrantPruned(GrantKeyRecord),
    ExecCompleted(ExecCompletedRecord),
    ExecFailed(ExecFailedRecord),
}

impl JournalRecord {
    pub fn kind(&self) -> JournalKind {
        match self {
            JournalRecord::ExecCompleted(_) | JournalRecord::ExecFailed(_) => {
                JournalKind::Execution
            }
            _ => JournalKind::GrantLifecycle,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, JournalError> {
        Ok(to_canonical_cbor(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, JournalError> {
        Ok(serde_cbor::from_slice(bytes)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GrantSavedRecord {
    pub granter: Principal,
    pub grantee: Principal,
    pub authorization: Authorization,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<Timestamp>,
    pub now: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GrantKeyRecord {
    pub key: GrantKey,
    pub now: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GrantUpdatedRecord {
    pub key: GrantKey,
    pub authorization: Authorization,
    pub now: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecCompletedRecord {
    pub principal: Principal,
    /// Hex SHA-256 of the canonical CBOR batch.
    pub batch_hash: String,
    /// Top-level action count.
    pub actions: u64,
    /// Messages routed across all nesting levels.
    pub leaves: u64,
    pub now: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecFailedRecord {
    pub principal: Principal,
    /// Absent when the batch was rejected before it was hashed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_hash: Option<String>,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_tag: Option<TypeTag>,
    pub now: Timestamp,
}

/// Borrowed entry used when appending to the journal.
#[derive(Debug, Clone, Copy)]
pub struct JournalEntry<'a> {
    pub kind: JournalKind,
    pub payload: &'a [u8],
}

impl<'a> JournalEntry<'a> {
    pub fn new(kind: JournalKind, payload: &'a [u8]) -> Self {
        Self { kind, payload }
    }
}

/// Owned entry returned by journal readers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnedJournalEntry {
    pub seq: JournalSeq,
    pub kind: JournalKind,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl OwnedJournalEntry {
    pub fn record(&self) -> Result<JournalRecord, JournalError> {
        JournalRecord::decode(&self.payload)
    }
}

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Cbor(#[from] serde_cbor::Error),
    #[error("encoding error: {0}")]
    Codec(#[from] CodecError),
    #[error("corrupt entry: {0}")]
    Corrupt(String),
}

/// Append-only log of grant lifecycle and execution outcomes.
pub trait Journal: Send {
    fn append(&mut self, entry: JournalEntry<'_>) -> Result<JournalSeq, JournalError>;

    /// Loads entries starting at `from` (inclusive). Passing 0 returns the full log.
    fn load_from(&self, from: JournalSeq) -> Result<Vec<OwnedJournalEntry>, JournalError>;

    /// Returns the next sequence that will be assigned on append.
    fn next_seq(&self) -> JournalSeq;

    fn append_record(&mut self, record: &JournalRecord) -> Result<JournalSeq, JournalError> {
        let payload = record.encode()?;
        self.append(JournalEntry::new(record.kind(), &payload))
    }

    fn load_records(&self, from: JournalSeq) -> Result<Vec<JournalRecord>, JournalError> {
        self.load_from(from)?
            .iter()
            .map(OwnedJournalEntry::record)
            .collect()
    }
}

/// On-disk framing for a single entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DiskRecord<'a> {
    seq: JournalSeq,
    kind: JournalKind,
    #[serde(with = "serde_bytes")]
    payload: &'a [u8],
}
