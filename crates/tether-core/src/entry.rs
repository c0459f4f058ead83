//! Entries and entry definitions.
//!
//! An [`Entry`] is the opaque content half of a chain link. Its marshaled form
//! is the byte string stored in the DHT and compared across nodes, so it must
//! be deterministic: the same content always marshals to the same bytes.
//!
//! An [`EntryDef`] names a content type together with its data format and
//! sharing policy. Definitions whose names start with `%` are reserved for the
//! system (DNA, agent, key, migrate) and cannot be registered by applications.

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::hash::Hash;

/// Prefix reserved for system entry types.
pub const SYS_ENTRY_PREFIX: char = '%';

/// Entry type tag of the chain's root DNA entry.
pub const DNA_ENTRY_TYPE: &str = "%dna";
/// Entry type tag of agent identity entries.
pub const AGENT_ENTRY_TYPE: &str = "%agent";
/// Entry type tag of key rotation entries.
pub const KEY_ENTRY_TYPE: &str = "%key";
/// Entry type tag of migrate entries.
pub const MIGRATE_ENTRY_TYPE: &str = "%migrate";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from decoding a marshaled entry.
#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    /// The bytes are not a marshaled entry.
    #[error("malformed entry: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl EntryError {
    /// Return the machine-readable error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::InvalidEntry
    }
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// Typed content carried by one chain link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Serialized content. For structured variants this is compact JSON.
    #[serde(rename = "C")]
    pub content: String,
}

impl Entry {
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    /// Canonical byte form used for storage, transport, and addressing.
    #[must_use]
    pub fn marshal(&self) -> Vec<u8> {
        // A struct with a single string field has no failing serialization path.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Decode bytes produced by [`Entry::marshal`].
    ///
    /// # Errors
    ///
    /// Returns [`EntryError::Malformed`] if the bytes are not a marshaled
    /// entry.
    pub fn unmarshal(bytes: &[u8]) -> Result<Self, EntryError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Content address of the marshaled entry.
    #[must_use]
    pub fn sum(&self) -> Hash {
        Hash::sum(&self.marshal())
    }
}

// ---------------------------------------------------------------------------
// Entry definitions
// ---------------------------------------------------------------------------

/// How an entry's content is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Json,
    String,
    Raw,
}

/// Whether entries of a type are published to the DHT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sharing {
    Public,
    Private,
}

/// Definition of one entry type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryDef {
    pub name: String,
    pub data_format: DataFormat,
    pub sharing: Sharing,
}

impl EntryDef {
    #[must_use]
    pub fn new(name: impl Into<String>, data_format: DataFormat, sharing: Sharing) -> Self {
        Self {
            name: name.into(),
            data_format,
            sharing,
        }
    }

    /// Whether this definition is one of the reserved system types.
    #[must_use]
    pub fn is_sys(&self) -> bool {
        self.name.starts_with(SYS_ENTRY_PREFIX)
    }
}

/// Root DNA definition.
#[must_use]
pub fn dna_entry_def() -> EntryDef {
    EntryDef::new(DNA_ENTRY_TYPE, DataFormat::Raw, Sharing::Public)
}

/// Agent identity definition.
#[must_use]
pub fn agent_entry_def() -> EntryDef {
    EntryDef::new(AGENT_ENTRY_TYPE, DataFormat::Raw, Sharing::Public)
}

/// Key rotation definition.
#[must_use]
pub fn key_entry_def() -> EntryDef {
    EntryDef::new(KEY_ENTRY_TYPE, DataFormat::Raw, Sharing::Public)
}

/// Migrate definition.
#[must_use]
pub fn migrate_entry_def() -> EntryDef {
    EntryDef::new(MIGRATE_ENTRY_TYPE, DataFormat::Json, Sharing::Public)
}
