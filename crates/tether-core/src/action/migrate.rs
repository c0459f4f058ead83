//! The migrate action.
//!
//! A migrate entry records an agent leaving one DNA for another (`close`) or
//! arriving from one (`open`). Migrate entries reach the DHT only through the
//! committing node's own put; peers never accept them as requests.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{ActionBehavior, ActionError, Anchor};
use crate::dht::Dht;
use crate::entry::{Entry, EntryDef, MIGRATE_ENTRY_TYPE, migrate_entry_def};
use crate::hash::Hash;
use crate::header::Header;
use crate::message::{Message, Response};
use crate::peer::NodeId;
use crate::validate::{ValidationError, ValidationHost, ValidationPackage, check_def_and_anchor};

/// Routing and API name of the migrate action.
pub const NAME: &str = "migrate";

/// Migration that leaves the referenced DNA.
pub const MIGRATE_CLOSE: &str = "close";
/// Migration that arrives from the referenced DNA.
pub const MIGRATE_OPEN: &str = "open";

/// Payload of a migrate entry.
///
/// Every field is always serialized, in this order, with unset fields as the
/// empty string. Addresses are kept as text and only decoded by system
/// validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrateEntry {
    #[serde(rename = "Type", default)]
    pub migration_type: String,
    #[serde(rename = "DNAHash", default)]
    pub dna_hash: String,
    #[serde(rename = "Key", default)]
    pub key: String,
    #[serde(rename = "Data", default)]
    pub data: String,
}

impl MigrateEntry {
    #[must_use]
    pub fn new(
        migration_type: impl Into<String>,
        dna_hash: &Hash,
        key: &Hash,
        data: impl Into<String>,
    ) -> Self {
        Self {
            migration_type: migration_type.into(),
            dna_hash: dna_hash.to_string(),
            key: key.to_string(),
            data: data.into(),
        }
    }

    /// The definition migrate entries are filed under.
    #[must_use]
    pub fn def() -> EntryDef {
        migrate_entry_def()
    }

    /// Decode a payload from an entry produced by [`MigrateAction`].
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the entry content is not a migrate payload.
    pub fn from_entry(entry: &Entry) -> Result<Self, serde_json::Error> {
        serde_json::from_str(&entry.content)
    }

    /// Decoded `DNAHash` field.
    ///
    /// # Errors
    ///
    /// [`ValidationError::FieldDecode`] naming the field and raw value.
    pub fn decode_dna_hash(&self) -> Result<Hash, ValidationError> {
        decode_field("DNAHash", &self.dna_hash)
    }

    /// Decoded `Key` field.
    ///
    /// # Errors
    ///
    /// [`ValidationError::FieldDecode`] naming the field and raw value.
    pub fn decode_key(&self) -> Result<Hash, ValidationError> {
        decode_field("Key", &self.key)
    }
}

fn decode_field(field: &'static str, value: &str) -> Result<Hash, ValidationError> {
    Hash::decode(value).map_err(|source| ValidationError::FieldDecode {
        field,
        value: value.to_string(),
        source,
    })
}

/// Action committing a [`MigrateEntry`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrateAction {
    entry: MigrateEntry,
    anchor: Anchor,
}

impl MigrateAction {
    #[must_use]
    pub fn new(entry: MigrateEntry) -> Self {
        Self {
            entry,
            anchor: Anchor::Unanchored,
        }
    }

    #[must_use]
    pub fn with_header(mut self, header: Header) -> Self {
        self.anchor = Anchor::Anchored(header);
        self
    }

    #[must_use]
    pub const fn payload(&self) -> &MigrateEntry {
        &self.entry
    }

    pub fn set_payload(&mut self, entry: MigrateEntry) {
        self.entry = entry;
    }
}

impl ActionBehavior for MigrateAction {
    fn name(&self) -> &'static str {
        NAME
    }

    fn entry(&self) -> Entry {
        // Four string fields; serialization cannot fail.
        Entry::new(serde_json::to_string(&self.entry).unwrap_or_default())
    }

    fn entry_type(&self) -> &str {
        MIGRATE_ENTRY_TYPE
    }

    fn header(&self) -> Option<&Header> {
        self.anchor.header()
    }

    fn set_header(&mut self, header: Option<Header>) {
        self.anchor = header.into();
    }

    fn sys_validation(
        &self,
        _host: &ValidationHost<'_>,
        def: &EntryDef,
        _package: Option<&ValidationPackage>,
        _sources: &[NodeId],
    ) -> Result<(), ValidationError> {
        check_def_and_anchor(&MigrateEntry::def(), def, self.header())?;
        self.entry.decode_dna_hash()?;
        self.entry.decode_key()?;
        Ok(())
    }

    fn check_validation_request(&self, _def: &EntryDef) -> Result<(), ActionError> {
        Ok(())
    }

    fn receive(&self, _dht: &Dht, msg: &Message) -> Result<Response, ActionError> {
        warn!(kind = %msg.kind, from = %msg.from, "rejecting migrate entry sent as a request");
        Err(ActionError::InvalidReceive)
    }
}
