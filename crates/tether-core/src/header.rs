//! Chain-link headers.
//!
//! A [`Header`] binds one entry into an agent's chain: it records the entry's
//! type and address, a back-reference to the previous header, a timestamp,
//! and a signature. Headers are immutable once built; every field is private
//! and only readable through accessors.
//!
//! Signing is delegated to a [`Signer`] supplied by the identity layer. The
//! signed payload is the canonical JSON of the unsigned header fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::Hash;

/// Opaque signature bytes produced by a [`Signer`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(pub Vec<u8>);

/// Header signing, provided by the identity layer.
pub trait Signer: Send + Sync {
    /// Sign the canonical bytes of an unsigned header.
    fn sign(&self, payload: &[u8]) -> Signature;
}

/// The fields covered by the signature, in canonical order.
#[derive(Serialize)]
struct Unsigned<'a> {
    entry_type: &'a str,
    time: &'a DateTime<Utc>,
    prev_header: Option<&'a Hash>,
    entry_link: &'a Hash,
}

/// An immutable chain link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    entry_type: String,
    time: DateTime<Utc>,
    prev_header: Option<Hash>,
    entry_link: Hash,
    signature: Signature,
}

impl Header {
    /// Build and sign a header.
    #[must_use]
    pub fn new(
        entry_type: impl Into<String>,
        time: DateTime<Utc>,
        prev_header: Option<Hash>,
        entry_link: Hash,
        signer: &dyn Signer,
    ) -> Self {
        let entry_type = entry_type.into();
        let payload = signing_payload(&entry_type, &time, prev_header.as_ref(), &entry_link);
        let signature = signer.sign(&payload);
        Self {
            entry_type,
            time,
            prev_header,
            entry_link,
            signature,
        }
    }

    #[must_use]
    pub fn entry_type(&self) -> &str {
        &self.entry_type
    }

    #[must_use]
    pub const fn time(&self) -> DateTime<Utc> {
        self.time
    }

    /// Address of the previous header, `None` for the first link.
    #[must_use]
    pub const fn prev_header(&self) -> Option<&Hash> {
        self.prev_header.as_ref()
    }

    /// Address of the entry this header anchors.
    #[must_use]
    pub const fn entry_link(&self) -> &Hash {
        &self.entry_link
    }

    #[must_use]
    pub const fn signature(&self) -> &Signature {
        &self.signature
    }

    /// The bytes the signature was computed over.
    #[must_use]
    pub fn signed_payload(&self) -> Vec<u8> {
        signing_payload(
            &self.entry_type,
            &self.time,
            self.prev_header.as_ref(),
            &self.entry_link,
        )
    }

    /// Content address of the header, used as the next link's back-reference.
    #[must_use]
    pub fn hash(&self) -> Hash {
        // Hash, String, Option and DateTime all serialize infallibly.
        Hash::sum(&serde_json::to_vec(self).unwrap_or_default())
    }
}

fn signing_payload(
    entry_type: &str,
    time: &DateTime<Utc>,
    prev_header: Option<&Hash>,
    entry_link: &Hash,
) -> Vec<u8> {
    serde_json::to_vec(&Unsigned {
        entry_type,
        time,
        prev_header,
        entry_link,
    })
    .unwrap_or_default()
}
