//! Content addresses for entries, headers, and DHT keys.
//!
//! A [`Hash`] is a BLAKE3 digest framed as a multihash
//! (`code`, `length`, digest) and rendered as base58 text. The textual form
//! round-trips through [`Hash::decode`]; malformed input is always an error,
//! never a zero value.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// Multihash function code for BLAKE3.
pub const BLAKE3_CODE: u8 = 0x1e;

/// Digest length in bytes.
pub const DIGEST_LEN: usize = 32;

const DIGEST_LEN_BYTE: u8 = 32;

/// Length of the framed multihash: code byte, length byte, digest.
pub const MULTIHASH_LEN: usize = DIGEST_LEN + 2;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from decoding a textual or binary content address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashError {
    /// The text contains characters outside the base58 alphabet.
    #[error("input isn't valid base58: {0}")]
    InvalidBase58(String),

    /// The decoded bytes are not a BLAKE3 multihash of the expected length.
    #[error("input isn't valid multihash")]
    InvalidMultihash,
}

impl HashError {
    /// Return the machine-readable error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::InvalidHash
    }
}

// ---------------------------------------------------------------------------
// Hash
// ---------------------------------------------------------------------------

/// A BLAKE3 content address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; DIGEST_LEN]);

impl Hash {
    /// Compute the content address of a byte slice.
    #[must_use]
    pub fn sum(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// Compute the content address of a value's JSON serialization.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if `value` cannot be encoded as JSON.
    pub fn of_json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        let bytes = serde_json::to_vec(value)?;
        Ok(Self::sum(&bytes))
    }

    /// Wrap a raw 32-byte digest.
    #[must_use]
    pub const fn from_digest(digest: [u8; DIGEST_LEN]) -> Self {
        Self(digest)
    }

    /// The raw digest bytes.
    #[must_use]
    pub const fn digest(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Framed multihash bytes: `[BLAKE3_CODE, DIGEST_LEN, digest...]`.
    #[must_use]
    pub fn to_multihash(&self) -> [u8; MULTIHASH_LEN] {
        let mut out = [0u8; MULTIHASH_LEN];
        out[0] = BLAKE3_CODE;
        out[1] = DIGEST_LEN_BYTE;
        out[2..].copy_from_slice(&self.0);
        out
    }

    /// Parse framed multihash bytes.
    ///
    /// # Errors
    ///
    /// Returns [`HashError::InvalidMultihash`] if the function code, the
    /// declared length, or the total length is wrong.
    pub fn from_multihash(bytes: &[u8]) -> Result<Self, HashError> {
        match bytes {
            [code, len, digest @ ..]
                if *code == BLAKE3_CODE
                    && usize::from(*len) == DIGEST_LEN
                    && digest.len() == DIGEST_LEN =>
            {
                let mut out = [0u8; DIGEST_LEN];
                out.copy_from_slice(digest);
                Ok(Self(out))
            }
            _ => Err(HashError::InvalidMultihash),
        }
    }

    /// Decode the base58 textual form.
    ///
    /// # Errors
    ///
    /// Returns [`HashError::InvalidBase58`] for characters outside the
    /// alphabet and [`HashError::InvalidMultihash`] for anything that does not
    /// decode to a framed BLAKE3 digest (including the empty string).
    pub fn decode(text: &str) -> Result<Self, HashError> {
        let bytes = bs58::decode(text)
            .into_vec()
            .map_err(|e| HashError::InvalidBase58(e.to_string()))?;
        Self::from_multihash(&bytes)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.to_multihash()).into_string())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({self})")
    }
}

impl FromStr for Hash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl Serialize for Hash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::decode(&s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
