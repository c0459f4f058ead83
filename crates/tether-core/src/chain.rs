//! Source chain storage.
//!
//! An agent's chain is an append-only sequence of [`Header`]s, each naming the
//! previous one by hash. [`ChainStore`] is the seam for persistence; the core
//! ships [`MemoryChain`].

use tracing::trace;

use crate::error::ErrorCode;
use crate::hash::Hash;
use crate::header::Header;

/// Errors raised when a header does not extend the chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error(
        "header at position {position} links to {}, expected {}",
        show(.found.as_ref()),
        show(.expected.as_ref())
    )]
    BrokenLink {
        position: usize,
        expected: Option<Hash>,
        found: Option<Hash>,
    },
}

fn show(hash: Option<&Hash>) -> String {
    hash.map_or_else(|| "nothing".to_string(), ToString::to_string)
}

impl ChainError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::BrokenLink { .. } => ErrorCode::ChainLinkBroken,
        }
    }
}

/// Append-only header storage for one agent.
pub trait ChainStore: Send {
    /// Append `header` if it links to the current head; returns its hash.
    ///
    /// # Errors
    ///
    /// [`ChainError::BrokenLink`] when `header.prev_header()` is not the head.
    fn append(&mut self, header: Header) -> Result<Hash, ChainError>;

    /// Remove and return the newest header, undoing the last append.
    fn pop_head(&mut self) -> Option<Header>;

    /// Hash of the newest header.
    fn head(&self) -> Option<Hash>;

    /// All headers, oldest first.
    fn headers(&self) -> &[Header];

    fn len(&self) -> usize {
        self.headers().len()
    }

    fn is_empty(&self) -> bool {
        self.headers().is_empty()
    }
}

/// In-memory chain.
#[derive(Debug, Clone, Default)]
pub struct MemoryChain {
    headers: Vec<Header>,
    head: Option<Hash>,
}

impl MemoryChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChainStore for MemoryChain {
    fn append(&mut self, header: Header) -> Result<Hash, ChainError> {
        if header.prev_header() != self.head.as_ref() {
            return Err(ChainError::BrokenLink {
                position: self.headers.len(),
                expected: self.head,
                found: header.prev_header().copied(),
            });
        }
        let hash = header.hash();
        trace!(%hash, position = self.headers.len(), "chain append");
        self.headers.push(header);
        self.head = Some(hash);
        Ok(hash)
    }

    fn pop_head(&mut self) -> Option<Header> {
        let popped = self.headers.pop()?;
        self.head = self.headers.last().map(Header::hash);
        trace!(position = self.headers.len(), "chain head popped");
        Some(popped)
    }

    fn head(&self) -> Option<Hash> {
        self.head
    }

    fn headers(&self) -> &[Header] {
        &self.headers
    }
}

/// Check that `headers` (oldest first) form an unbroken chain from genesis.
///
/// # Errors
///
/// [`ChainError::BrokenLink`] at the first header whose back-link is wrong.
pub fn verify_chain(headers: &[Header]) -> Result<(), ChainError> {
    let mut prev: Option<Hash> = None;
    for (position, header) in headers.iter().enumerate() {
        if header.prev_header() != prev.as_ref() {
            return Err(ChainError::BrokenLink {
                position,
                expected: prev,
                found: header.prev_header().copied(),
            });
        }
        prev = Some(header.hash());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{Signature, Signer};
    use chrono::Utc;

    struct NoSig;

    impl Signer for NoSig {
        fn sign(&self, _payload: &[u8]) -> Signature {
            Signature::default()
        }
    }

    fn link(prev: Option<Hash>, content: &[u8]) -> Header {
        Header::new("post", Utc::now(), prev, Hash::sum(content), &NoSig)
    }

    #[test]
    fn appends_extend_head() {
        let mut chain = MemoryChain::new();
        assert!(chain.is_empty());
        assert_eq!(chain.head(), None);

        let first = chain.append(link(None, b"a")).expect("genesis");
        let second = chain.append(link(Some(first), b"b")).expect("second");
        assert_eq!(chain.head(), Some(second));
        assert_eq!(chain.len(), 2);
        assert_eq!(verify_chain(chain.headers()), Ok(()));
    }

    #[test]
    fn stale_back_link_is_rejected() {
        let mut chain = MemoryChain::new();
        let first = chain.append(link(None, b"a")).expect("genesis");
        chain.append(link(Some(first), b"b")).expect("second");

        let err = chain.append(link(Some(first), b"c")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ChainLinkBroken);
        assert!(matches!(err, ChainError::BrokenLink { position: 2, .. }));
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn pop_head_restores_previous_head() {
        let mut chain = MemoryChain::new();
        let first = chain.append(link(None, b"a")).expect("genesis");
        let second = link(Some(first), b"b");
        chain.append(second.clone()).expect("second");

        assert_eq!(chain.pop_head(), Some(second));
        assert_eq!(chain.head(), Some(first));
        chain.append(link(Some(first), b"c")).expect("re-extend");

        chain.pop_head();
        chain.pop_head();
        assert_eq!(chain.head(), None);
        assert_eq!(chain.pop_head(), None);
    }

    #[test]
    fn second_genesis_is_rejected() {
        let mut chain = MemoryChain::new();
        chain.append(link(None, b"a")).expect("genesis");
        let err = chain.append(link(None, b"b")).unwrap_err();
        assert!(matches!(err, ChainError::BrokenLink { found: None, .. }));
    }

    #[test]
    fn verify_reports_first_break() {
        let a = link(None, b"a");
        let b = link(Some(a.hash()), b"b");
        let orphan = link(Some(Hash::sum(b"elsewhere")), b"c");
        assert_eq!(verify_chain(&[a.clone(), b.clone()]), Ok(()));
        assert_eq!(verify_chain(&[]), Ok(()));

        let err = verify_chain(&[a, b, orphan]).unwrap_err();
        assert!(matches!(err, ChainError::BrokenLink { position: 2, .. }));
        assert!(err.to_string().starts_with("header at position 2 links to "));
    }
}
