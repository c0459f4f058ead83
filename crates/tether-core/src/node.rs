//! A tether node: one agent's chain, DHT view, and the commit pipeline.
//!
//! # Commit and share
//!
//! Committing an action runs, under the per-chain lock:
//!
//! 1. system validation against the registered definition,
//! 2. append of the action's header to the chain store,
//! 3. a live put of the entry into the local DHT, keyed by the entry address,
//! 4. a `REPLICATE` broadcast of the stored record to every peer.
//!
//! The first failing step aborts the commit and its error is returned. A
//! failure in step 3 or 4 pops the appended header and restores the local
//! DHT record, so a failed commit leaves neither behind and may simply be
//! retried. Replicas already handed to the transport are not recalled;
//! peers validate them independently. Entries of private definitions stop
//! after step 2.
//!
//! Peers learn about committed entries only through replication; migrate
//! entries in particular are never accepted as `PUT_REQUEST`s.

use std::sync::{Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::action::{Action, ActionBehavior, ActionError};
use crate::chain::{ChainError, ChainStore, MemoryChain};
use crate::config::NodeConfig;
use crate::dht::{Dht, DhtError, GetMask, GetResponse, Status};
use crate::entry::{Entry, Sharing};
use crate::error::ErrorCode;
use crate::hash::Hash;
use crate::header::{Header, Signer};
use crate::message::{Message, Response, dispatch};
use crate::peer::NodeId;
use crate::registry::{EntryDefRegistry, RegistryError};
use crate::validate::{ValidationError, ValidationHost, sys_validate};

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Errors surfaced by a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("peer {0} is unreachable")]
    Unreachable(NodeId),

    #[error("transport is closed")]
    Closed,
}

/// Outbound message delivery, provided by the networking layer.
///
/// Delivery is asynchronous: `send` only hands the message over.
pub trait Transport: Send + Sync {
    /// Every peer this node replicates to, excluding itself.
    fn peers(&self) -> Vec<NodeId>;

    /// Queue `msg` for delivery to `to`.
    ///
    /// # Errors
    ///
    /// [`TransportError`] when the message cannot be queued.
    fn send(&self, to: &NodeId, msg: Message) -> Result<(), TransportError>;
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from the commit pipeline.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Dht(#[from] DhtError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error("chain lock timed out after {waited:?}")]
    LockTimeout { waited: Duration },
}

impl NodeError {
    /// Return the machine-readable error code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(e) => e.code(),
            Self::Registry(e) => e.code(),
            Self::Chain(e) => e.code(),
            Self::Dht(e) => e.code(),
            Self::Transport(_) => ErrorCode::TransportFailed,
            Self::Action(e) => e.code(),
            Self::LockTimeout { .. } => ErrorCode::LockContention,
        }
    }

    /// Optional remediation hint for operators and agents.
    #[must_use]
    pub fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

type ChainGuard<'a> = MutexGuard<'a, Box<dyn ChainStore>>;

/// One agent's view of the network.
pub struct Node {
    id: NodeId,
    config: NodeConfig,
    registry: EntryDefRegistry,
    chain: Mutex<Box<dyn ChainStore>>,
    dht: Dht,
    transport: Box<dyn Transport>,
    signer: Box<dyn Signer>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("dht_len", &self.dht.len())
            .finish_non_exhaustive()
    }
}

impl Node {
    /// A node with an empty in-memory chain and default config.
    #[must_use]
    pub fn new(
        id: NodeId,
        registry: EntryDefRegistry,
        transport: Box<dyn Transport>,
        signer: Box<dyn Signer>,
    ) -> Self {
        Self {
            dht: Dht::new(id.clone()),
            id,
            config: NodeConfig::default(),
            registry,
            chain: Mutex::new(Box::new(MemoryChain::new())),
            transport,
            signer,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_chain(mut self, chain: Box<dyn ChainStore>) -> Self {
        self.chain = Mutex::new(chain);
        self
    }

    #[must_use]
    pub const fn id(&self) -> &NodeId {
        &self.id
    }

    #[must_use]
    pub const fn config(&self) -> &NodeConfig {
        &self.config
    }

    #[must_use]
    pub const fn registry(&self) -> &EntryDefRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn dht(&self) -> &Dht {
        &self.dht
    }

    /// Hash of the newest chain header.
    ///
    /// # Errors
    ///
    /// [`NodeError::LockTimeout`] if a commit holds the chain too long.
    pub fn chain_head(&self) -> Result<Option<Hash>, NodeError> {
        Ok(self.lock_chain()?.head())
    }

    /// Snapshot of the chain, oldest first.
    ///
    /// # Errors
    ///
    /// [`NodeError::LockTimeout`] if a commit holds the chain too long.
    pub fn chain_headers(&self) -> Result<Vec<Header>, NodeError> {
        Ok(self.lock_chain()?.headers().to_vec())
    }

    /// Build a header for `action` on top of the current chain head.
    ///
    /// The header is not appended. A commit landing in between makes it stale,
    /// and [`Node::commit_and_share`] then fails with a broken link.
    ///
    /// # Errors
    ///
    /// [`NodeError::LockTimeout`] if a commit holds the chain too long.
    pub fn prepare_header(&self, action: &Action) -> Result<Header, NodeError> {
        let chain = self.lock_chain()?;
        Ok(self.header_on(chain.head(), action))
    }

    /// Validate, append, store and broadcast an anchored action.
    ///
    /// `link` is the address of the action's entry. Returns it on success.
    ///
    /// # Errors
    ///
    /// The first failing pipeline step: validation, chain append, DHT put,
    /// or transport send.
    pub fn commit_and_share(&self, action: &Action, link: &Hash) -> Result<Hash, NodeError> {
        let mut chain = self.lock_chain()?;
        self.share_locked(&mut chain, action, link)
    }

    /// Anchor `action` at the chain head and commit it.
    ///
    /// Holds the chain lock across header preparation and commit, so
    /// concurrent commits on the same node serialize cleanly.
    ///
    /// # Errors
    ///
    /// As [`Node::commit_and_share`].
    pub fn commit(&self, mut action: Action) -> Result<(Hash, Action), NodeError> {
        let mut chain = self.lock_chain()?;
        let header = self.header_on(chain.head(), &action);
        let link = *header.entry_link();
        action.set_header(Some(header));
        let hash = self.share_locked(&mut chain, &action, &link)?;
        Ok((hash, action))
    }

    /// Handle one inbound message.
    ///
    /// # Errors
    ///
    /// Whatever the dispatcher returns; see [`dispatch`].
    pub fn receive(&self, msg: &Message) -> Result<Response, ActionError> {
        debug!(node = %self.id, kind = %msg.kind, from = %msg.from, "message in");
        dispatch(&self.dht, &self.registry, msg)
    }

    /// Read from the local DHT view.
    ///
    /// # Errors
    ///
    /// [`DhtError::NotFound`] when absent or filtered out.
    pub fn get(&self, hash: &Hash, filter: Status, mask: GetMask) -> Result<GetResponse, DhtError> {
        self.dht.get(hash, filter, mask)
    }

    /// [`Node::get`] retried under the configured poll policy.
    ///
    /// # Errors
    ///
    /// The last [`DhtError::NotFound`] once the policy is spent.
    pub fn get_polling(
        &self,
        hash: &Hash,
        filter: Status,
        mask: GetMask,
    ) -> Result<GetResponse, DhtError> {
        self.dht.get_polling(hash, filter, mask, &self.config.poll)
    }

    fn header_on(&self, head: Option<Hash>, action: &Action) -> Header {
        Header::new(
            action.entry_type(),
            Utc::now(),
            head,
            action.entry().sum(),
            self.signer.as_ref(),
        )
    }

    fn share_locked(
        &self,
        chain: &mut ChainGuard<'_>,
        action: &Action,
        link: &Hash,
    ) -> Result<Hash, NodeError> {
        let def = self.registry.lookup(action.entry_type())?;
        let host = ValidationHost::new(&self.id, &self.registry);
        sys_validate(action, &host, def, None, std::slice::from_ref(&self.id))?;

        let header = action
            .header()
            .ok_or(ValidationError::ActionMissingHeader)?
            .clone();
        let entry = action.entry();
        let computed = entry.sum();
        if &computed != link || header.entry_link() != link {
            return Err(ActionError::ContentMismatch {
                declared: *link,
                computed,
            }
            .into());
        }

        let header_hash = chain.append(header.clone())?;
        if def.sharing == Sharing::Private {
            info!(node = %self.id, action = action.name(), %header_hash, "committed private entry");
            return Ok(*link);
        }

        let prior = self.dht.record(link);
        if let Err(err) = self.publish(action, &entry, header, link) {
            chain.pop_head();
            self.dht.restore(*link, prior);
            warn!(
                node = %self.id,
                %link,
                %header_hash,
                code = %err.code(),
                "commit rolled back: {err}"
            );
            return Err(err);
        }

        info!(
            node = %self.id,
            action = action.name(),
            entry_type = action.entry_type(),
            %link,
            %header_hash,
            "committed and shared"
        );
        Ok(*link)
    }

    /// Local DHT put, then a `REPLICATE` to every peer.
    fn publish(
        &self,
        action: &Action,
        entry: &Entry,
        header: Header,
        link: &Hash,
    ) -> Result<(), NodeError> {
        self.dht.put(
            *link,
            action.entry_type(),
            entry.marshal(),
            Some(header),
            Status::LIVE,
            self.id.clone(),
        )?;
        let record = self.dht.record(link).ok_or(DhtError::NotFound(*link))?;

        for peer in self.transport.peers() {
            self.transport
                .send(&peer, Message::replicate(self.id.clone(), *link, record.clone()))
                .inspect_err(|err| {
                    warn!(node = %self.id, %peer, %link, "replication send failed: {err}");
                })?;
        }
        Ok(())
    }

    fn lock_chain(&self) -> Result<ChainGuard<'_>, NodeError> {
        let timeout = self.config.chain.lock_timeout();
        let start = Instant::now();
        loop {
            match self.chain.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(poisoned)) => return Ok(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {}
            }

            if start.elapsed() >= timeout {
                return Err(NodeError::LockTimeout {
                    waited: start.elapsed(),
                });
            }

            thread::sleep(Duration::from_millis(1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{CommitAction, MIGRATE_CLOSE, MigrateAction, MigrateEntry};
    use crate::entry::{DataFormat, EntryDef, MIGRATE_ENTRY_TYPE};
    use crate::header::Signature;
    use crate::message::{MessageBody, MessageKind};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct NoSig;

    impl Signer for NoSig {
        fn sign(&self, _payload: &[u8]) -> Signature {
            Signature::default()
        }
    }

    #[derive(Clone, Default)]
    struct Outbox {
        peers: Vec<NodeId>,
        sent: Arc<Mutex<Vec<(NodeId, Message)>>>,
        fail: Arc<AtomicBool>,
    }

    impl Outbox {
        fn sent(&self) -> Vec<(NodeId, Message)> {
            self.sent.lock().expect("outbox").clone()
        }

        fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }
    }

    impl Transport for Outbox {
        fn peers(&self) -> Vec<NodeId> {
            self.peers.clone()
        }

        fn send(&self, to: &NodeId, msg: Message) -> Result<(), TransportError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(TransportError::Unreachable(to.clone()));
            }
            self.sent.lock().expect("outbox").push((to.clone(), msg));
            Ok(())
        }
    }

    fn registry() -> EntryDefRegistry {
        let mut reg = EntryDefRegistry::with_system_defs();
        reg.register(EntryDef::new("post", DataFormat::String, Sharing::Public))
            .expect("post");
        reg.register(EntryDef::new("diary", DataFormat::String, Sharing::Private))
            .expect("diary");
        reg
    }

    fn node(outbox: &Outbox) -> Node {
        Node::new(
            NodeId::new("n0"),
            registry(),
            Box::new(outbox.clone()),
            Box::new(NoSig),
        )
    }

    fn two_peers() -> Outbox {
        Outbox {
            peers: vec![NodeId::new("n1"), NodeId::new("n2")],
            ..Outbox::default()
        }
    }

    fn migrate() -> Action {
        MigrateAction::new(MigrateEntry::new(
            MIGRATE_CLOSE,
            &Hash::sum(b"dna"),
            &Hash::sum(b"key"),
            "",
        ))
        .into()
    }

    #[test]
    fn commit_stores_locally_and_replicates_to_every_peer() {
        let outbox = two_peers();
        let node = node(&outbox);
        let (hash, action) = node.commit(migrate()).expect("commit");

        assert_eq!(hash, action.entry().sum());
        assert!(action.header().is_some());

        let got = node
            .get(&hash, Status::LIVE, GetMask::ALL)
            .expect("stored locally");
        assert_eq!(got.entry, Some(action.entry().marshal()));
        assert_eq!(got.entry_type.as_deref(), Some(MIGRATE_ENTRY_TYPE));
        assert_eq!(got.sources, vec![NodeId::new("n0")]);

        let sent = outbox.sent();
        assert_eq!(sent.len(), 2);
        for (_, msg) in &sent {
            assert_eq!(msg.kind, MessageKind::Replicate);
            assert!(matches!(&msg.body, MessageBody::Replica { hash: h, .. } if *h == hash));
        }
        assert_eq!(node.chain_headers().expect("chain").len(), 1);
    }

    #[test]
    fn successive_commits_link_the_chain() {
        let node = node(&Outbox::default());
        node.commit(migrate()).expect("first");
        node.commit(CommitAction::new("post", Entry::new("hi")).into())
            .expect("second");
        let headers = node.chain_headers().expect("chain");
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[1].prev_header(), Some(&headers[0].hash()));
        assert_eq!(node.chain_head().expect("head"), Some(headers[1].hash()));
    }

    #[test]
    fn unanchored_action_is_refused() {
        let outbox = two_peers();
        let node = node(&outbox);
        let action = migrate();
        let err = node
            .commit_and_share(&action, &action.entry().sum())
            .unwrap_err();
        assert!(matches!(err, NodeError::Validation(ValidationError::ActionMissingHeader)));
        assert!(node.dht().is_empty());
        assert!(outbox.sent().is_empty());
    }

    #[test]
    fn invalid_payload_aborts_before_append() {
        let node = node(&Outbox::default());
        let mut entry = MigrateEntry::new(MIGRATE_CLOSE, &Hash::sum(b"d"), &Hash::sum(b"k"), "");
        entry.key = "garbage".into();
        let err = node.commit(MigrateAction::new(entry).into()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationFailed);
        assert!(node.chain_headers().expect("chain").is_empty());
        assert!(node.dht().is_empty());
    }

    #[test]
    fn prepared_header_commits_through_share() {
        let outbox = two_peers();
        let node = node(&outbox);
        let mut action = migrate();
        let header = node.prepare_header(&action).expect("prepare");
        let link = *header.entry_link();
        action.set_header(Some(header));
        assert_eq!(node.commit_and_share(&action, &link).expect("share"), link);
        assert_eq!(outbox.sent().len(), 2);
    }

    #[test]
    fn stale_prepared_header_is_rejected() {
        let node = node(&Outbox::default());
        let mut action = migrate();
        let header = node.prepare_header(&action).expect("prepare");
        let link = *header.entry_link();
        action.set_header(Some(header));

        node.commit(CommitAction::new("post", Entry::new("first")).into())
            .expect("intervening commit");
        let err = node.commit_and_share(&action, &link).unwrap_err();
        assert!(matches!(err, NodeError::Chain(ChainError::BrokenLink { .. })));
    }

    #[test]
    fn wrong_link_is_rejected() {
        let node = node(&Outbox::default());
        let mut action = migrate();
        action.set_header(Some(node.prepare_header(&action).expect("prepare")));
        let err = node
            .commit_and_share(&action, &Hash::sum(b"elsewhere"))
            .unwrap_err();
        assert!(matches!(err, NodeError::Action(ActionError::ContentMismatch { .. })));
    }

    #[test]
    fn private_entries_stay_on_the_chain() {
        let outbox = two_peers();
        let node = node(&outbox);
        let (hash, _) = node
            .commit(CommitAction::new("diary", Entry::new("dear")).into())
            .expect("commit");
        assert_eq!(node.chain_headers().expect("chain").len(), 1);
        assert!(node.get(&hash, Status::ANY, GetMask::ENTRY).is_err());
        assert!(outbox.sent().is_empty());
    }

    #[test]
    fn transport_failure_is_returned_and_rolled_back() {
        let outbox = two_peers();
        outbox.set_failing(true);
        let node = node(&outbox);
        let err = node.commit(migrate()).unwrap_err();
        assert!(matches!(err, NodeError::Transport(TransportError::Unreachable(_))));
        assert_eq!(err.code(), ErrorCode::TransportFailed);
        assert!(node.chain_headers().expect("chain").is_empty());
        assert_eq!(node.chain_head().expect("head"), None);
        assert!(node.dht().is_empty());

        outbox.set_failing(false);
        let (hash, _) = node.commit(migrate()).expect("retry");
        assert_eq!(node.chain_headers().expect("chain").len(), 1);
        assert_eq!(node.dht().hashes(), vec![hash]);
        assert_eq!(outbox.sent().len(), 2);
    }

    #[test]
    fn collision_aborts_without_touching_chain_or_store() {
        let outbox = two_peers();
        let node = node(&outbox);
        let first = node
            .commit(CommitAction::new("post", Entry::new("first")).into())
            .expect("first");
        let head = node.chain_head().expect("head");

        let action = migrate();
        let squatter = action.entry().sum();
        node.dht()
            .put(squatter, "post", b"squat".to_vec(), None, Status::LIVE, NodeId::new("x"))
            .expect("squat");
        let before = node.dht().record(&squatter);

        let err = node.commit(action).unwrap_err();
        assert!(matches!(err, NodeError::Dht(DhtError::HashCollision(_))));
        assert_eq!(node.chain_head().expect("head"), head);
        assert_eq!(node.chain_headers().expect("chain").len(), 1);
        assert_eq!(node.dht().record(&squatter), before);
        assert!(node.dht().exists(&first.0, Status::LIVE));
        assert_eq!(outbox.sent().len(), 2);
    }

    #[test]
    fn lock_times_out_while_held() {
        let config = NodeConfig {
            chain: crate::config::ChainConfig { lock_timeout_ms: 5 },
            ..NodeConfig::default()
        };
        let node = node(&Outbox::default()).with_config(config);
        let _held = node.lock_chain().expect("first lock");
        let err = node.chain_head().unwrap_err();
        assert!(matches!(err, NodeError::LockTimeout { .. }));
        assert_eq!(err.code(), ErrorCode::LockContention);
    }

    #[test]
    fn concurrent_commits_serialize() {
        let node = node(&Outbox::default());
        thread::scope(|s| {
            for i in 0..8 {
                let node = &node;
                s.spawn(move || {
                    node.commit(CommitAction::new("post", Entry::new(format!("p{i}"))).into())
                        .expect("commit");
                });
            }
        });
        let headers = node.chain_headers().expect("chain");
        assert_eq!(headers.len(), 8);
        assert_eq!(crate::chain::verify_chain(&headers), Ok(()));
        assert_eq!(node.dht().len(), 8);
    }
}
