//! The Action family.
//!
//! Every chain-mutating operation is an [`Action`] variant. A variant bundles
//! its entry payload with the behaviour needed to take it through the
//! pipeline: canonical serialization, system validation, DHT sharing, and
//! handling when it arrives as a network request.
//!
//! The family is closed. Adding an operation means adding a variant, an
//! [`ActionKind`], and an [`ActionBehavior`] implementation; [`Action`]
//! delegates to the variant and [`ActionKind::for_entry_type`] is the routing
//! table used by the message dispatcher.
//!
//! # Header lifecycle
//!
//! An action starts [`Anchor::Unanchored`]. The commit step attaches a
//! [`Header`], after which the action can be system-validated to completion.
//! `set_header(None)` returns it to the unanchored state.

pub mod commit;
pub mod migrate;

pub use commit::CommitAction;
pub use migrate::{MIGRATE_CLOSE, MIGRATE_OPEN, MigrateAction, MigrateEntry};

use std::fmt;

use crate::dht::{Dht, DhtError};
use crate::entry::{Entry, EntryDef, EntryError, MIGRATE_ENTRY_TYPE, SYS_ENTRY_PREFIX};
use crate::error::ErrorCode;
use crate::hash::Hash;
use crate::header::Header;
use crate::message::{Message, MessageKind, Response};
use crate::peer::NodeId;
use crate::registry::RegistryError;
use crate::validate::{ValidationError, ValidationHost, ValidationPackage};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while handling an action as a network request.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// The variant never accepts direct network requests.
    #[error("Action receive is invalid")]
    InvalidReceive,

    /// The entry type is private and cannot be requested by a peer.
    #[error("entry type '{0}' is private")]
    EntryDefPrivate(String),

    /// No variant handles the declared entry type.
    #[error("no action handles entry type '{0}'")]
    UnsupportedEntryType(String),

    /// The message kind or body does not fit the handler.
    #[error("unexpected {0} message")]
    UnexpectedMessage(MessageKind),

    /// The carried entry does not hash to the declared address.
    #[error("entry content hashes to {computed}, request declared {declared}")]
    ContentMismatch { declared: Hash, computed: Hash },

    #[error(transparent)]
    Entry(#[from] EntryError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Dht(#[from] DhtError),
}

impl ActionError {
    /// Return the machine-readable error code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidReceive => ErrorCode::InvalidReceive,
            Self::EntryDefPrivate(_) => ErrorCode::EntryDefPrivate,
            Self::UnsupportedEntryType(_) | Self::UnexpectedMessage(_) => {
                ErrorCode::UnsupportedEntryType
            }
            Self::ContentMismatch { .. } => ErrorCode::InvalidEntry,
            Self::Entry(e) => e.code(),
            Self::Registry(e) => e.code(),
            Self::Validation(e) => e.code(),
            Self::Dht(e) => e.code(),
        }
    }
}

// ---------------------------------------------------------------------------
// Anchor
// ---------------------------------------------------------------------------

/// Whether an action has been bound to a chain position yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Anchor {
    #[default]
    Unanchored,
    Anchored(Header),
}

impl Anchor {
    #[must_use]
    pub const fn header(&self) -> Option<&Header> {
        match self {
            Self::Unanchored => None,
            Self::Anchored(h) => Some(h),
        }
    }

    #[must_use]
    pub const fn is_anchored(&self) -> bool {
        matches!(self, Self::Anchored(_))
    }
}

impl From<Option<Header>> for Anchor {
    fn from(header: Option<Header>) -> Self {
        header.map_or(Self::Unanchored, Self::Anchored)
    }
}

// ---------------------------------------------------------------------------
// Behaviour contract
// ---------------------------------------------------------------------------

/// The contract every action variant satisfies.
pub trait ActionBehavior {
    /// Stable lowercase identifier used for routing and API dispatch.
    fn name(&self) -> &'static str;

    /// Canonical entry for the current payload.
    fn entry(&self) -> Entry;

    /// Tag this variant is filed under in the entry-definition registry.
    fn entry_type(&self) -> &str;

    fn header(&self) -> Option<&Header>;

    fn set_header(&mut self, header: Option<Header>);

    /// System validation: definition match, anchoring, payload fields.
    ///
    /// # Errors
    ///
    /// See [`ValidationError`].
    fn sys_validation(
        &self,
        host: &ValidationHost<'_>,
        def: &EntryDef,
        package: Option<&ValidationPackage>,
        sources: &[NodeId],
    ) -> Result<(), ValidationError>;

    /// Gate on whether a peer may request validation of this action at all.
    ///
    /// # Errors
    ///
    /// Variant specific; see the implementations.
    fn check_validation_request(&self, def: &EntryDef) -> Result<(), ActionError>;

    /// Handle this action arriving as a live network request.
    ///
    /// # Errors
    ///
    /// Variant specific; see the implementations.
    fn receive(&self, dht: &Dht, msg: &Message) -> Result<Response, ActionError>;
}

// ---------------------------------------------------------------------------
// Kinds and routing
// ---------------------------------------------------------------------------

/// Discriminant of the [`Action`] family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Migrate,
    Commit,
}

impl ActionKind {
    pub const ALL: [Self; 2] = [Self::Migrate, Self::Commit];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Migrate => migrate::NAME,
            Self::Commit => commit::NAME,
        }
    }

    /// Resolve the variant responsible for an entry type.
    ///
    /// System types other than migrate have no action and resolve to `None`;
    /// every application type is handled by [`ActionKind::Commit`].
    #[must_use]
    pub fn for_entry_type(entry_type: &str) -> Option<Self> {
        if entry_type == MIGRATE_ENTRY_TYPE {
            Some(Self::Migrate)
        } else if entry_type.is_empty() || entry_type.starts_with(SYS_ENTRY_PREFIX) {
            None
        } else {
            Some(Self::Commit)
        }
    }

    #[must_use]
    pub fn for_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// An empty, unanchored action of this kind filed under `entry_type`.
    #[must_use]
    pub fn empty(self, entry_type: &str) -> Action {
        match self {
            Self::Migrate => Action::Migrate(MigrateAction::default()),
            Self::Commit => Action::Commit(CommitAction::new(entry_type, Entry::new(""))),
        }
    }

    /// Rebuild the action that produced a stored entry, anchored at `header`.
    ///
    /// # Errors
    ///
    /// [`ValidationError::Failed`] when the entry is not a payload of this
    /// kind.
    pub fn rebuild(
        self,
        entry_type: &str,
        entry: &Entry,
        header: Option<Header>,
    ) -> Result<Action, ValidationError> {
        let mut action = match self {
            Self::Migrate => {
                let payload = MigrateEntry::from_entry(entry).map_err(|e| {
                    ValidationError::Failed(format!("malformed migrate entry: {e}"))
                })?;
                Action::Migrate(MigrateAction::new(payload))
            }
            Self::Commit => Action::Commit(CommitAction::new(entry_type, entry.clone())),
        };
        action.set_header(header);
        Ok(action)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// One chain-mutating operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Migrate(MigrateAction),
    Commit(CommitAction),
}

impl Action {
    #[must_use]
    pub const fn kind(&self) -> ActionKind {
        match self {
            Self::Migrate(_) => ActionKind::Migrate,
            Self::Commit(_) => ActionKind::Commit,
        }
    }

    fn behavior(&self) -> &dyn ActionBehavior {
        match self {
            Self::Migrate(a) => a,
            Self::Commit(a) => a,
        }
    }

    fn behavior_mut(&mut self) -> &mut dyn ActionBehavior {
        match self {
            Self::Migrate(a) => a,
            Self::Commit(a) => a,
        }
    }
}

impl ActionBehavior for Action {
    fn name(&self) -> &'static str {
        self.behavior().name()
    }

    fn entry(&self) -> Entry {
        self.behavior().entry()
    }

    fn entry_type(&self) -> &str {
        self.behavior().entry_type()
    }

    fn header(&self) -> Option<&Header> {
        self.behavior().header()
    }

    fn set_header(&mut self, header: Option<Header>) {
        self.behavior_mut().set_header(header);
    }

    fn sys_validation(
        &self,
        host: &ValidationHost<'_>,
        def: &EntryDef,
        package: Option<&ValidationPackage>,
        sources: &[NodeId],
    ) -> Result<(), ValidationError> {
        self.behavior().sys_validation(host, def, package, sources)
    }

    fn check_validation_request(&self, def: &EntryDef) -> Result<(), ActionError> {
        self.behavior().check_validation_request(def)
    }

    fn receive(&self, dht: &Dht, msg: &Message) -> Result<Response, ActionError> {
        self.behavior().receive(dht, msg)
    }
}

impl From<MigrateAction> for Action {
    fn from(a: MigrateAction) -> Self {
        Self::Migrate(a)
    }
}

impl From<CommitAction> for Action {
    fn from(a: CommitAction) -> Self {
        Self::Commit(a)
    }
}
