//! Inbound message routing.
//!
//! The transport hands every inbound [`Message`] to [`dispatch`]. Routing is
//! by message kind:
//!
//! - `PUT_REQUEST`: resolve the action variant from the hold request's
//!   declared entry type, gate it with `check_validation_request`, and invoke
//!   its `receive`. Errors are returned as-is; there is no retry and no
//!   default handler.
//! - `GET_REQUEST`: served straight from the local DHT.
//! - `REPLICATE`: transport-level dissemination of a committed record. The
//!   record must hash to its declared address and pass system validation for
//!   its entry type; it is then held without calling the action's `receive`,
//!   which is how entries that refuse direct requests (migrate) still reach
//!   every peer.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::action::{ActionBehavior, ActionError, ActionKind};
use crate::dht::{Dht, GetMask, GetResponse, Record, Status};
use crate::entry::Entry;
use crate::hash::Hash;
use crate::header::Header;
use crate::peer::NodeId;
use crate::registry::EntryDefRegistry;
use crate::validate::{ValidationError, ValidationHost, sys_validate};

/// Request type tag carried in the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    PutRequest,
    GetRequest,
    Replicate,
}

impl MessageKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PutRequest => "PUT_REQUEST",
            Self::GetRequest => "GET_REQUEST",
            Self::Replicate => "REPLICATE",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ask a peer to validate and hold an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldReq {
    pub entry_type: String,
    pub entry_hash: Hash,
    pub entry: Entry,
    pub header: Option<Header>,
}

/// Ask a peer for its copy of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetReq {
    pub hash: Hash,
    pub status: Status,
    pub mask: GetMask,
}

/// Kind-specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    Hold(HoldReq),
    Get(GetReq),
    Replica { hash: Hash, record: Record },
}

/// Wire envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub from: NodeId,
    pub body: MessageBody,
}

impl Message {
    #[must_use]
    pub const fn new(kind: MessageKind, from: NodeId, body: MessageBody) -> Self {
        Self { kind, from, body }
    }

    #[must_use]
    pub const fn put_request(from: NodeId, req: HoldReq) -> Self {
        Self::new(MessageKind::PutRequest, from, MessageBody::Hold(req))
    }

    #[must_use]
    pub const fn get_request(from: NodeId, hash: Hash, status: Status, mask: GetMask) -> Self {
        Self::new(
            MessageKind::GetRequest,
            from,
            MessageBody::Get(GetReq { hash, status, mask }),
        )
    }

    #[must_use]
    pub const fn replicate(from: NodeId, hash: Hash, record: Record) -> Self {
        Self::new(
            MessageKind::Replicate,
            from,
            MessageBody::Replica { hash, record },
        )
    }
}

/// Successful handling of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// The entry is now held live.
    Held(Hash),
    Get(GetResponse),
    Replicated(Hash),
}

/// Route one inbound message.
///
/// # Errors
///
/// Whatever the resolved handler returns, unchanged. A `PUT_REQUEST` whose
/// entry type no variant handles is [`ActionError::UnsupportedEntryType`];
/// a body that does not fit the kind is [`ActionError::UnexpectedMessage`].
pub fn dispatch(
    dht: &Dht,
    registry: &EntryDefRegistry,
    msg: &Message,
) -> Result<Response, ActionError> {
    match (msg.kind, &msg.body) {
        (MessageKind::PutRequest, MessageBody::Hold(req)) => {
            let kind = ActionKind::for_entry_type(&req.entry_type)
                .ok_or_else(|| ActionError::UnsupportedEntryType(req.entry_type.clone()))?;
            let def = registry.lookup(&req.entry_type)?;
            let action = kind.empty(&req.entry_type);

            let result = action
                .check_validation_request(def)
                .and_then(|()| action.receive(dht, msg));
            if let Err(err) = &result {
                warn!(
                    node = %dht.node(),
                    from = %msg.from,
                    action = %kind,
                    code = %err.code(),
                    "put request refused: {err}"
                );
            }
            result
        }
        (MessageKind::GetRequest, MessageBody::Get(req)) => {
            Ok(Response::Get(dht.get(&req.hash, req.status, req.mask)?))
        }
        (MessageKind::Replicate, MessageBody::Replica { hash, record }) => {
            debug!(node = %dht.node(), from = %msg.from, %hash, "replica received");
            if let Err(err) = check_replica(dht, registry, &msg.from, hash, record) {
                warn!(
                    node = %dht.node(),
                    from = %msg.from,
                    %hash,
                    code = %err.code(),
                    "replica refused: {err}"
                );
                return Err(err);
            }
            dht.hold(*hash, record.clone())?;
            Ok(Response::Replicated(*hash))
        }
        (kind, _) => Err(ActionError::UnexpectedMessage(kind)),
    }
}

/// A replica is held only if its bytes are the entry at `hash`, its header
/// links that entry, and the rebuilt action passes system validation.
fn check_replica(
    dht: &Dht,
    registry: &EntryDefRegistry,
    from: &NodeId,
    hash: &Hash,
    record: &Record,
) -> Result<(), ActionError> {
    let computed = Hash::sum(&record.entry);
    if computed != *hash {
        return Err(ActionError::ContentMismatch {
            declared: *hash,
            computed,
        });
    }
    if let Some(header) = &record.header {
        if header.entry_link() != hash {
            return Err(ActionError::ContentMismatch {
                declared: *header.entry_link(),
                computed,
            });
        }
        if header.entry_type() != record.entry_type {
            return Err(ValidationError::EntryDefInvalid.into());
        }
    }

    let entry = Entry::unmarshal(&record.entry)?;
    let kind = ActionKind::for_entry_type(&record.entry_type)
        .ok_or_else(|| ActionError::UnsupportedEntryType(record.entry_type.clone()))?;
    let def = registry.lookup(&record.entry_type)?;
    let action = kind.rebuild(&record.entry_type, &entry, record.header.clone())?;
    action.check_validation_request(def)?;

    let host = ValidationHost::new(dht.node(), registry);
    sys_validate(&action, &host, def, None, std::slice::from_ref(from))?;
    Ok(())
}
