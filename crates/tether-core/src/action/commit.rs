//! The commit action: a generic application entry.
//!
//! Unlike migrate, commit entries may be pushed to a peer with a
//! `PUT_REQUEST`; the receiving peer checks the content address and holds the
//! entry live.

use tracing::debug;

use super::{ActionBehavior, ActionError, Anchor};
use crate::chain::verify_chain;
use crate::dht::{Dht, Status};
use crate::entry::{DataFormat, Entry, EntryDef, Sharing};
use crate::header::Header;
use crate::message::{Message, MessageBody, MessageKind, Response};
use crate::peer::NodeId;
use crate::validate::{ValidationError, ValidationHost, ValidationPackage, check_def_and_anchor};

/// Routing and API name of the commit action.
pub const NAME: &str = "commit";

/// Action committing an application entry of a registered type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitAction {
    entry_type: String,
    entry: Entry,
    anchor: Anchor,
}

impl CommitAction {
    #[must_use]
    pub fn new(entry_type: impl Into<String>, entry: Entry) -> Self {
        Self {
            entry_type: entry_type.into(),
            entry,
            anchor: Anchor::Unanchored,
        }
    }

    #[must_use]
    pub fn with_header(mut self, header: Header) -> Self {
        self.anchor = Anchor::Anchored(header);
        self
    }
}

impl ActionBehavior for CommitAction {
    fn name(&self) -> &'static str {
        NAME
    }

    fn entry(&self) -> Entry {
        self.entry.clone()
    }

    fn entry_type(&self) -> &str {
        &self.entry_type
    }

    fn header(&self) -> Option<&Header> {
        self.anchor.header()
    }

    fn set_header(&mut self, header: Option<Header>) {
        self.anchor = header.into();
    }

    fn sys_validation(
        &self,
        host: &ValidationHost<'_>,
        def: &EntryDef,
        package: Option<&ValidationPackage>,
        _sources: &[NodeId],
    ) -> Result<(), ValidationError> {
        let expected = host
            .registry
            .lookup(&self.entry_type)
            .map_err(|_| ValidationError::EntryDefInvalid)?;
        if expected.is_sys() {
            return Err(ValidationError::EntryDefInvalid);
        }
        check_def_and_anchor(expected, def, self.header())?;

        if def.data_format == DataFormat::Json {
            serde_json::from_str::<serde_json::Value>(&self.entry.content).map_err(|e| {
                ValidationError::Failed(format!(
                    "Error ({e}) when decoding {} content as JSON",
                    def.name
                ))
            })?;
        }

        if let Some(package) = package {
            verify_chain(&package.headers).map_err(ValidationError::Package)?;
        }
        Ok(())
    }

    fn check_validation_request(&self, def: &EntryDef) -> Result<(), ActionError> {
        if def.sharing == Sharing::Private {
            return Err(ActionError::EntryDefPrivate(def.name.clone()));
        }
        Ok(())
    }

    fn receive(&self, dht: &Dht, msg: &Message) -> Result<Response, ActionError> {
        let (MessageKind::PutRequest, MessageBody::Hold(req)) = (msg.kind, &msg.body) else {
            return Err(ActionError::UnexpectedMessage(msg.kind));
        };

        let computed = req.entry.sum();
        if computed != req.entry_hash {
            return Err(ActionError::ContentMismatch {
                declared: req.entry_hash,
                computed,
            });
        }

        dht.put(
            req.entry_hash,
            &req.entry_type,
            req.entry.marshal(),
            req.header.clone(),
            Status::LIVE,
            msg.from.clone(),
        )?;
        debug!(hash = %req.entry_hash, from = %msg.from, "held entry from put request");
        Ok(Response::Held(req.entry_hash))
    }
}
