//! tether-core library.
//!
//! Agent-centric ledger core: the [`action::Action`] family, system
//! validation, a content-addressed [`dht::Dht`], the inbound message
//! dispatcher, and the [`node::Node`] commit pipeline.
//!
//! # Conventions
//!
//! - **Errors**: one `thiserror` enum per module, each mapping onto
//!   [`error::ErrorCode`] through `code()`. Config loading uses `anyhow`.
//! - **Logging**: `tracing` macros (`info!` for commits, `warn!` for refused
//!   requests and failed validation, `debug!`/`trace!` for store traffic).

pub mod action;
pub mod api;
pub mod chain;
pub mod config;
pub mod dht;
pub mod entry;
pub mod error;
pub mod hash;
pub mod header;
pub mod message;
pub mod node;
pub mod peer;
pub mod registry;
pub mod validate;

pub use action::{Action, ActionBehavior, ActionError, ActionKind};
pub use dht::{Dht, DhtError, GetMask, Status};
pub use entry::{Entry, EntryDef};
pub use error::ErrorCode;
pub use hash::{Hash, HashError};
pub use header::{Header, Signature, Signer};
pub use message::{Message, MessageKind, Response};
pub use node::{Node, NodeError, Transport, TransportError};
pub use peer::NodeId;
pub use registry::EntryDefRegistry;
