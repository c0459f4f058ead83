//! System validation.
//!
//! System validation runs before an action is shared. It is generic over the
//! [`Action`] family and composes three steps:
//!
//! 1. **Definition match**: the definition presented must be the one the
//!    variant is filed under. This blocks type confusion between system
//!    definitions (such as the root DNA) and the variant's own.
//! 2. **Anchoring**: the action must carry a header.
//! 3. **Payload**: the variant decodes and checks its own fields.
//!
//! Steps 1 and 2 are shared by every variant through
//! [`check_def_and_anchor`]; step 3 lives in each variant's
//! [`ActionBehavior::sys_validation`]. Application-level rules are not part
//! of this layer.

use tracing::{debug, warn};

use crate::action::{Action, ActionBehavior};
use crate::chain::ChainError;
use crate::entry::EntryDef;
use crate::error::ErrorCode;
use crate::hash::HashError;
use crate::header::Header;
use crate::peer::NodeId;
use crate::registry::EntryDefRegistry;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reasons an action fails system validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The presented definition is not the variant's own.
    #[error("Invalid Entry Definition")]
    EntryDefInvalid,

    /// The action has not been anchored to a chain position.
    #[error("Action is missing header")]
    ActionMissingHeader,

    /// A payload field failed to decode as a content address.
    #[error("Validation Failed: Error ({source}) when decoding {field} value '{value}'")]
    FieldDecode {
        field: &'static str,
        value: String,
        source: HashError,
    },

    /// Any other payload check.
    #[error("Validation Failed: {0}")]
    Failed(String),

    /// The validation package's headers do not form a chain.
    #[error("Validation Failed: package chain is broken: {0}")]
    Package(ChainError),
}

impl ValidationError {
    /// Return the machine-readable error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::EntryDefInvalid => ErrorCode::EntryDefInvalid,
            Self::ActionMissingHeader => ErrorCode::ActionMissingHeader,
            Self::FieldDecode { .. } | Self::Failed(_) | Self::Package(_) => {
                ErrorCode::ValidationFailed
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// The validating node's context.
#[derive(Debug, Clone, Copy)]
pub struct ValidationHost<'a> {
    pub node: &'a NodeId,
    pub registry: &'a EntryDefRegistry,
}

impl<'a> ValidationHost<'a> {
    #[must_use]
    pub const fn new(node: &'a NodeId, registry: &'a EntryDefRegistry) -> Self {
        Self { node, registry }
    }
}

/// Chain context a source peer ships along with an entry for validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationPackage {
    /// Source chain headers, oldest first.
    pub headers: Vec<Header>,
}

// ---------------------------------------------------------------------------
// Shared steps
// ---------------------------------------------------------------------------

/// Steps 1 and 2: definition identity, then anchoring.
///
/// # Errors
///
/// [`ValidationError::EntryDefInvalid`] when `presented` is not `expected`,
/// otherwise [`ValidationError::ActionMissingHeader`] when `header` is `None`.
pub fn check_def_and_anchor(
    expected: &EntryDef,
    presented: &EntryDef,
    header: Option<&Header>,
) -> Result<(), ValidationError> {
    if presented != expected {
        return Err(ValidationError::EntryDefInvalid);
    }
    if header.is_none() {
        return Err(ValidationError::ActionMissingHeader);
    }
    Ok(())
}

/// Run system validation for any action and log the outcome.
///
/// # Errors
///
/// Propagates the variant's [`ValidationError`].
pub fn sys_validate(
    action: &Action,
    host: &ValidationHost<'_>,
    def: &EntryDef,
    package: Option<&ValidationPackage>,
    sources: &[NodeId],
) -> Result<(), ValidationError> {
    match action.sys_validation(host, def, package, sources) {
        Ok(()) => {
            debug!(
                node = %host.node,
                action = action.name(),
                entry_type = action.entry_type(),
                "system validation passed"
            );
            Ok(())
        }
        Err(err) => {
            warn!(
                node = %host.node,
                action = action.name(),
                def = %def.name,
                code = %err.code(),
                "system validation failed: {err}"
            );
            Err(err)
        }
    }
}
