//! Functions exposed to application code.
//!
//! Each [`ApiFunction`] declares an ordered argument list; [`call`] checks the
//! supplied JSON values against it before the function runs. Arguments are
//! positional.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use tracing::debug;

use crate::action::{CommitAction, MigrateAction, MigrateEntry, commit, migrate};
use crate::entry::Entry;
use crate::error::ErrorCode;
use crate::hash::Hash;
use crate::node::{Node, NodeError};

/// Declared type of one argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgType {
    String,
    /// A string holding a base58 content address.
    Hash,
}

impl ArgType {
    fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (Self::String, Value::String(_)) => true,
            (Self::Hash, Value::String(s)) => Hash::decode(s).is_ok(),
            _ => false,
        }
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Hash => "hash",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arg {
    pub name: &'static str,
    pub ty: ArgType,
}

impl Arg {
    #[must_use]
    pub const fn new(name: &'static str, ty: ArgType) -> Self {
        Self { name, ty }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{function}: expected {expected} arguments, got {got}")]
    WrongArgCount {
        function: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{function}: argument {arg} must be a {expected}")]
    WrongArgType {
        function: &'static str,
        arg: &'static str,
        expected: ArgType,
    },

    #[error("no api function named '{0}'")]
    UnknownFunction(String),

    #[error(transparent)]
    Node(#[from] NodeError),
}

impl ApiError {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::WrongArgCount { .. } | Self::WrongArgType { .. } | Self::UnknownFunction(_) => {
                ErrorCode::ApiArgumentMismatch
            }
            Self::Node(e) => e.code(),
        }
    }
}

/// A callable exposed to application code.
pub trait ApiFunction: Send + Sync {
    fn name(&self) -> &'static str;

    /// Ordered argument declaration.
    fn args(&self) -> Vec<Arg>;

    /// Run the function. `args` have already passed [`check_args`].
    ///
    /// # Errors
    ///
    /// Function specific.
    fn call(&self, node: &Node, args: &[Value]) -> Result<Value, ApiError>;
}

/// Check `values` positionally against `function`'s declared arguments.
///
/// # Errors
///
/// [`ApiError::WrongArgCount`] or the first [`ApiError::WrongArgType`].
pub fn check_args(function: &dyn ApiFunction, values: &[Value]) -> Result<(), ApiError> {
    let declared = function.args();
    if declared.len() != values.len() {
        return Err(ApiError::WrongArgCount {
            function: function.name(),
            expected: declared.len(),
            got: values.len(),
        });
    }
    for (arg, value) in declared.iter().zip(values) {
        if !arg.ty.accepts(value) {
            return Err(ApiError::WrongArgType {
                function: function.name(),
                arg: arg.name,
                expected: arg.ty,
            });
        }
    }
    Ok(())
}

fn string_at<'a>(
    function: &'static str,
    arg: Arg,
    values: &'a [Value],
    index: usize,
) -> Result<&'a str, ApiError> {
    values
        .get(index)
        .and_then(Value::as_str)
        .ok_or(ApiError::WrongArgType {
            function,
            arg: arg.name,
            expected: arg.ty,
        })
}

fn hash_at(
    function: &'static str,
    arg: Arg,
    values: &[Value],
    index: usize,
) -> Result<Hash, ApiError> {
    Hash::decode(string_at(function, arg, values, index)?).map_err(|_| ApiError::WrongArgType {
        function,
        arg: arg.name,
        expected: arg.ty,
    })
}

// ---------------------------------------------------------------------------
// migrate
// ---------------------------------------------------------------------------

const MIGRATE_ARGS: [Arg; 4] = [
    Arg::new("migrationType", ArgType::String),
    Arg::new("DNAHash", ArgType::Hash),
    Arg::new("Key", ArgType::Hash),
    Arg::new("data", ArgType::String),
];

/// Commit a migrate entry; returns its address as a string.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiFnMigrate;

impl ApiFunction for ApiFnMigrate {
    fn name(&self) -> &'static str {
        migrate::NAME
    }

    fn args(&self) -> Vec<Arg> {
        MIGRATE_ARGS.to_vec()
    }

    fn call(&self, node: &Node, args: &[Value]) -> Result<Value, ApiError> {
        let [ty, dna, key, data] = MIGRATE_ARGS;
        let name = self.name();
        let entry = MigrateEntry::new(
            string_at(name, ty, args, 0)?,
            &hash_at(name, dna, args, 1)?,
            &hash_at(name, key, args, 2)?,
            string_at(name, data, args, 3)?,
        );
        let (hash, _) = node.commit(MigrateAction::new(entry).into())?;
        Ok(Value::String(hash.to_string()))
    }
}

// ---------------------------------------------------------------------------
// commit
// ---------------------------------------------------------------------------

const COMMIT_ARGS: [Arg; 2] = [
    Arg::new("entryType", ArgType::String),
    Arg::new("entry", ArgType::String),
];

/// Commit an application entry; returns its address as a string.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiFnCommit;

impl ApiFunction for ApiFnCommit {
    fn name(&self) -> &'static str {
        commit::NAME
    }

    fn args(&self) -> Vec<Arg> {
        COMMIT_ARGS.to_vec()
    }

    fn call(&self, node: &Node, args: &[Value]) -> Result<Value, ApiError> {
        let [entry_type, content] = COMMIT_ARGS;
        let name = self.name();
        let action = CommitAction::new(
            string_at(name, entry_type, args, 0)?,
            Entry::new(string_at(name, content, args, 1)?),
        );
        let (hash, _) = node.commit(action.into())?;
        Ok(Value::String(hash.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// Every exposed function, keyed by name.
#[must_use]
pub fn function_table() -> BTreeMap<&'static str, Box<dyn ApiFunction>> {
    let functions: [Box<dyn ApiFunction>; 2] = [Box::new(ApiFnMigrate), Box::new(ApiFnCommit)];
    functions.into_iter().map(|f| (f.name(), f)).collect()
}

/// Look up `name`, check `args`, and call it on `node`.
///
/// # Errors
///
/// [`ApiError::UnknownFunction`], an argument mismatch, or the function's own
/// error.
pub fn call(node: &Node, name: &str, args: &[Value]) -> Result<Value, ApiError> {
    let table = function_table();
    let function = table
        .get(name)
        .ok_or_else(|| ApiError::UnknownFunction(name.to_string()))?;
    check_args(function.as_ref(), args)?;
    debug!(node = %node.id(), function = name, "api call");
    function.call(node, args)
}
