//! Entry type tag to [`EntryDef`] lookup, injected wherever validation runs.

use std::collections::BTreeMap;

use crate::entry::{EntryDef, agent_entry_def, dna_entry_def, key_entry_def, migrate_entry_def};
use crate::error::ErrorCode;

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("entry type '{0}' is not registered")]
    Unknown(String),

    #[error("entry type '{0}' uses the reserved system prefix")]
    Reserved(String),

    #[error("entry type '{0}' is already registered")]
    Duplicate(String),
}

impl RegistryError {
    /// Return the machine-readable error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Unknown(_) => ErrorCode::EntryDefUnknown,
            Self::Reserved(_) | Self::Duplicate(_) => ErrorCode::EntryDefInvalid,
        }
    }
}

/// Lookup table from entry type tag to definition.
///
/// Passed into validation explicitly; there is no process-wide registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryDefRegistry {
    defs: BTreeMap<String, EntryDef>,
}

impl EntryDefRegistry {
    /// An empty registry, without even the system definitions.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry holding the four system definitions.
    #[must_use]
    pub fn with_system_defs() -> Self {
        let defs = [
            dna_entry_def(),
            agent_entry_def(),
            key_entry_def(),
            migrate_entry_def(),
        ]
        .into_iter()
        .map(|def| (def.name.clone(), def))
        .collect();
        Self { defs }
    }

    /// Register an application entry definition.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Reserved`] for `%`-prefixed names and
    /// [`RegistryError::Duplicate`] if the name is already taken.
    pub fn register(&mut self, def: EntryDef) -> Result<(), RegistryError> {
        if def.is_sys() {
            return Err(RegistryError::Reserved(def.name));
        }
        if self.defs.contains_key(&def.name) {
            return Err(RegistryError::Duplicate(def.name));
        }
        self.defs.insert(def.name.clone(), def);
        Ok(())
    }

    /// Look up the definition for an entry type tag.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unknown`] if the tag is not registered.
    pub fn lookup(&self, entry_type: &str) -> Result<&EntryDef, RegistryError> {
        self.defs
            .get(entry_type)
            .ok_or_else(|| RegistryError::Unknown(entry_type.to_string()))
    }

    /// Number of registered definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{DataFormat, MIGRATE_ENTRY_TYPE, Sharing};

    #[test]
    fn system_defs_present() {
        let reg = EntryDefRegistry::with_system_defs();
        assert_eq!(reg.len(), 4);
        assert_eq!(reg.lookup(MIGRATE_ENTRY_TYPE), Ok(&migrate_entry_def()));
    }

    #[test]
    fn unknown_lookup_fails() {
        let reg = EntryDefRegistry::with_system_defs();
        assert_eq!(
            reg.lookup("post"),
            Err(RegistryError::Unknown("post".into()))
        );
    }

    #[test]
    fn register_app_def() {
        let mut reg = EntryDefRegistry::with_system_defs();
        let def = EntryDef::new("post", DataFormat::Json, Sharing::Public);
        reg.register(def.clone()).expect("register");
        assert_eq!(reg.lookup("post"), Ok(&def));
    }

    #[test]
    fn reserved_and_duplicate_rejected() {
        let mut reg = EntryDefRegistry::with_system_defs();
        let sys = EntryDef::new("%evil", DataFormat::Raw, Sharing::Public);
        assert_eq!(
            reg.register(sys),
            Err(RegistryError::Reserved("%evil".into()))
        );

        let def = EntryDef::new("post", DataFormat::String, Sharing::Public);
        reg.register(def.clone()).expect("first register");
        let err = reg.register(def).unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("post".into()));
        assert_eq!(err.code(), ErrorCode::EntryDefInvalid);
    }
}
