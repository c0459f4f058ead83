use std::fmt;

/// Machine-readable error codes shared by every error type in the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    InvalidHash,
    InvalidEntry,
    EntryDefInvalid,
    EntryDefUnknown,
    EntryDefPrivate,
    ActionMissingHeader,
    ValidationFailed,
    InvalidReceive,
    UnsupportedEntryType,
    RecordNotFound,
    HashCollision,
    ChainLinkBroken,
    LockContention,
    TransportFailed,
    ApiArgumentMismatch,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::InvalidHash => "E2001",
            Self::InvalidEntry => "E2002",
            Self::EntryDefInvalid => "E3001",
            Self::EntryDefUnknown => "E3002",
            Self::EntryDefPrivate => "E3003",
            Self::ActionMissingHeader => "E3004",
            Self::ValidationFailed => "E3005",
            Self::InvalidReceive => "E4001",
            Self::UnsupportedEntryType => "E4002",
            Self::RecordNotFound => "E5001",
            Self::HashCollision => "E5002",
            Self::ChainLinkBroken => "E5003",
            Self::LockContention => "E5004",
            Self::TransportFailed => "E6001",
            Self::ApiArgumentMismatch => "E7001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::InvalidHash => "Malformed content address",
            Self::InvalidEntry => "Malformed entry",
            Self::EntryDefInvalid => "Entry definition does not match action",
            Self::EntryDefUnknown => "Entry definition not registered",
            Self::EntryDefPrivate => "Entry definition is private",
            Self::ActionMissingHeader => "Action has no header",
            Self::ValidationFailed => "System validation failed",
            Self::InvalidReceive => "Action does not accept network requests",
            Self::UnsupportedEntryType => "No action handles this entry type",
            Self::RecordNotFound => "DHT record not found",
            Self::HashCollision => "Different payload stored under the same address",
            Self::ChainLinkBroken => "Header does not link to chain head",
            Self::LockContention => "Chain lock contention",
            Self::TransportFailed => "Transport send failed",
            Self::ApiArgumentMismatch => "API call arguments do not match",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in .tether/config.toml and retry."),
            Self::InvalidHash => Some("Pass a base58 multihash as produced by a tether node."),
            Self::ActionMissingHeader => Some("Commit the action locally before validating it."),
            Self::ValidationFailed => Some("Correct the offending field and resubmit."),
            Self::RecordNotFound => {
                Some("The record may still be propagating; retry with backoff.")
            }
            Self::ChainLinkBroken => Some("Prepare the header on top of the current chain head."),
            Self::LockContention => Some("Only one commit per chain may run at a time."),
            Self::ApiArgumentMismatch => Some("Check the function's declared argument list."),
            Self::InvalidEntry
            | Self::EntryDefInvalid
            | Self::EntryDefUnknown
            | Self::EntryDefPrivate
            | Self::InvalidReceive
            | Self::UnsupportedEntryType
            | Self::HashCollision
            | Self::TransportFailed => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorCode;
    use std::collections::HashSet;

    const ALL: [ErrorCode; 16] = [
        ErrorCode::ConfigParseError,
        ErrorCode::InvalidHash,
        ErrorCode::InvalidEntry,
        ErrorCode::EntryDefInvalid,
        ErrorCode::EntryDefUnknown,
        ErrorCode::EntryDefPrivate,
        ErrorCode::ActionMissingHeader,
        ErrorCode::ValidationFailed,
        ErrorCode::InvalidReceive,
        ErrorCode::UnsupportedEntryType,
        ErrorCode::RecordNotFound,
        ErrorCode::HashCollision,
        ErrorCode::ChainLinkBroken,
        ErrorCode::LockContention,
        ErrorCode::TransportFailed,
        ErrorCode::ApiArgumentMismatch,
    ];

    #[test]
    fn all_codes_are_unique() {
        let mut seen = HashSet::new();
        for code in ALL {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        for code in ALL {
            let s = code.code();
            assert_eq!(s.len(), 5);
            assert!(s.starts_with('E'));
            assert!(s.chars().skip(1).all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn display_is_the_code() {
        assert_eq!(ErrorCode::InvalidReceive.to_string(), "E4001");
    }
}
