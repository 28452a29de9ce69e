use std::fmt;

/// Machine-readable error codes shared by every echoes error type.
///
/// Codes are grouped by failure class: `E1xxx` invariant violations at an
/// API boundary, `E2xxx` storage misuse (bounds, stale cursors), `E3xxx`
/// payload decoding and replay, `E4xxx` sync sessions, `E9xxx` internal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    UnspecifiedIdentifier,
    MalformedIdentifier,
    InvalidConfig,
    OutOfBounds,
    ConcurrentModification,
    DecodeFailed,
    ReplayDiverged,
    CodecFailed,
    ProtocolViolation,
    SessionCancelled,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::UnspecifiedIdentifier => "E1001",
            Self::MalformedIdentifier => "E1002",
            Self::InvalidConfig => "E1003",
            Self::OutOfBounds => "E2001",
            Self::ConcurrentModification => "E2002",
            Self::DecodeFailed => "E3001",
            Self::ReplayDiverged => "E3002",
            Self::CodecFailed => "E3003",
            Self::ProtocolViolation => "E4001",
            Self::SessionCancelled => "E4002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::UnspecifiedIdentifier => "Unspecified identifier used as a real value",
            Self::MalformedIdentifier => "Malformed identifier",
            Self::InvalidConfig => "Invalid configuration",
            Self::OutOfBounds => "Offset or count out of bounds",
            Self::ConcurrentModification => "Structure modified while a cursor was live",
            Self::DecodeFailed => "Event payload could not be decoded",
            Self::ReplayDiverged => "Replay produced a different outcome than the first apply",
            Self::CodecFailed => "Protocol message could not be decoded",
            Self::ProtocolViolation => "Peer violated the sync protocol",
            Self::SessionCancelled => "Sync session cancelled",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Whether the failure is a caller bug rather than a runtime condition.
    ///
    /// Programmer errors abort the operation and must not be retried with
    /// the same arguments. Everything else can come from untrusted input or
    /// the network and is expected at runtime.
    #[must_use]
    pub const fn is_programmer_error(self) -> bool {
        matches!(
            self,
            Self::UnspecifiedIdentifier
                | Self::OutOfBounds
                | Self::ConcurrentModification
                | Self::InternalUnexpected
        )
    }

    /// Optional remediation hint.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::UnspecifiedIdentifier => {
                Some("Use SiteIdentifier::new / SequenceNumber::new and handle the None case.")
            }
            Self::MalformedIdentifier => Some("Site identifiers are 8 hex characters."),
            Self::InvalidConfig => Some("Fix echoes.toml; batch and capacity must be non-zero."),
            Self::OutOfBounds => None,
            Self::ConcurrentModification => {
                Some("Re-create the cursor after mutating the structure.")
            }
            Self::DecodeFailed => Some("Check that both sites run the same projection."),
            Self::ReplayDiverged => {
                Some("Projections must be deterministic: the same input must give the same result.")
            }
            Self::CodecFailed => Some("Check that both peers use the same wire codec."),
            Self::ProtocolViolation => Some("The session was closed; other sessions are unaffected."),
            Self::SessionCancelled => None,
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
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

    const ALL: [ErrorCode; 11] = [
        ErrorCode::UnspecifiedIdentifier,
        ErrorCode::MalformedIdentifier,
        ErrorCode::InvalidConfig,
        ErrorCode::OutOfBounds,
        ErrorCode::ConcurrentModification,
        ErrorCode::DecodeFailed,
        ErrorCode::ReplayDiverged,
        ErrorCode::CodecFailed,
        ErrorCode::ProtocolViolation,
        ErrorCode::SessionCancelled,
        ErrorCode::InternalUnexpected,
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
            let text = code.code();
            assert_eq!(text.len(), 5);
            assert!(text.starts_with('E'));
            assert!(text.chars().skip(1).all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn decode_failures_are_recoverable() {
        assert!(!ErrorCode::DecodeFailed.is_programmer_error());
        assert!(!ErrorCode::ProtocolViolation.is_programmer_error());
        assert!(ErrorCode::OutOfBounds.is_programmer_error());
    }
}
