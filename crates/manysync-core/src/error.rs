use std::fmt;

use thiserror::Error;

use crate::clock::VectorClock;

/// Machine-readable error codes for callers that branch on failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidPeerId,
    UnknownPeer,
    StaleDocument,
    EmptyChanges,
    StoreUnavailable,
    StoreBackend,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::InvalidPeerId => "E1001",
            Self::UnknownPeer => "E1002",
            Self::StaleDocument => "E2001",
            Self::EmptyChanges => "E3001",
            Self::StoreUnavailable => "E5001",
            Self::StoreBackend => "E5002",
        }
    }

    /// Short human-facing summary for logs.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::InvalidPeerId => "Invalid peer id",
            Self::UnknownPeer => "Peer not registered",
            Self::StaleDocument => "Document snapshot is older than the recorded clock",
            Self::EmptyChanges => "Message carries an empty change list",
            Self::StoreUnavailable => "Document store unavailable",
            Self::StoreBackend => "Document store backend failure",
        }
    }

    /// Optional remediation hint.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::InvalidPeerId => Some("Peer ids must be non-empty strings."),
            Self::UnknownPeer => Some("Call `add_peer` before delivering messages from that peer."),
            Self::StaleDocument => {
                Some("Pass the current document snapshot, not a historical one.")
            }
            Self::EmptyChanges => Some("Omit `changes` entirely when there is nothing to send."),
            Self::StoreUnavailable => Some("Retry once the store is reachable."),
            Self::StoreBackend => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Failures raised by a [`DocStore`](crate::store::DocStore) implementation.
///
/// These are surfaced to the caller unmodified; the protocol never retries.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Wrap an arbitrary backend error.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(err))
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Unavailable { .. } => ErrorCode::StoreUnavailable,
            Self::Backend(_) => ErrorCode::StoreBackend,
        }
    }
}

/// Errors returned by the reconciliation components.
///
/// Validation failures (`InvalidPeerId`, `UnknownPeer`, `StaleDocument`) are
/// raised before any state is touched or any message is sent.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{}: peer id must be a non-empty string", ErrorCode::InvalidPeerId)]
    InvalidPeerId,

    #[error("{}: unknown peer `{peer_id}`", ErrorCode::UnknownPeer)]
    UnknownPeer { peer_id: String },

    #[error(
        "{}: document `{doc_id}` at {offered} is older than recorded clock {recorded}",
        ErrorCode::StaleDocument
    )]
    StaleDocument {
        doc_id: String,
        recorded: VectorClock,
        offered: VectorClock,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidPeerId => ErrorCode::InvalidPeerId,
            Self::UnknownPeer { .. } => ErrorCode::UnknownPeer,
            Self::StaleDocument { .. } => ErrorCode::StaleDocument,
            Self::Store(err) => err.code(),
        }
    }

    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

/// Wire-level decoding failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("{}: `changes` must be omitted rather than empty", ErrorCode::EmptyChanges)]
    EmptyChanges,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const ALL: [ErrorCode; 6] = [
        ErrorCode::InvalidPeerId,
        ErrorCode::UnknownPeer,
        ErrorCode::StaleDocument,
        ErrorCode::EmptyChanges,
        ErrorCode::StoreUnavailable,
        ErrorCode::StoreBackend,
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
    fn store_errors_keep_their_code_through_sync_error() {
        let err = SyncError::from(StoreError::Unavailable {
            reason: "disk offline".into(),
        });
        assert_eq!(err.code(), ErrorCode::StoreUnavailable);
        assert_eq!(err.to_string(), "store unavailable: disk offline");
    }

    #[test]
    fn display_leads_with_the_code() {
        let err = SyncError::UnknownPeer {
            peer_id: "bob".into(),
        };
        assert_eq!(err.to_string(), "E1002: unknown peer `bob`");
        assert!(err.hint().is_some());
    }

    #[test]
    fn stale_document_names_both_clocks() {
        let err = SyncError::StaleDocument {
            doc_id: "notes".into(),
            recorded: [("alice", 2_u64)].into_iter().collect(),
            offered: [("alice", 1_u64)].into_iter().collect(),
        };
        let text = err.to_string();
        assert!(text.contains("{alice:1}"));
        assert!(text.contains("{alice:2}"));
    }

    #[test]
    fn backend_errors_wrap_sources() {
        let io = std::io::Error::other("boom");
        let err = StoreError::backend(io);
        assert_eq!(err.code(), ErrorCode::StoreBackend);
        assert!(std::error::Error::source(&err).is_some());
    }
}
