//! Error types for the rebuild-notification protocol.

use thiserror::Error;

use crate::session::SessionId;

/// Result type alias using the protocol error type.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Violations and decoding failures raised by the protocol layer.
///
/// CLI plumbing wraps these in `anyhow::Error`; library callers match on them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A JSON line could not be decoded into a `LogRecord`.
    #[error("line {line}: malformed log record: {reason}")]
    MalformedRecord { line: usize, reason: String },

    /// A message carried the Fast Refresh prefix but matched no known literal.
    #[error("unrecognised Fast Refresh message: {0:?}")]
    UnknownMessage(String),

    /// `Done` arrived while no `Rebuilding` was outstanding in its burst.
    #[error("record {index}: done without a preceding rebuilding event")]
    OrphanDone { index: usize },

    /// A second `Done` closed a burst that was already closed.
    #[error("record {index}: duplicate done for an already closed burst")]
    DuplicateDone { index: usize },

    /// An event was appended to a session that already reached a terminal state.
    #[error("session {session}: event after terminal state")]
    AfterTerminal { session: SessionId },
}
