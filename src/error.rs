//! Error types for the mailbox watcher.
//!
//! Errors distinguish fatal session failures (transport loss, lifecycle
//! command rejection, malformed wire data) from per-command failures that
//! leave the session alive.

use thiserror::Error;

/// Errors that can occur while talking to an IMAP server.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or encryption error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Wire data did not match the IMAP grammar.
    #[error("Parse error at position {position}: {message}")]
    Parse {
        /// Byte offset into the packet where parsing failed.
        position: usize,
        /// Description of what went wrong.
        message: String,
    },

    /// Server returned NO for a command.
    #[error("Server returned NO: {0}")]
    No(String),

    /// Server returned BAD for a command.
    #[error("Server returned BAD: {0}")]
    Bad(String),

    /// Server sent BYE (disconnecting).
    #[error("Server sent BYE: {0}")]
    Bye(String),

    /// Protocol violation or unexpected data.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid state for the requested operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A command argument cannot be sent over the wire.
    #[error("Command syntax error: {0}")]
    CommandSyntax(String),

    /// Session configuration was rejected before connecting.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A filter was built with contradictory constraints.
    #[error("Filter conflict: {0}")]
    FilterConflict(String),

    /// Connection was lost or the session task is gone.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
}

impl Error {
    /// Creates a parse error at the given byte position.
    #[must_use]
    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }

    /// Returns true if this error indicates the connection is dead.
    #[must_use]
    pub const fn is_connection_dead(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Bye(_) | Self::ConnectionLost(_) | Self::Tls(_)
        )
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_dead_classification() {
        assert!(Error::Bye("shutting down".into()).is_connection_dead());
        assert!(Error::ConnectionLost("eof".into()).is_connection_dead());
        assert!(!Error::No("denied".into()).is_connection_dead());
        assert!(!Error::parse(3, "oops").is_connection_dead());
    }

    #[test]
    fn parse_error_carries_position() {
        let err = Error::parse(42, "unexpected byte");
        match err {
            Error::Parse { position, message } => {
                assert_eq!(position, 42);
                assert_eq!(message, "unexpected byte");
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
