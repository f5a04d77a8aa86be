//! Error types for the foldershare protocol

use crate::protocol_core::Command;
use std::io;
use thiserror::Error;

/// Frame-level failures. Any of these while reading the next frame ends a session.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("connection closed mid-frame ({read} of {expected} bytes)")]
    IncompleteFrame { read: usize, expected: usize },

    #[error("Unknown command: {0}")]
    InvalidCommand(u8),

    #[error("invalid payload length: {0}")]
    InvalidLength(i64),

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("unexpected {got} response to {request}")]
    UnexpectedResponse { request: Command, got: Command },

    #[error("malformed {0} payload")]
    MalformedPayload(Command),

    #[error("frame i/o failed: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// True when the peer closed cleanly between frames.
    pub fn is_clean_close(&self) -> bool {
        matches!(self, ProtocolError::IncompleteFrame { read: 0, .. })
    }
}

/// Bulk transfer failures. `transferred` counts bytes moved before the failure.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("connection dropped after {transferred} of {total} bytes")]
    Interrupted { transferred: u64, total: u64 },

    #[error("connection error after {transferred} bytes: {source}")]
    Connection { transferred: u64, source: io::Error },

    #[error("source ended after {transferred} of {total} bytes")]
    SourceExhausted { transferred: u64, total: u64 },

    #[error("reading source failed after {transferred} bytes: {source}")]
    Source { transferred: u64, source: io::Error },

    #[error("writing destination failed after {transferred} bytes: {source}")]
    Sink { transferred: u64, source: io::Error },
}

impl TransferError {
    pub fn transferred(&self) -> u64 {
        match self {
            TransferError::Interrupted { transferred, .. }
            | TransferError::Connection { transferred, .. }
            | TransferError::SourceExhausted { transferred, .. }
            | TransferError::Source { transferred, .. }
            | TransferError::Sink { transferred, .. } => *transferred,
        }
    }

    /// Whether the socket side of the transfer is still frame-aligned usable.
    /// Only a local sink failure leaves the connection intact.
    pub fn connection_intact(&self) -> bool {
        matches!(self, TransferError::Sink { .. })
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// Socket-level failure. Built explicitly: filesystem errors are Application.
    #[error("transport error: {0}")]
    Transport(io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Server answered ERROR, or a folder operation failed locally.
    #[error("{0}")]
    Application(String),

    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("malformed payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid file name: {0}")]
    InvalidName(String),
}

impl Error {
    pub fn app(msg: impl Into<String>) -> Self {
        Error::Application(msg.into())
    }

    /// Errors after which the connection can no longer carry frames.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Transport(_) | Error::Protocol(_) => true,
            Error::Transfer(e) => !e.connection_intact(),
            Error::Application(_) | Error::Serialization(_) | Error::InvalidName(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_close_only_at_frame_boundary() {
        let clean = ProtocolError::IncompleteFrame { read: 0, expected: 5 };
        let torn = ProtocolError::IncompleteFrame { read: 3, expected: 5 };
        assert!(clean.is_clean_close());
        assert!(!torn.is_clean_close());
    }

    #[test]
    fn fatality_follows_taxonomy() {
        assert!(Error::Protocol(ProtocolError::InvalidCommand(99)).is_fatal());
        assert!(!Error::app("File not found").is_fatal());
        assert!(!Error::InvalidName("../x".into()).is_fatal());

        let sink = TransferError::Sink {
            transferred: 10,
            source: io::Error::new(io::ErrorKind::Other, "disk full"),
        };
        assert!(!Error::Transfer(sink).is_fatal());

        let dropped = TransferError::Interrupted { transferred: 10, total: 20 };
        assert_eq!(dropped.transferred(), 10);
        assert!(Error::Transfer(dropped).is_fatal());
    }

    #[test]
    fn invalid_command_message_names_tag() {
        let e = ProtocolError::InvalidCommand(99);
        assert_eq!(e.to_string(), "Unknown command: 99");
    }
}
