//! The error taxonomy of `spec.md §7`.

use std::io;

use thiserror::Error;

use crate::message::Status;

/// Every way a send, a reply, or startup can fail.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// Peer or local dispatcher had no handler registered for the subject.
    #[error("no handler registered for subject")]
    NoRemoteHandler,

    /// The handler ran and returned an error (or its future failed).
    #[error("remote handler failed: {0}")]
    RemoteHandlerFailure(String),

    /// Handshake, codec, or status-decode failure.
    #[error("protocol exception: {0}")]
    ProtocolException(String),

    /// Static or adaptive deadline exceeded.
    #[error("request timed out")]
    Timeout,

    /// The channel backing this request was closed or lost.
    #[error("connection closed")]
    ConnectionClosed,

    /// Keystore load failure or interface bind failure: fatal, raised
    /// only from `MessagingService::start`.
    #[error("startup failed: {message}")]
    StartupError {
        message: String,
        #[source]
        source: Option<io::Error>,
    },
}

impl MessagingError {
    pub fn startup(message: impl Into<String>) -> Self {
        MessagingError::StartupError {
            message: message.into(),
            source: None,
        }
    }

    pub fn startup_with_source(message: impl Into<String>, source: io::Error) -> Self {
        MessagingError::StartupError {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Map a reply [`Status`] to the error a failed `sendAndReceive`
    /// future should resolve to (`spec.md §4.4`, `LocalServerConnection.reply`).
    pub fn from_status(status: Status, payload: &[u8]) -> Option<Self> {
        match status {
            Status::Ok => None,
            Status::ErrorNoHandler => Some(MessagingError::NoRemoteHandler),
            Status::ErrorHandlerException => Some(MessagingError::RemoteHandlerFailure(
                String::from_utf8_lossy(payload).into_owned(),
            )),
            Status::ProtocolException => Some(MessagingError::ProtocolException(
                String::from_utf8_lossy(payload).into_owned(),
            )),
        }
    }
}
