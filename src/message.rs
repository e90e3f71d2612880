//! The `ProtocolMessage` tagged union (`spec.md §3`) and the
//! process-wide id counter that stamps every outbound request.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::address::Address;

/// A request or reply, as carried over a channel after the handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProtocolMessage {
    Request {
        id: u64,
        sender: Address,
        subject: String,
        payload: Vec<u8>,
    },
    Reply {
        id: u64,
        payload: Vec<u8>,
        status: Status,
    },
}

impl ProtocolMessage {
    pub fn id(&self) -> u64 {
        match self {
            ProtocolMessage::Request { id, .. } => *id,
            ProtocolMessage::Reply { id, .. } => *id,
        }
    }
}

/// The outcome of a request, carried on its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Ok,
    ErrorNoHandler,
    ErrorHandlerException,
    ProtocolException,
}

/// Process-wide, monotonically increasing source of request ids.
///
/// Wrapping past `i64::MAX` is not expected to occur in practice
/// (`spec.md §3`); if it ever does, callers are expected to treat it as
/// fatal rather than silently reuse an id.
#[derive(Debug, Default)]
pub struct MessageIdSource {
    next: AtomicU64,
}

impl MessageIdSource {
    pub fn new() -> Self {
        MessageIdSource {
            next: AtomicU64::new(0),
        }
    }

    /// Allocate the next id. Panics if the counter has wrapped past
    /// `i64::MAX`, which `spec.md §3` treats as an acceptable fatal
    /// outcome rather than a condition to guard against in the hot path.
    pub fn next(&self) -> u64 {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        assert!(id < i64::MAX as u64, "message id counter overflowed");
        id
    }
}
