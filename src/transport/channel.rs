//! The connected channel a [`ProtocolMessage`] is written to or read
//! from: a TCP (or TLS-over-TCP) stream plus the codec bound to it
//! after the handshake completes.
//!
//! `spec.md §9` breaks the cycle between a channel and the connection
//! object that owns its callback table with "a process-wide map keyed
//! by channel identity, not the channel object"; [`ChannelId`] is that
//! identity.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex as AsyncMutex;

use crate::address::Address;
use crate::error::MessagingError;
use crate::message::ProtocolMessage;
use crate::version::ProtocolVersion;
use crate::wire::MessageCodec;

use super::io_stream::IoStream;

/// Process-wide unique identity for a connected channel, independent of
/// the channel object itself (`spec.md §9`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

impl ChannelId {
    fn next() -> Self {
        ChannelId(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// The write half plus the flag every clone of a [`Channel`] shares to
/// learn the socket has gone away.
struct Shared {
    write_half: AsyncMutex<WriteHalf<IoStream>>,
    codec: AsyncMutex<MessageCodec>,
    active: AtomicBool,
}

/// A connected, handshake-complete channel. Cheaply cloneable; every
/// clone shares the same underlying socket and active flag.
#[derive(Clone)]
pub struct Channel {
    pub id: ChannelId,
    pub peer: Address,
    shared: Arc<Shared>,
}

/// The read half of a channel, consumed by exactly one inbound
/// dispatch loop (`spec.md §4.6`).
pub struct ChannelReader {
    read_half: ReadHalf<IoStream>,
    codec: MessageCodec,
    buffer: BytesMut,
}

/// Split a handshake-complete stream into the shared [`Channel`] handle
/// and its single-owner [`ChannelReader`].
pub fn split(io: IoStream, version: ProtocolVersion, peer: Address) -> (Channel, ChannelReader) {
    let (read_half, write_half) = tokio::io::split(io);
    let channel = Channel {
        id: ChannelId::next(),
        peer,
        shared: Arc::new(Shared {
            write_half: AsyncMutex::new(write_half),
            codec: AsyncMutex::new(MessageCodec::for_version(version)),
            active: AtomicBool::new(true),
        }),
    };
    let reader = ChannelReader {
        read_half,
        codec: MessageCodec::for_version(version),
        buffer: BytesMut::with_capacity(4096),
    };
    (channel, reader)
}

impl Channel {
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Mark the channel inactive. Idempotent; does not touch the
    /// socket itself (the reader loop or an explicit shutdown handles
    /// that).
    pub fn mark_inactive(&self) {
        self.shared.active.store(false, Ordering::Release);
    }

    pub async fn send(&self, message: &ProtocolMessage) -> Result<(), MessagingError> {
        if !self.is_active() {
            return Err(MessagingError::ConnectionClosed);
        }
        let encoded = {
            let mut codec = self.shared.codec.lock().await;
            codec
                .encode_message(message)
                .map_err(|e| MessagingError::ProtocolException(e.to_string()))?
        };
        let mut write_half = self.shared.write_half.lock().await;
        if let Err(e) = write_half.write_all(&encoded).await {
            drop(write_half);
            self.mark_inactive();
            tracing::debug!(error = %e, "channel write failed, marking channel inactive");
            return Err(MessagingError::ConnectionClosed);
        }
        Ok(())
    }

    pub async fn close(&self) {
        if !self.is_active() {
            return;
        }
        self.mark_inactive();
        let mut write_half = self.shared.write_half.lock().await;
        let _ = write_half.shutdown().await;
    }
}

impl ChannelReader {
    /// Read and decode the next message, pulling more bytes from the
    /// socket as needed. Returns `Ok(None)` on a clean EOF.
    pub async fn recv(&mut self) -> Result<Option<ProtocolMessage>, MessagingError> {
        use tokio::io::AsyncReadExt;

        loop {
            if let Some(message) = self
                .codec
                .decode_message(&mut self.buffer)
                .map_err(|e| MessagingError::ProtocolException(e.to_string()))?
            {
                return Ok(Some(message));
            }

            let mut chunk = [0u8; 4096];
            let read = self
                .read_half
                .read(&mut chunk)
                .await
                .map_err(|e| MessagingError::ProtocolException(format!("channel read failed: {}", e)))?;
            if read == 0 {
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }
}
