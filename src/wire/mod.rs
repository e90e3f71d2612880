//! C1: the frame codec (`spec.md §4.1`).
//!
//! Frames are length-delimited (`tokio_util::codec::LengthDelimitedCodec`)
//! with a bincode-serialized [`ProtocolMessage`] as the payload. The
//! codec is stateless beyond the negotiated version; today there is
//! one version and its wire layout, but the type exists so a future
//! version can change the payload encoding without touching the
//! handshake or the length-framing.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::message::ProtocolMessage;
use crate::version::ProtocolVersion;

/// Maximum frame length accepted; guards against a corrupt length
/// prefix turning into an unbounded allocation.
const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame too large or malformed length prefix")]
    Framing(#[from] std::io::Error),
    #[error("malformed message body: {0}")]
    Malformed(#[from] bincode::Error),
}

/// Encodes/decodes whole [`ProtocolMessage`]s to/from a byte stream, for
/// the negotiated [`ProtocolVersion`]. Bound once, after the handshake
/// completes (`spec.md §4.1`).
pub struct MessageCodec {
    #[allow(dead_code)]
    version: ProtocolVersion,
    framing: LengthDelimitedCodec,
}

impl MessageCodec {
    pub fn for_version(version: ProtocolVersion) -> Self {
        MessageCodec {
            version,
            framing: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_LENGTH)
                .new_codec(),
        }
    }

    pub fn encode_message(&mut self, message: &ProtocolMessage) -> Result<Bytes, FrameError> {
        let body = bincode::serialize(message)?;
        let mut dst = BytesMut::new();
        self.framing.encode(Bytes::from(body), &mut dst)?;
        Ok(dst.freeze())
    }

    pub fn decode_message(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<ProtocolMessage>, FrameError> {
        match self.framing.decode(src)? {
            None => Ok(None),
            Some(frame) => {
                let message = bincode::deserialize(&frame)?;
                Ok(Some(message))
            }
        }
    }
}

/// The 6-byte handshake preamble frame (`spec.md §6`):
/// `[i32 preamble (BE)][i16 version (BE)]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeFrame {
    pub preamble: i32,
    pub version: i16,
}

impl HandshakeFrame {
    pub const WIRE_LEN: usize = 6;

    pub fn encode(self) -> [u8; Self::WIRE_LEN] {
        let mut buf = [0u8; Self::WIRE_LEN];
        let mut writer = &mut buf[..];
        writer.put_i32(self.preamble);
        writer.put_i16(self.version);
        buf
    }

    pub fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::WIRE_LEN {
            return None;
        }
        let preamble = bytes.get_i32();
        let version = bytes.get_i16();
        Some(HandshakeFrame { preamble, version })
    }
}

/// `preamble = hash(cluster_name)`, a stable 32-bit fingerprint of the
/// cluster name used to reject cross-cluster connections before any
/// real traffic is exchanged (`spec.md §4.2`).
pub fn cluster_preamble(cluster_name: &str) -> i32 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    cluster_name.hash(&mut hasher);
    hasher.finish() as i32
}
