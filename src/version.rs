//! The discrete set of wire protocol versions a node can speak.

use std::convert::TryFrom;

/// A protocol version tag, as exchanged in the handshake preamble
/// (`spec.md §4.2`). Each variant has its own frame encoder/decoder,
/// registered in [`crate::wire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i16)]
pub enum ProtocolVersion {
    V1 = 1,
}

impl ProtocolVersion {
    /// All versions this node can speak, in ascending order.
    pub const SUPPORTED: &'static [ProtocolVersion] = &[ProtocolVersion::V1];

    /// The highest version this node offers when it is the one
    /// initiating the handshake.
    pub fn latest() -> ProtocolVersion {
        ProtocolVersion::V1
    }

    pub fn tag(self) -> i16 {
        self as i16
    }

    /// The greatest version this node supports that is `<= peer_version`,
    /// or `None` if the peer offered nothing this node can speak
    /// (`spec.md §4.2`: "negotiated = max(v in supported : v <= peer.version)").
    pub fn negotiate(peer_version: i16) -> Option<ProtocolVersion> {
        Self::SUPPORTED
            .iter()
            .copied()
            .filter(|v| v.tag() <= peer_version)
            .max()
    }
}

impl TryFrom<i16> for ProtocolVersion {
    type Error = UnknownProtocolVersion;

    fn try_from(tag: i16) -> Result<Self, Self::Error> {
        Self::SUPPORTED
            .iter()
            .copied()
            .find(|v| v.tag() == tag)
            .ok_or(UnknownProtocolVersion(tag))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown protocol version: {0}")]
pub struct UnknownProtocolVersion(pub i16);
