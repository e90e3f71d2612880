//! C2: the handshake state machine (`spec.md §4.2`).

use std::convert::TryFrom;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::MessagingError;
use crate::version::ProtocolVersion;
use crate::wire::{cluster_preamble, HandshakeFrame};

use super::io_stream::IoStream;

/// Run the client side of the handshake: send our preamble and latest
/// version, then wait for the server's negotiated reply (`spec.md §4.2`).
pub async fn client_handshake(
    stream: &mut IoStream,
    cluster_name: &str,
) -> Result<ProtocolVersion, MessagingError> {
    let preamble = cluster_preamble(cluster_name);
    let outgoing = HandshakeFrame {
        preamble,
        version: ProtocolVersion::latest().tag(),
    };
    write_frame(stream, outgoing).await?;

    let incoming = read_frame(stream).await?;
    if incoming.preamble != preamble {
        warn!("handshake preamble mismatch; peer is likely in a different cluster");
        return Err(MessagingError::ProtocolException(
            "preamble mismatch".to_string(),
        ));
    }

    ProtocolVersion::try_from(incoming.version).map_err(|e| {
        debug!(version = incoming.version, "peer replied with unknown protocol version");
        MessagingError::ProtocolException(e.to_string())
    })
}

/// Run the server side of the handshake: wait for the client's
/// preamble and version, verify it, negotiate a mutually supported
/// version, and reply with it (`spec.md §4.2`).
pub async fn server_handshake(
    stream: &mut IoStream,
    cluster_name: &str,
) -> Result<ProtocolVersion, MessagingError> {
    let expected_preamble = cluster_preamble(cluster_name);
    let incoming = read_frame(stream).await?;
    if incoming.preamble != expected_preamble {
        warn!("handshake preamble mismatch; closing connection silently");
        return Err(MessagingError::ProtocolException(
            "preamble mismatch".to_string(),
        ));
    }

    let negotiated = ProtocolVersion::negotiate(incoming.version).ok_or_else(|| {
        debug!(
            peer_version = incoming.version,
            "no mutually supported protocol version"
        );
        MessagingError::ProtocolException("no mutually supported protocol version".to_string())
    })?;

    let outgoing = HandshakeFrame {
        preamble: expected_preamble,
        version: negotiated.tag(),
    };
    write_frame(stream, outgoing).await?;

    Ok(negotiated)
}

async fn write_frame(stream: &mut IoStream, frame: HandshakeFrame) -> Result<(), MessagingError> {
    stream
        .write_all(&frame.encode())
        .await
        .map_err(|e| MessagingError::ProtocolException(format!("handshake write failed: {}", e)))
}

async fn read_frame(stream: &mut IoStream) -> Result<HandshakeFrame, MessagingError> {
    let mut buf = [0u8; HandshakeFrame::WIRE_LEN];
    stream.read_exact(&mut buf).await.map_err(|e| {
        MessagingError::ProtocolException(format!("handshake read failed: {}", e))
    })?;
    HandshakeFrame::decode(&buf)
        .ok_or_else(|| MessagingError::ProtocolException("truncated handshake frame".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn loopback_pair() -> (IoStream, IoStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, (server, _)) =
            tokio::join!(TcpStream::connect(addr), async { listener.accept().await.unwrap() });
        (IoStream::from(client.unwrap()), IoStream::from(server))
    }

    #[tokio::test]
    async fn client_and_server_agree_on_latest_version() {
        let (mut client_stream, mut server_stream) = loopback_pair().await;

        let (client_result, server_result) = tokio::join!(
            client_handshake(&mut client_stream, "c1"),
            server_handshake(&mut server_stream, "c1"),
        );

        assert_eq!(client_result.unwrap(), ProtocolVersion::latest());
        assert_eq!(server_result.unwrap(), ProtocolVersion::latest());
    }

    #[tokio::test]
    async fn mismatched_cluster_names_fail_the_handshake() {
        let (mut client_stream, mut server_stream) = loopback_pair().await;

        let (client_result, server_result) = tokio::join!(
            client_handshake(&mut client_stream, "c1"),
            server_handshake(&mut server_stream, "c2"),
        );

        assert!(server_result.is_err());
        assert!(client_result.is_err());
    }

    #[tokio::test]
    async fn unknown_version_from_a_peer_is_rejected() {
        let (mut client_stream, mut server_stream) = loopback_pair().await;

        let client_side = async {
            let frame = HandshakeFrame {
                preamble: cluster_preamble("c1"),
                version: 999,
            };
            write_frame(&mut client_stream, frame).await.unwrap();
            read_frame(&mut client_stream).await
        };

        let (client_read, server_result) =
            tokio::join!(client_side, server_handshake(&mut server_stream, "c1"));

        assert!(server_result.is_err());
        // server closes without replying once negotiation fails
        assert!(client_read.is_err());
    }
}
