//! C6: the server acceptor (`spec.md §4.6`).
//!
//! Binds every configured interface (or `0.0.0.0` if none are given),
//! and accepts one connection at a time across all of them, applying
//! the server-side bootstrap options, the optional TLS upgrade, and
//! the handshake before handing a connected [`Channel`]/[`ChannelReader`]
//! pair back to the caller.

use std::net::SocketAddr;

use futures::future::select_all;
use tokio::net::{TcpListener, TcpSocket};
use tracing::{debug, error, warn};
use tracing_futures::Instrument;

use crate::defaults;
use crate::error::MessagingError;

use super::channel::{self, Channel, ChannelReader};
use super::handshake;
use super::io_stream::IoStream;
use super::tls::TlsMaterial;

/// Listens on every configured interface and accepts inbound
/// connections, completing the handshake before returning them.
pub struct Acceptor {
    listeners: Vec<TcpListener>,
    cluster_name: String,
    tls: Option<TlsMaterial>,
}

impl Acceptor {
    /// Bind `interfaces` (falling back to `0.0.0.0` when empty,
    /// `spec.md §4.6`) on `port` (`0` for an ephemeral port).
    pub async fn bind(
        interfaces: &[String],
        port: u16,
        cluster_name: String,
        tls: Option<TlsMaterial>,
    ) -> Result<Self, MessagingError> {
        let hosts: Vec<&str> = if interfaces.is_empty() {
            vec!["0.0.0.0"]
        } else {
            interfaces.iter().map(String::as_str).collect()
        };

        let mut listeners = Vec::with_capacity(hosts.len());
        for host in hosts {
            let addr: SocketAddr = format!("{}:{}", host, port).parse().map_err(|_| {
                MessagingError::startup(format!("invalid interface address: {}:{}", host, port))
            })?;
            listeners.push(bind_one(addr).await?);
        }

        Ok(Acceptor {
            listeners,
            cluster_name,
            tls,
        })
    }

    /// The address of the first bound listener, for registration as
    /// this node's own return address.
    pub fn local_addr(&self) -> SocketAddr {
        self.listeners[0].local_addr().expect("bound listener has a local address")
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .map(|l| l.local_addr().expect("bound listener has a local address"))
            .collect()
    }

    /// Accept the next inbound connection on any bound interface,
    /// upgrade it to TLS if configured, and complete the handshake.
    pub async fn accept(&self) -> Result<(Channel, ChannelReader), MessagingError> {
        let accepts = self.listeners.iter().map(|l| Box::pin(l.accept()));
        let ((tcp_stream, peer_addr), _index, _rest) = select_all(accepts)
            .await;
        let (tcp_stream, peer_addr) = (tcp_stream.map_err(|e| {
            MessagingError::ProtocolException(format!("accept failed: {}", e))
        })?, peer_addr);

        tcp_stream
            .set_nodelay(true)
            .map_err(|e| MessagingError::ProtocolException(format!("set_nodelay failed: {}", e)))?;

        let mut io_stream: IoStream = match &self.tls {
            None => IoStream::from(tcp_stream),
            Some(material) => match material.acceptor.accept(tcp_stream).await {
                Ok(tls_stream) => IoStream::from(tls_stream),
                Err(e) => {
                    error!(peer = %peer_addr, error = %e, "server TLS handshake failed");
                    return Err(MessagingError::ProtocolException(format!(
                        "TLS handshake failed: {}",
                        e
                    )));
                }
            },
        };

        let version = handshake::server_handshake(&mut io_stream, &self.cluster_name).await?;
        Ok(channel::split(io_stream, version, peer_addr.into()))
    }
}

async fn bind_one(addr: SocketAddr) -> Result<TcpListener, MessagingError> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(|e| MessagingError::startup_with_source("failed to create listening socket", e))?;

    socket
        .set_reuseaddr(true)
        .map_err(|e| MessagingError::startup_with_source("failed to set SO_REUSEADDR", e))?;
    socket
        .set_recv_buffer_size(defaults::SOCKET_BUFFER_SIZE as u32)
        .map_err(|e| MessagingError::startup_with_source("failed to set receive buffer size", e))?;
    socket
        .set_send_buffer_size(defaults::SOCKET_BUFFER_SIZE as u32)
        .map_err(|e| MessagingError::startup_with_source("failed to set send buffer size", e))?;
    socket
        .bind(addr)
        .map_err(|e| MessagingError::startup_with_source(format!("failed to bind {}", addr), e))?;

    debug!(%addr, "listening");
    socket
        .listen(defaults::SERVER_BACKLOG)
        .map_err(|e| MessagingError::startup_with_source("failed to listen", e))
}

/// Accept connections forever, spawning each one onto `on_connect` so
/// that one slow or long-lived peer never blocks the next accept
/// (`spec.md §5`: I/O work runs across a pool of event-loop threads,
/// not serialized behind a single connection).
/// Logged and skipped, never fatal: a single peer's bad handshake or
/// failed TLS upgrade must not bring the acceptor down (`spec.md §4.6`).
pub async fn serve<F, Fut>(acceptor: &Acceptor, on_connect: F)
where
    F: Fn(Channel, ChannelReader) -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let mut accept_count: u64 = 0;
    loop {
        accept_count += 1;
        let span = tracing::info_span!("accept", iteration = accept_count);
        match acceptor.accept().instrument(span).await {
            Ok((channel, reader)) => {
                tokio::spawn(on_connect(channel, reader));
            }
            Err(e) => warn!(error = %e, "rejected an inbound connection"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ProtocolMessage;
    use crate::transport::client;

    #[tokio::test]
    async fn binds_ephemeral_port_and_accepts_a_connection() {
        let acceptor = Acceptor::bind(&["127.0.0.1".to_string()], 0, "c1".to_string(), None)
            .await
            .unwrap();
        let addr = acceptor.local_addr();

        let server_task = tokio::spawn(async move { acceptor.accept().await });

        let address = crate::address::Address::new("127.0.0.1", addr.port());
        let (client_channel, _client_reader) = client::connect(&address, "c1", None).await.unwrap();

        let (server_channel, mut server_reader) = server_task.await.unwrap().unwrap();
        assert!(server_channel.is_active());

        let request = ProtocolMessage::Request {
            id: 1,
            sender: address.clone(),
            subject: "ping".to_string(),
            payload: vec![9],
        };
        client_channel.send(&request).await.unwrap();
        let received = server_reader.recv().await.unwrap().unwrap();
        assert_eq!(received.id(), 1);
    }

    #[tokio::test]
    async fn falls_back_to_all_interfaces_when_none_given() {
        let acceptor = Acceptor::bind(&[], 0, "c1".to_string(), None).await.unwrap();
        assert_eq!(acceptor.local_addrs().len(), 1);
    }

    #[tokio::test]
    async fn handshake_failure_does_not_poison_the_listener() {
        let acceptor = Acceptor::bind(&["127.0.0.1".to_string()], 0, "c1".to_string(), None)
            .await
            .unwrap();
        let addr = acceptor.local_addr();

        let server_task = tokio::spawn(async move {
            let first = acceptor.accept().await;
            let second = acceptor.accept().await;
            (first, second)
        });

        let bad_address = crate::address::Address::new("127.0.0.1", addr.port());
        let _ = client::connect(&bad_address, "wrong-cluster", None).await;

        let good_address = crate::address::Address::new("127.0.0.1", addr.port());
        let (client_channel, _reader) = client::connect(&good_address, "c1", None).await.unwrap();
        assert!(client_channel.is_active());

        let (first, second) = server_task.await.unwrap();
        assert!(first.is_err());
        assert!(second.is_ok());
    }
}
