//! C4: connection objects (`spec.md §4.4`), and the process-wide
//! channel-identity registry that breaks the cycle between a channel
//! and the connection object that owns its callback table
//! (`spec.md §9`, "Cyclic ownership between channel and connection").

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{debug, warn};
use tracing_futures::Instrument;

use crate::address::Address;
use crate::callback::CallbackTable;
use crate::error::MessagingError;
use crate::executor::run_on;
use crate::handler::HandlerTable;
use crate::message::{MessageIdSource, ProtocolMessage, Status};
use crate::transport::{Channel, ChannelId, ChannelReader};

/// A channel this node initiated: owns the pending-callback table for
/// outbound requests written on it (`spec.md §4.4`).
pub struct RemoteClientConnection {
    channel: Channel,
    callbacks: CallbackTable,
}

impl RemoteClientConnection {
    pub fn new(channel: Channel) -> Self {
        RemoteClientConnection {
            channel,
            callbacks: CallbackTable::new(),
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub async fn send_async(
        &self,
        id_source: &MessageIdSource,
        sender: Address,
        subject: &str,
        payload: Vec<u8>,
    ) -> Result<(), MessagingError> {
        let request = ProtocolMessage::Request {
            id: id_source.next(),
            sender,
            subject: subject.to_string(),
            payload,
        };
        self.channel.send(&request).await
    }

    /// `timeout == Duration::ZERO` selects the adaptive path
    /// (`spec.md §4.3`).
    pub async fn send_and_receive(
        &self,
        id_source: &MessageIdSource,
        sender: Address,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, MessagingError> {
        let id = id_source.next();
        let receiver = self.callbacks.register(id, subject.to_string(), timeout);

        let request = ProtocolMessage::Request {
            id,
            sender,
            subject: subject.to_string(),
            payload,
        };
        if let Err(write_err) = self.channel.send(&request).await {
            self.callbacks.fail(id, MessagingError::ConnectionClosed);
            return Err(write_err);
        }

        receiver.await.unwrap_or(Err(MessagingError::ConnectionClosed))
    }

    /// Resolve the reply's callback (`spec.md §4.3`, `completeCallback`).
    /// Replies for an id with no matching callback are logged and
    /// dropped (`spec.md §3` invariants).
    pub fn dispatch_reply(&self, id: u64, status: Status, payload: Vec<u8>) {
        let result = match MessagingError::from_status(status, &payload) {
            None => Ok(payload),
            Some(err) => Err(err),
        };
        self.callbacks.complete(id, result);
    }

    pub fn sweep(&self) {
        self.callbacks.sweep();
    }

    pub async fn close(&self) {
        self.channel.close().await;
        self.callbacks.fail_all(|| MessagingError::ConnectionClosed);
    }
}

/// A channel accepted from a peer: stateless beyond the channel handle
/// itself (`spec.md §4.4`).
pub struct RemoteServerConnection {
    channel: Channel,
}

impl RemoteServerConnection {
    pub fn new(channel: Channel) -> Self {
        RemoteServerConnection { channel }
    }

    /// Write a reply frame with the request's id; an absent payload is
    /// substituted with zero bytes (`spec.md §4.4`).
    pub async fn reply(&self, id: u64, status: Status, payload: Vec<u8>) -> Result<(), MessagingError> {
        let reply = ProtocolMessage::Reply { id, payload, status };
        self.channel.send(&reply).await
    }

    /// Look up the handler for `subject`, invoke it, and write the
    /// reply; a missing handler replies `ERROR_NO_HANDLER`
    /// (`spec.md §4.6`, `§4.7`).
    pub async fn handle_request(&self, id: u64, subject: String, payload: Vec<u8>, handlers: &HandlerTable) {
        let (status, reply_payload) = match handlers.get(&subject) {
            None => (Status::ErrorNoHandler, Vec::new()),
            Some(entry) => {
                let invoked = entry.clone();
                let result = run_on(entry.executor.as_ref(), async move {
                    invoked.handler.invoke(payload).await
                })
                .await;
                match result {
                    Ok(bytes) => (Status::Ok, bytes),
                    Err(MessagingError::RemoteHandlerFailure(message)) => {
                        (Status::ErrorHandlerException, message.into_bytes())
                    }
                    Err(other) => (Status::ProtocolException, other.to_string().into_bytes()),
                }
            }
        };
        if let Err(e) = self.reply(id, status, reply_payload).await {
            debug!(id, error = %e, "failed to write reply; peer likely disconnected");
        }
    }

    pub async fn close(&self) {
        self.channel.close().await;
    }
}

/// Every known channel's client and/or server connection object, keyed
/// by [`ChannelId`] rather than by the channel itself (`spec.md §9`).
#[derive(Default)]
pub struct ConnectionRegistry {
    clients: RwLock<HashMap<ChannelId, Arc<RemoteClientConnection>>>,
    servers: RwLock<HashMap<ChannelId, Arc<RemoteServerConnection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_client(&self, id: ChannelId, connection: Arc<RemoteClientConnection>) {
        self.clients.write().unwrap().insert(id, connection);
    }

    pub fn client(&self, id: ChannelId) -> Option<Arc<RemoteClientConnection>> {
        self.clients.read().unwrap().get(&id).cloned()
    }

    pub fn remove_client(&self, id: ChannelId) -> Option<Arc<RemoteClientConnection>> {
        self.clients.write().unwrap().remove(&id)
    }

    /// Obtain the server connection for `channel`, creating it on first
    /// use (`spec.md §4.6`: "obtain or create a `RemoteServerConnection`").
    pub fn get_or_create_server(&self, channel: &Channel) -> Arc<RemoteServerConnection> {
        if let Some(existing) = self.servers.read().unwrap().get(&channel.id) {
            return existing.clone();
        }
        let mut servers = self.servers.write().unwrap();
        servers
            .entry(channel.id)
            .or_insert_with(|| Arc::new(RemoteServerConnection::new(channel.clone())))
            .clone()
    }

    pub fn remove_server(&self, id: ChannelId) -> Option<Arc<RemoteServerConnection>> {
        self.servers.write().unwrap().remove(&id)
    }

    pub fn client_connections(&self) -> Vec<Arc<RemoteClientConnection>> {
        self.clients.read().unwrap().values().cloned().collect()
    }
}

/// Drive one channel's inbound stream until it closes: dispatch
/// requests to the handler table via a server connection, and replies
/// to the client connection registered for this channel, if any
/// (`spec.md §4.6`).
///
/// The whole loop runs inside one per-connection span (`peer`,
/// `channel`), so every log line emitted while dispatching for this
/// channel, including from the handler-invocation task it spawns off
/// to the side, can be attributed back to the connection it came from.
pub async fn run_dispatch_loop(
    channel: Channel,
    reader: ChannelReader,
    registry: Arc<ConnectionRegistry>,
    handlers: Arc<HandlerTable>,
) {
    let span = tracing::info_span!("connection", peer = %channel.peer, channel = ?channel.id);
    dispatch_loop_body(channel, reader, registry, handlers)
        .instrument(span)
        .await
}

async fn dispatch_loop_body(
    channel: Channel,
    mut reader: ChannelReader,
    registry: Arc<ConnectionRegistry>,
    handlers: Arc<HandlerTable>,
) {
    loop {
        match reader.recv().await {
            Ok(Some(ProtocolMessage::Request { id, subject, payload, .. })) => {
                let server_connection = registry.get_or_create_server(&channel);
                let handlers = handlers.clone();
                tokio::spawn(async move {
                    server_connection.handle_request(id, subject, payload, &handlers).await;
                });
            }
            Ok(Some(ProtocolMessage::Reply { id, payload, status })) => {
                match registry.client(channel.id) {
                    Some(client_connection) => client_connection.dispatch_reply(id, status, payload),
                    None => debug!(id, channel = ?channel.id, "reply on a channel with no client connection"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(channel = ?channel.id, error = %e, "channel read failed; closing");
                break;
            }
        }
    }

    channel.mark_inactive();
    if let Some(client_connection) = registry.remove_client(channel.id) {
        client_connection.close().await;
    }
    if let Some(server_connection) = registry.remove_server(channel.id) {
        server_connection.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;
    use crate::transport::channel::split;
    use crate::version::ProtocolVersion;
    use tokio::net::{TcpListener, TcpStream};

    async fn loopback_pair() -> (crate::transport::IoStream, crate::transport::IoStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, (server, _)) =
            tokio::join!(TcpStream::connect(addr), async { listener.accept().await.unwrap() });
        (client.unwrap().into(), server.into())
    }

    #[tokio::test]
    async fn request_dispatched_to_handler_produces_a_reply() {
        let (client_io, server_io) = loopback_pair().await;
        let (client_channel, mut client_reader) =
            split(client_io, ProtocolVersion::latest(), Address::new("a", 1));
        let (server_channel, server_reader) =
            split(server_io, ProtocolVersion::latest(), Address::new("b", 2));

        let registry = Arc::new(ConnectionRegistry::new());
        let handlers = Arc::new(HandlerTable::new());
        handlers.register("echo", Handler::sync(|p| p), None);

        let dispatch_task = tokio::spawn(run_dispatch_loop(
            server_channel,
            server_reader,
            registry,
            handlers,
        ));

        let request = ProtocolMessage::Request {
            id: 1,
            sender: Address::new("a", 1),
            subject: "echo".to_string(),
            payload: vec![9, 9],
        };
        client_channel.send(&request).await.unwrap();
        let reply = client_reader.recv().await.unwrap().unwrap();
        match reply {
            ProtocolMessage::Reply { id, payload, status } => {
                assert_eq!(id, 1);
                assert_eq!(payload, vec![9, 9]);
                assert_eq!(status, Status::Ok);
            }
            _ => panic!("expected reply"),
        }

        client_channel.close().await;
        dispatch_task.abort();
    }

    #[tokio::test]
    async fn reply_with_no_registered_client_connection_is_dropped_not_panicking() {
        let (client_io, server_io) = loopback_pair().await;
        let (client_channel, client_reader) =
            split(client_io, ProtocolVersion::latest(), Address::new("a", 1));
        let (server_channel, _server_reader) =
            split(server_io, ProtocolVersion::latest(), Address::new("b", 2));

        let registry = Arc::new(ConnectionRegistry::new());
        let handlers = Arc::new(HandlerTable::new());

        let dispatch_task = tokio::spawn(run_dispatch_loop(
            client_channel,
            client_reader,
            registry,
            handlers,
        ));

        let reply = ProtocolMessage::Reply {
            id: 99,
            payload: vec![],
            status: Status::Ok,
        };
        server_channel.send(&reply).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        server_channel.close().await;
        dispatch_task.abort();
    }
}
