//! C7: the messaging service facade (`spec.md §4.7`) — the public
//! entry point every other module is machinery for.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::info;

use crate::address::Address;
use crate::config::MessagingConfig;
use crate::connection::{self, ConnectionRegistry};
use crate::error::MessagingError;
use crate::executor::{run_on, Executor};
use crate::handler::{Handler, HandlerTable};
use crate::local::LocalClientConnection;
use crate::message::MessageIdSource;
use crate::pool::ChannelPool;
use crate::sweeper::Sweeper;
use crate::transport::server::Acceptor;
use crate::transport::tls;

/// Everything [`MessagingService::start`] needs to tear down again,
/// held behind a mutex so `start`/`stop` can be idempotent
/// (`spec.md §4.7`).
struct Running {
    acceptor_task: tokio::task::JoinHandle<()>,
    sweeper: Sweeper,
    local_address: Address,
}

/// The public API: send, sendAndReceive, registerHandler, start, stop
/// (`spec.md §4.7`). Cheaply cloneable; every clone shares the same
/// handler table, connection pool, and running state.
#[derive(Clone)]
pub struct MessagingService {
    config: MessagingConfig,
    id_source: Arc<MessageIdSource>,
    handlers: Arc<HandlerTable>,
    registry: Arc<ConnectionRegistry>,
    pool: Arc<RwLock<Option<Arc<ChannelPool>>>>,
    local: Arc<LocalClientConnection>,
    running: Arc<AsyncMutex<Option<Running>>>,
}

impl MessagingService {
    pub fn new(config: MessagingConfig) -> Self {
        let handlers = Arc::new(HandlerTable::new());
        let local = Arc::new(LocalClientConnection::new(handlers.clone()));

        MessagingService {
            config,
            id_source: Arc::new(MessageIdSource::new()),
            handlers,
            registry: Arc::new(ConnectionRegistry::new()),
            pool: Arc::new(RwLock::new(None)),
            local,
            running: Arc::new(AsyncMutex::new(None)),
        }
    }

    /// Idempotent: a second call while already running is a no-op
    /// (`spec.md §4.7`).
    pub async fn start(&self) -> Result<Address, MessagingError> {
        let mut running = self.running.lock().await;
        if let Some(existing) = running.as_ref() {
            return Ok(existing.local_address.clone());
        }

        let tls_material = match &self.config.tls {
            Some(tls_config) if tls_config.enabled => Some(Arc::new(tls::load(tls_config)?)),
            _ => None,
        };

        let acceptor = Acceptor::bind(
            &self.config.interfaces,
            self.config.port.unwrap_or(0),
            self.config.cluster_name.clone(),
            tls_material.as_ref().map(|m| clone_material(m)),
        )
        .await?;
        let local_address = Address::from(acceptor.local_addr());

        *self.pool.write().await = Some(Arc::new(ChannelPool::new(
            self.config.clone(),
            tls_material,
            self.registry.clone(),
            self.handlers.clone(),
        )));

        let registry = self.registry.clone();
        let handlers = self.handlers.clone();
        let acceptor_task = tokio::spawn(async move {
            crate::transport::server::serve(&acceptor, |channel, reader| {
                let registry = registry.clone();
                let handlers = handlers.clone();
                async move {
                    connection::run_dispatch_loop(channel, reader, registry, handlers).await;
                }
            })
            .await;
        });

        let sweeper = Sweeper::start(
            self.registry.clone(),
            self.local.callbacks(),
            self.config.sweep_interval,
        );

        info!(%local_address, "messaging service started");
        *running = Some(Running {
            acceptor_task,
            sweeper,
            local_address: local_address.clone(),
        });
        Ok(local_address)
    }

    /// Idempotent: only the first call to transition out of "running"
    /// actually does anything (`spec.md §4.7`).
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        if let Some(running) = running.take() {
            running.acceptor_task.abort();
            running.sweeper.stop();
            if let Some(pool) = self.pool.read().await.as_ref() {
                pool.close_all().await;
            }
            info!("messaging service stopped");
        }
    }

    pub async fn local_address(&self) -> Option<Address> {
        self.running.lock().await.as_ref().map(|r| r.local_address.clone())
    }

    /// Fire-and-forget send; the loopback path is taken automatically
    /// when `destination == self` (`spec.md §4.7`, `§8` property 2).
    pub async fn send_async(
        &self,
        destination: &Address,
        subject: &str,
        payload: Vec<u8>,
    ) -> Result<(), MessagingError> {
        if self.is_self(destination).await {
            self.local.send_async(subject, payload).await;
            return Ok(());
        }
        let connection = self.pool().await?.get_connection(destination, subject).await?;
        connection
            .send_async(&self.id_source, self.sender_address().await, subject, payload)
            .await
    }

    /// `timeout == Duration::ZERO` selects the adaptive path
    /// (`spec.md §4.3`). Resolution of the returned future is
    /// dispatched on `executor` when supplied, inline otherwise
    /// (`spec.md §4.7`: "completion dispatched on the caller-supplied
    /// executor (default: immediate)").
    pub async fn send_and_receive(
        &self,
        destination: &Address,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
        executor: Option<Executor>,
    ) -> Result<Vec<u8>, MessagingError> {
        let service = self.clone();
        let destination = destination.clone();
        let subject = subject.to_string();
        run_on(executor.as_ref(), async move {
            if service.is_self(&destination).await {
                return service
                    .local
                    .send_and_receive(&service.id_source, &subject, payload, timeout)
                    .await;
            }
            let connection = service.pool().await?.get_connection(&destination, &subject).await?;
            let sender = service.sender_address().await;
            connection
                .send_and_receive(&service.id_source, sender, &subject, payload, timeout)
                .await
        })
        .await
    }

    /// Overwriting an existing subject replaces it; `unregister` removes
    /// it (`spec.md §4.7`). `executor`, when supplied, wraps every
    /// invocation of `handler` (`spec.md §4.7`).
    pub fn register_handler(&self, subject: impl Into<String>, handler: Handler, executor: Option<Executor>) {
        self.handlers.register(subject, handler, executor);
    }

    pub fn unregister_handler(&self, subject: &str) {
        self.handlers.unregister(subject);
    }

    async fn pool(&self) -> Result<Arc<ChannelPool>, MessagingError> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or_else(|| MessagingError::startup("service is not running"))
    }

    async fn is_self(&self, destination: &Address) -> bool {
        match self.local_address().await {
            Some(local) => &local == destination,
            None => false,
        }
    }

    async fn sender_address(&self) -> Address {
        self.local_address()
            .await
            .unwrap_or_else(|| Address::new(self.config.local_host.clone(), 0))
    }
}

/// `TlsAcceptor`/`TlsConnector` are cheap `Arc`-backed handles
/// (`spec.md §4.9`); the acceptor and the pool each need their own
/// owned copy of the same loaded material.
fn clone_material(material: &tls::TlsMaterial) -> tls::TlsMaterial {
    tls::TlsMaterial {
        acceptor: material.acceptor.clone(),
        connector: material.connector.clone(),
    }
}
