//! The opaque configuration structure `spec.md §1` treats as an
//! external collaborator, plus the ambient knobs (cluster name, pool
//! size, sweep interval) a production messaging layer needs that the
//! distilled spec left for the embedder to supply.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;

/// TLS material locations (`spec.md §6`). Both the key store and trust
/// store are expected to be PEM files; the key store holds this node's
/// certificate chain and unencrypted private key, and the trust store
/// holds the CA certificate(s) that authenticate peers under mutual
/// TLS. The password fields exist for configuration-shape parity with
/// `spec.md §6`; decrypting an encrypted private key is not implemented
/// (see `DESIGN.md`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub enabled: bool,
    pub key_store: PathBuf,
    pub key_store_password: Option<String>,
    pub trust_store: PathBuf,
    pub trust_store_password: Option<String>,
}

/// The configuration a [`MessagingService`](crate::service::MessagingService)
/// is constructed with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// Identifies this process's cluster; hashed into the handshake
    /// preamble (`spec.md §4.2`). One cluster id per process
    /// (`spec.md §1`, Non-goals).
    pub cluster_name: String,

    /// This node's own return address, used for the loopback check and
    /// stamped as `sender` on outbound requests.
    pub local_host: String,

    /// Override of the return address port for binding; `None` binds
    /// an ephemeral port (`spec.md §6`).
    pub port: Option<u16>,

    /// Bind targets; empty binds `0.0.0.0` (`spec.md §6`).
    pub interfaces: Vec<String>,

    pub tls: Option<TlsConfig>,

    /// Channel pool slots per peer. Defaults to
    /// [`defaults::CHANNEL_POOL_SIZE`]; present as a field so tests can
    /// shrink it without touching the constant every other computation
    /// (hash-mod-N, subject distribution) relies on.
    #[serde(default = "defaults::pool_size")]
    pub pool_size: usize,

    /// Timeout sweeper period; defaults to [`defaults::SWEEP_INTERVAL`].
    #[serde(default = "defaults::sweep_interval")]
    pub sweep_interval: Duration,
}

impl MessagingConfig {
    pub fn new(cluster_name: impl Into<String>, local_host: impl Into<String>) -> Self {
        MessagingConfig {
            cluster_name: cluster_name.into(),
            local_host: local_host.into(),
            port: None,
            interfaces: Vec::new(),
            tls: None,
            pool_size: defaults::CHANNEL_POOL_SIZE,
            sweep_interval: defaults::SWEEP_INTERVAL,
        }
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}
