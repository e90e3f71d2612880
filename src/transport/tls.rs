//! C9: TLS integration (`spec.md §4.9`).
//!
//! Both sides require peer authentication (mutual TLS): the server's
//! [`rustls::ServerConfig`] demands and verifies a client certificate
//! against the trust store, and the client presents its own certificate
//! from the key store in turn. There is no hot reload; TLS material is
//! loaded once at [`MessagingService::start`](crate::service::MessagingService::start)
//! and a load failure is a fatal [`MessagingError::StartupError`].

use std::sync::Arc;

use tokio_rustls::rustls::{self, Certificate, PrivateKey, RootCertStore};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::config::TlsConfig;
use crate::error::MessagingError;

use super::pem;

/// The loaded, ready-to-use TLS material for both directions of a
/// mutually-authenticated connection.
pub struct TlsMaterial {
    pub acceptor: TlsAcceptor,
    pub connector: TlsConnector,
}

pub fn load(config: &TlsConfig) -> Result<TlsMaterial, MessagingError> {
    let certificate_chain = read_certificates(&config.key_store, "key store")?;
    let private_key = read_private_key(&config.key_store, "key store")?;
    let trust_anchors = read_certificates(&config.trust_store, "trust store")?;

    let mut roots = RootCertStore::empty();
    for anchor in &trust_anchors {
        roots.add(anchor).map_err(|e| {
            MessagingError::startup(format!("invalid trust store certificate: {}", e))
        })?;
    }

    let client_verifier = rustls::server::AllowAnyAuthenticatedClient::new(roots.clone());
    let server_config = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_client_cert_verifier(Arc::new(client_verifier))
        .with_single_cert(certificate_chain.clone(), private_key.clone())
        .map_err(|e| MessagingError::startup(format!("invalid server certificate/key: {}", e)))?;

    let client_config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_client_auth_cert(certificate_chain, private_key)
        .map_err(|e| MessagingError::startup(format!("invalid client certificate/key: {}", e)))?;

    Ok(TlsMaterial {
        acceptor: TlsAcceptor::from(Arc::new(server_config)),
        connector: TlsConnector::from(Arc::new(client_config)),
    })
}

fn read_certificates(path: &std::path::Path, which: &str) -> Result<Vec<Certificate>, MessagingError> {
    pem::read_certificates(path).map_err(|e| classify_io_error(e, which))
}

fn read_private_key(path: &std::path::Path, which: &str) -> Result<PrivateKey, MessagingError> {
    pem::read_private_key(path).map_err(|e| classify_io_error(e, which))
}

fn classify_io_error(error: std::io::Error, which: &str) -> MessagingError {
    if error.kind() == std::io::ErrorKind::NotFound {
        MessagingError::startup_with_source(format!("{} not found", which), error)
    } else {
        MessagingError::startup_with_source(format!("failed to load {}", which), error)
    }
}
