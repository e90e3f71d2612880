//! A peer-to-peer, TCP-based messaging transport: nodes exchange typed
//! binary messages either fire-and-forget or request/reply, over a pool
//! of pre-negotiated channels per peer, with an adaptive per-subject
//! timeout.
//!
//! The [`service`] module's [`MessagingService`](service::MessagingService)
//! is the public entry point; everything else is the machinery it is
//! built from.

pub mod address;
pub mod callback;
pub mod config;
pub mod connection;
pub mod defaults;
pub mod error;
pub mod executor;
pub mod handler;
pub mod local;
pub mod message;
pub mod monitor;
pub mod pool;
pub mod service;
pub mod sweeper;
pub mod timeout;
pub mod transport;
pub mod version;
pub mod wire;

pub use address::Address;
pub use config::{MessagingConfig, TlsConfig};
pub use error::MessagingError;
pub use executor::Executor;
pub use message::{ProtocolMessage, Status};
pub use service::MessagingService;
