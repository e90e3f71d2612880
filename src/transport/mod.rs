//! The wire-level transport: TCP/TLS stream handling, the handshake,
//! and the channels built on top of them (`spec.md §4.2`, `§4.5`,
//! `§4.6`, `§4.9`).

pub mod channel;
pub mod client;
pub mod handshake;
pub mod io_stream;
pub mod pem;
pub mod server;
pub mod tls;

pub use channel::{Channel, ChannelId, ChannelReader};
pub use io_stream::IoStream;
pub use tls::TlsMaterial;
