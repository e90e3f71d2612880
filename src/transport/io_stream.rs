//! A single type erasing over plain TCP and either side of a TLS
//! upgrade, so the rest of the transport layer can hold one channel
//! type regardless of whether TLS is enabled (`spec.md §4.9`).

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::{client, server};

pub enum IoStream {
    Tcp(TcpStream),
    TlsServer(Box<server::TlsStream<TcpStream>>),
    TlsClient(Box<client::TlsStream<TcpStream>>),
}

impl AsyncRead for IoStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            IoStream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            IoStream::TlsServer(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
            IoStream::TlsClient(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for IoStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            IoStream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            IoStream::TlsServer(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
            IoStream::TlsClient(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            IoStream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            IoStream::TlsServer(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
            IoStream::TlsClient(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            IoStream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            IoStream::TlsServer(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
            IoStream::TlsClient(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

impl From<TcpStream> for IoStream {
    fn from(stream: TcpStream) -> Self {
        IoStream::Tcp(stream)
    }
}

impl From<server::TlsStream<TcpStream>> for IoStream {
    fn from(stream: server::TlsStream<TcpStream>) -> Self {
        IoStream::TlsServer(Box::new(stream))
    }
}

impl From<client::TlsStream<TcpStream>> for IoStream {
    fn from(stream: client::TlsStream<TcpStream>) -> Self {
        IoStream::TlsClient(Box::new(stream))
    }
}
