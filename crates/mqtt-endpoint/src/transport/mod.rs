//! Pluggable byte-stream transports.
//!
//! The endpoint consumes an ordered, reliable, full-duplex byte stream with
//! graceful-close notification; everything about how that stream came to be
//! (TCP connect, TLS handshake, WebSocket upgrade) stays behind the
//! [`Transport`] trait. A connected transport splits into independent read
//! and write halves so the per-connection reader task and driver task can
//! own their side outright.

pub mod packet_io;
pub mod tcp;
pub mod tls;
pub mod websocket;

use crate::error::Result;

pub use packet_io::{FrameReader, FrameWriter};
pub use tcp::{TcpConfig, TcpTransport};
pub use tls::{TlsConfig, TlsTransport};
pub use websocket::{WebSocketConfig, WebSocketTransport};

/// Read half of a connected stream. A return of `Ok(0)` is the peer's
/// graceful close.
pub trait ByteReader: Send {
    fn read(&mut self, buf: &mut [u8]) -> impl std::future::Future<Output = Result<usize>> + Send;
}

/// Write half of a connected stream. `write_all` resolves only once the
/// whole buffer is accepted, which is what gives the frame writer its
/// one-write-in-flight guarantee.
pub trait ByteWriter: Send + Sync {
    fn write_all(&mut self, buf: &[u8]) -> impl std::future::Future<Output = Result<()>> + Send;

    fn close(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// A transport that can be established and then split into halves.
pub trait Transport: Send + Sized {
    type Reader: ByteReader + 'static;
    type Writer: ByteWriter + 'static;

    /// Performs connect / handshake / upgrade. Server-side transports built
    /// from an accepted stream are already established and return `Ok(())`.
    fn connect(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Splits an established transport. Fails with `NotConnected` when
    /// `connect` has not completed.
    fn into_split(self) -> Result<(Self::Reader, Self::Writer)>;
}

/// Dispatch enum over the bundled transports, for callers that pick one at
/// runtime.
pub enum TransportType {
    Tcp(TcpTransport),
    Tls(Box<TlsTransport>),
    WebSocket(Box<WebSocketTransport>),
}

pub enum TransportReader {
    Tcp(tcp::TcpReader),
    Tls(tls::TlsReader),
    WebSocket(websocket::WebSocketReader),
}

pub enum TransportWriter {
    Tcp(tcp::TcpWriter),
    Tls(tls::TlsWriter),
    WebSocket(websocket::WebSocketWriter),
}

impl Transport for TransportType {
    type Reader = TransportReader;
    type Writer = TransportWriter;

    async fn connect(&mut self) -> Result<()> {
        match self {
            Self::Tcp(t) => t.connect().await,
            Self::Tls(t) => t.connect().await,
            Self::WebSocket(t) => t.connect().await,
        }
    }

    fn into_split(self) -> Result<(Self::Reader, Self::Writer)> {
        match self {
            Self::Tcp(t) => {
                let (r, w) = t.into_split()?;
                Ok((TransportReader::Tcp(r), TransportWriter::Tcp(w)))
            }
            Self::Tls(t) => {
                let (r, w) = (*t).into_split()?;
                Ok((TransportReader::Tls(r), TransportWriter::Tls(w)))
            }
            Self::WebSocket(t) => {
                let (r, w) = (*t).into_split()?;
                Ok((TransportReader::WebSocket(r), TransportWriter::WebSocket(w)))
            }
        }
    }
}

impl ByteReader for TransportReader {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Self::Tcp(r) => r.read(buf).await,
            Self::Tls(r) => r.read(buf).await,
            Self::WebSocket(r) => r.read(buf).await,
        }
    }
}

impl ByteWriter for TransportWriter {
    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        match self {
            Self::Tcp(w) => w.write_all(buf).await,
            Self::Tls(w) => w.write_all(buf).await,
            Self::WebSocket(w) => w.write_all(buf).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Self::Tcp(w) => w.close().await,
            Self::Tls(w) => w.close().await,
            Self::WebSocket(w) => w.close().await,
        }
    }
}
