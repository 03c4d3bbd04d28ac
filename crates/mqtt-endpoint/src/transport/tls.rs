use crate::error::{MqttError, Result};
use crate::transport::{ByteReader, ByteWriter, Transport};
use rustls::pki_types::ServerName;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};
use tracing::debug;

/// Client-side TLS parameters. Certificate loading, CA configuration, SNI
/// and ALPN policy all live in the caller-supplied `rustls::ClientConfig`.
#[derive(Clone)]
pub struct TlsConfig {
    pub addr: String,
    pub server_name: String,
    pub client_config: Arc<rustls::ClientConfig>,
    pub connect_timeout: Duration,
}

impl TlsConfig {
    #[must_use]
    pub fn new(
        addr: impl Into<String>,
        server_name: impl Into<String>,
        client_config: Arc<rustls::ClientConfig>,
    ) -> Self {
        Self {
            addr: addr.into(),
            server_name: server_name.into(),
            client_config,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

enum TlsState {
    Configured(TlsConfig),
    Connected(TlsStream<TcpStream>),
}

pub struct TlsTransport {
    state: TlsState,
}

impl TlsTransport {
    #[must_use]
    pub fn new(config: TlsConfig) -> Self {
        Self {
            state: TlsState::Configured(config),
        }
    }

    /// Wraps a server-side stream whose handshake already ran under the
    /// given acceptor.
    pub async fn accept(acceptor: &TlsAcceptor, stream: TcpStream) -> Result<Self> {
        let tls = acceptor
            .accept(stream)
            .await
            .map_err(|e| MqttError::ConnectionError(format!("TLS accept failed: {e}")))?;
        Ok(Self {
            state: TlsState::Connected(TlsStream::Server(tls)),
        })
    }
}

impl Transport for TlsTransport {
    type Reader = TlsReader;
    type Writer = TlsWriter;

    async fn connect(&mut self) -> Result<()> {
        match &self.state {
            TlsState::Connected(_) => Ok(()),
            TlsState::Configured(config) => {
                let server_name = ServerName::try_from(config.server_name.clone())
                    .map_err(|_| MqttError::Configuration(format!(
                        "invalid TLS server name: {}",
                        config.server_name
                    )))?;

                let tcp = tokio::time::timeout(
                    config.connect_timeout,
                    TcpStream::connect(&config.addr),
                )
                .await
                .map_err(|_| MqttError::Timeout)??;
                tcp.set_nodelay(true)?;

                let connector = TlsConnector::from(Arc::clone(&config.client_config));
                let tls = tokio::time::timeout(
                    config.connect_timeout,
                    connector.connect(server_name, tcp),
                )
                .await
                .map_err(|_| MqttError::Timeout)?
                .map_err(|e| MqttError::ConnectionError(format!("TLS handshake failed: {e}")))?;

                debug!(addr = %config.addr, "TLS connected");
                self.state = TlsState::Connected(TlsStream::Client(tls));
                Ok(())
            }
        }
    }

    fn into_split(self) -> Result<(Self::Reader, Self::Writer)> {
        match self.state {
            TlsState::Connected(stream) => {
                let (read, write) = tokio::io::split(stream);
                Ok((TlsReader { inner: read }, TlsWriter { inner: write }))
            }
            TlsState::Configured(_) => Err(MqttError::NotConnected),
        }
    }
}

pub struct TlsReader {
    inner: ReadHalf<TlsStream<TcpStream>>,
}

pub struct TlsWriter {
    inner: WriteHalf<TlsStream<TcpStream>>,
}

impl ByteReader for TlsReader {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.inner.read(buf).await?)
    }
}

impl ByteWriter for TlsWriter {
    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.inner.write_all(buf).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
