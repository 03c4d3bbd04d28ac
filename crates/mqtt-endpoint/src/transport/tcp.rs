use crate::error::{MqttError, Result};
use crate::transport::{ByteReader, ByteWriter, Transport};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TcpConfig {
    pub addr: String,
    pub nodelay: bool,
    pub connect_timeout: Duration,
}

impl TcpConfig {
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            nodelay: true,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

enum TcpState {
    Configured(TcpConfig),
    Connected(TcpStream),
}

pub struct TcpTransport {
    state: TcpState,
}

impl TcpTransport {
    #[must_use]
    pub fn new(config: TcpConfig) -> Self {
        Self {
            state: TcpState::Configured(config),
        }
    }

    /// Wraps an already-accepted server-side socket.
    #[must_use]
    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            state: TcpState::Connected(stream),
        }
    }
}

impl Transport for TcpTransport {
    type Reader = TcpReader;
    type Writer = TcpWriter;

    async fn connect(&mut self) -> Result<()> {
        match &self.state {
            TcpState::Connected(_) => Ok(()),
            TcpState::Configured(config) => {
                let stream = tokio::time::timeout(
                    config.connect_timeout,
                    TcpStream::connect(&config.addr),
                )
                .await
                .map_err(|_| MqttError::Timeout)??;
                if config.nodelay {
                    stream.set_nodelay(true)?;
                }
                debug!(addr = %config.addr, "TCP connected");
                self.state = TcpState::Connected(stream);
                Ok(())
            }
        }
    }

    fn into_split(self) -> Result<(Self::Reader, Self::Writer)> {
        match self.state {
            TcpState::Connected(stream) => {
                let (read, write) = stream.into_split();
                Ok((TcpReader { inner: read }, TcpWriter { inner: write }))
            }
            TcpState::Configured(_) => Err(MqttError::NotConnected),
        }
    }
}

pub struct TcpReader {
    inner: OwnedReadHalf,
}

pub struct TcpWriter {
    inner: OwnedWriteHalf,
}

impl ByteReader for TcpReader {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.inner.read(buf).await?)
    }
}

impl ByteWriter for TcpWriter {
    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.inner.write_all(buf).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
