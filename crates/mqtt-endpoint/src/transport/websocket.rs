//! MQTT over WebSocket. Each binary frame carries whole or partial MQTT
//! packets; the reader flattens frames back into a byte stream so the frame
//! reader on top never knows the difference. `wss://` URLs run the TLS
//! handshake inside the connector, covering the TLS+WebSocket stack.

use crate::error::{MqttError, Result};
use crate::transport::{ByteReader, ByteWriter, Transport};
use bytes::{Buf, Bytes};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// `ws://host:port/path` or `wss://host:port/path`.
    pub url: String,
    pub connect_timeout: Duration,
}

impl WebSocketConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

enum WsState {
    Configured(WebSocketConfig),
    Connected(WsStream),
}

pub struct WebSocketTransport {
    state: WsState,
}

impl WebSocketTransport {
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self {
            state: WsState::Configured(config),
        }
    }

    /// Runs the server-side upgrade on an accepted socket.
    pub async fn accept(stream: TcpStream) -> Result<Self> {
        let ws = tokio_tungstenite::accept_async(MaybeTlsStream::Plain(stream))
            .await
            .map_err(|e| MqttError::ConnectionError(format!("WebSocket accept failed: {e}")))?;
        Ok(Self {
            state: WsState::Connected(ws),
        })
    }
}

impl Transport for WebSocketTransport {
    type Reader = WebSocketReader;
    type Writer = WebSocketWriter;

    async fn connect(&mut self) -> Result<()> {
        match &self.state {
            WsState::Connected(_) => Ok(()),
            WsState::Configured(config) => {
                let (ws, response) = tokio::time::timeout(
                    config.connect_timeout,
                    tokio_tungstenite::connect_async(config.url.as_str()),
                )
                .await
                .map_err(|_| MqttError::Timeout)?
                .map_err(|e| {
                    MqttError::ConnectionError(format!("WebSocket connect failed: {e}"))
                })?;

                debug!(url = %config.url, status = %response.status(), "WebSocket connected");
                self.state = WsState::Connected(ws);
                Ok(())
            }
        }
    }

    fn into_split(self) -> Result<(Self::Reader, Self::Writer)> {
        match self.state {
            WsState::Connected(ws) => {
                let (sink, stream) = ws.split();
                Ok((
                    WebSocketReader {
                        stream,
                        pending: Bytes::new(),
                    },
                    WebSocketWriter { sink },
                ))
            }
            WsState::Configured(_) => Err(MqttError::NotConnected),
        }
    }
}

pub struct WebSocketReader {
    stream: SplitStream<WsStream>,
    /// Tail of the last binary frame not yet handed to the caller.
    pending: Bytes,
}

impl ByteReader for WebSocketReader {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            if !self.pending.is_empty() {
                let n = self.pending.len().min(buf.len());
                self.pending.copy_to_slice(&mut buf[..n]);
                return Ok(n);
            }

            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    self.pending = Bytes::from(data);
                }
                Some(Ok(Message::Close(_))) | None => return Ok(0),
                // Pings are answered by tungstenite's sink automation; text
                // and pong frames carry nothing for MQTT.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return Err(MqttError::ConnectionError(format!(
                        "WebSocket read failed: {e}"
                    )))
                }
            }
        }
    }
}

pub struct WebSocketWriter {
    sink: SplitSink<WsStream, Message>,
}

impl ByteWriter for WebSocketWriter {
    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.sink
            .send(Message::Binary(buf.to_vec()))
            .await
            .map_err(|e| MqttError::ConnectionError(format!("WebSocket write failed: {e}")))
    }

    async fn close(&mut self) -> Result<()> {
        self.sink
            .send(Message::Close(None))
            .await
            .map_err(|e| MqttError::ConnectionError(format!("WebSocket close failed: {e}")))?;
        let _ = self.sink.close().await;
        Ok(())
    }
}
