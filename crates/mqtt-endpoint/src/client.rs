//! Convenience constructors wiring an endpoint to one of the bundled
//! transports.

use crate::endpoint::{Endpoint, EndpointHandle, EndpointHandlers, EndpointOptions};
use crate::error::Result;
use crate::transport::{
    TcpConfig, TcpTransport, TlsConfig, TlsTransport, TransportType, WebSocketConfig,
    WebSocketTransport,
};
use mqtt_endpoint_core::types::{ConnectOptions, ConnectResult, WillMessage};
use std::sync::Arc;
use std::time::Duration;

pub struct ClientBuilder {
    transport: TransportChoice,
    connect: ConnectOptions,
    options: EndpointOptions,
}

enum TransportChoice {
    Tcp(TcpConfig),
    Tls(TlsConfig),
    WebSocket(WebSocketConfig),
}

impl ClientBuilder {
    /// Plain TCP, `host:port`.
    #[must_use]
    pub fn tcp(addr: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            transport: TransportChoice::Tcp(TcpConfig::new(addr)),
            connect: ConnectOptions::new(client_id),
            options: EndpointOptions::default(),
        }
    }

    /// TLS over TCP. CA, SNI and ALPN policy come in with the rustls
    /// config.
    #[must_use]
    pub fn tls(
        addr: impl Into<String>,
        server_name: impl Into<String>,
        tls_config: Arc<rustls::ClientConfig>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            transport: TransportChoice::Tls(TlsConfig::new(addr, server_name, tls_config)),
            connect: ConnectOptions::new(client_id),
            options: EndpointOptions::default(),
        }
    }

    /// WebSocket (`ws://`) or TLS+WebSocket (`wss://`).
    #[must_use]
    pub fn websocket(url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            transport: TransportChoice::WebSocket(WebSocketConfig::new(url)),
            connect: ConnectOptions::new(client_id),
            options: EndpointOptions::default(),
        }
    }

    #[must_use]
    pub fn with_connect_options(mut self, connect: ConnectOptions) -> Self {
        self.connect = connect;
        self
    }

    #[must_use]
    pub fn with_endpoint_options(mut self, options: EndpointOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.connect.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub fn with_clean_start(mut self, clean_start: bool) -> Self {
        self.connect.clean_start = clean_start;
        self
    }

    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl AsRef<[u8]>,
    ) -> Self {
        self.connect = self.connect.with_credentials(username, password);
        self
    }

    #[must_use]
    pub fn with_will(mut self, will: WillMessage) -> Self {
        self.connect.will = Some(will);
        self
    }

    pub async fn connect(
        self,
        handlers: EndpointHandlers,
    ) -> Result<(EndpointHandle, ConnectResult)> {
        let transport = match self.transport {
            TransportChoice::Tcp(config) => TransportType::Tcp(TcpTransport::new(config)),
            TransportChoice::Tls(config) => {
                TransportType::Tls(Box::new(TlsTransport::new(config)))
            }
            TransportChoice::WebSocket(config) => {
                TransportType::WebSocket(Box::new(WebSocketTransport::new(config)))
            }
        };
        Endpoint::connect(transport, self.connect, self.options, handlers).await
    }
}
