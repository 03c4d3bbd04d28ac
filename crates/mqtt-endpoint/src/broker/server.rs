//! Listener accept loops. Each accepted socket is wrapped in the matching
//! transport and handed to the connection actor; transport establishment
//! failures kill the one connection, never the loop.

use crate::broker::Broker;
use crate::error::{MqttError, Result};
use crate::transport::{TcpTransport, TlsTransport, WebSocketTransport};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

pub(crate) async fn run_tcp(broker: Broker, addr: &str) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| MqttError::Io(format!("bind {addr}: {e}")))?;
    info!(addr, "TCP listener started");

    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| MqttError::Io(format!("accept: {e}")))?;
        debug!(%peer, "TCP connection accepted");
        if let Err(e) = stream.set_nodelay(true) {
            warn!(%peer, "set_nodelay failed: {e}");
        }
        broker.serve_connection(TcpTransport::from_stream(stream));
    }
}

pub(crate) async fn run_tls(broker: Broker, addr: &str, acceptor: TlsAcceptor) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| MqttError::Io(format!("bind {addr}: {e}")))?;
    info!(addr, "TLS listener started");

    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| MqttError::Io(format!("accept: {e}")))?;
        debug!(%peer, "TLS connection accepted");

        let acceptor = acceptor.clone();
        let broker = broker.clone();
        tokio::spawn(async move {
            match TlsTransport::accept(&acceptor, stream).await {
                Ok(transport) => {
                    broker.serve_connection(transport);
                }
                Err(e) => debug!(%peer, "TLS handshake failed: {e}"),
            }
        });
    }
}

pub(crate) async fn run_websocket(broker: Broker, addr: &str) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| MqttError::Io(format!("bind {addr}: {e}")))?;
    info!(addr, "WebSocket listener started");

    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| MqttError::Io(format!("accept: {e}")))?;
        debug!(%peer, "WebSocket connection accepted");

        let broker = broker.clone();
        tokio::spawn(async move {
            match WebSocketTransport::accept(stream).await {
                Ok(transport) => {
                    broker.serve_connection(transport);
                }
                Err(e) => debug!(%peer, "WebSocket upgrade failed: {e}"),
            }
        });
    }
}
