//! Reference broker built on the endpoint engine: accepts transports, runs
//! server-side CONNECT negotiation, and routes publishes through the
//! subscription index.

pub mod connection;
pub mod router;
pub mod server;
pub mod storage;

pub use router::Router;

use crate::error::Result;
use crate::session_store::SessionStore;
use crate::transport::Transport;
use bytes::Bytes;
use mqtt_endpoint_core::packet::PublishPacket;
use mqtt_endpoint_core::session::SessionSnapshot;
use mqtt_endpoint_core::types::{QoS, ReasonCode};
use mqtt_endpoint_core::IdWidth;
use std::sync::Arc;
use std::time::Duration;
use storage::{DynamicStorage, RetainedRecord, StorageBackend};
use tracing::{info, warn};

/// CONNECT-time credential hook. Return `Success` to admit the client; any
/// other reason code is sent back in the CONNACK. Full authentication
/// mechanisms live behind this seam.
pub type AuthHook =
    Arc<dyn Fn(&str, Option<&str>, Option<&[u8]>) -> ReasonCode + Send + Sync>;

#[derive(Clone)]
pub struct BrokerConfig {
    /// Advertised and enforced on inbound frames, both directions in v5.
    pub maximum_packet_size: Option<u32>,
    /// Per-connection inbound QoS > 0 window; advertised in CONNACK.
    pub receive_maximum: Option<u16>,
    /// Inbound topic-alias space granted to each v5 client.
    pub topic_alias_maximum: u16,
    pub maximum_qos: QoS,
    /// Overrides every client's requested keep-alive when set (v5
    /// SERVER KEEP ALIVE).
    pub server_keep_alive: Option<u16>,
    pub shared_subscriptions_available: bool,
    pub id_width: IdWidth,
    /// CONNECT must arrive within this window of transport establishment.
    pub connect_timeout: Duration,
    /// Per-session cap on messages queued while the client is offline.
    pub offline_queue_limit: usize,
    /// Per-connection fan-out channel depth.
    pub fanout_queue_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            maximum_packet_size: None,
            receive_maximum: None,
            topic_alias_maximum: 0,
            maximum_qos: QoS::ExactlyOnce,
            server_keep_alive: None,
            shared_subscriptions_available: true,
            id_width: IdWidth::Standard,
            connect_timeout: Duration::from_secs(10),
            offline_queue_limit: 1_024,
            fanout_queue_capacity: 256,
        }
    }
}

pub(crate) struct BrokerCore {
    pub config: BrokerConfig,
    pub sessions: Arc<SessionStore>,
    pub router: Arc<Router>,
    pub auth: Option<AuthHook>,
}

/// The broker handle. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct Broker {
    core: Arc<BrokerCore>,
    storage: Option<Arc<DynamicStorage>>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

impl Broker {
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        let sessions = Arc::new(SessionStore::new());
        let router = Arc::new(Router::new(Arc::clone(&sessions)));
        Self {
            core: Arc::new(BrokerCore {
                config,
                sessions,
                router,
                auth: None,
            }),
            storage: None,
        }
    }

    #[must_use]
    pub fn with_auth(mut self, auth: AuthHook) -> Self {
        let core = Arc::get_mut(&mut self.core)
            .expect("with_auth must be called before the broker is shared");
        core.auth = Some(auth);
        self
    }

    #[must_use]
    pub fn with_storage(mut self, storage: DynamicStorage) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    /// Loads retained messages and persisted sessions from the configured
    /// storage backend.
    pub async fn initialize(&self) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };

        for record in storage.load_retained().await? {
            let mut publish = PublishPacket::new(
                record.topic,
                Bytes::from(record.payload),
                record.qos,
            )
            .with_retain(true);
            if let Some(expiry) = record.message_expiry_interval {
                publish.properties.set_message_expiry_interval(expiry);
            }
            self.core.router.route(&publish, None).await;
        }

        let mut restored = 0usize;
        for (client_id, blob) in storage.load_all_sessions().await? {
            match serde_json::from_slice::<SessionSnapshot>(&blob) {
                Ok(snapshot) => {
                    self.core.sessions.restore(snapshot);
                    restored += 1;
                }
                Err(e) => warn!(%client_id, "discarding unreadable session blob: {e}"),
            }
        }
        info!(restored, "broker state initialized from storage");
        Ok(())
    }

    /// Writes every live session image and retained message back to the
    /// storage backend.
    pub async fn persist(&self) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };

        for (client_id, snapshot) in self.core.sessions.snapshot_all() {
            let blob = serde_json::to_vec(&snapshot)
                .map_err(|e| crate::error::MqttError::Io(e.to_string()))?;
            storage.store_session(&client_id, blob).await?;
        }

        for publish in self.core.router.retained_all().await {
            storage
                .store_retained(RetainedRecord {
                    topic: publish.topic_name.clone(),
                    payload: publish.payload.to_vec(),
                    qos: publish.qos,
                    message_expiry_interval: publish.properties.get_message_expiry_interval(),
                })
                .await?;
        }
        Ok(())
    }

    /// Serves one connection on an established transport. The returned task
    /// finishes when the connection closes.
    pub fn serve_connection<T>(&self, transport: T) -> tokio::task::JoinHandle<()>
    where
        T: Transport + 'static,
    {
        let core = Arc::clone(&self.core);
        tokio::spawn(connection::serve(transport, core))
    }

    /// Accept loop over plain TCP; runs until the listener fails.
    pub async fn run_tcp(&self, addr: &str) -> Result<()> {
        server::run_tcp(self.clone(), addr).await
    }

    /// Accept loop over TLS.
    pub async fn run_tls(&self, addr: &str, acceptor: tokio_rustls::TlsAcceptor) -> Result<()> {
        server::run_tls(self.clone(), addr, acceptor).await
    }

    /// Accept loop over WebSocket.
    pub async fn run_websocket(&self, addr: &str) -> Result<()> {
        server::run_websocket(self.clone(), addr).await
    }

    /// Periodic expiry sweep; spawn once per broker.
    pub fn start_expiry_sweep(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let sessions = Arc::clone(&self.core.sessions);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let expired = sessions.expire_sweep(std::time::Instant::now());
                if expired > 0 {
                    info!(expired, "session expiry sweep");
                }
            }
        })
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.core.sessions
    }

    #[must_use]
    pub fn router(&self) -> &Arc<Router> {
        &self.core.router
    }

    pub async fn client_count(&self) -> usize {
        self.core.router.client_count().await
    }
}
