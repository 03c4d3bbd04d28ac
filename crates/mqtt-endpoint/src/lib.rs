//! Dual-role async MQTT 3.1.1 / 5.0 endpoint and reference broker.
//!
//! The sans-I/O protocol engine lives in [`mqtt_endpoint_core`]; this crate
//! adds the pluggable byte-stream transports (TCP, TLS, WebSocket), the
//! frame reader/writer, the per-connection endpoint driver for the client
//! role, the session store with takeover, and a broker that routes
//! publishes through a subscription trie with retained messages, shared
//! subscriptions and wills.

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::doc_markdown)]

pub mod broker;
pub mod client;
pub mod endpoint;
pub mod session_store;
pub mod testing;
pub mod transport;

pub mod error {
    pub use mqtt_endpoint_core::error::{MqttError, Result};
}

pub use broker::{Broker, BrokerConfig};
pub use client::ClientBuilder;
pub use endpoint::{
    ApiMode, Endpoint, EndpointHandle, EndpointHandlers, EndpointOptions, EndpointState,
};
pub use error::{MqttError, Result};
pub use session_store::{SessionLease, SessionStore};
pub use transport::{Transport, TransportType};

pub use mqtt_endpoint_core as core;
pub use mqtt_endpoint_core::{
    ConnectOptions, ConnectResult, IdWidth, Message, ProtocolVersion, PublishOptions,
    PublishResult, QoS, ReasonCode, RetainHandling, SubscribeOptions, WillMessage,
};
