//! Pluggable persistence for retained messages and session blobs.
//!
//! The broker itself is in-memory; a backend lets retained messages and
//! session images survive a restart. Values are opaque byte blobs keyed by
//! topic or client id, produced by `serde_json` over the core's
//! serializable records.

pub mod memory;

pub use memory::MemoryBackend;

use crate::error::Result;
use mqtt_endpoint_core::types::QoS;
use serde::{Deserialize, Serialize};

/// Serializable retained-message record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetainedRecord {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub message_expiry_interval: Option<u32>,
}

/// Storage interface. Implementations must be safe to call from any task.
pub trait StorageBackend: Send + Sync {
    fn store_retained(
        &self,
        record: RetainedRecord,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    fn remove_retained(
        &self,
        topic: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    fn load_retained(&self)
        -> impl std::future::Future<Output = Result<Vec<RetainedRecord>>> + Send;

    /// Opaque session blob, keyed by client id.
    fn store_session(
        &self,
        client_id: &str,
        blob: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    fn load_session(
        &self,
        client_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Vec<u8>>>> + Send;

    fn load_all_sessions(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<(String, Vec<u8>)>>> + Send;

    fn remove_session(
        &self,
        client_id: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Runtime-selected backend. Only the in-memory implementation ships here;
/// durable backends plug in through the same trait.
pub enum DynamicStorage {
    Memory(MemoryBackend),
}

impl StorageBackend for DynamicStorage {
    async fn store_retained(&self, record: RetainedRecord) -> Result<()> {
        match self {
            Self::Memory(backend) => backend.store_retained(record).await,
        }
    }

    async fn remove_retained(&self, topic: &str) -> Result<()> {
        match self {
            Self::Memory(backend) => backend.remove_retained(topic).await,
        }
    }

    async fn load_retained(&self) -> Result<Vec<RetainedRecord>> {
        match self {
            Self::Memory(backend) => backend.load_retained().await,
        }
    }

    async fn store_session(&self, client_id: &str, blob: Vec<u8>) -> Result<()> {
        match self {
            Self::Memory(backend) => backend.store_session(client_id, blob).await,
        }
    }

    async fn load_session(&self, client_id: &str) -> Result<Option<Vec<u8>>> {
        match self {
            Self::Memory(backend) => backend.load_session(client_id).await,
        }
    }

    async fn load_all_sessions(&self) -> Result<Vec<(String, Vec<u8>)>> {
        match self {
            Self::Memory(backend) => backend.load_all_sessions().await,
        }
    }

    async fn remove_session(&self, client_id: &str) -> Result<()> {
        match self {
            Self::Memory(backend) => backend.remove_session(client_id).await,
        }
    }
}
