use super::{RetainedRecord, StorageBackend};
use crate::error::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Reference backend: everything lives in process memory. Useful for tests
/// and as the template for durable implementations.
#[derive(Default)]
pub struct MemoryBackend {
    retained: RwLock<HashMap<String, RetainedRecord>>,
    sessions: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    async fn store_retained(&self, record: RetainedRecord) -> Result<()> {
        self.retained
            .write()
            .await
            .insert(record.topic.clone(), record);
        Ok(())
    }

    async fn remove_retained(&self, topic: &str) -> Result<()> {
        self.retained.write().await.remove(topic);
        Ok(())
    }

    async fn load_retained(&self) -> Result<Vec<RetainedRecord>> {
        Ok(self.retained.read().await.values().cloned().collect())
    }

    async fn store_session(&self, client_id: &str, blob: Vec<u8>) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(client_id.to_string(), blob);
        Ok(())
    }

    async fn load_session(&self, client_id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.sessions.read().await.get(client_id).cloned())
    }

    async fn load_all_sessions(&self) -> Result<Vec<(String, Vec<u8>)>> {
        Ok(self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, blob)| (id.clone(), blob.clone()))
            .collect())
    }

    async fn remove_session(&self, client_id: &str) -> Result<()> {
        self.sessions.write().await.remove(client_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqtt_endpoint_core::types::QoS;

    #[tokio::test]
    async fn test_retained_round_trip() {
        let backend = MemoryBackend::new();
        backend
            .store_retained(RetainedRecord {
                topic: "a/b".to_string(),
                payload: b"x".to_vec(),
                qos: QoS::AtLeastOnce,
                message_expiry_interval: None,
            })
            .await
            .unwrap();

        let loaded = backend.load_retained().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].topic, "a/b");

        backend.remove_retained("a/b").await.unwrap();
        assert!(backend.load_retained().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_session_blobs_keyed_by_client_id() {
        let backend = MemoryBackend::new();
        backend.store_session("c1", b"blob1".to_vec()).await.unwrap();
        backend.store_session("c2", b"blob2".to_vec()).await.unwrap();

        assert_eq!(
            backend.load_session("c1").await.unwrap().as_deref(),
            Some(&b"blob1"[..])
        );
        assert_eq!(backend.load_all_sessions().await.unwrap().len(), 2);

        backend.remove_session("c1").await.unwrap();
        assert!(backend.load_session("c1").await.unwrap().is_none());
    }
}
