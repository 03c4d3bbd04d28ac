//! The broker-side session registry.
//!
//! Sessions are owned here; a connection holds an `Arc` lease for its
//! lifetime. Lookup and takeover are one atomic operation under a single
//! lock: adopting a session signals the previous holder (which must then
//! drop with SESSION_TAKEN_OVER), so at most one live connection references
//! a session at any instant.

use crate::error::{MqttError, Result};
use mqtt_endpoint_core::session::{QueuedPublish, SessionSnapshot, SessionState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info};

struct StoredSession {
    session: Arc<Mutex<SessionState>>,
    /// Signals the endpoint currently attached, if any.
    takeover_tx: Option<oneshot::Sender<()>>,
    /// Set while no endpoint is attached; drives expiry.
    disconnected_at: Option<Instant>,
    /// v5 session expiry in seconds. `None` persists until clean start
    /// (the v3.1.1 behavior); `Some(0)` dies with the connection.
    expiry_seconds: Option<u32>,
    /// Which attachment currently owns the session. A detach from a stale
    /// epoch (a connection that lost a takeover race) is a no-op.
    epoch: u64,
}

impl StoredSession {
    fn is_expired(&self, now: Instant) -> bool {
        match (self.disconnected_at, self.expiry_seconds) {
            (Some(at), Some(secs)) => now >= at + Duration::from_secs(u64::from(secs)),
            _ => false,
        }
    }
}

/// Outcome of adopting a session at CONNECT time.
pub struct SessionLease {
    pub session: Arc<Mutex<SessionState>>,
    /// Mirrors CONNACK session-present.
    pub was_present: bool,
    /// Fires when a later connection takes the session over.
    pub takeover: oneshot::Receiver<()>,
    /// Attachment identity; pass back to [`SessionStore::detach`].
    pub epoch: u64,
}

#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, StoredSession>>,
    next_epoch: std::sync::atomic::AtomicU64,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopts or creates the session for `client_id`. Signals takeover to
    /// any endpoint currently holding it; the whole operation runs under
    /// the store lock.
    pub fn get_or_create(
        &self,
        client_id: &str,
        clean_start: bool,
        expiry_seconds: Option<u32>,
    ) -> SessionLease {
        let mut sessions = self.sessions.lock();
        let now = Instant::now();

        let mut was_present = false;
        let entry = sessions.remove(client_id);
        let session = match entry {
            Some(mut stored) => {
                if let Some(tx) = stored.takeover_tx.take() {
                    info!(client_id, "session takeover");
                    let _ = tx.send(());
                }
                if clean_start || stored.is_expired(now) {
                    debug!(client_id, clean_start, "discarding prior session state");
                    stored.session.lock().reset();
                } else {
                    was_present = true;
                }
                stored.session
            }
            None => Arc::new(Mutex::new(SessionState::new(client_id, clean_start))),
        };

        {
            let mut state = session.lock();
            state.clean_start = clean_start;
            state.session_expiry_interval = expiry_seconds;
        }

        let epoch = self
            .next_epoch
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let (takeover_tx, takeover) = oneshot::channel();
        sessions.insert(
            client_id.to_string(),
            StoredSession {
                session: Arc::clone(&session),
                takeover_tx: Some(takeover_tx),
                disconnected_at: None,
                expiry_seconds,
                epoch,
            },
        );

        SessionLease {
            session,
            was_present,
            takeover,
            epoch,
        }
    }

    /// True while `epoch` is still the session's live attachment.
    #[must_use]
    pub fn is_current(&self, client_id: &str, epoch: u64) -> bool {
        self.sessions
            .lock()
            .get(client_id)
            .is_some_and(|stored| stored.epoch == epoch)
    }

    /// Releases a connection's hold. With expiry 0 (or v3.1.1 clean start)
    /// the session is destroyed; otherwise the expiry clock starts. A
    /// detach from a superseded attachment is ignored.
    pub fn detach(&self, client_id: &str, epoch: u64) {
        let mut sessions = self.sessions.lock();
        let Some(stored) = sessions.get_mut(client_id) else {
            return;
        };
        if stored.epoch != epoch {
            return;
        }
        stored.takeover_tx = None;

        let destroy = {
            let state = stored.session.lock();
            match state.session_expiry_interval {
                Some(0) => true,
                Some(_) => false,
                None => state.clean_start,
            }
        };
        if destroy {
            debug!(client_id, "destroying session on detach");
            sessions.remove(client_id);
        } else {
            stored.disconnected_at = Some(Instant::now());
        }
    }

    /// Explicit eviction.
    pub fn remove(&self, client_id: &str) -> Result<()> {
        self.sessions.lock().remove(client_id);
        Ok(())
    }

    /// Queues a publish for a session whose client is offline.
    pub fn queue_publish(&self, client_id: &str, publish: QueuedPublish) -> Result<()> {
        let sessions = self.sessions.lock();
        let Some(stored) = sessions.get(client_id) else {
            return Err(MqttError::SessionExpired);
        };
        let result = stored.session.lock().queue_publish(publish);
        result
    }

    /// Serializable images of every stored session, for the pluggable
    /// persistence collaborator (keyed by client id, opaque blob).
    #[must_use]
    pub fn snapshot_all(&self) -> Vec<(String, SessionSnapshot)> {
        self.sessions
            .lock()
            .iter()
            .map(|(client_id, stored)| (client_id.clone(), stored.session.lock().snapshot()))
            .collect()
    }

    /// Re-seeds a detached session from a persisted snapshot. Ignored when
    /// a live entry already exists for the client id.
    pub fn restore(&self, snapshot: SessionSnapshot) {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(&snapshot.client_id) {
            return;
        }
        let expiry_seconds = snapshot.session_expiry_interval;
        let client_id = snapshot.client_id.clone();
        let session = SessionState::from_snapshot(snapshot);
        let epoch = self
            .next_epoch
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        sessions.insert(
            client_id,
            StoredSession {
                session: Arc::new(Mutex::new(session)),
                takeover_tx: None,
                disconnected_at: Some(Instant::now()),
                expiry_seconds,
                epoch,
            },
        );
    }

    /// Drops every detached session whose expiry elapsed; returns how many.
    pub fn expire_sweep(&self, now: Instant) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|client_id, stored| {
            let keep = !stored.is_expired(now);
            if !keep {
                debug!(client_id, "session expired");
            }
            keep
        });
        before - sessions.len()
    }

    #[must_use]
    pub fn contains(&self, client_id: &str) -> bool {
        self.sessions.lock().contains_key(client_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
