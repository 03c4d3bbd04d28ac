//! Subscription routing: the filter trie, the retained-message store,
//! shared-subscription groups and will scheduling. Fan-out happens here;
//! per-connection QoS bookkeeping stays with the connection that owns the
//! subscriber.

use crate::error::Result;
use crate::session_store::SessionStore;
use mqtt_endpoint_core::packet::PublishPacket;
use mqtt_endpoint_core::session::QueuedPublish;
use mqtt_endpoint_core::topic_tree::SubscriptionTree;
use mqtt_endpoint_core::types::{ProtocolVersion, QoS, SubscribeOptions, WillMessage};
use mqtt_endpoint_core::validation::parse_shared_subscription;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};

/// One subscriber entry in the index.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub client_id: String,
    /// The matching filter, `$share` prefix stripped.
    pub filter: String,
    pub options: SubscribeOptions,
    pub share_group: Option<String>,
    pub protocol_version: ProtocolVersion,
}

/// Messages travel to each connection over its fan-out channel; the
/// connection allocates packet ids and runs the QoS exchange.
pub type DeliverySender = flume::Sender<PublishPacket>;

pub struct Router {
    subscriptions: RwLock<SubscriptionTree<Subscription>>,
    retained: RwLock<HashMap<String, PublishPacket>>,
    clients: RwLock<HashMap<String, DeliverySender>>,
    share_counters: parking_lot::Mutex<HashMap<String, Arc<AtomicUsize>>>,
    pending_wills: parking_lot::Mutex<HashMap<String, tokio::task::JoinHandle<()>>>,
    sessions: Arc<SessionStore>,
}

impl Router {
    #[must_use]
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self {
            subscriptions: RwLock::new(SubscriptionTree::new()),
            retained: RwLock::new(HashMap::new()),
            clients: RwLock::new(HashMap::new()),
            share_counters: parking_lot::Mutex::new(HashMap::new()),
            pending_wills: parking_lot::Mutex::new(HashMap::new()),
            sessions: Arc::clone(&sessions),
        }
    }

    /// Attaches a connection's delivery channel, displacing any previous
    /// one (session takeover already forced its disconnect).
    pub async fn register_client(&self, client_id: &str, sender: DeliverySender) {
        let mut clients = self.clients.write().await;
        if clients.insert(client_id.to_string(), sender).is_some() {
            info!(client_id, "delivery channel replaced on takeover");
        } else {
            debug!(client_id, "client registered");
        }
    }

    /// Detaches the delivery channel but keeps subscriptions, for sessions
    /// that outlive the connection.
    pub async fn disconnect_client(&self, client_id: &str) {
        self.clients.write().await.remove(client_id);
        debug!(client_id, "client disconnected, subscriptions kept");
    }

    /// Full removal: channel and every subscription.
    pub async fn unregister_client(&self, client_id: &str) {
        self.clients.write().await.remove(client_id);
        let removed = self
            .subscriptions
            .write()
            .await
            .remove_subscriber(client_id);
        debug!(client_id, removed, "client unregistered");
    }

    /// Restores subscriptions carried by a resumed session into the index.
    pub async fn restore_subscriptions(
        &self,
        client_id: &str,
        subscriptions: &HashMap<String, SubscribeOptions>,
        protocol_version: ProtocolVersion,
    ) {
        for (filter, options) in subscriptions {
            if let Err(e) = self
                .subscribe(client_id, filter, *options, protocol_version)
                .await
            {
                warn!(client_id, filter, "failed to restore subscription: {e}");
            }
        }
    }

    /// Returns true when the filter is new for this client.
    pub async fn subscribe(
        &self,
        client_id: &str,
        filter: &str,
        options: SubscribeOptions,
        protocol_version: ProtocolVersion,
    ) -> Result<bool> {
        let (inner, share_group) = parse_shared_subscription(filter);
        let subscription = Subscription {
            client_id: client_id.to_string(),
            filter: inner.to_string(),
            options,
            share_group: share_group.map(str::to_string),
            protocol_version,
        };

        let replaced = self
            .subscriptions
            .write()
            .await
            .insert(inner, client_id, subscription);
        trace!(client_id, filter, new = replaced.is_none(), "subscribed");
        Ok(replaced.is_none())
    }

    pub async fn unsubscribe(&self, client_id: &str, filter: &str) -> bool {
        let (inner, _) = parse_shared_subscription(filter);
        let removed = self
            .subscriptions
            .write()
            .await
            .remove(inner, client_id)
            .is_some();
        trace!(client_id, filter, removed, "unsubscribed");
        removed
    }

    /// Routes one inbound PUBLISH: retained bookkeeping, then fan-out to
    /// every matching subscriber at `min(published_qos, subscribed_qos)`.
    pub async fn route(&self, publish: &PublishPacket, publisher: Option<&str>) {
        trace!(topic = %publish.topic_name, "routing publish");

        if publish.retain {
            let mut retained = self.retained.write().await;
            if publish.payload.is_empty() {
                retained.remove(&publish.topic_name);
                debug!(topic = %publish.topic_name, "retained message cleared");
            } else {
                let mut stored = publish.clone();
                stored.dup = false;
                retained.insert(publish.topic_name.clone(), stored);
                debug!(topic = %publish.topic_name, "retained message stored");
            }
        }

        let subscriptions = self.subscriptions.read().await;
        let matches = subscriptions.matches(&publish.topic_name);

        // Shared groups deliver to exactly one member; regular
        // subscriptions each get a copy.
        let mut share_groups: HashMap<String, Vec<&Subscription>> = HashMap::new();
        let mut regular: Vec<&Subscription> = Vec::new();
        for (_, subscription) in matches {
            match &subscription.share_group {
                Some(group) => share_groups
                    .entry(share_key(group, &subscription.filter))
                    .or_default()
                    .push(subscription),
                None => regular.push(subscription),
            }
        }

        let clients = self.clients.read().await;

        for subscription in regular {
            self.deliver(subscription, publish, publisher, &clients);
        }

        for (key, members) in share_groups {
            let online: Vec<&&Subscription> = members
                .iter()
                .filter(|s| clients.contains_key(&s.client_id))
                .collect();
            let chosen = if online.is_empty() {
                members.first().copied()
            } else {
                let counter = {
                    let mut counters = self.share_counters.lock();
                    Arc::clone(counters.entry(key).or_default())
                };
                let index = counter.fetch_add(1, Ordering::Relaxed) % online.len();
                Some(*online[index])
            };
            if let Some(subscription) = chosen {
                self.deliver(subscription, publish, publisher, &clients);
            }
        }
    }

    fn deliver(
        &self,
        subscription: &Subscription,
        publish: &PublishPacket,
        publisher: Option<&str>,
        clients: &HashMap<String, DeliverySender>,
    ) {
        if subscription.options.no_local && publisher == Some(subscription.client_id.as_str()) {
            trace!(client_id = %subscription.client_id, "no-local suppressed echo");
            return;
        }

        let effective_qos = publish.qos.min(subscription.options.qos);
        let mut message = publish.clone();
        message.qos = effective_qos;
        message.dup = false;
        message.packet_id = None;
        if !subscription.options.retain_as_published {
            message.retain = false;
        }
        if subscription.protocol_version == ProtocolVersion::V5 {
            if let Some(id) = subscription.options.subscription_identifier {
                message.properties.set_subscription_identifier(id);
            }
        }
        // Aliases are connection-scoped; never forward the publisher's.
        message.properties.remove(
            mqtt_endpoint_core::protocol::v5::properties::PropertyId::TopicAlias,
        );

        match clients.get(&subscription.client_id) {
            Some(sender) => {
                if let Err(e) = sender.try_send(message) {
                    warn!(
                        client_id = %subscription.client_id,
                        topic = %publish.topic_name,
                        "delivery channel full or closed"
                    );
                    if effective_qos != QoS::AtMostOnce {
                        self.queue_offline(&subscription.client_id, e.into_inner(), effective_qos);
                    }
                }
            }
            None if effective_qos != QoS::AtMostOnce => {
                self.queue_offline(&subscription.client_id, message, effective_qos);
            }
            None => {}
        }
    }

    fn queue_offline(&self, client_id: &str, message: PublishPacket, qos: QoS) {
        let queued = QueuedPublish {
            topic: message.topic_name.clone(),
            payload: message.payload.to_vec(),
            qos,
            retain: message.retain,
            subscription_identifier: message
                .properties
                .get_subscription_identifiers()
                .first()
                .copied(),
        };
        match self.sessions.queue_publish(client_id, queued) {
            Ok(()) => debug!(client_id, "queued message for offline client"),
            Err(e) => warn!(client_id, "failed to queue offline message: {e}"),
        }
    }

    /// Retained messages matching a new subscription's filter.
    pub async fn retained_for(&self, filter: &str) -> Vec<PublishPacket> {
        let (inner, _) = parse_shared_subscription(filter);
        let retained = self.retained.read().await;
        retained
            .iter()
            .filter(|(topic, _)| mqtt_endpoint_core::topic_matching::matches(topic, inner))
            .map(|(_, publish)| {
                let mut message = publish.clone();
                message.retain = true;
                message
            })
            .collect()
    }

    /// Every retained message, `$`-prefixed topics included.
    pub async fn retained_all(&self) -> Vec<PublishPacket> {
        self.retained.read().await.values().cloned().collect()
    }

    pub async fn retained_count(&self) -> usize {
        self.retained.read().await.len()
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Arms the will for delivery after its delay; a reconnect in time
    /// cancels it.
    pub fn schedule_will(self: &Arc<Self>, client_id: &str, will: WillMessage) {
        let delay = Duration::from_secs(u64::from(
            will.properties.will_delay_interval.unwrap_or(0),
        ));
        let router = Arc::clone(self);
        let id = client_id.to_string();

        info!(client_id, delay_secs = delay.as_secs(), "will armed");
        let task = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let mut publish =
                PublishPacket::new(will.topic.clone(), will.payload.clone(), will.qos)
                    .with_retain(will.retain);
            publish.properties = {
                let mut props = mqtt_endpoint_core::Properties::default();
                for (key, value) in &will.properties.user_properties {
                    props.add_user_property(key.clone(), value.clone());
                }
                if let Some(expiry) = will.properties.message_expiry_interval {
                    props.set_message_expiry_interval(expiry);
                }
                if let Some(content_type) = &will.properties.content_type {
                    props.set_content_type(content_type.clone());
                }
                props
            };
            info!(topic = %publish.topic_name, "publishing will");
            router.route(&publish, Some(&id)).await;
            router.pending_wills.lock().remove(&id);
        });

        if let Some(previous) = self
            .pending_wills
            .lock()
            .insert(client_id.to_string(), task)
        {
            previous.abort();
        }
    }

    /// Reconnect within the will delay: the pending will is dropped.
    pub fn cancel_will(&self, client_id: &str) {
        if let Some(task) = self.pending_wills.lock().remove(client_id) {
            task.abort();
            debug!(client_id, "pending will cancelled");
        }
    }
}

fn share_key(group: &str, filter: &str) -> String {
    format!("{group}\u{1f}{filter}")
}
