//! Per-session protocol state: the in-flight store driving QoS 1/2
//! retransmission, the received-QoS 2 dedup set, the subscription map and
//! the offline delivery queue. Pure data, owned by whoever drives the
//! connection; a serializable snapshot feeds the pluggable persistence
//! interface.

pub mod topic_alias;

use crate::error::{MqttError, Result};
use crate::types::{QoS, SubscribeOptions, WillMessage};
use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};

/// Which acknowledgement completes an in-flight entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ExpectedAck {
    PubAck,
    PubRec,
    PubComp,
}

/// One sent-but-unacknowledged PUBLISH or PUBREL, kept as the exact bytes
/// that went on the wire so resumption can replay them.
#[derive(Debug, Clone)]
pub struct InFlightEntry {
    pub packet_id: u32,
    pub expected: ExpectedAck,
    pub bytes: Bytes,
    pub is_pubrel: bool,
}

/// A message queued for a session with no live connection.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QueuedPublish {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
    pub subscription_identifier: Option<u32>,
}

pub const DEFAULT_QUEUE_LIMIT: usize = 1_024;

#[derive(Debug)]
pub struct SessionState {
    pub client_id: String,
    pub clean_start: bool,
    pub will: Option<WillMessage>,
    pub session_expiry_interval: Option<u32>,
    pub subscriptions: HashMap<String, SubscribeOptions>,
    in_flight: Vec<InFlightEntry>,
    received_qos2: HashSet<u32>,
    queued: VecDeque<QueuedPublish>,
    queue_limit: usize,
}

impl SessionState {
    #[must_use]
    pub fn new(client_id: impl Into<String>, clean_start: bool) -> Self {
        Self {
            client_id: client_id.into(),
            clean_start,
            will: None,
            session_expiry_interval: None,
            subscriptions: HashMap::new(),
            in_flight: Vec::new(),
            received_qos2: HashSet::new(),
            queued: VecDeque::new(),
            queue_limit: DEFAULT_QUEUE_LIMIT,
        }
    }

    pub fn set_queue_limit(&mut self, limit: usize) {
        self.queue_limit = limit;
    }

    // --- in-flight (sent, awaiting acknowledgement) ---

    /// Records a sent packet. The id must not already be in flight.
    pub fn track_in_flight(&mut self, entry: InFlightEntry) -> Result<()> {
        if self.has_in_flight(entry.packet_id) {
            return Err(MqttError::PacketIdInUse(entry.packet_id));
        }
        self.in_flight.push(entry);
        Ok(())
    }

    #[must_use]
    pub fn has_in_flight(&self, packet_id: u32) -> bool {
        self.in_flight.iter().any(|e| e.packet_id == packet_id)
    }

    #[must_use]
    pub fn in_flight_expecting(&self, packet_id: u32) -> Option<ExpectedAck> {
        self.in_flight
            .iter()
            .find(|e| e.packet_id == packet_id)
            .map(|e| e.expected)
    }

    #[must_use]
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Removes the entry for `packet_id` if it is waiting on `expected`.
    pub fn complete_in_flight(
        &mut self,
        packet_id: u32,
        expected: ExpectedAck,
    ) -> Option<InFlightEntry> {
        let index = self
            .in_flight
            .iter()
            .position(|e| e.packet_id == packet_id && e.expected == expected)?;
        Some(self.in_flight.remove(index))
    }

    /// QoS 2 advance: swaps the stored PUBLISH for its PUBREL, preserving
    /// the entry's position in send order.
    pub fn advance_to_pubrel(&mut self, packet_id: u32, pubrel_bytes: Bytes) -> Result<()> {
        let entry = self
            .in_flight
            .iter_mut()
            .find(|e| e.packet_id == packet_id && e.expected == ExpectedAck::PubRec)
            .ok_or(MqttError::PacketIdNotFound(packet_id))?;
        entry.expected = ExpectedAck::PubComp;
        entry.bytes = pubrel_bytes;
        entry.is_pubrel = true;
        Ok(())
    }

    /// Wire images to replay after session resumption, in original send
    /// order: PUBLISHes with DUP set, PUBRELs byte-identical.
    #[must_use]
    pub fn packets_for_resend(&self) -> Vec<Bytes> {
        self.in_flight
            .iter()
            .map(|entry| {
                if entry.is_pubrel {
                    entry.bytes.clone()
                } else {
                    let mut bytes = entry.bytes.to_vec();
                    if let Some(first) = bytes.first_mut() {
                        *first |= 0x08;
                    }
                    Bytes::from(bytes)
                }
            })
            .collect()
    }

    /// Ids of every in-flight entry, in send order.
    #[must_use]
    pub fn in_flight_ids(&self) -> Vec<u32> {
        self.in_flight.iter().map(|e| e.packet_id).collect()
    }

    // --- received QoS 2 dedup ---

    /// Returns false when the id was already recorded (a duplicate).
    pub fn record_received_qos2(&mut self, packet_id: u32) -> bool {
        self.received_qos2.insert(packet_id)
    }

    #[must_use]
    pub fn has_received_qos2(&self, packet_id: u32) -> bool {
        self.received_qos2.contains(&packet_id)
    }

    pub fn release_received_qos2(&mut self, packet_id: u32) -> bool {
        self.received_qos2.remove(&packet_id)
    }

    // --- offline queue ---

    pub fn queue_publish(&mut self, publish: QueuedPublish) -> Result<()> {
        if self.queued.len() >= self.queue_limit {
            return Err(MqttError::QueueFull);
        }
        self.queued.push_back(publish);
        Ok(())
    }

    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    pub fn drain_queued(&mut self) -> Vec<QueuedPublish> {
        self.queued.drain(..).collect()
    }

    // --- subscriptions ---

    /// Returns true when the filter was not previously subscribed.
    pub fn add_subscription(&mut self, filter: impl Into<String>, options: SubscribeOptions) -> bool {
        self.subscriptions.insert(filter.into(), options).is_none()
    }

    pub fn remove_subscription(&mut self, filter: &str) -> bool {
        self.subscriptions.remove(filter).is_some()
    }

    // --- lifecycle ---

    /// Wipes everything a clean start discards, keeping identity.
    pub fn reset(&mut self) {
        self.subscriptions.clear();
        self.in_flight.clear();
        self.received_qos2.clear();
        self.queued.clear();
        self.will = None;
        self.session_expiry_interval = None;
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            client_id: self.client_id.clone(),
            session_expiry_interval: self.session_expiry_interval,
            subscriptions: self.subscriptions.clone(),
            in_flight: self
                .in_flight
                .iter()
                .map(|e| InFlightSnapshot {
                    packet_id: e.packet_id,
                    expected: e.expected,
                    bytes: e.bytes.to_vec(),
                    is_pubrel: e.is_pubrel,
                })
                .collect(),
            received_qos2: self.received_qos2.iter().copied().collect(),
            queued: self.queued.iter().cloned().collect(),
        }
    }

    #[must_use]
    pub fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        Self {
            client_id: snapshot.client_id,
            clean_start: false,
            will: None,
            session_expiry_interval: snapshot.session_expiry_interval,
            subscriptions: snapshot.subscriptions,
            in_flight: snapshot
                .in_flight
                .into_iter()
                .map(|e| InFlightEntry {
                    packet_id: e.packet_id,
                    expected: e.expected,
                    bytes: Bytes::from(e.bytes),
                    is_pubrel: e.is_pubrel,
                })
                .collect(),
            received_qos2: snapshot.received_qos2.into_iter().collect(),
            queued: snapshot.queued.into_iter().collect(),
            queue_limit: DEFAULT_QUEUE_LIMIT,
        }
    }
}

/// Serializable session image for the persistence interface. Backends treat
/// it as an opaque blob keyed by client id.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionSnapshot {
    pub client_id: String,
    pub session_expiry_interval: Option<u32>,
    pub subscriptions: HashMap<String, SubscribeOptions>,
    pub in_flight: Vec<InFlightSnapshot>,
    pub received_qos2: Vec<u32>,
    pub queued: Vec<QueuedPublish>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InFlightSnapshot {
    pub packet_id: u32,
    pub expected: ExpectedAck,
    pub bytes: Vec<u8>,
    pub is_pubrel: bool,
}
