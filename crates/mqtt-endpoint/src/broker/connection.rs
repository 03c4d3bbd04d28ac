//! Server-side connection: the endpoint state machine in its server role.
//!
//! Mirrors the client driver's single-task discipline: one reader task
//! feeds packets in, one actor task owns the writer, the adopted session
//! and all timers. CONNECT must be the first inbound packet; after the
//! CONNACK the loop multiplexes client packets, router fan-out deliveries,
//! the session-takeover signal and the keep-alive deadline.

use crate::broker::BrokerCore;
use crate::error::{MqttError, Result};
use crate::session_store::SessionLease;
use crate::transport::{ByteWriter, FrameReader, FrameWriter, Transport};
use bytes::{Bytes, BytesMut};
use mqtt_endpoint_core::keepalive::KeepaliveConfig;
use mqtt_endpoint_core::packet::{
    Codec, ConnAckPacket, ConnectPacket, DisconnectPacket, Packet, PingRespPacket, PubAckPacket,
    PubCompPacket, PubRecPacket, PubRelPacket, PublishPacket, SubAckPacket, SubAckReasonCode,
    SubscribePacket, UnsubAckPacket, UnsubscribePacket,
};
use mqtt_endpoint_core::qos2::{self, QoS2Action};
use mqtt_endpoint_core::session::topic_alias::InboundAliases;
use mqtt_endpoint_core::session::{ExpectedAck, InFlightEntry, SessionState};
use mqtt_endpoint_core::types::{ProtocolVersion, QoS, ReasonCode, RetainHandling};
use mqtt_endpoint_core::validation::{validate_topic_filter, validate_topic_name};
use mqtt_endpoint_core::PacketIdAllocator;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Drives one accepted transport to completion.
pub(crate) async fn serve<T: Transport>(transport: T, core: Arc<BrokerCore>) {
    match run(transport, core).await {
        Ok(()) => {}
        Err(e) if e.is_normal_disconnect() => debug!("connection closed: {e}"),
        Err(e) => debug!("connection ended: {e}"),
    }
}

async fn run<T: Transport>(mut transport: T, core: Arc<BrokerCore>) -> Result<()> {
    transport.connect().await?;
    let (reader, writer) = transport.into_split()?;

    let mut frame_reader = FrameReader::new(reader);
    if let Some(max) = core.config.maximum_packet_size {
        frame_reader.set_max_packet_size(max as usize);
    }
    let mut frame_writer = FrameWriter::new(writer);

    // CONNECT is the first packet in either direction; CONNECT decoding
    // does not depend on the (not yet negotiated) codec version.
    let provisional = Codec::new(ProtocolVersion::V5, core.config.id_width);
    let connect = match tokio::time::timeout(
        core.config.connect_timeout,
        frame_reader.read_packet(provisional),
    )
    .await
    {
        Err(_) => return Err(MqttError::Timeout),
        Ok(Err(e)) => return Err(e),
        Ok(Ok(Packet::Connect(connect))) => connect,
        Ok(Ok(other)) => {
            return Err(MqttError::ProtocolError(format!(
                "first packet was {:?}, expected CONNECT",
                other.packet_type()
            )))
        }
    };

    let codec = Codec::new(connect.protocol_version, core.config.id_width);

    match negotiate(&connect, &core, codec, &mut frame_writer).await? {
        Negotiated::Rejected => Ok(()),
        Negotiated::Accepted { client_id, lease } => {
            let connection = Connection::start(
                frame_writer,
                codec,
                core,
                client_id,
                lease,
                &connect,
            )
            .await?;
            connection.run(frame_reader).await
        }
    }
}

enum Negotiated {
    Rejected,
    Accepted {
        client_id: String,
        lease: SessionLease,
    },
}

async fn negotiate<W: ByteWriter>(
    connect: &ConnectPacket,
    core: &Arc<BrokerCore>,
    codec: Codec,
    writer: &mut FrameWriter<W>,
) -> Result<Negotiated> {
    let mut assigned = false;
    let client_id = if connect.client_id.is_empty() {
        if codec.version == ProtocolVersion::V311 && !connect.clean_start {
            let reject = ConnAckPacket::rejected(ReasonCode::ClientIdentifierNotValid);
            writer.write_packet(&Packet::ConnAck(reject), codec).await?;
            writer.close().await?;
            return Ok(Negotiated::Rejected);
        }
        assigned = true;
        format!("auto-{:016x}", rand::random::<u64>())
    } else {
        connect.client_id.clone()
    };

    if let Some(hook) = &core.auth {
        let verdict = hook(
            &client_id,
            connect.username.as_deref(),
            connect.password.as_deref(),
        );
        if verdict != ReasonCode::Success {
            info!(%client_id, reason = ?verdict, "CONNECT rejected by auth hook");
            let reject = ConnAckPacket::rejected(verdict);
            writer.write_packet(&Packet::ConnAck(reject), codec).await?;
            writer.close().await?;
            return Ok(Negotiated::Rejected);
        }
    }

    let expiry = if codec.is_v5() {
        Some(connect.session_expiry_interval().unwrap_or(0))
    } else {
        None
    };
    let lease = core.sessions.get_or_create(&client_id, connect.clean_start, expiry);
    core.router.cancel_will(&client_id);

    let mut connack = ConnAckPacket::accepted(lease.was_present);
    if codec.is_v5() {
        let props = &mut connack.properties;
        props.set_maximum_qos(core.config.maximum_qos as u8);
        if let Some(keep_alive) = core.config.server_keep_alive {
            props.set_server_keep_alive(keep_alive);
        }
        if let Some(maximum) = core.config.receive_maximum {
            props.set_receive_maximum(maximum);
        }
        if let Some(size) = core.config.maximum_packet_size {
            props.set_maximum_packet_size(size);
        }
        if core.config.topic_alias_maximum > 0 {
            props.set_topic_alias_maximum(core.config.topic_alias_maximum);
        }
        props.set_shared_subscription_available(core.config.shared_subscriptions_available);
        if assigned {
            props.set_assigned_client_identifier(client_id.clone());
        }
    }
    writer.write_packet(&Packet::ConnAck(connack), codec).await?;
    info!(
        %client_id,
        version = ?codec.version,
        session_present = lease.was_present,
        "client connected"
    );

    Ok(Negotiated::Accepted { client_id, lease })
}

enum Event {
    Inbound(Result<Packet>),
    Deliver(PublishPacket),
    TakenOver { evicted: bool },
    KeepAliveDue,
    Closed,
}

enum Shutdown {
    /// Clean DISCONNECT from the client; will fires only if the v5 reason
    /// asked for it.
    Graceful { publish_will: bool },
    /// Transport failure, protocol error or keep-alive timeout.
    Abnormal(MqttError),
    /// Another connection adopted the session; nothing here is ours to
    /// clean up.
    TakenOver,
    /// Session explicitly evicted from the store.
    Evicted,
}

struct Connection<W> {
    writer: FrameWriter<W>,
    codec: Codec,
    core: Arc<BrokerCore>,
    client_id: String,
    session: Arc<Mutex<SessionState>>,
    allocator: PacketIdAllocator,
    keep_alive: Duration,
    keepalive_config: KeepaliveConfig,
    last_inbound: Instant,
    client_receive_maximum: u16,
    inbound_quota_used: u16,
    inbound_aliases: InboundAliases,
    pending_window: VecDeque<PublishPacket>,
    delivery_rx: flume::Receiver<PublishPacket>,
    takeover: tokio::sync::oneshot::Receiver<()>,
    /// Attachment identity from the session store; guards teardown against
    /// a racing takeover.
    epoch: u64,
}

impl<W: ByteWriter> Connection<W> {
    async fn start(
        mut writer: FrameWriter<W>,
        codec: Codec,
        core: Arc<BrokerCore>,
        client_id: String,
        lease: SessionLease,
        connect: &ConnectPacket,
    ) -> Result<Self> {
        let session = lease.session;
        let was_present = lease.was_present;

        let keep_alive = Duration::from_secs(u64::from(
            core.config.server_keep_alive.unwrap_or(connect.keep_alive),
        ));
        let client_receive_maximum = connect
            .properties
            .get_receive_maximum()
            .unwrap_or(u16::MAX);
        if let Some(size) = connect.properties.get_maximum_packet_size() {
            writer.set_max_packet_size(size as usize);
        }

        let mut allocator = PacketIdAllocator::new(codec.id_width);
        {
            let mut state = session.lock();
            state.will = connect.will.clone();
            state.set_queue_limit(core.config.offline_queue_limit);
            for id in state.in_flight_ids() {
                allocator.claim(id)?;
            }
        }

        let (delivery_tx, delivery_rx) = flume::bounded(core.config.fanout_queue_capacity);
        core.router.register_client(&client_id, delivery_tx).await;

        // The broker advertised its inbound alias space in CONNACK.
        let alias_maximum = if codec.is_v5() {
            core.config.topic_alias_maximum
        } else {
            0
        };

        let mut connection = Self {
            writer,
            codec,
            core,
            client_id,
            session,
            allocator,
            keep_alive,
            keepalive_config: KeepaliveConfig::default(),
            last_inbound: Instant::now(),
            client_receive_maximum,
            inbound_quota_used: 0,
            inbound_aliases: InboundAliases::new(alias_maximum),
            pending_window: VecDeque::new(),
            delivery_rx,
            takeover: lease.takeover,
            epoch: lease.epoch,
        };

        if was_present {
            // Resume: restore the index, replay in-flight frames (DUP on
            // PUBLISHes, PUBRELs verbatim, original order), then drain the
            // offline queue.
            let (subscriptions, resend, queued) = {
                let mut state = connection.session.lock();
                (
                    state.subscriptions.clone(),
                    state.packets_for_resend(),
                    state.drain_queued(),
                )
            };
            connection
                .core
                .router
                .restore_subscriptions(
                    &connection.client_id,
                    &subscriptions,
                    codec.version,
                )
                .await;
            for frame in resend {
                connection.writer.write_raw(&frame).await?;
            }
            for queued in queued {
                let mut publish =
                    PublishPacket::new(queued.topic, queued.payload, queued.qos)
                        .with_retain(queued.retain);
                if let Some(id) = queued.subscription_identifier {
                    publish.properties.set_subscription_identifier(id);
                }
                connection.deliver_to_client(publish).await?;
            }
        }

        Ok(connection)
    }

    async fn run<R>(mut self, mut frame_reader: FrameReader<R>) -> Result<()>
    where
        R: crate::transport::ByteReader + 'static,
    {
        let codec = self.codec;
        let (inbound_tx, inbound_rx) = flume::bounded::<Result<Packet>>(8);
        let reader_task = tokio::spawn(async move {
            loop {
                let packet = frame_reader.read_packet(codec).await;
                let failed = packet.is_err();
                if inbound_tx.send_async(packet).await.is_err() || failed {
                    break;
                }
            }
        });

        let shutdown = self.event_loop(&inbound_rx).await;
        reader_task.abort();
        self.finish(shutdown).await
    }

    async fn event_loop(&mut self, inbound_rx: &flume::Receiver<Result<Packet>>) -> Shutdown {
        loop {
            let deadline = if self.keep_alive.is_zero() {
                None
            } else {
                Some(self.last_inbound + self.keepalive_config.timeout_duration(self.keep_alive))
            };

            let event = {
                let timer = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                };
                tokio::select! {
                    packet = inbound_rx.recv_async() => {
                        packet.map_or(Event::Closed, Event::Inbound)
                    }
                    publish = self.delivery_rx.recv_async() => {
                        publish.map_or(Event::Closed, Event::Deliver)
                    }
                    result = &mut self.takeover => Event::TakenOver {
                        evicted: result.is_err(),
                    },
                    () = timer => Event::KeepAliveDue,
                }
            };

            match event {
                Event::Inbound(Ok(packet)) => {
                    self.last_inbound = Instant::now();
                    match self.handle_inbound(packet).await {
                        Ok(None) => {}
                        Ok(Some(shutdown)) => return shutdown,
                        Err(e) => return Shutdown::Abnormal(e),
                    }
                }
                Event::Inbound(Err(e)) => return Shutdown::Abnormal(e),
                Event::Deliver(publish) => {
                    if let Err(e) = self.deliver_to_client(publish).await {
                        return Shutdown::Abnormal(e);
                    }
                }
                Event::TakenOver { evicted } => {
                    return if evicted {
                        Shutdown::Evicted
                    } else {
                        Shutdown::TakenOver
                    };
                }
                Event::KeepAliveDue => {
                    warn!(client_id = %self.client_id, "keep-alive timeout");
                    return Shutdown::Abnormal(MqttError::KeepAliveTimeout);
                }
                Event::Closed => {
                    return Shutdown::Abnormal(MqttError::ConnectionClosedByPeer);
                }
            }
        }
    }

    async fn finish(mut self, shutdown: Shutdown) -> Result<()> {
        match shutdown {
            Shutdown::TakenOver => {
                debug!(client_id = %self.client_id, "closing after takeover");
                if self.codec.is_v5() {
                    let packet = Packet::Disconnect(DisconnectPacket::with_reason(
                        ReasonCode::SessionTakenOver,
                    ));
                    let _ = self.send_bounded(&packet).await;
                }
                let _ = self.writer.close().await;
                // The session, its subscriptions and the router registration
                // now belong to the adopting connection.
                Ok(())
            }
            Shutdown::Graceful { publish_will } => {
                self.teardown(publish_will).await;
                let _ = self.writer.close().await;
                Ok(())
            }
            Shutdown::Evicted => {
                if self.codec.is_v5() {
                    let packet = Packet::Disconnect(DisconnectPacket::with_reason(
                        ReasonCode::AdministrativeAction,
                    ));
                    let _ = self.send_bounded(&packet).await;
                }
                let _ = self.writer.close().await;
                self.core.router.unregister_client(&self.client_id).await;
                Ok(())
            }
            Shutdown::Abnormal(e) => {
                if self.codec.is_v5() {
                    if let Some(reason) = e.disconnect_reason() {
                        let packet =
                            Packet::Disconnect(DisconnectPacket::with_reason(reason));
                        let _ = self.send_bounded(&packet).await;
                    }
                }
                let _ = self.writer.close().await;
                self.teardown(true).await;
                Err(e)
            }
        }
    }

    /// Best-effort farewell write that cannot hang shutdown.
    async fn send_bounded(&mut self, packet: &Packet) -> Result<()> {
        let codec = self.codec;
        match tokio::time::timeout(
            Duration::from_secs(1),
            self.writer.write_packet(packet, codec),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(MqttError::Timeout),
        }
    }

    async fn teardown(&mut self, publish_will: bool) {
        if !self.core.sessions.is_current(&self.client_id, self.epoch) {
            // A newer connection adopted the session between our failure
            // and this cleanup; everything here belongs to it now.
            debug!(client_id = %self.client_id, "skipping teardown after takeover race");
            return;
        }

        let destroy = {
            let state = self.session.lock();
            match state.session_expiry_interval {
                Some(0) => true,
                Some(_) => false,
                None => state.clean_start,
            }
        };

        if destroy {
            self.core.router.unregister_client(&self.client_id).await;
        } else {
            self.core.router.disconnect_client(&self.client_id).await;
        }

        let will = if publish_will {
            self.session.lock().will.take()
        } else {
            self.session.lock().will.take();
            None
        };
        if let Some(will) = will {
            self.core.router.schedule_will(&self.client_id, will);
        }

        self.core.sessions.detach(&self.client_id, self.epoch);
        info!(client_id = %self.client_id, destroyed = destroy, "client detached");
    }

    async fn handle_inbound(&mut self, packet: Packet) -> Result<Option<Shutdown>> {
        trace!(client_id = %self.client_id, packet_type = ?packet.packet_type(), "inbound");
        match packet {
            Packet::Publish(publish) => {
                self.handle_publish(publish).await?;
                Ok(None)
            }
            Packet::PubAck(ack) => {
                self.handle_puback(ack).await?;
                Ok(None)
            }
            Packet::PubRec(rec) => {
                self.handle_pubrec(rec).await?;
                Ok(None)
            }
            Packet::PubRel(rel) => {
                self.handle_pubrel(rel).await?;
                Ok(None)
            }
            Packet::PubComp(comp) => {
                self.handle_pubcomp(comp).await?;
                Ok(None)
            }
            Packet::Subscribe(subscribe) => {
                self.handle_subscribe(subscribe).await?;
                Ok(None)
            }
            Packet::Unsubscribe(unsubscribe) => {
                self.handle_unsubscribe(unsubscribe).await?;
                Ok(None)
            }
            Packet::PingReq(_) => {
                self.send(&Packet::PingResp(PingRespPacket)).await?;
                Ok(None)
            }
            Packet::Disconnect(disconnect) => {
                debug!(
                    client_id = %self.client_id,
                    reason = ?disconnect.reason_code,
                    "client disconnecting"
                );
                Ok(Some(Shutdown::Graceful {
                    publish_will: disconnect.triggers_will(),
                }))
            }
            Packet::Auth(auth) => {
                // Enhanced auth mechanisms live behind the hook; a bare
                // broker has nothing to exchange.
                debug!(reason = ?auth.reason_code, "AUTH ignored");
                Ok(None)
            }
            Packet::Connect(_) => Err(MqttError::ProtocolError(
                "second CONNECT on an established connection".to_string(),
            )),
            Packet::ConnAck(_)
            | Packet::SubAck(_)
            | Packet::UnsubAck(_)
            | Packet::PingResp(_) => Err(MqttError::ProtocolError(format!(
                "unexpected {:?} from a client",
                packet.packet_type()
            ))),
        }
    }

    async fn handle_publish(&mut self, mut publish: PublishPacket) -> Result<()> {
        if self.codec.is_v5() {
            let alias = publish.properties.get_topic_alias();
            publish.topic_name = self
                .inbound_aliases
                .resolve(&publish.topic_name, alias)?;
        }
        validate_topic_name(&publish.topic_name)?;

        if (publish.qos as u8) > (self.core.config.maximum_qos as u8) {
            return Err(MqttError::ProtocolError(format!(
                "QoS {} exceeds the negotiated maximum",
                publish.qos as u8
            )));
        }

        match publish.qos {
            QoS::AtMostOnce => {
                self.route(&publish).await;
            }
            QoS::AtLeastOnce => {
                let packet_id = publish
                    .packet_id
                    .ok_or_else(|| MqttError::MalformedPacket("QoS 1 without id".to_string()))?;
                self.charge_inbound_quota()?;
                self.route(&publish).await;
                self.release_inbound_quota();
                self.send(&Packet::PubAck(PubAckPacket::new(packet_id)))
                    .await?;
            }
            QoS::ExactlyOnce => {
                let packet_id = publish
                    .packet_id
                    .ok_or_else(|| MqttError::MalformedPacket("QoS 2 without id".to_string()))?;
                let is_duplicate = self.session.lock().has_received_qos2(packet_id);
                if !is_duplicate {
                    self.charge_inbound_quota()?;
                    self.route(&publish).await;
                    self.session.lock().record_received_qos2(packet_id);
                } else {
                    trace!(packet_id, "duplicate QoS 2 publish, ack only");
                }
                self.send(&Packet::PubRec(PubRecPacket::new(packet_id)))
                    .await?;
            }
        }
        Ok(())
    }

    async fn route(&self, publish: &PublishPacket) {
        self.core.router.route(publish, Some(&self.client_id)).await;
    }

    async fn handle_pubrel(&mut self, rel: PubRelPacket) -> Result<()> {
        let has_pending = self.session.lock().has_received_qos2(rel.packet_id);
        for action in qos2::handle_incoming_pubrel(rel.packet_id, has_pending) {
            match action {
                QoS2Action::RemoveIncomingPubRec { packet_id } => {
                    self.session.lock().release_received_qos2(packet_id);
                    self.release_inbound_quota();
                }
                QoS2Action::SendPubComp {
                    packet_id,
                    reason_code,
                } => {
                    self.send(&Packet::PubComp(PubCompPacket::new_with_reason(
                        packet_id,
                        reason_code,
                    )))
                    .await?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn handle_puback(&mut self, ack: PubAckPacket) -> Result<()> {
        if self
            .session
            .lock()
            .complete_in_flight(ack.packet_id, ExpectedAck::PubAck)
            .is_some()
        {
            self.allocator.release(ack.packet_id);
            self.pump_window().await?;
        } else {
            warn!(packet_id = ack.packet_id, "PUBACK for unknown id");
        }
        Ok(())
    }

    async fn handle_pubrec(&mut self, rec: PubRecPacket) -> Result<()> {
        let has_pending = self
            .session
            .lock()
            .in_flight_expecting(rec.packet_id)
            == Some(ExpectedAck::PubRec);
        for action in qos2::handle_incoming_pubrec(rec.packet_id, rec.reason_code, has_pending) {
            match action {
                QoS2Action::SendPubRel { packet_id } => {
                    let pubrel = Packet::PubRel(PubRelPacket::new(packet_id));
                    let frame = self.encode(&pubrel)?;
                    self.session
                        .lock()
                        .advance_to_pubrel(packet_id, frame.clone())?;
                    self.send_raw(&frame).await?;
                }
                QoS2Action::ErrorFlow { packet_id, .. } => {
                    self.session
                        .lock()
                        .complete_in_flight(packet_id, ExpectedAck::PubRec);
                    self.allocator.release(packet_id);
                    self.pump_window().await?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn handle_pubcomp(&mut self, comp: PubCompPacket) -> Result<()> {
        let has_pending = self
            .session
            .lock()
            .in_flight_expecting(comp.packet_id)
            == Some(ExpectedAck::PubComp);
        for action in
            qos2::handle_incoming_pubcomp(comp.packet_id, comp.reason_code, has_pending)
        {
            match action {
                QoS2Action::RemoveOutgoingPubRel { packet_id } => {
                    self.session
                        .lock()
                        .complete_in_flight(packet_id, ExpectedAck::PubComp);
                    self.allocator.release(packet_id);
                }
                QoS2Action::CompleteFlow { .. } | QoS2Action::ErrorFlow { .. } => {
                    self.pump_window().await?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn handle_subscribe(&mut self, subscribe: SubscribePacket) -> Result<()> {
        let subscription_identifier = subscribe.subscription_identifier();
        let mut reason_codes = Vec::with_capacity(subscribe.filters.len());
        let mut granted_filters = Vec::new();

        for entry in &subscribe.filters {
            let code = if validate_topic_filter(&entry.filter).is_err() {
                SubAckReasonCode::TopicFilterInvalid
            } else if entry.filter.starts_with("$share/")
                && !self.core.config.shared_subscriptions_available
            {
                SubAckReasonCode::SharedSubscriptionsNotSupported
            } else {
                let granted_qos = entry.options.qos.min(self.core.config.maximum_qos);
                let mut options = entry
                    .options
                    .into_subscribe_options(subscription_identifier);
                options.qos = granted_qos;

                // The session's subscription map is the authority for
                // retain-handling "send if new".
                let is_new = self
                    .session
                    .lock()
                    .add_subscription(entry.filter.clone(), options);
                self.core
                    .router
                    .subscribe(&self.client_id, &entry.filter, options, self.codec.version)
                    .await?;

                granted_filters.push((entry.filter.clone(), options, is_new));
                SubAckReasonCode::granted(granted_qos)
            };
            reason_codes.push(code);
        }

        self.send(&Packet::SubAck(SubAckPacket::new(
            subscribe.packet_id,
            reason_codes,
        )))
        .await?;

        // Retained delivery after the SUBACK, honoring retain-handling.
        for (filter, options, is_new) in granted_filters {
            let wanted = match options.retain_handling {
                RetainHandling::SendAtSubscribe => true,
                RetainHandling::SendIfNew => is_new,
                RetainHandling::DontSend => false,
            };
            if !wanted {
                continue;
            }
            for mut retained in self.core.router.retained_for(&filter).await {
                retained.qos = retained.qos.min(options.qos);
                if let Some(id) = options.subscription_identifier {
                    retained.properties.set_subscription_identifier(id);
                }
                self.deliver_to_client(retained).await?;
            }
        }
        Ok(())
    }

    async fn handle_unsubscribe(&mut self, unsubscribe: UnsubscribePacket) -> Result<()> {
        let mut reason_codes = Vec::with_capacity(unsubscribe.filters.len());
        for filter in &unsubscribe.filters {
            let removed = self.core.router.unsubscribe(&self.client_id, filter).await;
            self.session.lock().remove_subscription(filter);
            reason_codes.push(if removed {
                ReasonCode::Success
            } else {
                ReasonCode::NoSubscriptionExisted
            });
        }
        self.send(&Packet::UnsubAck(UnsubAckPacket::new(
            unsubscribe.packet_id,
            reason_codes,
        )))
        .await
    }

    /// Outbound delivery: allocates the server-side packet id, enforces the
    /// client's receive maximum, and tracks QoS > 0 flows in the session.
    async fn deliver_to_client(&mut self, publish: PublishPacket) -> Result<()> {
        if publish.qos != QoS::AtMostOnce
            && self.session.lock().in_flight_len() >= usize::from(self.client_receive_maximum)
        {
            trace!(client_id = %self.client_id, "client receive maximum reached, parking");
            self.pending_window.push_back(publish);
            return Ok(());
        }
        self.dispatch_delivery(publish).await
    }

    async fn dispatch_delivery(&mut self, mut publish: PublishPacket) -> Result<()> {
        if publish.qos == QoS::AtMostOnce {
            return self.send(&Packet::Publish(publish)).await;
        }

        let packet_id = self.allocator.allocate()?;
        publish.packet_id = Some(packet_id);

        let frame = self.encode(&Packet::Publish(publish.clone()))?;
        let expected = match publish.qos {
            QoS::AtLeastOnce => ExpectedAck::PubAck,
            _ => ExpectedAck::PubRec,
        };
        self.session.lock().track_in_flight(InFlightEntry {
            packet_id,
            expected,
            bytes: frame.clone(),
            is_pubrel: false,
        })?;
        self.send_raw(&frame).await
    }

    async fn pump_window(&mut self) -> Result<()> {
        while let Some(publish) = self.pending_window.pop_front() {
            if publish.qos != QoS::AtMostOnce
                && self.session.lock().in_flight_len()
                    >= usize::from(self.client_receive_maximum)
            {
                self.pending_window.push_front(publish);
                break;
            }
            self.dispatch_delivery(publish).await?;
        }
        Ok(())
    }

    async fn send(&mut self, packet: &Packet) -> Result<()> {
        self.writer.write_packet(packet, self.codec).await
    }

    async fn send_raw(&mut self, frame: &Bytes) -> Result<()> {
        self.writer.write_raw(frame).await
    }

    fn encode(&self, packet: &Packet) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        packet.encode(&mut buf, self.codec)?;
        Ok(buf.freeze())
    }

    fn charge_inbound_quota(&mut self) -> Result<()> {
        if let Some(maximum) = self.core.config.receive_maximum {
            if self.inbound_quota_used >= maximum {
                return Err(MqttError::ReceiveMaximumExceeded);
            }
            self.inbound_quota_used += 1;
        }
        Ok(())
    }

    fn release_inbound_quota(&mut self) {
        if self.core.config.receive_maximum.is_some() {
            self.inbound_quota_used = self.inbound_quota_used.saturating_sub(1);
        }
    }
}

