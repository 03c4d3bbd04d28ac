//! The per-connection protocol engine, client role.
//!
//! One endpoint owns one transport. All protocol work for the connection
//! (reads, writes, timers, handler invocations) runs on a single driver
//! task, so packet handling is totally ordered and no operation ever needs
//! a lock held across an await. A small reader task feeds decoded packets
//! into the driver; user API calls travel in over a bounded command
//! channel, which doubles as the outgoing write queue.

pub mod handlers;

pub use handlers::EndpointHandlers;

use crate::error::{MqttError, Result};
use crate::transport::{ByteWriter, FrameReader, FrameWriter, Transport};
use bytes::{Bytes, BytesMut};
use mqtt_endpoint_core::keepalive::KeepaliveConfig;
use mqtt_endpoint_core::packet::{
    Codec, ConnectPacket, DisconnectPacket, Packet, PingReqPacket, PubAckPacket, PubCompPacket,
    PubRecPacket, PubRelPacket, PublishPacket, SubscribePacket, TopicFilter, UnsubscribePacket,
};
use mqtt_endpoint_core::qos2::{self, QoS2Action};
use mqtt_endpoint_core::session::topic_alias::{AliasedTopic, InboundAliases, OutboundAliases};
use mqtt_endpoint_core::session::{ExpectedAck, InFlightEntry, SessionSnapshot, SessionState};
use mqtt_endpoint_core::types::{
    ConnectOptions, ConnectResult, PublishOptions, PublishResult, QoS, ReasonCode,
    SubscribeOptions,
};
use mqtt_endpoint_core::validation::{validate_topic_filter, validate_topic_name};
use mqtt_endpoint_core::{IdWidth, PacketIdAllocator};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

const ABORT_NONE: u8 = 0;
const ABORT_DISCONNECT_TIMEOUT: u8 = 1;
const ABORT_FORCED: u8 = 2;

/// Connection lifecycle. CONNECT/CONNACK must complete before anything
/// else moves; `Disconnecting` only drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    AwaitingConnect,
    Connected,
    Disconnecting,
    Closed,
}

impl EndpointState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::AwaitingConnect,
            1 => Self::Connected,
            2 => Self::Disconnecting,
            _ => Self::Closed,
        }
    }
}

/// Which API surface this endpoint instantiation exposes. The two are
/// mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMode {
    /// `publish`/`subscribe` return the packet id; acks arrive via handlers.
    Sync,
    /// `publish_with_completion` etc.; the completion fires on enqueue.
    Callback,
}

pub struct EndpointOptions {
    pub id_width: IdWidth,
    /// Acknowledge inbound QoS 1/2 publishes automatically. Off means the
    /// application acks via [`EndpointHandle::ack`], preserving order.
    pub auto_ack: bool,
    pub api_mode: ApiMode,
    pub keepalive: KeepaliveConfig,
    /// High-water mark of the command/write queue; `publish` fails with
    /// `QueueFull` beyond it.
    pub command_queue_limit: usize,
    pub connack_timeout: Duration,
    /// Assign outbound v5 topic aliases when the server permits them.
    pub use_topic_aliases: bool,
    /// Session state from a previous connection to resume.
    pub session: Option<SessionState>,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            id_width: IdWidth::Standard,
            auto_ack: true,
            api_mode: ApiMode::Sync,
            // Ping after a full silent keep-alive interval; the server
            // allows one and a half.
            keepalive: KeepaliveConfig::new(100, 150),
            command_queue_limit: 1_024,
            connack_timeout: Duration::from_secs(30),
            use_topic_aliases: false,
            session: None,
        }
    }
}

enum Command {
    Publish(PublishPacket),
    Subscribe {
        packet: SubscribePacket,
        options: Vec<(String, SubscribeOptions)>,
    },
    Unsubscribe(UnsubscribePacket),
    Ack { qos: QoS, packet_id: u32 },
    ResumeReads,
    Disconnect {
        reason: ReasonCode,
        done: tokio::sync::oneshot::Sender<Result<()>>,
    },
    ForceDisconnect,
}

/// Entry point for the client role.
pub struct Endpoint;

impl Endpoint {
    /// Establishes the transport, runs the CONNECT/CONNACK exchange and
    /// spawns the connection tasks.
    ///
    /// First packet in either direction after transport establishment is
    /// CONNECT; anything else from the server is fatal.
    pub async fn connect<T>(
        mut transport: T,
        connect: ConnectOptions,
        options: EndpointOptions,
        handlers: EndpointHandlers,
    ) -> Result<(EndpointHandle, ConnectResult)>
    where
        T: Transport,
    {
        let codec = Codec::new(connect.protocol_version, options.id_width);

        transport.connect().await?;
        let (reader, writer) = transport.into_split()?;
        let mut frame_reader = FrameReader::new(reader);
        let mut frame_writer = FrameWriter::new(writer);

        if let Some(size) = connect.properties.maximum_packet_size {
            frame_reader.set_max_packet_size(size as usize);
        }

        let connect_packet = ConnectPacket::from_options(&connect);
        frame_writer
            .write_packet(&Packet::Connect(connect_packet), codec)
            .await?;

        let connack = match tokio::time::timeout(
            options.connack_timeout,
            frame_reader.read_packet(codec),
        )
        .await
        {
            Err(_) => return Err(MqttError::Timeout),
            Ok(Err(e)) => return Err(e),
            Ok(Ok(Packet::ConnAck(connack))) => connack,
            Ok(Ok(other)) => {
                return Err(MqttError::ProtocolError(format!(
                    "expected CONNACK, got {:?}",
                    other.packet_type()
                )))
            }
        };

        if connack.reason_code != ReasonCode::Success {
            return Err(MqttError::ConnectionRefused(connack.reason_code));
        }

        let session_present = connack.session_present;
        let mut session = match options.session {
            Some(session) if session_present => session,
            // The server kept nothing; whatever we remembered is void.
            Some(mut stale) => {
                stale.reset();
                stale
            }
            None => SessionState::new(connect.client_id.clone(), connect.clean_start),
        };
        session.session_expiry_interval = connect.properties.session_expiry_interval;

        let mut allocator = PacketIdAllocator::new(options.id_width);
        for id in session.in_flight_ids() {
            allocator.claim(id)?;
        }

        // CONNACK property handling: server overrides and both-direction
        // limits.
        let keep_alive = connack
            .properties
            .get_server_keep_alive()
            .map_or(connect.keep_alive, |secs| Duration::from_secs(u64::from(secs)));
        if let Some(size) = connack.properties.get_maximum_packet_size() {
            frame_writer.set_max_packet_size(size as usize);
        }
        let peer_receive_maximum = connack.properties.get_receive_maximum().unwrap_or(u16::MAX);
        let outbound_aliases = if options.use_topic_aliases {
            connack
                .properties
                .get_topic_alias_maximum()
                .map(OutboundAliases::new)
        } else {
            None
        };
        let inbound_aliases = InboundAliases::new(
            connect.properties.topic_alias_maximum.unwrap_or(0),
        );
        if let Some(assigned) = connack.properties.get_assigned_client_identifier() {
            debug!(client_id = %assigned, "server assigned client identifier");
            session.client_id = assigned.to_string();
        }

        // Resume: replay in-flight packets in original order, PUBLISHes
        // with DUP set, PUBRELs verbatim.
        if session_present {
            for frame in session.packets_for_resend() {
                frame_writer.write_raw(&frame).await?;
            }
        }

        let state = Arc::new(AtomicU8::new(1));
        let allocator = Arc::new(Mutex::new(allocator));
        let session = Arc::new(Mutex::new(session));
        let abort = Arc::new(Notify::new());
        let abort_reason = Arc::new(AtomicU8::new(ABORT_NONE));

        let (cmd_tx, cmd_rx) = flume::bounded(options.command_queue_limit);
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

        let driver = Driver {
            writer: frame_writer,
            codec,
            state: Arc::clone(&state),
            session: Arc::clone(&session),
            allocator: Arc::clone(&allocator),
            handlers,
            keepalive_config: options.keepalive,
            keep_alive,
            auto_ack: options.auto_ack,
            peer_receive_maximum,
            inbound_receive_maximum: connect.properties.receive_maximum,
            inbound_quota_used: 0,
            outbound_aliases,
            inbound_aliases,
            pending_window: VecDeque::new(),
            pending_subscribes: HashMap::new(),
            pending_unsubscribes: HashMap::new(),
            last_outbound: Instant::now(),
            ping_sent_at: None,
            paused: false,
            abort: Arc::clone(&abort),
            abort_reason: Arc::clone(&abort_reason),
            reader_task,
        };
        tokio::spawn(driver.run(inbound_rx, cmd_rx));

        let handle = EndpointHandle {
            cmd_tx,
            allocator,
            session,
            state,
            abort,
            abort_reason,
            api_mode: options.api_mode,
        };
        Ok((handle, ConnectResult { session_present }))
    }
}

/// Cloneable user-facing surface of a running endpoint.
#[derive(Clone)]
pub struct EndpointHandle {
    cmd_tx: flume::Sender<Command>,
    allocator: Arc<Mutex<PacketIdAllocator>>,
    session: Arc<Mutex<SessionState>>,
    state: Arc<AtomicU8>,
    abort: Arc<Notify>,
    abort_reason: Arc<AtomicU8>,
    api_mode: ApiMode,
}

impl EndpointHandle {
    #[must_use]
    pub fn state(&self) -> EndpointState {
        EndpointState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == EndpointState::Connected
    }

    /// Serializable image of the session, e.g. to resume after reconnect.
    #[must_use]
    pub fn session_snapshot(&self) -> SessionSnapshot {
        self.session.lock().snapshot()
    }

    fn ensure_mode(&self, mode: ApiMode) -> Result<()> {
        if self.api_mode == mode {
            Ok(())
        } else {
            Err(MqttError::InvalidState(
                "endpoint was instantiated with the other API surface".to_string(),
            ))
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.state() {
            EndpointState::Connected => Ok(()),
            _ => Err(MqttError::NotConnected),
        }
    }

    fn send_command(&self, command: Command) -> Result<()> {
        self.cmd_tx.try_send(command).map_err(|e| match e {
            flume::TrySendError::Full(_) => MqttError::QueueFull,
            flume::TrySendError::Disconnected(_) => MqttError::NotConnected,
        })
    }

    fn build_publish(
        &self,
        topic: &str,
        payload: Bytes,
        options: &PublishOptions,
    ) -> Result<(PublishPacket, PublishResult)> {
        self.ensure_connected()?;
        validate_topic_name(topic)?;

        let mut packet = PublishPacket::new(topic, payload, options.qos)
            .with_retain(options.retain);
        packet.properties = options.properties.to_wire();

        let result = match options.qos {
            QoS::AtMostOnce => PublishResult::QoS0,
            _ => {
                let packet_id = self.allocator.lock().allocate()?;
                packet.packet_id = Some(packet_id);
                PublishResult::QoS1Or2 { packet_id }
            }
        };
        Ok((packet, result))
    }

    /// Enqueues a publish; completion arrives through the
    /// publish-complete handler for QoS 1/2.
    pub fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        options: PublishOptions,
    ) -> Result<PublishResult> {
        self.ensure_mode(ApiMode::Sync)?;
        let (packet, result) = self.build_publish(topic, payload.into(), &options)?;
        if let Err(e) = self.send_command(Command::Publish(packet)) {
            if let Some(id) = result.packet_id() {
                self.allocator.lock().release(id);
            }
            return Err(e);
        }
        Ok(result)
    }

    /// Callback-surface publish: `completion` fires once the packet is
    /// accepted onto the write queue, not when it is acknowledged.
    pub fn publish_with_completion(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        options: PublishOptions,
        completion: impl FnOnce(Result<PublishResult>) + Send + 'static,
    ) {
        if let Err(e) = self.ensure_mode(ApiMode::Callback) {
            completion(Err(e));
            return;
        }
        let outcome = self
            .build_publish(topic, payload.into(), &options)
            .and_then(|(packet, result)| {
                if let Err(e) = self.send_command(Command::Publish(packet)) {
                    if let Some(id) = result.packet_id() {
                        self.allocator.lock().release(id);
                    }
                    return Err(e);
                }
                Ok(result)
            });
        completion(outcome);
    }

    /// Subscribes to one or more filters in a single SUBSCRIBE packet;
    /// returns its packet id. The SUBACK arrives via the suback handler.
    pub fn subscribe(&self, filters: &[(&str, SubscribeOptions)]) -> Result<u32> {
        self.ensure_connected()?;
        if filters.is_empty() {
            return Err(MqttError::InvalidTopicFilter("no filters".to_string()));
        }
        for (filter, _) in filters {
            validate_topic_filter(filter)?;
        }

        let packet_id = self.allocator.lock().allocate()?;
        let mut packet = SubscribePacket::new(packet_id);
        let mut recorded = Vec::with_capacity(filters.len());
        for (filter, options) in filters {
            if let Some(id) = options.subscription_identifier {
                packet.properties.set_subscription_identifier(id);
            }
            packet = packet.add_filter_with_options(TopicFilter::with_options(
                *filter,
                options.into(),
            ));
            recorded.push(((*filter).to_string(), *options));
        }

        if let Err(e) = self.send_command(Command::Subscribe {
            packet,
            options: recorded,
        }) {
            self.allocator.lock().release(packet_id);
            return Err(e);
        }
        Ok(packet_id)
    }

    /// Unsubscribes; returns the packet id answered by the unsuback
    /// handler.
    pub fn unsubscribe(&self, filters: &[&str]) -> Result<u32> {
        self.ensure_connected()?;
        if filters.is_empty() {
            return Err(MqttError::InvalidTopicFilter("no filters".to_string()));
        }
        for filter in filters {
            validate_topic_filter(filter)?;
        }

        let packet_id = self.allocator.lock().allocate()?;
        let mut packet = UnsubscribePacket::new(packet_id);
        for filter in filters {
            packet = packet.add_filter(*filter);
        }

        if let Err(e) = self.send_command(Command::Unsubscribe(packet)) {
            self.allocator.lock().release(packet_id);
            return Err(e);
        }
        Ok(packet_id)
    }

    /// Manual acknowledgement of an inbound QoS 1/2 publish, for endpoints
    /// running with `auto_ack` off.
    pub fn ack(&self, qos: QoS, packet_id: u32) -> Result<()> {
        if qos == QoS::AtMostOnce {
            return Ok(());
        }
        self.send_command(Command::Ack { qos, packet_id })
    }

    /// Re-enables reads after a message handler returned `false`.
    pub fn resume_reads(&self) -> Result<()> {
        self.send_command(Command::ResumeReads)
    }

    /// Ordered shutdown: sends DISCONNECT behind any queued writes, then
    /// closes the stream. Past `timeout` the stream is force-closed instead
    /// and both this call and the error handler report `DisconnectTimeout`;
    /// the close handler does not fire on that path.
    pub async fn disconnect(
        &self,
        reason: Option<ReasonCode>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.ensure_connected()?;
        let (done, wait) = tokio::sync::oneshot::channel();
        self.send_command(Command::Disconnect {
            reason: reason.unwrap_or(ReasonCode::Success),
            done,
        })?;

        let deadline = timeout.unwrap_or(Duration::from_secs(30));
        match tokio::time::timeout(deadline, wait).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(MqttError::ConnectionError(
                "endpoint closed before disconnect completed".to_string(),
            )),
            Err(_) => {
                // Deadline passed with writes still pending: cut the
                // stream loose. The driver abandons the blocked write and
                // reports the timeout through the error handler.
                self.abort_reason
                    .store(ABORT_DISCONNECT_TIMEOUT, Ordering::Release);
                self.abort.notify_one();
                Err(MqttError::DisconnectTimeout)
            }
        }
    }

    /// Immediate close. The peer sees a non-graceful drop and will publish
    /// the will, if one was registered.
    pub fn force_disconnect(&self) {
        self.abort_reason.store(ABORT_FORCED, Ordering::Release);
        self.abort.notify_one();
        let _ = self.send_command(Command::ForceDisconnect);
    }
}

struct Driver<W> {
    writer: FrameWriter<W>,
    codec: Codec,
    state: Arc<AtomicU8>,
    session: Arc<Mutex<SessionState>>,
    allocator: Arc<Mutex<PacketIdAllocator>>,
    handlers: EndpointHandlers,
    keepalive_config: KeepaliveConfig,
    keep_alive: Duration,
    auto_ack: bool,
    peer_receive_maximum: u16,
    inbound_receive_maximum: Option<u16>,
    inbound_quota_used: u16,
    outbound_aliases: Option<OutboundAliases>,
    inbound_aliases: InboundAliases,
    /// QoS > 0 publishes held back by the peer's receive maximum.
    pending_window: VecDeque<PublishPacket>,
    pending_subscribes: HashMap<u32, Vec<(String, SubscribeOptions)>>,
    pending_unsubscribes: HashMap<u32, Vec<String>>,
    last_outbound: Instant,
    ping_sent_at: Option<Instant>,
    paused: bool,
    abort: Arc<Notify>,
    abort_reason: Arc<AtomicU8>,
    reader_task: tokio::task::JoinHandle<()>,
}

enum Event {
    Inbound(Result<Packet>),
    Command(Command),
    TimerDue,
    Closed,
}

enum LoopOutcome {
    Continue,
    Stop { suppress_close: bool },
}

impl<W: ByteWriter> Driver<W> {
    async fn run(
        mut self,
        inbound_rx: flume::Receiver<Result<Packet>>,
        cmd_rx: flume::Receiver<Command>,
    ) {
        loop {
            let deadline = self.next_deadline();
            let event = {
                let timer = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                };

                if self.paused {
                    tokio::select! {
                        cmd = cmd_rx.recv_async() => cmd.map_or(Event::Closed, Event::Command),
                        () = timer => Event::TimerDue,
                    }
                } else {
                    tokio::select! {
                        packet = inbound_rx.recv_async() => {
                            packet.map_or(Event::Closed, Event::Inbound)
                        }
                        cmd = cmd_rx.recv_async() => cmd.map_or(Event::Closed, Event::Command),
                        () = timer => Event::TimerDue,
                    }
                }
            };

            let outcome = match event {
                Event::Inbound(Ok(packet)) => match self.handle_inbound(packet).await {
                    Ok(()) => LoopOutcome::Continue,
                    Err(e) => self.stop_on(e).await,
                },
                Event::Inbound(Err(e)) => self.stop_on(e).await,
                Event::Command(command) => self.handle_command(command).await,
                Event::TimerDue => match self.handle_timer().await {
                    Ok(()) => LoopOutcome::Continue,
                    Err(e) => self.stop_on(e).await,
                },
                Event::Closed => LoopOutcome::Stop {
                    suppress_close: false,
                },
            };

            if let LoopOutcome::Stop { suppress_close } = outcome {
                self.state.store(3, Ordering::Release);
                if !suppress_close {
                    self.handlers.dispatch_close();
                }
                break;
            }
        }
        self.reader_task.abort();
    }

    fn next_deadline(&self) -> Option<Instant> {
        if self.keep_alive.is_zero() {
            return None;
        }
        match self.ping_sent_at {
            // Waiting on PINGRESP: time out at 150% of the interval.
            Some(sent) => Some(sent + self.keepalive_config.timeout_duration(self.keep_alive)),
            None => {
                Some(self.last_outbound + self.keepalive_config.ping_interval(self.keep_alive))
            }
        }
    }

    async fn handle_timer(&mut self) -> Result<()> {
        if self.ping_sent_at.is_some() {
            return Err(MqttError::KeepAliveTimeout);
        }
        trace!("keep-alive interval elapsed, sending PINGREQ");
        self.send_packet(&Packet::PingReq(PingReqPacket)).await?;
        self.ping_sent_at = Some(Instant::now());
        Ok(())
    }

    /// `DisconnectTimeout` on the timeout path, `ClientClosed` on a forced
    /// close.
    fn abort_error(&self) -> MqttError {
        match self.abort_reason.load(Ordering::Acquire) {
            ABORT_DISCONNECT_TIMEOUT => MqttError::DisconnectTimeout,
            _ => MqttError::ClientClosed,
        }
    }

    async fn stop_on(&mut self, error: MqttError) -> LoopOutcome {
        // The disconnect-timeout path abandons in-flight writes and keeps
        // the close handler silent; only the error handler fires.
        let suppress_close = matches!(error, MqttError::DisconnectTimeout);
        self.fail(error).await;
        LoopOutcome::Stop { suppress_close }
    }

    /// Writes can block indefinitely on a stalled peer; the abort signal
    /// from `disconnect(timeout)` / `force_disconnect` cuts them loose.
    async fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let codec = self.codec;
        let abort = Arc::clone(&self.abort);
        let outcome = tokio::select! {
            result = self.writer.write_packet(packet, codec) => Some(result),
            () = abort.notified() => None,
        };
        match outcome {
            Some(result) => {
                if result.is_ok() {
                    self.last_outbound = Instant::now();
                }
                result
            }
            None => Err(self.abort_error()),
        }
    }

    async fn send_raw(&mut self, frame: &[u8]) -> Result<()> {
        let abort = Arc::clone(&self.abort);
        let outcome = tokio::select! {
            result = self.writer.write_raw(frame) => Some(result),
            () = abort.notified() => None,
        };
        match outcome {
            Some(result) => {
                if result.is_ok() {
                    self.last_outbound = Instant::now();
                }
                result
            }
            None => Err(self.abort_error()),
        }
    }

    fn encode(&self, packet: &Packet) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        packet.encode(&mut buf, self.codec)?;
        Ok(buf.freeze())
    }

    async fn handle_command(&mut self, command: Command) -> LoopOutcome {
        let result = match command {
            Command::Publish(packet) => self.handle_publish_command(packet).await,
            Command::Subscribe { packet, options } => {
                self.pending_subscribes.insert(packet.packet_id, options);
                self.send_packet(&Packet::Subscribe(packet)).await
            }
            Command::Unsubscribe(packet) => {
                self.pending_unsubscribes
                    .insert(packet.packet_id, packet.filters.clone());
                self.send_packet(&Packet::Unsubscribe(packet)).await
            }
            Command::Ack { qos, packet_id } => self.send_manual_ack(qos, packet_id).await,
            Command::ResumeReads => {
                self.paused = false;
                Ok(())
            }
            Command::Disconnect { reason, done } => {
                return self.handle_disconnect(reason, done).await
            }
            Command::ForceDisconnect => {
                debug!("force disconnect");
                return LoopOutcome::Stop {
                    suppress_close: false,
                };
            }
        };

        match result {
            Ok(()) => LoopOutcome::Continue,
            Err(e) => self.stop_on(e).await,
        }
    }

    async fn handle_publish_command(&mut self, packet: PublishPacket) -> Result<()> {
        if packet.qos != QoS::AtMostOnce
            && self.session.lock().in_flight_len() >= usize::from(self.peer_receive_maximum)
        {
            trace!(
                packet_id = ?packet.packet_id,
                "receive maximum reached, parking publish"
            );
            self.pending_window.push_back(packet);
            return Ok(());
        }
        self.dispatch_publish(packet).await
    }

    async fn dispatch_publish(&mut self, mut packet: PublishPacket) -> Result<()> {
        if let Some(aliases) = &mut self.outbound_aliases {
            match aliases.resolve(&packet.topic_name) {
                AliasedTopic::Register { topic, alias } => {
                    packet.topic_name = topic;
                    packet.properties.set_topic_alias(alias);
                }
                AliasedTopic::Established { alias } => {
                    packet.topic_name = String::new();
                    packet.properties.set_topic_alias(alias);
                }
                AliasedTopic::Plain { topic } => packet.topic_name = topic,
            }
        }

        let frame = self.encode(&Packet::Publish(packet.clone()))?;

        if let Some(packet_id) = packet.packet_id {
            let expected = match packet.qos {
                QoS::AtLeastOnce => ExpectedAck::PubAck,
                _ => ExpectedAck::PubRec,
            };
            self.session.lock().track_in_flight(InFlightEntry {
                packet_id,
                expected,
                bytes: frame.clone(),
                is_pubrel: false,
            })?;
        }

        self.send_raw(&frame).await
    }

    async fn send_manual_ack(&mut self, qos: QoS, packet_id: u32) -> Result<()> {
        match qos {
            QoS::AtMostOnce => Ok(()),
            QoS::AtLeastOnce => {
                self.release_inbound_quota();
                self.send_packet(&Packet::PubAck(PubAckPacket::new(packet_id))).await
            }
            QoS::ExactlyOnce => {
                self.send_packet(&Packet::PubRec(PubRecPacket::new(packet_id))).await
            }
        }
    }

    async fn handle_disconnect(
        &mut self,
        reason: ReasonCode,
        done: tokio::sync::oneshot::Sender<Result<()>>,
    ) -> LoopOutcome {
        self.state.store(2, Ordering::Release);
        debug!(?reason, "disconnecting");

        let packet = Packet::Disconnect(DisconnectPacket::with_reason(reason));
        let result = match self.send_packet(&packet).await {
            Ok(()) => self.close_writer().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                let _ = done.send(Ok(()));
                LoopOutcome::Stop {
                    suppress_close: false,
                }
            }
            Err(e) => {
                let suppress_close = matches!(e, MqttError::DisconnectTimeout);
                self.handlers.dispatch_error(&e);
                let _ = done.send(Err(e));
                LoopOutcome::Stop { suppress_close }
            }
        }
    }

    async fn close_writer(&mut self) -> Result<()> {
        let abort = Arc::clone(&self.abort);
        let outcome = tokio::select! {
            result = self.writer.close() => Some(result),
            () = abort.notified() => None,
        };
        match outcome {
            Some(result) => result,
            None => Err(self.abort_error()),
        }
    }

    async fn handle_inbound(&mut self, packet: Packet) -> Result<()> {
        trace!(packet_type = ?packet.packet_type(), "inbound packet");
        match packet {
            Packet::Publish(publish) => self.handle_inbound_publish(publish).await,
            Packet::PubAck(puback) => self.handle_inbound_puback(puback.packet_id).await,
            Packet::PubRec(pubrec) => {
                self.handle_inbound_pubrec(pubrec.packet_id, pubrec.reason_code)
                    .await
            }
            Packet::PubRel(pubrel) => self.handle_inbound_pubrel(pubrel.packet_id).await,
            Packet::PubComp(pubcomp) => {
                self.handle_inbound_pubcomp(pubcomp.packet_id, pubcomp.reason_code)
                    .await
            }
            Packet::SubAck(suback) => {
                self.allocator.lock().release(suback.packet_id);
                if let Some(filters) = self.pending_subscribes.remove(&suback.packet_id) {
                    let mut session = self.session.lock();
                    for ((filter, options), code) in
                        filters.iter().zip(suback.reason_codes.iter())
                    {
                        if let Some(granted) = code.granted_qos() {
                            let mut options = *options;
                            options.qos = granted;
                            session.add_subscription(filter.clone(), options);
                        }
                    }
                }
                if let Some(handler) = &self.handlers.on_suback {
                    handler(suback.packet_id, &suback.reason_codes);
                }
                Ok(())
            }
            Packet::UnsubAck(unsuback) => {
                self.allocator.lock().release(unsuback.packet_id);
                if let Some(filters) = self.pending_unsubscribes.remove(&unsuback.packet_id) {
                    let mut session = self.session.lock();
                    for filter in filters {
                        session.remove_subscription(&filter);
                    }
                }
                if let Some(handler) = &self.handlers.on_unsuback {
                    handler(unsuback.packet_id, &unsuback.reason_codes);
                }
                Ok(())
            }
            Packet::PingResp(_) => {
                self.ping_sent_at = None;
                if let Some(handler) = &self.handlers.on_pingresp {
                    handler();
                }
                Ok(())
            }
            Packet::Auth(auth) => {
                if let Some(handler) = &self.handlers.on_auth {
                    handler(&auth);
                }
                Ok(())
            }
            Packet::Disconnect(disconnect) => {
                debug!(reason = ?disconnect.reason_code, "server disconnected");
                if let Some(handler) = &self.handlers.on_disconnect {
                    handler(&disconnect);
                }
                let error = match disconnect.reason_code {
                    ReasonCode::Success => MqttError::ConnectionClosedByPeer,
                    ReasonCode::SessionTakenOver => MqttError::SessionTakenOver,
                    ReasonCode::KeepAliveTimeout => MqttError::KeepAliveTimeout,
                    other => MqttError::ConnectionError(format!(
                        "server disconnect: {other:?}"
                    )),
                };
                Err(error)
            }
            Packet::ConnAck(_)
            | Packet::Connect(_)
            | Packet::Subscribe(_)
            | Packet::Unsubscribe(_)
            | Packet::PingReq(_) => Err(MqttError::ProtocolError(format!(
                "unexpected {:?} on a client connection",
                packet.packet_type()
            ))),
        }
    }

    async fn handle_inbound_publish(&mut self, mut publish: PublishPacket) -> Result<()> {
        if self.codec.is_v5() {
            let alias = publish.properties.get_topic_alias();
            publish.topic_name = self
                .inbound_aliases
                .resolve(&publish.topic_name, alias)?;
        }

        match publish.qos {
            QoS::AtMostOnce => {
                self.deliver(&publish);
                Ok(())
            }
            QoS::AtLeastOnce => {
                let packet_id = publish
                    .packet_id
                    .ok_or_else(|| MqttError::MalformedPacket("QoS 1 without id".to_string()))?;
                self.charge_inbound_quota()?;
                self.deliver(&publish);
                if self.auto_ack {
                    self.release_inbound_quota();
                    self.send_packet(&Packet::PubAck(PubAckPacket::new(packet_id)))
                        .await?;
                }
                Ok(())
            }
            QoS::ExactlyOnce => {
                let packet_id = publish
                    .packet_id
                    .ok_or_else(|| MqttError::MalformedPacket("QoS 2 without id".to_string()))?;
                let is_duplicate = self.session.lock().has_received_qos2(packet_id);
                if !is_duplicate {
                    self.charge_inbound_quota()?;
                }
                let actions = qos2::handle_incoming_publish_qos2(packet_id, is_duplicate);
                self.apply_qos2_actions(actions, Some(&publish)).await
            }
        }
    }

    async fn handle_inbound_puback(&mut self, packet_id: u32) -> Result<()> {
        let completed = self
            .session
            .lock()
            .complete_in_flight(packet_id, ExpectedAck::PubAck);
        match completed {
            Some(_) => {
                self.allocator.lock().release(packet_id);
                self.handlers.dispatch_publish_complete(packet_id, Ok(()));
                self.pump_window().await
            }
            None => {
                warn!(packet_id, "PUBACK for unknown packet id");
                Ok(())
            }
        }
    }

    async fn handle_inbound_pubrec(
        &mut self,
        packet_id: u32,
        reason_code: ReasonCode,
    ) -> Result<()> {
        let has_pending = self
            .session
            .lock()
            .in_flight_expecting(packet_id)
            == Some(ExpectedAck::PubRec);
        let actions = qos2::handle_incoming_pubrec(packet_id, reason_code, has_pending);
        self.apply_qos2_actions(actions, None).await
    }

    async fn handle_inbound_pubrel(&mut self, packet_id: u32) -> Result<()> {
        let has_pending = self.session.lock().has_received_qos2(packet_id);
        let actions = qos2::handle_incoming_pubrel(packet_id, has_pending);
        self.apply_qos2_actions(actions, None).await
    }

    async fn handle_inbound_pubcomp(
        &mut self,
        packet_id: u32,
        reason_code: ReasonCode,
    ) -> Result<()> {
        let has_pending = self
            .session
            .lock()
            .in_flight_expecting(packet_id)
            == Some(ExpectedAck::PubComp);
        let actions = qos2::handle_incoming_pubcomp(packet_id, reason_code, has_pending);
        self.apply_qos2_actions(actions, None).await
    }

    async fn apply_qos2_actions(
        &mut self,
        actions: Vec<QoS2Action>,
        publish: Option<&PublishPacket>,
    ) -> Result<()> {
        for action in actions {
            match action {
                QoS2Action::DeliverMessage { .. } => {
                    if let Some(publish) = publish {
                        self.deliver(publish);
                    }
                }
                QoS2Action::SendPubRec { packet_id, .. } => {
                    if self.auto_ack || publish.is_none() {
                        self.send_packet(&Packet::PubRec(PubRecPacket::new(packet_id)))
                            .await?;
                    }
                }
                QoS2Action::TrackIncomingPubRec { packet_id } => {
                    self.session.lock().record_received_qos2(packet_id);
                }
                QoS2Action::RemoveIncomingPubRec { packet_id } => {
                    self.session.lock().release_received_qos2(packet_id);
                    self.release_inbound_quota();
                }
                QoS2Action::SendPubComp {
                    packet_id,
                    reason_code,
                } => {
                    self.send_packet(&Packet::PubComp(PubCompPacket::new_with_reason(
                        packet_id,
                        reason_code,
                    )))
                    .await?;
                }
                QoS2Action::SendPubRel { packet_id } => {
                    let pubrel = Packet::PubRel(PubRelPacket::new(packet_id));
                    let frame = self.encode(&pubrel)?;
                    self.session
                        .lock()
                        .advance_to_pubrel(packet_id, frame.clone())?;
                    self.send_raw(&frame).await?;
                }
                QoS2Action::TrackOutgoingPubRel { .. } => {
                    // advance_to_pubrel already retagged the entry.
                }
                QoS2Action::RemoveOutgoingPubRel { packet_id } => {
                    self.session
                        .lock()
                        .complete_in_flight(packet_id, ExpectedAck::PubComp);
                    self.allocator.lock().release(packet_id);
                }
                QoS2Action::CompleteFlow { packet_id } => {
                    self.handlers.dispatch_publish_complete(packet_id, Ok(()));
                    self.pump_window().await?;
                }
                QoS2Action::ErrorFlow {
                    packet_id,
                    reason_code,
                } => {
                    // Failed mid-flow: the id is no longer in flight.
                    self.session
                        .lock()
                        .complete_in_flight(packet_id, ExpectedAck::PubRec);
                    self.allocator.lock().release(packet_id);
                    self.handlers.dispatch_publish_complete(
                        packet_id,
                        Err(MqttError::PublishFailed(reason_code)),
                    );
                    self.pump_window().await?;
                }
            }
        }
        Ok(())
    }

    fn deliver(&mut self, publish: &PublishPacket) {
        let message = publish.to_message();
        if !self.handlers.dispatch_message(&message) {
            debug!("message handler requested read pause");
            self.paused = true;
        }
    }

    /// Moves parked publishes into the window opened by a completed flow.
    async fn pump_window(&mut self) -> Result<()> {
        while let Some(packet) = self.pending_window.pop_front() {
            let in_flight = self.session.lock().in_flight_len();
            if packet.qos != QoS::AtMostOnce
                && in_flight >= usize::from(self.peer_receive_maximum)
            {
                self.pending_window.push_front(packet);
                break;
            }
            self.dispatch_publish(packet).await?;
        }
        Ok(())
    }

    fn charge_inbound_quota(&mut self) -> Result<()> {
        if let Some(maximum) = self.inbound_receive_maximum {
            if self.inbound_quota_used >= maximum {
                return Err(MqttError::ReceiveMaximumExceeded);
            }
            self.inbound_quota_used += 1;
        }
        Ok(())
    }

    fn release_inbound_quota(&mut self) {
        if self.inbound_receive_maximum.is_some() {
            self.inbound_quota_used = self.inbound_quota_used.saturating_sub(1);
        }
    }

    async fn fail(&mut self, error: MqttError) {
        if error.is_normal_disconnect() {
            debug!("connection closed: {error}");
        } else {
            warn!("connection failed: {error}");
            // Protocol errors notify the peer before closing (v5 only).
            if self.codec.is_v5() {
                if let Some(reason) = error.disconnect_reason() {
                    let packet =
                        Packet::Disconnect(DisconnectPacket::with_reason(reason));
                    let _ = tokio::time::timeout(
                        Duration::from_secs(1),
                        self.writer.write_packet(&packet, self.codec),
                    )
                    .await;
                }
            }
        }
        let _ = tokio::time::timeout(Duration::from_secs(1), self.writer.close()).await;
        self.handlers.dispatch_error(&error);
    }
}
