//! Per-packet-kind callbacks. Handlers are fixed at connect time and run on
//! the endpoint's driver task, so invocations are totally ordered with the
//! inbound packet stream. The close handler is consumed on first fire.

use crate::error::MqttError;
use mqtt_endpoint_core::packet::{AuthPacket, DisconnectPacket, SubAckReasonCode};
use mqtt_endpoint_core::types::{Message, ReasonCode};
use parking_lot::Mutex;
use std::sync::Arc;

/// Inbound application message. Return `false` to halt further reads while
/// letting queued writes drain.
pub type MessageHandler = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// QoS 1/2 publish fully acknowledged (or failed), keyed by packet id.
pub type PublishCompleteHandler =
    Arc<dyn Fn(u32, Result<(), MqttError>) + Send + Sync>;

pub type SubAckHandler = Arc<dyn Fn(u32, &[SubAckReasonCode]) + Send + Sync>;
pub type UnsubAckHandler = Arc<dyn Fn(u32, &[ReasonCode]) + Send + Sync>;
pub type PingRespHandler = Arc<dyn Fn() + Send + Sync>;
pub type AuthPacketHandler = Arc<dyn Fn(&AuthPacket) + Send + Sync>;
pub type DisconnectHandler = Arc<dyn Fn(&DisconnectPacket) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&MqttError) + Send + Sync>;
pub type CloseHandler = Box<dyn FnOnce() + Send>;

#[derive(Default)]
pub struct EndpointHandlers {
    pub(crate) on_message: Option<MessageHandler>,
    pub(crate) on_publish_complete: Option<PublishCompleteHandler>,
    pub(crate) on_suback: Option<SubAckHandler>,
    pub(crate) on_unsuback: Option<UnsubAckHandler>,
    pub(crate) on_pingresp: Option<PingRespHandler>,
    pub(crate) on_auth: Option<AuthPacketHandler>,
    pub(crate) on_disconnect: Option<DisconnectHandler>,
    pub(crate) on_error: Option<ErrorHandler>,
    pub(crate) on_close: Mutex<Option<CloseHandler>>,
}

impl EndpointHandlers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_message(mut self, handler: impl Fn(&Message) -> bool + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn on_publish_complete(
        mut self,
        handler: impl Fn(u32, Result<(), MqttError>) + Send + Sync + 'static,
    ) -> Self {
        self.on_publish_complete = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn on_suback(
        mut self,
        handler: impl Fn(u32, &[SubAckReasonCode]) + Send + Sync + 'static,
    ) -> Self {
        self.on_suback = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn on_unsuback(
        mut self,
        handler: impl Fn(u32, &[ReasonCode]) + Send + Sync + 'static,
    ) -> Self {
        self.on_unsuback = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn on_pingresp(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_pingresp = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn on_auth(mut self, handler: impl Fn(&AuthPacket) + Send + Sync + 'static) -> Self {
        self.on_auth = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn on_disconnect(
        mut self,
        handler: impl Fn(&DisconnectPacket) + Send + Sync + 'static,
    ) -> Self {
        self.on_disconnect = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn on_error(mut self, handler: impl Fn(&MqttError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn on_close(mut self, handler: impl FnOnce() + Send + 'static) -> Self {
        *self.on_close.lock() = Some(Box::new(handler));
        self
    }

    /// Dispatches an inbound message; `true` keeps the read loop running.
    pub(crate) fn dispatch_message(&self, message: &Message) -> bool {
        match &self.on_message {
            Some(handler) => handler(message),
            None => true,
        }
    }

    pub(crate) fn dispatch_publish_complete(&self, packet_id: u32, result: Result<(), MqttError>) {
        if let Some(handler) = &self.on_publish_complete {
            handler(packet_id, result);
        }
    }

    pub(crate) fn dispatch_error(&self, error: &MqttError) {
        if let Some(handler) = &self.on_error {
            handler(error);
        }
    }

    /// Fires at most once, no matter how many paths reach shutdown.
    pub(crate) fn dispatch_close(&self) {
        if let Some(handler) = self.on_close.lock().take() {
            handler();
        }
    }
}
