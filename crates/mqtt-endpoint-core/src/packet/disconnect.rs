use crate::error::{MqttError, Result};
use crate::packet::{Codec, FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::Properties;
use crate::types::ReasonCode;
use bytes::{Buf, BufMut};

fn is_valid_disconnect_reason_code(code: ReasonCode) -> bool {
    matches!(
        code,
        ReasonCode::Success
            | ReasonCode::DisconnectWithWillMessage
            | ReasonCode::UnspecifiedError
            | ReasonCode::MalformedPacket
            | ReasonCode::ProtocolError
            | ReasonCode::ImplementationSpecificError
            | ReasonCode::NotAuthorized
            | ReasonCode::ServerBusy
            | ReasonCode::ServerShuttingDown
            | ReasonCode::KeepAliveTimeout
            | ReasonCode::SessionTakenOver
            | ReasonCode::TopicFilterInvalid
            | ReasonCode::TopicNameInvalid
            | ReasonCode::ReceiveMaximumExceeded
            | ReasonCode::TopicAliasInvalid
            | ReasonCode::PacketTooLarge
            | ReasonCode::MessageRateTooHigh
            | ReasonCode::QuotaExceeded
            | ReasonCode::AdministrativeAction
            | ReasonCode::PayloadFormatInvalid
            | ReasonCode::RetainNotSupported
            | ReasonCode::QoSNotSupported
            | ReasonCode::UseAnotherServer
            | ReasonCode::ServerMoved
            | ReasonCode::SharedSubscriptionsNotSupported
            | ReasonCode::ConnectionRateExceeded
            | ReasonCode::MaximumConnectTime
            | ReasonCode::SubscriptionIdentifiersNotSupported
            | ReasonCode::WildcardSubscriptionsNotSupported
    )
}

/// DISCONNECT. Empty in v3.1.1; in v5 the reason code and properties are
/// both elided on the wire when they hold their defaults.
#[derive(Debug, Clone)]
pub struct DisconnectPacket {
    pub reason_code: ReasonCode,
    pub properties: Properties,
}

impl Default for DisconnectPacket {
    fn default() -> Self {
        Self::normal()
    }
}

impl DisconnectPacket {
    /// Reason 0x00, keeps the will suppressed.
    #[must_use]
    pub fn normal() -> Self {
        Self {
            reason_code: ReasonCode::Success,
            properties: Properties::default(),
        }
    }

    #[must_use]
    pub fn with_reason(reason_code: ReasonCode) -> Self {
        Self {
            reason_code,
            properties: Properties::default(),
        }
    }

    /// True when the receiver should still publish the will.
    #[must_use]
    pub fn triggers_will(&self) -> bool {
        self.reason_code != ReasonCode::Success
    }
}

impl MqttPacket for DisconnectPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Disconnect
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, codec: Codec) -> Result<()> {
        if !codec.is_v5() {
            return Ok(());
        }
        if self.reason_code == ReasonCode::Success && self.properties.is_empty() {
            return Ok(());
        }
        buf.put_u8(self.reason_code.into());
        if !self.properties.is_empty() {
            self.properties.encode(buf)?;
        }
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, fixed_header: &FixedHeader, codec: Codec) -> Result<Self> {
        if !codec.is_v5() {
            if fixed_header.remaining_length != 0 {
                return Err(MqttError::MalformedPacket(
                    "v3.1.1 DISCONNECT must have an empty body".to_string(),
                ));
            }
            return Ok(Self::normal());
        }

        if !buf.has_remaining() {
            return Ok(Self::normal());
        }

        let raw = buf.get_u8();
        let reason_code = ReasonCode::from_u8(raw).ok_or(MqttError::InvalidReasonCode(raw))?;
        if !is_valid_disconnect_reason_code(reason_code) {
            return Err(MqttError::InvalidReasonCode(raw));
        }

        let properties = if buf.has_remaining() {
            Properties::decode(buf)?
        } else {
            Properties::default()
        };

        Ok(Self {
            reason_code,
            properties,
        })
    }
}
