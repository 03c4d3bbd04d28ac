use crate::encoding::{decode_packet_id, encode_packet_id};
use crate::error::{MqttError, Result};
use crate::packet::{Codec, FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::Properties;
use crate::types::ReasonCode;
use bytes::{Buf, BufMut};

fn is_valid_unsuback_reason_code(code: ReasonCode) -> bool {
    matches!(
        code,
        ReasonCode::Success
            | ReasonCode::NoSubscriptionExisted
            | ReasonCode::UnspecifiedError
            | ReasonCode::ImplementationSpecificError
            | ReasonCode::NotAuthorized
            | ReasonCode::TopicFilterInvalid
            | ReasonCode::PacketIdentifierInUse
    )
}

/// UNSUBACK. In v3.1.1 the body is only the packet id; the per-filter
/// reason codes exist in v5 alone.
#[derive(Debug, Clone)]
pub struct UnsubAckPacket {
    pub packet_id: u32,
    pub reason_codes: Vec<ReasonCode>,
    pub properties: Properties,
}

impl UnsubAckPacket {
    #[must_use]
    pub fn new(packet_id: u32, reason_codes: Vec<ReasonCode>) -> Self {
        Self {
            packet_id,
            reason_codes,
            properties: Properties::default(),
        }
    }
}

impl MqttPacket for UnsubAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::UnsubAck
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, codec: Codec) -> Result<()> {
        encode_packet_id(buf, self.packet_id, codec.id_width)?;
        if codec.is_v5() {
            self.properties.encode(buf)?;
            if self.reason_codes.is_empty() {
                return Err(MqttError::MalformedPacket(
                    "v5 UNSUBACK must carry at least one reason code".to_string(),
                ));
            }
            for code in &self.reason_codes {
                buf.put_u8((*code).into());
            }
        }
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, _fixed_header: &FixedHeader, codec: Codec) -> Result<Self> {
        let packet_id = decode_packet_id(buf, codec.id_width)?;

        let mut properties = Properties::default();
        let mut reason_codes = Vec::new();

        if codec.is_v5() {
            properties = Properties::decode(buf)?;
            while buf.has_remaining() {
                let raw = buf.get_u8();
                let code = ReasonCode::from_u8(raw).ok_or(MqttError::InvalidReasonCode(raw))?;
                if !is_valid_unsuback_reason_code(code) {
                    return Err(MqttError::InvalidReasonCode(raw));
                }
                reason_codes.push(code);
            }
        }

        Ok(Self {
            packet_id,
            reason_codes,
            properties,
        })
    }
}
