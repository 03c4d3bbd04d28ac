use crate::error::{MqttError, Result};
use crate::flags::ConnAckFlags;
use crate::packet::{Codec, FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::Properties;
use crate::types::ReasonCode;
use bytes::{Buf, BufMut};

/// CONNACK. The v3.1.1 return code (0-5) is mapped onto the v5 reason-code
/// space at the codec boundary, so the rest of the stack only sees
/// [`ReasonCode`].
#[derive(Debug, Clone)]
pub struct ConnAckPacket {
    pub session_present: bool,
    pub reason_code: ReasonCode,
    pub properties: Properties,
}

impl ConnAckPacket {
    #[must_use]
    pub fn accepted(session_present: bool) -> Self {
        Self {
            session_present,
            reason_code: ReasonCode::Success,
            properties: Properties::default(),
        }
    }

    #[must_use]
    pub fn rejected(reason_code: ReasonCode) -> Self {
        Self {
            session_present: false,
            reason_code,
            properties: Properties::default(),
        }
    }
}

impl MqttPacket for ConnAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::ConnAck
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, codec: Codec) -> Result<()> {
        // A refused CONNECT never reports a present session.
        let flags = ConnAckFlags {
            session_present: self.session_present && self.reason_code == ReasonCode::Success,
        };
        buf.put_u8(flags.encode());

        if codec.is_v5() {
            buf.put_u8(self.reason_code.into());
            self.properties.encode(buf)?;
        } else {
            buf.put_u8(self.reason_code.to_v311_connack_code());
        }
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, _fixed_header: &FixedHeader, codec: Codec) -> Result<Self> {
        if buf.remaining() < 2 {
            return Err(MqttError::MalformedPacket(
                "CONNACK body shorter than two bytes".to_string(),
            ));
        }

        let flags = ConnAckFlags::decode(buf.get_u8())?;
        let raw = buf.get_u8();

        let (reason_code, properties) = if codec.is_v5() {
            let code = ReasonCode::from_u8(raw).ok_or(MqttError::InvalidReasonCode(raw))?;
            let properties = if buf.has_remaining() {
                Properties::decode(buf)?
            } else {
                Properties::default()
            };
            (code, properties)
        } else {
            let code = ReasonCode::from_v311_connack_code(raw)
                .ok_or(MqttError::InvalidReasonCode(raw))?;
            (code, Properties::default())
        };

        Ok(Self {
            session_present: flags.session_present,
            reason_code,
            properties,
        })
    }
}
