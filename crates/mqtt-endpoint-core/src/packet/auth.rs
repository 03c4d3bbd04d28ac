use crate::error::{MqttError, Result};
use crate::packet::{Codec, FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::Properties;
use crate::types::ReasonCode;
use bytes::{Buf, BufMut, Bytes};

fn is_valid_auth_reason_code(code: ReasonCode) -> bool {
    matches!(
        code,
        ReasonCode::Success | ReasonCode::ContinueAuthentication | ReasonCode::ReAuthenticate
    )
}

/// AUTH (v5 only): carries the authentication method and opaque exchange
/// data during enhanced authentication.
#[derive(Debug, Clone)]
pub struct AuthPacket {
    pub reason_code: ReasonCode,
    pub properties: Properties,
}

impl AuthPacket {
    #[must_use]
    pub fn success() -> Self {
        Self {
            reason_code: ReasonCode::Success,
            properties: Properties::default(),
        }
    }

    #[must_use]
    pub fn continue_authentication(method: String, data: Option<Bytes>) -> Self {
        let mut properties = Properties::default();
        properties.set_authentication_method(method);
        if let Some(data) = data {
            properties.set_authentication_data(data);
        }
        Self {
            reason_code: ReasonCode::ContinueAuthentication,
            properties,
        }
    }

    #[must_use]
    pub fn authentication_method(&self) -> Option<&str> {
        self.properties.get_authentication_method()
    }

    #[must_use]
    pub fn authentication_data(&self) -> Option<&[u8]> {
        self.properties.get_authentication_data()
    }
}

impl MqttPacket for AuthPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Auth
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, codec: Codec) -> Result<()> {
        if !codec.is_v5() {
            return Err(MqttError::ProtocolError(
                "AUTH packet is not valid in MQTT 3.1.1".to_string(),
            ));
        }
        if self.reason_code == ReasonCode::Success && self.properties.is_empty() {
            return Ok(());
        }
        buf.put_u8(self.reason_code.into());
        self.properties.encode(buf)?;
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, _fixed_header: &FixedHeader, _codec: Codec) -> Result<Self> {
        if !buf.has_remaining() {
            return Ok(Self::success());
        }

        let raw = buf.get_u8();
        let reason_code = ReasonCode::from_u8(raw).ok_or(MqttError::InvalidReasonCode(raw))?;
        if !is_valid_auth_reason_code(reason_code) {
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
