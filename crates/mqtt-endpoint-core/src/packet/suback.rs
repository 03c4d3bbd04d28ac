use crate::encoding::{decode_packet_id, encode_packet_id};
use crate::error::{MqttError, Result};
use crate::packet::{Codec, FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::Properties;
use crate::types::QoS;
use bytes::{Buf, BufMut};

/// Per-filter SUBACK result. The v3.1.1 return-code vector is the subset
/// {granted QoS 0-2, 0x80 failure}.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubAckReasonCode {
    GrantedQoS0 = 0x00,
    GrantedQoS1 = 0x01,
    GrantedQoS2 = 0x02,
    UnspecifiedError = 0x80,
    ImplementationSpecificError = 0x83,
    NotAuthorized = 0x87,
    TopicFilterInvalid = 0x8F,
    PacketIdentifierInUse = 0x91,
    QuotaExceeded = 0x97,
    SharedSubscriptionsNotSupported = 0x9E,
    SubscriptionIdentifiersNotSupported = 0xA1,
    WildcardSubscriptionsNotSupported = 0xA2,
}

impl SubAckReasonCode {
    #[must_use]
    pub fn granted(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => Self::GrantedQoS0,
            QoS::AtLeastOnce => Self::GrantedQoS1,
            QoS::ExactlyOnce => Self::GrantedQoS2,
        }
    }

    #[must_use]
    pub fn granted_qos(self) -> Option<QoS> {
        match self {
            Self::GrantedQoS0 => Some(QoS::AtMostOnce),
            Self::GrantedQoS1 => Some(QoS::AtLeastOnce),
            Self::GrantedQoS2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self as u8 >= 0x80
    }

    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::GrantedQoS0),
            0x01 => Some(Self::GrantedQoS1),
            0x02 => Some(Self::GrantedQoS2),
            0x80 => Some(Self::UnspecifiedError),
            0x83 => Some(Self::ImplementationSpecificError),
            0x87 => Some(Self::NotAuthorized),
            0x8F => Some(Self::TopicFilterInvalid),
            0x91 => Some(Self::PacketIdentifierInUse),
            0x97 => Some(Self::QuotaExceeded),
            0x9E => Some(Self::SharedSubscriptionsNotSupported),
            0xA1 => Some(Self::SubscriptionIdentifiersNotSupported),
            0xA2 => Some(Self::WildcardSubscriptionsNotSupported),
            _ => None,
        }
    }

    fn valid_in_v311(self) -> bool {
        matches!(
            self,
            Self::GrantedQoS0 | Self::GrantedQoS1 | Self::GrantedQoS2 | Self::UnspecifiedError
        )
    }

    /// Collapses v5-only error codes onto the single 0x80 failure byte.
    #[must_use]
    pub fn to_v311_code(self) -> u8 {
        if self.valid_in_v311() {
            self as u8
        } else {
            0x80
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubAckPacket {
    pub packet_id: u32,
    pub reason_codes: Vec<SubAckReasonCode>,
    pub properties: Properties,
}

impl SubAckPacket {
    #[must_use]
    pub fn new(packet_id: u32, reason_codes: Vec<SubAckReasonCode>) -> Self {
        Self {
            packet_id,
            reason_codes,
            properties: Properties::default(),
        }
    }
}

impl MqttPacket for SubAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::SubAck
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, codec: Codec) -> Result<()> {
        if self.reason_codes.is_empty() {
            return Err(MqttError::MalformedPacket(
                "SUBACK must carry at least one reason code".to_string(),
            ));
        }

        encode_packet_id(buf, self.packet_id, codec.id_width)?;
        if codec.is_v5() {
            self.properties.encode(buf)?;
            for code in &self.reason_codes {
                buf.put_u8(*code as u8);
            }
        } else {
            for code in &self.reason_codes {
                buf.put_u8(code.to_v311_code());
            }
        }
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, _fixed_header: &FixedHeader, codec: Codec) -> Result<Self> {
        let packet_id = decode_packet_id(buf, codec.id_width)?;

        let properties = if codec.is_v5() {
            Properties::decode(buf)?
        } else {
            Properties::default()
        };

        if !buf.has_remaining() {
            return Err(MqttError::MalformedPacket(
                "SUBACK must carry at least one reason code".to_string(),
            ));
        }

        let mut reason_codes = Vec::with_capacity(buf.remaining());
        while buf.has_remaining() {
            let raw = buf.get_u8();
            let code =
                SubAckReasonCode::from_u8(raw).ok_or(MqttError::InvalidReasonCode(raw))?;
            if !codec.is_v5() && !code.valid_in_v311() {
                return Err(MqttError::InvalidReasonCode(raw));
            }
            reason_codes.push(code);
        }

        Ok(Self {
            packet_id,
            reason_codes,
            properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_suback_round_trip_v5() {
        let packet = SubAckPacket::new(
            11,
            vec![
                SubAckReasonCode::GrantedQoS1,
                SubAckReasonCode::TopicFilterInvalid,
            ],
        );

        let mut buf = BytesMut::new();
        packet.encode(&mut buf, Codec::v5()).unwrap();
        let fixed_header = FixedHeader::decode(&mut buf).unwrap();
        let decoded = SubAckPacket::decode_body(&mut buf, &fixed_header, Codec::v5()).unwrap();

        assert_eq!(decoded.packet_id, 11);
        assert_eq!(decoded.reason_codes.len(), 2);
        assert_eq!(decoded.reason_codes[1], SubAckReasonCode::TopicFilterInvalid);
        assert!(decoded.reason_codes[1].is_error());
    }

    #[test]
    fn test_suback_v311_exact_bytes() {
        let packet = SubAckPacket::new(1, vec![SubAckReasonCode::GrantedQoS0]);
        let mut buf = BytesMut::new();
        packet.encode(&mut buf, Codec::v311()).unwrap();
        assert_eq!(&buf[..], &[0x90, 0x03, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn test_suback_v5_only_code_collapses_in_v311() {
        let packet = SubAckPacket::new(2, vec![SubAckReasonCode::QuotaExceeded]);
        let mut buf = BytesMut::new();
        packet.encode(&mut buf, Codec::v311()).unwrap();
        assert_eq!(buf[buf.len() - 1], 0x80);
    }

    #[test]
    fn test_granted_qos_mapping() {
        assert_eq!(
            SubAckReasonCode::granted(QoS::ExactlyOnce).granted_qos(),
            Some(QoS::ExactlyOnce)
        );
        assert_eq!(SubAckReasonCode::UnspecifiedError.granted_qos(), None);
    }

    #[test]
    fn test_suback_empty_codes_rejected() {
        let packet = SubAckPacket::new(5, vec![]);
        let mut buf = BytesMut::new();
        assert!(packet.encode(&mut buf, Codec::v5()).is_err());
    }
}
