//! Control packet framing: fixed header, the per-kind codecs, and the
//! `Packet` sum type the frame reader hands to the endpoint.
//!
//! Every codec is a pure function of the packet value and a [`Codec`]
//! context (protocol version + packet-id width). Nothing in here performs
//! I/O.

#[macro_use]
mod ack_common;

pub mod auth;
pub mod connack;
pub mod connect;
pub mod disconnect;
pub mod ping;
pub mod puback;
pub mod pubcomp;
pub mod publish;
pub mod pubrec;
pub mod pubrel;
pub mod suback;
pub mod subscribe;
pub mod subscribe_options;
pub mod unsuback;
pub mod unsubscribe;

use crate::encoding::{decode_variable_int, encode_variable_int, MAX_REMAINING_LENGTH};
use crate::error::{MqttError, Result};
use crate::packet_id::IdWidth;
use crate::types::ProtocolVersion;
use bytes::{Buf, BufMut};

pub use auth::AuthPacket;
pub use connack::ConnAckPacket;
pub use connect::ConnectPacket;
pub use disconnect::DisconnectPacket;
pub use ping::{PingReqPacket, PingRespPacket};
pub use puback::PubAckPacket;
pub use pubcomp::PubCompPacket;
pub use publish::PublishPacket;
pub use pubrec::PubRecPacket;
pub use pubrel::PubRelPacket;
pub use suback::{SubAckPacket, SubAckReasonCode};
pub use subscribe::{SubscribePacket, TopicFilter};
pub use subscribe_options::SubscriptionOptions;
pub use unsuback::UnsubAckPacket;
pub use unsubscribe::UnsubscribePacket;

/// Codec context fixed at CONNECT time: every packet on a connection is
/// encoded and decoded against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Codec {
    pub version: ProtocolVersion,
    pub id_width: IdWidth,
}

impl Codec {
    #[must_use]
    pub fn new(version: ProtocolVersion, id_width: IdWidth) -> Self {
        Self { version, id_width }
    }

    #[must_use]
    pub fn v311() -> Self {
        Self::new(ProtocolVersion::V311, IdWidth::Standard)
    }

    #[must_use]
    pub fn v5() -> Self {
        Self::new(ProtocolVersion::V5, IdWidth::Standard)
    }

    #[must_use]
    pub fn is_v5(self) -> bool {
        self.version == ProtocolVersion::V5
    }
}

/// Control packet kind, encoded in the high nibble of the first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
    Auth = 15,
}

impl PacketType {
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Connect),
            2 => Some(Self::ConnAck),
            3 => Some(Self::Publish),
            4 => Some(Self::PubAck),
            5 => Some(Self::PubRec),
            6 => Some(Self::PubComp),
            7 => Some(Self::PubRel),
            8 => Some(Self::Subscribe),
            9 => Some(Self::SubAck),
            10 => Some(Self::Unsubscribe),
            11 => Some(Self::UnsubAck),
            12 => Some(Self::PingReq),
            13 => Some(Self::PingResp),
            14 => Some(Self::Disconnect),
            15 => Some(Self::Auth),
            _ => None,
        }
    }

    /// Mandated fixed-header low nibble, or `None` where the nibble carries
    /// packet flags (PUBLISH).
    #[must_use]
    pub fn required_flags(self) -> Option<u8> {
        match self {
            Self::Publish => None,
            Self::PubRel | Self::Subscribe | Self::Unsubscribe => Some(0x02),
            _ => Some(0x00),
        }
    }
}

/// Decoded fixed header: kind, flag nibble and body length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    pub flags: u8,
    pub remaining_length: u32,
}

impl FixedHeader {
    #[must_use]
    pub fn new(packet_type: PacketType, flags: u8, remaining_length: u32) -> Self {
        Self {
            packet_type,
            flags,
            remaining_length,
        }
    }

    /// Validates the first byte of a packet, before the remaining length is
    /// known. Used by the streaming frame reader.
    pub fn parse_first_byte(byte: u8) -> Result<(PacketType, u8)> {
        let type_bits = byte >> 4;
        let packet_type =
            PacketType::from_u8(type_bits).ok_or(MqttError::InvalidPacketType(type_bits))?;
        let flags = byte & 0x0F;

        if let Some(required) = packet_type.required_flags() {
            if flags != required {
                return Err(MqttError::MalformedPacket(format!(
                    "{packet_type:?} fixed header flags must be 0x{required:02X}, got 0x{flags:02X}"
                )));
            }
        }
        Ok((packet_type, flags))
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        if self.remaining_length > MAX_REMAINING_LENGTH {
            return Err(MqttError::PacketTooLarge {
                size: self.remaining_length as usize,
                max: MAX_REMAINING_LENGTH as usize,
            });
        }
        buf.put_u8(((self.packet_type as u8) << 4) | (self.flags & 0x0F));
        encode_variable_int(buf, self.remaining_length)
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        if !buf.has_remaining() {
            return Err(MqttError::UnexpectedEof);
        }
        let (packet_type, flags) = Self::parse_first_byte(buf.get_u8())?;
        let remaining_length = decode_variable_int(buf)?;
        Ok(Self {
            packet_type,
            flags,
            remaining_length,
        })
    }
}

/// Per-kind codec interface. `encode` frames the body with a fixed header;
/// `decode_body` assumes the frame reader already delimited the body.
pub trait MqttPacket: Sized {
    fn packet_type(&self) -> PacketType;

    fn flags(&self) -> u8 {
        0
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, codec: Codec) -> Result<()>;

    fn decode_body<B: Buf>(buf: &mut B, fixed_header: &FixedHeader, codec: Codec) -> Result<Self>;

    fn encode<B: BufMut>(&self, buf: &mut B, codec: Codec) -> Result<()> {
        let mut body = Vec::new();
        self.encode_body(&mut body, codec)?;
        let header = FixedHeader::new(
            self.packet_type(),
            self.flags(),
            u32::try_from(body.len()).map_err(|_| MqttError::PacketTooLarge {
                size: body.len(),
                max: MAX_REMAINING_LENGTH as usize,
            })?,
        );
        header.encode(buf)?;
        buf.put_slice(&body);
        Ok(())
    }
}

/// A decoded control packet of any kind.
#[derive(Debug, Clone)]
pub enum Packet {
    Connect(ConnectPacket),
    ConnAck(ConnAckPacket),
    Publish(PublishPacket),
    PubAck(PubAckPacket),
    PubRec(PubRecPacket),
    PubRel(PubRelPacket),
    PubComp(PubCompPacket),
    Subscribe(SubscribePacket),
    SubAck(SubAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubAck(UnsubAckPacket),
    PingReq(PingReqPacket),
    PingResp(PingRespPacket),
    Disconnect(DisconnectPacket),
    Auth(AuthPacket),
}

impl Packet {
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Connect(_) => PacketType::Connect,
            Self::ConnAck(_) => PacketType::ConnAck,
            Self::Publish(_) => PacketType::Publish,
            Self::PubAck(_) => PacketType::PubAck,
            Self::PubRec(_) => PacketType::PubRec,
            Self::PubRel(_) => PacketType::PubRel,
            Self::PubComp(_) => PacketType::PubComp,
            Self::Subscribe(_) => PacketType::Subscribe,
            Self::SubAck(_) => PacketType::SubAck,
            Self::Unsubscribe(_) => PacketType::Unsubscribe,
            Self::UnsubAck(_) => PacketType::UnsubAck,
            Self::PingReq(_) => PacketType::PingReq,
            Self::PingResp(_) => PacketType::PingResp,
            Self::Disconnect(_) => PacketType::Disconnect,
            Self::Auth(_) => PacketType::Auth,
        }
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B, codec: Codec) -> Result<()> {
        match self {
            Self::Connect(p) => p.encode(buf, codec),
            Self::ConnAck(p) => p.encode(buf, codec),
            Self::Publish(p) => p.encode(buf, codec),
            Self::PubAck(p) => p.encode(buf, codec),
            Self::PubRec(p) => p.encode(buf, codec),
            Self::PubRel(p) => p.encode(buf, codec),
            Self::PubComp(p) => p.encode(buf, codec),
            Self::Subscribe(p) => p.encode(buf, codec),
            Self::SubAck(p) => p.encode(buf, codec),
            Self::Unsubscribe(p) => p.encode(buf, codec),
            Self::UnsubAck(p) => p.encode(buf, codec),
            Self::PingReq(p) => p.encode(buf, codec),
            Self::PingResp(p) => p.encode(buf, codec),
            Self::Disconnect(p) => p.encode(buf, codec),
            Self::Auth(p) => p.encode(buf, codec),
        }
    }

    /// Decodes a body already delimited by `fixed_header`.
    pub fn decode_body<B: Buf>(
        buf: &mut B,
        fixed_header: &FixedHeader,
        codec: Codec,
    ) -> Result<Self> {
        let packet = match fixed_header.packet_type {
            PacketType::Connect => Self::Connect(ConnectPacket::decode_body(buf, fixed_header, codec)?),
            PacketType::ConnAck => Self::ConnAck(ConnAckPacket::decode_body(buf, fixed_header, codec)?),
            PacketType::Publish => Self::Publish(PublishPacket::decode_body(buf, fixed_header, codec)?),
            PacketType::PubAck => Self::PubAck(PubAckPacket::decode_body(buf, fixed_header, codec)?),
            PacketType::PubRec => Self::PubRec(PubRecPacket::decode_body(buf, fixed_header, codec)?),
            PacketType::PubRel => Self::PubRel(PubRelPacket::decode_body(buf, fixed_header, codec)?),
            PacketType::PubComp => Self::PubComp(PubCompPacket::decode_body(buf, fixed_header, codec)?),
            PacketType::Subscribe => {
                Self::Subscribe(SubscribePacket::decode_body(buf, fixed_header, codec)?)
            }
            PacketType::SubAck => Self::SubAck(SubAckPacket::decode_body(buf, fixed_header, codec)?),
            PacketType::Unsubscribe => {
                Self::Unsubscribe(UnsubscribePacket::decode_body(buf, fixed_header, codec)?)
            }
            PacketType::UnsubAck => {
                Self::UnsubAck(UnsubAckPacket::decode_body(buf, fixed_header, codec)?)
            }
            PacketType::PingReq => Self::PingReq(PingReqPacket::decode_body(buf, fixed_header, codec)?),
            PacketType::PingResp => {
                Self::PingResp(PingRespPacket::decode_body(buf, fixed_header, codec)?)
            }
            PacketType::Disconnect => {
                Self::Disconnect(DisconnectPacket::decode_body(buf, fixed_header, codec)?)
            }
            PacketType::Auth => {
                if !codec.is_v5() {
                    return Err(MqttError::ProtocolError(
                        "AUTH packet is not valid in MQTT 3.1.1".to_string(),
                    ));
                }
                Self::Auth(AuthPacket::decode_body(buf, fixed_header, codec)?)
            }
        };
        Ok(packet)
    }

    /// Decodes one complete packet from a contiguous buffer.
    pub fn decode<B: Buf>(buf: &mut B, codec: Codec) -> Result<Self> {
        let fixed_header = FixedHeader::decode(buf)?;
        if buf.remaining() < fixed_header.remaining_length as usize {
            return Err(MqttError::UnexpectedEof);
        }
        Self::decode_body(buf, &fixed_header, codec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_from_u8() {
        assert_eq!(PacketType::from_u8(1), Some(PacketType::Connect));
        assert_eq!(PacketType::from_u8(15), Some(PacketType::Auth));
        assert_eq!(PacketType::from_u8(0), None);
        assert_eq!(PacketType::from_u8(16), None);
    }

    #[test]
    fn test_required_flags_table() {
        assert_eq!(PacketType::Publish.required_flags(), None);
        assert_eq!(PacketType::PubRel.required_flags(), Some(0x02));
        assert_eq!(PacketType::Subscribe.required_flags(), Some(0x02));
        assert_eq!(PacketType::Unsubscribe.required_flags(), Some(0x02));
        assert_eq!(PacketType::Connect.required_flags(), Some(0x00));
        assert_eq!(PacketType::PingReq.required_flags(), Some(0x00));
    }

    #[test]
    fn test_first_byte_flag_validation() {
        // PUBREL with low nibble 0000 is malformed.
        assert!(FixedHeader::parse_first_byte(0x60).is_err());
        assert!(FixedHeader::parse_first_byte(0x62).is_ok());
        // CONNECT with any nonzero nibble is malformed.
        assert!(FixedHeader::parse_first_byte(0x11).is_err());
        // PUBLISH nibble is free-form at this layer.
        assert!(FixedHeader::parse_first_byte(0x3D).is_ok());
        // Reserved type 0.
        assert!(FixedHeader::parse_first_byte(0x00).is_err());
    }

    #[test]
    fn test_fixed_header_round_trip() {
        let header = FixedHeader::new(PacketType::Subscribe, 0x02, 321);
        let mut buf = Vec::new();
        header.encode(&mut buf).unwrap();

        let mut bytes = bytes::Bytes::from(buf);
        let decoded = FixedHeader::decode(&mut bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_auth_rejected_for_v311() {
        let header = FixedHeader::new(PacketType::Auth, 0, 0);
        let mut empty = bytes::Bytes::new();
        let result = Packet::decode_body(&mut empty, &header, Codec::v311());
        assert!(result.is_err());
    }
}
