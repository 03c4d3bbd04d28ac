use super::ack_common::is_valid_publish_ack_reason_code;
use crate::packet::PacketType;

define_ack_packet! {
    /// PUBACK, the single acknowledgement of a QoS 1 PUBLISH.
    pub struct PubAckPacket;
    packet_type = PacketType::PubAck;
    flags = 0x00;
    validator = is_valid_publish_ack_reason_code;
    error_prefix = "PUBACK";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Codec, FixedHeader, MqttPacket};
    use crate::protocol::v5::properties::PropertyId;
    use crate::types::ReasonCode;
    use bytes::{BufMut, BytesMut};

    #[test]
    fn test_puback_basic() {
        let packet = PubAckPacket::new(123);
        assert_eq!(packet.packet_id, 123);
        assert_eq!(packet.reason_code, ReasonCode::Success);
        assert!(packet.properties.is_empty());
    }

    #[test]
    fn test_puback_minimal_v5_body_is_just_the_id() {
        let packet = PubAckPacket::new(789);
        let mut buf = BytesMut::new();
        packet.encode(&mut buf, Codec::v5()).unwrap();

        // type/flags byte, remaining length 2, packet id.
        assert_eq!(&buf[..], &[0x40, 0x02, 0x03, 0x15]);
    }

    #[test]
    fn test_puback_round_trip_with_reason_and_props() {
        let packet = PubAckPacket::new_with_reason(999, ReasonCode::QuotaExceeded)
            .with_user_property("quota".to_string(), "exceeded".to_string());

        let mut buf = BytesMut::new();
        packet.encode(&mut buf, Codec::v5()).unwrap();

        let fixed_header = FixedHeader::decode(&mut buf).unwrap();
        let decoded = PubAckPacket::decode_body(&mut buf, &fixed_header, Codec::v5()).unwrap();

        assert_eq!(decoded.packet_id, 999);
        assert_eq!(decoded.reason_code, ReasonCode::QuotaExceeded);
        assert!(decoded.properties.contains(PropertyId::UserProperty));
    }

    #[test]
    fn test_puback_v311_two_byte_body() {
        let mut buf = BytesMut::new();
        buf.put_u16(1234);

        let fixed_header = FixedHeader::new(PacketType::PubAck, 0, 2);
        let decoded = PubAckPacket::decode_body(&mut buf, &fixed_header, Codec::v311()).unwrap();
        assert_eq!(decoded.packet_id, 1234);
        assert_eq!(decoded.reason_code, ReasonCode::Success);
    }

    #[test]
    fn test_puback_wide_id_round_trip() {
        let codec = Codec::new(crate::types::ProtocolVersion::V5, crate::packet_id::IdWidth::Extended);
        let packet = PubAckPacket::new(0x0002_0001);
        let mut buf = BytesMut::new();
        packet.encode(&mut buf, codec).unwrap();

        let fixed_header = FixedHeader::decode(&mut buf).unwrap();
        assert_eq!(fixed_header.remaining_length, 4);
        let decoded = PubAckPacket::decode_body(&mut buf, &fixed_header, codec).unwrap();
        assert_eq!(decoded.packet_id, 0x0002_0001);
    }

    #[test]
    fn test_puback_invalid_reason_code() {
        let mut buf = BytesMut::new();
        buf.put_u16(123);
        buf.put_u8(0xFF);

        let fixed_header = FixedHeader::new(PacketType::PubAck, 0, 3);
        assert!(PubAckPacket::decode_body(&mut buf, &fixed_header, Codec::v5()).is_err());
    }

    #[test]
    fn test_puback_missing_packet_id() {
        let mut buf = BytesMut::new();
        buf.put_u8(0);

        let fixed_header = FixedHeader::new(PacketType::PubAck, 0, 1);
        assert!(PubAckPacket::decode_body(&mut buf, &fixed_header, Codec::v5()).is_err());
    }
}
