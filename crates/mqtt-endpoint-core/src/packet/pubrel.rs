use super::ack_common::is_valid_pubrel_reason_code;
use crate::packet::PacketType;

define_ack_packet! {
    /// PUBREL, second leg of the QoS 2 exchange. The fixed-header low nibble
    /// is mandated to be 0010.
    pub struct PubRelPacket;
    packet_type = PacketType::PubRel;
    flags = 0x02;
    validator = is_valid_pubrel_reason_code;
    error_prefix = "PUBREL";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Codec, FixedHeader, MqttPacket};
    use crate::types::ReasonCode;
    use bytes::{BufMut, BytesMut};

    #[test]
    fn test_pubrel_carries_mandated_flags() {
        let packet = PubRelPacket::new(7);
        let mut buf = BytesMut::new();
        packet.encode(&mut buf, Codec::v5()).unwrap();
        assert_eq!(buf[0], 0x62);
    }

    #[test]
    fn test_pubrel_round_trip() {
        let packet = PubRelPacket::new_with_reason(7, ReasonCode::PacketIdentifierNotFound);
        let mut buf = BytesMut::new();
        packet.encode(&mut buf, Codec::v5()).unwrap();

        let fixed_header = FixedHeader::decode(&mut buf).unwrap();
        assert_eq!(fixed_header.flags, 0x02);
        let decoded = PubRelPacket::decode_body(&mut buf, &fixed_header, Codec::v5()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_pubrel_rejects_publish_ack_reasons() {
        let mut buf = BytesMut::new();
        buf.put_u16(3);
        buf.put_u8(u8::from(ReasonCode::QuotaExceeded));

        let fixed_header = FixedHeader::new(PacketType::PubRel, 0x02, 3);
        assert!(PubRelPacket::decode_body(&mut buf, &fixed_header, Codec::v5()).is_err());
    }
}
