use super::ack_common::is_valid_pubrel_reason_code;
use crate::packet::PacketType;

define_ack_packet! {
    /// PUBCOMP, final leg of the QoS 2 exchange.
    pub struct PubCompPacket;
    packet_type = PacketType::PubComp;
    flags = 0x00;
    validator = is_valid_pubrel_reason_code;
    error_prefix = "PUBCOMP";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Codec, FixedHeader, MqttPacket};
    use crate::types::ReasonCode;
    use bytes::{BufMut, BytesMut};

    #[test]
    fn test_pubcomp_round_trip() {
        let packet = PubCompPacket::new(4242);
        let mut buf = BytesMut::new();
        packet.encode(&mut buf, Codec::v5()).unwrap();

        let fixed_header = FixedHeader::decode(&mut buf).unwrap();
        let decoded = PubCompPacket::decode_body(&mut buf, &fixed_header, Codec::v5()).unwrap();
        assert_eq!(decoded.packet_id, 4242);
        assert_eq!(decoded.reason_code, ReasonCode::Success);
    }

    #[test]
    fn test_pubcomp_packet_identifier_not_found() {
        let mut buf = BytesMut::new();
        buf.put_u16(9);
        buf.put_u8(u8::from(ReasonCode::PacketIdentifierNotFound));

        let fixed_header = FixedHeader::new(PacketType::PubComp, 0, 3);
        let decoded = PubCompPacket::decode_body(&mut buf, &fixed_header, Codec::v5()).unwrap();
        assert_eq!(decoded.reason_code, ReasonCode::PacketIdentifierNotFound);
    }
}
