use super::ack_common::is_valid_publish_ack_reason_code;
use crate::packet::PacketType;

define_ack_packet! {
    /// PUBREC, first acknowledgement of a QoS 2 PUBLISH.
    pub struct PubRecPacket;
    packet_type = PacketType::PubRec;
    flags = 0x00;
    validator = is_valid_publish_ack_reason_code;
    error_prefix = "PUBREC";
}
