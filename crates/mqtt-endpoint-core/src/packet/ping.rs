use crate::error::{MqttError, Result};
use crate::packet::{Codec, FixedHeader, MqttPacket, PacketType};
use bytes::{Buf, BufMut};

/// PINGREQ carries no body in either protocol version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PingReqPacket;

/// PINGRESP carries no body in either protocol version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PingRespPacket;

macro_rules! empty_body_packet {
    ($name:ident, $packet_type:expr, $label:literal) => {
        impl MqttPacket for $name {
            fn packet_type(&self) -> PacketType {
                $packet_type
            }

            fn encode_body<B: BufMut>(&self, _buf: &mut B, _codec: Codec) -> Result<()> {
                Ok(())
            }

            fn decode_body<B: Buf>(
                buf: &mut B,
                fixed_header: &FixedHeader,
                _codec: Codec,
            ) -> Result<Self> {
                if fixed_header.remaining_length != 0 || buf.has_remaining() {
                    return Err(MqttError::MalformedPacket(
                        concat!($label, " must have an empty body").to_string(),
                    ));
                }
                Ok(Self)
            }
        }
    };
}

empty_body_packet!(PingReqPacket, PacketType::PingReq, "PINGREQ");
empty_body_packet!(PingRespPacket, PacketType::PingResp, "PINGRESP");
