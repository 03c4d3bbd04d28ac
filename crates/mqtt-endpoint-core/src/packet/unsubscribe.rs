use crate::encoding::{decode_packet_id, decode_string, encode_packet_id, encode_string};
use crate::error::{MqttError, Result};
use crate::packet::{Codec, FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::Properties;
use bytes::{Buf, BufMut};

#[derive(Debug, Clone)]
pub struct UnsubscribePacket {
    pub packet_id: u32,
    pub filters: Vec<String>,
    pub properties: Properties,
}

impl UnsubscribePacket {
    #[must_use]
    pub fn new(packet_id: u32) -> Self {
        Self {
            packet_id,
            filters: Vec::new(),
            properties: Properties::default(),
        }
    }

    #[must_use]
    pub fn add_filter(mut self, filter: impl Into<String>) -> Self {
        self.filters.push(filter.into());
        self
    }
}

impl MqttPacket for UnsubscribePacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Unsubscribe
    }

    fn flags(&self) -> u8 {
        0x02
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, codec: Codec) -> Result<()> {
        if self.filters.is_empty() {
            return Err(MqttError::MalformedPacket(
                "UNSUBSCRIBE must carry at least one topic filter".to_string(),
            ));
        }

        encode_packet_id(buf, self.packet_id, codec.id_width)?;
        if codec.is_v5() {
            self.properties.encode(buf)?;
        }
        for filter in &self.filters {
            encode_string(buf, filter)?;
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
                "UNSUBSCRIBE must carry at least one topic filter".to_string(),
            ));
        }

        let mut filters = Vec::new();
        while buf.has_remaining() {
            filters.push(decode_string(buf)?);
        }

        Ok(Self {
            packet_id,
            filters,
            properties,
        })
    }
}
