use crate::encoding::{decode_packet_id, decode_string, encode_packet_id, encode_string};
use crate::error::{MqttError, Result};
use crate::packet::subscribe_options::SubscriptionOptions;
use crate::packet::{Codec, FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::Properties;
use crate::types::QoS;
use bytes::{Buf, BufMut};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    pub filter: String,
    pub options: SubscriptionOptions,
}

impl TopicFilter {
    #[must_use]
    pub fn new(filter: impl Into<String>, qos: QoS) -> Self {
        Self {
            filter: filter.into(),
            options: SubscriptionOptions::new(qos),
        }
    }

    #[must_use]
    pub fn with_options(filter: impl Into<String>, options: SubscriptionOptions) -> Self {
        Self {
            filter: filter.into(),
            options,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubscribePacket {
    pub packet_id: u32,
    pub filters: Vec<TopicFilter>,
    pub properties: Properties,
}

impl SubscribePacket {
    #[must_use]
    pub fn new(packet_id: u32) -> Self {
        Self {
            packet_id,
            filters: Vec::new(),
            properties: Properties::default(),
        }
    }

    #[must_use]
    pub fn add_filter(mut self, filter: impl Into<String>, qos: QoS) -> Self {
        self.filters.push(TopicFilter::new(filter, qos));
        self
    }

    #[must_use]
    pub fn add_filter_with_options(mut self, filter: TopicFilter) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn with_subscription_identifier(mut self, id: u32) -> Self {
        self.properties.set_subscription_identifier(id);
        self
    }

    #[must_use]
    pub fn subscription_identifier(&self) -> Option<u32> {
        self.properties.get_subscription_identifiers().first().copied()
    }
}

impl MqttPacket for SubscribePacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Subscribe
    }

    fn flags(&self) -> u8 {
        0x02
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, codec: Codec) -> Result<()> {
        if self.filters.is_empty() {
            return Err(MqttError::MalformedPacket(
                "SUBSCRIBE must carry at least one topic filter".to_string(),
            ));
        }

        encode_packet_id(buf, self.packet_id, codec.id_width)?;

        if codec.is_v5() {
            self.properties.encode(buf)?;
        }

        for filter in &self.filters {
            encode_string(buf, &filter.filter)?;
            if codec.is_v5() {
                buf.put_u8(filter.options.encode());
            } else {
                buf.put_u8(filter.options.qos as u8);
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
                "SUBSCRIBE must carry at least one topic filter".to_string(),
            ));
        }

        let mut filters = Vec::new();
        while buf.has_remaining() {
            let filter = decode_string(buf)?;
            if !buf.has_remaining() {
                return Err(MqttError::MalformedPacket(
                    "SUBSCRIBE topic filter missing options byte".to_string(),
                ));
            }

            let options_byte = buf.get_u8();
            let options = if codec.is_v5() {
                SubscriptionOptions::decode(options_byte)?
            } else {
                if options_byte & !0x03 != 0 || options_byte == 3 {
                    return Err(MqttError::MalformedPacket(format!(
                        "Invalid SUBSCRIBE requested QoS byte: 0x{options_byte:02X}"
                    )));
                }
                SubscriptionOptions::new(QoS::from(options_byte))
            };

            filters.push(TopicFilter { filter, options });
        }

        Ok(Self {
            packet_id,
            filters,
            properties,
        })
    }
}
