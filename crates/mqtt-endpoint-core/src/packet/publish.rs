use crate::encoding::{decode_packet_id, decode_string, encode_packet_id, encode_string};
use crate::error::{MqttError, Result};
use crate::flags::PublishFlags;
use crate::packet::{Codec, FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::{Properties, PropertyId, PropertyValue};
use crate::types::{Message, PublishProperties, QoS};
use bytes::{Buf, BufMut, Bytes};

/// PUBLISH. The topic may be empty on the wire in v5 when a topic alias is
/// carried; the endpoint resolves the alias before delivery.
#[derive(Debug, Clone)]
pub struct PublishPacket {
    pub topic_name: String,
    pub packet_id: Option<u32>,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    pub properties: Properties,
}

impl PublishPacket {
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS) -> Self {
        Self {
            topic_name: topic.into(),
            packet_id: None,
            payload: payload.into(),
            qos,
            retain: false,
            dup: false,
            properties: Properties::default(),
        }
    }

    #[must_use]
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    #[must_use]
    pub fn with_packet_id(mut self, packet_id: u32) -> Self {
        self.packet_id = Some(packet_id);
        self
    }

    fn publish_flags(&self) -> PublishFlags {
        PublishFlags {
            dup: self.dup,
            qos: self.qos,
            retain: self.retain,
        }
    }

    /// Widens into the application-facing message shape.
    #[must_use]
    pub fn to_message(&self) -> Message {
        Message {
            topic: self.topic_name.clone(),
            payload: self.payload.to_vec(),
            qos: self.qos,
            retain: self.retain,
            properties: PublishProperties::from_wire(&self.properties),
        }
    }
}

impl PublishProperties {
    /// Lowers the typed publish options onto the wire property set.
    #[must_use]
    pub fn to_wire(&self) -> Properties {
        let mut wire = Properties::default();
        if let Some(indicator) = self.payload_format_indicator {
            wire.set_payload_format_indicator(indicator);
        }
        if let Some(interval) = self.message_expiry_interval {
            wire.set_message_expiry_interval(interval);
        }
        if let Some(alias) = self.topic_alias {
            wire.set_topic_alias(alias);
        }
        if let Some(topic) = &self.response_topic {
            wire.set_response_topic(topic.clone());
        }
        if let Some(data) = &self.correlation_data {
            wire.set_correlation_data(Bytes::from(data.clone()));
        }
        for id in &self.subscription_identifiers {
            wire.add_subscription_identifier(*id);
        }
        if let Some(content_type) = &self.content_type {
            wire.set_content_type(content_type.clone());
        }
        for (key, value) in &self.user_properties {
            wire.add_user_property(key.clone(), value.clone());
        }
        wire
    }

    #[must_use]
    pub fn from_wire(wire: &Properties) -> Self {
        Self {
            payload_format_indicator: match wire.get(PropertyId::PayloadFormatIndicator) {
                Some(PropertyValue::Byte(v)) => Some(*v != 0),
                _ => None,
            },
            message_expiry_interval: wire.get_message_expiry_interval(),
            topic_alias: wire.get_topic_alias(),
            response_topic: wire.get_response_topic().map(str::to_string),
            correlation_data: wire.get_correlation_data().map(<[u8]>::to_vec),
            user_properties: wire.user_properties(),
            subscription_identifiers: wire.get_subscription_identifiers(),
            content_type: wire.get_content_type().map(str::to_string),
        }
    }
}

impl MqttPacket for PublishPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Publish
    }

    fn flags(&self) -> u8 {
        self.publish_flags().encode()
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, codec: Codec) -> Result<()> {
        encode_string(buf, &self.topic_name)?;

        match (self.qos, self.packet_id) {
            (QoS::AtMostOnce, _) => {}
            (_, Some(id)) => encode_packet_id(buf, id, codec.id_width)?,
            (_, None) => {
                return Err(MqttError::ProtocolError(
                    "QoS > 0 PUBLISH requires a packet identifier".to_string(),
                ))
            }
        }

        if codec.is_v5() {
            self.properties.encode(buf)?;
        }

        buf.put_slice(&self.payload);
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, fixed_header: &FixedHeader, codec: Codec) -> Result<Self> {
        let flags = PublishFlags::decode(fixed_header.flags)?;

        let topic_name = decode_string(buf)?;
        if topic_name.contains('+') || topic_name.contains('#') {
            return Err(MqttError::InvalidTopicName(topic_name));
        }

        let packet_id = if flags.qos == QoS::AtMostOnce {
            None
        } else {
            Some(decode_packet_id(buf, codec.id_width)?)
        };

        let properties = if codec.is_v5() {
            Properties::decode(buf)?
        } else {
            Properties::default()
        };

        // v3.1.1 requires a topic; v5 allows an empty topic when an alias
        // stands in for it.
        if topic_name.is_empty()
            && (!codec.is_v5() || properties.get_topic_alias().is_none())
        {
            return Err(MqttError::InvalidTopicName(
                "PUBLISH topic is empty with no topic alias".to_string(),
            ));
        }

        // Payload runs to the end of the delimited body.
        let payload = buf.copy_to_bytes(buf.remaining());

        Ok(Self {
            topic_name,
            packet_id,
            payload,
            qos: flags.qos,
            retain: flags.retain,
            dup: flags.dup,
            properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet_id::IdWidth;
    use crate::types::ProtocolVersion;
    use bytes::BytesMut;

    fn round_trip(packet: &PublishPacket, codec: Codec) -> PublishPacket {
        let mut buf = BytesMut::new();
        packet.encode(&mut buf, codec).unwrap();
        let fixed_header = FixedHeader::decode(&mut buf).unwrap();
        PublishPacket::decode_body(&mut buf, &fixed_header, codec).unwrap()
    }

    #[test]
    fn test_qos0_round_trip_v311() {
        let packet = PublishPacket::new("topic1", &b"hi"[..], QoS::AtMostOnce);
        let decoded = round_trip(&packet, Codec::v311());
        assert_eq!(decoded.topic_name, "topic1");
        assert_eq!(&decoded.payload[..], b"hi");
        assert_eq!(decoded.qos, QoS::AtMostOnce);
        assert_eq!(decoded.packet_id, None);
        assert!(!decoded.retain);
        assert!(!decoded.dup);
    }

    #[test]
    fn test_qos0_v311_exact_bytes() {
        let packet = PublishPacket::new("topic1", &b"hi"[..], QoS::AtMostOnce);
        let mut buf = BytesMut::new();
        packet.encode(&mut buf, Codec::v311()).unwrap();
        assert_eq!(
            &buf[..],
            &[0x30, 0x0A, 0x00, 0x06, b't', b'o', b'p', b'i', b'c', b'1', b'h', b'i']
        );
    }

    #[test]
    fn test_qos2_round_trip_with_flags() {
        let mut packet = PublishPacket::new("a/b", &b"payload"[..], QoS::ExactlyOnce)
            .with_packet_id(7)
            .with_retain(true);
        packet.dup = true;

        let decoded = round_trip(&packet, Codec::v5());
        assert_eq!(decoded.packet_id, Some(7));
        assert_eq!(decoded.qos, QoS::ExactlyOnce);
        assert!(decoded.retain);
        assert!(decoded.dup);
    }

    #[test]
    fn test_qos1_requires_packet_id() {
        let packet = PublishPacket::new("a", &b"x"[..], QoS::AtLeastOnce);
        let mut buf = BytesMut::new();
        assert!(packet.encode(&mut buf, Codec::v5()).is_err());
    }

    #[test]
    fn test_empty_payload_allowed() {
        let packet = PublishPacket::new("x", Bytes::new(), QoS::AtMostOnce).with_retain(true);
        let decoded = round_trip(&packet, Codec::v5());
        assert!(decoded.payload.is_empty());
        assert!(decoded.retain);
    }

    #[test]
    fn test_wildcard_topic_rejected() {
        let mut buf = BytesMut::new();
        let packet = PublishPacket::new("a/+/b", &b"x"[..], QoS::AtMostOnce);
        packet.encode(&mut buf, Codec::v5()).unwrap();
        let fixed_header = FixedHeader::decode(&mut buf).unwrap();
        assert!(PublishPacket::decode_body(&mut buf, &fixed_header, Codec::v5()).is_err());
    }

    #[test]
    fn test_empty_topic_needs_alias() {
        let packet = PublishPacket::new("", &b"x"[..], QoS::AtMostOnce);
        let mut buf = BytesMut::new();
        packet.encode(&mut buf, Codec::v5()).unwrap();
        let fixed_header = FixedHeader::decode(&mut buf).unwrap();
        assert!(PublishPacket::decode_body(&mut buf, &fixed_header, Codec::v5()).is_err());

        let mut aliased = PublishPacket::new("", &b"x"[..], QoS::AtMostOnce);
        aliased.properties.set_topic_alias(3);
        let mut buf = BytesMut::new();
        aliased.encode(&mut buf, Codec::v5()).unwrap();
        let fixed_header = FixedHeader::decode(&mut buf).unwrap();
        let decoded = PublishPacket::decode_body(&mut buf, &fixed_header, Codec::v5()).unwrap();
        assert_eq!(decoded.properties.get_topic_alias(), Some(3));
    }

    #[test]
    fn test_extended_id_width() {
        let codec = Codec::new(ProtocolVersion::V5, IdWidth::Extended);
        let packet = PublishPacket::new("t", &b"x"[..], QoS::AtLeastOnce).with_packet_id(0x1_0000);
        let mut buf = BytesMut::new();
        packet.encode(&mut buf, codec).unwrap();
        let fixed_header = FixedHeader::decode(&mut buf).unwrap();
        let decoded = PublishPacket::decode_body(&mut buf, &fixed_header, codec).unwrap();
        assert_eq!(decoded.packet_id, Some(0x1_0000));
    }

    #[test]
    fn test_v5_properties_survive() {
        let mut packet = PublishPacket::new("t", &b"x"[..], QoS::AtMostOnce);
        packet.properties.set_content_type("text/plain".to_string());
        packet
            .properties
            .add_user_property("k".to_string(), "v".to_string());

        let decoded = round_trip(&packet, Codec::v5());
        assert_eq!(decoded.properties.get_content_type(), Some("text/plain"));
        assert_eq!(decoded.properties.get_user_property_value("k"), Some("v"));
    }
}
