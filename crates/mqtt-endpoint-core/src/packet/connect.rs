use crate::encoding::{decode_binary, decode_string, encode_binary, encode_string};
use crate::error::{MqttError, Result};
use crate::flags::ConnectFlags;
use crate::packet::{Codec, FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::Properties;
use crate::types::{
    ConnectOptions, ConnectProperties, ProtocolVersion, QoS, WillMessage, WillProperties,
};
use bytes::{Buf, BufMut, Bytes};

/// Exact protocol name for both 3.1.1 and 5.0. The 3.1 name `MQIsdp` is not
/// accepted.
const PROTOCOL_NAME: &[u8] = b"MQTT";

/// CONNECT. Carries its own protocol version: the codec context is not yet
/// negotiated when a server decodes it.
#[derive(Debug, Clone)]
pub struct ConnectPacket {
    pub protocol_version: ProtocolVersion,
    pub clean_start: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub will: Option<WillMessage>,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    pub properties: Properties,
}

impl ConnectPacket {
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            protocol_version: ProtocolVersion::V5,
            clean_start: true,
            keep_alive: 60,
            client_id: client_id.into(),
            will: None,
            username: None,
            password: None,
            properties: Properties::default(),
        }
    }

    #[must_use]
    pub fn from_options(options: &ConnectOptions) -> Self {
        Self {
            protocol_version: options.protocol_version,
            clean_start: options.clean_start,
            keep_alive: u16::try_from(options.keep_alive.as_secs()).unwrap_or(u16::MAX),
            client_id: options.client_id.clone(),
            will: options.will.clone(),
            username: options.username.clone(),
            password: options.password.clone(),
            properties: options.properties.to_wire(),
        }
    }

    fn connect_flags(&self) -> ConnectFlags {
        ConnectFlags {
            clean_start: self.clean_start,
            will_flag: self.will.is_some(),
            will_qos: self.will.as_ref().map_or(0, |w| w.qos as u8),
            will_retain: self.will.as_ref().is_some_and(|w| w.retain),
            password_flag: self.password.is_some(),
            username_flag: self.username.is_some(),
        }
    }

    #[must_use]
    pub fn session_expiry_interval(&self) -> Option<u32> {
        self.properties.get_session_expiry_interval()
    }
}

impl MqttPacket for ConnectPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Connect
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, _codec: Codec) -> Result<()> {
        buf.put_u16(PROTOCOL_NAME.len() as u16);
        buf.put_slice(PROTOCOL_NAME);
        buf.put_u8(self.protocol_version.as_u8());
        buf.put_u8(self.connect_flags().encode());
        buf.put_u16(self.keep_alive);

        let v5 = self.protocol_version == ProtocolVersion::V5;
        if v5 {
            self.properties.encode(buf)?;
        }

        encode_string(buf, &self.client_id)?;

        if let Some(will) = &self.will {
            if v5 {
                encode_will_properties(&will.properties, buf)?;
            }
            encode_string(buf, &will.topic)?;
            encode_binary(buf, &will.payload)?;
        }

        if let Some(username) = &self.username {
            encode_string(buf, username)?;
        }
        if let Some(password) = &self.password {
            encode_binary(buf, password)?;
        }
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, _fixed_header: &FixedHeader, _codec: Codec) -> Result<Self> {
        if buf.remaining() < 2 + PROTOCOL_NAME.len() {
            return Err(MqttError::MalformedPacket(
                "CONNECT truncated before protocol name".to_string(),
            ));
        }

        let name_len = usize::from(buf.get_u16());
        if name_len != PROTOCOL_NAME.len() || buf.remaining() < name_len {
            return Err(MqttError::MalformedPacket(format!(
                "CONNECT protocol name length {name_len}"
            )));
        }
        let mut name = [0u8; 4];
        buf.copy_to_slice(&mut name);
        // Reject only on mismatch: exactly the four bytes `MQTT`.
        if name != PROTOCOL_NAME {
            return Err(MqttError::MalformedPacket(
                "CONNECT protocol name is not MQTT".to_string(),
            ));
        }

        if buf.remaining() < 4 {
            return Err(MqttError::MalformedPacket(
                "CONNECT truncated after protocol name".to_string(),
            ));
        }
        let level = buf.get_u8();
        let protocol_version =
            ProtocolVersion::try_from(level).map_err(|()| MqttError::UnsupportedProtocolVersion)?;
        let v5 = protocol_version == ProtocolVersion::V5;

        let flags = ConnectFlags::decode(buf.get_u8())?;
        if !v5 && flags.password_flag && !flags.username_flag {
            return Err(MqttError::MalformedPacket(
                "CONNECT password flag without username flag".to_string(),
            ));
        }

        let keep_alive = buf.get_u16();

        let properties = if v5 {
            Properties::decode(buf)?
        } else {
            Properties::default()
        };

        let client_id = decode_string(buf)?;

        let will = if flags.will_flag {
            let will_properties = if v5 {
                decode_will_properties(buf)?
            } else {
                WillProperties::default()
            };
            let topic = decode_string(buf)?;
            let payload = decode_binary(buf)?;
            Some(WillMessage {
                topic,
                payload: payload.to_vec(),
                qos: QoS::from(flags.will_qos),
                retain: flags.will_retain,
                properties: will_properties,
            })
        } else {
            None
        };

        let username = if flags.username_flag {
            Some(decode_string(buf)?)
        } else {
            None
        };
        let password = if flags.password_flag {
            Some(decode_binary(buf)?.to_vec())
        } else {
            None
        };

        Ok(Self {
            protocol_version,
            clean_start: flags.clean_start,
            keep_alive,
            client_id,
            will,
            username,
            password,
            properties,
        })
    }
}

fn encode_will_properties<B: BufMut>(props: &WillProperties, buf: &mut B) -> Result<()> {
    let mut wire = Properties::default();
    if let Some(delay) = props.will_delay_interval {
        wire.set_will_delay_interval(delay);
    }
    if let Some(indicator) = props.payload_format_indicator {
        wire.set_payload_format_indicator(indicator);
    }
    if let Some(expiry) = props.message_expiry_interval {
        wire.set_message_expiry_interval(expiry);
    }
    if let Some(content_type) = &props.content_type {
        wire.set_content_type(content_type.clone());
    }
    if let Some(topic) = &props.response_topic {
        wire.set_response_topic(topic.clone());
    }
    if let Some(data) = &props.correlation_data {
        wire.set_correlation_data(Bytes::from(data.clone()));
    }
    for (key, value) in &props.user_properties {
        wire.add_user_property(key.clone(), value.clone());
    }
    wire.encode(buf)
}

fn decode_will_properties<B: Buf>(buf: &mut B) -> Result<WillProperties> {
    let wire = Properties::decode(buf)?;
    Ok(WillProperties {
        will_delay_interval: wire.get_will_delay_interval(),
        payload_format_indicator: wire
            .get(crate::protocol::v5::properties::PropertyId::PayloadFormatIndicator)
            .and_then(|value| match value {
                crate::protocol::v5::properties::PropertyValue::Byte(v) => Some(*v != 0),
                _ => None,
            }),
        message_expiry_interval: wire.get_message_expiry_interval(),
        content_type: wire.get_content_type().map(str::to_string),
        response_topic: wire.get_response_topic().map(str::to_string),
        correlation_data: wire.get_correlation_data().map(<[u8]>::to_vec),
        user_properties: wire.user_properties(),
    })
}

impl ConnectProperties {
    /// Lowers the typed connect options onto the wire property set.
    #[must_use]
    pub fn to_wire(&self) -> Properties {
        let mut wire = Properties::default();
        if let Some(interval) = self.session_expiry_interval {
            wire.set_session_expiry_interval(interval);
        }
        if let Some(maximum) = self.receive_maximum {
            wire.set_receive_maximum(maximum);
        }
        if let Some(size) = self.maximum_packet_size {
            wire.set_maximum_packet_size(size);
        }
        if let Some(maximum) = self.topic_alias_maximum {
            wire.set_topic_alias_maximum(maximum);
        }
        if let Some(method) = &self.authentication_method {
            wire.set_authentication_method(method.clone());
        }
        if let Some(data) = &self.authentication_data {
            wire.set_authentication_data(Bytes::from(data.clone()));
        }
        for (key, value) in &self.user_properties {
            wire.add_user_property(key.clone(), value.clone());
        }
        wire
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn round_trip(packet: &ConnectPacket) -> ConnectPacket {
        let mut buf = BytesMut::new();
        packet.encode(&mut buf, Codec::default()).unwrap();
        let fixed_header = FixedHeader::decode(&mut buf).unwrap();
        ConnectPacket::decode_body(&mut buf, &fixed_header, Codec::default()).unwrap()
    }

    #[test]
    fn test_v311_minimal_connect_bytes() {
        let mut packet = ConnectPacket::new("cid1");
        packet.protocol_version = ProtocolVersion::V311;
        packet.keep_alive = 0;

        let mut buf = BytesMut::new();
        packet.encode(&mut buf, Codec::v311()).unwrap();

        assert_eq!(
            &buf[..],
            &[
                0x10, 0x10, // fixed header, remaining length 16
                0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, // name + level
                0x02, // clean session
                0x00, 0x00, // keep alive
                0x00, 0x04, b'c', b'i', b'd', b'1',
            ]
        );
    }

    #[test]
    fn test_round_trip_full_v5() {
        let mut packet = ConnectPacket::new("client-7");
        packet.keep_alive = 30;
        packet.clean_start = false;
        packet.username = Some("user".to_string());
        packet.password = Some(b"secret".to_vec());
        packet.properties.set_session_expiry_interval(0x1234_5678);
        packet.properties.set_receive_maximum(0x1234);
        packet
            .properties
            .add_user_property("key1".to_string(), "val1".to_string());
        packet
            .properties
            .set_authentication_method("test authentication method".to_string());
        packet.will = Some(
            WillMessage::new("will/topic", b"gone".to_vec())
                .with_qos(QoS::AtLeastOnce)
                .with_retain(true)
                .with_delay_interval(10),
        );

        let decoded = round_trip(&packet);
        assert_eq!(decoded.protocol_version, ProtocolVersion::V5);
        assert_eq!(decoded.client_id, "client-7");
        assert!(!decoded.clean_start);
        assert_eq!(decoded.keep_alive, 30);
        assert_eq!(decoded.username.as_deref(), Some("user"));
        assert_eq!(decoded.password.as_deref(), Some(&b"secret"[..]));
        assert_eq!(decoded.session_expiry_interval(), Some(0x1234_5678));
        assert_eq!(decoded.properties.get_receive_maximum(), Some(0x1234));
        assert_eq!(
            decoded.properties.get_user_property_value("key1"),
            Some("val1")
        );
        assert_eq!(
            decoded.properties.get_authentication_method(),
            Some("test authentication method")
        );

        let will = decoded.will.unwrap();
        assert_eq!(will.topic, "will/topic");
        assert_eq!(will.payload, b"gone");
        assert_eq!(will.qos, QoS::AtLeastOnce);
        assert!(will.retain);
        assert_eq!(will.properties.will_delay_interval, Some(10));
    }

    #[test]
    fn test_rejects_wrong_protocol_name() {
        // v3.1-style MQIsdp header.
        let mut buf = BytesMut::new();
        buf.put_u16(6);
        buf.put_slice(b"MQIsdp");
        buf.put_u8(3);
        buf.put_u8(0x02);
        buf.put_u16(0);

        let fixed_header = FixedHeader::new(PacketType::Connect, 0, buf.len() as u32);
        assert!(ConnectPacket::decode_body(&mut buf, &fixed_header, Codec::default()).is_err());

        // Correct length, wrong bytes.
        let mut buf = BytesMut::new();
        buf.put_u16(4);
        buf.put_slice(b"MQTX");
        buf.put_u8(4);
        buf.put_u8(0x02);
        buf.put_u16(0);
        buf.put_u16(0);

        let fixed_header = FixedHeader::new(PacketType::Connect, 0, buf.len() as u32);
        assert!(ConnectPacket::decode_body(&mut buf, &fixed_header, Codec::default()).is_err());
    }

    #[test]
    fn test_accepts_exact_mqtt_name() {
        // The name comparison must only fail on mismatch, never on a match.
        let mut packet = ConnectPacket::new("ok");
        packet.protocol_version = ProtocolVersion::V311;
        let decoded = round_trip(&packet);
        assert_eq!(decoded.client_id, "ok");
    }

    #[test]
    fn test_rejects_unknown_level() {
        let mut buf = BytesMut::new();
        buf.put_u16(4);
        buf.put_slice(b"MQTT");
        buf.put_u8(3);
        buf.put_u8(0x02);
        buf.put_u16(0);
        buf.put_u16(0);

        let fixed_header = FixedHeader::new(PacketType::Connect, 0, buf.len() as u32);
        let err =
            ConnectPacket::decode_body(&mut buf, &fixed_header, Codec::default()).unwrap_err();
        assert!(matches!(err, MqttError::UnsupportedProtocolVersion));
    }

    #[test]
    fn test_v311_password_requires_username() {
        let mut buf = BytesMut::new();
        buf.put_u16(4);
        buf.put_slice(b"MQTT");
        buf.put_u8(4);
        buf.put_u8(0x42); // clean session + password flag, no username flag
        buf.put_u16(0);
        buf.put_u16(0);

        let fixed_header = FixedHeader::new(PacketType::Connect, 0, buf.len() as u32);
        assert!(ConnectPacket::decode_body(&mut buf, &fixed_header, Codec::default()).is_err());
    }

    #[test]
    fn test_empty_client_id_round_trips() {
        let packet = ConnectPacket::new("");
        let decoded = round_trip(&packet);
        assert!(decoded.client_id.is_empty());
    }
}
