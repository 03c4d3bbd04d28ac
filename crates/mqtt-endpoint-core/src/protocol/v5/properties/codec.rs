use super::{Properties, PropertyId, PropertyValue, PropertyValueType};
use crate::encoding::{
    binary_len, decode_binary, decode_string, decode_variable_int, encode_binary, encode_string,
    encode_variable_int, string_len, variable_int_len,
};
use crate::error::{MqttError, Result};
use bytes::{Buf, BufMut};

impl Properties {
    /// Appends the property-length varint followed by every property.
    ///
    /// # Errors
    /// Returns an error if a value fails primitive encoding.
    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        let body_len = self.body_len();
        encode_variable_int(
            buf,
            u32::try_from(body_len).map_err(|_| MqttError::PacketTooLarge {
                size: body_len,
                max: crate::encoding::MAX_REMAINING_LENGTH as usize,
            })?,
        )?;

        for (id, value) in self.iter() {
            encode_variable_int(buf, u32::from(id as u8))?;
            match value {
                PropertyValue::Byte(v) => buf.put_u8(*v),
                PropertyValue::TwoByteInteger(v) => buf.put_u16(*v),
                PropertyValue::FourByteInteger(v) => buf.put_u32(*v),
                PropertyValue::VariableByteInteger(v) => encode_variable_int(buf, *v)?,
                PropertyValue::BinaryData(v) => encode_binary(buf, v)?,
                PropertyValue::Utf8String(v) => encode_string(buf, v)?,
                PropertyValue::Utf8StringPair(k, v) => {
                    encode_string(buf, k)?;
                    encode_string(buf, v)?;
                }
            }
        }
        Ok(())
    }

    /// Reads the property-length varint and exactly that many bytes of
    /// properties. Duplicate single-value identifiers are malformed.
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        let body_len = decode_variable_int(buf)? as usize;
        if buf.remaining() < body_len {
            return Err(MqttError::MalformedPacket(format!(
                "Property section claims {body_len} bytes, only {} remain",
                buf.remaining()
            )));
        }

        let mut body = buf.copy_to_bytes(body_len);
        let mut props = Self::new();

        while body.has_remaining() {
            let id_raw = decode_variable_int(&mut body)?;
            let id_byte =
                u8::try_from(id_raw).map_err(|_| MqttError::InvalidPropertyId(u8::MAX))?;
            let id = PropertyId::from_u8(id_byte).ok_or(MqttError::InvalidPropertyId(id_byte))?;

            let value = match id.value_type() {
                PropertyValueType::Byte => {
                    if !body.has_remaining() {
                        return Err(truncated(id));
                    }
                    PropertyValue::Byte(body.get_u8())
                }
                PropertyValueType::TwoByteInteger => {
                    if body.remaining() < 2 {
                        return Err(truncated(id));
                    }
                    PropertyValue::TwoByteInteger(body.get_u16())
                }
                PropertyValueType::FourByteInteger => {
                    if body.remaining() < 4 {
                        return Err(truncated(id));
                    }
                    PropertyValue::FourByteInteger(body.get_u32())
                }
                PropertyValueType::VariableByteInteger => {
                    PropertyValue::VariableByteInteger(decode_variable_int(&mut body)?)
                }
                PropertyValueType::BinaryData => PropertyValue::BinaryData(decode_binary(&mut body)?),
                PropertyValueType::Utf8String => PropertyValue::Utf8String(decode_string(&mut body)?),
                PropertyValueType::Utf8StringPair => {
                    let key = decode_string(&mut body)?;
                    let value = decode_string(&mut body)?;
                    PropertyValue::Utf8StringPair(key, value)
                }
            };

            props.add(id, value)?;
        }

        Ok(props)
    }

    /// Encoded length including the leading property-length varint.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let body = self.body_len();
        variable_int_len(u32::try_from(body).unwrap_or(u32::MAX)) + body
    }

    fn body_len(&self) -> usize {
        self.iter()
            .map(|(id, value)| {
                variable_int_len(u32::from(id as u8))
                    + match value {
                        PropertyValue::Byte(_) => 1,
                        PropertyValue::TwoByteInteger(_) => 2,
                        PropertyValue::FourByteInteger(_) => 4,
                        PropertyValue::VariableByteInteger(v) => variable_int_len(*v),
                        PropertyValue::BinaryData(v) => binary_len(v),
                        PropertyValue::Utf8String(v) => string_len(v),
                        PropertyValue::Utf8StringPair(k, v) => string_len(k) + string_len(v),
                    }
            })
            .sum()
    }
}

fn truncated(id: PropertyId) -> MqttError {
    MqttError::MalformedPacket(format!("Truncated value for property {id:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{Bytes, BytesMut};

    #[test]
    fn test_empty_round_trip() {
        let props = Properties::new();
        let mut buf = BytesMut::new();
        props.encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0x00]);
        assert!(Properties::decode(&mut buf).unwrap().is_empty());
    }

    #[test]
    fn test_every_value_type_round_trips() {
        let mut props = Properties::new();
        props
            .add(PropertyId::PayloadFormatIndicator, PropertyValue::Byte(1))
            .unwrap();
        props
            .add(PropertyId::ReceiveMaximum, PropertyValue::TwoByteInteger(0x1234))
            .unwrap();
        props
            .add(
                PropertyId::SessionExpiryInterval,
                PropertyValue::FourByteInteger(0x1234_5678),
            )
            .unwrap();
        props
            .add(
                PropertyId::SubscriptionIdentifier,
                PropertyValue::VariableByteInteger(268_435_455),
            )
            .unwrap();
        props
            .add(
                PropertyId::CorrelationData,
                PropertyValue::BinaryData(Bytes::from_static(&[9, 8, 7])),
            )
            .unwrap();
        props
            .add(
                PropertyId::AuthenticationMethod,
                PropertyValue::Utf8String("test authentication method".into()),
            )
            .unwrap();
        props
            .add(
                PropertyId::UserProperty,
                PropertyValue::Utf8StringPair("key1".into(), "val1".into()),
            )
            .unwrap();

        let mut buf = BytesMut::new();
        props.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), props.encoded_len());

        let decoded = Properties::decode(&mut buf).unwrap();
        assert_eq!(decoded, props);
    }

    #[test]
    fn test_decode_rejects_unknown_id() {
        let mut buf = BytesMut::new();
        buf.put_u8(2);
        buf.put_u8(0x7E);
        buf.put_u8(0x00);
        assert!(matches!(
            Properties::decode(&mut buf),
            Err(MqttError::InvalidPropertyId(0x7E))
        ));
    }

    #[test]
    fn test_decode_rejects_duplicate() {
        // Two session-expiry-interval properties in one section.
        let mut buf = BytesMut::new();
        buf.put_u8(10);
        buf.put_u8(0x11);
        buf.put_u32(1);
        buf.put_u8(0x11);
        buf.put_u32(2);
        assert!(matches!(
            Properties::decode(&mut buf),
            Err(MqttError::DuplicatePropertyId(0x11))
        ));
    }

    #[test]
    fn test_decode_rejects_overrun_section() {
        let mut buf = BytesMut::new();
        buf.put_u8(12);
        buf.put_u8(0x11);
        buf.put_u32(1);
        assert!(Properties::decode(&mut buf).is_err());
    }

    #[test]
    fn test_deterministic_encode_order() {
        let mut a = Properties::new();
        a.add(PropertyId::TopicAlias, PropertyValue::TwoByteInteger(3))
            .unwrap();
        a.add(PropertyId::PayloadFormatIndicator, PropertyValue::Byte(0))
            .unwrap();

        let mut b = Properties::new();
        b.add(PropertyId::PayloadFormatIndicator, PropertyValue::Byte(0))
            .unwrap();
        b.add(PropertyId::TopicAlias, PropertyValue::TwoByteInteger(3))
            .unwrap();

        let mut buf_a = BytesMut::new();
        let mut buf_b = BytesMut::new();
        a.encode(&mut buf_a).unwrap();
        b.encode(&mut buf_b).unwrap();
        assert_eq!(buf_a, buf_b);
    }
}
