//! Shared shape of the four publish-acknowledgement packets. In v3.1.1 each
//! carries only a packet id; in v5 an optional reason code byte and
//! properties follow, both elided when they hold their defaults.

use crate::types::ReasonCode;

pub fn is_valid_publish_ack_reason_code(code: ReasonCode) -> bool {
    matches!(
        code,
        ReasonCode::Success
            | ReasonCode::NoMatchingSubscribers
            | ReasonCode::UnspecifiedError
            | ReasonCode::ImplementationSpecificError
            | ReasonCode::NotAuthorized
            | ReasonCode::TopicNameInvalid
            | ReasonCode::PacketIdentifierInUse
            | ReasonCode::QuotaExceeded
            | ReasonCode::PayloadFormatInvalid
    )
}

pub fn is_valid_pubrel_reason_code(code: ReasonCode) -> bool {
    matches!(
        code,
        ReasonCode::Success | ReasonCode::PacketIdentifierNotFound
    )
}

macro_rules! define_ack_packet {
    (
        $(#[$meta:meta])*
        pub struct $name:ident;
        packet_type = $packet_type:expr;
        flags = $flags:expr;
        validator = $validator:path;
        error_prefix = $prefix:literal;
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            pub packet_id: u32,
            pub reason_code: crate::types::ReasonCode,
            pub properties: crate::protocol::v5::properties::Properties,
        }

        impl $name {
            #[must_use]
            pub fn new(packet_id: u32) -> Self {
                Self {
                    packet_id,
                    reason_code: crate::types::ReasonCode::Success,
                    properties: crate::protocol::v5::properties::Properties::default(),
                }
            }

            #[must_use]
            pub fn new_with_reason(
                packet_id: u32,
                reason_code: crate::types::ReasonCode,
            ) -> Self {
                Self {
                    packet_id,
                    reason_code,
                    properties: crate::protocol::v5::properties::Properties::default(),
                }
            }

            #[must_use]
            pub fn with_reason_string(mut self, reason: String) -> Self {
                self.properties.set_reason_string(reason);
                self
            }

            #[must_use]
            pub fn with_user_property(mut self, key: String, value: String) -> Self {
                self.properties.add_user_property(key, value);
                self
            }
        }

        impl crate::packet::MqttPacket for $name {
            fn packet_type(&self) -> crate::packet::PacketType {
                $packet_type
            }

            fn flags(&self) -> u8 {
                $flags
            }

            fn encode_body<B: bytes::BufMut>(
                &self,
                buf: &mut B,
                codec: crate::packet::Codec,
            ) -> crate::error::Result<()> {
                crate::encoding::encode_packet_id(buf, self.packet_id, codec.id_width)?;

                if codec.is_v5() {
                    let needs_reason = self.reason_code != crate::types::ReasonCode::Success
                        || !self.properties.is_empty();
                    if needs_reason {
                        buf.put_u8(self.reason_code.into());
                    }
                    if !self.properties.is_empty() {
                        self.properties.encode(buf)?;
                    }
                }
                Ok(())
            }

            fn decode_body<B: bytes::Buf>(
                buf: &mut B,
                _fixed_header: &crate::packet::FixedHeader,
                codec: crate::packet::Codec,
            ) -> crate::error::Result<Self> {
                let packet_id = crate::encoding::decode_packet_id(buf, codec.id_width)?;

                let mut reason_code = crate::types::ReasonCode::Success;
                let mut properties = crate::protocol::v5::properties::Properties::default();

                if codec.is_v5() && buf.has_remaining() {
                    let raw = buf.get_u8();
                    reason_code = crate::types::ReasonCode::from_u8(raw)
                        .ok_or(crate::error::MqttError::InvalidReasonCode(raw))?;
                    if !$validator(reason_code) {
                        return Err(crate::error::MqttError::MalformedPacket(format!(
                            concat!("Invalid ", $prefix, " reason code: {:?}"),
                            reason_code
                        )));
                    }
                    if buf.has_remaining() {
                        properties =
                            crate::protocol::v5::properties::Properties::decode(buf)?;
                    }
                }

                Ok(Self {
                    packet_id,
                    reason_code,
                    properties,
                })
            }
        }
    };
}
