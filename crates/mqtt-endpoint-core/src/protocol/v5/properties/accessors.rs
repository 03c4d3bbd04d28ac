//! Typed accessors for the property identifiers the endpoint and broker
//! actually read and write. Setters silently skip on the impossible
//! type-mismatch path; duplicates overwrite.

use super::{Properties, PropertyId, PropertyValue};
use bytes::Bytes;

macro_rules! setter {
    ($name:ident, $id:ident, $ty:ty, $variant:ident) => {
        pub fn $name(&mut self, value: $ty) {
            self.entries.remove(&PropertyId::$id);
            let _ = self.add(PropertyId::$id, PropertyValue::$variant(value));
        }
    };
}

macro_rules! getter {
    ($name:ident, $id:ident, $ty:ty, $variant:ident) => {
        #[must_use]
        pub fn $name(&self) -> Option<$ty> {
            match self.get(PropertyId::$id) {
                Some(PropertyValue::$variant(v)) => Some(*v),
                _ => None,
            }
        }
    };
}

impl Properties {
    setter!(set_session_expiry_interval, SessionExpiryInterval, u32, FourByteInteger);
    getter!(get_session_expiry_interval, SessionExpiryInterval, u32, FourByteInteger);

    setter!(set_receive_maximum, ReceiveMaximum, u16, TwoByteInteger);
    getter!(get_receive_maximum, ReceiveMaximum, u16, TwoByteInteger);

    setter!(set_maximum_packet_size, MaximumPacketSize, u32, FourByteInteger);
    getter!(get_maximum_packet_size, MaximumPacketSize, u32, FourByteInteger);

    setter!(set_topic_alias_maximum, TopicAliasMaximum, u16, TwoByteInteger);
    getter!(get_topic_alias_maximum, TopicAliasMaximum, u16, TwoByteInteger);

    setter!(set_topic_alias, TopicAlias, u16, TwoByteInteger);
    getter!(get_topic_alias, TopicAlias, u16, TwoByteInteger);

    setter!(set_server_keep_alive, ServerKeepAlive, u16, TwoByteInteger);
    getter!(get_server_keep_alive, ServerKeepAlive, u16, TwoByteInteger);

    setter!(set_message_expiry_interval, MessageExpiryInterval, u32, FourByteInteger);
    getter!(get_message_expiry_interval, MessageExpiryInterval, u32, FourByteInteger);

    setter!(set_will_delay_interval, WillDelayInterval, u32, FourByteInteger);
    getter!(get_will_delay_interval, WillDelayInterval, u32, FourByteInteger);

    setter!(set_maximum_qos, MaximumQoS, u8, Byte);
    getter!(get_maximum_qos, MaximumQoS, u8, Byte);

    pub fn set_payload_format_indicator(&mut self, is_utf8: bool) {
        self.entries.remove(&PropertyId::PayloadFormatIndicator);
        let _ = self.add(
            PropertyId::PayloadFormatIndicator,
            PropertyValue::Byte(u8::from(is_utf8)),
        );
    }

    pub fn set_retain_available(&mut self, available: bool) {
        self.entries.remove(&PropertyId::RetainAvailable);
        let _ = self.add(
            PropertyId::RetainAvailable,
            PropertyValue::Byte(u8::from(available)),
        );
    }

    pub fn set_shared_subscription_available(&mut self, available: bool) {
        self.entries.remove(&PropertyId::SharedSubscriptionAvailable);
        let _ = self.add(
            PropertyId::SharedSubscriptionAvailable,
            PropertyValue::Byte(u8::from(available)),
        );
    }

    pub fn set_assigned_client_identifier(&mut self, id: String) {
        self.entries.remove(&PropertyId::AssignedClientIdentifier);
        let _ = self.add(
            PropertyId::AssignedClientIdentifier,
            PropertyValue::Utf8String(id),
        );
    }

    #[must_use]
    pub fn get_assigned_client_identifier(&self) -> Option<&str> {
        match self.get(PropertyId::AssignedClientIdentifier) {
            Some(PropertyValue::Utf8String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn set_reason_string(&mut self, reason: String) {
        self.entries.remove(&PropertyId::ReasonString);
        let _ = self.add(PropertyId::ReasonString, PropertyValue::Utf8String(reason));
    }

    pub fn set_content_type(&mut self, content_type: String) {
        self.entries.remove(&PropertyId::ContentType);
        let _ = self.add(
            PropertyId::ContentType,
            PropertyValue::Utf8String(content_type),
        );
    }

    #[must_use]
    pub fn get_content_type(&self) -> Option<&str> {
        match self.get(PropertyId::ContentType) {
            Some(PropertyValue::Utf8String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn set_response_topic(&mut self, topic: String) {
        self.entries.remove(&PropertyId::ResponseTopic);
        let _ = self.add(PropertyId::ResponseTopic, PropertyValue::Utf8String(topic));
    }

    #[must_use]
    pub fn get_response_topic(&self) -> Option<&str> {
        match self.get(PropertyId::ResponseTopic) {
            Some(PropertyValue::Utf8String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn set_correlation_data(&mut self, data: Bytes) {
        self.entries.remove(&PropertyId::CorrelationData);
        let _ = self.add(PropertyId::CorrelationData, PropertyValue::BinaryData(data));
    }

    #[must_use]
    pub fn get_correlation_data(&self) -> Option<&[u8]> {
        match self.get(PropertyId::CorrelationData) {
            Some(PropertyValue::BinaryData(b)) => Some(b),
            _ => None,
        }
    }

    pub fn set_authentication_method(&mut self, method: String) {
        self.entries.remove(&PropertyId::AuthenticationMethod);
        let _ = self.add(
            PropertyId::AuthenticationMethod,
            PropertyValue::Utf8String(method),
        );
    }

    #[must_use]
    pub fn get_authentication_method(&self) -> Option<&str> {
        match self.get(PropertyId::AuthenticationMethod) {
            Some(PropertyValue::Utf8String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn set_authentication_data(&mut self, data: Bytes) {
        self.entries.remove(&PropertyId::AuthenticationData);
        let _ = self.add(
            PropertyId::AuthenticationData,
            PropertyValue::BinaryData(data),
        );
    }

    #[must_use]
    pub fn get_authentication_data(&self) -> Option<&[u8]> {
        match self.get(PropertyId::AuthenticationData) {
            Some(PropertyValue::BinaryData(b)) => Some(b),
            _ => None,
        }
    }

    pub fn add_user_property(&mut self, key: String, value: String) {
        let _ = self.add(
            PropertyId::UserProperty,
            PropertyValue::Utf8StringPair(key, value),
        );
    }

    #[must_use]
    pub fn get_user_property_value(&self, key: &str) -> Option<&str> {
        self.get_all(PropertyId::UserProperty)?
            .iter()
            .find_map(|value| match value {
                PropertyValue::Utf8StringPair(k, v) if k == key => Some(v.as_str()),
                _ => None,
            })
    }

    #[must_use]
    pub fn user_properties(&self) -> Vec<(String, String)> {
        self.get_all(PropertyId::UserProperty)
            .map(|values| {
                values
                    .iter()
                    .filter_map(|value| match value {
                        PropertyValue::Utf8StringPair(k, v) => Some((k.clone(), v.clone())),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn add_subscription_identifier(&mut self, id: u32) {
        let _ = self.add(
            PropertyId::SubscriptionIdentifier,
            PropertyValue::VariableByteInteger(id),
        );
    }

    /// Replaces any existing subscription identifiers with a single one.
    pub fn set_subscription_identifier(&mut self, id: u32) {
        self.entries.remove(&PropertyId::SubscriptionIdentifier);
        self.add_subscription_identifier(id);
    }

    #[must_use]
    pub fn get_subscription_identifiers(&self) -> Vec<u32> {
        self.get_all(PropertyId::SubscriptionIdentifier)
            .map(|values| {
                values
                    .iter()
                    .filter_map(|value| match value {
                        PropertyValue::VariableByteInteger(v) => Some(*v),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}
