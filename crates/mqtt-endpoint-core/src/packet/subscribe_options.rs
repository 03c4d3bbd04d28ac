use crate::error::{MqttError, Result};
use crate::types::{QoS, RetainHandling, SubscribeOptions};

/// The v5 subscription options byte: QoS in bits 0-1, No Local in bit 2,
/// Retain As Published in bit 3, Retain Handling in bits 4-5. Bits 6-7 are
/// reserved and must be zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionOptions {
    pub qos: QoS,
    pub no_local: bool,
    pub retain_as_published: bool,
    pub retain_handling: RetainHandling,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            qos: QoS::AtMostOnce,
            no_local: false,
            retain_as_published: false,
            retain_handling: RetainHandling::SendAtSubscribe,
        }
    }
}

impl SubscriptionOptions {
    #[must_use]
    pub fn new(qos: QoS) -> Self {
        Self {
            qos,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn encode(self) -> u8 {
        let mut byte = self.qos as u8;
        if self.no_local {
            byte |= 0x04;
        }
        if self.retain_as_published {
            byte |= 0x08;
        }
        byte |= (self.retain_handling as u8) << 4;
        byte
    }

    pub fn decode(byte: u8) -> Result<Self> {
        if byte & 0xC0 != 0 {
            return Err(MqttError::MalformedPacket(format!(
                "Subscription options reserved bits set: 0x{byte:02X}"
            )));
        }

        let qos_bits = byte & 0x03;
        if qos_bits == 3 {
            return Err(MqttError::InvalidQoS(qos_bits));
        }

        let retain_handling = match (byte >> 4) & 0x03 {
            0 => RetainHandling::SendAtSubscribe,
            1 => RetainHandling::SendIfNew,
            2 => RetainHandling::DontSend,
            _ => {
                return Err(MqttError::MalformedPacket(
                    "Retain handling value 3 is reserved".to_string(),
                ))
            }
        };

        Ok(Self {
            qos: QoS::from(qos_bits),
            no_local: byte & 0x04 != 0,
            retain_as_published: byte & 0x08 != 0,
            retain_handling,
        })
    }
}

impl From<&SubscribeOptions> for SubscriptionOptions {
    fn from(options: &SubscribeOptions) -> Self {
        Self {
            qos: options.qos,
            no_local: options.no_local,
            retain_as_published: options.retain_as_published,
            retain_handling: options.retain_handling,
        }
    }
}

impl SubscriptionOptions {
    /// Widens into the user-facing options, attaching the subscription
    /// identifier carried at the packet level in v5.
    #[must_use]
    pub fn into_subscribe_options(self, subscription_identifier: Option<u32>) -> SubscribeOptions {
        SubscribeOptions {
            qos: self.qos,
            no_local: self.no_local,
            retain_as_published: self.retain_as_published,
            retain_handling: self.retain_handling,
            subscription_identifier,
        }
    }
}
