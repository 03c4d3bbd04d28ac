//! Sans-I/O MQTT 3.1.1 / 5.0 protocol engine.
//!
//! Everything in this crate is pure: the wire codec for all control packet
//! kinds, v5 properties and reason codes, packet-identifier allocation,
//! topic matching with the subscription trie, keep-alive arithmetic, the
//! QoS 2 decision functions and per-session protocol state. The async
//! endpoint, transports and broker live in the companion `mqtt-endpoint`
//! crate.

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::doc_markdown)]

pub mod encoding;
pub mod error;
pub mod flags;
pub mod keepalive;
pub mod packet;
pub mod packet_id;
pub mod protocol;
pub mod qos2;
pub mod session;
pub mod topic_matching;
pub mod topic_tree;
pub mod types;
pub mod validation;

pub use error::{MqttError, Result};
pub use flags::{ConnAckFlags, ConnectFlags, PublishFlags};
pub use packet::{Codec, FixedHeader, MqttPacket, Packet, PacketType};
pub use packet_id::{IdWidth, PacketIdAllocator};
pub use protocol::v5::properties::{Properties, PropertyId, PropertyValue, PropertyValueType};
pub use protocol::v5::reason_codes::ReasonCode;
pub use session::{ExpectedAck, InFlightEntry, QueuedPublish, SessionSnapshot, SessionState};
pub use topic_tree::SubscriptionTree;
pub use types::{
    ConnectOptions, ConnectProperties, ConnectResult, Message, ProtocolVersion, PublishOptions,
    PublishProperties, PublishResult, QoS, RetainHandling, SubscribeOptions, WillMessage,
    WillProperties,
};
pub use validation::{
    parse_shared_subscription, strip_shared_subscription_prefix, topic_matches_filter,
    validate_client_id, validate_topic_filter, validate_topic_name,
};
