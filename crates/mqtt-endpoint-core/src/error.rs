use crate::protocol::v5::reason_codes::ReasonCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MqttError>;

#[derive(Debug, Clone, Error)]
pub enum MqttError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Unexpected end of stream")]
    UnexpectedEof,

    #[error("Invalid topic name: {0}")]
    InvalidTopicName(String),

    #[error("Invalid topic filter: {0}")]
    InvalidTopicFilter(String),

    #[error("Invalid client ID: {0}")]
    InvalidClientId(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Connection refused: {0:?}")]
    ConnectionRefused(ReasonCode),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Packet too large: size {size} exceeds maximum {max}")]
    PacketTooLarge { size: usize, max: usize },

    #[error("Not connected")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Timeout")]
    Timeout,

    #[error("Keep alive timeout")]
    KeepAliveTimeout,

    #[error("Disconnect timed out before the write queue drained")]
    DisconnectTimeout,

    #[error("Session taken over by another connection")]
    SessionTakenOver,

    #[error("Session expired")]
    SessionExpired,

    #[error("Client closed connection")]
    ClientClosed,

    #[error("Connection closed by peer")]
    ConnectionClosedByPeer,

    #[error("Subscription failed: {0:?}")]
    SubscriptionFailed(ReasonCode),

    #[error("Publish failed: {0:?}")]
    PublishFailed(ReasonCode),

    #[error("Packet identifier not found: {0}")]
    PacketIdNotFound(u32),

    #[error("Packet identifier already in use: {0}")]
    PacketIdInUse(u32),

    #[error("Packet ID space exhausted")]
    PacketIdExhausted,

    #[error("Outgoing queue full")]
    QueueFull,

    #[error("Invalid QoS: {0}")]
    InvalidQoS(u8),

    #[error("Invalid packet type: {0}")]
    InvalidPacketType(u8),

    #[error("Invalid reason code: {0}")]
    InvalidReasonCode(u8),

    #[error("Invalid property ID: {0}")]
    InvalidPropertyId(u8),

    #[error("Duplicate property ID: {0}")]
    DuplicatePropertyId(u8),

    #[error("Topic alias invalid: {0}")]
    TopicAliasInvalid(u16),

    #[error("Receive maximum exceeded")]
    ReceiveMaximumExceeded,

    #[error("Unsupported protocol version")]
    UnsupportedProtocolVersion,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("String too long: {0} bytes exceeds maximum of 65535")]
    StringTooLong(usize),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl MqttError {
    #[must_use]
    pub fn is_normal_disconnect(&self) -> bool {
        match self {
            Self::ClientClosed | Self::ConnectionClosedByPeer => true,
            Self::Io(msg) => {
                msg.contains("stream has been shut down") || msg.contains("Connection reset")
            }
            _ => false,
        }
    }

    /// Reason code to send in a v5 DISCONNECT before closing on this error.
    /// `None` for errors that do not warrant a protocol-level notification.
    #[must_use]
    pub fn disconnect_reason(&self) -> Option<ReasonCode> {
        match self {
            Self::MalformedPacket(_)
            | Self::InvalidPacketType(_)
            | Self::InvalidReasonCode(_)
            | Self::InvalidPropertyId(_)
            | Self::DuplicatePropertyId(_)
            | Self::StringTooLong(_)
            | Self::InvalidQoS(_) => Some(ReasonCode::MalformedPacket),
            Self::ProtocolError(_) | Self::InvalidState(_) => Some(ReasonCode::ProtocolError),
            Self::PacketTooLarge { .. } => Some(ReasonCode::PacketTooLarge),
            Self::KeepAliveTimeout => Some(ReasonCode::KeepAliveTimeout),
            Self::ReceiveMaximumExceeded => Some(ReasonCode::ReceiveMaximumExceeded),
            Self::TopicAliasInvalid(_) => Some(ReasonCode::TopicAliasInvalid),
            Self::InvalidTopicName(_) => Some(ReasonCode::TopicNameInvalid),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MqttError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            MqttError::UnexpectedEof
        } else {
            MqttError::Io(err.to_string())
        }
    }
}

impl From<String> for MqttError {
    fn from(msg: String) -> Self {
        MqttError::MalformedPacket(msg)
    }
}

impl From<&str> for MqttError {
    fn from(msg: &str) -> Self {
        MqttError::MalformedPacket(msg.to_string())
    }
}
