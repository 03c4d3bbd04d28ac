//! The QoS 2 exchange as pure decision functions. The endpoint feeds in
//! what arrived and what it already tracks; the returned actions tell it
//! what to send, record and deliver. Keeping this free of state makes every
//! interleaving unit-testable.

use crate::packet::pubcomp::PubCompPacket;
use crate::packet::pubrec::PubRecPacket;
use crate::packet::pubrel::PubRelPacket;
use crate::protocol::v5::reason_codes::ReasonCode;

#[derive(Debug, Clone, PartialEq)]
pub enum QoS2Action {
    SendPubRec { packet_id: u32, reason_code: ReasonCode },
    SendPubRel { packet_id: u32 },
    SendPubComp { packet_id: u32, reason_code: ReasonCode },
    TrackOutgoingPubRel { packet_id: u32 },
    RemoveOutgoingPubRel { packet_id: u32 },
    TrackIncomingPubRec { packet_id: u32 },
    RemoveIncomingPubRec { packet_id: u32 },
    DeliverMessage { packet_id: u32 },
    CompleteFlow { packet_id: u32 },
    ErrorFlow { packet_id: u32, reason_code: ReasonCode },
}

impl QoS2Action {
    #[must_use]
    pub fn to_pubrec_packet(&self) -> Option<PubRecPacket> {
        match self {
            QoS2Action::SendPubRec {
                packet_id,
                reason_code,
            } => Some(PubRecPacket::new_with_reason(*packet_id, *reason_code)),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_pubrel_packet(&self) -> Option<PubRelPacket> {
        match self {
            QoS2Action::SendPubRel { packet_id } => Some(PubRelPacket::new(*packet_id)),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_pubcomp_packet(&self) -> Option<PubCompPacket> {
        match self {
            QoS2Action::SendPubComp {
                packet_id,
                reason_code,
            } => Some(PubCompPacket::new_with_reason(*packet_id, *reason_code)),
            _ => None,
        }
    }
}

/// Sender side, PUBREC arrived for a pending QoS 2 PUBLISH.
#[must_use]
pub fn handle_incoming_pubrec(
    packet_id: u32,
    reason_code: ReasonCode,
    has_pending_publish: bool,
) -> Vec<QoS2Action> {
    if !has_pending_publish {
        return vec![QoS2Action::ErrorFlow {
            packet_id,
            reason_code: ReasonCode::PacketIdentifierNotFound,
        }];
    }

    if reason_code.is_error() {
        return vec![QoS2Action::ErrorFlow {
            packet_id,
            reason_code,
        }];
    }

    vec![
        QoS2Action::SendPubRel { packet_id },
        QoS2Action::TrackOutgoingPubRel { packet_id },
    ]
}

/// Sender side, PUBCOMP arrived for a pending PUBREL.
#[must_use]
pub fn handle_incoming_pubcomp(
    packet_id: u32,
    reason_code: ReasonCode,
    has_pending_pubrel: bool,
) -> Vec<QoS2Action> {
    if !has_pending_pubrel {
        return vec![];
    }

    vec![
        QoS2Action::RemoveOutgoingPubRel { packet_id },
        if reason_code.is_error() {
            QoS2Action::ErrorFlow {
                packet_id,
                reason_code,
            }
        } else {
            QoS2Action::CompleteFlow { packet_id }
        },
    ]
}

/// Receiver side, QoS 2 PUBLISH arrived. A duplicate id gets an idempotent
/// PUBREC with no second delivery.
#[must_use]
pub fn handle_incoming_publish_qos2(packet_id: u32, is_duplicate: bool) -> Vec<QoS2Action> {
    if is_duplicate {
        vec![QoS2Action::SendPubRec {
            packet_id,
            reason_code: ReasonCode::Success,
        }]
    } else {
        vec![
            QoS2Action::DeliverMessage { packet_id },
            QoS2Action::SendPubRec {
                packet_id,
                reason_code: ReasonCode::Success,
            },
            QoS2Action::TrackIncomingPubRec { packet_id },
        ]
    }
}

/// Receiver side, PUBREL arrived. An unknown id is still answered, with
/// PacketIdentifierNotFound.
#[must_use]
pub fn handle_incoming_pubrel(packet_id: u32, has_pending_pubrec: bool) -> Vec<QoS2Action> {
    if has_pending_pubrec {
        vec![
            QoS2Action::RemoveIncomingPubRec { packet_id },
            QoS2Action::SendPubComp {
                packet_id,
                reason_code: ReasonCode::Success,
            },
        ]
    } else {
        vec![QoS2Action::SendPubComp {
            packet_id,
            reason_code: ReasonCode::PacketIdentifierNotFound,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pubrec_success_advances_to_pubrel() {
        let actions = handle_incoming_pubrec(123, ReasonCode::Success, true);
        assert_eq!(
            actions,
            vec![
                QoS2Action::SendPubRel { packet_id: 123 },
                QoS2Action::TrackOutgoingPubRel { packet_id: 123 },
            ]
        );
    }

    #[test]
    fn test_pubrec_error_aborts_flow() {
        let actions = handle_incoming_pubrec(123, ReasonCode::QuotaExceeded, true);
        assert_eq!(
            actions,
            vec![QoS2Action::ErrorFlow {
                packet_id: 123,
                reason_code: ReasonCode::QuotaExceeded
            }]
        );
    }

    #[test]
    fn test_pubrec_for_unknown_id() {
        let actions = handle_incoming_pubrec(123, ReasonCode::Success, false);
        assert_eq!(
            actions,
            vec![QoS2Action::ErrorFlow {
                packet_id: 123,
                reason_code: ReasonCode::PacketIdentifierNotFound
            }]
        );
    }

    #[test]
    fn test_pubcomp_completes_flow() {
        let actions = handle_incoming_pubcomp(123, ReasonCode::Success, true);
        assert_eq!(
            actions,
            vec![
                QoS2Action::RemoveOutgoingPubRel { packet_id: 123 },
                QoS2Action::CompleteFlow { packet_id: 123 },
            ]
        );
    }

    #[test]
    fn test_pubcomp_without_pending_pubrel_is_ignored() {
        assert!(handle_incoming_pubcomp(123, ReasonCode::Success, false).is_empty());
    }

    #[test]
    fn test_fresh_qos2_publish_delivers_once() {
        let actions = handle_incoming_publish_qos2(7, false);
        assert_eq!(actions[0], QoS2Action::DeliverMessage { packet_id: 7 });
        assert_eq!(
            actions[1],
            QoS2Action::SendPubRec {
                packet_id: 7,
                reason_code: ReasonCode::Success
            }
        );
        assert_eq!(actions[2], QoS2Action::TrackIncomingPubRec { packet_id: 7 });
    }

    #[test]
    fn test_duplicate_qos2_publish_only_acks() {
        let actions = handle_incoming_publish_qos2(7, true);
        assert_eq!(
            actions,
            vec![QoS2Action::SendPubRec {
                packet_id: 7,
                reason_code: ReasonCode::Success
            }]
        );
    }

    #[test]
    fn test_pubrel_releases_and_completes() {
        let actions = handle_incoming_pubrel(7, true);
        assert_eq!(
            actions,
            vec![
                QoS2Action::RemoveIncomingPubRec { packet_id: 7 },
                QoS2Action::SendPubComp {
                    packet_id: 7,
                    reason_code: ReasonCode::Success
                },
            ]
        );
    }

    #[test]
    fn test_pubrel_unknown_id_still_answered() {
        let actions = handle_incoming_pubrel(7, false);
        assert_eq!(
            actions,
            vec![QoS2Action::SendPubComp {
                packet_id: 7,
                reason_code: ReasonCode::PacketIdentifierNotFound
            }]
        );
    }

    #[test]
    fn test_action_packet_conversions() {
        let rec = QoS2Action::SendPubRec {
            packet_id: 1,
            reason_code: ReasonCode::Success,
        };
        assert!(rec.to_pubrec_packet().is_some());
        assert!(rec.to_pubrel_packet().is_none());

        let rel = QoS2Action::SendPubRel { packet_id: 1 };
        assert!(rel.to_pubrel_packet().is_some());
        assert!(rel.to_pubcomp_packet().is_none());

        let comp = QoS2Action::SendPubComp {
            packet_id: 1,
            reason_code: ReasonCode::Success,
        };
        assert!(comp.to_pubcomp_packet().is_some());
    }
}
