//! QoS 2 exactly-once flows, including resumption after a mid-flow crash.

mod common;

use common::RawClient;
use mqtt_endpoint::core::packet::{
    Codec, ConnectPacket, Packet, PubRelPacket, PublishPacket, SubscribePacket,
};
use mqtt_endpoint::{Broker, QoS, ReasonCode};
use std::time::Duration;

async fn watcher(broker: &Broker, topic: &str) -> RawClient {
    let mut connect = ConnectPacket::new("watcher");
    connect.keep_alive = 0;
    let (mut client, _) = RawClient::connect(broker, connect, Codec::v5()).await;
    let subscribe = SubscribePacket::new(1).add_filter(topic, QoS::ExactlyOnce);
    client.send(&Packet::Subscribe(subscribe)).await.unwrap();
    assert!(matches!(client.recv().await.unwrap(), Packet::SubAck(_)));
    client
}

#[tokio::test]
async fn qos2_full_exchange() {
    let broker = Broker::default();
    let mut watcher = watcher(&broker, "exact").await;

    let mut connect = ConnectPacket::new("pub2");
    connect.keep_alive = 0;
    let (mut publisher, _) = RawClient::connect(&broker, connect, Codec::v5()).await;

    let publish = PublishPacket::new("exact", &b"once"[..], QoS::ExactlyOnce).with_packet_id(7);
    publisher.send(&Packet::Publish(publish)).await.unwrap();

    match publisher.recv().await.unwrap() {
        Packet::PubRec(rec) => assert_eq!(rec.packet_id, 7),
        other => panic!("expected PUBREC, got {:?}", other.packet_type()),
    }
    publisher
        .send(&Packet::PubRel(PubRelPacket::new(7)))
        .await
        .unwrap();
    match publisher.recv().await.unwrap() {
        Packet::PubComp(comp) => {
            assert_eq!(comp.packet_id, 7);
            assert_eq!(comp.reason_code, ReasonCode::Success);
        }
        other => panic!("expected PUBCOMP, got {:?}", other.packet_type()),
    }

    // The subscriber sees the message exactly once, at QoS 2.
    match watcher.recv().await.unwrap() {
        Packet::Publish(publish) => {
            assert_eq!(publish.topic_name, "exact");
            assert_eq!(publish.qos, QoS::ExactlyOnce);
        }
        other => panic!("expected PUBLISH, got {:?}", other.packet_type()),
    }
    watcher.expect_silence(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn duplicate_qos2_publish_is_not_redelivered() {
    let broker = Broker::default();
    let mut watcher = watcher(&broker, "exact").await;

    let mut connect = ConnectPacket::new("dup2");
    connect.keep_alive = 0;
    let (mut publisher, _) = RawClient::connect(&broker, connect, Codec::v5()).await;

    let mut publish =
        PublishPacket::new("exact", &b"once"[..], QoS::ExactlyOnce).with_packet_id(9);
    publisher.send(&Packet::Publish(publish.clone())).await.unwrap();
    assert!(matches!(publisher.recv().await.unwrap(), Packet::PubRec(_)));

    // Retransmit before PUBREL, as after a lost PUBREC.
    publish.dup = true;
    publisher.send(&Packet::Publish(publish)).await.unwrap();
    assert!(matches!(publisher.recv().await.unwrap(), Packet::PubRec(_)));

    // One delivery only.
    assert!(matches!(watcher.recv().await.unwrap(), Packet::Publish(_)));
    watcher.expect_silence(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn qos2_pubrel_resend_after_reconnect() {
    let broker = Broker::default();
    let mut watcher = watcher(&broker, "exact").await;

    // Publisher with a persistent session crashes after PUBREC.
    let mut connect = ConnectPacket::new("crasher");
    connect.clean_start = true;
    connect.keep_alive = 0;
    connect.properties.set_session_expiry_interval(600);
    let (mut publisher, _) = RawClient::connect(&broker, connect, Codec::v5()).await;

    let publish = PublishPacket::new("exact", &b"crash"[..], QoS::ExactlyOnce).with_packet_id(7);
    publisher.send(&Packet::Publish(publish)).await.unwrap();
    assert!(matches!(publisher.recv().await.unwrap(), Packet::PubRec(_)));
    drop(publisher); // crash before PUBREL
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Reconnect with the session; the server remembers the half-open flow.
    let mut connect = ConnectPacket::new("crasher");
    connect.clean_start = false;
    connect.keep_alive = 0;
    connect.properties.set_session_expiry_interval(600);
    let (mut publisher, connack) = RawClient::connect(&broker, connect, Codec::v5()).await;
    assert!(connack.session_present);

    publisher
        .send(&Packet::PubRel(PubRelPacket::new(7)))
        .await
        .unwrap();
    match publisher.recv().await.unwrap() {
        Packet::PubComp(comp) => assert_eq!(comp.packet_id, 7),
        other => panic!("expected PUBCOMP, got {:?}", other.packet_type()),
    }

    // No duplicate delivery to subscribers across the reconnect.
    assert!(matches!(watcher.recv().await.unwrap(), Packet::Publish(_)));
    watcher.expect_silence(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn pubrel_for_unknown_id_is_answered_with_not_found() {
    let broker = Broker::default();

    let mut connect = ConnectPacket::new("ghost");
    connect.keep_alive = 0;
    let (mut client, _) = RawClient::connect(&broker, connect, Codec::v5()).await;

    client
        .send(&Packet::PubRel(PubRelPacket::new(404)))
        .await
        .unwrap();
    match client.recv().await.unwrap() {
        Packet::PubComp(comp) => {
            assert_eq!(comp.packet_id, 404);
            assert_eq!(comp.reason_code, ReasonCode::PacketIdentifierNotFound);
        }
        other => panic!("expected PUBCOMP, got {:?}", other.packet_type()),
    }
}
