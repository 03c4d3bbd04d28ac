//! End-to-end publish/subscribe flows against an in-process broker.

mod common;

use common::RawClient;
use mqtt_endpoint::core::packet::{Codec, ConnectPacket, Packet, PublishPacket};
use mqtt_endpoint::testing::MockTransport;
use mqtt_endpoint::{
    ApiMode, Broker, ConnectOptions, Endpoint, EndpointHandlers, EndpointOptions, Message,
    MqttError, ProtocolVersion, PublishOptions, QoS, SubscribeOptions,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn connect_client(
    broker: &Broker,
    connect: ConnectOptions,
    handlers: EndpointHandlers,
) -> (mqtt_endpoint::EndpointHandle, mqtt_endpoint::ConnectResult) {
    let (client_side, server_side) = MockTransport::pair();
    broker.serve_connection(server_side);
    Endpoint::connect(client_side, connect, EndpointOptions::default(), handlers)
        .await
        .unwrap()
}

#[tokio::test]
async fn v311_clean_session_publish_roundtrip() {
    let broker = Broker::default();

    let (messages_tx, messages_rx) = flume::unbounded::<Message>();
    let handlers = EndpointHandlers::new().on_message(move |message| {
        let _ = messages_tx.send(message.clone());
        true
    });

    let connect = ConnectOptions::new("cid1")
        .with_protocol_version(ProtocolVersion::V311)
        .with_clean_start(true)
        .with_keep_alive(Duration::ZERO);
    let (handle, result) = connect_client(&broker, connect, handlers).await;
    assert!(!result.session_present);

    let packet_id = handle
        .subscribe(&[("topic1", SubscribeOptions::default())])
        .unwrap();
    assert_ne!(packet_id, 0);

    handle
        .publish("topic1", &b"hi"[..], PublishOptions::default())
        .unwrap();

    let message = tokio::time::timeout(Duration::from_secs(5), messages_rx.recv_async())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.topic, "topic1");
    assert_eq!(message.payload, b"hi");
    assert_eq!(message.qos, QoS::AtMostOnce);

    handle.disconnect(None, None).await.unwrap();
    assert!(!handle.is_connected());
}

#[tokio::test]
async fn qos1_publish_completes_and_releases_id() {
    let broker = Broker::default();

    let (done_tx, done_rx) = flume::unbounded::<(u32, bool)>();
    let handlers = EndpointHandlers::new()
        .on_message(|_| true)
        .on_publish_complete(move |packet_id, result| {
            let _ = done_tx.send((packet_id, result.is_ok()));
        });

    let connect = ConnectOptions::new("q1").with_keep_alive(Duration::ZERO);
    let (handle, _) = connect_client(&broker, connect, handlers).await;

    let result = handle
        .publish(
            "anywhere",
            &b"payload"[..],
            PublishOptions {
                qos: QoS::AtLeastOnce,
                ..Default::default()
            },
        )
        .unwrap();
    let packet_id = result.packet_id().unwrap();

    let (acked_id, ok) = tokio::time::timeout(Duration::from_secs(5), done_rx.recv_async())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(acked_id, packet_id);
    assert!(ok);
    assert!(handle.session_snapshot().in_flight.is_empty());
}

#[tokio::test]
async fn retained_overwrite_and_clear() {
    let broker = Broker::default();

    let publisher = ConnectOptions::new("pub").with_keep_alive(Duration::ZERO);
    let (publisher, _) = connect_client(&broker, publisher, EndpointHandlers::new()).await;

    let retained = PublishOptions {
        retain: true,
        ..Default::default()
    };

    let subscribe_and_recv = |label: &'static str| {
        let broker = broker.clone();
        async move {
            let (tx, rx) = flume::unbounded::<Message>();
            let handlers = EndpointHandlers::new().on_message(move |message| {
                let _ = tx.send(message.clone());
                true
            });
            let connect = ConnectOptions::new(label).with_keep_alive(Duration::ZERO);
            let (handle, _) = {
                let (client_side, server_side) = MockTransport::pair();
                broker.serve_connection(server_side);
                Endpoint::connect(
                    client_side,
                    connect,
                    EndpointOptions::default(),
                    handlers,
                )
                .await
                .unwrap()
            };
            handle.subscribe(&[("x", SubscribeOptions::default())]).unwrap();
            let outcome =
                tokio::time::timeout(Duration::from_millis(500), rx.recv_async()).await;
            (handle, outcome.ok().and_then(std::result::Result::ok))
        }
    };

    publisher.publish("x", &b"A"[..], retained.clone()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let (_h1, first) = subscribe_and_recv("sub-a").await;
    let first = first.expect("retained A expected");
    assert_eq!(first.payload, b"A");
    assert!(first.retain);

    publisher.publish("x", &b"B"[..], retained.clone()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let (_h2, second) = subscribe_and_recv("sub-b").await;
    assert_eq!(second.expect("retained B expected").payload, b"B");

    publisher.publish("x", &b""[..], retained).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let (_h3, third) = subscribe_and_recv("sub-c").await;
    assert!(third.is_none(), "cleared retained message still delivered");
}

#[tokio::test]
async fn session_takeover_disconnects_first_connection() {
    let broker = Broker::default();

    let taken_over = Arc::new(AtomicBool::new(false));
    let observed = Arc::clone(&taken_over);
    let handlers = EndpointHandlers::new().on_error(move |error| {
        if matches!(error, MqttError::SessionTakenOver) {
            observed.store(true, Ordering::SeqCst);
        }
    });

    let connect = ConnectOptions::new("shared-cid")
        .with_clean_start(false)
        .with_session_expiry_interval(300)
        .with_keep_alive(Duration::ZERO);
    let (first, _) = connect_client(&broker, connect.clone(), handlers).await;
    assert!(first.is_connected());

    let (second, result) = connect_client(&broker, connect, EndpointHandlers::new()).await;
    assert!(result.session_present);
    assert!(second.is_connected());

    tokio::time::timeout(Duration::from_secs(5), async {
        while !taken_over.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("first connection never saw SESSION_TAKEN_OVER");
    assert!(!first.is_connected());
}

#[tokio::test]
async fn offline_qos1_messages_replayed_on_resume() {
    let broker = Broker::default();
    let codec = Codec::v5();

    // Subscriber with a persistent session, then gone.
    let mut connect = ConnectPacket::new("sleeper");
    connect.clean_start = true;
    connect.keep_alive = 0;
    connect.properties.set_session_expiry_interval(600);
    let (mut sleeper, _) = RawClient::connect(&broker, connect, codec).await;

    let subscribe = mqtt_endpoint::core::packet::SubscribePacket::new(1)
        .add_filter("news", QoS::AtLeastOnce);
    sleeper.send(&Packet::Subscribe(subscribe)).await.unwrap();
    assert!(matches!(sleeper.recv().await.unwrap(), Packet::SubAck(_)));
    sleeper.close().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Publish while the subscriber is away.
    let publisher = ConnectOptions::new("npub").with_keep_alive(Duration::ZERO);
    let (publisher, _) = connect_client(&broker, publisher, EndpointHandlers::new()).await;
    publisher
        .publish(
            "news",
            &b"queued"[..],
            PublishOptions {
                qos: QoS::AtLeastOnce,
                ..Default::default()
            },
        )
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Resume: the queued message is delivered as QoS 1.
    let mut connect = ConnectPacket::new("sleeper");
    connect.clean_start = false;
    connect.keep_alive = 0;
    connect.properties.set_session_expiry_interval(600);
    let (mut sleeper, connack) = RawClient::connect(&broker, connect, codec).await;
    assert!(connack.session_present);

    match sleeper.recv().await.unwrap() {
        Packet::Publish(publish) => {
            assert_eq!(publish.topic_name, "news");
            assert_eq!(&publish.payload[..], b"queued");
            assert_eq!(publish.qos, QoS::AtLeastOnce);
            assert!(publish.packet_id.is_some());
        }
        other => panic!("expected queued PUBLISH, got {:?}", other.packet_type()),
    }
}

#[tokio::test]
async fn callback_surface_completes_on_enqueue_and_excludes_sync() {
    let broker = Broker::default();

    let (client_side, server_side) = MockTransport::pair();
    broker.serve_connection(server_side);

    let options = EndpointOptions {
        api_mode: ApiMode::Callback,
        ..Default::default()
    };
    let connect = ConnectOptions::new("cb").with_keep_alive(Duration::ZERO);
    let (handle, _) = Endpoint::connect(client_side, connect, options, EndpointHandlers::new())
        .await
        .unwrap();

    let (tx, rx) = flume::bounded(1);
    handle.publish_with_completion(
        "t",
        &b"x"[..],
        PublishOptions::default(),
        move |result| {
            let _ = tx.send(result.is_ok());
        },
    );
    assert!(rx.recv_async().await.unwrap());

    // The two API surfaces are mutually exclusive per instantiation.
    assert!(matches!(
        handle.publish("t", &b"x"[..], PublishOptions::default()),
        Err(MqttError::InvalidState(_))
    ));
}

#[tokio::test]
async fn wildcard_and_dollar_topics() {
    let broker = Broker::default();

    let (tx, rx) = flume::unbounded::<Message>();
    let handlers = EndpointHandlers::new().on_message(move |message| {
        let _ = tx.send(message.clone());
        true
    });
    let connect = ConnectOptions::new("wild").with_keep_alive(Duration::ZERO);
    let (subscriber, _) = connect_client(&broker, connect, handlers).await;
    subscriber.subscribe(&[("#", SubscribeOptions::default())]).unwrap();

    let connect = ConnectOptions::new("pusher").with_keep_alive(Duration::ZERO);
    let (publisher, _) = connect_client(&broker, connect, EndpointHandlers::new()).await;

    publisher
        .publish("a/b", &b"seen"[..], PublishOptions::default())
        .unwrap();
    let message = tokio::time::timeout(Duration::from_secs(5), rx.recv_async())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.topic, "a/b");

    // `$`-prefixed topics are invisible to `#`.
    let raw = PublishPacket::new("$SYS/internal", &b"hidden"[..], QoS::AtMostOnce);
    broker.router().route(&raw, None).await;
    let nothing = tokio::time::timeout(Duration::from_millis(300), rx.recv_async()).await;
    assert!(nothing.is_err());
}
