//! Keep-alive and shutdown timing, driven on paused virtual time.

mod common;

use common::RawServer;
use mqtt_endpoint::core::packet::{
    Codec, ConnAckPacket, ConnectPacket, Packet, PingRespPacket,
};
use mqtt_endpoint::testing::MockTransport;
use mqtt_endpoint::{
    Broker, ConnectOptions, Endpoint, EndpointHandlers, EndpointOptions, MqttError,
    PublishOptions, ReasonCode,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn client_pings_after_keepalive_interval() {
    let (client_side, server_side) = MockTransport::pair();
    let mut server = RawServer::new(server_side, Codec::v5());

    let (pings_seen_tx, pings_seen_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        server.accept(ConnAckPacket::accepted(false)).await;

        // First PINGREQ arrives after the 3 s keep-alive interval.
        match server.recv().await.unwrap() {
            Packet::PingReq(_) => {}
            other => panic!("expected PINGREQ, got {:?}", other.packet_type()),
        }
        server.send(&Packet::PingResp(PingRespPacket)).await.unwrap();

        // And the cycle repeats.
        match server.recv().await.unwrap() {
            Packet::PingReq(_) => {}
            other => panic!("expected second PINGREQ, got {:?}", other.packet_type()),
        }
        server.send(&Packet::PingResp(PingRespPacket)).await.unwrap();

        let _ = pings_seen_tx.send(());
        // Keep the transport open so the client is not disconnected.
        std::future::pending::<()>().await;
    });

    let connect = ConnectOptions::new("pinger").with_keep_alive(Duration::from_secs(3));
    let (handle, _) = Endpoint::connect(
        client_side,
        connect,
        EndpointOptions::default(),
        EndpointHandlers::new(),
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_secs(8)).await;
    assert!(handle.is_connected());
    pings_seen_rx.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn unanswered_ping_times_out() {
    let (client_side, server_side) = MockTransport::pair();
    let mut server = RawServer::new(server_side, Codec::v5());

    tokio::spawn(async move {
        server.accept(ConnAckPacket::accepted(false)).await;
        // Swallow the PINGREQ and never answer.
        let _ = server.recv().await;
        std::future::pending::<()>().await;
    });

    let saw_timeout = Arc::new(AtomicBool::new(false));
    let observed = Arc::clone(&saw_timeout);
    let handlers = EndpointHandlers::new().on_error(move |error| {
        if matches!(error, MqttError::KeepAliveTimeout) {
            observed.store(true, Ordering::SeqCst);
        }
    });

    let connect = ConnectOptions::new("lonely").with_keep_alive(Duration::from_secs(3));
    let (handle, _) = Endpoint::connect(
        client_side,
        connect,
        EndpointOptions::default(),
        handlers,
    )
    .await
    .unwrap();

    // Ping at 3 s, 150% grace on the answer, then the failure.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(saw_timeout.load(Ordering::SeqCst));
    assert!(!handle.is_connected());
}

#[tokio::test(start_paused = true)]
async fn server_closes_silent_client_at_150_percent() {
    let broker = Broker::default();
    let codec = Codec::v311();

    let (client_side, server_side) = MockTransport::pair();
    broker.serve_connection(server_side);

    use mqtt_endpoint::transport::{FrameReader, FrameWriter, Transport};
    let (reader, writer) = client_side.into_split().unwrap();
    let mut reader = FrameReader::new(reader);
    let mut writer = FrameWriter::new(writer);

    let mut connect = ConnectPacket::new("silent");
    connect.protocol_version = mqtt_endpoint::ProtocolVersion::V311;
    connect.keep_alive = 3;
    writer.write_packet(&Packet::Connect(connect), codec).await.unwrap();
    assert!(matches!(
        reader.read_packet(codec).await.unwrap(),
        Packet::ConnAck(_)
    ));

    // Silence. At 4.5 s the v3.1.1 server just closes the stream.
    let started = tokio::time::Instant::now();
    let err = reader.read_packet(codec).await.unwrap_err();
    assert!(matches!(err, MqttError::ConnectionClosedByPeer));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(4_400), "closed after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(6), "closed after {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn v5_server_reports_keepalive_timeout_before_closing() {
    let broker = Broker::default();
    let codec = Codec::v5();

    let (client_side, server_side) = MockTransport::pair();
    broker.serve_connection(server_side);

    use mqtt_endpoint::transport::{FrameReader, FrameWriter, Transport};
    let (reader, writer) = client_side.into_split().unwrap();
    let mut reader = FrameReader::new(reader);
    let mut writer = FrameWriter::new(writer);

    let mut connect = ConnectPacket::new("silent5");
    connect.keep_alive = 3;
    writer.write_packet(&Packet::Connect(connect), codec).await.unwrap();
    assert!(matches!(
        reader.read_packet(codec).await.unwrap(),
        Packet::ConnAck(_)
    ));

    match reader.read_packet(codec).await.unwrap() {
        Packet::Disconnect(disconnect) => {
            assert_eq!(disconnect.reason_code, ReasonCode::KeepAliveTimeout);
        }
        other => panic!("expected DISCONNECT 0x8D, got {:?}", other.packet_type()),
    }
}

#[tokio::test(start_paused = true)]
async fn disconnect_timeout_force_closes_without_close_handler() {
    // A one-chunk pipe and a peer that stops draining after the handshake.
    let (client_side, server_side) = MockTransport::bounded_pair(1);
    let mut server = RawServer::new(server_side, Codec::v5());

    tokio::spawn(async move {
        server.accept(ConnAckPacket::accepted(false)).await;
        // Stall: never read again.
        std::future::pending::<()>().await;
    });

    let errors = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let closed = Arc::new(AtomicBool::new(false));
    let errors_seen = Arc::clone(&errors);
    let closed_seen = Arc::clone(&closed);
    let handlers = EndpointHandlers::new()
        .on_error(move |error| errors_seen.lock().push(error.to_string()))
        .on_close(move || closed_seen.store(true, Ordering::SeqCst));

    let connect = ConnectOptions::new("stuck").with_keep_alive(Duration::ZERO);
    let (handle, _) = Endpoint::connect(
        client_side,
        connect,
        EndpointOptions::default(),
        handlers,
    )
    .await
    .unwrap();

    // Fill the pipe so the DISCONNECT write can never complete.
    handle
        .publish("t", vec![0u8; 32], PublishOptions::default())
        .unwrap();
    handle
        .publish("t", vec![0u8; 32], PublishOptions::default())
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let result = handle
        .disconnect(None, Some(Duration::from_secs(1)))
        .await;
    assert!(matches!(result, Err(MqttError::DisconnectTimeout)));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(errors
        .lock()
        .iter()
        .any(|message| message.contains("Disconnect timed out")));
    assert!(
        !closed.load(Ordering::SeqCst),
        "close handler must not fire on the timeout path"
    );
    assert!(!handle.is_connected());
}
