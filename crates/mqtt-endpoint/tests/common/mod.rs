//! Shared fixtures: an in-process broker connection plus a raw wire-level
//! client for asserting exact packet exchanges.

#![allow(dead_code)]

use mqtt_endpoint::broker::Broker;
use mqtt_endpoint::core::packet::{Codec, ConnAckPacket, ConnectPacket, Packet};
use mqtt_endpoint::testing::{MockReader, MockTransport, MockWriter};
use mqtt_endpoint::transport::{FrameReader, FrameWriter, Transport};
use mqtt_endpoint::Result;
use std::time::Duration;

/// A client speaking raw packets to an in-process broker connection.
pub struct RawClient {
    pub reader: FrameReader<MockReader>,
    pub writer: FrameWriter<MockWriter>,
    pub codec: Codec,
}

impl RawClient {
    /// Opens a transport pair against the broker without sending anything.
    pub fn attach(broker: &Broker, codec: Codec) -> Self {
        let (client_side, server_side) = MockTransport::pair();
        broker.serve_connection(server_side);
        let (reader, writer) = client_side.into_split().unwrap();
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
            codec,
        }
    }

    /// CONNECT/CONNACK handshake; the CONNACK (accepted or refused) is
    /// returned for the test to assert on.
    pub async fn connect(broker: &Broker, connect: ConnectPacket, codec: Codec) -> (Self, ConnAckPacket) {
        let mut client = Self::attach(broker, codec);
        client.send(&Packet::Connect(connect)).await.unwrap();
        let connack = match client.recv().await.unwrap() {
            Packet::ConnAck(connack) => connack,
            other => panic!("expected CONNACK, got {:?}", other.packet_type()),
        };
        (client, connack)
    }

    pub async fn send(&mut self, packet: &Packet) -> Result<()> {
        self.writer.write_packet(packet, self.codec).await
    }

    pub async fn recv(&mut self) -> Result<Packet> {
        tokio::time::timeout(Duration::from_secs(5), self.reader.read_packet(self.codec))
            .await
            .expect("timed out waiting for a packet")
    }

    /// Asserts that nothing arrives within the window.
    pub async fn expect_silence(&mut self, window: Duration) {
        let outcome =
            tokio::time::timeout(window, self.reader.read_packet(self.codec)).await;
        assert!(outcome.is_err(), "unexpected packet: {:?}", outcome);
    }

    pub async fn close(mut self) {
        let _ = self.writer.close().await;
    }
}

/// A raw server half: lets a test play the broker against a real client
/// endpoint.
pub struct RawServer {
    pub reader: FrameReader<MockReader>,
    pub writer: FrameWriter<MockWriter>,
    pub codec: Codec,
}

impl RawServer {
    pub fn new(transport: MockTransport, codec: Codec) -> Self {
        let (reader, writer) = transport.into_split().unwrap();
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
            codec,
        }
    }

    /// Reads the CONNECT and replies with the given CONNACK.
    pub async fn accept(&mut self, connack: ConnAckPacket) -> ConnectPacket {
        let connect = match self.recv().await.unwrap() {
            Packet::Connect(connect) => connect,
            other => panic!("expected CONNECT, got {:?}", other.packet_type()),
        };
        self.send(&Packet::ConnAck(connack)).await.unwrap();
        connect
    }

    pub async fn send(&mut self, packet: &Packet) -> Result<()> {
        self.writer.write_packet(packet, self.codec).await
    }

    pub async fn recv(&mut self) -> Result<Packet> {
        tokio::time::timeout(Duration::from_secs(30), self.reader.read_packet(self.codec))
            .await
            .expect("timed out waiting for a packet")
    }
}
