//! Frame-level I/O: turning the byte stream into whole control packets and
//! back.
//!
//! The reader works in three phases per packet: one byte of fixed header,
//! the 1-4 byte remaining-length varint, then exactly that many body bytes.
//! It never buffers past the current packet, so a reconnecting transport
//! can hand the stream to a fresh reader at any packet boundary. The writer
//! serializes whole packets with `write_all`; owned by a single task, it
//! gives one-write-in-flight FIFO ordering by construction.

use crate::error::{MqttError, Result};
use crate::transport::{ByteReader, ByteWriter};
use bytes::{Bytes, BytesMut};
use mqtt_endpoint_core::encoding::MAX_REMAINING_LENGTH;
use mqtt_endpoint_core::packet::{Codec, FixedHeader, Packet};

pub struct FrameReader<R> {
    reader: R,
    max_packet_size: usize,
}

impl<R: ByteReader> FrameReader<R> {
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            max_packet_size: MAX_REMAINING_LENGTH as usize,
        }
    }

    /// Applies the negotiated v5 MAXIMUM PACKET SIZE to inbound frames.
    pub fn set_max_packet_size(&mut self, max: usize) {
        self.max_packet_size = max;
    }

    /// `None` on clean EOF before any byte of the next packet.
    async fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        let n = self.reader.read(&mut byte).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(byte[0]))
    }

    async fn read_exact(&mut self, mut buf: &mut [u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.reader.read(buf).await?;
            if n == 0 {
                return Err(MqttError::UnexpectedEof);
            }
            buf = &mut buf[n..];
        }
        Ok(())
    }

    /// Reads and decodes the next complete packet.
    ///
    /// EOF before the first header byte is the peer's graceful close
    /// (`ConnectionClosedByPeer`); EOF anywhere after it is `UnexpectedEof`.
    pub async fn read_packet(&mut self, codec: Codec) -> Result<Packet> {
        // Phase a: fixed-header byte.
        let Some(first) = self.read_byte().await? else {
            return Err(MqttError::ConnectionClosedByPeer);
        };
        let (packet_type, flags) = FixedHeader::parse_first_byte(first)?;

        // Phase b: remaining-length varint, 1-4 bytes.
        let mut remaining: u32 = 0;
        let mut multiplier: u32 = 1;
        let mut byte_count = 0;
        loop {
            if byte_count == 4 {
                return Err(MqttError::MalformedPacket(
                    "Remaining length continuation past 4 bytes".to_string(),
                ));
            }
            let byte = self.read_byte().await?.ok_or(MqttError::UnexpectedEof)?;
            remaining += u32::from(byte & 0x7F) * multiplier;
            byte_count += 1;
            if byte & 0x80 == 0 {
                break;
            }
            multiplier *= 128;
        }

        let body_len = remaining as usize;
        if body_len > self.max_packet_size {
            return Err(MqttError::PacketTooLarge {
                size: body_len,
                max: self.max_packet_size,
            });
        }

        // Phase c: exactly the body.
        let mut body = vec![0u8; body_len];
        self.read_exact(&mut body).await?;

        let fixed_header = FixedHeader::new(packet_type, flags, remaining);
        let mut body = Bytes::from(body);
        Packet::decode_body(&mut body, &fixed_header, codec)
    }
}

pub struct FrameWriter<W> {
    writer: W,
    max_packet_size: usize,
}

impl<W: ByteWriter> FrameWriter<W> {
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            max_packet_size: MAX_REMAINING_LENGTH as usize,
        }
    }

    /// Applies the peer's v5 MAXIMUM PACKET SIZE to outbound frames.
    pub fn set_max_packet_size(&mut self, max: usize) {
        self.max_packet_size = max;
    }

    /// Encodes and writes one packet. The future resolves only once the
    /// whole frame is handed to the transport, so callers awaiting in turn
    /// get FIFO bytes on the wire.
    pub async fn write_packet(&mut self, packet: &Packet, codec: Codec) -> Result<()> {
        let mut buf = BytesMut::new();
        packet.encode(&mut buf, codec)?;
        if buf.len() > self.max_packet_size {
            return Err(MqttError::PacketTooLarge {
                size: buf.len(),
                max: self.max_packet_size,
            });
        }
        self.writer.write_all(&buf).await
    }

    /// Writes a pre-encoded frame (session resends keep their original
    /// bytes).
    pub async fn write_raw(&mut self, frame: &[u8]) -> Result<()> {
        self.writer.write_all(frame).await
    }

    pub async fn close(&mut self) -> Result<()> {
        self.writer.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use crate::transport::Transport;
    use mqtt_endpoint_core::packet::PublishPacket;
    use mqtt_endpoint_core::types::QoS;

    #[tokio::test]
    async fn test_packet_round_trip_over_pipe() {
        let (a, b) = MockTransport::pair();
        let (_a_reader, a_writer) = a.into_split().unwrap();
        let (b_reader, _b_writer) = b.into_split().unwrap();

        let mut writer = FrameWriter::new(a_writer);
        let mut reader = FrameReader::new(b_reader);

        let publish = PublishPacket::new("t/1", &b"payload"[..], QoS::AtMostOnce);
        writer
            .write_packet(&Packet::Publish(publish), Codec::v5())
            .await
            .unwrap();

        match reader.read_packet(Codec::v5()).await.unwrap() {
            Packet::Publish(decoded) => {
                assert_eq!(decoded.topic_name, "t/1");
                assert_eq!(&decoded.payload[..], b"payload");
            }
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_eof_before_header_is_graceful_close() {
        let (a, b) = MockTransport::pair();
        let (b_reader, _b_writer) = b.into_split().unwrap();
        drop(a);

        let mut reader = FrameReader::new(b_reader);
        let err = reader.read_packet(Codec::v5()).await.unwrap_err();
        assert!(matches!(err, MqttError::ConnectionClosedByPeer));
    }

    #[tokio::test]
    async fn test_eof_mid_packet_is_unexpected() {
        let (a, b) = MockTransport::pair();
        let (_a_reader, mut a_writer) = a.into_split().unwrap();
        let (b_reader, _b_writer) = b.into_split().unwrap();

        // Header promising a 5-byte body, then close.
        a_writer.write_all(&[0x30, 0x05, 0x00]).await.unwrap();
        a_writer.close().await.unwrap();
        drop(a_writer);

        let mut reader = FrameReader::new(b_reader);
        let err = reader.read_packet(Codec::v5()).await.unwrap_err();
        assert!(matches!(err, MqttError::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_oversize_packet_rejected() {
        let (a, b) = MockTransport::pair();
        let (_a_reader, mut a_writer) = a.into_split().unwrap();
        let (b_reader, _b_writer) = b.into_split().unwrap();

        // Remaining length 200 against a 128-byte cap.
        a_writer.write_all(&[0x30, 0xC8, 0x01]).await.unwrap();

        let mut reader = FrameReader::new(b_reader);
        reader.set_max_packet_size(128);
        let err = reader.read_packet(Codec::v5()).await.unwrap_err();
        assert!(matches!(err, MqttError::PacketTooLarge { size: 200, .. }));
    }

    #[tokio::test]
    async fn test_writer_respects_peer_maximum() {
        let (a, _b) = MockTransport::pair();
        let (_a_reader, a_writer) = a.into_split().unwrap();

        let mut writer = FrameWriter::new(a_writer);
        writer.set_max_packet_size(8);

        let publish = PublishPacket::new("topic", vec![0u8; 64], QoS::AtMostOnce);
        let err = writer
            .write_packet(&Packet::Publish(publish), Codec::v5())
            .await
            .unwrap_err();
        assert!(matches!(err, MqttError::PacketTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_five_byte_varint_rejected() {
        let (a, b) = MockTransport::pair();
        let (_a_reader, mut a_writer) = a.into_split().unwrap();
        let (b_reader, _b_writer) = b.into_split().unwrap();

        a_writer
            .write_all(&[0x30, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F])
            .await
            .unwrap();

        let mut reader = FrameReader::new(b_reader);
        assert!(reader.read_packet(Codec::v5()).await.is_err());
    }
}
