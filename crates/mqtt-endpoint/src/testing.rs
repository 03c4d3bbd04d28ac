//! In-process transport for tests: two endpoints joined by byte pipes, no
//! sockets involved. Bounded variants let tests simulate a stalled peer
//! that stops draining its side.

use crate::error::{MqttError, Result};
use crate::transport::{ByteReader, ByteWriter, Transport};
use bytes::{Buf, Bytes};

pub struct MockTransport {
    reader: MockReader,
    writer: MockWriter,
}

impl MockTransport {
    /// A connected pair with effectively unlimited buffering.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        Self::pair_with_capacity(None)
    }

    /// A connected pair whose pipes hold at most `capacity` chunks; writers
    /// block once the peer stops reading.
    #[must_use]
    pub fn bounded_pair(capacity: usize) -> (Self, Self) {
        Self::pair_with_capacity(Some(capacity))
    }

    fn pair_with_capacity(capacity: Option<usize>) -> (Self, Self) {
        let (a_tx, a_rx) = match capacity {
            Some(n) => flume::bounded(n),
            None => flume::unbounded(),
        };
        let (b_tx, b_rx) = match capacity {
            Some(n) => flume::bounded(n),
            None => flume::unbounded(),
        };

        let a = Self {
            reader: MockReader {
                rx: b_rx,
                pending: Bytes::new(),
            },
            writer: MockWriter { tx: Some(a_tx) },
        };
        let b = Self {
            reader: MockReader {
                rx: a_rx,
                pending: Bytes::new(),
            },
            writer: MockWriter { tx: Some(b_tx) },
        };
        (a, b)
    }
}

impl Transport for MockTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn into_split(self) -> Result<(Self::Reader, Self::Writer)> {
        Ok((self.reader, self.writer))
    }
}

pub struct MockReader {
    rx: flume::Receiver<Vec<u8>>,
    pending: Bytes,
}

impl ByteReader for MockReader {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            if !self.pending.is_empty() {
                let n = self.pending.len().min(buf.len());
                self.pending.copy_to_slice(&mut buf[..n]);
                return Ok(n);
            }
            match self.rx.recv_async().await {
                Ok(chunk) => self.pending = Bytes::from(chunk),
                Err(_) => return Ok(0),
            }
        }
    }
}

pub struct MockWriter {
    tx: Option<flume::Sender<Vec<u8>>>,
}

impl ByteWriter for MockWriter {
    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let Some(tx) = &self.tx else {
            return Err(MqttError::Io("stream has been shut down".to_string()));
        };
        tx.send_async(buf.to_vec())
            .await
            .map_err(|_| MqttError::Io("Connection reset by peer".to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}
