//! Shared test doubles for the contract tests.

use async_trait::async_trait;
use statuswatch_core::{AsyncConnection, Connection, MemoryConnection, Result};

/// Scripted in-process server speaking the status protocol.
///
/// Writes are parsed as framed packets: the first packet is taken as the
/// handshake, an empty id-0 packet queues a status response, and an id-1
/// packet echoes the token (plus `token_offset`, for mismatch tests).
pub struct MockTransport {
    pending: Vec<u8>,
    incoming: MemoryConnection,
    status_json: String,
    token_offset: i64,
    handshaken: bool,
    pub status_requests: u32,
    pub ping_requests: u32,
}

impl MockTransport {
    pub fn new(status_json: impl Into<String>) -> Self {
        Self {
            pending: Vec::new(),
            incoming: MemoryConnection::new(),
            status_json: status_json.into(),
            token_offset: 0,
            handshaken: false,
            status_requests: 0,
            ping_requests: 0,
        }
    }

    /// Make ping responses echo a wrong token.
    pub fn with_token_offset(mut self, offset: i64) -> Self {
        self.token_offset = offset;
        self
    }

    pub fn saw_handshake(&self) -> bool {
        self.handshaken
    }

    fn drain_packets(&mut self) -> Result<()> {
        loop {
            let mut reader = MemoryConnection::from_received(self.pending.clone());
            let header_before = reader.remaining();
            let Ok(length) = reader.read_varint() else {
                // incomplete length prefix, wait for more bytes
                return Ok(());
            };
            let length = length as usize;
            if reader.remaining() < length {
                return Ok(());
            }
            let header_len = header_before - reader.remaining();
            let payload: Vec<u8> = self.pending[header_len..header_len + length].to_vec();
            self.pending.drain(..header_len + length);
            self.handle_packet(payload)?;
        }
    }

    fn handle_packet(&mut self, payload: Vec<u8>) -> Result<()> {
        let mut packet = MemoryConnection::from_received(payload);
        let id = packet.read_varint()?;
        if !self.handshaken {
            assert_eq!(id, 0, "first packet must be the handshake");
            self.handshaken = true;
            return Ok(());
        }
        match id {
            0 => {
                self.status_requests += 1;
                let mut inner = MemoryConnection::new();
                inner.write_varint(0)?;
                inner.write_utf(&self.status_json)?;
                self.queue_response(inner)
            }
            1 => {
                self.ping_requests += 1;
                let token = packet.read_long()?;
                let mut inner = MemoryConnection::new();
                inner.write_varint(1)?;
                inner.write_long(token.wrapping_add(self.token_offset))?;
                self.queue_response(inner)
            }
            other => panic!("unexpected packet id {other}"),
        }
    }

    fn queue_response(&mut self, mut inner: MemoryConnection) -> Result<()> {
        let mut framed = MemoryConnection::new();
        framed.write_buffer(&mut inner)?;
        self.incoming.receive(&framed.flush());
        Ok(())
    }
}

#[async_trait]
impl AsyncConnection for MockTransport {
    async fn read(&mut self, length: usize) -> Result<Vec<u8>> {
        Connection::read(&mut self.incoming, length)
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.pending.extend_from_slice(data);
        self.drain_packets()
    }
}
