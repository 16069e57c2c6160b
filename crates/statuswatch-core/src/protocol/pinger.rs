//! Handshake, status, and latency exchanges
//!
//! Packets are always assembled in a [`MemoryConnection`] and framed onto the
//! transport with `write_buffer`, and responses are read whole with
//! `read_buffer` before parsing. That keeps the packet builders and response
//! processors plain blocking functions shared by both pinger flavors.
//!
//! ## Exchange order
//!
//! 1. `handshake()` — must come first on a fresh connection
//! 2. `read_status()` — optional, returns the parsed status document
//! 3. `test_ping()` — returns round-trip latency in fractional milliseconds

use crate::error::{Error, Result};
use crate::protocol::connection::{AsyncConnection, Connection, MemoryConnection};
use rand::Rng;
use serde_json::Value;
use std::time::Instant;

/// Protocol version advertised in the handshake. Status queries are accepted
/// regardless of version, so a fixed historical value works everywhere.
pub const DEFAULT_PROTOCOL_VERSION: i32 = 47;

/// Handshake intent requesting the status flow.
const INTENT_STATUS: i64 = 1;

/// Build the handshake packet: id 0, protocol version, host, port, intent.
pub fn handshake_packet(protocol_version: i32, host: &str, port: u16) -> Result<MemoryConnection> {
    let mut packet = MemoryConnection::new();
    packet.write_varint(0)?;
    packet.write_varint(i64::from(protocol_version))?;
    packet.write_utf(host)?;
    packet.write_ushort(port)?;
    packet.write_varint(INTENT_STATUS)?;
    Ok(packet)
}

/// Build the status request packet: id 0, no payload.
pub fn status_request_packet() -> Result<MemoryConnection> {
    let mut packet = MemoryConnection::new();
    packet.write_varint(0)?;
    Ok(packet)
}

/// Build the ping request packet: id 1 plus an 8-byte token.
pub fn ping_request_packet(token: i64) -> Result<MemoryConnection> {
    let mut packet = MemoryConnection::new();
    packet.write_varint(1)?;
    packet.write_long(token)?;
    Ok(packet)
}

/// Parse a framed status response: packet id 0 followed by a UTF-encoded
/// JSON object.
pub fn process_status_response(response: &mut MemoryConnection) -> Result<Value> {
    if response.read_varint()? != 0 {
        return Err(Error::protocol("received invalid status response packet"));
    }
    let raw = response.read_utf()?;
    let document: Value = serde_json::from_str(&raw)
        .map_err(|err| Error::protocol(format!("received invalid JSON: {err}")))?;
    if !document.is_object() {
        return Err(Error::protocol("status document is not a JSON object"));
    }
    Ok(document)
}

/// Parse a framed ping response and verify the echoed token, returning the
/// elapsed time since `sent_at` in fractional milliseconds.
pub fn process_ping_response(
    response: &mut MemoryConnection,
    expected: i64,
    sent_at: Instant,
) -> Result<f64> {
    if response.read_varint()? != 1 {
        return Err(Error::protocol("received invalid ping response packet"));
    }
    let received = response.read_long()?;
    if received != expected {
        return Err(Error::PingTokenMismatch { expected, received });
    }
    Ok(sent_at.elapsed().as_secs_f64() * 1000.0)
}

fn random_token() -> i64 {
    rand::thread_rng().gen_range(0..=i64::MAX)
}

/// Blocking status/ping exchange over a borrowed transport.
pub struct ServerPinger<'c, C: Connection> {
    connection: &'c mut C,
    host: String,
    port: u16,
    protocol_version: i32,
    ping_token: i64,
}

impl<'c, C: Connection> ServerPinger<'c, C> {
    pub fn new(connection: &'c mut C, host: impl Into<String>, port: u16) -> Self {
        Self {
            connection,
            host: host.into(),
            port,
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            ping_token: random_token(),
        }
    }

    pub fn with_protocol_version(mut self, version: i32) -> Self {
        self.protocol_version = version;
        self
    }

    pub fn with_token(mut self, token: i64) -> Self {
        self.ping_token = token;
        self
    }

    pub fn handshake(&mut self) -> Result<()> {
        let mut packet = handshake_packet(self.protocol_version, &self.host, self.port)?;
        self.connection.write_buffer(&mut packet)
    }

    pub fn read_status(&mut self) -> Result<Value> {
        let mut packet = status_request_packet()?;
        self.connection.write_buffer(&mut packet)?;
        let mut response = self.connection.read_buffer()?;
        process_status_response(&mut response)
    }

    pub fn test_ping(&mut self) -> Result<f64> {
        let mut packet = ping_request_packet(self.ping_token)?;
        let sent_at = Instant::now();
        self.connection.write_buffer(&mut packet)?;
        let mut response = self.connection.read_buffer()?;
        process_ping_response(&mut response, self.ping_token, sent_at)
    }
}

/// Suspending status/ping exchange over a borrowed transport.
pub struct AsyncServerPinger<'c, C: AsyncConnection> {
    connection: &'c mut C,
    host: String,
    port: u16,
    protocol_version: i32,
    ping_token: i64,
}

impl<'c, C: AsyncConnection> AsyncServerPinger<'c, C> {
    pub fn new(connection: &'c mut C, host: impl Into<String>, port: u16) -> Self {
        Self {
            connection,
            host: host.into(),
            port,
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            ping_token: random_token(),
        }
    }

    pub fn with_protocol_version(mut self, version: i32) -> Self {
        self.protocol_version = version;
        self
    }

    pub fn with_token(mut self, token: i64) -> Self {
        self.ping_token = token;
        self
    }

    pub async fn handshake(&mut self) -> Result<()> {
        let mut packet = handshake_packet(self.protocol_version, &self.host, self.port)?;
        self.connection.write_buffer(&mut packet).await
    }

    pub async fn read_status(&mut self) -> Result<Value> {
        let mut packet = status_request_packet()?;
        self.connection.write_buffer(&mut packet).await?;
        let mut response = self.connection.read_buffer().await?;
        process_status_response(&mut response)
    }

    pub async fn test_ping(&mut self) -> Result<f64> {
        let mut packet = ping_request_packet(self.ping_token)?;
        let sent_at = Instant::now();
        self.connection.write_buffer(&mut packet).await?;
        let mut response = self.connection.read_buffer().await?;
        process_ping_response(&mut response, self.ping_token, sent_at)
    }
}
