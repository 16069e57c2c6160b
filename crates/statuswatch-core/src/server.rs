//! Server facade
//!
//! A [`Server`] is a resolved (host, port) pair with everything needed to
//! poll it. Each poll opens a fresh connection, runs the whole exchange, and
//! always closes the connection afterward — status servers routinely restart
//! between polls, so connections are never reused.
//!
//! The `*_on` methods run the same exchange over a caller-supplied transport;
//! the retrying entry points wrap them so a mid-sequence failure restarts
//! from the handshake on a brand-new connection.

use crate::address;
use crate::error::Result;
use crate::protocol::connection::{AsyncConnection, AsyncTcpConnection, Connection, TcpConnection};
use crate::protocol::pinger::{
    AsyncServerPinger, DEFAULT_PROTOCOL_VERSION, ServerPinger,
};
use crate::retry::{try_x_times, try_x_times_blocking};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Port used when neither the address nor an SRV record names one.
pub const DEFAULT_PORT: u16 = 25565;
/// SRV service prefix for the status protocol.
pub const SRV_SERVICE: &str = "_minecraft._tcp";
/// Per-connection and per-read time bound.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// A pollable server.
#[derive(Debug, Clone)]
pub struct Server {
    pub host: String,
    pub port: u16,
    protocol_version: i32,
    timeout: Duration,
}

impl Server {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Resolve an address string, consulting SRV records when it carries no
    /// explicit port.
    pub async fn lookup(address: &str) -> Result<Self> {
        let (host, port) = address::lookup(address, DEFAULT_PORT, SRV_SERVICE).await?;
        debug!(host, port, "resolved target");
        Ok(Self::new(host, port))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_protocol_version(mut self, version: i32) -> Self {
        self.protocol_version = version;
        self
    }

    /// Measure round-trip latency in fractional milliseconds, retrying up to
    /// `tries` times with a fresh connection per attempt.
    pub async fn ping(&self, tries: u32) -> Result<f64> {
        try_x_times(tries, move || async move {
            let mut conn =
                AsyncTcpConnection::connect(&self.host, self.port, self.timeout).await?;
            let result = self.ping_on(&mut conn).await;
            conn.close().await;
            result
        })
        .await
    }

    /// Fetch the status document and latency, retrying up to `tries` times
    /// with a fresh connection per attempt.
    pub async fn status(&self, tries: u32) -> Result<(Value, f64)> {
        try_x_times(tries, move || async move {
            let mut conn =
                AsyncTcpConnection::connect(&self.host, self.port, self.timeout).await?;
            let result = self.status_on(&mut conn).await;
            conn.close().await;
            result
        })
        .await
    }

    /// Handshake and latency probe over a supplied transport.
    pub async fn ping_on<C: AsyncConnection>(&self, conn: &mut C) -> Result<f64> {
        let mut pinger = AsyncServerPinger::new(conn, self.host.clone(), self.port)
            .with_protocol_version(self.protocol_version);
        pinger.handshake().await?;
        pinger.test_ping().await
    }

    /// Full exchange over a supplied transport: handshake, status document,
    /// latency probe.
    pub async fn status_on<C: AsyncConnection>(&self, conn: &mut C) -> Result<(Value, f64)> {
        let mut pinger = AsyncServerPinger::new(conn, self.host.clone(), self.port)
            .with_protocol_version(self.protocol_version);
        pinger.handshake().await?;
        let document = pinger.read_status().await?;
        let latency = pinger.test_ping().await?;
        Ok((document, latency))
    }

    /// Blocking equivalent of [`ping`](Self::ping).
    pub fn ping_blocking(&self, tries: u32) -> Result<f64> {
        try_x_times_blocking(tries, || {
            let mut conn =
                TcpConnection::connect((self.host.as_str(), self.port), self.timeout)?;
            let result = self.ping_on_blocking(&mut conn);
            conn.close();
            result
        })
    }

    /// Blocking equivalent of [`status`](Self::status).
    pub fn status_blocking(&self, tries: u32) -> Result<(Value, f64)> {
        try_x_times_blocking(tries, || {
            let mut conn =
                TcpConnection::connect((self.host.as_str(), self.port), self.timeout)?;
            let result = self.status_on_blocking(&mut conn);
            conn.close();
            result
        })
    }

    fn ping_on_blocking<C: Connection>(&self, conn: &mut C) -> Result<f64> {
        let mut pinger = ServerPinger::new(conn, self.host.clone(), self.port)
            .with_protocol_version(self.protocol_version);
        pinger.handshake()?;
        pinger.test_ping()
    }

    fn status_on_blocking<C: Connection>(&self, conn: &mut C) -> Result<(Value, f64)> {
        let mut pinger = ServerPinger::new(conn, self.host.clone(), self.port)
            .with_protocol_version(self.protocol_version);
        pinger.handshake()?;
        let document = pinger.read_status()?;
        let latency = pinger.test_ping()?;
        Ok((document, latency))
    }
}
