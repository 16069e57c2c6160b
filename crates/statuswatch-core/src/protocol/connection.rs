//! Binary codec and transports
//!
//! One codec, five carriers. The [`Connection`] trait holds the whole
//! variable-length/fixed-width codec as provided methods on top of two raw
//! primitives (`read`/`write`), so the varint logic exists exactly once.
//! [`AsyncConnection`] mirrors the read set for suspending transports;
//! fixed-width async reads delegate to an in-memory connection rather than
//! duplicating the byte shuffling.
//!
//! ## Transports
//!
//! - [`MemoryConnection`]: byte buffers only, used for packet assembly and
//!   for parsing framed packets after they arrive in full
//! - [`TcpConnection`] / [`UdpConnection`]: blocking std sockets
//! - [`AsyncTcpConnection`] / [`AsyncUdpConnection`]: tokio sockets with a
//!   per-operation time bound
//!
//! A stream transport must satisfy the full requested read length; yielding
//! zero bytes first is surfaced as an unexpected-EOF I/O error. A datagram
//! transport ignores the requested length and returns one whole datagram.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::io::{Read, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time;

/// Maximum 7-bit groups in a varint (32-bit range)
const VARINT_MAX_GROUPS: u32 = 5;
/// Maximum 7-bit groups in a varlong (64-bit range)
const VARLONG_MAX_GROUPS: u32 = 10;
/// Largest datagram a UDP read will return
const MAX_DATAGRAM_SIZE: usize = 65535;

fn unexpected_eof() -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        "server closed the connection mid-message",
    ))
}

/// Blocking byte transport with the shared codec as provided methods.
pub trait Connection {
    /// Read up to `length` bytes. Socket transports block until the full
    /// length is available or fail; the in-memory transport returns at most
    /// what remains.
    fn read(&mut self, length: usize) -> Result<Vec<u8>>;

    /// Write all of `data`.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read exactly `length` bytes or fail.
    fn read_exact(&mut self, length: usize) -> Result<Vec<u8>> {
        let data = self.read(length)?;
        if data.len() != length {
            return Err(Error::protocol(format!(
                "connection ran out of data (wanted {length} bytes, got {})",
                data.len()
            )));
        }
        Ok(data)
    }

    fn read_byte(&mut self) -> Result<u8> {
        Ok(self.read_exact(1)?[0])
    }

    /// Read a varint. 7-bit groups, low-order first, high bit set while more
    /// groups follow. Rejects encodings longer than five groups.
    fn read_varint(&mut self) -> Result<i32> {
        let mut result: u32 = 0;
        for group in 0..VARINT_MAX_GROUPS {
            let part = self.read_byte()?;
            result |= u32::from(part & 0x7F) << (7 * group);
            if part & 0x80 == 0 {
                return Ok(result as i32);
            }
        }
        Err(Error::protocol("received varint is too big"))
    }

    /// Write a varint. Values outside the 32-bit range emit the maximum
    /// number of groups and then fail with an encoding error.
    fn write_varint(&mut self, value: i64) -> Result<()> {
        let mut remaining = value as u32;
        for _ in 0..VARINT_MAX_GROUPS {
            if remaining & !0x7F == 0 {
                self.write(&[remaining as u8])?;
                if (i64::from(i32::MIN)..=i64::from(i32::MAX)).contains(&value) {
                    return Ok(());
                }
                break;
            }
            self.write(&[(remaining as u8 & 0x7F) | 0x80])?;
            remaining >>= 7;
        }
        Err(Error::protocol(format!(
            "value {value} is too big to send in a varint"
        )))
    }

    /// Read a varlong. Same scheme as varints with a ten-group limit.
    fn read_varlong(&mut self) -> Result<i64> {
        let mut result: u64 = 0;
        for group in 0..VARLONG_MAX_GROUPS {
            let part = self.read_byte()?;
            result |= u64::from(part & 0x7F) << (7 * group);
            if part & 0x80 == 0 {
                return Ok(result as i64);
            }
        }
        Err(Error::protocol("received varlong is too big"))
    }

    /// Write a varlong. Every i64 fits in ten groups.
    fn write_varlong(&mut self, value: i64) -> Result<()> {
        let mut remaining = value as u64;
        loop {
            if remaining & !0x7F == 0 {
                self.write(&[remaining as u8])?;
                return Ok(());
            }
            self.write(&[(remaining as u8 & 0x7F) | 0x80])?;
            remaining >>= 7;
        }
    }

    /// Read a varint byte-length prefix followed by that many UTF-8 bytes.
    fn read_utf(&mut self) -> Result<String> {
        let length = self.read_varint()?;
        let length = usize::try_from(length)
            .map_err(|_| Error::protocol(format!("negative string length {length}")))?;
        let data = self.read_exact(length)?;
        String::from_utf8(data).map_err(|err| Error::protocol(format!("invalid UTF-8: {err}")))
    }

    /// Write a varint byte-length prefix followed by the UTF-8 bytes.
    fn write_utf(&mut self, value: &str) -> Result<()> {
        self.write_varint(value.len() as i64)?;
        self.write(value.as_bytes())
    }

    /// Read Latin-1 bytes up to and excluding a single 0x00 terminator.
    fn read_ascii(&mut self) -> Result<String> {
        let mut result = Vec::new();
        loop {
            let byte = self.read_byte()?;
            if byte == 0 {
                break;
            }
            result.push(byte);
        }
        Ok(result.into_iter().map(char::from).collect())
    }

    /// Write Latin-1 bytes followed by exactly one 0x00 terminator.
    fn write_ascii(&mut self, value: &str) -> Result<()> {
        let mut data = Vec::with_capacity(value.len() + 1);
        for ch in value.chars() {
            let byte = u8::try_from(u32::from(ch)).map_err(|_| {
                Error::protocol(format!("character {ch:?} is not representable in Latin-1"))
            })?;
            data.push(byte);
        }
        data.push(0);
        self.write(&data)
    }

    /// Read one byte; nonzero is true.
    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_byte()? != 0)
    }

    fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write(&[u8::from(value)])
    }

    fn read_short(&mut self) -> Result<i16> {
        let d = self.read_exact(2)?;
        Ok(i16::from_be_bytes([d[0], d[1]]))
    }

    fn write_short(&mut self, value: i16) -> Result<()> {
        self.write(&value.to_be_bytes())
    }

    fn read_ushort(&mut self) -> Result<u16> {
        let d = self.read_exact(2)?;
        Ok(u16::from_be_bytes([d[0], d[1]]))
    }

    fn write_ushort(&mut self, value: u16) -> Result<()> {
        self.write(&value.to_be_bytes())
    }

    fn read_int(&mut self) -> Result<i32> {
        let d = self.read_exact(4)?;
        Ok(i32::from_be_bytes([d[0], d[1], d[2], d[3]]))
    }

    fn write_int(&mut self, value: i32) -> Result<()> {
        self.write(&value.to_be_bytes())
    }

    fn read_uint(&mut self) -> Result<u32> {
        let d = self.read_exact(4)?;
        Ok(u32::from_be_bytes([d[0], d[1], d[2], d[3]]))
    }

    fn write_uint(&mut self, value: u32) -> Result<()> {
        self.write(&value.to_be_bytes())
    }

    fn read_long(&mut self) -> Result<i64> {
        let d = self.read_exact(8)?;
        Ok(i64::from_be_bytes([
            d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7],
        ]))
    }

    fn write_long(&mut self, value: i64) -> Result<()> {
        self.write(&value.to_be_bytes())
    }

    fn read_ulong(&mut self) -> Result<u64> {
        let d = self.read_exact(8)?;
        Ok(u64::from_be_bytes([
            d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7],
        ]))
    }

    fn write_ulong(&mut self, value: u64) -> Result<()> {
        self.write(&value.to_be_bytes())
    }

    /// Read a varint length prefix, then that many bytes into a fresh
    /// in-memory connection for recursive parsing.
    fn read_buffer(&mut self) -> Result<MemoryConnection> {
        let length = self.read_varint()?;
        let length = usize::try_from(length)
            .map_err(|_| Error::protocol(format!("negative buffer length {length}")))?;
        let data = self.read_exact(length)?;
        Ok(MemoryConnection::from_received(data))
    }

    /// Flush `buffer`, then write its byte length as a varint followed by
    /// the bytes themselves. This is how whole packets are framed.
    fn write_buffer(&mut self, buffer: &mut MemoryConnection) -> Result<()> {
        let data = buffer.flush();
        self.write_varint(data.len() as i64)?;
        self.write(&data)
    }
}

/// Suspending byte transport sharing the codec.
///
/// Only the read set plus the two write operations packet framing needs are
/// mirrored here: outgoing packets are always assembled in a
/// [`MemoryConnection`] and written with [`write_buffer`], and incoming
/// packets are read whole with [`read_buffer`] and parsed synchronously.
///
/// [`write_buffer`]: AsyncConnection::write_buffer
/// [`read_buffer`]: AsyncConnection::read_buffer
#[async_trait]
pub trait AsyncConnection: Send {
    /// Read up to `length` bytes, suspending until the transport delivers
    /// them. Stream implementations must satisfy the full length.
    async fn read(&mut self, length: usize) -> Result<Vec<u8>>;

    /// Write all of `data`.
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    async fn read_exact(&mut self, length: usize) -> Result<Vec<u8>> {
        let data = self.read(length).await?;
        if data.len() != length {
            return Err(Error::protocol(format!(
                "connection ran out of data (wanted {length} bytes, got {})",
                data.len()
            )));
        }
        Ok(data)
    }

    async fn read_byte(&mut self) -> Result<u8> {
        Ok(self.read_exact(1).await?[0])
    }

    async fn read_varint(&mut self) -> Result<i32> {
        let mut result: u32 = 0;
        for group in 0..VARINT_MAX_GROUPS {
            let part = self.read_byte().await?;
            result |= u32::from(part & 0x7F) << (7 * group);
            if part & 0x80 == 0 {
                return Ok(result as i32);
            }
        }
        Err(Error::protocol("received varint is too big"))
    }

    async fn read_varlong(&mut self) -> Result<i64> {
        let mut result: u64 = 0;
        for group in 0..VARLONG_MAX_GROUPS {
            let part = self.read_byte().await?;
            result |= u64::from(part & 0x7F) << (7 * group);
            if part & 0x80 == 0 {
                return Ok(result as i64);
            }
        }
        Err(Error::protocol("received varlong is too big"))
    }

    async fn read_utf(&mut self) -> Result<String> {
        let length = self.read_varint().await?;
        let length = usize::try_from(length)
            .map_err(|_| Error::protocol(format!("negative string length {length}")))?;
        let data = self.read_exact(length).await?;
        String::from_utf8(data).map_err(|err| Error::protocol(format!("invalid UTF-8: {err}")))
    }

    async fn read_ascii(&mut self) -> Result<String> {
        let mut result = Vec::new();
        loop {
            let byte = self.read_byte().await?;
            if byte == 0 {
                break;
            }
            result.push(byte);
        }
        Ok(result.into_iter().map(char::from).collect())
    }

    async fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_byte().await? != 0)
    }

    async fn read_short(&mut self) -> Result<i16> {
        MemoryConnection::from_received(self.read_exact(2).await?).read_short()
    }

    async fn read_ushort(&mut self) -> Result<u16> {
        MemoryConnection::from_received(self.read_exact(2).await?).read_ushort()
    }

    async fn read_int(&mut self) -> Result<i32> {
        MemoryConnection::from_received(self.read_exact(4).await?).read_int()
    }

    async fn read_uint(&mut self) -> Result<u32> {
        MemoryConnection::from_received(self.read_exact(4).await?).read_uint()
    }

    async fn read_long(&mut self) -> Result<i64> {
        MemoryConnection::from_received(self.read_exact(8).await?).read_long()
    }

    async fn read_ulong(&mut self) -> Result<u64> {
        MemoryConnection::from_received(self.read_exact(8).await?).read_ulong()
    }

    async fn read_buffer(&mut self) -> Result<MemoryConnection> {
        let length = self.read_varint().await?;
        let length = usize::try_from(length)
            .map_err(|_| Error::protocol(format!("negative buffer length {length}")))?;
        let data = self.read_exact(length).await?;
        Ok(MemoryConnection::from_received(data))
    }

    async fn write_varint(&mut self, value: i64) -> Result<()> {
        let mut prefix = MemoryConnection::new();
        prefix.write_varint(value)?;
        self.write(&prefix.flush()).await
    }

    async fn write_buffer(&mut self, buffer: &mut MemoryConnection) -> Result<()> {
        let data = buffer.flush();
        self.write_varint(data.len() as i64).await?;
        self.write(&data).await
    }
}

/// In-memory connection: an outgoing accumulator plus an incoming byte queue.
///
/// `read` consumes from the incoming queue and returns at most what remains;
/// `write` appends to the accumulator until [`flush`](Self::flush) takes it.
#[derive(Debug, Default, Clone)]
pub struct MemoryConnection {
    sent: Vec<u8>,
    received: Vec<u8>,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a connection whose incoming queue starts as `data`.
    pub fn from_received(data: Vec<u8>) -> Self {
        Self {
            sent: Vec::new(),
            received: data,
        }
    }

    /// Append bytes to the incoming queue.
    pub fn receive(&mut self, data: &[u8]) {
        self.received.extend_from_slice(data);
    }

    /// Unread bytes left in the incoming queue.
    pub fn remaining(&self) -> usize {
        self.received.len()
    }

    /// Take and clear everything written so far.
    pub fn flush(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.sent)
    }
}

impl Connection for MemoryConnection {
    fn read(&mut self, length: usize) -> Result<Vec<u8>> {
        let length = length.min(self.received.len());
        Ok(self.received.drain(..length).collect())
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.sent.extend_from_slice(data);
        Ok(())
    }
}

/// Blocking TCP transport with NODELAY and per-operation timeouts.
#[derive(Debug)]
pub struct TcpConnection {
    stream: std::net::TcpStream,
}

impl TcpConnection {
    /// Connect to `addr`, bounded by `timeout`, which also bounds every
    /// subsequent read and write.
    pub fn connect(addr: impl ToSocketAddrs, timeout: Duration) -> Result<Self> {
        let target = resolve_one(addr)?;
        let stream = std::net::TcpStream::connect_timeout(&target, timeout)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        Ok(Self { stream })
    }

    /// Shut down both directions and drop the socket.
    pub fn close(self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

impl Connection for TcpConnection {
    fn read(&mut self, length: usize) -> Result<Vec<u8>> {
        let mut result = vec![0u8; length];
        let mut filled = 0;
        while filled < length {
            let count = self.stream.read(&mut result[filled..])?;
            if count == 0 {
                return Err(unexpected_eof());
            }
            filled += count;
        }
        Ok(result)
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data)?;
        Ok(())
    }
}

/// Blocking UDP transport. Reads ignore the requested length and return one
/// whole datagram.
#[derive(Debug)]
pub struct UdpConnection {
    socket: std::net::UdpSocket,
}

impl UdpConnection {
    pub fn connect(addr: impl ToSocketAddrs, timeout: Duration) -> Result<Self> {
        let target = resolve_one(addr)?;
        let socket = std::net::UdpSocket::bind(local_any(&target))?;
        socket.set_read_timeout(Some(timeout))?;
        socket.set_write_timeout(Some(timeout))?;
        socket.connect(target)?;
        Ok(Self { socket })
    }
}

impl Connection for UdpConnection {
    fn read(&mut self, _length: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let count = self.socket.recv(&mut buffer)?;
            if count > 0 {
                buffer.truncate(count);
                return Ok(buffer);
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.socket.send(data)?;
        Ok(())
    }
}

/// Suspending TCP transport. Every read is bounded by the connection
/// timeout so a stalled server cannot wedge a polling tick.
#[derive(Debug)]
pub struct AsyncTcpConnection {
    stream: tokio::net::TcpStream,
    timeout: Duration,
}

impl AsyncTcpConnection {
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let stream = time::timeout(timeout, tokio::net::TcpStream::connect((host, port)))
            .await
            .map_err(|_| Error::timeout(format!("connecting to {host}:{port}")))??;
        stream.set_nodelay(true)?;
        Ok(Self { stream, timeout })
    }

    /// Shut down the write half and drop the socket.
    pub async fn close(mut self) {
        let _ = self.stream.shutdown().await;
    }
}

#[async_trait]
impl AsyncConnection for AsyncTcpConnection {
    async fn read(&mut self, length: usize) -> Result<Vec<u8>> {
        let mut result = vec![0u8; length];
        let mut filled = 0;
        while filled < length {
            let count = time::timeout(self.timeout, self.stream.read(&mut result[filled..]))
                .await
                .map_err(|_| Error::timeout("server took too long to respond"))??;
            if count == 0 {
                return Err(unexpected_eof());
            }
            filled += count;
        }
        Ok(result)
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await?;
        Ok(())
    }
}

/// Suspending UDP transport. One whole datagram per read.
#[derive(Debug)]
pub struct AsyncUdpConnection {
    socket: tokio::net::UdpSocket,
    timeout: Duration,
}

impl AsyncUdpConnection {
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let target = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| Error::invalid_address(format!("{host}:{port} did not resolve")))?;
        let socket = tokio::net::UdpSocket::bind(local_any(&target)).await?;
        socket.connect(target).await?;
        Ok(Self { socket, timeout })
    }
}

#[async_trait]
impl AsyncConnection for AsyncUdpConnection {
    async fn read(&mut self, _length: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let count = time::timeout(self.timeout, self.socket.recv(&mut buffer))
                .await
                .map_err(|_| Error::timeout("server took too long to respond"))??;
            if count > 0 {
                buffer.truncate(count);
                return Ok(buffer);
            }
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.socket.send(data).await?;
        Ok(())
    }
}

fn resolve_one(addr: impl ToSocketAddrs) -> Result<SocketAddr> {
    addr.to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::invalid_address("address did not resolve"))
}

/// Wildcard local address in the same family as `target`.
fn local_any(target: &SocketAddr) -> SocketAddr {
    if target.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    }
}
