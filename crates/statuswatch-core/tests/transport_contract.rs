//! Loopback behavior of the socket transports.
//!
//! Contract: stream transports satisfy the full requested read length even
//! when the peer dribbles bytes, surface a mid-message close as an
//! unexpected EOF, and bound every async read; datagram transports return
//! one whole datagram regardless of the requested length.

use statuswatch_core::{AsyncConnection, AsyncTcpConnection, Connection, Error, TcpConnection, UdpConnection};
use std::io::ErrorKind;
use std::io::Write;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

#[test]
fn blocking_tcp_read_spans_partial_writes() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.write_all(&[1, 2]).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        stream.write_all(&[3, 4, 5]).unwrap();
    });

    let mut conn = TcpConnection::connect(addr, Duration::from_secs(2)).unwrap();
    assert_eq!(conn.read(5).unwrap(), vec![1, 2, 3, 4, 5]);
    server.join().unwrap();
    conn.close();
}

#[test]
fn blocking_tcp_peer_close_is_unexpected_eof() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.write_all(&[1, 2]).unwrap();
        // dropped here, two bytes short
    });

    let mut conn = TcpConnection::connect(addr, Duration::from_secs(2)).unwrap();
    match conn.read(4) {
        Err(Error::Io(err)) => assert_eq!(err.kind(), ErrorKind::UnexpectedEof),
        other => panic!("expected unexpected-eof, got {other:?}"),
    }
    server.join().unwrap();
}

#[tokio::test]
async fn async_tcp_read_spans_partial_writes() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(&[7, 8]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        stream.write_all(&[9]).await.unwrap();
    });

    let mut conn = AsyncTcpConnection::connect("127.0.0.1", port, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(conn.read(3).await.unwrap(), vec![7, 8, 9]);
    server.await.unwrap();
    conn.close().await;
}

#[tokio::test]
async fn async_tcp_read_is_time_bounded() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        // accept and then say nothing
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let mut conn = AsyncTcpConnection::connect("127.0.0.1", port, Duration::from_millis(200))
        .await
        .unwrap();
    assert!(matches!(conn.read(1).await, Err(Error::Timeout(_))));
    server.abort();
}

#[test]
fn blocking_udp_returns_one_whole_datagram() {
    let server = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr = server.local_addr().unwrap();
    let echo = std::thread::spawn(move || {
        let mut buf = [0u8; 64];
        let (count, peer) = server.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..count], b"probe");
        server.send_to(&[1, 2, 3, 4], peer).unwrap();
    });

    let mut conn = UdpConnection::connect(addr, Duration::from_secs(2)).unwrap();
    conn.write(b"probe").unwrap();
    // requested length is ignored for datagrams
    assert_eq!(conn.read(1).unwrap(), vec![1, 2, 3, 4]);
    echo.join().unwrap();
}
