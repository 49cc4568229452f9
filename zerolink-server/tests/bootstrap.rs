//! Bootstrap server acceptance tests.
//!
//! Each test spawns a real server on an ephemeral port and drives it with
//! raw TCP clients speaking the line protocol.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;

use zerolink_server::Server;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Spawn a server on an ephemeral port; returns its address.
async fn spawn_server() -> std::net::SocketAddr {
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    addr
}

struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    /// Connect and register with the given pk byte and port.
    async fn register(addr: std::net::SocketAddr, pk_byte: u8, port: u16) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut writer) = stream.into_split();
        writer
            .write_all(format!("{} {port}\n", pk(pk_byte)).as_bytes())
            .await
            .unwrap();
        Self {
            reader: BufReader::new(read_half),
            writer,
        }
    }

    async fn read_line(&mut self) -> String {
        let mut line = String::new();
        let n = timeout(TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a server line")
            .unwrap();
        assert!(n > 0, "server closed the connection unexpectedly");
        line.trim_end().to_string()
    }

    /// Expect EOF (or reset): the server dropped us.
    async fn expect_closed(mut self) {
        let mut line = String::new();
        let res = timeout(TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for the server to close");
        assert!(matches!(res, Ok(0) | Err(_)), "expected close, got {line:?}");
    }

    async fn close(self) {
        drop(self.writer);
        drop(self.reader);
    }
}

fn pk(byte: u8) -> String {
    hex::encode([byte; 32])
}

#[tokio::test]
async fn join_sees_my_ip_then_existing_peers() {
    let addr = spawn_server().await;

    let mut a = TestClient::register(addr, 1, 40001).await;
    assert_eq!(a.read_line().await, "MY_IP 127.0.0.1");

    let mut b = TestClient::register(addr, 2, 40002).await;
    assert_eq!(b.read_line().await, "MY_IP 127.0.0.1");
    // Exactly one PEER line: the one previously-registered client.
    assert_eq!(
        b.read_line().await,
        format!("PEER {} 127.0.0.1 40001", pk(1))
    );

    // A hears about B joining, and B must NOT get a NEW_PEER for itself.
    assert_eq!(
        a.read_line().await,
        format!("NEW_PEER {} 127.0.0.1 40002", pk(2))
    );

    let mut c = TestClient::register(addr, 3, 40003).await;
    assert_eq!(c.read_line().await, "MY_IP 127.0.0.1");
    let mut peers = vec![c.read_line().await, c.read_line().await];
    peers.sort();
    assert_eq!(
        peers,
        vec![
            format!("PEER {} 127.0.0.1 40001", pk(1)),
            format!("PEER {} 127.0.0.1 40002", pk(2)),
        ]
    );
    // B's first broadcast after its PEER burst is C's join, not its own.
    assert_eq!(
        b.read_line().await,
        format!("NEW_PEER {} 127.0.0.1 40003", pk(3))
    );
}

#[tokio::test]
async fn leave_broadcasts_one_del_peer() {
    let addr = spawn_server().await;

    let mut a = TestClient::register(addr, 1, 40001).await;
    assert_eq!(a.read_line().await, "MY_IP 127.0.0.1");
    let b = TestClient::register(addr, 2, 40002).await;
    assert_eq!(
        a.read_line().await,
        format!("NEW_PEER {} 127.0.0.1 40002", pk(2))
    );

    b.close().await;
    assert_eq!(a.read_line().await, format!("DEL_PEER {}", pk(2)));

    // A third client joining afterwards sees only A in the peer list.
    let mut c = TestClient::register(addr, 3, 40003).await;
    assert_eq!(c.read_line().await, "MY_IP 127.0.0.1");
    assert_eq!(
        c.read_line().await,
        format!("PEER {} 127.0.0.1 40001", pk(1))
    );
}

#[tokio::test]
async fn malformed_registrations_are_dropped() {
    let addr = spawn_server().await;

    for bad in [
        "nothex 40001\n",
        "tooshort 1\n",
        &format!("{} 0\n", pk(9)),
        &format!("{} notaport\n", pk(9)),
        &format!("{} 40001 extra\n", pk(9)),
        "\n",
    ] {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut writer) = stream.into_split();
        writer.write_all(bad.as_bytes()).await.unwrap();
        let client = TestClient {
            reader: BufReader::new(read_half),
            writer,
        };
        client.expect_closed().await;
    }

    // The registry stayed empty: a real client gets no PEER lines, just
    // its join burst followed by nothing until someone else joins.
    let mut a = TestClient::register(addr, 1, 40001).await;
    assert_eq!(a.read_line().await, "MY_IP 127.0.0.1");
    let _b = TestClient::register(addr, 2, 40002).await;
    assert_eq!(
        a.read_line().await,
        format!("NEW_PEER {} 127.0.0.1 40002", pk(2))
    );
}

#[tokio::test]
async fn registry_capacity_rejects_the_31st() {
    let addr = spawn_server().await;

    let mut clients = Vec::new();
    for i in 0..zerolink_server::MAX_CLIENTS {
        let mut c = TestClient::register(addr, i as u8, 41000 + i as u16).await;
        assert_eq!(c.read_line().await, "MY_IP 127.0.0.1");
        clients.push(c);
    }

    let over = TestClient::register(addr, 200, 42000).await;
    over.expect_closed().await;
}
