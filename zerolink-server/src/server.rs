//! Registry state and TCP listener.
//!
//! Wire protocol (ASCII, `\n`-terminated):
//!
//! ```text
//! C→S   <pk_hex> <p2p_port>
//! S→C   MY_IP <ip>
//! S→C   PEER <pk_hex> <ip> <port>
//! S→C   NEW_PEER <pk_hex> <ip> <port>
//! S→C   DEL_PEER <pk_hex>
//! ```
//!
//! One task per client. Outbound lines go through a per-client mpsc
//! writer task, so a stalled client never blocks a broadcast; a client
//! whose queue overflows is disconnected.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Registry capacity; registrations beyond it are dropped.
pub const MAX_CLIENTS: usize = 30;

/// Length of a hex-encoded public key.
const PK_HEX_LEN: usize = 64;

/// Cap on the registration line; anything longer is garbage.
const MAX_LINE_LEN: usize = 256;

/// Per-client outbound queue depth.
const SEND_QUEUE: usize = 64;

struct ClientEntry {
    pk_hex: String,
    ip: String,
    p2p_port: u16,
    tx: mpsc::Sender<String>,
}

#[derive(Default)]
struct Registry {
    clients: Mutex<HashMap<u64, ClientEntry>>,
}

impl Registry {
    /// Send a line to every registered client except `exclude`.
    fn broadcast(&self, line: &str, exclude: Option<u64>) {
        let clients = self.clients.lock();
        for (&id, entry) in clients.iter() {
            if Some(id) == exclude {
                continue;
            }
            if entry.tx.try_send(line.to_string()).is_err() {
                tracing::warn!(pk = %short(&entry.pk_hex), "send queue full, line dropped");
            }
        }
    }

    /// Snapshot of everyone else currently registered, for the PEER burst.
    fn peer_lines_except(&self, id: u64) -> Vec<String> {
        self.clients
            .lock()
            .iter()
            .filter(|&(&other, _)| other != id)
            .map(|(_, e)| format!("PEER {} {} {}\n", e.pk_hex, e.ip, e.p2p_port))
            .collect()
    }
}

/// The bootstrap server. Volatile by design: restarting it empties the
/// registry and clients simply re-register.
pub struct Server {
    listener: TcpListener,
    registry: Arc<Registry>,
}

impl Server {
    /// Bind the listen socket. Fails fast so startup errors reach `main`.
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        Ok(Self {
            listener,
            registry: Arc::new(Registry::default()),
        })
    }

    /// The bound address (useful with port 0 in tests).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients forever.
    pub async fn run(self) -> Result<()> {
        tracing::info!(addr = %self.local_addr()?, "bootstrap server listening");
        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("accept failed: {e}");
                    continue;
                }
            };
            let registry = self.registry.clone();
            tokio::spawn(async move {
                handle_client(stream, peer_addr, registry).await;
            });
        }
    }
}

static CLIENT_COUNTER: AtomicU64 = AtomicU64::new(0);

async fn handle_client(stream: TcpStream, peer_addr: SocketAddr, registry: Arc<Registry>) {
    let client_id = CLIENT_COUNTER.fetch_add(1, Ordering::Relaxed);
    let ip = peer_addr.ip().to_string();

    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    // One registration line, then the connection just idles until EOF.
    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) | Err(_) => {
            tracing::debug!(%peer_addr, "closed before registering");
            return;
        }
        Ok(_) if line.len() > MAX_LINE_LEN => {
            tracing::debug!(%peer_addr, "oversized registration, dropping");
            return;
        }
        Ok(_) => {}
    }
    let Some((pk_hex, p2p_port)) = parse_registration(line.trim_end()) else {
        tracing::debug!(%peer_addr, "malformed registration, dropping");
        return;
    };

    // Reserve the registry slot atomically with the capacity check.
    let (tx, mut rx) = mpsc::channel::<String>(SEND_QUEUE);
    {
        let mut clients = registry.clients.lock();
        if clients.len() >= MAX_CLIENTS {
            tracing::warn!(%peer_addr, "registry full, rejecting client");
            return;
        }
        clients.insert(
            client_id,
            ClientEntry {
                pk_hex: pk_hex.clone(),
                ip: ip.clone(),
                p2p_port,
                tx: tx.clone(),
            },
        );
    }
    tracing::info!(pk = %short(&pk_hex), %ip, port = p2p_port, "client registered");

    // Writer task: all outbound lines for this client funnel through it.
    let writer = tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            if write_half.write_all(out.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    // Tell the client its externally-observed address, then everyone
    // already here, then announce it to the rest.
    let _ = tx.send(format!("MY_IP {ip}\n")).await;
    for peer_line in registry.peer_lines_except(client_id) {
        let _ = tx.send(peer_line).await;
    }
    registry.broadcast(
        &format!("NEW_PEER {pk_hex} {ip} {p2p_port}\n"),
        Some(client_id),
    );

    // Block until the client goes away; anything it sends is ignored.
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }

    registry.clients.lock().remove(&client_id);
    registry.broadcast(&format!("DEL_PEER {pk_hex}\n"), None);
    tracing::info!(pk = %short(&pk_hex), "client disconnected");
    writer.abort();
}

/// Parse `<pk_hex> <p2p_port>`: exactly two tokens, a well-formed
/// lowercase hex key and a non-zero port.
fn parse_registration(line: &str) -> Option<(String, u16)> {
    let mut parts = line.split_whitespace();
    let pk_hex = parts.next()?;
    let port: u16 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || port == 0 {
        return None;
    }
    let well_formed = pk_hex.len() == PK_HEX_LEN
        && pk_hex
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if !well_formed {
        return None;
    }
    Some((pk_hex.to_string(), port))
}

/// Abbreviate a pk for log lines.
fn short(pk_hex: &str) -> &str {
    &pk_hex[..pk_hex.len().min(8)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_parsing() {
        let pk = "ab".repeat(32);
        assert_eq!(
            parse_registration(&format!("{pk} 40001")),
            Some((pk.clone(), 40001))
        );
        assert_eq!(parse_registration(&format!("{pk} 0")), None);
        assert_eq!(parse_registration(&format!("{pk} 40001 junk")), None);
        assert_eq!(parse_registration(&format!("{pk} notaport")), None);
        assert_eq!(parse_registration("tooshort 40001"), None);
        assert_eq!(
            parse_registration(&format!("{} 40001", "AB".repeat(32))),
            None
        );
        assert_eq!(parse_registration(""), None);
    }
}
