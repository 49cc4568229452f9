//! Rendezvous (bootstrap) client.
//!
//! Keeps one persistent TCP connection to the bootstrap server. The
//! protocol is line-oriented ASCII: after our registration line the server
//! tells us our externally-observed IP (`MY_IP`), the peers already
//! present (`PEER`), later joiners (`NEW_PEER`) and leavers (`DEL_PEER`).
//!
//! Both sides of a friendship learn about each other and could dial
//! simultaneously; the deterministic tie-break compares the two
//! `pk_hex:ip:port` endpoint keys and only the smaller side dials. The
//! other side will receive the incoming connection.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::client::ClientState;
use crate::event::Event;
use crate::identity::is_valid_pk_hex;
use crate::session;

/// A peer advertisement from the bootstrap server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PeerAd {
    pub pk_hex: String,
    pub ip: String,
    pub port: u16,
}

/// One parsed server line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ServerLine {
    MyIp(String),
    Peer(PeerAd),
    NewPeer(PeerAd),
    DelPeer(String),
}

pub(crate) fn parse_line(line: &str) -> Option<ServerLine> {
    let mut parts = line.split_whitespace();
    let line = match parts.next()? {
        "MY_IP" => ServerLine::MyIp(parts.next()?.to_string()),
        "PEER" => ServerLine::Peer(parse_ad(&mut parts)?),
        "NEW_PEER" => ServerLine::NewPeer(parse_ad(&mut parts)?),
        "DEL_PEER" => {
            let pk_hex = parts.next()?.to_string();
            if !is_valid_pk_hex(&pk_hex) {
                return None;
            }
            ServerLine::DelPeer(pk_hex)
        }
        _ => return None,
    };
    match parts.next() {
        Some(_) => None, // trailing junk
        None => Some(line),
    }
}

fn parse_ad(parts: &mut std::str::SplitWhitespace<'_>) -> Option<PeerAd> {
    let pk_hex = parts.next()?.to_string();
    if !is_valid_pk_hex(&pk_hex) {
        return None;
    }
    let ip = parts.next()?.to_string();
    let port: u16 = parts.next()?.parse().ok()?;
    if port == 0 {
        return None;
    }
    Some(PeerAd { pk_hex, ip, port })
}

/// Tie-break for simultaneous connects: we dial iff our endpoint key sorts
/// strictly before the peer's. For distinct peers exactly one side wins.
pub(crate) fn should_dial(own_pk_hex: &str, own_ip: &str, own_port: u16, ad: &PeerAd) -> bool {
    let ours = format!("{own_pk_hex}:{own_ip}:{own_port}");
    let theirs = format!("{}:{}:{}", ad.pk_hex, ad.ip, ad.port);
    ours < theirs
}

/// Register with the bootstrap server and consume its feed until EOF.
/// Losing this connection does not touch live peer sessions.
pub(crate) async fn run(state: Arc<ClientState>, stream: TcpStream) {
    let (read_half, mut write_half) = stream.into_split();

    let port = state.p2p_port();
    let registration = format!("{} {}\n", state.identity.pk_hex(), port);
    if write_half.write_all(registration.as_bytes()).await.is_err() {
        state.events.emit(Event::BootstrapDisconnected);
        return;
    }
    tracing::info!(port, "registered with bootstrap server");
    state.events.emit(Event::BootstrapConnected);

    let mut reader = BufReader::new(read_half);
    let mut line_buf = String::new();
    loop {
        line_buf.clear();
        match reader.read_line(&mut line_buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let Some(line) = parse_line(line_buf.trim_end()) else {
            continue;
        };
        match line {
            ServerLine::MyIp(ip) => {
                tracing::debug!(%ip, "bootstrap reported our external address");
                *state.my_ip.lock() = Some(ip);
            }
            ServerLine::Peer(ad) | ServerLine::NewPeer(ad) => handle_advert(&state, ad),
            ServerLine::DelPeer(pk_hex) => {
                // Informational; teardown is driven by the P2P socket.
                state.events.emit(Event::PeerDeparted { pk_hex });
            }
        }
    }

    tracing::info!("bootstrap connection closed");
    state.events.emit(Event::BootstrapDisconnected);
    // write_half lives until here: dropping it earlier would half-close
    // the socket and the server would take us for gone.
    drop(write_half);
}

fn handle_advert(state: &Arc<ClientState>, ad: PeerAd) {
    if !state.friends.lock().is_friend(&ad.pk_hex) {
        return;
    }
    if state.peers.is_connected(&ad.pk_hex) {
        return;
    }
    let Some(own_ip) = state.my_ip.lock().clone() else {
        return;
    };
    if !should_dial(state.identity.pk_hex(), &own_ip, state.p2p_port(), &ad) {
        return;
    }
    let nickname = state.friend_name(&ad.pk_hex);
    tracing::info!(peer = %nickname, "discovered friend, dialing");
    state.events.emit(Event::DialingPeer {
        pk_hex: ad.pk_hex.clone(),
        nickname,
    });
    tokio::spawn(session::dial(state.clone(), ad.pk_hex, ad.ip, ad.port));
}
