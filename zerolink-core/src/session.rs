//! Peer sessions.
//!
//! One session is one authenticated, encrypted tunnel to one friend:
//! Connecting → Handshaking → Ready → Closed. The dialer opens TCP and
//! sends its raw 32-byte public key; the listener reads exactly those
//! bytes and drops non-friends. Both sides then derive the shared key
//! locally and the session is Ready. There is no reply frame.
//!
//! Each frame on the wire is `len(4, big-endian) || nonce || mac ||
//! ciphertext`; reads are exact, so TCP fragmentation can never split or
//! merge frames. A frame that fails to decrypt is dropped and the session
//! continues; an I/O error, EOF, or oversized frame closes the session,
//! which removes it from the registry and announces the disconnect.
//!
//! Sends go through a per-session writer task fed by an mpsc channel, so
//! no lock is ever held across a socket write.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ed25519_dalek::VerifyingKey;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

use crate::client::ClientState;
use crate::crypto::{self, NONCE_LEN, SharedKey, TAG_LEN};
use crate::event::{Event, PeerRejection};
use crate::identity::{self, PK_LEN};
use crate::peers::PeerHandle;
use crate::sync;
use crate::wire::{Frame, MAX_FRAME_BYTES};

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Writer-task queue depth per session.
const SEND_QUEUE: usize = 64;

/// Dial a friend advertised by the rendezvous and run the session.
pub(crate) async fn dial(state: Arc<ClientState>, pk_hex: String, ip: String, port: u16) {
    let addr = format!("{ip}:{port}");
    let mut stream = match TcpStream::connect(&addr).await {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!(%addr, "dial failed: {e}");
            return;
        }
    };
    let Some(remote_vk) = identity::verifying_key_from_hex(&pk_hex) else {
        return;
    };
    if stream
        .write_all(&state.identity.public_key_bytes())
        .await
        .is_err()
    {
        return;
    }
    let peer_addr = match stream.peer_addr() {
        Ok(a) => a,
        Err(_) => return,
    };
    establish(state, stream, peer_addr, pk_hex, remote_vk).await;
}

/// Handle one inbound P2P connection.
pub(crate) async fn accept(state: Arc<ClientState>, mut stream: TcpStream, peer_addr: SocketAddr) {
    let mut pk_bytes = [0u8; PK_LEN];
    if stream.read_exact(&mut pk_bytes).await.is_err() {
        return;
    }
    let Some(remote_vk) = identity::verifying_key_from_bytes(&pk_bytes) else {
        return;
    };
    let pk_hex = hex::encode(pk_bytes);
    if !state.friends.lock().is_friend(&pk_hex) {
        tracing::debug!(%peer_addr, "dropping connection from non-friend {pk_hex}");
        state.events.emit(Event::PeerRejected {
            pk_hex,
            reason: PeerRejection::NotAFriend,
        });
        return;
    }
    establish(state, stream, peer_addr, pk_hex, remote_vk).await;
}

/// Shared tail of both handshake roles: derive the key, spawn the I/O
/// tasks, register the session and kick off anti-entropy sync.
async fn establish(
    state: Arc<ClientState>,
    stream: TcpStream,
    peer_addr: SocketAddr,
    pk_hex: String,
    remote_vk: VerifyingKey,
) {
    let key = crypto::derive_shared_key(state.identity.signing_key(), &remote_vk);
    let session_id = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
    let (read_half, write_half) = stream.into_split();

    let (tx, rx) = mpsc::channel::<Frame>(SEND_QUEUE);
    tokio::spawn(write_loop(write_half, key.clone(), rx));
    let reader = tokio::spawn(read_loop(
        state.clone(),
        read_half,
        key,
        tx.clone(),
        session_id,
        pk_hex.clone(),
    ));

    let inserted = state.peers.insert(PeerHandle {
        session_id,
        pk_hex: pk_hex.clone(),
        addr: peer_addr,
        tx: tx.clone(),
        abort: reader.abort_handle(),
    });
    if let Err(reason) = inserted {
        tracing::debug!(%peer_addr, ?reason, "refusing session for {pk_hex}");
        state.events.emit(Event::PeerRejected { pk_hex, reason });
        reader.abort();
        return;
    }

    let nickname = state.friend_name(&pk_hex);
    tracing::info!(peer = %nickname, %peer_addr, "peer session ready");
    state.events.emit(Event::FriendConnected {
        pk_hex: pk_hex.clone(),
        nickname: nickname.clone(),
    });

    // Anti-entropy runs against every newly-Ready peer.
    let clock = state.chat_clock(&pk_hex);
    if tx
        .send(Frame::SyncRequest {
            vector_clock: clock,
        })
        .await
        .is_ok()
    {
        state.events.emit(Event::SyncRequested { nickname });
    }
}

async fn write_loop(mut write_half: OwnedWriteHalf, key: SharedKey, mut rx: mpsc::Receiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        let body = crypto::seal(&key, &frame.encode());
        let mut buf = Vec::with_capacity(4 + body.len());
        buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
        buf.extend_from_slice(&body);
        if write_half.write_all(&buf).await.is_err() {
            break;
        }
    }
}

async fn read_loop(
    state: Arc<ClientState>,
    mut read_half: OwnedReadHalf,
    key: SharedKey,
    tx: mpsc::Sender<Frame>,
    session_id: u64,
    pk_hex: String,
) {
    loop {
        let body = match read_frame(&mut read_half).await {
            Ok(Some(body)) => body,
            Ok(None) => continue, // undersized frame, skipped
            Err(_) => break,
        };
        let Some(plaintext) = crypto::open(&key, &body) else {
            tracing::debug!("undecryptable frame from {pk_hex}, dropping");
            continue;
        };
        let Ok(frame) = Frame::decode(&plaintext) else {
            tracing::debug!("malformed payload from {pk_hex}, dropping");
            continue;
        };
        dispatch(&state, &pk_hex, &tx, frame).await;
    }

    if state.peers.remove(session_id).is_some() {
        let nickname = state.friend_name(&pk_hex);
        tracing::info!(peer = %nickname, "peer session closed");
        state.events.emit(Event::FriendDisconnected { pk_hex, nickname });
    }
}

/// Read one length-prefixed frame body. `Ok(None)` is an undersized frame
/// that was skipped; an oversized length is unrecoverable and errors.
async fn read_frame(read_half: &mut OwnedReadHalf) -> std::io::Result<Option<Vec<u8>>> {
    let len = read_half.read_u32().await? as usize;
    if len > MAX_FRAME_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "frame exceeds size cap",
        ));
    }
    let mut buf = vec![0u8; len];
    read_half.read_exact(&mut buf).await?;
    if len < NONCE_LEN + TAG_LEN {
        return Ok(None);
    }
    Ok(Some(buf))
}

async fn dispatch(
    state: &Arc<ClientState>,
    peer_pk_hex: &str,
    tx: &mpsc::Sender<Frame>,
    frame: Frame,
) {
    match frame {
        Frame::Chat {
            uid,
            content,
            vector_clock,
        } => handle_chat(state, peer_pk_hex, &uid, &content, &vector_clock),
        Frame::SyncRequest { vector_clock } => {
            let response = {
                let db = state.db.lock();
                sync::missing_messages(&db, peer_pk_hex, &vector_clock)
            };
            let messages = match response {
                Ok(m) => m,
                Err(e) => {
                    tracing::error!("sync scan failed: {e}");
                    return;
                }
            };
            // An empty response is suppressed.
            if messages.is_empty() {
                return;
            }
            let count = messages.len();
            if tx.send(Frame::SyncResponse { messages }).await.is_ok() {
                state.events.emit(Event::SyncServed {
                    nickname: state.friend_name(peer_pk_hex),
                    count,
                });
            }
        }
        Frame::SyncResponse { messages } => {
            let applied = {
                let db = state.db.lock();
                sync::apply_messages(&db, state.identity.pk_hex(), peer_pk_hex, messages)
            };
            if applied > 0 {
                state.events.emit(Event::SyncApplied {
                    nickname: state.friend_name(peer_pk_hex),
                    count: applied,
                });
            }
        }
    }
}

/// Persist an incoming live chat message and fold its clock into ours.
/// The conversation is keyed by the peer's pk, the sender from the
/// receiver's perspective.
fn handle_chat(
    state: &Arc<ClientState>,
    peer_pk_hex: &str,
    uid: &str,
    content: &str,
    remote_clock: &crate::vclock::VectorClock,
) {
    {
        let db = state.db.lock();
        if let Err(e) = db.save_message(uid, peer_pk_hex, peer_pk_hex, content, remote_clock) {
            tracing::error!("failed to persist incoming message: {e}");
            return;
        }
        match db.vector_clock(peer_pk_hex) {
            Ok(mut local) => {
                local.merge(remote_clock);
                if let Err(e) = db.save_vector_clock(peer_pk_hex, &local) {
                    tracing::error!("failed to persist chat clock: {e}");
                }
            }
            Err(e) => tracing::error!("failed to load chat clock: {e}"),
        }
    }
    state.events.emit(Event::MessageReceived {
        chat_id: peer_pk_hex.to_string(),
        sender_pk_hex: peer_pk_hex.to_string(),
        nickname: state.friend_name(peer_pk_hex),
        content: content.to_string(),
    });
}
