//! Client core for ZeroLink, a peer-to-peer end-to-end encrypted chat.
//!
//! A small rendezvous ("bootstrap") service introduces peers to one another;
//! messaging, persistence, and history reconciliation happen directly
//! between pairs of clients over encrypted TCP sessions. This crate is the
//! whole client except for the UI: identity and friend registry, the
//! SQLite-backed message store with per-chat vector clocks, peer sessions
//! (handshake, key derivation, framed encrypted transport), the rendezvous
//! client, and anti-entropy history sync.
//!
//! The entry point is [`Client::start`], which returns a handle exposing the
//! named operations (send, add/delete friend, open chat, sync, status) and a
//! receiver of typed [`Event`]s for the UI layer to render. The core never
//! formats text for display.

mod client;
mod crypto;
mod error;
mod event;
mod friends;
mod identity;
mod msgid;
mod peers;
mod rendezvous;
mod session;
mod store;
mod sync;
mod vclock;
mod wire;

pub use client::{Client, ClientConfig};
pub use error::Error;
pub use event::{Event, PeerRejection};
pub use friends::{Friend, FriendRegistry, MAX_FRIENDS, MAX_NICKNAME_LEN, UNKNOWN_USER};
pub use identity::{Identity, PK_HEX_LEN, PK_LEN, SK_LEN};
pub use peers::MAX_PEERS;
pub use store::{HistoryEntry, MessageStore, StoredMessage};
pub use vclock::VectorClock;
