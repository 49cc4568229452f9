//! Bootstrap rendezvous server.
//!
//! Introduces ZeroLink peers to one another and nothing more: it never
//! sees chat content, stores nothing, and relays no messages. Clients
//! register with one line, receive the current peer list, and are
//! broadcast to everyone else on join and leave.

pub mod server;

pub use server::{Server, MAX_CLIENTS};
