//! Error type for the client core.
//!
//! Fatal initialisation failures (identity, database, listener bind,
//! bootstrap connect) propagate out of [`crate::Client::start`]; the binary
//! is the only place that turns them into a process exit. Everything later
//! is localised: transient network failures close the affected session,
//! protocol violations drop the offending frame or connection, and user or
//! capacity errors surface to the caller without touching any other state.

use std::path::PathBuf;

use crate::friends::{MAX_FRIENDS, MAX_NICKNAME_LEN};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("identity file {path} is corrupt (expected 96 bytes of pk || sk)")]
    CorruptIdentity { path: PathBuf },

    #[error("invalid public key (expected 64 lowercase hex characters)")]
    InvalidPublicKey,

    #[error("nickname too long (max {MAX_NICKNAME_LEN} characters)")]
    NicknameTooLong,

    #[error("nickname is empty or contains ',' or a newline")]
    InvalidNickname,

    #[error("friend table full (max {MAX_FRIENDS})")]
    FriendTableFull,

    #[error("no friend named '{0}'")]
    UnknownFriend(String),

    #[error("'{0}' is already a friend")]
    DuplicateFriend(String),

    #[error("bootstrap server {addr} unreachable: {source}")]
    BootstrapUnreachable {
        addr: String,
        source: std::io::Error,
    },
}
