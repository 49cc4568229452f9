//! SQLite persistence layer.
//!
//! Stores the durable chat log keyed by `message_uid` and one vector clock
//! per chat. Uses WAL mode for concurrent reads during writes. The struct
//! itself is not synchronised; the client wraps it in a single mutex and
//! holds it for each whole logical operation.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};

use crate::vclock::VectorClock;

/// Rows returned to the UI when opening a chat.
pub const HISTORY_LIMIT: usize = 50;

/// A persisted message row, as exchanged during sync.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub uid: String,
    pub chat_id: String,
    pub sender_pk_hex: String,
    pub content: String,
    pub timestamp: u64,
    pub vector_clock: VectorClock,
}

/// One line of chat history for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub sender_pk_hex: String,
    pub content: String,
}

/// Database handle wrapping a SQLite connection.
pub struct MessageStore {
    conn: Connection,
}

impl MessageStore {
    /// Open (or create) the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> SqlResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> SqlResult<()> {
        self.conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS messages (
                id           INTEGER PRIMARY KEY,
                message_uid  TEXT UNIQUE,
                chat_id      TEXT,
                sender_pk    TEXT,
                content      TEXT,
                timestamp    INTEGER,
                vector_clock TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_messages_chat_ts
                ON messages(chat_id, timestamp);

            CREATE TABLE IF NOT EXISTS vector_clocks (
                chat_id TEXT PRIMARY KEY,
                clock   TEXT
            );
            ",
        )
    }

    /// Insert a message. Idempotent on `uid`: a duplicate insert is
    /// silently accepted and leaves the existing row untouched. The
    /// timestamp is the local clock at insertion.
    pub fn save_message(
        &self,
        uid: &str,
        chat_id: &str,
        sender_pk_hex: &str,
        content: &str,
        clock: &VectorClock,
    ) -> SqlResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO messages
                 (message_uid, chat_id, sender_pk, content, timestamp, vector_clock)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                uid,
                chat_id,
                sender_pk_hex,
                content,
                unix_now() as i64,
                clock.to_json()
            ],
        )?;
        Ok(())
    }

    /// The most recent [`HISTORY_LIMIT`] messages of a chat, oldest-first.
    pub fn load_history(&self, chat_id: &str) -> SqlResult<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT sender_pk, content FROM messages
             WHERE chat_id = ?1
             ORDER BY timestamp DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![chat_id, HISTORY_LIMIT as i64], |row| {
            Ok(HistoryEntry {
                sender_pk_hex: row.get(0)?,
                content: row.get(1)?,
            })
        })?;
        let mut entries = rows.collect::<SqlResult<Vec<_>>>()?;
        entries.reverse();
        Ok(entries)
    }

    /// The stored vector clock for a chat, or the empty clock.
    pub fn vector_clock(&self, chat_id: &str) -> SqlResult<VectorClock> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT clock FROM vector_clocks WHERE chat_id = ?1",
                params![chat_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw
            .and_then(|s| VectorClock::from_json(&s).ok())
            .unwrap_or_default())
    }

    /// Upsert the vector clock for a chat.
    pub fn save_vector_clock(&self, chat_id: &str, clock: &VectorClock) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO vector_clocks (chat_id, clock) VALUES (?1, ?2)
             ON CONFLICT(chat_id) DO UPDATE SET clock=excluded.clock",
            params![chat_id, clock.to_json()],
        )?;
        Ok(())
    }

    /// All messages of a chat, for the sync responder's scan. Rows whose
    /// stored clock is blank or unparseable carry the empty clock (the
    /// sender-axis check then never selects them).
    pub fn messages_for_chat(&self, chat_id: &str) -> SqlResult<Vec<StoredMessage>> {
        let mut stmt = self.conn.prepare(
            "SELECT message_uid, chat_id, sender_pk, content, timestamp, vector_clock
             FROM messages WHERE chat_id = ?1
             ORDER BY timestamp ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![chat_id], |row| {
            let raw_clock: String = row.get(5)?;
            Ok(StoredMessage {
                uid: row.get(0)?,
                chat_id: row.get(1)?,
                sender_pk_hex: row.get(2)?,
                content: row.get(3)?,
                timestamp: row.get::<_, i64>(4)? as u64,
                vector_clock: VectorClock::from_json(&raw_clock).unwrap_or_default(),
            })
        })?;
        rows.collect()
    }

    /// Number of rows stored for a uid (0 or 1); used by tests and
    /// diagnostics.
    pub fn count_uid(&self, uid: &str) -> SqlResult<u64> {
        self.conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE message_uid = ?1",
            params![uid],
            |row| row.get::<_, i64>(0).map(|n| n as u64),
        )
    }
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
