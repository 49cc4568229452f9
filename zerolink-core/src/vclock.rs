//! Vector clocks over `{node_id → counter}`.
//!
//! Node ids are `pk_hex` strings; absent keys read as 0. Clocks are stored
//! and sent as JSON objects; the `BTreeMap` keeps the encoding canonical.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock(BTreeMap<String, u64>);

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter for a node; absent keys read as 0.
    pub fn get(&self, node_id: &str) -> u64 {
        self.0.get(node_id).copied().unwrap_or(0)
    }

    /// Bump the counter for `node_id` (inserting it at 1 if absent).
    pub fn increment(&mut self, node_id: &str) {
        *self.0.entry(node_id.to_string()).or_insert(0) += 1;
    }

    /// Pointwise max with `remote`. Commutative, associative, idempotent.
    pub fn merge(&mut self, remote: &VectorClock) {
        for (node_id, &counter) in &remote.0 {
            let entry = self.0.entry(node_id.clone()).or_insert(0);
            if counter > *entry {
                *entry = counter;
            }
        }
    }

    /// `self` dominates `other` iff `self[k] >= other[k]` for every key.
    pub fn dominates(&self, other: &VectorClock) -> bool {
        other.0.iter().all(|(k, &v)| self.get(k) >= v)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sender-axis check used by anti-entropy sync: a message with clock
    /// `self` and the given sender is missing at a remote holding `remote`
    /// iff the sender's own counter in the message exceeds the remote's.
    /// Weaker than full happens-before; over-sending is absorbed by the
    /// receiver's idempotent insert.
    pub fn missing_at(&self, sender_pk_hex: &str, remote: &VectorClock) -> bool {
        self.get(sender_pk_hex) > remote.get(sender_pk_hex)
    }

    /// Canonical JSON encoding, as persisted in the `vector_clocks` table
    /// and in each message row.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Parse the persisted encoding. Blank input reads as the empty clock;
    /// anything unparseable is a protocol violation.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::new());
        }
        serde_json::from_str(raw)
    }
}
