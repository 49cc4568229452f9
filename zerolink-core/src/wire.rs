//! P2P application payloads.
//!
//! Each encrypted frame carries one UTF-8 JSON payload with a `"type"`
//! discriminator. Decoding is schema-validated: an unknown type or a
//! wrong field type fails the decode and the frame is dropped by the
//! session, with no effect on the connection.

use serde::{Deserialize, Serialize};

use crate::vclock::VectorClock;

/// Frames above this size are a protocol violation and close the session.
pub(crate) const MAX_FRAME_BYTES: usize = 64 * 1024;

/// One application message on the P2P wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum Frame {
    /// A live chat message.
    Chat {
        uid: String,
        content: String,
        #[serde(default)]
        vector_clock: VectorClock,
    },
    /// Anti-entropy: "here is my clock for our chat, send what I lack".
    SyncRequest {
        #[serde(default)]
        vector_clock: VectorClock,
    },
    /// Anti-entropy: the messages the requester was missing.
    SyncResponse { messages: Vec<SyncMessage> },
}

/// A replayed message inside a [`Frame::SyncResponse`].
///
/// `timestamp` is the sender's original insertion time; the receiver stores
/// its own insertion time and carries this value for diagnostics only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SyncMessage {
    pub uid: String,
    pub sender_pk: String,
    pub content: String,
    pub timestamp: u64,
    #[serde(default)]
    pub vector_clock: VectorClock,
}

impl Frame {
    pub(crate) fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vc(node: &str, n: u64) -> VectorClock {
        let mut c = VectorClock::new();
        for _ in 0..n {
            c.increment(node);
        }
        c
    }

    #[test]
    fn chat_round_trip() {
        let frame = Frame::Chat {
            uid: "uid-1".into(),
            content: "hello".into(),
            vector_clock: vc("alice", 2),
        };
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn type_tag_on_the_wire() {
        let frame = Frame::SyncRequest {
            vector_clock: vc("alice", 1),
        };
        let json: serde_json::Value = serde_json::from_slice(&frame.encode()).unwrap();
        assert_eq!(json["type"], "sync_request");
        assert_eq!(json["vector_clock"]["alice"], 1);
    }

    #[test]
    fn missing_clock_decodes_as_empty() {
        let frame =
            Frame::decode(br#"{"type":"chat","uid":"u","content":"hi"}"#).unwrap();
        match frame {
            Frame::Chat { vector_clock, .. } => assert!(vector_clock.is_empty()),
            other => panic!("expected chat, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_rejected() {
        assert!(Frame::decode(br#"{"type":"evil","uid":"u"}"#).is_err());
        assert!(Frame::decode(br#"{"uid":"no type at all"}"#).is_err());
        assert!(Frame::decode(b"not json").is_err());
    }

    #[test]
    fn wrong_field_types_rejected() {
        assert!(Frame::decode(br#"{"type":"chat","uid":7,"content":"hi"}"#).is_err());
        assert!(
            Frame::decode(br#"{"type":"chat","uid":"u","content":"hi","vector_clock":{"a":-1}}"#)
                .is_err()
        );
    }

    #[test]
    fn sync_response_round_trip() {
        let frame = Frame::SyncResponse {
            messages: vec![SyncMessage {
                uid: "u".into(),
                sender_pk: "alice".into(),
                content: "old news".into(),
                timestamp: 1_700_000_000,
                vector_clock: vc("alice", 4),
            }],
        };
        assert_eq!(Frame::decode(&frame.encode()).unwrap(), frame);
    }
}
