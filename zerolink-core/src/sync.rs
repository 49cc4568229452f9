//! Anti-entropy history reconciliation.
//!
//! On every newly-Ready session (and whenever the UI opens a chat with an
//! online friend) the requester sends its per-chat vector clock; the
//! responder scans its side of that chat and replays every message whose
//! own sender-entry exceeds the requester's clock. The check is a
//! sender-axis comparison, not full happens-before: it may replay messages
//! the requester already holds, and the requester's idempotent uid insert
//! absorbs them.

use rusqlite::Result as SqlResult;

use crate::store::MessageStore;
use crate::vclock::VectorClock;
use crate::wire::SyncMessage;

/// Responder side: the messages of `chat_id` the remote is missing,
/// judged against the remote's clock.
pub(crate) fn missing_messages(
    store: &MessageStore,
    chat_id: &str,
    remote: &VectorClock,
) -> SqlResult<Vec<SyncMessage>> {
    let rows = store.messages_for_chat(chat_id)?;
    Ok(rows
        .into_iter()
        .filter(|m| m.vector_clock.missing_at(&m.sender_pk_hex, remote))
        .map(|m| SyncMessage {
            uid: m.uid,
            sender_pk: m.sender_pk_hex,
            content: m.content,
            timestamp: m.timestamp,
            vector_clock: m.vector_clock,
        })
        .collect())
}

/// Requester side: apply a sync response received from `peer_pk_hex`.
///
/// The chat a replayed message belongs to is derived from its sender
/// alone: our own messages file under the session peer's chat, anyone
/// else's under their sender pk. Each message's clock is folded into the
/// stored clock of its chat. Returns the number of messages applied.
pub(crate) fn apply_messages(
    store: &MessageStore,
    own_pk_hex: &str,
    peer_pk_hex: &str,
    messages: Vec<SyncMessage>,
) -> usize {
    let mut applied = 0;
    for msg in messages {
        let chat_id = if msg.sender_pk == own_pk_hex {
            peer_pk_hex
        } else {
            msg.sender_pk.as_str()
        };
        if let Err(e) =
            store.save_message(&msg.uid, chat_id, &msg.sender_pk, &msg.content, &msg.vector_clock)
        {
            tracing::error!("failed to apply synced message: {e}");
            continue;
        }
        if !msg.vector_clock.is_empty() {
            match store.vector_clock(chat_id) {
                Ok(mut local) => {
                    local.merge(&msg.vector_clock);
                    if let Err(e) = store.save_vector_clock(chat_id, &local) {
                        tracing::error!("failed to persist merged clock: {e}");
                    }
                }
                Err(e) => tracing::error!("failed to load chat clock: {e}"),
            }
        }
        applied += 1;
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "aa";
    const BOB: &str = "bb";

    /// Simulate Alice's producer path: bump her entry in the chat clock,
    /// store the message under Bob's chat with the snapshot.
    fn alice_sends(store: &MessageStore, uid: &str, content: &str) {
        let mut clock = store.vector_clock(BOB).unwrap();
        clock.increment(ALICE);
        store.save_vector_clock(BOB, &clock).unwrap();
        store.save_message(uid, BOB, ALICE, content, &clock).unwrap();
    }

    /// One sync round: `requester` asks `responder` for chat history.
    /// Returns how many messages moved.
    fn sync_once(
        responder: &MessageStore,
        responder_chat: &str,
        requester: &MessageStore,
        requester_own: &str,
        requester_peer: &str,
    ) -> usize {
        let remote = requester.vector_clock(requester_peer).unwrap();
        let missing = missing_messages(responder, responder_chat, &remote).unwrap();
        apply_messages(requester, requester_own, requester_peer, missing)
    }

    #[test]
    fn responder_selects_only_newer_messages() {
        let store = MessageStore::open_memory().unwrap();
        alice_sends(&store, "m1", "one");
        alice_sends(&store, "m2", "two");

        // Remote that has seen nothing: both messages missing.
        let all = missing_messages(&store, BOB, &VectorClock::new()).unwrap();
        assert_eq!(all.len(), 2);

        // Remote that has seen alice=1: only the second is missing.
        let mut seen_one = VectorClock::new();
        seen_one.increment(ALICE);
        let newer = missing_messages(&store, BOB, &seen_one).unwrap();
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].uid, "m2");
    }

    #[test]
    fn clockless_rows_never_replay() {
        let store = MessageStore::open_memory().unwrap();
        store
            .save_message("bare", BOB, ALICE, "no clock", &VectorClock::new())
            .unwrap();
        let missing = missing_messages(&store, BOB, &VectorClock::new()).unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn apply_keys_chats_by_sender() {
        let bob_store = MessageStore::open_memory().unwrap();
        let mut alices_clock = VectorClock::new();
        alices_clock.increment(ALICE);

        // Bob receives via sync: a message Alice sent him, and one of his
        // own that only Alice still had.
        let mut bobs_clock = VectorClock::new();
        bobs_clock.increment(BOB);
        let applied = apply_messages(
            &bob_store,
            BOB,
            ALICE,
            vec![
                SyncMessage {
                    uid: "from-alice".into(),
                    sender_pk: ALICE.into(),
                    content: "hers".into(),
                    timestamp: 1,
                    vector_clock: alices_clock.clone(),
                },
                SyncMessage {
                    uid: "from-bob".into(),
                    sender_pk: BOB.into(),
                    content: "his own, restored".into(),
                    timestamp: 2,
                    vector_clock: bobs_clock,
                },
            ],
        );
        assert_eq!(applied, 2);

        // Both land in the chat with Alice, regardless of sender.
        let rows = bob_store.messages_for_chat(ALICE).unwrap();
        let uids: Vec<_> = rows.iter().map(|m| m.uid.as_str()).collect();
        assert_eq!(uids, ["from-alice", "from-bob"]);
        assert!(rows.iter().all(|m| m.chat_id == ALICE));

        let clock = bob_store.vector_clock(ALICE).unwrap();
        assert_eq!(clock.get(ALICE), 1);
        assert_eq!(clock.get(BOB), 1);
    }

    #[test]
    fn offline_then_sync_converges() {
        // Alice wrote m1..m3 to Bob while he was offline.
        let alice = MessageStore::open_memory().unwrap();
        let bob = MessageStore::open_memory().unwrap();
        alice_sends(&alice, "m1", "one");
        alice_sends(&alice, "m2", "two");
        alice_sends(&alice, "m3", "three");

        let moved = sync_once(&alice, BOB, &bob, BOB, ALICE);
        assert_eq!(moved, 3);

        // Bob now holds the same uid set and the same clock for the chat.
        let bob_uids: Vec<_> = bob
            .messages_for_chat(ALICE)
            .unwrap()
            .into_iter()
            .map(|m| m.uid)
            .collect();
        assert_eq!(bob_uids, ["m1", "m2", "m3"]);
        assert_eq!(bob.vector_clock(ALICE).unwrap().get(ALICE), 3);

        // Further rounds are quiescent in both directions.
        assert_eq!(sync_once(&alice, BOB, &bob, BOB, ALICE), 0);
        assert_eq!(sync_once(&bob, ALICE, &alice, ALICE, BOB), 0);
    }

    #[test]
    fn replayed_duplicates_are_idempotent() {
        let alice = MessageStore::open_memory().unwrap();
        let bob = MessageStore::open_memory().unwrap();
        alice_sends(&alice, "m1", "one");

        // Replay the same response twice, as a lossy network might.
        let missing = missing_messages(&alice, BOB, &VectorClock::new()).unwrap();
        assert_eq!(apply_messages(&bob, BOB, ALICE, missing.clone()), 1);
        apply_messages(&bob, BOB, ALICE, missing);

        assert_eq!(bob.count_uid("m1").unwrap(), 1);
        assert_eq!(bob.vector_clock(ALICE).unwrap().get(ALICE), 1);
    }
}
