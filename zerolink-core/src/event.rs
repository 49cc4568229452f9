//! Events emitted by the client core for the UI layer to consume.
//!
//! The core pushes these into a bounded channel; on overflow the event is
//! silently dropped rather than blocking a network task.

use tokio::sync::mpsc;

/// Events the core emits to the consumer (CLI, GUI, tests).
#[derive(Debug, Clone)]
pub enum Event {
    /// Identity loaded (or generated on first run). `pk_hex` is our ID.
    IdentityReady { pk_hex: String, created: bool },

    /// Friend registry loaded from disk.
    FriendsLoaded { count: usize },

    /// The P2P listener is bound and accepting.
    ListenerReady { port: u16 },

    /// Connected to the bootstrap server and registered.
    BootstrapConnected,

    /// The bootstrap connection dropped. Live peer sessions are unaffected.
    BootstrapDisconnected,

    /// A friend was advertised by the bootstrap and we won the tie-break.
    DialingPeer { pk_hex: String, nickname: String },

    /// A peer session reached Ready (handshake complete, key derived).
    FriendConnected { pk_hex: String, nickname: String },

    /// A peer session closed (I/O error, hangup, or shutdown).
    FriendDisconnected { pk_hex: String, nickname: String },

    /// The bootstrap reported a peer leaving. Informational only; session
    /// teardown is driven by the P2P socket closing.
    PeerDeparted { pk_hex: String },

    /// An incoming chat message was decrypted and persisted.
    MessageReceived {
        chat_id: String,
        sender_pk_hex: String,
        nickname: String,
        content: String,
    },

    /// A locally-sent message had no live session; it is stored and will
    /// propagate on the next sync.
    MessageQueued { nickname: String },

    /// We asked a connected friend for missing history.
    SyncRequested { nickname: String },

    /// We answered a friend's sync request with `count` messages.
    SyncServed { nickname: String, count: usize },

    /// A sync response delivered `count` historical messages.
    SyncApplied { nickname: String, count: usize },

    /// An inbound session or advertisement was rejected.
    PeerRejected { pk_hex: String, reason: PeerRejection },
}

/// Why an inbound session or advertisement was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRejection {
    NotAFriend,
    TableFull,
    AlreadyConnected,
}

/// Bounded, lossy event sink shared by all core tasks.
#[derive(Clone)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<Event>,
}

impl EventSink {
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Emit an event. Never blocks; drops the event if the queue is full or
    /// the receiver is gone.
    pub(crate) fn emit(&self, event: Event) {
        if self.tx.try_send(event).is_err() {
            tracing::trace!("event queue full or closed, dropping event");
        }
    }
}
