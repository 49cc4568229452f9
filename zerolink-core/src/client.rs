//! Client lifecycle and the operations exposed to the UI layer.
//!
//! [`Client::start`] loads (or creates) the identity, friend registry and
//! message store, binds the P2P listener, registers with the bootstrap
//! server and returns a handle plus the event receiver. All shared state
//! lives in one [`ClientState`] threaded by `Arc` into the tasks; each
//! field carries its own synchronisation. Only initialisation errors
//! escape to the caller; everything after `start` is localised to the
//! session or frame that hit it.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::OnceLock;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::event::{Event, EventSink};
use crate::friends::{Friend, FriendRegistry};
use crate::identity::Identity;
use crate::msgid;
use crate::peers::PeerRegistry;
use crate::rendezvous;
use crate::session;
use crate::store::{HistoryEntry, MessageStore};
use crate::vclock::VectorClock;
use crate::wire::Frame;

/// Capacity of the event queue; overflow drops events.
const EVENT_QUEUE: usize = 1024;

/// Startup parameters. Path resolution is the caller's concern; all data
/// files (`identity.dat`, `friends.dat`, `chat.db`) live in `data_dir`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub data_dir: PathBuf,
    pub bootstrap_ip: String,
    pub bootstrap_port: u16,
    /// Requested P2P listen port; 0 lets the OS assign one.
    pub p2p_port: u16,
}

/// Shared state threaded into every core task.
pub(crate) struct ClientState {
    pub(crate) identity: Identity,
    pub(crate) friends: Mutex<FriendRegistry>,
    pub(crate) db: Mutex<MessageStore>,
    pub(crate) peers: PeerRegistry,
    /// Externally-observed IP, learned from the bootstrap's `MY_IP` line.
    pub(crate) my_ip: Mutex<Option<String>>,
    /// Bound P2P port, published once by the listener task.
    pub(crate) my_p2p_port: OnceLock<u16>,
    pub(crate) events: EventSink,
}

impl ClientState {
    pub(crate) fn friend_name(&self, pk_hex: &str) -> String {
        self.friends.lock().name_by_pk(pk_hex).to_string()
    }

    pub(crate) fn p2p_port(&self) -> u16 {
        self.my_p2p_port.get().copied().unwrap_or(0)
    }

    /// Stored clock for a chat; a read failure degrades to the empty clock.
    pub(crate) fn chat_clock(&self, chat_id: &str) -> VectorClock {
        match self.db.lock().vector_clock(chat_id) {
            Ok(clock) => clock,
            Err(e) => {
                tracing::error!("failed to load chat clock: {e}");
                VectorClock::new()
            }
        }
    }
}

/// A running ZeroLink client.
pub struct Client {
    state: Arc<ClientState>,
    listener: JoinHandle<()>,
    rendezvous: JoinHandle<()>,
}

impl Client {
    /// Initialise all services and connect. Returns the client handle and
    /// the receiver of UI events.
    pub async fn start(config: ClientConfig) -> Result<(Self, mpsc::Receiver<Event>), Error> {
        let (events, event_rx) = EventSink::channel(EVENT_QUEUE);

        let (identity, created) =
            Identity::load_or_generate(&config.data_dir.join("identity.dat"))?;
        if created {
            tracing::info!("generated new identity {}", identity.pk_hex());
        }
        events.emit(Event::IdentityReady {
            pk_hex: identity.pk_hex().to_string(),
            created,
        });

        let friends = FriendRegistry::load(&config.data_dir.join("friends.dat"))?;
        tracing::info!("loaded {} friends", friends.len());
        events.emit(Event::FriendsLoaded {
            count: friends.len(),
        });

        let db = MessageStore::open(config.data_dir.join("chat.db"))?;

        let state = Arc::new(ClientState {
            identity,
            friends: Mutex::new(friends),
            db: Mutex::new(db),
            peers: PeerRegistry::new(),
            my_ip: Mutex::new(None),
            my_p2p_port: OnceLock::new(),
            events,
        });

        // The listener task binds and hands the port back through a
        // oneshot; registration must not run before the port is known.
        let (port_tx, port_rx) = oneshot::channel();
        let listener = tokio::spawn(listener_task(state.clone(), config.p2p_port, port_tx));
        let port = port_rx
            .await
            .map_err(|_| Error::Io(std::io::Error::other("p2p listener task died")))??;
        let _ = state.my_p2p_port.set(port);
        tracing::info!(port, "p2p listener ready");
        state.events.emit(Event::ListenerReady { port });

        let addr = format!("{}:{}", config.bootstrap_ip, config.bootstrap_port);
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| Error::BootstrapUnreachable { addr, source })?;
        let rendezvous = tokio::spawn(rendezvous::run(state.clone(), stream));

        Ok((
            Self {
                state,
                listener,
                rendezvous,
            },
            event_rx,
        ))
    }

    /// Our canonical identity string.
    pub fn my_pk_hex(&self) -> &str {
        self.state.identity.pk_hex()
    }

    /// The bound P2P listen port.
    pub fn my_p2p_port(&self) -> u16 {
        self.state.p2p_port()
    }

    /// Number of live peer sessions.
    pub fn online_peer_count(&self) -> usize {
        self.state.peers.count()
    }

    /// Friends in insertion order.
    pub fn friends(&self) -> Vec<Friend> {
        self.state.friends.lock().friends().to_vec()
    }

    /// Nickname for a pk_hex, or the "unknown user" sentinel.
    pub fn friend_name(&self, pk_hex: &str) -> String {
        self.state.friend_name(pk_hex)
    }

    pub fn add_friend(&self, pk_hex: &str, nickname: &str) -> Result<(), Error> {
        self.state.friends.lock().add(pk_hex, nickname)
    }

    pub fn delete_friend_by_name(&self, nickname: &str) -> Result<Friend, Error> {
        self.state.friends.lock().delete_by_name(nickname)
    }

    /// Send a chat message to a friend. The message is always persisted
    /// with an incremented clock first; returns `true` when it also went
    /// out on a live session, `false` when it waits for the next sync.
    pub async fn send_chat_message(&self, nickname: &str, content: &str) -> Result<bool, Error> {
        let chat_id = self
            .state
            .friends
            .lock()
            .pk_by_name(nickname)
            .ok_or_else(|| Error::UnknownFriend(nickname.to_string()))?
            .to_string();
        let own_pk = self.state.identity.pk_hex();

        let uid = msgid::generate(own_pk);
        let clock = {
            let db = self.state.db.lock();
            let mut clock = db.vector_clock(&chat_id)?;
            clock.increment(own_pk);
            db.save_vector_clock(&chat_id, &clock)?;
            db.save_message(&uid, &chat_id, own_pk, content, &clock)?;
            clock
        };

        let Some(tx) = self.state.peers.sender_for(&chat_id) else {
            tracing::debug!(peer = %nickname, "friend offline, message queued");
            self.state.events.emit(Event::MessageQueued {
                nickname: nickname.to_string(),
            });
            return Ok(false);
        };
        let delivered = tx
            .send(Frame::Chat {
                uid,
                content: content.to_string(),
                vector_clock: clock,
            })
            .await
            .is_ok();
        if !delivered {
            self.state.events.emit(Event::MessageQueued {
                nickname: nickname.to_string(),
            });
        }
        Ok(delivered)
    }

    /// Recent history of the chat with a friend, oldest-first.
    pub fn history_with(&self, nickname: &str) -> Result<Vec<HistoryEntry>, Error> {
        let chat_id = self
            .state
            .friends
            .lock()
            .pk_by_name(nickname)
            .ok_or_else(|| Error::UnknownFriend(nickname.to_string()))?
            .to_string();
        Ok(self.state.db.lock().load_history(&chat_id)?)
    }

    /// Open a chat: return its history and, if the friend is online, ask
    /// them for anything we are missing.
    pub async fn open_chat(&self, nickname: &str) -> Result<Vec<HistoryEntry>, Error> {
        let history = self.history_with(nickname)?;
        let _ = self.request_sync(nickname).await?;
        Ok(history)
    }

    /// Ask an online friend for missing history. Returns `false` when the
    /// friend has no live session.
    pub async fn request_sync(&self, nickname: &str) -> Result<bool, Error> {
        let chat_id = self
            .state
            .friends
            .lock()
            .pk_by_name(nickname)
            .ok_or_else(|| Error::UnknownFriend(nickname.to_string()))?
            .to_string();
        let Some(tx) = self.state.peers.sender_for(&chat_id) else {
            return Ok(false);
        };
        let clock = self.state.chat_clock(&chat_id);
        let sent = tx
            .send(Frame::SyncRequest {
                vector_clock: clock,
            })
            .await
            .is_ok();
        if sent {
            self.state.events.emit(Event::SyncRequested {
                nickname: nickname.to_string(),
            });
        }
        Ok(sent)
    }

    /// Stored vector clock for a chat (diagnostics and tests).
    pub fn chat_clock(&self, chat_id: &str) -> VectorClock {
        self.state.chat_clock(chat_id)
    }

    /// Stop all tasks and close every session. The data files are left
    /// consistent; a later `start` resumes from them.
    pub async fn shutdown(self) {
        self.rendezvous.abort();
        self.listener.abort();
        for peer in self.state.peers.drain() {
            tracing::debug!(peer = %peer.addr, "closing session");
            peer.abort.abort();
        }
        tracing::info!("client shut down");
    }
}

/// Bind the P2P listener, publish the bound port, then accept forever.
/// Each accepted connection runs the listener side of the handshake in its
/// own task.
async fn listener_task(
    state: Arc<ClientState>,
    requested_port: u16,
    port_tx: oneshot::Sender<Result<u16, Error>>,
) {
    let listener = match TcpListener::bind(("0.0.0.0", requested_port)).await {
        Ok(l) => l,
        Err(e) => {
            let _ = port_tx.send(Err(e.into()));
            return;
        }
    };
    let port = match listener.local_addr() {
        Ok(addr) => addr.port(),
        Err(e) => {
            let _ = port_tx.send(Err(e.into()));
            return;
        }
    };
    let _ = port_tx.send(Ok(port));

    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                tokio::spawn(session::accept(state.clone(), stream, peer_addr));
            }
            Err(e) => {
                tracing::warn!("accept failed: {e}");
            }
        }
    }
}
