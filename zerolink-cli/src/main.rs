//! Terminal client for ZeroLink.
//!
//! Thin shell over `zerolink-core`: parses arguments, resolves the data
//! directory next to the executable, prints core events, and translates
//! stdin commands into core operations. All protocol and storage logic
//! lives in the core crate.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use zerolink_core::{Client, ClientConfig, Event};

/// ZeroLink client.
#[derive(Parser, Debug)]
#[command(name = "zerolink")]
struct Args {
    /// Bootstrap server IP.
    bootstrap_ip: String,
    /// Bootstrap server port.
    bootstrap_port: u16,
    /// P2P listen port; omitted or 0 lets the OS choose.
    #[arg(default_value_t = 0)]
    p2p_port: u16,
}

/// Data files live next to the executable, like the rest of the state;
/// fall back to the working directory when that is not resolvable.
fn data_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("zerolink_core=warn".parse()?);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let (client, events) = Client::start(ClientConfig {
        data_dir: data_dir(),
        bootstrap_ip: args.bootstrap_ip,
        bootstrap_port: args.bootstrap_port,
        p2p_port: args.p2p_port,
    })
    .await?;

    println!("==================================================================");
    println!("your public key (ID): {}", client.my_pk_hex());
    println!("==================================================================");
    println!("commands: /friends  /add <pk_hex> <name>  /del <name>  /chat <name>");
    println!("          /sync <name>  /status  /close  /quit   (plain text sends)");

    let my_pk = client.my_pk_hex().to_string();
    tokio::spawn(print_events(events));

    let mut current_chat: Option<String> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        match line.split_whitespace().collect::<Vec<_>>().as_slice() {
            ["/quit"] => break,
            ["/friends"] => {
                for f in client.friends() {
                    println!("  {}  ({})", f.nickname, f.pk_hex);
                }
            }
            ["/add", pk_hex, name] => match client.add_friend(pk_hex, name) {
                Ok(()) => println!("[system] friend {name} added"),
                Err(e) => println!("[error] {e}"),
            },
            ["/del", name] => match client.delete_friend_by_name(name) {
                Ok(f) => println!("[system] friend {} deleted", f.nickname),
                Err(e) => println!("[error] {e}"),
            },
            ["/chat", name] => match client.open_chat(name).await {
                Ok(history) => {
                    println!("--- chat with {name} ---");
                    for entry in history {
                        if entry.sender_pk_hex == my_pk {
                            println!("[me]: {}", entry.content);
                        } else {
                            println!(
                                "[{}]: {}",
                                client.friend_name(&entry.sender_pk_hex),
                                entry.content
                            );
                        }
                    }
                    current_chat = Some(name.to_string());
                }
                Err(e) => println!("[error] {e}"),
            },
            ["/sync", name] => match client.request_sync(name).await {
                Ok(true) => {}
                Ok(false) => println!("[system] {name} is offline, cannot sync"),
                Err(e) => println!("[error] {e}"),
            },
            ["/status"] => {
                println!("  id:          {}", client.my_pk_hex());
                println!("  p2p port:    {}", client.my_p2p_port());
                println!("  peers online: {}", client.online_peer_count());
            }
            ["/close"] => {
                current_chat = None;
                println!("[system] chat closed");
            }
            [cmd, ..] if cmd.starts_with('/') => {
                println!("[error] unknown command {cmd}");
            }
            _ => match &current_chat {
                Some(name) => match client.send_chat_message(name, &line).await {
                    Ok(true) => println!("[me -> {name}]: {line}"),
                    Ok(false) => println!("[me -> {name}] (queued): {line}"),
                    Err(e) => println!("[error] {e}"),
                },
                None => println!("[system] open a chat first: /chat <name>"),
            },
        }
    }

    client.shutdown().await;
    println!("zerolink client exited.");
    Ok(())
}

/// Render core events as log lines.
async fn print_events(mut events: mpsc::Receiver<Event>) {
    while let Some(event) = events.recv().await {
        match event {
            Event::IdentityReady { created: true, .. } => {
                println!("[identity] no identity file found, generated a new one");
            }
            Event::IdentityReady { .. } => {}
            Event::FriendsLoaded { count } => println!("[friends] loaded {count} friends"),
            Event::ListenerReady { port } => println!("[system] p2p listening on port {port}"),
            Event::BootstrapConnected => println!("[system] connected to bootstrap server"),
            Event::BootstrapDisconnected => {
                println!("[system] bootstrap server connection lost");
            }
            Event::DialingPeer { nickname, .. } => {
                println!("[system] discovered friend {nickname}, connecting...");
            }
            Event::FriendConnected { nickname, .. } => {
                println!("[system] friend {nickname} connected");
            }
            Event::FriendDisconnected { nickname, .. } => {
                println!("[system] friend {nickname} disconnected");
            }
            Event::PeerDeparted { .. } => {}
            Event::MessageReceived {
                nickname, content, ..
            } => {
                println!("[{nickname}]: {content}");
            }
            Event::MessageQueued { nickname } => {
                println!("[system] {nickname} is offline, message stored for later sync");
            }
            Event::SyncRequested { nickname } => {
                println!("[sync] requested missing history from {nickname}");
            }
            Event::SyncServed { nickname, count } => {
                println!("[sync] sent {count} missing messages to {nickname}");
            }
            Event::SyncApplied { nickname, count } => {
                println!("[sync] received {count} historical messages from {nickname}");
            }
            Event::PeerRejected { pk_hex, reason } => {
                tracing::debug!(?reason, "rejected peer {pk_hex}");
            }
        }
    }
}
