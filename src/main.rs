//! Security Vision realtime client CLI.
//!
//! Connects to the notification socket as one profile and either prints every
//! event, sends a single chat message, or runs an interactive chat.

// Rust guideline compliant 2026-02

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use secvision_chat::{runtime, ChatEvent, ChatService, Config, EventKind, PeerId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Longest wait for the first successful open, covering the full backoff.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(90);

/// Grace period for the socket task to flush a frame before shutdown.
const FLUSH_DELAY: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(name = "secvision-chat")]
#[command(version)]
#[command(about = "Realtime chat and notification client for Security Vision")]
struct Cli {
    /// Realtime server host (overrides config)
    #[arg(long, global = true)]
    host: Option<String>,
    /// Realtime server port (overrides config)
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Profile to connect as (overrides config)
    #[arg(long, global = true)]
    perfil_id: Option<PeerId>,
    /// Session token (overrides SECVISION_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every event until Ctrl-C
    Watch,
    /// Send one chat message and exit
    Send {
        /// Recipient profile id
        #[arg(long)]
        to: PeerId,
        /// Recipient display name
        #[arg(long)]
        name: String,
        /// Message body
        message: String,
    },
    /// Interactive chat with one profile; type `/quit` to leave
    Chat {
        /// Counterpart profile id
        #[arg(long)]
        to: PeerId,
        /// Counterpart display name
        #[arg(long)]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(host) = cli.host {
        config.ws_host = host;
    }
    if let Some(port) = cli.port {
        config.ws_port = port;
    }
    if let Some(perfil_id) = cli.perfil_id {
        config.perfil_id = Some(perfil_id);
    }
    if let Some(token) = cli.token {
        config.token = token;
    }

    let perfil_id = config
        .perfil_id
        .context("No profile configured. Pass --perfil-id or set SECVISION_PERFIL_ID.")?;
    if !config.has_token() {
        anyhow::bail!("No session token. Pass --token or set SECVISION_TOKEN.");
    }

    let handle = runtime::start(config.chat_settings(), config.keepalive_interval())?;
    let chat = handle.service().clone();

    let result = match cli.command {
        Commands::Watch => watch(&chat, perfil_id, &config.token).await,
        Commands::Send { to, name, message } => {
            send_once(&chat, perfil_id, &config.token, to, &name, &message).await
        }
        Commands::Chat { to, name } => {
            interactive(&chat, perfil_id, &config.token, to, &name).await
        }
    };

    handle.shutdown().await;
    result
}

async fn watch(chat: &ChatService, perfil_id: PeerId, token: &str) -> Result<()> {
    for kind in EventKind::ALL {
        chat.on(kind, |event| {
            println!("[{}] {}", event.kind(), describe(event));
            Ok(())
        });
    }

    chat.connect(perfil_id, token);
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    println!("Shutting down...");
    Ok(())
}

async fn send_once(
    chat: &ChatService,
    perfil_id: PeerId,
    token: &str,
    to: PeerId,
    name: &str,
    message: &str,
) -> Result<()> {
    let errors = chat.on(EventKind::SendError, |event| {
        eprintln!("{}", describe(event));
        Ok(())
    });

    connect_and_wait(chat, perfil_id, token).await?;
    let sent = chat.send_message(to, name, message);
    chat.off(EventKind::SendError, errors);

    if !sent {
        anyhow::bail!("Message was not sent");
    }
    tokio::time::sleep(FLUSH_DELAY).await;
    println!("Sent to {} ({})", name, to);
    Ok(())
}

async fn interactive(
    chat: &ChatService,
    perfil_id: PeerId,
    token: &str,
    to: PeerId,
    name: &str,
) -> Result<()> {
    let window = chat.clone();
    let counterpart = name.to_string();
    chat.on(EventKind::NewMessage, move |event| {
        if let ChatEvent::NewMessage { peer_id, message } = event {
            if *peer_id == to {
                println!("{}: {}", counterpart, message.body);
                // Conversation is on screen
                window.mark_as_read(to);
            } else {
                println!("(nuevo mensaje de {})", message.sender_name);
            }
        }
        Ok(())
    });
    chat.on(EventKind::SendError, |event| {
        eprintln!("{}", describe(event));
        Ok(())
    });
    chat.on(EventKind::Connected, |event| {
        if let ChatEvent::Connected(false) = event {
            eprintln!("Connection lost, reconnecting...");
        }
        Ok(())
    });
    chat.on(EventKind::MaxReconnectReached, |_| {
        eprintln!("Could not reconnect. Type /quit to exit.");
        Ok(())
    });

    connect_and_wait(chat, perfil_id, token).await?;
    println!("Chatting with {} ({}). Type /quit to exit.", name, to);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match line.trim() {
                    "/quit" => break,
                    "" => {}
                    body => {
                        chat.send_message(to, name, body);
                    }
                }
            }
        }
    }
    Ok(())
}

/// Connect and wait until the socket is open or retries run out.
async fn connect_and_wait(chat: &ChatService, perfil_id: PeerId, token: &str) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let up_tx = tx.clone();
    let up = chat.on(EventKind::Connected, move |event| {
        if let ChatEvent::Connected(true) = event {
            let _ = up_tx.send(true);
        }
        Ok(())
    });
    let gave_up = chat.on(EventKind::MaxReconnectReached, move |_| {
        let _ = tx.send(false);
        Ok(())
    });

    chat.connect(perfil_id, token);
    let outcome = tokio::time::timeout(CONNECT_TIMEOUT, rx.recv()).await;

    chat.off(EventKind::Connected, up);
    chat.off(EventKind::MaxReconnectReached, gave_up);

    match outcome {
        Ok(Some(true)) => Ok(()),
        Ok(_) => anyhow::bail!("Could not connect: reconnection attempts exhausted"),
        Err(_) => anyhow::bail!("Timed out connecting to the realtime server"),
    }
}

fn describe(event: &ChatEvent) -> String {
    match event {
        ChatEvent::Connected(up) => format!("connected={up}"),
        ChatEvent::Disconnected => "disconnected".to_string(),
        ChatEvent::Error(detail) => format!("socket error: {detail}"),
        ChatEvent::MaxReconnectReached => "gave up reconnecting".to_string(),
        ChatEvent::NewMessage { peer_id, message } => {
            format!("{} ({}): {}", message.sender_name, peer_id, message.body)
        }
        ChatEvent::MessageSent { peer_id, message } => format!("-> {}: {}", peer_id, message.body),
        ChatEvent::UnreadUpdate { peer_id, count } => format!("{peer_id} unread={count}"),
        ChatEvent::SendError { error } => format!("send failed: {error}"),
        ChatEvent::MessagesCleared => "cache cleared".to_string(),
        ChatEvent::NewNotification(raw) | ChatEvent::NotificationRead(raw) => raw.to_string(),
        ChatEvent::ConnectionEstablished(info) => format!(
            "profile {} rol={} zonas={:?}",
            info.perfil_id.map_or_else(|| "?".to_string(), |p| p.to_string()),
            info.rol.as_deref().unwrap_or("-"),
            info.zonas
        ),
        ChatEvent::PendingNotifications(pending) => format!("{} pending", pending.count),
        ChatEvent::AllNotificationsRead(done) => format!("{} marked read", done.count),
        ChatEvent::ServerError(err) => format!("server error: {}", err.message),
    }
}
