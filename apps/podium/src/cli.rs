use anyhow::Result;
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use crate::protocol::{ClientCommand, ServerEvent};

#[derive(Parser, Debug)]
#[command(name = "podium")]
#[command(about = "Podium session coordination server and debug client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Run as server (default behavior if no command specified)
    #[arg(long)]
    pub server: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to a running server and print the event stream
    Client {
        /// Server WebSocket URL
        #[arg(short, long, default_value = "ws://localhost:3001/ws")]
        url: String,

        #[command(subcommand)]
        role: ClientRole,
    },
}

#[derive(Subcommand, Debug)]
pub enum ClientRole {
    /// Create a session and watch it as the composer
    Compose {
        /// Requested session code (optional)
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Join the active lobby session as a musician
    Play {
        /// Display name announced to the composer
        #[arg(short, long, default_value = "guest")]
        name: String,
    },
}

/// Debug client: opens a connection, issues one command, then tails
/// the server's event stream until the connection closes.
pub async fn run_debug_client(url: String, role: ClientRole) -> Result<()> {
    debug!("connecting to {}", url);
    let (ws_stream, _) = match timeout(Duration::from_secs(5), connect_async(&url)).await {
        Ok(Ok(conn)) => conn,
        Ok(Err(e)) => return Err(anyhow::anyhow!("failed to connect to {}: {}", url, e)),
        Err(_) => return Err(anyhow::anyhow!("connection to {} timed out", url)),
    };
    let (mut write, mut read) = ws_stream.split();

    let command = match role {
        ClientRole::Compose { session } => ClientCommand::CreateSession { session_id: session },
        ClientRole::Play { name } => ClientCommand::JoinActiveSession { player_name: name },
    };
    let text = serde_json::to_string(&command)?;
    write.send(Message::Text(text.into())).await?;

    while let Some(frame) = read.next().await {
        match frame? {
            Message::Text(text) => match serde_json::from_str::<ServerEvent>(&text) {
                Ok(event) => print_event(&event),
                Err(e) => debug!("unrecognized server frame: {} ({})", text, e),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    Ok(())
}

fn print_event(event: &ServerEvent) {
    match event {
        ServerEvent::Connected { client_id } => println!("connected as {}", client_id),
        ServerEvent::SessionCreated { session_id } => println!("session created: {}", session_id),
        ServerEvent::NoActiveSession => println!("no active session to join"),
        ServerEvent::SessionJoined { session_id, parts } => {
            println!("joined session {} ({} parts)", session_id, parts.len())
        }
        ServerEvent::MusicianJoined { musician, all_musicians } => println!(
            "musician joined: {} ({} total)",
            musician.name,
            all_musicians.len()
        ),
        ServerEvent::MusicianUpdated { musician, .. } => println!(
            "musician {} selected part {:?}",
            musician.name, musician.selected_part
        ),
        ServerEvent::PartsUpdated { parts } => println!("parts updated: {} parts", parts.len()),
        ServerEvent::SessionStarting { start_time } => {
            println!("session starting at {}", start_time)
        }
        ServerEvent::SessionStarted => println!("session started"),
        ServerEvent::PositionSync { position, .. } => println!("position: {}ms", position),
        ServerEvent::MusicianStatusUpdated {
            musician_id,
            status,
            position,
        } => println!("{}: {} @ {}", musician_id, status, position),
        ServerEvent::SessionStopped => println!("session stopped"),
        ServerEvent::ComposerDisconnected => println!("composer disconnected"),
        ServerEvent::MusicianDisconnected { musician_id, .. } => {
            println!("musician left: {}", musician_id)
        }
        ServerEvent::Error { message } => println!("error: {}", message),
    }
}
