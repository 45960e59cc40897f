use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::registry::Musician;

/// Messages sent from a client to the coordination core. Each command is
/// implicitly attributed to the connection it arrived on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    /// Open a new session, optionally requesting a specific code
    CreateSession {
        #[serde(default)]
        session_id: Option<String>,
    },
    /// Join the most recently created lobby session, without a code
    JoinActiveSession { player_name: String },
    /// Replace the session's part list wholesale (composer only)
    UpdateParts { parts: Vec<Value> },
    /// Pick a part by index (musician only)
    SelectPart { part_index: u32 },
    /// Begin the countdown toward playing (composer only)
    StartSession,
    /// Free-form playback status relayed to the composer (musician only)
    PlayerStatus { status: String, position: f64 },
    /// Force the session back to lobby (composer only)
    StopSession,
}

/// Messages sent from the coordination core to a client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Connection handshake, carries the id the server assigned
    #[serde(rename = "connected")]
    Connected { client_id: String },
    /// Session created successfully
    SessionCreated { session_id: String },
    /// No lobby session available to join
    NoActiveSession,
    /// Join confirmed, with the current part list
    SessionJoined { session_id: String, parts: Vec<Value> },
    /// A musician joined (sent to the composer)
    MusicianJoined {
        musician: Musician,
        all_musicians: Vec<Musician>,
    },
    /// Part list replaced (sent to musicians)
    PartsUpdated { parts: Vec<Value> },
    /// A musician selected a part (sent to the composer)
    MusicianUpdated {
        musician: Musician,
        all_musicians: Vec<Musician>,
    },
    /// Countdown begun; `start_time` is the epoch-millis instant of time-zero
    SessionStarting { start_time: i64 },
    /// The performance reached time-zero
    SessionStarted,
    /// Periodic elapsed-time broadcast while playing
    PositionSync { position: u64, timestamp: i64 },
    /// Musician playback status relay (sent to the composer)
    MusicianStatusUpdated {
        musician_id: String,
        status: String,
        position: f64,
    },
    /// Session forced back to lobby
    SessionStopped,
    /// The session's composer dropped; deletion is pending
    ComposerDisconnected,
    /// A musician dropped (sent to the composer)
    MusicianDisconnected {
        musician_id: String,
        all_musicians: Vec<Musician>,
    },
    /// Malformed frame rejection
    Error { message: String },
}

/// Generate a unique connection id
pub fn generate_client_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a short human-typeable session code
pub fn generate_session_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .map(|c| char::from(c).to_ascii_uppercase())
        .take(6)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_generation_is_unique() {
        let id1 = generate_client_id();
        let id2 = generate_client_id();
        assert_ne!(id1, id2);
        assert_eq!(id1.len(), 36); // UUID v4 format
    }

    #[test]
    fn session_codes_are_short_and_uppercase() {
        let code = generate_session_code();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn commands_use_wire_tags() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type":"JOIN_ACTIVE_SESSION","playerName":"Alice"}"#).unwrap();
        match cmd {
            ClientCommand::JoinActiveSession { player_name } => assert_eq!(player_name, "Alice"),
            other => panic!("unexpected command: {:?}", other),
        }

        let cmd: ClientCommand = serde_json::from_str(r#"{"type":"CREATE_SESSION"}"#).unwrap();
        assert!(matches!(
            cmd,
            ClientCommand::CreateSession { session_id: None }
        ));
    }

    #[test]
    fn events_use_wire_tags() {
        let json = serde_json::to_value(ServerEvent::Connected {
            client_id: "abc".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "connected");
        assert_eq!(json["clientId"], "abc");

        let json = serde_json::to_value(ServerEvent::SessionStarting { start_time: 4000 }).unwrap();
        assert_eq!(json["type"], "SESSION_STARTING");
        assert_eq!(json["startTime"], 4000);
    }
}
