use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Timing;
use crate::directory::ConnectionDirectory;
use crate::protocol::{ClientCommand, ServerEvent};
use crate::registry::{Musician, Phase, Session, SessionRegistry, SessionSummary};

/// Drives every session mutation: membership, lifecycle transitions,
/// timers, and fanout. All command handlers and timer fires take the
/// registry lock for their full duration, so no two mutations of a
/// session ever interleave at finer grain than one handler.
#[derive(Clone)]
pub struct Coordinator {
    registry: Arc<Mutex<SessionRegistry>>,
    directory: ConnectionDirectory,
    timing: Timing,
}

impl Coordinator {
    pub fn new(timing: Timing) -> Self {
        Self {
            registry: Arc::new(Mutex::new(SessionRegistry::new())),
            directory: ConnectionDirectory::new(),
            timing,
        }
    }

    /// Register a freshly established connection and acknowledge it
    pub fn on_connect(&self, conn_id: &str, tx: mpsc::UnboundedSender<ServerEvent>) {
        self.directory.register(conn_id.to_string(), tx);
        self.directory.send(
            conn_id,
            ServerEvent::Connected {
                client_id: conn_id.to_string(),
            },
        );
        info!(conn_id, "client connected");
    }

    pub async fn handle_command(&self, conn_id: &str, command: ClientCommand) {
        debug!(conn_id, ?command, "handling command");
        match command {
            ClientCommand::CreateSession { session_id } => {
                self.create_session(conn_id, session_id).await;
            }
            ClientCommand::JoinActiveSession { player_name } => {
                self.join_active_session(conn_id, player_name).await;
            }
            ClientCommand::UpdateParts { parts } => {
                self.update_parts(conn_id, parts).await;
            }
            ClientCommand::SelectPart { part_index } => {
                self.select_part(conn_id, part_index).await;
            }
            ClientCommand::StartSession => {
                self.start_session(conn_id).await;
            }
            ClientCommand::PlayerStatus { status, position } => {
                self.player_status(conn_id, status, position).await;
            }
            ClientCommand::StopSession => {
                self.stop_session(conn_id).await;
            }
        }
    }

    async fn create_session(&self, conn_id: &str, requested_id: Option<String>) {
        let mut registry = self.registry.lock().await;
        // A connection composes or plays in at most one live session
        if registry.find_by_composer(conn_id).is_some()
            || registry.find_by_musician(conn_id).is_some()
        {
            debug!(conn_id, "ignoring CREATE_SESSION from connection already in a session");
            return;
        }
        let session_id = registry.create(conn_id, requested_id).id.clone();
        info!(session = %session_id, composer = conn_id, "session created");
        self.directory
            .send(conn_id, ServerEvent::SessionCreated { session_id });
    }

    async fn join_active_session(&self, conn_id: &str, player_name: String) {
        let mut registry = self.registry.lock().await;
        if registry.find_by_composer(conn_id).is_some()
            || registry.find_by_musician(conn_id).is_some()
        {
            debug!(conn_id, "ignoring duplicate JOIN_ACTIVE_SESSION");
            return;
        }
        let Some(session_id) = registry.newest_lobby_id() else {
            self.directory.send(conn_id, ServerEvent::NoActiveSession);
            return;
        };
        let Some(session) = registry.get_mut(&session_id) else {
            return;
        };

        let musician = Musician::new(conn_id.to_string(), player_name);
        session.musicians.push(musician.clone());
        info!(session = %session.id, musician = %musician.name, "musician joined");

        self.directory.send(
            &session.composer,
            ServerEvent::MusicianJoined {
                musician,
                all_musicians: session.musicians.clone(),
            },
        );
        self.directory.send(
            conn_id,
            ServerEvent::SessionJoined {
                session_id: session.id.clone(),
                parts: session.parts.clone(),
            },
        );
    }

    async fn update_parts(&self, conn_id: &str, parts: Vec<serde_json::Value>) {
        let mut registry = self.registry.lock().await;
        let Some(session) = registry.find_by_composer_mut(conn_id) else {
            return;
        };
        session.parts = parts;
        info!(session = %session.id, count = session.parts.len(), "parts updated");
        // Musicians only; the composer already holds the list
        for musician in &session.musicians {
            self.directory.send(
                &musician.id,
                ServerEvent::PartsUpdated {
                    parts: session.parts.clone(),
                },
            );
        }
    }

    async fn select_part(&self, conn_id: &str, part_index: u32) {
        let mut registry = self.registry.lock().await;
        let Some(session) = registry.find_by_musician_mut(conn_id) else {
            return;
        };
        let composer = session.composer.clone();
        let Some(musician) = session.musician_mut(conn_id) else {
            return;
        };
        // Pass-through index; bounds belong to the part catalog
        musician.selected_part = Some(part_index);
        musician.ready = true;
        let snapshot = musician.clone();
        info!(session = %session.id, musician = %snapshot.name, part_index, "part selected");
        self.directory.send(
            &composer,
            ServerEvent::MusicianUpdated {
                musician: snapshot,
                all_musicians: session.musicians.clone(),
            },
        );
    }

    async fn player_status(&self, conn_id: &str, status: String, position: f64) {
        let mut registry = self.registry.lock().await;
        let Some(session) = registry.find_by_musician_mut(conn_id) else {
            return;
        };
        let composer = session.composer.clone();
        let Some(musician) = session.musician_mut(conn_id) else {
            return;
        };
        musician.status = status.clone();
        musician.position = position;
        // Relayed to the composer only, never session-wide
        self.directory.send(
            &composer,
            ServerEvent::MusicianStatusUpdated {
                musician_id: conn_id.to_string(),
                status,
                position,
            },
        );
    }

    async fn start_session(&self, conn_id: &str) {
        let mut registry = self.registry.lock().await;
        let Some(session) = registry.find_by_composer_mut(conn_id) else {
            return;
        };
        if session.phase != Phase::Lobby {
            debug!(session = %session.id, "ignoring START_SESSION outside lobby");
            return;
        }
        session.phase = Phase::Countdown;
        let start_time =
            Utc::now() + chrono::Duration::milliseconds(self.timing.countdown.as_millis() as i64);
        session.start_time = Some(start_time);

        let token = CancellationToken::new();
        session.timers.countdown = Some(token.clone());

        self.broadcast(
            session,
            &ServerEvent::SessionStarting {
                start_time: start_time.timestamp_millis(),
            },
            None,
        );
        let session_id = session.id.clone();
        info!(session = %session_id, "countdown started");
        self.arm_countdown(session_id, token);
    }

    async fn stop_session(&self, conn_id: &str) {
        let mut registry = self.registry.lock().await;
        let Some(session) = registry.find_by_composer_mut(conn_id) else {
            return;
        };
        session.phase = Phase::Lobby;
        session.timers.cancel_all();
        info!(session = %session.id, "session stopped");
        self.broadcast(session, &ServerEvent::SessionStopped, None);
    }

    /// Disconnect path: runs synchronously with connection loss
    pub async fn on_disconnect(&self, conn_id: &str) {
        self.directory.unregister(conn_id);
        info!(conn_id, "client disconnected");

        let mut registry = self.registry.lock().await;
        if let Some(session) = registry.find_by_composer_mut(conn_id) {
            session.timers.cancel_all();
            for musician in &session.musicians {
                self.directory
                    .send(&musician.id, ServerEvent::ComposerDisconnected);
            }
            let session_id = session.id.clone();
            info!(session = %session_id, "composer disconnected; deletion scheduled");
            self.schedule_deletion(session_id, conn_id.to_string());
            return;
        }

        if let Some(session) = registry.find_by_musician_mut(conn_id) {
            if let Some(index) = session.musicians.iter().position(|m| m.id == conn_id) {
                let musician = session.musicians.remove(index);
                info!(session = %session.id, musician = %musician.name, "musician left");
                self.directory.send(
                    &session.composer,
                    ServerEvent::MusicianDisconnected {
                        musician_id: conn_id.to_string(),
                        all_musicians: session.musicians.clone(),
                    },
                );
            }
        }
    }

    /// Deliver an event to every current member of a session, with
    /// optional sender exclusion. No cross-recipient ordering guarantee.
    fn broadcast(&self, session: &Session, event: &ServerEvent, exclude: Option<&str>) {
        if exclude != Some(session.composer.as_str()) {
            self.directory.send(&session.composer, event.clone());
        }
        for musician in &session.musicians {
            if exclude != Some(musician.id.as_str()) {
                self.directory.send(&musician.id, event.clone());
            }
        }
    }

    /// One-shot countdown toward playing, cancelled by STOP_SESSION or
    /// composer disconnect
    fn arm_countdown(&self, session_id: String, token: CancellationToken) {
        let coordinator = self.clone();
        let countdown = self.timing.countdown;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(session = %session_id, "countdown cancelled");
                }
                _ = sleep(countdown) => {
                    coordinator.finish_countdown(&session_id).await;
                }
            }
        });
    }

    async fn finish_countdown(&self, session_id: &str) {
        let mut registry = self.registry.lock().await;
        let Some(session) = registry.get_mut(session_id) else {
            return;
        };
        // A stale fire after stop or restart must stay inert
        if session.phase != Phase::Countdown {
            return;
        }
        session.phase = Phase::Playing;
        session.start_at = Some(Instant::now());
        session.current_position = 0;
        session.timers.countdown = None;

        let token = CancellationToken::new();
        session.timers.position_sync = Some(token.clone());

        info!(session = %session.id, "session playing");
        self.broadcast(session, &ServerEvent::SessionStarted, None);
        self.start_position_sync(session_id.to_string(), token);
    }

    /// One periodic broadcaster per playing episode. Exits permanently
    /// when the session leaves `playing`; the next episode gets a fresh
    /// task.
    fn start_position_sync(&self, session_id: String, token: CancellationToken) {
        let coordinator = self.clone();
        let period = self.timing.sync_interval;
        tokio::spawn(async move {
            let mut ticker = interval(period);
            // interval yields immediately; the first broadcast belongs
            // at start + period
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if !coordinator.sync_tick(&session_id).await {
                            break;
                        }
                    }
                }
            }
            debug!(session = %session_id, "position sync ended");
        });
    }

    /// Returns false once the schedule must self-cancel
    async fn sync_tick(&self, session_id: &str) -> bool {
        let mut registry = self.registry.lock().await;
        let Some(session) = registry.get_mut(session_id) else {
            return false;
        };
        if session.phase != Phase::Playing {
            return false;
        }
        let Some(start_at) = session.start_at else {
            return false;
        };
        // Sole writer of current_position
        session.current_position = start_at.elapsed().as_millis() as u64;
        self.broadcast(
            session,
            &ServerEvent::PositionSync {
                position: session.current_position,
                timestamp: Utc::now().timestamp_millis(),
            },
            None,
        );
        true
    }

    /// Grace-period deletion after composer loss. The session is only
    /// removed if it still exists with the same composer, so a reused
    /// id is never torn down by a stale timer.
    fn schedule_deletion(&self, session_id: String, composer: String) {
        let coordinator = self.clone();
        let grace = self.timing.composer_grace;
        tokio::spawn(async move {
            sleep(grace).await;
            let mut registry = coordinator.registry.lock().await;
            let still_orphaned = registry
                .get(&session_id)
                .map(|s| s.composer == composer)
                .unwrap_or(false);
            if still_orphaned {
                registry.remove(&session_id);
                info!(session = %session_id, "session removed after composer grace period");
            }
        });
    }

    // Read-only snapshot accessors for the monitoring surface

    pub async fn session_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    pub fn connection_count(&self) -> usize {
        self.directory.len()
    }

    pub async fn session_summaries(&self) -> Vec<SessionSummary> {
        self.registry.lock().await.summaries()
    }

    #[cfg(test)]
    pub(crate) fn registry_handle(&self) -> Arc<Mutex<SessionRegistry>> {
        self.registry.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timing;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn test_coordinator() -> Coordinator {
        Coordinator::new(Timing::default())
    }

    fn connect(coordinator: &Coordinator, conn_id: &str) -> UnboundedReceiver<ServerEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        coordinator.on_connect(conn_id, tx);
        // Drain the handshake
        assert!(matches!(rx.try_recv(), Ok(ServerEvent::Connected { .. })));
        rx
    }

    #[tokio::test]
    async fn create_session_acknowledges_requested_code() {
        let coordinator = test_coordinator();
        let mut rx = connect(&coordinator, "composer-1");

        coordinator
            .handle_command(
                "composer-1",
                ClientCommand::CreateSession {
                    session_id: Some("AB12CD".into()),
                },
            )
            .await;

        match rx.try_recv() {
            Ok(ServerEvent::SessionCreated { session_id }) => assert_eq!(session_id, "AB12CD"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn second_create_from_same_connection_is_a_no_op() {
        let coordinator = test_coordinator();
        let mut rx = connect(&coordinator, "composer-1");

        coordinator
            .handle_command("composer-1", ClientCommand::CreateSession { session_id: None })
            .await;
        assert!(matches!(rx.try_recv(), Ok(ServerEvent::SessionCreated { .. })));

        coordinator
            .handle_command("composer-1", ClientCommand::CreateSession { session_id: None })
            .await;
        assert!(rx.try_recv().is_err());
        assert_eq!(coordinator.session_count().await, 1);
    }

    #[tokio::test]
    async fn join_without_lobby_session_replies_no_active_session() {
        let coordinator = test_coordinator();
        let mut rx = connect(&coordinator, "musician-1");

        coordinator
            .handle_command(
                "musician-1",
                ClientCommand::JoinActiveSession {
                    player_name: "Alice".into(),
                },
            )
            .await;

        assert!(matches!(rx.try_recv(), Ok(ServerEvent::NoActiveSession)));
    }

    #[tokio::test]
    async fn commands_from_unrelated_connections_are_ignored() {
        let coordinator = test_coordinator();
        let mut composer_rx = connect(&coordinator, "composer-1");
        let mut stranger_rx = connect(&coordinator, "stranger");

        coordinator
            .handle_command("composer-1", ClientCommand::CreateSession { session_id: None })
            .await;
        composer_rx.try_recv().ok();

        // A stranger can neither start, stop, nor update parts
        coordinator
            .handle_command("stranger", ClientCommand::StartSession)
            .await;
        coordinator
            .handle_command("stranger", ClientCommand::StopSession)
            .await;
        coordinator
            .handle_command("stranger", ClientCommand::UpdateParts { parts: vec![] })
            .await;
        coordinator
            .handle_command("stranger", ClientCommand::SelectPart { part_index: 0 })
            .await;

        assert!(stranger_rx.try_recv().is_err());
        assert!(composer_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_honors_sender_exclusion() {
        let coordinator = test_coordinator();
        let mut composer_rx = connect(&coordinator, "composer-1");
        let mut musician_rx = connect(&coordinator, "musician-1");

        coordinator
            .handle_command("composer-1", ClientCommand::CreateSession { session_id: None })
            .await;
        composer_rx.try_recv().ok();
        coordinator
            .handle_command(
                "musician-1",
                ClientCommand::JoinActiveSession {
                    player_name: "Alice".into(),
                },
            )
            .await;
        composer_rx.try_recv().ok();
        musician_rx.try_recv().ok();

        let registry = coordinator.registry_handle();
        let registry = registry.lock().await;
        let session = registry.find_by_composer("composer-1").unwrap();
        coordinator.broadcast(session, &ServerEvent::SessionStopped, Some("composer-1"));

        assert!(composer_rx.try_recv().is_err());
        assert!(matches!(musician_rx.try_recv(), Ok(ServerEvent::SessionStopped)));
    }
}
