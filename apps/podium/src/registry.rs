use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::protocol::generate_session_code;

/// Lifecycle phase of a session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Lobby,
    Countdown,
    Playing,
}

/// A participant who selects a part and plays along
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Musician {
    pub id: String,
    pub name: String,
    pub selected_part: Option<u32>,
    pub ready: bool,
    pub status: String,
    pub position: f64,
    pub joined_at: DateTime<Utc>,
}

impl Musician {
    pub fn new(id: String, name: String) -> Self {
        Self {
            id,
            name,
            selected_part: None,
            ready: false,
            status: "connected".to_string(),
            position: 0.0,
            joined_at: Utc::now(),
        }
    }
}

/// Cancellation handles for a session's pending timers. Each `playing`
/// episode gets fresh tokens; a transition out of countdown/playing
/// cancels whatever is armed.
#[derive(Debug, Default)]
pub struct SessionTimers {
    pub countdown: Option<CancellationToken>,
    pub position_sync: Option<CancellationToken>,
}

impl SessionTimers {
    pub fn cancel_all(&mut self) {
        if let Some(token) = self.countdown.take() {
            token.cancel();
        }
        if let Some(token) = self.position_sync.take() {
            token.cancel();
        }
    }
}

/// One performance instance: a composer, its musicians, and the
/// lifecycle state driven by the coordinator.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    /// Connection id of the composer, fixed at creation
    pub composer: String,
    /// Join order is preserved; membership unique by connection id
    pub musicians: Vec<Musician>,
    /// Opaque part descriptors, replaced wholesale by the composer
    pub parts: Vec<Value>,
    pub phase: Phase,
    /// Wall-clock instant of time-zero, set when the countdown begins
    pub start_time: Option<DateTime<Utc>>,
    /// Monotonic instant of time-zero, set at the playing transition;
    /// the basis for position arithmetic
    pub start_at: Option<Instant>,
    /// Elapsed millis, written only by the position-sync task
    pub current_position: u64,
    pub created_at: DateTime<Utc>,
    pub timers: SessionTimers,
}

impl Session {
    fn new(id: String, composer: String) -> Self {
        Self {
            id,
            composer,
            musicians: Vec::new(),
            parts: Vec::new(),
            phase: Phase::Lobby,
            start_time: None,
            start_at: None,
            current_position: 0,
            created_at: Utc::now(),
            timers: SessionTimers::default(),
        }
    }

    pub fn musician(&self, conn_id: &str) -> Option<&Musician> {
        self.musicians.iter().find(|m| m.id == conn_id)
    }

    pub fn musician_mut(&mut self, conn_id: &str) -> Option<&mut Musician> {
        self.musicians.iter_mut().find(|m| m.id == conn_id)
    }
}

/// Read-only per-session view for the monitoring surface
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub phase: Phase,
    pub musicians_count: usize,
    pub parts_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Owns all live sessions. Injectable (no ambient singleton) so tests
/// can run independent registries side by side.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session in lobby phase. A free requested id is honored;
    /// otherwise codes are generated until one misses the live set.
    pub fn create(&mut self, composer: &str, requested_id: Option<String>) -> &Session {
        let id = match requested_id {
            Some(id) if !self.sessions.contains_key(&id) => id,
            _ => loop {
                let code = generate_session_code();
                if !self.sessions.contains_key(&code) {
                    break code;
                }
            },
        };
        self.sessions
            .entry(id.clone())
            .or_insert_with(|| Session::new(id, composer.to_string()))
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    pub fn find_by_composer(&self, conn_id: &str) -> Option<&Session> {
        self.sessions.values().find(|s| s.composer == conn_id)
    }

    pub fn find_by_composer_mut(&mut self, conn_id: &str) -> Option<&mut Session> {
        self.sessions.values_mut().find(|s| s.composer == conn_id)
    }

    pub fn find_by_musician(&self, conn_id: &str) -> Option<&Session> {
        self.sessions.values().find(|s| s.musician(conn_id).is_some())
    }

    pub fn find_by_musician_mut(&mut self, conn_id: &str) -> Option<&mut Session> {
        self.sessions
            .values_mut()
            .find(|s| s.musician(conn_id).is_some())
    }

    /// The lobby session with the latest `created_at`, for code-less
    /// joining. Equal timestamps are broken by the greater id, so the
    /// pick is deterministic regardless of map iteration order.
    pub fn newest_lobby_id(&self) -> Option<String> {
        self.sessions
            .values()
            .filter(|s| s.phase == Phase::Lobby)
            .max_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|s| s.id.clone())
    }

    pub fn remove(&mut self, id: &str) -> Option<Session> {
        self.sessions.remove(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        self.sessions
            .values()
            .map(|s| SessionSummary {
                id: s.id.clone(),
                phase: s.phase,
                musicians_count: s.musicians.len(),
                parts_count: s.parts.len(),
                created_at: s.created_at,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_honors_free_requested_id() {
        let mut registry = SessionRegistry::new();
        let session = registry.create("composer-1", Some("AB12CD".to_string()));
        assert_eq!(session.id, "AB12CD");
        assert_eq!(session.composer, "composer-1");
        assert_eq!(session.phase, Phase::Lobby);
        assert!(session.musicians.is_empty());
        assert!(session.parts.is_empty());
    }

    #[test]
    fn create_generates_fresh_code_on_collision() {
        let mut registry = SessionRegistry::new();
        registry.create("composer-1", Some("AB12CD".to_string()));
        let second = registry.create("composer-2", Some("AB12CD".to_string()));
        assert_ne!(second.id, "AB12CD");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn live_ids_are_pairwise_distinct() {
        let mut registry = SessionRegistry::new();
        let mut ids = std::collections::HashSet::new();
        for i in 0..50 {
            let id = registry.create(&format!("composer-{i}"), None).id.clone();
            assert!(ids.insert(id));
        }
        assert_eq!(registry.len(), 50);
    }

    #[test]
    fn lookup_by_composer_and_musician() {
        let mut registry = SessionRegistry::new();
        let id = registry.create("composer-1", None).id.clone();
        registry
            .get_mut(&id)
            .unwrap()
            .musicians
            .push(Musician::new("musician-1".into(), "Alice".into()));

        assert_eq!(registry.find_by_composer("composer-1").unwrap().id, id);
        assert_eq!(registry.find_by_musician("musician-1").unwrap().id, id);
        assert!(registry.find_by_composer("musician-1").is_none());
        assert!(registry.find_by_musician("nobody").is_none());
    }

    #[test]
    fn newest_lobby_prefers_latest_created_at() {
        let mut registry = SessionRegistry::new();
        let first = registry.create("composer-1", None).id.clone();
        let second = registry.create("composer-2", None).id.clone();
        // Force distinct, ordered timestamps
        registry.get_mut(&first).unwrap().created_at = Utc::now() - chrono::Duration::seconds(10);

        assert_eq!(registry.newest_lobby_id(), Some(second.clone()));

        // A non-lobby session is never a join target
        registry.get_mut(&second).unwrap().phase = Phase::Playing;
        assert_eq!(registry.newest_lobby_id(), Some(first));
    }

    #[test]
    fn newest_lobby_ties_break_by_greater_id() {
        let mut registry = SessionRegistry::new();
        let stamp = Utc::now();
        for id in ["AAAAAA", "ZZZZZZ", "MMMMMM"] {
            registry.create(&format!("composer-{id}"), Some(id.to_string()));
            registry.get_mut(id).unwrap().created_at = stamp;
        }
        assert_eq!(registry.newest_lobby_id(), Some("ZZZZZZ".to_string()));
    }

    #[test]
    fn removed_id_can_be_reused() {
        let mut registry = SessionRegistry::new();
        registry.create("composer-1", Some("AB12CD".to_string()));
        registry.remove("AB12CD");
        let session = registry.create("composer-2", Some("AB12CD".to_string()));
        assert_eq!(session.id, "AB12CD");
        assert_eq!(session.composer, "composer-2");
    }

    #[test]
    fn cancel_all_cancels_armed_tokens() {
        let mut timers = SessionTimers::default();
        let countdown = CancellationToken::new();
        let sync = CancellationToken::new();
        timers.countdown = Some(countdown.clone());
        timers.position_sync = Some(sync.clone());

        timers.cancel_all();
        assert!(countdown.is_cancelled());
        assert!(sync.is_cancelled());
        assert!(timers.countdown.is_none());
        assert!(timers.position_sync.is_none());
    }
}
