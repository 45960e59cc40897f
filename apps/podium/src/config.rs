use std::env;
use tokio::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub countdown_ms: u64,
    pub sync_interval_ms: u64,
    pub composer_grace_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PODIUM_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3001),
            countdown_ms: env::var("PODIUM_COUNTDOWN_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4_000),
            sync_interval_ms: env::var("PODIUM_SYNC_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            composer_grace_secs: env::var("PODIUM_COMPOSER_GRACE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        }
    }

    pub fn timing(&self) -> Timing {
        Timing {
            countdown: Duration::from_millis(self.countdown_ms),
            sync_interval: Duration::from_millis(self.sync_interval_ms),
            composer_grace: Duration::from_secs(self.composer_grace_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3001,
            countdown_ms: 4_000,
            sync_interval_ms: 100,
            composer_grace_secs: 30,
        }
    }
}

/// Timer durations handed to the coordinator
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub countdown: Duration,
    pub sync_interval: Duration,
    pub composer_grace: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Config::default().timing()
    }
}
