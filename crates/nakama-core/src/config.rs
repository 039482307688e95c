use serde::{Deserialize, Serialize};

fn default_ping_period_ms() -> u64 {
    15_000
}
fn default_pong_wait_ms() -> u64 {
    25_000
}
fn default_write_wait_ms() -> u64 {
    5_000
}
fn default_max_message_size_bytes() -> usize {
    4 * 1024 * 1024
}
fn default_idle_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    pub ping_period_ms: u64,
    pub pong_wait_ms: u64,
    pub write_wait_ms: u64,
    pub max_message_size_bytes: usize,
    pub idle_timeout_ms: u64,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            ping_period_ms: default_ping_period_ms(),
            pong_wait_ms: default_pong_wait_ms(),
            write_wait_ms: default_write_wait_ms(),
            max_message_size_bytes: default_max_message_size_bytes(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub single_socket: bool,
    pub token_expiry_sec: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            single_socket: false,
            token_expiry_sec: 60 * 60 * 24 * 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub max_queue_size: usize,
    pub max_tick_rate: u32,
    pub label_max_bytes: usize,
    /// Seconds the runtime waits for `match_terminate`'s outbound
    /// dispatches to drain before transitioning a match to `dead`.
    pub terminate_grace_sec: u32,
    /// Logged as an overrun (spec §5) when a single tick's
    /// join/leave/loop sequence takes longer than this.
    pub max_tick_duration_ms: u64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 4096,
            max_tick_rate: 60,
            label_max_bytes: 2048,
            terminate_grace_sec: 5,
            max_tick_duration_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakerConfig {
    pub interval_ms: u64,
    pub max_tickets: usize,
    pub max_intervals: u32,
}

impl Default for MatchmakerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            max_tickets: 100_000,
            max_intervals: 3,
        }
    }
}

/// Process-wide configuration, loaded once at startup from TOML and handed
/// to every component as `Arc<Config>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub socket: SocketConfig,
    pub session: SessionConfig,
    #[serde(rename = "match")]
    pub match_: MatchConfig,
    pub matchmaker: MatchmakerConfig,
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}
