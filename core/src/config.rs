/// Engine configuration
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_PAGE_LIMIT: u32 = 50;
const DEFAULT_TEMP_ID_PREFIX: &str = "tmp-";

/// Tunables for the sync engine. Everything has a sensible default; the
/// env overrides exist for scripts and soak tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Echo-suppression window: how recent a local send must be for a
    /// self-authored `message:new` push to be treated as an echo of it.
    /// Policy parameter, deliberately tunable.
    pub echo_window: Duration,

    /// Interval for the background unread re-verification fetch.
    pub unread_verify_interval: Duration,

    /// Window after a local `clearUnread` during which a fetched unread
    /// count is considered stale and ignored.
    pub clear_grace: Duration,

    /// Page size for conversation-list and message-history fetches.
    pub page_limit: u32,

    /// Prefix for client-generated temp message ids.
    pub temp_id_prefix: String,

    /// Reconnect backoff: initial delay.
    pub reconnect_base: Duration,

    /// Reconnect backoff: cap on the exponential delay.
    pub reconnect_cap: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            echo_window: Duration::from_secs(10),
            unread_verify_interval: Duration::from_secs(30),
            clear_grace: Duration::from_secs(5),
            page_limit: DEFAULT_PAGE_LIMIT,
            temp_id_prefix: DEFAULT_TEMP_ID_PREFIX.to_string(),
            reconnect_base: Duration::from_millis(500),
            reconnect_cap: Duration::from_secs(30),
        }
    }
}

impl SyncConfig {
    /// Apply `CHATSYNC_*` env overrides on top of the defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(ms) = env_u64("CHATSYNC_ECHO_WINDOW_MS") {
            cfg.echo_window = Duration::from_millis(ms);
        }
        if let Some(secs) = env_u64("CHATSYNC_VERIFY_INTERVAL_SECS") {
            cfg.unread_verify_interval = Duration::from_secs(secs);
        }
        if let Some(limit) = env_u64("CHATSYNC_PAGE_LIMIT") {
            cfg.page_limit = (limit as u32).clamp(1, 500);
        }
        cfg
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
