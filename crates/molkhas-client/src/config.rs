//! Client configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the client can start with zero
//! configuration; the env overrides exist mainly for test rigs and
//! self-hosted deployments with unusual latency profiles.

use std::time::Duration;

use molkhas_shared::constants::{
    MESSAGE_PAGE_SIZE, NOTIFICATION_WINDOW, PRIVILEGE_CACHE_TTL_SECS, PRIVILEGE_CHECK_TIMEOUT_SECS,
};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Number of messages fetched per backfill page.
    /// Env: `MOLKHAS_MESSAGE_PAGE_SIZE`
    /// Default: `50`
    pub message_page_size: u32,

    /// Number of notifications held in the sliding window.
    /// Env: `MOLKHAS_NOTIFICATION_WINDOW`
    /// Default: `50`
    pub notification_window: u32,

    /// How long a resolved privilege flag stays valid before the backend
    /// is consulted again.
    /// Env: `MOLKHAS_PRIVILEGE_TTL_SECS`
    /// Default: 50 minutes.
    pub privilege_cache_ttl: Duration,

    /// Upper bound on a single privilege lookup. On expiry the user is
    /// treated as unprivileged rather than left waiting.
    /// Env: `MOLKHAS_PRIVILEGE_TIMEOUT_SECS`
    /// Default: 5 seconds.
    pub privilege_check_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            message_page_size: MESSAGE_PAGE_SIZE,
            notification_window: NOTIFICATION_WINDOW,
            privilege_cache_ttl: Duration::from_secs(PRIVILEGE_CACHE_TTL_SECS),
            privilege_check_timeout: Duration::from_secs(PRIVILEGE_CHECK_TIMEOUT_SECS),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("MOLKHAS_MESSAGE_PAGE_SIZE") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => config.message_page_size = n,
                _ => tracing::warn!(value = %val, "Invalid MOLKHAS_MESSAGE_PAGE_SIZE, using default"),
            }
        }

        if let Ok(val) = std::env::var("MOLKHAS_NOTIFICATION_WINDOW") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => config.notification_window = n,
                _ => tracing::warn!(value = %val, "Invalid MOLKHAS_NOTIFICATION_WINDOW, using default"),
            }
        }

        if let Ok(val) = std::env::var("MOLKHAS_PRIVILEGE_TTL_SECS") {
            if let Ok(n) = val.parse::<u64>() {
                config.privilege_cache_ttl = Duration::from_secs(n);
            }
        }

        if let Ok(val) = std::env::var("MOLKHAS_PRIVILEGE_TIMEOUT_SECS") {
            if let Ok(n) = val.parse::<u64>() {
                config.privilege_check_timeout = Duration::from_secs(n);
            }
        }

        config
    }
}
