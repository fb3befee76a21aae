//! Environment configuration.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_INACTIVITY_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_SEND_INTERVAL_MS: u64 = 500;
pub const DEFAULT_SWITCH_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_AUDIT_CAPACITY: usize = 100;
pub const DEFAULT_NOTICE_CAPACITY: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Silence window after which a thinking turn is forced back to idle.
    pub inactivity_timeout: Duration,
    /// Minimum spacing between two accepted prompt submissions.
    pub send_interval: Duration,
    /// Longest a confirmed mode switch may wait for the backend to report back.
    pub switch_timeout: Duration,
    pub audit_capacity: usize,
    pub notice_capacity: usize,
    pub log_filter: Option<String>,
    /// Directory holding `.ide/preferences.json`; preferences are disabled when unset.
    pub config_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(DEFAULT_INACTIVITY_TIMEOUT_SECS),
            send_interval: Duration::from_millis(DEFAULT_SEND_INTERVAL_MS),
            switch_timeout: Duration::from_secs(DEFAULT_SWITCH_TIMEOUT_SECS),
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
            notice_capacity: DEFAULT_NOTICE_CAPACITY,
            log_filter: None,
            config_dir: None,
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(env_u64_or(
                "IDE_SESSION_INACTIVITY_TIMEOUT_SECS",
                DEFAULT_INACTIVITY_TIMEOUT_SECS,
            )),
            send_interval: Duration::from_millis(env_u64_or(
                "IDE_SESSION_SEND_INTERVAL_MS",
                DEFAULT_SEND_INTERVAL_MS,
            )),
            switch_timeout: Duration::from_secs(env_u64_or(
                "IDE_SESSION_SWITCH_TIMEOUT_SECS",
                DEFAULT_SWITCH_TIMEOUT_SECS,
            )),
            audit_capacity: env_usize_or("IDE_SESSION_AUDIT_CAPACITY", DEFAULT_AUDIT_CAPACITY),
            notice_capacity: env_usize_or("IDE_SESSION_NOTICE_CAPACITY", DEFAULT_NOTICE_CAPACITY),
            log_filter: env_string_opt("IDE_SESSION_LOG"),
            config_dir: env_string_opt("IDE_SESSION_CONFIG_DIR").map(PathBuf::from),
        }
    }

    /// Location of the preferences file, when a config directory is set.
    #[must_use]
    pub fn prefs_path(&self) -> Option<PathBuf> {
        self.config_dir.as_deref().map(prefs_store::prefs_file)
    }
}

fn env_u64_or(key: &str, default: u64) -> u64 {
    env_string_opt(key)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize_or(key: &str, default: usize) -> usize {
    env_string_opt(key)
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}
