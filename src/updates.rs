//! Application update checks with bounded retry for network failures.

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use agent_bridge::{
    AgentBackend, BackendError, BackendEvent, UpdateError, UpdateInfo, UPDATE_EVENTS,
};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::channel::{EventChannel, TypedHandler};
use crate::error::SessionError;
use crate::store::{NoticeLevel, StoreHandle, UpdateStatus};

/// Total attempts for one update check, including the first.
pub const MAX_ATTEMPTS: u32 = 3;
/// Delay before the first retry; doubles for each retry after that.
pub const BASE_DELAY_MS: u64 = 1000;

fn network_error_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(concat!(
            r"(?i)network|timed?.?out|connection|dns|unreachable|offline|",
            r"failed to fetch|error sending request",
        ))
        .expect("network error regex must compile")
    })
}

/// Whether a backend error message describes a transient network failure.
pub fn is_network_error(message: &str) -> bool {
    network_error_regex().is_match(message)
}

/// Backoff before retry number `retry` (zero-based).
pub fn retry_delay(retry: u32) -> Duration {
    let exponent = retry.min(30);
    Duration::from_millis(BASE_DELAY_MS * 2u64.saturating_pow(exponent))
}

pub struct UpdateChecker {
    store: StoreHandle,
    backend: Arc<dyn AgentBackend>,
    channel: EventChannel,
}

impl UpdateChecker {
    pub fn new(
        store: StoreHandle,
        backend: Arc<dyn AgentBackend>,
        channel: EventChannel,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            backend,
            channel,
        })
    }

    /// Current status as recorded in the store.
    #[must_use]
    pub fn status(&self) -> UpdateStatus {
        self.store.read(|store| store.update_status().clone())
    }

    pub async fn attach(self: &Arc<Self>) -> usize {
        let checker: Weak<Self> = Arc::downgrade(self);
        let handler: TypedHandler = Arc::new(move |event| {
            if let Some(checker) = checker.upgrade() {
                checker.apply(event);
            }
        });

        self.channel.subscribe_all(UPDATE_EVENTS, handler).await
    }

    pub fn apply(&self, event: BackendEvent) {
        if !self.channel.is_alive() {
            return;
        }

        match event {
            BackendEvent::UpdateProgress(progress) => {
                self.set_status(UpdateStatus::Downloading(Some(progress)));
            }
            BackendEvent::UpdateFailed(error) => {
                warn!(code = %error.code, reason = %error.message, "update failed");
                self.store.update(|store| {
                    store.push_notice(
                        NoticeLevel::Error,
                        format!("Update failed: {}", error.message),
                    );
                    store.set_update_status(UpdateStatus::Failed(error));
                });
            }
            other => debug!(event = ?other, "not an update event; ignoring"),
        }
    }

    /// Asks the backend for a newer release.
    ///
    /// Network-classified failures are retried with exponential backoff, up to
    /// [`MAX_ATTEMPTS`] calls in total; anything else fails immediately.
    pub async fn check(&self) -> Result<Option<UpdateInfo>, SessionError> {
        self.set_status(UpdateStatus::Checking);

        let mut attempt = 1;
        loop {
            match self.backend.check_for_updates().await {
                Ok(update) => {
                    match &update {
                        Some(info) => {
                            info!(version = %info.version, "update available");
                            self.set_status(UpdateStatus::Available(info.clone()));
                        }
                        None => self.set_status(UpdateStatus::UpToDate),
                    }
                    return Ok(update);
                }
                Err(error) if attempt < MAX_ATTEMPTS && is_network_error(error.message()) => {
                    let delay = retry_delay(attempt - 1);
                    warn!(attempt, ?delay, %error, "update check failed; retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    warn!(attempt, %error, "update check failed");
                    return Err(self.fail("check_for_updates", "CHECK_FAILED", error));
                }
            }
        }
    }

    pub async fn download(&self) -> Result<(), SessionError> {
        self.set_status(UpdateStatus::Downloading(None));
        match self.backend.download_update().await {
            Ok(()) => {
                self.set_status(UpdateStatus::ReadyToInstall);
                Ok(())
            }
            Err(error) => Err(self.fail("download_update", "DOWNLOAD_FAILED", error)),
        }
    }

    pub async fn install(&self) -> Result<(), SessionError> {
        self.set_status(UpdateStatus::Installing);
        match self.backend.install_update().await {
            Ok(()) => Ok(()),
            Err(error) => Err(self.fail("install_update", "INSTALL_FAILED", error)),
        }
    }

    pub fn teardown(&self) -> usize {
        self.channel.close()
    }

    fn fail(&self, operation: &'static str, code: &str, error: BackendError) -> SessionError {
        let retryable = is_network_error(error.message());
        self.store.update(|store| {
            store.set_update_status(UpdateStatus::Failed(UpdateError {
                code: code.to_string(),
                message: error.message().to_string(),
                retryable,
            }));
            store.push_notice(
                NoticeLevel::Error,
                format!("Update failed: {}", error.message()),
            );
        });
        SessionError::backend(operation, error)
    }

    fn set_status(&self, status: UpdateStatus) {
        self.store.update(|store| store.set_update_status(status));
    }
}
