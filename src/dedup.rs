//! Request deduplication for user-triggered actions.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::lock_unpoisoned;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A previous action from this guard has not finished yet.
    InFlight,
    /// The previous action started less than the minimum interval ago.
    TooSoon { remaining: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    Ran(T),
    Skipped(SkipReason),
}

impl<T> Attempt<T> {
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }
}

#[derive(Debug, Default)]
struct GuardState {
    in_flight: bool,
    last_started: Option<Instant>,
}

/// Rejects an action while a previous one is in flight or started too recently.
///
/// The in-flight flag covers the whole future, not only its synchronous start,
/// and is cleared even if the future is dropped before completing.
#[derive(Debug, Default)]
pub struct DedupGuard {
    state: Mutex<GuardState>,
}

impl DedupGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        lock_unpoisoned(&self.state).in_flight
    }

    pub async fn try_run<F, Fut, T>(&self, min_interval: Duration, action: F) -> Attempt<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        {
            let mut state = lock_unpoisoned(&self.state);
            if state.in_flight {
                return Attempt::Skipped(SkipReason::InFlight);
            }

            let now = Instant::now();
            if let Some(last_started) = state.last_started {
                let elapsed = now.saturating_duration_since(last_started);
                if elapsed < min_interval {
                    return Attempt::Skipped(SkipReason::TooSoon {
                        remaining: min_interval - elapsed,
                    });
                }
            }

            state.in_flight = true;
            state.last_started = Some(now);
        }

        let _in_flight = InFlightReset { state: &self.state };
        Attempt::Ran(action().await)
    }
}

struct InFlightReset<'a> {
    state: &'a Mutex<GuardState>,
}

impl Drop for InFlightReset<'_> {
    fn drop(&mut self) {
        lock_unpoisoned(self.state).in_flight = false;
    }
}
