use std::sync::Mutex;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::lock_unpoisoned;

#[derive(Default)]
struct WatchdogState {
    generation: u64,
    task: Option<JoinHandle<()>>,
}

/// Single-shot deadline timer, used for agent inactivity and stalled mode switches.
///
/// Every `arm` or `disarm` bumps a generation; an expiry callback only counts
/// if [`DeadlineTimer::claim`] still sees its own generation, so a timer
/// that raced with a re-arm is a no-op.
pub(crate) struct DeadlineTimer {
    timeout: Duration,
    state: Mutex<WatchdogState>,
}

impl DeadlineTimer {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            state: Mutex::new(WatchdogState::default()),
        }
    }

    pub(crate) fn arm<F>(&self, on_expire: F)
    where
        F: FnOnce(u64) + Send + 'static,
    {
        let mut state = lock_unpoisoned(&self.state);
        state.generation += 1;
        let generation = state.generation;
        if let Some(task) = state.task.take() {
            task.abort();
        }

        let Ok(runtime) = Handle::try_current() else {
            warn!("no async runtime; deadline timer stays disarmed");
            return;
        };

        let timeout = self.timeout;
        state.task = Some(runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            on_expire(generation);
        }));
    }

    pub(crate) fn disarm(&self) {
        let mut state = lock_unpoisoned(&self.state);
        state.generation += 1;
        if let Some(task) = state.task.take() {
            task.abort();
        }
    }

    /// Consumes the expiry for `generation`. Returns false if the timer was
    /// re-armed or disarmed after this expiry was scheduled.
    pub(crate) fn claim(&self, generation: u64) -> bool {
        let mut state = lock_unpoisoned(&self.state);
        if state.generation != generation || state.task.is_none() {
            return false;
        }

        state.generation += 1;
        state.task = None;
        true
    }

    pub(crate) fn is_armed(&self) -> bool {
        lock_unpoisoned(&self.state).task.is_some()
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}
