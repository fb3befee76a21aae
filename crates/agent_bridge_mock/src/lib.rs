//! Deterministic in-memory implementations of the `agent_bridge` seams.
//!
//! This crate contains no host/platform transport logic and is intended for
//! local development and contract-level integration testing of the session core.

mod backend;
mod transport;

pub use backend::{BackendCall, CallKind, MockBackend};
pub use transport::MockTransport;

use std::sync::{Mutex, MutexGuard};

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
