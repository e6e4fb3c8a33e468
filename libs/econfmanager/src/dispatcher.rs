//! Notification dispatcher
//!
//! Per-parameter callback lists. `fire` runs every callback registered for
//! the id in registration order, on the calling task, against a snapshot of
//! the list; callbacks may register or unregister from inside a callback.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::catalog::ParameterId;
use crate::error::EconfError;
use crate::value::ParameterValue;

/// Change callback; an `Err` is logged and does not stop sibling callbacks
pub type Callback = Arc<dyn Fn(ParameterId, &ParameterValue) -> anyhow::Result<()> + Send + Sync>;

/// Returned by `register`, used to remove exactly that registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationHandle {
    id: ParameterId,
    seq: u64,
}

impl RegistrationHandle {
    pub fn id(&self) -> ParameterId {
        self.id
    }
}

/// Outcome of one `fire`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FireReport {
    pub invoked: usize,
    pub failed: usize,
}

struct Registration {
    seq: u64,
    callback: Callback,
}

#[derive(Default)]
pub struct Dispatcher {
    callbacks: Mutex<HashMap<ParameterId, Vec<Registration>>>,
    next_seq: AtomicU64,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let callbacks = self.callbacks.lock();
        f.debug_struct("Dispatcher")
            .field("ids", &callbacks.len())
            .field("callbacks", &callbacks.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, id: ParameterId, callback: F) -> RegistrationHandle
    where
        F: Fn(ParameterId, &ParameterValue) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .lock()
            .entry(id)
            .or_default()
            .push(Registration {
                seq,
                callback: Arc::new(callback),
            });
        debug!("Callback #{} registered for {}", seq, id);
        RegistrationHandle { id, seq }
    }

    /// Remove one registration; false if it was already gone
    pub fn unregister(&self, handle: RegistrationHandle) -> bool {
        let mut callbacks = self.callbacks.lock();
        let Some(list) = callbacks.get_mut(&handle.id) else {
            return false;
        };
        let before = list.len();
        list.retain(|r| r.seq != handle.seq);
        let removed = list.len() != before;
        if list.is_empty() {
            callbacks.remove(&handle.id);
        }
        removed
    }

    /// Remove every callback for `id`, returning how many were removed
    pub fn clear(&self, id: ParameterId) -> usize {
        self.callbacks
            .lock()
            .remove(&id)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    pub fn count(&self, id: ParameterId) -> usize {
        self.callbacks.lock().get(&id).map(Vec::len).unwrap_or(0)
    }

    pub fn fire(&self, id: ParameterId, value: &ParameterValue) -> FireReport {
        let snapshot: Vec<Callback> = match self.callbacks.lock().get(&id) {
            Some(list) => list.iter().map(|r| Arc::clone(&r.callback)).collect(),
            None => return FireReport::default(),
        };

        let mut report = FireReport::default();
        for callback in snapshot {
            report.invoked += 1;
            let reason = match catch_unwind(AssertUnwindSafe(|| callback(id, value))) {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(payload) => panic_message(payload.as_ref()),
            };
            report.failed += 1;
            warn!("{}", EconfError::Callback { id, reason });
        }
        report
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
