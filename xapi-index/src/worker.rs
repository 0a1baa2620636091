//! Debounced background workers: committer, fsyncher,
//! db-updater and trigger-replication all share the same shape — a loop
//! that sleeps, wakes on either a signal or its timeout, and collapses
//! any number of pending signals for a database into at most one
//! in-flight action.
//!
//! The source keys each worker by database path and coalesces repeated
//! wake-ups; here that coalescing is a `HashSet<String>` of pending
//! paths drained each tick, so "all committers collapse to at most one
//! in-flight commit per database" falls out of set semantics
//! rather than needing per-database dedup bookkeeping.

use crate::config::WorkerTimeouts;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// What a debounced worker does once it decides to fire for a database
/// path. Implemented per role (commit, fsync, propagate a db-updater
/// notification, trigger replication) by the caller; this module only
/// owns the scheduling.
pub trait DebouncedAction: Send {
    fn run(&mut self, db_path: &str);
}

/// A running debounced worker's control handle: `signal` wakes it for a
/// path, `stop` asks it to drain and exit (a `running/finished`
/// flag plus per-iteration cancellation check).
pub struct WorkerHandle {
    signal_tx: Sender<String>,
    stop_tx: Sender<()>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn signal(&self, db_path: impl Into<String>) {
        let _ = self.signal_tx.send(db_path.into());
    }

    /// Requests the worker finish its current batch and exit, then blocks
    /// until it has. No task is interrupted mid-call.
    pub fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Spawns a debounced worker thread implementing `timeouts`'s schedule,
/// running `action.run(path)` for each distinct signalled path once its
/// debounce window elapses (or `max_force` is hit for a continuously
/// busy path).
pub fn spawn(name: &'static str, timeouts: WorkerTimeouts, mut action: impl DebouncedAction + 'static) -> WorkerHandle {
    let (signal_tx, signal_rx): (Sender<String>, Receiver<String>) = bounded(4096);
    let (stop_tx, stop_rx) = bounded(1);

    let join = std::thread::Builder::new()
        .name(name.into())
        .spawn(move || run_loop(timeouts, &signal_rx, &stop_rx, &mut action))
        .expect("failed to spawn debounced worker thread");

    WorkerHandle { signal_tx, stop_tx, join: Some(join) }
}

fn run_loop(
    timeouts: WorkerTimeouts,
    signal_rx: &Receiver<String>,
    stop_rx: &Receiver<()>,
    action: &mut dyn DebouncedAction,
) {
    let mut pending: HashSet<String> = HashSet::new();
    let mut activity: std::collections::HashMap<String, crate::database::DebounceState> = Default::default();

    loop {
        if stop_rx.try_recv().is_ok() {
            break;
        }

        let wait = timeouts.throttle.max(Duration::from_millis(1));
        match signal_rx.recv_timeout(wait) {
            Ok(path) => {
                let now = Instant::now();
                activity.entry(path.clone()).or_insert_with(|| crate::database::DebounceState::new(now)).touch(now);
                pending.insert(path);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        let mut fired = Vec::new();
        for path in &pending {
            let state = activity.get(path).copied().unwrap_or_else(|| crate::database::DebounceState::new(now));
            if state.should_flush(now, timeouts.debounce, timeouts.busy, timeouts.min_force, timeouts.max_force) {
                fired.push(path.clone());
            }
        }
        for path in fired {
            pending.remove(&path);
            if let Some(state) = activity.get_mut(&path) {
                state.mark_flushed(now);
            }
            action.run(&path);
        }
    }

    // Drain: run any path still pending before the thread exits, matching
    // "after a pool is asked to finish, all threads drain and exit".
    for path in pending {
        action.run(&path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct RecordingAction(Arc<Mutex<Vec<String>>>);
    impl DebouncedAction for RecordingAction {
        fn run(&mut self, db_path: &str) {
            self.0.lock().unwrap().push(db_path.to_string());
        }
    }

    #[test]
    fn signalled_path_eventually_fires_and_drains_on_stop() {
        let runs = Arc::new(Mutex::new(Vec::new()));
        let timeouts = WorkerTimeouts::millis(0, 5, 10, 5, 10);
        let handle = spawn("test-committer", timeouts, RecordingAction(runs.clone()));
        handle.signal("idx/one");
        handle.stop();
        assert!(runs.lock().unwrap().contains(&"idx/one".to_string()));
    }
}
