//! Background supervisor loop that observes service exits.
//!
//! The loop never blocks on a busy record: entries in the middle of a deploy
//! or stop are skipped and picked up on the next pass, so exit reaping cannot
//! delay client requests and vice versa.
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use tracing::debug;

use crate::registry::Registry;

/// Interval between supervisor passes over the registry.
pub const MONITOR_INTERVAL: Duration = Duration::from_millis(200);

/// Owns the supervisor thread for a [`Registry`].
#[derive(Debug)]
pub struct Monitor {
    registry: Arc<Registry>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Monitor {
    /// Creates a monitor for the given registry without starting it.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Ensures the background thread is running, spawning it if necessary.
    pub fn start(&self) {
        let mut handle_slot = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        let should_spawn = match handle_slot.as_ref() {
            Some(handle) => handle.is_finished(),
            None => true,
        };

        if should_spawn {
            debug!("Starting service monitoring thread");
            self.running.store(true, Ordering::SeqCst);

            let registry = Arc::clone(&self.registry);
            let running = Arc::clone(&self.running);
            *handle_slot = Some(thread::spawn(move || {
                Self::monitor_loop(registry, running);
            }));
        }
    }

    /// Signals the thread to exit and waits for it to finish.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = handle.join();
        }
    }

    fn monitor_loop(registry: Arc<Registry>, running: Arc<AtomicBool>) {
        while running.load(Ordering::SeqCst) {
            for (name, entry) in registry.entries_snapshot() {
                entry.reap(&name);
            }
            thread::sleep(MONITOR_INTERVAL);
        }
        debug!("Service monitoring thread exiting");
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
