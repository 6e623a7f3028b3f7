//! Single source of truth for service state inside the daemon.
//!
//! The registry maps service names to records and serializes all mutations
//! per name: a deploy and a stop for the same service never interleave, while
//! operations on different names proceed independently. The outer map lock is
//! held only long enough to look up or insert an entry; the long-running
//! spawn/terminate work happens under the per-entry lock.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    definition::Definition,
    error::{DaemonError, SpawnError},
    launcher::{self, ProcessHandle, TERMINATION_GRACE},
};

/// How long a new process must stay alive before it is confirmed running.
pub const STARTUP_CONFIRMATION: Duration = Duration::from_millis(250);

/// Polling interval used while confirming a launch.
const START_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Lifecycle state of a deployed service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ServiceState {
    /// Record created, launch not yet confirmed.
    Pending,
    /// OS process confirmed alive.
    Running,
    /// Process terminated on its own with the given exit code.
    Exited {
        /// Exit code reported by the OS.
        code: i32,
    },
    /// Launch failed, or the process was killed by a signal outside of an
    /// explicit stop request.
    Failed {
        /// Human-readable failure description.
        reason: String,
    },
    /// Process terminated because of an explicit stop or redeploy request.
    Stopped,
}

/// Mutable per-service record, owned exclusively by the registry.
#[derive(Debug)]
struct ServiceRecord {
    definition: Definition,
    state: ServiceState,
    handle: Option<ProcessHandle>,
    run_count: u32,
    since: DateTime<Utc>,
}

/// One registry slot; the inner mutex serializes all mutations for the name.
#[derive(Debug)]
pub(crate) struct ServiceEntry {
    record: Mutex<ServiceRecord>,
}

/// Read-only copy of a record handed out to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    /// Service name.
    pub name: String,
    /// Most recently accepted definition.
    pub definition: Definition,
    /// Current lifecycle state.
    pub state: ServiceState,
    /// PID of the live process, present only while running.
    pub pid: Option<u32>,
    /// Successful launches under the current name.
    pub run_count: u32,
    /// Timestamp of the last state transition.
    pub since: DateTime<Utc>,
}

/// Result of a deploy that did not error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployOutcome {
    /// The process was confirmed alive and is being supervised.
    Running {
        /// PID of the supervised process.
        pid: u32,
    },
    /// The process ran to successful completion before confirmation; typical
    /// for one-shot services.
    Completed {
        /// Exit code (always zero).
        exit_code: i32,
    },
}

/// Name-keyed map of service records.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Mutex<HashMap<String, Arc<ServiceEntry>>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `name`, creating a `Pending` record when absent.
    fn entry_for_deploy(&self, definition: &Definition) -> Arc<ServiceEntry> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(entries.entry(definition.name.clone()).or_insert_with(|| {
            Arc::new(ServiceEntry {
                record: Mutex::new(ServiceRecord {
                    definition: definition.clone(),
                    state: ServiceState::Pending,
                    handle: None,
                    run_count: 0,
                    since: Utc::now(),
                }),
            })
        }))
    }

    fn entry(&self, name: &str) -> Option<Arc<ServiceEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// All entries, for the supervisor loop.
    pub(crate) fn entries_snapshot(&self) -> Vec<(String, Arc<ServiceEntry>)> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(name, entry)| (name.clone(), Arc::clone(entry)))
            .collect()
    }

    /// Idempotent upsert: accepts the definition, stops any running
    /// predecessor, launches the new process and waits until it is either
    /// confirmed running or has completed successfully.
    pub fn deploy(&self, definition: Definition) -> Result<DeployOutcome, DaemonError> {
        let entry = self.entry_for_deploy(&definition);
        let mut record = entry.record.lock()?;

        if let Some(handle) = record.handle.take() {
            info!(
                "Service '{}' is running; stopping previous instance before redeploy",
                definition.name
            );
            if let Err(source) = handle.terminate(TERMINATION_GRACE) {
                return Err(Self::mark_stop_failed(&mut record, &definition.name, source));
            }
            record.state = ServiceState::Stopped;
        }

        record.definition = definition.clone();
        record.state = ServiceState::Pending;
        record.since = Utc::now();

        let mut handle = match launcher::launch(&definition) {
            Ok(handle) => handle,
            Err(err) => {
                record.state = ServiceState::Failed {
                    reason: err.to_string(),
                };
                record.since = Utc::now();
                return Err(err.into());
            }
        };

        record.run_count += 1;
        let pid = handle.pid();

        // Confirm the process survives the startup window, or reap an early
        // exit. One-shot services that exit zero resolve the deploy
        // successfully; non-zero early exits surface as spawn errors.
        let confirmed_at = Instant::now() + STARTUP_CONFIRMATION;
        loop {
            match handle.try_wait().map_err(|source| SpawnError::StartFailed {
                service: definition.name.clone(),
                source,
            })? {
                Some(status) => {
                    let code = status.code().unwrap_or(-1);
                    if status.success() {
                        debug!("Service '{}' completed immediately", definition.name);
                        record.state = ServiceState::Exited { code: 0 };
                        record.since = Utc::now();
                        return Ok(DeployOutcome::Completed { exit_code: 0 });
                    }

                    record.state = ServiceState::Exited { code };
                    record.since = Utc::now();
                    return Err(SpawnError::ExitedDuringStartup {
                        service: definition.name.clone(),
                        reason: format!("process exited with status {code}"),
                    }
                    .into());
                }
                None if Instant::now() >= confirmed_at => {
                    record.state = ServiceState::Running;
                    record.handle = Some(handle);
                    record.since = Utc::now();
                    info!("Service '{}' running with PID {pid}", definition.name);
                    return Ok(DeployOutcome::Running { pid });
                }
                None => std::thread::sleep(START_POLL_INTERVAL),
            }
        }
    }

    /// Read-only snapshot of a single record.
    pub fn snapshot(&self, name: &str) -> Result<ServiceSnapshot, DaemonError> {
        let entry = self
            .entry(name)
            .ok_or_else(|| DaemonError::NotFound(name.to_string()))?;
        let record = entry.record.lock()?;
        Ok(Self::snapshot_record(name, &record))
    }

    /// Requests graceful-then-forceful termination and marks the record
    /// `Stopped`.
    pub fn stop(&self, name: &str) -> Result<(), DaemonError> {
        let entry = self
            .entry(name)
            .ok_or_else(|| DaemonError::NotFound(name.to_string()))?;
        let mut record = entry.record.lock()?;

        if let Some(handle) = record.handle.take() {
            let pid = handle.pid();
            match handle.terminate(TERMINATION_GRACE) {
                Ok(outcome) => {
                    debug!("Stopped service '{name}' (PID {pid}): {outcome:?}")
                }
                Err(source) => {
                    return Err(Self::mark_stop_failed(&mut record, name, source));
                }
            }
        } else {
            debug!("Service '{name}' has no live process; marking stopped");
        }

        record.state = ServiceState::Stopped;
        record.since = Utc::now();
        Ok(())
    }

    /// Snapshot of all known services, ordered by name.
    pub fn list(&self) -> Vec<ServiceSnapshot> {
        let mut snapshots: Vec<ServiceSnapshot> = self
            .entries_snapshot()
            .into_iter()
            .filter_map(|(name, entry)| {
                entry
                    .record
                    .lock()
                    .ok()
                    .map(|record| Self::snapshot_record(&name, &record))
            })
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Stops every service with a live process. Used at daemon shutdown.
    pub fn stop_all(&self) {
        for (name, _) in self.entries_snapshot() {
            if let Err(err) = self.stop(&name) {
                warn!("Failed to stop service '{name}' during shutdown: {err}");
            }
        }
    }

    /// Records a failed termination attempt. The handle has already been
    /// taken, so the record must not stay `Running`; the process may still
    /// be alive but is no longer tracked.
    fn mark_stop_failed(
        record: &mut ServiceRecord,
        service: &str,
        source: std::io::Error,
    ) -> DaemonError {
        record.state = ServiceState::Failed {
            reason: format!("failed to stop process: {source}"),
        };
        record.since = Utc::now();
        DaemonError::StopFailed {
            service: service.to_string(),
            source,
        }
    }

    fn snapshot_record(name: &str, record: &ServiceRecord) -> ServiceSnapshot {
        ServiceSnapshot {
            name: name.to_string(),
            definition: record.definition.clone(),
            state: record.state.clone(),
            pid: record.handle.as_ref().map(ProcessHandle::pid),
            run_count: record.run_count,
            since: record.since,
        }
    }
}

impl ServiceEntry {
    /// Non-blocking reap used by the supervisor loop. Skips entries busy in a
    /// deploy or stop, and updates state when a running process has exited.
    pub(crate) fn reap(&self, name: &str) {
        let Ok(mut record) = self.record.try_lock() else {
            return;
        };

        if record.state != ServiceState::Running {
            return;
        }

        let Some(handle) = record.handle.as_mut() else {
            // Running without a handle violates the registry invariant.
            warn!("Service '{name}' marked running without a process handle");
            record.state = ServiceState::Failed {
                reason: "lost process handle".into(),
            };
            record.since = Utc::now();
            return;
        };

        match handle.try_wait() {
            Ok(Some(status)) => {
                record.handle = None;
                record.since = Utc::now();
                match status.code() {
                    Some(code) => {
                        info!("Service '{name}' exited with code {code}");
                        record.state = ServiceState::Exited { code };
                    }
                    None => {
                        use std::os::unix::process::ExitStatusExt;
                        let signal = status.signal().unwrap_or(0);
                        warn!("Service '{name}' was terminated by signal {signal}");
                        record.state = ServiceState::Failed {
                            reason: format!("terminated by signal {signal}"),
                        };
                    }
                }
            }
            Ok(None) => {}
            Err(err) => warn!("Failed to probe service '{name}': {err}"),
        }
    }
}
