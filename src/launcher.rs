//! Process launching for deployed services.
//!
//! Turns a validated [`Definition`] into exactly one supervised child process,
//! honoring the environment overlay, working directory and log redirection
//! contracts. Spawn is all-or-nothing: every precondition is checked before
//! the OS process is created.
use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    time::{Duration, Instant},
};

use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};
use tracing::{debug, warn};

use crate::{
    definition::{Definition, ExecSpec},
    error::SpawnError,
};

/// Shell used for `shell:` execution directives.
pub const SHELL: &str = "sh";

/// Grace period between SIGTERM and SIGKILL during termination.
pub const TERMINATION_GRACE: Duration = Duration::from_secs(1);

/// Poll interval while waiting for a signalled process to exit.
const TERMINATION_POLL: Duration = Duration::from_millis(50);

/// Owned handle to a live service process.
///
/// The handle is the only reaper of its child: dropping it without
/// [`ProcessHandle::terminate`] or a reap via [`ProcessHandle::try_wait`]
/// leaks a zombie, so the registry keeps handles until exit is observed.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: u32,
}

/// Outcome of a graceful-then-forceful termination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Process exited within the grace period after SIGTERM.
    Graceful,
    /// Process ignored SIGTERM and was killed with SIGKILL.
    Forced,
    /// Process was already gone when termination was requested.
    AlreadyExited,
}

impl ProcessHandle {
    /// OS process id of the child.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Non-blocking exit probe. Returns the exit status once the child has
    /// terminated and been reaped.
    pub fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Sends SIGTERM to the child's process group, waits out the grace
    /// period, then escalates to SIGKILL. Always reaps the child.
    pub fn terminate(mut self, grace: Duration) -> std::io::Result<Termination> {
        if let Some(status) = self.child.try_wait()? {
            debug!("Process {} already exited with {status:?}", self.pid);
            return Ok(Termination::AlreadyExited);
        }

        let pid = Pid::from_raw(self.pid as i32);

        // The child was placed in its own process group at spawn, so signal
        // the whole group to reach any grandchildren a shell spawned.
        let group = Pid::from_raw(-(self.pid as i32));
        match signal::kill(group, Signal::SIGTERM) {
            Ok(()) => {}
            Err(Errno::ESRCH) => {}
            Err(err) => {
                warn!(
                    "Failed to signal process group of {}: {err}; signalling pid directly",
                    self.pid
                );
                match signal::kill(pid, Signal::SIGTERM) {
                    Ok(()) | Err(Errno::ESRCH) => {}
                    Err(err) => {
                        return Err(std::io::Error::from_raw_os_error(err as i32));
                    }
                }
            }
        }

        let deadline = Instant::now() + grace;
        loop {
            if let Some(status) = self.child.try_wait()? {
                debug!("Process {} exited with {status:?} after SIGTERM", self.pid);
                return Ok(Termination::Graceful);
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(TERMINATION_POLL);
        }

        warn!(
            "Process {} did not exit within {:?}; sending SIGKILL",
            self.pid, grace
        );
        match signal::kill(group, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => return Err(std::io::Error::from_raw_os_error(err as i32)),
        }
        // Reap; wait() cannot hang after SIGKILL.
        self.child.wait()?;
        Ok(Termination::Forced)
    }
}

/// Constructs and starts one OS process for the given definition.
///
/// The child's environment is the daemon's own environment overlaid with
/// `definition.environment` (definition keys win). When `working_dir` is set
/// it must already exist; when `log_file_path` is set the file is opened in
/// create/append mode and both stdout and stderr are bound to it, so output
/// is visible incrementally while the process runs.
pub fn launch(definition: &Definition) -> Result<ProcessHandle, SpawnError> {
    let mut cmd = match &definition.exec {
        ExecSpec::Shell(line) => {
            let mut cmd = Command::new(SHELL);
            cmd.arg("-c").arg(line);
            cmd
        }
        ExecSpec::Command(argv) => {
            let mut cmd = Command::new(&argv[0]);
            cmd.args(&argv[1..]);
            cmd
        }
    };

    if let Some(dir) = &definition.working_dir {
        let path = Path::new(dir);
        if !path.is_dir() {
            return Err(SpawnError::WorkingDirUnavailable {
                service: definition.name.clone(),
                path: dir.clone(),
            });
        }
        cmd.current_dir(path);
    }

    for (key, value) in &definition.environment {
        cmd.env(key, value);
    }

    match &definition.log_file_path {
        Some(log_path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(PathBuf::from(log_path))
                .map_err(|source| SpawnError::LogFileUnavailable {
                    service: definition.name.clone(),
                    path: log_path.clone(),
                    source,
                })?;
            let stderr_file =
                file.try_clone()
                    .map_err(|source| SpawnError::LogFileUnavailable {
                        service: definition.name.clone(),
                        path: log_path.clone(),
                        source,
                    })?;
            cmd.stdout(Stdio::from(file));
            cmd.stderr(Stdio::from(stderr_file));
        }
        None => {
            cmd.stdout(Stdio::null());
            cmd.stderr(Stdio::null());
        }
    }

    // Own process group per service so termination can signal the whole
    // tree without touching the daemon's group.
    unsafe {
        use std::os::unix::process::CommandExt;
        cmd.pre_exec(|| {
            if libc::setpgid(0, 0) < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    debug!(
        "Launching service '{}' with {:?}",
        definition.name, definition.exec
    );

    let child = cmd.spawn().map_err(|source| SpawnError::StartFailed {
        service: definition.name.clone(),
        source,
    })?;

    let pid = child.id();
    debug!("Service '{}' started with PID {pid}", definition.name);

    Ok(ProcessHandle { child, pid })
}
