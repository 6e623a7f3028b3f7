use std::{error::Error, os::unix::io::IntoRawFd, path::Path};

use nix::{sys::signal, unistd::Pid};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use convoy::{
    cli::{Cli, Commands, parse_args},
    config, logs,
    ipc::{self, IpcError, Request, Response},
    server::Server,
    status,
};

fn main() {
    let args = parse_args();
    init_logging(&args);

    // Report failures with their Display form; the default `Termination`
    // path would print the Debug representation.
    if let Err(err) = run(args) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run(args: Cli) -> Result<(), Box<dyn Error>> {
    match args.command {
        Commands::Daemon { file, daemonize } => {
            if daemon_running() {
                warn!("convoy daemon already running; aborting duplicate start");
                return Ok(());
            }

            if daemonize {
                daemonize_convoy()?;
            } else {
                register_signal_handler()?;
            }

            let mut server = Server::new(file.as_deref())?;
            if let Err(err) = server.run() {
                error!("Daemon exited with error: {err}");
                return Err(err.into());
            }
        }
        Commands::Deploy { file, names } => {
            let documents = config::load_definitions(file.as_deref())?;
            let selected: Vec<_> = if names.is_empty() {
                documents
            } else {
                for name in &names {
                    if !documents.iter().any(|doc| &doc.name == name) {
                        return Err(
                            format!("service '{name}' not found in definitions file")
                                .into(),
                        );
                    }
                }
                documents
                    .into_iter()
                    .filter(|doc| names.contains(&doc.name))
                    .collect()
            };

            for definition in selected {
                let response = ipc::send_request(&Request::Deploy { definition })?;
                if let Response::Deployed {
                    name,
                    pid,
                    run_count,
                } = response
                {
                    match pid {
                        Some(pid) => {
                            println!("deployed '{name}' (pid {pid}, run {run_count})")
                        }
                        None => println!("deployed '{name}' (completed, run {run_count})"),
                    }
                }
            }
        }
        Commands::Ps => {
            let response = ipc::send_request(&Request::List)?;
            if let Response::List(snapshots) = response {
                print!("{}", status::render_table(&snapshots));
            }
        }
        Commands::Status { name } => {
            let response = ipc::send_request(&Request::Status { name })?;
            if let Response::Status(snapshot) = response {
                print!("{}", status::render_detail(&snapshot));
            }
        }
        Commands::Stop { names } => {
            for name in names {
                let response = ipc::send_request(&Request::Stop { name })?;
                if let Response::Stopped { name } = response {
                    println!("stopped '{name}'");
                }
            }
        }
        Commands::Logs { name, lines } => {
            let response = ipc::send_request(&Request::Status { name: name.clone() })?;
            if let Response::Status(snapshot) = response {
                match snapshot.definition.log_file_path {
                    Some(path) => {
                        for line in logs::tail_file(Path::new(&path), lines)? {
                            println!("{line}");
                        }
                    }
                    None => warn!("Service '{name}' has no log file configured"),
                }
            }
        }
        Commands::Shutdown => match ipc::send_request(&Request::Shutdown) {
            Ok(_) => println!("daemon shutting down"),
            Err(IpcError::NotAvailable) => {
                warn!("No running convoy daemon found; skipping command");
                ipc::cleanup_runtime();
            }
            Err(err) => return Err(err.into()),
        },
    }

    Ok(())
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Checks whether a daemon is alive at the recorded PID. Stale runtime files
/// from a crashed daemon are cleaned up on the way.
fn daemon_running() -> bool {
    match ipc::read_daemon_pid() {
        Ok(Some(pid)) => {
            let target = Pid::from_raw(pid);
            match signal::kill(target, None) {
                Ok(_) => true,
                Err(nix::errno::Errno::ESRCH) => {
                    ipc::cleanup_runtime();
                    false
                }
                Err(err) => {
                    warn!("Failed to query daemon pid {pid}: {err}");
                    false
                }
            }
        }
        Ok(None) | Err(_) => false,
    }
}

fn daemonize_convoy() -> std::io::Result<()> {
    if unsafe { libc::fork() } > 0 {
        std::process::exit(0);
    }

    unsafe {
        libc::setsid();
    }

    if unsafe { libc::fork() } > 0 {
        std::process::exit(0);
    }

    unsafe {
        libc::setpgid(0, 0);
    }

    std::env::set_current_dir("/")?;
    let devnull = std::fs::File::open("/dev/null")?;
    let fd = devnull.into_raw_fd();
    unsafe {
        let _ = libc::dup2(fd, libc::STDIN_FILENO);
        let _ = libc::dup2(fd, libc::STDOUT_FILENO);
        let _ = libc::dup2(fd, libc::STDERR_FILENO);
        libc::close(fd);
    }

    Ok(())
}

/// Routes Ctrl-C through the daemon's own control socket so services are
/// stopped and runtime files removed on the normal shutdown path.
fn register_signal_handler() -> Result<(), Box<dyn Error>> {
    ctrlc::set_handler(move || {
        info!("convoy daemon interrupted; shutting down");
        match ipc::send_request(&Request::Shutdown) {
            Ok(_) => {}
            Err(_) => {
                ipc::cleanup_runtime();
                std::process::exit(1);
            }
        }
    })?;

    Ok(())
}
