#[path = "common/mod.rs"]
mod common;

use std::{collections::HashMap, os::unix::net::UnixListener, sync::Arc, thread};

use convoy::{
    definition::RawDefinition,
    error::ErrorKind,
    ipc::{IpcError, Request, Response},
    registry::{Registry, ServiceState},
    server,
};
use tempfile::tempdir;

fn raw_shell(name: &str, shell: &str) -> RawDefinition {
    RawDefinition {
        kind: "Service".into(),
        name: name.into(),
        command: None,
        shell: Some(shell.into()),
        environment: HashMap::new(),
        working_dir: None,
        log_file_path: None,
    }
}

/// Runs a daemon loop on a socket in a tempdir, returning the socket path,
/// the shared registry and the join handle.
fn spawn_daemon(
    dir: &std::path::Path,
) -> (std::path::PathBuf, Arc<Registry>, thread::JoinHandle<()>) {
    let socket = dir.join("control.sock");
    let listener = UnixListener::bind(&socket).unwrap();
    let registry = Arc::new(Registry::new());
    let server_registry = Arc::clone(&registry);
    let handle = thread::spawn(move || server::serve_on(listener, server_registry));
    (socket, registry, handle)
}

#[test]
fn deploy_status_stop_round_trip() {
    let temp = tempdir().unwrap();
    let (socket, _registry, handle) = spawn_daemon(temp.path());

    let response = server::request_on(
        &socket,
        &Request::Deploy {
            definition: raw_shell("web", "sleep 60"),
        },
    )
    .unwrap();
    let Response::Deployed { name, pid, run_count } = response else {
        panic!("expected deployed response, got {response:?}");
    };
    assert_eq!(name, "web");
    assert_eq!(run_count, 1);
    let pid = pid.expect("long-running service should report a pid");
    assert!(common::is_process_alive(pid));

    let response =
        server::request_on(&socket, &Request::Status { name: "web".into() }).unwrap();
    let Response::Status(snapshot) = response else {
        panic!("expected status response");
    };
    assert_eq!(snapshot.state, ServiceState::Running);
    assert_eq!(snapshot.pid, Some(pid));

    let response =
        server::request_on(&socket, &Request::Stop { name: "web".into() }).unwrap();
    assert!(matches!(response, Response::Stopped { .. }));
    common::wait_for_process_exit(pid);

    let response = server::request_on(&socket, &Request::Shutdown).unwrap();
    assert!(matches!(response, Response::ShuttingDown));
    handle.join().unwrap();
}

#[test]
fn errors_carry_protocol_kinds() {
    let temp = tempdir().unwrap();
    let (socket, _registry, handle) = spawn_daemon(temp.path());

    let err = server::request_on(
        &socket,
        &Request::Status {
            name: "ghost".into(),
        },
    )
    .unwrap_err();
    let IpcError::Server { kind, message } = err else {
        panic!("expected server error, got {err:?}");
    };
    assert_eq!(kind, ErrorKind::NotFound);
    assert!(message.contains("ghost"));

    let mut invalid = raw_shell("bad", "true");
    invalid.shell = None;
    let err = server::request_on(&socket, &Request::Deploy { definition: invalid })
        .unwrap_err();
    let IpcError::Server { kind, .. } = err else {
        panic!("expected server error, got {err:?}");
    };
    assert_eq!(kind, ErrorKind::Validation);

    let err = server::request_on(
        &socket,
        &Request::Deploy {
            definition: raw_shell("crasher", "exit 7"),
        },
    )
    .unwrap_err();
    let IpcError::Server { kind, .. } = err else {
        panic!("expected server error, got {err:?}");
    };
    assert_eq!(kind, ErrorKind::Spawn);

    server::request_on(&socket, &Request::Shutdown).unwrap();
    handle.join().unwrap();
}

#[test]
fn list_reports_services_in_name_order() {
    let temp = tempdir().unwrap();
    let (socket, _registry, handle) = spawn_daemon(temp.path());

    for name in ["zeta", "alpha"] {
        server::request_on(
            &socket,
            &Request::Deploy {
                definition: raw_shell(name, "true"),
            },
        )
        .unwrap();
    }

    let Response::List(snapshots) =
        server::request_on(&socket, &Request::List).unwrap()
    else {
        panic!("expected list response");
    };
    let names: Vec<_> = snapshots.into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["alpha", "zeta"]);

    server::request_on(&socket, &Request::Shutdown).unwrap();
    handle.join().unwrap();
}

#[test]
fn shutdown_stops_running_services() {
    let temp = tempdir().unwrap();
    let (socket, registry, handle) = spawn_daemon(temp.path());

    let Response::Deployed { pid: Some(pid), .. } = server::request_on(
        &socket,
        &Request::Deploy {
            definition: raw_shell("svc", "sleep 60"),
        },
    )
    .unwrap() else {
        panic!("expected running deploy");
    };

    server::request_on(&socket, &Request::Shutdown).unwrap();
    handle.join().unwrap();

    common::wait_for_process_exit(pid);
    assert_eq!(
        registry.snapshot("svc").unwrap().state,
        ServiceState::Stopped
    );
}

#[test]
fn redeploy_through_the_protocol_replaces_the_process() {
    let temp = tempdir().unwrap();
    let (socket, _registry, handle) = spawn_daemon(temp.path());

    let Response::Deployed { pid: Some(old_pid), .. } = server::request_on(
        &socket,
        &Request::Deploy {
            definition: raw_shell("svc", "sleep 60"),
        },
    )
    .unwrap() else {
        panic!("expected running deploy");
    };

    let Response::Deployed {
        pid: Some(new_pid),
        run_count,
        ..
    } = server::request_on(
        &socket,
        &Request::Deploy {
            definition: raw_shell("svc", "sleep 60"),
        },
    )
    .unwrap() else {
        panic!("expected running redeploy");
    };

    assert_ne!(old_pid, new_pid);
    assert_eq!(run_count, 2);
    common::wait_for_process_exit(old_pid);

    server::request_on(&socket, &Request::Shutdown).unwrap();
    handle.join().unwrap();
}
