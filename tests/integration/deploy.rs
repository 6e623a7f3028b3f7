#[path = "common/mod.rs"]
mod common;

use std::fs;

use convoy::{
    config,
    definition::Definition,
    error::{DaemonError, ValidationError},
    registry::{DeployOutcome, Registry, ServiceState},
};
use tempfile::tempdir;

#[test]
fn deploys_every_service_from_a_definitions_file() {
    let temp = tempdir().unwrap();
    let dir = temp.path();

    let path = dir.join("convoy.yaml");
    fs::write(
        &path,
        r#"
kind: Service
name: batch
shell: "true"
---
kind: Service
name: web
shell: "sleep 30"
"#,
    )
    .unwrap();

    let registry = Registry::new();
    for definition in config::load_validated(Some(path.to_str().unwrap())).unwrap() {
        registry.deploy(definition).unwrap();
    }

    let names: Vec<_> = registry.list().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["batch", "web"]);

    assert_eq!(
        registry.snapshot("batch").unwrap().state,
        ServiceState::Exited { code: 0 }
    );
    assert_eq!(
        registry.snapshot("web").unwrap().state,
        ServiceState::Running
    );

    registry.stop("web").unwrap();
}

#[test]
fn one_shot_deploy_runs_exactly_once() {
    let temp = tempdir().unwrap();
    let marker = temp.path().join("runs.log");

    let registry = Registry::new();
    let definition = Definition::try_from_raw(
        config::parse_definitions(&format!(
            "kind: Service\nname: once\nshell: \"echo ran >> {}\"",
            marker.display()
        ))
        .unwrap()
        .remove(0),
    )
    .unwrap();

    let outcome = registry.deploy(definition).unwrap();
    assert_eq!(outcome, DeployOutcome::Completed { exit_code: 0 });

    let snap = registry.snapshot("once").unwrap();
    assert_eq!(snap.run_count, 1);
    assert_eq!(fs::read_to_string(&marker).unwrap(), "ran\n");
}

#[test]
fn invalid_documents_are_rejected_before_launch() {
    let both = config::parse_definitions(
        r#"
kind: Service
name: bad
command: "true"
shell: "true"
"#,
    )
    .unwrap()
    .remove(0);

    assert!(matches!(
        Definition::try_from_raw(both),
        Err(ValidationError::AmbiguousExecDirective(_))
    ));

    let nameless = config::parse_definitions("kind: Service\nshell: \"true\"")
        .unwrap()
        .remove(0);
    assert!(matches!(
        Definition::try_from_raw(nameless),
        Err(ValidationError::MissingField("name"))
    ));
}

#[test]
fn rejected_deploy_leaves_no_record_behind() {
    let registry = Registry::new();

    // Validation happens before the registry is touched, so a bad document
    // never creates an entry.
    let raw = config::parse_definitions("kind: Service\nname: broken")
        .unwrap()
        .remove(0);
    assert!(Definition::try_from_raw(raw).is_err());
    assert!(registry.list().is_empty());
}

#[test]
fn failed_launch_is_reported_and_recorded() {
    let registry = Registry::new();
    let definition = Definition::try_from_raw(
        config::parse_definitions(
            "kind: Service\nname: broken\ncommand: [\"convoy-no-such-binary\"]",
        )
        .unwrap()
        .remove(0),
    )
    .unwrap();

    let err = registry.deploy(definition).unwrap_err();
    assert!(matches!(err, DaemonError::Spawn(_)));

    let snap = registry.snapshot("broken").unwrap();
    assert!(matches!(snap.state, ServiceState::Failed { .. }));
    assert_eq!(snap.run_count, 0);
}

#[test]
fn deploy_expands_environment_variables_from_file() {
    let _guard = convoy::test_utils::env_lock();
    let temp = tempdir().unwrap();
    let out = temp.path().join("out.log");

    unsafe {
        std::env::set_var("CONVOY_IT_MESSAGE", "expanded");
    }

    let raw = config::parse_definitions(&format!(
        "kind: Service\nname: echoer\nshell: \"echo $CONVOY_IT_MESSAGE > {}\"",
        out.display()
    ))
    .unwrap()
    .remove(0);

    unsafe {
        std::env::remove_var("CONVOY_IT_MESSAGE");
    }

    let registry = Registry::new();
    registry
        .deploy(Definition::try_from_raw(raw).unwrap())
        .unwrap();

    let lines = common::wait_for_lines(&out, 1);
    assert_eq!(lines, vec!["expanded"]);
}
