//! Test: Matrix isolation - instances never affect each other

use crate::helpers::*;
use buildgate::core::Event;
use buildgate::{ExecutionStatus, Verdict};
use std::collections::HashSet;

const WORKFLOW: &str = r#"
name: matrix
on: push
jobs:
  test:
    name: Test
    strategy:
      matrix:
        os: [linux, macos]
        toolchain: [stable, beta, nightly]
        exclude:
          - os: macos
            toolchain: nightly
    steps:
      - name: Build
        run: build ${{ matrix.os }} ${{ matrix.toolchain }}
      - name: Test
        run: test ${{ matrix.os }} ${{ matrix.toolchain }}
"#;

#[tokio::test]
async fn test_one_failing_instance_leaves_siblings_alone() {
    let workflow = workflow_from_yaml(WORKFLOW);
    let runner = MockRunner::new().failing_on("build linux beta");
    let log = runner.log();
    let (engine, _) = recording_engine(runner);

    let run = engine
        .dispatch(&workflow, &Event::push("master"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(run.instances.len(), 5);
    assert_eq!(run.status, ExecutionStatus::Failed);
    assert_eq!(run.failed_instances(), 1);
    assert_eq!(run.passed_instances(), 4);

    assert_verdict(&run, "Test (linux, beta)", Verdict::Failed);
    assert_step_state(&run, "Test (linux, beta)", "Test", "pending");
    assert_verdict(&run, "Test (linux, stable)", Verdict::Passed);
    assert_verdict(&run, "Test (macos, beta)", Verdict::Passed);
    assert!(run.instance("Test (macos, nightly)").is_none());

    // Sibling instances still ran both steps
    assert_eq!(
        commands_for(&log, run.run_id, "test-macos-beta"),
        vec!["build macos beta", "test macos beta"]
    );
}

#[tokio::test]
async fn test_instances_get_separate_workspaces() {
    let workflow = workflow_from_yaml(WORKFLOW);
    let runner = MockRunner::new();
    let log = runner.log();
    let (engine, _) = recording_engine(runner);

    let run = engine
        .dispatch(&workflow, &Event::push("master"))
        .await
        .unwrap()
        .unwrap();
    assert!(run.is_success());

    let workspaces: HashSet<_> = log
        .lock()
        .unwrap()
        .iter()
        .map(|i| i.working_dir.clone())
        .collect();
    assert_eq!(workspaces.len(), 5);

    let prefix = format!("/ws/{}/", run.run_id);
    assert!(workspaces
        .iter()
        .all(|w| w.to_string_lossy().starts_with(&prefix)));
}
