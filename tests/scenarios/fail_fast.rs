//! Test: Fail-fast - the first failing step ends its instance

use crate::helpers::*;
use buildgate::core::{Event, FailureKind, StepState};
use buildgate::{ExecutionStatus, Verdict};

#[tokio::test]
async fn test_remaining_steps_never_start() {
    let workflow = workflow_from_yaml(
        r#"
name: chain
on: push
jobs:
  build:
    name: Build
    steps:
      - name: Configure
        run: ./configure
      - name: Compile
        run: make
      - name: Test
        run: make test
      - name: Package
        run: make dist
"#,
    );
    let runner = MockRunner::new().failing_on("make test");
    let log = runner.log();
    let (engine, _) = recording_engine(runner);

    let run = engine
        .dispatch(&workflow, &Event::push("master"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(run.status, ExecutionStatus::Failed);
    assert_eq!(run.status.exit_code(), 1);
    assert_verdict(&run, "Build", Verdict::Failed);

    assert_step_state(&run, "Build", "Configure", "completed");
    assert_step_state(&run, "Build", "Compile", "completed");
    assert_step_state(&run, "Build", "Test", "failed");
    assert_step_state(&run, "Build", "Package", "pending");

    assert_eq!(
        commands_for(&log, run.run_id, "build"),
        vec!["./configure", "make", "make test"]
    );

    let build = instance(&run, "Build");
    match &build.failed_step().unwrap().state {
        StepState::Failed { kind, output, .. } => {
            assert_eq!(*kind, FailureKind::ToolInvocation);
            assert!(output.contains("make test: failed"));
        }
        other => panic!("Expected failed step, got {:?}", other),
    }
    assert_eq!(build.executed_steps(), 3);
}

#[tokio::test]
async fn test_false_guard_skips_without_failing() {
    let workflow = workflow_from_yaml(
        r#"
name: guarded
on: push
jobs:
  build:
    name: Build
    steps:
      - name: Only on release
        if: github.ref == 'refs/heads/release'
        run: publish
      - name: Always
        run: make
"#,
    );
    let runner = MockRunner::new();
    let log = runner.log();
    let (engine, _) = recording_engine(runner);

    let run = engine
        .dispatch(&workflow, &Event::push("master"))
        .await
        .unwrap()
        .unwrap();

    assert!(run.is_success());
    assert_step_state(&run, "Build", "Only on release", "skipped");
    assert_step_state(&run, "Build", "Always", "completed");
    assert_eq!(commands_for(&log, run.run_id, "build"), vec!["make"]);
}
