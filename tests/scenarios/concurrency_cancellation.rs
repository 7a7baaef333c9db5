//! Test: Concurrency groups - newest run wins, older runs are canceled

use crate::helpers::*;
use buildgate::core::Event;
use buildgate::execution::ExecutionEvent;
use buildgate::{ExecutionStatus, Verdict};
use std::sync::Arc;
use std::time::Duration;

fn workflow(cancel_in_progress: bool) -> buildgate::Workflow {
    workflow_from_yaml(&format!(
        r#"
name: ci
on: [push, pull_request]
concurrency:
  group: ${{{{ github.workflow }}}}-${{{{ github.ref }}}}
  cancel-in-progress: {}
jobs:
  build:
    name: Build
    steps:
      - name: Compile
        run: compile ${{{{ github.ref_name }}}}
      - name: Test
        run: test ${{{{ github.ref_name }}}}
"#,
        cancel_in_progress
    ))
}

fn slow_runner() -> MockRunner {
    MockRunner::new().delaying("compile", Duration::from_millis(300))
}

#[tokio::test]
async fn test_second_push_cancels_first() {
    let workflow = Arc::new(workflow(true));
    let runner = slow_runner();
    let log = runner.log();
    let (engine, events) = recording_engine(runner);
    let engine = Arc::new(engine);

    let first = engine
        .accept(&workflow, &Event::push("master"))
        .unwrap()
        .unwrap();
    let first_id = first.run_id();
    assert_eq!(first.concurrency_key(), Some("ci-refs/heads/master"));

    let first_task = {
        let engine = Arc::clone(&engine);
        let workflow = Arc::clone(&workflow);
        tokio::spawn(async move { engine.execute(&workflow, first).await })
    };

    // Let the first run get into its slow step
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = engine
        .accept(&workflow, &Event::push("master"))
        .unwrap()
        .unwrap();
    let second_id = second.run_id();
    let second = engine.execute(&workflow, second).await;
    let first = first_task.await.unwrap();

    assert_eq!(first.status, ExecutionStatus::Cancelled);
    assert_eq!(first.status.exit_code(), 2);
    assert_eq!(first.passed_instances(), 0);
    assert_verdict(&first, "Build", Verdict::Canceled);
    assert_step_state(&first, "Build", "Compile", "completed");
    assert_step_state(&first, "Build", "Test", "pending");
    assert_eq!(commands_for(&log, first_id, "build"), vec!["compile master"]);

    assert_eq!(second.status, ExecutionStatus::Completed);
    assert_eq!(second.passed_instances(), 1);
    assert_eq!(
        commands_for(&log, second_id, "build"),
        vec!["compile master", "test master"]
    );

    let events = events.lock().unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        ExecutionEvent::RunSuperseded { run_id, superseded_by, .. }
            if *run_id == first_id && *superseded_by == second_id
    )));
}

#[tokio::test]
async fn test_pull_request_cancels_push_to_its_head() {
    let workflow = Arc::new(workflow(true));
    let (engine, _) = recording_engine(slow_runner());
    let engine = Arc::new(engine);

    let push = engine
        .accept(&workflow, &Event::push("feature"))
        .unwrap()
        .unwrap();
    let push_task = {
        let engine = Arc::clone(&engine);
        let workflow = Arc::clone(&workflow);
        tokio::spawn(async move { engine.execute(&workflow, push).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let pr = engine
        .accept(&workflow, &Event::pull_request(12, "feature", "master"))
        .unwrap()
        .unwrap();
    assert_eq!(pr.concurrency_key(), Some("ci-refs/heads/feature"));

    let pr = engine.execute(&workflow, pr).await;
    let push = push_task.await.unwrap();

    assert_eq!(push.status, ExecutionStatus::Cancelled);
    assert_eq!(pr.status, ExecutionStatus::Completed);
    assert_eq!(pr.event_name, "pull_request");
}

#[tokio::test]
async fn test_queued_run_superseded_before_start() {
    let workflow = Arc::new(workflow(true));
    let runner = slow_runner();
    let log = runner.log();
    let (engine, _) = recording_engine(runner);
    let engine = Arc::new(engine);

    let mut tasks = Vec::new();
    let mut ids = Vec::new();
    for _ in 0..3 {
        let run = engine
            .accept(&workflow, &Event::push("master"))
            .unwrap()
            .unwrap();
        ids.push(run.run_id());
        let engine = Arc::clone(&engine);
        let workflow = Arc::clone(&workflow);
        tasks.push(tokio::spawn(async move { engine.execute(&workflow, run).await }));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.unwrap());
    }

    assert_eq!(results[0].status, ExecutionStatus::Cancelled);
    assert_eq!(results[1].status, ExecutionStatus::Cancelled);
    assert_eq!(results[2].status, ExecutionStatus::Completed);

    // The middle run never reached the runner
    assert!(commands_for(&log, ids[1], "build").is_empty());
    assert_step_state(&results[1], "Build", "Compile", "pending");
}

#[tokio::test]
async fn test_runs_queue_without_cancel_in_progress() {
    let workflow = Arc::new(workflow(false));
    let runner = slow_runner();
    let log = runner.log();
    let (engine, _) = recording_engine(runner);
    let engine = Arc::new(engine);

    let first = engine
        .accept(&workflow, &Event::push("master"))
        .unwrap()
        .unwrap();
    let first_id = first.run_id();
    let first_task = {
        let engine = Arc::clone(&engine);
        let workflow = Arc::clone(&workflow);
        tokio::spawn(async move { engine.execute(&workflow, first).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = engine
        .accept(&workflow, &Event::push("master"))
        .unwrap()
        .unwrap();
    assert!(!second.is_cancelled());
    let second = engine.execute(&workflow, second).await;
    let first = first_task.await.unwrap();

    assert_eq!(first.status, ExecutionStatus::Completed);
    assert_eq!(second.status, ExecutionStatus::Completed);

    // Runs in one group never overlap
    let order: Vec<_> = log.lock().unwrap().iter().map(|i| i.run_id).collect();
    assert_eq!(order, vec![first_id, first_id, second.run_id, second.run_id]);
}

#[tokio::test]
async fn test_different_refs_run_side_by_side() {
    let workflow = Arc::new(workflow(true));
    let (engine, _) = recording_engine(slow_runner());
    let engine = Arc::new(engine);

    let master = engine
        .accept(&workflow, &Event::push("master"))
        .unwrap()
        .unwrap();
    let release = engine
        .accept(&workflow, &Event::push("release-1"))
        .unwrap()
        .unwrap();
    assert!(!master.is_cancelled());

    let (master, release) = tokio::join!(
        engine.execute(&workflow, master),
        engine.execute(&workflow, release)
    );
    assert_eq!(master.status, ExecutionStatus::Completed);
    assert_eq!(release.status, ExecutionStatus::Completed);
    assert_eq!(engine.registry().active_groups(), 0);
}

#[tokio::test]
async fn test_runs_keep_accept_order_when_executed_out_of_order() {
    let workflow = Arc::new(workflow(false));
    let runner = slow_runner();
    let log = runner.log();
    let (engine, _) = recording_engine(runner);
    let engine = Arc::new(engine);

    let a = engine.accept(&workflow, &Event::push("master")).unwrap().unwrap();
    let b = engine.accept(&workflow, &Event::push("master")).unwrap().unwrap();
    let (a_id, b_id) = (a.run_id(), b.run_id());

    // The later run starts executing first
    let b_task = {
        let engine = Arc::clone(&engine);
        let workflow = Arc::clone(&workflow);
        tokio::spawn(async move { engine.execute(&workflow, b).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(log.lock().unwrap().is_empty(), "B must wait for A");

    let a_task = {
        let engine = Arc::clone(&engine);
        let workflow = Arc::clone(&workflow);
        tokio::spawn(async move { engine.execute(&workflow, a).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let c = engine.accept(&workflow, &Event::push("master")).unwrap().unwrap();
    let c_id = c.run_id();
    let c = engine.execute(&workflow, c).await;
    let a = a_task.await.unwrap();
    let b = b_task.await.unwrap();

    for run in [&a, &b, &c] {
        assert_eq!(run.status, ExecutionStatus::Completed);
    }

    let order: Vec<_> = log.lock().unwrap().iter().map(|i| i.run_id).collect();
    assert_eq!(order, vec![a_id, a_id, b_id, b_id, c_id, c_id]);
    assert_eq!(engine.registry().active_groups(), 0);
}
