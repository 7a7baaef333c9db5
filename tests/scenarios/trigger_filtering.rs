//! Test: Trigger filtering - unmatched events never start a run

use crate::helpers::*;
use buildgate::core::{Event, RefType};
use buildgate::execution::ExecutionEvent;
use buildgate::ExecutionStatus;

const WORKFLOW: &str = r#"
name: filtered
on:
  push:
    branches: [master, "release-*"]
  create:
  pull_request:
    types: [opened]
jobs:
  build:
    steps:
      - run: cargo build
"#;

#[tokio::test]
async fn test_push_to_unlisted_branch_is_a_noop() {
    let workflow = workflow_from_yaml(WORKFLOW);
    let runner = MockRunner::new();
    let log = runner.log();
    let (engine, events) = recording_engine(runner);

    let result = engine
        .dispatch(&workflow, &Event::push("feature/login"))
        .await
        .unwrap();

    assert!(result.is_none(), "Push to feature/login should not trigger");
    assert!(log.lock().unwrap().is_empty(), "No step should have run");

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        ExecutionEvent::RunSkipped { git_ref, .. } if git_ref == "refs/heads/feature/login"
    ));
}

#[tokio::test]
async fn test_glob_branch_and_create_trigger() {
    let workflow = workflow_from_yaml(WORKFLOW);
    let (engine, _) = recording_engine(MockRunner::new());

    let release = engine
        .dispatch(&workflow, &Event::push("release-2.0"))
        .await
        .unwrap()
        .expect("release-* should trigger");
    assert_eq!(release.status, ExecutionStatus::Completed);
    assert_eq!(release.git_ref, "refs/heads/release-2.0");

    let tag = Event::Create {
        ref_type: RefType::Tag,
        name: "v1.0.0".to_string(),
    };
    let created = engine.dispatch(&workflow, &tag).await.unwrap().expect("create should trigger");
    assert_eq!(created.event_name, "create");
    assert_eq!(created.git_ref, "refs/tags/v1.0.0");
}

#[tokio::test]
async fn test_pull_request_action_filter() {
    let workflow = workflow_from_yaml(WORKFLOW);
    let (engine, _) = recording_engine(MockRunner::new());

    let opened = Event::pull_request(7, "feature", "master");
    assert!(engine.dispatch(&workflow, &opened).await.unwrap().is_some());

    let closed = Event::PullRequest {
        action: "closed".to_string(),
        number: 7,
        head_ref: "feature".to_string(),
        base_ref: "master".to_string(),
        sha: None,
    };
    assert!(engine.dispatch(&workflow, &closed).await.unwrap().is_none());
}
