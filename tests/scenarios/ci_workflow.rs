//! Test: the CI workflow shipped in workflows/ci.yaml

use crate::helpers::*;
use buildgate::core::Event;
use buildgate::runner::Invocation;
use buildgate::{ExecutionStatus, Verdict};

#[tokio::test]
async fn test_push_to_master_runs_five_instances() {
    let workflow = shipped_ci_workflow();
    let runner = MockRunner::new();
    let log = runner.log();
    let (engine, _) = recording_engine(runner);

    let run = engine
        .dispatch(&workflow, &Event::push("master"))
        .await
        .unwrap()
        .expect("push to master should trigger");

    assert_eq!(run.status, ExecutionStatus::Completed);
    assert_eq!(run.status.exit_code(), 0);
    assert_eq!(
        instance_names(&run),
        vec![
            "Formatting",
            "Check (stable)",
            "Check (1.66)",
            "Clippy (stable)",
            "Clippy (1.66)",
        ]
    );
    assert_eq!(run.passed_instances(), 5);
    assert_eq!(run.concurrency_key.as_deref(), Some("ci-refs/heads/master"));

    assert_step_state(&run, "Clippy (stable)", "Clippy derive macros", "completed");
    assert_step_state(&run, "Clippy (1.66)", "Clippy derive macros", "skipped");
    assert_verdict(&run, "Clippy (1.66)", Verdict::Passed);

    let log = log.lock().unwrap();
    let derive = log
        .iter()
        .find(|i| i.slug == "clippy-stable" && i.step == "Clippy derive macros")
        .expect("derive clippy ran for stable");
    assert!(derive.working_dir.ends_with("astarte-device-sdk-derive"));
    assert_eq!(derive.env.get("RUSTUP_TOOLCHAIN").map(String::as_str), Some("stable"));
    assert_eq!(derive.env.get("CARGO_TERM_COLOR").map(String::as_str), Some("always"));

    let toolchain = log
        .iter()
        .find(|i| i.slug == "clippy-1.66" && matches!(i.invocation, Invocation::Toolchain { .. }))
        .expect("toolchain installed for 1.66");
    assert_eq!(
        toolchain.invocation,
        Invocation::Toolchain {
            toolchain: "1.66".to_string(),
            components: vec!["clippy".to_string()],
        }
    );
}

#[tokio::test]
async fn test_failing_clippy_fails_only_its_instance() {
    let workflow = shipped_ci_workflow();
    let (engine, _) = recording_engine(MockRunner::new().failing_on("cargo clippy --all-targets --all-features --workspace"));

    let run = engine
        .dispatch(&workflow, &Event::push("release-1.2"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(run.status, ExecutionStatus::Failed);
    assert_eq!(run.failed_instances(), 2);
    assert_eq!(run.passed_instances(), 3);
    assert_verdict(&run, "Formatting", Verdict::Passed);
    assert_step_state(&run, "Clippy (stable)", "Clippy", "failed");
    assert_step_state(&run, "Clippy (stable)", "Clippy derive macros", "pending");
}

#[tokio::test]
async fn test_feature_push_is_ignored_but_pull_request_runs() {
    let workflow = shipped_ci_workflow();
    let (engine, _) = recording_engine(MockRunner::new());

    assert!(engine
        .dispatch(&workflow, &Event::push("feature"))
        .await
        .unwrap()
        .is_none());

    let run = engine
        .dispatch(&workflow, &Event::pull_request(3, "feature", "master"))
        .await
        .unwrap()
        .expect("pull requests always trigger");
    assert!(run.is_success());
    assert_eq!(run.concurrency_key.as_deref(), Some("ci-refs/heads/feature"));
}
