//! Scenario-based tests for buildgate
//!
//! Every scenario drives the real engine against a scripted runner, so they
//! are fast and never touch git, rustup or cargo.

mod helpers;

mod ci_workflow;
mod concurrency_cancellation;
mod fail_fast;
mod matrix_isolation;
mod trigger_filtering;
