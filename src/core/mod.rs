//! Core domain models for workflows
//!
//! This module defines the data structures that represent workflows,
//! triggers, jobs, matrices and steps, plus the run-state types.

pub mod config;
pub mod context;
pub mod expression;
pub mod matrix;
pub mod state;
pub mod step;
pub mod trigger;
pub mod workflow;

pub use context::*;
pub use matrix::{Matrix, MatrixCombination};
pub use state::*;
pub use step::*;
pub use trigger::*;
pub use workflow::*;
