//! Command execution backends for Conveyor CI/CD.
//!
//! Provides executor implementations for build and deploy scripts:
//! - Local processes

pub mod local;

pub use conveyor_core::executor::{CommandOutput, CommandSpec, Executor};
pub use local::LocalProcessExecutor;
