//! Core domain types and traits for Conveyor CI/CD.
//!
//! This crate contains:
//! - Job and task records produced by the build worker
//! - Repository configuration types
//! - Collaborator traits: executors, notifiers, pull-request APIs and
//!   build-log stores

pub mod error;
pub mod executor;
pub mod id;
pub mod job;
pub mod notify;
pub mod pull_request;
pub mod repository;
pub mod store;

pub use error::{Error, Result};
pub use id::JobId;
pub use job::{Job, JobRequest, Pusher, Task};
