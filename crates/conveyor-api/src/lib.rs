//! HTTP server for Conveyor CI/CD.
//!
//! Receives GitHub webhooks, feeds pushes to the build queue and starts
//! pull-request reconciliation. Also hosts the GitHub client and the
//! notification sinks wired into the build worker.

pub mod error;
pub mod routes;
pub mod services;
pub mod state;

pub use state::AppState;
