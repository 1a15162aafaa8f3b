//! Deploy gating for Conveyor CI/CD.
//!
//! Decides whether a finished build is deployed and runs the deploy script
//! registered for its branch.

pub mod gate;

pub use gate::{DeployGate, DeployOutcome, SkipReason};
