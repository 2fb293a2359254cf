//! Job lifecycle: the persisted per-identity record and the controller that
//! drives runs through it.

pub mod controller;
pub mod store;

pub use controller::{validate_identity, JobController};
pub use store::{JobMessage, JobRecord, JobState, JobStore};
