//! Task domain model for the urgency/importance matrix.
//!
//! # Responsibility
//! - Define the task record and the collection the UI renders.
//! - Own every data invariant enforced before persistence.
//!
//! # Invariants
//! - Every task is identified by a stable `TaskId`.
//! - Invalid tasks never enter a `TaskCollection`.

pub mod collection;
pub mod task;
