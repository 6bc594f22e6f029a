//! Deterministic, pure logic shared by the step controller.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod actions;
pub mod budget;
pub mod errors;
pub mod policy;
pub mod task;
pub mod types;
