//! Deterministic, pure logic of the update engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! descriptors and return deterministic outputs suitable for tests.

pub mod constraint;
pub mod diff;
pub mod hash;
pub mod installed;
pub mod task;
pub mod types;
