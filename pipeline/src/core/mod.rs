//! Deterministic, pure logic shared by the pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod aggregate;
pub mod backoff;
pub mod fix_tasks;
pub mod invariants;
pub mod item_id;
pub mod patch;
pub mod progress;
pub mod selector;
pub mod types;
