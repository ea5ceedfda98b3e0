//! Autonomous software-delivery pipeline.
//!
//! A requirements document is decomposed into a four-level backlog
//! (phase → milestone → task → subtask), subtasks are implemented one at a
//! time by an agent collaborator under progressive validation gates, and a
//! finished backlog goes through a bug hunt with a bounded fix cycle.
//!
//! - **[`core`]**: Pure, deterministic logic (selection, aggregation,
//!   patching, fix-task synthesis). No I/O.
//! - **[`io`]**: Side effects (session files, processes, git, the agent CLI).
//!
//! [`pipeline::PipelineController`] ties the phases together; the
//! [`orchestrator`], [`validation`], [`delta`], and [`bug_hunt`] modules
//! hold each phase's loop.

pub mod agents;
pub mod backlog;
pub mod bug_hunt;
pub mod core;
pub mod delta;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod pipeline;
pub mod shutdown;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validation;
