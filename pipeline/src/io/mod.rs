//! Side-effecting helpers: filesystem, processes, git, and the agent CLI.

pub mod atomic;
pub mod config;
pub mod executor;
pub mod gates;
pub mod git;
pub mod process;
pub mod prompt;
pub mod report;
pub mod schema;
pub mod session;
pub mod tools;
