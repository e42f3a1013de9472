//! Task Executor — a persistent job queue that drains tagged shell commands
//! in bounded, parallel batches.

pub mod config;
pub mod error;
pub mod executor;
pub mod import;
pub mod store;
pub mod tasks;
