//! Batch execution — claim, run, and drain.

pub mod claim;
pub mod command;
pub mod drain;
pub mod engine;
pub mod recovery;

pub use claim::claim_batch;
pub use command::{CommandOutput, CommandRunner};
pub use drain::{DrainSummary, Driver};
pub use engine::{BatchReport, ExecutionEngine, TaskOutcome};
pub use recovery::recover_stale;
