//! Persistence layer — libSQL-backed storage for tasks and their logs.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::TaskStore;
