//! Tasks — data model and lifecycle rules.

pub mod lifecycle;
pub mod model;

pub use model::{NewTaskLog, Task, TaskLog, TaskStatus, TaskUpdate};
