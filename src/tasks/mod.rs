//! Persisted task queue executed on behalf of the controller.

pub mod handlers;
pub mod processor;

pub use processor::{ProcessorSettings, TaskProcessor};
