#[allow(clippy::module_inception)]
mod engine;

pub use engine::{ValidationReport, WorkflowEngine};
