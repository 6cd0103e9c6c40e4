pub mod actor;
pub mod types;
pub mod workflow;
