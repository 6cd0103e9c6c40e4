pub mod actor;
pub mod command;
