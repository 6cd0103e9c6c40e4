pub mod actor;
pub mod poller;
