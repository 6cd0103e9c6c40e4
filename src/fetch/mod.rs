pub mod client;
pub mod error;
pub mod http;
#[cfg(test)]
pub mod simulator;
