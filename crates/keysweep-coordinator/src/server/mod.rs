pub mod config;
pub mod coordinator;
pub mod outbound;
pub mod pump;
pub mod session;
