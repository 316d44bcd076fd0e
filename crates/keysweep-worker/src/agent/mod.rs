#[allow(clippy::module_inception)]
pub mod agent;
pub mod config;
pub mod listener;
pub mod pool;
