#![doc = include_str!("../README.md")]

pub mod agent;

pub use agent::{
    agent::{WorkerAgent, WorkerReport, self_check},
    config::{CliArgs, WorkerConfig},
    pool::ScannerPool,
};
