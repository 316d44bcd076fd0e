#![doc = include_str!("../README.md")]

pub mod server;

pub use server::{
    config::{CliArgs, CoordinatorConfig},
    coordinator::Coordinator,
    session::{ParticipantSummary, Phase, Session, SessionOutcome, SessionReport},
};
