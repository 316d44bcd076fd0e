#![doc = include_str!("../README.md")]

mod error;
pub mod oracle;
pub mod partition;
pub mod scanner;
pub mod signal;
pub mod telemetry;
pub mod types;
pub mod wire;

pub use error::{Error, FramingError, Result};
pub use oracle::{Md5Decimal, Oracle};
pub use partition::partition;
pub use scanner::{ScanOutcome, scan};
pub use signal::{FoundSignal, Trip};
pub use types::{SearchRange, SearchTask};
pub use wire::{Command, Message, MessageCodec};
