//! Error types for the keysweep coordinator and workers.
//!
//! This module defines the central `Error` enum, which captures every
//! reportable failure in a search session. Both sides of the wire share it so
//! that a framing problem on the coordinator reads the same as one on a
//! worker.
//!
//! ## Error Cases
//! - `Framing`: a frame on the stream could not be parsed.
//! - `ConnectionClosed` / `Io`: the peer went away or the socket failed.
//! - `ProtocolSequence`: a command arrived out of state-machine order.
//! - `RegistrationStall`: fewer participants than expected registered before
//!   the registration timeout.
//! - `RegistrationClosed`: a participant tried to register after the barrier
//!   released.
//! - `InvalidArgument` / `InvalidTarget`: a message carried unusable values.
//! - `ChannelError`: an internal communication failure between tasks.
//! - `Interrupted`: the local process was asked to shut down mid-session.

use crate::wire::Command;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for a search session.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The byte stream did not contain a well-formed frame.
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// The peer closed the stream while more messages were expected.
    #[error("Connection closed: {context}")]
    ConnectionClosed { context: String },

    /// Socket level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A command was received in a state that does not accept it.
    #[error("Protocol sequence error: expected {expected}, received {received}")]
    ProtocolSequence {
        expected: &'static str,
        received: Command,
    },

    /// The registration barrier did not release before the timeout.
    #[error("Registration stalled: {registered} of {expected} participants registered")]
    RegistrationStall { registered: usize, expected: usize },

    /// Registration is closed because the barrier already released.
    #[error("Registration is closed")]
    RegistrationClosed,

    /// A message argument could not be interpreted.
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// The target is not a digest the oracle can produce.
    #[error("Invalid target: {reason}")]
    InvalidTarget { reason: String },

    /// Internal channel send/receive failure (e.g., closed channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The session was cancelled from the local side before it resolved.
    #[error("Session interrupted")]
    Interrupted,
}

impl Error {
    /// Returns `true` for errors that mean the peer is gone rather than
    /// misbehaving.
    pub const fn is_connection_error(&self) -> bool {
        matches!(self, Self::ConnectionClosed { .. } | Self::Io(_))
    }
}

/// Reasons a frame failed to decode.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// The five byte tag is not one of the recognized commands.
    #[error("unknown command tag {0:?}")]
    UnknownCommand(String),

    /// The tag is not followed by the `:` separator.
    #[error("missing separator after command tag")]
    MissingSeparator,

    /// The stream closed with a partial frame still buffered.
    #[error("stream closed mid-frame ({0} bytes buffered)")]
    Truncated(usize),

    /// No terminator was found within the maximum frame length.
    #[error("frame exceeds {0} bytes without a terminator")]
    TooLong(usize),

    /// The frame is not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}
