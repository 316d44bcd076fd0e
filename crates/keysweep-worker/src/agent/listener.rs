use futures::StreamExt;
use keysweep_core::{Command, Error, FoundSignal, Result, wire::MessageReader};

/// Why the stop listener returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerExit {
    /// The coordinator sent `ENDED`.
    Ended,
    /// The coordinator closed the connection without sending `ENDED`.
    Closed,
}

/// Watches the coordinator connection for the global stop.
///
/// Whatever ends the listener (`ENDED`, EOF or a bad frame) trips `signal`, so
/// local scanners never outlive the connection. Tripping is a no-op if a
/// local scanner already recorded a match.
pub async fn stop_listener(mut reader: MessageReader, signal: FoundSignal) -> Result<ListenerExit> {
    let exit = match reader.next().await {
        Some(Ok(message)) if message.command == Command::Ended => Ok(ListenerExit::Ended),
        Some(Ok(message)) => Err(Error::ProtocolSequence {
            expected: "ENDED",
            received: message.command,
        }),
        Some(Err(e)) => Err(e),
        None => Ok(ListenerExit::Closed),
    };

    if signal.stop() {
        tracing::info!(?exit, "Search stopped by coordinator");
    }
    exit
}
