use futures::SinkExt;
use keysweep_core::{Message, wire::MessageWriter};
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Per-connection buffer of queued outbound messages.
pub const OUTBOUND_BUFFER: usize = 8;

/// Writer task for one participant connection.
///
/// Drains `rx` into the framed socket until every sender is dropped (the
/// session closed its outbound queues) or `shutdown` is cancelled, then
/// flushes and closes the write half so the participant observes EOF.
pub async fn writer_loop(
    peer: SocketAddr,
    mut rx: mpsc::Receiver<Message>,
    mut writer: MessageWriter,
    shutdown: CancellationToken,
) {
    tracing::trace!(%peer, "Writer started");

    loop {
        let message = tokio::select! {
            () = shutdown.cancelled() => break,
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let command = message.command;
        if let Err(e) = writer.send(message).await {
            tracing::debug!(%peer, "Failed to write {command}: {e}");
            return;
        }
        tracing::trace!(%peer, "Sent {command}");
    }

    if let Err(e) = writer.close().await {
        tracing::debug!(%peer, "Failed to close connection: {e}");
    }
    tracing::trace!(%peer, "Writer stopped");
}
