//! Per-participant message pump.
//!
//! Every accepted connection gets one [`participant_loop`]. It owns the read
//! half of the socket and hands the write half to a [`writer_loop`] task fed
//! by the session. The pump:
//!
//! 1. reads `CORES` and registers the participant;
//! 2. waits for the participant's single `FOUND` or `ENDED` report and
//!    forwards it to the session;
//! 3. keeps draining the connection until the participant closes it or the
//!    coordinator shuts down.
//!
//! A connection that fails before it registers only loses itself. Once
//! registered, any error before the session resolves is fatal to the whole
//! session.

use crate::server::{
    outbound::{OUTBOUND_BUFFER, writer_loop},
    session::{ParticipantId, Session},
};
use futures::StreamExt;
use keysweep_core::{
    Command, Error, Message, Result, telemetry,
    wire::{MessageReader, framed, recv},
};
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_util::sync::CancellationToken;

pub async fn participant_loop(
    session: Arc<Session>,
    stream: TcpStream,
    peer: SocketAddr,
    shutdown: CancellationToken,
) {
    let (mut reader, writer) = framed(stream);
    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    let writer_task = tokio::spawn(writer_loop(peer, rx, writer, shutdown.clone()));

    match admit(&session, &mut reader, peer, tx, &shutdown).await {
        Ok(Some(id)) => match pump(&session, &mut reader, id, &shutdown).await {
            Ok(()) => tracing::debug!(%peer, participant = id, "Participant disconnected"),
            Err(e) => {
                if !e.is_connection_error() {
                    telemetry::increment_protocol_errors();
                }
                if session.is_resolved() {
                    tracing::debug!(%peer, participant = id, "Ignoring error after resolution: {e}");
                } else {
                    tracing::error!(%peer, participant = id, "Participant failed, aborting session: {e}");
                    session.fail(e);
                }
            }
        },
        Ok(None) => tracing::debug!(%peer, "Connection closed during shutdown"),
        Err(Error::RegistrationClosed) => {
            tracing::warn!(%peer, "Refusing participant: registration is closed");
        }
        Err(e) => {
            if !e.is_connection_error() {
                telemetry::increment_protocol_errors();
            }
            tracing::warn!(%peer, "Dropping unregistered connection: {e}");
        }
    }

    // The writer exits once the session releases this participant's queue.
    tokio::select! {
        () = shutdown.cancelled() => {}
        _ = writer_task => {}
    }
}

/// Reads `CORES` and registers the connection. `None` if the coordinator
/// shut down first.
async fn admit(
    session: &Session,
    reader: &mut MessageReader,
    peer: SocketAddr,
    outbound: mpsc::Sender<Message>,
    shutdown: &CancellationToken,
) -> Result<Option<ParticipantId>> {
    let hello = tokio::select! {
        () = shutdown.cancelled() => return Ok(None),
        message = recv(reader, "waiting for CORES") => message?,
    };
    let capacity = hello.expect(Command::Cores)?.capacity()?;
    session.register(peer, capacity, outbound).map(Some)
}

async fn pump(
    session: &Session,
    reader: &mut MessageReader,
    id: ParticipantId,
    shutdown: &CancellationToken,
) -> Result<()> {
    let mut reported = false;
    loop {
        let frame = tokio::select! {
            () = shutdown.cancelled() => return Ok(()),
            frame = reader.next() => frame,
        };

        let message = match frame {
            Some(frame) => frame?,
            None if reported || session.is_resolved() => return Ok(()),
            None => {
                return Err(Error::ConnectionClosed {
                    context: format!("participant {id} closed before reporting"),
                });
            }
        };

        match message.command {
            Command::Found => {
                session.submit_found(id, message.value()?)?;
                reported = true;
            }
            Command::Ended => {
                session.report_ended(id)?;
                reported = true;
            }
            received => {
                return Err(Error::ProtocolSequence {
                    expected: "FOUND or ENDED",
                    received,
                });
            }
        }
    }
}

