//! The coordinator state machine.
//!
//! ```text
//! WaitingRegistration -> Registered -> RangesSent -> Started
//!     -> ResultReceived -> Terminating -> Closed
//! ```
//!
//! A [`Coordinator`] runs exactly one session. The accept loop stays up for
//! the whole session so late connections are refused explicitly instead of
//! queueing in the backlog.
//!
//! Cancelling the interrupt token (see [`Coordinator::with_interrupt`]) aborts
//! the session with [`Error::Interrupted`] and still runs the normal
//! termination, so every participant receives `ENDED`.

use crate::server::{
    config::CoordinatorConfig,
    pump::participant_loop,
    session::{Phase, Session, SessionOutcome, SessionReport},
};
use keysweep_core::{Error, Message, Result, telemetry};
use std::{sync::Arc, time::Instant};
use tokio::{net::TcpListener, time::timeout};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

pub struct Coordinator {
    config: CoordinatorConfig,
    interrupt: CancellationToken,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            interrupt: CancellationToken::new(),
        }
    }

    /// Aborts the session when `interrupt` is cancelled.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: CancellationToken) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub const fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Binds the configured listen address and runs one session to
    /// completion.
    pub async fn run(self) -> Result<SessionReport> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        self.run_with_listener(listener).await
    }

    /// Runs one session on an already bound listener.
    ///
    /// Returns the session report once every participant connection is
    /// closed. A session that was aborted (registration stall, protocol
    /// violation, lost participant) returns the error that aborted it.
    pub async fn run_with_listener(self, listener: TcpListener) -> Result<SessionReport> {
        let started = Instant::now();
        let config = &self.config;
        let session = Arc::new(Session::new(
            config.target.clone(),
            config.keyspace,
            config.participants,
        ));

        tracing::info!(
            addr = ?listener.local_addr().ok(),
            digest = %config.target,
            keyspace = %config.keyspace,
            participants = config.participants,
            "Waiting for participants"
        );

        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let acceptor = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&session),
            tracker.clone(),
            shutdown.clone(),
        ));

        let driven = tokio::select! {
            result = self.drive(&session) => result,
            () = self.interrupt.cancelled() => Err(Error::Interrupted),
        };
        if let Err(e) = driven {
            tracing::error!("Session aborted: {e}");
            session.fail(e);
        }

        self.terminate(&session, &tracker, &shutdown).await;
        if let Err(e) = acceptor.await {
            tracing::warn!("Accept loop panicked: {e}");
        }
        session.set_phase(Phase::Closed);

        let report = session.report(started.elapsed());
        match session.take_outcome() {
            Some(SessionOutcome::Found(value)) => {
                telemetry::increment_sessions_resolved("found");
                tracing::info!(value, elapsed = ?report.elapsed, "Session closed with a match");
                Ok(report)
            }
            Some(SessionOutcome::Exhausted) => {
                telemetry::increment_sessions_resolved("exhausted");
                tracing::info!(elapsed = ?report.elapsed, "Session closed, keyspace exhausted");
                Ok(report)
            }
            Some(SessionOutcome::Failed(e)) => {
                telemetry::increment_sessions_resolved("failed");
                Err(e)
            }
            None => Err(Error::ChannelError {
                context: "session closed without resolving".to_string(),
            }),
        }
    }

    /// Registration through result collection. Returns once the session is
    /// resolved; any error returned here aborts the session.
    async fn drive(&self, session: &Session) -> Result<()> {
        let registration = async {
            tokio::select! {
                () = session.wait_for_registration() => true,
                _ = session.wait_resolved() => false,
            }
        };

        let registered = match self.config.registration_timeout {
            Some(limit) => timeout(limit, registration).await.map_err(|_| {
                Error::RegistrationStall {
                    registered: session.registered(),
                    expected: session.expected(),
                }
            })?,
            None => registration.await,
        };
        if !registered {
            // Aborted by a participant failure while waiting.
            return Ok(());
        }

        session.set_phase(Phase::Registered);
        tracing::info!(
            total_capacity = session.total_capacity(),
            "All participants registered"
        );

        session.distribute_ranges().await?;
        session.start().await?;
        tracing::info!(digest = session.target(), "Search started");

        session.wait_resolved().await;
        Ok(())
    }

    /// Broadcasts `ENDED`, releases every outbound queue and waits for the
    /// participants to hang up, cancelling stragglers after the shutdown
    /// timeout.
    async fn terminate(&self, session: &Session, tracker: &TaskTracker, shutdown: &CancellationToken) {
        session.set_phase(Phase::Terminating);

        let notified = session.broadcast(Message::ended()).await;
        tracing::info!("Sent ENDED to {notified} participant(s)");
        session.close_outbound();

        tracker.close();
        tracing::debug!("Draining {} participant connection(s)", tracker.len());
        if timeout(self.config.shutdown_timeout, tracker.wait()).await.is_err() {
            tracing::warn!(
                "Graceful drain timed out ({} connections still open)",
                tracker.len()
            );
        }

        shutdown.cancel();
        tracker.wait().await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    session: Arc<Session>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                tracing::debug!(%peer, "Accepted connection");
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(%peer, "Failed to set TCP_NODELAY: {e}");
                }
                tracker.spawn(participant_loop(
                    Arc::clone(&session),
                    stream,
                    peer,
                    shutdown.clone(),
                ));
            }
            Err(e) => tracing::warn!("Accept failed: {e}"),
        }
    }
    tracing::debug!("Accept loop stopped");
}
