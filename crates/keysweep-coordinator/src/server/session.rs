//! Coordinator-owned session state.
//!
//! A [`Session`] is created once per coordinator run and shared (behind an
//! `Arc`) by the accept loop, every participant pump and the coordinator's
//! state machine. It owns:
//!
//! - the participant registry, aggregate capacity and report counters, all
//!   under a single lock;
//! - the registration gate, a counting wait that releases once the expected
//!   number of participants is registered;
//! - the result slot, a write-once [`FoundSignal`] that also wakes the
//!   coordinator when the session resolves.
//!
//! Messages to a participant are never written while the lock is held: each
//! record keeps the sending half of that participant's outbound queue, the
//! relevant senders are cloned under the lock and used after it is released.

use keysweep_core::{
    Command, Error, FoundSignal, Message, Result, SearchRange, Trip, partition, telemetry,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Registration sequence number, starting at 0.
pub type ParticipantId = usize;

/// Coordinator lifecycle, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    WaitingRegistration,
    Registered,
    RangesSent,
    Started,
    ResultReceived,
    Terminating,
    Closed,
}

#[derive(Debug)]
struct ParticipantRecord {
    id: ParticipantId,
    peer: SocketAddr,
    capacity: usize,
    range: Option<SearchRange>,
    reported: bool,
    outbound: Option<mpsc::Sender<Message>>,
}

#[derive(Debug)]
struct SessionState {
    phase: Phase,
    participants: Vec<ParticipantRecord>,
    total_capacity: usize,
    ended: usize,
    failure: Option<Error>,
}

/// A participant as it appears in the final report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantSummary {
    pub id: ParticipantId,
    pub peer: SocketAddr,
    pub capacity: usize,
    pub range: Option<SearchRange>,
}

/// How a resolved session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// A participant reported a matching candidate.
    Found(u64),
    /// Every participant reported `ENDED` without a match.
    Exhausted,
    /// The session was aborted.
    Failed(Error),
}

/// Summary returned once the session is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    /// `None` when the keyspace held no preimage.
    pub result: Option<u64>,
    pub total_capacity: usize,
    pub participants: Vec<ParticipantSummary>,
    pub elapsed: Duration,
}

pub struct Session {
    target: String,
    keyspace: SearchRange,
    expected: usize,
    state: Mutex<SessionState>,
    registered: watch::Sender<usize>,
    result: FoundSignal,
}

impl Session {
    pub fn new(target: impl Into<String>, keyspace: SearchRange, expected: usize) -> Self {
        let (registered, _) = watch::channel(0);
        Self {
            target: target.into(),
            keyspace,
            expected,
            state: Mutex::new(SessionState {
                phase: Phase::WaitingRegistration,
                participants: Vec::with_capacity(expected),
                total_capacity: 0,
                ended: 0,
                failure: None,
            }),
            registered,
            result: FoundSignal::new(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub const fn expected(&self) -> usize {
        self.expected
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// Advances the session to `phase`. Phases only move forward; an earlier
    /// phase is ignored.
    pub fn set_phase(&self, phase: Phase) {
        advance(&mut self.state.lock(), phase);
    }

    pub fn registered(&self) -> usize {
        *self.registered.borrow()
    }

    pub fn total_capacity(&self) -> usize {
        self.state.lock().total_capacity
    }

    /// Adds a participant to the registry and bumps the registration gate.
    ///
    /// # Errors
    ///
    /// [`Error::RegistrationClosed`] once the expected count is reached or the
    /// session has moved past registration, and [`Error::InvalidArgument`] if
    /// the capacity would overflow the session total.
    pub fn register(
        &self,
        peer: SocketAddr,
        capacity: usize,
        outbound: mpsc::Sender<Message>,
    ) -> Result<ParticipantId> {
        let (id, count, total) = {
            let mut state = self.state.lock();
            if state.phase != Phase::WaitingRegistration
                || state.participants.len() >= self.expected
                || self.result.is_set()
            {
                return Err(Error::RegistrationClosed);
            }

            let total = state.total_capacity.checked_add(capacity).ok_or_else(|| {
                Error::InvalidArgument {
                    reason: format!(
                        "capacity {capacity} overflows the session total of {}",
                        state.total_capacity
                    ),
                }
            })?;

            let id = state.participants.len();
            state.participants.push(ParticipantRecord {
                id,
                peer,
                capacity,
                range: None,
                reported: false,
                outbound: Some(outbound),
            });
            state.total_capacity = total;
            (id, state.participants.len(), total)
        };

        self.registered.send_replace(count);
        telemetry::increment_participants_registered();
        tracing::info!(
            participant = id,
            %peer,
            capacity,
            total_capacity = total,
            "Registered participant ({count}/{})",
            self.expected
        );
        Ok(id)
    }

    /// Waits until the expected number of participants is registered.
    pub async fn wait_for_registration(&self) {
        let mut rx = self.registered.subscribe();
        // The sender lives as long as `self`, so this cannot observe a
        // closed channel.
        let _ = rx.wait_for(|count| *count >= self.expected).await;
    }

    /// Partitions the keyspace by capacity, in registration order, and queues
    /// each participant's `RANGE`.
    pub async fn distribute_ranges(&self) -> Result<Vec<(ParticipantId, SearchRange)>> {
        let deliveries = {
            let mut state = self.state.lock();
            let weights: Vec<usize> = state.participants.iter().map(|p| p.capacity).collect();
            let ranges = partition(self.keyspace.start, self.keyspace.end, &weights);

            let mut deliveries = Vec::with_capacity(ranges.len());
            for (participant, range) in state.participants.iter_mut().zip(ranges) {
                participant.range = Some(range);
                deliveries.push((participant.id, outbound_of(participant)?, range));
            }
            deliveries
        };

        let mut assigned = Vec::with_capacity(deliveries.len());
        for (id, outbound, range) in deliveries {
            tracing::info!(participant = id, %range, "Assigning range");
            deliver(id, &outbound, Message::range(range.start, range.end)).await?;
            assigned.push((id, range));
        }

        self.set_phase(Phase::RangesSent);
        Ok(assigned)
    }

    /// Moves to [`Phase::Started`] and queues `START` with the target for
    /// every participant.
    pub async fn start(&self) -> Result<()> {
        let recipients = {
            let mut state = self.state.lock();
            advance(&mut state, Phase::Started);
            state
                .participants
                .iter()
                .map(|p| Ok((p.id, outbound_of(p)?)))
                .collect::<Result<Vec<_>>>()?
        };

        for (id, outbound) in recipients {
            deliver(id, &outbound, Message::start(&self.target)).await?;
        }
        Ok(())
    }

    /// Best effort delivery of `message` to every participant that still has
    /// an open outbound queue. Returns the number of queues it reached.
    pub async fn broadcast(&self, message: Message) -> usize {
        let recipients: Vec<_> = {
            let state = self.state.lock();
            state
                .participants
                .iter()
                .filter_map(|p| p.outbound.clone().map(|tx| (p.id, tx)))
                .collect()
        };

        let mut delivered = 0;
        for (id, outbound) in recipients {
            match deliver(id, &outbound, message.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(participant = id, "Broadcast of {} failed: {e}", message.command),
            }
        }
        delivered
    }

    /// Records a participant's `FOUND`. Returns `true` if this value is the
    /// session result, `false` if another result was already accepted.
    ///
    /// # Errors
    ///
    /// [`Error::ProtocolSequence`] if the search has not started or the
    /// participant already reported.
    pub fn submit_found(&self, id: ParticipantId, value: u64) -> Result<bool> {
        let accepted = {
            let mut state = self.state.lock();
            mark_reported(&mut state, id, Command::Found)?;
            let accepted = self.result.try_set(value);
            if accepted {
                advance(&mut state, Phase::ResultReceived);
            }
            accepted
        };

        if accepted {
            tracing::info!(participant = id, value, "Result accepted");
        } else {
            tracing::debug!(participant = id, value, "Discarding late result");
        }
        Ok(accepted)
    }

    /// Records a participant's `ENDED`. When every participant has ended
    /// without a result the session resolves as exhausted.
    pub fn report_ended(&self, id: ParticipantId) -> Result<()> {
        let exhausted = {
            let mut state = self.state.lock();
            mark_reported(&mut state, id, Command::Ended)?;
            state.ended += 1;
            let exhausted = state.ended == state.participants.len() && self.result.stop();
            if exhausted {
                advance(&mut state, Phase::ResultReceived);
            }
            exhausted
        };

        tracing::info!(participant = id, "Participant exhausted its range");
        if exhausted {
            tracing::info!("Every participant ended without a match");
        }
        Ok(())
    }

    /// Aborts the session with `error` unless it already resolved. Returns
    /// `true` if this call resolved the session.
    pub fn fail(&self, error: Error) -> bool {
        let mut state = self.state.lock();
        if self.result.is_set() {
            return false;
        }
        state.failure = Some(error);
        drop(state);
        self.result.stop()
    }

    pub fn is_resolved(&self) -> bool {
        self.result.is_set()
    }

    /// Blocks until the session resolves (result, exhaustion or failure).
    pub async fn wait_resolved(&self) -> Trip {
        self.result.wait().await
    }

    /// How the session resolved. A failure can only be taken once; later
    /// calls see [`SessionOutcome::Exhausted`].
    pub fn take_outcome(&self) -> Option<SessionOutcome> {
        match self.result.trip()? {
            Trip::Found(value) => Some(SessionOutcome::Found(value)),
            Trip::Stopped => Some(match self.state.lock().failure.take() {
                Some(error) => SessionOutcome::Failed(error),
                None => SessionOutcome::Exhausted,
            }),
        }
    }

    /// Drops every outbound queue so writer tasks flush and close their
    /// connections.
    pub fn close_outbound(&self) {
        let mut state = self.state.lock();
        for participant in &mut state.participants {
            participant.outbound = None;
        }
    }

    pub fn report(&self, elapsed: Duration) -> SessionReport {
        let state = self.state.lock();
        SessionReport {
            result: self.result.value(),
            total_capacity: state.total_capacity,
            participants: state
                .participants
                .iter()
                .map(|p| ParticipantSummary {
                    id: p.id,
                    peer: p.peer,
                    capacity: p.capacity,
                    range: p.range,
                })
                .collect(),
            elapsed,
        }
    }
}

fn advance(state: &mut SessionState, phase: Phase) {
    if phase > state.phase {
        tracing::debug!(from = ?state.phase, to = ?phase, "session phase");
        state.phase = phase;
    }
}

fn outbound_of(participant: &ParticipantRecord) -> Result<mpsc::Sender<Message>> {
    participant
        .outbound
        .clone()
        .ok_or_else(|| Error::ChannelError {
            context: format!("participant {} outbound queue closed", participant.id),
        })
}

async fn deliver(id: ParticipantId, outbound: &mpsc::Sender<Message>, message: Message) -> Result<()> {
    outbound
        .send(message)
        .await
        .map_err(|_| Error::ConnectionClosed {
            context: format!("participant {id} writer stopped"),
        })
}

fn mark_reported(state: &mut SessionState, id: ParticipantId, received: Command) -> Result<()> {
    if state.phase < Phase::Started {
        return Err(Error::ProtocolSequence {
            expected: "no message before START",
            received,
        });
    }
    let participant = state
        .participants
        .get_mut(id)
        .ok_or_else(|| Error::InvalidArgument {
            reason: format!("unknown participant {id}"),
        })?;
    if participant.reported {
        return Err(Error::ProtocolSequence {
            expected: "a single FOUND or ENDED",
            received,
        });
    }
    participant.reported = true;
    Ok(())
}
