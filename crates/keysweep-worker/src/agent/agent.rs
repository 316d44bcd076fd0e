//! The worker state machine.
//!
//! ```text
//! Connecting -> AwaitRange -> AwaitStart -> Searching -> Resolved -> Closed
//! ```
//!
//! While searching, two sources can stop the local scanners: a scanner that
//! finds a match, and the stop listener receiving the coordinator's `ENDED`.
//! Both write the same [`FoundSignal`], so whichever trips it first decides
//! whether the worker reports `FOUND` or `ENDED`.

use crate::agent::{
    config::WorkerConfig,
    listener::{ListenerExit, stop_listener},
    pool::ScannerPool,
};
use futures::SinkExt;
use keysweep_core::{
    Command, Error, FoundSignal, Md5Decimal, Message, Oracle, Result, ScanOutcome, SearchRange,
    SearchTask, Trip, scan,
    wire::{MessageWriter, framed, recv},
};
use std::sync::Arc;
use tokio::net::TcpStream;

/// What a worker did during its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    /// `None` if the coordinator ended the session before sending a range.
    pub range: Option<SearchRange>,
    /// Match found by a local scanner, even if the coordinator stopped the
    /// search first.
    pub local_match: Option<u64>,
    /// `FOUND` or `ENDED`; `None` if the session ended before `START`.
    pub reported: Option<Command>,
    /// The coordinator's `ENDED` arrived before the local search resolved.
    pub stopped_externally: bool,
}

pub struct WorkerAgent<O: Oracle = Md5Decimal> {
    config: WorkerConfig,
    oracle: Arc<O>,
}

impl WorkerAgent<Md5Decimal> {
    pub fn new(config: WorkerConfig) -> Self {
        Self::with_oracle(config, Md5Decimal)
    }
}

impl<O: Oracle> WorkerAgent<O> {
    pub fn with_oracle(config: WorkerConfig, oracle: O) -> Self {
        Self {
            config,
            oracle: Arc::new(oracle),
        }
    }

    pub const fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Connects to the configured coordinator and takes part in one session.
    pub async fn run(&self) -> Result<WorkerReport> {
        let stream = TcpStream::connect(&self.config.coordinator_addr).await?;
        stream.set_nodelay(true)?;
        tracing::info!(addr = %self.config.coordinator_addr, "Connected to coordinator");
        self.run_on_stream(stream).await
    }

    pub async fn run_on_stream(&self, stream: TcpStream) -> Result<WorkerReport> {
        let (mut reader, mut writer) = framed(stream);
        let mut report = WorkerReport {
            range: None,
            local_match: None,
            reported: None,
            stopped_externally: false,
        };

        writer.send(Message::cores(self.config.cores)).await?;
        tracing::debug!(cores = self.config.cores, "Sent CORES");

        let message = recv(&mut reader, "waiting for RANGE").await?;
        if message.command == Command::Ended {
            return aborted(writer, report).await;
        }
        let (start, end) = message.expect(Command::Range)?.bounds()?;
        let range = SearchRange::new(start, end);
        report.range = Some(range);
        tracing::info!(%range, "Assigned range");

        let message = recv(&mut reader, "waiting for START").await?;
        if message.command == Command::Ended {
            return aborted(writer, report).await;
        }
        let task = SearchTask {
            range,
            target: message.expect(Command::Start)?.target()?.to_string(),
        };
        self.oracle.parse_target(&task.target)?;
        tracing::info!(digest = %task.target, "Search started");

        let signal = FoundSignal::new();
        let listener = tokio::spawn(stop_listener(reader, signal.clone()));
        let pool = ScannerPool::new(Arc::clone(&self.oracle), self.config.cores);
        let searched = pool.search(&task, &signal).await;
        if searched.is_err() {
            signal.stop();
        }
        report.local_match = searched?;

        let reply = match signal.trip() {
            Some(Trip::Found(value)) => {
                tracing::info!(value, "Match found, reporting");
                Message::found(value)
            }
            Some(Trip::Stopped) => {
                report.stopped_externally = true;
                Message::ended()
            }
            None => {
                tracing::info!("Range exhausted without a match");
                Message::ended()
            }
        };
        report.reported = Some(reply.command);
        let sent = writer.send(reply).await;

        let exit = listener.await.map_err(|e| Error::ChannelError {
            context: format!("stop listener failed: {e}"),
        })??;
        if exit == ListenerExit::Closed {
            if report.stopped_externally {
                return Err(Error::ConnectionClosed {
                    context: "coordinator closed the connection during the search".to_string(),
                });
            }
            tracing::warn!("Coordinator closed the connection without ENDED");
        }
        sent?;

        close(writer).await;
        Ok(report)
    }
}

async fn aborted(writer: MessageWriter, report: WorkerReport) -> Result<WorkerReport> {
    tracing::warn!("Coordinator ended the session before the search started");
    close(writer).await;
    Ok(WorkerReport {
        stopped_externally: true,
        ..report
    })
}

async fn close(mut writer: MessageWriter) {
    if let Err(e) = writer.close().await {
        tracing::debug!("Failed to close connection: {e}");
    }
}

/// Known preimages of the MD5 oracle, with a range that contains each.
const SELF_CHECKS: [(&str, SearchRange, u64); 2] = [
    (
        "19bc916108fc6938f52cb96f7e087941",
        SearchRange::new(500, 1000),
        712,
    ),
    (
        "e10adc3949ba59abbe56e057f20f883e",
        SearchRange::new(100_000, 200_000),
        123_456,
    ),
];

/// Scans for two known preimages to make sure the oracle and scanner agree
/// before taking part in a session.
pub fn self_check() -> Result<()> {
    for (hex, range, expected) in SELF_CHECKS {
        let target = Md5Decimal.parse_target(hex)?;
        let outcome = scan(&Md5Decimal, range, &target, &FoundSignal::new());
        if outcome != ScanOutcome::Found(expected) {
            return Err(Error::InvalidTarget {
                reason: format!("self-check expected {expected} in {range}, got {outcome:?}"),
            });
        }
        tracing::debug!(expected, %range, "Self-check passed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use keysweep_core::wire::{MessageReader, MessageWriter};
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// Loopback coordinator driven step by step by the test.
    struct Script {
        reader: MessageReader,
        writer: MessageWriter,
    }

    impl Script {
        async fn recv(&mut self) -> Message {
            self.reader.next().await.unwrap().unwrap()
        }

        async fn send(&mut self, message: Message) {
            self.writer.send(message).await.unwrap();
        }
    }

    async fn spawn_worker(cores: usize) -> (Script, tokio::task::JoinHandle<Result<WorkerReport>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let agent = WorkerAgent::new(WorkerConfig::new(addr, cores).unwrap());
        let worker = tokio::spawn(async move { agent.run().await });

        let (stream, _) = listener.accept().await.unwrap();
        let (reader, writer) = framed(stream);
        (Script { reader, writer }, worker)
    }

    #[tokio::test]
    async fn reports_found_and_waits_for_ended() {
        let (mut coordinator, worker) = spawn_worker(4).await;

        assert_eq!(coordinator.recv().await, Message::cores(4));
        coordinator.send(Message::range(500, 1000)).await;
        coordinator
            .send(Message::start("19bc916108fc6938f52cb96f7e087941"))
            .await;

        assert_eq!(coordinator.recv().await, Message::found(712));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!worker.is_finished());

        coordinator.send(Message::ended()).await;
        let report = worker.await.unwrap().unwrap();
        assert_eq!(
            report,
            WorkerReport {
                range: Some(SearchRange::new(500, 1000)),
                local_match: Some(712),
                reported: Some(Command::Found),
                stopped_externally: false,
            }
        );
        assert!(coordinator.reader.next().await.is_none());
    }

    #[tokio::test]
    async fn reports_ended_when_range_has_no_match() {
        let (mut coordinator, worker) = spawn_worker(2).await;

        coordinator.recv().await;
        coordinator.send(Message::range(0, 100)).await;
        coordinator
            .send(Message::start(&Md5Decimal::hex(5_000)))
            .await;

        assert_eq!(coordinator.recv().await, Message::ended());
        coordinator.send(Message::ended()).await;

        let report = worker.await.unwrap().unwrap();
        assert_eq!(report.reported, Some(Command::Ended));
        assert_eq!(report.local_match, None);
        assert!(!report.stopped_externally);
    }

    #[tokio::test]
    async fn external_ended_stops_the_search() {
        let (mut coordinator, worker) = spawn_worker(2).await;

        coordinator.recv().await;
        coordinator.send(Message::range(0, u64::MAX)).await;
        // A digest with no decimal preimage below u64::MAX in any practical time.
        coordinator
            .send(Message::start("00000000000000000000000000000000"))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        coordinator.send(Message::ended()).await;

        assert_eq!(coordinator.recv().await, Message::ended());
        let report = tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(report.stopped_externally);
        assert_eq!(report.reported, Some(Command::Ended));
    }

    #[tokio::test]
    async fn rejects_start_before_range() {
        let (mut coordinator, worker) = spawn_worker(1).await;

        coordinator.recv().await;
        coordinator
            .send(Message::start("19bc916108fc6938f52cb96f7e087941"))
            .await;

        assert!(matches!(
            worker.await.unwrap(),
            Err(Error::ProtocolSequence {
                received: Command::Start,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn ended_before_start_closes_cleanly() {
        let (mut coordinator, worker) = spawn_worker(1).await;

        coordinator.recv().await;
        coordinator.send(Message::ended()).await;

        let report = worker.await.unwrap().unwrap();
        assert_eq!(report.range, None);
        assert_eq!(report.reported, None);
        assert!(report.stopped_externally);
    }

    #[tokio::test]
    async fn coordinator_disconnect_during_search_is_an_error() {
        let (mut coordinator, worker) = spawn_worker(2).await;

        coordinator.recv().await;
        coordinator.send(Message::range(0, u64::MAX)).await;
        coordinator
            .send(Message::start("00000000000000000000000000000000"))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(coordinator);

        let result = tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(Error::ConnectionClosed { .. })));
    }

    #[test]
    fn self_check_passes() {
        self_check().unwrap();
    }
}
