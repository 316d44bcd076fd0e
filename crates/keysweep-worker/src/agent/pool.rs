//! Local scanner pool.
//!
//! A [`ScannerPool`] fans one assigned range out over `capacity` blocking
//! scanners, each on its own tokio blocking thread, and races them to a single
//! answer through a shared [`FoundSignal`].
//!
//! Scanner threads cannot be aborted from the async side. If the search
//! future is dropped before they finish, the pool trips the signal so every
//! scanner returns at its next check instead of running out its sub-range.

use keysweep_core::{
    Error, FoundSignal, Oracle, Result, ScanOutcome, SearchTask, partition, scan,
};
use std::sync::Arc;
use tokio::task;

pub struct ScannerPool<O: Oracle> {
    oracle: Arc<O>,
    capacity: usize,
}

impl<O: Oracle> ScannerPool<O> {
    /// A `capacity` of zero is treated as one.
    pub fn new(oracle: Arc<O>, capacity: usize) -> Self {
        Self {
            oracle,
            capacity: capacity.max(1),
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Scans the task's range with every scanner in the pool.
    ///
    /// Returns the first match reported by a scanner, in sub-range order, or
    /// `None` when the range was exhausted or `signal` was tripped elsewhere.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTarget`] if the oracle rejects the target and
    /// [`Error::ChannelError`] if a scanner thread panicked.
    pub async fn search(&self, task: &SearchTask, signal: &FoundSignal) -> Result<Option<u64>> {
        let range = task.range;
        let target = Arc::new(self.oracle.parse_target(&task.target)?);
        let weights = vec![1; self.capacity];
        let scanners: Vec<_> = partition(range.start, range.end, &weights)
            .into_iter()
            .filter(|sub| !sub.is_empty())
            .map(|sub| {
                let oracle = Arc::clone(&self.oracle);
                let target = Arc::clone(&target);
                let signal = signal.clone();
                task::spawn_blocking(move || scan(&*oracle, sub, &*target, &signal))
            })
            .collect();

        tracing::debug!(%range, scanners = scanners.len(), "Scanners started");

        let guard = StopOnDrop::new(signal);
        let joined = futures::future::join_all(scanners).await;
        guard.disarm();

        let mut answer = None;
        for (i, joined) in joined.into_iter().enumerate() {
            let outcome = joined.map_err(|e| Error::ChannelError {
                context: format!("scanner {i} failed: {e}"),
            })?;
            if let (None, ScanOutcome::Found(value)) = (answer, outcome) {
                answer = Some(value);
            }
        }
        Ok(answer)
    }
}

struct StopOnDrop<'a> {
    signal: &'a FoundSignal,
    armed: bool,
}

impl<'a> StopOnDrop<'a> {
    const fn new(signal: &'a FoundSignal) -> Self {
        Self {
            signal,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StopOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed && self.signal.stop() {
            tracing::debug!("Search abandoned, stopping scanners");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keysweep_core::{Md5Decimal, SearchRange, Trip};
    use std::time::{Duration, Instant};

    fn pool(capacity: usize) -> ScannerPool<Md5Decimal> {
        ScannerPool::new(Arc::new(Md5Decimal), capacity)
    }

    fn task(start: u64, end: u64, preimage: u64) -> SearchTask {
        SearchTask {
            range: SearchRange::new(start, end),
            target: Md5Decimal::hex(preimage),
        }
    }

    #[tokio::test]
    async fn finds_match_in_any_sub_range() {
        let signal = FoundSignal::new();
        let found = pool(4)
            .search(&task(500, 1000, 712), &signal)
            .await
            .unwrap();
        assert_eq!(found, Some(712));
        assert_eq!(signal.value(), Some(712));
    }

    #[tokio::test]
    async fn exhausts_without_tripping_signal() {
        let signal = FoundSignal::new();
        let found = pool(3)
            .search(&task(0, 100, 100), &signal)
            .await
            .unwrap();
        assert_eq!(found, None);
        assert!(!signal.is_set());
    }

    #[tokio::test]
    async fn more_scanners_than_candidates() {
        let signal = FoundSignal::new();
        let found = pool(16)
            .search(&task(5, 8, 7), &signal)
            .await
            .unwrap();
        assert_eq!(found, Some(7));
    }

    #[tokio::test]
    async fn external_stop_cancels_search() {
        let signal = FoundSignal::new();
        signal.stop();
        let found = pool(2)
            .search(&task(0, 1_000_000, 999_999), &signal)
            .await
            .unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn rejects_malformed_target() {
        let bad = SearchTask {
            range: SearchRange::new(0, 10),
            target: "xyz".to_string(),
        };
        assert!(matches!(
            pool(1).search(&bad, &FoundSignal::new()).await,
            Err(Error::InvalidTarget { .. })
        ));
    }

    #[test]
    fn abandoned_search_releases_its_scanner_threads() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_time()
            .build()
            .unwrap();
        let signal = FoundSignal::new();
        // No decimal preimage below u64::MAX in any practical time.
        let endless = SearchTask {
            range: SearchRange::new(0, u64::MAX),
            target: "00000000000000000000000000000000".to_string(),
        };

        let abandoned = runtime.block_on(async {
            let pool = pool(2);
            tokio::time::timeout(Duration::from_millis(100), pool.search(&endless, &signal)).await
        });
        assert!(abandoned.is_err());
        assert_eq!(signal.trip(), Some(Trip::Stopped));

        // Dropping the runtime joins the blocking scanner threads.
        let dropped = Instant::now();
        drop(runtime);
        assert!(dropped.elapsed() < Duration::from_secs(5));
    }
}
