//! Cooperative, cancellable scan of a single sub-range.
//!
//! [`scan`] is the unit of local parallelism. It is a plain blocking loop
//! meant to run on its own thread; it never yields to a runtime. Cancellation
//! is cooperative: the shared [`FoundSignal`] is checked every
//! [`CHECK_INTERVAL`] candidates, which bounds how long a scanner keeps working
//! after another scanner (or another participant) has tripped it.

use crate::{oracle::Oracle, signal::FoundSignal, telemetry, types::SearchRange};
use std::time::Instant;

/// Number of candidates evaluated between two looks at the cancellation flag.
pub const CHECK_INTERVAL: u64 = 256;

/// How a scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// This scanner evaluated a matching candidate.
    Found(u64),
    /// Every candidate in the range was evaluated without a match.
    Exhausted,
    /// The signal was tripped elsewhere; `next` is the first candidate that
    /// was not evaluated.
    Cancelled { next: u64 },
}

impl ScanOutcome {
    pub const fn found(self) -> Option<u64> {
        match self {
            Self::Found(value) => Some(value),
            _ => None,
        }
    }
}

/// Scans `range` in ascending order for a candidate whose fingerprint equals
/// `target`.
///
/// On a match the signal is tripped with the candidate (a no-op if someone
/// else got there first) and the candidate is returned as
/// [`ScanOutcome::Found`].
pub fn scan<O: Oracle>(
    oracle: &O,
    range: SearchRange,
    target: &O::Digest,
    signal: &FoundSignal,
) -> ScanOutcome {
    let started = Instant::now();
    let mut candidate = range.start;

    let outcome = loop {
        if candidate >= range.end {
            break ScanOutcome::Exhausted;
        }
        if (candidate - range.start) % CHECK_INTERVAL == 0 && signal.is_set() {
            break ScanOutcome::Cancelled { next: candidate };
        }
        if oracle.fingerprint(candidate) == *target {
            signal.try_set(candidate);
            break ScanOutcome::Found(candidate);
        }
        candidate += 1;
    };

    let evaluated = match outcome {
        ScanOutcome::Found(value) => value - range.start + 1,
        ScanOutcome::Exhausted => range.len(),
        ScanOutcome::Cancelled { next } => next - range.start,
    };
    telemetry::increment_candidates_scanned(evaluated);
    telemetry::record_scan_duration(started.elapsed().as_secs_f64() * 1000.0);

    tracing::debug!(%range, ?outcome, evaluated, "scan finished");
    outcome
}
