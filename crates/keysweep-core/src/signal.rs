//! Write-once found signal.
//!
//! A [`FoundSignal`] couples a cancellation flag with an optional result. The
//! first writer decides what the signal holds: either a value
//! ([`FoundSignal::try_set`]) or a plain stop ([`FoundSignal::stop`]). Every
//! later write is a no-op that reports `false`.
//!
//! The flag is a [`CancellationToken`], so it can be polled from blocking
//! scanner threads with [`FoundSignal::is_set`] and awaited from async tasks
//! with [`FoundSignal::wait`] without spinning.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What tripped the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trip {
    /// A matching candidate was recorded.
    Found(u64),
    /// The search was stopped without a value.
    Stopped,
}

#[derive(Debug, Default)]
struct Inner {
    token: CancellationToken,
    trip: Mutex<Option<Trip>>,
}

/// Shared, clonable, trip-once cancellation flag with an optional value.
#[derive(Debug, Clone, Default)]
pub struct FoundSignal {
    inner: Arc<Inner>,
}

impl FoundSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `value` and trips the flag. Returns `false` if the signal was
    /// already tripped, in which case nothing changes.
    pub fn try_set(&self, value: u64) -> bool {
        self.trip_with(Trip::Found(value))
    }

    /// Trips the flag without a value. Returns `false` if it was already
    /// tripped.
    pub fn stop(&self) -> bool {
        self.trip_with(Trip::Stopped)
    }

    fn trip_with(&self, trip: Trip) -> bool {
        {
            let mut slot = self.inner.trip.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(trip);
        }
        self.inner.token.cancel();
        true
    }

    /// Cheap check suitable for hot loops.
    pub fn is_set(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    pub fn trip(&self) -> Option<Trip> {
        *self.inner.trip.lock()
    }

    /// The recorded value, if the first writer supplied one.
    pub fn value(&self) -> Option<u64> {
        match self.trip() {
            Some(Trip::Found(value)) => Some(value),
            _ => None,
        }
    }

    /// Waits until the signal is tripped and returns what tripped it.
    pub async fn wait(&self) -> Trip {
        self.inner.token.cancelled().await;
        self.trip().unwrap_or(Trip::Stopped)
    }

    /// The underlying token, for `select!` arms and child tokens.
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }
}
