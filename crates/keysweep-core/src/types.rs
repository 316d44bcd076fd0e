use core::fmt;

/// Port both binaries default to.
pub const DEFAULT_PORT: u16 = 12345;

/// Largest digit count whose keyspace (`10^digits`) still fits in a `u64`.
pub const MAX_KEYSPACE_DIGITS: u32 = 19;

/// A half-open interval `[start, end)` of candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SearchRange {
    pub start: u64,
    pub end: u64,
}

impl SearchRange {
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// The whole keyspace `[0, 10^digits)`, or `None` if it overflows.
    pub fn keyspace(digits: u32) -> Option<Self> {
        10_u64.checked_pow(digits).map(|size| Self::new(0, size))
    }

    pub const fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub const fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub const fn contains(&self, candidate: u64) -> bool {
        self.start <= candidate && candidate < self.end
    }
}

impl fmt::Display for SearchRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Everything a worker needs to search its share of the keyspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTask {
    pub range: SearchRange,
    pub target: String,
}
