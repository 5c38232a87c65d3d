//! Value types shared by the probes and the protocol actors.

use std::fmt;

use uuid::Uuid;

/// Identifier of one execution context issued by a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    /// Wrap a raw probe-specific identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw identifier.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Token tying a reply to the request (or invocation) that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationToken(Uuid);

impl CorrelationToken {
    /// Generate a fresh token.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Point-in-time heap size of one context, in words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapSnapshot {
    /// Young generation size.
    pub young_size: u64,
    /// Old generation size.
    pub old_size: u64,
}

impl HeapSnapshot {
    #[must_use]
    pub const fn new(young_size: u64, old_size: u64) -> Self {
        Self {
            young_size,
            old_size,
        }
    }

    /// Young plus old generation size.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.young_size.saturating_add(self.old_size)
    }
}

/// Scope of a garbage collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcKind {
    /// Young generation only.
    Minor,
    /// Includes the old generation.
    Major,
}

impl fmt::Display for GcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minor => write!(f, "minor"),
            Self::Major => write!(f, "major"),
        }
    }
}

/// What the measured callable produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The callable returned normally.
    Returned(T),
    /// The callable panicked or the executor died; no value is available.
    Failed,
}

/// Answer of one measurement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementResult<T> {
    /// Net bytes retained, or `None` when the measurement is unavailable.
    pub bytes: Option<u64>,
    /// The callable's return value or the failure marker.
    pub value: Outcome<T>,
}

impl<T> MeasurementResult<T> {
    /// A measured result.
    #[must_use]
    pub const fn measured(bytes: Option<u64>, value: T) -> Self {
        Self {
            bytes,
            value: Outcome::Returned(value),
        }
    }

    /// The callable returned but the heap could not be measured.
    #[must_use]
    pub const fn unmeasurable(value: T) -> Self {
        Self::measured(None, value)
    }

    /// The callable failed.
    #[must_use]
    pub const fn failed() -> Self {
        Self {
            bytes: None,
            value: Outcome::Failed,
        }
    }

    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self.value, Outcome::Failed)
    }

    /// The callable's return value, if it returned.
    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        match &self.value {
            Outcome::Returned(value) => Some(value),
            Outcome::Failed => None,
        }
    }

    #[must_use]
    pub fn into_value(self) -> Option<T> {
        match self.value {
            Outcome::Returned(value) => Some(value),
            Outcome::Failed => None,
        }
    }
}

/// Net bytes retained: `(total(after) - total(before) + collected) * word_size`.
///
/// Returns `None` when the result is negative or does not fit, and for a zero
/// word size. Negative values are never clamped to zero.
#[must_use]
pub fn net_bytes(
    before: HeapSnapshot,
    after: HeapSnapshot,
    collected_words: i64,
    word_size: u64,
) -> Option<u64> {
    if word_size == 0 {
        return None;
    }
    let delta = i128::from(after.total()).checked_sub(i128::from(before.total()))?;
    let net_words = delta.checked_add(i128::from(collected_words))?;
    let bytes = net_words.checked_mul(i128::from(word_size))?;
    u64::try_from(bytes).ok()
}
