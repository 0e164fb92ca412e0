//! Burst outcome vocabulary.
//!
//! Every timed transfer produces a fresh [`BurstOutcome`]. Driver return
//! values are decoded here, in one place, so TX, RX and status queries
//! classify codes identically.

use crate::types::{Direction, StreamCode, StreamResult};
use std::collections::BTreeMap;
use std::fmt;

/// Classified result of one transfer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OutcomeKind {
    Success,
    Timeout,
    Overflow,
    Underflow,
    Corruption,
    StreamError,
    TimeError,
    NotSupported,
    /// Burst ended before the full count was transferred
    EndOfBurst,
    Unknown,
}

impl OutcomeKind {
    /// Map a negative driver code onto an outcome.
    pub fn from_code(code: StreamCode) -> Self {
        match code {
            StreamCode::Timeout => OutcomeKind::Timeout,
            StreamCode::StreamError => OutcomeKind::StreamError,
            StreamCode::Corruption => OutcomeKind::Corruption,
            StreamCode::Overflow => OutcomeKind::Overflow,
            StreamCode::NotSupported => OutcomeKind::NotSupported,
            StreamCode::TimeError => OutcomeKind::TimeError,
            StreamCode::Underflow => OutcomeKind::Underflow,
            StreamCode::Unknown(_) => OutcomeKind::Unknown,
        }
    }

    /// Classify a read/write return value against the requested count.
    ///
    /// Only an exact full count is a success. Returns the kind together with
    /// the value to report as the actual count (the raw code on failure).
    pub fn classify(result: StreamResult<usize>, requested: usize, end_of_burst: bool) -> (Self, i64) {
        match result {
            Ok(n) if n == requested => (OutcomeKind::Success, n as i64),
            Ok(n) if end_of_burst => (OutcomeKind::EndOfBurst, n as i64),
            Ok(n) => (OutcomeKind::Unknown, n as i64),
            Err(code) => (OutcomeKind::from_code(code), i64::from(code.raw())),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OutcomeKind::Success)
    }

    pub fn name(&self) -> &'static str {
        match self {
            OutcomeKind::Success => "SUCCESS",
            OutcomeKind::Timeout => "TIMEOUT",
            OutcomeKind::Overflow => "OVERFLOW",
            OutcomeKind::Underflow => "UNDERFLOW",
            OutcomeKind::Corruption => "CORRUPTION",
            OutcomeKind::StreamError => "STREAM_ERROR",
            OutcomeKind::TimeError => "TIME_ERROR",
            OutcomeKind::NotSupported => "NOT_SUPPORTED",
            OutcomeKind::EndOfBurst => "END_BURST",
            OutcomeKind::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// End-of-burst acknowledgment state of a TX burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// Fire-and-forget burst
    NotRequested,
    /// Status query reported a normal end of burst
    Confirmed,
    /// Status query reported something else, or timed out
    Failed(OutcomeKind),
    /// Write already failed, status was not queried
    Skipped,
}

impl AckStatus {
    /// True unless an acknowledgment was requested and not confirmed.
    pub fn is_satisfied(&self) -> bool {
        matches!(self, AckStatus::NotRequested | AckStatus::Confirmed)
    }
}

/// Result of one timed send or receive.
#[derive(Debug, Clone, PartialEq)]
pub struct BurstOutcome {
    pub direction: Direction,
    /// Scheduled tick of the burst
    pub tick: i64,
    /// Scheduled hardware time of the burst (ns)
    pub burst_time_ns: i64,
    /// Hardware time when the call was issued (ns)
    pub hardware_time_ns: i64,
    pub kind: OutcomeKind,
    /// Returned sample count, or the negative driver code
    pub actual: i64,
    /// Sample count handed to the driver
    pub requested: usize,
    pub ack: AckStatus,
}

impl BurstOutcome {
    pub fn is_success(&self) -> bool {
        self.kind.is_success() && self.ack.is_satisfied()
    }

    /// Kind to report, with a failed acknowledgment taking precedence.
    pub fn effective_kind(&self) -> OutcomeKind {
        match self.ack {
            AckStatus::Failed(kind) if self.kind.is_success() => kind,
            _ => self.kind,
        }
    }

    /// Seconds between issuing the call and the burst's scheduled time.
    pub fn lead_seconds(&self) -> f64 {
        (self.burst_time_ns - self.hardware_time_ns) as f64 * 1e-9
    }
}

impl fmt::Display for BurstOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} at tick {}: {}/{} samples",
            self.direction, self.kind, self.tick, self.actual, self.requested
        )?;
        match self.ack {
            AckStatus::Confirmed => write!(f, ", end of burst acknowledged"),
            AckStatus::Failed(kind) => write!(f, ", acknowledgment failed: {}", kind),
            AckStatus::NotRequested | AckStatus::Skipped => Ok(()),
        }
    }
}

/// Running count of outcomes per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutcomeTally {
    counts: BTreeMap<OutcomeKind, u64>,
}

impl OutcomeTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, kind: OutcomeKind) {
        *self.counts.entry(kind).or_insert(0) += 1;
    }

    pub fn count(&self, kind: OutcomeKind) -> u64 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn failures(&self) -> u64 {
        self.total() - self.count(OutcomeKind::Success)
    }

    pub fn iter(&self) -> impl Iterator<Item = (OutcomeKind, u64)> + '_ {
        self.counts.iter().map(|(k, v)| (*k, *v))
    }
}

impl fmt::Display for OutcomeTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.counts.is_empty() {
            return f.write_str("no bursts");
        }
        let mut first = true;
        for (kind, count) in self.iter() {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{}={}", kind, count)?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_full_count() {
        assert_eq!(OutcomeKind::classify(Ok(1000), 1000, false), (OutcomeKind::Success, 1000));
    }

    #[test]
    fn test_classify_overflow_reports_sentinel() {
        let (kind, actual) = OutcomeKind::classify(Err(StreamCode::Overflow), 1000, false);
        assert_eq!(kind, OutcomeKind::Overflow);
        assert_eq!(actual, -4);
    }

    #[test]
    fn test_classify_short_and_long_counts_fail() {
        assert_eq!(OutcomeKind::classify(Ok(0), 1000, false).0, OutcomeKind::Unknown);
        assert_eq!(OutcomeKind::classify(Ok(999), 1000, false).0, OutcomeKind::Unknown);
        assert_eq!(OutcomeKind::classify(Ok(1001), 1000, false).0, OutcomeKind::Unknown);
        assert_eq!(OutcomeKind::classify(Ok(400), 1000, true), (OutcomeKind::EndOfBurst, 400));
    }

    #[test]
    fn test_every_code_has_a_kind() {
        for raw in -7..=-1 {
            let kind = OutcomeKind::from_code(StreamCode::from_raw(raw));
            assert_ne!(kind, OutcomeKind::Unknown);
            assert!(!kind.is_success());
        }
        assert_eq!(OutcomeKind::from_code(StreamCode::Unknown(-99)), OutcomeKind::Unknown);
    }

    #[test]
    fn test_outcome_requires_ack() {
        let mut outcome = BurstOutcome {
            direction: Direction::Tx,
            tick: 10,
            burst_time_ns: 2_000,
            hardware_time_ns: 1_000,
            kind: OutcomeKind::Success,
            actual: 5,
            requested: 5,
            ack: AckStatus::Confirmed,
        };
        assert!(outcome.is_success());
        assert!((outcome.lead_seconds() - 1e-6).abs() < 1e-15);

        outcome.ack = AckStatus::Failed(OutcomeKind::Timeout);
        assert!(!outcome.is_success());
        let text = outcome.to_string();
        assert!(text.contains("5/5"));
        assert!(text.contains("TIMEOUT"));
    }

    #[test]
    fn test_tally() {
        let mut tally = OutcomeTally::new();
        assert_eq!(tally.to_string(), "no bursts");
        tally.record(OutcomeKind::Success);
        tally.record(OutcomeKind::Success);
        tally.record(OutcomeKind::Overflow);
        assert_eq!(tally.total(), 3);
        assert_eq!(tally.failures(), 1);
        assert_eq!(tally.to_string(), "SUCCESS=2 OVERFLOW=1");
    }
}
