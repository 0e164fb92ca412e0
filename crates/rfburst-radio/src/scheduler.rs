//! # Burst Scheduler
//!
//! Drives one chain's periodic burst schedule until cancellation.
//!
//! ```text
//! tick = start
//! loop {
//!     cancelled?  ──► stop
//!     active?     ──► op(tick); tick += ticks_per_period
//!     inactive    ──► idle (1 s, cancel-aware); tick unchanged
//! }
//! ```
//!
//! RX and TX each get their own scheduler with a different start tick and
//! the same increment. They never rendezvous; the timeline offset alone
//! keeps RX ahead of TX.

use rfburst_core::{BurstOutcome, BurstTimeline, CancelToken, DeviceConfig, Direction, OutcomeTally};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::device::{RadioError, RadioResult};

/// Idle period of an inactive chain.
pub const DEFAULT_IDLE: Duration = Duration::from_secs(1);

// ============================================================================
// Report
// ============================================================================

/// Summary of one finished schedule.
#[derive(Debug, Clone, Default)]
pub struct ScheduleReport {
    /// Chain the schedule ran on
    pub direction: Option<Direction>,
    /// Bursts issued
    pub bursts: u64,
    /// Outcome counts by kind
    pub tally: OutcomeTally,
    /// Tick the next burst would have used
    pub next_tick: i64,
    /// Error that ended the loop, if it did not end by cancellation
    pub error: Option<RadioError>,
}

impl ScheduleReport {
    /// Bursts that ended in success.
    pub fn successes(&self) -> u64 {
        self.bursts - self.failures()
    }

    pub fn failures(&self) -> u64 {
        self.tally.failures()
    }

    /// True if the loop ended because of an error.
    pub fn ended_by_error(&self) -> bool {
        self.error.is_some()
    }
}

impl fmt::Display for ScheduleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(direction) = self.direction {
            write!(f, "{}: ", direction)?;
        }
        write!(
            f,
            "{} bursts, {} ok, {} failed [{}]",
            self.bursts,
            self.successes(),
            self.failures(),
            self.tally
        )?;
        if let Some(err) = &self.error {
            write!(f, ", stopped by error: {}", err)?;
        }
        Ok(())
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Periodic burst loop of one chain.
#[derive(Debug, Clone)]
pub struct BurstScheduler {
    direction: Direction,
    start_tick: i64,
    ticks_per_period: i64,
    active: bool,
    idle: Duration,
    limit: Option<u64>,
}

impl BurstScheduler {
    pub fn new(direction: Direction, start_tick: i64, ticks_per_period: i64, active: bool) -> Self {
        Self {
            direction,
            start_tick,
            ticks_per_period,
            active,
            idle: DEFAULT_IDLE,
            limit: None,
        }
    }

    /// Scheduler for `direction` on a planned timeline.
    pub fn for_chain(direction: Direction, timeline: &BurstTimeline, config: &DeviceConfig) -> Self {
        let start_tick = match direction {
            Direction::Tx => timeline.tx_start_tick,
            Direction::Rx => timeline.rx_start_tick,
        };
        Self::new(
            direction,
            start_tick,
            timeline.ticks_per_period,
            config.chain(direction).active,
        )
    }

    /// Override the idle period of an inactive chain.
    pub fn with_idle(mut self, idle: Duration) -> Self {
        self.idle = idle;
        self
    }

    /// Stop after `limit` bursts instead of running until cancelled.
    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn start_tick(&self) -> i64 {
        self.start_tick
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Run until `cancel` fires, the burst limit is reached, or `op` fails.
    ///
    /// `op` gets the tick of the next burst. Failed outcomes do not stop
    /// the loop; the next period is the retry. An `Err` from `op` is logged
    /// and ends this schedule only.
    pub fn run<F>(&self, cancel: &CancelToken, mut op: F) -> ScheduleReport
    where
        F: FnMut(i64) -> RadioResult<BurstOutcome>,
    {
        let mut report = ScheduleReport {
            direction: Some(self.direction),
            next_tick: self.start_tick,
            ..Default::default()
        };

        info!(
            direction = %self.direction,
            start_tick = self.start_tick,
            ticks_per_period = self.ticks_per_period,
            active = self.active,
            "{} schedule started",
            self.direction
        );

        while !cancel.is_cancelled() {
            if self.limit.is_some_and(|limit| report.bursts >= limit) {
                debug!(direction = %self.direction, "burst limit reached");
                break;
            }

            if !self.active {
                cancel.sleep(self.idle);
                continue;
            }

            match op(report.next_tick) {
                Ok(outcome) => {
                    report.bursts += 1;
                    report.tally.record(outcome.effective_kind());
                    report.next_tick += self.ticks_per_period;
                }
                Err(e) => {
                    error!(
                        direction = %self.direction,
                        tick = report.next_tick,
                        "{} schedule stopped: {}",
                        self.direction,
                        e
                    );
                    report.error = Some(e);
                    break;
                }
            }
        }

        info!(direction = %self.direction, "{}", report);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfburst_core::{AckStatus, OutcomeKind, SchedulingParams};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn outcome(tick: i64, kind: OutcomeKind) -> BurstOutcome {
        BurstOutcome {
            direction: Direction::Rx,
            tick,
            burst_time_ns: 0,
            hardware_time_ns: 0,
            kind,
            actual: if kind.is_success() { 10 } else { kind_code(kind) },
            requested: 10,
            ack: AckStatus::NotRequested,
        }
    }

    fn kind_code(kind: OutcomeKind) -> i64 {
        match kind {
            OutcomeKind::Overflow => -4,
            _ => -1,
        }
    }

    #[test]
    fn test_ticks_advance_by_period() {
        let cancel = CancelToken::new();
        let scheduler = BurstScheduler::new(Direction::Rx, 1_000, 250, true).with_limit(Some(4));

        let mut ticks = Vec::new();
        let report = scheduler.run(&cancel, |tick| {
            ticks.push(tick);
            Ok(outcome(tick, OutcomeKind::Success))
        });

        assert_eq!(ticks, vec![1_000, 1_250, 1_500, 1_750]);
        assert_eq!(report.bursts, 4);
        assert_eq!(report.next_tick, 2_000);
        assert_eq!(report.successes(), 4);
        assert!(!report.ended_by_error());
    }

    #[test]
    fn test_failures_do_not_stop_schedule() {
        let cancel = CancelToken::new();
        let scheduler = BurstScheduler::new(Direction::Rx, 0, 10, true).with_limit(Some(3));

        let report = scheduler.run(&cancel, |tick| {
            let kind = if tick == 10 { OutcomeKind::Overflow } else { OutcomeKind::Success };
            Ok(outcome(tick, kind))
        });

        assert_eq!(report.bursts, 3);
        assert_eq!(report.failures(), 1);
        assert_eq!(report.tally.count(OutcomeKind::Overflow), 1);
        assert_eq!(report.next_tick, 30);
    }

    #[test]
    fn test_error_ends_schedule() {
        let cancel = CancelToken::new();
        let scheduler = BurstScheduler::new(Direction::Tx, 0, 10, true);

        let report = scheduler.run(&cancel, |tick| {
            if tick >= 20 {
                Err(RadioError::HardwareError("device lost".into()))
            } else {
                Ok(outcome(tick, OutcomeKind::Success))
            }
        });

        assert_eq!(report.bursts, 2);
        assert_eq!(report.next_tick, 20);
        assert!(report.ended_by_error());
        assert!(report.to_string().contains("device lost"));
    }

    #[test]
    fn test_cancel_stops_at_loop_top() {
        let cancel = CancelToken::new();
        let scheduler = BurstScheduler::new(Direction::Rx, 0, 1, true);

        let report = scheduler.run(&cancel, |tick| {
            if tick == 5 {
                cancel.cancel();
            }
            Ok(outcome(tick, OutcomeKind::Success))
        });

        assert_eq!(report.bursts, 6);
        assert_eq!(report.next_tick, 6);
    }

    #[test]
    fn test_cancelled_before_start() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);
        let report = BurstScheduler::new(Direction::Rx, 0, 1, true).run(&cancel, |tick| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(outcome(tick, OutcomeKind::Success))
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.bursts, 0);
    }

    #[test]
    fn test_inactive_chain_idles_without_advancing() {
        let cancel = CancelToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let scheduler = BurstScheduler::new(Direction::Rx, 500, 100, false)
            .with_idle(Duration::from_millis(5));

        let stopper = {
            let cancel = cancel.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                cancel.cancel();
            })
        };

        let counter = calls.clone();
        let report = scheduler.run(&cancel, move |tick| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(outcome(tick, OutcomeKind::Success))
        });
        stopper.join().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.bursts, 0);
        assert_eq!(report.next_tick, 500);
    }

    #[test]
    fn test_ack_failure_counted_as_failure() {
        let cancel = CancelToken::new();
        let scheduler = BurstScheduler::new(Direction::Tx, 0, 1, true).with_limit(Some(1));
        let report = scheduler.run(&cancel, |tick| {
            let mut o = outcome(tick, OutcomeKind::Success);
            o.ack = AckStatus::Failed(OutcomeKind::Timeout);
            Ok(o)
        });
        assert_eq!(report.failures(), 1);
        assert_eq!(report.tally.count(OutcomeKind::Timeout), 1);
    }

    #[test]
    fn test_for_chain_uses_timeline() {
        let config = DeviceConfig::default();
        let timeline = BurstTimeline::plan(0, &config, &SchedulingParams::default()).unwrap();

        let rx = BurstScheduler::for_chain(Direction::Rx, &timeline, &config);
        let tx = BurstScheduler::for_chain(Direction::Tx, &timeline, &config);
        assert!(rx.start_tick() < tx.start_tick());
        assert!(tx.start_tick() - rx.start_tick() >= timeline.ticks_per_period);
        assert!(rx.is_active() && tx.is_active());
    }
}
