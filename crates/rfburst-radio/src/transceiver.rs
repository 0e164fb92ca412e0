//! Timed burst transfers.
//!
//! A [`Transmitter`] and a [`Receiver`] each borrow one stream of a
//! [`DeviceSession`](crate::session::DeviceSession), so the TX and RX
//! threads never share a stream. Every call produces a fresh
//! [`BurstOutcome`]; driver codes never become Rust errors here.

use rfburst_core::{
    ticks_to_time_ns, AckStatus, BurstOutcome, DeviceConfig, Direction, OutcomeKind, Sample,
    StreamFlags,
};
use std::time::Duration;
use tracing::{info, warn};

use crate::device::RadioResult;
use crate::hal::{RadioDevice, RadioStream};

/// Single zero sample sent or requested when a burst has no samples.
const KEEPALIVE: [Sample; 1] = [Sample::new(0.0, 0.0)];

fn log_outcome(outcome: &BurstOutcome) {
    if outcome.is_success() {
        info!(
            direction = %outcome.direction,
            tick = outcome.tick,
            kind = %outcome.kind,
            actual = outcome.actual,
            requested = outcome.requested,
            lead_s = outcome.lead_seconds(),
            "{}",
            outcome
        );
    } else {
        warn!(
            direction = %outcome.direction,
            tick = outcome.tick,
            kind = %outcome.kind,
            actual = outcome.actual,
            requested = outcome.requested,
            lead_s = outcome.lead_seconds(),
            "{}",
            outcome
        );
    }
}

/// Channel mask selecting one channel for the status query.
fn channel_mask(channel: usize) -> u32 {
    u32::try_from(channel)
        .ok()
        .and_then(|c| 1u32.checked_shl(c))
        .unwrap_or(0)
}

/// TX side of a session.
pub struct Transmitter<'s> {
    device: &'s dyn RadioDevice,
    stream: &'s mut Box<dyn RadioStream>,
    config: &'s DeviceConfig,
}

impl<'s> Transmitter<'s> {
    pub fn new(
        device: &'s dyn RadioDevice,
        stream: &'s mut Box<dyn RadioStream>,
        config: &'s DeviceConfig,
    ) -> Self {
        Self { device, stream, config }
    }

    fn timeout(&self) -> Duration {
        self.config.timeout_duration()
    }

    /// Transmit `samples` as one burst at hardware tick `tick`.
    ///
    /// An empty slice sends a single zero sample. With `ack`, success also
    /// requires the stream to report a normal end of burst.
    pub fn send(&mut self, tick: i64, samples: &[Sample], ack: bool) -> RadioResult<BurstOutcome> {
        let payload = if samples.is_empty() { &KEEPALIVE[..] } else { samples };
        let requested = payload.len();
        let burst_time_ns = ticks_to_time_ns(tick, self.config.master_clock_rate);
        let hardware_time_ns = self.device.hardware_time()?;
        let timeout = self.timeout();

        let flags = StreamFlags::HAS_TIME | StreamFlags::END_BURST;
        let transfer = self.stream.write(payload, flags, burst_time_ns, timeout);
        let (mut kind, actual) = OutcomeKind::classify(transfer.result, requested, false);

        let ack = if !ack {
            AckStatus::NotRequested
        } else if !kind.is_success() {
            AckStatus::Skipped
        } else {
            let status = self
                .stream
                .read_status(channel_mask(self.config.tx.channel), timeout);
            match status.result {
                Ok(()) if status.flags.contains(StreamFlags::END_BURST) => AckStatus::Confirmed,
                Ok(()) => AckStatus::Failed(OutcomeKind::Unknown),
                Err(code) => AckStatus::Failed(OutcomeKind::from_code(code)),
            }
        };
        if let AckStatus::Failed(ack_kind) = ack {
            kind = ack_kind;
        }

        let outcome = BurstOutcome {
            direction: Direction::Tx,
            tick,
            burst_time_ns,
            hardware_time_ns,
            kind,
            actual,
            requested,
            ack,
        };
        log_outcome(&outcome);
        Ok(outcome)
    }
}

/// RX side of a session.
pub struct Receiver<'s> {
    device: &'s dyn RadioDevice,
    stream: &'s mut Box<dyn RadioStream>,
    config: &'s DeviceConfig,
}

impl<'s> Receiver<'s> {
    pub fn new(
        device: &'s dyn RadioDevice,
        stream: &'s mut Box<dyn RadioStream>,
        config: &'s DeviceConfig,
    ) -> Self {
        Self { device, stream, config }
    }

    /// Receive one burst starting at hardware tick `tick` into `buffer`.
    ///
    /// Only a completely filled buffer is a success. An empty buffer
    /// requests a single sample into scratch space.
    pub fn receive(&mut self, tick: i64, buffer: &mut [Sample]) -> RadioResult<BurstOutcome> {
        let mut keepalive = KEEPALIVE;
        let target = if buffer.is_empty() { &mut keepalive[..] } else { buffer };
        let requested = target.len();
        let burst_time_ns = ticks_to_time_ns(tick, self.config.master_clock_rate);
        let hardware_time_ns = self.device.hardware_time()?;

        let transfer = self.stream.read(
            target,
            StreamFlags::HAS_TIME,
            burst_time_ns,
            self.config.timeout_duration(),
        );
        let (kind, actual) = OutcomeKind::classify(
            transfer.result,
            requested,
            transfer.flags.contains(StreamFlags::END_BURST),
        );

        let outcome = BurstOutcome {
            direction: Direction::Rx,
            tick,
            burst_time_ns,
            hardware_time_ns,
            kind,
            actual,
            requested,
            ack: AckStatus::NotRequested,
        };
        log_outcome(&outcome);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{DeviceInitializer, DeviceSession};
    use crate::simulator::{SimCall, SimulatedRadio};
    use rfburst_core::{CancelToken, InitConfig, SchedulingParams, StreamCode};
    use std::sync::Arc;

    fn session(radio: &SimulatedRadio) -> DeviceSession {
        let config = DeviceConfig {
            timeout: 0.05,
            debug_settings: false,
            ..Default::default()
        }
        .with_buffer_sizes(&SchedulingParams::default());
        let init = InitConfig {
            retry_delay_ms: 1,
            lo_lock_poll_us: 10,
            settle_delay_us: 0,
        };
        DeviceInitializer::new(Arc::new(radio.clone()), Arc::new(config), init, CancelToken::new())
            .run()
            .unwrap()
    }

    fn last_transfer(radio: &SimulatedRadio) -> SimCall {
        radio
            .journal()
            .into_iter()
            .rev()
            .find(|c| matches!(c, SimCall::Write { .. } | SimCall::Read { .. }))
            .unwrap()
    }

    #[test]
    fn test_receive_overflow() {
        let radio = SimulatedRadio::new();
        let mut session = session(&radio);
        let (_, rx) = session.transceivers();
        let mut rx = rx.unwrap();

        radio.script_transfers(Direction::Rx, [Err(StreamCode::Overflow)]);
        let mut buffer = vec![Sample::new(0.0, 0.0); 1000];
        let outcome = rx.receive(1_000_000, &mut buffer).unwrap();

        assert_eq!(outcome.kind, OutcomeKind::Overflow);
        assert!(!outcome.is_success());
        assert_eq!((outcome.actual, outcome.requested), (-4, 1000));
    }

    #[test]
    fn test_receive_requires_exact_count() {
        let radio = SimulatedRadio::new();
        let mut session = session(&radio);
        let (_, rx) = session.transceivers();
        let mut rx = rx.unwrap();

        radio.script_transfers(Direction::Rx, [Ok(999), Ok(0), Ok(1000)]);
        let mut buffer = vec![Sample::new(0.0, 0.0); 1000];
        assert!(!rx.receive(0, &mut buffer).unwrap().is_success());
        assert!(!rx.receive(0, &mut buffer).unwrap().is_success());
        assert!(rx.receive(0, &mut buffer).unwrap().is_success());
    }

    #[test]
    fn test_send_ack_status_timeout() {
        let radio = SimulatedRadio::new();
        let mut session = session(&radio);
        let (tx, _) = session.transceivers();
        let mut tx = tx.unwrap();

        radio.script_transfers(Direction::Tx, [Ok(100)]);
        radio.script_status([Err(StreamCode::Timeout)]);
        let samples = vec![Sample::new(1.0, 0.0); 100];
        let outcome = tx.send(0, &samples, true).unwrap();

        assert_eq!(outcome.actual, 100);
        assert_eq!(outcome.kind, OutcomeKind::Timeout);
        assert_eq!(outcome.ack, AckStatus::Failed(OutcomeKind::Timeout));
        assert!(!outcome.is_success());
        assert!(radio.journal().contains(&SimCall::ReadStatus { channel_mask: 1 }));
    }

    #[test]
    fn test_send_ack_confirmed() {
        let radio = SimulatedRadio::new();
        let mut session = session(&radio);
        let (tx, _) = session.transceivers();
        let mut tx = tx.unwrap();

        radio.script_transfers(Direction::Tx, [Ok(100)]);
        let samples = vec![Sample::new(1.0, 0.0); 100];
        let outcome = tx.send(0, &samples, true).unwrap();
        assert_eq!(outcome.ack, AckStatus::Confirmed);
        assert!(outcome.is_success());
    }

    #[test]
    fn test_send_without_ack_skips_status() {
        let radio = SimulatedRadio::new();
        let mut session = session(&radio);
        let (tx, _) = session.transceivers();
        let mut tx = tx.unwrap();

        radio.script_transfers(Direction::Tx, [Ok(100), Err(StreamCode::Underflow)]);
        let samples = vec![Sample::new(1.0, 0.0); 100];
        assert!(tx.send(0, &samples, false).unwrap().is_success());

        let failed = tx.send(0, &samples, true).unwrap();
        assert_eq!(failed.kind, OutcomeKind::Underflow);
        assert_eq!(failed.ack, AckStatus::Skipped);
        assert_eq!(radio.count("read_status"), 0);
    }

    #[test]
    fn test_send_short_count_fails_without_ack() {
        let radio = SimulatedRadio::new();
        let mut session = session(&radio);
        let (tx, _) = session.transceivers();
        let mut tx = tx.unwrap();

        radio.script_transfers(Direction::Tx, [Ok(60), Ok(0), Ok(100)]);
        let samples = vec![Sample::new(1.0, 0.0); 100];

        let short = tx.send(0, &samples, false).unwrap();
        assert!(!short.is_success());
        assert_eq!(short.kind, OutcomeKind::Unknown);
        assert_eq!((short.actual, short.requested), (60, 100));
        assert_eq!(short.ack, AckStatus::NotRequested);

        let none = tx.send(0, &samples, false).unwrap();
        assert!(!none.is_success());
        assert_eq!(none.actual, 0);

        assert!(tx.send(0, &samples, false).unwrap().is_success());
        assert_eq!(radio.count("read_status"), 0);
    }

    #[test]
    fn test_late_burst_does_not_poison_next_ack() {
        let radio = SimulatedRadio::new();
        let mut session = session(&radio);
        std::thread::sleep(Duration::from_millis(1));
        let now = session.hardware_time().unwrap();
        let (tx, _) = session.transceivers();
        let mut tx = tx.unwrap();
        let samples = vec![Sample::new(1.0, 0.0); 16];

        let late = tx.send(0, &samples, true).unwrap();
        assert_eq!(late.kind, OutcomeKind::TimeError);
        assert_eq!(late.ack, AckStatus::Skipped);

        let tick = rfburst_core::time_ns_to_ticks(now + 5_000_000, 133.333333e6);
        let ok = tx.send(tick, &samples, true).unwrap();
        assert!(ok.is_success(), "{}", ok);
        assert_eq!(ok.ack, AckStatus::Confirmed);
    }

    #[test]
    fn test_empty_burst_requests_one_sample() {
        let radio = SimulatedRadio::new();
        let mut session = session(&radio);
        let (tx, rx) = session.transceivers();
        let (mut tx, mut rx) = (tx.unwrap(), rx.unwrap());

        radio.script_transfers(Direction::Tx, [Ok(1)]);
        let outcome = tx.send(42, &[], false).unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.requested, 1);
        assert!(matches!(last_transfer(&radio), SimCall::Write { requested: 1, .. }));

        radio.script_transfers(Direction::Rx, [Ok(1)]);
        let outcome = rx.receive(42, &mut []).unwrap();
        assert!(outcome.is_success());
        assert!(matches!(last_transfer(&radio), SimCall::Read { requested: 1, .. }));
    }

    #[test]
    fn test_burst_time_from_tick() {
        let radio = SimulatedRadio::new();
        let mut session = session(&radio);
        let (tx, _) = session.transceivers();
        let mut tx = tx.unwrap();

        radio.script_transfers(Direction::Tx, [Ok(1)]);
        let outcome = tx.send(133_333_333, &[], false).unwrap();
        assert_eq!(outcome.burst_time_ns, 1_000_000_000);
        match last_transfer(&radio) {
            SimCall::Write { flags, time_ns, .. } => {
                assert_eq!(time_ns, 1_000_000_000);
                assert!(flags.contains(StreamFlags::HAS_TIME | StreamFlags::END_BURST));
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[test]
    fn test_timed_burst_through_simulator() {
        let radio = SimulatedRadio::new();
        let mut session = session(&radio);
        let now = session.hardware_time().unwrap();
        let (tx, _) = session.transceivers();
        let mut tx = tx.unwrap();

        let f_clk = 133.333333e6;
        let tick = rfburst_core::time_ns_to_ticks(now + 5_000_000, f_clk);
        let samples = vec![Sample::new(1.0, 0.0); 160];
        let outcome = tx.send(tick, &samples, true).unwrap();
        assert!(outcome.is_success(), "{}", outcome);
        assert!(outcome.lead_seconds() > 0.0);
    }
}
