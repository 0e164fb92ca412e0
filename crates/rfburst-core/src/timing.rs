//! # Tick Timeline
//!
//! Hardware time on the radio is an integer tick counter running at the
//! master clock rate `f_clk`. This module converts between ticks and
//! nanoseconds without accumulating floating point error, and plans the
//! absolute tick timeline of the RX and TX burst schedules.
//!
//! ## Timeline
//!
//! ```text
//!  now        rx_start                  tx_start
//!   │  lead      │◄──── sep ───►│◄─ P ─►│
//!   ├────────────┼──────────────┼───────┼──────── ticks
//!               RX n          (tx n-1) TX n
//! ```
//!
//! Both schedules advance by the same `ticks_per_period`. RX always arms at
//! least one full period (plus the RX/TX separation) before TX fires.

use crate::config::{ConfigError, DeviceConfig, SchedulingParams};

const NS_PER_SEC: i64 = 1_000_000_000;

/// Convert a tick count to nanoseconds at the given tick rate.
///
/// Splits the computation into whole seconds and a fractional remainder so
/// that large tick counts keep nanosecond accuracy.
pub fn ticks_to_time_ns(ticks: i64, rate: f64) -> i64 {
    let rate_int = rate as i64;
    if rate_int == 0 {
        return ((ticks as f64 / rate) * 1e9).round() as i64;
    }
    let full = ticks / rate_int;
    let err = ticks - full * rate_int;
    let part = full as f64 * (rate - rate_int as f64);
    let frac = ((err as f64 - part) * 1e9) / rate;
    full * NS_PER_SEC + frac.round() as i64
}

/// Convert nanoseconds to a tick count at the given tick rate.
///
/// Inverse of [`ticks_to_time_ns`]: `time_ns_to_ticks(ticks_to_time_ns(t, r), r) == t`
/// for any rate below 1 GHz.
pub fn time_ns_to_ticks(time_ns: i64, rate: f64) -> i64 {
    let rate_int = rate as i64;
    if rate_int == 0 {
        return ((time_ns as f64 / 1e9) * rate).round() as i64;
    }
    let full = time_ns / NS_PER_SEC;
    let err = time_ns - full * NS_PER_SEC;
    let part = full as f64 * (rate - rate_int as f64);
    let frac = part + (err as f64 * rate) / 1e9;
    full * rate_int + frac.round() as i64
}

/// Convert a span in seconds to ticks.
#[inline]
pub fn seconds_to_ticks(seconds: f64, rate: f64) -> i64 {
    time_ns_to_ticks((seconds * 1e9) as i64, rate)
}

/// Absolute start ticks and cadence of the RX and TX burst schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstTimeline {
    /// Hardware tick at which the plan was made
    pub now_tick: i64,
    /// First RX burst tick
    pub rx_start_tick: i64,
    /// First TX burst tick
    pub tx_start_tick: i64,
    /// Tick increment between successive bursts on one chain
    pub ticks_per_period: i64,
}

impl BurstTimeline {
    /// Plan the timeline from the current hardware time.
    ///
    /// Rejects scheduling parameters that fail [`SchedulingParams::validate`].
    pub fn plan(
        now_ns: i64,
        device: &DeviceConfig,
        params: &SchedulingParams,
    ) -> Result<Self, ConfigError> {
        params.validate()?;
        let f_clk = device.master_clock_rate;
        let ticks_per_period = params.ticks_per_period(f_clk);
        if ticks_per_period < 1 {
            return Err(ConfigError::ValidationError(format!(
                "burst_period {} s is shorter than one tick at {} Hz",
                params.burst_period, f_clk
            )));
        }

        let now_tick = time_ns_to_ticks(now_ns, f_clk);
        let tx_start_tick =
            now_tick + seconds_to_ticks(params.time_in_future + 2.0 * params.burst_period, f_clk);
        let rx_start_tick =
            tx_start_tick - ticks_per_period - seconds_to_ticks(params.rx_tx_separation, f_clk);

        Ok(Self {
            now_tick,
            rx_start_tick,
            tx_start_tick,
            ticks_per_period,
        })
    }

    /// Ticks by which the first RX burst precedes the first TX burst.
    #[inline]
    pub fn rx_lead_ticks(&self) -> i64 {
        self.tx_start_tick - self.rx_start_tick
    }

    /// Tick of burst `index` on the RX schedule.
    #[inline]
    pub fn rx_tick(&self, index: i64) -> i64 {
        self.rx_start_tick + index * self.ticks_per_period
    }

    /// Tick of burst `index` on the TX schedule.
    #[inline]
    pub fn tx_tick(&self, index: i64) -> i64 {
        self.tx_start_tick + index * self.ticks_per_period
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const F_CLK: f64 = 133.333333e6;

    #[test]
    fn test_ticks_round_trip() {
        for &t in &[0i64, 1, 7, 133_333_332, 133_333_333, 133_333_334, 987_654_321_012, 40_000_000_000_000] {
            let ns = ticks_to_time_ns(t, F_CLK);
            assert_eq!(time_ns_to_ticks(ns, F_CLK), t, "tick {}", t);
        }
    }

    #[test]
    fn test_round_trip_integer_rate() {
        for t in (0..10_000_000i64).step_by(999_983) {
            let ns = ticks_to_time_ns(t, 100e6);
            assert_eq!(ns, t * 10);
            assert_eq!(time_ns_to_ticks(ns, 100e6), t);
        }
    }

    #[test]
    fn test_one_second() {
        assert_eq!(time_ns_to_ticks(1_000_000_000, F_CLK), 133_333_333);
        assert_eq!(ticks_to_time_ns(133_333_333, F_CLK), 1_000_000_000);
        assert_eq!(seconds_to_ticks(0.5, 100e6), 50_000_000);
    }

    #[test]
    fn test_timeline_rx_leads_tx() {
        let device = DeviceConfig::default();
        let params = SchedulingParams::default();
        let timeline = BurstTimeline::plan(5_000_000_000, &device, &params).unwrap();

        assert!(timeline.rx_start_tick < timeline.tx_start_tick);
        assert!(timeline.rx_lead_ticks() >= timeline.ticks_per_period);
        assert!(timeline.rx_start_tick > timeline.now_tick);
        assert_eq!(timeline.ticks_per_period, 13_333_333);
        assert_eq!(timeline.tx_tick(2) - timeline.tx_tick(1), timeline.ticks_per_period);
        assert_eq!(timeline.rx_tick(0), timeline.rx_start_tick);
    }

    #[test]
    fn test_timeline_invariant_over_parameters() {
        let device = DeviceConfig::default();
        for &(period, sep, lead) in &[
            (100e-3, 1e-3, 1.0),
            (10e-3, 0.0, 0.0),
            (1e-3, 0.999e-3, 0.25),
            (2.0, 1.5, 3.0),
        ] {
            let params = SchedulingParams {
                burst_period: period,
                rx_tx_separation: sep,
                time_in_future: lead,
                tx_burst_length: 0.0,
                rx_burst_length: 0.0,
            };
            let timeline = BurstTimeline::plan(123_456_789, &device, &params).unwrap();
            assert!(timeline.rx_start_tick < timeline.tx_start_tick);
            assert!(timeline.rx_lead_ticks() >= timeline.ticks_per_period);
            assert!(timeline.rx_start_tick > timeline.now_tick);
        }
    }

    #[test]
    fn test_timeline_rejects_sub_tick_period() {
        let device = DeviceConfig::default();
        let params = SchedulingParams {
            burst_period: 1e-12,
            tx_burst_length: 0.0,
            rx_burst_length: 0.0,
            rx_tx_separation: 0.0,
            time_in_future: 0.0,
        };
        let err = BurstTimeline::plan(0, &device, &params).unwrap_err();
        assert!(err.to_string().contains("shorter than one tick"));
    }

    #[test]
    fn test_timeline_rejects_negative_separation() {
        let device = DeviceConfig::default();
        let params = SchedulingParams {
            rx_tx_separation: -0.5,
            ..Default::default()
        };
        assert!(BurstTimeline::plan(0, &device, &params).is_err());

        let params = SchedulingParams {
            time_in_future: f64::NAN,
            ..Default::default()
        };
        assert!(BurstTimeline::plan(0, &device, &params).is_err());
    }
}
