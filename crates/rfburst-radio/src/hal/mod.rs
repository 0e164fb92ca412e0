//! # Radio Driver Capability
//!
//! The operations the burst tester needs from a radio driver, modeled on the
//! SoapySDR device API:
//!
//! - **RadioDriver**: opens a device from connection arguments
//! - **RadioDevice**: clock, time, per-chain tuning, sensors, hardware time
//! - **RadioStream**: timestamped reads/writes and end-of-burst status
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │   DeviceInitializer  ·  Transmitter  ·  Receiver         │
//! ├──────────────────────────────────────────────────────────┤
//! │        RadioDriver / RadioDevice / RadioStream           │
//! ├─────────────────────────┬────────────────────────────────┤
//! │   SimulatedRadio        │   SoapySdrDriver (libloading)  │
//! └─────────────────────────┴────────────────────────────────┘
//! ```
//!
//! Handles are owned boxes. A driver that fails to produce a handle returns
//! `Ok(None)` (the null handle); the caller decides how to treat it.

use crate::device::{RadioError, RadioResult};
use rfburst_core::{Direction, Sample, SampleFormat, StreamCode, StreamFlags, StreamResult};
use std::sync::Arc;
use std::time::Duration;

pub mod soapysdr;
#[cfg(feature = "soapysdr")]
pub mod soapysdr_ffi;

pub use soapysdr::SoapySdrDriver;

/// Sensor reporting local oscillator lock.
pub const LO_LOCKED_SENSOR: &str = "lo_locked";

/// Return of one stream read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    /// Samples transferred, or the negative driver code
    pub result: StreamResult<usize>,
    /// Flags reported back by the driver
    pub flags: StreamFlags,
    /// Timestamp reported back by the driver (ns)
    pub time_ns: i64,
}

impl Transfer {
    pub fn new(result: StreamResult<usize>, flags: StreamFlags, time_ns: i64) -> Self {
        Self { result, flags, time_ns }
    }
}

/// Return of one stream status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamStatus {
    /// `Ok` when an event was reported, or the negative driver code
    pub result: Result<(), StreamCode>,
    /// Channels the event applies to
    pub channel_mask: u32,
    /// Event flags (END_BURST on a normal burst end)
    pub flags: StreamFlags,
    /// Event timestamp (ns)
    pub time_ns: i64,
}

impl StreamStatus {
    /// True if the driver reported a normal end of burst.
    pub fn is_end_of_burst(&self) -> bool {
        self.result.is_ok() && self.flags.contains(StreamFlags::END_BURST)
    }
}

/// Factory that opens devices.
pub trait RadioDriver: Send + Sync {
    /// Driver name (e.g. "sim", "soapysdr").
    fn name(&self) -> &str;

    /// Open a device from connection arguments.
    ///
    /// `Ok(None)` is the null handle.
    fn open(&self, args: &str) -> RadioResult<Option<Box<dyn RadioDevice>>>;
}

/// One open radio device.
///
/// Methods take `&self`: the TX and RX threads share the device for
/// hardware time queries while each owns its own stream.
pub trait RadioDevice: Send + Sync {
    /// Driver hardware key (e.g. "LimeSDR-USB").
    fn hardware_key(&self) -> String;

    fn set_clock_source(&self, source: &str) -> RadioResult<()>;
    fn clock_source(&self) -> RadioResult<String>;

    fn set_time_source(&self, source: &str) -> RadioResult<()>;
    fn time_source(&self) -> RadioResult<String>;

    fn set_master_clock_rate(&self, rate: f64) -> RadioResult<()>;
    fn master_clock_rate(&self) -> RadioResult<f64>;

    fn set_sample_rate(&self, direction: Direction, channel: usize, rate: f64) -> RadioResult<()>;
    fn sample_rate(&self, direction: Direction, channel: usize) -> RadioResult<f64>;

    fn set_bandwidth(&self, direction: Direction, channel: usize, bandwidth: f64) -> RadioResult<()>;
    fn bandwidth(&self, direction: Direction, channel: usize) -> RadioResult<f64>;

    fn set_gain(&self, direction: Direction, channel: usize, gain_db: f64) -> RadioResult<()>;
    fn gain(&self, direction: Direction, channel: usize) -> RadioResult<f64>;

    fn set_antenna(&self, direction: Direction, channel: usize, name: &str) -> RadioResult<()>;
    fn antenna(&self, direction: Direction, channel: usize) -> RadioResult<String>;

    fn set_frequency(&self, direction: Direction, channel: usize, frequency: f64) -> RadioResult<()>;
    fn frequency(&self, direction: Direction, channel: usize) -> RadioResult<f64>;

    /// Read a channel sensor as its string value (e.g. "true").
    fn read_sensor(&self, direction: Direction, channel: usize, key: &str) -> RadioResult<String>;

    /// Current hardware time in nanoseconds.
    fn hardware_time(&self) -> RadioResult<i64>;

    /// Open a stream. `Ok(None)` is the null handle.
    fn setup_stream(
        &self,
        direction: Direction,
        format: SampleFormat,
        channels: &[usize],
    ) -> RadioResult<Option<Box<dyn RadioStream>>>;

    /// Release the device. All streams must be closed first.
    fn unmake(self: Box<Self>) -> RadioResult<()>;
}

/// One open stream of a device.
pub trait RadioStream: Send {
    fn direction(&self) -> Direction;

    /// Maximum samples per transfer.
    fn mtu(&self) -> usize;

    fn activate(&mut self, flags: StreamFlags, time_ns: i64) -> Result<(), StreamCode>;

    fn deactivate(&mut self, flags: StreamFlags, time_ns: i64) -> Result<(), StreamCode>;

    /// Blocking write of `samples` at `time_ns` (when flagged HAS_TIME).
    fn write(
        &mut self,
        samples: &[Sample],
        flags: StreamFlags,
        time_ns: i64,
        timeout: Duration,
    ) -> Transfer;

    /// Blocking read into `buffer` starting at `time_ns` (when flagged HAS_TIME).
    fn read(
        &mut self,
        buffer: &mut [Sample],
        flags: StreamFlags,
        time_ns: i64,
        timeout: Duration,
    ) -> Transfer;

    /// Blocking wait for the next stream event on the masked channels.
    fn read_status(&mut self, channel_mask: u32, timeout: Duration) -> StreamStatus;

    fn close(self: Box<Self>) -> Result<(), StreamCode>;
}

/// Registry of available radio drivers.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: Vec<Arc<dyn RadioDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, driver: Arc<dyn RadioDriver>) {
        self.drivers.push(driver);
    }

    /// Get a driver by name.
    pub fn get(&self, name: &str) -> RadioResult<Arc<dyn RadioDriver>> {
        self.drivers
            .iter()
            .find(|d| d.name() == name)
            .cloned()
            .ok_or_else(|| {
                RadioError::DeviceNotFound(format!(
                    "unknown driver '{}' (available: {})",
                    name,
                    self.list().join(", ")
                ))
            })
    }

    /// Names of all registered drivers.
    pub fn list(&self) -> Vec<&str> {
        self.drivers.iter().map(|d| d.name()).collect()
    }
}

/// Registry with the built-in drivers: the simulator and SoapySDR.
pub fn create_default_registry() -> DriverRegistry {
    let mut registry = DriverRegistry::new();
    registry.register(Arc::new(crate::simulator::SimulatedRadio::new()));
    registry.register(Arc::new(SoapySdrDriver::new()));
    registry
}
