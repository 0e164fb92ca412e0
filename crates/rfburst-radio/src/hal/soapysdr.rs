//! # SoapySDR Driver
//!
//! Vendor-neutral hardware access through the SoapySDR abstraction layer.
//!
//! ## Requirements
//!
//! Install libSoapySDR and the module for your device:
//! - **Linux**: `sudo apt install libsoapysdr-dev soapysdr-tools soapysdr-module-lms7`
//! - **macOS**: `brew install soapysdr`
//!
//! Build with `--features soapysdr`. Without the feature the driver is still
//! registered but every `open` reports [`RadioError::LibraryNotFound`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rfburst_radio::hal::create_default_registry;
//!
//! let driver = create_default_registry().get("soapysdr")?;
//! let device = driver.open("driver=lime")?;
//! ```

use super::RadioDriver;
use crate::device::RadioResult;
use std::collections::BTreeMap;

#[cfg(feature = "soapysdr")]
use super::{RadioDevice, RadioStream, StreamStatus, Transfer};
#[cfg(feature = "soapysdr")]
use super::soapysdr_ffi::{
    self, SoapyDevice, SoapyStream, SOAPY_SDR_CF32, SOAPY_SDR_RX, SOAPY_SDR_TX,
};
#[cfg(feature = "soapysdr")]
use rfburst_core::{Direction, Sample, SampleFormat, StreamCode, StreamFlags, StreamResult};
#[cfg(feature = "soapysdr")]
use std::ffi::{c_int, c_void};
#[cfg(feature = "soapysdr")]
use std::time::Duration;

/// SoapySDR device driver.
pub struct SoapySdrDriver {
    #[cfg(feature = "soapysdr")]
    available: bool,
    #[cfg(not(feature = "soapysdr"))]
    _phantom: std::marker::PhantomData<()>,
}

impl SoapySdrDriver {
    pub fn new() -> Self {
        #[cfg(feature = "soapysdr")]
        {
            let available = soapysdr_ffi::is_available();
            if !available {
                tracing::debug!("SoapySDR driver in stub mode (no libSoapySDR)");
            }
            Self { available }
        }

        #[cfg(not(feature = "soapysdr"))]
        {
            Self {
                _phantom: std::marker::PhantomData,
            }
        }
    }

    /// True if libSoapySDR was loaded.
    pub fn is_available(&self) -> bool {
        #[cfg(feature = "soapysdr")]
        {
            self.available
        }
        #[cfg(not(feature = "soapysdr"))]
        {
            false
        }
    }
}

impl Default for SoapySdrDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioDriver for SoapySdrDriver {
    fn name(&self) -> &str {
        "soapysdr"
    }

    #[cfg(feature = "soapysdr")]
    fn open(&self, args: &str) -> RadioResult<Option<Box<dyn super::RadioDevice>>> {
        let parsed = parse_soapy_args(args);
        tracing::debug!(
            driver = parsed.get("driver").map(String::as_str).unwrap_or(""),
            "SoapySDR make '{}'",
            args
        );
        Ok(SoapyDevice::make(args)?
            .map(|device| Box::new(SoapySdrDevice { device }) as Box<dyn RadioDevice>))
    }

    #[cfg(not(feature = "soapysdr"))]
    fn open(&self, _args: &str) -> RadioResult<Option<Box<dyn super::RadioDevice>>> {
        Err(crate::device::RadioError::LibraryNotFound)
    }
}

/// Parse a SoapySDR markup string ("key=value,key=value").
pub fn parse_soapy_args(args: &str) -> BTreeMap<String, String> {
    args.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

#[cfg(feature = "soapysdr")]
fn direction_code(direction: Direction) -> c_int {
    match direction {
        Direction::Tx => SOAPY_SDR_TX,
        Direction::Rx => SOAPY_SDR_RX,
    }
}

#[cfg(feature = "soapysdr")]
fn decode_count(ret: c_int) -> StreamResult<usize> {
    if ret >= 0 {
        Ok(ret as usize)
    } else {
        Err(StreamCode::from_raw(ret))
    }
}

#[cfg(feature = "soapysdr")]
fn decode_status(ret: c_int) -> Result<(), StreamCode> {
    if ret >= 0 {
        Ok(())
    } else {
        Err(StreamCode::from_raw(ret))
    }
}

/// One open SoapySDR device.
#[cfg(feature = "soapysdr")]
pub struct SoapySdrDevice {
    device: SoapyDevice,
}

#[cfg(feature = "soapysdr")]
impl RadioDevice for SoapySdrDevice {
    fn hardware_key(&self) -> String {
        self.device.hardware_key()
    }

    fn set_clock_source(&self, source: &str) -> RadioResult<()> {
        self.device.set_clock_source(source)
    }

    fn clock_source(&self) -> RadioResult<String> {
        self.device.clock_source()
    }

    fn set_time_source(&self, source: &str) -> RadioResult<()> {
        self.device.set_time_source(source)
    }

    fn time_source(&self) -> RadioResult<String> {
        self.device.time_source()
    }

    fn set_master_clock_rate(&self, rate: f64) -> RadioResult<()> {
        self.device.set_master_clock_rate(rate)
    }

    fn master_clock_rate(&self) -> RadioResult<f64> {
        self.device.master_clock_rate()
    }

    fn set_sample_rate(&self, direction: Direction, channel: usize, rate: f64) -> RadioResult<()> {
        self.device.set_sample_rate(direction_code(direction), channel, rate)
    }

    fn sample_rate(&self, direction: Direction, channel: usize) -> RadioResult<f64> {
        self.device.sample_rate(direction_code(direction), channel)
    }

    fn set_bandwidth(&self, direction: Direction, channel: usize, bandwidth: f64) -> RadioResult<()> {
        self.device.set_bandwidth(direction_code(direction), channel, bandwidth)
    }

    fn bandwidth(&self, direction: Direction, channel: usize) -> RadioResult<f64> {
        self.device.bandwidth(direction_code(direction), channel)
    }

    fn set_gain(&self, direction: Direction, channel: usize, gain_db: f64) -> RadioResult<()> {
        self.device.set_gain(direction_code(direction), channel, gain_db)
    }

    fn gain(&self, direction: Direction, channel: usize) -> RadioResult<f64> {
        self.device.gain(direction_code(direction), channel)
    }

    fn set_antenna(&self, direction: Direction, channel: usize, name: &str) -> RadioResult<()> {
        self.device.set_antenna(direction_code(direction), channel, name)
    }

    fn antenna(&self, direction: Direction, channel: usize) -> RadioResult<String> {
        self.device.antenna(direction_code(direction), channel)
    }

    fn set_frequency(&self, direction: Direction, channel: usize, frequency: f64) -> RadioResult<()> {
        self.device.set_frequency(direction_code(direction), channel, frequency)
    }

    fn frequency(&self, direction: Direction, channel: usize) -> RadioResult<f64> {
        self.device.frequency(direction_code(direction), channel)
    }

    fn read_sensor(&self, direction: Direction, channel: usize, key: &str) -> RadioResult<String> {
        self.device.read_sensor(direction_code(direction), channel, key)
    }

    fn hardware_time(&self) -> RadioResult<i64> {
        self.device.hardware_time()
    }

    fn setup_stream(
        &self,
        direction: Direction,
        format: SampleFormat,
        channels: &[usize],
    ) -> RadioResult<Option<Box<dyn RadioStream>>> {
        let wire = match format {
            SampleFormat::ComplexFloat32 => SOAPY_SDR_CF32,
        };
        Ok(self
            .device
            .setup_stream(direction_code(direction), wire, channels)?
            .map(|stream| Box::new(SoapySdrStream { direction, stream }) as Box<dyn RadioStream>))
    }

    fn unmake(self: Box<Self>) -> RadioResult<()> {
        self.device.unmake()
    }
}

/// One open SoapySDR stream carrying CF32 samples.
#[cfg(feature = "soapysdr")]
pub struct SoapySdrStream {
    direction: Direction,
    stream: SoapyStream,
}

#[cfg(feature = "soapysdr")]
impl RadioStream for SoapySdrStream {
    fn direction(&self) -> Direction {
        self.direction
    }

    fn mtu(&self) -> usize {
        self.stream.mtu()
    }

    fn activate(&mut self, flags: StreamFlags, time_ns: i64) -> Result<(), StreamCode> {
        let ret = self.stream.activate(flags.bits(), time_ns);
        if ret != 0 {
            tracing::warn!(
                "SoapySDR activateStream ({}) failed: {}",
                self.direction,
                soapysdr_ffi::err_to_str(ret)
            );
        }
        decode_status(ret)
    }

    fn deactivate(&mut self, flags: StreamFlags, time_ns: i64) -> Result<(), StreamCode> {
        let ret = self.stream.deactivate(flags.bits(), time_ns);
        if ret != 0 {
            tracing::warn!(
                "SoapySDR deactivateStream ({}) failed: {}",
                self.direction,
                soapysdr_ffi::err_to_str(ret)
            );
        }
        decode_status(ret)
    }

    fn write(
        &mut self,
        samples: &[Sample],
        flags: StreamFlags,
        time_ns: i64,
        timeout: Duration,
    ) -> Transfer {
        let (ret, flags_out) = self.stream.write(
            samples.as_ptr() as *const c_void,
            samples.len(),
            flags.bits(),
            time_ns,
            soapysdr_ffi::timeout_us(timeout),
        );
        Transfer::new(decode_count(ret), StreamFlags::from_bits(flags_out), time_ns)
    }

    fn read(
        &mut self,
        buffer: &mut [Sample],
        flags: StreamFlags,
        time_ns: i64,
        timeout: Duration,
    ) -> Transfer {
        let (ret, flags_out, time_out) = self.stream.read(
            buffer.as_mut_ptr() as *mut c_void,
            buffer.len(),
            flags.bits(),
            time_ns,
            soapysdr_ffi::timeout_us(timeout),
        );
        Transfer::new(decode_count(ret), StreamFlags::from_bits(flags_out), time_out)
    }

    fn read_status(&mut self, channel_mask: u32, timeout: Duration) -> StreamStatus {
        let raw = self
            .stream
            .read_status(channel_mask as usize, soapysdr_ffi::timeout_us(timeout));
        let mut flags = StreamFlags::from_bits(raw.flags);
        // Some modules report the end of burst as the return value itself.
        if raw.ret == StreamFlags::END_BURST.bits() {
            flags |= StreamFlags::END_BURST;
        }
        StreamStatus {
            result: decode_status(raw.ret),
            channel_mask: raw.channel_mask as u32,
            flags,
            time_ns: raw.time_ns,
        }
    }

    fn close(self: Box<Self>) -> Result<(), StreamCode> {
        decode_status(self.stream.close())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_soapy_args() {
        let args = parse_soapy_args("driver=lime, serial=0009060B00471B22,bogus");
        assert_eq!(args.get("driver").map(String::as_str), Some("lime"));
        assert_eq!(args.get("serial").map(String::as_str), Some("0009060B00471B22"));
        assert_eq!(args.len(), 2);
        assert!(parse_soapy_args("").is_empty());
    }

    #[cfg(not(feature = "soapysdr"))]
    #[test]
    fn test_stub_reports_missing_library() {
        let driver = SoapySdrDriver::new();
        assert!(!driver.is_available());
        assert!(matches!(
            driver.open("driver=lime"),
            Err(crate::device::RadioError::LibraryNotFound)
        ));
    }

    #[cfg(feature = "soapysdr")]
    #[test]
    fn test_decode_driver_returns() {
        assert_eq!(decode_count(83_333), Ok(83_333));
        assert_eq!(decode_count(-4), Err(StreamCode::Overflow));
        assert_eq!(decode_status(0), Ok(()));
        assert_eq!(decode_status(-1), Err(StreamCode::Timeout));
        assert_eq!(direction_code(Direction::Tx), 0);
        assert_eq!(direction_code(Direction::Rx), 1);
    }
}
