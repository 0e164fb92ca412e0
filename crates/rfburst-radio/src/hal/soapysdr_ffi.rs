//! # SoapySDR FFI Bindings
//!
//! Low-level bindings to the libSoapySDR C API.
//!
//! The library is loaded at runtime with `libloading`, so the same binary
//! runs with or without SoapySDR installed. Only the calls the burst tester
//! needs are bound: device make/unmake, clock and time sources, per-channel
//! tuning, channel sensors, hardware time and timed streaming with status.
//!
//! Stream calls return the raw SoapySDR integer; decoding into
//! [`StreamCode`](rfburst_core::StreamCode) happens in the driver layer.

use std::ffi::{c_char, c_double, c_int, c_long, c_longlong, c_void, CStr, CString};
use std::ptr;
use std::sync::OnceLock;

use libloading::{Library, Symbol};

use crate::device::{RadioError, RadioResult};

/// SoapySDR device handle (opaque pointer).
pub type SoapyDeviceHandle = *mut c_void;

/// SoapySDR stream handle (opaque pointer).
pub type SoapyStreamHandle = *mut c_void;

/// Stream direction constants.
pub const SOAPY_SDR_TX: c_int = 0;
pub const SOAPY_SDR_RX: c_int = 1;

/// Stream format string for complex float32.
pub const SOAPY_SDR_CF32: &[u8] = b"CF32\0";

/// `readStreamStatus` argument block filled by the driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawStatus {
    pub ret: c_int,
    pub channel_mask: usize,
    pub flags: c_int,
    pub time_ns: i64,
}

type StrGetter = unsafe extern "C" fn(SoapyDeviceHandle) -> *mut c_char;
type StrSetter = unsafe extern "C" fn(SoapyDeviceHandle, *const c_char) -> c_int;
type ChanSetter = unsafe extern "C" fn(SoapyDeviceHandle, c_int, usize, c_double) -> c_int;
type ChanGetter = unsafe extern "C" fn(SoapyDeviceHandle, c_int, usize) -> c_double;

/// Loaded libSoapySDR library and function pointers.
struct SoapySdrLib {
    _lib: Library,
    make_str_args: Symbol<'static, unsafe extern "C" fn(*const c_char) -> SoapyDeviceHandle>,
    unmake: Symbol<'static, unsafe extern "C" fn(SoapyDeviceHandle) -> c_int>,
    last_error: Symbol<'static, unsafe extern "C" fn() -> *const c_char>,
    err_to_str: Symbol<'static, unsafe extern "C" fn(c_int) -> *const c_char>,
    free: Symbol<'static, unsafe extern "C" fn(*mut c_void)>,
    get_hardware_key: Symbol<'static, StrGetter>,
    // Clocking
    set_clock_source: Symbol<'static, StrSetter>,
    get_clock_source: Symbol<'static, StrGetter>,
    set_time_source: Symbol<'static, StrSetter>,
    get_time_source: Symbol<'static, StrGetter>,
    set_master_clock_rate: Symbol<'static, unsafe extern "C" fn(SoapyDeviceHandle, c_double) -> c_int>,
    get_master_clock_rate: Symbol<'static, unsafe extern "C" fn(SoapyDeviceHandle) -> c_double>,
    get_hardware_time:
        Symbol<'static, unsafe extern "C" fn(SoapyDeviceHandle, *const c_char) -> c_longlong>,
    // Per-channel tuning
    set_sample_rate: Symbol<'static, ChanSetter>,
    get_sample_rate: Symbol<'static, ChanGetter>,
    set_bandwidth: Symbol<'static, ChanSetter>,
    get_bandwidth: Symbol<'static, ChanGetter>,
    set_gain: Symbol<'static, ChanSetter>,
    get_gain: Symbol<'static, ChanGetter>,
    set_antenna:
        Symbol<'static, unsafe extern "C" fn(SoapyDeviceHandle, c_int, usize, *const c_char) -> c_int>,
    get_antenna: Symbol<'static, unsafe extern "C" fn(SoapyDeviceHandle, c_int, usize) -> *mut c_char>,
    set_frequency: Symbol<
        'static,
        unsafe extern "C" fn(SoapyDeviceHandle, c_int, usize, c_double, *const c_void) -> c_int,
    >,
    get_frequency: Symbol<'static, ChanGetter>,
    read_channel_sensor: Symbol<
        'static,
        unsafe extern "C" fn(SoapyDeviceHandle, c_int, usize, *const c_char) -> *mut c_char,
    >,
    // Streaming
    setup_stream: Symbol<
        'static,
        unsafe extern "C" fn(
            SoapyDeviceHandle,
            c_int,
            *const c_char,
            *const usize,
            usize,
            *const c_void,
        ) -> SoapyStreamHandle,
    >,
    close_stream: Symbol<'static, unsafe extern "C" fn(SoapyDeviceHandle, SoapyStreamHandle) -> c_int>,
    get_stream_mtu: Symbol<'static, unsafe extern "C" fn(SoapyDeviceHandle, SoapyStreamHandle) -> usize>,
    activate_stream: Symbol<
        'static,
        unsafe extern "C" fn(SoapyDeviceHandle, SoapyStreamHandle, c_int, c_longlong, usize) -> c_int,
    >,
    deactivate_stream: Symbol<
        'static,
        unsafe extern "C" fn(SoapyDeviceHandle, SoapyStreamHandle, c_int, c_longlong) -> c_int,
    >,
    read_stream: Symbol<
        'static,
        unsafe extern "C" fn(
            SoapyDeviceHandle,
            SoapyStreamHandle,
            *const *mut c_void,
            usize,
            *mut c_int,
            *mut c_longlong,
            c_long,
        ) -> c_int,
    >,
    write_stream: Symbol<
        'static,
        unsafe extern "C" fn(
            SoapyDeviceHandle,
            SoapyStreamHandle,
            *const *const c_void,
            usize,
            *mut c_int,
            c_longlong,
            c_long,
        ) -> c_int,
    >,
    read_stream_status: Symbol<
        'static,
        unsafe extern "C" fn(
            SoapyDeviceHandle,
            SoapyStreamHandle,
            *mut usize,
            *mut c_int,
            *mut c_longlong,
            c_long,
        ) -> c_int,
    >,
}

/// Global library instance (loaded once).
static SOAPYSDR_LIB: OnceLock<Option<SoapySdrLib>> = OnceLock::new();

/// Library names to try on different platforms.
#[cfg(target_os = "linux")]
const LIB_NAMES: &[&str] = &["libSoapySDR.so.0.8", "libSoapySDR.so.0.7", "libSoapySDR.so"];

#[cfg(target_os = "macos")]
const LIB_NAMES: &[&str] = &["libSoapySDR.dylib", "libSoapySDR.0.8.dylib"];

#[cfg(target_os = "windows")]
const LIB_NAMES: &[&str] = &["SoapySDR.dll", "libSoapySDR.dll"];

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
const LIB_NAMES: &[&str] = &["libSoapySDR.so"];

fn load_library() -> Option<SoapySdrLib> {
    for name in LIB_NAMES {
        let Ok(lib) = (unsafe { Library::new(name) }) else {
            continue;
        };
        let result = unsafe {
            // Symbols borrow the library for 'static; the library lives in
            // the same struct and is never dropped once loaded.
            let lib_ref: &'static Library = std::mem::transmute(&lib);

            Some(SoapySdrLib {
                make_str_args: lib_ref.get(b"SoapySDRDevice_makeStrArgs\0").ok()?,
                unmake: lib_ref.get(b"SoapySDRDevice_unmake\0").ok()?,
                last_error: lib_ref.get(b"SoapySDRDevice_lastError\0").ok()?,
                err_to_str: lib_ref.get(b"SoapySDR_errToStr\0").ok()?,
                free: lib_ref.get(b"SoapySDR_free\0").ok()?,
                get_hardware_key: lib_ref.get(b"SoapySDRDevice_getHardwareKey\0").ok()?,
                set_clock_source: lib_ref.get(b"SoapySDRDevice_setClockSource\0").ok()?,
                get_clock_source: lib_ref.get(b"SoapySDRDevice_getClockSource\0").ok()?,
                set_time_source: lib_ref.get(b"SoapySDRDevice_setTimeSource\0").ok()?,
                get_time_source: lib_ref.get(b"SoapySDRDevice_getTimeSource\0").ok()?,
                set_master_clock_rate: lib_ref.get(b"SoapySDRDevice_setMasterClockRate\0").ok()?,
                get_master_clock_rate: lib_ref.get(b"SoapySDRDevice_getMasterClockRate\0").ok()?,
                get_hardware_time: lib_ref.get(b"SoapySDRDevice_getHardwareTime\0").ok()?,
                set_sample_rate: lib_ref.get(b"SoapySDRDevice_setSampleRate\0").ok()?,
                get_sample_rate: lib_ref.get(b"SoapySDRDevice_getSampleRate\0").ok()?,
                set_bandwidth: lib_ref.get(b"SoapySDRDevice_setBandwidth\0").ok()?,
                get_bandwidth: lib_ref.get(b"SoapySDRDevice_getBandwidth\0").ok()?,
                set_gain: lib_ref.get(b"SoapySDRDevice_setGain\0").ok()?,
                get_gain: lib_ref.get(b"SoapySDRDevice_getGain\0").ok()?,
                set_antenna: lib_ref.get(b"SoapySDRDevice_setAntenna\0").ok()?,
                get_antenna: lib_ref.get(b"SoapySDRDevice_getAntenna\0").ok()?,
                set_frequency: lib_ref.get(b"SoapySDRDevice_setFrequency\0").ok()?,
                get_frequency: lib_ref.get(b"SoapySDRDevice_getFrequency\0").ok()?,
                read_channel_sensor: lib_ref.get(b"SoapySDRDevice_readChannelSensor\0").ok()?,
                setup_stream: lib_ref.get(b"SoapySDRDevice_setupStream\0").ok()?,
                close_stream: lib_ref.get(b"SoapySDRDevice_closeStream\0").ok()?,
                get_stream_mtu: lib_ref.get(b"SoapySDRDevice_getStreamMTU\0").ok()?,
                activate_stream: lib_ref.get(b"SoapySDRDevice_activateStream\0").ok()?,
                deactivate_stream: lib_ref.get(b"SoapySDRDevice_deactivateStream\0").ok()?,
                read_stream: lib_ref.get(b"SoapySDRDevice_readStream\0").ok()?,
                write_stream: lib_ref.get(b"SoapySDRDevice_writeStream\0").ok()?,
                read_stream_status: lib_ref.get(b"SoapySDRDevice_readStreamStatus\0").ok()?,
                _lib: lib,
            })
        };

        if result.is_some() {
            tracing::info!("Loaded SoapySDR library: {}", name);
            return result;
        }
    }
    tracing::debug!("SoapySDR library not found");
    None
}

fn get_lib() -> Option<&'static SoapySdrLib> {
    SOAPYSDR_LIB.get_or_init(load_library).as_ref()
}

fn lib() -> RadioResult<&'static SoapySdrLib> {
    get_lib().ok_or(RadioError::LibraryNotFound)
}

/// Check if libSoapySDR is available.
pub fn is_available() -> bool {
    get_lib().is_some()
}

/// Last error message of the calling thread.
pub fn last_error() -> String {
    get_lib()
        .map(|lib| unsafe { borrowed_string((lib.last_error)()) })
        .unwrap_or_default()
}

/// SoapySDR name of an error code (e.g. "TIMEOUT").
pub fn err_to_str(code: c_int) -> String {
    get_lib()
        .map(|lib| unsafe { borrowed_string((lib.err_to_str)(code)) })
        .unwrap_or_else(|| format!("error {}", code))
}

unsafe fn borrowed_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

/// Copy a library-allocated string and release it.
unsafe fn owned_string(lib: &SoapySdrLib, ptr: *mut c_char) -> String {
    let s = borrowed_string(ptr);
    if !ptr.is_null() {
        (lib.free)(ptr as *mut c_void);
    }
    s
}

fn cstring(what: &str, value: &str) -> RadioResult<CString> {
    CString::new(value).map_err(|_| RadioError::ConfigError(format!("{} contains a NUL byte", what)))
}

fn check(operation: &str, ret: c_int) -> RadioResult<()> {
    if ret == 0 {
        Ok(())
    } else {
        Err(RadioError::driver(operation, last_error()))
    }
}

/// Microsecond timeout argument of the stream calls.
pub fn timeout_us(timeout: std::time::Duration) -> c_long {
    c_long::try_from(timeout.as_micros()).unwrap_or(c_long::MAX)
}

/// Owned SoapySDR device.
pub struct SoapyDevice {
    handle: SoapyDeviceHandle,
}

// SAFETY: SoapySDR device calls are internally synchronized; the handle is
// only released through `unmake` or `Drop`, both of which take ownership.
unsafe impl Send for SoapyDevice {}
unsafe impl Sync for SoapyDevice {}

impl SoapyDevice {
    /// Make a device from a markup string ("driver=lime,serial=...").
    ///
    /// Returns `Ok(None)` when the library hands back a null handle.
    pub fn make(args: &str) -> RadioResult<Option<Self>> {
        let lib = lib()?;
        let args = cstring("device args", args)?;
        let handle = unsafe { (lib.make_str_args)(args.as_ptr()) };
        if handle.is_null() {
            tracing::warn!("SoapySDRDevice_make failed: {}", last_error());
            return Ok(None);
        }
        Ok(Some(Self { handle }))
    }

    pub fn hardware_key(&self) -> String {
        match get_lib() {
            Some(lib) => unsafe { owned_string(lib, (lib.get_hardware_key)(self.handle)) },
            None => String::new(),
        }
    }

    pub fn set_clock_source(&self, source: &str) -> RadioResult<()> {
        let lib = lib()?;
        let source = cstring("clock source", source)?;
        check("setClockSource", unsafe { (lib.set_clock_source)(self.handle, source.as_ptr()) })
    }

    pub fn clock_source(&self) -> RadioResult<String> {
        let lib = lib()?;
        Ok(unsafe { owned_string(lib, (lib.get_clock_source)(self.handle)) })
    }

    pub fn set_time_source(&self, source: &str) -> RadioResult<()> {
        let lib = lib()?;
        let source = cstring("time source", source)?;
        check("setTimeSource", unsafe { (lib.set_time_source)(self.handle, source.as_ptr()) })
    }

    pub fn time_source(&self) -> RadioResult<String> {
        let lib = lib()?;
        Ok(unsafe { owned_string(lib, (lib.get_time_source)(self.handle)) })
    }

    pub fn set_master_clock_rate(&self, rate: f64) -> RadioResult<()> {
        let lib = lib()?;
        check("setMasterClockRate", unsafe { (lib.set_master_clock_rate)(self.handle, rate) })
    }

    pub fn master_clock_rate(&self) -> RadioResult<f64> {
        let lib = lib()?;
        Ok(unsafe { (lib.get_master_clock_rate)(self.handle) })
    }

    /// Hardware time in nanoseconds.
    pub fn hardware_time(&self) -> RadioResult<i64> {
        let lib = lib()?;
        Ok(unsafe { (lib.get_hardware_time)(self.handle, ptr::null()) })
    }

    pub fn set_sample_rate(&self, direction: c_int, channel: usize, rate: f64) -> RadioResult<()> {
        let lib = lib()?;
        check("setSampleRate", unsafe { (lib.set_sample_rate)(self.handle, direction, channel, rate) })
    }

    pub fn sample_rate(&self, direction: c_int, channel: usize) -> RadioResult<f64> {
        let lib = lib()?;
        Ok(unsafe { (lib.get_sample_rate)(self.handle, direction, channel) })
    }

    pub fn set_bandwidth(&self, direction: c_int, channel: usize, bw: f64) -> RadioResult<()> {
        let lib = lib()?;
        check("setBandwidth", unsafe { (lib.set_bandwidth)(self.handle, direction, channel, bw) })
    }

    pub fn bandwidth(&self, direction: c_int, channel: usize) -> RadioResult<f64> {
        let lib = lib()?;
        Ok(unsafe { (lib.get_bandwidth)(self.handle, direction, channel) })
    }

    pub fn set_gain(&self, direction: c_int, channel: usize, gain_db: f64) -> RadioResult<()> {
        let lib = lib()?;
        check("setGain", unsafe { (lib.set_gain)(self.handle, direction, channel, gain_db) })
    }

    pub fn gain(&self, direction: c_int, channel: usize) -> RadioResult<f64> {
        let lib = lib()?;
        Ok(unsafe { (lib.get_gain)(self.handle, direction, channel) })
    }

    pub fn set_antenna(&self, direction: c_int, channel: usize, name: &str) -> RadioResult<()> {
        let lib = lib()?;
        let name = cstring("antenna", name)?;
        check("setAntenna", unsafe {
            (lib.set_antenna)(self.handle, direction, channel, name.as_ptr())
        })
    }

    pub fn antenna(&self, direction: c_int, channel: usize) -> RadioResult<String> {
        let lib = lib()?;
        Ok(unsafe { owned_string(lib, (lib.get_antenna)(self.handle, direction, channel)) })
    }

    pub fn set_frequency(&self, direction: c_int, channel: usize, freq_hz: f64) -> RadioResult<()> {
        let lib = lib()?;
        check("setFrequency", unsafe {
            (lib.set_frequency)(self.handle, direction, channel, freq_hz, ptr::null())
        })
    }

    pub fn frequency(&self, direction: c_int, channel: usize) -> RadioResult<f64> {
        let lib = lib()?;
        Ok(unsafe { (lib.get_frequency)(self.handle, direction, channel) })
    }

    pub fn read_sensor(&self, direction: c_int, channel: usize, key: &str) -> RadioResult<String> {
        let lib = lib()?;
        let key = cstring("sensor key", key)?;
        Ok(unsafe {
            owned_string(lib, (lib.read_channel_sensor)(self.handle, direction, channel, key.as_ptr()))
        })
    }

    /// Set up a stream. Returns `Ok(None)` for a null stream handle.
    pub fn setup_stream(
        &self,
        direction: c_int,
        format: &'static [u8],
        channels: &[usize],
    ) -> RadioResult<Option<SoapyStream>> {
        let lib = lib()?;
        let stream = unsafe {
            (lib.setup_stream)(
                self.handle,
                direction,
                format.as_ptr() as *const c_char,
                channels.as_ptr(),
                channels.len(),
                ptr::null(),
            )
        };
        if stream.is_null() {
            tracing::warn!("SoapySDRDevice_setupStream failed: {}", last_error());
            return Ok(None);
        }
        let mtu = unsafe { (lib.get_stream_mtu)(self.handle, stream) };
        Ok(Some(SoapyStream {
            device: self.handle,
            stream,
            mtu,
        }))
    }

    /// Release the device.
    pub fn unmake(mut self) -> RadioResult<()> {
        let handle = std::mem::replace(&mut self.handle, ptr::null_mut());
        let lib = lib()?;
        check("unmake", unsafe { (lib.unmake)(handle) })
    }
}

impl Drop for SoapyDevice {
    fn drop(&mut self) {
        if self.handle.is_null() {
            return;
        }
        if let Some(lib) = get_lib() {
            tracing::debug!("Releasing SoapySDR device");
            unsafe { (lib.unmake)(self.handle) };
        }
    }
}

/// Owned SoapySDR stream. Must be closed before its device is released.
pub struct SoapyStream {
    device: SoapyDeviceHandle,
    stream: SoapyStreamHandle,
    mtu: usize,
}

// SAFETY: a stream is used by one thread at a time (`&mut self` calls).
unsafe impl Send for SoapyStream {}

impl SoapyStream {
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Raw return of `activateStream`.
    pub fn activate(&mut self, flags: c_int, time_ns: i64) -> c_int {
        match get_lib() {
            Some(lib) => unsafe { (lib.activate_stream)(self.device, self.stream, flags, time_ns, 0) },
            None => -1,
        }
    }

    /// Raw return of `deactivateStream`.
    pub fn deactivate(&mut self, flags: c_int, time_ns: i64) -> c_int {
        match get_lib() {
            Some(lib) => unsafe { (lib.deactivate_stream)(self.device, self.stream, flags, time_ns) },
            None => -1,
        }
    }

    /// Timed write of interleaved CF32 samples. Returns (ret, flags).
    pub fn write(
        &mut self,
        buffer: *const c_void,
        len: usize,
        flags: c_int,
        time_ns: i64,
        timeout_us: c_long,
    ) -> (c_int, c_int) {
        let Some(lib) = get_lib() else {
            return (-1, flags);
        };
        let mut flags_io = flags;
        let buffs = [buffer];
        let ret = unsafe {
            (lib.write_stream)(
                self.device,
                self.stream,
                buffs.as_ptr(),
                len,
                &mut flags_io,
                time_ns,
                timeout_us,
            )
        };
        (ret, flags_io)
    }

    /// Timed read into an interleaved CF32 buffer. Returns (ret, flags, time_ns).
    pub fn read(
        &mut self,
        buffer: *mut c_void,
        len: usize,
        flags: c_int,
        time_ns: i64,
        timeout_us: c_long,
    ) -> (c_int, c_int, i64) {
        let Some(lib) = get_lib() else {
            return (-1, flags, time_ns);
        };
        let mut flags_io = flags;
        let mut time_io: c_longlong = time_ns;
        let buffs = [buffer];
        let ret = unsafe {
            (lib.read_stream)(
                self.device,
                self.stream,
                buffs.as_ptr(),
                len,
                &mut flags_io,
                &mut time_io,
                timeout_us,
            )
        };
        (ret, flags_io, time_io)
    }

    pub fn read_status(&mut self, channel_mask: usize, timeout_us: c_long) -> RawStatus {
        let mut status = RawStatus {
            channel_mask,
            ..Default::default()
        };
        let Some(lib) = get_lib() else {
            status.ret = -1;
            return status;
        };
        status.ret = unsafe {
            (lib.read_stream_status)(
                self.device,
                self.stream,
                &mut status.channel_mask,
                &mut status.flags,
                &mut status.time_ns,
                timeout_us,
            )
        };
        status
    }

    /// Close the stream, returning the raw result.
    pub fn close(mut self) -> c_int {
        let stream = std::mem::replace(&mut self.stream, ptr::null_mut());
        match get_lib() {
            Some(lib) => unsafe { (lib.close_stream)(self.device, stream) },
            None => -1,
        }
    }
}

impl Drop for SoapyStream {
    fn drop(&mut self) {
        if self.stream.is_null() {
            return;
        }
        if let Some(lib) = get_lib() {
            unsafe { (lib.close_stream)(self.device, self.stream) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_library_availability() {
        if is_available() {
            println!("libSoapySDR is available");
        } else {
            println!("libSoapySDR not available (expected on most dev machines)");
        }
    }

    #[test]
    fn test_timeout_us() {
        assert_eq!(timeout_us(Duration::from_secs(2)), 2_000_000);
        assert_eq!(timeout_us(Duration::from_micros(1)), 1);
    }

    #[test]
    fn test_make_without_library() {
        if is_available() {
            return;
        }
        assert!(matches!(SoapyDevice::make("driver=lime"), Err(RadioError::LibraryNotFound)));
        assert_eq!(err_to_str(-1), "error -1");
    }
}
