//! Core types shared by the driver capability and the burst engine.

use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Complex I/Q sample in the `CF32` wire format.
pub type Sample = Complex32;

/// A buffer of I/Q samples.
pub type SampleBuffer = Vec<Sample>;

/// Direction of one signal chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Transmit chain
    Tx,
    /// Receive chain
    Rx,
}

impl Direction {
    /// Short upper-case tag used in log lines.
    pub fn tag(&self) -> &'static str {
        match self {
            Direction::Tx => "TX",
            Direction::Rx => "RX",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Sample format requested when a stream is set up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleFormat {
    /// 32-bit float I/Q
    #[default]
    ComplexFloat32,
}

impl SampleFormat {
    /// Driver format string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleFormat::ComplexFloat32 => "CF32",
        }
    }
}

/// Stream flag bits, using the SoapySDR bit assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StreamFlags(i32);

impl StreamFlags {
    pub const NONE: StreamFlags = StreamFlags(0);
    pub const END_BURST: StreamFlags = StreamFlags(1 << 1);
    pub const HAS_TIME: StreamFlags = StreamFlags(1 << 2);
    pub const END_ABRUPT: StreamFlags = StreamFlags(1 << 3);
    pub const ONE_PACKET: StreamFlags = StreamFlags(1 << 4);
    pub const MORE_FRAGMENTS: StreamFlags = StreamFlags(1 << 5);
    pub const WAIT_TRIGGER: StreamFlags = StreamFlags(1 << 6);

    /// Build flags from raw driver bits.
    #[inline]
    pub fn from_bits(bits: i32) -> Self {
        StreamFlags(bits)
    }

    /// Raw driver bits.
    #[inline]
    pub fn bits(&self) -> i32 {
        self.0
    }

    /// True if every bit of `other` is set.
    #[inline]
    pub fn contains(&self, other: StreamFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for StreamFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        StreamFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for StreamFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Negative result code returned by a stream operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamCode {
    Timeout,
    StreamError,
    Corruption,
    Overflow,
    NotSupported,
    TimeError,
    Underflow,
    /// Any other negative value reported by the driver
    Unknown(i32),
}

impl StreamCode {
    pub const TIMEOUT: i32 = -1;
    pub const STREAM_ERROR: i32 = -2;
    pub const CORRUPTION: i32 = -3;
    pub const OVERFLOW: i32 = -4;
    pub const NOT_SUPPORTED: i32 = -5;
    pub const TIME_ERROR: i32 = -6;
    pub const UNDERFLOW: i32 = -7;

    /// Decode a raw driver return value.
    pub fn from_raw(code: i32) -> Self {
        match code {
            Self::TIMEOUT => StreamCode::Timeout,
            Self::STREAM_ERROR => StreamCode::StreamError,
            Self::CORRUPTION => StreamCode::Corruption,
            Self::OVERFLOW => StreamCode::Overflow,
            Self::NOT_SUPPORTED => StreamCode::NotSupported,
            Self::TIME_ERROR => StreamCode::TimeError,
            Self::UNDERFLOW => StreamCode::Underflow,
            other => StreamCode::Unknown(other),
        }
    }

    /// Raw driver value of this code.
    pub fn raw(&self) -> i32 {
        match self {
            StreamCode::Timeout => Self::TIMEOUT,
            StreamCode::StreamError => Self::STREAM_ERROR,
            StreamCode::Corruption => Self::CORRUPTION,
            StreamCode::Overflow => Self::OVERFLOW,
            StreamCode::NotSupported => Self::NOT_SUPPORTED,
            StreamCode::TimeError => Self::TIME_ERROR,
            StreamCode::Underflow => Self::UNDERFLOW,
            StreamCode::Unknown(raw) => *raw,
        }
    }

    /// Name as printed by the driver library.
    pub fn name(&self) -> &'static str {
        match self {
            StreamCode::Timeout => "TIMEOUT",
            StreamCode::StreamError => "STREAM_ERROR",
            StreamCode::Corruption => "CORRUPTION",
            StreamCode::Overflow => "OVERFLOW",
            StreamCode::NotSupported => "NOT_SUPPORTED",
            StreamCode::TimeError => "TIME_ERROR",
            StreamCode::Underflow => "UNDERFLOW",
            StreamCode::Unknown(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for StreamCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamCode::Unknown(raw) => write!(f, "UNKNOWN({})", raw),
            other => f.write_str(other.name()),
        }
    }
}

/// Result of a stream transfer: sample count or a decoded negative code.
pub type StreamResult<T> = Result<T, StreamCode>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_code_vocabulary() {
        for raw in -7..=-1 {
            let code = StreamCode::from_raw(raw);
            assert!(!matches!(code, StreamCode::Unknown(_)));
            assert_eq!(code.raw(), raw);
        }
        assert_eq!(StreamCode::from_raw(-4), StreamCode::Overflow);
        assert_eq!(StreamCode::from_raw(-42), StreamCode::Unknown(-42));
        assert_eq!(StreamCode::Unknown(-42).raw(), -42);
    }

    #[test]
    fn test_stream_flags() {
        let flags = StreamFlags::HAS_TIME | StreamFlags::END_BURST;
        assert!(flags.contains(StreamFlags::HAS_TIME));
        assert!(flags.contains(StreamFlags::END_BURST));
        assert!(!flags.contains(StreamFlags::END_ABRUPT));
        assert_eq!(flags.bits(), 0b110);
        assert!(StreamFlags::NONE.is_empty());
    }

    #[test]
    fn test_direction_tag() {
        assert_eq!(Direction::Tx.to_string(), "TX");
        assert_eq!(Direction::Rx.tag(), "RX");
        assert_eq!(SampleFormat::default().as_str(), "CF32");
    }
}
