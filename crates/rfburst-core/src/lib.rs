//! # rfburst core
//!
//! Hardware-independent building blocks of the timed burst tester:
//!
//! - **Types**: samples, chain direction, stream flags and status codes
//! - **Configuration**: device, chain and scheduling parameters (YAML)
//! - **Timing**: tick/nanosecond conversion and the RX/TX burst timeline
//! - **Outcomes**: classification of every timed transfer
//! - **Cancellation**: the latched stop request shared by all threads
//!
//! ## Timeline
//!
//! ```text
//! config ──► BurstTimeline::plan(now) ──► rx_start, tx_start, ticks_per_period
//!                                              │
//!                      RX: rx_start + n·tpp ◄──┴──► TX: tx_start + n·tpp
//! ```

pub mod cancel;
pub mod config;
pub mod observe;
pub mod outcome;
pub mod timing;
pub mod types;

pub use cancel::CancelToken;
pub use config::{ChainConfig, ConfigError, DeviceConfig, InitConfig, RfburstConfig, SchedulingParams};
pub use outcome::{AckStatus, BurstOutcome, OutcomeKind, OutcomeTally};
pub use timing::{seconds_to_ticks, ticks_to_time_ns, time_ns_to_ticks, BurstTimeline};
pub use types::{Direction, Sample, SampleBuffer, SampleFormat, StreamCode, StreamFlags, StreamResult};
