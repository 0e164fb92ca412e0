//! # Observability
//!
//! Structured logging via `tracing`. Chain threads are named `rx` and `tx`
//! so their lines can be told apart in the shared output.

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
