//! # rfburst radio
//!
//! Hardware side of the timed burst tester:
//!
//! - **hal**: the radio driver capability and its drivers (simulator, SoapySDR)
//! - **session**: device initialization with retry, and ordered teardown
//! - **transceiver**: timed TX/RX bursts classified into outcomes
//! - **scheduler**: the periodic per-chain burst loop
//!
//! ## Example
//!
//! ```rust,no_run
//! use rfburst_core::{CancelToken, InitConfig, RfburstConfig};
//! use rfburst_radio::{create_default_registry, DeviceInitializer};
//! use std::sync::Arc;
//!
//! let config = RfburstConfig::default();
//! let driver = create_default_registry().get("sim").unwrap();
//! let mut init = DeviceInitializer::new(
//!     driver,
//!     Arc::new(config.finished_device_config()),
//!     InitConfig::default(),
//!     CancelToken::new(),
//! );
//! let mut session = init.run().unwrap();
//! session.teardown();
//! ```

pub mod device;
pub mod hal;
pub mod scheduler;
pub mod session;
pub mod simulator;
pub mod transceiver;

pub use device::{RadioError, RadioResult};
pub use hal::{create_default_registry, DriverRegistry, RadioDevice, RadioDriver, RadioStream};
pub use scheduler::{BurstScheduler, ScheduleReport};
pub use session::{DeviceInitializer, DeviceSession, InitError, InitState};
pub use simulator::{SimConfig, SimulatedRadio};
pub use transceiver::{Receiver, Transmitter};
