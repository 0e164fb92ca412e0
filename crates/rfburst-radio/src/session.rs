//! Device initialization and session lifetime.
//!
//! [`DeviceInitializer`] brings a radio into a known state and hands out a
//! [`DeviceSession`] once every requested stream is active. Any failure
//! tears down what the attempt acquired and the whole sequence starts over;
//! only cancellation ends it without a session.
//!
//! ```text
//!              ┌──────────── failure (retry_delay) ───────────┐
//!              ▼                                              │
//! Uninitialized ──► Attempting { attempt } ──── success ──► Ready
//!                          │
//!                          └── cancel ──► Abandoned
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rfburst_core::{
    CancelToken, ConfigError, DeviceConfig, Direction, InitConfig, SampleFormat, StreamFlags,
};
use tracing::{debug, error, info, warn};

use crate::device::{RadioError, RadioResult};
use crate::hal::{RadioDevice, RadioDriver, RadioStream, LO_LOCKED_SENSOR};
use crate::transceiver::{Receiver, Transmitter};

/// State of the initialization sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    Uninitialized,
    Attempting { attempt: u32 },
    Ready,
    Abandoned,
}

/// Reasons initialization ends without a session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InitError {
    #[error("initialization cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },

    #[error("invalid device configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

/// Why a single attempt stopped.
#[derive(Debug)]
enum AttemptError {
    Cancelled,
    Failed(RadioError),
}

impl From<RadioError> for AttemptError {
    fn from(e: RadioError) -> Self {
        AttemptError::Failed(e)
    }
}

/// Retry-until-cancelled initialization of one radio device.
pub struct DeviceInitializer {
    driver: Arc<dyn RadioDriver>,
    config: Arc<DeviceConfig>,
    init: InitConfig,
    cancel: CancelToken,
    state: InitState,
}

impl DeviceInitializer {
    pub fn new(
        driver: Arc<dyn RadioDriver>,
        config: Arc<DeviceConfig>,
        init: InitConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            driver,
            config,
            init,
            cancel,
            state: InitState::Uninitialized,
        }
    }

    pub fn state(&self) -> InitState {
        self.state
    }

    /// Run the sequence until a session is ready or cancellation is observed.
    pub fn run(&mut self) -> Result<DeviceSession, InitError> {
        self.config.validate()?;
        self.state = InitState::Uninitialized;
        let mut attempts = 0;

        loop {
            match self.state {
                InitState::Uninitialized | InitState::Ready => {
                    info!("Trying to initialize radio device via '{}'", self.driver.name());
                    self.state = InitState::Attempting { attempt: 1 };
                }
                InitState::Attempting { attempt } => {
                    if self.cancel.is_cancelled() {
                        self.state = InitState::Abandoned;
                        continue;
                    }
                    attempts = attempt;
                    match self.attempt() {
                        Ok(session) => {
                            info!(attempt, "Radio device initialized");
                            self.state = InitState::Ready;
                            return Ok(session);
                        }
                        Err(AttemptError::Cancelled) => {
                            self.state = InitState::Abandoned;
                        }
                        Err(AttemptError::Failed(e)) => {
                            error!(attempt, "Initialization of the radio device failed: {}", e);
                            self.state = if self.cancel.sleep(self.init.retry_delay()) {
                                InitState::Attempting { attempt: attempt + 1 }
                            } else {
                                InitState::Abandoned
                            };
                        }
                    }
                }
                InitState::Abandoned => {
                    warn!(attempts, "Radio initialization abandoned");
                    return Err(InitError::Cancelled { attempts });
                }
            }
        }
    }

    /// One full pass; partial resources are released on failure.
    fn attempt(&self) -> Result<DeviceSession, AttemptError> {
        let mut session = DeviceSession::new(Arc::clone(&self.config), self.init.settle_delay());
        match self.bring_up(&mut session) {
            Ok(()) => Ok(session),
            Err(e) => {
                session.teardown();
                Err(e)
            }
        }
    }

    fn bring_up(&self, session: &mut DeviceSession) -> Result<(), AttemptError> {
        let cfg = &*self.config;
        let verbose = cfg.debug_settings;

        if verbose {
            info!("Creating the radio device with: args={}", cfg.args);
        }
        let device = self
            .driver
            .open(&cfg.args)?
            .ok_or_else(|| RadioError::NullHandle("device".into()))?;
        session.device = Some(device);
        let device = session.device()?;
        if verbose {
            info!("Radio device successfully created: {}", device.hardware_key());
        }

        if let Some(source) = cfg.clock_source() {
            if verbose {
                info!("Trying to set the following clock source: {}", source);
            }
            device.set_clock_source(source)?;
            if verbose {
                info!("Actual clock source: {}", device.clock_source()?);
            }
        }

        if let Some(source) = cfg.time_source() {
            if verbose {
                info!("Trying to set the following time source: {}", source);
            }
            device.set_time_source(source)?;
            if verbose {
                info!("Actual time source: {}", device.time_source()?);
            }
        }

        if verbose {
            info!("Trying to set the following master clock rate: {:.6} [MHz]", cfg.master_clock_rate / 1e6);
        }
        device.set_master_clock_rate(cfg.master_clock_rate)?;
        if verbose {
            info!("Actual master clock rate: {:.6} [MHz]", device.master_clock_rate()? / 1e6);
        }

        let chains: Vec<Direction> = cfg.active_chains().collect();

        for &dir in &chains {
            let ch = cfg.chain(dir).channel;
            let rate = cfg.sample_rate(dir);
            if verbose {
                info!("Trying to set the following {} sample rate on channel {}: {:.6} [MHz]", dir, ch, rate / 1e6);
            }
            device.set_sample_rate(dir, ch, rate)?;
            if verbose {
                info!("Actual {} sample rate on channel {}: {:.6} [MHz]", dir, ch, device.sample_rate(dir, ch)? / 1e6);
            }
        }

        for &dir in &chains {
            let chain = cfg.chain(dir);
            if chain.bandwidth <= 0.0 {
                continue;
            }
            if verbose {
                info!("Trying to set the following {} filter bandwidth on channel {}: {:.6} [MHz]", dir, chain.channel, chain.bandwidth / 1e6);
            }
            device.set_bandwidth(dir, chain.channel, chain.bandwidth)?;
            if verbose {
                info!("Actual {} bandwidth on channel {}: {:.6} [MHz]", dir, chain.channel, device.bandwidth(dir, chain.channel)? / 1e6);
            }
        }

        for &dir in &chains {
            let chain = cfg.chain(dir);
            if verbose {
                info!("Trying to set the following {} gain on channel {}: {} [dB]", dir, chain.channel, chain.gain);
            }
            device.set_gain(dir, chain.channel, chain.gain)?;
            if verbose {
                info!("Actual {} gain on channel {}: {} [dB]", dir, chain.channel, device.gain(dir, chain.channel)?);
            }
        }

        for &dir in &chains {
            let chain = cfg.chain(dir);
            if verbose {
                info!("Trying to set the following {} antenna on channel {}: {}", dir, chain.channel, chain.antenna);
            }
            device.set_antenna(dir, chain.channel, &chain.antenna)?;
            if verbose {
                info!("Actual {} antenna on channel {}: {}", dir, chain.channel, device.antenna(dir, chain.channel)?);
            }
        }

        for &dir in &chains {
            let chain = cfg.chain(dir);
            if verbose {
                info!("Trying to set the following {} frequency on channel {}: {:.6} [MHz]", dir, chain.channel, chain.frequency / 1e6);
            }
            device.set_frequency(dir, chain.channel, chain.frequency)?;
            info!("Waiting for {} LO lock on channel {}...", dir, chain.channel);
            self.wait_lo_lock(device, dir, chain.channel)?;
            info!("{} LO lock detected on channel {}!", dir, chain.channel);
            if verbose {
                info!("Actual {} frequency on channel {}: {:.6} [MHz]", dir, chain.channel, device.frequency(dir, chain.channel)? / 1e6);
            }
        }

        for &dir in &chains {
            let channel = cfg.chain(dir).channel;
            let format = SampleFormat::ComplexFloat32;
            if verbose {
                info!("Trying to setup {} {} stream...", dir, format.as_str());
            }
            let stream = session
                .device()?
                .setup_stream(dir, format, &[channel])?
                .ok_or_else(|| RadioError::NullHandle(format!("{} stream", dir)))?;
            info!("{} stream set up, MTU {} samples", dir, stream.mtu());
            *session.stream_slot(dir) = Some(stream);
        }

        for &dir in &chains {
            if verbose {
                info!("Trying to activate {} stream...", dir);
            }
            if let Some(stream) = session.stream_slot(dir).as_mut() {
                stream.activate(StreamFlags::HAS_TIME, 0).map_err(|code| {
                    RadioError::HardwareError(format!("{} stream activation failed: {}", dir, code))
                })?;
            }
            if verbose {
                info!("{} stream has been successfully activated!", dir);
            }
        }

        Ok(())
    }

    /// Poll the LO lock sensor until it reads "true" or cancellation fires.
    fn wait_lo_lock(
        &self,
        device: &dyn RadioDevice,
        direction: Direction,
        channel: usize,
    ) -> Result<(), AttemptError> {
        let poll = self.init.lo_lock_poll();
        loop {
            if self.cancel.is_cancelled() {
                return Err(AttemptError::Cancelled);
            }
            if device.read_sensor(direction, channel, LO_LOCKED_SENSOR)? == "true" {
                return Ok(());
            }
            if !self.cancel.sleep(poll) {
                return Err(AttemptError::Cancelled);
            }
        }
    }
}

/// One open device with its active streams.
///
/// Streams exist only for active chains. Dropping the session tears it down.
pub struct DeviceSession {
    config: Arc<DeviceConfig>,
    settle_delay: Duration,
    device: Option<Box<dyn RadioDevice>>,
    tx: Option<Box<dyn RadioStream>>,
    rx: Option<Box<dyn RadioStream>>,
}

impl DeviceSession {
    /// Empty session: no device, no streams.
    pub fn new(config: Arc<DeviceConfig>, settle_delay: Duration) -> Self {
        Self {
            config,
            settle_delay,
            device: None,
            tx: None,
            rx: None,
        }
    }

    /// Session over an already-open device and streams.
    pub fn from_parts(
        config: Arc<DeviceConfig>,
        settle_delay: Duration,
        device: Box<dyn RadioDevice>,
        tx: Option<Box<dyn RadioStream>>,
        rx: Option<Box<dyn RadioStream>>,
    ) -> Self {
        Self {
            config,
            settle_delay,
            device: Some(device),
            tx,
            rx,
        }
    }

    pub fn config(&self) -> &Arc<DeviceConfig> {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.device.is_some()
    }

    pub fn has_stream(&self, direction: Direction) -> bool {
        match direction {
            Direction::Tx => self.tx.is_some(),
            Direction::Rx => self.rx.is_some(),
        }
    }

    fn device(&self) -> RadioResult<&dyn RadioDevice> {
        self.device
            .as_deref()
            .ok_or_else(|| RadioError::NullHandle("device".into()))
    }

    fn stream_slot(&mut self, direction: Direction) -> &mut Option<Box<dyn RadioStream>> {
        match direction {
            Direction::Tx => &mut self.tx,
            Direction::Rx => &mut self.rx,
        }
    }

    /// Current hardware time (ns).
    pub fn hardware_time(&self) -> RadioResult<i64> {
        self.device()?.hardware_time()
    }

    /// Split into per-chain transceivers borrowing disjoint streams.
    ///
    /// A chain gets a transceiver only if it is active and its stream is open.
    pub fn transceivers(&mut self) -> (Option<Transmitter<'_>>, Option<Receiver<'_>>) {
        let device = match self.device.as_deref() {
            Some(device) => device,
            None => return (None, None),
        };
        let config = &*self.config;

        let tx = self
            .tx
            .as_mut()
            .filter(|_| config.tx.active)
            .map(|stream| Transmitter::new(device, stream, config));
        let rx = self
            .rx
            .as_mut()
            .filter(|_| config.rx.active)
            .map(|stream| Receiver::new(device, stream, config));
        (tx, rx)
    }

    /// Release streams and device: TX, settle, RX, settle, device.
    ///
    /// Idempotent. Driver errors are logged, never raised.
    pub fn teardown(&mut self) {
        if self.device.is_none() && self.tx.is_none() && self.rx.is_none() {
            return;
        }

        if let Some(mut stream) = self.tx.take() {
            match stream.deactivate(StreamFlags::HAS_TIME | StreamFlags::END_BURST, 0) {
                Ok(()) => info!("TX stream has been successfully deactivated!"),
                Err(code) => error!("Following problem occurred while deactivating TX stream: {}", code),
            }
            if let Err(code) = stream.close() {
                error!("Closing TX stream failed: {}", code);
            }
        }
        std::thread::sleep(self.settle_delay);

        if let Some(mut stream) = self.rx.take() {
            match stream.deactivate(StreamFlags::HAS_TIME, 0) {
                Ok(()) => info!("RX stream has been successfully deactivated!"),
                Err(code) => error!("Following problem occurred while deactivating RX stream: {}", code),
            }
            if let Err(code) = stream.close() {
                error!("Closing RX stream failed: {}", code);
            }
        }
        std::thread::sleep(self.settle_delay);

        if let Some(device) = self.device.take() {
            match device.unmake() {
                Ok(()) => debug!("Radio device released"),
                Err(e) => error!("Releasing radio device failed: {}", e),
            }
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("initialized", &self.is_initialized())
            .field("tx", &self.tx.is_some())
            .field("rx", &self.rx.is_some())
            .finish()
    }
}
