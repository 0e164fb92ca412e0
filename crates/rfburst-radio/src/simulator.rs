//! Software Radio Simulator
//!
//! An in-process [`RadioDriver`] for bench-free runs and tests.
//!
//! ## Features
//!
//! - Hardware clock derived from a monotonic `Instant`
//! - LO lock sensor that reports `true` a fixed settle time after tuning
//! - Timed writes and reads that block until the burst has played out,
//!   bounded by the call timeout
//! - Late bursts reported as `TIME_ERROR`
//! - End-of-burst events for the status query
//! - Loopback: RX windows that overlap a TX burst receive its samples
//! - Call journal and fault injection
//!
//! ```text
//! ┌──────────────────────────── SimulatedRadio ────────────────────────────┐
//! │  faults ──► open / setters / setup_stream / activate / transfers       │
//! │                                                                        │
//! │  TX write(t) ──► loopback bursts ──► RX read(t') overlapping [t, t+L)  │
//! │       └────────► status events ──► read_status()                       │
//! │                                                                        │
//! │  every call ──► journal                                                │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rfburst_core::{Direction, Sample, SampleFormat, StreamCode, StreamFlags, StreamResult};

use crate::device::{RadioError, RadioResult};
use crate::hal::{
    RadioDevice, RadioDriver, RadioStream, StreamStatus, Transfer, LO_LOCKED_SENSOR,
};

/// TX bursts kept for loopback.
const LOOPBACK_DEPTH: usize = 8;

/// Unread status events kept per stream; the oldest is dropped first.
const EVENT_DEPTH: usize = 8;

/// Simulator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// Time from tuning until the LO reports lock (None = never locks)
    pub lo_settle: Option<Duration>,
    /// Stream MTU in samples
    pub mtu: usize,
    /// Feed TX bursts back into overlapping RX reads
    pub loopback: bool,
    /// Hardware time at creation (ns)
    pub start_time_ns: i64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            lo_settle: Some(Duration::from_micros(300)),
            mtu: 4096,
            loopback: true,
            start_time_ns: 0,
        }
    }
}

/// One driver call recorded by the simulator.
#[derive(Debug, Clone, PartialEq)]
pub enum SimCall {
    Open(String),
    SetClockSource(String),
    SetTimeSource(String),
    SetMasterClockRate(f64),
    SetSampleRate(Direction, usize, f64),
    SetBandwidth(Direction, usize, f64),
    SetGain(Direction, usize, f64),
    SetAntenna(Direction, usize, String),
    SetFrequency(Direction, usize, f64),
    ReadSensor(Direction, usize, String),
    SetupStream(Direction, Vec<usize>),
    Activate(Direction),
    Deactivate(Direction, StreamFlags),
    Close(Direction),
    Write { requested: usize, flags: StreamFlags, time_ns: i64 },
    Read { requested: usize, flags: StreamFlags, time_ns: i64 },
    ReadStatus { channel_mask: u32 },
    Unmake,
}

impl SimCall {
    /// Setter calls carry the operation name used by [`SimulatedRadio::fail_next`].
    pub fn operation(&self) -> &'static str {
        match self {
            SimCall::Open(_) => "open",
            SimCall::SetClockSource(_) => "set_clock_source",
            SimCall::SetTimeSource(_) => "set_time_source",
            SimCall::SetMasterClockRate(_) => "set_master_clock_rate",
            SimCall::SetSampleRate(..) => "set_sample_rate",
            SimCall::SetBandwidth(..) => "set_bandwidth",
            SimCall::SetGain(..) => "set_gain",
            SimCall::SetAntenna(..) => "set_antenna",
            SimCall::SetFrequency(..) => "set_frequency",
            SimCall::ReadSensor(..) => "read_sensor",
            SimCall::SetupStream(..) => "setup_stream",
            SimCall::Activate(_) => "activate",
            SimCall::Deactivate(..) => "deactivate",
            SimCall::Close(_) => "close",
            SimCall::Write { .. } => "write",
            SimCall::Read { .. } => "read",
            SimCall::ReadStatus { .. } => "read_status",
            SimCall::Unmake => "unmake",
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ChainState {
    sample_rate: f64,
    bandwidth: f64,
    gain: f64,
    antenna: String,
    frequency: f64,
    tuned_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct DeviceState {
    clock_source: String,
    time_source: String,
    master_clock_rate: f64,
    chains: HashMap<(Direction, usize), ChainState>,
}

#[derive(Debug, Default)]
struct Faults {
    null_opens: u32,
    null_streams: u32,
    failing: HashMap<&'static str, u32>,
    failing_activations: u32,
    failing_deactivations: u32,
    transfers: HashMap<Direction, VecDeque<StreamResult<usize>>>,
    statuses: VecDeque<Result<StreamFlags, StreamCode>>,
}

/// Take one unit from a fault counter.
fn take(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

#[derive(Debug)]
struct TxBurst {
    start_ns: i64,
    rate: f64,
    samples: Vec<Sample>,
}

#[derive(Debug)]
struct Shared {
    config: SimConfig,
    epoch: Instant,
    state: Mutex<DeviceState>,
    faults: Mutex<Faults>,
    journal: Mutex<Vec<SimCall>>,
    loopback: Mutex<VecDeque<TxBurst>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn record(&self, call: SimCall) {
        lock(&self.journal).push(call);
    }

    fn now_ns(&self) -> i64 {
        self.config.start_time_ns + self.epoch.elapsed().as_nanos() as i64
    }

    /// Record a setter call and apply any injected failure.
    fn setter(&self, call: SimCall) -> RadioResult<()> {
        let operation = call.operation();
        self.record(call);
        let failed = lock(&self.faults)
            .failing
            .get_mut(operation)
            .map_or(false, take);
        if failed {
            return Err(RadioError::driver(operation, "injected fault"));
        }
        Ok(())
    }

    fn with_chain<R>(&self, direction: Direction, channel: usize, f: impl FnOnce(&mut ChainState) -> R) -> R {
        let mut state = lock(&self.state);
        f(state.chains.entry((direction, channel)).or_default())
    }

    fn scripted_transfer(&self, direction: Direction) -> Option<StreamResult<usize>> {
        lock(&self.faults)
            .transfers
            .get_mut(&direction)
            .and_then(|queue| queue.pop_front())
    }

    /// Sleep until `target_ns` of hardware time. False if that exceeds `timeout`.
    fn wait_until(&self, target_ns: i64, timeout: Duration) -> bool {
        let wait_ns = target_ns - self.now_ns();
        if wait_ns <= 0 {
            return true;
        }
        let wait = Duration::from_nanos(wait_ns as u64);
        if wait > timeout {
            std::thread::sleep(timeout);
            return false;
        }
        std::thread::sleep(wait);
        true
    }

    fn push_loopback(&self, start_ns: i64, rate: f64, samples: &[Sample]) {
        if !self.config.loopback || rate <= 0.0 {
            return;
        }
        let mut bursts = lock(&self.loopback);
        if bursts.len() == LOOPBACK_DEPTH {
            bursts.pop_front();
        }
        bursts.push_back(TxBurst {
            start_ns,
            rate,
            samples: samples.to_vec(),
        });
    }

    fn fill_from_loopback(&self, buffer: &mut [Sample], start_ns: i64, rate: f64) {
        buffer.fill(Sample::new(0.0, 0.0));
        if !self.config.loopback || rate <= 0.0 {
            return;
        }
        let bursts = lock(&self.loopback);
        for burst in bursts.iter() {
            for (i, slot) in buffer.iter_mut().enumerate() {
                let t = start_ns + duration_ns(i, rate);
                if t < burst.start_ns {
                    continue;
                }
                let index = ((t - burst.start_ns) as f64 * burst.rate / 1e9) as usize;
                match burst.samples.get(index) {
                    Some(sample) => *slot = *sample,
                    None => break,
                }
            }
        }
    }
}

/// Nanoseconds spanned by `samples` at `rate`.
fn duration_ns(samples: usize, rate: f64) -> i64 {
    if rate <= 0.0 {
        0
    } else {
        (samples as f64 * 1e9 / rate) as i64
    }
}

/// Simulated radio driver.
///
/// Clones share one simulated device, so a test can keep a handle for
/// fault injection and journal inspection while the session owns another.
#[derive(Debug, Clone)]
pub struct SimulatedRadio {
    shared: Arc<Shared>,
}

impl SimulatedRadio {
    pub fn new() -> Self {
        Self::with_config(SimConfig::default())
    }

    pub fn with_config(config: SimConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                epoch: Instant::now(),
                state: Mutex::new(DeviceState::default()),
                faults: Mutex::new(Faults::default()),
                journal: Mutex::new(Vec::new()),
                loopback: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Current simulated hardware time (ns).
    pub fn now_ns(&self) -> i64 {
        self.shared.now_ns()
    }

    /// The next `count` opens return the null handle.
    pub fn fail_next_opens(&self, count: u32) {
        lock(&self.shared.faults).null_opens += count;
    }

    /// The next `count` stream setups return the null handle.
    pub fn fail_next_stream_setups(&self, count: u32) {
        lock(&self.shared.faults).null_streams += count;
    }

    /// The next `count` calls of a setter (by [`SimCall::operation`] name) fail.
    pub fn fail_next(&self, operation: &'static str, count: u32) {
        *lock(&self.shared.faults).failing.entry(operation).or_insert(0) += count;
    }

    pub fn fail_next_activations(&self, count: u32) {
        lock(&self.shared.faults).failing_activations += count;
    }

    pub fn fail_next_deactivations(&self, count: u32) {
        lock(&self.shared.faults).failing_deactivations += count;
    }

    /// Return these results from the next reads/writes on a chain, without timing.
    pub fn script_transfers(&self, direction: Direction, results: impl IntoIterator<Item = StreamResult<usize>>) {
        lock(&self.shared.faults)
            .transfers
            .entry(direction)
            .or_default()
            .extend(results);
    }

    /// Return these events from the next status queries.
    pub fn script_status(&self, results: impl IntoIterator<Item = Result<StreamFlags, StreamCode>>) {
        lock(&self.shared.faults).statuses.extend(results);
    }

    /// Copy of every call made so far.
    pub fn journal(&self) -> Vec<SimCall> {
        lock(&self.shared.journal).clone()
    }

    pub fn clear_journal(&self) {
        lock(&self.shared.journal).clear();
    }

    /// Number of journaled calls with the given operation name.
    pub fn count(&self, operation: &str) -> usize {
        lock(&self.shared.journal)
            .iter()
            .filter(|call| call.operation() == operation)
            .count()
    }
}

impl Default for SimulatedRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioDriver for SimulatedRadio {
    fn name(&self) -> &str {
        "sim"
    }

    fn open(&self, args: &str) -> RadioResult<Option<Box<dyn RadioDevice>>> {
        self.shared.record(SimCall::Open(args.to_string()));
        if take(&mut lock(&self.shared.faults).null_opens) {
            return Ok(None);
        }
        tracing::debug!("Opened simulated radio: {}", args);
        Ok(Some(Box::new(SimDevice {
            shared: Arc::clone(&self.shared),
        })))
    }
}

struct SimDevice {
    shared: Arc<Shared>,
}

impl RadioDevice for SimDevice {
    fn hardware_key(&self) -> String {
        "rfburst-sim".to_string()
    }

    fn set_clock_source(&self, source: &str) -> RadioResult<()> {
        self.shared.setter(SimCall::SetClockSource(source.to_string()))?;
        lock(&self.shared.state).clock_source = source.to_string();
        Ok(())
    }

    fn clock_source(&self) -> RadioResult<String> {
        Ok(lock(&self.shared.state).clock_source.clone())
    }

    fn set_time_source(&self, source: &str) -> RadioResult<()> {
        self.shared.setter(SimCall::SetTimeSource(source.to_string()))?;
        lock(&self.shared.state).time_source = source.to_string();
        Ok(())
    }

    fn time_source(&self) -> RadioResult<String> {
        Ok(lock(&self.shared.state).time_source.clone())
    }

    fn set_master_clock_rate(&self, rate: f64) -> RadioResult<()> {
        self.shared.setter(SimCall::SetMasterClockRate(rate))?;
        lock(&self.shared.state).master_clock_rate = rate;
        Ok(())
    }

    fn master_clock_rate(&self) -> RadioResult<f64> {
        Ok(lock(&self.shared.state).master_clock_rate)
    }

    fn set_sample_rate(&self, direction: Direction, channel: usize, rate: f64) -> RadioResult<()> {
        self.shared.setter(SimCall::SetSampleRate(direction, channel, rate))?;
        self.shared.with_chain(direction, channel, |c| c.sample_rate = rate);
        Ok(())
    }

    fn sample_rate(&self, direction: Direction, channel: usize) -> RadioResult<f64> {
        Ok(self.shared.with_chain(direction, channel, |c| c.sample_rate))
    }

    fn set_bandwidth(&self, direction: Direction, channel: usize, bandwidth: f64) -> RadioResult<()> {
        self.shared.setter(SimCall::SetBandwidth(direction, channel, bandwidth))?;
        self.shared.with_chain(direction, channel, |c| c.bandwidth = bandwidth);
        Ok(())
    }

    fn bandwidth(&self, direction: Direction, channel: usize) -> RadioResult<f64> {
        Ok(self.shared.with_chain(direction, channel, |c| c.bandwidth))
    }

    fn set_gain(&self, direction: Direction, channel: usize, gain_db: f64) -> RadioResult<()> {
        self.shared.setter(SimCall::SetGain(direction, channel, gain_db))?;
        self.shared.with_chain(direction, channel, |c| c.gain = gain_db);
        Ok(())
    }

    fn gain(&self, direction: Direction, channel: usize) -> RadioResult<f64> {
        Ok(self.shared.with_chain(direction, channel, |c| c.gain))
    }

    fn set_antenna(&self, direction: Direction, channel: usize, name: &str) -> RadioResult<()> {
        self.shared.setter(SimCall::SetAntenna(direction, channel, name.to_string()))?;
        self.shared.with_chain(direction, channel, |c| c.antenna = name.to_string());
        Ok(())
    }

    fn antenna(&self, direction: Direction, channel: usize) -> RadioResult<String> {
        Ok(self.shared.with_chain(direction, channel, |c| c.antenna.clone()))
    }

    fn set_frequency(&self, direction: Direction, channel: usize, frequency: f64) -> RadioResult<()> {
        self.shared.setter(SimCall::SetFrequency(direction, channel, frequency))?;
        self.shared.with_chain(direction, channel, |c| {
            c.frequency = frequency;
            c.tuned_at = Some(Instant::now());
        });
        Ok(())
    }

    fn frequency(&self, direction: Direction, channel: usize) -> RadioResult<f64> {
        Ok(self.shared.with_chain(direction, channel, |c| c.frequency))
    }

    fn read_sensor(&self, direction: Direction, channel: usize, key: &str) -> RadioResult<String> {
        self.shared.record(SimCall::ReadSensor(direction, channel, key.to_string()));
        if key != LO_LOCKED_SENSOR {
            return Err(RadioError::Unsupported(format!("sensor '{}'", key)));
        }
        let tuned_at = self.shared.with_chain(direction, channel, |c| c.tuned_at);
        let locked = match (tuned_at, self.shared.config.lo_settle) {
            (Some(at), Some(settle)) => at.elapsed() >= settle,
            _ => false,
        };
        Ok(locked.to_string())
    }

    fn hardware_time(&self) -> RadioResult<i64> {
        Ok(self.shared.now_ns())
    }

    fn setup_stream(
        &self,
        direction: Direction,
        _format: SampleFormat,
        channels: &[usize],
    ) -> RadioResult<Option<Box<dyn RadioStream>>> {
        self.shared.record(SimCall::SetupStream(direction, channels.to_vec()));
        let channel = *channels
            .first()
            .ok_or_else(|| RadioError::ConfigError("stream needs at least one channel".into()))?;
        if take(&mut lock(&self.shared.faults).null_streams) {
            return Ok(None);
        }
        Ok(Some(Box::new(SimStream {
            shared: Arc::clone(&self.shared),
            direction,
            channel,
            active: false,
            events: VecDeque::new(),
        })))
    }

    fn unmake(self: Box<Self>) -> RadioResult<()> {
        self.shared.record(SimCall::Unmake);
        Ok(())
    }
}

struct SimStream {
    shared: Arc<Shared>,
    direction: Direction,
    channel: usize,
    active: bool,
    events: VecDeque<StreamStatus>,
}

impl SimStream {
    fn sample_rate(&self) -> f64 {
        self.shared.with_chain(self.direction, self.channel, |c| c.sample_rate)
    }

    fn event(&mut self, result: Result<(), StreamCode>, flags: StreamFlags, time_ns: i64) {
        if self.events.len() == EVENT_DEPTH {
            self.events.pop_front();
        }
        self.events.push_back(StreamStatus {
            result,
            channel_mask: 1 << self.channel,
            flags,
            time_ns,
        });
    }
}

impl RadioStream for SimStream {
    fn direction(&self) -> Direction {
        self.direction
    }

    fn mtu(&self) -> usize {
        self.shared.config.mtu
    }

    fn activate(&mut self, _flags: StreamFlags, _time_ns: i64) -> Result<(), StreamCode> {
        self.shared.record(SimCall::Activate(self.direction));
        if take(&mut lock(&self.shared.faults).failing_activations) {
            return Err(StreamCode::StreamError);
        }
        self.active = true;
        Ok(())
    }

    fn deactivate(&mut self, flags: StreamFlags, _time_ns: i64) -> Result<(), StreamCode> {
        self.shared.record(SimCall::Deactivate(self.direction, flags));
        self.active = false;
        if take(&mut lock(&self.shared.faults).failing_deactivations) {
            return Err(StreamCode::StreamError);
        }
        Ok(())
    }

    fn write(
        &mut self,
        samples: &[Sample],
        flags: StreamFlags,
        time_ns: i64,
        timeout: Duration,
    ) -> Transfer {
        self.shared.record(SimCall::Write {
            requested: samples.len(),
            flags,
            time_ns,
        });
        let end_burst = flags.contains(StreamFlags::END_BURST);

        if let Some(result) = self.shared.scripted_transfer(self.direction) {
            if end_burst && result == Ok(samples.len()) {
                self.event(Ok(()), StreamFlags::END_BURST, time_ns);
            }
            return Transfer::new(result, flags, time_ns);
        }
        if !self.active {
            return Transfer::new(Err(StreamCode::StreamError), flags, time_ns);
        }

        let rate = self.sample_rate();
        let end_ns = if flags.contains(StreamFlags::HAS_TIME) {
            if time_ns < self.shared.now_ns() {
                return Transfer::new(Err(StreamCode::TimeError), flags, time_ns);
            }
            time_ns + duration_ns(samples.len(), rate)
        } else {
            self.shared.now_ns() + duration_ns(samples.len(), rate)
        };
        self.shared.push_loopback(end_ns - duration_ns(samples.len(), rate), rate, samples);

        if !self.shared.wait_until(end_ns, timeout) {
            return Transfer::new(Err(StreamCode::Timeout), flags, time_ns);
        }
        if end_burst {
            self.event(Ok(()), StreamFlags::END_BURST | StreamFlags::HAS_TIME, end_ns);
        }
        Transfer::new(Ok(samples.len()), flags, time_ns)
    }

    fn read(
        &mut self,
        buffer: &mut [Sample],
        flags: StreamFlags,
        time_ns: i64,
        timeout: Duration,
    ) -> Transfer {
        self.shared.record(SimCall::Read {
            requested: buffer.len(),
            flags,
            time_ns,
        });

        if let Some(result) = self.shared.scripted_transfer(self.direction) {
            buffer.fill(Sample::new(0.0, 0.0));
            return Transfer::new(result, flags, time_ns);
        }
        if !self.active {
            return Transfer::new(Err(StreamCode::StreamError), flags, time_ns);
        }

        let rate = self.sample_rate();
        let start_ns = if flags.contains(StreamFlags::HAS_TIME) {
            if time_ns < self.shared.now_ns() {
                return Transfer::new(Err(StreamCode::TimeError), flags, time_ns);
            }
            time_ns
        } else {
            self.shared.now_ns()
        };

        if !self.shared.wait_until(start_ns + duration_ns(buffer.len(), rate), timeout) {
            return Transfer::new(Err(StreamCode::Timeout), flags, time_ns);
        }
        self.shared.fill_from_loopback(buffer, start_ns, rate);
        Transfer::new(Ok(buffer.len()), StreamFlags::HAS_TIME, start_ns)
    }

    fn read_status(&mut self, channel_mask: u32, timeout: Duration) -> StreamStatus {
        self.shared.record(SimCall::ReadStatus { channel_mask });

        let scripted = lock(&self.shared.faults).statuses.pop_front();
        if let Some(result) = scripted {
            let (result, flags) = match result {
                Ok(flags) => (Ok(()), flags),
                Err(code) => (Err(code), StreamFlags::NONE),
            };
            return StreamStatus {
                result,
                channel_mask,
                flags,
                time_ns: 0,
            };
        }

        match self.events.pop_front() {
            Some(event) => event,
            None => {
                std::thread::sleep(timeout);
                StreamStatus {
                    result: Err(StreamCode::Timeout),
                    channel_mask,
                    flags: StreamFlags::NONE,
                    time_ns: 0,
                }
            }
        }
    }

    fn close(self: Box<Self>) -> Result<(), StreamCode> {
        self.shared.record(SimCall::Close(self.direction));
        Ok(())
    }
}
