//! rfburst: timed TX/RX burst tester
//!
//! Brings up one radio, then runs two independent periodic schedules:
//! RX bursts start one burst period (plus a separation) ahead of TX bursts,
//! and every transfer is reported with its outcome. Runs until Ctrl+C.
//!
//! Without hardware, `--driver sim` runs the same loop against the
//! in-process simulator. Real radios need the `soapysdr` feature.

use anyhow::{bail, Context, Result};
use clap::Parser;
use rfburst_core::observe::{init_logging, LogFormat, LogLevel};
use rfburst_core::{BurstTimeline, CancelToken, Direction, RfburstConfig, Sample};
use rfburst_radio::hal::SoapySdrDriver;
use rfburst_radio::{
    create_default_registry, BurstScheduler, DeviceInitializer, DeviceSession, InitError,
    RadioError, ScheduleReport,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "rfburst")]
#[command(author, version, about = "Timed TX/RX burst tester for SoapySDR radios", long_about = None)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short = 'c', long = "cfg")]
    cfg: Option<PathBuf>,

    /// Radio driver (sim, soapysdr)
    #[arg(long, default_value = "soapysdr")]
    driver: String,

    /// Device arguments (e.g. "driver=lime,serial=...")
    #[arg(short = 'd', long)]
    args: Option<String>,

    /// Clock source (empty = device default)
    #[arg(short = 'e', long)]
    clock_source: Option<String>,

    /// Time source (empty = device default)
    #[arg(short = 'x', long)]
    time_source: Option<String>,

    /// Master clock rate in Hz
    #[arg(short = 'm', long)]
    master_clock_rate: Option<f64>,

    /// Clock divider applied to both chains (sample rate = master clock / divider)
    #[arg(long)]
    clock_divider: Option<u16>,

    /// Center frequency in Hz applied to both chains
    #[arg(short = 'f', long)]
    center_frequency: Option<f64>,

    /// Streaming timeout in seconds
    #[arg(short = 'j', long)]
    timeout: Option<f64>,

    /// TX chain active (true/false)
    #[arg(short = 't', long)]
    tx_active: Option<bool>,

    /// RX chain active (true/false)
    #[arg(short = 'r', long)]
    rx_active: Option<bool>,

    #[arg(short = 'o', long)]
    tx_channel: Option<usize>,

    #[arg(short = 'p', long)]
    rx_channel: Option<usize>,

    #[arg(short = 'n', long)]
    tx_antenna: Option<String>,

    #[arg(short = 'a', long)]
    rx_antenna: Option<String>,

    /// TX gain in dB
    #[arg(short = 'q', long)]
    tx_gain: Option<f64>,

    /// RX gain in dB
    #[arg(short = 'w', long)]
    rx_gain: Option<f64>,

    /// TX analog bandwidth in Hz (0 = leave device default)
    #[arg(short = 'b', long)]
    tx_bandwidth: Option<f64>,

    /// RX analog bandwidth in Hz (0 = leave device default)
    #[arg(short = 'i', long)]
    rx_bandwidth: Option<f64>,

    /// Burst period in seconds
    #[arg(short = 'u', long)]
    burst_period: Option<f64>,

    /// TX burst length in seconds
    #[arg(short = 'k', long)]
    tx_burst_length: Option<f64>,

    /// RX burst length in seconds
    #[arg(short = 'l', long)]
    rx_burst_length: Option<f64>,

    /// Extra lead of RX over TX in seconds, on top of one burst period
    #[arg(short = 's', long)]
    rx_tx_separation: Option<f64>,

    /// Delay before the first burst in seconds
    #[arg(short = 'y', long)]
    time_in_future: Option<f64>,

    /// Require an end-of-burst acknowledgment for every TX burst
    #[arg(long)]
    ack: bool,

    /// Stop each chain after this many bursts
    #[arg(long)]
    bursts: Option<u64>,

    /// Do not log settings and their readbacks during initialization
    #[arg(long)]
    quiet_settings: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<LogLevel>,

    /// Log format (compact, pretty, json)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Append log output to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Print an example configuration file and exit
    #[arg(long)]
    print_config: bool,

    /// Write the effective configuration to this file and exit
    #[arg(long)]
    save_config: Option<PathBuf>,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration.
    fn apply(&self, config: &mut RfburstConfig) {
        let sdr = &mut config.sdr;
        if let Some(ref args) = self.args {
            sdr.args = args.clone();
        }
        if let Some(ref source) = self.clock_source {
            sdr.clock_source = Some(source.clone());
        }
        if let Some(ref source) = self.time_source {
            sdr.time_source = Some(source.clone());
        }
        if let Some(rate) = self.master_clock_rate {
            sdr.master_clock_rate = rate;
        }
        if let Some(timeout) = self.timeout {
            sdr.timeout = timeout;
        }
        if self.quiet_settings {
            sdr.debug_settings = false;
        }

        for direction in [Direction::Tx, Direction::Rx] {
            let chain = sdr.chain_mut(direction);
            if let Some(divider) = self.clock_divider {
                chain.clock_divider = divider;
            }
            if let Some(frequency) = self.center_frequency {
                chain.frequency = frequency;
            }
        }

        let (tx, rx) = (&mut sdr.tx, &mut sdr.rx);
        if let Some(active) = self.tx_active {
            tx.active = active;
        }
        if let Some(active) = self.rx_active {
            rx.active = active;
        }
        if let Some(channel) = self.tx_channel {
            tx.channel = channel;
        }
        if let Some(channel) = self.rx_channel {
            rx.channel = channel;
        }
        if let Some(ref antenna) = self.tx_antenna {
            tx.antenna = antenna.clone();
        }
        if let Some(ref antenna) = self.rx_antenna {
            rx.antenna = antenna.clone();
        }
        if let Some(gain) = self.tx_gain {
            tx.gain = gain;
        }
        if let Some(gain) = self.rx_gain {
            rx.gain = gain;
        }
        if let Some(bw) = self.tx_bandwidth {
            tx.bandwidth = bw;
        }
        if let Some(bw) = self.rx_bandwidth {
            rx.bandwidth = bw;
        }

        let signal = &mut config.signal;
        if let Some(period) = self.burst_period {
            signal.burst_period = period;
        }
        if let Some(length) = self.tx_burst_length {
            signal.tx_burst_length = length;
        }
        if let Some(length) = self.rx_burst_length {
            signal.rx_burst_length = length;
        }
        if let Some(separation) = self.rx_tx_separation {
            signal.rx_tx_separation = separation;
        }
        if let Some(lead) = self.time_in_future {
            signal.time_in_future = lead;
        }

        let logging = &mut config.logging;
        if let Some(level) = self.log_level {
            logging.level = level;
        }
        if let Some(format) = self.log_format {
            logging.format = format;
        }
        if let Some(ref path) = self.log_file {
            logging.file = Some(path.clone());
        }
    }

    fn load_config(&self) -> Result<RfburstConfig> {
        let mut config = match self.cfg {
            Some(ref path) => RfburstConfig::load_from(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => RfburstConfig::load().context("Failed to load config")?,
        };
        self.apply(&mut config);
        Ok(config)
    }
}

/// Options of the burst loops that are not part of the device configuration.
#[derive(Debug, Clone, Copy)]
struct RunOptions {
    ack: bool,
    limit: Option<u64>,
}

/// Run the RX and TX schedules on their own threads until both finish.
///
/// RX starts first. TX waits half a timeout before its first burst so RX is
/// already streaming.
fn run_schedules(
    session: &mut DeviceSession,
    timeline: &BurstTimeline,
    cancel: &CancelToken,
    options: RunOptions,
) -> Result<Vec<ScheduleReport>> {
    let config = Arc::clone(session.config());
    let rx_scheduler =
        BurstScheduler::for_chain(Direction::Rx, timeline, &config).with_limit(options.limit);
    let tx_scheduler =
        BurstScheduler::for_chain(Direction::Tx, timeline, &config).with_limit(options.limit);
    let tx_delay = config.timeout_duration().mul_f64(0.5);
    let (tx_len, rx_len) = (config.buffer_size_tx, config.buffer_size_rx);
    let (tx, rx) = session.transceivers();

    thread::scope(|s| -> Result<Vec<ScheduleReport>> {
        let rx_handle = thread::Builder::new()
            .name("rx".into())
            .spawn_scoped(s, move || {
                let mut rx = rx;
                let mut buffer = vec![Sample::new(0.0, 0.0); rx_len];
                rx_scheduler.run(cancel, |tick| match rx.as_mut() {
                    Some(rx) => rx.receive(tick, &mut buffer),
                    None => Err(RadioError::Unsupported("RX stream is not open".into())),
                })
            });
        let rx_handle = match rx_handle {
            Ok(handle) => handle,
            Err(e) => {
                cancel.cancel();
                return Err(e).context("Failed to spawn RX thread");
            }
        };

        let tx_handle = thread::Builder::new()
            .name("tx".into())
            .spawn_scoped(s, move || {
                let mut tx = tx;
                let payload = vec![Sample::new(1.0, 0.0); tx_len];
                if !cancel.sleep(tx_delay) {
                    return ScheduleReport {
                        direction: Some(Direction::Tx),
                        next_tick: tx_scheduler.start_tick(),
                        ..Default::default()
                    };
                }
                tx_scheduler.run(cancel, |tick| match tx.as_mut() {
                    Some(tx) => tx.send(tick, &payload, options.ack),
                    None => Err(RadioError::Unsupported("TX stream is not open".into())),
                })
            });
        let tx_handle = match tx_handle {
            Ok(handle) => handle,
            Err(e) => {
                cancel.cancel();
                return Err(e).context("Failed to spawn TX thread");
            }
        };

        let mut reports = Vec::new();
        for (direction, handle) in [(Direction::Rx, rx_handle), (Direction::Tx, tx_handle)] {
            match handle.join() {
                Ok(report) => reports.push(report),
                Err(_) => error!(direction = %direction, "{} thread panicked", direction),
            }
        }
        Ok(reports)
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", RfburstConfig::example_yaml());
        return Ok(());
    }

    let config = cli.load_config()?;
    init_logging(&config.logging);
    config.validate().context("Invalid configuration")?;

    if let Some(ref path) = cli.save_config {
        config
            .save(path)
            .with_context(|| format!("Failed to save config {}", path.display()))?;
        info!("Configuration written to {}", path.display());
        return Ok(());
    }

    if cli.driver == "soapysdr" && !SoapySdrDriver::new().is_available() {
        bail!("libSoapySDR is not available (build with --features soapysdr, or use --driver sim)");
    }
    let driver = create_default_registry()
        .get(&cli.driver)
        .context("Failed to select radio driver")?;

    let device_config = Arc::new(config.finished_device_config());
    info!(
        driver = %cli.driver,
        args = %device_config.args,
        tx_samples = device_config.buffer_size_tx,
        rx_samples = device_config.buffer_size_rx,
        "Burst tester starting"
    );

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            info!("Stop requested");
            cancel.cancel();
        })
        .context("Failed to set Ctrl+C handler")?;
    }

    let mut initializer = DeviceInitializer::new(
        driver,
        Arc::clone(&device_config),
        config.init.clone(),
        cancel.clone(),
    );
    let mut session = match initializer.run() {
        Ok(session) => session,
        Err(InitError::Cancelled { attempts }) => {
            info!("Initialization abandoned after {} attempt(s)", attempts);
            return Ok(());
        }
        Err(e) => return Err(e).context("Device initialization failed"),
    };

    let now = session.hardware_time().context("Failed to read hardware time")?;
    let timeline = BurstTimeline::plan(now, &device_config, &config.signal)
        .context("Failed to plan burst timeline")?;
    info!(
        now_tick = timeline.now_tick,
        rx_start_tick = timeline.rx_start_tick,
        tx_start_tick = timeline.tx_start_tick,
        ticks_per_period = timeline.ticks_per_period,
        "Burst timeline planned"
    );

    let options = RunOptions {
        ack: cli.ack,
        limit: cli.bursts,
    };
    let reports = run_schedules(&mut session, &timeline, &cancel, options)?;

    let linger = device_config.timeout_duration();
    info!("Waiting {:.3} s before teardown", linger.as_secs_f64());
    thread::sleep(linger);
    session.teardown();

    for report in &reports {
        info!("{}", report);
    }
    let stopped: Vec<_> = reports.iter().filter(|r| r.ended_by_error()).collect();
    if !stopped.is_empty() {
        for report in &stopped {
            warn!("{}", report);
        }
        bail!("{} schedule(s) stopped by error", stopped.len());
    }
    Ok(())
}
