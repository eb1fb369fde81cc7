//! CLI entry point for iio-service
//!
//! Provides command-line access to:
//! - Listing the IIO devices the kernel exposes
//! - Reading a device through the fan-out engine, with latency statistics
//! - Printing the effective configuration
//!
//! # Usage
//!
//! ```bash
//! iio-service list
//! iio-service read --device 0 --channels accel_x,accel_y,accel_z,timestamp --frequency 10
//! iio-service --config /etc/iio-service.toml show-config
//! ```

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use iio_core::{IioDevice, IioSample};
use iio_driver_sysfs::SysfsContext;
use iio_service::config::{ServiceConfig, DEFAULT_CONFIG_PATH};
use iio_service::logging::{self, OutputFormat, TracingConfig};
use iio_service::{channel_sink, EngineHandle, SamplesEngine, SinkEvent, SubscriberSpec};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "iio-service")]
#[command(about = "Multi-client sample fan-out for Linux IIO sensors", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format (pretty, compact, json)
    #[arg(long, global = true, default_value = "compact")]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List IIO devices with their channels and frequency band
    List,

    /// Subscribe to a device and print its samples
    Read {
        /// Device id (N in iio:deviceN)
        #[arg(long)]
        device: i32,

        /// Comma separated channel ids
        #[arg(long, value_delimiter = ',', required = true)]
        channels: Vec<String>,

        /// Delivery rate in Hz
        #[arg(long)]
        frequency: f64,

        /// Delivery deadline in milliseconds, 0 to disable
        #[arg(long, default_value_t = 0)]
        timeout_ms: u32,

        /// Stop after this many samples
        #[arg(long)]
        samples: Option<u64>,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut config = ServiceConfig::load_from(&path)
        .with_context(|| format!("loading {}", path.display()))?;
    if let Some(level) = &cli.log_level {
        config.application.log_level = level.to_lowercase();
    }
    config.validate().map_err(|e| anyhow!(e))?;

    let level = logging::parse_log_level(&config.application.log_level).map_err(|e| anyhow!(e))?;
    logging::init(TracingConfig::new(level).with_format(cli.log_format)).map_err(|e| anyhow!(e))?;

    match cli.command {
        Commands::List => list_devices(&config),
        Commands::Read {
            device,
            channels,
            frequency,
            timeout_ms,
            samples,
        } => {
            read_device(
                &config,
                ReadRequest {
                    device,
                    channels,
                    frequency,
                    timeout_ms,
                    samples,
                },
            )
            .await
        }
        Commands::ShowConfig => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn context(config: &ServiceConfig) -> SysfsContext {
    SysfsContext::new(&config.sysfs.devices_root, &config.sysfs.dev_root)
}

fn list_devices(config: &ServiceConfig) -> Result<()> {
    let context = context(config);
    let entries = context.devices()?;
    if entries.is_empty() {
        println!("No IIO devices under {}", context.devices_root().display());
        return Ok(());
    }

    for entry in entries {
        println!("iio:device{} {}", entry.id, entry.name);
        let device = match context.open_device(entry.id, config.sysfs.buffer_length) {
            Ok(device) => device,
            Err(e) => {
                println!("  unusable: {e}");
                continue;
            }
        };
        println!("  mode: {:?}", device.descriptor().sampling_mode());
        match device.parse_frequency_table() {
            Ok(band) => println!("  frequency: {} .. {} Hz", band.min, band.max),
            Err(e) => println!("  frequency: {e}"),
        }
        let ids: Vec<&str> = device
            .descriptor()
            .channels()
            .iter()
            .map(|ch| ch.id.as_str())
            .collect();
        println!("  channels: {}", ids.join(", "));
    }
    Ok(())
}

struct ReadRequest {
    device: i32,
    channels: Vec<String>,
    frequency: f64,
    timeout_ms: u32,
    samples: Option<u64>,
}

async fn read_device(config: &ServiceConfig, request: ReadRequest) -> Result<()> {
    let context = context(config);
    let device = context.open_device(request.device, config.sysfs.buffer_length)?;

    let descriptor = device.descriptor();
    let mut indices = Vec::with_capacity(request.channels.len());
    for id in &request.channels {
        let channel = descriptor
            .channel_by_id(id)
            .ok_or_else(|| anyhow!("device {} has no channel '{id}'", request.device))?;
        indices.push(channel.index);
    }
    let names: Vec<(i32, String)> = descriptor
        .channels()
        .iter()
        .map(|ch| (ch.index, ch.id.clone()))
        .collect();
    let timestamp = descriptor
        .channel_by_id("timestamp")
        .map(|ch| ch.index)
        .filter(|index| indices.contains(index));

    let trigger = if descriptor.uses_fifo() {
        None
    } else {
        Some(context.trigger_for(&device)?)
    };

    let mut builder = SamplesEngine::builder(device).config(config.engine.clone());
    if let Some(trigger) = trigger {
        builder = builder.trigger(trigger);
    }
    let engine = builder.build()?;
    let (handle, thread) =
        EngineHandle::spawn_on_thread(engine, format!("iio-engine-{}", request.device))?;

    let (sink, mut events) = channel_sink();
    let id = handle
        .add_subscriber(
            SubscriberSpec::new(sink)
                .frequency(request.frequency)
                .channels(indices)
                .timeout_ms(request.timeout_ms),
        )
        .await?;
    let effective = handle.frequency(id).await?;
    info!(subscriber = %id, requested = request.frequency, frequency = effective, "Subscribed");

    let mut received = 0u64;
    let mut latencies = Vec::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            event = events.recv() => match event {
                Some(SinkEvent::Sample(sample)) => {
                    received += 1;
                    println!("{}", format_sample(&sample, &names));
                    if let Some(latency) = timestamp.and_then(|ts| latency_ns(&sample, ts)) {
                        latencies.push(latency);
                    }
                    if request.samples.is_some_and(|n| received >= n) {
                        break;
                    }
                }
                Some(SinkEvent::Error(e)) => warn!(subscriber = %id, error = %e, "Subscriber error"),
                None => break,
            },
        }
    }

    let stats = handle.stats().await?;
    handle.shutdown().await?;
    tokio::task::spawn_blocking(move || thread.join())
        .await?
        .map_err(|_| anyhow!("engine thread panicked"))?;

    println!(
        "{received} samples, device at {} Hz, {} read failures",
        stats.device_frequency, stats.read_failures
    );
    match LatencySummary::from_samples(&mut latencies) {
        Some(summary) => println!("{summary}"),
        None if timestamp.is_none() => println!("latency: enable the timestamp channel to measure"),
        None => println!("latency: no samples"),
    }
    Ok(())
}

fn format_sample(sample: &IioSample, names: &[(i32, String)]) -> String {
    names
        .iter()
        .filter_map(|(index, id)| sample.get(index).map(|value| format!("{id}={value}")))
        .collect::<Vec<_>>()
        .join(" ")
}

fn latency_ns(sample: &IioSample, timestamp: i32) -> Option<i64> {
    let ts = *sample.get(&timestamp)?;
    let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
    Some(i64::try_from(now.as_nanos()).ok()? - ts)
}

#[derive(Debug, PartialEq)]
struct LatencySummary {
    min: i64,
    median: i64,
    max: i64,
    mean: i64,
}

impl LatencySummary {
    fn from_samples(latencies: &mut [i64]) -> Option<Self> {
        if latencies.is_empty() {
            return None;
        }
        latencies.sort_unstable();
        let sum: i128 = latencies.iter().map(|&l| i128::from(l)).sum();
        Some(Self {
            min: latencies[0],
            median: latencies[latencies.len() / 2],
            max: latencies[latencies.len() - 1],
            mean: (sum / latencies.len() as i128) as i64,
        })
    }
}

impl std::fmt::Display for LatencySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ms = |ns: i64| ns as f64 / 1e6;
        write!(
            f,
            "latency ms: min {:.3} median {:.3} max {:.3} mean {:.3}",
            ms(self.min),
            ms(self.median),
            ms(self.max),
            ms(self.mean)
        )
    }
}
