//! # IIO sample fan-out service
//!
//! Lets many independent clients read one Linux Industrial I/O sensor at
//! the same time, each at its own rate and on its own subset of channels.
//!
//! One [`SamplesEngine`] owns one device. It runs the device at the highest
//! rate any active client asked for and delivers each client a decimated,
//! window-averaged stream through its [`SampleSink`].
//!
//! ## Crate Structure
//!
//! - **`engine`**: the engine task, its control handle, subscriber
//!   registry, frequency arbitration, decimation, delivery deadlines and
//!   read-error throttling.
//! - **`sink`**: the capability through which a subscriber receives samples
//!   and errors.
//! - **`config`**: Figment-based configuration (`ServiceConfig`).
//! - **`logging`**: tracing subscriber setup for binaries.
//! - **`error`**: `ServiceError` for control calls, `ObserverError` for
//!   errors delivered to sinks.
//!
//! Device access goes through [`iio_core::IioDevice`]; the Linux sysfs
//! implementation lives in `iio-driver-sysfs` and a scriptable test double in
//! `iio-driver-mock`.

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod sink;

pub use iio_core;

pub use config::{ApplicationConfig, EngineConfig, ServiceConfig, SysfsConfig};
pub use engine::{
    EngineHandle, EngineStats, SamplesEngine, SamplesEngineBuilder, SubscriberId,
    SubscriberSpec, WindowAverage, RECOVER_AFTER, SUPPRESS_AFTER,
};
pub use error::{ObserverError, ServiceError, ServiceResult};
pub use sink::{channel_sink, ChannelSink, SampleSink, SinkEvent, SinkReceiver};
