//! Core types for Linux Industrial I/O (IIO) devices.
//!
//! This crate holds the pieces every IIO driver in the workspace agrees on:
//!
//! - [`ChannelSpec`] and [`ScanType`]: the per-channel record layout
//! - [`DeviceDescriptor`]: the static description of one device
//! - [`FrequencyBand`]: the advertised sampling band and its clamping rule
//! - [`decode_sample`]: raw buffer record to [`IioSample`]
//! - [`Attributes`] and [`IioDevice`]: the hardware abstraction the
//!   fan-out engine is written against
//!
//! Drivers live in their own crates (`iio-driver-sysfs`, `iio-driver-mock`).

pub mod channel;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod frequency;
pub mod sample;

pub use channel::{ChannelSpec, Endianness, ScanType};
pub use descriptor::{DeviceDescriptor, SamplingMode};
pub use device::{attr, format_real, Attributes, IioDevice};
pub use error::{IioError, Result};
pub use frequency::{parse_frequency_table, FrequencyBand, FREQUENCY_EPSILON};
pub use sample::{decode_sample, record_size, IioSample};
