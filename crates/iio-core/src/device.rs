//! Hardware abstraction for IIO devices.
//!
//! The fan-out engine talks to hardware only through these two traits:
//! [`Attributes`] for sysfs-style text attributes (shared with trigger
//! devices) and [`IioDevice`] for the buffered sample stream.

use async_trait::async_trait;

use crate::descriptor::DeviceDescriptor;
use crate::error::{IioError, Result};
use crate::frequency::{parse_frequency_table, FrequencyBand};
use crate::sample::IioSample;

/// Attribute names used by the engine, relative to the device directory.
pub mod attr {
    /// Current sampling rate in Hz
    pub const SAMPLING_FREQUENCY: &str = "sampling_frequency";
    /// Space separated list of supported rates
    pub const SAMPLING_FREQUENCY_AVAILABLE: &str = "sampling_frequency_available";
    /// Device name
    pub const NAME: &str = "name";
    /// Buffer on/off switch
    pub const BUFFER_ENABLE: &str = "buffer/enable";
    /// Buffer depth in records
    pub const BUFFER_LENGTH: &str = "buffer/length";
    /// Maximum latency of the hardware FIFO in seconds
    pub const HWFIFO_TIMEOUT: &str = "buffer/hwfifo_timeout";
    /// Write "1" to drain the hardware FIFO
    pub const HWFIFO_FLUSH: &str = "buffer/hwfifo_flush";
    /// Name of the trigger bound to the device
    pub const CURRENT_TRIGGER: &str = "trigger/current_trigger";
}

/// Format a real for a sysfs write.
pub fn format_real(value: f64) -> String {
    format!("{value}")
}

/// Text attributes of a device or trigger.
///
/// Reads return `None` when the attribute is absent or unreadable; callers
/// decide whether absence matters.
pub trait Attributes: Send {
    /// Read an attribute, trimmed of trailing NULs and whitespace.
    fn read_string_attribute(&self, name: &str) -> Option<String>;

    /// Write an attribute.
    fn write_string_attribute(&self, name: &str, value: &str) -> Result<()>;

    /// Read an integer attribute.
    fn read_number_attribute(&self, name: &str) -> Option<i64> {
        self.read_string_attribute(name)?.trim().parse().ok()
    }

    /// Read a real attribute.
    fn read_double_attribute(&self, name: &str) -> Option<f64> {
        self.read_string_attribute(name)?.trim().parse().ok()
    }

    /// Write an integer attribute as decimal ASCII.
    fn write_number_attribute(&self, name: &str, value: i64) -> Result<()> {
        self.write_string_attribute(name, &value.to_string())
    }

    /// Write a real attribute in plain decimal notation.
    fn write_double_attribute(&self, name: &str, value: f64) -> Result<()> {
        self.write_string_attribute(name, &format_real(value))
    }
}

impl<T: Attributes + ?Sized> Attributes for Box<T> {
    fn read_string_attribute(&self, name: &str) -> Option<String> {
        (**self).read_string_attribute(name)
    }

    fn write_string_attribute(&self, name: &str, value: &str) -> Result<()> {
        (**self).write_string_attribute(name, value)
    }
}

/// A buffered IIO device.
///
/// One engine drives one device exclusively, so every method takes the
/// device by reference from a single task.
#[async_trait]
pub trait IioDevice: Attributes {
    /// Kernel device id (`N` in `iio:deviceN`).
    fn id(&self) -> i32;

    /// Kernel device name.
    fn name(&self) -> &str;

    /// Channel layout and pacing mode.
    fn descriptor(&self) -> &DeviceDescriptor;

    /// Whether the channel's scan element is enabled and can be read.
    fn is_channel_enabled(&self, index: i32) -> bool;

    /// Enable or disable a channel's scan element.
    fn set_channel_enabled(&mut self, index: i32, enabled: bool) -> Result<()>;

    /// Enable the buffer and acquire its file descriptor.
    ///
    /// Calling this while the buffer is already open is a no-op.
    fn open_buffer(&mut self) -> Result<()>;

    /// Release the buffer file descriptor and disable the buffer.
    fn release_buffer(&mut self);

    /// Wait until a record is readable, then read and decode it.
    ///
    /// Must be cancel-safe: dropping the future before completion loses no
    /// record.
    async fn read_next_sample(&mut self) -> Result<IioSample>;

    /// Drain the hardware FIFO.
    fn flush_hw_fifo(&self) -> Result<()> {
        self.write_number_attribute(attr::HWFIFO_FLUSH, 1)
    }

    /// Parse `sampling_frequency_available` into a band.
    fn parse_frequency_table(&self) -> Result<FrequencyBand> {
        let available = self
            .read_string_attribute(attr::SAMPLING_FREQUENCY_AVAILABLE)
            .ok_or_else(|| IioError::bad_device("sampling_frequency_available is missing"))?;
        parse_frequency_table(&available)
    }
}
