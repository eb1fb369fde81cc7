//! Mock IIO driver for iio-service.
//!
//! Provides an in-memory device that behaves like a buffered IIO device
//! without touching sysfs. Tests drive it through a [`MockDeviceHandle`]:
//!
//! - queue samples and read failures for the engine to consume
//! - inspect and script attributes (`sampling_frequency`, FIFO timeout, ...)
//! - inject write failures and buffer acquisition failures
//! - emulate kernels that run faster than requested
//!
//! ```rust,ignore
//! use iio_driver_mock::{pattern, MockIioDevice};
//!
//! let (device, handle) = MockIioDevice::accelerometer();
//! handle.push_samples(pattern::accel_stream(100));
//! ```

mod attributes;
mod device;
pub mod pattern;

pub use attributes::MockAttributes;
pub use device::{MockDeviceHandle, MockIioDevice, MockIioDeviceBuilder, MockRead};
