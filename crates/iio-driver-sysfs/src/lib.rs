//! Linux sysfs driver for IIO devices.
//!
//! Devices are found under `/sys/bus/iio/devices/iio:deviceN` and their
//! buffers are read from `/dev/iio:deviceN`. Triggers live next to them as
//! `triggerN`.
//!
//! # Example
//!
//! ```no_run
//! use iio_driver_sysfs::SysfsContext;
//!
//! # async fn example() -> iio_core::Result<()> {
//! let context = SysfsContext::system();
//! for entry in context.devices()? {
//!     println!("{}: {}", entry.id, entry.name);
//! }
//! let device = context.open_device(0, 1)?;
//! # Ok(())
//! # }
//! ```

mod attributes;
mod context;
mod device;
mod trigger;

pub use attributes::SysfsAttributes;
pub use context::{DeviceEntry, SysfsContext, TriggerEntry, DEFAULT_DEVICES_ROOT, DEFAULT_DEV_ROOT};
pub use device::SysfsDevice;
pub use trigger::SysfsTrigger;
