//! Enumeration of IIO devices and triggers.

use std::fs;
use std::path::{Path, PathBuf};

use iio_core::{attr, Attributes, IioDevice, IioError, Result};
use tracing::{debug, info};

use crate::attributes::SysfsAttributes;
use crate::device::SysfsDevice;
use crate::trigger::SysfsTrigger;

/// Where the kernel exposes IIO devices.
pub const DEFAULT_DEVICES_ROOT: &str = "/sys/bus/iio/devices";

/// Where the buffer character devices live.
pub const DEFAULT_DEV_ROOT: &str = "/dev";

const DEVICE_PREFIX: &str = "iio:device";
const TRIGGER_PREFIX: &str = "trigger";

/// A device directory found under the devices root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    /// `N` in `iio:deviceN`
    pub id: i32,
    /// Contents of `name`
    pub name: String,
    /// Sysfs directory
    pub path: PathBuf,
}

/// A trigger directory found under the devices root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerEntry {
    /// `N` in `triggerN`
    pub id: i32,
    /// Contents of `name`
    pub name: String,
    /// Sysfs directory
    pub path: PathBuf,
}

/// Entry point to the IIO devices of one sysfs tree.
#[derive(Debug, Clone)]
pub struct SysfsContext {
    devices_root: PathBuf,
    dev_root: PathBuf,
}

impl SysfsContext {
    /// Context over custom roots (tests use a fake tree).
    pub fn new(devices_root: impl Into<PathBuf>, dev_root: impl Into<PathBuf>) -> Self {
        Self {
            devices_root: devices_root.into(),
            dev_root: dev_root.into(),
        }
    }

    /// Context over the running kernel's tree.
    pub fn system() -> Self {
        Self::new(DEFAULT_DEVICES_ROOT, DEFAULT_DEV_ROOT)
    }

    /// Sysfs devices root.
    pub fn devices_root(&self) -> &Path {
        &self.devices_root
    }

    /// All `iio:deviceN` entries, sorted by id.
    pub fn devices(&self) -> Result<Vec<DeviceEntry>> {
        Ok(self
            .scan(DEVICE_PREFIX)?
            .into_iter()
            .map(|(id, name, path)| DeviceEntry { id, name, path })
            .collect())
    }

    /// All `triggerN` entries, sorted by id.
    pub fn triggers(&self) -> Result<Vec<TriggerEntry>> {
        Ok(self
            .scan(TRIGGER_PREFIX)?
            .into_iter()
            .map(|(id, name, path)| TriggerEntry { id, name, path })
            .collect())
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(i32, String, PathBuf)>> {
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.devices_root)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(id) = file_name
                .to_str()
                .and_then(|n| n.strip_prefix(prefix))
                .and_then(|n| n.parse::<i32>().ok())
            else {
                continue;
            };
            let path = entry.path();
            let name = SysfsAttributes::new(&path)
                .read_string_attribute(attr::NAME)
                .unwrap_or_default();
            found.push((id, name, path));
        }
        found.sort_by_key(|(id, _, _)| *id);
        Ok(found)
    }

    /// Open `iio:device<id>`, requesting `buffer_length` records of buffering.
    pub fn open_device(&self, id: i32, buffer_length: u32) -> Result<SysfsDevice> {
        let dir = self.devices_root.join(format!("{DEVICE_PREFIX}{id}"));
        if !dir.is_dir() {
            return Err(IioError::DeviceNotFound {
                id,
                root: self.devices_root.clone(),
            });
        }
        let dev_path = self.dev_root.join(format!("{DEVICE_PREFIX}{id}"));
        SysfsDevice::open(id, dir, dev_path, buffer_length)
    }

    /// Trigger pacing `device`.
    ///
    /// Uses the trigger already named in `trigger/current_trigger`; otherwise
    /// binds `trigger<id + 1>` to the device.
    pub fn trigger_for(&self, device: &SysfsDevice) -> Result<SysfsTrigger> {
        let triggers = self.triggers()?;

        if let Some(current) = device
            .read_string_attribute(attr::CURRENT_TRIGGER)
            .filter(|name| !name.is_empty())
        {
            if let Some(entry) = triggers.iter().find(|t| t.name == current) {
                debug!(device_id = device.id(), trigger = %entry.name, "Using bound trigger");
                return Ok(SysfsTrigger::from_entry(entry));
            }
        }

        let wanted = device.id() + 1;
        let entry = triggers
            .iter()
            .find(|t| t.id == wanted)
            .ok_or(IioError::TriggerNotFound {
                device_id: device.id(),
            })?;
        device.write_string_attribute(attr::CURRENT_TRIGGER, &entry.name)?;
        info!(device_id = device.id(), trigger = %entry.name, "Bound trigger to device");
        Ok(SysfsTrigger::from_entry(entry))
    }
}
