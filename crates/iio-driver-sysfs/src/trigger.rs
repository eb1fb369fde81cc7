//! IIO trigger devices.

use iio_core::{Attributes, Result};

use crate::attributes::SysfsAttributes;
use crate::context::TriggerEntry;

/// A trigger (`triggerN`) pacing a device without a hardware FIFO.
#[derive(Debug, Clone)]
pub struct SysfsTrigger {
    id: i32,
    name: String,
    attrs: SysfsAttributes,
}

impl SysfsTrigger {
    pub(crate) fn from_entry(entry: &TriggerEntry) -> Self {
        Self {
            id: entry.id,
            name: entry.name.clone(),
            attrs: SysfsAttributes::new(&entry.path),
        }
    }

    /// Trigger id (`N` in `triggerN`).
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Trigger name, as written to a device's `trigger/current_trigger`.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Attributes for SysfsTrigger {
    fn read_string_attribute(&self, name: &str) -> Option<String> {
        self.attrs.read_string_attribute(name)
    }

    fn write_string_attribute(&self, name: &str, value: &str) -> Result<()> {
        self.attrs.write_string_attribute(name, value)
    }
}
