//! Text attribute files in a sysfs directory.

use std::fs;
use std::path::{Path, PathBuf};

use iio_core::{Attributes, IioError, Result};
use tracing::trace;

/// A sysfs directory whose files are attributes.
///
/// Every access opens, reads or writes, and closes the file; nothing is
/// held between calls.
#[derive(Debug, Clone)]
pub struct SysfsAttributes {
    dir: PathBuf,
}

impl SysfsAttributes {
    /// Attributes rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether the attribute file exists.
    pub fn exists(&self, name: &str) -> bool {
        self.dir.join(name).exists()
    }
}

impl Attributes for SysfsAttributes {
    fn read_string_attribute(&self, name: &str) -> Option<String> {
        let path = self.dir.join(name);
        match fs::read_to_string(&path) {
            Ok(value) => Some(value.trim_end_matches(['\0', '\n']).trim().to_string()),
            Err(e) => {
                trace!(path = %path.display(), error = %e, "Attribute not readable");
                None
            }
        }
    }

    fn write_string_attribute(&self, name: &str, value: &str) -> Result<()> {
        let path = self.dir.join(name);
        trace!(path = %path.display(), value, "Writing attribute");
        fs::write(&path, value).map_err(|e| IioError::attribute_write(name, e.to_string()))
    }
}
