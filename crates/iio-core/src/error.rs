//! Error types for IIO device operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for IIO operations.
pub type Result<T> = std::result::Result<T, IioError>;

/// Errors that can occur when talking to an IIO device.
#[derive(Error, Debug)]
pub enum IioError {
    /// The device cannot be driven (unusable frequency table, no channels, ...)
    #[error("Bad device: {message}")]
    BadDevice { message: String },

    /// A required attribute is not exposed by the device
    #[error("Attribute '{name}' is not available")]
    AttributeMissing { name: String },

    /// Writing an attribute failed
    #[error("Failed to write attribute '{name}': {message}")]
    AttributeWrite { name: String, message: String },

    /// Channel index outside the device descriptor
    #[error("Invalid channel index {index}")]
    InvalidChannel { index: i32 },

    /// A scan element type string could not be parsed
    #[error("Malformed scan type '{value}'")]
    InvalidScanType { value: String },

    /// A sample was requested while the buffer is closed
    #[error("Buffer is not open")]
    BufferNotOpen,

    /// The record read from the buffer was shorter than the layout requires
    #[error("Short read: got {got} bytes, expected {expected}")]
    ShortRead { got: usize, expected: usize },

    /// No device with this id under the sysfs root
    #[error("IIO device {id} not found under '{root}'")]
    DeviceNotFound { id: i32, root: PathBuf },

    /// No trigger could be bound to the device
    #[error("No trigger available for device {device_id}")]
    TriggerNotFound { device_id: i32 },

    /// I/O error from the operating system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IioError {
    /// Shorthand for [`IioError::BadDevice`].
    pub fn bad_device(message: impl Into<String>) -> Self {
        Self::BadDevice {
            message: message.into(),
        }
    }

    /// Shorthand for [`IioError::AttributeWrite`].
    pub fn attribute_write(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AttributeWrite {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Whether the error means the device or one of its pieces does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::DeviceNotFound { .. }
            | Self::TriggerNotFound { .. }
            | Self::AttributeMissing { .. } => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Whether the device itself is unusable (as opposed to a transient failure).
    pub fn is_bad_device(&self) -> bool {
        matches!(self, Self::BadDevice { .. } | Self::InvalidScanType { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IioError::attribute_write("sampling_frequency", "EINVAL");
        assert_eq!(
            err.to_string(),
            "Failed to write attribute 'sampling_frequency': EINVAL"
        );

        let err = IioError::ShortRead {
            got: 6,
            expected: 16,
        };
        assert!(err.to_string().contains("expected 16"));
    }

    #[test]
    fn test_error_classification() {
        assert!(IioError::TriggerNotFound { device_id: 3 }.is_not_found());
        assert!(IioError::from(std::io::Error::from(std::io::ErrorKind::NotFound)).is_not_found());
        assert!(!IioError::BufferNotOpen.is_not_found());

        assert!(IioError::bad_device("empty table").is_bad_device());
        assert!(!IioError::BufferNotOpen.is_bad_device());
    }
}
