//! Error types for the service.
//!
//! Two families of errors exist:
//!
//! - [`ServiceError`]: returned to the caller of an [`EngineHandle`]
//!   method or a configuration loader. Wraps device errors
//!   ([`iio_core::IioError`]) and configuration errors (`figment`).
//! - [`ObserverError`]: delivered to a subscriber's sink. These never fail a
//!   call; the engine keeps running after reporting them.
//!
//! [`EngineHandle`]: crate::engine::EngineHandle

use iio_core::IioError;
use thiserror::Error;

use crate::engine::SubscriberId;

/// Convenience alias for results using the service error type.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Device error: {0}")]
    Device(#[from] IioError),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown subscriber {0}")]
    UnknownSubscriber(SubscriberId),

    #[error("Device {device_id} is paced by a trigger but none was supplied")]
    TriggerRequired { device_id: i32 },

    #[error("Samples engine is no longer running")]
    EngineClosed,
}

impl From<figment::Error> for ServiceError {
    fn from(e: figment::Error) -> Self {
        Self::Config(Box::new(e))
    }
}

/// Error kinds reported to a subscriber through its sink.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObserverError {
    #[error("subscriber is already started")]
    AlreadyStarted,

    #[error("frequency is zero after clamping")]
    FrequencyInvalid,

    #[error("no channels are enabled")]
    NoEnabledChannels,

    #[error("failed to program the device sampling frequency")]
    SetFrequencyIoFailed,

    #[error("failed to acquire the device buffer")]
    GetFdFailed,

    #[error("device read failed")]
    ReadFailed,

    #[error("no sample delivered within the timeout")]
    ReadTimeout,
}

impl ObserverError {
    /// Whether the error comes from the device rather than from the
    /// subscriber's own configuration.
    pub fn is_operational(&self) -> bool {
        !matches!(
            self,
            Self::AlreadyStarted | Self::FrequencyInvalid | Self::NoEnabledChannels
        )
    }
}
