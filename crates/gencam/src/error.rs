//! Error taxonomy shared by every backend and the capture facade.

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
/// Failures surfaced by the capture core.
pub enum Error {
    /// Caller handed us something nonsensical: a negative device index, an
    /// index past the end of the device list, or a property value outside the
    /// device's advertised range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested backend or property is not available in this build or
    /// on this device.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Discovery walked every compiled-in backend without opening a camera.
    #[error("no camera available on any backend")]
    NotAvailable,

    /// The device is claimed by another process. The streaming producer
    /// treats this as a retryable condition.
    #[error("device in use: {0}")]
    DeviceInUse(String),

    /// `grab` exceeded the configured buffer timeout.
    #[error("grab timed out after {ms} ms")]
    Timeout { ms: u64 },

    /// Any other SDK-reported failure, carrying the SDK's own message.
    #[error("backend error: {0}")]
    Backend(String),
}

impl Error {
    /// Whether the error means the camera is claimed elsewhere and a retry
    /// may succeed once the other user lets go.
    pub fn is_device_in_use(&self) -> bool {
        matches!(self, Error::DeviceInUse(_))
    }

    pub(crate) fn invalid_index() -> Self {
        Error::InvalidArgument("index out of range".into())
    }
}
