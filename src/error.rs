//! Crate-wide error type and the `ash::vk::Result` conversion.

use ash::vk;
use thiserror::Error;

/// Errors surfaced at the public boundary of the core, per the taxonomy in
/// the specification's error handling design.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// `E_INVALIDARG`: malformed input, an open list already attached, an
    /// unknown enum value, or a command-signature whose terminal argument
    /// is not last.
    #[error("invalid argument")]
    InvalidArg,
    /// `E_FAIL`: an operation was attempted in the wrong state (resetting a
    /// recording list, closing a non-recording one, resetting an allocator
    /// with an open list or outstanding submissions).
    #[error("operation failed due to invalid object state")]
    Fail,
    /// `E_OUTOFMEMORY`: host or device allocation failure.
    #[error("out of memory")]
    OutOfMemory(OutOfMemoryKind),
    /// The device has been marked removed; no further GPU work will
    /// complete.
    #[error("device removed")]
    DeviceRemoved,
    /// A Vulkan error that does not map to one of the above.
    #[error("backend error: {0:?}")]
    Backend(vk::Result),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutOfMemoryKind {
    Host,
    Device,
}

impl From<vk::Result> for Error {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => Error::OutOfMemory(OutOfMemoryKind::Host),
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => Error::OutOfMemory(OutOfMemoryKind::Device),
            vk::Result::ERROR_DEVICE_LOST => Error::DeviceRemoved,
            other => Error::Backend(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_vk_results() {
        assert_eq!(
            Error::from(vk::Result::ERROR_OUT_OF_HOST_MEMORY),
            Error::OutOfMemory(OutOfMemoryKind::Host)
        );
        assert_eq!(
            Error::from(vk::Result::ERROR_DEVICE_LOST),
            Error::DeviceRemoved
        );
    }

    #[test]
    fn unknown_result_is_backend_error() {
        match Error::from(vk::Result::ERROR_FRAGMENTED_POOL) {
            Error::Backend(vk::Result::ERROR_FRAGMENTED_POOL) => {}
            other => panic!("unexpected mapping: {:?}", other),
        }
    }
}
