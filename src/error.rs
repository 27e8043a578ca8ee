//! Error types for audio-hal.
//!
//! Errors are split into two categories:
//! - **Fatal errors** ([`HalError`]): returned from explicit control operations
//!   (opening endpoints, mapping MMAP buffers, parameter parsing)
//! - **Recoverable events**: hardware hiccups on the data path are absorbed and
//!   surfaced via [`EventCallback`](crate::EventCallback) instead

use crate::format::AudioFormat;
use crate::pcm::PcmAddress;
use crate::PatchHandle;

/// Errors returned by the HAL control surface.
#[derive(Debug, thiserror::Error)]
pub enum HalError {
    /// The requested sample rate is not accepted by this endpoint kind.
    #[error("sample rate {rate}Hz not supported")]
    UnsupportedSampleRate {
        /// The rejected rate.
        rate: u32,
    },

    /// The requested sample format is not accepted by this endpoint kind.
    #[error("unsupported sample format: {format:?}")]
    UnsupportedFormat {
        /// The rejected format.
        format: AudioFormat,
    },

    /// The requested channel count is not accepted by this endpoint kind.
    #[error("unsupported channel count: {channels}")]
    UnsupportedChannelCount {
        /// The rejected channel count.
        channels: u32,
    },

    /// A primary output is already open on this device.
    #[error("primary output already open")]
    PrimaryOutputExists,

    /// A PCM device could not be opened or prepared.
    #[error("pcm device {address} unavailable: {source}")]
    DeviceUnavailable {
        /// Card/device pair that failed.
        address: PcmAddress,
        /// The underlying PCM error.
        #[source]
        source: PcmError,
    },

    /// The operation does not apply to this endpoint or mode.
    #[error("operation not supported")]
    NotSupported,

    /// The endpoint is not in a state that allows the operation.
    #[error("invalid state: {reason}")]
    InvalidState {
        /// What was wrong.
        reason: &'static str,
    },

    /// A key/value parameter carried a value that could not be used.
    #[error("invalid value for parameter '{key}': {value}")]
    InvalidParameter {
        /// Parameter key.
        key: String,
        /// The rejected value.
        value: String,
    },

    /// An audio patch needs at least one source and one sink.
    #[error("audio patch needs at least one source and one sink")]
    EmptyPatch,

    /// The patch handle was never issued or was already released.
    #[error("unknown audio patch {handle}")]
    UnknownPatch {
        /// The handle that wasn't found.
        handle: PatchHandle,
    },

    /// No PCM backend was configured and no default backend is compiled in.
    #[error("no pcm backend configured")]
    NoBackend,

    /// An error from the PCM layer outside of open/prepare.
    #[error("pcm error: {0}")]
    Pcm(#[from] PcmError),
}

impl HalError {
    /// Creates an invalid state error.
    pub fn invalid_state(reason: &'static str) -> Self {
        Self::InvalidState { reason }
    }

    /// Creates an invalid parameter error.
    pub fn invalid_parameter(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidParameter {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Creates a device unavailable error for the given address.
    pub fn device_unavailable(address: PcmAddress, source: PcmError) -> Self {
        Self::DeviceUnavailable { address, source }
    }
}

/// Errors reported by a [`Pcm`](crate::pcm::Pcm) handle or backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PcmError {
    /// No device exists at the requested address.
    #[error("device not found")]
    NotFound,

    /// The device is held by another client.
    #[error("device busy")]
    Busy,

    /// The device was halted underneath a blocking call.
    ///
    /// Relay loops treat this as the normal shutdown signal and don't log it.
    #[error("device in bad state")]
    BadState,

    /// A transfer failed.
    #[error("i/o error: {reason}")]
    Io {
        /// Description of the failure.
        reason: String,
    },

    /// Buffer underrun (playback) or overrun (capture).
    #[error("xrun")]
    Xrun,

    /// The backend doesn't implement this operation or mode.
    #[error("operation not supported by backend")]
    Unsupported,

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl PcmError {
    /// Creates an I/O error with the given reason.
    pub fn io(reason: impl Into<String>) -> Self {
        Self::Io {
            reason: reason.into(),
        }
    }

    /// Returns `true` if the device was halted (the equivalent of `EBADFD`).
    #[must_use]
    pub fn is_bad_state(&self) -> bool {
        matches!(self, Self::BadState)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hal_error_display() {
        let err = HalError::UnsupportedSampleRate { rate: 96000 };
        assert_eq!(err.to_string(), "sample rate 96000Hz not supported");
    }

    #[test]
    fn test_device_unavailable_display() {
        let err = HalError::device_unavailable(PcmAddress::new(0, 2), PcmError::Busy);
        assert_eq!(err.to_string(), "pcm device hw:0,2 unavailable: device busy");
    }

    #[test]
    fn test_invalid_parameter() {
        let err = HalError::invalid_parameter("routing", "abc");
        assert_eq!(
            err.to_string(),
            "invalid value for parameter 'routing': abc"
        );
    }

    #[test]
    fn test_pcm_error_from() {
        let err: HalError = PcmError::io("short write").into();
        assert!(matches!(err, HalError::Pcm(PcmError::Io { .. })));
        assert_eq!(err.to_string(), "pcm error: i/o error: short write");
    }

    #[test]
    fn test_bad_state() {
        assert!(PcmError::BadState.is_bad_state());
        assert!(!PcmError::Xrun.is_bad_state());
    }
}
