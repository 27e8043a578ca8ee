//! PCM device abstraction.
//!
//! A [`PcmBackend`] opens [`Pcm`] handles on a card/device address. Handles
//! do blocking, period-sized transfers and are closed on drop. Each handle has
//! exactly one user thread; other threads may only halt it through the
//! [`PcmInterrupt`] capability it hands out.
//!
//! Backends:
//! - [`MockPcmBackend`]: hardware-free, for tests and bring-up
//! - `CpalBackend`: blocking handles over CPAL streams (feature `cpal`)

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PcmConfig;
use crate::PcmError;

#[cfg(feature = "cpal")]
mod cpal_backend;
mod mock;

#[cfg(feature = "cpal")]
pub use cpal_backend::CpalBackend;
pub use mock::MockPcmBackend;

/// Card/device pair identifying a PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PcmAddress {
    /// Sound card index.
    pub card: u32,
    /// PCM device index on the card.
    pub device: u32,
}

impl PcmAddress {
    /// Creates an address.
    #[must_use]
    pub const fn new(card: u32, device: u32) -> Self {
        Self { card, device }
    }
}

impl fmt::Display for PcmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hw:{},{}", self.card, self.device)
    }
}

/// Transfer direction of a PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PcmDirection {
    /// Host to device.
    Playback,
    /// Device to host.
    Capture,
}

/// How a PCM exchanges data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PcmMode {
    /// Blocking `read`/`write` calls.
    Blocking,
    /// Shared ring buffer, accessed through `mmap_begin`/`mmap_commit`.
    Mmap,
}

/// Hardware timestamp paired with the available frame count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmTimestamp {
    /// Frames available to the application (free space for playback, queued
    /// data for capture).
    pub avail: u32,
    /// Monotonic time the sample was taken.
    pub time: Duration,
}

/// Hardware pointer of a mapped PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmapPosition {
    /// Frames the hardware has consumed or produced since start.
    pub position_frames: i64,
    /// Monotonic time of the reading in nanoseconds.
    pub time_nanos: i64,
}

/// Capability to halt a PCM from another thread.
///
/// After `interrupt`, blocked and future transfers on the handle fail with
/// [`PcmError::BadState`].
pub trait PcmInterrupt: Send + Sync {
    /// Halts the device.
    fn interrupt(&self);
}

/// An open PCM handle. Dropping it closes the device.
pub trait Pcm: Send {
    /// Address this handle was opened on.
    fn address(&self) -> PcmAddress;

    /// Transfer direction.
    fn direction(&self) -> PcmDirection;

    /// Parameters the handle was opened with.
    fn config(&self) -> &PcmConfig;

    /// Readies the device for transfers.
    fn prepare(&mut self) -> Result<(), PcmError>;

    /// Starts the hardware clock.
    fn start(&mut self) -> Result<(), PcmError>;

    /// Stops the hardware clock, dropping pending frames.
    fn stop(&mut self) -> Result<(), PcmError>;

    /// Blocks until `buf` is filled.
    fn read(&mut self, buf: &mut [u8]) -> Result<(), PcmError>;

    /// Blocks until `buf` is queued.
    fn write(&mut self, buf: &[u8]) -> Result<(), PcmError>;

    /// Available frames with a timestamp.
    fn htimestamp(&self) -> Result<PcmTimestamp, PcmError>;

    /// Returns the mapped ring buffer.
    fn mmap_begin(&mut self) -> Result<&mut [u8], PcmError> {
        Err(PcmError::Unsupported)
    }

    /// Publishes `frames` written (or consumed) in the mapped buffer.
    fn mmap_commit(&mut self, frames: u32) -> Result<(), PcmError> {
        let _ = frames;
        Err(PcmError::Unsupported)
    }

    /// Hardware pointer of a mapped handle.
    fn mmap_position(&self) -> Result<MmapPosition, PcmError> {
        Err(PcmError::Unsupported)
    }

    /// Hands out a capability to halt this handle from another thread.
    fn interrupter(&self) -> Arc<dyn PcmInterrupt>;
}

/// Opens PCM handles.
pub trait PcmBackend: Send + Sync {
    /// Opens `address` for `direction` with `config`.
    fn open(
        &self,
        address: PcmAddress,
        direction: PcmDirection,
        mode: PcmMode,
        config: &PcmConfig,
    ) -> Result<Box<dyn Pcm>, PcmError>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display() {
        assert_eq!(PcmAddress::new(1, 0).to_string(), "hw:1,0");
    }
}
