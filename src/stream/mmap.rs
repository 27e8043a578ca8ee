//! Memory-mapped endpoint mode.

use super::{StreamCore, StreamState};
use crate::config::{MMAP_PERIOD_COUNT_MAX, MMAP_PERIOD_COUNT_MIN};
use crate::pcm::{MmapPosition, PcmAddress, PcmBackend, PcmDirection, PcmMode};
use crate::HalError;

/// Geometry of a mapped buffer, as reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmapBufferInfo {
    /// Frames in the whole ring.
    pub buffer_size_frames: u32,
    /// Frames per burst (one period).
    pub burst_size_frames: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct MmapState {
    pub mapped: bool,
    pub started: bool,
}

/// Smallest power-of-two period count in
/// [`MMAP_PERIOD_COUNT_MIN`, `MMAP_PERIOD_COUNT_MAX`] whose buffer holds
/// `min_frames`. Clamps to the maximum when even that is too small.
///
/// ```
/// use audio_hal::stream::tune_period_count;
///
/// assert_eq!(tune_period_count(48, 0), 32);
/// assert_eq!(tune_period_count(48, 2000), 64);
/// assert_eq!(tune_period_count(48, 1_000_000), 512);
/// ```
#[must_use]
pub fn tune_period_count(period_size: u32, min_frames: u32) -> u32 {
    let mut count = MMAP_PERIOD_COUNT_MIN;
    while u64::from(count) * u64::from(period_size) < u64::from(min_frames)
        && count < MMAP_PERIOD_COUNT_MAX
    {
        count *= 2;
    }
    count
}

impl StreamCore {
    /// Opens the PCM in MMAP mode and primes the ring with silence.
    ///
    /// Leaves the endpoint Active but not started: it holds a device handle
    /// and no routing.
    pub fn map_buffer(
        &mut self,
        backend: &dyn PcmBackend,
        address: PcmAddress,
        direction: PcmDirection,
        min_frames: u32,
    ) -> Result<MmapBufferInfo, HalError> {
        let Some(mmap) = self.mmap else {
            return Err(HalError::NotSupported);
        };
        if self.state != StreamState::Standby || mmap.mapped {
            return Err(HalError::invalid_state("mmap buffer needs a stream in standby"));
        }

        let mut config = self.config;
        config.period_count = tune_period_count(config.period_size, min_frames);

        let mut pcm = backend
            .open(address, direction, PcmMode::Mmap, &config)
            .map_err(|e| HalError::device_unavailable(address, e))?;
        pcm.mmap_begin()
            .map_err(|e| HalError::device_unavailable(address, e))?
            .fill(0);
        pcm.mmap_commit(0)
            .map_err(|e| HalError::device_unavailable(address, e))?;

        tracing::debug!(
            %address,
            period_size = config.period_size,
            period_count = config.period_count,
            "mmap buffer created"
        );

        self.config = config;
        self.pcm = Some(pcm);
        self.state = StreamState::Active;
        self.mmap = Some(MmapState {
            mapped: true,
            started: false,
        });

        Ok(MmapBufferInfo {
            buffer_size_frames: config.buffer_frames(),
            burst_size_frames: config.period_size,
        })
    }

    pub fn mmap_position(&self) -> Result<MmapPosition, HalError> {
        let Some(mmap) = self.mmap else {
            return Err(HalError::NotSupported);
        };
        let pcm = match &self.pcm {
            Some(pcm) if mmap.mapped => pcm,
            _ => return Err(HalError::invalid_state("mmap buffer not created")),
        };
        Ok(pcm.mmap_position()?)
    }

    /// Runs `activate` and starts the hardware, once per mapping.
    ///
    /// On failure the endpoint stays mapped and not started; `activate`'s
    /// counterpart is the caller's job.
    pub fn start_mapped(&mut self) -> Result<bool, HalError> {
        let Some(mmap) = self.mmap else {
            return Err(HalError::NotSupported);
        };
        if !mmap.mapped || mmap.started {
            return Ok(false);
        }
        let Some(pcm) = self.pcm.as_mut() else {
            return Ok(false);
        };
        let address = pcm.address();
        pcm.prepare()
            .and_then(|()| pcm.start())
            .map_err(|e| HalError::device_unavailable(address, e))?;
        self.mmap = Some(MmapState {
            started: true,
            ..mmap
        });
        Ok(true)
    }

    /// Halts a started mapping. Returns whether it was started.
    pub fn stop_mapped(&mut self) -> Result<bool, HalError> {
        let Some(mmap) = self.mmap else {
            return Err(HalError::NotSupported);
        };
        if !mmap.started {
            return Ok(false);
        }
        if let Some(pcm) = self.pcm.as_mut() {
            if let Err(e) = pcm.stop() {
                tracing::warn!(error = %e, "failed to stop mmap pcm");
            }
        }
        self.mmap = Some(MmapState {
            started: false,
            ..mmap
        });
        Ok(true)
    }

    /// Drops the mapping and returns to standby.
    pub fn unmap(&mut self) {
        self.close_pcm();
        self.state = StreamState::Standby;
        if self.mmap.is_some() {
            self.mmap = Some(MmapState::default());
        }
    }
}
