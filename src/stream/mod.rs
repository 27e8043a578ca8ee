//! Playback and capture endpoints.
//!
//! Both kinds share one state machine:
//!
//! ```text
//!            first write/read
//!  Standby ───────────────────► Active
//!     ▲                           │
//!     └── standby() / I/O error ──┘
//! ```
//!
//! Activation contributes the endpoint's devices to the device state, re-runs
//! routing and opens the PCM. Standby undoes all three. Endpoints opened with
//! the `MMAP_NOIRQ` flag replace read/write with `create_mmap_buffer`, `start`,
//! `stop` and `mmap_position`.

mod input;
mod mmap;
mod output;

use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::config::PcmConfig;
use crate::device::AudioDevices;
use crate::format::buffer_duration;
use crate::pcm::{MmapPosition, Pcm};
use crate::HalError;

pub use input::InputStream;
pub(crate) use input::{check_input_parameters, input_buffer_size};
pub use mmap::{tune_period_count, MmapBufferInfo};
pub(crate) use mmap::MmapState;
pub use output::OutputStream;

/// Which way an endpoint moves audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Playback.
    Output,
    /// Capture.
    Input,
}

/// Lifecycle state of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    /// No PCM open, no routing contribution.
    #[default]
    Standby,
    /// PCM open (or mapped, for MMAP endpoints).
    Active,
}

/// Frame count paired with the hardware timestamp it was sampled at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamPosition {
    /// Frames presented (playback) or captured (capture).
    pub frames: u64,
    /// Monotonic time of the sample.
    pub timestamp: Duration,
}

/// Operations common to playback and capture endpoints.
pub trait Endpoint: Send + Sync {
    /// Playback or capture.
    fn direction(&self) -> Direction;

    /// Current lifecycle state.
    fn state(&self) -> StreamState;

    /// PCM parameters the endpoint opens its device with.
    fn config(&self) -> PcmConfig;

    /// Bytes the host should move per read/write call.
    fn buffer_size(&self) -> usize;

    /// Devices this endpoint targets.
    fn devices(&self) -> AudioDevices;

    /// Closes the PCM and withdraws the endpoint from routing. No-op in standby.
    fn standby(&self);

    /// Applies `key=value;…` parameters.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::InvalidParameter`] for values that aren't numbers.
    fn set_parameters(&self, kv_pairs: &str) -> Result<(), HalError>;

    /// Maps a shared ring of at least `min_size_frames` frames.
    ///
    /// # Errors
    ///
    /// [`HalError::NotSupported`] unless opened for MMAP,
    /// [`HalError::InvalidState`] unless in standby, or the PCM open error.
    fn create_mmap_buffer(&self, min_size_frames: u32) -> Result<MmapBufferInfo, HalError>;

    /// Starts a mapped endpoint. Idempotent.
    ///
    /// # Errors
    ///
    /// [`HalError::NotSupported`] unless opened for MMAP, or the hardware error.
    fn start(&self) -> Result<(), HalError>;

    /// Stops a started endpoint. Idempotent.
    ///
    /// # Errors
    ///
    /// [`HalError::NotSupported`] unless opened for MMAP.
    fn stop(&self) -> Result<(), HalError>;

    /// Hardware pointer of a mapped endpoint.
    ///
    /// # Errors
    ///
    /// [`HalError::NotSupported`] unless opened for MMAP,
    /// [`HalError::InvalidState`] before the buffer is mapped.
    fn mmap_position(&self) -> Result<MmapPosition, HalError>;
}

/// Two-mutex stream lock.
///
/// Every acquisition passes through `pre` before taking `inner`, then lets
/// `pre` go. A data-path thread that releases and immediately re-locks has to
/// queue behind a control thread already waiting on `pre`.
pub(crate) struct StreamLock<T> {
    pre: Mutex<()>,
    inner: Mutex<T>,
}

impl<T> StreamLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            pre: Mutex::new(()),
            inner: Mutex::new(value),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        let _pre = self.pre.lock();
        self.inner.lock()
    }
}

/// State shared by both endpoint kinds, guarded by the stream lock.
pub(crate) struct StreamCore {
    pub state: StreamState,
    pub pcm: Option<Box<dyn Pcm>>,
    pub config: PcmConfig,
    pub devices: AudioDevices,
    /// `Some` for endpoints opened in MMAP mode.
    pub mmap: Option<MmapState>,
    /// Frames written or read; never reset.
    pub frames: u64,
}

impl StreamCore {
    pub fn new(config: PcmConfig, devices: AudioDevices, mmap: bool) -> Self {
        Self {
            state: StreamState::Standby,
            pcm: None,
            config,
            devices,
            mmap: mmap.then(MmapState::default),
            frames: 0,
        }
    }

    pub fn is_mmap(&self) -> bool {
        self.mmap.is_some()
    }

    /// Routing was contributed: always for Active standard endpoints, only
    /// after `start` for MMAP ones.
    pub fn holds_route(&self) -> bool {
        self.state == StreamState::Active && self.mmap.map_or(true, |mmap| mmap.started)
    }

    pub fn close_pcm(&mut self) {
        if let Some(pcm) = self.pcm.take() {
            tracing::trace!(address = %pcm.address(), "closing pcm");
        }
    }

    pub fn frame_size(&self) -> usize {
        self.config.frame_size()
    }

    /// Wall time `bytes` take to play or record.
    pub fn duration_of(&self, bytes: usize) -> Duration {
        buffer_duration(bytes, self.frame_size(), self.config.rate)
    }

    pub fn count_frames(&mut self, bytes: usize) {
        let frame_size = self.frame_size().max(1);
        self.frames += (bytes / frame_size) as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_stream_lock_serialises() {
        let lock = Arc::new(StreamLock::new(0u32));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*lock.lock(), 4000);
    }

    #[test]
    fn test_stream_lock_admits_control_between_relocks() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let lock = Arc::new(StreamLock::new(false));
        let iterations = Arc::new(AtomicU32::new(0));
        let writer = {
            let lock = Arc::clone(&lock);
            let iterations = Arc::clone(&iterations);
            std::thread::spawn(move || loop {
                let standby = lock.lock();
                if *standby {
                    break;
                }
                // A blocking period write under the stream lock
                std::thread::sleep(Duration::from_millis(2));
                iterations.fetch_add(1, Ordering::AcqRel);
            })
        };

        while iterations.load(Ordering::Acquire) < 2 {
            std::thread::yield_now();
        }
        let before = iterations.load(Ordering::Acquire);
        *lock.lock() = true;
        let after = iterations.load(Ordering::Acquire);
        writer.join().unwrap();

        assert!(after - before <= 2, "control waited {} writer periods", after - before);
    }

    #[test]
    fn test_core_frame_counting() {
        let mut core = StreamCore::new(PcmConfig::low_latency(), AudioDevices::OUT_SPEAKER, false);
        core.count_frames(960);
        core.count_frames(2);
        assert_eq!(core.frames, 240);
        assert_eq!(core.duration_of(960), Duration::from_millis(5));
    }

    #[test]
    fn test_holds_route() {
        let mut core = StreamCore::new(PcmConfig::mmap_playback(), AudioDevices::OUT_SPEAKER, true);
        assert!(!core.holds_route());
        core.state = StreamState::Active;
        assert!(!core.holds_route());
        core.mmap = Some(MmapState {
            mapped: true,
            started: true,
        });
        assert!(core.holds_route());

        let mut plain = StreamCore::new(PcmConfig::low_latency(), AudioDevices::OUT_SPEAKER, false);
        plain.state = StreamState::Active;
        assert!(plain.holds_route());
    }
}
