//! Playback endpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{
    Direction, Endpoint, MmapBufferInfo, StreamCore, StreamLock, StreamPosition, StreamState,
};
use crate::aggregate::{DeviceAggregate, DeviceState};
use crate::config::{HalConfig, PcmConfig};
use crate::device::{AudioDevices, OutputFlags, StreamRequest};
use crate::event::HalEvent;
use crate::format::AudioFormat;
use crate::params::{Parameters, ROUTING};
use crate::pcm::{MmapPosition, PcmAddress, PcmDirection, PcmMode};
use crate::{HalError, PcmError};

/// Picks the PCM profile for a new playback stream.
fn select_profile(config: &HalConfig, devices: AudioDevices, flags: OutputFlags) -> PcmConfig {
    if devices.intersects(AudioDevices::OUT_AUX_DIGITAL) {
        PcmConfig::hdmi()
    } else if flags.contains(OutputFlags::DEEP_BUFFER) {
        PcmConfig::deep_buffer()
    } else if flags.contains(OutputFlags::MMAP_NOIRQ) {
        PcmConfig::mmap_playback()
    } else {
        config.low_latency_config()
    }
}

/// A playback endpoint.
///
/// Created by [`AudioHw::open_output_stream`](crate::AudioHw::open_output_stream).
/// The first [`write`](Self::write) opens the device; [`Endpoint::standby`]
/// closes it again. Writes never fail on hardware errors: the buffer is
/// consumed, the stream drops to standby and the call sleeps for the
/// buffer's duration so the caller keeps its pacing.
///
/// All methods take `&self`; share the stream behind an `Arc` to drive it
/// from a data thread and a control thread at once.
pub struct OutputStream {
    dev: Arc<DeviceAggregate>,
    core: StreamLock<StreamCore>,
    flags: OutputFlags,
    muted: AtomicBool,
    primary: bool,
}

impl OutputStream {
    pub(crate) fn open(
        dev: Arc<DeviceAggregate>,
        devices: AudioDevices,
        flags: OutputFlags,
        request: &StreamRequest,
    ) -> Result<Self, HalError> {
        let devices = if devices.is_empty() {
            AudioDevices::OUT_SPEAKER
        } else {
            devices
        };
        let config = select_profile(dev.config(), devices, flags);
        let primary = flags.contains(OutputFlags::PRIMARY);

        if primary {
            let mut state = dev.lock();
            if state.primary_output_open {
                tracing::warn!("primary output already open");
                return Err(HalError::PrimaryOutputExists);
            }
            state.primary_output_open = true;
        }

        if request.sample_rate != config.rate || request.format != config.format {
            tracing::debug!(
                requested_rate = request.sample_rate,
                requested_format = ?request.format,
                rate = config.rate,
                "output request overridden by profile"
            );
        }
        tracing::info!(
            ?devices,
            flags = flags.bits(),
            rate = config.rate,
            period_size = config.period_size,
            period_count = config.period_count,
            "output stream opened"
        );

        Ok(Self {
            dev,
            core: StreamLock::new(StreamCore::new(
                config,
                devices,
                flags.contains(OutputFlags::MMAP_NOIRQ),
            )),
            flags,
            muted: AtomicBool::new(false),
            primary,
        })
    }

    /// Flags the stream was opened with.
    #[must_use]
    pub fn flags(&self) -> OutputFlags {
        self.flags
    }

    /// Sample rate of the selected profile.
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.core.lock().config.rate
    }

    /// Interleaved channel count.
    #[must_use]
    pub fn channels(&self) -> u32 {
        self.core.lock().config.channels
    }

    /// Sample encoding the stream expects.
    #[must_use]
    pub fn format(&self) -> AudioFormat {
        self.core.lock().config.format
    }

    /// Worst-case hardware latency.
    #[must_use]
    pub fn latency_ms(&self) -> u32 {
        self.core.lock().config.latency_ms()
    }

    /// Frames accepted by [`write`](Self::write) over the stream's lifetime.
    #[must_use]
    pub fn frames_written(&self) -> u64 {
        self.core.lock().frames
    }

    /// Returns `true` if [`set_volume`](Self::set_volume) muted the stream.
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    /// Sets the stream volume. Only digital-link streams support it, and
    /// only as mute (`left == 0.0`) or unmute.
    ///
    /// # Errors
    ///
    /// [`HalError::NotSupported`] for streams not routed to `OUT_AUX_DIGITAL`.
    #[allow(clippy::float_cmp)]
    pub fn set_volume(&self, left: f32, _right: f32) -> Result<(), HalError> {
        let devices = self.core.lock().devices;
        if !devices.intersects(AudioDevices::OUT_AUX_DIGITAL) {
            return Err(HalError::NotSupported);
        }
        self.muted.store(left == 0.0, Ordering::Release);
        Ok(())
    }

    /// Plays `buffer`, opening the device first if the stream is in standby.
    ///
    /// Returns `buffer.len()` unless the stream is in MMAP mode. While
    /// hands-free is enabled the buffer is dropped.
    ///
    /// # Errors
    ///
    /// [`HalError::NotSupported`] for MMAP streams.
    pub fn write(&self, buffer: &[u8]) -> Result<usize, HalError> {
        let bytes = buffer.len();
        if self.dev.hands_free_enabled() {
            tracing::trace!(bytes, "hands-free active, skipping output");
            return Ok(bytes);
        }

        let mut core = self.core.lock();
        if core.is_mmap() {
            return Err(HalError::NotSupported);
        }

        if core.state == StreamState::Standby {
            // Device lock comes first; re-take the stream lock behind it.
            drop(core);
            let mut state = self.dev.lock();
            core = self.core.lock();

            if state.hands_free_enabled {
                return Ok(bytes);
            }
            if core.state == StreamState::Standby {
                if let Err(e) = self.start_output(&mut state, &mut core) {
                    drop(state);
                    core.count_frames(bytes);
                    let backoff = core.duration_of(bytes);
                    drop(core);

                    tracing::warn!(error = %e, "failed to start output stream");
                    self.dev.emit(HalEvent::StreamStartFailed {
                        direction: Direction::Output,
                        error: e.to_string(),
                    });
                    std::thread::sleep(backoff);
                    return Ok(bytes);
                }
            }
        }

        let silence;
        let data = if self.is_muted() || self.dev.master_muted() {
            silence = vec![0u8; bytes];
            &silence[..]
        } else {
            buffer
        };

        tracing::trace!(bytes, "writing to pcm");
        let result = match core.pcm.as_mut() {
            Some(pcm) => pcm.write(data),
            None => Err(PcmError::BadState),
        };
        core.count_frames(bytes);

        if let Err(e) = result {
            let backoff = core.duration_of(bytes);
            drop(core);

            tracing::warn!(error = %e, "output write failed, entering standby");
            self.dev.emit(HalEvent::StreamError {
                direction: Direction::Output,
                error: e.to_string(),
            });
            self.standby();
            std::thread::sleep(backoff);
        }
        Ok(bytes)
    }

    /// Frames that have reached the speaker, with the hardware timestamp.
    ///
    /// # Errors
    ///
    /// [`HalError::InvalidState`] when no device is open or the estimate would
    /// be negative, or the PCM error.
    pub fn presentation_position(&self) -> Result<StreamPosition, HalError> {
        let core = self.core.lock();
        let pcm = core
            .pcm
            .as_ref()
            .ok_or_else(|| HalError::invalid_state("output stream not active"))?;
        let timestamp = pcm.htimestamp()?;
        let kernel_buffer = u64::from(core.config.buffer_frames());
        let frames = (core.frames + u64::from(timestamp.avail))
            .checked_sub(kernel_buffer)
            .ok_or_else(|| HalError::invalid_state("presentation position not yet known"))?;
        Ok(StreamPosition {
            frames,
            timestamp: timestamp.time,
        })
    }

    fn pcm_address(&self, devices: AudioDevices) -> PcmAddress {
        if devices.intersects(AudioDevices::OUT_AUX_DIGITAL) {
            self.dev.config().hdmi_pcm()
        } else {
            self.dev.config().primary_pcm()
        }
    }

    fn contribute(&self, state: &mut DeviceState, devices: AudioDevices) {
        state.active_output_devices |= devices;
        self.dev.select_devices(state);
    }

    /// Opens and prepares the device. Undoes the routing contribution on failure.
    fn start_output(&self, state: &mut DeviceState, core: &mut StreamCore) -> Result<(), HalError> {
        tracing::debug!(devices = ?core.devices, "starting output stream");
        self.contribute(state, core.devices);
        core.close_pcm();

        let address = self.pcm_address(core.devices);
        let opened = self
            .dev
            .backend()
            .open(address, PcmDirection::Playback, PcmMode::Blocking, &core.config)
            .and_then(|mut pcm| {
                pcm.prepare()?;
                Ok(pcm)
            });

        match opened {
            Ok(pcm) => {
                core.pcm = Some(pcm);
                core.state = StreamState::Active;
                state.output_streaming = true;
                Ok(())
            }
            Err(e) => {
                self.stop_output(state, core.devices);
                Err(HalError::device_unavailable(address, e))
            }
        }
    }

    /// Withdraws this stream from routing and hands the voice path back to
    /// the bridge if hands-free is enabled.
    fn stop_output(&self, state: &mut DeviceState, devices: AudioDevices) {
        state.output_streaming = false;
        state.active_output_devices.remove(devices);
        self.dev.select_devices(state);
        if state.hands_free_enabled {
            self.dev.start_bridge(state);
        }
    }

    fn standby_locked(&self, state: &mut DeviceState, core: &mut StreamCore) {
        if core.state != StreamState::Active {
            return;
        }
        let held_route = core.holds_route();
        if core.is_mmap() {
            core.unmap();
        } else {
            core.close_pcm();
            core.state = StreamState::Standby;
        }
        if held_route {
            self.stop_output(state, core.devices);
        }
        tracing::debug!(held_route, "output stream in standby");
    }
}

impl Endpoint for OutputStream {
    fn direction(&self) -> Direction {
        Direction::Output
    }

    fn state(&self) -> StreamState {
        self.core.lock().state
    }

    fn config(&self) -> PcmConfig {
        self.core.lock().config
    }

    fn buffer_size(&self) -> usize {
        self.core.lock().config.period_bytes()
    }

    fn devices(&self) -> AudioDevices {
        self.core.lock().devices
    }

    fn standby(&self) {
        let mut state = self.dev.lock();
        let mut core = self.core.lock();
        self.standby_locked(&mut state, &mut core);
    }

    fn set_parameters(&self, kv_pairs: &str) -> Result<(), HalError> {
        let params = Parameters::parse(kv_pairs);
        let Some(mut value) = params.get_u32(ROUTING)? else {
            return Ok(());
        };

        let mut state = self.dev.lock();
        let mut core = self.core.lock();
        if core.devices == AudioDevices::OUT_AUX_DIGITAL && value == 0 {
            value = AudioDevices::OUT_SPEAKER.bits();
        }

        let devices = AudioDevices::from_bits(value);
        if !devices.is_empty() {
            tracing::debug!(from = ?core.devices, to = ?devices, "output routing changed");
            let previous = std::mem::replace(&mut core.devices, devices);
            if core.holds_route() {
                state.active_output_devices.remove(previous);
                state.active_output_devices |= devices;
                self.dev.select_devices(&mut state);
            }
        }
        Ok(())
    }

    fn create_mmap_buffer(&self, min_size_frames: u32) -> Result<MmapBufferInfo, HalError> {
        let mut core = self.core.lock();
        let address = self.pcm_address(core.devices);
        core.map_buffer(
            self.dev.backend(),
            address,
            PcmDirection::Playback,
            min_size_frames,
        )
    }

    fn start(&self) -> Result<(), HalError> {
        let mut state = self.dev.lock();
        let mut core = self.core.lock();
        match core.mmap {
            None => return Err(HalError::NotSupported),
            Some(mmap) if !mmap.mapped || mmap.started => return Ok(()),
            Some(_) => {}
        }
        if state.hands_free_enabled {
            tracing::debug!("hands-free active, mmap output not started");
            return Ok(());
        }

        self.contribute(&mut state, core.devices);
        match core.start_mapped() {
            Ok(_) => {
                state.output_streaming = true;
                tracing::debug!("mmap output started");
                Ok(())
            }
            Err(e) => {
                self.stop_output(&mut state, core.devices);
                Err(e)
            }
        }
    }

    fn stop(&self) -> Result<(), HalError> {
        let mut state = self.dev.lock();
        let mut core = self.core.lock();
        if core.stop_mapped()? {
            self.stop_output(&mut state, core.devices);
            tracing::debug!("mmap output stopped");
        }
        Ok(())
    }

    fn mmap_position(&self) -> Result<MmapPosition, HalError> {
        self.core.lock().mmap_position()
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        let mut state = self.dev.lock();
        let mut core = self.core.lock();
        self.standby_locked(&mut state, &mut core);
        if self.primary {
            state.primary_output_open = false;
        }
        tracing::info!("output stream closed");
    }
}
