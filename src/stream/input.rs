//! Capture endpoint.

use std::sync::Arc;

use super::{
    Direction, Endpoint, MmapBufferInfo, StreamCore, StreamLock, StreamPosition, StreamState,
};
use crate::aggregate::{DeviceAggregate, DeviceState};
use crate::config::{PcmConfig, CAPTURE_PERIOD_MS, LOW_LATENCY_CAPTURE_SAMPLE_RATE};
use crate::device::{AudioDevices, InputFlags, InputSource, StreamRequest};
use crate::event::HalEvent;
use crate::format::{silence, AudioFormat};
use crate::params::{Parameters, INPUT_SOURCE, ROUTING};
use crate::pcm::{MmapPosition, PcmDirection, PcmMode};
use crate::{HalError, PcmError};

const SUPPORTED_CAPTURE_RATES: [u32; 8] = [8000, 11025, 12000, 16000, 22050, 32000, 44100, 48000];

/// Rejects capture formats the hardware can't deliver.
pub(crate) fn check_input_parameters(request: &StreamRequest) -> Result<(), HalError> {
    if !matches!(
        request.format,
        AudioFormat::Pcm16Bit | AudioFormat::Pcm8_24Bit
    ) {
        return Err(HalError::UnsupportedFormat {
            format: request.format,
        });
    }
    if !(1..=2).contains(&request.channels) {
        return Err(HalError::UnsupportedChannelCount {
            channels: request.channels,
        });
    }
    if !SUPPORTED_CAPTURE_RATES.contains(&request.sample_rate) {
        return Err(HalError::UnsupportedSampleRate {
            rate: request.sample_rate,
        });
    }
    Ok(())
}

/// Bytes per capture buffer, rounded up to 32. Zero for invalid requests.
pub(crate) fn input_buffer_size(request: &StreamRequest, low_latency_period: Option<u32>) -> usize {
    if check_input_parameters(request).is_err() {
        return 0;
    }
    let frames = low_latency_period.unwrap_or(request.sample_rate * CAPTURE_PERIOD_MS / 1000);
    let size = frames as usize * request.format.frame_size(request.channels);
    (size + 0x1f) & !0x1f
}

struct InputCore {
    core: StreamCore,
    source: InputSource,
}

/// A capture endpoint.
///
/// Created by [`AudioHw::open_input_stream`](crate::AudioHw::open_input_stream).
/// Reads mirror [`OutputStream::write`](crate::OutputStream::write): the first
/// one opens the device, hardware errors drop the stream to standby, and the
/// caller always gets a full buffer back (zeros when nothing could be read or
/// the microphone is muted).
pub struct InputStream {
    dev: Arc<DeviceAggregate>,
    inner: StreamLock<InputCore>,
    flags: InputFlags,
}

impl InputStream {
    pub(crate) fn open(
        dev: Arc<DeviceAggregate>,
        devices: AudioDevices,
        flags: InputFlags,
        request: &StreamRequest,
        source: InputSource,
    ) -> Result<Self, HalError> {
        check_input_parameters(request)?;

        // Capture always runs 16-bit; channels and rate come from the request.
        let request = StreamRequest {
            format: AudioFormat::Pcm16Bit,
            ..*request
        };
        let mmap = flags.contains(InputFlags::MMAP_NOIRQ);
        let config = if mmap {
            PcmConfig::mmap_capture(request.channels).with_rate(request.sample_rate)
        } else {
            let low_latency = (request.sample_rate == LOW_LATENCY_CAPTURE_SAMPLE_RATE
                && flags.contains(InputFlags::FAST))
            .then_some(dev.config().low_latency_capture_period_size);
            let buffer_size = input_buffer_size(&request, low_latency);
            let frame_size = request.format.frame_size(request.channels);
            PcmConfig {
                channels: request.channels,
                rate: request.sample_rate,
                period_size: (buffer_size / frame_size) as u32,
                ..PcmConfig::audio_capture()
            }
        };

        tracing::info!(
            ?devices,
            ?source,
            flags = flags.bits(),
            rate = config.rate,
            channels = config.channels,
            period_size = config.period_size,
            "input stream opened"
        );

        Ok(Self {
            dev,
            inner: StreamLock::new(InputCore {
                core: StreamCore::new(config, devices, mmap),
                source,
            }),
            flags,
        })
    }

    /// Flags the stream was opened with.
    #[must_use]
    pub fn flags(&self) -> InputFlags {
        self.flags
    }

    /// What the stream records for.
    #[must_use]
    pub fn source(&self) -> InputSource {
        self.inner.lock().source
    }

    /// Sample rate.
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.inner.lock().core.config.rate
    }

    /// Interleaved channel count.
    #[must_use]
    pub fn channels(&self) -> u32 {
        self.inner.lock().core.config.channels
    }

    /// Always [`AudioFormat::Pcm16Bit`].
    #[must_use]
    pub fn format(&self) -> AudioFormat {
        self.inner.lock().core.config.format
    }

    /// Frames delivered by [`read`](Self::read), including zero-filled ones.
    #[must_use]
    pub fn frames_read(&self) -> u64 {
        self.inner.lock().core.frames
    }

    /// Fills `buffer` from the device, opening it first if in standby.
    ///
    /// # Errors
    ///
    /// [`HalError::NotSupported`] for MMAP streams.
    pub fn read(&self, buffer: &mut [u8]) -> Result<usize, HalError> {
        let bytes = buffer.len();
        let mut inner = self.inner.lock();
        if inner.core.is_mmap() {
            return Err(HalError::NotSupported);
        }

        if inner.core.state == StreamState::Standby {
            drop(inner);
            let mut state = self.dev.lock();
            inner = self.inner.lock();

            if inner.core.state == StreamState::Standby {
                if let Err(e) = self.start_input(&mut state, &mut inner) {
                    drop(state);
                    inner.core.count_frames(bytes);
                    let backoff = inner.core.duration_of(bytes);
                    drop(inner);

                    tracing::warn!(error = %e, "failed to start input stream");
                    self.dev.emit(HalEvent::StreamStartFailed {
                        direction: Direction::Input,
                        error: e.to_string(),
                    });
                    std::thread::sleep(backoff);
                    silence(buffer);
                    return Ok(bytes);
                }
            }
        }

        tracing::trace!(bytes, "reading from pcm");
        let result = match inner.core.pcm.as_mut() {
            Some(pcm) => pcm.read(buffer),
            None => Err(PcmError::BadState),
        };
        inner.core.count_frames(bytes);

        match result {
            Ok(()) => {
                if self.dev.mic_muted() {
                    silence(buffer);
                }
            }
            Err(e) => {
                let backoff = inner.core.duration_of(bytes);
                drop(inner);

                tracing::warn!(error = %e, "input read failed, entering standby");
                self.dev.emit(HalEvent::StreamError {
                    direction: Direction::Input,
                    error: e.to_string(),
                });
                self.standby();
                std::thread::sleep(backoff);
                silence(buffer);
            }
        }
        Ok(bytes)
    }

    /// Frames captured so far plus those waiting in the hardware buffer.
    ///
    /// # Errors
    ///
    /// [`HalError::InvalidState`] when no device is open, or the PCM error.
    pub fn capture_position(&self) -> Result<StreamPosition, HalError> {
        let inner = self.inner.lock();
        let pcm = inner
            .core
            .pcm
            .as_ref()
            .ok_or_else(|| HalError::invalid_state("input stream not active"))?;
        let timestamp = pcm.htimestamp()?;
        Ok(StreamPosition {
            frames: inner.core.frames + u64::from(timestamp.avail),
            timestamp: timestamp.time,
        })
    }

    fn contribute(&self, state: &mut DeviceState, inner: &InputCore) {
        state.active_input_source = inner.source;
        state.active_input_device = inner.core.devices.strip_input_bit();
        self.dev.select_devices(state);
    }

    fn start_input(&self, state: &mut DeviceState, inner: &mut InputCore) -> Result<(), HalError> {
        tracing::debug!(source = ?inner.source, devices = ?inner.core.devices, "starting input stream");
        self.contribute(state, inner);
        inner.core.close_pcm();

        let address = self.dev.config().primary_pcm();
        let opened = self
            .dev
            .backend()
            .open(
                address,
                PcmDirection::Capture,
                PcmMode::Blocking,
                &inner.core.config,
            )
            .and_then(|mut pcm| {
                pcm.prepare()?;
                Ok(pcm)
            });

        match opened {
            Ok(pcm) => {
                inner.core.pcm = Some(pcm);
                inner.core.state = StreamState::Active;
                Ok(())
            }
            Err(e) => {
                self.stop_input(state);
                Err(HalError::device_unavailable(address, e))
            }
        }
    }

    fn stop_input(&self, state: &mut DeviceState) {
        state.active_input_source = InputSource::Default;
        state.active_input_device = AudioDevices::NONE;
        self.dev.select_devices(state);
    }

    fn standby_locked(&self, state: &mut DeviceState, inner: &mut InputCore) {
        if inner.core.state != StreamState::Active {
            return;
        }
        let held_route = inner.core.holds_route();
        if inner.core.is_mmap() {
            inner.core.unmap();
        } else {
            inner.core.close_pcm();
            inner.core.state = StreamState::Standby;
        }
        if held_route {
            self.stop_input(state);
        }
        tracing::debug!(held_route, "input stream in standby");
    }
}

impl Endpoint for InputStream {
    fn direction(&self) -> Direction {
        Direction::Input
    }

    fn state(&self) -> StreamState {
        self.inner.lock().core.state
    }

    fn config(&self) -> PcmConfig {
        self.inner.lock().core.config
    }

    fn buffer_size(&self) -> usize {
        self.inner.lock().core.config.period_bytes()
    }

    fn devices(&self) -> AudioDevices {
        self.inner.lock().core.devices
    }

    fn standby(&self) {
        let mut state = self.dev.lock();
        let mut inner = self.inner.lock();
        self.standby_locked(&mut state, &mut inner);
    }

    fn set_parameters(&self, kv_pairs: &str) -> Result<(), HalError> {
        let params = Parameters::parse(kv_pairs);
        let source = match params.get_u32(INPUT_SOURCE)? {
            Some(0) | None => None,
            Some(raw) => Some(
                InputSource::from_raw(raw)
                    .ok_or_else(|| HalError::invalid_parameter(INPUT_SOURCE, raw.to_string()))?,
            ),
        };
        let devices = params
            .get_u32(ROUTING)?
            .filter(|&raw| raw != 0)
            .map(AudioDevices::from_bits);

        let mut state = self.dev.lock();
        let mut inner = self.inner.lock();
        let mut apply = false;

        if let Some(source) = source.filter(|&s| s != inner.source) {
            tracing::debug!(from = ?inner.source, to = ?source, "input source changed");
            inner.source = source;
            apply = true;
        }
        if let Some(devices) = devices.filter(|&d| d != inner.core.devices) {
            tracing::debug!(from = ?inner.core.devices, to = ?devices, "input routing changed");
            inner.core.devices = devices;
            apply = true;
        }

        if apply && inner.core.holds_route() {
            self.contribute(&mut state, &inner);
        }
        Ok(())
    }

    fn create_mmap_buffer(&self, min_size_frames: u32) -> Result<MmapBufferInfo, HalError> {
        let mut inner = self.inner.lock();
        let address = self.dev.config().primary_pcm();
        inner.core.map_buffer(
            self.dev.backend(),
            address,
            PcmDirection::Capture,
            min_size_frames,
        )
    }

    fn start(&self) -> Result<(), HalError> {
        let mut state = self.dev.lock();
        let mut inner = self.inner.lock();
        match inner.core.mmap {
            None => return Err(HalError::NotSupported),
            Some(mmap) if !mmap.mapped || mmap.started => return Ok(()),
            Some(_) => {}
        }

        self.contribute(&mut state, &inner);
        match inner.core.start_mapped() {
            Ok(_) => {
                tracing::debug!("mmap input started");
                Ok(())
            }
            Err(e) => {
                self.stop_input(&mut state);
                Err(e)
            }
        }
    }

    fn stop(&self) -> Result<(), HalError> {
        let mut state = self.dev.lock();
        let mut inner = self.inner.lock();
        if inner.core.stop_mapped()? {
            self.stop_input(&mut state);
            tracing::debug!("mmap input stopped");
        }
        Ok(())
    }

    fn mmap_position(&self) -> Result<MmapPosition, HalError> {
        self.inner.lock().core.mmap_position()
    }
}

impl Drop for InputStream {
    fn drop(&mut self) {
        let mut state = self.dev.lock();
        let mut inner = self.inner.lock();
        self.standby_locked(&mut state, &mut inner);
        tracing::info!("input stream closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HalConfig;
    use crate::pcm::MockPcmBackend;
    use crate::route::{RecordingMixer, RouteTable, Router};

    struct Fixture {
        dev: Arc<DeviceAggregate>,
        backend: MockPcmBackend,
        mixer: RecordingMixer,
    }

    fn fixture() -> Fixture {
        let backend = MockPcmBackend::new();
        let mixer = RecordingMixer::new();
        let router = Router::new(RouteTable::standard(), Some(Box::new(mixer.clone())));
        let dev = Arc::new(DeviceAggregate::new(
            HalConfig::default(),
            Arc::new(backend.clone()),
            router,
            None,
            None,
        ));
        Fixture {
            dev,
            backend,
            mixer,
        }
    }

    fn open(fx: &Fixture, flags: InputFlags, request: StreamRequest) -> InputStream {
        InputStream::open(
            Arc::clone(&fx.dev),
            AudioDevices::IN_BUILTIN_MIC,
            flags,
            &request,
            InputSource::Mic,
        )
        .unwrap()
    }

    #[test]
    fn test_check_input_parameters() {
        let ok = StreamRequest::new(44100, 1, AudioFormat::Pcm16Bit);
        assert!(check_input_parameters(&ok).is_ok());
        assert!(check_input_parameters(&StreamRequest::new(48000, 2, AudioFormat::Pcm8_24Bit)).is_ok());
        assert!(matches!(
            check_input_parameters(&StreamRequest::new(24000, 1, AudioFormat::Pcm16Bit)),
            Err(HalError::UnsupportedSampleRate { rate: 24000 })
        ));
        assert!(matches!(
            check_input_parameters(&StreamRequest::new(48000, 3, AudioFormat::Pcm16Bit)),
            Err(HalError::UnsupportedChannelCount { channels: 3 })
        ));
        assert!(matches!(
            check_input_parameters(&StreamRequest::new(48000, 2, AudioFormat::PcmFloat)),
            Err(HalError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_input_buffer_size() {
        // 20ms at 48kHz stereo 16-bit
        assert_eq!(input_buffer_size(&StreamRequest::default(), None), 3840);
        // 11025 * 20 / 1000 = 220 frames, 440 bytes, rounded to 448
        assert_eq!(
            input_buffer_size(&StreamRequest::new(11025, 1, AudioFormat::Pcm16Bit), None),
            448
        );
        assert_eq!(input_buffer_size(&StreamRequest::default(), Some(240)), 960);
        assert_eq!(
            input_buffer_size(&StreamRequest::new(7000, 1, AudioFormat::Pcm16Bit), None),
            0
        );
    }

    #[test]
    fn test_open_forces_16_bit() {
        let fx = fixture();
        let input = open(
            &fx,
            InputFlags::NONE,
            StreamRequest::new(16000, 1, AudioFormat::Pcm8_24Bit),
        );
        assert_eq!(input.format(), AudioFormat::Pcm16Bit);
        assert_eq!(input.sample_rate(), 16000);
        assert_eq!(input.config().period_size, 320);
        assert_eq!(input.buffer_size(), 640);
    }

    #[test]
    fn test_fast_flag_uses_low_latency_period() {
        let fx = fixture();
        let input = open(&fx, InputFlags::FAST, StreamRequest::default());
        assert_eq!(input.config().period_size, 240);
        let slow = open(
            &fx,
            InputFlags::FAST,
            StreamRequest::new(44100, 2, AudioFormat::Pcm16Bit),
        );
        // 882 frames rounds up to 888 once the byte size is aligned to 32
        assert_eq!(slow.config().period_size, 888);
    }

    #[test]
    fn test_read_activates_and_routes() {
        let fx = fixture();
        let address = fx.dev.config().primary_pcm();
        fx.backend.feed_capture(address, &[3u8; 64]);
        let input = open(&fx, InputFlags::NONE, StreamRequest::default());

        let mut buf = [0u8; 64];
        assert_eq!(input.read(&mut buf).unwrap(), 64);
        assert_eq!(buf, [3u8; 64]);
        assert_eq!(input.state(), StreamState::Active);
        assert_eq!(input.frames_read(), 16);
        {
            let state = fx.dev.lock();
            assert_eq!(state.active_input_source, InputSource::Mic);
            assert_eq!(
                state.active_input_device,
                AudioDevices::IN_BUILTIN_MIC.strip_input_bit()
            );
        }
        assert_eq!(fx.mixer.applied_paths(), vec!["media-main-mic".to_string()]);

        input.standby();
        assert_eq!(fx.backend.live_handles(), 0);
        let state = fx.dev.lock();
        assert_eq!(state.active_input_source, InputSource::Default);
        assert!(state.active_input_device.is_empty());
    }

    #[test]
    fn test_mic_mute_zeroes_buffer() {
        let fx = fixture();
        fx.backend
            .feed_capture(fx.dev.config().primary_pcm(), &[9u8; 32]);
        fx.dev.set_mic_muted(&mut fx.dev.lock(), true);
        let input = open(&fx, InputFlags::NONE, StreamRequest::default());

        let mut buf = [1u8; 32];
        input.read(&mut buf).unwrap();
        assert_eq!(buf, [0u8; 32]);
        assert_eq!(input.frames_read(), 8);
    }

    #[test]
    fn test_read_error_zero_fills_and_stands_by() {
        let fx = fixture();
        fx.backend
            .fail_io(fx.dev.config().primary_pcm(), PcmDirection::Capture, 1);
        let input = open(&fx, InputFlags::NONE, StreamRequest::default());

        let mut buf = [5u8; 32];
        assert_eq!(input.read(&mut buf).unwrap(), 32);
        assert_eq!(buf, [0u8; 32]);
        assert_eq!(input.state(), StreamState::Standby);
        assert_eq!(input.frames_read(), 8);
    }

    #[test]
    fn test_open_failure_restores_routing() {
        let fx = fixture();
        fx.backend
            .fail_open(fx.dev.config().primary_pcm(), PcmDirection::Capture);
        let input = open(&fx, InputFlags::NONE, StreamRequest::default());

        let mut buf = [5u8; 16];
        assert_eq!(input.read(&mut buf).unwrap(), 16);
        assert_eq!(buf, [0u8; 16]);
        assert_eq!(input.frames_read(), 4);
        let state = fx.dev.lock();
        assert_eq!(state.active_input_source, InputSource::Default);
        assert!(state.active_input_device.is_empty());
    }

    #[test]
    fn test_set_parameters() {
        let fx = fixture();
        let input = open(&fx, InputFlags::NONE, StreamRequest::default());
        input.read(&mut [0u8; 16]).unwrap();
        fx.mixer.clear();

        // zero values are ignored
        input.set_parameters("input_source=0;routing=0").unwrap();
        assert_eq!(input.source(), InputSource::Mic);
        assert_eq!(input.devices(), AudioDevices::IN_BUILTIN_MIC);
        assert!(fx.mixer.calls().is_empty());

        input.set_parameters("input_source=6").unwrap();
        assert_eq!(input.source(), InputSource::VoiceRecognition);
        assert_eq!(
            fx.dev.lock().active_input_source,
            InputSource::VoiceRecognition
        );
        assert_eq!(
            fx.mixer.applied_paths(),
            vec!["voice-rec-main-mic".to_string()]
        );

        assert!(matches!(
            input.set_parameters("input_source=42"),
            Err(HalError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_set_parameters_in_standby_does_not_route() {
        let fx = fixture();
        let input = open(&fx, InputFlags::NONE, StreamRequest::default());
        input
            .set_parameters(&format!("routing={}", AudioDevices::IN_WIRED_HEADSET.bits()))
            .unwrap();
        assert_eq!(input.devices(), AudioDevices::IN_WIRED_HEADSET);
        assert!(fx.dev.lock().active_input_device.is_empty());
        assert!(fx.mixer.calls().is_empty());
    }

    #[test]
    fn test_capture_position() {
        let fx = fixture();
        let input = open(&fx, InputFlags::NONE, StreamRequest::default());
        assert!(input.capture_position().is_err());

        fx.backend
            .feed_capture(fx.dev.config().primary_pcm(), &[0u8; 64]);
        input.read(&mut [0u8; 32]).unwrap();
        // 32 bytes (8 frames) still queued
        assert_eq!(input.capture_position().unwrap().frames, 16);
    }

    #[test]
    fn test_mmap_capture() {
        let fx = fixture();
        let input = open(
            &fx,
            InputFlags::MMAP_NOIRQ,
            StreamRequest::new(16000, 1, AudioFormat::Pcm16Bit),
        );
        assert_eq!(input.config().rate, 16000);
        assert!(matches!(
            input.read(&mut [0u8; 4]),
            Err(HalError::NotSupported)
        ));

        let info = input.create_mmap_buffer(48).unwrap();
        assert_eq!(info.buffer_size_frames, 48 * 32);
        input.start().unwrap();
        assert_eq!(fx.dev.lock().active_input_source, InputSource::Mic);
        input.stop().unwrap();
        assert_eq!(fx.dev.lock().active_input_source, InputSource::Default);

        drop(input);
        assert_eq!(fx.backend.live_handles(), 0);
    }
}
