//! Host-facing audio device.

use std::sync::Arc;

use crate::aggregate::DeviceAggregate;
use crate::bridge::BridgeStats;
use crate::builder::AudioHwBuilder;
use crate::device::{AudioDevices, InputFlags, InputSource, OutputFlags, StreamRequest};
use crate::params::{format_reply, Parameters, HFP_ENABLE, HFP_SET_SAMPLING_RATE};
use crate::patch::{AudioPort, PatchHandle};
use crate::stream::{input_buffer_size, InputStream, OutputStream};
use crate::HalError;

/// Sample rates the hands-free link runs at.
const HFP_SAMPLE_RATES: [u32; 2] = [8000, 16000];

/// An opened audio device.
///
/// Owns the device state every endpoint shares: active devices, input source,
/// current route, hands-free bridge, volumes and mutes. Endpoints keep that
/// state alive on their own, so they may outlive the `AudioHw` they came from.
///
/// Dropping the device stops the hands-free bridge.
///
/// # Example
///
/// ```
/// use audio_hal::{AudioDevices, AudioHw, MockPcmBackend, OutputFlags, StreamRequest};
///
/// let hw = AudioHw::builder()
///     .backend(MockPcmBackend::new())
///     .open()
///     .unwrap();
///
/// let out = hw
///     .open_output_stream(AudioDevices::OUT_SPEAKER, OutputFlags::PRIMARY, &StreamRequest::default())
///     .unwrap();
/// assert_eq!(out.write(&[0u8; 960]).unwrap(), 960);
/// ```
pub struct AudioHw {
    dev: Arc<DeviceAggregate>,
}

impl AudioHw {
    /// Creates a builder.
    pub fn builder() -> AudioHwBuilder {
        AudioHwBuilder::new()
    }

    pub(crate) fn new(dev: Arc<DeviceAggregate>) -> Self {
        Self { dev }
    }

    /// Opens a playback stream in standby.
    ///
    /// The profile is chosen from `devices` and `flags`; `request` is only
    /// advisory for playback.
    ///
    /// # Errors
    ///
    /// [`HalError::PrimaryOutputExists`] if `flags` has `PRIMARY` and a
    /// primary output is already open.
    pub fn open_output_stream(
        &self,
        devices: AudioDevices,
        flags: OutputFlags,
        request: &StreamRequest,
    ) -> Result<OutputStream, HalError> {
        OutputStream::open(Arc::clone(&self.dev), devices, flags, request)
    }

    /// Closes a playback stream. Same as dropping it.
    pub fn close_output_stream(&self, stream: OutputStream) {
        drop(stream);
    }

    /// Opens a capture stream in standby.
    ///
    /// # Errors
    ///
    /// One of the `Unsupported*` variants if the format, channel count or
    /// sample rate can't be captured.
    pub fn open_input_stream(
        &self,
        devices: AudioDevices,
        flags: InputFlags,
        request: &StreamRequest,
        source: InputSource,
    ) -> Result<InputStream, HalError> {
        InputStream::open(Arc::clone(&self.dev), devices, flags, request, source)
    }

    /// Closes a capture stream. Same as dropping it.
    pub fn close_input_stream(&self, stream: InputStream) {
        drop(stream);
    }

    /// Capture buffer size for `request`, or 0 if it can't be captured.
    ///
    /// Assumes the regular (not low-latency) capture period.
    #[must_use]
    pub fn input_buffer_size(&self, request: &StreamRequest) -> usize {
        input_buffer_size(request, None)
    }

    /// Applies device-wide parameters.
    ///
    /// - `hfp_set_sampling_rate=<hz>`: bridge rate for the next start (8000 or 16000)
    /// - `hfp_enable=true`: enables hands-free and starts the bridge unless an
    ///   output is streaming; any other value disables it and stops the bridge
    ///
    /// # Errors
    ///
    /// [`HalError::InvalidParameter`] for a sampling rate that isn't a
    /// supported number.
    pub fn set_parameters(&self, kv_pairs: &str) -> Result<(), HalError> {
        tracing::debug!(kv_pairs, "set parameters");
        let params = Parameters::parse(kv_pairs);
        let mut state = self.dev.lock();

        if let Some(rate) = params.get_u32(HFP_SET_SAMPLING_RATE)? {
            if !HFP_SAMPLE_RATES.contains(&rate) {
                return Err(HalError::invalid_parameter(
                    HFP_SET_SAMPLING_RATE,
                    rate.to_string(),
                ));
            }
            state.hfp_config.rate = rate;
        }

        if let Some(enable) = params.get_bool(HFP_ENABLE) {
            self.dev.set_hands_free(&mut state, enable);
            if enable {
                if state.output_streaming {
                    tracing::debug!("output streaming, bridge deferred until standby");
                } else {
                    self.dev.start_bridge(&mut state);
                }
            } else {
                self.dev.stop_bridge(&mut state);
            }
        }
        Ok(())
    }

    /// Answers `keys` (`;`-separated) with their current values.
    ///
    /// Only `hfp_enable` and `hfp_set_sampling_rate` are known; other keys
    /// are left out of the reply.
    #[must_use]
    pub fn get_parameters(&self, keys: &str) -> String {
        let query = Parameters::parse(keys);
        let state = self.dev.lock();
        format_reply(query.keys().filter_map(|key| match key {
            HFP_ENABLE => Some((HFP_ENABLE, state.hands_free_enabled.to_string())),
            HFP_SET_SAMPLING_RATE => Some((HFP_SET_SAMPLING_RATE, state.hfp_config.rate.to_string())),
            _ => None,
        }))
    }

    /// Stores the voice call volume.
    ///
    /// # Errors
    ///
    /// [`HalError::InvalidParameter`] outside `0.0..=1.0`.
    pub fn set_voice_volume(&self, volume: f32) -> Result<(), HalError> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(HalError::invalid_parameter("voice_volume", volume.to_string()));
        }
        self.dev.lock().voice_volume = volume;
        Ok(())
    }

    /// Voice call volume.
    #[must_use]
    pub fn voice_volume(&self) -> f32 {
        self.dev.lock().voice_volume
    }

    /// Stores the master volume. It is reported back but not applied.
    ///
    /// # Errors
    ///
    /// [`HalError::InvalidParameter`] outside `0.0..=1.0`.
    pub fn set_master_volume(&self, volume: f32) -> Result<(), HalError> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(HalError::invalid_parameter("master_volume", volume.to_string()));
        }
        self.dev.lock().master_volume = volume;
        Ok(())
    }

    /// Master volume.
    #[must_use]
    pub fn master_volume(&self) -> f32 {
        self.dev.lock().master_volume
    }

    /// Mutes capture streams and the bridge uplink.
    pub fn set_mic_mute(&self, muted: bool) {
        let mut state = self.dev.lock();
        self.dev.set_mic_muted(&mut state, muted);
        tracing::debug!(muted, "mic mute");
    }

    /// Returns `true` if the microphone is muted.
    #[must_use]
    pub fn mic_mute(&self) -> bool {
        self.dev.mic_muted()
    }

    /// Makes every playback stream write silence.
    pub fn set_master_mute(&self, muted: bool) {
        let mut state = self.dev.lock();
        self.dev.set_master_muted(&mut state, muted);
        tracing::debug!(muted, "master mute");
    }

    /// Returns `true` if playback is master-muted.
    #[must_use]
    pub fn master_mute(&self) -> bool {
        self.dev.master_muted()
    }

    /// Records a source → sink connection.
    ///
    /// # Errors
    ///
    /// [`HalError::EmptyPatch`] if either side is empty.
    pub fn create_audio_patch(
        &self,
        sources: &[AudioPort],
        sinks: &[AudioPort],
    ) -> Result<PatchHandle, HalError> {
        let handle = self.dev.lock().patches.create(sources, sinks)?;
        tracing::debug!(%handle, sources = sources.len(), sinks = sinks.len(), "audio patch created");
        Ok(handle)
    }

    /// Forgets a patch.
    ///
    /// # Errors
    ///
    /// [`HalError::UnknownPatch`] if `handle` isn't live.
    pub fn release_audio_patch(&self, handle: PatchHandle) -> Result<(), HalError> {
        self.dev.lock().patches.release(handle)?;
        tracing::debug!(%handle, "audio patch released");
        Ok(())
    }

    /// Number of live patches.
    #[must_use]
    pub fn audio_patch_count(&self) -> usize {
        self.dev.lock().patches.len()
    }

    /// Fingerprint of the route last applied to the mixer (0 before any).
    #[must_use]
    pub fn route_id(&self) -> u32 {
        self.dev.lock().router.current_route_id()
    }

    /// Union of the devices active playback streams contribute.
    #[must_use]
    pub fn active_output_devices(&self) -> AudioDevices {
        self.dev.lock().active_output_devices
    }

    /// Input source the active capture stream set.
    #[must_use]
    pub fn active_input_source(&self) -> InputSource {
        self.dev.lock().active_input_source
    }

    /// Returns `true` while hands-free is enabled.
    #[must_use]
    pub fn hands_free_enabled(&self) -> bool {
        self.dev.hands_free_enabled()
    }

    /// Returns `true` if a playback stream holds the output path.
    #[must_use]
    pub fn output_streaming(&self) -> bool {
        self.dev.lock().output_streaming
    }

    /// Returns `true` while the relay threads are alive.
    #[must_use]
    pub fn bridge_running(&self) -> bool {
        self.dev.lock().bridge.is_running()
    }

    /// Counters of the running bridge, or of the last one.
    #[must_use]
    pub fn bridge_stats(&self) -> BridgeStats {
        self.dev.lock().bridge.stats()
    }
}

impl Drop for AudioHw {
    fn drop(&mut self) {
        let mut state = self.dev.lock();
        self.dev.stop_bridge(&mut state);
        tracing::info!("audio device closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::AudioFormat;
    use crate::pcm::MockPcmBackend;
    use crate::RecordingMixer;

    fn hw() -> (AudioHw, MockPcmBackend) {
        let backend = MockPcmBackend::new();
        let hw = AudioHw::builder()
            .backend(backend.clone())
            .mixer(RecordingMixer::new())
            .open()
            .unwrap();
        (hw, backend)
    }

    #[test]
    fn test_hfp_sampling_rate() {
        let (hw, _) = hw();
        hw.set_parameters("hfp_set_sampling_rate=8000").unwrap();
        assert_eq!(hw.get_parameters("hfp_set_sampling_rate"), "hfp_set_sampling_rate=8000");
        assert!(matches!(
            hw.set_parameters("hfp_set_sampling_rate=44100"),
            Err(HalError::InvalidParameter { .. })
        ));
        assert!(hw.set_parameters("hfp_set_sampling_rate=fast").is_err());
    }

    #[test]
    fn test_get_parameters_omits_unknown_keys() {
        let (hw, _) = hw();
        assert_eq!(
            hw.get_parameters("hfp_enable;bogus"),
            "hfp_enable=false"
        );
        assert_eq!(hw.get_parameters(""), "");
    }

    #[test]
    fn test_hands_free_toggle() {
        let (hw, backend) = hw();
        hw.set_parameters("hfp_enable=true").unwrap();
        assert!(hw.hands_free_enabled());
        assert!(hw.bridge_running());

        hw.set_parameters("hfp_enable=false").unwrap();
        assert!(!hw.hands_free_enabled());
        assert!(!hw.bridge_running());
        assert_eq!(backend.live_handles(), 0);
    }

    #[test]
    fn test_volumes_and_mutes() {
        let (hw, _) = hw();
        hw.set_voice_volume(0.5).unwrap();
        assert!((hw.voice_volume() - 0.5).abs() < f32::EPSILON);
        assert!(hw.set_voice_volume(1.5).is_err());
        hw.set_master_volume(0.25).unwrap();
        assert!((hw.master_volume() - 0.25).abs() < f32::EPSILON);

        hw.set_mic_mute(true);
        assert!(hw.mic_mute());
        hw.set_master_mute(true);
        assert!(hw.master_mute());
    }

    #[test]
    fn test_patches() {
        let (hw, _) = hw();
        let sources = [AudioPort::Device(AudioDevices::IN_BUILTIN_MIC)];
        let sinks = [AudioPort::Mix(3)];
        let first = hw.create_audio_patch(&sources, &sinks).unwrap();
        let second = hw.create_audio_patch(&sources, &sinks).unwrap();
        assert_eq!(second.get(), first.get() + 1);
        assert_eq!(hw.audio_patch_count(), 2);

        hw.release_audio_patch(first).unwrap();
        assert!(matches!(
            hw.release_audio_patch(first),
            Err(HalError::UnknownPatch { .. })
        ));
        assert!(matches!(
            hw.create_audio_patch(&[], &sinks),
            Err(HalError::EmptyPatch)
        ));
    }

    #[test]
    fn test_input_buffer_size_ignores_low_latency() {
        let (hw, _) = hw();
        assert_eq!(hw.input_buffer_size(&StreamRequest::default()), 3840);
        assert_eq!(
            hw.input_buffer_size(&StreamRequest::new(48000, 4, AudioFormat::Pcm16Bit)),
            0
        );
    }

    #[test]
    fn test_streams_outlive_device() {
        let (hw, backend) = hw();
        let out = hw
            .open_output_stream(
                AudioDevices::OUT_SPEAKER,
                OutputFlags::NONE,
                &StreamRequest::default(),
            )
            .unwrap();
        drop(hw);
        assert_eq!(out.write(&[0u8; 96]).unwrap(), 96);
        drop(out);
        assert_eq!(backend.live_handles(), 0);
    }
}
