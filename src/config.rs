//! Configuration types for PCM devices and the HAL.

use crate::format::AudioFormat;
use crate::pcm::PcmAddress;

/// Rate every playback profile runs at.
pub const DEFAULT_OUTPUT_SAMPLE_RATE: u32 = 48000;

const DEEP_BUFFER_PERIOD_SIZE: u32 = 1920;
const DEEP_BUFFER_PERIOD_COUNT: u32 = 4;
const LOW_LATENCY_PERIOD_SIZE: u32 = 240;
const LOW_LATENCY_PERIOD_COUNT: u32 = 2;
const HDMI_PERIOD_SIZE: u32 = 1024;
const HDMI_PERIOD_COUNT: u32 = 4;

/// Duration of one capture period in milliseconds.
pub const CAPTURE_PERIOD_MS: u32 = 20;
const CAPTURE_PERIOD_COUNT: u32 = 2;

/// Capture rate at which `FAST` input streams switch to low-latency periods.
pub const LOW_LATENCY_CAPTURE_SAMPLE_RATE: u32 = 48000;

const SCO_SAMPLE_RATE: u32 = 16000;
const SCO_PERIOD_SIZE: u32 = 128;
const SCO_PERIOD_COUNT: u32 = 8;

/// One MMAP burst: 1ms at the default output rate.
pub const MMAP_PERIOD_SIZE: u32 = DEFAULT_OUTPUT_SAMPLE_RATE / 1000;
/// Smallest MMAP period count tried when sizing a mapped buffer.
pub const MMAP_PERIOD_COUNT_MIN: u32 = 32;
/// Largest MMAP period count; also the default before tuning.
pub const MMAP_PERIOD_COUNT_MAX: u32 = 512;

/// Hardware parameters for one PCM handle.
///
/// Mirrors what a kernel PCM driver is configured with: interleaved frames of
/// `channels` samples, delivered in `period_count` periods of `period_size`
/// frames each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmConfig {
    /// Interleaved channel count.
    pub channels: u32,
    /// Sample rate in Hz.
    pub rate: u32,
    /// Frames per period.
    pub period_size: u32,
    /// Periods in the hardware buffer.
    pub period_count: u32,
    /// Sample encoding.
    pub format: AudioFormat,
    /// Frames queued before playback starts automatically (0 = driver default).
    pub start_threshold: u32,
    /// Underrun level that stops the device (`u32::MAX` = never).
    pub stop_threshold: u32,
}

impl PcmConfig {
    const fn playback(period_size: u32, period_count: u32) -> Self {
        Self {
            channels: 2,
            rate: DEFAULT_OUTPUT_SAMPLE_RATE,
            period_size,
            period_count,
            format: AudioFormat::Pcm16Bit,
            start_threshold: period_size / 4,
            stop_threshold: u32::MAX,
        }
    }

    /// Large-period playback for non-interactive media.
    #[must_use]
    pub const fn deep_buffer() -> Self {
        Self::playback(DEEP_BUFFER_PERIOD_SIZE, DEEP_BUFFER_PERIOD_COUNT)
    }

    /// Default playback profile with small periods.
    #[must_use]
    pub const fn low_latency() -> Self {
        Self::playback(LOW_LATENCY_PERIOD_SIZE, LOW_LATENCY_PERIOD_COUNT)
    }

    /// Playback over the digital (HDMI/S/PDIF) link.
    #[must_use]
    pub const fn hdmi() -> Self {
        Self::playback(HDMI_PERIOD_SIZE, HDMI_PERIOD_COUNT)
    }

    /// Capture template. `channels`, `rate` and `period_size` are filled in per stream.
    #[must_use]
    pub const fn audio_capture() -> Self {
        Self {
            channels: 2,
            rate: DEFAULT_OUTPUT_SAMPLE_RATE,
            period_size: 0,
            period_count: CAPTURE_PERIOD_COUNT,
            format: AudioFormat::Pcm16Bit,
            start_threshold: 0,
            stop_threshold: u32::MAX,
        }
    }

    /// Hands-free voice link: mono 16 kHz in 128-frame periods.
    #[must_use]
    pub const fn bt_sco() -> Self {
        Self {
            channels: 1,
            rate: SCO_SAMPLE_RATE,
            period_size: SCO_PERIOD_SIZE,
            period_count: SCO_PERIOD_COUNT,
            format: AudioFormat::Pcm16Bit,
            start_threshold: 0,
            stop_threshold: 0,
        }
    }

    /// Memory-mapped playback with 1ms bursts. `period_count` is tuned at map time.
    #[must_use]
    pub const fn mmap_playback() -> Self {
        Self {
            channels: 2,
            rate: DEFAULT_OUTPUT_SAMPLE_RATE,
            period_size: MMAP_PERIOD_SIZE,
            period_count: MMAP_PERIOD_COUNT_MAX,
            format: AudioFormat::Pcm16Bit,
            start_threshold: MMAP_PERIOD_SIZE * 8,
            stop_threshold: u32::MAX,
        }
    }

    /// Memory-mapped capture with 1ms bursts.
    #[must_use]
    pub const fn mmap_capture(channels: u32) -> Self {
        Self {
            channels,
            rate: DEFAULT_OUTPUT_SAMPLE_RATE,
            period_size: MMAP_PERIOD_SIZE,
            period_count: MMAP_PERIOD_COUNT_MAX,
            format: AudioFormat::Pcm16Bit,
            start_threshold: 0,
            stop_threshold: u32::MAX,
        }
    }

    /// Replaces the period size and rescales the start threshold to a quarter period.
    #[must_use]
    pub const fn with_period_size(mut self, period_size: u32) -> Self {
        self.period_size = period_size;
        self.start_threshold = period_size / 4;
        self
    }

    /// Replaces the sample rate.
    #[must_use]
    pub const fn with_rate(mut self, rate: u32) -> Self {
        self.rate = rate;
        self
    }

    /// Bytes per interleaved frame.
    #[must_use]
    pub fn frame_size(&self) -> usize {
        self.format.frame_size(self.channels)
    }

    /// Bytes per period.
    #[must_use]
    pub fn period_bytes(&self) -> usize {
        self.period_size as usize * self.frame_size()
    }

    /// Frames held by the whole hardware buffer.
    #[must_use]
    pub fn buffer_frames(&self) -> u32 {
        self.period_size * self.period_count
    }

    /// Worst-case queueing latency of a full hardware buffer.
    #[must_use]
    pub fn latency_ms(&self) -> u32 {
        if self.rate == 0 {
            return 0;
        }
        (u64::from(self.buffer_frames()) * 1000 / u64::from(self.rate)) as u32
    }
}

/// Returns `true` for period sizes known to work for low-latency playback.
#[must_use]
pub fn is_plausible_low_latency_period(period_size: u32) -> bool {
    matches!(period_size, 48 | 96 | 144 | 160 | 192 | 240 | 320 | 480)
}

/// Property key that overrides the low-latency playback (and capture) period.
pub const PROP_PERIOD_SIZE: &str = "audio_hal.period_size";
/// Property key that overrides only the low-latency capture period.
pub const PROP_IN_PERIOD_SIZE: &str = "audio_hal.in_period_size";

/// Device-wide configuration.
///
/// Use [`HalConfig::default()`] for the reference board layout, or adjust:
///
/// ```
/// use audio_hal::{HalConfig, PcmAddress};
///
/// let config = HalConfig {
///     sco_pcm: PcmAddress::new(2, 0),
///     ..Default::default()
/// }
/// .apply_properties([("audio_hal.period_size", "480")]);
///
/// assert_eq!(config.low_latency_period_size, 480);
/// ```
#[derive(Debug, Clone)]
pub struct HalConfig {
    /// Sound card carrying the main playback/capture PCMs.
    ///
    /// Default: 0
    pub sound_card: u32,

    /// PCM device number of the main playback/capture path.
    ///
    /// Default: 0
    pub primary_device: u32,

    /// PCM device number of the digital (S/PDIF) link on `sound_card`.
    ///
    /// Default: 1
    pub hdmi_device: u32,

    /// Voice-side PCM the hands-free bridge relays to and from.
    ///
    /// Default: `hw:0,2`
    pub voice_pcm: PcmAddress,

    /// Bluetooth SCO PCM the hands-free bridge relays to and from.
    ///
    /// Default: `hw:1,0`
    pub sco_pcm: PcmAddress,

    /// PCM parameters used by both bridge legs.
    ///
    /// Default: [`PcmConfig::bt_sco()`]
    pub hfp_pcm_config: PcmConfig,

    /// Frames per period for low-latency playback.
    ///
    /// Default: 240
    pub low_latency_period_size: u32,

    /// Frames per period for `FAST` capture at 48 kHz.
    ///
    /// Default: 240
    pub low_latency_capture_period_size: u32,

    /// Try to raise relay threads to real-time scheduling.
    ///
    /// Default: true
    pub realtime_relays: bool,
}

impl Default for HalConfig {
    fn default() -> Self {
        Self {
            sound_card: 0,
            primary_device: 0,
            hdmi_device: 1,
            voice_pcm: PcmAddress::new(0, 2),
            sco_pcm: PcmAddress::new(1, 0),
            hfp_pcm_config: PcmConfig::bt_sco(),
            low_latency_period_size: LOW_LATENCY_PERIOD_SIZE,
            low_latency_capture_period_size: LOW_LATENCY_PERIOD_SIZE,
            realtime_relays: true,
        }
    }
}

impl HalConfig {
    /// Applies property-store overrides.
    ///
    /// `audio_hal.period_size` sets both low-latency period sizes,
    /// `audio_hal.in_period_size` only the capture one. Values that don't
    /// parse or aren't plausible are ignored.
    #[must_use]
    pub fn apply_properties<'a>(
        mut self,
        properties: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let mut playback = None;
        let mut capture = None;
        for (key, value) in properties {
            let trial = value.trim().parse::<u32>().ok();
            match key {
                PROP_PERIOD_SIZE => playback = trial,
                PROP_IN_PERIOD_SIZE => capture = trial,
                _ => {}
            }
        }

        if let Some(trial) = playback.filter(|p| is_plausible_low_latency_period(*p)) {
            self.low_latency_period_size = trial;
            self.low_latency_capture_period_size = trial;
        }
        if let Some(trial) = capture.filter(|p| is_plausible_low_latency_period(*p)) {
            self.low_latency_capture_period_size = trial;
        }
        self
    }

    /// Set the voice-side PCM the bridge relays to and from.
    #[must_use]
    pub fn with_voice_pcm(mut self, address: PcmAddress) -> Self {
        self.voice_pcm = address;
        self
    }

    /// Set the SCO PCM the bridge relays to and from.
    #[must_use]
    pub fn with_sco_pcm(mut self, address: PcmAddress) -> Self {
        self.sco_pcm = address;
        self
    }

    /// Set the PCM parameters of both bridge legs.
    #[must_use]
    pub fn with_hfp_pcm_config(mut self, config: PcmConfig) -> Self {
        self.hfp_pcm_config = config;
        self
    }

    /// Enable or disable real-time scheduling for relay threads.
    #[must_use]
    pub fn with_realtime_relays(mut self, enabled: bool) -> Self {
        self.realtime_relays = enabled;
        self
    }

    /// Low-latency playback config with the configured period size.
    #[must_use]
    pub fn low_latency_config(&self) -> PcmConfig {
        PcmConfig::low_latency().with_period_size(self.low_latency_period_size)
    }

    /// Playback address for the main path.
    #[must_use]
    pub fn primary_pcm(&self) -> PcmAddress {
        PcmAddress::new(self.sound_card, self.primary_device)
    }

    /// Playback address for the digital link.
    #[must_use]
    pub fn hdmi_pcm(&self) -> PcmAddress {
        PcmAddress::new(self.sound_card, self.hdmi_device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let deep = PcmConfig::deep_buffer();
        assert_eq!((deep.period_size, deep.period_count), (1920, 4));
        assert_eq!(deep.start_threshold, 480);

        let low = PcmConfig::low_latency();
        assert_eq!((low.period_size, low.period_count), (240, 2));
        assert_eq!(low.start_threshold, 60);

        let sco = PcmConfig::bt_sco();
        assert_eq!((sco.channels, sco.rate), (1, 16000));
        assert_eq!(sco.period_bytes(), 256);
    }

    #[test]
    fn test_latency_ms() {
        assert_eq!(PcmConfig::deep_buffer().latency_ms(), 160);
        assert_eq!(PcmConfig::low_latency().latency_ms(), 10);
        assert_eq!(PcmConfig::hdmi().latency_ms(), 85);
    }

    #[test]
    fn test_with_period_size_rescales_start_threshold() {
        let config = PcmConfig::low_latency().with_period_size(480);
        assert_eq!(config.period_size, 480);
        assert_eq!(config.start_threshold, 120);
    }

    #[test]
    fn test_plausible_periods() {
        assert!(is_plausible_low_latency_period(240));
        assert!(is_plausible_low_latency_period(48));
        assert!(!is_plausible_low_latency_period(256));
        assert!(!is_plausible_low_latency_period(0));
    }

    #[test]
    fn test_properties_override_both_periods() {
        let config = HalConfig::default().apply_properties([(PROP_PERIOD_SIZE, "160")]);
        assert_eq!(config.low_latency_period_size, 160);
        assert_eq!(config.low_latency_capture_period_size, 160);
        assert_eq!(config.low_latency_config().start_threshold, 40);
    }

    #[test]
    fn test_properties_capture_only() {
        let config = HalConfig::default().apply_properties([
            (PROP_PERIOD_SIZE, "160"),
            (PROP_IN_PERIOD_SIZE, "96"),
        ]);
        assert_eq!(config.low_latency_period_size, 160);
        assert_eq!(config.low_latency_capture_period_size, 96);
    }

    #[test]
    fn test_properties_implausible_ignored() {
        let config = HalConfig::default()
            .apply_properties([(PROP_PERIOD_SIZE, "1000"), (PROP_IN_PERIOD_SIZE, "abc")]);
        assert_eq!(config.low_latency_period_size, 240);
        assert_eq!(config.low_latency_capture_period_size, 240);
    }

    #[test]
    fn test_hal_config_defaults() {
        let config = HalConfig::default();
        assert_eq!(config.voice_pcm, PcmAddress::new(0, 2));
        assert_eq!(config.sco_pcm, PcmAddress::new(1, 0));
        assert_eq!(config.hdmi_pcm(), PcmAddress::new(0, 1));
        assert!(config.realtime_relays);
    }
}
