//! Device bitmasks, input sources and stream flags.
//!
//! Values follow the host framework's encoding so `routing=<mask>` parameters
//! and open-time arguments pass through unchanged.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use crate::format::AudioFormat;

/// A set of audio devices.
///
/// Output and input devices share one bit space; input devices carry
/// [`AudioDevices::BIT_IN`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AudioDevices(u32);

impl AudioDevices {
    /// Marker bit carried by every input device.
    pub const BIT_IN: u32 = 0x8000_0000;

    /// The empty set.
    pub const NONE: Self = Self(0);

    /// Handset earpiece.
    pub const OUT_EARPIECE: Self = Self(0x1);
    /// Built-in loudspeaker.
    pub const OUT_SPEAKER: Self = Self(0x2);
    /// Wired headset with microphone.
    pub const OUT_WIRED_HEADSET: Self = Self(0x4);
    /// Wired headphones without microphone.
    pub const OUT_WIRED_HEADPHONE: Self = Self(0x8);
    /// Bluetooth SCO, generic.
    pub const OUT_BLUETOOTH_SCO: Self = Self(0x10);
    /// Bluetooth SCO headset.
    pub const OUT_BLUETOOTH_SCO_HEADSET: Self = Self(0x20);
    /// Bluetooth SCO car kit.
    pub const OUT_BLUETOOTH_SCO_CARKIT: Self = Self(0x40);
    /// Digital link (HDMI / S/PDIF).
    pub const OUT_AUX_DIGITAL: Self = Self(0x400);

    /// Communication device.
    pub const IN_COMMUNICATION: Self = Self(Self::BIT_IN | 0x1);
    /// Ambient microphone.
    pub const IN_AMBIENT: Self = Self(Self::BIT_IN | 0x2);
    /// Built-in main microphone.
    pub const IN_BUILTIN_MIC: Self = Self(Self::BIT_IN | 0x4);
    /// Bluetooth SCO headset microphone.
    pub const IN_BLUETOOTH_SCO_HEADSET: Self = Self(Self::BIT_IN | 0x8);
    /// Wired headset microphone.
    pub const IN_WIRED_HEADSET: Self = Self(Self::BIT_IN | 0x10);
    /// Digital link input.
    pub const IN_AUX_DIGITAL: Self = Self(Self::BIT_IN | 0x20);
    /// Voice call capture.
    pub const IN_VOICE_CALL: Self = Self(Self::BIT_IN | 0x40);
    /// Built-in back microphone.
    pub const IN_BACK_MIC: Self = Self(Self::BIT_IN | 0x80);

    /// Wraps a raw mask.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw mask.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` for the empty set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    /// Returns `true` if any bit of `other` is set.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Number of devices in the set, ignoring [`BIT_IN`](Self::BIT_IN).
    #[must_use]
    pub const fn count(self) -> u32 {
        self.strip_input_bit().0.count_ones()
    }

    /// Returns `true` if this is an input device mask.
    #[must_use]
    pub const fn is_input(self) -> bool {
        self.0 & Self::BIT_IN != 0
    }

    /// Mask with the input marker cleared.
    #[must_use]
    pub const fn strip_input_bit(self) -> Self {
        Self(self.0 & !Self::BIT_IN)
    }

    /// Removes `other`'s device bits, keeping the input marker intact.
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.strip_input_bit().0;
    }
}

impl BitOr for AudioDevices {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for AudioDevices {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for AudioDevices {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for AudioDevices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AudioDevices({:#x})", self.0)
    }
}

/// What a capture stream records for.
///
/// Drives the row chosen in the route table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InputSource {
    /// No particular use; routes like "no source".
    #[default]
    Default,
    /// General recording.
    Mic,
    /// Uplink of a voice call.
    VoiceUplink,
    /// Downlink of a voice call.
    VoiceDownlink,
    /// Both directions of a voice call.
    VoiceCall,
    /// Video recording.
    Camcorder,
    /// Speech recognition.
    VoiceRecognition,
    /// VoIP.
    VoiceCommunication,
    /// Submix of the playback path.
    RemoteSubmix,
    /// Unprocessed capture.
    Unprocessed,
}

impl InputSource {
    /// Decodes the framework's numeric source id.
    #[must_use]
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Default,
            1 => Self::Mic,
            2 => Self::VoiceUplink,
            3 => Self::VoiceDownlink,
            4 => Self::VoiceCall,
            5 => Self::Camcorder,
            6 => Self::VoiceRecognition,
            7 => Self::VoiceCommunication,
            8 => Self::RemoteSubmix,
            9 => Self::Unprocessed,
            _ => return None,
        })
    }

    /// The framework's numeric source id.
    #[must_use]
    pub fn raw(self) -> u32 {
        match self {
            Self::Default => 0,
            Self::Mic => 1,
            Self::VoiceUplink => 2,
            Self::VoiceDownlink => 3,
            Self::VoiceCall => 4,
            Self::Camcorder => 5,
            Self::VoiceRecognition => 6,
            Self::VoiceCommunication => 7,
            Self::RemoteSubmix => 8,
            Self::Unprocessed => 9,
        }
    }
}

/// Flags passed when opening a playback stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OutputFlags(u32);

impl OutputFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// Bypasses software mixing.
    pub const DIRECT: Self = Self(0x1);
    /// The primary output; at most one may be open.
    pub const PRIMARY: Self = Self(0x2);
    /// Low-latency path.
    pub const FAST: Self = Self(0x4);
    /// Large buffers for non-interactive media.
    pub const DEEP_BUFFER: Self = Self(0x8);
    /// Text-to-speech.
    pub const TTS: Self = Self(0x80);
    /// No effects.
    pub const RAW: Self = Self(0x100);
    /// Memory-mapped, no interrupts.
    pub const MMAP_NOIRQ: Self = Self(0x4000);

    /// Wraps a raw flag word.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw flag word.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for OutputFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Flags passed when opening a capture stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InputFlags(u32);

impl InputFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// Low-latency path.
    pub const FAST: Self = Self(0x1);
    /// No effects.
    pub const RAW: Self = Self(0x4);
    /// Memory-mapped, no interrupts.
    pub const MMAP_NOIRQ: Self = Self(0x10);

    /// Wraps a raw flag word.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw flag word.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for InputFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Format a client asks for when opening a stream.
///
/// Playback streams override it with their profile; capture streams validate
/// it and keep rate and channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequest {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u32,
    /// Sample encoding.
    pub format: AudioFormat,
}

impl StreamRequest {
    /// Creates a request.
    #[must_use]
    pub const fn new(sample_rate: u32, channels: u32, format: AudioFormat) -> Self {
        Self {
            sample_rate,
            channels,
            format,
        }
    }
}

impl Default for StreamRequest {
    fn default() -> Self {
        Self::new(48000, 2, AudioFormat::Pcm16Bit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_devices_combine() {
        let devices = AudioDevices::OUT_SPEAKER | AudioDevices::OUT_WIRED_HEADSET;
        assert_eq!(devices.bits(), 0x6);
        assert_eq!(devices.count(), 2);
        assert!(devices.contains(AudioDevices::OUT_SPEAKER));
        assert!(!devices.contains(AudioDevices::OUT_AUX_DIGITAL));
    }

    #[test]
    fn test_devices_remove() {
        let mut devices = AudioDevices::OUT_SPEAKER | AudioDevices::OUT_WIRED_HEADSET;
        devices.remove(AudioDevices::OUT_SPEAKER);
        assert_eq!(devices, AudioDevices::OUT_WIRED_HEADSET);
        devices.remove(AudioDevices::OUT_WIRED_HEADSET);
        assert!(devices.is_empty());
    }

    #[test]
    fn test_input_bit() {
        let mic = AudioDevices::IN_BUILTIN_MIC;
        assert!(mic.is_input());
        assert_eq!(mic.count(), 1);
        assert_eq!(mic.strip_input_bit().bits(), 0x4);
        assert!(!AudioDevices::OUT_SPEAKER.is_input());
    }

    #[test]
    fn test_contains_empty_is_false() {
        assert!(!AudioDevices::OUT_SPEAKER.contains(AudioDevices::NONE));
    }

    #[test]
    fn test_input_source_raw() {
        for raw in 0..10 {
            let source = InputSource::from_raw(raw).unwrap();
            assert_eq!(source.raw(), raw);
        }
        assert_eq!(InputSource::from_raw(6), Some(InputSource::VoiceRecognition));
        assert_eq!(InputSource::from_raw(1999), None);
    }

    #[test]
    fn test_flags() {
        let flags = OutputFlags::PRIMARY | OutputFlags::FAST;
        assert!(flags.contains(OutputFlags::PRIMARY));
        assert!(!flags.contains(OutputFlags::DEEP_BUFFER));
        assert!(InputFlags::from_bits(0x11).contains(InputFlags::MMAP_NOIRQ));
    }
}
