//! Static source × device route table.

use crate::device::{AudioDevices, InputSource};

/// Collapsed output device used to index the route table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputDeviceId {
    /// Built-in loudspeaker.
    Speaker,
    /// Wired headset (with microphone).
    Headset,
    /// Wired headphones.
    Headphones,
    /// Any Bluetooth SCO variant.
    BtSco,
    /// Speaker plus a wired headset or headphones.
    SpeakerAndHeadset,
    /// No output, or a combination the table doesn't cover.
    None,
}

impl OutputDeviceId {
    /// Columns in the route table.
    pub const TABLE_SIZE: usize = 5;

    /// Total id count, including the table-size marker slot and `None`.
    ///
    /// Source bits in a route fingerprint start above this, so no source
    /// bit can alias a device bit.
    pub const COUNT: u32 = 7;

    /// Bit index used in the route fingerprint.
    #[must_use]
    pub const fn index(self) -> u32 {
        match self {
            Self::Speaker => 0,
            Self::Headset => 1,
            Self::Headphones => 2,
            Self::BtSco => 3,
            Self::SpeakerAndHeadset => 4,
            Self::None => 6,
        }
    }

    /// Column in the route table, `None` for [`OutputDeviceId::None`].
    #[must_use]
    pub const fn column(self) -> Option<usize> {
        match self {
            Self::None => None,
            other => Some(other.index() as usize),
        }
    }

    /// Maps an output device mask to a single id.
    ///
    /// Only speaker + wired headset/headphones is a supported pair; any other
    /// multi-device mask maps to `None`.
    #[must_use]
    pub fn from_devices(devices: AudioDevices) -> Self {
        match devices.count() {
            0 => Self::None,
            1 => match devices {
                d if d == AudioDevices::OUT_SPEAKER => Self::Speaker,
                d if d == AudioDevices::OUT_WIRED_HEADSET => Self::Headset,
                d if d == AudioDevices::OUT_WIRED_HEADPHONE => Self::Headphones,
                d if d == AudioDevices::OUT_BLUETOOTH_SCO
                    || d == AudioDevices::OUT_BLUETOOTH_SCO_HEADSET
                    || d == AudioDevices::OUT_BLUETOOTH_SCO_CARKIT =>
                {
                    Self::BtSco
                }
                _ => Self::None,
            },
            2 => {
                if devices == AudioDevices::OUT_SPEAKER | AudioDevices::OUT_WIRED_HEADSET
                    || devices == AudioDevices::OUT_SPEAKER | AudioDevices::OUT_WIRED_HEADPHONE
                {
                    Self::SpeakerAndHeadset
                } else {
                    Self::None
                }
            }
            _ => Self::None,
        }
    }
}

/// Collapsed input source used to index the route table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputSourceId {
    /// General recording.
    Mic,
    /// Video recording.
    Camcorder,
    /// Speech recognition.
    VoiceRecognition,
    /// VoIP.
    VoiceCommunication,
    /// No source, or one the table doesn't cover.
    None,
}

impl InputSourceId {
    /// Rows in the route table.
    pub const TABLE_SIZE: usize = 4;

    /// Bit index used in the route fingerprint, before the device offset.
    #[must_use]
    pub const fn index(self) -> u32 {
        match self {
            Self::Mic => 0,
            Self::Camcorder => 1,
            Self::VoiceRecognition => 2,
            Self::VoiceCommunication => 3,
            Self::None => 5,
        }
    }

    /// Row in the route table, `None` for [`InputSourceId::None`].
    #[must_use]
    pub const fn row(self) -> Option<usize> {
        match self {
            Self::None => None,
            other => Some(other.index() as usize),
        }
    }

    /// Maps a capture source to its table row id.
    #[must_use]
    pub fn from_source(source: InputSource) -> Self {
        match source {
            InputSource::Mic => Self::Mic,
            InputSource::Camcorder => Self::Camcorder,
            InputSource::VoiceRecognition => Self::VoiceRecognition,
            InputSource::VoiceCommunication => Self::VoiceCommunication,
            _ => Self::None,
        }
    }
}

/// Fingerprint of a source/device pair.
///
/// Distinct pairs always give distinct ids; the router skips the mixer when
/// the id hasn't changed.
#[must_use]
pub const fn route_fingerprint(source: InputSourceId, device: OutputDeviceId) -> u32 {
    (1 << (source.index() + OutputDeviceId::COUNT)) + (1 << device.index())
}

/// Named pair of mixer paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteConfig {
    /// Entry name.
    pub name: &'static str,
    /// Mixer path enabling the output side.
    pub output_path: &'static str,
    /// Mixer path enabling the input side.
    pub input_path: &'static str,
}

const fn route(
    name: &'static str,
    output_path: &'static str,
    input_path: &'static str,
) -> RouteConfig {
    RouteConfig {
        name,
        output_path,
        input_path,
    }
}

const MEDIA_SPEAKER: RouteConfig = route("media_speaker", "media-speaker", "media-main-mic");
const MEDIA_HEADPHONES: RouteConfig =
    route("media_headphones", "media-headphones", "media-main-mic");
const MEDIA_HEADSET: RouteConfig = route("media_headset", "media-headphones", "media-headset-mic");
const CAMCORDER_SPEAKER: RouteConfig =
    route("camcorder_speaker", "media-speaker", "media-second-mic");
const CAMCORDER_HEADPHONES: RouteConfig =
    route("camcorder_headphones", "media-headphones", "media-second-mic");
const VOICE_REC_SPEAKER: RouteConfig =
    route("voice_rec_speaker", "voice-rec-speaker", "voice-rec-main-mic");
const VOICE_REC_HEADPHONES: RouteConfig =
    route("voice_rec_headphones", "voice-rec-headphones", "voice-rec-main-mic");
const VOICE_REC_HEADSET: RouteConfig =
    route("voice_rec_headset", "voice-rec-headphones", "voice-rec-headset-mic");
const COMMUNICATION_SPEAKER: RouteConfig = route(
    "communication_speaker",
    "communication-speaker",
    "communication-main-mic",
);
const COMMUNICATION_HEADPHONES: RouteConfig = route(
    "communication_headphones",
    "communication-headphones",
    "communication-main-mic",
);
const COMMUNICATION_HEADSET: RouteConfig = route(
    "communication_headset",
    "communication-headphones",
    "communication-headset-mic",
);
const SPEAKER_AND_HEADPHONES: RouteConfig =
    route("speaker_and_headphones", "speaker-and-headphones", "main-mic");
const BLUETOOTH_SCO: RouteConfig = route("bluetooth_sco", "bt-sco-headset", "bt-sco-mic");

/// Paths resolved for one routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouteSelection {
    /// Output path to apply, if any.
    pub output_path: Option<&'static str>,
    /// Input path to apply, if any.
    pub input_path: Option<&'static str>,
}

/// Immutable `[source][device]` table of mixer paths.
#[derive(Debug, Clone)]
pub struct RouteTable {
    rows: [[RouteConfig; OutputDeviceId::TABLE_SIZE]; InputSourceId::TABLE_SIZE],
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl RouteTable {
    /// The board's standard table.
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            rows: [
                [
                    MEDIA_SPEAKER,
                    MEDIA_HEADSET,
                    MEDIA_HEADPHONES,
                    BLUETOOTH_SCO,
                    SPEAKER_AND_HEADPHONES,
                ],
                [
                    CAMCORDER_SPEAKER,
                    CAMCORDER_HEADPHONES,
                    CAMCORDER_HEADPHONES,
                    BLUETOOTH_SCO,
                    SPEAKER_AND_HEADPHONES,
                ],
                [
                    VOICE_REC_SPEAKER,
                    VOICE_REC_HEADSET,
                    VOICE_REC_HEADPHONES,
                    BLUETOOTH_SCO,
                    SPEAKER_AND_HEADPHONES,
                ],
                [
                    COMMUNICATION_SPEAKER,
                    COMMUNICATION_HEADSET,
                    COMMUNICATION_HEADPHONES,
                    BLUETOOTH_SCO,
                    SPEAKER_AND_HEADPHONES,
                ],
            ],
        }
    }

    /// Entry for a source/device pair; `None` if either side is `None`.
    #[must_use]
    pub fn lookup(&self, source: InputSourceId, device: OutputDeviceId) -> Option<&RouteConfig> {
        let row = source.row()?;
        let column = device.column()?;
        Some(&self.rows[row][column])
    }

    /// Resolves which paths to apply.
    ///
    /// - source and device: both paths of the direct entry
    /// - source only: the input path of the column inferred from `input_device`
    /// - device only: the output path of the general-recording row
    /// - neither: nothing
    #[must_use]
    pub fn resolve(
        &self,
        source: InputSourceId,
        device: OutputDeviceId,
        input_device: AudioDevices,
    ) -> RouteSelection {
        match (source, device) {
            (InputSourceId::None, OutputDeviceId::None) => RouteSelection::default(),
            (InputSourceId::None, device) => RouteSelection {
                output_path: self
                    .lookup(InputSourceId::Mic, device)
                    .map(|r| r.output_path),
                input_path: None,
            },
            (source, OutputDeviceId::None) => {
                let inferred = infer_column(input_device);
                RouteSelection {
                    output_path: None,
                    input_path: self.lookup(source, inferred).map(|r| r.input_path),
                }
            }
            (source, device) => {
                let entry = self.lookup(source, device);
                RouteSelection {
                    output_path: entry.map(|r| r.output_path),
                    input_path: entry.map(|r| r.input_path),
                }
            }
        }
    }
}

fn infer_column(input_device: AudioDevices) -> OutputDeviceId {
    let device = input_device.strip_input_bit();
    if device == AudioDevices::IN_WIRED_HEADSET.strip_input_bit() {
        OutputDeviceId::Headset
    } else if device == AudioDevices::IN_BLUETOOTH_SCO_HEADSET.strip_input_bit() {
        OutputDeviceId::BtSco
    } else {
        OutputDeviceId::Speaker
    }
}
