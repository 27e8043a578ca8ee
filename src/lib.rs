//! # audio-hal
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Runtime core of an audio hardware-abstraction layer.
//!
//! `audio-hal` decides which physical audio path is active for the current
//! mix of playback devices and capture source, manages the standby/active
//! lifecycle of playback and capture streams (including a memory-mapped
//! mode), and bridges the cellular voice path to a Bluetooth hands-free (SCO)
//! link with two real-time relay threads.
//!
//! ## Quick Start
//!
//! ```rust
//! use audio_hal::{
//!     AudioDevices, AudioFormat, AudioHw, Endpoint, InputFlags, InputSource, MockPcmBackend,
//!     OutputFlags, RecordingMixer, StreamRequest,
//! };
//!
//! let mixer = RecordingMixer::new();
//! let hw = AudioHw::builder()
//!     .backend(MockPcmBackend::new())
//!     .mixer(mixer.clone())
//!     .on_event(|e| tracing::debug!(?e, "hal event"))
//!     .open()?;
//!
//! // The first write opens the device and applies the speaker route.
//! let out = hw.open_output_stream(
//!     AudioDevices::OUT_SPEAKER,
//!     OutputFlags::PRIMARY,
//!     &StreamRequest::default(),
//! )?;
//! out.write(&[0u8; 960])?;
//! assert_eq!(mixer.applied_paths(), vec!["media-speaker".to_string()]);
//!
//! // Recording for speech recognition switches both sides of the route.
//! let input = hw.open_input_stream(
//!     AudioDevices::IN_BUILTIN_MIC,
//!     InputFlags::NONE,
//!     &StreamRequest::new(16000, 1, AudioFormat::Pcm16Bit),
//!     InputSource::VoiceRecognition,
//! )?;
//! let mut buf = vec![0u8; input.buffer_size()];
//! input.read(&mut buf)?;
//! # Ok::<(), audio_hal::HalError>(())
//! ```
//!
//! ## Architecture
//!
//! All shared state lives in one device aggregate behind the device lock.
//! Streams and the bridge take locks in one global order:
//!
//! - **Device lock**: active devices, input source, route, hands-free state
//! - **Input stream lock**: capture state and PCM handle
//! - **Output stream lock**: playback state and PCM handle
//!
//! The data path never fails on hardware errors. A failed transfer drops the
//! stream to standby, sleeps for the buffer's duration, reports the full byte
//! count and raises a [`HalEvent`]. Explicit control operations return
//! [`HalError`].

#![warn(missing_docs)]
// Audio code requires intentional numeric casts between frame and byte counts
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod aggregate;
mod bridge;
mod builder;
mod config;
mod device;
mod error;
mod event;
pub mod format;
mod hw;
pub mod params;
mod patch;
pub mod pcm;
pub mod route;
pub mod stream;

pub use bridge::{
    shared_transform, BridgeStats, FrameTransform, LegStats, LegStatus, Passthrough, RelayLeg,
    SharedTransform,
};
pub use builder::AudioHwBuilder;
pub use config::{HalConfig, PcmConfig, PROP_IN_PERIOD_SIZE, PROP_PERIOD_SIZE};
pub use device::{AudioDevices, InputFlags, InputSource, OutputFlags, StreamRequest};
pub use error::{HalError, PcmError};
pub use event::{event_callback, EventCallback, HalEvent};
pub use format::AudioFormat;
pub use hw::AudioHw;
pub use patch::{AudioPatch, AudioPort, PatchHandle};
pub use pcm::{
    MmapPosition, MockPcmBackend, Pcm, PcmAddress, PcmBackend, PcmDirection, PcmInterrupt,
    PcmMode, PcmTimestamp,
};
pub use route::{MixerCall, MixerEngine, RecordingMixer, RouteTable};
pub use stream::{
    Direction, Endpoint, InputStream, MmapBufferInfo, OutputStream, StreamPosition, StreamState,
};

// Re-export the CPAL backend when the feature is enabled
#[cfg(feature = "cpal")]
pub use pcm::CpalBackend;
