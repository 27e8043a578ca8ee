//! Sample formats and raw buffer helpers.
//!
//! PCM devices move interleaved little-endian bytes. This module provides:
//! - [`AudioFormat`], the sample encodings endpoints may request
//! - Conversion between byte buffers and `i16` samples for the voice bridge
//! - Buffer duration math used for error back-off

mod convert;

pub use convert::{buffer_duration, bytes_to_samples, samples_to_bytes, silence};

/// Sample encodings understood by the HAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AudioFormat {
    /// Signed 16-bit little-endian.
    #[default]
    Pcm16Bit,
    /// Signed 8.24 fixed point in a 32-bit container.
    Pcm8_24Bit,
    /// Signed 32-bit little-endian.
    Pcm32Bit,
    /// 32-bit float.
    PcmFloat,
}

impl AudioFormat {
    /// Size of one sample in bytes.
    #[must_use]
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::Pcm16Bit => 2,
            Self::Pcm8_24Bit | Self::Pcm32Bit | Self::PcmFloat => 4,
        }
    }

    /// Size of one interleaved frame in bytes.
    #[must_use]
    pub fn frame_size(self, channels: u32) -> usize {
        self.bytes_per_sample() * channels as usize
    }
}
