//! Byte/sample conversion and buffer timing.

use std::time::Duration;

/// Decodes little-endian 16-bit samples from `bytes` into `samples`.
///
/// Converts `min(bytes.len() / 2, samples.len())` samples and returns that count.
pub fn bytes_to_samples(bytes: &[u8], samples: &mut [i16]) -> usize {
    let mut count = 0;
    for (pair, sample) in bytes.chunks_exact(2).zip(samples.iter_mut()) {
        *sample = i16::from_le_bytes([pair[0], pair[1]]);
        count += 1;
    }
    count
}

/// Encodes samples into `bytes` as little-endian 16-bit.
///
/// Returns the number of samples written.
pub fn samples_to_bytes(samples: &[i16], bytes: &mut [u8]) -> usize {
    let mut count = 0;
    for (sample, pair) in samples.iter().zip(bytes.chunks_exact_mut(2)) {
        pair.copy_from_slice(&sample.to_le_bytes());
        count += 1;
    }
    count
}

/// Zero-fills a buffer.
#[inline]
pub fn silence(buf: &mut [u8]) {
    buf.fill(0);
}

/// Playback time of `bytes` at the given frame size and rate.
///
/// Used to back off after a failed transfer so the caller keeps real-time
/// pacing. Returns zero for a degenerate frame size or rate.
pub fn buffer_duration(bytes: usize, frame_size: usize, rate: u32) -> Duration {
    if frame_size == 0 || rate == 0 {
        return Duration::ZERO;
    }
    let frames = (bytes / frame_size) as u64;
    Duration::from_micros(frames * 1_000_000 / u64::from(rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_samples() {
        let bytes = [0x01, 0x00, 0xff, 0xff, 0x00, 0x80];
        let mut samples = [0i16; 3];
        assert_eq!(bytes_to_samples(&bytes, &mut samples), 3);
        assert_eq!(samples, [1, -1, i16::MIN]);
    }

    #[test]
    fn test_bytes_to_samples_short_output() {
        let bytes = [1, 0, 2, 0, 3, 0];
        let mut samples = [0i16; 2];
        assert_eq!(bytes_to_samples(&bytes, &mut samples), 2);
        assert_eq!(samples, [1, 2]);
    }

    #[test]
    fn test_samples_to_bytes() {
        let mut bytes = [0u8; 4];
        assert_eq!(samples_to_bytes(&[256, -2], &mut bytes), 2);
        assert_eq!(bytes, [0x00, 0x01, 0xfe, 0xff]);
    }

    #[test]
    fn test_buffer_duration() {
        // 960 bytes of 48kHz stereo 16-bit = 240 frames = 5ms
        assert_eq!(buffer_duration(960, 4, 48000), Duration::from_millis(5));
        // one bridge period: 128 frames mono at 16kHz = 8ms
        assert_eq!(buffer_duration(256, 2, 16000), Duration::from_millis(8));
    }

    #[test]
    fn test_buffer_duration_degenerate() {
        assert_eq!(buffer_duration(100, 0, 48000), Duration::ZERO);
        assert_eq!(buffer_duration(100, 4, 0), Duration::ZERO);
    }

    #[test]
    fn test_silence() {
        let mut buf = vec![7u8; 16];
        silence(&mut buf);
        assert!(buf.iter().all(|&b| b == 0));
    }
}
