//! Big-endian sample codec for the interleaved wire format
//!
//! Values are addressed by 4-byte word index rather than byte offset. For `C`
//! channels the sample of channel `c` at frame `f` lives at word `c + f * C`,
//! on both the encode and the decode side.

use crate::constants::SAMPLE_BYTES;

/// Read the `index`-th big-endian `u32` of `buf`
#[inline]
pub fn decode_u32(buf: &[u8], index: usize) -> u32 {
    let at = index * SAMPLE_BYTES;
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Write `value` as the `index`-th big-endian `u32` of `buf`
#[inline]
pub fn encode_u32(buf: &mut [u8], index: usize, value: u32) {
    let at = index * SAMPLE_BYTES;
    buf[at..at + SAMPLE_BYTES].copy_from_slice(&value.to_be_bytes());
}

/// Read the `index`-th sample of `buf`.
///
/// The bit pattern is reinterpreted, never converted, so NaN payloads and
/// infinities survive unchanged.
#[inline]
pub fn decode_float(buf: &[u8], index: usize) -> f32 {
    f32::from_bits(decode_u32(buf, index))
}

/// Write `value` as the `index`-th sample of `buf`
#[inline]
pub fn encode_float(buf: &mut [u8], index: usize, value: f32) {
    encode_u32(buf, index, value.to_bits());
}

/// Byte length of `frames` interleaved frames of `channels` channels
#[inline]
pub const fn frame_bytes(channels: usize, frames: usize) -> usize {
    channels * frames * SAMPLE_BYTES
}

/// Interleave one channel's planar samples into `buf`
pub fn interleave_channel(buf: &mut [u8], channel: usize, channels: usize, samples: &[f32]) {
    for (frame, &sample) in samples.iter().enumerate() {
        encode_float(buf, channel + frame * channels, sample);
    }
}

/// De-interleave one channel of `buf` into planar `out`
pub fn deinterleave_channel(buf: &[u8], channel: usize, channels: usize, out: &mut [f32]) {
    for (frame, sample) in out.iter_mut().enumerate() {
        *sample = decode_float(buf, channel + frame * channels);
    }
}

/// Zero one channel's slots in an interleaved buffer
pub fn silence_channel(buf: &mut [u8], channel: usize, channels: usize, frames: usize) {
    for frame in 0..frames {
        encode_u32(buf, channel + frame * channels, 0);
    }
}

/// Floor of log2, with `log2(0) == 0`. Used for the period-size exponent.
#[inline]
pub fn log2(value: u32) -> u8 {
    if value == 0 {
        return 0;
    }
    (31 - value.leading_zeros()) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_layout() {
        let mut buf = [0u8; 8];
        encode_float(&mut buf, 1, 1.0);
        assert_eq!(&buf[4..], &[0x3F, 0x80, 0x00, 0x00]);

        encode_u32(&mut buf, 0, 0x0102_0304);
        assert_eq!(&buf[..4], &[1, 2, 3, 4]);
        assert_eq!(decode_u32(&buf, 0), 0x0102_0304);
    }

    #[test]
    fn test_interleave_positions() {
        // 2 channels, 3 frames: L0 R0 L1 R1 L2 R2
        let mut buf = [0u8; 24];
        interleave_channel(&mut buf, 0, 2, &[1.0, 2.0, 3.0]);
        interleave_channel(&mut buf, 1, 2, &[-1.0, -2.0, -3.0]);

        let words: Vec<f32> = (0..6).map(|i| decode_float(&buf, i)).collect();
        assert_eq!(words, vec![1.0, -1.0, 2.0, -2.0, 3.0, -3.0]);
    }

    #[test]
    fn test_silence_channel_leaves_neighbours() {
        let mut buf = [0u8; 16];
        interleave_channel(&mut buf, 0, 2, &[0.5, 0.25]);
        interleave_channel(&mut buf, 1, 2, &[0.75, 0.125]);
        silence_channel(&mut buf, 1, 2, 2);

        let mut left = [0.0f32; 2];
        let mut right = [9.0f32; 2];
        deinterleave_channel(&buf, 0, 2, &mut left);
        deinterleave_channel(&buf, 1, 2, &mut right);
        assert_eq!(left, [0.5, 0.25]);
        assert_eq!(right, [0.0, 0.0]);
    }

    #[test]
    fn test_log2() {
        assert_eq!(log2(0), 0);
        assert_eq!(log2(1), 0);
        assert_eq!(log2(256), 8);
        assert_eq!(log2(300), 8);
        assert_eq!(log2(8192), 13);
        assert_eq!(log2(u32::MAX), 31);
    }

    proptest! {
        #[test]
        fn float_bits_survive(bits in any::<u32>(), index in 0usize..16) {
            let mut buf = [0u8; 64];
            encode_float(&mut buf, index, f32::from_bits(bits));
            prop_assert_eq!(decode_float(&buf, index).to_bits(), bits);
        }

        #[test]
        fn u32_survives(value in any::<u32>(), index in 0usize..16) {
            let mut buf = [0u8; 64];
            encode_u32(&mut buf, index, value);
            prop_assert_eq!(decode_u32(&buf, index), value);
        }

        #[test]
        fn interleaving_is_symmetric(
            channels in 1usize..=8,
            frames in 1usize..64,
            seed in any::<u32>(),
        ) {
            let planar: Vec<Vec<f32>> = (0..channels)
                .map(|c| {
                    (0..frames)
                        .map(|f| f32::from_bits(seed.wrapping_mul(31).wrapping_add((c * 1000 + f) as u32)))
                        .collect()
                })
                .collect();

            let mut buf = vec![0u8; frame_bytes(channels, frames)];
            for (c, samples) in planar.iter().enumerate() {
                interleave_channel(&mut buf, c, channels, samples);
            }

            for (c, samples) in planar.iter().enumerate() {
                let mut out = vec![0.0f32; frames];
                deinterleave_channel(&buf, c, channels, &mut out);
                let got: Vec<u32> = out.iter().map(|s| s.to_bits()).collect();
                let want: Vec<u32> = samples.iter().map(|s| s.to_bits()).collect();
                prop_assert_eq!(got, want);
            }
        }
    }
}
