//! Audio stream format definitions.

use crate::Sample;
use core::{fmt, num};
use dasp_sample::{FromSample, I24, Sample as _};
use serde::{Deserialize, Serialize};

/// Largest 24-bit sample value.
const I24_MAX: i32 = (1 << 23) - 1;

/// Supported sample formats on the wire.
///
/// All samples are packed (no unused bytes), little-endian, interleaved, and
/// uncompressed. Integer samples are full scale signed PCM.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum SampleType {
    I16,
    I24,
    I32,
    IEEF32,
    IEEF64,
}

impl SampleType {
    /// Returns whether the format is floating-point.
    #[inline(always)]
    pub fn is_float(self) -> bool {
        matches!(self, Self::IEEF32 | Self::IEEF64)
    }

    /// Returns the size of a single sample in bytes.
    #[inline(always)]
    pub const fn sample_size(self) -> num::NonZeroU8 {
        use SampleType::*;
        let res = match self {
            I16 => 2,
            I24 => 3,
            I32 | IEEF32 => 4,
            IEEF64 => 8,
        };

        num::NonZeroU8::new(res).unwrap()
    }

    /// Encodes `samples` into `bytes`, returns the number of bytes written.
    ///
    /// Stops early if `bytes` is too short to hold every sample. Integer formats clamp
    /// their input to `[-1, 1]`, full scale being `2^(bits - 1)`.
    pub fn encode(self, samples: &[Sample], bytes: &mut [u8]) -> usize {
        let size = usize::from(self.sample_size().get());

        let mut written = 0;

        for (&sample, dest) in core::iter::zip(samples, bytes.chunks_exact_mut(size)) {
            match self {
                Self::I16 => {
                    let v = i16::from_sample(sample.clamp(-1., 1.));
                    dest.copy_from_slice(&v.to_le_bytes());
                }
                Self::I24 => {
                    // +1.0 lands one past the 24-bit range
                    let v = I24::from_sample(sample.clamp(-1., 1.)).inner().min(I24_MAX);
                    dest.copy_from_slice(&v.to_le_bytes()[..3]);
                }
                Self::I32 => {
                    let v = i32::from_sample(sample.clamp(-1., 1.));
                    dest.copy_from_slice(&v.to_le_bytes());
                }
                Self::IEEF32 => dest.copy_from_slice(&sample.to_le_bytes()),
                Self::IEEF64 => dest.copy_from_slice(&f64::from_sample(sample).to_le_bytes()),
            }
            written += size;
        }

        written
    }

    /// Decodes `bytes` into `samples`, returns the number of samples written.
    ///
    /// Trailing bytes that do not form a complete sample are ignored.
    pub fn decode(self, bytes: &[u8], samples: &mut [Sample]) -> usize {
        let size = usize::from(self.sample_size().get());

        let mut written = 0;

        for (src, dest) in core::iter::zip(bytes.chunks_exact(size), samples) {
            *dest = match self {
                Self::I16 => f32::from_sample(i16::from_le_bytes([src[0], src[1]])),
                Self::I24 => {
                    // sign extension through the arithmetic shift
                    let v = i32::from_le_bytes([0, src[0], src[1], src[2]]) >> 8;
                    f32::from_sample(I24::new_unchecked(v))
                }
                Self::I32 => f32::from_sample(i32::from_le_bytes([src[0], src[1], src[2], src[3]])),
                Self::IEEF32 => f32::from_le_bytes([src[0], src[1], src[2], src[3]]),
                Self::IEEF64 => {
                    let mut b = [0; 8];
                    b.copy_from_slice(src);
                    f32::from_sample(f64::from_le_bytes(b))
                }
            };
            written += 1;
        }

        written
    }
}

/// A validated audio sample rate.
///
/// The inner value is guaranteed to be positive and normal.
#[derive(Clone, Copy, PartialEq, PartialOrd, Debug, Serialize, Deserialize)]
#[serde(try_from = "f64")]
pub struct SampleRate(f64);

impl SampleRate {
    #[inline(always)]
    pub const fn get(&self) -> f64 {
        self.0
    }

    /// Creates a new sample rate if the value is positive and
    /// [normal](https://en.wikipedia.org/wiki/Normal_number_(computing)).
    #[inline(always)]
    pub const fn new(val: f64) -> Option<Self> {
        if val.is_normal() && val.is_sign_positive() {
            Some(Self(val))
        } else {
            None
        }
    }
}

/// Error returned when creating an invalid [`SampleRate`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct SampleRateError;

impl fmt::Display for SampleRateError {
    #[inline(always)]
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Sample rate must be normal and positive")
    }
}

impl TryFrom<f64> for SampleRate {
    type Error = SampleRateError;

    #[inline(always)]
    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(SampleRateError)
    }
}

impl From<SampleRate> for f64 {
    #[inline(always)]
    fn from(value: SampleRate) -> Self {
        value.0
    }
}

/// Number of audio channels.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct ChannelCount(pub num::NonZeroU32);

impl ChannelCount {
    #[inline(always)]
    pub const fn get(self) -> usize {
        self.0.get() as usize
    }
}

/// Block size expressed in frames.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct BlockSize(pub num::NonZeroU32);

impl BlockSize {
    #[inline(always)]
    pub const fn get(self) -> usize {
        self.0.get() as usize
    }
}

/// A complete audio stream format description.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Format {
    pub sample_rate: SampleRate,
    pub channel_count: ChannelCount,
    /// Number of frames in every block of the stream.
    pub block_size: BlockSize,
    pub sample_type: SampleType,
}

impl Default for Format {
    #[inline(always)]
    fn default() -> Self {
        Self::standard()
    }
}

impl Format {
    /// Returns the default format:
    ///
    /// IEEF32, 48 kHz, stereo, 256-frame blocks.
    #[inline(always)]
    pub const fn standard() -> Format {
        Format {
            sample_rate: SampleRate::new(48e3).unwrap(),
            channel_count: ChannelCount(num::NonZeroU32::new(2).unwrap()),
            block_size: BlockSize(num::NonZeroU32::new(256).unwrap()),
            sample_type: SampleType::IEEF32,
        }
    }

    /// Returns the number of interleaved samples in one block.
    #[inline(always)]
    pub const fn block_samples(&self) -> usize {
        self.block_size.get() * self.channel_count.get()
    }

    /// Returns the number of bytes one encoded block occupies.
    #[inline(always)]
    pub const fn block_bytes(&self) -> usize {
        self.block_samples() * self.sample_type.sample_size().get() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_rate_rejects_degenerate_values() {
        assert!(SampleRate::new(0.).is_none());
        assert!(SampleRate::new(-44100.).is_none());
        assert!(SampleRate::new(f64::NAN).is_none());
        assert_eq!(SampleRate::new(44100.).map(|s| s.get()), Some(44100.));
    }

    #[test]
    fn block_sizes() {
        let f = Format::standard();
        assert_eq!(f.block_samples(), 512);
        assert_eq!(f.block_bytes(), 2048);

        let f = Format {
            sample_type: SampleType::I24,
            ..f
        };
        assert_eq!(f.block_bytes(), 1536);
    }

    #[test]
    fn pcm_encoding_preserves_samples() {
        let input = [0., 0.5, -0.5, 1., -1., 0.25];

        for ty in [
            SampleType::I16,
            SampleType::I24,
            SampleType::I32,
            SampleType::IEEF32,
            SampleType::IEEF64,
        ] {
            let mut bytes = [0u8; 6 * 8];
            let n_bytes = ty.encode(&input, &mut bytes);
            assert_eq!(n_bytes, input.len() * usize::from(ty.sample_size().get()));

            let mut output = [9.; 6];
            assert_eq!(ty.decode(&bytes[..n_bytes], &mut output), input.len());

            let tolerance = if ty.is_float() { 0. } else { 1e-4 };

            for (a, b) in input.iter().zip(output) {
                assert!((a - b).abs() <= tolerance, "{ty:?}: {a} != {b}");
            }
        }
    }

    #[test]
    fn integer_encoding_clamps() {
        let mut bytes = [0u8; 4];
        SampleType::I16.encode(&[2., -3.], &mut bytes);
        assert_eq!(bytes, [0xFF, 0x7F, 0x00, 0x80]);

        let mut output = [0.; 2];
        SampleType::I16.decode(&bytes, &mut output);
        assert_eq!(output, [32767. / 32768., -1.]);
    }

    #[test]
    fn integer_full_scale_stays_in_range() {
        let mut output = [0.; 1];

        SampleType::I16.decode(&[0x00, 0x80], &mut output);
        assert_eq!(output[0], -1.);

        SampleType::I24.decode(&[0x00, 0x00, 0x80], &mut output);
        assert_eq!(output[0], -1.);

        SampleType::I32.decode(&[0x00, 0x00, 0x00, 0x80], &mut output);
        assert_eq!(output[0], -1.);

        // +1.0 does not wrap around to the most negative value
        let mut bytes = [0u8; 3];
        SampleType::I24.encode(&[1.], &mut bytes);
        assert_eq!(bytes, [0xFF, 0xFF, 0x7F]);

        SampleType::I24.decode(&bytes, &mut output);
        assert!(output[0] > 0.99999 && output[0] < 1.);
    }

    #[test]
    fn encode_stops_on_short_buffer() {
        let mut bytes = [0u8; 5];
        assert_eq!(SampleType::IEEF32.encode(&[0.1, 0.2], &mut bytes), 4);
    }

    #[test]
    fn format_serde_rejects_invalid_sample_rate() {
        let mut buf = [0u8; 32];
        let encoded = postcard::to_slice(&-1f64, &mut buf).unwrap();
        assert!(postcard::from_bytes::<SampleRate>(encoded).is_err());
    }
}
