//! Variable-ratio sample rate conversion.

/// Headroom of the internal buffer, in blocks.
const SPACE: f64 = 4.;

/// A linearly-interpolating resampler whose ratio may change at any time.
///
/// Interleaved input is written at an integer cursor, and read back at a fractional one
/// advancing by `1 / ratio` input frames per output frame. A balance counter tracks how
/// much input has not been consumed yet, so that reads never overtake writes, even as the
/// ratio changes.
#[derive(Debug, Clone, Default)]
pub struct DynamicResampler {
    buffer: Box<[f32]>,
    channels: usize,
    /// In frames.
    read_pos: f64,
    /// In samples.
    write_pos: usize,
    /// Unconsumed input, in samples.
    balance: f64,
    ratio: f64,
}

impl DynamicResampler {
    /// Allocates the internal buffer, sized for blocks of `n_from` input frames and
    /// `n_to` output frames, and clears it.
    ///
    /// The ratio is reset to 1.
    pub fn setup(&mut self, n_from: usize, n_to: usize, sr_from: f64, sr_to: f64, channels: usize) {
        let channels = channels.max(1);
        let ratio = if sr_from > 0. { (sr_to / sr_from).max(1.) } else { 1. };
        let frames = (n_from.max(n_to) as f64 * ratio * SPACE).ceil() as usize;

        self.buffer = vec![0.; frames.max(2) * channels].into_boxed_slice();
        self.channels = channels;
        self.clear();
    }

    /// Discards all buffered input and resets the ratio to 1.
    pub fn clear(&mut self) {
        self.read_pos = 0.;
        self.write_pos = 0;
        self.balance = 0.;
        self.ratio = 1.;
    }

    /// Sets the conversion ratio from the input and output sample rates.
    ///
    /// Non-positive or non-finite rates are ignored.
    pub fn update(&mut self, sr_from: f64, sr_to: f64) {
        if sr_from == sr_to {
            self.ratio = 1.;
        } else {
            let ratio = sr_to / sr_from;
            if ratio.is_finite() && ratio > 0. {
                self.ratio = ratio;
            }
        }
    }

    #[inline(always)]
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    #[inline(always)]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Total size of the internal buffer, in samples.
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Number of input samples written but not yet consumed.
    ///
    /// Rounded up, a partially consumed frame still occupies its slot.
    #[inline(always)]
    pub fn occupied(&self) -> usize {
        ((self.balance - 1e-9).ceil().max(0.) as usize).min(self.capacity())
    }

    /// Number of input samples that can currently be written.
    #[inline(always)]
    pub fn write_available(&self) -> usize {
        self.capacity() - self.occupied()
    }

    /// Appends interleaved samples, returns how many were written.
    ///
    /// Writes are truncated to [`write_available`](Self::write_available), and to a whole
    /// number of frames.
    pub fn write(&mut self, data: &[f32]) -> usize {
        if self.channels == 0 {
            return 0;
        }

        let n = data.len().min(self.write_available());
        let n = n - n % self.channels;

        let size = self.buffer.len();
        let n1 = n.min(size - self.write_pos);

        self.buffer[self.write_pos..self.write_pos + n1].copy_from_slice(&data[..n1]);
        self.buffer[..n - n1].copy_from_slice(&data[n1..n]);

        self.write_pos = (self.write_pos + n) % size;
        self.balance += n as f64;

        n
    }

    #[inline(always)]
    fn interpolating(&self) -> bool {
        self.ratio != 1. || self.read_pos.fract() != 0.
    }

    /// Number of output samples that can currently be read.
    pub fn read_available(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }

        let frames = self.balance / self.channels as f64;

        let available = if self.interpolating() {
            // keep one frame of look-ahead for the interpolation
            ((frames - 1.) * self.ratio).floor()
        } else {
            frames.floor()
        };

        available.max(0.) as usize * self.channels
    }

    /// Fills `out` with resampled, interleaved samples.
    ///
    /// Returns `false`, reading nothing, if `out` is larger than
    /// [`read_available`](Self::read_available) or not a whole number of frames.
    pub fn read(&mut self, out: &mut [f32]) -> bool {
        let n = out.len();

        if n == 0 {
            return true;
        }

        if n % self.channels.max(1) != 0 || n > self.read_available() {
            return false;
        }

        let channels = self.channels;
        let size = self.buffer.len();
        let limit = (size / channels) as f64;

        if self.interpolating() {
            let incr = self.ratio.recip();

            for frame in out.chunks_exact_mut(channels) {
                let index = self.read_pos as usize;
                let fract = (self.read_pos - index as f64) as f32;

                let a = index * channels;
                let b = (a + channels) % size;

                for (ch, dest) in frame.iter_mut().enumerate() {
                    let (a, b) = (self.buffer[a + ch], self.buffer[b + ch]);
                    *dest = a + (b - a) * fract;
                }

                self.read_pos += incr;
                if self.read_pos >= limit {
                    self.read_pos -= limit;
                }
            }

            self.balance -= n as f64 * incr;
        } else {
            let pos = self.read_pos as usize * channels;
            let n1 = n.min(size - pos);

            out[..n1].copy_from_slice(&self.buffer[pos..pos + n1]);
            out[n1..].copy_from_slice(&self.buffer[..n - n1]);

            self.read_pos = ((pos + n) % size / channels) as f64;
            self.balance -= n as f64;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ramp(start: usize, frames: usize, channels: usize) -> Vec<f32> {
        (start..start + frames)
            .flat_map(|i| (0..channels).map(move |ch| (i * 10 + ch) as f32))
            .collect()
    }

    #[test]
    fn sizing() {
        let mut r = DynamicResampler::default();
        r.setup(64, 128, 44100., 48000., 2);
        // ceil(128 * 48000 / 44100 * 4) = 558 frames
        assert_eq!(r.capacity(), 558 * 2);
        assert_eq!(r.write_available(), r.capacity());
        assert_eq!(r.read_available(), 0);
    }

    #[test]
    fn unit_ratio_copies_exactly() {
        let mut r = DynamicResampler::default();
        r.setup(4, 4, 48000., 48000., 2);
        r.update(48000., 48000.);

        let mut expected = Vec::new();
        let mut got = Vec::new();

        // several laps around the ring
        for i in 0..20 {
            let input = ramp(i * 4, 4, 2);
            assert_eq!(r.write(&input), 8);
            expected.extend_from_slice(&input);

            assert_eq!(r.read_available(), 8);
            let mut out = [0.; 8];
            assert!(r.read(&mut out));
            got.extend_from_slice(&out);
        }

        assert_eq!(got, expected);
        assert_eq!(r.occupied(), 0);
    }

    #[test]
    fn upsampling_interpolates_linearly() {
        let mut r = DynamicResampler::default();
        r.setup(8, 16, 24000., 48000., 1);
        r.update(24000., 48000.);

        r.write(&[0., 2., 4., 6., 8.]);
        // 4 frames of look-ahead-safe input, read at twice the rate
        assert_eq!(r.read_available(), 8);

        let mut out = [0.; 8];
        assert!(r.read(&mut out));
        assert_eq!(out, [0., 1., 2., 3., 4., 5., 6., 7.]);
        assert_eq!(r.occupied(), 1);
    }

    #[test]
    fn downsampling_skips_frames() {
        let mut r = DynamicResampler::default();
        r.setup(16, 8, 48000., 24000., 1);
        r.update(48000., 24000.);

        let input: Vec<f32> = (0..9).map(|i| i as f32).collect();
        r.write(&input);
        assert_eq!(r.read_available(), 4);

        let mut out = [0.; 4];
        assert!(r.read(&mut out));
        assert_eq!(out, [0., 2., 4., 6.]);
    }

    #[test]
    fn reads_beyond_availability_are_rejected() {
        let mut r = DynamicResampler::default();
        r.setup(4, 4, 48000., 48000., 2);

        r.write(&ramp(0, 2, 2));
        let mut out = [0.; 6];
        assert!(!r.read(&mut out));
        assert!(!r.read(&mut out[..3]));
        assert_eq!(r.occupied(), 4);
    }

    #[test]
    fn writes_truncate_to_whole_frames() {
        let mut r = DynamicResampler::default();
        r.setup(1, 1, 48000., 48000., 3);
        assert_eq!(r.capacity(), 12);

        assert_eq!(r.write(&[0.; 5]), 3);
        assert_eq!(r.write(&[0.; 20]), 9);
        assert_eq!(r.write_available(), 0);
        assert_eq!(r.write(&[0.; 3]), 0);
    }

    proptest! {
        #[test]
        fn write_available_plus_occupied_is_capacity(
            channels in 1usize..4,
            ops in proptest::collection::vec((any::<bool>(), 0usize..64, 0.5f64..2.), 1..200),
        ) {
            let mut r = DynamicResampler::default();
            r.setup(16, 16, 48000., 48000., channels);

            for (write, frames, ratio) in ops {
                if write {
                    let n = (frames * channels).min(r.write_available());
                    r.write(&vec![0.5; n]);
                } else {
                    r.update(48000., 48000. * ratio);
                    let n = (frames * channels).min(r.read_available());
                    let n = n - n % channels;
                    prop_assert!(r.read(&mut vec![0.; n]));
                    prop_assert!(r.balance >= -1e-6);
                }

                prop_assert_eq!(r.write_available() + r.occupied(), r.capacity());
            }
        }

        #[test]
        fn read_cursor_never_overtakes_writes(
            ratios in proptest::collection::vec(0.25f64..4., 1..100),
        ) {
            let mut r = DynamicResampler::default();
            r.setup(8, 8, 48000., 48000., 1);

            let mut written = 0usize;
            let mut next = 0.;

            for ratio in ratios {
                let input: Vec<f32> = (written..written + 8).map(|i| i as f32).collect();
                written += r.write(&input);

                r.update(1., ratio);
                let mut out = vec![0.; r.read_available()];
                prop_assert!(r.read(&mut out));

                // a ramp interpolates to its read position, which only ever moves forward
                // through data that has been written
                for &v in &out {
                    prop_assert!(v >= next - 1e-3);
                    prop_assert!((v as usize) < written);
                    next = v;
                }
            }
        }
    }
}
