//! NTP-style time tags.

use core::{ops, time::Duration};

/// Seconds between the NTP epoch (1900) and the UNIX epoch (1970).
pub const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

const FRACTION_SCALE: f64 = 4_294_967_296.; // 2^32

/// A 64-bit fixed-point timestamp: whole seconds plus a fraction in units of 2^-32 s.
///
/// Arithmetic wraps around, like the underlying 64-bit value.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeTag {
    pub seconds: u32,
    pub fraction: u32,
}

impl TimeTag {
    #[inline(always)]
    pub const fn new(seconds: u32, fraction: u32) -> Self {
        Self { seconds, fraction }
    }

    /// Returns the current system time, relative to the NTP epoch.
    pub fn now() -> Self {
        let since_unix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();

        let secs = since_unix.as_secs().wrapping_add(NTP_UNIX_OFFSET);
        let fraction = (u64::from(since_unix.subsec_nanos()) << 32) / 1_000_000_000;

        Self::new(secs as u32, fraction as u32)
    }

    #[inline(always)]
    pub const fn to_bits(self) -> u64 {
        ((self.seconds as u64) << 32) | self.fraction as u64
    }

    #[inline(always)]
    pub const fn from_bits(bits: u64) -> Self {
        Self::new((bits >> 32) as u32, bits as u32)
    }

    #[inline(always)]
    pub fn to_seconds(self) -> f64 {
        f64::from(self.seconds) + f64::from(self.fraction) / FRACTION_SCALE
    }

    /// Converts from seconds, truncating to the nearest representable tag below.
    ///
    /// Negative and non-finite values saturate.
    #[inline(always)]
    pub fn from_seconds(secs: f64) -> Self {
        let whole = secs.floor();
        let fraction = ((secs - whole) * FRACTION_SCALE) as u32;
        Self::new(whole as u32, fraction)
    }

    /// Returns the duration between `earlier` and `self`, in seconds.
    ///
    /// Negative if `earlier` is actually later.
    #[inline(always)]
    pub fn seconds_since(self, earlier: Self) -> f64 {
        let diff = self.to_bits().wrapping_sub(earlier.to_bits()) as i64;
        diff as f64 / FRACTION_SCALE
    }
}

impl ops::Add for TimeTag {
    type Output = Self;

    #[inline(always)]
    fn add(self, rhs: Self) -> Self {
        let (fraction, carry) = self.fraction.overflowing_add(rhs.fraction);
        let seconds = self
            .seconds
            .wrapping_add(rhs.seconds)
            .wrapping_add(u32::from(carry));
        Self::new(seconds, fraction)
    }
}

impl ops::Sub for TimeTag {
    type Output = Self;

    #[inline(always)]
    fn sub(self, rhs: Self) -> Self {
        let (fraction, borrow) = self.fraction.overflowing_sub(rhs.fraction);
        let seconds = self
            .seconds
            .wrapping_sub(rhs.seconds)
            .wrapping_sub(u32::from(borrow));
        Self::new(seconds, fraction)
    }
}

impl From<Duration> for TimeTag {
    #[inline(always)]
    fn from(d: Duration) -> Self {
        let fraction = (u64::from(d.subsec_nanos()) << 32) / 1_000_000_000;
        Self::new(d.as_secs() as u32, fraction as u32)
    }
}
