//! Delay-locked loop estimating the real sample rate of an audio device.
//!
//! Follows F. Adriaensen's "Using a DLL to filter time": a second-order loop is fed the
//! time at which each period (block) of audio is processed, and smoothes out scheduling
//! jitter to recover the period the device actually runs at. Comparing that with the
//! nominal period yields the clock drift between two devices.

use core::{f64::consts::TAU, fmt};

/// Default loop bandwidth, relative to the update rate.
pub const DEFAULT_BANDWIDTH: f64 = 0.012;

/// Errors reported by [`TimeDll`]. State is left untouched whenever one is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DllError {
    /// Non-positive or non-finite setup parameters.
    InvalidParameters,
    /// The time elapsed since the previous update is zero, negative, or not finite.
    InvalidInterval,
    /// Applying the update would produce a non-positive period.
    Unstable,
}

impl fmt::Display for DllError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InvalidParameters => "invalid DLL parameters",
            Self::InvalidInterval => "non-positive time interval",
            Self::Unstable => "update would produce a non-positive period",
        })
    }
}

impl std::error::Error for DllError {}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeDll {
    b: f64,
    c: f64,
    /// Filtered period estimate.
    e2: f64,
    t0: f64,
    t1: f64,
    last: f64,
    nominal_rate: f64,
    period_frames: f64,
    locked: bool,
}

impl Default for TimeDll {
    fn default() -> Self {
        Self {
            b: 0.,
            c: 0.,
            e2: 0.,
            t0: 0.,
            t1: 0.,
            last: 0.,
            nominal_rate: 0.,
            period_frames: 0.,
            locked: false,
        }
    }
}

impl TimeDll {
    /// (Re)initializes the loop.
    ///
    /// `t` is the time (in seconds) at which the first period starts, `period_frames`
    /// the number of frames processed between two updates.
    pub fn setup(
        &mut self,
        sample_rate: f64,
        period_frames: usize,
        bandwidth: f64,
        t: f64,
    ) -> Result<(), DllError> {
        let valid = sample_rate.is_finite()
            && sample_rate > 0.
            && period_frames > 0
            && bandwidth.is_finite()
            && bandwidth > 0.
            && t.is_finite();

        if !valid {
            return Err(DllError::InvalidParameters);
        }

        let omega = TAU * bandwidth;
        let period = period_frames as f64 / sample_rate;

        *self = Self {
            b: core::f64::consts::SQRT_2 * omega,
            c: omega * omega,
            e2: period,
            t0: t,
            t1: t + period,
            last: t,
            nominal_rate: sample_rate,
            period_frames: period_frames as f64,
            locked: false,
        };

        Ok(())
    }

    /// Feeds the time (in seconds) at which the current period was processed.
    pub fn update(&mut self, t: f64) -> Result<(), DllError> {
        let interval = t - self.last;

        if !(interval.is_finite() && interval > 0.) {
            return Err(DllError::InvalidInterval);
        }

        let e = t - self.t1;
        let step = self.b * e + self.e2;
        let e2 = self.e2 + self.c * e;

        if !(step.is_finite() && step > 0. && e2 > 0.) {
            return Err(DllError::Unstable);
        }

        self.t0 = self.t1;
        self.t1 += step;
        self.e2 = e2;
        self.last = t;
        self.locked = true;

        Ok(())
    }

    /// Returns the current estimate of the period length, in seconds.
    #[inline(always)]
    pub fn period(&self) -> f64 {
        self.t1 - self.t0
    }

    /// Returns the estimated sample rate.
    ///
    /// Exactly the nominal rate until the first accepted update.
    #[inline(always)]
    pub fn sample_rate(&self) -> f64 {
        if self.locked {
            self.period_frames / self.period()
        } else {
            self.nominal_rate
        }
    }

    #[inline(always)]
    pub fn nominal_sample_rate(&self) -> f64 {
        self.nominal_rate
    }

    /// Ratio between the estimated and nominal sample rates.
    #[inline(always)]
    pub fn rate_ratio(&self) -> f64 {
        self.sample_rate() / self.nominal_rate
    }
}
