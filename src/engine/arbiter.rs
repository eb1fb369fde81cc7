//! Device-wide sampling rate arbitration.
//!
//! The device runs at the highest rate any active subscriber asked for.
//! The arbiter only does the bookkeeping; the engine programs the device
//! whenever [`FrequencyArbiter::add`] or [`FrequencyArbiter::remove`]
//! reports a new target.

use iio_core::FrequencyBand;
use tracing::warn;

#[derive(Debug, Clone)]
pub(crate) struct FrequencyArbiter {
    band: FrequencyBand,
    /// Multiset of active subscribers' clamped rates
    frequencies: Vec<f64>,
    requested: f64,
    effective: f64,
}

impl FrequencyArbiter {
    pub fn new(band: FrequencyBand) -> Self {
        Self {
            band,
            frequencies: Vec::new(),
            requested: 0.0,
            effective: 0.0,
        }
    }

    #[cfg(test)]
    pub fn band(&self) -> FrequencyBand {
        self.band
    }

    pub fn fix(&self, frequency: f64) -> f64 {
        self.band.fix(frequency)
    }

    /// Insert a rate; returns the new device target if it changed.
    pub fn add(&mut self, frequency: f64) -> Option<f64> {
        self.frequencies.push(frequency);
        self.retarget()
    }

    /// Remove one occurrence of a rate; returns the new device target if it
    /// changed.
    pub fn remove(&mut self, frequency: f64) -> Option<f64> {
        match self.frequencies.iter().position(|f| *f == frequency) {
            Some(pos) => {
                self.frequencies.swap_remove(pos);
            }
            None => warn!(frequency, "Removing a frequency that was never added"),
        }
        self.retarget()
    }

    fn retarget(&mut self) -> Option<f64> {
        let max = self.frequencies.iter().copied().fold(0.0, f64::max);
        if max == self.requested {
            None
        } else {
            self.requested = max;
            Some(max)
        }
    }

    /// Rate last asked of the device.
    pub fn requested(&self) -> f64 {
        self.requested
    }

    /// Rate the device reported running at.
    pub fn effective(&self) -> f64 {
        self.effective
    }

    pub fn set_effective(&mut self, frequency: f64) {
        self.effective = frequency;
    }
}
