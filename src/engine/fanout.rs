//! Per-subscriber decimation and window averaging.
//!
//! Each active subscriber folds device samples into a window of `step`
//! samples, where `step = max(1, floor(device_rate / subscriber_rate))`.
//! When the window closes, batchable channels report the weighted average
//! of the window and no-batch channels (timestamps, counters) report the
//! value of the closing sample.

use std::collections::{BTreeMap, BTreeSet};

use iio_core::{DeviceDescriptor, IioSample, FREQUENCY_EPSILON};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Weighting of the samples in a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowAverage {
    /// The `n`-th sample of a window weighs `n`: recent samples dominate
    #[default]
    Triangular,
    /// Every sample weighs 1
    Uniform,
}

impl WindowAverage {
    /// Contribution of `value` at 1-based window position `size`.
    fn weight(self, value: i128, size: i128) -> i128 {
        match self {
            Self::Triangular => value * size,
            Self::Uniform => value,
        }
    }

    /// Sum of a channel enabled at position `size`, as if it had read
    /// `value` since the window opened.
    fn backfill(self, value: i128, size: i128) -> i128 {
        match self {
            Self::Triangular => value * size * (size - 1) / 2,
            Self::Uniform => value * (size - 1),
        }
    }

    /// Total weight of a window of `size` samples.
    fn denominator(self, size: i128) -> i128 {
        match self {
            Self::Triangular => size * (size + 1) / 2,
            Self::Uniform => size,
        }
    }
}

/// Decimation state of one active subscriber.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Window {
    /// Device sample counter value at which the current window opened
    pub sample_index: u64,
    /// Weighted sums of batchable channels
    pub sums: BTreeMap<i32, i128>,
}

impl Window {
    pub fn opening_at(sample_index: u64) -> Self {
        Self {
            sample_index,
            sums: BTreeMap::new(),
        }
    }
}

/// Number of device samples folded into one subscriber sample.
pub(crate) fn step(device_frequency: f64, frequency: f64) -> u64 {
    if frequency < FREQUENCY_EPSILON {
        return 1;
    }
    let ratio = (device_frequency / frequency).floor();
    if ratio.is_finite() && ratio >= 1.0 {
        ratio as u64
    } else {
        1
    }
}

/// Fold device sample `k` into `window`.
///
/// Returns the subscriber's output when the window closes with this sample;
/// the window then reopens at `k + 1`.
pub(crate) fn fold(
    window: &mut Window,
    channels: &BTreeSet<i32>,
    descriptor: &DeviceDescriptor,
    sample: &IioSample,
    k: u64,
    step: u64,
    average: WindowAverage,
) -> Option<IioSample> {
    let size = i128::from(k.saturating_sub(window.sample_index) + 1);

    for &channel in channels {
        if descriptor.is_no_batch(channel) {
            continue;
        }
        let Some(&value) = sample.get(&channel) else {
            continue;
        };
        let value = i128::from(value);
        let sum = window
            .sums
            .entry(channel)
            .or_insert_with(|| average.backfill(value, size));
        *sum += average.weight(value, size);
    }

    if window.sample_index + step - 1 > k {
        return None;
    }

    let mut output = IioSample::new();
    for &channel in channels {
        let value = if descriptor.is_no_batch(channel) {
            sample.get(&channel).copied()
        } else {
            window
                .sums
                .get(&channel)
                .map(|sum| (sum / average.denominator(size)) as i64)
        };
        match value {
            Some(value) => {
                output.insert(channel, value);
            }
            None => debug!(channel, sample = k, "Channel missing from device sample"),
        }
    }

    window.sample_index = k + 1;
    window.sums.clear();
    Some(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use iio_core::{ChannelSpec, SamplingMode, ScanType};

    fn accel() -> DeviceDescriptor {
        DeviceDescriptor::new(
            vec![
                ChannelSpec::new(0, "accel_x", ScanType::new(true, 16)),
                ChannelSpec::new(1, "accel_y", ScanType::new(true, 16)),
                ChannelSpec::new(2, "accel_z", ScanType::new(true, 16)),
                ChannelSpec::new(3, "timestamp", ScanType::new(true, 64)),
            ],
            SamplingMode::Fifo,
        )
    }

    fn sample(k: u64) -> IioSample {
        let k = k as i64;
        IioSample::from([(0, 100 * k), (1, 100 * k + 1), (2, 100 * k + 2), (3, 1_000_000 + k)])
    }

    fn run(
        channels: &[i32],
        step: u64,
        average: WindowAverage,
        samples: std::ops::Range<u64>,
    ) -> Vec<IioSample> {
        let descriptor = accel();
        let channels: BTreeSet<i32> = channels.iter().copied().collect();
        let mut window = Window::opening_at(samples.start);
        samples
            .filter_map(|k| fold(&mut window, &channels, &descriptor, &sample(k), k, step, average))
            .collect()
    }

    #[test]
    fn test_step() {
        assert_eq!(step(10.0, 10.0), 1);
        assert_eq!(step(40.0, 10.0), 4);
        assert_eq!(step(40.0, 15.0), 2);
        assert_eq!(step(10.0, 40.0), 1);
        assert_eq!(step(0.0, 10.0), 1);
        assert_eq!(step(40.0, 0.0), 1);
    }

    #[test]
    fn test_step_one_passes_samples_through() {
        let out = run(&[0, 2, 3], 1, WindowAverage::Triangular, 0..100);
        assert_eq!(out.len(), 100);
        for (k, s) in out.iter().enumerate() {
            let k = k as i64;
            assert_eq!(s, &IioSample::from([(0, 100 * k), (2, 100 * k + 2), (3, 1_000_000 + k)]));
        }
    }

    #[test]
    fn test_triangular_window_of_four() {
        let out = run(&[0, 3], 4, WindowAverage::Triangular, 0..100);
        assert_eq!(out.len(), 25);
        for (j, s) in out.iter().enumerate() {
            let j = j as i64;
            // (0*1 + 100*2 + 200*3 + 300*4) / 10 above the window base
            assert_eq!(s[&0], 100 * (4 * j) + 200);
            assert_eq!(s[&3], 1_000_000 + 4 * j + 3);
            assert_eq!(s.len(), 2);
        }
    }

    #[test]
    fn test_uniform_window_of_four() {
        let out = run(&[0, 3], 4, WindowAverage::Uniform, 0..100);
        assert_eq!(out.len(), 25);
        for (j, s) in out.iter().enumerate() {
            let j = j as i64;
            assert_eq!(s[&0], 100 * (4 * j) + 150);
            assert_eq!(s[&3], 1_000_000 + 4 * j + 3);
        }
    }

    #[test]
    fn test_backfill_reports_current_value_for_constant_channel() {
        let descriptor = accel();
        let mut channels = BTreeSet::from([0]);
        let mut window = Window::opening_at(0);

        // Two samples into a window of four, then enable channel 1
        for k in 0..2 {
            assert!(fold(&mut window, &channels, &descriptor, &sample(k), k, 4, WindowAverage::Triangular).is_none());
        }
        channels.insert(1);
        let constant = IioSample::from([(0, 200), (1, 77), (3, 1_000_002)]);
        assert!(fold(&mut window, &channels, &descriptor, &constant, 2, 4, WindowAverage::Triangular).is_none());
        let closing = IioSample::from([(0, 300), (1, 77), (3, 1_000_003)]);
        let out = fold(&mut window, &channels, &descriptor, &closing, 3, 4, WindowAverage::Triangular).unwrap();

        assert_eq!(out[&1], 77);
        assert_eq!(out[&0], 200);
        assert_eq!(window.sample_index, 4);
        assert!(window.sums.is_empty());
    }

    #[test]
    fn test_reenabled_channel_restarts_from_current_value() {
        let descriptor = accel();
        let avg = WindowAverage::Triangular;
        let mut channels = BTreeSet::from([0, 1]);
        let mut window = Window::opening_at(0);
        for k in 0..2 {
            assert!(fold(&mut window, &channels, &descriptor, &sample(k), k, 4, avg).is_none());
        }

        // Disable then re-enable channel 1 before sample 2
        channels.remove(&1);
        window.sums.remove(&1);
        channels.insert(1);

        assert!(fold(&mut window, &channels, &descriptor, &sample(2), 2, 4, avg).is_none());
        let out = fold(&mut window, &channels, &descriptor, &sample(3), 3, 4, avg).unwrap();

        // Channel 1 reads as 201 for the first three positions: (201*6 + 301*4) / 10
        assert_eq!(out, IioSample::from([(0, 200), (1, 241)]));
    }

    #[test]
    fn test_missing_channel_is_skipped() {
        let descriptor = accel();
        let channels = BTreeSet::from([0, 1, 3]);
        let mut window = Window::opening_at(0);
        let partial = IioSample::from([(0, 5), (3, 9)]);

        let out = fold(&mut window, &channels, &descriptor, &partial, 0, 1, WindowAverage::Triangular).unwrap();
        assert_eq!(out, IioSample::from([(0, 5), (3, 9)]));
    }

    #[test]
    fn test_average_stays_within_window_bounds() {
        let descriptor = accel();
        let channels = BTreeSet::from([0]);
        let values = [-40i64, 900, 13, -7, 250, 0, 61];
        for average in [WindowAverage::Triangular, WindowAverage::Uniform] {
            let mut window = Window::opening_at(0);
            let step = values.len() as u64;
            let mut out = None;
            for (k, v) in values.iter().enumerate() {
                let s = IioSample::from([(0, *v)]);
                out = fold(&mut window, &channels, &descriptor, &s, k as u64, step, average);
            }
            let value = out.unwrap()[&0];
            assert!((-40..=900).contains(&value), "{average:?} gave {value}");
        }
    }
}
