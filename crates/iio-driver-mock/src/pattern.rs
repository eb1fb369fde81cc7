//! Canned sample streams.

use iio_core::IioSample;

/// Base of the timestamp channel in [`accel_sample`].
pub const TIMESTAMP_BASE: i64 = 1_000_000;

/// Sample `k` of the accelerometer stream: axis `i` reads `100 * k + i`,
/// the timestamp (channel 3) reads `1_000_000 + k`.
pub fn accel_sample(k: u64) -> IioSample {
    let k = k as i64;
    let mut sample: IioSample = (0..3).map(|i| (i, 100 * k + i64::from(i))).collect();
    sample.insert(3, TIMESTAMP_BASE + k);
    sample
}

/// The first `n` samples of the accelerometer stream.
pub fn accel_stream(n: u64) -> impl Iterator<Item = IioSample> {
    (0..n).map(accel_sample)
}

/// Samples `start..end` of the accelerometer stream.
pub fn accel_range(start: u64, end: u64) -> impl Iterator<Item = IioSample> {
    (start..end).map(accel_sample)
}
