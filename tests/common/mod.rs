//! Shared fixtures for engine tests.
#![allow(dead_code)]

use std::time::Duration;

use iio_core::IioSample;
use iio_driver_mock::{MockDeviceHandle, MockIioDevice};
use iio_service::{
    channel_sink, EngineConfig, EngineHandle, ObserverError, SamplesEngine, SinkEvent,
    SinkReceiver, SubscriberSpec, WindowAverage,
};

pub const WAIT: Duration = Duration::from_secs(5);

/// Accelerometer engine on the current runtime.
pub fn accelerometer_engine() -> (EngineHandle, MockDeviceHandle) {
    engine_with(WindowAverage::Triangular)
}

pub fn engine_with(window_average: WindowAverage) -> (EngineHandle, MockDeviceHandle) {
    let (device, mock) = MockIioDevice::accelerometer();
    let engine = SamplesEngine::builder(device)
        .config(EngineConfig {
            window_average,
            ..EngineConfig::default()
        })
        .build()
        .unwrap();
    (EngineHandle::spawn(engine), mock)
}

/// Spec with a fresh channel sink.
pub fn spec(frequency: f64, channels: &[i32]) -> (SubscriberSpec, SinkReceiver) {
    let (sink, rx) = channel_sink();
    let spec = SubscriberSpec::new(sink)
        .frequency(frequency)
        .channels(channels.iter().copied());
    (spec, rx)
}

pub async fn next_event(rx: &mut SinkReceiver) -> SinkEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("no event in time")
        .expect("sink closed")
}

/// Collect `n` samples, failing on any error in between.
pub async fn samples(rx: &mut SinkReceiver, n: usize) -> Vec<IioSample> {
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        match next_event(rx).await {
            SinkEvent::Sample(sample) => out.push(sample),
            SinkEvent::Error(e) => panic!("unexpected error {e:?} after {} samples", out.len()),
        }
    }
    out
}

/// Collect events until `n` samples have arrived; returns the errors seen
/// on the way and the samples.
pub async fn samples_and_errors(
    rx: &mut SinkReceiver,
    n: usize,
) -> (Vec<ObserverError>, Vec<IioSample>) {
    let mut errors = Vec::new();
    let mut out = Vec::new();
    while out.len() < n {
        match next_event(rx).await {
            SinkEvent::Sample(sample) => out.push(sample),
            SinkEvent::Error(e) => errors.push(e),
        }
    }
    (errors, out)
}

pub fn sample_of(values: &[(i32, i64)]) -> IioSample {
    values.iter().copied().collect()
}
