//! Control surface: subscriber lifecycle, clamping, channel sets, error
//! reporting and teardown.

mod common;

use common::*;
use iio_core::{attr, SamplingMode, ScanType};
use iio_driver_mock::pattern::{accel_sample, accel_stream};
use iio_driver_mock::{MockAttributes, MockIioDevice};
use iio_service::{
    EngineHandle, ObserverError, SamplesEngine, ServiceError, SinkEvent, SubscriberId,
};

#[tokio::test]
async fn test_set_frequency_returns_clamped_value() {
    let (engine, _mock) = accelerometer_engine();
    let (spec, _rx) = spec(10.0, &[0]);
    let id = engine.add_subscriber(spec).await.unwrap();

    for (requested, fixed) in [(0.5, 1.25), (100.0, 40.0), (12.5, 12.5), (0.0, 0.0)] {
        assert_eq!(engine.set_frequency(id, requested).await.unwrap(), fixed);
        assert_eq!(engine.frequency(id).await.unwrap(), fixed);
    }
}

#[tokio::test]
async fn test_add_then_remove_restores_device_frequency() {
    let (engine, mock) = accelerometer_engine();
    let (base, _base_rx) = spec(10.0, &[0]);
    engine.add_subscriber(base).await.unwrap();
    assert_eq!(mock.frequency(), Some(10.0));

    let (extra, _extra_rx) = spec(25.0, &[1]);
    let extra = engine.add_subscriber(extra).await.unwrap();
    assert_eq!(mock.frequency(), Some(25.0));
    assert_eq!(mock.fifo_timeout(), Some(0.04));

    engine.remove_subscriber(extra).await.unwrap();
    assert_eq!(mock.frequency(), Some(10.0));
}

#[tokio::test]
async fn test_enable_then_disable_restores_channel_set() {
    let (engine, _mock) = accelerometer_engine();
    let (spec, _rx) = spec(10.0, &[0]);
    let id = engine.add_subscriber(spec).await.unwrap();

    assert!(engine.set_channels_enabled(id, &[1, 2], true).await.unwrap().is_empty());
    assert_eq!(
        engine.get_channels_enabled(id, &[0, 1, 2, 3]).await.unwrap(),
        vec![true, true, true, false]
    );

    assert!(engine.set_channels_enabled(id, &[1, 2], false).await.unwrap().is_empty());
    assert_eq!(
        engine.get_channels_enabled(id, &[0, 1, 2, 3]).await.unwrap(),
        vec![true, false, false, false]
    );
}

#[tokio::test]
async fn test_zero_frequency_subscriber_gets_nothing() {
    let (engine, mock) = accelerometer_engine();
    let (spec, mut rx) = spec(0.0, &[0, 1]);
    engine.add_subscriber(spec).await.unwrap();
    assert_eq!(rx.drain(), vec![SinkEvent::Error(ObserverError::FrequencyInvalid)]);

    mock.push_samples(accel_stream(5));
    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.active_subscribers, 0);
    assert_eq!(stats.inactive_subscribers, 1);
    assert!(!stats.watching);
    assert_eq!(mock.reads_served(), 0);
    assert!(rx.drain().is_empty());
}

#[tokio::test]
async fn test_empty_channel_set_is_reported_and_inactive() {
    let (engine, mock) = accelerometer_engine();
    let (spec, mut rx) = spec(10.0, &[]);
    let id = engine.add_subscriber(spec).await.unwrap();
    assert_eq!(rx.drain(), vec![SinkEvent::Error(ObserverError::NoEnabledChannels)]);
    assert_eq!(mock.frequency(), Some(0.0));

    // Enabling nothing changes nothing
    assert!(engine.set_channels_enabled(id, &[], true).await.unwrap().is_empty());
    assert_eq!(engine.stats().await.unwrap().active_subscribers, 0);

    assert!(engine.set_channels_enabled(id, &[2], true).await.unwrap().is_empty());
    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.active_subscribers, 1);
    assert!(stats.watching);
    assert_eq!(mock.frequency(), Some(10.0));
}

#[tokio::test]
async fn test_unknown_channels_are_dropped_on_add() {
    let (engine, mock) = accelerometer_engine();
    let (spec, mut rx) = spec(40.0, &[0, 7]);
    let id = engine.add_subscriber(spec).await.unwrap();
    assert_eq!(engine.get_channels_enabled(id, &[0, 7]).await.unwrap(), vec![true, false]);

    mock.push_sample(accel_sample(3));
    assert_eq!(samples(&mut rx, 1).await[0], sample_of(&[(0, 300)]));
}

#[tokio::test]
async fn test_unavailable_channels_are_dropped_on_add() {
    let (engine, mock) = accelerometer_engine();
    mock.make_unopenable(1);
    let (spec, mut rx) = spec(40.0, &[0, 1]);
    let id = engine.add_subscriber(spec).await.unwrap();
    assert_eq!(engine.get_channels_enabled(id, &[0, 1]).await.unwrap(), vec![true, false]);

    mock.push_sample(accel_sample(0));
    assert_eq!(samples(&mut rx, 1).await[0], sample_of(&[(0, 0)]));
}

#[tokio::test]
async fn test_enable_reports_unavailable_channels() {
    let (engine, mock) = accelerometer_engine();
    mock.make_unopenable(1);
    let (spec, _rx) = spec(10.0, &[0]);
    let id = engine.add_subscriber(spec).await.unwrap();

    let failed = engine.set_channels_enabled(id, &[1, 2, 9], true).await.unwrap();
    assert_eq!(failed, vec![1, 9]);
    assert_eq!(
        engine.get_channels_enabled(id, &[1, 2, 9]).await.unwrap(),
        vec![false, true, false]
    );
}

#[tokio::test]
async fn test_disabled_channel_is_not_delivered() {
    let (engine, mock) = accelerometer_engine();
    let (spec, mut rx) = spec(40.0, &[0, 1, 2]);
    let id = engine.add_subscriber(spec).await.unwrap();

    mock.push_sample(accel_sample(0));
    assert_eq!(samples(&mut rx, 1).await[0].len(), 3);

    engine.set_channels_enabled(id, &[1], false).await.unwrap();
    mock.push_sample(accel_sample(1));
    assert_eq!(samples(&mut rx, 1).await[0], sample_of(&[(0, 100), (2, 102)]));
}

#[tokio::test]
async fn test_disabling_last_channel_deactivates() {
    let (engine, mock) = accelerometer_engine();
    let (spec, mut rx) = spec(10.0, &[0]);
    let id = engine.add_subscriber(spec).await.unwrap();
    assert!(mock.buffer_open());

    engine.set_channels_enabled(id, &[0], false).await.unwrap();
    assert_eq!(rx.drain(), vec![SinkEvent::Error(ObserverError::NoEnabledChannels)]);
    assert_eq!(mock.frequency(), Some(0.0));
    assert!(!mock.buffer_open());
    assert_eq!(engine.stats().await.unwrap().inactive_subscribers, 1);
}

#[tokio::test]
async fn test_frequency_change_moves_between_partitions() {
    let (engine, mock) = accelerometer_engine();
    let (spec, mut rx) = spec(10.0, &[0]);
    let id = engine.add_subscriber(spec).await.unwrap();

    engine.set_frequency(id, 0.0).await.unwrap();
    assert_eq!(rx.drain(), vec![SinkEvent::Error(ObserverError::FrequencyInvalid)]);
    assert_eq!(mock.frequency(), Some(0.0));
    assert!(!engine.stats().await.unwrap().watching);

    engine.set_frequency(id, 20.0).await.unwrap();
    assert_eq!(mock.frequency(), Some(20.0));
    assert_eq!(mock.buffer_opens(), 2);

    mock.push_sample(accel_sample(0));
    assert_eq!(samples(&mut rx, 1).await[0], sample_of(&[(0, 0)]));
}

#[tokio::test]
async fn test_duplicate_id_reports_already_started() {
    let (engine, mock) = accelerometer_engine();
    let id = SubscriberId::new(42);
    let (first, mut first_rx) = spec(10.0, &[0]);
    engine.add_subscriber_with_id(id, first).await.unwrap();
    let (second, mut second_rx) = spec(40.0, &[1]);
    engine.add_subscriber_with_id(id, second).await.unwrap();

    assert_eq!(second_rx.drain(), vec![SinkEvent::Error(ObserverError::AlreadyStarted)]);
    assert_eq!(mock.frequency(), Some(10.0));

    mock.push_sample(accel_sample(1));
    assert_eq!(samples(&mut first_rx, 1).await[0], sample_of(&[(0, 100)]));
}

#[tokio::test]
async fn test_unknown_subscriber_is_an_error() {
    let (engine, _mock) = accelerometer_engine();
    let ghost = SubscriberId::new(999);
    assert!(matches!(
        engine.remove_subscriber(ghost).await,
        Err(ServiceError::UnknownSubscriber(id)) if id == ghost
    ));
    assert!(matches!(
        engine.set_frequency(ghost, 10.0).await,
        Err(ServiceError::UnknownSubscriber(_))
    ));
    assert!(matches!(
        engine.set_timeout(ghost, 10).await,
        Err(ServiceError::UnknownSubscriber(_))
    ));
}

#[tokio::test]
async fn test_buffer_failure_is_reported_and_retried() {
    let (engine, mock) = accelerometer_engine();
    mock.fail_buffer_open(true);
    let (first, mut first_rx) = spec(10.0, &[0]);
    engine.add_subscriber(first).await.unwrap();
    assert_eq!(first_rx.drain(), vec![SinkEvent::Error(ObserverError::GetFdFailed)]);
    assert!(!engine.stats().await.unwrap().watching);

    mock.fail_buffer_open(false);
    let (second, mut second_rx) = spec(10.0, &[1]);
    engine.add_subscriber(second).await.unwrap();
    assert!(engine.stats().await.unwrap().watching);

    mock.push_sample(accel_sample(2));
    assert_eq!(samples(&mut first_rx, 1).await[0], sample_of(&[(0, 200)]));
    assert_eq!(samples(&mut second_rx, 1).await[0], sample_of(&[(1, 201)]));
}

#[tokio::test]
async fn test_fifo_frequency_write_is_lenient() {
    let (engine, mock) = accelerometer_engine();
    mock.attributes().fail_writes(attr::SAMPLING_FREQUENCY, true);
    let (spec, mut rx) = spec(10.0, &[0]);
    engine.add_subscriber(spec).await.unwrap();

    assert!(rx.drain().is_empty());
    // The device kept its old rate and reports it
    assert_eq!(engine.stats().await.unwrap().device_frequency, 0.0);
    assert!(mock.attributes().writes_to(attr::HWFIFO_TIMEOUT).is_empty());
}

#[tokio::test]
async fn test_fifo_timeout_write_failure_is_reported() {
    let (engine, mock) = accelerometer_engine();
    mock.attributes().fail_writes(attr::HWFIFO_TIMEOUT, true);
    let (spec, mut rx) = spec(10.0, &[0]);
    engine.add_subscriber(spec).await.unwrap();
    assert_eq!(rx.drain(), vec![SinkEvent::Error(ObserverError::SetFrequencyIoFailed)]);
}

#[tokio::test]
async fn test_effective_rate_drives_decimation() {
    let (engine, mock) = accelerometer_engine();
    mock.attributes()
        .set_effective_frequency(|f| if f > 0.0 { f * 2.0 } else { 0.0 });
    let (spec, mut rx) = spec(10.0, &[0]);
    engine.add_subscriber(spec).await.unwrap();

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.requested_frequency, 10.0);
    assert_eq!(stats.device_frequency, 20.0);
    assert_eq!(mock.fifo_timeout(), Some(0.05));

    mock.push_samples(accel_stream(6));
    let out = samples(&mut rx, 3).await;
    // Window of two: (1*200j + 2*(200j + 100)) / 3
    assert_eq!(out[0], sample_of(&[(0, 66)]));
    assert_eq!(out[1], sample_of(&[(0, 266)]));
    assert_eq!(out[2], sample_of(&[(0, 466)]));
}

fn trigger_device() -> (MockIioDevice, iio_driver_mock::MockDeviceHandle) {
    MockIioDevice::builder()
        .id(1)
        .name("gyro")
        .channel("anglvel_x", ScanType::new(true, 16))
        .channel("timestamp", ScanType::new(true, 64))
        .sampling_mode(SamplingMode::Trigger)
        .build()
}

#[tokio::test]
async fn test_trigger_device_requires_trigger() {
    let (device, _mock) = trigger_device();
    assert!(matches!(
        SamplesEngine::builder(device).build(),
        Err(ServiceError::TriggerRequired { device_id: 1 })
    ));
}

#[tokio::test]
async fn test_trigger_rate_follows_device_rate() {
    let (device, mock) = trigger_device();
    let trigger = MockAttributes::trigger("trigger2");
    let engine = EngineHandle::spawn(
        SamplesEngine::builder(device)
            .trigger(trigger.clone())
            .build()
            .unwrap(),
    );

    let (spec, mut rx) = spec(20.0, &[0, 1]);
    engine.add_subscriber(spec).await.unwrap();
    assert!(rx.drain().is_empty());
    assert_eq!(mock.frequency(), Some(20.0));
    assert_eq!(trigger.get_f64(attr::SAMPLING_FREQUENCY), Some(20.0));
    assert_eq!(mock.fifo_timeout(), None);
}

#[tokio::test]
async fn test_trigger_write_failure_is_reported() {
    let (device, mock) = trigger_device();
    let trigger = MockAttributes::trigger("trigger2");
    trigger.fail_writes(attr::SAMPLING_FREQUENCY, true);
    let engine = EngineHandle::spawn(SamplesEngine::builder(device).trigger(trigger).build().unwrap());

    let (spec, mut rx) = spec(20.0, &[0]);
    engine.add_subscriber(spec).await.unwrap();
    assert_eq!(rx.drain(), vec![SinkEvent::Error(ObserverError::SetFrequencyIoFailed)]);
    assert_eq!(mock.frequency(), Some(20.0));

    // Strict device write without a FIFO
    mock.attributes().fail_writes(attr::SAMPLING_FREQUENCY, true);
    let (other, mut other_rx) = common::spec(40.0, &[0]);
    engine.add_subscriber(other).await.unwrap();
    assert_eq!(other_rx.drain(), vec![SinkEvent::Error(ObserverError::SetFrequencyIoFailed)]);
    assert_eq!(rx.drain(), vec![SinkEvent::Error(ObserverError::SetFrequencyIoFailed)]);
}

#[tokio::test]
async fn test_missing_frequency_table_is_rejected() {
    let (device, _mock) = MockIioDevice::builder().frequencies_available(None).build();
    assert!(matches!(
        SamplesEngine::builder(device).build(),
        Err(ServiceError::Device(e)) if e.is_bad_device()
    ));
}

#[tokio::test]
async fn test_closed_sink_is_removed() {
    let (engine, mock) = accelerometer_engine();
    let (keep, mut keep_rx) = spec(10.0, &[0]);
    engine.add_subscriber(keep).await.unwrap();
    let (gone, gone_rx) = spec(40.0, &[0]);
    engine.add_subscriber(gone).await.unwrap();
    assert_eq!(mock.frequency(), Some(40.0));
    drop(gone_rx);

    mock.push_samples(accel_stream(4));
    samples(&mut keep_rx, 1).await;

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.active_subscribers, 1);
    assert_eq!(stats.inactive_subscribers, 0);
    assert_eq!(mock.frequency(), Some(10.0));
}

#[tokio::test]
async fn test_shutdown_stops_device() {
    let (engine, mock) = accelerometer_engine();
    let (spec, mut rx) = spec(10.0, &[0]);
    let id = engine.add_subscriber(spec).await.unwrap();
    assert!(mock.buffer_open());

    engine.shutdown().await.unwrap();
    assert_eq!(mock.frequency(), Some(0.0));
    assert!(!mock.buffer_open());
    assert_eq!(mock.buffer_releases(), 1);
    // The sink was dropped with the engine
    assert_eq!(tokio::time::timeout(WAIT, rx.recv()).await.unwrap(), None);

    assert!(matches!(engine.frequency(id).await, Err(ServiceError::EngineClosed)));
}

#[test]
fn test_dropped_runtime_stops_device() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let (engine, mock, _rx) = runtime.block_on(async {
        let (engine, mock) = accelerometer_engine();
        let (spec, rx) = spec(10.0, &[0]);
        engine.add_subscriber(spec).await.unwrap();
        (engine, mock, rx)
    });
    assert_eq!(mock.frequency(), Some(10.0));
    assert!(mock.buffer_open());

    // The engine task is dropped without ever seeing a shutdown command
    drop(runtime);
    assert_eq!(mock.frequency(), Some(0.0));
    assert!(!mock.buffer_open());
    assert_eq!(mock.buffer_releases(), 1);
    drop(engine);
}

#[test]
fn test_engine_on_dedicated_thread() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let (device, mock) = MockIioDevice::accelerometer();
    let engine = SamplesEngine::builder(device).build().unwrap();
    let (engine, thread) = EngineHandle::spawn_on_thread(engine, "iio-engine-test").unwrap();

    runtime.block_on(async {
        let (spec, mut rx) = spec(40.0, &[0, 3]);
        engine.add_subscriber(spec).await.unwrap();
        mock.push_samples(accel_stream(3));
        let out = samples(&mut rx, 3).await;
        assert_eq!(out[2], sample_of(&[(0, 200), (3, 1_000_002)]));
        engine.shutdown().await.unwrap();
    });
    thread.join().unwrap();
}
