//! The sample fan-out engine.
//!
//! One [`SamplesEngine`] drives one IIO device on behalf of any number of
//! subscribers. It runs as a single task that owns all of its state; every
//! other context talks to it through an [`EngineHandle`], which posts
//! [`EngineCommand`]s and awaits their replies.
//!
//! # Task loop
//!
//! ```text
//!   EngineHandle ──commands──┐
//!   Watchdog ──timeouts──────┤
//!                            ▼
//!                 ┌──────────────────────┐      read_next_sample()
//!                 │  select! (biased)    │◄──── (only while watching)
//!                 └──────────┬───────────┘
//!                            │ one sample at a time
//!                            ▼
//!                 fold into every active window
//!                            │
//!              ┌─────────────┼─────────────┐
//!              ▼             ▼             ▼
//!            sink A        sink B        sink C
//! ```
//!
//! Commands are polled first, so a mutation that arrives while the task
//! waits on the device is applied before the next sample is processed.
//!
//! # Example
//!
//! ```no_run
//! use iio_driver_sysfs::SysfsContext;
//! use iio_service::{channel_sink, EngineHandle, SamplesEngine, SubscriberSpec};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let context = SysfsContext::system();
//! let device = context.open_device(0, 1)?;
//! let engine = SamplesEngine::builder(device).build()?;
//! let handle = EngineHandle::spawn(engine);
//!
//! let (sink, mut events) = channel_sink();
//! let id = handle
//!     .add_subscriber(SubscriberSpec::new(sink).frequency(10.0).channels([0, 1, 2]))
//!     .await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! handle.remove_subscriber(id).await?;
//! # Ok(())
//! # }
//! ```

mod arbiter;
mod commands;
mod fanout;
mod handle;
mod registry;
mod throttle;
mod watchdog;

use std::collections::BTreeSet;

use iio_core::{attr, Attributes, IioDevice, IioSample, FREQUENCY_EPSILON};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{ObserverError, ServiceError, ServiceResult};

use arbiter::FrequencyArbiter;
pub(crate) use commands::EngineCommand;
pub use fanout::WindowAverage;
pub use handle::EngineHandle;
use registry::{ClientRegistry, Subscriber};
pub use registry::{SubscriberId, SubscriberSpec};
pub use throttle::{RECOVER_AFTER, SUPPRESS_AFTER};
use throttle::ErrorThrottle;
use watchdog::Watchdog;

/// Point-in-time view of an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStats {
    /// Highest clamped rate among active subscribers
    pub requested_frequency: f64,
    /// Rate the device reported after the last reprogramming
    pub device_frequency: f64,
    /// Subscribers receiving samples
    pub active_subscribers: usize,
    /// Registered subscribers that are parked
    pub inactive_subscribers: usize,
    /// Successful device reads since start
    pub samples_read: u64,
    /// Failed device reads since start
    pub read_failures: u64,
    /// Whether the device buffer is being read
    pub watching: bool,
}

/// Fan-out engine bound to one device.
///
/// Built with [`SamplesEngine::builder`] and started with
/// [`EngineHandle::spawn`] or [`EngineHandle::spawn_on_thread`].
pub struct SamplesEngine<D: IioDevice> {
    device: D,
    trigger: Option<Box<dyn Attributes>>,
    config: EngineConfig,
    registry: ClientRegistry,
    arbiter: FrequencyArbiter,
    throttle: ErrorThrottle,
    watchdog: Option<Watchdog>,
    samples_cnt: u64,
    read_failures: u64,
    watching: bool,
    torn_down: bool,
}

/// Builder for [`SamplesEngine`].
pub struct SamplesEngineBuilder<D: IioDevice> {
    device: D,
    trigger: Option<Box<dyn Attributes>>,
    config: EngineConfig,
}

impl<D: IioDevice> SamplesEngineBuilder<D> {
    /// Trigger pacing the device; required when the device has no FIFO.
    pub fn trigger(mut self, trigger: impl Attributes + 'static) -> Self {
        self.trigger = Some(Box::new(trigger));
        self
    }

    /// Engine settings.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the device and create the engine.
    ///
    /// Fails when `sampling_frequency_available` is missing or unusable, or
    /// when a trigger-paced device has no trigger.
    pub fn build(self) -> ServiceResult<SamplesEngine<D>> {
        let band = self.device.parse_frequency_table()?;
        if !self.device.descriptor().uses_fifo() && self.trigger.is_none() {
            return Err(ServiceError::TriggerRequired {
                device_id: self.device.id(),
            });
        }
        info!(
            device_id = self.device.id(),
            name = self.device.name(),
            min = band.min,
            max = band.max,
            "Samples engine created"
        );
        Ok(SamplesEngine {
            device: self.device,
            trigger: self.trigger,
            config: self.config,
            registry: ClientRegistry::default(),
            arbiter: FrequencyArbiter::new(band),
            throttle: ErrorThrottle::default(),
            watchdog: None,
            samples_cnt: 0,
            read_failures: 0,
            watching: false,
            torn_down: false,
        })
    }
}

impl<D: IioDevice + 'static> SamplesEngine<D> {
    /// Start building an engine for `device`.
    pub fn builder(device: D) -> SamplesEngineBuilder<D> {
        SamplesEngineBuilder {
            device,
            trigger: None,
            config: EngineConfig::default(),
        }
    }

    /// Engine settings.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Process commands and device samples until shut down or every handle
    /// is dropped, then tear down.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<EngineCommand>,
        watchdog: Watchdog,
    ) {
        self.watchdog = Some(watchdog);
        info!(device_id = self.device.id(), "Samples engine running");

        let mut shutdown_ack = None;
        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(EngineCommand::Shutdown { response }) => {
                        shutdown_ack = Some(response);
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => break,
                },

                result = self.device.read_next_sample(), if self.watching => {
                    self.on_read(result);
                }
            }
        }

        self.teardown();
        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::AddSubscriber { id, spec, response } => {
                self.add_subscriber(id, spec);
                let _ = response.send(());
            }
            EngineCommand::RemoveSubscriber { id, response } => {
                let _ = response.send(self.remove_subscriber(id).then_some(()));
            }
            EngineCommand::SetFrequency {
                id,
                frequency,
                response,
            } => {
                let _ = response.send(self.set_frequency(id, frequency));
            }
            EngineCommand::GetFrequency { id, response } => {
                let _ = response.send(self.registry.get(id).map(|sub| sub.frequency));
            }
            EngineCommand::SetChannelsEnabled {
                id,
                indices,
                enable,
                response,
            } => {
                let _ = response.send(self.set_channels_enabled(id, &indices, enable));
            }
            EngineCommand::GetChannelsEnabled {
                id,
                indices,
                response,
            } => {
                let flags: Option<Vec<bool>> = self
                    .registry
                    .get(id)
                    .map(|sub| indices.iter().map(|i| sub.channels.contains(i)).collect());
                let _ = response.send(flags);
            }
            EngineCommand::SetTimeout {
                id,
                timeout_ms,
                response,
            } => {
                let updated = self.registry.get_mut(id).map(|sub| {
                    sub.timeout_ms = timeout_ms;
                });
                let _ = response.send(updated);
            }
            EngineCommand::GetStats { response } => {
                let _ = response.send(self.stats());
            }
            EngineCommand::SampleTimeout {
                id,
                sample_index,
                deadline,
            } => {
                self.on_timeout(id, sample_index, deadline);
            }
            EngineCommand::Shutdown { response } => {
                // Handled by the loop; only reachable if dispatched directly
                let _ = response.send(());
            }
        }
    }

    fn stats(&self) -> EngineStats {
        EngineStats {
            requested_frequency: self.arbiter.requested(),
            device_frequency: self.arbiter.effective(),
            active_subscribers: self.registry.active_count(),
            inactive_subscribers: self.registry.len() - self.registry.active_count(),
            samples_read: self.samples_cnt,
            read_failures: self.read_failures,
            watching: self.watching,
        }
    }

    // --- Client registry ---------------------------------------------------

    fn add_subscriber(&mut self, id: SubscriberId, mut spec: SubscriberSpec) {
        if self.registry.contains(id) {
            warn!(subscriber = %id, "Subscriber already started");
            spec.sink.on_error(ObserverError::AlreadyStarted);
            return;
        }

        let frequency = self.arbiter.fix(spec.frequency);
        let (channels, unavailable): (BTreeSet<i32>, BTreeSet<i32>) = spec
            .channels
            .iter()
            .partition(|&&index| channel_available(&self.device, index));
        if !unavailable.is_empty() {
            warn!(subscriber = %id, channels = ?unavailable, "Ignoring unavailable channels");
        }

        if frequency < FREQUENCY_EPSILON {
            spec.sink.on_error(ObserverError::FrequencyInvalid);
        }
        if channels.is_empty() {
            spec.sink.on_error(ObserverError::NoEnabledChannels);
        }

        let subscriber = Subscriber::new(frequency, channels, spec.timeout_ms, spec.sink);
        let qualifies = subscriber.qualifies();
        self.registry.insert(id, subscriber);
        debug!(subscriber = %id, frequency, active = qualifies, "Subscriber added");

        if qualifies {
            self.activate(id);
        }
    }

    fn remove_subscriber(&mut self, id: SubscriberId) -> bool {
        let Some(subscriber) = self.registry.get(id) else {
            return false;
        };
        if subscriber.is_active() {
            let frequency = subscriber.frequency;
            self.deactivate(id, frequency);
        }
        self.registry.remove(id);
        debug!(subscriber = %id, "Subscriber removed");
        true
    }

    fn set_frequency(&mut self, id: SubscriberId, frequency: f64) -> Option<f64> {
        let fixed = self.arbiter.fix(frequency);
        let subscriber = self.registry.get_mut(id)?;

        let previous = subscriber.frequency;
        if previous == fixed {
            return Some(fixed);
        }
        subscriber.frequency = fixed;
        if fixed < FREQUENCY_EPSILON {
            subscriber.sink.on_error(ObserverError::FrequencyInvalid);
        }

        match (subscriber.is_active(), subscriber.qualifies()) {
            (true, true) => {
                self.add_frequency(fixed, id);
                self.remove_frequency(previous, id);
            }
            (true, false) => self.deactivate(id, previous),
            (false, true) => self.activate(id),
            (false, false) => {}
        }
        debug!(subscriber = %id, requested = frequency, frequency = fixed, "Frequency set");
        Some(fixed)
    }

    fn set_channels_enabled(
        &mut self,
        id: SubscriberId,
        indices: &[i32],
        enable: bool,
    ) -> Option<Vec<i32>> {
        let subscriber = self.registry.get_mut(id)?;
        let was_active = subscriber.is_active();
        let had_channels = !subscriber.channels.is_empty();
        let mut failed = Vec::new();

        if enable {
            for &index in indices {
                if channel_available(&self.device, index) {
                    subscriber.channels.insert(index);
                } else {
                    failed.push(index);
                }
            }
        } else {
            for &index in indices {
                subscriber.channels.remove(&index);
                if let Some(window) = subscriber.window.as_mut() {
                    window.sums.remove(&index);
                }
            }
            if had_channels && subscriber.channels.is_empty() {
                subscriber.sink.on_error(ObserverError::NoEnabledChannels);
            }
        }

        if !failed.is_empty() {
            warn!(subscriber = %id, channels = ?failed, "Channels unavailable");
        }

        let frequency = subscriber.frequency;
        match (was_active, subscriber.qualifies()) {
            (true, false) => self.deactivate(id, frequency),
            (false, true) => self.activate(id),
            _ => {}
        }
        Some(failed)
    }

    fn activate(&mut self, id: SubscriberId) {
        if !self.registry.activate(id, self.samples_cnt) {
            return;
        }
        let Some(subscriber) = self.registry.get(id) else {
            return;
        };
        let frequency = subscriber.frequency;
        self.arm_watchdog(id);
        self.add_frequency(frequency, id);
        if !self.watching {
            self.start_watching();
        }
        debug!(subscriber = %id, active = self.registry.active_count(), "Subscriber active");
    }

    fn deactivate(&mut self, id: SubscriberId, frequency: f64) {
        if !self.registry.deactivate(id) {
            return;
        }
        self.remove_frequency(frequency, id);
        if self.registry.active_count() == 0 {
            self.stop_watching();
        }
        debug!(subscriber = %id, active = self.registry.active_count(), "Subscriber inactive");
    }

    // --- Frequency arbiter -------------------------------------------------

    fn add_frequency(&mut self, frequency: f64, initiator: SubscriberId) {
        if let Some(target) = self.arbiter.add(frequency) {
            self.apply_frequency(target, initiator);
        }
    }

    fn remove_frequency(&mut self, frequency: f64, initiator: SubscriberId) {
        if let Some(target) = self.arbiter.remove(frequency) {
            self.apply_frequency(target, initiator);
        }
    }

    fn apply_frequency(&mut self, frequency: f64, initiator: SubscriberId) {
        if let Err(e) = self.program_device(frequency) {
            error!(
                device_id = self.device.id(),
                frequency,
                error = %e,
                "Failed to set device frequency"
            );
            self.broadcast_error(ObserverError::SetFrequencyIoFailed, Some(initiator));
        }
    }

    /// Write the device rate and the matching FIFO timeout or trigger rate.
    fn program_device(&mut self, frequency: f64) -> iio_core::Result<()> {
        let uses_fifo = self.device.descriptor().uses_fifo();

        match self
            .device
            .write_double_attribute(attr::SAMPLING_FREQUENCY, frequency)
        {
            Ok(()) => {}
            Err(e) if uses_fifo => {
                warn!(device_id = self.device.id(), frequency, error = %e, "Device rejected sampling_frequency");
            }
            Err(e) => return Err(e),
        }

        let effective = match self.device.read_double_attribute(attr::SAMPLING_FREQUENCY) {
            Some(effective) => effective,
            None => {
                warn!(device_id = self.device.id(), "Cannot read back sampling_frequency");
                frequency
            }
        };
        self.arbiter.set_effective(effective);
        info!(
            device_id = self.device.id(),
            requested = frequency,
            effective,
            "Device frequency updated"
        );

        if uses_fifo {
            if effective >= FREQUENCY_EPSILON {
                self.device
                    .write_double_attribute(attr::HWFIFO_TIMEOUT, 1.0 / effective)?;
            }
        } else if let Some(trigger) = &self.trigger {
            trigger.write_double_attribute(attr::SAMPLING_FREQUENCY, frequency)?;
        }
        Ok(())
    }

    // --- Sample loop -------------------------------------------------------

    fn start_watching(&mut self) {
        if let Err(e) = self.device.flush_hw_fifo() {
            debug!(device_id = self.device.id(), error = %e, "FIFO flush failed");
        }
        match self.device.open_buffer() {
            Ok(()) => {
                self.watching = true;
                info!(device_id = self.device.id(), "Sample watcher armed");
            }
            Err(e) => {
                error!(device_id = self.device.id(), error = %e, "Failed to acquire buffer");
                self.broadcast_error(ObserverError::GetFdFailed, None);
            }
        }
    }

    fn on_read(&mut self, result: iio_core::Result<IioSample>) {
        match result {
            Ok(sample) => {
                self.throttle.on_success();
                self.fan_out(&sample);
                self.samples_cnt += 1;
            }
            Err(e) => {
                self.read_failures += 1;
                if self.throttle.on_failure() {
                    error!(device_id = self.device.id(), error = %e, "Device read failed");
                    self.broadcast_error(ObserverError::ReadFailed, None);
                }
            }
        }
    }

    /// Deliver sample `samples_cnt` to every active subscriber whose window
    /// closes with it.
    fn fan_out(&mut self, sample: &IioSample) {
        let k = self.samples_cnt;
        let device_frequency = self.arbiter.effective();
        let average = self.config.window_average;
        let descriptor = self.device.descriptor();

        for (id, subscriber) in self.registry.iter_mut() {
            let Some(window) = subscriber.window.as_mut() else {
                continue;
            };
            let step = fanout::step(device_frequency, subscriber.frequency);
            let Some(output) = fanout::fold(
                window,
                &subscriber.channels,
                descriptor,
                sample,
                k,
                step,
                average,
            ) else {
                continue;
            };
            subscriber.sink.on_sample(output);
            if let Some(watchdog) = &self.watchdog {
                subscriber.deadline += 1;
                watchdog.arm(id, k + 1, subscriber.deadline, subscriber.timeout_ms);
            }
        }

        self.reap_closed();
    }

    fn broadcast_error(&mut self, error: ObserverError, initiator: Option<SubscriberId>) {
        for (id, subscriber) in self.registry.iter_mut() {
            if subscriber.is_active() || Some(id) == initiator {
                subscriber.sink.on_error(error);
            }
        }
        self.reap_closed();
    }

    /// Remove subscribers whose sink went away.
    fn reap_closed(&mut self) {
        for id in self.registry.closed() {
            info!(subscriber = %id, "Sink closed, removing subscriber");
            self.remove_subscriber(id);
        }
    }

    // --- Timeout watchdog --------------------------------------------------

    /// Arm a fresh deadline for the subscriber's open window. Earlier
    /// deadlines for it become stale.
    fn arm_watchdog(&mut self, id: SubscriberId) {
        let Some(watchdog) = &self.watchdog else {
            return;
        };
        let Some(subscriber) = self.registry.get_mut(id) else {
            return;
        };
        let Some(sample_index) = subscriber.window.as_ref().map(|w| w.sample_index) else {
            return;
        };
        subscriber.deadline += 1;
        watchdog.arm(id, sample_index, subscriber.deadline, subscriber.timeout_ms);
    }

    fn on_timeout(&mut self, id: SubscriberId, sample_index: u64, deadline: u64) {
        let Some(subscriber) = self.registry.get_mut(id) else {
            return;
        };
        let pending = subscriber.deadline == deadline
            && subscriber
                .window
                .as_ref()
                .is_some_and(|w| w.sample_index == sample_index);
        if pending {
            warn!(subscriber = %id, sample_index, "No sample delivered within timeout");
            subscriber.sink.on_error(ObserverError::ReadTimeout);
        }
    }
}

impl<D: IioDevice> SamplesEngine<D> {
    fn stop_watching(&mut self) {
        if !self.watching {
            return;
        }
        self.watching = false;
        self.device.release_buffer();
        info!(device_id = self.device.id(), "Sample watcher disarmed");
    }

    // --- Teardown ----------------------------------------------------------

    /// Release the buffer, drop every subscriber and stop the device.
    /// Runs once, whether the loop exits or the engine is dropped.
    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.stop_watching();
        self.registry.clear();
        if let Err(e) = self
            .device
            .write_double_attribute(attr::SAMPLING_FREQUENCY, 0.0)
        {
            warn!(device_id = self.device.id(), error = %e, "Failed to stop device sampling");
        }
        info!(
            device_id = self.device.id(),
            samples = self.samples_cnt,
            "Samples engine stopped"
        );
    }
}

/// Whether `index` names a channel the device has enabled.
fn channel_available<D: IioDevice>(device: &D, index: i32) -> bool {
    device.descriptor().channel(index).is_some() && device.is_channel_enabled(index)
}

impl<D: IioDevice> Drop for SamplesEngine<D> {
    fn drop(&mut self) {
        self.teardown();
    }
}
