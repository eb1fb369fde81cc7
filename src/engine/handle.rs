//! Client side of the engine task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use iio_core::IioDevice;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::commands::EngineCommand;
use super::watchdog::Watchdog;
use super::{EngineStats, SamplesEngine, SubscriberId, SubscriberSpec};
use crate::error::{ServiceError, ServiceResult};

/// Cloneable handle to a running [`SamplesEngine`].
///
/// Every method posts a command to the engine task and waits for its reply.
/// Once the engine has stopped, methods return [`ServiceError::EngineClosed`].
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    next_id: Arc<AtomicU64>,
}

impl EngineHandle {
    /// Spawn the engine on the current Tokio runtime.
    ///
    /// The runtime must have the IO and time drivers enabled.
    pub fn spawn<D: IioDevice + 'static>(engine: SamplesEngine<D>) -> Self {
        let (handle, commands, watchdog) = Self::channel(engine.config().mailbox_capacity);
        tokio::spawn(engine.run(commands, watchdog));
        handle
    }

    /// Run the engine on a dedicated thread with its own single-threaded
    /// runtime, leaving the caller's runtime free of device reads.
    pub fn spawn_on_thread<D: IioDevice + 'static>(
        engine: SamplesEngine<D>,
        name: impl Into<String>,
    ) -> ServiceResult<(Self, JoinHandle<()>)> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (handle, commands, watchdog) = Self::channel(engine.config().mailbox_capacity);
        let name = name.into();
        info!(thread = %name, "Starting samples engine thread");
        let thread = std::thread::Builder::new()
            .name(name)
            .spawn(move || runtime.block_on(engine.run(commands, watchdog)))?;
        Ok((handle, thread))
    }

    fn channel(capacity: usize) -> (Self, mpsc::Receiver<EngineCommand>, Watchdog) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let watchdog = Watchdog::new(tx.downgrade());
        let handle = Self {
            commands: tx,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (handle, rx, watchdog)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> ServiceResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| ServiceError::EngineClosed)?;
        rx.await.map_err(|_| ServiceError::EngineClosed)
    }

    /// Register a subscriber under a fresh id.
    ///
    /// Configuration problems (a zero rate, no usable channels) are reported
    /// to the sink; the subscriber is registered regardless and becomes
    /// active once reconfigured.
    pub async fn add_subscriber(&self, spec: SubscriberSpec) -> ServiceResult<SubscriberId> {
        let id = SubscriberId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.add_subscriber_with_id(id, spec).await?;
        Ok(id)
    }

    /// Register a subscriber under a caller-chosen id. A duplicate id is
    /// reported to the new sink as `AlreadyStarted`.
    pub async fn add_subscriber_with_id(
        &self,
        id: SubscriberId,
        spec: SubscriberSpec,
    ) -> ServiceResult<()> {
        debug!(subscriber = %id, ?spec, "Adding subscriber");
        self.request(|response| EngineCommand::AddSubscriber { id, spec, response })
            .await
    }

    /// Unregister a subscriber.
    pub async fn remove_subscriber(&self, id: SubscriberId) -> ServiceResult<()> {
        self.request(|response| EngineCommand::RemoveSubscriber { id, response })
            .await?
            .ok_or(ServiceError::UnknownSubscriber(id))
    }

    /// Change a subscriber's rate; returns the clamped rate stored.
    pub async fn set_frequency(&self, id: SubscriberId, frequency: f64) -> ServiceResult<f64> {
        self.request(|response| EngineCommand::SetFrequency {
            id,
            frequency,
            response,
        })
        .await?
        .ok_or(ServiceError::UnknownSubscriber(id))
    }

    /// A subscriber's clamped rate.
    pub async fn frequency(&self, id: SubscriberId) -> ServiceResult<f64> {
        self.request(|response| EngineCommand::GetFrequency { id, response })
            .await?
            .ok_or(ServiceError::UnknownSubscriber(id))
    }

    /// Enable or disable channels for a subscriber; returns the indices that
    /// could not be enabled.
    pub async fn set_channels_enabled(
        &self,
        id: SubscriberId,
        indices: &[i32],
        enable: bool,
    ) -> ServiceResult<Vec<i32>> {
        let indices = indices.to_vec();
        self.request(|response| EngineCommand::SetChannelsEnabled {
            id,
            indices,
            enable,
            response,
        })
        .await?
        .ok_or(ServiceError::UnknownSubscriber(id))
    }

    /// Whether each of `indices` is enabled for a subscriber, in order.
    pub async fn get_channels_enabled(
        &self,
        id: SubscriberId,
        indices: &[i32],
    ) -> ServiceResult<Vec<bool>> {
        let indices = indices.to_vec();
        self.request(|response| EngineCommand::GetChannelsEnabled {
            id,
            indices,
            response,
        })
        .await?
        .ok_or(ServiceError::UnknownSubscriber(id))
    }

    /// Change a subscriber's delivery deadline; `0` disables it. Applies from
    /// the next armed deadline.
    pub async fn set_timeout(&self, id: SubscriberId, timeout_ms: u32) -> ServiceResult<()> {
        self.request(|response| EngineCommand::SetTimeout {
            id,
            timeout_ms,
            response,
        })
        .await?
        .ok_or(ServiceError::UnknownSubscriber(id))
    }

    /// Snapshot of the engine's counters.
    pub async fn stats(&self) -> ServiceResult<EngineStats> {
        self.request(|response| EngineCommand::GetStats { response })
            .await
    }

    /// Stop the engine: disarm the watcher, drop every subscriber and set
    /// the device rate to zero. Returns once teardown is done.
    pub async fn shutdown(&self) -> ServiceResult<()> {
        self.request(|response| EngineCommand::Shutdown { response })
            .await
    }
}
