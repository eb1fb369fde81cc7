//! Messages posted to the engine task.
//!
//! Every control request carries a `oneshot::Sender` for its reply. Replies
//! for a specific subscriber are `None` when the id is not registered.

use tokio::sync::oneshot;

use super::registry::{SubscriberId, SubscriberSpec};
use super::EngineStats;

#[derive(Debug)]
pub(crate) enum EngineCommand {
    AddSubscriber {
        id: SubscriberId,
        spec: SubscriberSpec,
        response: oneshot::Sender<()>,
    },
    RemoveSubscriber {
        id: SubscriberId,
        response: oneshot::Sender<Option<()>>,
    },
    SetFrequency {
        id: SubscriberId,
        frequency: f64,
        response: oneshot::Sender<Option<f64>>,
    },
    GetFrequency {
        id: SubscriberId,
        response: oneshot::Sender<Option<f64>>,
    },
    SetChannelsEnabled {
        id: SubscriberId,
        indices: Vec<i32>,
        enable: bool,
        response: oneshot::Sender<Option<Vec<i32>>>,
    },
    GetChannelsEnabled {
        id: SubscriberId,
        indices: Vec<i32>,
        response: oneshot::Sender<Option<Vec<bool>>>,
    },
    SetTimeout {
        id: SubscriberId,
        timeout_ms: u32,
        response: oneshot::Sender<Option<()>>,
    },
    GetStats {
        response: oneshot::Sender<EngineStats>,
    },
    /// Watchdog deadline number `deadline`, armed at `sample_index`, elapsed
    SampleTimeout {
        id: SubscriberId,
        sample_index: u64,
        deadline: u64,
    },
    Shutdown {
        response: oneshot::Sender<()>,
    },
}
