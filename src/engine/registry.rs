//! Subscribers and the active/inactive partition.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use iio_core::FREQUENCY_EPSILON;

use super::fanout::Window;
use crate::sink::SampleSink;

/// Opaque subscriber id, unique per engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Wrap a raw id, for transports that assign their own.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a client asks for when subscribing.
///
/// # Example
///
/// ```
/// use iio_service::{channel_sink, SubscriberSpec};
///
/// let (sink, _events) = channel_sink();
/// let spec = SubscriberSpec::new(sink)
///     .frequency(10.0)
///     .channels([0, 2, 3])
///     .timeout_ms(500);
/// assert_eq!(spec.channels.len(), 3);
/// ```
pub struct SubscriberSpec {
    /// Desired rate in Hz; clamped to the device band
    pub frequency: f64,
    /// Channel indices to deliver
    pub channels: BTreeSet<i32>,
    /// Delivery deadline; `0` disables it
    pub timeout_ms: u32,
    /// Where samples and errors go
    pub sink: Box<dyn SampleSink>,
}

impl SubscriberSpec {
    /// Spec with no channels and a zero rate (inactive until configured).
    pub fn new(sink: impl SampleSink + 'static) -> Self {
        Self {
            frequency: 0.0,
            channels: BTreeSet::new(),
            timeout_ms: 0,
            sink: Box::new(sink),
        }
    }

    /// Set the desired rate.
    pub fn frequency(mut self, frequency: f64) -> Self {
        self.frequency = frequency;
        self
    }

    /// Set the channel indices.
    pub fn channels(mut self, channels: impl IntoIterator<Item = i32>) -> Self {
        self.channels = channels.into_iter().collect();
        self
    }

    /// Set the delivery deadline.
    pub fn timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

impl fmt::Debug for SubscriberSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberSpec")
            .field("frequency", &self.frequency)
            .field("channels", &self.channels)
            .field("timeout_ms", &self.timeout_ms)
            .finish_non_exhaustive()
    }
}

pub(crate) struct Subscriber {
    /// Clamped rate
    pub frequency: f64,
    pub channels: BTreeSet<i32>,
    pub timeout_ms: u32,
    pub sink: Box<dyn SampleSink>,
    /// Present iff the subscriber is active
    pub window: Option<Window>,
    /// Number of the most recently armed delivery deadline
    pub deadline: u64,
}

impl Subscriber {
    pub fn new(frequency: f64, channels: BTreeSet<i32>, timeout_ms: u32, sink: Box<dyn SampleSink>) -> Self {
        Self {
            frequency,
            channels,
            timeout_ms,
            sink,
            window: None,
            deadline: 0,
        }
    }

    /// Whether the configuration qualifies for receiving samples.
    pub fn qualifies(&self) -> bool {
        self.frequency >= FREQUENCY_EPSILON && !self.channels.is_empty()
    }

    pub fn is_active(&self) -> bool {
        self.window.is_some()
    }
}

/// All subscribers of one engine, ordered by id.
#[derive(Default)]
pub(crate) struct ClientRegistry {
    subscribers: BTreeMap<SubscriberId, Subscriber>,
    active: usize,
}

impl ClientRegistry {
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.contains_key(&id)
    }

    pub fn get(&self, id: SubscriberId) -> Option<&Subscriber> {
        self.subscribers.get(&id)
    }

    pub fn get_mut(&mut self, id: SubscriberId) -> Option<&mut Subscriber> {
        self.subscribers.get_mut(&id)
    }

    /// Register an inactive subscriber. The caller checked `contains`.
    pub fn insert(&mut self, id: SubscriberId, mut subscriber: Subscriber) {
        subscriber.window = None;
        self.subscribers.insert(id, subscriber);
    }

    /// Drop a subscriber, which must have been deactivated first.
    pub fn remove(&mut self, id: SubscriberId) -> Option<Subscriber> {
        let removed = self.subscribers.remove(&id)?;
        if removed.is_active() {
            self.active -= 1;
        }
        Some(removed)
    }

    /// Open a window at `sample_index`. Returns false if already active.
    pub fn activate(&mut self, id: SubscriberId, sample_index: u64) -> bool {
        match self.subscribers.get_mut(&id) {
            Some(sub) if !sub.is_active() => {
                sub.window = Some(Window::opening_at(sample_index));
                self.active += 1;
                true
            }
            _ => false,
        }
    }

    /// Close the window. Returns false if not active.
    pub fn deactivate(&mut self, id: SubscriberId) -> bool {
        match self.subscribers.get_mut(&id) {
            Some(sub) if sub.is_active() => {
                sub.window = None;
                self.active -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.active
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SubscriberId, &mut Subscriber)> {
        self.subscribers.iter_mut().map(|(id, sub)| (*id, sub))
    }

    /// Ids whose sink reports closed.
    pub fn closed(&self) -> Vec<SubscriberId> {
        self.subscribers
            .iter()
            .filter(|(_, sub)| sub.sink.is_closed())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn clear(&mut self) {
        self.subscribers.clear();
        self.active = 0;
    }
}
