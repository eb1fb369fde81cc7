//! Static description of one IIO device.

use crate::channel::ChannelSpec;

/// How the device is paced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    /// Hardware FIFO; latency is bounded through `buffer/hwfifo_timeout`
    Fifo,
    /// Paced by a sibling trigger device's `sampling_frequency`
    Trigger,
}

/// Channels in record order plus the pacing mode.
///
/// Created once when a device is opened and never changed afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    channels: Vec<ChannelSpec>,
    sampling_mode: SamplingMode,
}

impl DeviceDescriptor {
    /// Build a descriptor. Channel indices are renumbered to their position.
    pub fn new(channels: Vec<ChannelSpec>, sampling_mode: SamplingMode) -> Self {
        let channels = channels
            .into_iter()
            .enumerate()
            .map(|(i, mut ch)| {
                ch.index = i as i32;
                ch
            })
            .collect();
        Self {
            channels,
            sampling_mode,
        }
    }

    /// All channels in record order.
    pub fn channels(&self) -> &[ChannelSpec] {
        &self.channels
    }

    /// Channel by index.
    pub fn channel(&self, index: i32) -> Option<&ChannelSpec> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.channels.get(i))
    }

    /// Channel by sysfs id.
    pub fn channel_by_id(&self, id: &str) -> Option<&ChannelSpec> {
        self.channels.iter().find(|ch| ch.id == id)
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether the device has no buffered channels.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Whether `index` names a channel that must not be averaged.
    pub fn is_no_batch(&self, index: i32) -> bool {
        self.channel(index).is_some_and(|ch| ch.no_batch)
    }

    /// Pacing mode.
    pub fn sampling_mode(&self) -> SamplingMode {
        self.sampling_mode
    }

    /// Whether rate changes go through the hardware FIFO timeout.
    pub fn uses_fifo(&self) -> bool {
        self.sampling_mode == SamplingMode::Fifo
    }
}
