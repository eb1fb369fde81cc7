//! Mock buffered IIO device.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use iio_core::{
    attr, Attributes, ChannelSpec, DeviceDescriptor, IioDevice, IioError, IioSample, Result,
    SamplingMode, ScanType,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::attributes::MockAttributes;

/// One scripted outcome of `read_next_sample`.
#[derive(Debug, Clone)]
pub enum MockRead {
    /// A full sample; channels the device has disabled are dropped on read
    Sample(IioSample),
    /// A read error
    Failure,
}

#[derive(Debug, Default)]
struct ControlState {
    channel_enabled: Vec<bool>,
    unopenable: HashSet<i32>,
    fail_buffer_open: bool,
    buffer_open: bool,
    buffer_opens: u32,
    buffer_releases: u32,
    reads_served: u64,
}

/// In-memory IIO device.
///
/// Reads are served from a queue filled through the paired
/// [`MockDeviceHandle`]. With an empty queue `read_next_sample` waits, just
/// like a real buffer with no data.
pub struct MockIioDevice {
    id: i32,
    name: String,
    descriptor: DeviceDescriptor,
    attributes: MockAttributes,
    control: Arc<Mutex<ControlState>>,
    reads: mpsc::UnboundedReceiver<MockRead>,
}

/// Test-side view of a [`MockIioDevice`].
#[derive(Clone)]
pub struct MockDeviceHandle {
    attributes: MockAttributes,
    control: Arc<Mutex<ControlState>>,
    reads: mpsc::UnboundedSender<MockRead>,
}

impl MockIioDevice {
    /// Start building a mock device.
    pub fn builder() -> MockIioDeviceBuilder {
        MockIioDeviceBuilder::default()
    }

    /// FIFO accelerometer with `accel_x`, `accel_y`, `accel_z` and
    /// `timestamp`, band 1.25..40 Hz.
    pub fn accelerometer() -> (Self, MockDeviceHandle) {
        Self::builder().build()
    }
}

impl Attributes for MockIioDevice {
    fn read_string_attribute(&self, name: &str) -> Option<String> {
        self.attributes.read_string_attribute(name)
    }

    fn write_string_attribute(&self, name: &str, value: &str) -> Result<()> {
        self.attributes.write_string_attribute(name, value)
    }
}

#[async_trait]
impl IioDevice for MockIioDevice {
    fn id(&self) -> i32 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn is_channel_enabled(&self, index: i32) -> bool {
        let control = self.control.lock();
        usize::try_from(index)
            .ok()
            .and_then(|i| control.channel_enabled.get(i).copied())
            .unwrap_or(false)
    }

    fn set_channel_enabled(&mut self, index: i32, enabled: bool) -> Result<()> {
        let mut control = self.control.lock();
        if control.unopenable.contains(&index) && enabled {
            return Err(IioError::attribute_write(
                format!("scan_elements/in_{index}_en"),
                "injected failure",
            ));
        }
        let slot = usize::try_from(index)
            .ok()
            .and_then(|i| control.channel_enabled.get_mut(i))
            .ok_or(IioError::InvalidChannel { index })?;
        *slot = enabled;
        Ok(())
    }

    fn open_buffer(&mut self) -> Result<()> {
        let mut control = self.control.lock();
        if control.buffer_open {
            return Ok(());
        }
        if control.fail_buffer_open {
            return Err(IioError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "injected buffer open failure",
            )));
        }
        control.buffer_open = true;
        control.buffer_opens += 1;
        debug!(device_id = self.id, "Mock buffer opened");
        Ok(())
    }

    fn release_buffer(&mut self) {
        let mut control = self.control.lock();
        if control.buffer_open {
            control.buffer_open = false;
            control.buffer_releases += 1;
            debug!(device_id = self.id, "Mock buffer released");
        }
    }

    async fn read_next_sample(&mut self) -> Result<IioSample> {
        match self.reads.recv().await {
            Some(MockRead::Sample(mut sample)) => {
                let mut control = self.control.lock();
                control.reads_served += 1;
                sample.retain(|index, _| {
                    usize::try_from(*index)
                        .ok()
                        .and_then(|i| control.channel_enabled.get(i).copied())
                        .unwrap_or(false)
                });
                trace!(device_id = self.id, channels = sample.len(), "Mock sample read");
                Ok(sample)
            }
            Some(MockRead::Failure) => {
                self.control.lock().reads_served += 1;
                Err(IioError::Io(std::io::Error::other("injected read failure")))
            }
            // Every handle is gone: nothing will ever arrive
            None => std::future::pending().await,
        }
    }
}

impl MockDeviceHandle {
    /// Attribute store of the device.
    pub fn attributes(&self) -> &MockAttributes {
        &self.attributes
    }

    /// Queue a sample.
    pub fn push_sample(&self, sample: IioSample) {
        let _ = self.reads.send(MockRead::Sample(sample));
    }

    /// Queue several samples.
    pub fn push_samples<I>(&self, samples: I)
    where
        I: IntoIterator<Item = IioSample>,
    {
        for sample in samples {
            self.push_sample(sample);
        }
    }

    /// Queue `count` read failures.
    pub fn push_failures(&self, count: usize) {
        for _ in 0..count {
            let _ = self.reads.send(MockRead::Failure);
        }
    }

    /// Programmed `sampling_frequency`.
    pub fn frequency(&self) -> Option<f64> {
        self.attributes.get_f64(attr::SAMPLING_FREQUENCY)
    }

    /// Programmed `buffer/hwfifo_timeout`.
    pub fn fifo_timeout(&self) -> Option<f64> {
        self.attributes.get_f64(attr::HWFIFO_TIMEOUT)
    }

    /// Number of writes to `buffer/hwfifo_flush`.
    pub fn flush_count(&self) -> usize {
        self.attributes.writes_to(attr::HWFIFO_FLUSH).len()
    }

    /// Make `open_buffer` fail.
    pub fn fail_buffer_open(&self, fail: bool) {
        self.control.lock().fail_buffer_open = fail;
    }

    /// Make enabling `index` fail, and disable it now.
    pub fn make_unopenable(&self, index: i32) {
        let mut control = self.control.lock();
        control.unopenable.insert(index);
        if let Some(slot) = usize::try_from(index)
            .ok()
            .and_then(|i| control.channel_enabled.get_mut(i))
        {
            *slot = false;
        }
    }

    /// Whether the buffer is currently open.
    pub fn buffer_open(&self) -> bool {
        self.control.lock().buffer_open
    }

    /// How many times the buffer was opened.
    pub fn buffer_opens(&self) -> u32 {
        self.control.lock().buffer_opens
    }

    /// How many times the buffer was released.
    pub fn buffer_releases(&self) -> u32 {
        self.control.lock().buffer_releases
    }

    /// Scripted reads consumed so far.
    pub fn reads_served(&self) -> u64 {
        self.control.lock().reads_served
    }
}

/// Builder for [`MockIioDevice`].
#[derive(Debug, Clone)]
pub struct MockIioDeviceBuilder {
    id: i32,
    name: String,
    channels: Vec<ChannelSpec>,
    sampling_mode: SamplingMode,
    frequencies_available: Option<String>,
}

impl Default for MockIioDeviceBuilder {
    fn default() -> Self {
        Self {
            id: 0,
            name: "cros-ec-accel".to_string(),
            channels: Vec::new(),
            sampling_mode: SamplingMode::Fifo,
            frequencies_available: Some("0.000000 1.250000 40.000000".to_string()),
        }
    }
}

impl MockIioDeviceBuilder {
    /// Kernel device id.
    pub fn id(mut self, id: i32) -> Self {
        self.id = id;
        self
    }

    /// Kernel device name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Append a channel; its index is its position.
    pub fn channel(mut self, id: &str, scan_type: ScanType) -> Self {
        let index = self.channels.len() as i32;
        self.channels.push(ChannelSpec::new(index, id, scan_type));
        self
    }

    /// Pacing mode; trigger devices get no `buffer/hwfifo_timeout`.
    pub fn sampling_mode(mut self, mode: SamplingMode) -> Self {
        self.sampling_mode = mode;
        self
    }

    /// Raw `sampling_frequency_available`; `None` leaves it absent.
    pub fn frequencies_available(mut self, available: Option<&str>) -> Self {
        self.frequencies_available = available.map(str::to_string);
        self
    }

    /// Build the device and its handle. Without explicit channels the
    /// accelerometer layout is used.
    pub fn build(self) -> (MockIioDevice, MockDeviceHandle) {
        let channels = if self.channels.is_empty() {
            vec![
                ChannelSpec::new(0, "accel_x", ScanType::new(true, 16)),
                ChannelSpec::new(1, "accel_y", ScanType::new(true, 16)),
                ChannelSpec::new(2, "accel_z", ScanType::new(true, 16)),
                ChannelSpec::new(3, "timestamp", ScanType::new(true, 64)),
            ]
        } else {
            self.channels
        };
        let descriptor = DeviceDescriptor::new(channels, self.sampling_mode);

        let attributes = MockAttributes::new();
        attributes.set(attr::NAME, self.name.clone());
        attributes.set(attr::SAMPLING_FREQUENCY, "0");
        if let Some(available) = &self.frequencies_available {
            attributes.set(attr::SAMPLING_FREQUENCY_AVAILABLE, available.clone());
        }
        if self.sampling_mode == SamplingMode::Fifo {
            attributes.set(attr::HWFIFO_TIMEOUT, "0");
        }

        let control = Arc::new(Mutex::new(ControlState {
            channel_enabled: vec![true; descriptor.len()],
            ..Default::default()
        }));
        let (tx, rx) = mpsc::unbounded_channel();

        let device = MockIioDevice {
            id: self.id,
            name: self.name,
            descriptor,
            attributes: attributes.clone(),
            control: control.clone(),
            reads: rx,
        };
        let handle = MockDeviceHandle {
            attributes,
            control,
            reads: tx,
        };
        (device, handle)
    }
}
