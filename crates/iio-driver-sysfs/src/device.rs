//! Buffered IIO device backed by sysfs and `/dev/iio:deviceN`.

use std::fs::{self, File, OpenOptions};
use std::io::Read;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

use async_trait::async_trait;
use iio_core::{
    attr, decode_sample, record_size, Attributes, ChannelSpec, DeviceDescriptor, IioDevice,
    IioError, IioSample, Result, SamplingMode, ScanType,
};
use tokio::io::unix::AsyncFd;
use tracing::{debug, info, warn};

use crate::attributes::SysfsAttributes;

const SCAN_ELEMENTS: &str = "scan_elements";

/// An IIO device opened through sysfs.
///
/// Opening enables every scan element; the buffer itself is only enabled by
/// [`IioDevice::open_buffer`].
#[derive(Debug)]
pub struct SysfsDevice {
    id: i32,
    name: String,
    attrs: SysfsAttributes,
    descriptor: DeviceDescriptor,
    enabled: Vec<bool>,
    dev_path: PathBuf,
    buffer_length: u32,
    buffer: Option<AsyncFd<File>>,
    record_size: usize,
}

impl SysfsDevice {
    pub(crate) fn open(id: i32, dir: PathBuf, dev_path: PathBuf, buffer_length: u32) -> Result<Self> {
        let attrs = SysfsAttributes::new(dir);
        let name = attrs.read_string_attribute(attr::NAME).unwrap_or_default();

        let channels = read_scan_elements(&attrs)?;
        if channels.is_empty() {
            return Err(IioError::bad_device(format!(
                "iio:device{id} has no scan elements"
            )));
        }
        let sampling_mode = if attrs.exists(attr::HWFIFO_TIMEOUT) {
            SamplingMode::Fifo
        } else {
            SamplingMode::Trigger
        };
        let descriptor = DeviceDescriptor::new(channels, sampling_mode);

        let mut device = Self {
            id,
            name,
            attrs,
            enabled: vec![false; descriptor.len()],
            descriptor,
            dev_path,
            buffer_length: buffer_length.max(1),
            buffer: None,
            record_size: 0,
        };

        for index in 0..device.descriptor.len() as i32 {
            if let Err(e) = device.set_channel_enabled(index, true) {
                warn!(device_id = id, channel = index, error = %e, "Failed to enable channel");
            }
        }

        info!(
            device_id = id,
            name = %device.name,
            channels = device.descriptor.len(),
            mode = ?sampling_mode,
            "Opened IIO device"
        );
        Ok(device)
    }

    fn element_attr(&self, index: i32, suffix: &str) -> Result<String> {
        let channel = self
            .descriptor
            .channel(index)
            .ok_or(IioError::InvalidChannel { index })?;
        Ok(format!("{SCAN_ELEMENTS}/in_{}_{suffix}", channel.id))
    }

}

fn enabled_in(enabled: &[bool], index: i32) -> bool {
    usize::try_from(index)
        .ok()
        .and_then(|i| enabled.get(i).copied())
        .unwrap_or(false)
}

/// Channels from `scan_elements/in_<id>_{index,type}`, ordered by scan index.
fn read_scan_elements(attrs: &SysfsAttributes) -> Result<Vec<ChannelSpec>> {
    let dir = attrs.dir().join(SCAN_ELEMENTS);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut elements: Vec<(i64, String, ScanType)> = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(id) = file_name
            .to_str()
            .and_then(|n| n.strip_prefix("in_"))
            .and_then(|n| n.strip_suffix("_index"))
        else {
            continue;
        };

        let scan_index = attrs
            .read_number_attribute(&format!("{SCAN_ELEMENTS}/in_{id}_index"))
            .ok_or_else(|| IioError::bad_device(format!("unreadable scan index for '{id}'")))?;
        let scan_type: ScanType = attrs
            .read_string_attribute(&format!("{SCAN_ELEMENTS}/in_{id}_type"))
            .ok_or_else(|| IioError::bad_device(format!("missing scan type for '{id}'")))?
            .parse()?;
        elements.push((scan_index, id.to_string(), scan_type));
    }

    elements.sort_by_key(|(scan_index, _, _)| *scan_index);
    Ok(elements
        .into_iter()
        .enumerate()
        .map(|(i, (_, id, scan_type))| ChannelSpec::new(i as i32, id, scan_type))
        .collect())
}

impl Attributes for SysfsDevice {
    fn read_string_attribute(&self, name: &str) -> Option<String> {
        self.attrs.read_string_attribute(name)
    }

    fn write_string_attribute(&self, name: &str, value: &str) -> Result<()> {
        self.attrs.write_string_attribute(name, value)
    }
}

#[async_trait]
impl IioDevice for SysfsDevice {
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
        enabled_in(&self.enabled, index)
    }

    fn set_channel_enabled(&mut self, index: i32, enabled: bool) -> Result<()> {
        let en = self.element_attr(index, "en")?;
        self.attrs.write_number_attribute(&en, i64::from(enabled))?;
        // The kernel may refuse silently; trust what reads back
        let actual = self.attrs.read_number_attribute(&en) == Some(1);
        if let Some(slot) = usize::try_from(index).ok().and_then(|i| self.enabled.get_mut(i)) {
            *slot = actual;
        }
        if actual != enabled {
            return Err(IioError::attribute_write(en, "value did not stick"));
        }
        Ok(())
    }

    fn open_buffer(&mut self) -> Result<()> {
        if self.buffer.is_some() {
            return Ok(());
        }

        let enabled = &self.enabled;
        self.record_size = record_size(self.descriptor.channels(), |ch| enabled_in(enabled, ch.index));

        // Length cannot change while the buffer is enabled
        let _ = self.attrs.write_number_attribute(attr::BUFFER_ENABLE, 0);
        self.attrs
            .write_number_attribute(attr::BUFFER_LENGTH, i64::from(self.buffer_length))?;
        self.attrs.write_number_attribute(attr::BUFFER_ENABLE, 1)?;

        let opened = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.dev_path)
            .and_then(AsyncFd::new);
        match opened {
            Ok(fd) => {
                debug!(
                    device_id = self.id,
                    path = %self.dev_path.display(),
                    record_size = self.record_size,
                    "Buffer opened"
                );
                self.buffer = Some(fd);
                Ok(())
            }
            Err(e) => {
                let _ = self.attrs.write_number_attribute(attr::BUFFER_ENABLE, 0);
                Err(e.into())
            }
        }
    }

    fn release_buffer(&mut self) {
        if self.buffer.take().is_some() {
            if let Err(e) = self.attrs.write_number_attribute(attr::BUFFER_ENABLE, 0) {
                warn!(device_id = self.id, error = %e, "Failed to disable buffer");
            }
            debug!(device_id = self.id, "Buffer released");
        }
    }

    async fn read_next_sample(&mut self) -> Result<IioSample> {
        let fd = self.buffer.as_ref().ok_or(IioError::BufferNotOpen)?;
        let expected = self.record_size;
        let mut record = vec![0u8; expected];

        loop {
            let mut guard = fd.readable().await?;
            match guard.try_io(|inner| inner.get_ref().read(&mut record)) {
                Ok(Ok(n)) if n == expected => break,
                Ok(Ok(n)) => return Err(IioError::ShortRead { got: n, expected }),
                Ok(Err(e)) => return Err(e.into()),
                Err(_would_block) => continue,
            }
        }

        let enabled = &self.enabled;
        decode_sample(
            self.descriptor.channels(),
            |ch| enabled_in(enabled, ch.index),
            &record,
        )
    }
}

impl Drop for SysfsDevice {
    fn drop(&mut self) {
        self.release_buffer();
    }
}
