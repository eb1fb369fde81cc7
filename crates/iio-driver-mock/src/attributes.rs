//! Attribute store shared between a mock device and its handle.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use iio_core::{attr, Attributes, IioError, Result};
use parking_lot::Mutex;
use tracing::debug;

type FrequencyMap = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

#[derive(Default)]
struct AttributeState {
    values: HashMap<String, String>,
    failing_writes: HashSet<String>,
    writes: Vec<(String, String)>,
    effective_frequency: Option<FrequencyMap>,
}

/// In-memory sysfs attribute directory.
///
/// Cloning yields another view of the same store, so a test can keep one
/// clone while the engine owns another. Also usable on its own as a mock
/// trigger device.
#[derive(Clone, Default)]
pub struct MockAttributes {
    state: Arc<Mutex<AttributeState>>,
}

impl fmt::Debug for MockAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockAttributes")
            .field("values", &state.values)
            .field("failing_writes", &state.failing_writes)
            .finish()
    }
}

impl MockAttributes {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock trigger device named `name` with a zero sampling frequency.
    pub fn trigger(name: &str) -> Self {
        let attrs = Self::new();
        attrs.set(attr::NAME, name);
        attrs.set(attr::SAMPLING_FREQUENCY, "0");
        attrs
    }

    /// Set a value directly, bypassing failure injection and the write log.
    pub fn set(&self, name: &str, value: impl Into<String>) {
        self.state.lock().values.insert(name.to_string(), value.into());
    }

    /// Remove an attribute so that reads report it as absent.
    pub fn remove(&self, name: &str) {
        self.state.lock().values.remove(name);
    }

    /// Current value.
    pub fn get(&self, name: &str) -> Option<String> {
        self.state.lock().values.get(name).cloned()
    }

    /// Current value parsed as a real.
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name)?.trim().parse().ok()
    }

    /// Make writes to `name` fail (or succeed again).
    pub fn fail_writes(&self, name: &str, fail: bool) {
        let mut state = self.state.lock();
        if fail {
            state.failing_writes.insert(name.to_string());
        } else {
            state.failing_writes.remove(name);
        }
    }

    /// Map requested sampling frequencies to what the "kernel" programs.
    pub fn set_effective_frequency<F>(&self, map: F)
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        self.state.lock().effective_frequency = Some(Arc::new(map));
    }

    /// Every successful write so far, in order.
    pub fn writes(&self) -> Vec<(String, String)> {
        self.state.lock().writes.clone()
    }

    /// Values successfully written to `name`, in order.
    pub fn writes_to(&self, name: &str) -> Vec<String> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Forget the write log.
    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }
}

impl Attributes for MockAttributes {
    fn read_string_attribute(&self, name: &str) -> Option<String> {
        self.get(name)
            .map(|v| v.trim_end_matches(['\0', '\n']).trim().to_string())
    }

    fn write_string_attribute(&self, name: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.failing_writes.contains(name) {
            debug!(attribute = name, value, "Injected attribute write failure");
            return Err(IioError::attribute_write(name, "injected failure"));
        }

        let stored = match (&state.effective_frequency, name) {
            (Some(map), attr::SAMPLING_FREQUENCY) => match value.trim().parse::<f64>() {
                Ok(requested) => iio_core::format_real(map(requested)),
                Err(_) => value.to_string(),
            },
            _ => value.to_string(),
        };

        state.writes.push((name.to_string(), value.to_string()));
        state.values.insert(name.to_string(), stored);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_roundtrip() {
        let attrs = MockAttributes::new();
        assert_eq!(attrs.read_double_attribute("sampling_frequency"), None);

        attrs.write_double_attribute("sampling_frequency", 12.5).unwrap();
        assert_eq!(attrs.read_double_attribute("sampling_frequency"), Some(12.5));
        assert_eq!(attrs.writes_to("sampling_frequency"), vec!["12.5".to_string()]);

        attrs.set("name", "cros-ec-accel\n");
        assert_eq!(attrs.read_string_attribute("name").as_deref(), Some("cros-ec-accel"));
    }

    #[test]
    fn test_injected_write_failure() {
        let attrs = MockAttributes::new();
        attrs.fail_writes("buffer/hwfifo_timeout", true);
        assert!(attrs.write_double_attribute("buffer/hwfifo_timeout", 0.1).is_err());
        assert!(attrs.writes().is_empty());

        attrs.fail_writes("buffer/hwfifo_timeout", false);
        assert!(attrs.write_double_attribute("buffer/hwfifo_timeout", 0.1).is_ok());
    }

    #[test]
    fn test_effective_frequency_upsampling() {
        let attrs = MockAttributes::new();
        attrs.set_effective_frequency(|f| if f > 0.0 { f * 2.0 } else { 0.0 });

        attrs.write_double_attribute("sampling_frequency", 10.0).unwrap();
        assert_eq!(attrs.read_double_attribute("sampling_frequency"), Some(20.0));
        // The log keeps what was requested
        assert_eq!(attrs.writes_to("sampling_frequency"), vec!["10".to_string()]);
    }
}
