//! Sampling frequency band of a device.

use crate::error::{IioError, Result};

/// Frequencies below this are treated as "off".
pub const FREQUENCY_EPSILON: f64 = 0.001;

/// Advertised `[min, max]` sampling band in Hz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyBand {
    /// Lowest non-zero rate the device supports
    pub min: f64,
    /// Highest rate the device supports
    pub max: f64,
}

impl FrequencyBand {
    /// Clamp a requested rate into the band.
    ///
    /// Rates below [`FREQUENCY_EPSILON`] become `0.0` (off).
    pub fn fix(&self, frequency: f64) -> f64 {
        if frequency < FREQUENCY_EPSILON {
            0.0
        } else if frequency < self.min {
            self.min
        } else if frequency > self.max {
            self.max
        } else {
            frequency
        }
    }
}

/// Parse a `sampling_frequency_available` attribute.
///
/// The last entry is the maximum. The first is the minimum unless it is
/// zero, in which case the second entry is. Entries in between are ignored.
pub fn parse_frequency_table(available: &str) -> Result<FrequencyBand> {
    let tokens: Vec<&str> = available
        .trim_end_matches('\0')
        .split_whitespace()
        .collect();

    let parse = |token: &str| -> Result<f64> {
        token
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| IioError::bad_device(format!("invalid frequency '{token}'")))
    };

    match tokens.as_slice() {
        [] => Err(IioError::bad_device("empty sampling_frequency_available")),
        [only] => {
            let value = parse(*only)?;
            if value < FREQUENCY_EPSILON {
                return Err(IioError::bad_device(format!(
                    "single available frequency {value} is below {FREQUENCY_EPSILON}"
                )));
            }
            Ok(FrequencyBand {
                min: value,
                max: value,
            })
        }
        [first, second, rest @ ..] => {
            let last = rest.last().unwrap_or(second);
            let max = parse(*last)?;
            if max < FREQUENCY_EPSILON {
                return Err(IioError::bad_device(format!(
                    "max frequency {max} is below {FREQUENCY_EPSILON}"
                )));
            }
            let mut min = parse(*first)?;
            if min == 0.0 {
                min = parse(*second)?;
            }
            if min > max {
                return Err(IioError::bad_device(format!(
                    "min frequency {min} exceeds max {max}"
                )));
            }
            Ok(FrequencyBand { min, max })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band(s: &str) -> Option<(f64, f64)> {
        parse_frequency_table(s).ok().map(|b| (b.min, b.max))
    }

    #[test]
    fn test_parse_frequency_table() {
        assert_eq!(band(""), None);
        assert_eq!(band("  "), None);
        assert_eq!(band("  0abc  "), None);
        assert_eq!(band(" 0.0001 "), None);
        assert_eq!(band("0.5  "), Some((0.5, 0.5)));
        assert_eq!(band("  1000  "), Some((1000.0, 1000.0)));
        assert_eq!(band("1.0 100.0 "), Some((1.0, 100.0)));
        assert_eq!(band("1.0 10.0 100.0 "), Some((1.0, 100.0)));
        assert_eq!(band("1.0 a b c 100.0 "), Some((1.0, 100.0)));
        assert_eq!(band("0.0 a b c 100.0 "), None);
        assert_eq!(band("0.0 1.0 100.0 "), Some((1.0, 100.0)));
        assert_eq!(band("0.0 2.0 a b c 100.0 "), Some((2.0, 100.0)));
        assert_eq!(band("0.000000 1.250000 40.000000\0"), Some((1.25, 40.0)));
    }

    #[test]
    fn test_parse_frequency_table_bounds() {
        // max below epsilon
        assert_eq!(band("0.0 0.0"), None);
        // min above max
        assert_eq!(band("50.0 40.0"), None);
        // zero first entry with two entries uses the max as min
        assert_eq!(band("0.0 40.0"), Some((40.0, 40.0)));
    }

    #[test]
    fn test_fix() {
        let band = FrequencyBand {
            min: 1.25,
            max: 40.0,
        };
        assert_eq!(band.fix(0.0), 0.0);
        assert_eq!(band.fix(0.0009), 0.0);
        assert_eq!(band.fix(0.5), 1.25);
        assert_eq!(band.fix(10.0), 10.0);
        assert_eq!(band.fix(100.0), 40.0);
        assert_eq!(band.fix(-3.0), 0.0);
    }
}
