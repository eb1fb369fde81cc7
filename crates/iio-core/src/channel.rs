//! Channel layout as exposed by `scan_elements/`.
//!
//! Every buffered IIO channel advertises its record layout through
//! `scan_elements/in_<id>_type`, e.g. `le:s12/16>>4`:
//!
//! ```text
//! [be|le]:[s|u]<bits>/<storagebits>[X<repeat>][>><shift>]
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::IioError;

/// Byte order of a channel's storage word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    /// Little endian (`le`)
    #[default]
    Little,
    /// Big endian (`be`)
    Big,
}

/// Parsed `in_<id>_type` of a scan element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanType {
    /// Byte order of the storage word
    pub endianness: Endianness,
    /// Whether the value is two's complement
    pub signed: bool,
    /// Number of meaningful bits
    pub bits: u8,
    /// Bits occupied in the record (a multiple of 8)
    pub storage_bits: u8,
    /// Number of consecutive storage words
    pub repeat: u8,
    /// Right shift applied before masking
    pub shift: u8,
}

impl ScanType {
    /// Little-endian type with `bits == storage_bits` and no shift.
    pub fn new(signed: bool, storage_bits: u8) -> Self {
        Self {
            endianness: Endianness::Little,
            signed,
            bits: storage_bits,
            storage_bits,
            repeat: 1,
            shift: 0,
        }
    }

    /// Bytes occupied in a record, repeats included.
    pub fn length_bytes(&self) -> usize {
        usize::from(self.storage_bits).div_ceil(8) * usize::from(self.repeat.max(1))
    }

    /// Decode the first storage word of `raw`.
    ///
    /// `raw` must hold at least one storage word. The value is shifted,
    /// masked to `bits` and sign-extended when signed.
    pub fn decode(&self, raw: &[u8]) -> i64 {
        let word = usize::from(self.storage_bits).div_ceil(8).min(8);
        let bytes = &raw[..word.min(raw.len())];

        let mut value: u64 = 0;
        match self.endianness {
            Endianness::Little => {
                for &b in bytes.iter().rev() {
                    value = (value << 8) | u64::from(b);
                }
            }
            Endianness::Big => {
                for &b in bytes {
                    value = (value << 8) | u64::from(b);
                }
            }
        }

        value >>= self.shift;
        let bits = u32::from(self.bits);
        if bits >= 64 {
            return value as i64;
        }
        value &= (1u64 << bits) - 1;
        if self.signed && bits > 0 {
            let pad = 64 - bits;
            ((value << pad) as i64) >> pad
        } else {
            value as i64
        }
    }
}

impl FromStr for ScanType {
    type Err = IioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || IioError::InvalidScanType {
            value: s.to_string(),
        };
        let s_trim = s.trim_end_matches(['\0', '\n']).trim();

        let (endian, rest) = s_trim.split_once(':').ok_or_else(invalid)?;
        let endianness = match endian {
            "le" => Endianness::Little,
            "be" => Endianness::Big,
            _ => return Err(invalid()),
        };

        let signed = match rest.chars().next() {
            Some('s') | Some('S') => true,
            Some('u') | Some('U') => false,
            _ => return Err(invalid()),
        };
        let rest = &rest[1..];

        let (bits, rest) = rest.split_once('/').ok_or_else(invalid)?;
        let (storage_repeat, shift) = match rest.split_once(">>") {
            Some((head, shift)) => (head, shift.parse::<u8>().map_err(|_| invalid())?),
            None => (rest, 0),
        };
        let (storage, repeat) = match storage_repeat.split_once('X') {
            Some((storage, repeat)) => (storage, repeat.parse::<u8>().map_err(|_| invalid())?),
            None => (storage_repeat, 1),
        };

        let bits: u8 = bits.parse().map_err(|_| invalid())?;
        let storage_bits: u8 = storage.parse().map_err(|_| invalid())?;

        if storage_bits == 0 || storage_bits > 64 || storage_bits % 8 != 0 {
            return Err(invalid());
        }
        if bits == 0 || bits > storage_bits || u32::from(shift) + u32::from(bits) > 64 {
            return Err(invalid());
        }

        Ok(Self {
            endianness,
            signed,
            bits,
            storage_bits,
            repeat: repeat.max(1),
            shift,
        })
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let endian = match self.endianness {
            Endianness::Little => "le",
            Endianness::Big => "be",
        };
        let sign = if self.signed { 's' } else { 'u' };
        write!(f, "{}:{}{}/{}", endian, sign, self.bits, self.storage_bits)?;
        if self.repeat > 1 {
            write!(f, "X{}", self.repeat)?;
        }
        write!(f, ">>{}", self.shift)
    }
}

/// One channel of a device, in record order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    /// Position in the device descriptor; stable for the device's lifetime
    pub index: i32,
    /// Channel id as named in sysfs, e.g. `accel_x` or `timestamp`
    pub id: String,
    /// Record layout
    pub scan_type: ScanType,
    /// Excluded from window averaging; the latest value is reported as-is
    pub no_batch: bool,
}

impl ChannelSpec {
    /// Create a channel; timestamps and counters are marked no-batch.
    pub fn new(index: i32, id: impl Into<String>, scan_type: ScanType) -> Self {
        let id = id.into();
        let no_batch = is_no_batch_id(&id);
        Self {
            index,
            id,
            scan_type,
            no_batch,
        }
    }

    /// Override the no-batch classification.
    pub fn with_no_batch(mut self, no_batch: bool) -> Self {
        self.no_batch = no_batch;
        self
    }
}

/// Channels whose values are meaningless when averaged.
pub fn is_no_batch_id(id: &str) -> bool {
    id == "timestamp" || id.ends_with("count")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scan_type() {
        let t: ScanType = "le:s12/16>>4".parse().unwrap();
        assert_eq!(t.endianness, Endianness::Little);
        assert!(t.signed);
        assert_eq!((t.bits, t.storage_bits, t.shift, t.repeat), (12, 16, 4, 1));
        assert_eq!(t.length_bytes(), 2);

        let t: ScanType = "be:u32/32X2>>0\n".parse().unwrap();
        assert_eq!(t.endianness, Endianness::Big);
        assert!(!t.signed);
        assert_eq!(t.repeat, 2);
        assert_eq!(t.length_bytes(), 8);

        let t: ScanType = "le:s64/64".parse().unwrap();
        assert_eq!(t.shift, 0);
        assert_eq!(t.to_string(), "le:s64/64>>0");
    }

    #[test]
    fn test_parse_scan_type_rejects_garbage() {
        for bad in ["", "le", "xx:s16/16>>0", "le:q16/16", "le:s16/12", "le:s20/20", "le:s0/16"] {
            assert!(bad.parse::<ScanType>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_decode_shift_mask_sign() {
        // 12 significant bits stored in the top of a 16-bit word
        let t: ScanType = "le:s12/16>>4".parse().unwrap();
        let raw = ((-5i16 as u16) << 4).to_le_bytes();
        assert_eq!(t.decode(&raw), -5);

        let t: ScanType = "le:u12/16>>4".parse().unwrap();
        let raw = (0xABCu16 << 4 | 0xF).to_le_bytes();
        assert_eq!(t.decode(&raw), 0xABC);

        let t: ScanType = "be:s16/16>>0".parse().unwrap();
        assert_eq!(t.decode(&(-300i16).to_be_bytes()), -300);

        let t = ScanType::new(true, 64);
        assert_eq!(t.decode(&i64::MIN.to_le_bytes()), i64::MIN);
    }

    #[test]
    fn test_no_batch_classification() {
        let ts = ChannelSpec::new(3, "timestamp", ScanType::new(true, 64));
        assert!(ts.no_batch);
        let steps = ChannelSpec::new(0, "step_count", ScanType::new(false, 32));
        assert!(steps.no_batch);
        let x = ChannelSpec::new(0, "accel_x", ScanType::new(true, 16));
        assert!(!x.no_batch);
        assert!(x.with_no_batch(true).no_batch);
    }
}
