//! Decoding of raw buffer records.
//!
//! A record holds one storage word per enabled channel, in channel order.
//! Each element starts on the next 8-byte boundary when it does not fit in
//! what remains of the current 8-byte block.

use std::collections::BTreeMap;

use crate::channel::ChannelSpec;
use crate::error::{IioError, Result};

/// One device sample: channel index to value.
pub type IioSample = BTreeMap<i32, i64>;

/// Byte offset of every enabled channel, plus the unpadded end of the record.
fn layout<'a, F>(channels: &'a [ChannelSpec], is_enabled: F) -> (Vec<(&'a ChannelSpec, usize)>, usize)
where
    F: Fn(&ChannelSpec) -> bool,
{
    let mut pos = 0usize;
    let mut offsets = Vec::with_capacity(channels.len());

    for channel in channels.iter().filter(|ch| is_enabled(*ch)) {
        let len = channel.scan_type.length_bytes();
        if len == 0 {
            continue;
        }
        let space_in_block = 8 - pos % 8;
        if len > space_in_block {
            pos += space_in_block;
        }
        offsets.push((channel, pos));
        pos += len;
    }

    (offsets, pos)
}

/// Size in bytes of one record, padded to its largest element.
pub fn record_size<F>(channels: &[ChannelSpec], is_enabled: F) -> usize
where
    F: Fn(&ChannelSpec) -> bool,
{
    let (offsets, end) = layout(channels, is_enabled);
    let align = offsets
        .iter()
        .map(|(ch, _)| ch.scan_type.length_bytes().min(8))
        .max()
        .unwrap_or(1);
    end.div_ceil(align) * align
}

/// Decode one record into channel values.
///
/// Only channels for which `is_enabled` holds take part in the layout and
/// appear in the result.
pub fn decode_sample<F>(channels: &[ChannelSpec], is_enabled: F, record: &[u8]) -> Result<IioSample>
where
    F: Fn(&ChannelSpec) -> bool,
{
    let (offsets, end) = layout(channels, is_enabled);
    if record.len() < end {
        return Err(IioError::ShortRead {
            got: record.len(),
            expected: end,
        });
    }

    Ok(offsets
        .into_iter()
        .map(|(channel, offset)| {
            let len = channel.scan_type.length_bytes();
            (channel.index, channel.scan_type.decode(&record[offset..offset + len]))
        })
        .collect())
}
