//! Conversion between register words and backend property values.
//!
//! Registers are big-endian: for multi-register values the most significant
//! word comes first. Strings are packed two Latin-1 bytes per register, high
//! byte first, zero padded to the span and truncated beyond it.

use std::borrow::Cow;

use tracing::warn;

use crate::error::{MappingError, MappingResult};
use crate::schema::{DataKind, RegisterEntry};
use crate::value::{BusValue, BusValueType};

/// Register word at `sub_offset` within the span holding `value`.
///
/// Invalid values decode as 0.
pub fn decode_register(value: &BusValue, kind: DataKind, sub_offset: i32, scale_factor: f64) -> u16 {
    if !value.is_valid() {
        return 0;
    }
    match kind {
        DataKind::Int16 | DataKind::UInt16 => scaled(value, scale_factor) as u16,
        DataKind::Int32 | DataKind::UInt32 => {
            let v = scaled(value, scale_factor) as u32;
            if sub_offset == 0 {
                (v >> 16) as u16
            } else {
                (v & 0xFFFF) as u16
            }
        }
        DataKind::String(_) => {
            let bytes = latin1_bytes(value);
            let index = 2 * sub_offset.max(0) as usize;
            let high = bytes.get(index).copied().unwrap_or(0);
            let low = bytes.get(index + 1).copied().unwrap_or(0);
            u16::from_be_bytes([high, low])
        }
    }
}

/// Every register word of an entry's span.
pub fn decode_span(value: &BusValue, entry: &RegisterEntry) -> Vec<u16> {
    (0..entry.size)
        .map(|i| decode_register(value, entry.data_kind, i, entry.scale_factor))
        .collect()
}

/// Build the backend value for a write of `words` starting at `offset`
/// within `entry`'s span.
///
/// A write covering the whole span uses the words as given. A partial write
/// decodes `current` into the full span first and overwrites only the
/// written words, so untouched registers keep their value.
pub fn encode_registers(
    current: &BusValue,
    entry: &RegisterEntry,
    offset: i32,
    words: &[u16],
) -> MappingResult<BusValue> {
    let count = words.len() as i32;
    if offset < 0 || count == 0 || offset + count > entry.size {
        return Err(MappingError::Service(format!(
            "Write of {} registers at offset {} does not fit {}",
            count, offset, entry.object_path
        )));
    }

    let span: Cow<'_, [u16]> = if offset == 0 && count == entry.size {
        Cow::Borrowed(words)
    } else {
        let mut span = decode_span(current, entry);
        span[offset as usize..(offset + count) as usize].copy_from_slice(words);
        Cow::Owned(span)
    };

    let raw = combine(entry.data_kind, &span);
    to_bus_value(raw, entry.bus_type, entry.scale_factor).ok_or_else(|| {
        MappingError::Service(format!("Could not convert value from {}", entry.object_path))
    })
}

/// Register-side value of a complete span.
#[derive(Debug, Clone, PartialEq)]
enum RawValue {
    Number(f64),
    Text(String),
}

fn combine(kind: DataKind, span: &[u16]) -> RawValue {
    let wide = || span.iter().fold(0u32, |acc, w| (acc << 16) | *w as u32);
    match kind {
        DataKind::Int16 => RawValue::Number(span[0] as i16 as f64),
        DataKind::UInt16 => RawValue::Number(span[0] as f64),
        DataKind::Int32 => RawValue::Number(wide() as i32 as f64),
        DataKind::UInt32 => RawValue::Number(wide() as f64),
        DataKind::String(_) => {
            let text = span
                .iter()
                .flat_map(|w| w.to_be_bytes())
                .take_while(|b| *b != 0)
                .map(char::from)
                .collect();
            RawValue::Text(text)
        }
    }
}

/// Convert a register-side value to the backend's declared type, dividing
/// by the scale factor. `None` when the value has no valid representation.
fn to_bus_value(raw: RawValue, bus_type: BusValueType, scale_factor: f64) -> Option<BusValue> {
    let number = match raw {
        RawValue::Text(text) => {
            return (bus_type == BusValueType::String).then_some(BusValue::String(text));
        }
        RawValue::Number(number) => number,
    };

    match bus_type {
        BusValueType::Double => Some(BusValue::Double(number / scale_factor)),
        BusValueType::Bool => Some(BusValue::Bool(number != 0.0)),
        BusValueType::String => None,
        BusValueType::Untyped => {
            warn!("Cannot convert {} to an untyped property", number);
            None
        }
        integer => {
            let (min, max) = integer.integer_range()?;
            let value = (number / scale_factor).round();
            if !(min..=max).contains(&value) {
                return None;
            }
            if integer.is_signed() {
                Some(BusValue::Int(value as i64))
            } else {
                Some(BusValue::UInt(value as u64))
            }
        }
    }
}

/// Numeric value multiplied by the scale factor and rounded.
fn scaled(value: &BusValue, scale_factor: f64) -> i64 {
    match value {
        BusValue::Bool(b) => *b as i64,
        BusValue::Int(_) | BusValue::UInt(_) | BusValue::Double(_) => value
            .as_f64()
            .map(|v| (v * scale_factor).round() as i64)
            .unwrap_or(0),
        BusValue::String(s) => {
            warn!("Cannot convert string value '{}' to a numeric register", s);
            0
        }
        BusValue::Invalid => 0,
    }
}

fn latin1_bytes(value: &BusValue) -> Vec<u8> {
    let text: Cow<'_, str> = match value {
        BusValue::String(s) => Cow::Borrowed(s),
        other => Cow::Owned(other.to_string()),
    };
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}
