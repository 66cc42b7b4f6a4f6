//! Backend property values.

use serde::{Deserialize, Serialize};

/// Value held by a backend property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum BusValue {
    /// No value available
    #[default]
    Invalid,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    String(String),
}

impl BusValue {
    pub fn is_valid(&self) -> bool {
        !matches!(self, Self::Invalid)
    }

    /// Numeric view of the value. Booleans map to 0/1, strings have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Int(i) => Some(*i as f64),
            Self::UInt(u) => Some(*u as f64),
            Self::Double(d) => Some(*d),
            Self::Invalid | Self::String(_) => None,
        }
    }
}

impl std::fmt::Display for BusValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid => write!(f, "<invalid>"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::UInt(u) => write!(f, "{}", u),
            Self::Double(d) => write!(f, "{}", d),
            Self::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for BusValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for BusValue {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<f64> for BusValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<bool> for BusValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for BusValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

/// Native value kind of a backend property, parsed from its bus type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BusValueType {
    /// `y`
    Byte,
    /// `b`
    Bool,
    /// `n`
    Int16,
    /// `q`
    UInt16,
    /// `i`
    Int32,
    /// `u`
    UInt32,
    /// `x`
    Int64,
    /// `t`
    UInt64,
    /// `d`
    Double,
    /// `s`
    String,
    /// Unrecognized type code
    Untyped,
}

impl BusValueType {
    /// Parse a bus type code. Unknown codes yield `Untyped`.
    pub fn from_code(code: &str) -> Self {
        match code {
            "y" => Self::Byte,
            "b" => Self::Bool,
            "n" => Self::Int16,
            "q" => Self::UInt16,
            "i" => Self::Int32,
            "u" => Self::UInt32,
            "x" => Self::Int64,
            "t" => Self::UInt64,
            "d" => Self::Double,
            "s" => Self::String,
            _ => Self::Untyped,
        }
    }

    /// Inclusive integer range representable by this type.
    pub fn integer_range(&self) -> Option<(f64, f64)> {
        match self {
            Self::Byte => Some((0.0, u8::MAX as f64)),
            Self::Int16 => Some((i16::MIN as f64, i16::MAX as f64)),
            Self::UInt16 => Some((0.0, u16::MAX as f64)),
            Self::Int32 => Some((i32::MIN as f64, i32::MAX as f64)),
            Self::UInt32 => Some((0.0, u32::MAX as f64)),
            Self::Int64 => Some((i64::MIN as f64, i64::MAX as f64)),
            Self::UInt64 => Some((0.0, u64::MAX as f64)),
            _ => None,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, Self::Int16 | Self::Int32 | Self::Int64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_type_codes() {
        assert_eq!(BusValueType::from_code("d"), BusValueType::Double);
        assert_eq!(BusValueType::from_code("q"), BusValueType::UInt16);
        assert_eq!(BusValueType::from_code("s"), BusValueType::String);
        assert_eq!(BusValueType::from_code("z"), BusValueType::Untyped);
        assert_eq!(BusValueType::from_code(""), BusValueType::Untyped);
    }

    #[test]
    fn test_numeric_view() {
        assert_eq!(BusValue::Bool(true).as_f64(), Some(1.0));
        assert_eq!(BusValue::Int(-4).as_f64(), Some(-4.0));
        assert_eq!(BusValue::Double(5.5).as_f64(), Some(5.5));
        assert_eq!(BusValue::from("abc").as_f64(), None);
        assert!(!BusValue::Invalid.is_valid());
    }

    #[test]
    fn test_untagged_json() {
        let v: BusValue = serde_json::from_str("12.5").unwrap();
        assert_eq!(v, BusValue::Double(12.5));
        let v: BusValue = serde_json::from_str("-3").unwrap();
        assert_eq!(v, BusValue::Int(-3));
        let v: BusValue = serde_json::from_str("\"AB\"").unwrap();
        assert_eq!(v, BusValue::String("AB".into()));
        let v: BusValue = serde_json::from_str("null").unwrap();
        assert_eq!(v, BusValue::Invalid);
    }
}
