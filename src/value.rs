//! Decoded postgres values.
use bytes::Bytes;

use crate::common::ByteStr;

/// A single postgres value, decoded from or encodable into a wire column.
///
/// Text and binary payloads share the receive buffer ([`ByteStr`]/[`Bytes`]
/// are reference counted views), so materializing a row does not copy values.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// SQL NULL. On the wire this is a `-1` length, no value bytes.
    #[default]
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(ByteStr),
    Bytes(Bytes),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view of any integral variant, for width-tolerant encoding.
    pub(crate) fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int2(v) => Some(*v as i64),
            Value::Int4(v) => Some(*v as i64),
            Value::Int8(v) => Some(*v),
            _ => None,
        }
    }

    pub(crate) fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float4(v) => Some(*v as f64),
            Value::Float8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

macro_rules! from {
    ($($ty:ty => $variant:ident,)*) => {$(
        impl From<$ty> for Value {
            fn from(value: $ty) -> Value {
                Value::$variant(value.into())
            }
        }
    )*};
}

from! {
    bool => Bool,
    i16 => Int2,
    i32 => Int4,
    i64 => Int8,
    f32 => Float4,
    f64 => Float8,
    String => Text,
    Bytes => Bytes,
}

impl From<&str> for Value {
    fn from(value: &str) -> Value {
        Value::Text(ByteStr::copy_from_str(value))
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Value {
        Value::Bytes(Bytes::from(value))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Value {
        match value {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn option_maps_to_null() {
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some(7i32)), Value::Int4(7));
    }

    #[test]
    fn integral_widening() {
        assert_eq!(Value::Int2(3).as_i64(), Some(3));
        assert_eq!(Value::Int8(-9).as_i64(), Some(-9));
        assert_eq!(Value::Text("3".into()).as_i64(), None);
    }
}
