//! Type codecs.
//!
//! The engine never interprets column bytes itself; every encode/decode goes
//! through a [`Codec`] resolved by type OID. The default registry covers the
//! scalar types the protocol layer needs, everything else falls back to the
//! text representation. Registries are per connection, so user overrides never
//! leak across connections.
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::{borrow::Cow, collections::HashMap, fmt, sync::Arc};

use crate::{
    common::ByteStr,
    protocol::{Oid, PgFormat},
    settings::{Encoding, ServerSettings},
    value::Value,
};

/// Well-known type OIDs, from the `pg_type` catalog.
pub mod oid {
    use super::Oid;

    pub const BOOL: Oid = 16;
    pub const BYTEA: Oid = 17;
    pub const NAME: Oid = 19;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const TEXT: Oid = 25;
    pub const FLOAT4: Oid = 700;
    pub const FLOAT8: Oid = 701;
    pub const BPCHAR: Oid = 1042;
    pub const VARCHAR: Oid = 1043;
}

/// An error while encoding or decoding a value.
#[derive(Debug)]
pub struct CodecError {
    message: Cow<'static, str>,
}

impl CodecError {
    pub(crate) fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self { message: message.into() }
    }

    fn length(type_name: &'static str) -> Self {
        Self::new(format!("invalid value length for {type_name}"))
    }

    fn mismatch(type_name: &'static str, value: &Value) -> Self {
        Self::new(format!("cannot encode {value:?} as {type_name}"))
    }
}

impl std::error::Error for CodecError { }

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Encode/decode contract for one postgres type.
///
/// `encode` never sees [`Value::Null`]; NULL is represented by the `-1` length
/// at the bind layer. `decode` receives the raw column bytes, a view into the
/// receive buffer valid for as long as the returned value holds it.
pub trait Codec: Send + Sync {
    /// The type OID this codec serves.
    fn oid(&self) -> Oid;

    /// The wire format this codec speaks.
    fn format(&self) -> PgFormat;

    fn has_encoder(&self) -> bool {
        true
    }

    fn has_decoder(&self) -> bool {
        true
    }

    fn encode(&self, settings: &ServerSettings, value: &Value, buf: &mut BytesMut) -> Result<(), CodecError>;

    fn decode(&self, settings: &ServerSettings, bytes: Bytes) -> Result<Value, CodecError>;
}

fn decode_text(settings: &ServerSettings, bytes: Bytes) -> Result<ByteStr, CodecError> {
    match settings.encoding() {
        Encoding::Utf8 | Encoding::SqlAscii => ByteStr::from_utf8(bytes)
            .map_err(|_| CodecError::new("text value is not valid utf-8")),
        Encoding::Unsupported => Err(CodecError::new(format!(
            "unsupported client_encoding {:?}",
            settings.client_encoding(),
        ))),
    }
}

macro_rules! int_codec {
    ($name:ident, $oid:expr, $ty:ty, $type_name:literal, $put:ident, $get:ident) => {
        pub struct $name;

        impl Codec for $name {
            fn oid(&self) -> Oid { $oid }

            fn format(&self) -> PgFormat { PgFormat::Binary }

            fn encode(&self, _: &ServerSettings, value: &Value, buf: &mut BytesMut) -> Result<(), CodecError> {
                let int = value.as_i64().ok_or_else(|| CodecError::mismatch($type_name, value))?;
                let int = <$ty>::try_from(int).map_err(|_| CodecError::mismatch($type_name, value))?;
                buf.$put(int);
                Ok(())
            }

            fn decode(&self, _: &ServerSettings, mut bytes: Bytes) -> Result<Value, CodecError> {
                if bytes.remaining() != size_of::<$ty>() {
                    return Err(CodecError::length($type_name));
                }
                Ok(bytes.$get().into())
            }
        }
    };
}

int_codec!(Int2Codec, oid::INT2, i16, "int2", put_i16, get_i16);
int_codec!(Int4Codec, oid::INT4, i32, "int4", put_i32, get_i32);
int_codec!(Int8Codec, oid::INT8, i64, "int8", put_i64, get_i64);

macro_rules! float_codec {
    ($name:ident, $oid:expr, $ty:ty, $type_name:literal, $put:ident, $get:ident) => {
        pub struct $name;

        impl Codec for $name {
            fn oid(&self) -> Oid { $oid }

            fn format(&self) -> PgFormat { PgFormat::Binary }

            fn encode(&self, _: &ServerSettings, value: &Value, buf: &mut BytesMut) -> Result<(), CodecError> {
                let float = value.as_f64().ok_or_else(|| CodecError::mismatch($type_name, value))?;
                buf.$put(float as $ty);
                Ok(())
            }

            fn decode(&self, _: &ServerSettings, mut bytes: Bytes) -> Result<Value, CodecError> {
                if bytes.remaining() != size_of::<$ty>() {
                    return Err(CodecError::length($type_name));
                }
                Ok(bytes.$get().into())
            }
        }
    };
}

float_codec!(Float4Codec, oid::FLOAT4, f32, "float4", put_f32, get_f32);
float_codec!(Float8Codec, oid::FLOAT8, f64, "float8", put_f64, get_f64);

pub struct BoolCodec;

impl Codec for BoolCodec {
    fn oid(&self) -> Oid { oid::BOOL }

    fn format(&self) -> PgFormat { PgFormat::Binary }

    fn encode(&self, _: &ServerSettings, value: &Value, buf: &mut BytesMut) -> Result<(), CodecError> {
        match value {
            Value::Bool(b) => {
                buf.put_u8(*b as u8);
                Ok(())
            },
            _ => Err(CodecError::mismatch("bool", value)),
        }
    }

    fn decode(&self, _: &ServerSettings, mut bytes: Bytes) -> Result<Value, CodecError> {
        if bytes.remaining() != 1 {
            return Err(CodecError::length("bool"));
        }
        Ok(Value::Bool(bytes.get_u8() != 0))
    }
}

/// Serves `text`, `varchar`, `bpchar` and `name`; their binary representation
/// is the character bytes themselves.
pub struct TextCodec {
    oid: Oid,
}

impl Codec for TextCodec {
    fn oid(&self) -> Oid { self.oid }

    fn format(&self) -> PgFormat { PgFormat::Binary }

    fn encode(&self, _: &ServerSettings, value: &Value, buf: &mut BytesMut) -> Result<(), CodecError> {
        match value {
            Value::Text(s) => {
                buf.put_slice(s.as_bytes());
                Ok(())
            },
            _ => Err(CodecError::mismatch("text", value)),
        }
    }

    fn decode(&self, settings: &ServerSettings, bytes: Bytes) -> Result<Value, CodecError> {
        decode_text(settings, bytes).map(Value::Text)
    }
}

pub struct ByteaCodec;

impl Codec for ByteaCodec {
    fn oid(&self) -> Oid { oid::BYTEA }

    fn format(&self) -> PgFormat { PgFormat::Binary }

    fn encode(&self, _: &ServerSettings, value: &Value, buf: &mut BytesMut) -> Result<(), CodecError> {
        match value {
            Value::Bytes(b) => {
                buf.put_slice(b);
                Ok(())
            },
            _ => Err(CodecError::mismatch("bytea", value)),
        }
    }

    fn decode(&self, _: &ServerSettings, bytes: Bytes) -> Result<Value, CodecError> {
        Ok(Value::Bytes(bytes))
    }
}

/// Fallback for OIDs without a registered codec: ship both directions in the
/// text format and let the server do the casting.
pub struct TextFallbackCodec {
    oid: Oid,
}

impl Codec for TextFallbackCodec {
    fn oid(&self) -> Oid { self.oid }

    fn format(&self) -> PgFormat { PgFormat::Text }

    fn encode(&self, _: &ServerSettings, value: &Value, buf: &mut BytesMut) -> Result<(), CodecError> {
        match value {
            Value::Bool(b) => buf.put_slice(if *b { b"t" } else { b"f" }),
            Value::Int2(v) => buf.put_slice(itoa::Buffer::new().format(*v).as_bytes()),
            Value::Int4(v) => buf.put_slice(itoa::Buffer::new().format(*v).as_bytes()),
            Value::Int8(v) => buf.put_slice(itoa::Buffer::new().format(*v).as_bytes()),
            Value::Float4(v) => buf.put_slice(v.to_string().as_bytes()),
            Value::Float8(v) => buf.put_slice(v.to_string().as_bytes()),
            Value::Text(s) => buf.put_slice(s.as_bytes()),
            Value::Bytes(b) => {
                // bytea text form: \x followed by lowercase hex
                buf.put_slice(b"\\x");
                for byte in b.iter() {
                    const HEX: &[u8; 16] = b"0123456789abcdef";
                    buf.put_u8(HEX[(byte >> 4) as usize]);
                    buf.put_u8(HEX[(byte & 0xf) as usize]);
                }
            },
            Value::Null => return Err(CodecError::new("NULL reached a codec")),
        }
        Ok(())
    }

    fn decode(&self, settings: &ServerSettings, bytes: Bytes) -> Result<Value, CodecError> {
        decode_text(settings, bytes).map(Value::Text)
    }
}

/// Per-connection codec lookup by type OID.
#[derive(Clone)]
pub struct CodecRegistry {
    by_oid: HashMap<Oid, Arc<dyn Codec>>,
}

impl CodecRegistry {
    /// Register or override a codec for its OID.
    pub fn register(&mut self, codec: Arc<dyn Codec>) {
        self.by_oid.insert(codec.oid(), codec);
    }

    /// Resolve the codec for `oid`, falling back to the text codec.
    pub fn resolve(&self, oid: Oid) -> Arc<dyn Codec> {
        match self.by_oid.get(&oid) {
            Some(codec) => codec.clone(),
            None => Arc::new(TextFallbackCodec { oid }),
        }
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut me = Self { by_oid: HashMap::new() };
        me.register(Arc::new(BoolCodec));
        me.register(Arc::new(Int2Codec));
        me.register(Arc::new(Int4Codec));
        me.register(Arc::new(Int8Codec));
        me.register(Arc::new(Float4Codec));
        me.register(Arc::new(Float8Codec));
        me.register(Arc::new(ByteaCodec));
        me.register(Arc::new(TextCodec { oid: oid::TEXT }));
        me.register(Arc::new(TextCodec { oid: oid::VARCHAR }));
        me.register(Arc::new(TextCodec { oid: oid::BPCHAR }));
        me.register(Arc::new(TextCodec { oid: oid::NAME }));
        me
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry").field("codecs", &self.by_oid.len()).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn int4_binary_roundtrip() {
        let settings = ServerSettings::default();
        let mut buf = BytesMut::new();
        Int4Codec.encode(&settings, &Value::Int4(-7), &mut buf).unwrap();
        assert_eq!(&buf[..], &(-7i32).to_be_bytes());

        let decoded = Int4Codec.decode(&settings, buf.freeze()).unwrap();
        assert_eq!(decoded, Value::Int4(-7));
    }

    #[test]
    fn int_width_checks() {
        let settings = ServerSettings::default();
        let mut buf = BytesMut::new();
        // widening is fine
        Int8Codec.encode(&settings, &Value::Int2(5), &mut buf).unwrap();
        assert_eq!(&buf[..], &5i64.to_be_bytes());
        // narrowing out of range is not
        assert!(Int2Codec.encode(&settings, &Value::Int4(70_000), &mut buf).is_err());
        // short payload
        assert!(Int4Codec.decode(&settings, Bytes::from_static(&[0, 1])).is_err());
    }

    #[test]
    fn text_respects_encoding() {
        let mut settings = ServerSettings::default();
        let codec = TextCodec { oid: oid::TEXT };

        let ok = codec.decode(&settings, Bytes::from_static("héllo".as_bytes())).unwrap();
        assert_eq!(ok.as_str(), Some("héllo"));

        assert!(codec.decode(&settings, Bytes::from_static(&[0xff, 0xfe])).is_err());

        settings.apply("client_encoding".into(), "LATIN1".into());
        assert!(codec.decode(&settings, Bytes::from_static(b"plain")).is_err());
    }

    #[test]
    fn fallback_is_text_format() {
        let registry = CodecRegistry::default();
        let codec = registry.resolve(600); // point, no builtin codec
        assert_eq!(codec.format(), PgFormat::Text);
        assert_eq!(codec.oid(), 600);

        let settings = ServerSettings::default();
        let mut buf = BytesMut::new();
        codec.encode(&settings, &Value::Int4(42), &mut buf).unwrap();
        assert_eq!(&buf[..], b"42");
    }

    #[test]
    fn bytea_text_form() {
        let settings = ServerSettings::default();
        let mut buf = BytesMut::new();
        TextFallbackCodec { oid: oid::BYTEA }
            .encode(&settings, &Value::Bytes(Bytes::from_static(&[0xde, 0xad])), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], b"\\xdead");
    }
}
