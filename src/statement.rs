//! Prepared statement handles and server-side object naming.
use bytes::{BufMut, BytesMut};
use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use crate::{
    Result,
    codec::{CodecError, CodecRegistry},
    ext::UsizeExt,
    protocol::{Oid, PgFormat, backend},
    row::{Row, RowDescriptor},
    settings::ServerSettings,
    value::Value,
};

type AtomicId = std::sync::atomic::AtomicU16;

/// A short unique server-side object name.
#[derive(Clone, PartialEq, Eq)]
pub struct Id([u8; 6]);

impl Id {
    pub(crate) fn unnamed() -> Self {
        Self([b'?'; 6])
    }

    pub(crate) fn next(prefix: u8, atomic: &AtomicId) -> Self {
        let id = atomic.fetch_add(1, Ordering::SeqCst);
        let mut buf = [prefix, b'0', b'0', b'0', b'0', b'0'];
        let len = buf.len();

        let mut b = itoa::Buffer::new();
        let id = b.format(id);
        let i = id.as_bytes();
        buf[len - i.len()..].copy_from_slice(i);

        Self(buf)
    }

    pub fn as_str(&self) -> &str {
        if self.is_unnamed() {
            return "";
        }
        // SAFETY: string only construction and is immutable
        unsafe { std::str::from_utf8_unchecked(&self.0[..]) }
    }

    pub fn is_unnamed(&self) -> bool {
        self.0[0] == b'?'
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("Id").field(&self.as_str()).finish()
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

macro_rules! delegate {
    ($name:ident, $prefix:literal) => {
        #[derive(Clone, PartialEq, Eq)]
        pub struct $name(Id);

        impl $name {
            /// The empty name, selecting the unnamed server-side object.
            pub fn unnamed() -> Self {
                Self(Id::unnamed())
            }

            /// Generate a fresh unique name.
            pub fn next() -> Self {
                static ID: AtomicId = AtomicId::new(0);
                Self(Id::next($prefix, &ID))
            }
        }

        impl std::ops::Deref for $name {
            type Target = Id;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.as_str()).finish()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

delegate!(StatementName, b's');
delegate!(PortalName, b'p');

/// A prepared statement handle.
///
/// Created by [`Connection::prepare`][1], shared between the caller and the
/// engine. The server-side statement is closed once every handle called
/// [`Connection::close_statement`][2] and the reference count reached zero.
///
/// [1]: crate::Connection::prepare
/// [2]: crate::Connection::close_statement
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    inner: Arc<StatementInner>,
}

#[derive(Debug)]
struct StatementInner {
    name: String,
    query: String,
    params: OnceLock<Vec<Oid>>,
    row_desc: OnceLock<Arc<RowDescriptor>>,
    refs: AtomicU32,
    closed: AtomicBool,
}

impl PreparedStatement {
    pub(crate) fn new(name: String, query: String) -> Self {
        Self {
            inner: Arc::new(StatementInner {
                name,
                query,
                params: OnceLock::new(),
                row_desc: OnceLock::new(),
                refs: AtomicU32::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// The server-side statement name, empty for the unnamed statement.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn query(&self) -> &str {
        &self.inner.query
    }

    /// Parameter type OIDs, populated by `Describe` during prepare.
    pub fn parameters(&self) -> &[Oid] {
        self.inner.params.get().map(Vec::as_slice).unwrap_or_default()
    }

    /// Column layout of the statement's result set, `None` when the statement
    /// returns no rows.
    pub fn row_descriptor(&self) -> Option<&Arc<RowDescriptor>> {
        self.inner.row_desc.get()
    }

    pub fn refs(&self) -> u32 {
        self.inner.refs.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn set_args_desc(&self, oids: Vec<Oid>) {
        let _ = self.inner.params.set(oids);
    }

    pub(crate) fn set_row_desc(&self, desc: Arc<RowDescriptor>) {
        let _ = self.inner.row_desc.set(desc);
    }

    pub(crate) fn add_ref(&self) {
        self.inner.refs.fetch_add(1, Ordering::SeqCst);
    }

    /// Drop one reference, returns the remaining count.
    pub(crate) fn release(&self) -> u32 {
        self.inner
            .refs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |refs| Some(refs.saturating_sub(1)))
            .map(|prev| prev.saturating_sub(1))
            .unwrap_or(0)
    }

    pub(crate) fn mark_closed(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    /// Build the `Bind` parameter section and format arrays for `args`.
    pub(crate) fn encode_bind(
        &self,
        registry: &CodecRegistry,
        settings: &ServerSettings,
        args: &[Value],
    ) -> Result<BindData> {
        let oids = self.parameters();
        if args.len() != oids.len() {
            return Err(CodecError::new(format!(
                "statement expects {} parameters, got {}",
                oids.len(),
                args.len(),
            ))
            .into());
        }

        let mut param_formats = Vec::with_capacity(args.len());
        let mut params = BytesMut::new();

        for (arg, oid) in args.iter().zip(oids) {
            let codec = registry.resolve(*oid);
            param_formats.push(codec.format());

            if arg.is_null() {
                params.put_i32(-1);
                continue;
            }
            if !codec.has_encoder() {
                return Err(CodecError::new(format!("no encoder registered for type oid {oid}")).into());
            }

            let len_offset = params.len();
            params.put_i32(0);
            codec.encode(settings, arg, &mut params)?;
            let written = params.len() - len_offset - 4;
            let mut slot = &mut params[len_offset..];
            slot.put_i32(written.to_i32());
        }

        let result_formats = match self.row_descriptor() {
            Some(desc) => desc
                .fields()
                .iter()
                .map(|field| {
                    let codec = registry.resolve(field.type_oid);
                    match codec.has_decoder() {
                        true => codec.format(),
                        false => PgFormat::Text,
                    }
                })
                .collect(),
            None => Vec::new(),
        };

        Ok(BindData {
            params_len: args.len().to_u16(),
            param_formats,
            params,
            result_formats,
        })
    }

    /// Decode one `DataRow` belonging to this statement.
    pub(crate) fn decode_row(
        &self,
        registry: &CodecRegistry,
        settings: &ServerSettings,
        row: backend::DataRow,
    ) -> Result<Row> {
        let desc = self
            .row_descriptor()
            .ok_or_else(|| CodecError::new("statement returns no rows"))?;
        RowDescriptor::decode_row(desc, registry, settings, row)
    }
}

/// Pre-encoded `Bind` payload.
#[derive(Debug)]
pub(crate) struct BindData {
    pub param_formats: Vec<PgFormat>,
    pub params_len: u16,
    pub params: BytesMut,
    pub result_formats: Vec<PgFormat>,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::protocol::backend::BackendProtocol;

    fn described_stmt() -> PreparedStatement {
        let stmt = PreparedStatement::new(StatementName::next().as_str().into(), "SELECT $1::int".into());
        stmt.set_args_desc(vec![23]);

        let mut body = BytesMut::new();
        body.put_u16(1);
        body.put_slice(b"int4\0");
        body.put_i32(0);
        body.put_i16(0);
        body.put_u32(23);
        body.put_i16(4);
        body.put_i32(-1);
        body.put_i16(0);
        let msg = backend::RowDescription::decode(b'T', body.freeze()).unwrap();
        stmt.set_row_desc(Arc::new(RowDescriptor::parse(msg).unwrap()));
        stmt
    }

    #[test]
    fn generated_names_are_unique() {
        let a = StatementName::next();
        let b = StatementName::next();
        assert_ne!(a.as_str(), b.as_str());
        assert!(a.as_str().starts_with('s'));
        assert_eq!(a.as_str().len(), 6);
        assert_eq!(StatementName::unnamed().as_str(), "");
    }

    #[test]
    fn encode_bind_null_writes_minus_one() {
        let stmt = described_stmt();
        let bind = stmt
            .encode_bind(&CodecRegistry::default(), &ServerSettings::default(), &[Value::Null])
            .unwrap();

        assert_eq!(bind.params_len, 1);
        assert_eq!(&bind.params[..], &(-1i32).to_be_bytes());
        assert_eq!(bind.param_formats, [PgFormat::Binary]);
        assert_eq!(bind.result_formats, [PgFormat::Binary]);
    }

    #[test]
    fn encode_bind_value_is_length_prefixed() {
        let stmt = described_stmt();
        let bind = stmt
            .encode_bind(&CodecRegistry::default(), &ServerSettings::default(), &[Value::Int4(258)])
            .unwrap();

        assert_eq!(&bind.params[..], b"\x00\x00\x00\x04\x00\x00\x01\x02");
    }

    #[test]
    fn encode_bind_arity_mismatch() {
        let stmt = described_stmt();
        let err = stmt
            .encode_bind(&CodecRegistry::default(), &ServerSettings::default(), &[])
            .unwrap_err();
        assert!(matches!(err.kind(), crate::ErrorKind::Codec(_)));
    }

    #[test]
    fn refcount_lifecycle() {
        let stmt = described_stmt();
        assert_eq!(stmt.refs(), 1);
        stmt.add_ref();
        assert_eq!(stmt.refs(), 2);
        assert_eq!(stmt.release(), 1);
        assert_eq!(stmt.release(), 0);
        assert_eq!(stmt.release(), 0);
        assert!(!stmt.is_closed());
        stmt.mark_closed();
        assert!(stmt.is_closed());
    }
}
