//! Row descriptors and decoded rows.
use bytes::Buf;
use std::{collections::HashMap, sync::Arc, sync::OnceLock};

use crate::{
    Result,
    codec::{CodecError, CodecRegistry},
    common::ByteStr,
    ext::BytesExt,
    protocol::{Oid, ProtocolError, backend},
    settings::ServerSettings,
    value::Value,
};

/// One column of a `RowDescription`.
///
/// <https://www.postgresql.org/docs/current/protocol-message-formats.html#PROTOCOL-MESSAGE-FORMATS-ROWDESCRIPTION>
#[derive(Debug, Clone)]
pub struct FieldDescription {
    /// The field name.
    pub name: ByteStr,
    /// If the field can be identified as a column of a specific table,
    /// the object ID of the table; otherwise zero.
    pub table_oid: i32,
    /// The attribute number of the column, when identifiable; otherwise zero.
    pub column_attnum: i16,
    /// The object ID of the field's data type.
    pub type_oid: Oid,
    /// The data type size. Negative values denote variable-width types.
    pub type_size: i16,
    /// The type modifier.
    pub type_modifier: i32,
    /// The format code being used for the field.
    ///
    /// For a statement described before execution this is always zero; the
    /// format actually used is the one requested in `Bind`.
    pub format_code: i16,
}

/// The column layout of rows about to be returned.
#[derive(Debug, Default)]
pub struct RowDescriptor {
    fields: Vec<FieldDescription>,
    by_name: OnceLock<HashMap<ByteStr, usize>>,
}

impl RowDescriptor {
    pub(crate) fn parse(msg: backend::RowDescription) -> Result<RowDescriptor, ProtocolError> {
        let mut body = msg.body;
        let mut fields = Vec::with_capacity(msg.field_len as usize);

        for _ in 0..msg.field_len {
            let name = body
                .get_nul_bytestr()
                .and_then(|r| r.ok())
                .ok_or(ProtocolError::Malformed { message: "RowDescription" })?;
            if body.remaining() < 18 {
                return Err(ProtocolError::malformed("RowDescription"));
            }
            fields.push(FieldDescription {
                name,
                table_oid: body.get_i32(),
                column_attnum: body.get_i16(),
                type_oid: body.get_u32(),
                type_size: body.get_i16(),
                type_modifier: body.get_i32(),
                format_code: body.get_i16(),
            });
        }

        Ok(RowDescriptor { fields, by_name: OnceLock::new() })
    }

    pub fn fields(&self) -> &[FieldDescription] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position of the column named `name`.
    ///
    /// The name→index map is built once, on first lookup; duplicated names
    /// resolve to the leftmost column.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        let map = self.by_name.get_or_init(|| {
            let mut map = HashMap::with_capacity(self.fields.len());
            for (i, field) in self.fields.iter().enumerate() {
                map.entry(field.name.clone()).or_insert(i);
            }
            map
        });
        map.get(name).copied()
    }

    /// Decode one `DataRow` through the registry.
    pub(crate) fn decode_row(
        desc: &Arc<RowDescriptor>,
        registry: &CodecRegistry,
        settings: &ServerSettings,
        row: backend::DataRow,
    ) -> Result<Row> {
        if row.column_len as usize != desc.fields.len() {
            return Err(ProtocolError::malformed("DataRow").into());
        }

        let mut body = row.body;
        let mut values = Vec::with_capacity(desc.fields.len());

        for field in &desc.fields {
            if body.remaining() < 4 {
                return Err(ProtocolError::malformed("DataRow").into());
            }
            let len = body.get_i32();
            if len < 0 {
                values.push(Value::Null);
                continue;
            }
            let len = len as usize;
            if body.remaining() < len {
                return Err(ProtocolError::malformed("DataRow").into());
            }
            let bytes = body.split_to(len);
            let codec = registry.resolve(field.type_oid);
            if !codec.has_decoder() {
                return Err(CodecError::new(format!(
                    "no decoder registered for type oid {}",
                    field.type_oid,
                ))
                .into());
            }
            values.push(codec.decode(settings, bytes)?);
        }

        Ok(Row { desc: desc.clone(), values })
    }
}

/// One decoded result row.
#[derive(Debug)]
pub struct Row {
    desc: Arc<RowDescriptor>,
    values: Vec<Value>,
}

impl Row {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn descriptor(&self) -> &RowDescriptor {
        &self.desc
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.values.get(self.desc.index_of(name)?)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// The command tag of a `CommandComplete`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTag {
    tag: ByteStr,
}

impl CommandTag {
    pub(crate) fn new(tag: bytes::Bytes) -> Result<CommandTag, ProtocolError> {
        match ByteStr::from_utf8(tag) {
            Ok(tag) => Ok(CommandTag { tag }),
            Err(_) => Err(ProtocolError::malformed("CommandComplete")),
        }
    }

    /// Substitute tag for an `EmptyQueryResponse`.
    pub(crate) fn empty() -> CommandTag {
        CommandTag { tag: ByteStr::from_static("EMPTY") }
    }

    pub fn as_str(&self) -> &str {
        self.tag.as_str()
    }

    /// The row count carried by the tag, zero when the command reports none.
    pub fn rows_affected(&self) -> u64 {
        let mut whs = self.tag.split_whitespace();
        let Some(tag) = whs.next() else {
            return 0;
        };
        let Some(rows) = whs.next() else {
            return 0;
        };
        match tag {
            "INSERT" => whs.next().unwrap_or_default(),
            "SELECT" => rows,
            "UPDATE" => rows,
            "DELETE" => rows,
            "MERGE" => rows,
            "FETCH" => rows,
            "MOVE" => rows,
            "COPY" => rows,
            _ => return 0,
        }
        .parse()
        .unwrap_or_default()
    }
}

impl std::fmt::Display for CommandTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one execute-style operation.
#[derive(Debug)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    /// Absent when the portal was suspended by the row limit.
    pub tag: Option<CommandTag>,
    /// The row limit was reached; issue another execute on the same portal to
    /// resume.
    pub suspended: bool,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::protocol::backend::BackendProtocol;
    use bytes::{BufMut, Bytes, BytesMut};

    pub(crate) fn desc_int4_text() -> Arc<RowDescriptor> {
        let mut body = BytesMut::new();
        body.put_u16(2);
        for (name, oid) in [("id", 23u32), ("label", 25u32)] {
            body.put_slice(name.as_bytes());
            body.put_u8(0);
            body.put_i32(0);
            body.put_i16(0);
            body.put_u32(oid);
            body.put_i16(-1);
            body.put_i32(-1);
            body.put_i16(0);
        }
        let msg = backend::RowDescription::decode(b'T', body.freeze()).unwrap();
        Arc::new(RowDescriptor::parse(msg).unwrap())
    }

    fn data_row(cols: &[Option<&[u8]>]) -> backend::DataRow {
        let mut body = BytesMut::new();
        body.put_u16(cols.len() as u16);
        for col in cols {
            match col {
                Some(value) => {
                    body.put_i32(value.len() as i32);
                    body.put_slice(value);
                },
                None => body.put_i32(-1),
            }
        }
        backend::DataRow::decode(b'D', body.freeze()).unwrap()
    }

    #[test]
    fn descriptor_parse_and_lookup() {
        let desc = desc_int4_text();
        assert_eq!(desc.len(), 2);
        assert_eq!(desc.fields()[0].name, "id");
        assert_eq!(desc.fields()[1].type_oid, 25);
        assert_eq!(desc.index_of("label"), Some(1));
        assert_eq!(desc.index_of("nope"), None);
    }

    #[test]
    fn decode_row_with_null() {
        let desc = desc_int4_text();
        let registry = CodecRegistry::default();
        let settings = ServerSettings::default();

        let row = RowDescriptor::decode_row(
            &desc,
            &registry,
            &settings,
            data_row(&[Some(&1i32.to_be_bytes()), None]),
        )
        .unwrap();
        assert_eq!(row.get(0), Some(&Value::Int4(1)));
        assert_eq!(row.get(1), Some(&Value::Null));
        assert_eq!(row.get_by_name("id"), Some(&Value::Int4(1)));
    }

    #[test]
    fn decode_row_column_count_mismatch() {
        let desc = desc_int4_text();
        let registry = CodecRegistry::default();
        let settings = ServerSettings::default();

        let err = RowDescriptor::decode_row(
            &desc,
            &registry,
            &settings,
            data_row(&[Some(&1i32.to_be_bytes())]),
        )
        .unwrap_err();
        assert!(matches!(err.kind(), crate::ErrorKind::Protocol(_)));
    }

    #[test]
    fn command_tags() {
        let tag = CommandTag::new(Bytes::from_static(b"INSERT 0 5")).unwrap();
        assert_eq!(tag.rows_affected(), 5);

        let tag = CommandTag::new(Bytes::from_static(b"SELECT 3")).unwrap();
        assert_eq!(tag.rows_affected(), 3);

        let tag = CommandTag::new(Bytes::from_static(b"BEGIN")).unwrap();
        assert_eq!(tag.rows_affected(), 0);

        assert_eq!(CommandTag::empty().as_str(), "EMPTY");
    }
}
