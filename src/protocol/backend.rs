//! Postgres Backend Messages
use bytes::{Buf, Bytes};

use super::{Oid, ProtocolError, TransactionStatus};
use crate::{common::ByteStr, ext::BytesExt};

/// A type that can be decoded from a postgres backend message.
pub trait BackendProtocol: Sized {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError>;
}

/// Postgres backend messages.
#[derive(Debug)]
pub enum BackendMessage {
    Authentication(Authentication),
    BackendKeyData(BackendKeyData),
    BindComplete(BindComplete),
    CloseComplete(CloseComplete),
    CommandComplete(CommandComplete),
    CopyData(CopyData),
    CopyDone(CopyDone),
    CopyInResponse(CopyInResponse),
    CopyOutResponse(CopyOutResponse),
    DataRow(DataRow),
    EmptyQueryResponse(EmptyQueryResponse),
    ErrorResponse(ErrorResponse),
    NegotiateProtocolVersion(NegotiateProtocolVersion),
    NoData(NoData),
    NoticeResponse(NoticeResponse),
    NotificationResponse(NotificationResponse),
    ParameterDescription(ParameterDescription),
    ParameterStatus(ParameterStatus),
    ParseComplete(ParseComplete),
    PortalSuspended(PortalSuspended),
    ReadyForQuery(ReadyForQuery),
    RowDescription(RowDescription),
}

macro_rules! match_backend {
    ($($name:ident,)*) => {
        impl BackendMessage {
            pub fn msgtype(&self) -> u8 {
                match self {
                    $(Self::$name(_) => $name::MSGTYPE,)*
                }
            }

            /// Get message name from message type.
            ///
            /// Returns `"Unknown"` for unknown message type.
            pub fn message_name(msgtype: u8) -> &'static str {
                match msgtype {
                    $($name::MSGTYPE => stringify!($name),)*
                    _ => "Unknown",
                }
            }

            /// Error for a message that does not belong to the given protocol phase.
            pub fn unexpected(&self, phase: &'static str) -> ProtocolError {
                ProtocolError::unexpected_phase(self.msgtype(), phase)
            }
        }
        impl BackendProtocol for BackendMessage {
            fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
                let message = match msgtype {
                    $($name::MSGTYPE => Self::$name(<$name as BackendProtocol>::decode(msgtype, body)?),)*
                    _ => return Err(ProtocolError::unknown(msgtype)),
                };
                Ok(message)
            }
        }
    };
}

match_backend! {
    Authentication,
    BackendKeyData,
    BindComplete,
    CloseComplete,
    CommandComplete,
    CopyData,
    CopyDone,
    CopyInResponse,
    CopyOutResponse,
    DataRow,
    EmptyQueryResponse,
    ErrorResponse,
    NegotiateProtocolVersion,
    NoData,
    NoticeResponse,
    NotificationResponse,
    ParameterDescription,
    ParameterStatus,
    ParseComplete,
    PortalSuspended,
    ReadyForQuery,
    RowDescription,
}

macro_rules! assert_msgtype {
    ($typ:ident) => {
        if Self::MSGTYPE != $typ {
            return Err(ProtocolError::unexpected(Self::MSGTYPE, $typ))
        }
    };
}

macro_rules! need {
    ($body:ident, $n:expr, $name:literal) => {
        if $body.remaining() < $n {
            return Err(ProtocolError::malformed($name));
        }
    };
}

fn nul_bytestr(body: &mut Bytes, name: &'static str) -> Result<ByteStr, ProtocolError> {
    body.get_nul_bytestr()
        .and_then(|r| r.ok())
        .ok_or(ProtocolError::Malformed { message: name })
}

/// Identifies the message as an authentication request.
#[derive(Debug)]
pub enum Authentication {
    /// Specifies that the authentication was successful.
    Ok,
    /// Specifies that Kerberos V5 authentication is required.
    KerberosV5,
    /// Specifies that a clear-text password is required.
    CleartextPassword,
    /// Specifies that an MD5-encrypted password is required.
    MD5Password {
        /// The salt to use when encrypting the password.
        salt: [u8; 4],
    },
    /// Specifies that GSSAPI authentication is required.
    GSS,
    /// GSSAPI or SSPI authentication data.
    GSSContinue {
        data: Bytes,
    },
    /// Specifies that SSPI authentication is required.
    SSPI,
    /// Specifies that SASL authentication is required.
    SASL {
        /// List of SASL authentication mechanisms, in the server's order of
        /// preference, each nul terminated, with a final empty terminator.
        mechanisms: Bytes,
    },
    /// Specifies that this message contains a SASL challenge.
    SASLContinue {
        /// SASL data, specific to the SASL mechanism being used.
        data: Bytes,
    },
    /// Specifies that SASL authentication has completed.
    SASLFinal {
        /// SASL outcome "additional data", specific to the SASL mechanism being used.
        data: Bytes,
    },
}

impl Authentication {
    pub const MSGTYPE: u8 = b'R';

    /// Iterate the mechanism names of a `SASL` request.
    pub fn sasl_mechanisms(mechanisms: &Bytes) -> impl Iterator<Item = &str> {
        mechanisms
            .split(|b| *b == 0)
            .take_while(|m| !m.is_empty())
            .filter_map(|m| std::str::from_utf8(m).ok())
    }
}

impl BackendProtocol for Authentication {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        need!(body, 4, "Authentication");
        let auth = match body.get_u32() {
            0 => Authentication::Ok,
            2 => Authentication::KerberosV5,
            3 => Authentication::CleartextPassword,
            5 => {
                need!(body, 4, "AuthenticationMD5Password");
                Authentication::MD5Password { salt: body.get_u32().to_be_bytes() }
            },
            7 => Authentication::GSS,
            8 => Authentication::GSSContinue { data: body },
            9 => Authentication::SSPI,
            10 => Authentication::SASL { mechanisms: body },
            11 => Authentication::SASLContinue { data: body },
            12 => Authentication::SASLFinal { data: body },
            auth => return Err(ProtocolError::unknown_auth(auth)),
        };
        Ok(auth)
    }
}

/// Identifies the message as cancellation key data.
///
/// The frontend must save these values if it wishes to be able to issue
/// CancelRequest messages later.
#[derive(Debug, Clone, Copy)]
pub struct BackendKeyData {
    /// The process ID of this backend.
    pub process_id: i32,
    /// The secret key of this backend.
    pub secret_key: i32,
}

impl BackendKeyData {
    pub const MSGTYPE: u8 = b'K';
}

impl BackendProtocol for BackendKeyData {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        need!(body, 8, "BackendKeyData");
        Ok(Self {
            process_id: body.get_i32(),
            secret_key: body.get_i32(),
        })
    }
}

/// Identifies the message as a run-time parameter status report.
#[derive(Debug)]
pub struct ParameterStatus {
    /// The name of the run-time parameter being reported.
    pub name: ByteStr,
    /// The current value of the parameter.
    pub value: ByteStr,
}

impl ParameterStatus {
    pub const MSGTYPE: u8 = b'S';
}

impl BackendProtocol for ParameterStatus {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            name: nul_bytestr(&mut body, "ParameterStatus")?,
            value: nul_bytestr(&mut body, "ParameterStatus")?,
        })
    }
}

/// Identifies the message as an asynchronous notification, in response to
/// `LISTEN`/`NOTIFY`.
#[derive(Debug)]
pub struct NotificationResponse {
    /// The process ID of the notifying backend process.
    pub process_id: i32,
    /// The name of the channel that the notify has been raised on.
    pub channel: ByteStr,
    /// The “payload” string passed from the notifying process.
    pub payload: ByteStr,
}

impl NotificationResponse {
    pub const MSGTYPE: u8 = b'A';
}

impl BackendProtocol for NotificationResponse {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        need!(body, 4, "NotificationResponse");
        Ok(Self {
            process_id: body.get_i32(),
            channel: nul_bytestr(&mut body, "NotificationResponse")?,
            payload: nul_bytestr(&mut body, "NotificationResponse")?,
        })
    }
}

/// A warning message. The frontend should display the message.
///
/// The body layout is identical to [`ErrorResponse`].
#[derive(Debug)]
pub struct NoticeResponse {
    pub body: Bytes,
}

impl NoticeResponse {
    pub const MSGTYPE: u8 = b'N';

    pub fn fields(&self) -> FieldIter {
        FieldIter { body: self.body.clone() }
    }
}

impl BackendProtocol for NoticeResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(NoticeResponse { body })
    }
}

/// Identifies the message as an error.
///
/// The message body consists of one or more identified fields, followed by a zero byte as a terminator.
/// Fields can appear in any order.
///
/// For each field there is the following:
///
/// `Byte1` A code identifying the field type; if zero, this is the message terminator and no string follows.
/// The presently defined field types are listed in Section 53.8.
/// Since more field types might be added in future,
/// frontends should silently ignore fields of unrecognized type.
///
/// `String` The field value.
#[derive(Debug)]
pub struct ErrorResponse {
    pub body: Bytes,
}

impl ErrorResponse {
    pub const MSGTYPE: u8 = b'E';

    pub fn fields(&self) -> FieldIter {
        FieldIter { body: self.body.clone() }
    }
}

impl BackendProtocol for ErrorResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { body })
    }
}

/// Iterator over the `(code, value)` fields of an [`ErrorResponse`] or
/// [`NoticeResponse`] body.
#[derive(Debug)]
pub struct FieldIter {
    body: Bytes,
}

impl Iterator for FieldIter {
    type Item = (u8, Bytes);

    fn next(&mut self) -> Option<Self::Item> {
        if !self.body.has_remaining() {
            return None;
        }
        let code = self.body.get_u8();
        if code == 0 {
            return None;
        }
        let value = self.body.get_nul_bytes()?;
        Some((code, value))
    }
}

/// Identifies the message as a row description.
#[derive(Debug)]
pub struct RowDescription {
    /// Specifies the number of fields in a row (can be zero).
    pub field_len: u16,
    /// Undecoded per-field descriptors.
    pub body: Bytes,
}

impl RowDescription {
    pub const MSGTYPE: u8 = b'T';
}

impl BackendProtocol for RowDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        need!(body, 2, "RowDescription");
        Ok(Self {
            field_len: body.get_u16(),
            body,
        })
    }
}

/// Identifies the message as a data row.
#[derive(Debug)]
pub struct DataRow {
    /// The number of column values that follow (possibly zero).
    pub column_len: u16,
    pub body: Bytes,
}

impl DataRow {
    pub const MSGTYPE: u8 = b'D';
}

impl BackendProtocol for DataRow {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        need!(body, 2, "DataRow");
        Ok(Self {
            column_len: body.get_u16(),
            body,
        })
    }
}

/// Identifies the message as a parameter description.
#[derive(Debug)]
pub struct ParameterDescription {
    /// The number of parameters used by the statement (can be zero).
    pub param_len: u16,
    /// The object ID of each parameter data type.
    pub oids: Bytes,
}

impl ParameterDescription {
    pub const MSGTYPE: u8 = b't';

    pub fn to_vec(&self) -> Result<Vec<Oid>, ProtocolError> {
        let mut oids = self.oids.clone();
        let mut out = Vec::with_capacity(self.param_len as usize);
        for _ in 0..self.param_len {
            if oids.remaining() < 4 {
                return Err(ProtocolError::malformed("ParameterDescription"));
            }
            out.push(oids.get_u32());
        }
        Ok(out)
    }
}

impl BackendProtocol for ParameterDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        need!(body, 2, "ParameterDescription");
        Ok(Self {
            param_len: body.get_u16(),
            oids: body,
        })
    }
}

/// Identifies the message as a command-completed response.
///
/// For an INSERT command, the tag is `INSERT oid rows`, where rows is the number
/// of rows inserted, and oid is always 0 nowadays.
///
/// For DELETE, UPDATE, MERGE, SELECT, MOVE, FETCH and COPY the tag is the
/// command word followed by the affected row count.
#[derive(Debug)]
pub struct CommandComplete {
    /// The command tag. This is usually a single word that identifies which SQL command was completed.
    pub tag: Bytes,
}

impl CommandComplete {
    pub const MSGTYPE: u8 = b'C';
}

impl BackendProtocol for CommandComplete {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        let tag = body.get_nul_bytes().ok_or(ProtocolError::Malformed { message: "CommandComplete" })?;
        Ok(Self { tag })
    }
}

/// ReadyForQuery is sent whenever the backend is ready for a new query cycle.
///
/// One arrives after the startup phase, and exactly one closes every simple
/// query cycle and every Sync-terminated extended-query sequence.
#[derive(Debug, Clone, Copy)]
pub struct ReadyForQuery {
    /// Current backend transaction status indicator.
    pub status: TransactionStatus,
}

impl ReadyForQuery {
    pub const MSGTYPE: u8 = b'Z';
}

impl BackendProtocol for ReadyForQuery {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        need!(body, 1, "ReadyForQuery");
        Ok(Self { status: TransactionStatus::from_byte(body.get_u8()) })
    }
}

/// Identifies the message as a protocol version negotiation message.
#[derive(Debug)]
pub struct NegotiateProtocolVersion {
    /// Newest minor protocol version supported by the server for the major protocol version requested by the client.
    pub minor: u32,
    /// Number of protocol options not recognized by the server.
    pub len: u32,
    /// The option names not recognized by the server, nul terminated each.
    pub opt_names: Bytes,
}

impl NegotiateProtocolVersion {
    pub const MSGTYPE: u8 = b'v';
}

impl BackendProtocol for NegotiateProtocolVersion {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        need!(body, 8, "NegotiateProtocolVersion");
        Ok(Self {
            minor: body.get_u32(),
            len: body.get_u32(),
            opt_names: body,
        })
    }
}

fn decode_copy_response(body: &mut Bytes, name: &'static str) -> Result<(i8, Vec<PgFormatCode>), ProtocolError> {
    if body.remaining() < 3 {
        return Err(ProtocolError::Malformed { message: name });
    }
    let format = body.get_i8();
    let columns = body.get_i16();
    let mut formats = Vec::with_capacity(columns.max(0) as usize);
    for _ in 0..columns {
        if body.remaining() < 2 {
            return Err(ProtocolError::Malformed { message: name });
        }
        formats.push(body.get_i16());
    }
    Ok((format, formats))
}

type PgFormatCode = i16;

/// Identifies the message as a Start Copy In response.
///
/// The frontend must now send copy-in data; it is ready to copy data into a table.
#[derive(Debug)]
pub struct CopyInResponse {
    /// 0 indicates the overall COPY format is textual.
    /// 1 indicates the overall copy format is binary.
    pub format: i8,
    /// The format codes to be used for each column.
    /// All must be zero if the overall copy format is textual.
    pub column_formats: Vec<PgFormatCode>,
}

impl CopyInResponse {
    pub const MSGTYPE: u8 = b'G';
}

impl BackendProtocol for CopyInResponse {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        let (format, column_formats) = decode_copy_response(&mut body, "CopyInResponse")?;
        Ok(Self { format, column_formats })
    }
}

/// Identifies the message as a Start Copy Out response.
///
/// This message will be followed by copy-out data.
#[derive(Debug)]
pub struct CopyOutResponse {
    /// 0 indicates the overall COPY format is textual.
    /// 1 indicates the overall copy format is binary.
    pub format: i8,
    /// The format codes to be used for each column.
    pub column_formats: Vec<PgFormatCode>,
}

impl CopyOutResponse {
    pub const MSGTYPE: u8 = b'H';
}

impl BackendProtocol for CopyOutResponse {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        let (format, column_formats) = decode_copy_response(&mut body, "CopyOutResponse")?;
        Ok(Self { format, column_formats })
    }
}

/// Identifies the message as COPY data.
///
/// Messages sent from the backend will always correspond to single data rows.
#[derive(Debug)]
pub struct CopyData {
    pub body: Bytes,
}

impl CopyData {
    pub const MSGTYPE: u8 = b'd';
}

impl BackendProtocol for CopyData {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { body })
    }
}

macro_rules! unit_msg {
    ($(
        $(#[$doc:meta])* struct $name:ident, $ty:literal;
    )*) => {$(
            $(#[$doc])*
            #[derive(Debug)]
            pub struct $name;

            impl $name {
                pub const MSGTYPE: u8 = $ty;
            }

            impl BackendProtocol for $name {
                fn decode(msgtype: u8, _: Bytes) -> Result<Self, ProtocolError> {
                    if $name::MSGTYPE != msgtype {
                        return Err(ProtocolError::unexpected(Self::MSGTYPE, msgtype))
                    }
                    Ok(Self)
                }
            }
    )*};
}

unit_msg! {
    /// Identifies the message as a Bind-complete indicator.
    struct BindComplete, b'2';

    /// Identifies the message as a Close-complete indicator.
    struct CloseComplete, b'3';

    /// Identifies the message as a COPY-complete indicator.
    struct CopyDone, b'c';

    /// Identifies the message as a response to an empty query string.
    ///
    /// This substitutes for CommandComplete.
    struct EmptyQueryResponse, b'I';

    /// Identifies the message as a no-data indicator.
    struct NoData, b'n';

    /// Identifies the message as a Parse-complete indicator.
    struct ParseComplete, b'1';

    /// Identifies the message as a portal-suspended indicator.
    ///
    /// Note this only appears if an Execute message's row-count limit was reached.
    struct PortalSuspended, b's';
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn authentication_variants() {
        let ok = Authentication::decode(b'R', Bytes::from_static(&[0, 0, 0, 0])).unwrap();
        assert!(matches!(ok, Authentication::Ok));

        let md5 = Authentication::decode(b'R', Bytes::from_static(&[0, 0, 0, 5, 1, 2, 3, 4])).unwrap();
        assert!(matches!(md5, Authentication::MD5Password { salt: [1, 2, 3, 4] }));

        let sasl = Authentication::decode(
            b'R',
            Bytes::from_static(b"\x00\x00\x00\x0aSCRAM-SHA-256\0\0"),
        )
        .unwrap();
        let Authentication::SASL { mechanisms } = sasl else { panic!() };
        let names: Vec<_> = Authentication::sasl_mechanisms(&mechanisms).collect();
        assert_eq!(names, ["SCRAM-SHA-256"]);
    }

    #[test]
    fn ready_for_query_status() {
        let rfq = ReadyForQuery::decode(b'Z', Bytes::from_static(b"E")).unwrap();
        assert_eq!(rfq.status, TransactionStatus::InFailedTransaction);
    }

    #[test]
    fn parameter_status() {
        let ps = ParameterStatus::decode(b'S', Bytes::from_static(b"client_encoding\0UTF8\0")).unwrap();
        assert_eq!(ps.name, "client_encoding");
        assert_eq!(ps.value, "UTF8");
    }

    #[test]
    fn notification() {
        let body = Bytes::from_static(b"\x00\x00\x00\x2achan\0payload\0");
        let n = NotificationResponse::decode(b'A', body).unwrap();
        assert_eq!(n.process_id, 42);
        assert_eq!(n.channel, "chan");
        assert_eq!(n.payload, "payload");
    }

    #[test]
    fn error_response_fields() {
        let body = Bytes::from_static(b"SERROR\0C23505\0Mduplicate key\0\0");
        let err = ErrorResponse::decode(b'E', body).unwrap();
        let fields: Vec<_> = err
            .fields()
            .map(|(c, v)| (c, String::from_utf8(v.to_vec()).unwrap()))
            .collect();
        assert_eq!(fields, [
            (b'S', "ERROR".to_string()),
            (b'C', "23505".to_string()),
            (b'M', "duplicate key".to_string()),
        ]);
    }

    #[test]
    fn copy_in_response() {
        let body = Bytes::from_static(&[1, 0, 2, 0, 1, 0, 1]);
        let copy = CopyInResponse::decode(b'G', body).unwrap();
        assert_eq!(copy.format, 1);
        assert_eq!(copy.column_formats, [1, 1]);
    }

    #[test]
    fn parameter_description_oids() {
        let body = Bytes::from_static(&[0, 2, 0, 0, 0, 23, 0, 0, 0, 25]);
        let desc = ParameterDescription::decode(b't', body).unwrap();
        assert_eq!(desc.to_vec().unwrap(), [23, 25]);
    }

    #[test]
    fn dispatch_and_names() {
        let msg = BackendMessage::decode(b'Z', Bytes::from_static(b"I")).unwrap();
        assert!(matches!(msg, BackendMessage::ReadyForQuery(_)));
        assert_eq!(BackendMessage::message_name(b'Z'), "ReadyForQuery");
        assert_eq!(BackendMessage::message_name(b'!'), "Unknown");

        let err = BackendMessage::decode(b'!', Bytes::new()).unwrap_err();
        assert!(matches!(err, ProtocolError::Unexpected { .. }));
    }
}
