//! Postgres Frontend Messages
//!
//! All struct fields here mirror the actual message sent to postgres.
use bytes::{BufMut, BytesMut};

use super::{Oid, PgFormat};
use crate::ext::{BufMutExt, StrExt, UsizeExt};

// Frontend messages not modeled here:
// FunctionCall('F')
// GSSENCRequest
// GSSENCResponse('p')
// SSLRequest

/// Write a frontend message to `buf`.
///
/// Consecutive calls append to the same buffer, so a whole
/// Sync-terminated flight can be built before flushing once.
pub fn write<F: FrontendProtocol>(msg: F, buf: &mut BytesMut) {
    // msgtype + length
    const PREFIX: usize = 1 + 4;

    let size = msg.size_hint();
    buf.reserve(PREFIX + size as usize);

    let offset = buf.len();
    buf.put_u8(F::MSGTYPE);
    buf.put_i32(4 + size);

    msg.encode(&mut *buf);

    assert_eq!(
        buf.len() - offset,
        PREFIX + size as usize,
        "[BUG] Frontend Message body not equal to size hint"
    );
}

/// A type which can be encoded into a postgres frontend message.
///
/// For historical reasons, the very first message sent by the client (the startup message)
/// has no initial message-type byte.
///
/// Thus, [`Startup`] and [`CancelRequest`] do not implement [`FrontendProtocol`]
pub trait FrontendProtocol {
    /// message type
    const MSGTYPE: u8;

    /// size of the main body
    ///
    /// note that this is *only* the size of main body as oppose of actual postgres message
    fn size_hint(&self) -> i32;

    /// write the main body of the message
    ///
    /// `buf` have the length returned from `size_hint`
    ///
    /// writing less or past length results in panic
    fn encode(self, buf: impl BufMut);
}

/// Postgres Startup frontend message.
///
/// For historical reasons, the very first message sent by the client (the startup message)
/// has no initial message-type byte.
///
/// Thus, [`Startup`] does not implement [`FrontendProtocol`]
#[derive(Debug)]
pub struct Startup<'a> {
    /// The database user name to connect as. Required; there is no default.
    pub user: &'a str,
    /// The database to connect to. Defaults to the user name.
    pub database: Option<&'a str>,
    /// Reported in `pg_stat_activity.application_name`.
    pub application_name: Option<&'a str>,
    /// Additional run-time parameters, applied as session defaults during
    /// backend start.
    pub params: &'a [(String, String)],
}

impl Startup<'_> {
    pub fn write(self, buf: &mut BytesMut) {
        let offset = buf.len();

        // Length of message contents in bytes, including self.
        // reserve 4 bytes for length
        buf.put_i32(0);

        // Int32(196608)
        // The protocol version number.
        // The most significant 16 bits are the major version number (3 for the protocol described here).
        // The least significant 16 bits are the minor version number (0 for the protocol described here).
        buf.put_i32(196608);

        // The protocol version number is followed by one or more pairs of parameter name and value strings.

        buf.put_nul_string("user");
        buf.put_nul_string(self.user);

        if let Some(db) = self.database {
            buf.put_nul_string("database");
            buf.put_nul_string(db);
        }

        if let Some(app) = self.application_name {
            buf.put_nul_string("application_name");
            buf.put_nul_string(app);
        }

        // Parameter names beginning with _pq_. are reserved for use as protocol extensions,
        // while others are treated as run-time parameters to be set at backend start time.
        for (name, value) in self.params {
            buf.put_nul_string(name);
            buf.put_nul_string(value);
        }

        // A zero byte is required as a terminator after the last name/value pair.
        buf.put_u8(b'\0');

        // write the length
        let mut written_buf = &mut buf[offset..];
        let len = written_buf.len().to_i32();
        written_buf.put_i32(len);
    }
}

/// Asks the server to abort the query currently running on another connection.
///
/// Sent *instead of* a [`Startup`] message on a connection of its own; the
/// server replies nothing and closes the connection.
///
/// <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-CANCELING-REQUESTS>
#[derive(Debug, Clone, Copy)]
pub struct CancelRequest {
    /// The process ID of the target backend.
    pub process_id: i32,
    /// The secret key for the target backend.
    pub secret_key: i32,
}

impl CancelRequest {
    /// The cancel request code. The value is chosen to contain 1234 in the
    /// most significant 16 bits, and 5678 in the least significant 16 bits.
    pub const CODE: i32 = 80877102;

    pub fn write(self, buf: &mut BytesMut) {
        buf.put_i32(16); // message length, including self
        buf.put_i32(Self::CODE);
        buf.put_i32(self.process_id);
        buf.put_i32(self.secret_key);
    }
}

/// Identifies the message as a password response.
///
/// Also used for the MD5 response, where the password field carries the
/// salted hash instead.
#[derive(Debug)]
pub struct PasswordMessage<'a> {
    /// The password (encrypted, if requested).
    pub password: &'a str,
}

impl FrontendProtocol for PasswordMessage<'_> {
    const MSGTYPE: u8 = b'p';

    fn size_hint(&self) -> i32 {
        self.password.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.password);
    }
}

/// Identifies the message as an initial SASL response.
///
/// Shares the `'p'` message type with [`PasswordMessage`]; the backend tells
/// them apart from the authentication state.
#[derive(Debug)]
pub struct SaslInitialResponse<'a> {
    /// Name of the SASL authentication mechanism that the client selected.
    pub mechanism: &'a str,
    /// SASL mechanism specific "Initial Client Response".
    pub response: &'a [u8],
}

impl FrontendProtocol for SaslInitialResponse<'_> {
    const MSGTYPE: u8 = b'p';

    fn size_hint(&self) -> i32 {
        self.mechanism.nul_string_len() + 4 + self.response.len().to_i32()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.mechanism);
        buf.put_i32(self.response.len().to_i32());
        buf.put_slice(self.response);
    }
}

/// Identifies the message as a SASL mechanism specific response to a server challenge.
#[derive(Debug)]
pub struct SaslResponse<'a> {
    /// SASL mechanism specific message data.
    pub response: &'a [u8],
}

impl FrontendProtocol for SaslResponse<'_> {
    const MSGTYPE: u8 = b'p';

    fn size_hint(&self) -> i32 {
        self.response.len().to_i32()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_slice(self.response);
    }
}

/// Identifies the message as a simple query.
pub struct Query<'a> {
    /// the query string itself
    pub sql: &'a str,
}

impl FrontendProtocol for Query<'_> {
    const MSGTYPE: u8 = b'Q';

    fn size_hint(&self) -> i32 {
        self.sql.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.sql);
    }
}

/// Identifies the message as a Parse command.
pub struct Parse<'a> {
    /// prepared statement name (an empty string selects the unnamed prepared statement).
    pub prepare_name: &'a str,
    /// The query string to be parsed.
    pub sql: &'a str,
    /// Specifies the object ID of the parameter data type.
    ///
    /// Note that this is not an indication of the number of parameters that might appear in the query string,
    /// only the number that the frontend wants to prespecify types for.
    ///
    /// Placing a zero here is equivalent to leaving the type unspecified.
    pub param_oids: &'a [Oid],
}

impl FrontendProtocol for Parse<'_> {
    const MSGTYPE: u8 = b'P';

    fn size_hint(&self) -> i32 {
        self.prepare_name.nul_string_len() +
        self.sql.nul_string_len() +
        2 +
        (self.param_oids.len().to_i32() * 4)
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.prepare_name);
        buf.put_nul_string(self.sql);
        buf.put_u16(self.param_oids.len().to_u16());
        for oid in self.param_oids {
            buf.put_u32(*oid);
        }
    }
}

/// Identifies the message as a Bind command.
///
/// Parameter values are pre-encoded by the statement layer: each value is its
/// `Int32` length (`-1` for NULL) followed by the value bytes in the format
/// indicated by the matching format code.
pub struct Bind<'a> {
    /// The name of the destination portal (an empty string selects the unnamed portal).
    pub portal_name: &'a str,
    /// The name of the source prepared statement (an empty string selects the unnamed prepared statement).
    pub stmt_name: &'a str,
    /// One format code per parameter.
    pub param_formats: &'a [PgFormat],
    /// The number of parameter values that follow (possibly zero).
    ///
    /// This must match the number of parameters needed by the query.
    pub params_len: u16,
    /// The length-prefixed parameter values, one after another.
    pub params: &'a [u8],
    /// One format code per result column.
    pub result_formats: &'a [PgFormat],
}

impl FrontendProtocol for Bind<'_> {
    const MSGTYPE: u8 = b'B';

    fn size_hint(&self) -> i32 {
        self.portal_name.nul_string_len() +
        self.stmt_name.nul_string_len() +
        // param format code count (i16) + codes (i16[])
        2 + (self.param_formats.len().to_i32() * 2) +
        // param count (i16) + pre-encoded values
        2 + self.params.len().to_i32() +
        // result format code count (i16) + codes (i16[])
        2 + (self.result_formats.len().to_i32() * 2)
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.portal_name);
        buf.put_nul_string(self.stmt_name);

        buf.put_u16(self.param_formats.len().to_u16());
        for format in self.param_formats {
            buf.put_u16(format.format_code());
        }

        buf.put_u16(self.params_len);
        buf.put_slice(self.params);

        buf.put_u16(self.result_formats.len().to_u16());
        for format in self.result_formats {
            buf.put_u16(format.format_code());
        }
    }
}

/// Identifies the message as a Describe command.
pub struct Describe<'a> {
    /// 'S' to describe a prepared statement; or 'P' to describe a portal.
    pub kind: u8,
    /// The name of the prepared statement or portal to describe
    /// (an empty string selects the unnamed prepared statement or portal).
    pub name: &'a str,
}

impl FrontendProtocol for Describe<'_> {
    const MSGTYPE: u8 = b'D';

    fn size_hint(&self) -> i32 {
        1 + self.name.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_u8(self.kind);
        buf.put_nul_string(self.name);
    }
}

/// Identifies the message as an Execute command.
pub struct Execute<'a> {
    /// The name of the portal to execute (an empty string selects the unnamed portal).
    pub portal_name: &'a str,
    /// Maximum number of rows to return, if portal contains a query that returns rows
    /// (ignored otherwise). Zero denotes “no limit”.
    pub max_rows: i32,
}

impl FrontendProtocol for Execute<'_> {
    const MSGTYPE: u8 = b'E';

    fn size_hint(&self) -> i32 {
        self.portal_name.nul_string_len() + 4
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.portal_name);
        buf.put_i32(self.max_rows);
    }
}

/// Identifies the message as a Close command.
pub struct Close<'a> {
    /// 'S' to close a prepared statement; or 'P' to close a portal.
    pub variant: u8,
    /// The name of the prepared statement or portal to close
    /// (an empty string selects the unnamed prepared statement or portal).
    pub name: &'a str,
}

impl FrontendProtocol for Close<'_> {
    const MSGTYPE: u8 = b'C';

    fn size_hint(&self) -> i32 {
        1 + self.name.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_u8(self.variant);
        buf.put_nul_string(self.name);
    }
}

/// Identifies the message as COPY data.
///
/// Data that forms part of a COPY data stream. Messages sent from the backend
/// will always correspond to single data rows, but messages sent by frontends
/// might divide the data stream arbitrarily.
pub struct CopyData<'a> {
    pub data: &'a [u8],
}

impl FrontendProtocol for CopyData<'_> {
    const MSGTYPE: u8 = b'd';

    fn size_hint(&self) -> i32 {
        self.data.len().to_i32()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_slice(self.data);
    }
}

/// Identifies the message as a COPY-failure indicator.
pub struct CopyFail<'a> {
    /// An error message to report as the cause of failure.
    pub message: &'a str,
}

impl FrontendProtocol for CopyFail<'_> {
    const MSGTYPE: u8 = b'f';

    fn size_hint(&self) -> i32 {
        self.message.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.message);
    }
}

macro_rules! unit_msg {
    ($(
        $(#[$doc:meta])* struct $name:ident, $ty:literal;
    )*) => {$(
        $(#[$doc])*
        pub struct $name;

        impl FrontendProtocol for $name {
            const MSGTYPE: u8 = $ty;

            fn size_hint(&self) -> i32 { 0 }

            fn encode(self, _: impl BufMut) { }
        }
    )*};
}

unit_msg! {
    /// Identifies the message as a Sync command.
    ///
    /// Closes the current extended-query sequence; the backend answers with
    /// exactly one `ReadyForQuery` once the sequence is done.
    struct Sync, b'S';

    /// Identifies the message as a Flush command.
    struct Flush, b'H';

    /// Identifies the message as a COPY-complete indicator.
    struct CopyDone, b'c';

    /// Identifies the message as a termination request.
    ///
    /// The frontend closes the connection after this; no response arrives.
    struct Terminate, b'X';
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn query_frame() {
        let mut buf = BytesMut::new();
        write(Query { sql: "SELECT 1" }, &mut buf);
        assert_eq!(&buf[..], b"Q\x00\x00\x00\x0dSELECT 1\0");
    }

    #[test]
    fn unit_frames() {
        let mut buf = BytesMut::new();
        write(Sync, &mut buf);
        write(Flush, &mut buf);
        write(CopyDone, &mut buf);
        write(Terminate, &mut buf);
        assert_eq!(
            &buf[..],
            b"S\x00\x00\x00\x04H\x00\x00\x00\x04c\x00\x00\x00\x04X\x00\x00\x00\x04"
        );
    }

    #[test]
    fn parse_frame() {
        let mut buf = BytesMut::new();
        write(
            Parse { prepare_name: "s1", sql: "SELECT $1", param_oids: &[23] },
            &mut buf,
        );
        // 4 len + 3 name + 10 sql + 2 count + 4 oid = 23
        assert_eq!(&buf[..], b"P\x00\x00\x00\x17s1\0SELECT $1\0\x00\x01\x00\x00\x00\x17");
    }

    #[test]
    fn bind_frame_with_null_param() {
        let mut buf = BytesMut::new();
        write(
            Bind {
                portal_name: "",
                stmt_name: "s1",
                param_formats: &[PgFormat::Binary],
                params_len: 1,
                params: &(-1i32).to_be_bytes(),
                result_formats: &[PgFormat::Binary],
            },
            &mut buf,
        );
        assert_eq!(
            &buf[..],
            b"B\x00\x00\x00\x16\0s1\0\x00\x01\x00\x01\x00\x01\xff\xff\xff\xff\x00\x01\x00\x01"
        );
    }

    #[test]
    fn execute_and_close_frames() {
        let mut buf = BytesMut::new();
        write(Execute { portal_name: "p", max_rows: 50 }, &mut buf);
        write(Close { variant: b'S', name: "s1" }, &mut buf);
        assert_eq!(&buf[..], b"E\x00\x00\x00\x0ap\0\x00\x00\x00\x32C\x00\x00\x00\x08Ss1\0");
    }

    #[test]
    fn startup_frame() {
        let mut buf = BytesMut::new();
        Startup {
            user: "alice",
            database: Some("db"),
            application_name: None,
            params: &[],
        }
        .write(&mut buf);

        assert_eq!(
            &buf[..],
            b"\x00\x00\x00\x20\x00\x03\x00\x00user\0alice\0database\0db\0\0"
        );
    }

    #[test]
    fn cancel_request_frame() {
        let mut buf = BytesMut::new();
        CancelRequest { process_id: 7, secret_key: -2 }.write(&mut buf);
        assert_eq!(buf.len(), 16);
        assert_eq!(
            &buf[..],
            b"\x00\x00\x00\x10\x04\xd2\x16\x2e\x00\x00\x00\x07\xff\xff\xff\xfe"
        );
    }

    #[test]
    fn sasl_initial_response_frame() {
        let mut buf = BytesMut::new();
        write(
            SaslInitialResponse { mechanism: "SCRAM-SHA-256", response: b"n,,n=,r=abc" },
            &mut buf,
        );
        // 4 len + 14 mechanism + 4 + 11 response = 33
        assert_eq!(&buf[..5], b"p\x00\x00\x00\x21");
        assert_eq!(&buf[5..19], b"SCRAM-SHA-256\0");
        assert_eq!(&buf[19..23], b"\x00\x00\x00\x0b");
        assert_eq!(&buf[23..], b"n,,n=,r=abc");
    }

    #[test]
    fn copy_frames() {
        let mut buf = BytesMut::new();
        write(CopyData { data: b"1\tfoo\n" }, &mut buf);
        write(CopyFail { message: "boom" }, &mut buf);
        assert_eq!(&buf[..], b"d\x00\x00\x00\x0a1\tfoo\nf\x00\x00\x00\x09boom\0");
    }
}
