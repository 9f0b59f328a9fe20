//! `pgcore` error types.
use std::{backtrace::Backtrace, fmt, io};

use crate::{
    codec::CodecError,
    common::ByteStr,
    connection::config::ParseError,
    protocol::{ProtocolError, backend::FieldIter},
};

/// A specialized [`Result`] type for `pgcore` operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from the `pgcore` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// The server error report, when the server rejected an operation.
    pub fn as_db_error(&self) -> Option<&DbError> {
        match &self.kind {
            ErrorKind::Database(db) => Some(db),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout(_))
    }

    pub(crate) fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub(crate) fn timeout() -> Self {
        TimeoutError.into()
    }

    pub(crate) fn internal(reason: &'static str) -> Self {
        InternalError { reason }.into()
    }
}

/// All possible error kind from the `pgcore` library.
pub enum ErrorKind {
    /// Invalid connection url or parameter.
    Config(ParseError),
    /// Malformed or out-of-phase wire traffic.
    Protocol(ProtocolError),
    Io(io::Error),
    /// The server reported an error; the connection stays usable.
    Database(Box<DbError>),
    /// A value failed to encode or decode.
    Codec(CodecError),
    /// The caller violated the connection usage contract.
    Interface(InterfaceError),
    /// The per-operation deadline elapsed; a best-effort cancel was issued.
    Timeout(TimeoutError),
    /// The transport closed mid-operation.
    ConnectionClosed(ConnectionClosed),
    UnsupportedAuth(UnsupportedAuth),
    /// An engine invariant was violated, the connection is aborted.
    Internal(InternalError),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ParseError>e => ErrorKind::Config(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<io::Error>e => ErrorKind::Io(e));
from!(<DbError>e => ErrorKind::Database(Box::new(e)));
from!(<CodecError>e => ErrorKind::Codec(e));
from!(<InterfaceError>e => ErrorKind::Interface(e));
from!(<TimeoutError>e => ErrorKind::Timeout(e));
from!(<ConnectionClosed>e => ErrorKind::ConnectionClosed(e));
from!(<UnsupportedAuth>e => ErrorKind::UnsupportedAuth(e));
from!(<InternalError>e => ErrorKind::Internal(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Database(e) => e.fmt(f),
            Self::Codec(e) => e.fmt(f),
            Self::Interface(e) => e.fmt(f),
            Self::Timeout(e) => e.fmt(f),
            Self::ConnectionClosed(e) => e.fmt(f),
            Self::UnsupportedAuth(e) => e.fmt(f),
            Self::Internal(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// The caller violated the single-in-flight contract or used a dead connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InterfaceError {
    #[error("another operation is in progress")]
    InProgress,
    #[error("the connection is closed")]
    Closed,
    #[error("the connection is busy cancelling a previous operation")]
    Cancelling,
    #[error("the prepared statement is still referenced")]
    StatementReferenced,
}

/// The per-operation deadline elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation timed out")]
pub struct TimeoutError;

/// The transport closed while an operation was in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("the connection was closed by the server")]
pub struct ConnectionClosed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unsupported authentication method: {0}")]
pub struct UnsupportedAuth(pub(crate) &'static str);

/// Unreachable engine state; treated as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("internal client error: {reason}")]
pub struct InternalError {
    reason: &'static str,
}

/// A server error report, parsed from the `ErrorResponse` field map.
///
/// Field meanings: <https://www.postgresql.org/docs/current/protocol-error-fields.html>
#[derive(Debug, Default)]
pub struct DbError {
    /// `S`: localized severity.
    pub severity: ByteStr,
    /// `V`: nonlocalized severity, always one of ERROR/FATAL/PANIC here.
    pub severity_nonlocalized: Option<ByteStr>,
    /// `C`: the SQLSTATE code.
    pub code: ByteStr,
    /// `M`: the primary human-readable error message.
    pub message: ByteStr,
    /// `D`: secondary message carrying more detail.
    pub detail: Option<ByteStr>,
    /// `H`: suggestion what to do about the problem.
    pub hint: Option<ByteStr>,
    /// `P`: cursor position into the original query string, counted in characters from 1.
    pub position: Option<ByteStr>,
    /// `p`: cursor position into an internally generated command.
    pub internal_position: Option<ByteStr>,
    /// `q`: the text of the failed internally-generated command.
    pub internal_query: Option<ByteStr>,
    /// `W`: call stack context in which the error occurred.
    pub where_: Option<ByteStr>,
    /// `s`: schema name, when the error is associated with a specific object.
    pub schema: Option<ByteStr>,
    /// `t`: table name.
    pub table: Option<ByteStr>,
    /// `c`: column name.
    pub column: Option<ByteStr>,
    /// `d`: data type name.
    pub data_type: Option<ByteStr>,
    /// `n`: constraint name.
    pub constraint: Option<ByteStr>,
    /// `F`: source file where the error was reported.
    pub file: Option<ByteStr>,
    /// `L`: source line where the error was reported.
    pub line: Option<ByteStr>,
    /// `R`: source routine reporting the error.
    pub routine: Option<ByteStr>,
    /// The SQL text submitted by the operation the server rejected.
    pub query: Option<String>,
}

impl DbError {
    pub(crate) fn parse(fields: FieldIter, query: Option<String>) -> DbError {
        let mut me = DbError { query, ..DbError::default() };

        for (code, value) in fields {
            // frontends should silently ignore fields of unrecognized type
            let Ok(value) = ByteStr::from_utf8(value) else { continue };
            match code {
                b'S' => me.severity = value,
                b'V' => me.severity_nonlocalized = Some(value),
                b'C' => me.code = value,
                b'M' => me.message = value,
                b'D' => me.detail = Some(value),
                b'H' => me.hint = Some(value),
                b'P' => me.position = Some(value),
                b'p' => me.internal_position = Some(value),
                b'q' => me.internal_query = Some(value),
                b'W' => me.where_ = Some(value),
                b's' => me.schema = Some(value),
                b't' => me.table = Some(value),
                b'c' => me.column = Some(value),
                b'd' => me.data_type = Some(value),
                b'n' => me.constraint = Some(value),
                b'F' => me.file = Some(value),
                b'L' => me.line = Some(value),
                b'R' => me.routine = Some(value),
                _ => { },
            }
        }

        me
    }

    /// The SQLSTATE class, the first two characters of the code.
    pub fn code_class(&self) -> &str {
        let code = self.code.as_str();
        &code[..code.len().min(2)]
    }

    pub fn is_unique_violation(&self) -> bool {
        self.code == "23505"
    }

    pub fn is_foreign_key_violation(&self) -> bool {
        self.code == "23503"
    }

    pub fn is_not_null_violation(&self) -> bool {
        self.code == "23502"
    }

    pub fn is_check_violation(&self) -> bool {
        self.code == "23514"
    }

    /// `57014`, reported after a successful [`CancelRequest`][1] or
    /// `statement_timeout`.
    ///
    /// [1]: crate::protocol::frontend::CancelRequest
    pub fn is_query_canceled(&self) -> bool {
        self.code == "57014"
    }

    pub fn is_serialization_failure(&self) -> bool {
        self.code == "40001"
    }

    /// Class `42`, syntax error or access rule violation.
    pub fn is_syntax_or_access_error(&self) -> bool {
        self.code_class() == "42"
    }
}

impl std::error::Error for DbError { }

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity.as_str() {
            "" => "ERROR",
            s => s,
        };
        write!(f, "{severity}: {}", self.message)?;
        if !self.code.as_str().is_empty() {
            write!(f, " (SQLSTATE {})", self.code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {detail}")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {hint}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::protocol::backend::{BackendProtocol, ErrorResponse};
    use bytes::Bytes;

    fn unique_violation() -> DbError {
        let body = Bytes::from_static(
            b"SERROR\0VERROR\0C23505\0Mduplicate key value violates unique constraint \"t_pkey\"\0\
              npkey\0tt\0spublic\0\0",
        );
        let err = ErrorResponse::decode(b'E', body).unwrap();
        DbError::parse(err.fields(), Some("INSERT INTO t VALUES (1)".into()))
    }

    #[test]
    fn parses_the_field_map() {
        let err = unique_violation();
        assert_eq!(err.severity, "ERROR");
        assert_eq!(err.code, "23505");
        assert_eq!(err.constraint.as_deref(), Some("pkey"));
        assert_eq!(err.table.as_deref(), Some("t"));
        assert_eq!(err.schema.as_deref(), Some("public"));
        assert_eq!(err.query.as_deref(), Some("INSERT INTO t VALUES (1)"));
        assert!(err.is_unique_violation());
        assert_eq!(err.code_class(), "23");
        assert!(!err.is_query_canceled());
    }

    #[test]
    fn display_has_severity_and_code() {
        let rendered = unique_violation().to_string();
        assert!(rendered.starts_with("ERROR: duplicate key"));
        assert!(rendered.contains("SQLSTATE 23505"));
    }
}
