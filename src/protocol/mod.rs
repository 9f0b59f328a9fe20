//! Postgres Frontend and Backend Protocol
//!
//! Docs here mostly quoted from the official postgres documentation.
//!
//! ## Messaging Overview
//!
//! All communication is through a stream of messages. The first byte of a message identifies the message type,
//! and the next four bytes specify the length of the rest of the message (this length count includes itself,
//! but not the message-type byte). The remaining contents of the message are determined by the message type.
//!
//! ```text
//! ┏━━━━┳━━━━━━━━━━━━━━━━━━━┳━━━━━━┓
//! ┃ Ty ┃       Length      ┃ Body ┃
//! ┣━━━━╋━━━━━━━━━━━━━━━━━━━╋━━━━━━┫
//! ┃ u8 ┃        u32        ┃ [u8] ┃
//! ┗━━━━┻━━━━━━━━━━━━━━━━━━━┻━━━━━━┛
//! ```
//!
//! For historical reasons, the very first message sent by the client (the startup message)
//! has no initial message-type byte. The same applies to [`CancelRequest`][1],
//! which is sent on a connection of its own.
//!
//! ## Format and Format Codes
//!
//! Data of a particular data type might be transmitted in any of several different formats.
//! As of PostgreSQL 7.4 the only supported formats are “text” and “binary”. Text has format
//! code zero, and Binary has format code one.
//!
//! Clients can specify a format code for each transmitted parameter value and for each column of a query result.
//!
//! <https://www.postgresql.org/docs/17/protocol-overview.html>
//!
//! [1]: frontend::CancelRequest

pub mod backend;
pub mod frontend;

mod error;

pub use backend::{BackendMessage, BackendProtocol};
pub use error::ProtocolError;
pub use frontend::FrontendProtocol;

/// Object identifier of a postgres data type.
pub type Oid = u32;

/// Postgres data transmission format.
///
/// <https://www.postgresql.org/docs/current/protocol-overview.html#PROTOCOL-FORMAT-CODES>
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgFormat {
    /// Text has format code zero.
    ///
    /// In the text representation there is no trailing null character;
    /// the frontend must add one to received values if it wants to process them as C strings.
    Text,
    /// Binary has format code one.
    ///
    /// Binary representations for integers use network byte order (most significant byte first).
    /// Keep in mind that binary representations for complex data types might change across server versions.
    Binary,
}

impl PgFormat {
    /// Return the wire format code.
    pub fn format_code(&self) -> u16 {
        match self {
            PgFormat::Text => 0,
            PgFormat::Binary => 1,
        }
    }

    pub fn from_code(code: i16) -> Result<PgFormat, ProtocolError> {
        match code {
            0 => Ok(PgFormat::Text),
            1 => Ok(PgFormat::Binary),
            _ => Err(ProtocolError::malformed("format code")),
        }
    }
}

/// Backend transaction status, as reported by every `ReadyForQuery`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    /// `'I'`: idle, not in a transaction block.
    Idle,
    /// `'T'`: in a transaction block.
    InTransaction,
    /// `'E'`: in a failed transaction block, queries will be rejected until block is ended.
    InFailedTransaction,
    /// No `ReadyForQuery` observed yet.
    #[default]
    Unknown,
}

impl TransactionStatus {
    pub fn from_byte(status: u8) -> TransactionStatus {
        match status {
            b'I' => TransactionStatus::Idle,
            b'T' => TransactionStatus::InTransaction,
            b'E' => TransactionStatus::InFailedTransaction,
            _ => TransactionStatus::Unknown,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn transaction_status_bytes() {
        assert_eq!(TransactionStatus::from_byte(b'I'), TransactionStatus::Idle);
        assert_eq!(TransactionStatus::from_byte(b'T'), TransactionStatus::InTransaction);
        assert_eq!(TransactionStatus::from_byte(b'E'), TransactionStatus::InFailedTransaction);
        assert_eq!(TransactionStatus::from_byte(b'?'), TransactionStatus::Unknown);
    }
}
