//! PostgreSQL frontend/backend protocol core.
//!
//! A single authenticated connection multiplexed into a sequence of
//! request/response operations: simple queries, prepared-statement
//! lifecycles over the extended query protocol, COPY IN/OUT streaming, and
//! out-of-band cancellation. One logical operation is in flight at a time;
//! server-initiated traffic (notifications, parameter reports, notices) is
//! routed to hooks as it arrives.
//!
//! # Examples
//!
//! ```no_run
//! use pgcore::{Connection, Timeout, Value};
//!
//! # async fn app() -> pgcore::Result<()> {
//! let mut conn = Connection::connect_env().await?;
//!
//! let stmt = conn.prepare(None, "SELECT id, label FROM widget WHERE id = $1", Timeout::Default).await?;
//! let res = conn.bind_execute(&stmt, &[Value::Int4(420)], "", 0, Timeout::Default).await?;
//!
//! for row in &res.rows {
//!     println!("{:?} {:?}", row.get_by_name("id"), row.get_by_name("label"));
//! }
//!
//! conn.close_statement(&stmt, Timeout::Default).await?;
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Bulk load through COPY:
//!
//! ```no_run
//! use pgcore::{Connection, Timeout, Value};
//!
//! # async fn app(conn: &mut Connection) -> pgcore::Result<()> {
//! let template = conn.prepare(None, "SELECT id, label FROM widget", Timeout::Default).await?;
//! let records = vec![
//!     vec![Value::Int4(1), Value::from("a")],
//!     vec![Value::Int4(2), Value::from("b")],
//! ];
//! let tag = conn
//!     .copy_in_records("COPY widget FROM STDIN (FORMAT binary)", &template, &records, Timeout::Default)
//!     .await?;
//! assert_eq!(tag.rows_affected(), 2);
//! # Ok(())
//! # }
//! ```
pub mod common;
mod ext;
mod io;
mod net;

// Protocol
pub mod protocol;

// Encoding
pub mod codec;
mod value;

// Component
pub mod row;
mod scram;
pub mod settings;
pub mod statement;

// Operation
mod auth;
pub mod cancel;
pub mod connection;
mod copy;

// Transport
mod stream;

mod error;

#[cfg(test)]
pub(crate) mod testing;

#[doc(inline)]
pub use cancel::CancelHandle;
#[doc(inline)]
pub use codec::{Codec, CodecError, CodecRegistry};
#[doc(inline)]
pub use connection::{Config, ConnStatus, Connection, Notification, Timeout};
pub use connection::config::ParseError;
pub use copy::{CopySink, WriteSink};
#[doc(inline)]
pub use error::{DbError, Error, ErrorKind, InterfaceError, Result, TimeoutError};
#[doc(inline)]
pub use protocol::TransactionStatus;
#[doc(inline)]
pub use row::{CommandTag, QueryResult, Row, RowDescriptor};
#[doc(inline)]
pub use settings::ServerSettings;
#[doc(inline)]
pub use statement::PreparedStatement;
#[doc(inline)]
pub use value::Value;
