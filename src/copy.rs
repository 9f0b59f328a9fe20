//! COPY IN/OUT bulk streaming.
//!
//! Both directions run over the simple-query cycle: a `Query` carrying the
//! `COPY ... FROM STDIN` / `COPY ... TO STDOUT` statement, the matching
//! `CopyInResponse`/`CopyOutResponse`, the data stream, and the
//! `CommandComplete` + `ReadyForQuery` closing the cycle.
use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    Result,
    codec::CodecError,
    connection::{Connection, MachineState, Timeout, with_deadline},
    error::{DbError, Error},
    ext::UsizeExt,
    protocol::{
        Oid, PgFormat, ProtocolError,
        backend::BackendMessage,
        frontend,
    },
    row::CommandTag,
    statement::PreparedStatement,
    stream::COPY_FLUSH_THRESHOLD,
    value::Value,
};

/// Binary COPY header: 11-byte signature, 4-byte flags (0), 4-byte header
/// extension length (0).
const BINARY_HEADER: &[u8] = b"PGCOPY\n\xff\r\n\0\x00\x00\x00\x00\x00\x00\x00\x00";
/// Binary COPY terminator: a row with column count -1.
const BINARY_TRAILER: [u8; 2] = (-1i16).to_be_bytes();
/// Frontend `CopyData` frames carry at most this much payload.
const COPY_CHUNK_SIZE: usize = 32 * 1024;

/// Receiver of COPY OUT data.
pub trait CopySink {
    /// Accept one chunk of COPY data.
    ///
    /// The connection does not read from the transport again until the
    /// returned future completes, so a slow sink pauses the server through
    /// transport backpressure.
    fn write(&mut self, chunk: Bytes) -> impl Future<Output = io::Result<()>>;
}

impl CopySink for Vec<Bytes> {
    fn write(&mut self, chunk: Bytes) -> impl Future<Output = io::Result<()>> {
        self.push(chunk);
        std::future::ready(Ok(()))
    }
}

/// Adapts any [`AsyncWrite`] into a [`CopySink`].
pub struct WriteSink<W>(pub W);

impl<W: AsyncWrite + Unpin> CopySink for WriteSink<W> {
    async fn write(&mut self, chunk: Bytes) -> io::Result<()> {
        self.0.write_all(&chunk).await
    }
}

fn not_copy_out() -> Error {
    ProtocolError::misuse("the statement did not start a COPY TO STDOUT").into()
}

fn not_copy_in() -> Error {
    ProtocolError::misuse("the statement did not start a COPY FROM STDIN").into()
}

impl Connection {
    /// Run a `COPY ... TO STDOUT` statement, delivering each data chunk to
    /// `sink`.
    ///
    /// The whole operation shares one `timeout` budget, including the time
    /// spent inside the sink.
    pub async fn copy_out<S: CopySink>(&mut self, stmt: &str, sink: &mut S, timeout: Timeout) -> Result<CommandTag> {
        // the cycle is a plain Query until the server answers CopyOutResponse
        let deadline = self.begin_op(MachineState::SimpleQuery, timeout, Some(stmt)).await?;
        self.stream.send(frontend::Query { sql: stmt });
        self.pending_sync += 1;

        let result = with_deadline!(self, deadline, self.copy_out_run(sink));
        self.complete_copy(result)
    }

    async fn copy_out_run<S: CopySink>(&mut self, sink: &mut S) -> Result<CommandTag> {
        self.flush_stream().await?;

        let mut tag = None;
        let mut op_error: Option<Error> = None;
        let mut began = false;

        loop {
            match self.recv_msg().await? {
                BackendMessage::CopyOutResponse(_) => {
                    began = true;
                    self.state = MachineState::CopyOutData;
                },
                BackendMessage::CopyData(data) => {
                    if op_error.is_none() && began {
                        if let Err(err) = sink.write(data.body).await {
                            op_error = Some(err.into());
                        }
                    }
                },
                BackendMessage::CopyDone(_) => self.state = MachineState::CopyOutDone,
                BackendMessage::CommandComplete(cmd) => {
                    match began {
                        true => tag = Some(CommandTag::new(cmd.tag)?),
                        false if op_error.is_none() => op_error = Some(not_copy_out()),
                        false => { },
                    }
                },

                // the statement was not a COPY TO; drain its actual results
                BackendMessage::RowDescription(_)
                | BackendMessage::DataRow(_)
                | BackendMessage::EmptyQueryResponse(_) => {
                    if op_error.is_none() {
                        op_error = Some(not_copy_out());
                    }
                },
                BackendMessage::CopyInResponse(_) => {
                    self.stream.send(frontend::CopyFail { message: "COPY IN is only supported via copy_in" });
                    self.flush_stream().await?;
                    if op_error.is_none() {
                        op_error = Some(not_copy_out());
                    }
                },

                BackendMessage::ErrorResponse(err) => {
                    if op_error.is_none() {
                        op_error = Some(DbError::parse(err.fields(), self.last_query.take()).into());
                    }
                    self.state = MachineState::Failed;
                },
                BackendMessage::ReadyForQuery(rfq) => {
                    self.txn_status = rfq.status;
                    self.pending_sync = self.pending_sync.saturating_sub(1);
                    if self.pending_sync == 0 {
                        break;
                    }
                },
                msg => return Err(msg.unexpected("COPY TO").into()),
            }
        }

        match op_error {
            Some(err) => Err(err),
            None => tag.ok_or_else(not_copy_out),
        }
    }

    /// Run a `COPY ... FROM STDIN` statement, feeding it `data`.
    ///
    /// `data` is framed into 32 KiB `CopyData` messages; each flush is
    /// awaited before more data is accepted, bounding the amount buffered on
    /// a slow transport.
    pub async fn copy_in(&mut self, stmt: &str, data: &[u8], timeout: Timeout) -> Result<CommandTag> {
        let deadline = self.begin_op(MachineState::SimpleQuery, timeout, Some(stmt)).await?;
        self.stream.send(frontend::Query { sql: stmt });
        self.pending_sync += 1;

        let result = with_deadline!(self, deadline, self.copy_in_buffer_run(data));
        self.complete_copy(result)
    }

    async fn copy_in_buffer_run(&mut self, data: &[u8]) -> Result<CommandTag> {
        self.copy_in_begin().await?;

        let mut server_error = None;
        for chunk in data.chunks(COPY_CHUNK_SIZE) {
            if let Some(err) = self.copy_in_interrupted().await? {
                server_error = Some(err);
                break;
            }
            self.stream.send(frontend::CopyData { data: chunk });
            if self.stream.write_buffered() >= COPY_FLUSH_THRESHOLD {
                self.flush_stream().await?;
            }
        }

        self.copy_in_finish(server_error, None).await
    }

    /// Run a `COPY ... FROM STDIN` statement, streaming data from `reader`.
    pub async fn copy_in_reader<R>(&mut self, stmt: &str, reader: &mut R, timeout: Timeout) -> Result<CommandTag>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let deadline = self.begin_op(MachineState::SimpleQuery, timeout, Some(stmt)).await?;
        self.stream.send(frontend::Query { sql: stmt });
        self.pending_sync += 1;

        let result = with_deadline!(self, deadline, self.copy_in_reader_run(reader));
        self.complete_copy(result)
    }

    async fn copy_in_reader_run<R>(&mut self, reader: &mut R) -> Result<CommandTag>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.copy_in_begin().await?;

        let mut server_error = None;
        let mut source_error = None;
        let mut buf = BytesMut::with_capacity(COPY_CHUNK_SIZE);

        loop {
            if let Some(err) = self.copy_in_interrupted().await? {
                server_error = Some(err);
                break;
            }
            buf.clear();
            match reader.read_buf(&mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    self.stream.send(frontend::CopyData { data: &buf[..] });
                    if self.stream.write_buffered() >= COPY_FLUSH_THRESHOLD {
                        self.flush_stream().await?;
                    }
                },
                Err(err) => {
                    source_error = Some(err.into());
                    break;
                },
            }
        }

        self.copy_in_finish(server_error, source_error).await
    }

    /// Run a `COPY ... FROM STDIN (FORMAT binary)` statement from decoded
    /// records.
    ///
    /// `record_stmt` is the binary template: a prepared statement whose row
    /// descriptor carries the column type OIDs, typically a `SELECT` of the
    /// target columns. Every column type must have a binary encoder.
    pub async fn copy_in_records<I, R>(
        &mut self,
        stmt: &str,
        record_stmt: &PreparedStatement,
        records: I,
        timeout: Timeout,
    ) -> Result<CommandTag>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<[Value]>,
    {
        let deadline = self.begin_op(MachineState::SimpleQuery, timeout, Some(stmt)).await?;
        self.stream.send(frontend::Query { sql: stmt });
        self.pending_sync += 1;

        let result = with_deadline!(self, deadline, self.copy_in_records_run(record_stmt, records));
        self.complete_copy(result)
    }

    async fn copy_in_records_run<I, R>(&mut self, record_stmt: &PreparedStatement, records: I) -> Result<CommandTag>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<[Value]>,
    {
        self.copy_in_begin().await?;

        let Some(desc) = record_stmt.row_descriptor() else {
            let err = CodecError::new("record template statement returns no rows").into();
            return self.copy_in_finish(None, Some(err)).await;
        };
        let oids: Vec<Oid> = desc.fields().iter().map(|field| field.type_oid).collect();

        self.stream.send(frontend::CopyData { data: BINARY_HEADER });

        let mut server_error = None;
        let mut source_error = None;
        let mut buf = BytesMut::new();

        'records: for record in records {
            let record = record.as_ref();
            if record.len() != oids.len() {
                source_error = Some(
                    CodecError::new(format!(
                        "record has {} values, the template has {} columns",
                        record.len(),
                        oids.len(),
                    ))
                    .into(),
                );
                break;
            }
            if let Some(err) = self.copy_in_interrupted().await? {
                server_error = Some(err);
                break;
            }

            buf.put_i16(record.len().to_u16() as i16);
            for (value, oid) in record.iter().zip(&oids) {
                if value.is_null() {
                    buf.put_i32(-1);
                    continue;
                }
                let codec = self.codecs.resolve(*oid);
                if codec.format() != PgFormat::Binary || !codec.has_encoder() {
                    source_error =
                        Some(CodecError::new(format!("type oid {oid} has no binary encoder for COPY")).into());
                    break 'records;
                }
                let len_offset = buf.len();
                buf.put_i32(0);
                if let Err(err) = codec.encode(&self.settings, value, &mut buf) {
                    source_error = Some(err.into());
                    break 'records;
                }
                let written = buf.len() - len_offset - 4;
                let mut slot = &mut buf[len_offset..];
                slot.put_i32(written.to_i32());
            }

            if buf.len() >= COPY_CHUNK_SIZE {
                self.stream.send(frontend::CopyData { data: &buf[..] });
                buf.clear();
                if self.stream.write_buffered() >= COPY_FLUSH_THRESHOLD {
                    self.flush_stream().await?;
                }
            }
        }

        if server_error.is_none() && source_error.is_none() {
            if !buf.is_empty() {
                self.stream.send(frontend::CopyData { data: &buf[..] });
            }
            self.stream.send(frontend::CopyData { data: &BINARY_TRAILER });
        }

        self.copy_in_finish(server_error, source_error).await
    }

    /// Flush the `Query` and wait for `CopyInResponse`.
    async fn copy_in_begin(&mut self) -> Result<()> {
        self.flush_stream().await?;

        let mut op_error: Option<Error> = None;
        loop {
            match self.recv_msg().await? {
                BackendMessage::CopyInResponse(_) if op_error.is_none() => {
                    self.state = MachineState::CopyInData;
                    return Ok(());
                },
                BackendMessage::CopyInResponse(_) => {
                    self.stream.send(frontend::CopyFail { message: "COPY aborted" });
                    self.flush_stream().await?;
                },
                BackendMessage::ErrorResponse(err) => {
                    if op_error.is_none() {
                        op_error = Some(DbError::parse(err.fields(), self.last_query.take()).into());
                    }
                    self.state = MachineState::Failed;
                },
                // not a COPY FROM; whatever the statement produced drains here
                BackendMessage::RowDescription(_)
                | BackendMessage::DataRow(_)
                | BackendMessage::CommandComplete(_)
                | BackendMessage::EmptyQueryResponse(_)
                | BackendMessage::CopyOutResponse(_)
                | BackendMessage::CopyData(_)
                | BackendMessage::CopyDone(_) => {
                    if op_error.is_none() {
                        op_error = Some(not_copy_in());
                    }
                },
                BackendMessage::ReadyForQuery(rfq) => {
                    self.txn_status = rfq.status;
                    self.pending_sync = self.pending_sync.saturating_sub(1);
                    return Err(op_error.unwrap_or_else(not_copy_in));
                },
                msg => return Err(msg.unexpected("COPY FROM").into()),
            }
        }
    }

    /// Check for messages the server pushed mid-copy without blocking.
    ///
    /// A server error here means the copy was already aborted server-side;
    /// the caller must stop sending and must not emit `CopyFail`.
    async fn copy_in_interrupted(&mut self) -> Result<Option<Error>> {
        while let Some(result) = self.stream.try_recv().await {
            let msg = match result {
                Ok(msg) => msg,
                Err(err) => {
                    self.fatal();
                    return Err(err);
                },
            };
            match msg {
                BackendMessage::ParameterStatus(param) => self.settings.apply(param.name, param.value),
                BackendMessage::NotificationResponse(n) => self.notify(n),
                BackendMessage::NoticeResponse(notice) => {
                    tracing::warn!("{}", DbError::parse(notice.fields(), None));
                },
                BackendMessage::ErrorResponse(err) => {
                    self.state = MachineState::Failed;
                    return Ok(Some(DbError::parse(err.fields(), self.last_query.take()).into()));
                },
                msg => return Err(msg.unexpected("COPY FROM").into()),
            }
        }
        Ok(None)
    }

    /// Terminate the copy stream and drain the query cycle.
    ///
    /// Exactly one of `CopyDone` or `CopyFail` ends the stream: `CopyFail`
    /// for any caller-side error, nothing at all when the server already
    /// aborted (`server_error`).
    async fn copy_in_finish(
        &mut self,
        server_error: Option<Error>,
        source_error: Option<Error>,
    ) -> Result<CommandTag> {
        if server_error.is_none() {
            match &source_error {
                Some(err) => {
                    let reason = err.kind().to_string();
                    self.stream.send(frontend::CopyFail { message: &reason });
                },
                None => self.stream.send(frontend::CopyDone),
            }
        }

        let drained = self.collect_until_ready(None, false).await;

        if let Some(err) = source_error {
            return Err(err);
        }
        if let Some(err) = server_error {
            return Err(err);
        }
        drained.map(|out| out.tag.unwrap_or_else(CommandTag::empty))
    }
}
