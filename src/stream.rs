//! Buffered framed transport.
use bytes::{Buf, BytesMut};
use std::{
    io,
    task::{Context, Poll, ready},
};

use crate::{
    Result,
    common::verbose,
    connection::Config,
    error::ConnectionClosed,
    net::Socket,
    protocol::{BackendMessage, BackendProtocol, FrontendProtocol, frontend},
};

const DEFAULT_BUF_CAPACITY: usize = 1024;

/// Flush threshold for buffered `CopyData` frames during COPY IN.
pub(crate) const COPY_FLUSH_THRESHOLD: usize = 32 * 1024;

/// Buffered connection to postgres.
///
/// Outbound messages accumulate in the write buffer until [`flush`][1]; a
/// whole Sync-terminated extended-query flight goes out as one write. Inbound
/// bytes accumulate in the read buffer; a message becomes visible only once
/// its full payload has arrived, and its body is handed out as a zero-copy
/// [`Bytes`][bytes::Bytes] view.
///
/// [1]: PgStream::flush
#[derive(Debug)]
pub struct PgStream {
    socket: Socket,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl PgStream {
    pub async fn connect(config: &Config) -> Result<Self> {
        let socket = match config.socket_path() {
            Some(path) => Socket::connect_unix(path).await?,
            None => Socket::connect_tcp(config.host(), config.port()).await?,
        };

        Ok(Self::from_socket(socket))
    }

    pub(crate) fn from_socket(socket: Socket) -> Self {
        Self {
            socket,
            read_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            write_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
        }
    }

    #[cfg(test)]
    pub(crate) fn from_duplex(duplex: tokio::io::DuplexStream) -> Self {
        Self::from_socket(Socket::from_duplex(duplex))
    }

    /// Buffer a frontend message.
    pub fn send<F: FrontendProtocol>(&mut self, message: F) {
        verbose!("(F){}", char::from(F::MSGTYPE));
        frontend::write(message, &mut self.write_buf);
    }

    /// Buffer the startup message, which has no message-type byte.
    pub fn send_startup(&mut self, startup: frontend::Startup) {
        verbose!("(F)Startup");
        startup.write(&mut self.write_buf);
    }

    /// Bytes buffered but not yet written out.
    pub(crate) fn write_buffered(&self) -> usize {
        self.write_buf.len()
    }

    pub fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        crate::io::poll_write_all(&mut self.socket, &mut self.write_buf, cx)
    }

    /// Write every buffered message to the underlying io.
    pub async fn flush(&mut self) -> io::Result<()> {
        std::future::poll_fn(|cx| self.poll_flush(cx)).await
    }

    /// Receive one whole backend message.
    ///
    /// The engine advances only on fully-framed messages: the 5-byte header is
    /// peeked first and the body is not split off until every payload byte is
    /// buffered.
    pub fn poll_recv(&mut self, cx: &mut Context) -> Poll<Result<BackendMessage>> {
        loop {
            let Some(mut header) = self.read_buf.get(..5) else {
                self.read_buf.reserve(DEFAULT_BUF_CAPACITY);
                if ready!(crate::io::poll_read(&mut self.socket, &mut self.read_buf, cx)?) == 0 {
                    return Poll::Ready(Err(ConnectionClosed.into()));
                }
                continue;
            };

            let msgtype = header.get_u8();
            let len = header.get_i32();
            if len < 4 {
                return Poll::Ready(Err(crate::protocol::ProtocolError::malformed("frame header").into()));
            }
            let len = len as usize;

            if self.read_buf.len() - 1/*msgtype*/ < len {
                self.read_buf.reserve(1 + len);
                if ready!(crate::io::poll_read(&mut self.socket, &mut self.read_buf, cx)?) == 0 {
                    return Poll::Ready(Err(ConnectionClosed.into()));
                }
                continue;
            }

            self.read_buf.advance(5);
            let body = self.read_buf.split_to(len - 4).freeze();

            verbose!("(B){}", BackendMessage::message_name(msgtype));

            return Poll::Ready(Ok(BackendMessage::decode(msgtype, body)?));
        }
    }

    pub async fn recv(&mut self) -> Result<BackendMessage> {
        std::future::poll_fn(|cx| self.poll_recv(cx)).await
    }

    /// Receive without waiting: `None` when no whole message is buffered yet.
    pub(crate) async fn try_recv(&mut self) -> Option<Result<BackendMessage>> {
        std::future::poll_fn(|cx| match self.poll_recv(cx) {
            Poll::Ready(r) => Poll::Ready(Some(r)),
            Poll::Pending => Poll::Ready(None),
        })
        .await
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.socket.shutdown().await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn message_visible_only_when_complete() {
        let (server, client) = tokio::io::duplex(64);
        let mut stream = PgStream::from_duplex(client);
        let mut server = server;

        // header without body yet
        server.write_all(b"Z\x00\x00\x00\x05").await.unwrap();
        assert!(stream.try_recv().await.is_none());

        server.write_all(b"I").await.unwrap();
        let msg = stream.recv().await.unwrap();
        assert!(matches!(msg, BackendMessage::ReadyForQuery(_)));
    }

    #[tokio::test]
    async fn split_frames_across_reads() {
        let (server, client) = tokio::io::duplex(64);
        let mut stream = PgStream::from_duplex(client);
        let mut server = server;

        let write = tokio::spawn(async move {
            server.write_all(b"C\x00\x00\x00\x0dSEL").await.unwrap();
            tokio::task::yield_now().await;
            server.write_all(b"ECT 1\0").await.unwrap();
            server
        });

        let msg = stream.recv().await.unwrap();
        let BackendMessage::CommandComplete(cmd) = msg else { panic!("{msg:?}") };
        assert_eq!(&cmd.tag[..], b"SELECT 1");
        drop(write.await.unwrap());
    }

    #[tokio::test]
    async fn eof_is_connection_closed() {
        let (server, client) = tokio::io::duplex(64);
        let mut stream = PgStream::from_duplex(client);
        drop(server);

        let err = stream.recv().await.unwrap_err();
        assert!(matches!(err.kind(), crate::ErrorKind::ConnectionClosed(_)));
    }

    #[tokio::test]
    async fn batched_sends_flush_once() {
        let (server, client) = tokio::io::duplex(256);
        let mut stream = PgStream::from_duplex(client);

        stream.send(frontend::Query { sql: "BEGIN" });
        stream.send(frontend::Sync);
        assert_eq!(stream.write_buffered(), 5 + 6 + 5);
        stream.flush().await.unwrap();
        assert_eq!(stream.write_buffered(), 0);

        let mut server = server;
        let mut buf = [0u8; 16];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut buf).await.unwrap();
        assert_eq!(&buf, b"Q\x00\x00\x00\x0aBEGIN\0S\x00\x00\x00\x04");
    }
}
