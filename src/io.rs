//! Socket read/write over `bytes` buffers.
use std::{
    io,
    pin::Pin,
    task::{Context, Poll, ready},
};

use bytes::{Buf, BufMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Poll one read from `reader` into the spare capacity of `buf`.
///
/// Returns the number of bytes appended. Callers reserve capacity before
/// polling, so zero with spare room means end of stream.
pub fn poll_read<R, B>(reader: &mut R, buf: &mut B, cx: &mut Context) -> Poll<io::Result<usize>>
where
    R: AsyncRead + Unpin + ?Sized,
    B: BufMut + ?Sized,
{
    if !buf.has_remaining_mut() {
        return Poll::Ready(Ok(0));
    }

    // `BufMut` hands out uninitialized spare capacity while tokio tracks
    // initialization through `ReadBuf`; wrap the spare chunk so the reader
    // can fill it without zeroing first.
    let spare = buf.chunk_mut();
    let mut read_buf = ReadBuf::uninit(unsafe { spare.as_uninit_slice_mut() });
    let target = read_buf.filled().as_ptr();

    ready!(Pin::new(reader).poll_read(cx, &mut read_buf)?);

    // `advance_mut` below is only sound if the reader filled this exact
    // buffer rather than swapping in another one.
    assert_eq!(target, read_buf.filled().as_ptr(), "reader replaced the read buffer");
    let appended = read_buf.filled().len();

    // Safety: `filled` counts exactly the spare bytes the reader initialized.
    unsafe {
        buf.advance_mut(appended);
    }

    Poll::Ready(Ok(appended))
}

/// Poll `writer` until every byte of `buf` has been handed off.
pub fn poll_write_all<W, B>(writer: &mut W, buf: &mut B, cx: &mut Context) -> Poll<io::Result<()>>
where
    W: AsyncWrite + Unpin + ?Sized,
    B: Buf + ?Sized,
{
    const VECTORED_SLOTS: usize = 32;

    while buf.has_remaining() {
        let wrote = if writer.is_write_vectored() {
            let mut slots = [io::IoSlice::new(&[]); VECTORED_SLOTS];
            let filled = buf.chunks_vectored(&mut slots);
            ready!(Pin::new(&mut *writer).poll_write_vectored(cx, &slots[..filled])?)
        } else {
            ready!(Pin::new(&mut *writer).poll_write(cx, buf.chunk())?)
        };

        if wrote == 0 {
            return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
        }
        buf.advance(wrote);
    }

    Poll::Ready(Ok(()))
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::BytesMut;

    #[tokio::test]
    async fn read_appends_and_signals_eof() {
        let (mut server, client) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut server, b"hello").await.unwrap();
        drop(server);

        let mut client = client;
        let mut buf = BytesMut::with_capacity(16);

        let n = std::future::poll_fn(|cx| poll_read(&mut client, &mut buf, cx)).await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf[..], b"hello");

        let n = std::future::poll_fn(|cx| poll_read(&mut client, &mut buf, cx)).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn write_all_drains_the_buffer() {
        let (server, mut client) = tokio::io::duplex(64);
        let mut buf = BytesMut::from(&b"frame bytes"[..]);

        std::future::poll_fn(|cx| poll_write_all(&mut client, &mut buf, cx)).await.unwrap();
        assert!(buf.is_empty());

        let mut server = server;
        let mut out = [0u8; 11];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut out).await.unwrap();
        assert_eq!(&out, b"frame bytes");
    }
}
