//! Scripted-peer helpers for the wire-level tests.
//!
//! Backend messages are built as raw frames and written into the server half
//! of a [`tokio::io::duplex`] pair; frontend frames are read back and
//! asserted on.
use bytes::BufMut;
use tokio::io::{AsyncReadExt, DuplexStream};

pub(crate) fn msg(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + body.len());
    out.push(tag);
    out.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

pub(crate) fn auth_ok() -> Vec<u8> {
    msg(b'R', &0u32.to_be_bytes())
}

pub(crate) fn auth_cleartext() -> Vec<u8> {
    msg(b'R', &3u32.to_be_bytes())
}

pub(crate) fn parameter_status(name: &str, value: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(name.as_bytes());
    body.push(0);
    body.extend_from_slice(value.as_bytes());
    body.push(0);
    msg(b'S', &body)
}

pub(crate) fn backend_key_data(process_id: i32, secret_key: i32) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&process_id.to_be_bytes());
    body.extend_from_slice(&secret_key.to_be_bytes());
    msg(b'K', &body)
}

pub(crate) fn ready_for_query(status: u8) -> Vec<u8> {
    msg(b'Z', &[status])
}

pub(crate) fn command_complete(tag: &str) -> Vec<u8> {
    let mut body = tag.as_bytes().to_vec();
    body.push(0);
    msg(b'C', &body)
}

pub(crate) fn error_response(code: &str, message: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(b"SERROR\0VERROR\0");
    body.push(b'C');
    body.extend_from_slice(code.as_bytes());
    body.push(0);
    body.push(b'M');
    body.extend_from_slice(message.as_bytes());
    body.push(0);
    body.push(0);
    msg(b'E', &body)
}

pub(crate) fn notice_response(message: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(b"SWARNING\0");
    body.push(b'M');
    body.extend_from_slice(message.as_bytes());
    body.push(0);
    body.push(0);
    msg(b'N', &body)
}

pub(crate) fn notification(process_id: i32, channel: &str, payload: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&process_id.to_be_bytes());
    body.extend_from_slice(channel.as_bytes());
    body.push(0);
    body.extend_from_slice(payload.as_bytes());
    body.push(0);
    msg(b'A', &body)
}

pub(crate) fn row_description(cols: &[(&str, u32)]) -> Vec<u8> {
    let mut body = bytes::BytesMut::new();
    body.put_u16(cols.len() as u16);
    for (name, oid) in cols {
        body.put_slice(name.as_bytes());
        body.put_u8(0);
        body.put_i32(0);
        body.put_i16(0);
        body.put_u32(*oid);
        body.put_i16(-1);
        body.put_i32(-1);
        body.put_i16(0);
    }
    msg(b'T', &body)
}

pub(crate) fn parameter_description(oids: &[u32]) -> Vec<u8> {
    let mut body = bytes::BytesMut::new();
    body.put_u16(oids.len() as u16);
    for oid in oids {
        body.put_u32(*oid);
    }
    msg(b't', &body)
}

pub(crate) fn data_row(cols: &[Option<&[u8]>]) -> Vec<u8> {
    let mut body = bytes::BytesMut::new();
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
    msg(b'D', &body)
}

pub(crate) fn parse_complete() -> Vec<u8> {
    msg(b'1', &[])
}

pub(crate) fn bind_complete() -> Vec<u8> {
    msg(b'2', &[])
}

pub(crate) fn close_complete() -> Vec<u8> {
    msg(b'3', &[])
}

pub(crate) fn portal_suspended() -> Vec<u8> {
    msg(b's', &[])
}

pub(crate) fn no_data() -> Vec<u8> {
    msg(b'n', &[])
}

pub(crate) fn copy_in_response(format: i8, column_formats: &[i16]) -> Vec<u8> {
    let mut body = bytes::BytesMut::new();
    body.put_i8(format);
    body.put_i16(column_formats.len() as i16);
    for code in column_formats {
        body.put_i16(*code);
    }
    msg(b'G', &body)
}

pub(crate) fn copy_out_response(format: i8, column_formats: &[i16]) -> Vec<u8> {
    let mut body = bytes::BytesMut::new();
    body.put_i8(format);
    body.put_i16(column_formats.len() as i16);
    for code in column_formats {
        body.put_i16(*code);
    }
    msg(b'H', &body)
}

pub(crate) fn copy_data(data: &[u8]) -> Vec<u8> {
    msg(b'd', data)
}

pub(crate) fn copy_done() -> Vec<u8> {
    msg(b'c', &[])
}

/// Read one tagged frontend frame off the server side.
pub(crate) async fn read_frame(server: &mut DuplexStream) -> (u8, Vec<u8>) {
    try_read_frame(server).await.expect("peer closed mid-frame")
}

/// Like [`read_frame`], `None` on a cleanly closed peer.
pub(crate) async fn try_read_frame(server: &mut DuplexStream) -> Option<(u8, Vec<u8>)> {
    let mut tag = [0u8; 1];
    match server.read_exact(&mut tag).await {
        Ok(_) => { },
        Err(_) => return None,
    }
    let mut len = [0u8; 4];
    server.read_exact(&mut len).await.ok()?;
    let len = i32::from_be_bytes(len) as usize - 4;
    let mut body = vec![0; len];
    server.read_exact(&mut body).await.ok()?;
    Some((tag[0], body))
}

/// Read the untagged startup (or cancel) frame off the server side.
pub(crate) async fn read_untagged_frame(server: &mut DuplexStream) -> Vec<u8> {
    let mut len = [0u8; 4];
    server.read_exact(&mut len).await.unwrap();
    let len = i32::from_be_bytes(len) as usize - 4;
    let mut body = vec![0; len];
    server.read_exact(&mut body).await.unwrap();
    body
}
