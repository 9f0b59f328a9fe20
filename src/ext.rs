//! Buffer extension traits for the wire format.
//!
//! Postgres strings are nul terminated, lengths are big-endian and sometimes
//! signed where rust wants `usize`; these traits keep the conversions in one
//! place and panic on overflow instead of silently wrapping.
use bytes::{Buf, BufMut, Bytes};

use crate::common::ByteStr;

pub trait UsizeExt {
    /// Length is `usize` in rust while the protocol wants `i32`,
    /// panic when overflow instead of wrapping.
    fn to_i32(self) -> i32;
    /// Length is `usize` in rust while the protocol wants `u16`,
    /// panic when overflow instead of wrapping.
    fn to_u16(self) -> u16;
}

impl UsizeExt for usize {
    fn to_i32(self) -> i32 {
        self.try_into().expect("message size too large for protocol")
    }

    fn to_u16(self) -> u16 {
        self.try_into().expect("message size too large for protocol")
    }
}

pub trait StrExt {
    /// Postgres String must be nul terminated.
    fn nul_string_len(&self) -> i32;
}

impl StrExt for str {
    fn nul_string_len(&self) -> i32 {
        self.len().to_i32() + 1/* nul */
    }
}

pub trait BufMutExt {
    /// Postgres String must be nul terminated.
    fn put_nul_string(&mut self, string: &str);
}

impl<B: BufMut> BufMutExt for B {
    fn put_nul_string(&mut self, string: &str) {
        self.put(string.as_bytes());
        self.put_u8(b'\0');
    }
}

pub trait BytesExt {
    /// Split off bytes up to the next nul terminator, consuming the terminator.
    ///
    /// Returns `None` when the buffer holds no terminator, which means the
    /// message body is shorter than its declared length claims.
    fn get_nul_bytes(&mut self) -> Option<Bytes>;

    fn get_nul_bytestr(&mut self) -> Option<Result<ByteStr, std::str::Utf8Error>>;
}

impl BytesExt for Bytes {
    fn get_nul_bytes(&mut self) -> Option<Bytes> {
        let end = self.iter().position(|e| matches!(e, b'\0'))?;
        let me = self.split_to(end);
        Buf::advance(self, 1); // nul
        Some(me)
    }

    fn get_nul_bytestr(&mut self) -> Option<Result<ByteStr, std::str::Utf8Error>> {
        self.get_nul_bytes().map(ByteStr::from_utf8)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn nul_string_roundtrip() {
        let mut buf = BytesMut::new();
        buf.put_nul_string("SELECT 1");
        assert_eq!(&buf[..], b"SELECT 1\0");

        let mut bytes = buf.freeze();
        let head = bytes.get_nul_bytes().unwrap();
        assert_eq!(&head[..], b"SELECT 1");
        assert!(bytes.is_empty());
    }

    #[test]
    fn missing_terminator() {
        let mut bytes = Bytes::from_static(b"oops");
        assert!(bytes.get_nul_bytes().is_none());
    }

    #[test]
    fn nul_string_len_counts_terminator() {
        assert_eq!("".nul_string_len(), 1);
        assert_eq!("user".nul_string_len(), 5);
    }
}
