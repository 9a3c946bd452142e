//! RESP2 Frame
//!
//! Wire values exchanged with the backing service. `check` validates that a
//! whole frame is buffered before `parse` allocates anything.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;

/// Largest bulk string accepted, same as the Redis `proto-max-bulk-len` default
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// One RESP2 value
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    /// Null bulk string or null array
    Null,
    Array(Vec<Frame>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Not enough data buffered yet
    Incomplete,
    Invalid(String),
}

impl Frame {
    /// Array of bulk strings, the shape of every request
    pub fn request(args: &[Bytes]) -> Self {
        Frame::Array(args.iter().cloned().map(Frame::Bulk).collect())
    }

    /// Advance past one complete frame or report why that is not possible.
    pub fn check(buf: &mut Cursor<&[u8]>) -> Result<(), ParseError> {
        match get_u8(buf)? {
            b'+' | b'-' | b':' => get_line(buf).map(|_| ()),
            b'$' => {
                let len = get_decimal(buf)?;
                if len < 0 {
                    return Ok(());
                }
                skip(buf, bulk_span(len)?)
            }
            b'*' => {
                let len = get_decimal(buf)?;
                for _ in 0..len.max(0) {
                    Frame::check(buf)?;
                }
                Ok(())
            }
            byte => Err(ParseError::Invalid(format!("invalid frame type byte `{}`", byte))),
        }
    }

    /// Parse one frame; call after `check` succeeded on the same bytes.
    pub fn parse(buf: &mut Cursor<&[u8]>) -> Result<Frame, ParseError> {
        match get_u8(buf)? {
            b'+' => Ok(Frame::Simple(line_string(buf)?)),
            b'-' => Ok(Frame::Error(line_string(buf)?)),
            b':' => Ok(Frame::Integer(get_decimal(buf)?)),
            b'$' => {
                let len = get_decimal(buf)?;
                if len < 0 {
                    return Ok(Frame::Null);
                }
                let span = bulk_span(len)?;
                let len = span - 2;
                if buf.remaining() < span {
                    return Err(ParseError::Incomplete);
                }
                let data = Bytes::copy_from_slice(&buf.chunk()[..len]);
                if &buf.chunk()[len..len + 2] != b"\r\n" {
                    return Err(ParseError::Invalid("bulk string not terminated by CRLF".into()));
                }
                buf.advance(span);
                Ok(Frame::Bulk(data))
            }
            b'*' => {
                let len = get_decimal(buf)?;
                if len < 0 {
                    return Ok(Frame::Null);
                }
                let mut items = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    items.push(Frame::parse(buf)?);
                }
                Ok(Frame::Array(items))
            }
            byte => Err(ParseError::Invalid(format!("invalid frame type byte `{}`", byte))),
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(s) => {
                dst.put_u8(b'+');
                dst.put_slice(s.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Frame::Error(s) => {
                dst.put_u8(b'-');
                dst.put_slice(s.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Frame::Integer(n) => {
                dst.put_slice(format!(":{}\r\n", n).as_bytes());
            }
            Frame::Bulk(data) => {
                dst.put_slice(format!("${}\r\n", data.len()).as_bytes());
                dst.put_slice(data);
                dst.put_slice(b"\r\n");
            }
            Frame::Null => dst.put_slice(b"$-1\r\n"),
            Frame::Array(items) => {
                dst.put_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.encode(dst);
                }
            }
        }
    }
}

fn get_u8(buf: &mut Cursor<&[u8]>) -> Result<u8, ParseError> {
    if !buf.has_remaining() {
        return Err(ParseError::Incomplete);
    }
    Ok(buf.get_u8())
}

/// Bytes a bulk payload of `len` occupies, trailing CRLF included
fn bulk_span(len: i64) -> Result<usize, ParseError> {
    usize::try_from(len)
        .ok()
        .filter(|&len| len <= MAX_BULK_LEN)
        .and_then(|len| len.checked_add(2))
        .ok_or_else(|| ParseError::Invalid(format!("invalid bulk length {}", len)))
}

fn skip(buf: &mut Cursor<&[u8]>, n: usize) -> Result<(), ParseError> {
    if buf.remaining() < n {
        return Err(ParseError::Incomplete);
    }
    buf.advance(n);
    Ok(())
}

fn get_line<'a>(buf: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], ParseError> {
    let start = buf.position() as usize;
    let data: &'a [u8] = *buf.get_ref();
    if data.len() < 2 {
        return Err(ParseError::Incomplete);
    }

    for i in start..data.len() - 1 {
        if data[i] == b'\r' && data[i + 1] == b'\n' {
            buf.set_position((i + 2) as u64);
            return Ok(&data[start..i]);
        }
    }
    Err(ParseError::Incomplete)
}

fn line_string(buf: &mut Cursor<&[u8]>) -> Result<String, ParseError> {
    let line = get_line(buf)?;
    Ok(String::from_utf8_lossy(line).into_owned())
}

fn get_decimal(buf: &mut Cursor<&[u8]>) -> Result<i64, ParseError> {
    let line = get_line(buf)?;
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ParseError::Invalid("invalid integer".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8]) -> Result<Frame, ParseError> {
        let mut cursor = Cursor::new(input);
        Frame::check(&mut cursor)?;
        cursor.set_position(0);
        Frame::parse(&mut cursor)
    }

    #[test]
    fn test_parse_scalars() {
        assert_eq!(parse_all(b"+OK\r\n"), Ok(Frame::Simple("OK".into())));
        assert_eq!(
            parse_all(b"-WRONGTYPE Operation\r\n"),
            Ok(Frame::Error("WRONGTYPE Operation".into()))
        );
        assert_eq!(parse_all(b":42\r\n"), Ok(Frame::Integer(42)));
        assert_eq!(parse_all(b"$-1\r\n"), Ok(Frame::Null));
        assert_eq!(parse_all(b"*-1\r\n"), Ok(Frame::Null));
    }

    #[test]
    fn test_bulk_may_contain_crlf() {
        assert_eq!(
            parse_all(b"$4\r\na\r\nb\r\n"),
            Ok(Frame::Bulk(Bytes::from_static(b"a\r\nb")))
        );
    }

    #[test]
    fn test_nested_array() {
        let frame = parse_all(b"*2\r\n$3\r\nfoo\r\n*1\r\n:1\r\n").unwrap();
        assert_eq!(
            frame,
            Frame::Array(vec![
                Frame::Bulk(Bytes::from_static(b"foo")),
                Frame::Array(vec![Frame::Integer(1)]),
            ])
        );
    }

    #[test]
    fn test_incomplete_input() {
        assert_eq!(parse_all(b"$5\r\nab"), Err(ParseError::Incomplete));
        assert_eq!(parse_all(b"*2\r\n:1\r\n"), Err(ParseError::Incomplete));
        assert_eq!(parse_all(b""), Err(ParseError::Incomplete));
    }

    #[test]
    fn test_oversized_bulk_length_is_invalid() {
        assert!(matches!(
            parse_all(b"$9223372036854775807\r\n"),
            Err(ParseError::Invalid(_))
        ));
        assert!(matches!(
            parse_all(b"*1\r\n$536870913\r\n"),
            Err(ParseError::Invalid(_))
        ));
    }

    #[test]
    fn test_invalid_type_byte() {
        assert!(matches!(parse_all(b"?x\r\n"), Err(ParseError::Invalid(_))));
    }

    #[test]
    fn test_encode_request() {
        let frame = Frame::request(&[Bytes::from_static(b"GET"), Bytes::from_static(b"k")]);
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        assert_eq!(&buf[..], b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n");
    }
}
