// https://redis.io/docs/reference/protocol-spec

use std::fmt;
use std::io::{self, Cursor};
use std::str;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error as ThisError;

static CRLF: &[u8; 2] = b"\r\n";

/// A framing line with no CRLF in sight after this many bytes is rejected instead of buffered.
const MAX_LINE_LEN: usize = 64 * 1024;

/// Nested arrays deeper than this are rejected to keep the recursive parser off the stack limit.
const MAX_DEPTH: usize = 128;

/// Upper bounds on the lengths a peer may announce. A `$` or `*` header above the limit fails
/// immediately, before any payload is buffered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    pub max_bulk_len: usize,
    pub max_array_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_bulk_len: 512 * 1024 * 1024,
            max_array_len: 1024 * 1024,
        }
    }
}

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("not enough data is available to parse an entire frame")]
    Incomplete,
    #[error("protocol error; invalid frame data type: {0}")]
    InvalidDataType(u8),
    #[error("protocol error; invalid length {0}")]
    InvalidLength(i64),
    #[error("protocol error; {kind} length {len} exceeds limit of {max}")]
    LimitExceeded {
        kind: &'static str,
        len: i64,
        max: usize,
    },
    #[error("protocol error; arrays nested deeper than {0} levels")]
    TooDeep(usize),
    #[error("protocol error; line longer than {0} bytes")]
    LineTooLong(usize),
    #[error("protocol error; invalid integer")]
    InvalidInteger,
    #[error("protocol error; invalid UTF-8 string")]
    InvalidUTF8String(#[from] str::Utf8Error),
    #[error("protocol error; bulk string not terminated by CRLF")]
    MissingCrlf,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether the peer sent bytes that can never form a valid frame.
    pub fn is_protocol(&self) -> bool {
        !matches!(self, Error::Incomplete | Error::Io(_))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    /// The nil bulk string, `$-1`.
    Null,
    /// The nil array, `*-1`.
    NullArray,
    Array(Vec<Frame>),
}

// Protocol specification: https://redis.io/docs/reference/protocol-spec/
impl Frame {
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        Self::parse_with_limits(src, &Limits::default())
    }

    pub fn parse_with_limits(src: &mut Cursor<&[u8]>, limits: &Limits) -> Result<Self, Error> {
        parse_frame(src, limits, 0)
    }

    pub fn error(msg: impl Into<String>) -> Frame {
        Frame::Error(msg.into())
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Frame::Null | Frame::NullArray)
    }

    /// Writes the canonical RESP form of the frame to `dst`.
    pub fn write_to(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(s) => {
                dst.put_u8(u8::from(DataType::SimpleString));
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            Frame::Error(s) => {
                dst.put_u8(u8::from(DataType::SimpleError));
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            Frame::Integer(i) => {
                dst.put_u8(u8::from(DataType::Integer));
                dst.extend_from_slice(i.to_string().as_bytes());
                dst.extend_from_slice(CRLF);
            }
            Frame::Bulk(bytes) => {
                dst.reserve(1 + 20 + CRLF.len() + bytes.len() + CRLF.len());
                dst.put_u8(u8::from(DataType::BulkString));
                dst.extend_from_slice(bytes.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                dst.extend_from_slice(bytes);
                dst.extend_from_slice(CRLF);
            }
            Frame::Null => dst.extend_from_slice(b"$-1\r\n"),
            Frame::NullArray => dst.extend_from_slice(b"*-1\r\n"),
            Frame::Array(arr) => {
                dst.put_u8(u8::from(DataType::Array));
                dst.extend_from_slice(arr.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                for frame in arr {
                    frame.write_to(dst);
                }
            }
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = BytesMut::new();
        self.write_to(&mut bytes);
        bytes.to_vec()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "+{}", s),
            Frame::Error(s) => write!(f, "-{}", s),
            Frame::Integer(i) => write!(f, ":{}", i),
            Frame::Bulk(bytes) => write!(f, "${}", String::from_utf8_lossy(bytes)),
            Frame::Null => write!(f, "$-1"),
            Frame::NullArray => write!(f, "*-1"),
            Frame::Array(arr) => {
                write!(f, "*{}[", arr.len())?;
                for (i, frame) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", frame)?;
                }
                write!(f, "]")
            }
        }
    }
}

fn parse_frame(src: &mut Cursor<&[u8]>, limits: &Limits, depth: usize) -> Result<Frame, Error> {
    if depth > MAX_DEPTH {
        return Err(Error::TooDeep(MAX_DEPTH));
    }

    // The first byte in an RESP-serialized payload always identifies its type.
    let first_byte = get_byte(src)?;
    let data_type = DataType::try_from(first_byte)?;

    match data_type {
        DataType::SimpleString => {
            let line = get_line(src)?;
            Ok(Frame::Simple(str::from_utf8(line)?.to_string()))
        }
        DataType::SimpleError => {
            let line = get_line(src)?;
            Ok(Frame::Error(str::from_utf8(line)?.to_string()))
        }
        DataType::Integer => {
            let integer = parse_integer(get_line(src)?)?;
            Ok(Frame::Integer(integer))
        }
        // $<length>\r\n<data>\r\n
        DataType::BulkString => {
            let length = parse_integer(get_line(src)?)?;
            let Some(length) = check_length(length, "bulk string", limits.max_bulk_len)? else {
                return Ok(Frame::Null);
            };

            let data = get_bytes(src, length)?;
            Ok(Frame::Bulk(Bytes::copy_from_slice(data)))
        }
        // *<number-of-elements>\r\n<element-1>...<element-n>
        DataType::Array => {
            let length = parse_integer(get_line(src)?)?;
            let Some(length) = check_length(length, "array", limits.max_array_len)? else {
                return Ok(Frame::NullArray);
            };

            // The announced length is only trusted as far as the bytes that back it.
            let mut frames = Vec::with_capacity(length.min(1024));
            for _ in 0..length {
                frames.push(parse_frame(src, limits, depth + 1)?);
            }

            Ok(Frame::Array(frames))
        }
    }
}

/// Returns `None` for the `-1` nil sentinel.
fn check_length(length: i64, kind: &'static str, max: usize) -> Result<Option<usize>, Error> {
    match length {
        -1 => Ok(None),
        length if length < -1 => Err(Error::InvalidLength(length)),
        length if length as u64 > max as u64 => Err(Error::LimitExceeded {
            kind,
            len: length,
            max,
        }),
        length => Ok(Some(length as usize)),
    }
}

fn parse_integer(line: &[u8]) -> Result<i64, Error> {
    str::from_utf8(line)
        .map_err(|_| Error::InvalidInteger)?
        .parse::<i64>()
        .map_err(|_| Error::InvalidInteger)
}

fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], Error> {
    let buf: &'a [u8] = *src.get_ref();
    let start = src.position() as usize;

    let end = match buf[start..].windows(2).position(|window| window == CRLF) {
        Some(index) => start + index,
        None if buf.len() - start > MAX_LINE_LEN => return Err(Error::LineTooLong(MAX_LINE_LEN)),
        None => return Err(Error::Incomplete),
    };

    src.set_position((end + CRLF.len()) as u64);

    Ok(&buf[start..end])
}

fn get_bytes<'a>(src: &mut Cursor<&'a [u8]>, len: usize) -> Result<&'a [u8], Error> {
    let buf: &'a [u8] = *src.get_ref();
    let start = src.position() as usize;

    if buf.len() - start < len + CRLF.len() {
        return Err(Error::Incomplete);
    }

    let end = start + len;
    if &buf[end..end + CRLF.len()] != CRLF {
        return Err(Error::MissingCrlf);
    }

    src.set_position((end + CRLF.len()) as u64);

    Ok(&buf[start..end])
}

fn get_byte(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }
    Ok(src.get_u8())
}

#[derive(Debug)]
enum DataType {
    SimpleString, // '+'
    SimpleError,  // '-'
    Integer,      // ':'
    BulkString,   // '$'
    Array,        // '*'
}

impl TryFrom<u8> for DataType {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b'+' => Ok(Self::SimpleString),
            b'-' => Ok(Self::SimpleError),
            b':' => Ok(Self::Integer),
            b'$' => Ok(Self::BulkString),
            b'*' => Ok(Self::Array),
            _ => Err(Error::InvalidDataType(byte)),
        }
    }
}

impl From<DataType> for u8 {
    fn from(value: DataType) -> Self {
        match value {
            DataType::SimpleString => b'+',
            DataType::SimpleError => b'-',
            DataType::Integer => b':',
            DataType::BulkString => b'$',
            DataType::Array => b'*',
        }
    }
}
