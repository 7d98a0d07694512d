//! Pipe transport wire values and RESP codec.
//!
//! Requests go out as an array of bulk strings. Replies are decoded
//! incrementally: [`Decoder::decode`] returns `Ok(None)` until a whole frame
//! is buffered and never consumes a partial frame. The decoder remembers how
//! far it has scanned, so a reply spread over many reads is scanned once and
//! parsed once.
//!
//! | Prefix | Frame | Value |
//! |--------|-------|-------|
//! | `+` | `+OK\r\n` | [`WireValue::Status`] |
//! | `-` | `-ERR msg\r\n` | [`WireValue::Error`] |
//! | `:` | `:42\r\n` | [`WireValue::Integer`] |
//! | `$` | `$3\r\nfoo\r\n` | [`WireValue::Bulk`] (`$-1` is [`WireValue::Null`]) |
//! | `*` | `*2\r\n...` | [`WireValue::Array`] (`*-1` is [`WireValue::Null`]) |
//! | `_` | `_\r\n` | [`WireValue::Null`] |

// ============================================================================
// Imports
// ============================================================================

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

const CRLF: &[u8] = b"\r\n";

/// Largest bulk string accepted from the server (512 MiB).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Deepest array nesting accepted from the server.
const MAX_DEPTH: usize = 32;

// ============================================================================
// WireValue
// ============================================================================

/// A decoded pipe reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireValue {
    /// Null bulk string or null array.
    Null,
    /// Simple status string such as `OK` or `PONG`.
    Status(String),
    /// Binary-safe string.
    Bulk(Bytes),
    /// Signed integer.
    Integer(i64),
    /// Ordered list of values.
    Array(Vec<WireValue>),
    /// Server error message.
    Error(String),
}

impl WireValue {
    /// Creates a bulk string value.
    #[inline]
    #[must_use]
    pub fn bulk(bytes: impl Into<Bytes>) -> Self {
        Self::Bulk(bytes.into())
    }

    /// Creates a status value.
    #[inline]
    #[must_use]
    pub fn status(text: impl Into<String>) -> Self {
        Self::Status(text.into())
    }

    /// Returns the text of a status or UTF-8 bulk value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Status(text) | Self::Error(text) => Some(text),
            Self::Bulk(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    /// Returns the raw bytes of a bulk value.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bulk(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Returns the elements of an array value.
    #[inline]
    #[must_use]
    pub fn as_array(&self) -> Option<&[WireValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Returns `true` for a null value.
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short type name for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Status(_) => "status",
            Self::Bulk(_) => "bulk",
            Self::Integer(_) => "integer",
            Self::Array(_) => "array",
            Self::Error(_) => "error",
        }
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Encodes a request frame: an array of `name` followed by `arguments`.
#[must_use]
pub fn encode_command(name: &str, arguments: &[WireValue]) -> BytesMut {
    let mut out = BytesMut::with_capacity(16 + name.len() + arguments.len() * 16);
    write_header(&mut out, b'*', arguments.len() as i64 + 1);
    write_bulk(&mut out, name.as_bytes());
    for argument in arguments {
        encode(argument, &mut out);
    }
    out
}

/// Appends the RESP encoding of `value` to `out`.
pub fn encode(value: &WireValue, out: &mut BytesMut) {
    match value {
        WireValue::Null => out.put_slice(b"$-1\r\n"),
        WireValue::Status(text) => {
            out.put_u8(b'+');
            out.put_slice(text.as_bytes());
            out.put_slice(CRLF);
        }
        WireValue::Error(text) => {
            out.put_u8(b'-');
            out.put_slice(text.as_bytes());
            out.put_slice(CRLF);
        }
        WireValue::Integer(n) => write_header(out, b':', *n),
        WireValue::Bulk(bytes) => write_bulk(out, bytes),
        WireValue::Array(items) => {
            write_header(out, b'*', items.len() as i64);
            for item in items {
                encode(item, out);
            }
        }
    }
}

fn write_header(out: &mut BytesMut, prefix: u8, n: i64) {
    out.put_u8(prefix);
    out.put_slice(n.to_string().as_bytes());
    out.put_slice(CRLF);
}

fn write_bulk(out: &mut BytesMut, bytes: &[u8]) {
    write_header(out, b'$', bytes.len() as i64);
    out.put_slice(bytes);
    out.put_slice(CRLF);
}

// ============================================================================
// Decoding
// ============================================================================

/// Decodes one frame from the front of `buf` without keeping scan state.
///
/// Returns `Ok(None)` and leaves `buf` untouched when the frame is
/// incomplete. Prefer a [`Decoder`] when the same buffer is refilled.
///
/// # Errors
///
/// Returns [`Error::DecodeFailure`] on a malformed frame. The buffer is then
/// unusable and the connection should be dropped.
pub fn decode(buf: &mut BytesMut) -> Result<Option<WireValue>> {
    Decoder::new().decode(buf)
}

/// Incremental frame decoder for one read buffer.
///
/// Between calls it keeps the offset of the first unscanned element and the
/// number of elements still owed by each open array. Only `decode` may
/// consume bytes from the buffer it is fed.
#[derive(Debug, Default)]
pub struct Decoder {
    scanned: usize,
    open_arrays: Vec<usize>,
}

impl Decoder {
    /// Creates a decoder positioned at the start of a frame.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched when the frame is
    /// incomplete.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DecodeFailure`] on a malformed frame.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<WireValue>> {
        let end = match self.scan(&buf[..]) {
            Ok(Some(end)) => end,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.reset();
                return Err(e);
            }
        };
        self.reset();

        match parse(&buf[..end], 0, 0)? {
            Some((value, used)) if used == end => {
                buf.advance(end);
                Ok(Some(value))
            }
            _ => Err(Error::decode("frame boundary mismatch")),
        }
    }

    /// Advances over complete elements, returning the frame end once the
    /// outermost element is complete.
    fn scan(&mut self, buf: &[u8]) -> Result<Option<usize>> {
        loop {
            let Some((line, next)) = read_line(buf, self.scanned) else {
                return Ok(None);
            };
            let Some((&prefix, body)) = line.split_first() else {
                return Err(Error::decode("empty reply line"));
            };

            match prefix {
                b'+' | b'-' | b':' | b'_' => self.scanned = next,
                b'$' => {
                    let len = integer(body)?;
                    if len >= 0 {
                        let len = usize::try_from(len)
                            .ok()
                            .filter(|&len| len <= MAX_BULK_SIZE)
                            .ok_or_else(|| Error::decode(format!("bulk length {len} out of range")))?;
                        if buf.len() < next + len + CRLF.len() {
                            return Ok(None);
                        }
                        self.scanned = next + len + CRLF.len();
                    } else {
                        self.scanned = next;
                    }
                }
                b'*' => {
                    let count = integer(body)?;
                    self.scanned = next;
                    if count > 0 {
                        if self.open_arrays.len() >= MAX_DEPTH {
                            return Err(Error::decode("reply nested too deeply"));
                        }
                        let count = usize::try_from(count)
                            .map_err(|_| Error::decode(format!("array length {count} out of range")))?;
                        self.open_arrays.push(count);
                        continue;
                    }
                }
                other => {
                    return Err(Error::decode(format!("unknown reply prefix 0x{other:02x}")));
                }
            }

            // One element finished; close every array it completes.
            while let Some(remaining) = self.open_arrays.last_mut() {
                *remaining -= 1;
                if *remaining > 0 {
                    break;
                }
                self.open_arrays.pop();
            }
            if self.open_arrays.is_empty() {
                return Ok(Some(self.scanned));
            }
        }
    }

    fn reset(&mut self) {
        self.scanned = 0;
        self.open_arrays.clear();
    }
}

/// Parses the frame starting at `pos`, returning the value and end offset.
fn parse(buf: &[u8], pos: usize, depth: usize) -> Result<Option<(WireValue, usize)>> {
    if depth > MAX_DEPTH {
        return Err(Error::decode("reply nested too deeply"));
    }

    let Some((line, next)) = read_line(buf, pos) else {
        return Ok(None);
    };
    let Some((&prefix, body)) = line.split_first() else {
        return Err(Error::decode("empty reply line"));
    };

    match prefix {
        b'+' => Ok(Some((WireValue::Status(text(body)?), next))),
        b'-' => Ok(Some((WireValue::Error(text(body)?), next))),
        b':' => Ok(Some((WireValue::Integer(integer(body)?), next))),
        b'_' => Ok(Some((WireValue::Null, next))),
        b'$' => {
            let len = integer(body)?;
            if len < 0 {
                return Ok(Some((WireValue::Null, next)));
            }
            let len = usize::try_from(len)
                .ok()
                .filter(|&len| len <= MAX_BULK_SIZE)
                .ok_or_else(|| Error::decode(format!("bulk length {len} out of range")))?;

            let end = next + len;
            if buf.len() < end + CRLF.len() {
                return Ok(None);
            }
            if &buf[end..end + CRLF.len()] != CRLF {
                return Err(Error::decode("bulk string not terminated by CRLF"));
            }
            let bytes = Bytes::copy_from_slice(&buf[next..end]);
            Ok(Some((WireValue::Bulk(bytes), end + CRLF.len())))
        }
        b'*' => {
            let count = integer(body)?;
            if count < 0 {
                return Ok(Some((WireValue::Null, next)));
            }
            let count = usize::try_from(count)
                .map_err(|_| Error::decode(format!("array length {count} out of range")))?;

            let mut items = Vec::with_capacity(count.min(1024));
            let mut cursor = next;
            for _ in 0..count {
                let Some((item, end)) = parse(buf, cursor, depth + 1)? else {
                    return Ok(None);
                };
                items.push(item);
                cursor = end;
            }
            Ok(Some((WireValue::Array(items), cursor)))
        }
        other => Err(Error::decode(format!(
            "unknown reply prefix 0x{other:02x}"
        ))),
    }
}

/// Returns the line at `pos` without its CRLF, and the offset after it.
fn read_line(buf: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(pos..)?;
    let at = rest.windows(CRLF.len()).position(|w| w == CRLF)?;
    Some((&rest[..at], pos + at + CRLF.len()))
}

fn text(body: &[u8]) -> Result<String> {
    String::from_utf8(body.to_vec()).map_err(|e| Error::decode(format!("invalid UTF-8: {e}")))
}

fn integer(body: &[u8]) -> Result<i64> {
    std::str::from_utf8(body)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| Error::decode(format!("invalid integer {:?}", String::from_utf8_lossy(body))))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Vec<WireValue> {
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        while let Some(value) = decode(&mut buf).expect("decode") {
            out.push(value);
        }
        assert!(buf.is_empty(), "trailing bytes: {buf:?}");
        out
    }

    #[test]
    fn test_encode_command() {
        let frame = encode_command("SET", &[WireValue::bulk("fleet"), WireValue::bulk("a")]);
        assert_eq!(&frame[..], b"*3\r\n$3\r\nSET\r\n$5\r\nfleet\r\n$1\r\na\r\n");
    }

    #[test]
    fn test_encode_command_without_arguments() {
        assert_eq!(&encode_command("PING", &[])[..], b"*1\r\n$4\r\nPING\r\n");
    }

    #[test]
    fn test_decode_scalars() {
        let values = decode_all(b"+OK\r\n-ERR key not found\r\n:42\r\n$-1\r\n_\r\n");
        assert_eq!(
            values,
            vec![
                WireValue::status("OK"),
                WireValue::Error("ERR key not found".to_string()),
                WireValue::Integer(42),
                WireValue::Null,
                WireValue::Null,
            ]
        );
    }

    #[test]
    fn test_decode_bulk_is_binary_safe() {
        let values = decode_all(b"$4\r\na\r\nb\r\n");
        assert_eq!(values, vec![WireValue::bulk(&b"a\r\nb"[..])]);
    }

    #[test]
    fn test_decode_nested_array() {
        let values = decode_all(b"*2\r\n:0\r\n*1\r\n*2\r\n$2\r\nid\r\n$2\r\n{}\r\n");
        assert_eq!(
            values,
            vec![WireValue::Array(vec![
                WireValue::Integer(0),
                WireValue::Array(vec![WireValue::Array(vec![
                    WireValue::bulk("id"),
                    WireValue::bulk("{}"),
                ])]),
            ])]
        );
    }

    #[test]
    fn test_partial_frames_are_not_consumed() {
        let frame = b"*2\r\n$5\r\nhello\r\n:7\r\n";
        let mut buf = BytesMut::new();

        for &byte in &frame[..frame.len() - 1] {
            buf.put_u8(byte);
            let len = buf.len();
            assert_eq!(decode(&mut buf).expect("decode"), None);
            assert_eq!(buf.len(), len);
        }

        buf.put_u8(frame[frame.len() - 1]);
        let value = decode(&mut buf).expect("decode").expect("complete frame");
        assert_eq!(
            value,
            WireValue::Array(vec![WireValue::bulk("hello"), WireValue::Integer(7)])
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decoder_resumes_after_complete_elements() {
        let mut decoder = Decoder::new();
        let mut buf = BytesMut::from(&b"*3\r\n$5\r\nhello\r\n:7\r\n$3\r\nab"[..]);

        assert_eq!(decoder.decode(&mut buf).expect("decode"), None);
        assert_eq!(decoder.scanned, b"*3\r\n$5\r\nhello\r\n:7\r\n".len());
        assert_eq!(decoder.open_arrays, vec![1]);

        buf.put_slice(b"c\r\n+OK\r\n");
        let value = decoder.decode(&mut buf).expect("decode").expect("complete frame");
        assert_eq!(
            value,
            WireValue::Array(vec![
                WireValue::bulk("hello"),
                WireValue::Integer(7),
                WireValue::bulk("abc"),
            ])
        );
        assert_eq!(decoder.scanned, 0);

        assert_eq!(decoder.decode(&mut buf).expect("decode"), Some(WireValue::status("OK")));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decoder_large_reply_over_many_reads() {
        let reply = WireValue::Array((0..500).map(|i| WireValue::bulk(format!("truck{i}"))).collect());
        let mut frame = BytesMut::new();
        encode(&reply, &mut frame);

        let mut decoder = Decoder::new();
        let mut buf = BytesMut::new();
        let mut decoded = None;
        for chunk in frame.chunks(7) {
            buf.put_slice(chunk);
            if let Some(value) = decoder.decode(&mut buf).expect("decode") {
                decoded = Some(value);
            }
        }
        assert_eq!(decoded, Some(reply));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decoder_empty_and_null_arrays() {
        assert_eq!(
            decode_all(b"*0\r\n*-1\r\n*2\r\n*0\r\n:1\r\n"),
            vec![
                WireValue::Array(Vec::new()),
                WireValue::Null,
                WireValue::Array(vec![WireValue::Array(Vec::new()), WireValue::Integer(1)]),
            ]
        );
    }

    #[test]
    fn test_decode_rejects_deep_nesting() {
        let mut buf = BytesMut::from("*1\r\n".repeat(MAX_DEPTH + 2).as_bytes());
        assert!(decode(&mut buf).unwrap_err().is_decode_error());
    }

    #[test]
    fn test_decode_rejects_unknown_prefix() {
        let mut buf = BytesMut::from(&b"?what\r\n"[..]);
        assert!(decode(&mut buf).unwrap_err().is_decode_error());
    }

    #[test]
    fn test_decode_rejects_bad_bulk_terminator() {
        let mut buf = BytesMut::from(&b"$2\r\nabXY"[..]);
        assert!(decode(&mut buf).unwrap_err().is_decode_error());
    }

    #[test]
    fn test_encode_decode_agree() {
        let value = WireValue::Array(vec![
            WireValue::status("OK"),
            WireValue::Integer(-3),
            WireValue::bulk("x"),
            WireValue::Array(Vec::new()),
        ]);
        let mut out = BytesMut::new();
        encode(&value, &mut out);
        assert_eq!(decode_all(&out), vec![value]);
    }

    #[test]
    fn test_accessors() {
        assert_eq!(WireValue::bulk("abc").as_str(), Some("abc"));
        assert_eq!(WireValue::status("PONG").as_str(), Some("PONG"));
        assert_eq!(WireValue::Integer(1).as_str(), None);
        assert_eq!(WireValue::Array(Vec::new()).kind(), "array");
        assert!(WireValue::Null.is_null());
    }
}
