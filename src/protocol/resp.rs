/// Redis RESP (Redis Serialization Protocol) parsing and generation
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::str;

use super::{Command, Reply};

/// Largest bulk string a server will send
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Deepest array nesting accepted in a reply
pub const MAX_DEPTH: usize = 64;

/// Incremental RESP parser for server replies.
///
/// Complete elements are consumed from the buffer as soon as they arrive and
/// held here until their enclosing array is finished, so a large reply is
/// scanned once however many reads it spans.
#[derive(Debug, Default)]
pub struct RespParser {
    /// Arrays still waiting for elements, innermost last
    frames: Vec<Frame>,
}

#[derive(Debug)]
struct Frame {
    remaining: usize,
    elements: Vec<Reply>,
}

/// One RESP element: a finished value or the header of an array
enum Item {
    Value(Reply),
    ArrayHeader(usize),
}

/// RESP encoder for writing commands
pub struct RespEncoder;

/// Parse error types
#[derive(Debug, thiserror::Error)]
pub enum RespParseError {
    #[error("Invalid RESP format: {0}")]
    InvalidFormat(String),
    #[error("Invalid UTF-8: {0}")]
    InvalidUtf8(#[from] str::Utf8Error),
    #[error("Invalid integer: {0:?}")]
    InvalidInteger(String),
}

impl RespParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether part of a reply has been consumed already
    pub fn is_partial(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Forget any partially parsed reply
    pub fn reset(&mut self) {
        self.frames.clear();
    }

    /// Parse one reply from the front of `buf`.
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold the rest of a
    /// reply; the caller should append more bytes and call again. After an
    /// error the parser is reset and the stream is unusable.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<Option<Reply>, RespParseError> {
        let result = self.parse_reply(buf);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn parse_reply(&mut self, buf: &mut BytesMut) -> Result<Option<Reply>, RespParseError> {
        loop {
            let mut pos = 0;
            let item = match Self::parse_item(&buf[..], &mut pos)? {
                Some(item) => item,
                None => return Ok(None),
            };
            buf.advance(pos);

            let mut reply = match item {
                Item::Value(reply) => reply,
                Item::ArrayHeader(0) => Reply::Array(Vec::new()),
                Item::ArrayHeader(len) => {
                    if self.frames.len() >= MAX_DEPTH {
                        return Err(RespParseError::InvalidFormat(format!(
                            "Array nesting deeper than {}",
                            MAX_DEPTH
                        )));
                    }
                    self.frames.push(Frame {
                        remaining: len,
                        elements: Vec::with_capacity(len.min(1024)),
                    });
                    continue;
                }
            };

            // Fold the value into its array, closing every array it completes
            loop {
                let Some(frame) = self.frames.last_mut() else {
                    return Ok(Some(reply));
                };
                frame.elements.push(reply);
                frame.remaining -= 1;
                if frame.remaining > 0 {
                    break;
                }
                let finished = self.frames.pop().map(|f| f.elements).unwrap_or_default();
                reply = Reply::Array(finished);
            }
        }
    }

    fn parse_item(data: &[u8], pos: &mut usize) -> Result<Option<Item>, RespParseError> {
        let line = match Self::read_line(data, pos) {
            Some(line) => line,
            None => return Ok(None),
        };

        let (&kind, body) = line
            .split_first()
            .ok_or_else(|| RespParseError::InvalidFormat("empty line".to_string()))?;

        let value = match kind {
            b'+' => Reply::Status(str::from_utf8(body)?.to_string()),
            b'-' => Reply::Error(str::from_utf8(body)?.to_string()),
            b':' => Reply::Integer(Self::parse_integer(body)?),
            b'$' => return Ok(Self::parse_bulk_string(data, pos, body)?.map(Item::Value)),
            b'*' => return Self::parse_array_header(body).map(Some),
            _ => {
                return Err(RespParseError::InvalidFormat(format!(
                    "Unknown RESP type: {}",
                    kind as char
                )))
            }
        };
        Ok(Some(Item::Value(value)))
    }

    fn parse_bulk_string(
        data: &[u8],
        pos: &mut usize,
        header: &[u8],
    ) -> Result<Option<Reply>, RespParseError> {
        let size = Self::parse_integer(header)?;
        if size == -1 {
            return Ok(Some(Reply::Nil));
        }
        if !(0..=MAX_BULK_LEN).contains(&size) {
            return Err(RespParseError::InvalidFormat(format!(
                "Invalid bulk string size {}",
                size
            )));
        }

        let size = size as usize;
        let start = *pos;
        // Payload plus the trailing \r\n
        if data.len() < start + size + 2 {
            return Ok(None);
        }
        if &data[start + size..start + size + 2] != b"\r\n" {
            return Err(RespParseError::InvalidFormat(
                "Missing \\r\\n after bulk string".to_string(),
            ));
        }

        *pos = start + size + 2;
        Ok(Some(Reply::String(Bytes::copy_from_slice(
            &data[start..start + size],
        ))))
    }

    fn parse_array_header(header: &[u8]) -> Result<Item, RespParseError> {
        let size = Self::parse_integer(header)?;
        if size == -1 {
            return Ok(Item::Value(Reply::Nil));
        }
        usize::try_from(size)
            .map(Item::ArrayHeader)
            .map_err(|_| RespParseError::InvalidFormat(format!("Invalid array size {}", size)))
    }

    fn parse_integer(digits: &[u8]) -> Result<i64, RespParseError> {
        btoi::btoi::<i64>(digits).map_err(|_| {
            RespParseError::InvalidInteger(String::from_utf8_lossy(digits).into_owned())
        })
    }

    /// Read a line ending with \r\n starting at `pos`, without the terminator
    fn read_line<'a>(data: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
        let rest = &data[*pos..];
        let end = rest.windows(2).position(|w| w == b"\r\n")?;
        *pos += end + 2;
        Some(&rest[..end])
    }
}

impl RespEncoder {
    /// Encode a command to bytes
    pub fn encode(command: &Command) -> Bytes {
        let mut buf = BytesMut::new();
        Self::encode_into(&mut buf, command);
        buf.freeze()
    }

    /// Encode a command as an array of bulk strings into an existing buffer
    pub fn encode_into(buf: &mut BytesMut, command: &Command) {
        buf.put_u8(b'*');
        buf.extend_from_slice(command.args().len().to_string().as_bytes());
        buf.put_slice(b"\r\n");
        for arg in command.args() {
            buf.put_u8(b'$');
            buf.extend_from_slice(arg.len().to_string().as_bytes());
            buf.put_slice(b"\r\n");
            buf.extend_from_slice(arg);
            buf.put_slice(b"\r\n");
        }
    }
}
