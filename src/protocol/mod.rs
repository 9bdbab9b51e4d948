/// Reply and command types exchanged with the server
pub mod command;
pub mod resp;

pub use command::Command;

use bytes::Bytes;
use std::fmt;
use std::fmt::Write as _;
use std::str;

use crate::error::{ResilisError, ResilisResult};

/// Error prefix a demoted master answers writes with
pub const READONLY_ERROR_PREFIX: &str = "READONLY";

/// A typed reply from the server
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Bulk string ($5\r\nhello\r\n)
    String(Bytes),
    /// Error (-ERR message\r\n)
    Error(String),
    /// Integer (:123\r\n)
    Integer(i64),
    /// Null bulk string or null array
    Nil,
    /// Simple string (+OK\r\n)
    Status(String),
    /// Array (*2\r\n...)
    Array(Vec<Reply>),
}

impl Reply {
    pub fn type_name(&self) -> &'static str {
        match self {
            Reply::String(_) => "string",
            Reply::Error(_) => "error",
            Reply::Integer(_) => "integer",
            Reply::Nil => "nil",
            Reply::Status(_) => "status",
            Reply::Array(_) => "array",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// True for an error reply sent by a node that lost write authority
    pub fn is_readonly_error(&self) -> bool {
        match self {
            Reply::Error(message) => message
                .get(..READONLY_ERROR_PREFIX.len())
                .map_or(false, |head| head.eq_ignore_ascii_case(READONLY_ERROR_PREFIX)),
            _ => false,
        }
    }

    /// Text of a bulk string or status reply, if it is valid UTF-8
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Reply::String(bytes) => str::from_utf8(bytes).ok(),
            Reply::Status(text) => Some(text),
            _ => None,
        }
    }

    /// Best-effort integer value of the reply.
    ///
    /// Integer replies are returned as-is. Bulk strings are parsed as base-10
    /// integers first and then as floating point numbers, since script
    /// results often carry numbers like `"3.2414214213422e+16"`. An empty
    /// string counts as zero.
    pub fn integer(&self) -> ResilisResult<i64> {
        match self {
            Reply::Integer(value) => Ok(*value),
            Reply::String(bytes) => match str::from_utf8(bytes) {
                Ok(text) => parse_numeric(text),
                Err(_) => Err(ResilisError::NumericParseFailed {
                    value: String::from_utf8_lossy(bytes).into_owned(),
                }),
            },
            other => {
                tracing::debug!(
                    "wrong reply type ({}) where an integer was expected",
                    other.type_name()
                );
                Err(ResilisError::ReplyTypeMismatch {
                    expected: "integer",
                    found: other.type_name(),
                })
            }
        }
    }

    /// The per-command results of a transaction.
    ///
    /// When `MULTI`, the queued commands and `EXEC` are pipelined, the packed
    /// reply ends with the array `EXEC` returned; earlier elements are the
    /// `+OK`/`+QUEUED` acknowledgements. Returns `None` when the transaction
    /// was aborted (nil) or the reply has another shape.
    pub fn transaction_results(&self) -> Option<&[Reply]> {
        match self {
            Reply::Array(elements) => match elements.last() {
                Some(Reply::Array(results)) => Some(results),
                _ => None,
            },
            _ => None,
        }
    }

    /// Result of the `index`-th command inside a pipelined transaction
    pub fn transaction_result(&self, index: usize) -> Option<&Reply> {
        self.transaction_results()?.get(index)
    }

    /// Multi-line dump with type tags, one element per line, nested arrays
    /// indented by two spaces per level.
    pub fn dump(&self, prefix: &str) -> String {
        let mut out = String::new();
        self.dump_into(&mut out, prefix, 0);
        out
    }

    fn dump_into(&self, out: &mut String, prefix: &str, indent: usize) {
        let pad = indent * 2;
        let _ = write!(out, "{:pad$}{}{}", "", prefix, self.type_name(), pad = pad);
        match self {
            Reply::String(bytes) => {
                let _ = writeln!(out, ": {:?}", String::from_utf8_lossy(bytes));
            }
            Reply::Error(text) | Reply::Status(text) => {
                let _ = writeln!(out, ": {}", text);
            }
            Reply::Integer(value) => {
                let _ = writeln!(out, ": {}", value);
            }
            Reply::Nil => out.push('\n'),
            Reply::Array(elements) => {
                let _ = writeln!(out, " size({})", elements.len());
                for element in elements {
                    element.dump_into(out, prefix, indent + 1);
                }
            }
        }
    }
}

/// Leading whitespace is skipped; NaN and infinities are rejected
fn parse_numeric(text: &str) -> ResilisResult<i64> {
    if text.is_empty() {
        return Ok(0);
    }
    let digits = text.trim_start();
    if let Ok(value) = digits.parse::<i64>() {
        return Ok(value);
    }
    match digits.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value as i64),
        _ => {
            tracing::debug!("invalid value ({}) where an integer was expected", text);
            Err(ResilisError::NumericParseFailed {
                value: text.to_string(),
            })
        }
    }
}

/// Renders replies the way an interactive client would print them.
impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::String(bytes) => write!(f, "{:?}", String::from_utf8_lossy(bytes)),
            Reply::Error(text) => write!(f, "(error) {}", text),
            Reply::Integer(value) => write!(f, "(integer) {}", value),
            Reply::Nil => write!(f, "(nil)"),
            Reply::Status(text) => write!(f, "{}", text),
            Reply::Array(elements) if elements.is_empty() => write!(f, "(empty array)"),
            Reply::Array(elements) => {
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {}", i + 1, element)?;
                }
                Ok(())
            }
        }
    }
}
