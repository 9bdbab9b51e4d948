/// Command construction for the request side of the protocol
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;

use crate::error::ResilisError;

/// A single protocol command: the name followed by its arguments,
/// each sent as one bulk string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Command {
    /// Start a command with the given name, e.g. `Command::new("SET")`
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            args: vec![Bytes::copy_from_slice(name.as_ref().as_bytes())],
        }
    }

    /// Append an argument rendered through `Display` (strings, integers, floats)
    pub fn arg(mut self, arg: impl fmt::Display) -> Self {
        self.args.push(Bytes::from(arg.to_string()));
        self
    }

    /// Append a binary-safe argument
    pub fn arg_bytes(mut self, arg: impl Into<Bytes>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Command name as sent on the wire
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.args[0]).into_owned()
    }

    /// Case-insensitive comparison of the command name
    pub fn is(&self, name: &str) -> bool {
        self.args[0].eq_ignore_ascii_case(name.as_bytes())
    }

    /// Name and arguments, in wire order
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }
}

/// Splits on ASCII whitespace, the way a command line would be typed.
impl FromStr for Command {
    type Err = ResilisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let name = words
            .next()
            .ok_or_else(|| ResilisError::InvalidCommand("empty command".to_string()))?;

        Ok(words.fold(Command::new(name), |command, word| command.arg(word)))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.args[0]))?;
        // Never log credentials
        if self.is("AUTH") {
            return write!(f, " ***");
        }
        for arg in &self.args[1..] {
            write!(f, " {}", String::from_utf8_lossy(arg))?;
        }
        Ok(())
    }
}
