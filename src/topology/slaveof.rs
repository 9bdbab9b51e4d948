/// `CONFIG GET slaveof` reply parsing (servers 2.6 and later)
use std::str;

use super::Role;
use crate::error::{ResilisError, ResilisResult};
use crate::protocol::Reply;

/// Interpret the `["slaveof", "<host> <port>"]` pair.
///
/// An empty value means the node replicates from nobody and is therefore
/// the master.
pub fn parse_slaveof_reply(reply: &Reply) -> ResilisResult<Role> {
    let elements = match reply {
        Reply::Array(elements) if elements.len() >= 2 => elements,
        Reply::Array(elements) => {
            return Err(ResilisError::malformed(format!(
                "CONFIG GET slaveof returned {} element(s)",
                elements.len()
            )))
        }
        other => {
            return Err(ResilisError::malformed(format!(
                "CONFIG GET slaveof returned {} reply",
                other.type_name()
            )))
        }
    };

    let value = match &elements[1] {
        Reply::String(bytes) => str::from_utf8(bytes)
            .map_err(|_| ResilisError::malformed("slaveof value is not valid UTF-8"))?,
        other => {
            return Err(ResilisError::malformed(format!(
                "slaveof value is {}, not a string",
                other.type_name()
            )))
        }
    };

    let mut tokens = value
        .split([' ', '\t', '\x0B', '\n', '\r'])
        .filter(|token| !token.is_empty());
    let Some(host) = tokens.next() else {
        return Ok(Role::Master);
    };
    let port = tokens
        .next()
        .ok_or_else(|| ResilisError::malformed(format!("slaveof value {:?} has no port", value)))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| ResilisError::malformed(format!("invalid slaveof port {:?}", port)))?;

    Ok(Role::Replica {
        host: host.to_string(),
        port,
    })
}
