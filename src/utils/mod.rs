/// Utility functions and helpers
use std::time::Duration;

use crate::error::{ConfigError, ResilisError, ResilisResult};

/// Random key under `prefix`, e.g. `bench:3f2a91c0`
pub fn random_key(prefix: &str) -> String {
    let random: u32 = rand::random();
    format!("{}:{:08x}", prefix, random)
}

/// Split `host:port`. The port is taken after the last colon, so bracketed
/// IPv6 literals like `[::1]:6379` work.
pub fn parse_endpoint(addr: &str) -> ResilisResult<(String, u16)> {
    let invalid = || {
        ResilisError::Config(ConfigError::ValidationError(format!(
            "Invalid endpoint: {}",
            addr
        )))
    };

    let (host, port) = addr.trim().rsplit_once(':').ok_or_else(invalid)?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    if port == 0 {
        return Err(invalid());
    }
    Ok((host.to_string(), port))
}

/// Milliseconds to an optional timeout, zero meaning none
pub fn timeout_from_millis(millis: u64) -> Option<Duration> {
    (millis > 0).then(|| Duration::from_millis(millis))
}

/// Format duration for human-readable output
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        return format!("{}ms", millis);
    }

    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}.{:03}s", secs, duration.subsec_millis())
    } else if secs < 3600 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
