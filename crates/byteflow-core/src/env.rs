//! Environment variable helpers used by the configuration structs.
//!
//! ```ignore
//! use byteflow_core::env::{env_get, env_get_bool};
//!
//! let capacity: usize = env_get("FLOW_BUFFER_CAPACITY", 8192);
//! let flush = env_get_bool("FLOW_FLUSH_EPRINT", false);
//! ```

use std::str::FromStr;

/// Parse `key` as `T`; fall back to `default` when unset or unparsable.
#[inline]
pub fn env_get<T: FromStr>(key: &str, default: T) -> T {
    env_get_opt(key).unwrap_or(default)
}

/// Parse `key` as `T`; `None` when unset or unparsable.
#[inline]
pub fn env_get_opt<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// `"1" | "true" | "yes" | "on"` (any case) are true, anything else set
/// is false, unset gives `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => parse_bool(&val),
        Err(_) => default,
    }
}

/// Raw string value or `default`.
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[inline]
pub fn env_is_set(key: &str) -> bool {
    std::env::var_os(key).is_some()
}

pub(crate) fn parse_bool(val: &str) -> bool {
    matches!(
        val.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
