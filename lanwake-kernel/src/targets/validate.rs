//! Field normalization for target records.
//!
//! Every rule returns the canonical form on success so callers never store a
//! value that was not passed through here.

use crate::error::{WolError, WolResult};
use std::net::IpAddr;

const NAME_MIN: usize = 2;
const NAME_MAX: usize = 32;

/// Trims and lowercases `name`, then checks `^[a-z0-9][a-z0-9-]{1,31}$`.
pub fn normalize_name(name: &str) -> WolResult<String> {
    let candidate = name.trim().to_lowercase();
    if candidate.is_empty() {
        return Err(WolError::invalid("name is required"));
    }
    if !is_valid_name(&candidate) {
        return Err(WolError::invalid(
            "name must be 2-32 chars, lowercase letters, numbers, hyphen",
        ));
    }
    Ok(candidate)
}

fn is_valid_name(candidate: &str) -> bool {
    let bytes = candidate.as_bytes();
    if !(NAME_MIN..=NAME_MAX).contains(&bytes.len()) {
        return false;
    }
    let head_ok = bytes[0].is_ascii_lowercase() || bytes[0].is_ascii_digit();
    head_ok
        && bytes[1..]
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
}

/// Accepts IPv4 literals only; returns the trimmed literal.
pub fn validate_ip(ip: &str) -> WolResult<String> {
    let value = ip.trim();
    if value.is_empty() {
        return Err(WolError::invalid("ip is required"));
    }
    match value.parse::<IpAddr>() {
        Ok(IpAddr::V4(_)) => Ok(value.to_string()),
        Ok(IpAddr::V6(_)) => Err(WolError::invalid("ipv4 address required")),
        Err(_) => Err(WolError::invalid("invalid ip address")),
    }
}

/// Canonical `AA:BB:CC:DD:EE:FF`. Blank input means "no MAC" and yields `None`.
pub fn normalize_mac(mac: &str) -> WolResult<Option<String>> {
    let value = mac.trim();
    if value.is_empty() {
        return Ok(None);
    }
    let value = value.replace('-', ":").to_uppercase();
    if !is_canonical_mac(&value) {
        return Err(WolError::invalid(
            "invalid mac address; use AA:BB:CC:DD:EE:FF",
        ));
    }
    Ok(Some(value))
}

fn is_canonical_mac(value: &str) -> bool {
    let octets: Vec<&str> = value.split(':').collect();
    octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.bytes().all(|b| b.is_ascii_hexdigit()))
}
