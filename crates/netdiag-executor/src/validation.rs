//! Input validation for diagnostic targets.

use std::net::Ipv4Addr;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::params::RecordType;

pub const MAX_DOMAIN_LENGTH: usize = 253;
pub const MAX_LABEL_LENGTH: usize = 63;
pub const MIN_PING_COUNT: u32 = 1;
pub const MAX_PING_COUNT: u32 = 30;

/// Extra `dig` options a request may carry.
pub const ALLOWED_DIG_OPTIONS: [&str; 3] = ["short", "trace", "answer"];

// DNS label per RFC 1035.
static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?$").expect("label pattern is valid")
});

/// A field failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check a domain name against RFC 1035.
///
/// A single trailing dot is accepted. At least two labels are required.
///
/// # Errors
/// Returns error describing the first rule the domain breaks.
pub fn validate_domain(domain: &str) -> Result<(), ValidationError> {
    if domain.is_empty() {
        return Err(ValidationError::new("domain", "domain cannot be empty"));
    }

    if domain.len() > MAX_DOMAIN_LENGTH {
        return Err(ValidationError::new(
            "domain",
            format!("domain name length cannot exceed {MAX_DOMAIN_LENGTH} characters"),
        ));
    }

    let domain = domain.strip_suffix('.').unwrap_or(domain);
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Err(ValidationError::new(
            "domain",
            "domain must have at least one dot separator",
        ));
    }

    labels.iter().try_for_each(|label| validate_label(label))
}

fn validate_label(label: &str) -> Result<(), ValidationError> {
    if label.len() > MAX_LABEL_LENGTH {
        return Err(ValidationError::new(
            "domain",
            format!("label length cannot exceed {MAX_LABEL_LENGTH} characters"),
        ));
    }

    if !LABEL_RE.is_match(label) {
        return Err(ValidationError::new("domain", "invalid label format"));
    }

    // Consecutive hyphens are reserved for IDNA ("xn--") labels.
    if label.contains("--") && !label.to_ascii_lowercase().starts_with("xn--") {
        return Err(ValidationError::new("domain", "invalid label format"));
    }

    Ok(())
}

/// Check an IPv4 address in dotted-quad form.
///
/// # Errors
/// Returns error if the address is empty or malformed.
pub fn validate_ipv4(ip: &str) -> Result<Ipv4Addr, ValidationError> {
    if ip.is_empty() {
        return Err(ValidationError::new("ip", "IP address cannot be empty"));
    }
    ip.parse()
        .map_err(|_| ValidationError::new("ip", "invalid IP address format"))
}

/// Check a ping target: an IPv4 address or a domain name.
///
/// # Errors
/// Returns the domain error when the target is not an IPv4 address either.
pub fn validate_target(target: &str) -> Result<(), ValidationError> {
    if validate_ipv4(target).is_ok() {
        return Ok(());
    }
    validate_domain(target).map_err(|e| ValidationError::new("target", e.message))
}

/// Check the ping count range.
///
/// # Errors
/// Returns error if the count is outside `1..=30`.
pub fn validate_ping_count(count: i64) -> Result<u32, ValidationError> {
    u32::try_from(count)
        .ok()
        .filter(|c| (MIN_PING_COUNT..=MAX_PING_COUNT).contains(c))
        .ok_or_else(|| {
            ValidationError::new(
                "count",
                format!("count must be between {MIN_PING_COUNT} and {MAX_PING_COUNT}"),
            )
        })
}

/// Check a DNS record type, case-insensitively.
///
/// # Errors
/// Returns error for unknown record types.
pub fn validate_record_type(record_type: &str) -> Result<RecordType, ValidationError> {
    record_type
        .parse()
        .map_err(|()| ValidationError::new("recordType", "invalid DNS record type"))
}

/// Check that only allowed `dig` options are present.
///
/// # Errors
/// Returns error naming the first disallowed option.
pub fn validate_dig_options(options: &Map<String, Value>) -> Result<(), ValidationError> {
    match options
        .keys()
        .find(|key| !ALLOWED_DIG_OPTIONS.contains(&key.as_str()))
    {
        Some(key) => Err(ValidationError::new(
            "parameters",
            format!("parameter '{key}' is not allowed"),
        )),
        None => Ok(()),
    }
}
