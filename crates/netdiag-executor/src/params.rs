//! Typed parameters for the supported commands.

use std::str::FromStr;

use netdiag_core::{CommandKind, CommandRequest};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::validation::{
    ValidationError, validate_dig_options, validate_domain, validate_ping_count,
    validate_record_type, validate_target,
};

/// Count used when a ping request omits it.
pub const DEFAULT_PING_COUNT: u32 = 4;

/// DNS record types accepted by `dig` requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Aaaa,
    Mx,
    Ns,
    Txt,
    Cname,
    Soa,
    Ptr,
}

impl RecordType {
    /// Upper-case name as passed to `dig`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::Aaaa => "AAAA",
            Self::Mx => "MX",
            Self::Ns => "NS",
            Self::Txt => "TXT",
            Self::Cname => "CNAME",
            Self::Soa => "SOA",
            Self::Ptr => "PTR",
        }
    }
}

impl FromStr for RecordType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(Self::A),
            "AAAA" => Ok(Self::Aaaa),
            "MX" => Ok(Self::Mx),
            "NS" => Ok(Self::Ns),
            "TXT" => Ok(Self::Txt),
            "CNAME" => Ok(Self::Cname),
            "SOA" => Ok(Self::Soa),
            "PTR" => Ok(Self::Ptr),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a `ping` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingParams {
    pub target: String,
    pub count: u32,
}

#[derive(Deserialize)]
struct RawPing {
    target: String,
    count: Option<i64>,
}

/// Parameters of a `dig` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigParams {
    pub domain: String,
    pub record_type: RecordType,
    pub nameserver: Option<String>,
    /// Enabled `+option` flags, sorted by name.
    pub options: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDig {
    domain: String,
    #[serde(default = "default_record_type")]
    record_type: String,
    #[serde(default)]
    nameserver: Option<String>,
    #[serde(default)]
    parameters: Map<String, Value>,
}

fn default_record_type() -> String {
    RecordType::A.as_str().to_string()
}

/// Validated parameters for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandParams {
    Ping(PingParams),
    Dig(DigParams),
}

impl CommandParams {
    /// Parse and validate the parameters of a request.
    ///
    /// # Errors
    /// Returns error if a field is missing, mistyped or invalid.
    pub fn from_request(request: &CommandRequest) -> Result<Self, ValidationError> {
        let value = Value::Object(request.parameters.clone());
        match request.kind {
            CommandKind::Ping => {
                let raw: RawPing = serde_json::from_value(value).map_err(|e| ValidationError {
                    field: "parameters",
                    message: e.to_string(),
                })?;
                validate_target(&raw.target)?;
                let count =
                    validate_ping_count(raw.count.unwrap_or(i64::from(DEFAULT_PING_COUNT)))?;
                Ok(Self::Ping(PingParams {
                    target: raw.target,
                    count,
                }))
            }
            CommandKind::Dig => {
                let raw: RawDig = serde_json::from_value(value).map_err(|e| ValidationError {
                    field: "parameters",
                    message: e.to_string(),
                })?;
                validate_domain(&raw.domain)?;
                let record_type = validate_record_type(&raw.record_type)?;
                let nameserver = raw.nameserver.filter(|ns| !ns.is_empty());
                if let Some(ns) = &nameserver {
                    validate_target(ns).map_err(|e| ValidationError {
                        field: "nameserver",
                        message: e.message,
                    })?;
                }
                validate_dig_options(&raw.parameters)?;
                let options = raw
                    .parameters
                    .iter()
                    .filter(|(_, enabled)| enabled.as_bool().unwrap_or(false))
                    .map(|(key, _)| key.clone())
                    .collect();
                Ok(Self::Dig(DigParams {
                    domain: raw.domain,
                    record_type,
                    nameserver,
                    options,
                }))
            }
        }
    }
}

impl PingParams {
    /// Build the wire request for these parameters.
    #[must_use]
    pub fn to_request(&self) -> CommandRequest {
        CommandRequest::new(CommandKind::Ping)
            .set_parameter("target", self.target.clone())
            .set_parameter("count", self.count)
    }
}

impl DigParams {
    /// Build the wire request for these parameters.
    #[must_use]
    pub fn to_request(&self) -> CommandRequest {
        let options: Map<String, Value> = self
            .options
            .iter()
            .map(|o| (o.clone(), Value::Bool(true)))
            .collect();
        let mut request = CommandRequest::new(CommandKind::Dig)
            .set_parameter("domain", self.domain.clone())
            .set_parameter("recordType", self.record_type.as_str())
            .set_parameter("parameters", Value::Object(options));
        if let Some(ns) = &self.nameserver {
            request = request.set_parameter("nameserver", ns.clone());
        }
        request
    }
}
