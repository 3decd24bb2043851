use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::CheckError;

/// Status of a recorded check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Up,
    Down,
    Unknown,
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckStatus::Up => write!(f, "UP"),
            CheckStatus::Down => write!(f, "DOWN"),
            CheckStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl FromStr for CheckStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UP" => Ok(CheckStatus::Up),
            "DOWN" => Ok(CheckStatus::Down),
            "UNKNOWN" => Ok(CheckStatus::Unknown),
            other => Err(format!("unknown check status '{other}'")),
        }
    }
}

/// Classified result of one probe attempt, before it is stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub status: CheckStatus,

    /// HTTP status code of the final response, if one was received
    pub http_code: Option<u16>,

    /// Time until the final response headers arrived
    pub latency_ms: Option<u64>,

    /// Failure description; absent whenever a response was received
    pub error: Option<String>,
}

impl ProbeOutcome {
    /// A response was received. Codes in [200, 400) count as up.
    pub fn responded(http_code: u16, latency_ms: u64) -> Self {
        let status =
            if (200..400).contains(&http_code) { CheckStatus::Up } else { CheckStatus::Down };

        Self { status, http_code: Some(http_code), latency_ms: Some(latency_ms), error: None }
    }

    /// No response was obtained.
    pub fn failed(error: &CheckError) -> Self {
        let status = match error {
            CheckError::AddressUnsafe => CheckStatus::Unknown,
            _ => CheckStatus::Down,
        };

        Self { status, http_code: None, latency_ms: None, error: Some(error.to_string()) }
    }

    pub fn blocked() -> Self {
        Self::failed(&CheckError::AddressUnsafe)
    }
}

impl From<Result<(u16, u64), CheckError>> for ProbeOutcome {
    fn from(result: Result<(u16, u64), CheckError>) -> Self {
        match result {
            Ok((http_code, latency_ms)) => Self::responded(http_code, latency_ms),
            Err(error) => Self::failed(&error),
        }
    }
}
