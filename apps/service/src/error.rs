use thiserror::Error;

/// Error string recorded when the address guard refuses a target.
pub const BLOCKED_REASON: &str = "SSRF blocked";

/// Everything that can go wrong while checking a single target.
///
/// Only `Persistence` escapes a target's evaluation; every other variant is
/// turned into check record data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CheckError {
    #[error("{}", BLOCKED_REASON)]
    AddressUnsafe,

    #[error("{0}")]
    ProbeNetworkFailure(String),

    #[error("invalid target URL: {0}")]
    ProbeMalformedTarget(String),

    #[error("probe aborted: {0}")]
    ProbePanicked(String),

    #[error("storage failure: {0}")]
    Persistence(String),
}

/// Errors surfaced by target management operations.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid scheme '{0}'. Must be http or https")]
    UnsupportedScheme(String),

    #[error("Invalid check interval {0}s (must be between 1 and 86400)")]
    InvalidInterval(u32),

    #[error("Invalid name: {0}")]
    InvalidName(&'static str),

    #[error("Target already exists: {0}")]
    DuplicateUrl(String),

    #[error("Target not found: {0}")]
    NotFound(i64),

    #[error("{0:#}")]
    Storage(#[from] anyhow::Error),
}
