use url::Url;

use crate::error::TargetError;

/// Longest interval a target may be configured with (24 hours)
pub const MAX_INTERVAL_SECONDS: u32 = 86_400;

const MAX_NAME_LENGTH: usize = 100;

/// Normalize a user-supplied URL into its stored form.
///
/// A missing scheme defaults to `https`. Only `http` and `https` are
/// accepted, a host is required, and the host is lowercased. Credentials and
/// fragments are dropped. A single trailing slash is removed when there is no
/// query string.
pub fn normalize_url(raw: &str) -> Result<String, TargetError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TargetError::InvalidUrl("URL cannot be empty".into()));
    }

    let candidate =
        if trimmed.contains("://") { trimmed.to_string() } else { format!("https://{trimmed}") };

    let mut url = Url::parse(&candidate).map_err(|e| TargetError::InvalidUrl(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(TargetError::UnsupportedScheme(other.to_string())),
    }

    let host = match url.host_str() {
        Some(host) if !host.is_empty() => host.to_ascii_lowercase(),
        _ => return Err(TargetError::InvalidUrl("URL must have a valid host".into())),
    };
    url.set_host(Some(&host)).map_err(|e| TargetError::InvalidUrl(e.to_string()))?;

    // Neither can fail for http(s) URLs that have a host.
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url.set_fragment(None);

    let normalized = url.as_str();
    if url.query().is_none() {
        if let Some(trimmed) = normalized.strip_suffix('/') {
            return Ok(trimmed.to_string());
        }
    }
    Ok(normalized.to_string())
}

/// Validate a target's check interval
pub fn validate_interval(interval_seconds: u32) -> Result<(), TargetError> {
    if interval_seconds == 0 || interval_seconds > MAX_INTERVAL_SECONDS {
        return Err(TargetError::InvalidInterval(interval_seconds));
    }
    Ok(())
}

/// Validate and tidy an optional display name
pub fn normalize_name(name: Option<&str>) -> Result<Option<String>, TargetError> {
    let Some(name) = name else {
        return Ok(None);
    };

    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(TargetError::InvalidName("name cannot be empty"));
    }
    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(TargetError::InvalidName("name too long (max 100 characters)"));
    }

    Ok(Some(trimmed.to_string()))
}
