use std::error::Error as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::LOCATION;
use tokio::time::timeout;
use url::Url;

use super::guard::{AddressGuard, GuardedResolver, RestrictedAddress};
use super::types::ProbeOutcome;
use crate::config::ProbeConfig;
use crate::error::CheckError;

/// Performs one availability probe against a URL.
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    /// Probe `url` once. Never retries; failures come back as outcome data.
    async fn execute(&self, url: &str) -> ProbeOutcome;
}

/// HTTP/HTTPS prober issuing a single bounded GET.
///
/// Automatic redirects are disabled on the client. `Location` hops are
/// followed by hand so each one can be run past the address guard first.
/// Names are resolved through [`GuardedResolver`], which refuses restricted
/// addresses at connect time as well.
pub struct HttpProber {
    client: reqwest::Client,
    guard: Arc<dyn AddressGuard>,
    timeout: Duration,
    max_redirects: usize,
}

impl HttpProber {
    pub fn new(config: &ProbeConfig, guard: Arc<dyn AddressGuard>) -> anyhow::Result<Self> {
        Self::with_limits(
            Duration::from_secs(config.timeout_seconds),
            config.max_redirects,
            &config.user_agent,
            guard,
        )
    }

    pub fn with_limits(
        timeout: Duration,
        max_redirects: usize,
        user_agent: &str,
        guard: Arc<dyn AddressGuard>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .dns_resolver(Arc::new(GuardedResolver))
            .user_agent(user_agent)
            .build()?;

        Ok(Self { client, guard, timeout, max_redirects })
    }

    /// Returns the final status code and the latency until its headers.
    async fn fetch(&self, url: &str) -> Result<(u16, u64), CheckError> {
        let mut current =
            Url::parse(url).map_err(|e| CheckError::ProbeMalformedTarget(format!("{url}: {e}")))?;
        let start = Instant::now();
        let mut hops = 0;

        loop {
            let response =
                self.client.get(current.clone()).send().await.map_err(describe_request_error)?;
            let status = response.status();

            let location = response.headers().get(LOCATION).and_then(|v| v.to_str().ok());
            let location = match location {
                Some(location) if status.is_redirection() && self.max_redirects > 0 => location,
                _ => return Ok((status.as_u16(), elapsed_ms(start))),
            };

            if hops == self.max_redirects {
                return Err(CheckError::ProbeNetworkFailure(format!(
                    "too many redirects (limit {})",
                    self.max_redirects
                )));
            }

            let next = current.join(location).map_err(|e| {
                CheckError::ProbeMalformedTarget(format!("redirect location {location:?}: {e}"))
            })?;

            if !matches!(next.scheme(), "http" | "https") {
                return Err(CheckError::ProbeNetworkFailure(format!(
                    "redirect to unsupported scheme '{}'",
                    next.scheme()
                )));
            }

            let host = next.host_str().unwrap_or_default();
            if self.guard.is_unsafe(host).await {
                tracing::warn!(from = %current, to = %next, "Redirect points at a restricted address");
                return Err(CheckError::AddressUnsafe);
            }

            tracing::debug!(from = %current, to = %next, status = status.as_u16(), "Following redirect");
            hops += 1;
            current = next;
        }
    }
}

#[async_trait::async_trait]
impl Prober for HttpProber {
    async fn execute(&self, url: &str) -> ProbeOutcome {
        let result = match timeout(self.timeout, self.fetch(url)).await {
            Ok(result) => result,
            Err(_) => Err(CheckError::ProbeNetworkFailure(format!(
                "request timed out after {}ms",
                self.timeout.as_millis()
            ))),
        };

        result.into()
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Flattens a reqwest error and its causes into one readable line. A refusal
/// from the resolver maps back to [`CheckError::AddressUnsafe`].
fn describe_request_error(error: reqwest::Error) -> CheckError {
    let mut detail = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        if cause.downcast_ref::<RestrictedAddress>().is_some() {
            return CheckError::AddressUnsafe;
        }
        detail.push_str(": ");
        detail.push_str(&cause.to_string());
        source = cause.source();
    }

    let message = if error.is_timeout() {
        format!("request timed out: {detail}")
    } else if error.is_connect() {
        format!("connection failed: {detail}")
    } else {
        format!("request failed: {detail}")
    };

    CheckError::ProbeNetworkFailure(message)
}
