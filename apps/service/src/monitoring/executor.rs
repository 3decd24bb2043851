use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, warn};
use url::Url;

use super::checker::Prober;
use super::guard::AddressGuard;
use super::types::ProbeOutcome;
use crate::error::CheckError;

/// Runs a single check: host extraction, address guard, then the probe.
///
/// Whatever happens along the way ends up in the returned outcome.
pub struct CheckPipeline {
    guard: Arc<dyn AddressGuard>,
    prober: Arc<dyn Prober>,
}

impl CheckPipeline {
    pub fn new(guard: Arc<dyn AddressGuard>, prober: Arc<dyn Prober>) -> Self {
        Self { guard, prober }
    }

    pub async fn check(&self, url: &str) -> ProbeOutcome {
        let host = match Url::parse(url) {
            Ok(parsed) => match parsed.host_str() {
                Some(host) => host.to_string(),
                None => {
                    return ProbeOutcome::failed(&CheckError::ProbeMalformedTarget(format!(
                        "{url} has no host"
                    )));
                }
            },
            Err(e) => {
                return ProbeOutcome::failed(&CheckError::ProbeMalformedTarget(format!(
                    "{url}: {e}"
                )));
            }
        };

        if self.guard.is_unsafe(&host).await {
            warn!("Refusing to probe {}: host resolves to a restricted address", url);
            return ProbeOutcome::blocked();
        }

        match AssertUnwindSafe(self.prober.execute(url)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Probe for {} panicked: {}", url, message);
                ProbeOutcome::failed(&CheckError::ProbePanicked(message))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
