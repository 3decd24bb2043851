//! Target management.
//!
//! The operations an API layer needs: registration, updates, listing,
//! history and on-demand checks. Checks reuse the same pipeline as the
//! scheduler, so the address guard applies here as well.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::database::Database;
use crate::database::models::{
    CheckRecord, DEFAULT_CHECK_INTERVAL_SECONDS, NewCheckRecord, NewTarget, Target, TargetUpdate,
};
use crate::error::TargetError;
use crate::monitoring::CheckPipeline;
use crate::validation::{normalize_name, normalize_url, validate_interval};

pub struct TargetService {
    database: Arc<dyn Database>,
    pipeline: Arc<CheckPipeline>,
}

impl TargetService {
    pub fn new(database: Arc<dyn Database>, pipeline: Arc<CheckPipeline>) -> Self {
        Self { database, pipeline }
    }

    /// Register a new target. The URL is normalized before the uniqueness check.
    pub async fn register(
        &self,
        url: &str,
        name: Option<&str>,
        check_interval_seconds: Option<u32>,
    ) -> Result<Target, TargetError> {
        let url = normalize_url(url)?;
        let name = normalize_name(name)?;
        let interval = check_interval_seconds.unwrap_or(DEFAULT_CHECK_INTERVAL_SECONDS);
        validate_interval(interval)?;

        if self.database.find_target_by_url(&url).await?.is_some() {
            return Err(TargetError::DuplicateUrl(url));
        }

        let target = self.database.insert_target(&NewTarget::new(url, name, interval)).await?;
        info!(target_id = target.id, url = %target.url, "Registered target");
        Ok(target)
    }

    /// Apply `update` and store the resulting target as a whole new value.
    pub async fn update(&self, id: i64, update: TargetUpdate) -> Result<Target, TargetError> {
        let current = self.get(id).await?;

        let url = update.url.as_deref().map(normalize_url).transpose()?;
        let name = normalize_name(update.name.as_deref())?;
        if let Some(interval) = update.check_interval_seconds {
            validate_interval(interval)?;
        }

        if let Some(url) = &url {
            if let Some(owner) = self.database.find_target_by_url(url).await? {
                if owner.id != id {
                    return Err(TargetError::DuplicateUrl(url.clone()));
                }
            }
        }

        let normalized = TargetUpdate { url, name, ..update };
        let replacement = current.with_update(&normalized, Utc::now());
        self.database.replace_target(&replacement).await?;

        info!(target_id = id, url = %replacement.url, active = replacement.is_active, "Updated target");
        Ok(replacement)
    }

    pub async fn list(&self) -> Result<Vec<Target>, TargetError> {
        Ok(self.database.list_targets().await?)
    }

    pub async fn get(&self, id: i64) -> Result<Target, TargetError> {
        self.database.get_target(id).await?.ok_or(TargetError::NotFound(id))
    }

    /// Newest-first check history
    pub async fn history(&self, id: i64, limit: usize) -> Result<Vec<CheckRecord>, TargetError> {
        let target = self.get(id).await?;
        Ok(self.database.recent_checks(target.id, limit).await?)
    }

    /// Probe a target right away and record the result, regardless of whether
    /// it is due or active.
    pub async fn check_now(&self, id: i64) -> Result<CheckRecord, TargetError> {
        let target = self.get(id).await?;
        let outcome = self.pipeline.check(&target.url).await;
        let record = NewCheckRecord::from_outcome(target.id, Utc::now(), &outcome);

        let saved = self.database.append_check(&record).await?;
        info!(target_id = id, status = %saved.status, "On-demand check recorded");
        Ok(saved)
    }
}
