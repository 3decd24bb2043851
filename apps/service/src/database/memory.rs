//! In-memory `Database` used by unit tests.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

use super::models::{CheckRecord, NewCheckRecord, NewTarget, Target};
use super::repository::Database;

#[derive(Default)]
struct State {
    targets: Vec<Target>,
    checks: Vec<CheckRecord>,
    next_check_id: i64,
}

#[derive(Default)]
pub struct MemoryDatabase {
    state: Mutex<State>,
    failing_writes: Mutex<HashSet<i64>>,
    failing_reads: Mutex<HashSet<i64>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_targets(targets: Vec<Target>) -> Self {
        let db = Self::default();
        db.state.lock().unwrap().targets = targets;
        db
    }

    pub fn fail_writes_for(&self, target_id: i64) {
        self.failing_writes.lock().unwrap().insert(target_id);
    }

    pub fn fail_reads_for(&self, target_id: i64) {
        self.failing_reads.lock().unwrap().insert(target_id);
    }

    pub fn checks_for(&self, target_id: i64) -> Vec<CheckRecord> {
        let state = self.state.lock().unwrap();
        state.checks.iter().filter(|c| c.target_id == target_id).cloned().collect()
    }

    pub fn all_checks(&self) -> Vec<CheckRecord> {
        self.state.lock().unwrap().checks.clone()
    }

    pub fn seed_check(&self, record: NewCheckRecord) {
        let mut state = self.state.lock().unwrap();
        state.next_check_id += 1;
        let id = state.next_check_id;
        state.checks.push(record.into_record(id));
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn list_active_targets(&self) -> Result<Vec<Target>> {
        let state = self.state.lock().unwrap();
        Ok(state.targets.iter().filter(|t| t.is_active).cloned().collect())
    }

    async fn list_targets(&self) -> Result<Vec<Target>> {
        Ok(self.state.lock().unwrap().targets.clone())
    }

    async fn get_target(&self, id: i64) -> Result<Option<Target>> {
        let state = self.state.lock().unwrap();
        Ok(state.targets.iter().find(|t| t.id == id).cloned())
    }

    async fn find_target_by_url(&self, url: &str) -> Result<Option<Target>> {
        let state = self.state.lock().unwrap();
        Ok(state.targets.iter().find(|t| t.url == url).cloned())
    }

    async fn insert_target(&self, target: &NewTarget) -> Result<Target> {
        let mut state = self.state.lock().unwrap();
        if state.targets.iter().any(|t| t.url == target.url) {
            return Err(anyhow!("UNIQUE constraint failed: targets.url"));
        }

        let stored = Target {
            id: state.targets.iter().map(|t| t.id).max().unwrap_or(0) + 1,
            url: target.url.clone(),
            name: target.name.clone(),
            is_active: target.is_active,
            check_interval_seconds: target.check_interval_seconds,
            created_at: target.created_at,
            updated_at: target.created_at,
        };
        state.targets.push(stored.clone());
        Ok(stored)
    }

    async fn replace_target(&self, target: &Target) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.targets.iter().any(|t| t.url == target.url && t.id != target.id) {
            return Err(anyhow!("UNIQUE constraint failed: targets.url"));
        }

        match state.targets.iter_mut().find(|t| t.id == target.id) {
            Some(slot) => {
                *slot = target.clone();
                Ok(())
            }
            None => Err(anyhow!("target {} does not exist", target.id)),
        }
    }

    async fn latest_check(&self, target_id: i64) -> Result<Option<CheckRecord>> {
        if self.failing_reads.lock().unwrap().contains(&target_id) {
            return Err(anyhow!("simulated read failure"));
        }

        let state = self.state.lock().unwrap();
        Ok(state
            .checks
            .iter()
            .filter(|c| c.target_id == target_id)
            .max_by_key(|c| (c.checked_at, c.id))
            .cloned())
    }

    async fn append_check(&self, record: &NewCheckRecord) -> Result<CheckRecord> {
        if self.failing_writes.lock().unwrap().contains(&record.target_id) {
            return Err(anyhow!("simulated write failure"));
        }

        let mut state = self.state.lock().unwrap();
        state.next_check_id += 1;
        let stored = record.clone().into_record(state.next_check_id);
        state.checks.push(stored.clone());
        Ok(stored)
    }

    async fn recent_checks(&self, target_id: i64, limit: usize) -> Result<Vec<CheckRecord>> {
        let mut checks = self.checks_for(target_id);
        checks.sort_by_key(|c| std::cmp::Reverse((c.checked_at, c.id)));
        checks.truncate(limit);
        Ok(checks)
    }
}
