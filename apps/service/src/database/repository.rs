use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use libsql::params::IntoParams;
use libsql::{Row, params};

use super::models::{
    CheckRecord, NewCheckRecord, NewTarget, Target, i64_to_timestamp, timestamp_to_i64,
};
use crate::pool::{LibsqlManager, LibsqlPool};

const TARGET_COLUMNS: &str =
    "id, url, name, is_active, check_interval_seconds, created_at, updated_at";
const CHECK_COLUMNS: &str =
    "id, target_id, checked_at, status, http_code, response_time_ms, error";

/// Storage operations used by the scheduler and the target service
#[async_trait]
pub trait Database: Send + Sync {
    /// Targets with the active flag set, in id order
    async fn list_active_targets(&self) -> Result<Vec<Target>>;

    /// All targets, in id order
    async fn list_targets(&self) -> Result<Vec<Target>>;

    async fn get_target(&self, id: i64) -> Result<Option<Target>>;

    async fn find_target_by_url(&self, url: &str) -> Result<Option<Target>>;

    async fn insert_target(&self, target: &NewTarget) -> Result<Target>;

    /// Overwrite every mutable column of a stored target with `target`
    async fn replace_target(&self, target: &Target) -> Result<()>;

    /// Most recent check for a target, if any
    async fn latest_check(&self, target_id: i64) -> Result<Option<CheckRecord>>;

    /// Append one check record; the returned record carries its new id
    async fn append_check(&self, record: &NewCheckRecord) -> Result<CheckRecord>;

    /// Newest-first history for a target
    async fn recent_checks(&self, target_id: i64, limit: usize) -> Result<Vec<CheckRecord>>;
}

/// LibSQL database implementation
pub struct DatabaseImpl {
    pool: LibsqlPool,
}

impl DatabaseImpl {
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        self.pool.get().await.map_err(|e| anyhow!("failed to acquire database connection: {e}"))
    }

    async fn query_targets(&self, sql: &str, args: impl IntoParams + Send) -> Result<Vec<Target>> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query(sql, args).await?;
        let mut targets = Vec::new();

        while let Some(row) = rows.next().await? {
            targets.push(target_from_row(&row)?);
        }

        Ok(targets)
    }

    async fn query_checks(&self, sql: &str, args: impl IntoParams + Send) -> Result<Vec<CheckRecord>> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query(sql, args).await?;
        let mut records = Vec::new();

        while let Some(row) = rows.next().await? {
            records.push(check_from_row(&row)?);
        }

        Ok(records)
    }
}

fn target_from_row(row: &Row) -> Result<Target> {
    let interval: i64 = row.get(4)?;

    Ok(Target {
        id: row.get(0)?,
        url: row.get(1)?,
        name: row.get(2)?,
        is_active: row.get::<i64>(3)? != 0,
        check_interval_seconds: u32::try_from(interval)
            .with_context(|| format!("check interval {interval} out of range"))?,
        created_at: i64_to_timestamp(row.get(5)?),
        updated_at: i64_to_timestamp(row.get(6)?),
    })
}

fn check_from_row(row: &Row) -> Result<CheckRecord> {
    let status: String = row.get(3)?;
    let http_code = row
        .get::<Option<i64>>(4)?
        .map(|code| u16::try_from(code).with_context(|| format!("http code {code} out of range")))
        .transpose()?;
    let response_time_ms = row
        .get::<Option<i64>>(5)?
        .map(|ms| u64::try_from(ms).with_context(|| format!("response time {ms} out of range")))
        .transpose()?;

    Ok(CheckRecord {
        id: row.get(0)?,
        target_id: row.get(1)?,
        checked_at: i64_to_timestamp(row.get(2)?),
        status: status.parse().map_err(|e: String| anyhow!(e))?,
        http_code,
        response_time_ms,
        error: row.get(6)?,
    })
}

#[async_trait]
impl Database for DatabaseImpl {
    async fn list_active_targets(&self) -> Result<Vec<Target>> {
        self.query_targets(
            &format!("SELECT {TARGET_COLUMNS} FROM targets WHERE is_active = 1 ORDER BY id"),
            (),
        )
        .await
    }

    async fn list_targets(&self) -> Result<Vec<Target>> {
        self.query_targets(&format!("SELECT {TARGET_COLUMNS} FROM targets ORDER BY id"), ())
            .await
    }

    async fn get_target(&self, id: i64) -> Result<Option<Target>> {
        let mut targets = self
            .query_targets(&format!("SELECT {TARGET_COLUMNS} FROM targets WHERE id = ?"), params![id])
            .await?;
        Ok(targets.pop())
    }

    async fn find_target_by_url(&self, url: &str) -> Result<Option<Target>> {
        let mut targets = self
            .query_targets(
                &format!("SELECT {TARGET_COLUMNS} FROM targets WHERE url = ?"),
                params![url.to_string()],
            )
            .await?;
        Ok(targets.pop())
    }

    async fn insert_target(&self, target: &NewTarget) -> Result<Target> {
        let conn = self.get_conn().await?;
        let created_at = timestamp_to_i64(target.created_at);

        conn.execute(
            "INSERT INTO targets (url, name, is_active, check_interval_seconds, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                target.url.clone(),
                target.name.clone(),
                if target.is_active { 1 } else { 0 },
                i64::from(target.check_interval_seconds),
                created_at,
                created_at
            ],
        )
        .await?;

        Ok(Target {
            id: conn.last_insert_rowid(),
            url: target.url.clone(),
            name: target.name.clone(),
            is_active: target.is_active,
            check_interval_seconds: target.check_interval_seconds,
            created_at: target.created_at,
            updated_at: target.created_at,
        })
    }

    async fn replace_target(&self, target: &Target) -> Result<()> {
        let conn = self.get_conn().await?;

        let changed = conn
            .execute(
                "UPDATE targets SET url = ?, name = ?, is_active = ?, check_interval_seconds = ?, updated_at = ? WHERE id = ?",
                params![
                    target.url.clone(),
                    target.name.clone(),
                    if target.is_active { 1 } else { 0 },
                    i64::from(target.check_interval_seconds),
                    timestamp_to_i64(target.updated_at),
                    target.id
                ],
            )
            .await?;

        if changed == 0 {
            return Err(anyhow!("target {} does not exist", target.id));
        }
        Ok(())
    }

    async fn latest_check(&self, target_id: i64) -> Result<Option<CheckRecord>> {
        let mut records = self
            .query_checks(
                &format!(
                    "SELECT {CHECK_COLUMNS} FROM check_records WHERE target_id = ? ORDER BY checked_at DESC, id DESC LIMIT 1"
                ),
                params![target_id],
            )
            .await?;
        Ok(records.pop())
    }

    async fn append_check(&self, record: &NewCheckRecord) -> Result<CheckRecord> {
        let response_time_ms = record.response_time_ms.map(i64::try_from).transpose()?;
        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO check_records (target_id, checked_at, status, http_code, response_time_ms, error) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                record.target_id,
                timestamp_to_i64(record.checked_at),
                record.status.to_string(),
                record.http_code.map(i64::from),
                response_time_ms,
                record.error.clone()
            ],
        )
        .await?;

        Ok(record.clone().into_record(conn.last_insert_rowid()))
    }

    async fn recent_checks(&self, target_id: i64, limit: usize) -> Result<Vec<CheckRecord>> {
        self.query_checks(
            &format!(
                "SELECT {CHECK_COLUMNS} FROM check_records WHERE target_id = ? ORDER BY checked_at DESC, id DESC LIMIT ?"
            ),
            params![target_id, limit as i64],
        )
        .await
    }
}
