use anyhow::{Context, Result};
use libsql::Connection;

/// One schema step. Versions must be listed in ascending order.
struct Migration {
    version: i32,
    description: &'static str,
    statements: &'static [&'static str],
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Targets and check history",
        statements: &[
            "CREATE TABLE IF NOT EXISTS targets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL UNIQUE,
                name TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                check_interval_seconds INTEGER NOT NULL DEFAULT 60 CHECK (check_interval_seconds > 0),
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS check_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                target_id INTEGER NOT NULL REFERENCES targets(id),
                checked_at INTEGER NOT NULL,
                status TEXT NOT NULL,
                http_code INTEGER,
                response_time_ms INTEGER,
                error TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_targets_active ON targets(is_active)",
        ],
    },
    Migration {
        version: 2,
        description: "Index check history by target and time",
        statements: &["CREATE INDEX IF NOT EXISTS idx_check_records_target_time
            ON check_records(target_id, checked_at DESC)"],
    },
];

/// Bring the schema up to the newest version.
///
/// Applied versions are tracked in `schema_migrations`, so each step runs once.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let applied = applied_version(conn).await?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > applied).collect();

    if pending.is_empty() {
        tracing::info!("Database schema is up to date (version {})", applied);
        return Ok(());
    }

    for migration in pending {
        for statement in migration.statements {
            conn.execute(statement, ())
                .await
                .with_context(|| format!("migration v{} failed", migration.version))?;
        }
        mark_applied(conn, migration).await?;
    }

    Ok(())
}

async fn applied_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    match rows.next().await? {
        Some(row) => Ok(row.get::<Option<i32>>(0)?.unwrap_or(0)),
        None => Ok(0),
    }
}

async fn mark_applied(conn: &Connection, migration: &Migration) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![migration.version, chrono::Utc::now().timestamp(), migration.description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", migration.version, migration.description);
    Ok(())
}
