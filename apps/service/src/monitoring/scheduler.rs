use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::due::is_due;
use super::executor::CheckPipeline;
use super::types::CheckStatus;
use crate::config::SchedulerConfig;
use crate::database::Database;
use crate::database::models::{NewCheckRecord, Target};
use crate::error::CheckError;

/// What happened to one target during a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Evaluation {
    NotDue,
    Recorded(CheckStatus),
    ReadFailed,
    WriteFailed,
}

/// Per-tick tally, logged once the tick finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub evaluated: usize,
    pub skipped: usize,
    pub up: usize,
    pub down: usize,
    pub unknown: usize,
    pub read_failures: usize,
    pub write_failures: usize,
    pub aborted: usize,
}

impl TickSummary {
    fn record(&mut self, evaluation: Evaluation) {
        self.evaluated += 1;
        match evaluation {
            Evaluation::NotDue => self.skipped += 1,
            Evaluation::Recorded(CheckStatus::Up) => self.up += 1,
            Evaluation::Recorded(CheckStatus::Down) => self.down += 1,
            Evaluation::Recorded(CheckStatus::Unknown) => self.unknown += 1,
            Evaluation::ReadFailed => self.read_failures += 1,
            Evaluation::WriteFailed => self.write_failures += 1,
        }
    }

    /// Number of check records written during the tick
    pub fn recorded(&self) -> usize {
        self.up + self.down + self.unknown
    }
}

/// Shared state handed to every per-target task
#[derive(Clone)]
struct TargetChecker {
    database: Arc<dyn Database>,
    pipeline: Arc<CheckPipeline>,
}

impl TargetChecker {
    async fn evaluate(&self, target: Target, now: DateTime<Utc>) -> Evaluation {
        let latest = match self.database.latest_check(target.id).await {
            Ok(latest) => latest,
            Err(e) => {
                let error = CheckError::Persistence(format!("{e:#}"));
                error!(target_id = target.id, url = %target.url, %error, "Failed to read latest check");
                return Evaluation::ReadFailed;
            }
        };

        if !is_due(&target, latest.as_ref(), now) {
            return Evaluation::NotDue;
        }

        let outcome = self.pipeline.check(&target.url).await;
        let record = NewCheckRecord::from_outcome(target.id, Utc::now(), &outcome);

        match self.database.append_check(&record).await {
            Ok(saved) => {
                debug!(
                    target_id = target.id,
                    url = %target.url,
                    status = %saved.status,
                    http_code = ?saved.http_code,
                    response_time_ms = ?saved.response_time_ms,
                    "Recorded check"
                );
                Evaluation::Recorded(saved.status)
            }
            Err(e) => {
                let error = CheckError::Persistence(format!("{e:#}"));
                error!(target_id = target.id, url = %target.url, %error, "Failed to record check");
                Evaluation::WriteFailed
            }
        }
    }
}

/// Check scheduler - drives periodic ticks over all active targets
///
/// Each tick snapshots the active targets and evaluates them concurrently,
/// never more than `max_concurrent_checks` at once. A tick waits for all of
/// its evaluations before the scheduler sleeps, so a target is never probed
/// twice at the same time.
pub struct CheckScheduler {
    checker: TargetChecker,
    permits: Arc<Semaphore>,
    tick_interval: Duration,
}

impl CheckScheduler {
    pub fn new(
        database: Arc<dyn Database>,
        pipeline: Arc<CheckPipeline>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            checker: TargetChecker { database, pipeline },
            permits: Arc::new(Semaphore::new(config.max_concurrent_checks.max(1))),
            tick_interval: Duration::from_secs(config.tick_interval_seconds),
        }
    }

    /// Run the loop on its own task until `shutdown` is cancelled
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Check scheduler started (tick every {}s, up to {} concurrent checks)",
            self.tick_interval.as_secs(),
            self.permits.available_permits()
        );

        while !shutdown.is_cancelled() {
            let summary = self.run_tick_at(Utc::now(), &shutdown).await;
            info!(
                evaluated = summary.evaluated,
                recorded = summary.recorded(),
                skipped = summary.skipped,
                up = summary.up,
                down = summary.down,
                unknown = summary.unknown,
                read_failures = summary.read_failures,
                write_failures = summary.write_failures,
                aborted = summary.aborted,
                "Tick completed"
            );

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.tick_interval) => {}
            }
        }

        info!("Check scheduler stopped");
    }

    /// Evaluate every active target once, as of `now`.
    ///
    /// Cancelling `shutdown` stops new evaluations from starting; the ones
    /// already running finish and write their record.
    pub async fn run_tick_at(&self, now: DateTime<Utc>, shutdown: &CancellationToken) -> TickSummary {
        let mut summary = TickSummary::default();

        let targets = match self.checker.database.list_active_targets().await {
            Ok(targets) => targets,
            Err(e) => {
                error!("Failed to list active targets, skipping tick: {:#}", e);
                return summary;
            }
        };
        debug!("Tick evaluating {} active targets", targets.len());

        let mut tasks = JoinSet::new();
        for target in targets {
            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    warn!("Shutdown requested mid-tick, not starting remaining checks");
                    break;
                }
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let checker = self.checker.clone();
            tasks.spawn(async move {
                let _permit = permit;
                checker.evaluate(target, now).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(evaluation) => summary.record(evaluation),
                Err(e) => {
                    error!("Target evaluation task failed: {}", e);
                    summary.aborted += 1;
                }
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryDatabase;
    use crate::error::BLOCKED_REASON;
    use crate::monitoring::checker::{HttpProber, Prober};
    use crate::monitoring::executor::tests::{ScriptedProber, StaticGuard};
    use crate::monitoring::guard::{AddressGuard, DnsAddressGuard};
    use crate::monitoring::types::ProbeOutcome;
    use chrono::TimeDelta;

    fn target(id: i64, url: &str, interval: u32) -> Target {
        let created = Utc::now() - TimeDelta::days(1);
        Target {
            id,
            url: url.to_string(),
            name: None,
            is_active: true,
            check_interval_seconds: interval,
            created_at: created,
            updated_at: created,
        }
    }

    fn scheduler(
        db: &Arc<MemoryDatabase>,
        guard: Arc<dyn AddressGuard>,
        prober: Arc<dyn Prober>,
        max_concurrent_checks: usize,
    ) -> CheckScheduler {
        let database: Arc<dyn Database> = db.clone();
        CheckScheduler::new(
            database,
            Arc::new(CheckPipeline::new(guard, prober)),
            &SchedulerConfig { tick_interval_seconds: 3600, max_concurrent_checks },
        )
    }

    async fn tick(scheduler: &CheckScheduler) -> TickSummary {
        scheduler.run_tick_at(Utc::now(), &CancellationToken::new()).await
    }

    #[tokio::test]
    async fn test_due_target_recorded_up() {
        let db = Arc::new(MemoryDatabase::with_targets(vec![target(1, "https://example.com", 60)]));
        let prober = Arc::new(ScriptedProber::returning(ProbeOutcome::responded(200, 45)));
        let scheduler = scheduler(&db, Arc::new(StaticGuard::default()), prober, 10);

        let summary = tick(&scheduler).await;

        assert_eq!(summary.up, 1);
        let checks = db.checks_for(1);
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].status, CheckStatus::Up);
        assert_eq!(checks[0].http_code, Some(200));
        assert_eq!(checks[0].response_time_ms, Some(45));
        assert!(checks[0].error.is_none());
    }

    #[tokio::test]
    async fn test_loopback_target_blocked_without_probe() {
        let db = Arc::new(MemoryDatabase::with_targets(vec![target(1, "http://127.0.0.1", 60)]));
        let prober = Arc::new(ScriptedProber::returning(ProbeOutcome::responded(200, 1)));
        let scheduler = scheduler(&db, Arc::new(DnsAddressGuard::new()), prober.clone(), 10);

        let summary = tick(&scheduler).await;

        assert_eq!(summary.unknown, 1);
        let checks = db.checks_for(1);
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].status, CheckStatus::Unknown);
        assert!(checks[0].http_code.is_none());
        assert!(checks[0].response_time_ms.is_none());
        assert_eq!(checks[0].error.as_deref(), Some(BLOCKED_REASON));
        assert!(prober.calls().is_empty());
    }

    #[tokio::test]
    async fn test_connection_refused_recorded_down() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let guard: Arc<dyn AddressGuard> = Arc::new(StaticGuard::default());
        let prober =
            HttpProber::with_limits(Duration::from_secs(5), 5, "pulsewatch-test", guard.clone())
                .unwrap();
        let url = format!("http://{addr}");
        let db = Arc::new(MemoryDatabase::with_targets(vec![target(1, &url, 60)]));
        let scheduler = scheduler(&db, guard, Arc::new(prober), 10);

        let summary = tick(&scheduler).await;

        assert_eq!(summary.down, 1);
        let checks = db.checks_for(1);
        assert_eq!(checks[0].status, CheckStatus::Down);
        assert!(checks[0].http_code.is_none());
        assert!(checks[0].error.as_deref().unwrap().contains("connection failed"));
    }

    #[tokio::test]
    async fn test_sequential_with_single_permit() {
        let db = Arc::new(MemoryDatabase::with_targets(vec![
            target(1, "https://one.example", 60),
            target(2, "https://two.example", 60),
        ]));
        let prober = Arc::new(
            ScriptedProber::returning(ProbeOutcome::responded(200, 5))
                .with_delay(Duration::from_millis(50)),
        );
        let scheduler = scheduler(&db, Arc::new(StaticGuard::default()), prober.clone(), 1);

        let summary = tick(&scheduler).await;

        assert_eq!(summary.recorded(), 2);
        assert_eq!(db.checks_for(1).len(), 1);
        assert_eq!(db.checks_for(2).len(), 1);
        assert_eq!(prober.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_concurrency_bound_respected() {
        let targets =
            (1..=8).map(|id| target(id, &format!("https://site{id}.example"), 60)).collect();
        let db = Arc::new(MemoryDatabase::with_targets(targets));
        let prober = Arc::new(
            ScriptedProber::returning(ProbeOutcome::responded(200, 5))
                .with_delay(Duration::from_millis(40)),
        );
        let scheduler = scheduler(&db, Arc::new(StaticGuard::default()), prober.clone(), 3);

        let summary = tick(&scheduler).await;

        assert_eq!(summary.recorded(), 8);
        assert_eq!(db.all_checks().len(), 8);
        assert!(prober.max_in_flight() <= 3);
        assert!(prober.max_in_flight() > 1);
    }

    #[tokio::test]
    async fn test_recent_check_not_due() {
        let db = Arc::new(MemoryDatabase::with_targets(vec![target(1, "https://example.com", 60)]));
        let now = Utc::now();
        db.seed_check(NewCheckRecord::from_outcome(
            1,
            now - TimeDelta::seconds(30),
            &ProbeOutcome::responded(200, 10),
        ));
        let prober = Arc::new(ScriptedProber::returning(ProbeOutcome::responded(200, 5)));
        let scheduler = scheduler(&db, Arc::new(StaticGuard::default()), prober.clone(), 10);

        let summary = scheduler.run_tick_at(now, &CancellationToken::new()).await;
        assert_eq!(summary.skipped, 1);
        assert!(prober.calls().is_empty());

        let later = now + TimeDelta::seconds(30);
        let summary = scheduler.run_tick_at(later, &CancellationToken::new()).await;
        assert_eq!(summary.up, 1);
        assert_eq!(db.checks_for(1).len(), 2);
    }

    #[tokio::test]
    async fn test_inactive_targets_ignored() {
        let mut paused = target(2, "https://paused.example", 60);
        paused.is_active = false;
        let db = Arc::new(MemoryDatabase::with_targets(vec![
            target(1, "https://example.com", 60),
            paused,
        ]));
        let prober = Arc::new(ScriptedProber::returning(ProbeOutcome::responded(200, 5)));
        let scheduler = scheduler(&db, Arc::new(StaticGuard::default()), prober.clone(), 10);

        let summary = tick(&scheduler).await;

        assert_eq!(summary.evaluated, 1);
        assert!(db.checks_for(2).is_empty());
        assert_eq!(prober.calls(), vec!["https://example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_panicking_probe_isolated() {
        let db = Arc::new(MemoryDatabase::with_targets(vec![
            target(1, "https://boom.example", 60),
            target(2, "https://fine.example", 60),
        ]));
        let prober = Arc::new(
            ScriptedProber::returning(ProbeOutcome::responded(200, 5))
                .panicking_on("https://boom.example"),
        );
        let scheduler = scheduler(&db, Arc::new(StaticGuard::default()), prober, 10);

        let summary = tick(&scheduler).await;

        assert_eq!(summary.down, 1);
        assert_eq!(summary.up, 1);
        let failed = db.checks_for(1);
        assert_eq!(failed[0].status, CheckStatus::Down);
        assert!(failed[0].error.as_deref().unwrap().contains("probe exploded"));
    }

    #[tokio::test]
    async fn test_storage_failures_isolated() {
        let db = Arc::new(MemoryDatabase::with_targets(vec![
            target(1, "https://one.example", 60),
            target(2, "https://two.example", 60),
            target(3, "https://three.example", 60),
        ]));
        db.fail_writes_for(1);
        db.fail_reads_for(2);
        let prober = Arc::new(ScriptedProber::returning(ProbeOutcome::responded(200, 5)));
        let scheduler = scheduler(&db, Arc::new(StaticGuard::default()), prober, 2);

        let summary = tick(&scheduler).await;

        assert_eq!(summary.write_failures, 1);
        assert_eq!(summary.read_failures, 1);
        assert_eq!(summary.up, 1);
        assert!(db.checks_for(1).is_empty());
        assert!(db.checks_for(2).is_empty());
        assert_eq!(db.checks_for(3).len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_tick_starts_nothing() {
        let db = Arc::new(MemoryDatabase::with_targets(vec![target(1, "https://example.com", 60)]));
        let prober = Arc::new(ScriptedProber::returning(ProbeOutcome::responded(200, 5)));
        let scheduler = scheduler(&db, Arc::new(StaticGuard::default()), prober.clone(), 10);

        let token = CancellationToken::new();
        token.cancel();
        let summary = scheduler.run_tick_at(Utc::now(), &token).await;

        assert_eq!(summary.evaluated, 0);
        assert!(prober.calls().is_empty());
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_cancel() {
        let db = Arc::new(MemoryDatabase::with_targets(vec![target(1, "https://example.com", 60)]));
        let prober = Arc::new(ScriptedProber::returning(ProbeOutcome::responded(200, 5)));
        let scheduler = scheduler(&db, Arc::new(StaticGuard::default()), prober, 10);

        let token = CancellationToken::new();
        let handle = scheduler.spawn(token.clone());

        tokio::time::timeout(Duration::from_secs(5), async {
            while db.checks_for(1).is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("first tick should record a check");

        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler should stop promptly")
            .unwrap();

        assert_eq!(db.checks_for(1).len(), 1);
    }
}
