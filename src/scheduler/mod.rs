use crate::config::Config;
use crate::engine::{IngestionSummary, ParkingEngine};
use crate::error::{Error, Result};
use crate::monitor::SweepSummary;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Longest accepted job period
const MAX_PERIOD: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// Single-occupancy flag for one job
#[derive(Debug, Default)]
pub struct RunGuard {
    running: AtomicBool,
}

/// Held while a job runs; releases the guard on drop
pub struct RunPermit<'a> {
    guard: &'a RunGuard,
}

impl RunGuard {
    pub fn try_acquire(&self) -> Option<RunPermit<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunPermit { guard: self })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for RunPermit<'_> {
    fn drop(&mut self) {
        self.guard.running.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobStatus {
    pub running: bool,
    pub scheduler_active: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SchedulerStatus {
    pub ingestion: JobStatus,
    pub long_stay: JobStatus,
}

#[derive(Debug, Clone, Copy)]
enum JobKind {
    Ingestion,
    LongStay,
}

impl JobKind {
    fn name(&self) -> &'static str {
        match self {
            JobKind::Ingestion => "ingestion",
            JobKind::LongStay => "long-stay sweep",
        }
    }
}

struct Job {
    enabled: bool,
    period: Duration,
    run_on_startup: bool,
    guard: RunGuard,
    active: AtomicBool,
    last_run: RwLock<Option<DateTime<Utc>>>,
    next_run: RwLock<Option<DateTime<Utc>>>,
}

impl Job {
    fn new(enabled: bool, period: Duration, run_on_startup: bool) -> Self {
        Self {
            enabled,
            period,
            run_on_startup,
            guard: RunGuard::default(),
            active: AtomicBool::new(false),
            last_run: RwLock::new(None),
            next_run: RwLock::new(None),
        }
    }

    async fn status(&self) -> JobStatus {
        JobStatus {
            running: self.guard.is_running(),
            scheduler_active: self.active.load(Ordering::Acquire),
            last_run: *self.last_run.read().await,
            next_run: *self.next_run.read().await,
            interval_secs: self.period.as_secs(),
        }
    }

    async fn schedule_next(&self, after: Duration) {
        let next = chrono::Duration::from_std(after)
            .ok()
            .map(|d| Utc::now() + d);
        *self.next_run.write().await = next;
    }
}

/// Timer-driven ingestion and long-stay jobs. A tick that arrives while the
/// previous run of the same job is still active is dropped.
pub struct Scheduler {
    engine: Arc<ParkingEngine>,
    area_ids: Vec<Uuid>,
    ingestion: Job,
    long_stay: Job,
    /// Replaced on every start, so a stopped scheduler can be started again
    cancel: Mutex<CancellationToken>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(engine: Arc<ParkingEngine>, config: &Config) -> Self {
        Self {
            engine,
            area_ids: config.ingest.area_ids.clone(),
            ingestion: Job::new(
                config.ingest.enabled,
                period(config.ingest.interval_minutes.max(1).saturating_mul(60)),
                config.ingest.run_on_startup,
            ),
            long_stay: Job::new(
                config.monitor.enabled,
                period(config.monitor.interval_secs.max(1)),
                true,
            ),
            cancel: Mutex::new(CancellationToken::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the enabled job loops
    pub async fn start(self: Arc<Self>) -> anyhow::Result<()> {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            warn!("Scheduler already started");
            return Ok(());
        }

        let cancel = {
            let mut current = self.cancel.lock().await;
            if current.is_cancelled() {
                *current = CancellationToken::new();
            }
            current.clone()
        };

        for kind in [JobKind::Ingestion, JobKind::LongStay] {
            let job = self.job(kind);
            if !job.enabled {
                info!("Scheduled {} is disabled", kind.name());
                continue;
            }

            info!(
                "Starting scheduled {} every {} seconds",
                kind.name(),
                job.period.as_secs()
            );
            job.active.store(true, Ordering::Release);
            tasks.push(tokio::spawn(self.clone().run_loop(kind, cancel.clone())));
        }

        Ok(())
    }

    /// Stop the job loops. A run already in progress is not interrupted.
    pub async fn stop(&self) {
        info!("Stopping scheduler");
        self.cancel.lock().await.cancel();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!("Scheduler task ended abnormally: {}", e);
            }
        }

        for job in [&self.ingestion, &self.long_stay] {
            job.active.store(false, Ordering::Release);
            *job.next_run.write().await = None;
        }
    }

    /// Run an ingestion pass over the configured areas now, through the same
    /// guard as scheduled ticks. Fails only with `Error::AlreadyRunning`.
    pub async fn trigger_ingestion(&self) -> Result<IngestionSummary> {
        let Some(_permit) = self.ingestion.guard.try_acquire() else {
            return Err(Error::AlreadyRunning("Ingestion job".to_string()));
        };
        *self.ingestion.last_run.write().await = Some(Utc::now());
        Ok(self.engine.run_ingestion_all(&self.area_ids).await)
    }

    /// Run a long-stay sweep now, through the same guard as scheduled ticks.
    /// Fails only with `Error::AlreadyRunning`.
    pub async fn trigger_sweep(&self) -> Result<SweepSummary> {
        let Some(_permit) = self.long_stay.guard.try_acquire() else {
            return Err(Error::AlreadyRunning("Long-stay sweep".to_string()));
        };
        *self.long_stay.last_run.write().await = Some(Utc::now());
        Ok(self.engine.run_long_stay_sweep().await)
    }

    pub async fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            ingestion: self.ingestion.status().await,
            long_stay: self.long_stay.status().await,
        }
    }

    fn job(&self, kind: JobKind) -> &Job {
        match kind {
            JobKind::Ingestion => &self.ingestion,
            JobKind::LongStay => &self.long_stay,
        }
    }

    async fn run_loop(self: Arc<Self>, kind: JobKind, cancel: CancellationToken) {
        let job = self.job(kind);
        let first = if job.run_on_startup {
            Duration::ZERO
        } else {
            job.period
        };
        job.schedule_next(first).await;

        let mut ticker = interval_at(Instant::now() + first, job.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    job.schedule_next(job.period).await;
                    // Runs are detached so a slow run cannot delay the next tick
                    tokio::spawn(self.clone().run_job(kind));
                }
            }
        }

        info!("Scheduled {} stopped", kind.name());
    }

    async fn run_job(self: Arc<Self>, kind: JobKind) {
        let result = match kind {
            JobKind::Ingestion => self.trigger_ingestion().await.map(|s| (s.success, s.error)),
            JobKind::LongStay => self.trigger_sweep().await.map(|s| (s.success, s.error)),
        };

        match result {
            Ok((true, _)) => {}
            Ok((false, Some(e))) => error!("Scheduled {} failed: {}", kind.name(), e),
            // per-area failures are already logged by the engine
            Ok((false, None)) => {}
            Err(Error::AlreadyRunning(_)) => {
                warn!("Previous {} still running, skipping this tick", kind.name());
            }
            Err(e) => error!("Scheduled {} failed: {}", kind.name(), e),
        }
    }
}

fn period(secs: u64) -> Duration {
    Duration::from_secs(secs).min(MAX_PERIOD)
}
