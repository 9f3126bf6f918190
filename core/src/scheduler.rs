//! Recurring jobs with schedule state persisted in SQLite.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::db::{Database, JobRecord};
use crate::worker::{StepTally, WorkOutcome, Worker, WorkerContext};

pub const BACKOFF_BASE_SECS: i64 = 30;
pub const BACKOFF_MAX_SECS: i64 = 5 * 60 * 60;

/// Delay before the next try after `attempts` consecutive retries.
#[must_use]
pub fn backoff_delay(attempts: i64) -> Duration {
    let exp = u32::try_from(attempts.saturating_sub(1).max(0))
        .unwrap_or(u32::MAX)
        .min(30);
    let secs = BACKOFF_BASE_SECS
        .saturating_mul(2_i64.saturating_pow(exp))
        .min(BACKOFF_MAX_SECS);
    Duration::seconds(secs)
}

/// A job the app expects to always be enrolled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSpec {
    pub name: &'static str,
    pub interval_secs: i64,
}

pub const DEFAULT_JOBS: &[JobSpec] = &[
    JobSpec {
        name: "ambient_noise",
        interval_secs: 30 * 60,
    },
    JobSpec {
        name: "location",
        interval_secs: 6 * 60 * 60,
    },
    JobSpec {
        name: "nutrition_sync",
        interval_secs: 15 * 60,
    },
    JobSpec {
        name: "screen_time",
        interval_secs: 15 * 60,
    },
    JobSpec {
        name: "watchdog",
        interval_secs: 60 * 60,
    },
];

pub struct Scheduler<'a> {
    db: &'a Database,
}

impl<'a> Scheduler<'a> {
    #[must_use]
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Enroll `name` to run now and every `interval_secs` after.
    /// An existing enrollment is left untouched; returns whether one was created.
    pub fn enroll(&self, name: &str, interval_secs: i64, now: DateTime<Utc>) -> Result<bool> {
        if interval_secs <= 0 {
            anyhow::bail!("Interval for '{name}' must be positive");
        }
        let created = self.db.insert_job_if_absent(name, interval_secs, now)?;
        if created {
            info!(job = name, interval_secs, "enrolled");
        } else {
            debug!(job = name, "already enrolled");
        }
        Ok(created)
    }

    pub fn is_enrolled(&self, name: &str) -> Result<bool> {
        Ok(self.db.get_job(name)?.is_some())
    }

    pub fn cancel(&self, name: &str) -> Result<bool> {
        self.db.delete_job(name)
    }

    pub fn list(&self) -> Result<Vec<JobRecord>> {
        self.db.list_jobs()
    }

    /// Jobs whose next run is at or before `now`, by name.
    pub fn due(&self, now: DateTime<Utc>) -> Result<Vec<JobRecord>> {
        Ok(self
            .db
            .list_jobs()?
            .into_iter()
            .filter(|j| j.next_run_at <= now)
            .collect())
    }

    pub fn record(&self, name: &str, outcome: WorkOutcome, now: DateTime<Utc>) -> Result<JobRecord> {
        let job = self
            .db
            .get_job(name)?
            .with_context(|| format!("Job '{name}' is not enrolled"))?;
        let (attempts, next) = match outcome {
            WorkOutcome::Success => (0, now + Duration::seconds(job.interval_secs)),
            WorkOutcome::Retry => {
                let attempts = job.attempts + 1;
                (attempts, now + backoff_delay(attempts))
            }
        };
        self.db
            .update_job_run(name, next, attempts, outcome.as_str(), now)?;
        self.db
            .get_job(name)?
            .with_context(|| format!("Job '{name}' vanished while recording"))
    }

    /// One pass over due jobs. Each due job runs at most once.
    pub fn run_due(
        &self,
        workers: &[&dyn Worker],
        ctx: &WorkerContext<'_>,
    ) -> Result<Vec<(String, WorkOutcome)>> {
        let mut ran = Vec::new();
        for job in self.due(ctx.now)? {
            let Some(worker) = workers.iter().find(|w| w.name() == job.name) else {
                warn!(job = %job.name, "no worker registered, skipping");
                continue;
            };
            let outcome = worker.run(ctx);
            self.record(&job.name, outcome, ctx.now)?;
            info!(job = %job.name, outcome = outcome.as_str(), "ran");
            ran.push((job.name, outcome));
        }
        Ok(ran)
    }
}

/// Re-enrolls any expected job that has gone missing.
pub struct WatchdogWorker {
    jobs: Vec<JobSpec>,
}

impl WatchdogWorker {
    #[must_use]
    pub fn new(jobs: &[JobSpec]) -> Self {
        Self {
            jobs: jobs.to_vec(),
        }
    }
}

impl Default for WatchdogWorker {
    fn default() -> Self {
        Self::new(DEFAULT_JOBS)
    }
}

impl Worker for WatchdogWorker {
    fn name(&self) -> &'static str {
        "watchdog"
    }

    fn run(&self, ctx: &WorkerContext<'_>) -> WorkOutcome {
        let scheduler = Scheduler::new(ctx.db);
        let mut tally = StepTally::new(self.name());
        for job in &self.jobs {
            let Some(enrolled) = tally.check(job.name, scheduler.is_enrolled(job.name)) else {
                continue;
            };
            if !enrolled {
                warn!(job = job.name, "job missing, re-enrolling");
                tally.record(job.name, scheduler.enroll(job.name, job.interval_secs, ctx.now));
            }
        }
        // Never asks for a retry; the next watchdog run tries again.
        if tally.failed() > 0 {
            warn!(
                restored = tally.succeeded(),
                failed = tally.failed(),
                "watchdog could not restore every job"
            );
        }
        WorkOutcome::Success
    }
}
