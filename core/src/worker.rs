//! Shared plumbing for background jobs: run context, outcome, and per-step tally.

use std::fmt::Display;

use anyhow::Result;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::db::Database;
use crate::models::{MetricSetting, Session};
use crate::postgrest::{Query, RemoteStore, fetch};

/// The only signal a job returns to whatever schedules it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkOutcome {
    Success,
    Retry,
}

impl WorkOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Retry => "retry",
        }
    }
}

/// Counts independent steps of one run.
///
/// A run asks for a retry only when every attempted step failed. Reads and
/// gates go through [`StepTally::check`] and never count as written items.
#[derive(Debug)]
pub struct StepTally {
    job: &'static str,
    ok: usize,
    failed: usize,
}

impl StepTally {
    #[must_use]
    pub fn new(job: &'static str) -> Self {
        Self {
            job,
            ok: 0,
            failed: 0,
        }
    }

    pub fn record<T>(&mut self, step: impl Display, result: Result<T>) -> Option<T> {
        match result {
            Ok(v) => {
                self.ok += 1;
                debug!(job = self.job, %step, "step ok");
                Some(v)
            }
            Err(e) => {
                self.failed += 1;
                warn!(job = self.job, %step, error = %format!("{e:#}"), "step failed");
                None
            }
        }
    }

    /// Like [`record`](Self::record) for reads and gates: a failure counts,
    /// a success does not, so only written items can keep a run from retrying.
    pub fn check<T>(&mut self, step: impl Display, result: Result<T>) -> Option<T> {
        match result {
            Ok(v) => {
                debug!(job = self.job, %step, "check ok");
                Some(v)
            }
            Err(e) => {
                self.failed += 1;
                warn!(job = self.job, %step, error = %format!("{e:#}"), "check failed");
                None
            }
        }
    }

    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.ok
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed
    }

    #[must_use]
    pub fn outcome(&self) -> WorkOutcome {
        if self.failed > 0 && self.ok == 0 {
            warn!(job = self.job, failed = self.failed, "all steps failed");
            return WorkOutcome::Retry;
        }
        if self.failed > 0 {
            warn!(
                job = self.job,
                ok = self.ok,
                failed = self.failed,
                "partial failure"
            );
        }
        WorkOutcome::Success
    }
}

/// Everything a job needs, passed in rather than looked up globally.
pub struct WorkerContext<'a> {
    pub remote: &'a dyn RemoteStore,
    pub db: &'a Database,
    pub session: Option<&'a Session>,
    pub now: DateTime<Utc>,
    pub offset: FixedOffset,
}

impl<'a> WorkerContext<'a> {
    #[must_use]
    pub fn token(&self) -> Option<&'a str> {
        self.session.and_then(|s| s.valid_token(self.now))
    }

    #[must_use]
    pub fn local_now(&self) -> DateTime<FixedOffset> {
        self.now.with_timezone(&self.offset)
    }

    #[must_use]
    pub fn today(&self) -> NaiveDate {
        self.local_now().date_naive()
    }
}

pub trait Worker {
    /// Unique job name; the scheduler deduplicates on it.
    fn name(&self) -> &'static str;

    fn run(&self, ctx: &WorkerContext<'_>) -> WorkOutcome;
}

pub const METRIC_SETTINGS_TABLE: &str = "metric_settings";

/// Remote per-metric switch. A metric without a settings row stays off.
pub fn metric_enabled(remote: &dyn RemoteStore, token: &str, metric: &str) -> Result<bool> {
    let rows: Vec<MetricSetting> = fetch(
        remote,
        Some(token),
        METRIC_SETTINGS_TABLE,
        &Query::new().select("metric,enabled").eq("metric", metric).limit(1),
    )?;
    Ok(rows.first().is_some_and(|s| s.enabled))
}
