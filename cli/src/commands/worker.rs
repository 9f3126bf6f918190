use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tabled::{Table, Tabled, settings::Style};
use tracing::info;

use aura_core::location::LocationWorker;
use aura_core::noise::AmbientNoiseWorker;
use aura_core::nutrition::NutritionSyncWorker;
use aura_core::scheduler::{DEFAULT_JOBS, WatchdogWorker};
use aura_core::screen_time::ScreenTimeWorker;
use aura_core::service::{AuraService, FoodDataProvider};
use aura_core::worker::{WorkOutcome, Worker};

use super::helpers::{fmt_local, print_json};
use crate::platform::{FileNutritionFeed, FileUsageStats, StaticLocation, StaticNoise};

/// Where the workers get their platform data on this machine.
pub(crate) struct WorkerInputs {
    pub usage_file: Option<PathBuf>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub noise_samples: Vec<f64>,
    pub nutrition_feed: Option<PathBuf>,
}

pub(crate) struct WorkerSet {
    screen_time: ScreenTimeWorker<FileUsageStats>,
    location: LocationWorker<StaticLocation>,
    noise: AmbientNoiseWorker<StaticNoise>,
    nutrition: NutritionSyncWorker,
    watchdog: WatchdogWorker,
}

impl WorkerSet {
    pub(crate) fn new(inputs: WorkerInputs, food: Option<Box<dyn FoodDataProvider>>) -> Self {
        Self {
            screen_time: ScreenTimeWorker::new(FileUsageStats::new(inputs.usage_file)),
            location: LocationWorker::new(StaticLocation::new(inputs.lat, inputs.lon)),
            noise: AmbientNoiseWorker::new(StaticNoise::new(inputs.noise_samples)),
            nutrition: NutritionSyncWorker::new(
                Some(Box::new(FileNutritionFeed::new(inputs.nutrition_feed))),
                food,
            ),
            watchdog: WatchdogWorker::default(),
        }
    }

    fn all(&self) -> Vec<&dyn Worker> {
        vec![
            &self.noise,
            &self.location,
            &self.nutrition,
            &self.screen_time,
            &self.watchdog,
        ]
    }
}

fn print_outcomes(ran: &[(String, WorkOutcome)], json: bool) -> Result<()> {
    if json {
        let out: Vec<_> = ran
            .iter()
            .map(|(name, outcome)| serde_json::json!({ "job": name, "outcome": outcome }))
            .collect();
        return print_json(&out);
    }
    if ran.is_empty() {
        eprintln!("No jobs due.");
    }
    for (name, outcome) in ran {
        println!("{name}: {}", outcome.as_str());
    }
    Ok(())
}

/// Run one job immediately, recording the outcome if it is enrolled.
pub(crate) fn cmd_worker_run(
    service: &AuraService,
    workers: &WorkerSet,
    name: &str,
    json: bool,
) -> Result<()> {
    let all = workers.all();
    let Some(worker) = all.iter().find(|w| w.name() == name) else {
        let names: Vec<&str> = all.iter().map(|w| w.name()).collect();
        bail!("Unknown job '{name}'. Must be one of: {}", names.join(", "));
    };

    let now = Utc::now();
    let session = service.load_session()?;
    let ctx = service.worker_context(session.as_ref(), now);
    let outcome = worker.run(&ctx);

    let scheduler = service.scheduler();
    if scheduler.is_enrolled(name)? {
        scheduler.record(name, outcome, now)?;
    }
    info!(job = name, outcome = outcome.as_str(), "ran on demand");
    print_outcomes(&[(name.to_string(), outcome)], json)
}

/// One scheduler pass over every due job.
pub(crate) fn cmd_worker_tick(service: &AuraService, workers: &WorkerSet, json: bool) -> Result<()> {
    let session = service.load_session()?;
    let ctx = service.worker_context(session.as_ref(), Utc::now());
    let ran = service
        .scheduler()
        .run_due(&workers.all(), &ctx)
        .context("Scheduler pass failed")?;
    print_outcomes(&ran, json)
}

pub(crate) fn cmd_worker_status(service: &AuraService, json: bool) -> Result<()> {
    let jobs = service.scheduler().list()?;

    if json {
        return print_json(&jobs);
    }
    if jobs.is_empty() {
        eprintln!("No jobs enrolled. Use `aura worker enroll` to schedule the defaults.");
        return Ok(());
    }

    #[derive(Tabled)]
    struct JobRow {
        #[tabled(rename = "Job")]
        name: String,
        #[tabled(rename = "Every")]
        every: String,
        #[tabled(rename = "Next run")]
        next: String,
        #[tabled(rename = "Last")]
        last: String,
        #[tabled(rename = "Retries")]
        attempts: i64,
    }

    let offset = service.offset();
    let rows: Vec<JobRow> = jobs
        .iter()
        .map(|j| JobRow {
            name: j.name.clone(),
            every: format!("{}m", j.interval_secs / 60),
            next: fmt_local(j.next_run_at, &offset),
            last: match (&j.last_outcome, j.last_run_at) {
                (Some(o), Some(at)) => format!("{o} at {}", fmt_local(at, &offset)),
                _ => "-".to_string(),
            },
            attempts: j.attempts,
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

/// Enroll one job, or every default job when `name` is absent.
pub(crate) fn cmd_worker_enroll(
    service: &AuraService,
    name: Option<&str>,
    interval_mins: Option<i64>,
    json: bool,
) -> Result<()> {
    let now = Utc::now();
    let scheduler = service.scheduler();
    let targets: Vec<(String, i64)> = match name {
        Some(n) => {
            let default = DEFAULT_JOBS.iter().find(|j| j.name == n);
            let secs = match (interval_mins, default) {
                (Some(m), _) => m * 60,
                (None, Some(j)) => j.interval_secs,
                (None, None) => bail!("Job '{n}' has no default interval; pass --interval"),
            };
            vec![(n.to_string(), secs)]
        }
        None => DEFAULT_JOBS
            .iter()
            .map(|j| (j.name.to_string(), j.interval_secs))
            .collect(),
    };

    let mut created = Vec::new();
    for (job, secs) in &targets {
        if scheduler.enroll(job, *secs, now)? {
            created.push(job.clone());
        }
    }

    if json {
        print_json(&serde_json::json!({ "enrolled": created }))?;
    } else if created.is_empty() {
        println!("All jobs already enrolled");
    } else {
        println!("Enrolled: {}", created.join(", "));
    }
    Ok(())
}

pub(crate) fn cmd_worker_cancel(service: &AuraService, name: &str, json: bool) -> Result<()> {
    let removed = service.scheduler().cancel(name)?;
    if json {
        print_json(&serde_json::json!({ "job": name, "cancelled": removed }))?;
    } else if removed {
        println!("Cancelled {name}");
    } else {
        eprintln!("Job '{name}' was not enrolled");
    }
    Ok(())
}
