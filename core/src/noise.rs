use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::tables::ts_param;
use crate::worker::{StepTally, WorkOutcome, Worker, WorkerContext, metric_enabled};

pub const NOISE_METRIC: &str = "ambient_noise";
pub const NOISE_SAMPLES_TABLE: &str = "ambient_noise_samples";

/// Readings taken per run.
pub const SAMPLES_PER_RUN: usize = 10;

pub trait NoiseMeter {
    fn has_permission(&self) -> bool;

    /// Up to `n` sound-level readings in dB.
    fn sample(&self, n: usize) -> Result<Vec<f64>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NoiseSummary {
    /// Energy average: `10·log10(mean(10^(L/10)))`.
    pub l_mean: f64,
    pub l_max: f64,
    pub count: usize,
}

/// `None` for an empty or all-NaN sample set.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn summarize(samples: &[f64]) -> Option<NoiseSummary> {
    let finite: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    let energy = finite.iter().map(|l| 10f64.powf(l / 10.0)).sum::<f64>() / finite.len() as f64;
    Some(NoiseSummary {
        l_mean: 10.0 * energy.log10(),
        l_max: finite.iter().copied().fold(f64::MIN, f64::max),
        count: finite.len(),
    })
}

pub struct AmbientNoiseWorker<M> {
    meter: M,
}

impl<M: NoiseMeter> AmbientNoiseWorker<M> {
    pub fn new(meter: M) -> Self {
        Self { meter }
    }
}

impl<M: NoiseMeter> Worker for AmbientNoiseWorker<M> {
    fn name(&self) -> &'static str {
        "ambient_noise"
    }

    fn run(&self, ctx: &WorkerContext<'_>) -> WorkOutcome {
        if !self.meter.has_permission() {
            return WorkOutcome::Success;
        }
        let Some(token) = ctx.token() else {
            return WorkOutcome::Success;
        };

        let mut tally = StepTally::new(self.name());
        match tally.check("metric gate", metric_enabled(ctx.remote, token, NOISE_METRIC)) {
            Some(true) => {}
            Some(false) => return WorkOutcome::Success,
            None => return tally.outcome(),
        }

        let Some(samples) = tally.check("sample", self.meter.sample(SAMPLES_PER_RUN)) else {
            return tally.outcome();
        };
        let Some(summary) = summarize(&samples) else {
            debug!("no noise samples captured");
            return tally.outcome();
        };

        let row = json!({
            "start_ts": ts_param(ctx.now),
            "l_mean": (summary.l_mean * 10.0).round() / 10.0,
            "l_max": summary.l_max,
            "sample_count": summary.count,
        });
        tally.record(
            "insert",
            ctx.remote.insert(Some(token), NOISE_SAMPLES_TABLE, &row),
        );
        tally.outcome()
    }
}
