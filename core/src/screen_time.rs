//! Screen-time collection: a live running total plus finalized daily and late-night rows.

use std::collections::BTreeSet;

use anyhow::Result;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::tables::{date_param, latest_date, ts_param};
use crate::worker::{StepTally, WorkOutcome, Worker, WorkerContext, metric_enabled};

pub const SCREEN_TIME_METRIC: &str = "screen_time";
pub const LATE_NIGHT_METRIC: &str = "screen_time_late_night";

pub const LIVE_TABLE: &str = "screen_time_live";
pub const DAILY_TABLE: &str = "screen_time_daily";
pub const LATE_NIGHT_TABLE: &str = "screen_time_late_night";
const DAILY_CONFLICT: &str = "user_id,date";

/// Days beyond this gap are not backfilled; only the newest closed day is written.
pub const MAX_CATCH_UP_DAYS: i64 = 7;

/// Late-night window runs from 22:00 on the date to 06:00 the next morning.
pub const LATE_NIGHT_START_HOUR: u32 = 22;
pub const LATE_NIGHT_END_HOUR: u32 = 6;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UsageInterval {
    pub package: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Platform usage-stats access. Permission is only reported, never requested.
pub trait UsageStatsProvider {
    fn has_permission(&self) -> bool;

    /// Foreground intervals overlapping `[start, end)`.
    fn intervals(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<UsageInterval>>;
}

fn clipped(
    intervals: &[UsageInterval],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<(DateTime<Utc>, DateTime<Utc>, &str)> {
    intervals
        .iter()
        .map(|i| (i.start.max(start), i.end.min(end), i.package.as_str()))
        .filter(|(s, e, _)| s < e)
        .collect()
}

/// Hours covered by the union of foreground intervals within `[start, end)`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn foreground_hours(intervals: &[UsageInterval], start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let mut spans: Vec<(DateTime<Utc>, DateTime<Utc>)> = clipped(intervals, start, end)
        .into_iter()
        .map(|(s, e, _)| (s, e))
        .collect();
    spans.sort();

    let mut total = Duration::zero();
    let mut current: Option<(DateTime<Utc>, DateTime<Utc>)> = None;
    for (s, e) in spans {
        current = match current {
            Some((cs, ce)) if s <= ce => Some((cs, ce.max(e))),
            Some((cs, ce)) => {
                total += ce - cs;
                Some((s, e))
            }
            None => Some((s, e)),
        };
    }
    if let Some((cs, ce)) = current {
        total += ce - cs;
    }
    total.num_seconds() as f64 / 3600.0
}

/// Distinct packages in the foreground during `[start, end)`.
#[must_use]
pub fn app_count(intervals: &[UsageInterval], start: DateTime<Utc>, end: DateTime<Utc>) -> usize {
    clipped(intervals, start, end)
        .into_iter()
        .map(|(_, _, p)| p)
        .collect::<BTreeSet<_>>()
        .len()
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[must_use]
pub fn local_to_utc(local: NaiveDateTime, offset: &FixedOffset) -> DateTime<Utc> {
    (local - Duration::seconds(i64::from(offset.local_minus_utc()))).and_utc()
}

/// UTC bounds of a local calendar day.
#[must_use]
pub fn day_bounds(date: NaiveDate, offset: &FixedOffset) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = local_to_utc(date.and_time(NaiveTime::MIN), offset);
    (start, start + Duration::days(1))
}

#[must_use]
pub fn late_night_window(date: NaiveDate, offset: &FixedOffset) -> (DateTime<Utc>, DateTime<Utc>) {
    let midnight = date.and_time(NaiveTime::MIN);
    let start = midnight + Duration::hours(i64::from(LATE_NIGHT_START_HOUR));
    let end = midnight + Duration::days(1) + Duration::hours(i64::from(LATE_NIGHT_END_HOUR));
    (local_to_utc(start, offset), local_to_utc(end, offset))
}

/// Dates after `latest` up to and including `newest`, ascending.
///
/// A gap longer than [`MAX_CATCH_UP_DAYS`], or no history at all, yields only `newest`.
#[must_use]
pub fn plan_catch_up(latest: Option<NaiveDate>, newest: NaiveDate) -> Vec<NaiveDate> {
    match latest {
        Some(l) if l >= newest => Vec::new(),
        Some(l) if (newest - l).num_days() <= MAX_CATCH_UP_DAYS => l
            .iter_days()
            .skip(1)
            .take_while(|d| *d <= newest)
            .collect(),
        _ => vec![newest],
    }
}

/// Closed days still to finalize. Never includes `today` or later.
#[must_use]
pub fn plan_finalization(latest: Option<NaiveDate>, today: NaiveDate) -> Vec<NaiveDate> {
    plan_catch_up(latest, today - Duration::days(1))
}

/// Nights whose window has fully ended by `now`.
#[must_use]
pub fn plan_late_night(
    latest: Option<NaiveDate>,
    now: DateTime<Utc>,
    offset: &FixedOffset,
) -> Vec<NaiveDate> {
    let local = now.with_timezone(offset);
    let back = if local.hour() >= LATE_NIGHT_END_HOUR { 1 } else { 2 };
    plan_catch_up(latest, local.date_naive() - Duration::days(back))
}

pub struct ScreenTimeWorker<P> {
    provider: P,
}

impl<P: UsageStatsProvider> ScreenTimeWorker<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    fn push_live(&self, ctx: &WorkerContext<'_>, token: &str, today: NaiveDate) -> Result<f64> {
        let (start, _) = day_bounds(today, &ctx.offset);
        let intervals = self.provider.intervals(start, ctx.now)?;
        let hours = round2(foreground_hours(&intervals, start, ctx.now));
        let row = json!({
            "date": date_param(today),
            "total_hours": hours,
            "updated_at": ts_param(ctx.now),
        });
        ctx.remote.upsert(Some(token), LIVE_TABLE, &row, Some(DAILY_CONFLICT))?;
        Ok(hours)
    }

    fn finalize_day(&self, ctx: &WorkerContext<'_>, token: &str, date: NaiveDate) -> Result<()> {
        let (start, end) = day_bounds(date, &ctx.offset);
        let intervals = self.provider.intervals(start, end)?;
        let row = json!({
            "date": date_param(date),
            "total_hours": round2(foreground_hours(&intervals, start, end)),
            "app_count": app_count(&intervals, start, end),
            "source": "android",
        });
        ctx.remote.upsert(Some(token), DAILY_TABLE, &row, Some(DAILY_CONFLICT))
    }

    fn finalize_night(&self, ctx: &WorkerContext<'_>, token: &str, date: NaiveDate) -> Result<()> {
        let (start, end) = late_night_window(date, &ctx.offset);
        let intervals = self.provider.intervals(start, end)?;
        let row = json!({
            "date": date_param(date),
            "value_hours": round2(foreground_hours(&intervals, start, end)),
        });
        ctx.remote.upsert(Some(token), LATE_NIGHT_TABLE, &row, Some(DAILY_CONFLICT))
    }
}

impl<P: UsageStatsProvider> Worker for ScreenTimeWorker<P> {
    fn name(&self) -> &'static str {
        "screen_time"
    }

    fn run(&self, ctx: &WorkerContext<'_>) -> WorkOutcome {
        if !self.provider.has_permission() {
            info!("usage access not granted, skipping screen time");
            return WorkOutcome::Success;
        }
        let Some(token) = ctx.token() else {
            debug!("no session, skipping screen time");
            return WorkOutcome::Success;
        };

        let mut tally = StepTally::new(self.name());
        match tally.check("metric gate", metric_enabled(ctx.remote, token, SCREEN_TIME_METRIC)) {
            Some(true) => {}
            Some(false) => {
                debug!("screen time metric disabled");
                return WorkOutcome::Success;
            }
            None => return tally.outcome(),
        }

        let today = ctx.today();
        tally.record("live total", self.push_live(ctx, token, today));

        if let Some(latest) = tally.check("latest daily", latest_date(ctx.remote, token, DAILY_TABLE)) {
            for date in plan_finalization(latest, today) {
                tally.record(format!("daily {date}"), self.finalize_day(ctx, token, date));
            }
        }

        let late_enabled =
            tally.check("late-night gate", metric_enabled(ctx.remote, token, LATE_NIGHT_METRIC));
        if late_enabled == Some(true) {
            if let Some(latest) =
                tally.check("latest late-night", latest_date(ctx.remote, token, LATE_NIGHT_TABLE))
            {
                for date in plan_late_night(latest, ctx.now, &ctx.offset) {
                    tally.record(format!("late night {date}"), self.finalize_night(ctx, token, date));
                }
            }
        }

        tally.outcome()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::Session;
    use crate::testing::MemoryStore;
    use crate::worker::METRIC_SETTINGS_TABLE;
    use chrono::TimeZone;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn ts(y: i32, m: u32, day: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, day, h, min, 0).unwrap()
    }

    fn interval(pkg: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> UsageInterval {
        UsageInterval {
            package: pkg.to_string(),
            start,
            end,
        }
    }

    struct FakeUsage {
        permitted: bool,
        intervals: Vec<UsageInterval>,
    }

    impl UsageStatsProvider for FakeUsage {
        fn has_permission(&self) -> bool {
            self.permitted
        }

        fn intervals(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<UsageInterval>> {
            Ok(self
                .intervals
                .iter()
                .filter(|i| i.end > start && i.start < end)
                .cloned()
                .collect())
        }
    }

    #[test]
    fn test_finalization_never_includes_today() {
        let today = d(2024, 3, 10);
        for latest in [None, Some(d(2024, 3, 1)), Some(d(2024, 3, 8)), Some(d(2024, 3, 9)), Some(d(2024, 3, 20))] {
            let plan = plan_finalization(latest, today);
            assert!(plan.iter().all(|x| *x < today), "{latest:?} -> {plan:?}");
            assert!(plan.len() <= 7);
        }
    }

    #[test]
    fn test_finalization_fills_short_gap() {
        let plan = plan_finalization(Some(d(2024, 3, 6)), d(2024, 3, 10));
        assert_eq!(plan, vec![d(2024, 3, 7), d(2024, 3, 8), d(2024, 3, 9)]);
    }

    #[test]
    fn test_finalization_caps_at_seven_days() {
        // latest=03-02 leaves exactly seven missing days through 03-09
        let plan = plan_finalization(Some(d(2024, 3, 2)), d(2024, 3, 10));
        assert_eq!(plan.len(), 7);
        assert_eq!(plan.first(), Some(&d(2024, 3, 3)));

        // one more day of gap and only yesterday is written
        let plan = plan_finalization(Some(d(2024, 3, 1)), d(2024, 3, 10));
        assert_eq!(plan, vec![d(2024, 3, 9)]);
    }

    #[test]
    fn test_finalization_without_history_writes_yesterday() {
        assert_eq!(plan_finalization(None, d(2024, 3, 10)), vec![d(2024, 3, 9)]);
        assert!(plan_finalization(Some(d(2024, 3, 9)), d(2024, 3, 10)).is_empty());
    }

    #[test]
    fn test_foreground_hours_counts_overlap_once() {
        let start = ts(2024, 3, 1, 0, 0);
        let end = ts(2024, 3, 2, 0, 0);
        let intervals = vec![
            interval("a", ts(2024, 3, 1, 9, 0), ts(2024, 3, 1, 10, 0)),
            interval("b", ts(2024, 3, 1, 9, 30), ts(2024, 3, 1, 10, 30)),
            interval("c", ts(2024, 3, 1, 12, 0), ts(2024, 3, 1, 12, 30)),
            // clipped at the day boundary
            interval("a", ts(2024, 3, 1, 23, 0), ts(2024, 3, 2, 1, 0)),
        ];
        let h = foreground_hours(&intervals, start, end);
        assert!((h - 3.0).abs() < 1e-9, "got {h}");
        assert_eq!(app_count(&intervals, start, end), 3);
        assert!(foreground_hours(&[], start, end).abs() < f64::EPSILON);
    }

    #[test]
    fn test_late_night_window_in_offset() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let (start, end) = late_night_window(d(2024, 3, 1), &offset);
        assert_eq!(start, ts(2024, 3, 1, 20, 0));
        assert_eq!(end, ts(2024, 3, 2, 4, 0));
    }

    #[test]
    fn test_plan_late_night_waits_for_window_to_close() {
        let utc = FixedOffset::east_opt(0).unwrap();
        // 05:00 on 03-10: the 03-09 night is still open
        let plan = plan_late_night(Some(d(2024, 3, 7)), ts(2024, 3, 10, 5, 0), &utc);
        assert_eq!(plan, vec![d(2024, 3, 8)]);
        let plan = plan_late_night(Some(d(2024, 3, 7)), ts(2024, 3, 10, 6, 0), &utc);
        assert_eq!(plan, vec![d(2024, 3, 8), d(2024, 3, 9)]);
    }

    fn session() -> Session {
        Session {
            access_token: "tok".to_string(),
            user_id: Some("u1".to_string()),
            expires_at: None,
        }
    }

    fn run_worker(store: &MemoryStore, provider: FakeUsage, session: Option<&Session>) -> WorkOutcome {
        let db = Database::open_in_memory().unwrap();
        let ctx = WorkerContext {
            remote: store,
            db: &db,
            session,
            now: ts(2024, 3, 10, 15, 0),
            offset: FixedOffset::east_opt(0).unwrap(),
        };
        ScreenTimeWorker::new(provider).run(&ctx)
    }

    #[test]
    fn test_worker_without_permission_is_noop() {
        let store = MemoryStore::new();
        let s = session();
        let outcome = run_worker(
            &store,
            FakeUsage {
                permitted: false,
                intervals: vec![],
            },
            Some(&s),
        );
        assert_eq!(outcome, WorkOutcome::Success);
        assert!(store.calls().is_empty());
    }

    #[test]
    fn test_worker_without_session_is_noop() {
        let store = MemoryStore::new();
        let outcome = run_worker(
            &store,
            FakeUsage {
                permitted: true,
                intervals: vec![],
            },
            None,
        );
        assert_eq!(outcome, WorkOutcome::Success);
        assert!(store.calls().is_empty());
    }

    #[test]
    fn test_worker_respects_disabled_metric() {
        let store = MemoryStore::new();
        let s = session();
        let outcome = run_worker(
            &store,
            FakeUsage {
                permitted: true,
                intervals: vec![],
            },
            Some(&s),
        );
        assert_eq!(outcome, WorkOutcome::Success);
        assert_eq!(store.calls(), vec!["select metric_settings".to_string()]);
    }

    #[test]
    fn test_worker_writes_live_and_finalized_rows() {
        let store = MemoryStore::new();
        store.seed(
            METRIC_SETTINGS_TABLE,
            vec![
                json!({"metric": SCREEN_TIME_METRIC, "enabled": true}),
                json!({"metric": LATE_NIGHT_METRIC, "enabled": true}),
            ],
        );
        store.seed(DAILY_TABLE, vec![json!({"date": "2024-03-07", "total_hours": 2.0})]);
        store.seed(LATE_NIGHT_TABLE, vec![json!({"date": "2024-03-08", "value_hours": 0.0})]);
        let provider = FakeUsage {
            permitted: true,
            intervals: vec![
                interval("a", ts(2024, 3, 9, 23, 0), ts(2024, 3, 10, 1, 0)),
                interval("b", ts(2024, 3, 10, 9, 0), ts(2024, 3, 10, 9, 30)),
            ],
        };
        let s = session();
        assert_eq!(run_worker(&store, provider, Some(&s)), WorkOutcome::Success);

        let live = store.rows(LIVE_TABLE);
        assert_eq!(live.len(), 1);
        assert_eq!(live[0]["date"], "2024-03-10");
        assert_eq!(live[0]["total_hours"], 1.5);

        let daily: Vec<String> = store
            .rows(DAILY_TABLE)
            .iter()
            .map(|r| r["date"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(daily, vec!["2024-03-07", "2024-03-08", "2024-03-09"]);
        assert!(!daily.contains(&"2024-03-10".to_string()));
        assert_eq!(store.rows(DAILY_TABLE)[2]["total_hours"], 1.0);

        let nights = store.rows(LATE_NIGHT_TABLE);
        assert_eq!(nights.len(), 2);
        assert_eq!(nights[1]["date"], "2024-03-09");
        assert_eq!(nights[1]["value_hours"], 2.0);
    }

    #[test]
    fn test_worker_retries_when_every_step_fails() {
        let store = MemoryStore::new();
        store.fail_on(METRIC_SETTINGS_TABLE);
        let s = session();
        let outcome = run_worker(
            &store,
            FakeUsage {
                permitted: true,
                intervals: vec![],
            },
            Some(&s),
        );
        assert_eq!(outcome, WorkOutcome::Retry);
    }

    #[test]
    fn test_worker_partial_failure_still_succeeds() {
        let store = MemoryStore::new();
        store.seed(
            METRIC_SETTINGS_TABLE,
            vec![json!({"metric": SCREEN_TIME_METRIC, "enabled": true})],
        );
        store.fail_on(LIVE_TABLE);
        let s = session();
        let outcome = run_worker(
            &store,
            FakeUsage {
                permitted: true,
                intervals: vec![],
            },
            Some(&s),
        );
        assert_eq!(outcome, WorkOutcome::Success);
        assert_eq!(store.rows(DAILY_TABLE).len(), 1);
    }

    #[test]
    fn test_worker_retries_when_gate_passes_but_every_write_fails() {
        let store = MemoryStore::new();
        store.seed(
            METRIC_SETTINGS_TABLE,
            vec![json!({"metric": SCREEN_TIME_METRIC, "enabled": true})],
        );
        store.fail_on(LIVE_TABLE);
        store.fail_on(DAILY_TABLE);
        let s = session();
        let outcome = run_worker(
            &store,
            FakeUsage {
                permitted: true,
                intervals: vec![],
            },
            Some(&s),
        );
        assert_eq!(outcome, WorkOutcome::Retry);
        assert!(store.rows(LIVE_TABLE).is_empty());
        assert!(store.rows(DAILY_TABLE).is_empty());
    }
}
