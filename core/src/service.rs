use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use tracing::warn;

use crate::db::Database;
use crate::insights::{InsightView, InsightWindow, MetricSelection, build_insight, select_migraine, window_range};
use crate::metrics::{METRICS, metric_def};
use crate::models::{
    City, EVENT_CATEGORIES, EventCategory, FeatureFlags, LoggedEvent, MigraineSpan, NewMigraine,
    NutrientProfile, NutritionRecord, OutboxItem, Session, validate_new_migraine,
};
use crate::nutrition::{self, PushReport};
use crate::postgrest::{Query, RemoteStore};
use crate::reconcile::{
    DayRecord, Domain, MANUAL_CONFLICT_TARGET, MANUAL_SOURCE, build_day_record, manual_row,
    rows_to_metric_rows,
};
use crate::scheduler::Scheduler;
use crate::screen_time::local_to_utc;
use crate::tables::{self, date_param};
use crate::worker::{StepTally, WorkerContext};

/// Platform-native food nutrient lookup.
///
/// The CLI implements this with reqwest against FoodData Central.
/// Called synchronously; callers on an async runtime must not hold a
/// runtime thread while it blocks.
pub trait FoodDataProvider: Send + Sync {
    /// Best nutrient match for a free-text food name, if any.
    fn search(&self, query: &str) -> Result<Option<NutrientProfile>>;
}

const SESSION_KEY: &str = "session";
const FLAGS_KEY: &str = "feature_flags";
const SELECTION_KEY: &str = "metric_selection";

pub struct AuraService {
    db: Database,
    remote: Box<dyn RemoteStore>,
    offset: FixedOffset,
}

impl AuraService {
    pub fn new(db_path: &Path, remote: Box<dyn RemoteStore>, offset: FixedOffset) -> Result<Self> {
        let db = Database::open(db_path)?;
        Ok(Self { db, remote, offset })
    }

    pub fn new_in_memory(remote: Box<dyn RemoteStore>, offset: FixedOffset) -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self { db, remote, offset })
    }

    #[must_use]
    pub fn db(&self) -> &Database {
        &self.db
    }

    #[must_use]
    pub fn remote(&self) -> &dyn RemoteStore {
        self.remote.as_ref()
    }

    #[must_use]
    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    // --- Session / flags ---

    pub fn load_session(&self) -> Result<Option<Session>> {
        self.db.get_json_setting(SESSION_KEY)
    }

    pub fn save_session(&self, session: &Session) -> Result<()> {
        if session.access_token.trim().is_empty() {
            anyhow::bail!("Access token must not be empty");
        }
        self.db.set_json_setting(SESSION_KEY, session)
    }

    pub fn clear_session(&self) -> Result<bool> {
        self.db.delete_setting(SESSION_KEY)
    }

    /// Valid bearer token for a foreground call.
    fn require_token(&self, now: DateTime<Utc>) -> Result<String> {
        self.load_session()?
            .and_then(|s| s.valid_token(now).map(ToString::to_string))
            .context("Not signed in")
    }

    fn optional_token(&self, now: DateTime<Utc>) -> Result<Option<String>> {
        Ok(self
            .load_session()?
            .and_then(|s| s.valid_token(now).map(ToString::to_string)))
    }

    pub fn feature_flags(&self) -> Result<FeatureFlags> {
        Ok(self.db.get_json_setting(FLAGS_KEY)?.unwrap_or_default())
    }

    pub fn set_feature_flags(&self, flags: &FeatureFlags) -> Result<()> {
        self.db.set_json_setting(FLAGS_KEY, flags)
    }

    // --- Migraines / events ---

    pub fn log_migraine(&self, migraine: &NewMigraine, now: DateTime<Utc>) -> Result<MigraineSpan> {
        validate_new_migraine(migraine)?;
        let token = self.require_token(now)?;
        tables::insert_migraine(self.remote(), &token, migraine)
    }

    pub fn list_migraines(
        &self,
        since: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Vec<MigraineSpan>> {
        let token = self.require_token(now)?;
        tables::fetch_migraines(self.remote(), &token, since)
    }

    pub fn log_event(
        &self,
        category: EventCategory,
        label: &str,
        at: DateTime<Utc>,
        migraine_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<LoggedEvent> {
        let label = label.trim();
        if label.is_empty() {
            anyhow::bail!("Event label must not be empty");
        }
        let token = self.require_token(now)?;
        tables::insert_event(self.remote(), &token, category, label, at, migraine_id)
    }

    // --- Insights ---

    pub fn metric_selection(&self) -> Result<MetricSelection> {
        Ok(self.db.get_json_setting(SELECTION_KEY)?.unwrap_or_default())
    }

    pub fn set_metric_override(&self, metric: &str, enabled: bool) -> Result<MetricSelection> {
        metric_def(metric).with_context(|| format!("Unknown metric '{metric}'"))?;
        let mut selection = self.metric_selection()?;
        selection.set_enabled(metric, enabled);
        self.db.set_json_setting(SELECTION_KEY, &selection)?;
        Ok(selection)
    }

    pub fn clear_metric_override(&self, metric: &str) -> Result<MetricSelection> {
        let mut selection = self.metric_selection()?;
        selection.clear(metric);
        self.db.set_json_setting(SELECTION_KEY, &selection)?;
        Ok(selection)
    }

    /// Events and metrics around one migraine, latest when `migraine_id` is absent.
    pub fn insights(
        &self,
        migraine_id: Option<&str>,
        window: InsightWindow,
        now: DateTime<Utc>,
    ) -> Result<InsightView> {
        let token = self.require_token(now)?;
        // The requested span by id, else the latest; never the capped list
        let mut candidates: Vec<MigraineSpan> = match migraine_id {
            Some(id) => tables::fetch_migraine(self.remote(), &token, id)?
                .into_iter()
                .collect(),
            None => Vec::new(),
        };
        if candidates.is_empty() {
            candidates.extend(tables::fetch_latest_migraine(self.remote(), &token)?);
        }
        let Some(span) = select_migraine(&candidates, migraine_id) else {
            return Ok(InsightView::default());
        };

        let range = window_range(span, window, &self.offset);
        let from = local_to_utc(range.start.and_time(NaiveTime::MIN), &self.offset);
        let to = local_to_utc(
            (range.end + Duration::days(1)).and_time(NaiveTime::MIN),
            &self.offset,
        );

        let mut events = Vec::new();
        for category in EVENT_CATEGORIES {
            events.extend(tables::fetch_events(self.remote(), &token, *category, from, to)?);
        }

        // One broken metric table should not hide the rest
        let mut tally = StepTally::new("insights");
        let series: Vec<_> = METRICS
            .iter()
            .filter_map(|def| {
                tally.record(
                    def.key,
                    tables::fetch_metric_series(self.remote(), &token, def, range),
                )
            })
            .collect();
        if tally.failed() > 0 {
            warn!(failed = tally.failed(), "some metric series could not be loaded");
        }

        Ok(build_insight(
            Some(span),
            window,
            &events,
            &series,
            &self.metric_selection()?,
            &self.offset,
        ))
    }

    // --- Location ---

    /// Works signed out too, through the anon key.
    pub fn resolve_city(&self, lat: f64, lon: f64, now: DateTime<Utc>) -> Result<City> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            anyhow::bail!("Coordinates out of range: {lat}, {lon}");
        }
        let token = self.optional_token(now)?;
        tables::resolve_nearest_city(self.remote(), token.as_deref(), lat, lon)
    }

    // --- Manual vs automatic daily values ---

    pub fn day_record(&self, domain: Domain, date: NaiveDate, now: DateTime<Utc>) -> Result<DayRecord> {
        let token = self.require_token(now)?;
        let mut rows = Vec::new();
        for spec in domain.tables() {
            let raw = self.remote.select(
                Some(&token),
                spec.table,
                &Query::new().eq("date", date_param(date)),
            )?;
            rows.extend(rows_to_metric_rows(spec, &raw));
        }
        Ok(build_day_record(date, domain, rows))
    }

    /// Write the manual row only; automatic rows for the date are left alone.
    pub fn set_manual_value(
        &self,
        domain: Domain,
        date: NaiveDate,
        metric: &str,
        value: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !value.is_finite() {
            anyhow::bail!("Value must be a finite number");
        }
        let (table, column) = domain
            .locate(metric)
            .with_context(|| format!("Metric '{metric}' is not part of the {domain:?} domain"))?;
        let token = self.require_token(now)?;
        self.remote.upsert(
            Some(&token),
            table,
            &manual_row(date, column, value),
            Some(MANUAL_CONFLICT_TARGET),
        )
    }

    /// Delete manual rows for a date, in one metric's table or across the domain.
    pub fn delete_manual(
        &self,
        domain: Domain,
        date: NaiveDate,
        metric: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let targets: Vec<&str> = match metric {
            Some(m) => {
                let (table, _) = domain
                    .locate(m)
                    .with_context(|| format!("Metric '{m}' is not part of the {domain:?} domain"))?;
                vec![table]
            }
            None => domain.tables().iter().map(|s| s.table).collect(),
        };
        let token = self.require_token(now)?;
        let query = Query::new()
            .eq("date", date_param(date))
            .eq("source", MANUAL_SOURCE);
        for table in targets {
            self.remote.delete(Some(&token), table, &query)?;
        }
        Ok(())
    }

    // --- Nutrition ---

    pub fn queue_nutrition(&self, record: &NutritionRecord) -> Result<OutboxItem> {
        nutrition::enqueue_record(&self.db, record)
    }

    pub fn remove_nutrition(&self, external_id: &str) -> Result<OutboxItem> {
        nutrition::enqueue_delete(&self.db, external_id)
    }

    pub fn push_nutrition(
        &self,
        food: Option<&dyn FoodDataProvider>,
        now: DateTime<Utc>,
    ) -> Result<PushReport> {
        let token = self.require_token(now)?;
        let mut tally = StepTally::new("nutrition push");
        nutrition::push_outbox(&self.db, self.remote(), &token, food, &mut tally)
    }

    // --- Background jobs ---

    #[must_use]
    pub fn scheduler(&self) -> Scheduler<'_> {
        Scheduler::new(&self.db)
    }

    #[must_use]
    pub fn worker_context<'a>(
        &'a self,
        session: Option<&'a Session>,
        now: DateTime<Utc>,
    ) -> WorkerContext<'a> {
        WorkerContext {
            remote: self.remote(),
            db: &self.db,
            session,
            now,
            offset: self.offset,
        }
    }
}
