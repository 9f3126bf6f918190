//! Typed wrappers over the hosted tables. No caching; every call hits the store.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::geo::{self, BBOX_DEGREES, BoundingBox, FULL_SCAN_LIMIT, MIN_BOX_RESULTS};
use crate::insights::DateRange;
use crate::metrics::MetricDef;
use crate::models::{
    City, EventCategory, LoggedEvent, MetricPoint, MetricSeries, MetricSetting, MigraineSpan,
    NewMigraine,
};
use crate::postgrest::{Direction, Query, RemoteStore, fetch, first_object};
use crate::reconcile::Source;
use crate::worker::METRIC_SETTINGS_TABLE;

pub const MIGRAINES_TABLE: &str = "migraines";
pub const CITIES_TABLE: &str = "city";
pub const NEAREST_CITY_RPC: &str = "nearest_city";

/// Rows fetched per list call.
const LIST_LIMIT: usize = 500;

#[must_use]
pub fn ts_param(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[must_use]
pub fn date_param(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

// --- Migraines ---

pub fn fetch_migraines(
    store: &dyn RemoteStore,
    token: &str,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<MigraineSpan>> {
    let mut query = Query::new()
        .select("id,start_at,end_at,severity,type,notes")
        .order("start_at", Direction::Desc)
        .limit(LIST_LIMIT);
    if let Some(since) = since {
        query = query.gte("start_at", ts_param(since));
    }
    fetch(store, Some(token), MIGRAINES_TABLE, &query)
}

pub fn fetch_migraine(store: &dyn RemoteStore, token: &str, id: &str) -> Result<Option<MigraineSpan>> {
    let query = Query::new()
        .select("id,start_at,end_at,severity,type,notes")
        .eq("id", id)
        .limit(1);
    Ok(fetch(store, Some(token), MIGRAINES_TABLE, &query)?.into_iter().next())
}

/// Most recent migraine by start time.
pub fn fetch_latest_migraine(store: &dyn RemoteStore, token: &str) -> Result<Option<MigraineSpan>> {
    let query = Query::new()
        .select("id,start_at,end_at,severity,type,notes")
        .order("start_at", Direction::Desc)
        .limit(1);
    Ok(fetch(store, Some(token), MIGRAINES_TABLE, &query)?.into_iter().next())
}

pub fn insert_migraine(
    store: &dyn RemoteStore,
    token: &str,
    migraine: &NewMigraine,
) -> Result<MigraineSpan> {
    let row = store.insert(Some(token), MIGRAINES_TABLE, &serde_json::to_value(migraine)?)?;
    serde_json::from_value(row).context("Failed to decode inserted migraine")
}

// --- Events ---

fn event_from_row(category: EventCategory, row: &Value) -> Result<LoggedEvent> {
    let id = match row.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => anyhow::bail!("{} row without id", category.table()),
    };
    let label = row
        .get(category.label_column())
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let occurred_at = row
        .get("start_at")
        .and_then(Value::as_str)
        .context("event row without start_at")?;
    let occurred_at = DateTime::parse_from_rfc3339(occurred_at)
        .with_context(|| format!("Invalid start_at '{occurred_at}'"))?
        .with_timezone(&Utc);
    Ok(LoggedEvent {
        id,
        category,
        label,
        occurred_at,
        migraine_id: row
            .get("migraine_id")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        source: row
            .get("source")
            .and_then(Value::as_str)
            .map(ToString::to_string),
    })
}

/// Events of one category whose timestamp lies in `[from, to)`.
pub fn fetch_events(
    store: &dyn RemoteStore,
    token: &str,
    category: EventCategory,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<LoggedEvent>> {
    let query = Query::new()
        .gte("start_at", ts_param(from))
        .lte("start_at", ts_param(to))
        .order("start_at", Direction::Asc)
        .limit(LIST_LIMIT);
    let rows = store.select(Some(token), category.table(), &query)?;
    if rows.len() >= LIST_LIMIT {
        warn!(table = category.table(), limit = LIST_LIMIT, "event list truncated");
    }
    rows.iter()
        .filter(|row| {
            // lte is inclusive; keep the upper bound exclusive
            row.get("start_at")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .is_none_or(|t| t.with_timezone(&Utc) < to)
        })
        .map(|row| event_from_row(category, row))
        .collect()
}

pub fn insert_event(
    store: &dyn RemoteStore,
    token: &str,
    category: EventCategory,
    label: &str,
    at: DateTime<Utc>,
    migraine_id: Option<&str>,
) -> Result<LoggedEvent> {
    let mut row = json!({
        "start_at": ts_param(at),
        "source": "manual",
    });
    row[category.label_column()] = json!(label);
    if let Some(id) = migraine_id {
        row["migraine_id"] = json!(id);
    }
    let inserted = store.insert(Some(token), category.table(), &row)?;
    event_from_row(category, &inserted)
}

// --- Daily metrics ---

/// One point per date; when several sources report a date the most trusted wins.
pub fn fetch_metric_series(
    store: &dyn RemoteStore,
    token: &str,
    def: &MetricDef,
    range: DateRange,
) -> Result<MetricSeries> {
    let query = Query::new()
        .select(&format!("date,{},source", def.column))
        .gte("date", date_param(range.start))
        .lte("date", date_param(range.end))
        .order("date", Direction::Asc);
    let rows = store.select(Some(token), def.table, &query)?;

    let mut by_date: BTreeMap<NaiveDate, (Source, f64)> = BTreeMap::new();
    for row in &rows {
        let Some(value) = row.get(def.column).and_then(Value::as_f64) else {
            continue;
        };
        let Some(date) = row
            .get("date")
            .and_then(Value::as_str)
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        else {
            continue;
        };
        let source = Source::parse(row.get("source").and_then(Value::as_str));
        match by_date.get(&date) {
            Some((current, _)) if current.rank() >= source.rank() => {}
            _ => {
                by_date.insert(date, (source, value));
            }
        }
    }

    Ok(MetricSeries {
        metric: def.key.to_string(),
        points: by_date
            .into_iter()
            .map(|(date, (_, value))| MetricPoint { date, value })
            .collect(),
    })
}

pub fn fetch_metric_settings(store: &dyn RemoteStore, token: &str) -> Result<Vec<MetricSetting>> {
    fetch(
        store,
        Some(token),
        METRIC_SETTINGS_TABLE,
        &Query::new().select("metric,enabled").order("metric", Direction::Asc),
    )
}

/// Most recent `date` in a daily table, if any row exists.
pub fn latest_date(store: &dyn RemoteStore, token: &str, table: &str) -> Result<Option<NaiveDate>> {
    let rows = store.select(
        Some(token),
        table,
        &Query::new()
            .select("date")
            .order("date", Direction::Desc)
            .limit(1),
    )?;
    rows.first()
        .and_then(|r| r.get("date"))
        .and_then(Value::as_str)
        .map(|s| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .with_context(|| format!("Invalid date '{s}' in {table}"))
        })
        .transpose()
}

// --- Cities ---

pub fn fetch_cities_in_box(
    store: &dyn RemoteStore,
    token: Option<&str>,
    bbox: &BoundingBox,
) -> Result<Vec<City>> {
    let query = Query::new()
        .select("id,name,country,latitude,longitude")
        .gte("latitude", bbox.min_lat)
        .lte("latitude", bbox.max_lat)
        .gte("longitude", bbox.min_lon)
        .lte("longitude", bbox.max_lon);
    fetch(store, token, CITIES_TABLE, &query)
}

pub fn fetch_all_cities(store: &dyn RemoteStore, token: Option<&str>) -> Result<Vec<City>> {
    let query = Query::new()
        .select("id,name,country,latitude,longitude")
        .order("id", Direction::Asc)
        .limit(FULL_SCAN_LIMIT);
    fetch(store, token, CITIES_TABLE, &query)
}

/// Nearest city to a point: server RPC when signed in, client-side search otherwise.
pub fn resolve_nearest_city(
    store: &dyn RemoteStore,
    token: Option<&str>,
    lat: f64,
    lon: f64,
) -> Result<City> {
    if let Some(token) = token {
        let response = store.rpc(Some(token), NEAREST_CITY_RPC, &json!({"lat": lat, "lon": lon}))?;
        if let Some(obj) = first_object(response) {
            return serde_json::from_value(obj).context("Failed to decode nearest_city response");
        }
        debug!("nearest_city RPC returned no rows, falling back to client search");
    }

    let bbox = BoundingBox::around(lat, lon, BBOX_DEGREES);
    let boxed = fetch_cities_in_box(store, token, &bbox)?;
    let candidates = if boxed.len() < MIN_BOX_RESULTS || bbox.crosses_antimeridian() {
        geo::merge_candidates(boxed, fetch_all_cities(store, token)?)
    } else {
        boxed
    };
    geo::nearest_city(&candidates, lat, lon)
        .cloned()
        .with_context(|| format!("No city found near {lat:.4}, {lon:.4}"))
}
