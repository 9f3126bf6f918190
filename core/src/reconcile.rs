//! Picks one value per metric for a day when device and manual rows coexist.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Value, json};

/// Where a row came from. Compare trust with [`Source::rank`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Manual,
    Other(String),
    Api,
    Device,
    HealthConnect,
    Whoop,
}

pub const MANUAL_SOURCE: &str = "manual";

impl Source {
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        let lower = raw.unwrap_or_default().trim().to_lowercase();
        match lower.as_str() {
            "" | MANUAL_SOURCE => Self::Manual,
            "whoop" => Self::Whoop,
            "health_connect" | "healthconnect" => Self::HealthConnect,
            "device" | "android" | "wearable" => Self::Device,
            "api" | "open_meteo" | "openmeteo" | "weather_api" => Self::Api,
            _ => Self::Other(lower),
        }
    }

    /// Trust level; every unrecognised source shares one rank.
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            Self::Manual => 0,
            Self::Other(_) => 1,
            Self::Api => 2,
            Self::Device => 3,
            Self::HealthConnect => 4,
            Self::Whoop => 5,
        }
    }

    #[must_use]
    pub fn is_manual(&self) -> bool {
        matches!(self, Self::Manual)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Sleep,
    Weather,
    Physical,
}

#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub table: &'static str,
    /// `(metric key, column)` pairs read from each row.
    pub metrics: &'static [(&'static str, &'static str)],
}

const SLEEP_TABLES: &[TableSpec] = &[
    TableSpec {
        table: "sleep_duration_daily",
        metrics: &[("sleep_duration", "value_hours")],
    },
    TableSpec {
        table: "sleep_score_daily",
        metrics: &[("sleep_score", "value_pct")],
    },
    TableSpec {
        table: "sleep_efficiency_daily",
        metrics: &[("sleep_efficiency", "value_pct")],
    },
    TableSpec {
        table: "sleep_disturbances_daily",
        metrics: &[("sleep_disturbances", "value_count")],
    },
];

const WEATHER_TABLES: &[TableSpec] = &[TableSpec {
    table: "user_weather_daily",
    metrics: &[
        ("temperature", "temp_c_mean"),
        ("pressure", "pressure_hpa_mean"),
        ("humidity", "humidity_pct_mean"),
        ("wind_speed", "wind_speed_mps_mean"),
        ("uv_index", "uv_index_max"),
    ],
}];

const PHYSICAL_TABLES: &[TableSpec] = &[
    TableSpec {
        table: "recovery_score_daily",
        metrics: &[("recovery", "value_pct")],
    },
    TableSpec {
        table: "resting_hr_daily",
        metrics: &[("resting_hr", "value_bpm")],
    },
    TableSpec {
        table: "hrv_daily",
        metrics: &[("hrv", "value_rmssd_ms")],
    },
    TableSpec {
        table: "spo2_daily",
        metrics: &[("spo2", "value_pct")],
    },
    TableSpec {
        table: "skin_temp_daily",
        metrics: &[("skin_temp", "value_celsius")],
    },
    TableSpec {
        table: "steps_daily",
        metrics: &[("steps", "value_count")],
    },
];

impl Domain {
    #[must_use]
    pub fn tables(self) -> &'static [TableSpec] {
        match self {
            Self::Sleep => SLEEP_TABLES,
            Self::Weather => WEATHER_TABLES,
            Self::Physical => PHYSICAL_TABLES,
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "sleep" => Ok(Self::Sleep),
            "weather" => Ok(Self::Weather),
            "physical" => Ok(Self::Physical),
            other => anyhow::bail!("Unknown domain '{other}'. Must be one of: sleep, weather, physical"),
        }
    }

    /// Table and column holding `metric` in this domain.
    #[must_use]
    pub fn locate(self, metric: &str) -> Option<(&'static str, &'static str)> {
        self.tables().iter().find_map(|spec| {
            spec.metrics
                .iter()
                .find(|(m, _)| *m == metric)
                .map(|(_, column)| (spec.table, *column))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRow {
    pub table: String,
    pub metric: String,
    pub value: f64,
    pub source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_id: Option<String>,
}

/// Explode wide rows into one `MetricRow` per non-null metric column.
#[must_use]
pub fn rows_to_metric_rows(spec: &TableSpec, rows: &[Value]) -> Vec<MetricRow> {
    let mut out = Vec::new();
    for row in rows {
        let source = Source::parse(row.get("source").and_then(Value::as_str));
        let row_id = row.get("id").and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        for (metric, column) in spec.metrics {
            if let Some(value) = row.get(*column).and_then(Value::as_f64) {
                out.push(MetricRow {
                    table: spec.table.to_string(),
                    metric: (*metric).to_string(),
                    value,
                    source: source.clone(),
                    row_id: row_id.clone(),
                });
            }
        }
    }
    out
}

/// Highest-ranked source per metric; equal ranks keep the first row seen.
#[must_use]
pub fn best_per_metric(rows: Vec<MetricRow>) -> BTreeMap<String, MetricRow> {
    let mut best: BTreeMap<String, MetricRow> = BTreeMap::new();
    for row in rows {
        match best.get(&row.metric) {
            Some(current) if current.source.rank() >= row.source.rank() => {}
            _ => {
                best.insert(row.metric.clone(), row);
            }
        }
    }
    best
}

#[derive(Debug, Clone, Serialize)]
pub struct DayRecord {
    pub date: NaiveDate,
    pub domain: Domain,
    pub values: BTreeMap<String, MetricRow>,
    /// Metrics that have a manual row, whether or not it was selected.
    pub manual_present: Vec<String>,
}

#[must_use]
pub fn build_day_record(date: NaiveDate, domain: Domain, rows: Vec<MetricRow>) -> DayRecord {
    let mut manual_present: Vec<String> = rows
        .iter()
        .filter(|r| r.source.is_manual())
        .map(|r| r.metric.clone())
        .collect();
    manual_present.sort();
    manual_present.dedup();
    DayRecord {
        date,
        domain,
        values: best_per_metric(rows),
        manual_present,
    }
}

/// Body for an upsert that only ever touches the manual row.
#[must_use]
pub fn manual_row(date: NaiveDate, column: &str, value: f64) -> Value {
    let mut row = json!({
        "date": date.format("%Y-%m-%d").to_string(),
        "source": MANUAL_SOURCE,
    });
    row[column] = json!(value);
    row
}

pub const MANUAL_CONFLICT_TARGET: &str = "user_id,date,source";

#[cfg(test)]
mod tests {
    use super::*;

    fn row(metric: &str, value: f64, source: &str) -> MetricRow {
        MetricRow {
            table: "t".to_string(),
            metric: metric.to_string(),
            value,
            source: Source::parse(Some(source)),
            row_id: None,
        }
    }

    #[test]
    fn test_source_total_order() {
        assert!(Source::Whoop.rank() > Source::HealthConnect.rank());
        assert!(Source::HealthConnect.rank() > Source::Device.rank());
        assert!(Source::Device.rank() > Source::Api.rank());
        assert!(Source::Api.rank() > Source::Other("x".to_string()).rank());
        assert!(Source::Other("x".to_string()).rank() > Source::Manual.rank());
        assert_eq!(
            Source::Other("alpha_ring".to_string()).rank(),
            Source::Other("zeta_band".to_string()).rank()
        );
    }

    #[test]
    fn test_source_parse() {
        assert_eq!(Source::parse(Some("MANUAL")), Source::Manual);
        assert_eq!(Source::parse(None), Source::Manual);
        assert_eq!(Source::parse(Some("whoop")), Source::Whoop);
        assert_eq!(Source::parse(Some("health_connect")), Source::HealthConnect);
        assert_eq!(
            Source::parse(Some("oura")),
            Source::Other("oura".to_string())
        );
    }

    #[test]
    fn test_device_beats_manual_either_order() {
        let picked = best_per_metric(vec![row("hrv", 40.0, "manual"), row("hrv", 55.0, "whoop")]);
        assert_eq!(picked["hrv"].value, 55.0);

        let picked = best_per_metric(vec![row("hrv", 55.0, "whoop"), row("hrv", 40.0, "manual")]);
        assert_eq!(picked["hrv"].value, 55.0);
    }

    #[test]
    fn test_manual_only_is_selected() {
        let picked = best_per_metric(vec![row("sleep_duration", 6.5, "manual")]);
        assert_eq!(picked["sleep_duration"].value, 6.5);
        assert!(picked["sleep_duration"].source.is_manual());
    }

    #[test]
    fn test_equal_sources_keep_first() {
        let picked = best_per_metric(vec![row("steps", 1.0, "device"), row("steps", 2.0, "android")]);
        assert_eq!(picked["steps"].value, 1.0);
    }

    #[test]
    fn test_unknown_sources_tie_and_keep_first() {
        let picked = best_per_metric(vec![row("hrv", 1.0, "alpha_ring"), row("hrv", 2.0, "zeta_band")]);
        assert_eq!(picked["hrv"].value, 1.0);

        let picked = best_per_metric(vec![row("hrv", 2.0, "zeta_band"), row("hrv", 1.0, "alpha_ring")]);
        assert_eq!(picked["hrv"].value, 2.0);
    }

    #[test]
    fn test_rows_to_metric_rows_skips_nulls() {
        let spec = &WEATHER_TABLES[0];
        let rows = vec![serde_json::json!({
            "id": 12,
            "date": "2024-03-01",
            "temp_c_mean": 11.5,
            "pressure_hpa_mean": null,
            "humidity_pct_mean": 80,
            "source": "open_meteo"
        })];
        let out = rows_to_metric_rows(spec, &rows);
        let metrics: Vec<&str> = out.iter().map(|r| r.metric.as_str()).collect();
        assert_eq!(metrics, vec!["temperature", "humidity"]);
        assert_eq!(out[0].source, Source::Api);
        assert_eq!(out[0].row_id.as_deref(), Some("12"));
    }

    #[test]
    fn test_day_record_tracks_manual_presence() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let rec = build_day_record(
            date,
            Domain::Physical,
            vec![
                row("hrv", 40.0, "manual"),
                row("hrv", 55.0, "whoop"),
                row("steps", 8000.0, "health_connect"),
            ],
        );
        assert_eq!(rec.manual_present, vec!["hrv".to_string()]);
        assert_eq!(rec.values.len(), 2);
        assert_eq!(rec.values["hrv"].source, Source::Whoop);
    }

    #[test]
    fn test_domain_locate() {
        assert_eq!(
            Domain::Weather.locate("pressure"),
            Some(("user_weather_daily", "pressure_hpa_mean"))
        );
        assert_eq!(
            Domain::Sleep.locate("sleep_score"),
            Some(("sleep_score_daily", "value_pct"))
        );
        assert!(Domain::Sleep.locate("pressure").is_none());
        assert!(Domain::parse("mood").is_err());
    }

    #[test]
    fn test_manual_row_shape() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let body = manual_row(date, "value_hours", 7.25);
        assert_eq!(body["date"], "2024-03-01");
        assert_eq!(body["source"], "manual");
        assert_eq!(body["value_hours"], 7.25);
    }
}
