use anyhow::{Result, bail};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// --- Migraines ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigraineSpan {
    pub id: String,
    pub start_at: DateTime<Utc>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub severity: Option<i64>,
    #[serde(default, rename = "type")]
    pub label: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl MigraineSpan {
    /// End of the span for window membership; an open migraine ends where it started.
    #[must_use]
    pub fn effective_end(&self) -> DateTime<Utc> {
        self.end_at.unwrap_or(self.start_at)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewMigraine {
    pub start_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<i64>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

pub const SEVERITY_MIN: i64 = 0;
pub const SEVERITY_MAX: i64 = 10;

pub fn validate_severity(severity: i64) -> Result<i64> {
    if !(SEVERITY_MIN..=SEVERITY_MAX).contains(&severity) {
        bail!("Severity must be between {SEVERITY_MIN} and {SEVERITY_MAX} (got {severity})");
    }
    Ok(severity)
}

pub fn validate_new_migraine(migraine: &NewMigraine) -> Result<()> {
    if let Some(severity) = migraine.severity {
        validate_severity(severity)?;
    }
    if let Some(end) = migraine.end_at {
        if end < migraine.start_at {
            bail!("Migraine end must not be before its start");
        }
    }
    Ok(())
}

// --- Events ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Trigger,
    Medicine,
    Relief,
    Activity,
    Location,
}

pub const EVENT_CATEGORIES: &[EventCategory] = &[
    EventCategory::Trigger,
    EventCategory::Medicine,
    EventCategory::Relief,
    EventCategory::Activity,
    EventCategory::Location,
];

impl EventCategory {
    #[must_use]
    pub fn table(self) -> &'static str {
        match self {
            Self::Trigger => "triggers",
            Self::Medicine => "medicines",
            Self::Relief => "reliefs",
            Self::Activity => "activities",
            Self::Location => "locations",
        }
    }

    /// Column holding the human label; medicines are named, the rest are typed.
    #[must_use]
    pub fn label_column(self) -> &'static str {
        match self {
            Self::Medicine => "name",
            _ => "type",
        }
    }

    #[must_use]
    pub fn color(self) -> &'static str {
        match self {
            Self::Trigger => "#FF8A65",
            Self::Medicine => "#4FC3F7",
            Self::Relief => "#81C784",
            Self::Activity => "#BA68C8",
            Self::Location => "#FFD54F",
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Medicine => "medicine",
            Self::Relief => "relief",
            Self::Activity => "activity",
            Self::Location => "location",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let lower = s.to_lowercase();
        EVENT_CATEGORIES
            .iter()
            .copied()
            .find(|c| c.as_str() == lower || c.table() == lower)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Invalid event category '{s}'. Must be one of: {}",
                    EVENT_CATEGORIES
                        .iter()
                        .map(|c| c.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggedEvent {
    pub id: String,
    pub category: EventCategory,
    pub label: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub migraine_id: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

impl LoggedEvent {
    #[must_use]
    pub fn is_automated(&self) -> bool {
        self.source
            .as_deref()
            .is_some_and(|s| !s.is_empty() && !s.eq_ignore_ascii_case("manual"))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventMarker {
    pub id: String,
    pub category: EventCategory,
    pub label: String,
    pub occurred_at: DateTime<Utc>,
    pub color: String,
    pub automated: bool,
}

impl From<&LoggedEvent> for EventMarker {
    fn from(e: &LoggedEvent) -> Self {
        Self {
            id: e.id.clone(),
            category: e.category,
            label: e.label.clone(),
            occurred_at: e.occurred_at,
            color: e.category.color().to_string(),
            automated: e.is_automated(),
        }
    }
}

// --- Daily metrics ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricSeries {
    pub metric: String,
    pub points: Vec<MetricPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSetting {
    pub metric: String,
    #[serde(default)]
    pub enabled: bool,
}

// --- Cities / weather ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub country: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherDaily {
    pub date: NaiveDate,
    #[serde(default)]
    pub city_id: Option<i64>,
    #[serde(default)]
    pub temp_c_mean: Option<f64>,
    #[serde(default)]
    pub pressure_hpa_mean: Option<f64>,
    #[serde(default)]
    pub humidity_pct_mean: Option<f64>,
    #[serde(default)]
    pub wind_speed_mps_mean: Option<f64>,
    #[serde(default)]
    pub uv_index_max: Option<f64>,
    #[serde(default)]
    pub source: Option<String>,
}

// --- Nutrition ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutritionRecord {
    pub external_id: String,
    pub timestamp: DateTime<Utc>,
    pub food_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meal_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grams: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calories: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protein_g: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carbs_g: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fat_g: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sugar_g: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiber_g: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sodium_mg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caffeine_mg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl NutritionRecord {
    #[must_use]
    pub fn needs_enrichment(&self) -> bool {
        self.calories.is_none()
            || self.protein_g.is_none()
            || self.carbs_g.is_none()
            || self.fat_g.is_none()
    }
}

pub fn validate_nutrition_record(record: &NutritionRecord) -> Result<()> {
    if record.external_id.trim().is_empty() {
        bail!("Nutrition record id must not be empty");
    }
    if record.food_name.trim().is_empty() {
        bail!("Food name must not be empty");
    }
    if record.grams.is_some_and(|g| g <= 0.0) {
        bail!("grams must be greater than 0");
    }
    for (name, value) in [
        ("calories", record.calories),
        ("protein_g", record.protein_g),
        ("carbs_g", record.carbs_g),
        ("fat_g", record.fat_g),
        ("caffeine_mg", record.caffeine_mg),
    ] {
        if value.is_some_and(|v| v < 0.0) {
            bail!("{name} must not be negative");
        }
    }
    Ok(())
}

/// Nutrients per 100 g, as returned by a food lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[allow(clippy::struct_field_names)]
pub struct NutrientProfile {
    pub description: String,
    pub calories_per_100g: f64,
    pub protein_per_100g: Option<f64>,
    pub carbs_per_100g: Option<f64>,
    pub fat_per_100g: Option<f64>,
    pub sugar_per_100g: Option<f64>,
    pub fiber_per_100g: Option<f64>,
    pub sodium_mg_per_100g: Option<f64>,
    pub caffeine_mg_per_100g: Option<f64>,
}

// --- Outbox ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxOp {
    Upsert,
    Delete,
}

impl OutboxOp {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "upsert" => Ok(Self::Upsert),
            "delete" => Ok(Self::Delete),
            other => bail!("Unknown outbox operation '{other}'"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboxItem {
    pub id: i64,
    pub operation: OutboxOp,
    pub entity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    pub retry_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: String,
}

// --- Session / flags ---

/// Bearer session handed explicitly to the service and workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Tokens this close to expiry are treated as already expired.
pub const SESSION_EXPIRY_SKEW_SECS: i64 = 60;

impl Session {
    #[must_use]
    pub fn valid_token(&self, now: DateTime<Utc>) -> Option<&str> {
        if self.access_token.is_empty() {
            return None;
        }
        match self.expires_at {
            Some(exp) if exp - Duration::seconds(SESSION_EXPIRY_SKEW_SECS) <= now => None,
            _ => Some(&self.access_token),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default)]
    pub premium: bool,
}
