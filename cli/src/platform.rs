//! Desktop stand-ins for the phone sensors and feeds the workers read.
//!
//! Each one is fed from a file or a command-line flag; a missing input
//! reports as missing permission so the matching worker skips quietly.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use aura_core::location::{Coordinates, LocationProvider};
use aura_core::models::NutritionRecord;
use aura_core::noise::NoiseMeter;
use aura_core::nutrition::{ChangeBatch, NutritionChange, NutritionSource};
use aura_core::screen_time::{UsageInterval, UsageStatsProvider};

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// Foreground intervals exported as a JSON array of `{package, start, end}`.
pub struct FileUsageStats {
    path: Option<PathBuf>,
}

impl FileUsageStats {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl UsageStatsProvider for FileUsageStats {
    fn has_permission(&self) -> bool {
        self.path.as_deref().is_some_and(Path::exists)
    }

    fn intervals(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<UsageInterval>> {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };
        let all: Vec<UsageInterval> = read_json(path)?;
        Ok(all
            .into_iter()
            .filter(|i| i.end > start && i.start < end)
            .collect())
    }
}

/// Fixed position from `--lat/--lon`.
pub struct StaticLocation {
    coords: Option<Coordinates>,
}

impl StaticLocation {
    pub fn new(lat: Option<f64>, lon: Option<f64>) -> Self {
        let coords = lat.zip(lon).map(|(latitude, longitude)| Coordinates {
            latitude,
            longitude,
        });
        Self { coords }
    }
}

impl LocationProvider for StaticLocation {
    fn has_permission(&self) -> bool {
        self.coords.is_some()
    }

    fn current_location(&self) -> Result<Option<Coordinates>> {
        Ok(self.coords)
    }
}

/// Pre-recorded sound levels in dB.
pub struct StaticNoise {
    samples: Vec<f64>,
}

impl StaticNoise {
    pub fn new(samples: Vec<f64>) -> Self {
        Self { samples }
    }
}

impl NoiseMeter for StaticNoise {
    fn has_permission(&self) -> bool {
        !self.samples.is_empty()
    }

    fn sample(&self, n: usize) -> Result<Vec<f64>> {
        Ok(self.samples.iter().copied().take(n).collect())
    }
}

#[derive(Debug, Default, Deserialize)]
struct FeedFile {
    #[serde(default)]
    records: Vec<NutritionRecord>,
    #[serde(default)]
    deleted: Vec<DeletedEntry>,
}

#[derive(Debug, Deserialize)]
struct DeletedEntry {
    external_id: String,
    at: DateTime<Utc>,
}

/// Nutrition change feed from a JSON export.
///
/// The change token is the newest timestamp already handed out, so each
/// call only returns entries after it.
pub struct FileNutritionFeed {
    path: Option<PathBuf>,
}

impl FileNutritionFeed {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl NutritionSource for FileNutritionFeed {
    fn has_permission(&self) -> bool {
        self.path.as_deref().is_some_and(Path::exists)
    }

    fn changes_since(&self, token: Option<&str>) -> Result<ChangeBatch> {
        let feed: FeedFile = match &self.path {
            Some(path) => read_json(path)?,
            None => FeedFile::default(),
        };
        // An unreadable token restarts the feed from the beginning
        let since = token
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc));
        let is_new = |at: DateTime<Utc>| since.is_none_or(|s| at > s);

        let mut entries: Vec<(DateTime<Utc>, NutritionChange)> = feed
            .records
            .into_iter()
            .filter(|r| is_new(r.timestamp))
            .map(|r| (r.timestamp, NutritionChange::Upserted(r)))
            .chain(
                feed.deleted
                    .into_iter()
                    .filter(|d| is_new(d.at))
                    .map(|d| (d.at, NutritionChange::Deleted(d.external_id))),
            )
            .collect();
        entries.sort_by_key(|(at, _)| *at);

        let newest = entries.last().map(|(at, _)| *at).or(since);
        Ok(ChangeBatch {
            changes: entries.into_iter().map(|(_, c)| c).collect(),
            next_token: newest.map(|t| t.to_rfc3339()).unwrap_or_default(),
        })
    }
}
