//! Windowing of events and daily metrics around a selected migraine.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::metrics_for_label;
use crate::models::{EventMarker, LoggedEvent, MetricSeries, MigraineSpan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightWindow {
    pub before_days: u32,
    pub after_days: u32,
}

impl Default for InsightWindow {
    fn default() -> Self {
        Self {
            before_days: 2,
            after_days: 6,
        }
    }
}

/// Inclusive calendar-date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    #[must_use]
    pub fn new(a: NaiveDate, b: NaiveDate) -> Self {
        if a <= b {
            Self { start: a, end: b }
        } else {
            Self { start: b, end: a }
        }
    }

    #[must_use]
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.start
            .iter_days()
            .take_while(|d| *d <= self.end)
            .collect()
    }

    #[must_use]
    pub fn len_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    #[must_use]
    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    #[must_use]
    pub fn contains_instant(&self, ts: DateTime<Utc>, offset: &FixedOffset) -> bool {
        self.contains_date(local_date(ts, offset))
    }
}

#[must_use]
pub fn local_date(ts: DateTime<Utc>, offset: &FixedOffset) -> NaiveDate {
    ts.with_timezone(offset).date_naive()
}

#[must_use]
pub fn window_range(span: &MigraineSpan, window: InsightWindow, offset: &FixedOffset) -> DateRange {
    let start = local_date(span.start_at, offset) - Duration::days(i64::from(window.before_days));
    let end = local_date(span.effective_end(), offset) + Duration::days(i64::from(window.after_days));
    DateRange::new(start, end)
}

/// Markers for events whose local date falls inside `range`, oldest first.
#[must_use]
pub fn events_in_window(
    events: &[LoggedEvent],
    range: DateRange,
    offset: &FixedOffset,
) -> Vec<EventMarker> {
    let mut markers: Vec<EventMarker> = events
        .iter()
        .filter(|e| range.contains_instant(e.occurred_at, offset))
        .map(EventMarker::from)
        .collect();
    markers.sort_by_key(|m| m.occurred_at);
    markers
}

#[must_use]
pub fn clip_series(series: &[MetricSeries], range: DateRange) -> Vec<MetricSeries> {
    series
        .iter()
        .map(|s| {
            let mut points: Vec<_> = s
                .points
                .iter()
                .copied()
                .filter(|p| range.contains_date(p.date))
                .collect();
            points.sort_by_key(|p| p.date);
            MetricSeries {
                metric: s.metric.clone(),
                points,
            }
        })
        .collect()
}

/// Metric keys with at least one point in `range`, in input order.
#[must_use]
pub fn metrics_with_data(series: &[MetricSeries], range: DateRange) -> Vec<String> {
    series
        .iter()
        .filter(|s| s.points.iter().any(|p| range.contains_date(p.date)))
        .map(|s| s.metric.clone())
        .collect()
}

/// Metrics linked to an automated event in the window that also have data.
#[must_use]
pub fn auto_selected(events: &[EventMarker], available: &[String]) -> BTreeSet<String> {
    events
        .iter()
        .filter(|e| e.automated)
        .flat_map(|e| metrics_for_label(&e.label).iter())
        .filter(|m| available.iter().any(|a| a == *m))
        .map(|m| (*m).to_string())
        .collect()
}

/// User overrides layered over the auto-selected metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSelection {
    #[serde(default)]
    pub user_enabled: BTreeSet<String>,
    #[serde(default)]
    pub user_disabled: BTreeSet<String>,
}

impl MetricSelection {
    /// `(auto − user_disabled) ∪ user_enabled`
    #[must_use]
    pub fn enabled(&self, auto: &BTreeSet<String>) -> BTreeSet<String> {
        auto.difference(&self.user_disabled)
            .chain(self.user_enabled.iter())
            .cloned()
            .collect()
    }

    pub fn set_enabled(&mut self, metric: &str, on: bool) {
        if on {
            self.user_disabled.remove(metric);
            self.user_enabled.insert(metric.to_string());
        } else {
            self.user_enabled.remove(metric);
            self.user_disabled.insert(metric.to_string());
        }
    }

    /// Drop any override for `metric`, returning it to automatic selection.
    pub fn clear(&mut self, metric: &str) {
        self.user_enabled.remove(metric);
        self.user_disabled.remove(metric);
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InsightView {
    pub migraine: Option<MigraineSpan>,
    pub range: Option<DateRange>,
    pub dates: Vec<NaiveDate>,
    pub events: Vec<EventMarker>,
    pub available_metrics: Vec<String>,
    pub auto_metrics: BTreeSet<String>,
    pub enabled_metrics: BTreeSet<String>,
    pub series: Vec<MetricSeries>,
}

/// The requested migraine, or the most recent one when `id` is absent or unknown.
#[must_use]
pub fn select_migraine<'a>(spans: &'a [MigraineSpan], id: Option<&str>) -> Option<&'a MigraineSpan> {
    id.and_then(|id| spans.iter().find(|s| s.id == id))
        .or_else(|| spans.iter().max_by_key(|s| s.start_at))
}

#[must_use]
pub fn build_insight(
    migraine: Option<&MigraineSpan>,
    window: InsightWindow,
    events: &[LoggedEvent],
    series: &[MetricSeries],
    selection: &MetricSelection,
    offset: &FixedOffset,
) -> InsightView {
    let Some(span) = migraine else {
        return InsightView::default();
    };

    let range = window_range(span, window, offset);
    let markers = events_in_window(events, range, offset);
    let available = metrics_with_data(series, range);
    let auto = auto_selected(&markers, &available);
    let enabled = selection.enabled(&auto);
    let clipped = clip_series(series, range)
        .into_iter()
        .filter(|s| !s.points.is_empty())
        .collect();

    InsightView {
        migraine: Some(span.clone()),
        range: Some(range),
        dates: range.dates(),
        events: markers,
        available_metrics: available,
        auto_metrics: auto,
        enabled_metrics: enabled,
        series: clipped,
    }
}
