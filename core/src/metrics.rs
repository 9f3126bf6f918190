/// A tracked daily metric and where its values live remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDef {
    pub key: &'static str,
    pub label: &'static str,
    pub table: &'static str,
    pub column: &'static str,
    pub unit: &'static str,
}

pub const METRICS: &[MetricDef] = &[
    MetricDef {
        key: "pressure",
        label: "Pressure",
        table: "user_weather_daily",
        column: "pressure_hpa_mean",
        unit: "hPa",
    },
    MetricDef {
        key: "temperature",
        label: "Temperature",
        table: "user_weather_daily",
        column: "temp_c_mean",
        unit: "°C",
    },
    MetricDef {
        key: "humidity",
        label: "Humidity",
        table: "user_weather_daily",
        column: "humidity_pct_mean",
        unit: "%",
    },
    MetricDef {
        key: "hrv",
        label: "HRV",
        table: "hrv_daily",
        column: "value_rmssd_ms",
        unit: "ms",
    },
    MetricDef {
        key: "resting_hr",
        label: "Resting HR",
        table: "resting_hr_daily",
        column: "value_bpm",
        unit: "bpm",
    },
    MetricDef {
        key: "sleep_duration",
        label: "Sleep Duration",
        table: "sleep_duration_daily",
        column: "value_hours",
        unit: "h",
    },
    MetricDef {
        key: "sleep_score",
        label: "Sleep Score",
        table: "sleep_score_daily",
        column: "value_pct",
        unit: "%",
    },
    MetricDef {
        key: "recovery",
        label: "Recovery",
        table: "recovery_score_daily",
        column: "value_pct",
        unit: "%",
    },
    MetricDef {
        key: "spo2",
        label: "SpO2",
        table: "spo2_daily",
        column: "value_pct",
        unit: "%",
    },
    MetricDef {
        key: "skin_temp",
        label: "Skin Temp",
        table: "skin_temp_daily",
        column: "value_celsius",
        unit: "°C",
    },
    MetricDef {
        key: "steps",
        label: "Steps",
        table: "steps_daily",
        column: "value_count",
        unit: "steps",
    },
    MetricDef {
        key: "screen_time",
        label: "Screen Time",
        table: "screen_time_daily",
        column: "total_hours",
        unit: "h",
    },
    MetricDef {
        key: "screen_time_late_night",
        label: "Late-Night Screen Time",
        table: "screen_time_late_night",
        column: "value_hours",
        unit: "h",
    },
    MetricDef {
        key: "ambient_noise",
        label: "Ambient Noise",
        table: "ambient_noise_index_daily",
        column: "day_mean_lmean",
        unit: "dB",
    },
    MetricDef {
        key: "caffeine",
        label: "Caffeine",
        table: "nutrition_daily",
        column: "caffeine_mg",
        unit: "mg",
    },
    MetricDef {
        key: "calories",
        label: "Calories",
        table: "nutrition_daily",
        column: "calories",
        unit: "kcal",
    },
];

#[must_use]
pub fn metric_def(key: &str) -> Option<&'static MetricDef> {
    METRICS.iter().find(|m| m.key == key)
}

/// Automated event labels and the metrics that explain them.
pub const LABEL_METRIC_LINKS: &[(&str, &[&str])] = &[
    ("Low HRV", &["hrv"]),
    ("High resting HR", &["resting_hr"]),
    ("Short sleep", &["sleep_duration"]),
    ("Poor sleep", &["sleep_duration", "sleep_score"]),
    ("Low recovery", &["recovery", "hrv"]),
    ("Low SpO2", &["spo2"]),
    ("Skin temp deviation", &["skin_temp"]),
    ("Pressure drop", &["pressure"]),
    ("Pressure rise", &["pressure"]),
    ("Heat", &["temperature"]),
    ("High humidity", &["humidity"]),
    ("High screen time", &["screen_time"]),
    ("Late-night screen time", &["screen_time_late_night"]),
    ("Loud environment", &["ambient_noise"]),
    ("High caffeine", &["caffeine"]),
    ("Skipped meal", &["calories"]),
    ("Inactivity", &["steps"]),
];

/// Metrics linked to an event label; case-insensitive, unknown labels link nothing.
#[must_use]
pub fn metrics_for_label(label: &str) -> &'static [&'static str] {
    let trimmed = label.trim();
    LABEL_METRIC_LINKS
        .iter()
        .find(|(l, _)| l.eq_ignore_ascii_case(trimmed))
        .map(|(_, metrics)| *metrics)
        .unwrap_or(&[])
}
