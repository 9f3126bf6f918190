use anyhow::{Context, Result};
use chrono::Utc;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use aura_core::insights::{InsightView, InsightWindow};
use aura_core::metrics::{METRICS, metric_def};
use aura_core::service::AuraService;

use super::helpers::{fmt_local, fmt_value, json_error, print_json, truncate};

pub(crate) fn cmd_insights(
    service: &AuraService,
    migraine_id: Option<&str>,
    window: InsightWindow,
    json: bool,
) -> Result<()> {
    let view = service.insights(migraine_id, window, Utc::now())?;

    let Some(span) = &view.migraine else {
        if json {
            println!("{}", json_error("No migraines logged"));
        } else {
            eprintln!("No migraines logged. Use `aura migraine log` to record one.");
        }
        return Ok(());
    };

    if json {
        return print_json(&view);
    }

    let offset = service.offset();
    println!(
        "Migraine {} ({}{})",
        span.id,
        fmt_local(span.start_at, &offset),
        span.end_at
            .map(|e| format!(" to {}", fmt_local(e, &offset)))
            .unwrap_or_default()
    );
    if let Some(range) = view.range {
        println!(
            "Window {} .. {} ({} days)",
            range.start,
            range.end,
            range.len_days()
        );
    }

    print_events(&view, &offset);
    print_metrics(&view);
    Ok(())
}

fn print_events(view: &InsightView, offset: &chrono::FixedOffset) {
    if view.events.is_empty() {
        println!("\nNo events in this window.");
        return;
    }

    #[derive(Tabled)]
    struct EventRow {
        #[tabled(rename = "When")]
        when: String,
        #[tabled(rename = "Category")]
        category: String,
        #[tabled(rename = "Label")]
        label: String,
        #[tabled(rename = "Auto")]
        automated: String,
    }

    let rows: Vec<EventRow> = view
        .events
        .iter()
        .map(|e| EventRow {
            when: fmt_local(e.occurred_at, offset),
            category: e.category.as_str().to_string(),
            label: truncate(&e.label, 30),
            automated: if e.automated { "yes".into() } else { String::new() },
        })
        .collect();
    println!("\n{}", Table::new(&rows).with(Style::rounded()));
}

#[allow(clippy::cast_precision_loss)]
fn print_metrics(view: &InsightView) {
    if view.series.is_empty() {
        println!("\nNo metric data in this window.");
        return;
    }

    #[derive(Tabled)]
    struct MetricRow {
        #[tabled(rename = "Metric")]
        metric: String,
        #[tabled(rename = "Days")]
        days: usize,
        #[tabled(rename = "Min")]
        min: String,
        #[tabled(rename = "Mean")]
        mean: String,
        #[tabled(rename = "Max")]
        max: String,
        #[tabled(rename = "Shown")]
        shown: String,
    }

    let rows: Vec<MetricRow> = view
        .series
        .iter()
        .map(|s| {
            let values: Vec<f64> = s.points.iter().map(|p| p.value).collect();
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mean = values.iter().sum::<f64>() / values.len().max(1) as f64;
            let label = metric_def(&s.metric).map_or(s.metric.clone(), |d| {
                format!("{} ({})", d.label, d.unit)
            });
            let shown = match (
                view.enabled_metrics.contains(&s.metric),
                view.auto_metrics.contains(&s.metric),
            ) {
                (false, _) => "",
                (true, true) => "auto",
                (true, false) => "yes",
            };
            MetricRow {
                metric: label,
                days: values.len(),
                min: fmt_value(min),
                mean: fmt_value(mean),
                max: fmt_value(max),
                shown: shown.to_string(),
            }
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..5)).with(Alignment::right()))
        .to_string();
    println!("\n{table}");
}

pub(crate) fn cmd_metric_set(service: &AuraService, metric: &str, enabled: bool, json: bool) -> Result<()> {
    let selection = service.set_metric_override(metric, enabled)?;
    if json {
        print_json(&selection)?;
    } else {
        println!(
            "{} {metric} in insights",
            if enabled { "Showing" } else { "Hiding" }
        );
    }
    Ok(())
}

pub(crate) fn cmd_metric_reset(service: &AuraService, metric: &str, json: bool) -> Result<()> {
    metric_def(metric).with_context(|| format!("Unknown metric '{metric}'"))?;
    let selection = service.clear_metric_override(metric)?;
    if json {
        print_json(&selection)?;
    } else {
        println!("{metric} is back to automatic selection");
    }
    Ok(())
}

pub(crate) fn cmd_metric_list(service: &AuraService, json: bool) -> Result<()> {
    let selection = service.metric_selection()?;
    if json {
        return print_json(&selection);
    }

    #[derive(Tabled)]
    struct MetricRow {
        #[tabled(rename = "Key")]
        key: &'static str,
        #[tabled(rename = "Metric")]
        label: &'static str,
        #[tabled(rename = "Unit")]
        unit: &'static str,
        #[tabled(rename = "Override")]
        state: &'static str,
    }

    let rows: Vec<MetricRow> = METRICS
        .iter()
        .map(|d| MetricRow {
            key: d.key,
            label: d.label,
            unit: d.unit,
            state: if selection.user_enabled.contains(d.key) {
                "on"
            } else if selection.user_disabled.contains(d.key) {
                "off"
            } else {
                "auto"
            },
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

pub(crate) fn cmd_city(service: &AuraService, lat: f64, lon: f64, json: bool) -> Result<()> {
    let city = service.resolve_city(lat, lon, Utc::now())?;
    if json {
        print_json(&city)?;
    } else {
        match &city.country {
            Some(country) => println!("{}, {country} (id {})", city.name, city.id),
            None => println!("{} (id {})", city.name, city.id),
        }
    }
    Ok(())
}
