use anyhow::Result;
use chrono::Utc;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use aura_core::reconcile::{DayRecord, Domain};
use aura_core::service::AuraService;

use super::helpers::{fmt_value, parse_date, print_json};

pub(crate) fn cmd_day_show(
    service: &AuraService,
    domain: &str,
    date: Option<&str>,
    json: bool,
) -> Result<()> {
    let domain = Domain::parse(domain)?;
    let date = parse_date(date, &service.offset())?;
    let record = service.day_record(domain, date, Utc::now())?;

    if json {
        print_json(&record)?;
    } else if record.values.is_empty() {
        eprintln!("No {domain:?} data for {date}");
    } else {
        print_day_table(&record);
    }
    Ok(())
}

fn print_day_table(record: &DayRecord) {
    #[derive(Tabled)]
    struct ValueRow {
        #[tabled(rename = "Metric")]
        metric: String,
        #[tabled(rename = "Value")]
        value: String,
        #[tabled(rename = "Source")]
        source: String,
        #[tabled(rename = "Manual entry")]
        manual: String,
    }

    let rows: Vec<ValueRow> = record
        .values
        .values()
        .map(|row| ValueRow {
            metric: row.metric.clone(),
            value: fmt_value(row.value),
            source: serde_json::to_value(&row.source)
                .ok()
                .and_then(|v| v.as_str().map(ToString::to_string))
                .unwrap_or_else(|| "other".to_string()),
            // Also flagged when a device row won
            manual: if record.manual_present.contains(&row.metric) {
                "yes".into()
            } else {
                String::new()
            },
        })
        .collect();

    println!("{} {:?}", record.date, record.domain);
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::single(1)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn cmd_day_set(
    service: &AuraService,
    domain: &str,
    metric: &str,
    value: f64,
    date: Option<&str>,
    json: bool,
) -> Result<()> {
    let domain = Domain::parse(domain)?;
    let date = parse_date(date, &service.offset())?;
    service.set_manual_value(domain, date, metric, value, Utc::now())?;

    if json {
        print_json(&serde_json::json!({
            "date": date,
            "metric": metric,
            "value": value,
            "source": "manual",
        }))?;
    } else {
        println!("Set {metric} = {} for {date} (manual)", fmt_value(value));
    }
    Ok(())
}

pub(crate) fn cmd_day_clear(
    service: &AuraService,
    domain: &str,
    metric: Option<&str>,
    date: Option<&str>,
    json: bool,
) -> Result<()> {
    let domain = Domain::parse(domain)?;
    let date = parse_date(date, &service.offset())?;
    service.delete_manual(domain, date, metric, Utc::now())?;

    if json {
        print_json(&serde_json::json!({ "date": date, "metric": metric, "cleared": true }))?;
    } else {
        match metric {
            Some(m) => println!("Cleared manual {m} for {date}"),
            None => println!("Cleared manual {domain:?} entries for {date}"),
        }
    }
    Ok(())
}
