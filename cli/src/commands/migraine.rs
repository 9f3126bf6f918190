use anyhow::Result;
use chrono::{NaiveTime, Utc};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use aura_core::models::{EventCategory, MigraineSpan, NewMigraine};
use aura_core::screen_time::local_to_utc;
use aura_core::service::AuraService;

use super::helpers::{fmt_local, parse_date, parse_instant, print_json, truncate};

pub(crate) struct MigraineArgs {
    pub start: Option<String>,
    pub end: Option<String>,
    pub severity: Option<i64>,
    pub label: Option<String>,
    pub notes: Option<String>,
}

pub(crate) fn cmd_migraine_log(service: &AuraService, args: MigraineArgs, json: bool) -> Result<()> {
    let offset = service.offset();
    let start_at = parse_instant(args.start.as_deref(), &offset)?;
    let end_at = args
        .end
        .as_deref()
        .map(|e| parse_instant(Some(e), &offset))
        .transpose()?;

    let migraine = NewMigraine {
        start_at,
        end_at,
        severity: args.severity,
        label: args.label,
        notes: args.notes,
    };
    let span = service.log_migraine(&migraine, Utc::now())?;

    if json {
        print_json(&span)?;
    } else {
        println!(
            "Logged migraine {} starting {}",
            span.id,
            fmt_local(span.start_at, &offset)
        );
        if let Some(s) = span.severity {
            println!("  Severity: {s}/10");
        }
    }
    Ok(())
}

pub(crate) fn cmd_migraine_list(service: &AuraService, since: Option<&str>, json: bool) -> Result<()> {
    let offset = service.offset();
    let since = since
        .map(|s| parse_date(Some(s), &offset))
        .transpose()?
        .map(|d| local_to_utc(d.and_time(NaiveTime::MIN), &offset));
    let spans = service.list_migraines(since, Utc::now())?;

    if json {
        print_json(&spans)?;
    } else if spans.is_empty() {
        eprintln!("No migraines logged. Use `aura migraine log` to record one.");
    } else {
        print_migraine_table(&spans, &offset);
    }
    Ok(())
}

fn print_migraine_table(spans: &[MigraineSpan], offset: &chrono::FixedOffset) {
    #[derive(Tabled)]
    struct MigraineRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Start")]
        start: String,
        #[tabled(rename = "End")]
        end: String,
        #[tabled(rename = "Severity")]
        severity: String,
        #[tabled(rename = "Label")]
        label: String,
    }

    let rows: Vec<MigraineRow> = spans
        .iter()
        .map(|s| MigraineRow {
            id: truncate(&s.id, 12),
            start: fmt_local(s.start_at, offset),
            end: s.end_at.map_or("-".into(), |e| fmt_local(e, offset)),
            severity: s.severity.map_or("-".into(), |v| v.to_string()),
            label: s.label.as_deref().map(|l| truncate(l, 30)).unwrap_or_default(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::single(3)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn cmd_event_log(
    service: &AuraService,
    category: &str,
    label: &str,
    at: Option<&str>,
    migraine_id: Option<&str>,
    json: bool,
) -> Result<()> {
    let category = EventCategory::parse(category)?;
    let offset = service.offset();
    let at = parse_instant(at, &offset)?;
    let event = service.log_event(category, label, at, migraine_id, Utc::now())?;

    if json {
        print_json(&event)?;
    } else {
        println!(
            "Logged {} '{}' at {}",
            event.category.as_str(),
            event.label,
            fmt_local(event.occurred_at, &offset)
        );
    }
    Ok(())
}
