use anyhow::{Context, Result, bail};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use std::io::{self, BufRead, Write};

use aura_core::screen_time::local_to_utc;

fn today(offset: &FixedOffset) -> NaiveDate {
    Utc::now().with_timezone(offset).date_naive()
}

pub(crate) fn parse_date(date_str: Option<&str>, offset: &FixedOffset) -> Result<NaiveDate> {
    match date_str {
        None | Some("today") => Ok(today(offset)),
        Some("yesterday") => Ok(today(offset) - chrono::Duration::days(1)),
        Some("tomorrow") => Ok(today(offset) + chrono::Duration::days(1)),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| {
            format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
        }),
    }
}

/// RFC 3339, or a local `YYYY-MM-DD HH:MM` / `YYYY-MM-DDTHH:MM`. `None` and "now" mean now.
pub(crate) fn parse_instant(s: Option<&str>, offset: &FixedOffset) -> Result<DateTime<Utc>> {
    let Some(s) = s.map(str::trim).filter(|s| *s != "now") else {
        return Ok(Utc::now());
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(local) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(local_to_utc(local, offset));
        }
    }
    bail!("Invalid time '{s}'. Use RFC 3339, 'YYYY-MM-DD HH:MM' or 'now'")
}

pub(crate) fn parse_offset(s: &str) -> Result<FixedOffset> {
    s.trim()
        .parse::<FixedOffset>()
        .with_context(|| format!("Invalid UTC offset '{s}'. Use e.g. +02:00 or -05:30"))
}

pub(crate) fn prompt_line(label: &str) -> Result<String> {
    eprint!("{label}: ");
    io::stderr().flush()?;
    let stdin = io::stdin();
    let line = stdin.lock().lines().next().context("No input")??;
    Ok(line.trim().to_string())
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

pub(crate) fn fmt_value(v: f64) -> String {
    let v = no_neg_zero(v);
    if v.fract() == 0.0 {
        format!("{v:.0}")
    } else {
        format!("{v:.2}")
    }
}

pub(crate) fn fmt_local(ts: DateTime<Utc>, offset: &FixedOffset) -> String {
    ts.with_timezone(offset).format("%Y-%m-%d %H:%M").to_string()
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
