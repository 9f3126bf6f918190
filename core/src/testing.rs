//! In-memory [`RemoteStore`] used by unit tests.
//!
//! Understands the subset of PostgREST filters the crate emits so service
//! and worker tests can run against realistic row sets.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::Result;
use chrono::{DateTime, NaiveDate};
use serde_json::{Map, Value};

use crate::postgrest::{Direction, Query, RemoteError, RemoteStore};

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    rpc: Mutex<HashMap<String, Value>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    tokens: Mutex<Vec<Option<String>>>,
    next_id: Mutex<i64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_rpc(&self, name: &str, response: Value) {
        self.rpc.lock().unwrap().insert(name.to_string(), response);
    }

    /// Every call touching `table` (or rpc/function `name`) fails with a 500.
    pub fn fail_on(&self, table: &str) {
        self.failing.lock().unwrap().insert(table.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn tokens(&self) -> Vec<Option<String>> {
        self.tokens.lock().unwrap().clone()
    }

    fn enter(&self, verb: &str, table: &str, token: Option<&str>) -> Result<()> {
        self.calls.lock().unwrap().push(format!("{verb} {table}"));
        self.tokens
            .lock()
            .unwrap()
            .push(token.map(ToString::to_string));
        if self.failing.lock().unwrap().contains(table) {
            return Err(RemoteError::from_response(500, r#"{"message":"boom"}"#).into());
        }
        Ok(())
    }
}

fn field_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn compare_text(a: &str, b: &str) -> Ordering {
    if let (Ok(x), Ok(y)) = (a.parse::<f64>(), b.parse::<f64>()) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    if let (Ok(x), Ok(y)) = (
        DateTime::parse_from_rfc3339(a),
        DateTime::parse_from_rfc3339(b),
    ) {
        return x.cmp(&y);
    }
    if let (Ok(x), Ok(y)) = (
        NaiveDate::parse_from_str(a, "%Y-%m-%d"),
        NaiveDate::parse_from_str(b, "%Y-%m-%d"),
    ) {
        return x.cmp(&y);
    }
    a.cmp(b)
}

fn matches(row: &Value, query: &Query) -> bool {
    query.filters().iter().all(|(column, expr)| {
        let field = row.get(column).unwrap_or(&Value::Null);
        let (op, operand) = expr.split_once('.').unwrap_or((expr.as_str(), ""));
        let text = field_text(field);
        match op {
            "eq" => !field.is_null() && text == operand,
            "neq" => text != operand,
            "gte" => !field.is_null() && compare_text(&text, operand) != Ordering::Less,
            "lte" => !field.is_null() && compare_text(&text, operand) != Ordering::Greater,
            "is" => operand == "null" && field.is_null(),
            "in" => operand
                .trim_start_matches('(')
                .trim_end_matches(')')
                .split(',')
                .any(|v| v.trim_matches('"') == text),
            _ => false,
        }
    })
}

fn merge_into(target: &mut Value, patch: &Value) {
    if let (Value::Object(t), Value::Object(p)) = (target, patch) {
        for (k, v) in p {
            t.insert(k.clone(), v.clone());
        }
    }
}

impl RemoteStore for MemoryStore {
    fn select(&self, token: Option<&str>, table: &str, query: &Query) -> Result<Vec<Value>> {
        self.enter("select", table, token)?;
        let mut rows: Vec<Value> = self
            .rows(table)
            .into_iter()
            .filter(|r| matches(r, query))
            .collect();
        for (column, direction) in query.ordering().iter().rev() {
            rows.sort_by(|a, b| {
                let ord = compare_text(
                    &field_text(a.get(column).unwrap_or(&Value::Null)),
                    &field_text(b.get(column).unwrap_or(&Value::Null)),
                );
                match direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            });
        }
        if let Some(n) = query.row_limit() {
            rows.truncate(n);
        }
        Ok(rows)
    }

    fn upsert(
        &self,
        token: Option<&str>,
        table: &str,
        rows: &Value,
        on_conflict: Option<&str>,
    ) -> Result<()> {
        self.enter("upsert", table, token)?;
        let incoming = match rows {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        };
        let keys: Vec<&str> = on_conflict
            .map(|c| c.split(',').map(str::trim).collect())
            .unwrap_or_default();
        let mut tables = self.tables.lock().unwrap();
        let existing = tables.entry(table.to_string()).or_default();
        for row in incoming {
            let same_key = |r: &Value| {
                !keys.is_empty()
                    && keys.iter().all(|k| {
                        r.get(*k).unwrap_or(&Value::Null) == row.get(*k).unwrap_or(&Value::Null)
                    })
            };
            match existing.iter().position(same_key) {
                Some(i) => merge_into(&mut existing[i], &row),
                None => existing.push(row),
            }
        }
        Ok(())
    }

    fn insert(&self, token: Option<&str>, table: &str, row: &Value) -> Result<Value> {
        self.enter("insert", table, token)?;
        let mut row = row.clone();
        if let Value::Object(map) = &mut row {
            if !map.contains_key("id") {
                let mut next = self.next_id.lock().unwrap();
                *next += 1;
                map.insert("id".to_string(), Value::String(format!("row-{next}")));
            }
        }
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    fn patch(&self, token: Option<&str>, table: &str, query: &Query, body: &Value) -> Result<()> {
        self.enter("patch", table, token)?;
        let mut tables = self.tables.lock().unwrap();
        if let Some(rows) = tables.get_mut(table) {
            for row in rows.iter_mut().filter(|r| matches(r, query)) {
                merge_into(row, body);
            }
        }
        Ok(())
    }

    fn delete(&self, token: Option<&str>, table: &str, query: &Query) -> Result<()> {
        self.enter("delete", table, token)?;
        let mut tables = self.tables.lock().unwrap();
        if let Some(rows) = tables.get_mut(table) {
            rows.retain(|r| !matches(r, query));
        }
        Ok(())
    }

    fn rpc(&self, token: Option<&str>, name: &str, _body: &Value) -> Result<Value> {
        self.enter("rpc", name, token)?;
        self.rpc
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| RemoteError::from_response(404, "").into())
    }

    fn invoke(&self, token: Option<&str>, name: &str, _body: &Value) -> Result<Value> {
        self.enter("invoke", name, token)?;
        Ok(self
            .rpc
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new())))
    }
}
