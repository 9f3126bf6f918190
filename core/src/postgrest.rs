//! PostgREST request conventions and the remote data seam.
//!
//! Filters and ordering travel as query parameters (`date=gte.2024-01-01`,
//! `order=date.desc`), upserts carry a `Prefer` header, and the hosted
//! database is reached only through [`RemoteStore`].

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// A PostgREST query: select list, filters, ordering and limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    select: Option<String>,
    filters: Vec<(String, String)>,
    order: Vec<(String, Direction)>,
    limit: Option<usize>,
}

impl Query {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn select(mut self, columns: &str) -> Self {
        self.select = Some(columns.to_string());
        self
    }

    fn filter(mut self, column: &str, op: &str, value: impl ToString) -> Self {
        self.filters
            .push((column.to_string(), format!("{op}.{}", value.to_string())));
        self
    }

    #[must_use]
    pub fn eq(self, column: &str, value: impl ToString) -> Self {
        self.filter(column, "eq", value)
    }

    #[must_use]
    pub fn neq(self, column: &str, value: impl ToString) -> Self {
        self.filter(column, "neq", value)
    }

    #[must_use]
    pub fn gte(self, column: &str, value: impl ToString) -> Self {
        self.filter(column, "gte", value)
    }

    #[must_use]
    pub fn lte(self, column: &str, value: impl ToString) -> Self {
        self.filter(column, "lte", value)
    }

    #[must_use]
    pub fn is_null(self, column: &str) -> Self {
        self.filter(column, "is", "null")
    }

    #[must_use]
    pub fn in_list<S: AsRef<str>>(self, column: &str, values: &[S]) -> Self {
        let quoted: Vec<String> = values
            .iter()
            .map(|v| {
                let v = v.as_ref();
                if v.contains(',') || v.contains('"') {
                    format!("\"{}\"", v.replace('"', "\\\""))
                } else {
                    v.to_string()
                }
            })
            .collect();
        self.filter(column, "in", format!("({})", quoted.join(",")))
    }

    #[must_use]
    pub fn order(mut self, column: &str, direction: Direction) -> Self {
        self.order.push((column.to_string(), direction));
        self
    }

    #[must_use]
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    #[must_use]
    pub fn filters(&self) -> &[(String, String)] {
        &self.filters
    }

    #[must_use]
    pub fn ordering(&self) -> &[(String, Direction)] {
        &self.order
    }

    #[must_use]
    pub fn row_limit(&self) -> Option<usize> {
        self.limit
    }

    /// Render as URL query parameters in PostgREST syntax.
    #[must_use]
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::with_capacity(self.filters.len() + 3);
        params.push((
            "select".to_string(),
            self.select.clone().unwrap_or_else(|| "*".to_string()),
        ));
        params.extend(self.filters.iter().cloned());
        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|(col, dir)| match dir {
                    Direction::Asc => format!("{col}.asc"),
                    Direction::Desc => format!("{col}.desc"),
                })
                .collect::<Vec<_>>()
                .join(",");
            params.push(("order".to_string(), order));
        }
        if let Some(n) = self.limit {
            params.push(("limit".to_string(), n.to_string()));
        }
        params
    }
}

// --- Prefer header values ---

pub const PREFER_RETURN_MINIMAL: &str = "return=minimal";
pub const PREFER_RETURN_REPRESENTATION: &str = "return=representation";
pub const PREFER_UPSERT: &str = "resolution=merge-duplicates,return=minimal";

/// Any failure at the HTTP boundary.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("{message}")]
    Status { status: u16, message: String },
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl RemoteError {
    #[must_use]
    pub fn from_response(status: u16, body: &str) -> Self {
        Self::Status {
            status,
            message: extract_error_message(status, body),
        }
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Decode(_) => None,
        }
    }
}

/// Best-effort human message from an error body, falling back to `HTTP {code}`.
#[must_use]
pub fn extract_error_message(status: u16, body: &str) -> String {
    let trimmed = body.trim();
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
        for key in ["message", "error_description", "error", "msg", "hint"] {
            if let Some(Value::String(s)) = map.get(key) {
                if !s.trim().is_empty() {
                    return s.trim().to_string();
                }
            }
        }
    }
    if trimmed.is_empty() || trimmed.starts_with('{') || trimmed.starts_with('<') {
        format!("HTTP {status}")
    } else {
        trimmed.to_string()
    }
}

/// Hosted database reached over REST.
///
/// `token` is the user's bearer token; `None` means the request is sent
/// with the anon key only. Implementations do no caching and no retries.
pub trait RemoteStore: Send + Sync {
    fn select(&self, token: Option<&str>, table: &str, query: &Query) -> Result<Vec<Value>>;

    /// Insert-or-update `rows` (an object or array) keyed by `on_conflict`.
    fn upsert(
        &self,
        token: Option<&str>,
        table: &str,
        rows: &Value,
        on_conflict: Option<&str>,
    ) -> Result<()>;

    /// Insert one row and return its representation.
    fn insert(&self, token: Option<&str>, table: &str, row: &Value) -> Result<Value>;

    fn patch(&self, token: Option<&str>, table: &str, query: &Query, body: &Value) -> Result<()>;

    fn delete(&self, token: Option<&str>, table: &str, query: &Query) -> Result<()>;

    /// `POST /rest/v1/rpc/<name>`.
    fn rpc(&self, token: Option<&str>, name: &str, body: &Value) -> Result<Value>;

    /// `POST /functions/v1/<name>`.
    fn invoke(&self, token: Option<&str>, name: &str, body: &Value) -> Result<Value>;
}

impl<T: RemoteStore + ?Sized> RemoteStore for std::sync::Arc<T> {
    fn select(&self, token: Option<&str>, table: &str, query: &Query) -> Result<Vec<Value>> {
        (**self).select(token, table, query)
    }

    fn upsert(
        &self,
        token: Option<&str>,
        table: &str,
        rows: &Value,
        on_conflict: Option<&str>,
    ) -> Result<()> {
        (**self).upsert(token, table, rows, on_conflict)
    }

    fn insert(&self, token: Option<&str>, table: &str, row: &Value) -> Result<Value> {
        (**self).insert(token, table, row)
    }

    fn patch(&self, token: Option<&str>, table: &str, query: &Query, body: &Value) -> Result<()> {
        (**self).patch(token, table, query, body)
    }

    fn delete(&self, token: Option<&str>, table: &str, query: &Query) -> Result<()> {
        (**self).delete(token, table, query)
    }

    fn rpc(&self, token: Option<&str>, name: &str, body: &Value) -> Result<Value> {
        (**self).rpc(token, name, body)
    }

    fn invoke(&self, token: Option<&str>, name: &str, body: &Value) -> Result<Value> {
        (**self).invoke(token, name, body)
    }
}

pub fn fetch<T: DeserializeOwned>(
    store: &dyn RemoteStore,
    token: Option<&str>,
    table: &str,
    query: &Query,
) -> Result<Vec<T>> {
    store
        .select(token, table, query)?
        .into_iter()
        .map(|row| {
            serde_json::from_value(row).with_context(|| format!("Failed to decode {table} row"))
        })
        .collect()
}

/// RPC and function responses come back either as an object or a one-element array.
#[must_use]
pub fn first_object(value: Value) -> Option<Value> {
    match value {
        Value::Array(items) => items.into_iter().find(Value::is_object),
        Value::Object(_) => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_params() {
        let q = Query::new()
            .select("date,value")
            .gte("date", "2024-01-01")
            .lte("date", "2024-01-31")
            .eq("source", "manual")
            .order("date", Direction::Desc)
            .limit(10);
        let params = q.to_params();
        assert_eq!(
            params,
            vec![
                ("select".to_string(), "date,value".to_string()),
                ("date".to_string(), "gte.2024-01-01".to_string()),
                ("date".to_string(), "lte.2024-01-31".to_string()),
                ("source".to_string(), "eq.manual".to_string()),
                ("order".to_string(), "date.desc".to_string()),
                ("limit".to_string(), "10".to_string()),
            ]
        );
    }

    #[test]
    fn test_query_defaults_to_select_star() {
        let params = Query::new().to_params();
        assert_eq!(params, vec![("select".to_string(), "*".to_string())]);
    }

    #[test]
    fn test_in_list_quotes_commas() {
        let q = Query::new().in_list("type", &["Stress", "Bright, flashing light"]);
        assert_eq!(
            q.filters()[0].1,
            "in.(Stress,\"Bright, flashing light\")".to_string()
        );
    }

    #[test]
    fn test_extract_error_message_prefers_message_field() {
        let body = r#"{"code":"42501","message":"permission denied for table triggers","hint":null}"#;
        assert_eq!(
            extract_error_message(403, body),
            "permission denied for table triggers"
        );
    }

    #[test]
    fn test_extract_error_message_auth_shape() {
        let body = r#"{"error":"invalid_grant","error_description":"Refresh token expired"}"#;
        assert_eq!(extract_error_message(400, body), "Refresh token expired");
    }

    #[test]
    fn test_extract_error_message_fallbacks() {
        assert_eq!(extract_error_message(502, ""), "HTTP 502");
        assert_eq!(extract_error_message(500, "{}"), "HTTP 500");
        assert_eq!(extract_error_message(503, "<html>busy</html>"), "HTTP 503");
        assert_eq!(extract_error_message(429, "slow down"), "slow down");
    }

    #[test]
    fn test_remote_error_status() {
        let err = RemoteError::from_response(404, "");
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "HTTP 404");
    }

    #[test]
    fn test_first_object() {
        assert_eq!(
            first_object(json!([{"id": 1}, {"id": 2}])),
            Some(json!({"id": 1}))
        );
        assert_eq!(first_object(json!({"id": 3})), Some(json!({"id": 3})));
        assert_eq!(first_object(json!([])), None);
        assert_eq!(first_object(json!(null)), None);
    }
}
