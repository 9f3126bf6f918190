use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use aura_core::models::Session;
use aura_core::postgrest::{
    PREFER_RETURN_MINIMAL, PREFER_RETURN_REPRESENTATION, PREFER_UPSERT, Query, RemoteError,
    RemoteStore, first_object,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Supabase PostgREST, RPC, Edge Function and password-auth endpoints.
pub struct SupabaseClient {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    rt: tokio::runtime::Handle,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    user: Option<TokenUser>,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
}

fn decode(body: &str) -> Result<Value> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|e| RemoteError::Decode(e.to_string()).into())
}

impl SupabaseClient {
    pub fn new(base_url: &str, anon_key: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!(
                "aura-cli/{} (migraine tracker)",
                env!("CARGO_PKG_VERSION")
            ))
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            rt: tokio::runtime::Handle::try_current().context("No async runtime available")?,
        })
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{path}", self.base_url)
    }

    /// `None` sends the anon key as the bearer.
    fn request(&self, method: Method, url: &str, token: Option<&str>) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(token.unwrap_or(&self.anon_key))
    }

    async fn send(&self, request: RequestBuilder) -> Result<String> {
        let resp = request.send().await.context("Failed to reach Supabase")?;
        let status = resp.status();
        let body = resp.text().await.context("Failed to read Supabase response")?;
        if !status.is_success() {
            debug!(status = status.as_u16(), "request failed");
            return Err(RemoteError::from_response(status.as_u16(), &body).into());
        }
        Ok(body)
    }

    pub async fn select_async(
        &self,
        token: Option<&str>,
        table: &str,
        query: &Query,
    ) -> Result<Vec<Value>> {
        let request = self
            .request(Method::GET, &self.rest_url(table), token)
            .query(&query.to_params());
        match decode(&self.send(request).await?)? {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            _ => Err(RemoteError::Decode(format!("expected an array of {table} rows")).into()),
        }
    }

    pub async fn upsert_async(
        &self,
        token: Option<&str>,
        table: &str,
        rows: &Value,
        on_conflict: Option<&str>,
    ) -> Result<()> {
        let mut request = self
            .request(Method::POST, &self.rest_url(table), token)
            .header("Prefer", PREFER_UPSERT)
            .json(rows);
        if let Some(columns) = on_conflict {
            request = request.query(&[("on_conflict", columns)]);
        }
        self.send(request).await?;
        Ok(())
    }

    pub async fn insert_async(&self, token: Option<&str>, table: &str, row: &Value) -> Result<Value> {
        let request = self
            .request(Method::POST, &self.rest_url(table), token)
            .header("Prefer", PREFER_RETURN_REPRESENTATION)
            .json(row);
        let body = decode(&self.send(request).await?)?;
        first_object(body)
            .ok_or_else(|| RemoteError::Decode(format!("empty insert response from {table}")).into())
    }

    pub async fn patch_async(
        &self,
        token: Option<&str>,
        table: &str,
        query: &Query,
        body: &Value,
    ) -> Result<()> {
        let request = self
            .request(Method::PATCH, &self.rest_url(table), token)
            .header("Prefer", PREFER_RETURN_MINIMAL)
            .query(query.filters())
            .json(body);
        self.send(request).await?;
        Ok(())
    }

    pub async fn delete_async(&self, token: Option<&str>, table: &str, query: &Query) -> Result<()> {
        if query.filters().is_empty() {
            anyhow::bail!("Refusing to delete from {table} without a filter");
        }
        let request = self
            .request(Method::DELETE, &self.rest_url(table), token)
            .header("Prefer", PREFER_RETURN_MINIMAL)
            .query(query.filters());
        self.send(request).await?;
        Ok(())
    }

    pub async fn rpc_async(&self, token: Option<&str>, name: &str, body: &Value) -> Result<Value> {
        let request = self
            .request(Method::POST, &self.rest_url(&format!("rpc/{name}")), token)
            .json(body);
        decode(&self.send(request).await?)
    }

    pub async fn invoke_async(&self, token: Option<&str>, name: &str, body: &Value) -> Result<Value> {
        let url = format!("{}/functions/v1/{name}", self.base_url);
        let request = self.request(Method::POST, &url, token).json(body);
        decode(&self.send(request).await?)
    }

    /// Email/password sign-in through GoTrue.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let url = format!("{}/auth/v1/token", self.base_url);
        let request = self
            .request(Method::POST, &url, None)
            .query(&[("grant_type", "password")])
            .json(&json!({"email": email, "password": password}));
        let body = self.send(request).await?;
        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| RemoteError::Decode(e.to_string()))
            .context("Unexpected sign-in response")?;
        Ok(Session {
            access_token: token.access_token,
            user_id: token.user.map(|u| u.id),
            expires_at: token
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        })
    }

    /// Run a request to completion from synchronous code on a runtime worker thread.
    fn block<F: Future>(&self, fut: F) -> F::Output {
        tokio::task::block_in_place(|| self.rt.block_on(fut))
    }
}

impl RemoteStore for SupabaseClient {
    fn select(&self, token: Option<&str>, table: &str, query: &Query) -> Result<Vec<Value>> {
        self.block(self.select_async(token, table, query))
    }

    fn upsert(
        &self,
        token: Option<&str>,
        table: &str,
        rows: &Value,
        on_conflict: Option<&str>,
    ) -> Result<()> {
        self.block(self.upsert_async(token, table, rows, on_conflict))
    }

    fn insert(&self, token: Option<&str>, table: &str, row: &Value) -> Result<Value> {
        self.block(self.insert_async(token, table, row))
    }

    fn patch(&self, token: Option<&str>, table: &str, query: &Query, body: &Value) -> Result<()> {
        self.block(self.patch_async(token, table, query, body))
    }

    fn delete(&self, token: Option<&str>, table: &str, query: &Query) -> Result<()> {
        self.block(self.delete_async(token, table, query))
    }

    fn rpc(&self, token: Option<&str>, name: &str, body: &Value) -> Result<Value> {
        self.block(self.rpc_async(token, name, body))
    }

    fn invoke(&self, token: Option<&str>, name: &str, body: &Value) -> Result<Value> {
        self.block(self.invoke_async(token, name, body))
    }
}

/// Stand-in used when no Supabase project is configured; every call fails.
pub struct Unconfigured;

impl Unconfigured {
    fn fail<T>() -> Result<T> {
        anyhow::bail!(
            "Supabase is not configured. Set AURA_SUPABASE_URL and AURA_SUPABASE_ANON_KEY or pass --supabase-url/--anon-key"
        )
    }
}

impl RemoteStore for Unconfigured {
    fn select(&self, _: Option<&str>, _: &str, _: &Query) -> Result<Vec<Value>> {
        Self::fail()
    }

    fn upsert(&self, _: Option<&str>, _: &str, _: &Value, _: Option<&str>) -> Result<()> {
        Self::fail()
    }

    fn insert(&self, _: Option<&str>, _: &str, _: &Value) -> Result<Value> {
        Self::fail()
    }

    fn patch(&self, _: Option<&str>, _: &str, _: &Query, _: &Value) -> Result<()> {
        Self::fail()
    }

    fn delete(&self, _: Option<&str>, _: &str, _: &Query) -> Result<()> {
        Self::fail()
    }

    fn rpc(&self, _: Option<&str>, _: &str, _: &Value) -> Result<Value> {
        Self::fail()
    }

    fn invoke(&self, _: Option<&str>, _: &str, _: &Value) -> Result<Value> {
        Self::fail()
    }
}
