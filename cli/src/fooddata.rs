use std::time::Duration;

use anyhow::{Context, Result};

use aura_core::fooddata::{SearchResponse, best_profile};
use aura_core::models::NutrientProfile;
use aura_core::service::FoodDataProvider;

const DEFAULT_BASE_URL: &str = "https://api.nal.usda.gov";
const PAGE_SIZE: &str = "5";

/// USDA FoodData Central search client.
pub struct FoodDataClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    rt: tokio::runtime::Handle,
}

impl FoodDataClient {
    pub fn new(api_key: &str) -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: &str, api_key: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!(
                "aura-cli/{} (migraine tracker)",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            rt: tokio::runtime::Handle::try_current().context("No async runtime available")?,
        })
    }

    pub async fn search_async(&self, query: &str) -> Result<Option<NutrientProfile>> {
        let resp = self
            .client
            .get(format!("{}/fdc/v1/foods/search", self.base_url))
            .query(&[
                ("query", query),
                ("pageSize", PAGE_SIZE),
                ("api_key", self.api_key.as_str()),
            ])
            .send()
            .await
            .context("Failed to reach FoodData Central")?
            .error_for_status()
            .context("FoodData Central rejected the search")?;

        let data: SearchResponse = resp
            .json()
            .await
            .context("Failed to parse FoodData Central search response")?;

        Ok(best_profile(&data))
    }
}

impl FoodDataProvider for FoodDataClient {
    fn search(&self, query: &str) -> Result<Option<NutrientProfile>> {
        tokio::task::block_in_place(|| self.rt.block_on(self.search_async(query)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::routing::get;
    use std::collections::HashMap;

    async fn fake_search(Query(params): Query<HashMap<String, String>>) -> (StatusCode, String) {
        if params.get("api_key").map(String::as_str) != Some("key-1") {
            return (StatusCode::FORBIDDEN, r#"{"error":"bad key"}"#.to_string());
        }
        let body = match params.get("query").map(String::as_str) {
            Some("cola") => {
                r#"{"foods":[{"fdcId":1,"description":"Cola","foodNutrients":[
                    {"nutrientNumber":"208","unitName":"KCAL","value":42.0},
                    {"nutrientNumber":"262","unitName":"MG","value":10.0}]}]}"#
            }
            _ => r#"{"foods":[]}"#,
        };
        (StatusCode::OK, body.to_string())
    }

    async fn spawn_fake() -> String {
        let app = Router::new().route("/fdc/v1/foods/search", get(fake_search));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_search_maps_best_profile() {
        let url = spawn_fake().await;
        let client = FoodDataClient::with_base_url(&url, "key-1").unwrap();
        let profile = client.search_async("cola").await.unwrap().unwrap();
        assert_eq!(profile.description, "Cola");
        assert_eq!(profile.caffeine_mg_per_100g, Some(10.0));

        assert!(client.search_async("unobtainium").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rejected_key_is_error() {
        let url = spawn_fake().await;
        let client = FoodDataClient::with_base_url(&url, "wrong").unwrap();
        assert!(client.search_async("cola").await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_provider_blocks_inside_runtime() {
        let url = spawn_fake().await;
        let client = FoodDataClient::with_base_url(&url, "key-1").unwrap();
        let provider: &dyn FoodDataProvider = &client;
        assert!(provider.search("cola").unwrap().is_some());
    }

    // --- Integration tests (hit the real FoodData Central API) ---

    #[tokio::test(flavor = "multi_thread")]
    #[ignore = "hits FoodData Central API"]
    async fn test_search_known_food() {
        let client = FoodDataClient::new("DEMO_KEY").unwrap();
        let profile = client
            .search_async("espresso")
            .await
            .unwrap()
            .expect("espresso should be in FoodData Central");
        assert!(profile.calories_per_100g >= 0.0);
    }
}
