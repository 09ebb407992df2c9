//! The single-attempt API client. It issues exactly one GET per call and
//! turns every outcome into either a parsed [`ApiResponse`] or a classified
//! [`FetchError`]; retrying is left to [`crate::Fetcher`].

use crate::http::error::FetchError;
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openaq.org/v3";
const API_KEY_HEADER: &str = "X-API-Key";
const USER_AGENT: &str = concat!("openaq_ingest/", env!("CARGO_PKG_VERSION"));

/// Query parameters of one request. Values are pre-rendered to strings.
pub type QueryParams = BTreeMap<String, String>;

/// The envelope every OpenAQ v3 list endpoint returns.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiResponse {
    /// The records of this page. A missing or `null` list reads as empty.
    #[serde(default, deserialize_with = "null_as_default")]
    pub results: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub meta: ResponseMeta,
}

/// Paging metadata sent alongside the results.
///
/// `found` is either a number or a string such as `">1000"`, so it is kept raw.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseMeta {
    pub name: Option<String>,
    pub found: Option<Value>,
}

impl ApiResponse {
    pub fn with_results(results: Vec<Value>) -> Self {
        Self {
            results,
            meta: ResponseMeta::default(),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// One GET against the API, classified into success or a [`FetchError`].
#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn get(&self, endpoint: &str, params: &QueryParams) -> Result<ApiResponse, FetchError>;
}

#[async_trait]
impl<T: ApiClient + ?Sized> ApiClient for Arc<T> {
    async fn get(&self, endpoint: &str, params: &QueryParams) -> Result<ApiResponse, FetchError> {
        (**self).get(endpoint, params).await
    }
}

/// [`ApiClient`] backed by `reqwest`, talking to the real OpenAQ service.
pub struct OpenAqClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl OpenAqClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn url_for(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }
}

#[async_trait]
impl ApiClient for OpenAqClient {
    async fn get(&self, endpoint: &str, params: &QueryParams) -> Result<ApiResponse, FetchError> {
        let url = self.url_for(endpoint);
        debug!("GET {} {:?}", url, params);

        let response = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .query(params)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url.clone(), &e))?;

        let status = response.status();
        if !status.is_success() {
            warn!("HTTP {} for {}", status, url);
            return Err(FetchError::from_status(url, status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(url.clone(), &e))?;

        serde_json::from_slice::<ApiResponse>(&body).map_err(|e| FetchError::MalformedResponse {
            url,
            message: e.to_string(),
        })
    }
}
