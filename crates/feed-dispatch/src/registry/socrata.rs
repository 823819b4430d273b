//! Socrata-backed feed registry
//!
//! Reads go through the SODA resource endpoint with system fields included so
//! that every row carries its `:id`. Writes are single-row upserts keyed on
//! `:id`, which Socrata treats as an update of the existing row.

use crate::registry::record::{FeedRecord, FeedUpdate, ID_COLUMN};
use crate::registry::FeedRegistry;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use feed_dispatch_common::{DispatchError, FeedId, Result};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

// ============================================================================
// Constants
// ============================================================================

/// Rows requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

const APP_TOKEN_HEADER: &str = "X-App-Token";

// ============================================================================
// Configuration
// ============================================================================

/// Credentials for the Socrata domain hosting the registry.
///
/// Deserialized from the `SOCRATA_PARAMS` JSON object.
#[derive(Clone, Deserialize)]
pub struct SocrataCredentials {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub app_token: Option<String>,
    /// Host name such as `data.transportation.gov`. A full `http(s)://` URL is
    /// used as given.
    pub domain: String,
}

impl std::fmt::Debug for SocrataCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocrataCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("app_token", &self.app_token.as_ref().map(|_| "<redacted>"))
            .field("domain", &self.domain)
            .finish()
    }
}

impl SocrataCredentials {
    fn base_url(&self) -> String {
        let domain = self.domain.trim().trim_end_matches('/');
        if domain.starts_with("http://") || domain.starts_with("https://") {
            domain.to_string()
        } else {
            format!("https://{domain}")
        }
    }
}

#[derive(Debug, Clone)]
pub struct SocrataConfig {
    pub credentials: SocrataCredentials,
    /// Four-by-four identifier of the registry dataset, e.g. `abcd-1234`.
    pub dataset_id: String,
    pub page_size: u32,
    pub timeout: Duration,
    /// Applied to reads only.
    pub retry: RetryPolicy,
}

impl SocrataConfig {
    pub fn new(credentials: SocrataCredentials, dataset_id: impl Into<String>) -> Self {
        Self {
            credentials,
            dataset_id: dataset_id.into(),
            page_size: DEFAULT_PAGE_SIZE,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// Upsert summary returned by the resource endpoint.
#[derive(Debug, Default, Deserialize)]
struct UpsertResponse {
    #[serde(rename = "Rows Updated", default)]
    rows_updated: u64,
    #[serde(rename = "Errors", default)]
    errors: u64,
}

pub struct SocrataRegistry {
    client: Client,
    resource_url: String,
    credentials: SocrataCredentials,
    page_size: u32,
    retry: RetryPolicy,
}

impl SocrataRegistry {
    pub fn new(config: SocrataConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DispatchError::config(format!("failed to build HTTP client: {e}")))?;

        let resource_url = format!(
            "{}/resource/{}.json",
            config.credentials.base_url(),
            config.dataset_id
        );

        Ok(Self {
            client,
            resource_url,
            credentials: config.credentials,
            page_size: config.page_size.max(1),
            retry: config.retry,
        })
    }

    pub fn resource_url(&self) -> &str {
        &self.resource_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request =
            request.basic_auth(&self.credentials.username, Some(&self.credentials.password));
        match &self.credentials.app_token {
            Some(token) => request.header(APP_TOKEN_HEADER, token),
            None => request,
        }
    }

    async fn fetch_page(&self, filter: Option<&str>, offset: u64) -> Result<Vec<Map<String, Value>>> {
        let mut query: Vec<(&str, String)> = vec![
            ("$$exclude_system_fields", "false".to_string()),
            ("$order", ID_COLUMN.to_string()),
            ("$limit", self.page_size.to_string()),
            ("$offset", offset.to_string()),
        ];
        if let Some(filter) = filter {
            query.push(("$where", filter.to_string()));
        }

        let response = self
            .authorize(self.client.get(&self.resource_url))
            .query(&query)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        response
            .json::<Vec<Map<String, Value>>>()
            .await
            .map_err(|e| DispatchError::RegistryRequest(format!("unexpected response body: {e}")))
    }
}

#[async_trait]
impl FeedRegistry for SocrataRegistry {
    #[instrument(skip(self), fields(resource = %self.resource_url))]
    async fn fetch(&self, filter: Option<&str>) -> Result<Vec<FeedRecord>> {
        let mut records = Vec::new();
        let mut offset: u64 = 0;

        loop {
            let (page, attempts) = self
                .retry
                .run("registry fetch", || self.fetch_page(filter, offset))
                .await;
            let page = page?;
            let page_len = page.len();
            debug!(offset, rows = page_len, attempts, "Fetched registry page");

            for row in page {
                match FeedRecord::from_row(row) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(error = %e, "Skipping registry row"),
                }
            }

            if page_len < self.page_size as usize {
                break;
            }
            offset += page_len as u64;
        }

        info!(records = records.len(), "Fetched feed registry");
        Ok(records)
    }

    #[instrument(skip(self, update), fields(feed_id = %id))]
    async fn update(&self, id: &FeedId, update: &FeedUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }

        let mut row = update.to_columns();
        row.insert(ID_COLUMN.into(), Value::String(id.to_string()));

        let response = self
            .authorize(self.client.post(&self.resource_url))
            .json(&[Value::Object(row)])
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(DispatchError::RecordNotFound(id.clone()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let summary: UpsertResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::RegistryRequest(format!("unexpected upsert response: {e}")))?;

        upsert_result(id, &summary)?;

        debug!("Registry row updated");
        Ok(())
    }
}

/// Nothing updated means the row is gone, even when Socrata also counts an error.
fn upsert_result(id: &FeedId, summary: &UpsertResponse) -> Result<()> {
    if summary.rows_updated == 0 {
        return Err(DispatchError::RecordNotFound(id.clone()));
    }
    if summary.errors > 0 {
        return Err(DispatchError::RegistryRequest(format!(
            "upsert of {id} reported {} error(s)",
            summary.errors
        )));
    }
    Ok(())
}

fn transport_error(e: reqwest::Error) -> DispatchError {
    if e.is_timeout() {
        DispatchError::unavailable(format!("request timed out: {e}"))
    } else {
        DispatchError::unavailable(e.to_string())
    }
}

fn classify_status(status: StatusCode, body: &str) -> DispatchError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", body.trim())
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DispatchError::RegistryAuth(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            DispatchError::RegistryUnavailable(detail)
        },
        s if s.is_server_error() => DispatchError::RegistryUnavailable(detail),
        _ => DispatchError::RegistryRequest(detail),
    }
}
