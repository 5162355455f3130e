//! Remote table access
//!
//! [`RemoteTable`] is the seam the orchestrator talks to. [`HttpTableClient`]
//! speaks the DynamoDB JSON protocol over HTTPS with SigV4 signatures;
//! [`InMemoryTable`] keeps items in process for tests and offline runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::items::{AttributeValue, Item, CLOUD_ID, PROFILE_ID};
use crate::error::{Result, WorklogError};

pub const SERVICE: &str = "dynamodb";
pub const API_VERSION: &str = "DynamoDB_20120810";

/// Remote operations the client issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Query,
    PutItem,
    DescribeTable,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Query => "Query",
            Operation::PutItem => "PutItem",
            Operation::DescribeTable => "DescribeTable",
        }
    }

    /// `X-Amz-Target` header value
    pub fn target(&self) -> String {
        format!("{}.{}", API_VERSION, self.name())
    }
}

/// A partitioned remote table keyed by `(ProfileId, CloudId)`
#[async_trait]
pub trait RemoteTable: Send + Sync {
    /// Fetch every item in the profile's partition
    async fn query_partition(&self, table: &str, profile_id: &str) -> Result<Vec<Item>>;

    /// Upsert one item, replacing any item with the same key
    async fn put_item(&self, table: &str, item: Item) -> Result<()>;

    /// Check that the table exists and the credentials can reach it
    async fn describe_table(&self, table: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct QueryRequest<'a> {
    table_name: &'a str,
    key_condition_expression: &'a str,
    expression_attribute_values: BTreeMap<&'a str, AttributeValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exclusive_start_key: Option<Item>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QueryResponse {
    #[serde(default)]
    items: Vec<Item>,
    #[serde(default)]
    last_evaluated_key: Option<Item>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PutItemRequest<'a> {
    table_name: &'a str,
    item: &'a Item,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeTableRequest<'a> {
    table_name: &'a str,
}

/// Error body returned with non-2xx responses
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type", default)]
    kind: Option<String>,
    #[serde(alias = "Message", default)]
    message: Option<String>,
}

/// Render a failed response as `HTTP <status>: <ErrorType>: <message>`
pub fn describe_failure(status: u16, body: &[u8]) -> String {
    let parsed: Option<ErrorBody> = serde_json::from_slice(body).ok();
    match parsed {
        Some(ErrorBody {
            kind: Some(kind),
            message,
        }) => {
            let kind = kind.rsplit('#').next().unwrap_or(&kind);
            match message {
                Some(message) => format!("HTTP {}: {}: {}", status, kind, message),
                None => format!("HTTP {}: {}", status, kind),
            }
        }
        _ => {
            let text = String::from_utf8_lossy(body);
            let text = text.trim();
            if text.is_empty() {
                format!("HTTP {}", status)
            } else {
                format!("HTTP {}: {}", status, text)
            }
        }
    }
}

#[cfg(feature = "cloud")]
pub use http::HttpTableClient;

#[cfg(feature = "cloud")]
mod http {
    use std::time::Duration;

    use chrono::Utc;
    use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};

    use super::*;
    use crate::sync::config::SyncConfig;
    use crate::sync::signer::{self, Credentials, SigningRequest};

    const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Signed HTTPS client for a DynamoDB-compatible endpoint
    pub struct HttpTableClient {
        client: reqwest::Client,
        credentials: Credentials,
        host: String,
        url: String,
    }

    impl HttpTableClient {
        pub fn new(config: &SyncConfig) -> Result<Self> {
            let client = reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()?;

            Ok(Self {
                client,
                credentials: config.credentials(),
                host: config.host(),
                url: config.endpoint_url(),
            })
        }

        pub fn url(&self) -> &str {
            &self.url
        }

        /// Sign and send one request, returning the raw response body
        async fn call<B: Serialize>(&self, operation: Operation, body: &B) -> Result<Vec<u8>> {
            let payload = serde_json::to_vec(body)?;
            let timestamp = Utc::now();
            let target = operation.target();

            let authorization = signer::sign(
                &SigningRequest {
                    method: "POST",
                    service: SERVICE,
                    host: &self.host,
                    canonical_path: "/",
                    target: &target,
                    payload: &payload,
                    timestamp,
                },
                &self.credentials,
            );

            tracing::debug!("{} -> {}", target, self.url);

            let response = self
                .client
                .post(&self.url)
                .header(CONTENT_TYPE, signer::CONTENT_TYPE)
                .header("X-Amz-Date", signer::amz_date(&timestamp))
                .header("X-Amz-Target", &target)
                .header(AUTHORIZATION, authorization)
                .body(payload)
                .send()
                .await?;

            let status = response.status();
            let bytes = response.bytes().await?;

            if !status.is_success() {
                let message = describe_failure(status.as_u16(), &bytes);
                tracing::warn!("{} failed: {}", operation.name(), message);
                return Err(WorklogError::Transport(message));
            }

            Ok(bytes.to_vec())
        }
    }

    #[async_trait]
    impl RemoteTable for HttpTableClient {
        async fn query_partition(&self, table: &str, profile_id: &str) -> Result<Vec<Item>> {
            let mut items = Vec::new();
            let mut start_key: Option<Item> = None;
            let mut pages = 0usize;

            loop {
                let request = QueryRequest {
                    table_name: table,
                    key_condition_expression: "ProfileId = :profileId",
                    expression_attribute_values: BTreeMap::from([(
                        ":profileId",
                        AttributeValue::S(profile_id.to_string()),
                    )]),
                    exclusive_start_key: start_key.take(),
                };

                let body = self.call(Operation::Query, &request).await?;
                let page: QueryResponse = serde_json::from_slice(&body).map_err(|e| {
                    WorklogError::Transport(format!("Malformed Query response: {}", e))
                })?;

                pages += 1;
                items.extend(page.items);

                match page.last_evaluated_key {
                    Some(key) if !key.is_empty() => start_key = Some(key),
                    _ => break,
                }
            }

            tracing::debug!(
                "Queried {} items from {} in {} page(s)",
                items.len(),
                table,
                pages
            );
            Ok(items)
        }

        async fn put_item(&self, table: &str, item: Item) -> Result<()> {
            let request = PutItemRequest {
                table_name: table,
                item: &item,
            };
            self.call(Operation::PutItem, &request).await?;
            Ok(())
        }

        async fn describe_table(&self, table: &str) -> Result<()> {
            self.call(Operation::DescribeTable, &DescribeTableRequest { table_name: table })
                .await?;
            Ok(())
        }
    }
}

/// Process-local table store
///
/// Items are keyed by table, then `(ProfileId, CloudId)`. Failures can be
/// injected per operation to exercise error paths.
#[derive(Default)]
pub struct InMemoryTable {
    tables: Mutex<HashMap<String, BTreeMap<(String, String), Item>>>,
    failures: Mutex<HashMap<Operation, String>>,
    calls: Mutex<HashMap<Operation, usize>>,
    puts_in_flight: AtomicUsize,
    max_puts_in_flight: AtomicUsize,
}

impl InMemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of `operation` fail with a transport error
    pub fn fail(&self, operation: Operation, message: impl Into<String>) {
        self.failures.lock().insert(operation, message.into());
    }

    /// Register an empty table so `describe_table` succeeds
    pub fn create_table(&self, table: &str) {
        self.tables.lock().entry(table.to_string()).or_default();
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Number of calls made for `operation`
    pub fn calls(&self, operation: Operation) -> usize {
        self.calls.lock().get(&operation).copied().unwrap_or(0)
    }

    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }

    /// Highest number of puts observed running at once
    pub fn max_concurrent_puts(&self) -> usize {
        self.max_puts_in_flight.load(Ordering::SeqCst)
    }

    /// Store an item directly, bypassing call accounting
    pub fn insert(&self, table: &str, item: Item) -> Result<()> {
        let key = item_key(&item)?;
        self.tables
            .lock()
            .entry(table.to_string())
            .or_default()
            .insert(key, item);
        Ok(())
    }

    /// Every item in a table, in key order
    pub fn items(&self, table: &str) -> Vec<Item> {
        self.tables
            .lock()
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Look up one item by key
    pub fn get(&self, table: &str, profile_id: &str, cloud_id: &str) -> Option<Item> {
        self.tables
            .lock()
            .get(table)
            .and_then(|t| t.get(&(profile_id.to_string(), cloud_id.to_string())))
            .cloned()
    }

    fn record(&self, operation: Operation) -> Result<()> {
        *self.calls.lock().entry(operation).or_insert(0) += 1;
        match self.failures.lock().get(&operation) {
            Some(message) => Err(WorklogError::Transport(message.clone())),
            None => Ok(()),
        }
    }
}

fn item_key(item: &Item) -> Result<(String, String)> {
    let part = |name: &str| {
        item.get(name)
            .and_then(AttributeValue::as_s)
            .map(str::to_string)
            .ok_or_else(|| WorklogError::InvalidInput(format!("Item is missing key {}", name)))
    };
    Ok((part(PROFILE_ID)?, part(CLOUD_ID)?))
}

#[async_trait]
impl RemoteTable for InMemoryTable {
    async fn query_partition(&self, table: &str, profile_id: &str) -> Result<Vec<Item>> {
        tokio::task::yield_now().await;
        self.record(Operation::Query)?;

        Ok(self
            .tables
            .lock()
            .get(table)
            .map(|t| {
                t.iter()
                    .filter(|((profile, _), _)| profile == profile_id)
                    .map(|(_, item)| item.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn put_item(&self, table: &str, item: Item) -> Result<()> {
        let now = self.puts_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_puts_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.puts_in_flight.fetch_sub(1, Ordering::SeqCst);

        self.record(Operation::PutItem)?;
        self.insert(table, item)
    }

    async fn describe_table(&self, table: &str) -> Result<()> {
        self.record(Operation::DescribeTable)?;
        if self.tables.lock().contains_key(table) {
            Ok(())
        } else {
            Err(WorklogError::Transport(format!(
                "HTTP 400: ResourceNotFoundException: Requested resource not found: Table: {} not found",
                table
            )))
        }
    }
}
