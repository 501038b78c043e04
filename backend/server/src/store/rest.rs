//! PostgREST client for the hosted database.
//!
//! Requests carry the project key as both `apikey` and bearer token. Writes
//! ask for `return=representation` so inserted and updated rows come back in
//! the response body. Provider errors arrive as
//! `{"code": "...", "message": "..."}` and are surfaced as
//! [`StoreError::Rejected`] with the code intact.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{ChangeFeed, ChangeKind, DataStore, Query, StoreError, Table};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RestStore {
    client: Client,
    base_url: String,
    api_key: String,
    feed: ChangeFeed,
}

#[derive(Deserialize)]
struct ProviderError {
    code: Option<String>,
    message: Option<String>,
}

impl RestStore {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            feed: ChangeFeed::new(),
        })
    }

    fn request(&self, method: Method, table: Table) -> RequestBuilder {
        let url = format!("{}/rest/v1/{}", self.base_url, table.name());

        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    fn write(&self, method: Method, table: Table, query: &Query) -> RequestBuilder {
        self.request(method, table)
            .query(&query.to_params())
            .header("Prefer", "return=representation")
    }
}

async fn rows(response: Response) -> Result<Vec<Value>, StoreError> {
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await?;

        return Err(match serde_json::from_str::<ProviderError>(&body) {
            Ok(ProviderError {
                code: Some(code),
                message,
            }) => StoreError::Rejected {
                code,
                message: message.unwrap_or_default(),
            },
            _ => StoreError::Status {
                status: status.as_u16(),
                body,
            },
        });
    }

    Ok(response.json().await?)
}

#[async_trait]
impl DataStore for RestStore {
    async fn insert(&self, table: Table, row: Value) -> Result<Value, StoreError> {
        let response = self
            .request(Method::POST, table)
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;

        let inserted = rows(response).await?.into_iter().next();
        self.feed.publish(table, ChangeKind::Insert);

        inserted.ok_or(StoreError::MissingRow)
    }

    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, StoreError> {
        #[cfg(feature = "verbose")]
        debug!(table = table.name(), params = ?query.to_params(), "select");

        let response = self
            .request(Method::GET, table)
            .query(&query.to_params())
            .send()
            .await?;

        rows(response).await
    }

    async fn update(
        &self,
        table: Table,
        query: &Query,
        patch: Value,
    ) -> Result<Vec<Value>, StoreError> {
        let response = self
            .write(Method::PATCH, table, query)
            .json(&patch)
            .send()
            .await?;

        let updated = rows(response).await?;
        if !updated.is_empty() {
            self.feed.publish(table, ChangeKind::Update);
        }

        debug!(table = table.name(), rows = updated.len(), "update");
        Ok(updated)
    }

    async fn delete(&self, table: Table, query: &Query) -> Result<usize, StoreError> {
        let response = self.write(Method::DELETE, table, query).send().await?;

        let removed = rows(response).await?.len();
        if removed > 0 {
            self.feed.publish(table, ChangeKind::Delete);
        }

        Ok(removed)
    }

    fn feed(&self) -> &ChangeFeed {
        &self.feed
    }
}
