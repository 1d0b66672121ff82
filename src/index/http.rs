//! Elasticsearch/OpenSearch-compatible HTTP index client

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};
use url::Url;

use super::{IndexDocument, IndexError, SearchIndex};
use crate::config::IndexConfig;

/// Bulk-upserts documents over the `_bulk` REST endpoint
pub struct HttpSearchIndex {
    client: Client,
    base_url: Url,
    index: String,
    definition: Option<Value>,
    refresh: bool,
}

impl HttpSearchIndex {
    pub fn new(config: &IndexConfig) -> Result<Self, IndexError> {
        let base_url = Url::parse(&config.url)
            .map_err(|e| IndexError::serialization(format!("invalid index url '{}': {e}", config.url)))?;
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            base_url,
            index: config.name.clone(),
            definition: config.definition.clone(),
            refresh: config.refresh,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, IndexError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| IndexError::serialization("index url cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn create_index(&self) -> Result<(), IndexError> {
        let body = self.definition.clone().unwrap_or_else(|| json!({}));
        let response = self
            .client
            .put(self.url(&[self.index.as_str()])?)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            info!("Created index {}", self.index);
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && is_already_exists(&text) {
            debug!("Index {} was created concurrently", self.index);
            return Ok(());
        }
        Err(IndexError::Status {
            operation: format!("create index {}", self.index),
            status: status.as_u16(),
            body: text,
        })
    }
}

fn is_already_exists(body: &str) -> bool {
    body.contains("resource_already_exists_exception")
        || body.contains("index_already_exists_exception")
}

/// NDJSON body of a bulk request with one `index` action per document
pub fn bulk_body(index: &str, documents: &[IndexDocument]) -> Result<String, IndexError> {
    let mut body = String::new();
    for document in documents {
        let action = json!({ "index": { "_index": index, "_id": document.id } });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&document.body)?);
        body.push('\n');
    }
    Ok(body)
}

/// Fail when any item of a bulk response was rejected
pub fn check_bulk_response(response: &Value, total: usize) -> Result<(), IndexError> {
    if !response.get("errors").and_then(Value::as_bool).unwrap_or(false) {
        return Ok(());
    }

    let failures: Vec<&Value> = response
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_object()?.values().next())
                .filter(|result| result.get("error").is_some())
                .collect()
        })
        .unwrap_or_default();

    let first_error = failures
        .first()
        .and_then(|result| result.get("error"))
        .map(|error| {
            let kind = error.get("type").and_then(Value::as_str).unwrap_or("unknown");
            let reason = error.get("reason").and_then(Value::as_str).unwrap_or("");
            format!("{kind}: {reason}")
        })
        .unwrap_or_else(|| "bulk response reported errors".to_string());

    Err(IndexError::Rejected {
        failed: failures.len().max(1),
        total,
        first_error,
    })
}

#[async_trait]
impl SearchIndex for HttpSearchIndex {
    async fn ensure_index(&self) -> Result<(), IndexError> {
        let response = self.client.head(self.url(&[self.index.as_str()])?).send().await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => self.create_index().await,
            status => Err(IndexError::Status {
                operation: format!("check index {}", self.index),
                status: status.as_u16(),
                body: String::new(),
            }),
        }
    }

    async fn bulk_upsert(&self, documents: &[IndexDocument]) -> Result<usize, IndexError> {
        if documents.is_empty() {
            return Ok(0);
        }

        let mut url = self.url(&[self.index.as_str(), "_bulk"])?;
        if self.refresh {
            url.query_pairs_mut().append_pair("refresh", "wait_for");
        }

        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(bulk_body(&self.index, documents)?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(IndexError::Status {
                operation: format!("bulk write to {}", self.index),
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: Value = response.json().await?;
        check_bulk_response(&body, documents.len())?;
        debug!("Indexed {} documents into {}", documents.len(), self.index);
        Ok(documents.len())
    }

    fn index_name(&self) -> &str {
        &self.index
    }
}
