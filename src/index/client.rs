use crate::index::document::IndexDocument;
use crate::sync::config::IndexConfig;
use crate::sync::cycle::DocumentSink;
use crate::sync::dispatch::{DeleteResponse, EntryDeleter};
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 45;

/// Workplace-search-style index API: bulk document create and destroy
/// under a content source, bearer-token auth.
pub struct IndexClient {
    http: Client,
    base_url: String,
    content_source_id: String,
    api_key: String,
}

#[derive(Debug, Clone, Default)]
pub struct BulkCreateOutcome {
    pub rejected: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BulkCreateResult {
    id: String,
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BulkCreateResponse {
    #[serde(default)]
    results: Vec<BulkCreateResult>,
}

impl IndexClient {
    pub fn from_config(cfg: &IndexConfig) -> Result<Self> {
        if cfg.base_url.trim().is_empty() {
            anyhow::bail!("index base url is not configured (GRAPHSYNC_INDEX_BASE_URL)");
        }
        if cfg.content_source_id.trim().is_empty() {
            anyhow::bail!(
                "index content source id is not configured (GRAPHSYNC_INDEX_CONTENT_SOURCE_ID)"
            );
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build index HTTP client")?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            content_source_id: cfg.content_source_id.clone(),
            api_key: cfg.api_key.clone(),
        })
    }

    fn documents_url(&self, operation: &str) -> String {
        format!(
            "{}/api/ws/v1/sources/{}/documents/{operation}",
            self.base_url, self.content_source_id
        )
    }

    pub fn bulk_create(&self, documents: &[IndexDocument]) -> Result<BulkCreateOutcome> {
        if documents.is_empty() {
            return Ok(BulkCreateOutcome::default());
        }

        let url = self.documents_url("bulk_create");
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(documents)
            .send()
            .with_context(|| format!("failed to POST {url}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            anyhow::bail!("index bulk_create failed with status {status}: {body}");
        }

        let parsed: BulkCreateResponse = response
            .json()
            .context("invalid JSON from index bulk_create")?;
        let rejected = parsed
            .results
            .into_iter()
            .filter(|r| !r.errors.is_empty())
            .map(|r| r.id)
            .collect::<Vec<_>>();

        Ok(BulkCreateOutcome { rejected })
    }
}

impl DocumentSink for IndexClient {
    fn bulk_create(&self, documents: &[IndexDocument]) -> Result<BulkCreateOutcome> {
        IndexClient::bulk_create(self, documents)
    }
}

impl EntryDeleter for IndexClient {
    fn delete_entries(&self, ids: &[String]) -> Result<DeleteResponse> {
        let url = self.documents_url("bulk_destroy");
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(ids)
            .send()
            .with_context(|| format!("failed to POST {url}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            anyhow::bail!("index bulk_destroy failed with status {status}: {body}");
        }

        response
            .json::<DeleteResponse>()
            .context("invalid JSON from index bulk_destroy")
    }
}
