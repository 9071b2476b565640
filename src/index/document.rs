use crate::sync::ledger::ObjectKind;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// One search-index document. Field mappings from source payloads are
/// one-liners in the fetch layer; this struct is the full index schema.
#[derive(Debug, Clone, Serialize)]
pub struct IndexDocument {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ObjectKind,
    pub title: String,
    pub body: String,
    pub url: String,
    pub last_updated: Option<String>,
}

impl IndexDocument {
    pub fn new(id: impl Into<String>, kind: ObjectKind) -> Self {
        Self {
            id: id.into(),
            kind,
            title: String::new(),
            body: String::new(),
            url: String::new(),
            last_updated: None,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn last_updated(mut self, stamp: Option<String>) -> Self {
        self.last_updated = stamp;
        self
    }

    /// Stable hash of the mapped fields; an unchanged hash means the
    /// index already holds this revision and re-ingest can skip it.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update([0]);
        hasher.update(self.kind.label().as_bytes());
        hasher.update([0]);
        hasher.update(self.title.as_bytes());
        hasher.update([0]);
        hasher.update(self.body.as_bytes());
        hasher.update([0]);
        hasher.update(self.url.as_bytes());
        hasher.update([0]);
        hasher.update(self.last_updated.as_deref().unwrap_or("").as_bytes());
        format!("{:x}", hasher.finalize())
    }
}
