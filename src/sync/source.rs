use crate::index::document::IndexDocument;
use crate::sync::domain::Domain;
use crate::sync::ledger::ObjectKind;
use anyhow::Result;
use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// One object discovered at the source, with its hierarchy linkage. Kinds
/// that carry indexable content also yield a mapped document; container
/// kinds (drives, roots, users) are linkage-only.
#[derive(Debug, Clone)]
pub struct SourceObject {
    pub id: String,
    pub kind: ObjectKind,
    pub parent_id: String,
    pub super_parent_id: String,
    pub document: Option<IndexDocument>,
}

impl SourceObject {
    pub fn container(id: String, kind: ObjectKind, parent_id: &str, super_parent_id: &str) -> Self {
        Self {
            id,
            kind,
            parent_id: parent_id.to_string(),
            super_parent_id: super_parent_id.to_string(),
            document: None,
        }
    }
}

/// Fetch window shared by ingest and the deletion live snapshot, so both
/// sides of a cycle see the same slice of the source.
#[derive(Debug, Clone, Copy)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn lookback(days: u64) -> Self {
        let end = Utc::now();
        let start = end - Duration::days(days as i64);
        Self { start, end }
    }

    pub fn start_iso(&self) -> String {
        self.start.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    pub fn end_iso(&self) -> String {
        self.end.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

/// The seam between the cycle controller and the source API. The live
/// Graph-style client implements this; tests inject canned objects.
pub trait ObjectSource {
    fn fetch_objects(&self, domain: Domain, window: &TimeWindow) -> Result<Vec<SourceObject>>;
}
