use crate::sync::domain::Domain;
use crate::sync::paths::SyncPaths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// Per-domain cycle bookkeeping, one JSON file per domain so concurrent
/// domain threads never write the same file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainState {
    pub schema_version: u32,
    pub last_ingest_epoch_secs: Option<u64>,
    pub last_reconcile_epoch_secs: Option<u64>,
    pub last_deleted_count: Option<usize>,
    /// object id → sha256 of its mapped document fields; unchanged
    /// documents are skipped on re-ingest.
    pub indexed_hashes: BTreeMap<String, String>,
}

impl Default for DomainState {
    fn default() -> Self {
        Self {
            schema_version: 1,
            last_ingest_epoch_secs: None,
            last_reconcile_epoch_secs: None,
            last_deleted_count: None,
            indexed_hashes: BTreeMap::new(),
        }
    }
}

pub fn state_file_path(paths: &SyncPaths, domain: Domain) -> PathBuf {
    paths
        .state_dir
        .join(format!("{}_state.json", domain.label()))
}

pub fn load(paths: &SyncPaths, domain: Domain) -> Result<DomainState> {
    let file = state_file_path(paths, domain);
    if !file.exists() {
        return Ok(DomainState::default());
    }

    let raw =
        fs::read_to_string(&file).with_context(|| format!("failed to read {}", file.display()))?;
    let parsed: DomainState = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", file.display()))?;
    Ok(parsed)
}

pub fn save(paths: &SyncPaths, domain: Domain, state: &DomainState) -> Result<PathBuf> {
    let file = state_file_path(paths, domain);
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let data = serde_json::to_string_pretty(state)?;
    fs::write(&file, format!("{data}\n"))
        .with_context(|| format!("failed to write {}", file.display()))?;
    Ok(file)
}
