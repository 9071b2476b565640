use anyhow::Result;

use crate::commands::CommandReport;
use crate::graph::client::GraphClient;
use crate::index::client::IndexClient;
use crate::sync::config::load_config;
use crate::sync::cycle::{CyclePlan, run_domain_cycle};
use crate::sync::domain::Domain;
use crate::sync::paths::resolve_paths;

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub domain: Option<String>,
}

fn target_domains(cfg: &crate::sync::config::SyncConfig, opt: &Option<String>) -> Result<Vec<Domain>> {
    match opt {
        Some(raw) => Ok(vec![Domain::parse(raw)?]),
        None => Ok(cfg.enabled_domains()),
    }
}

/// Ingest-only pass: fetch, index changed documents, record ledger
/// entries. Deletion reconciliation is left to `reconcile` or `watch`.
pub fn run(opts: &SyncOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_config()?;
    let mut report = CommandReport::new("sync");

    let source = GraphClient::from_config(&cfg.source)?;
    let index = IndexClient::from_config(&cfg.index)?;

    for domain in target_domains(&cfg, &opts.domain)? {
        match run_domain_cycle(
            &paths,
            &cfg,
            domain,
            &source,
            &index,
            &index,
            CyclePlan::ingest_only(),
        ) {
            Ok(outcome) => {
                if let Some(reason) = outcome.skipped_reason {
                    report.detail(format!("domain={domain} skipped reason={reason}"));
                    continue;
                }
                let ingest = outcome.ingest.unwrap_or_default();
                report.detail(format!(
                    "domain={domain} fetched={} new_entries={} indexed={} skipped={} ledger_entries={}",
                    outcome.fetched_objects,
                    ingest.new_ledger_entries,
                    ingest.indexed_documents,
                    ingest.skipped_unchanged,
                    outcome.ledger_entries
                ));
                if ingest.failed_batches > 0 || ingest.rejected_documents > 0 {
                    report.issue(format!(
                        "domain={domain} ingest degraded: failed_batches={} rejected={}",
                        ingest.failed_batches, ingest.rejected_documents
                    ));
                }
            }
            Err(err) => {
                report.issue(format!("domain={domain} sync failed: {err:#}"));
            }
        }
    }

    Ok(report)
}
