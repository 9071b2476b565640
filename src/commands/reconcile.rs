use anyhow::Result;

use crate::commands::CommandReport;
use crate::graph::client::GraphClient;
use crate::index::client::IndexClient;
use crate::sync::config::load_config;
use crate::sync::cycle::{CyclePlan, run_domain_cycle};
use crate::sync::domain::Domain;
use crate::sync::paths::resolve_paths;

#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    pub domain: Option<String>,
    pub dry_run: bool,
}

/// Deletion reconciliation pass: diff each domain ledger against a fresh
/// live snapshot and retract orphaned index entries.
pub fn run(opts: &ReconcileOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_config()?;
    let mut report = CommandReport::new("reconcile");

    let domains = match &opts.domain {
        Some(raw) => vec![Domain::parse(raw)?],
        None => cfg.enabled_domains(),
    };

    let source = GraphClient::from_config(&cfg.source)?;
    let index = IndexClient::from_config(&cfg.index)?;

    for domain in domains {
        match run_domain_cycle(
            &paths,
            &cfg,
            domain,
            &source,
            &index,
            &index,
            CyclePlan::reconcile_only(opts.dry_run),
        ) {
            Ok(outcome) => {
                if let Some(reason) = outcome.skipped_reason {
                    report.detail(format!("domain={domain} skipped reason={reason}"));
                    continue;
                }
                let Some(deletion) = outcome.deletion else {
                    continue;
                };
                report.detail(format!(
                    "domain={domain} examined={} to_delete={} dry_run={} ledger_entries={}",
                    deletion.examined,
                    deletion.ids_to_delete.len(),
                    deletion.dry_run,
                    outcome.ledger_entries
                ));
                if opts.dry_run {
                    for id in &deletion.ids_to_delete {
                        report.detail(format!("domain={domain} would_delete={id}"));
                    }
                }
                if let Some(dispatch) = deletion.dispatch {
                    report.detail(format!(
                        "domain={domain} requested={} deleted={} failed_chunks={} failed_ids={}",
                        dispatch.requested,
                        dispatch.deleted,
                        dispatch.failed_chunks,
                        dispatch.failed_ids.len()
                    ));
                    if dispatch.failed_chunks > 0 || !dispatch.failed_ids.is_empty() {
                        report.issue(format!(
                            "domain={domain} some deletions failed; they will be retried by id on a later pass"
                        ));
                    }
                }
            }
            Err(err) => {
                report.issue(format!("domain={domain} reconcile failed: {err:#}"));
            }
        }
    }

    Ok(report)
}
