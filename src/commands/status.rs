use anyhow::Result;

use crate::commands::CommandReport;
use crate::sync::config::load_config;
use crate::sync::domain::ALL_DOMAINS;
use crate::sync::ledger;
use crate::sync::paths::resolve_paths;
use crate::sync::state;

/// Read-only snapshot of the connector: configuration summary plus
/// per-domain ledger and cycle bookkeeping.
pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_config()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("build={}", env!("BUILD_UUID")));
    report.detail(format!("sync_home={}", paths.sync_home.display()));
    report.detail(format!(
        "poll_interval_secs={}",
        cfg.watcher.poll_interval_secs
    ));
    report.detail(format!("delete_batch_size={}", cfg.deletion.batch_size));
    report.detail(format!("lookback_days={}", cfg.source.lookback_days));

    for domain in ALL_DOMAINS {
        if !cfg.domain_enabled(domain) {
            report.detail(format!("domain={domain} enabled=false"));
            continue;
        }

        let ledger = ledger::load(&paths, domain)?;
        let state = state::load(&paths, domain)?;
        report.detail(format!(
            "domain={domain} enabled=true global_keys={} delete_keys={} indexed_hashes={}",
            ledger.global_keys.len(),
            ledger.delete_keys.len(),
            state.indexed_hashes.len()
        ));
        if let Some(at) = state.last_ingest_epoch_secs {
            report.detail(format!("domain={domain} last_ingest_epoch_secs={at}"));
        }
        if let Some(at) = state.last_reconcile_epoch_secs {
            report.detail(format!("domain={domain} last_reconcile_epoch_secs={at}"));
        }
        if let Some(count) = state.last_deleted_count {
            report.detail(format!("domain={domain} last_deleted_count={count}"));
        }
    }

    Ok(report)
}
