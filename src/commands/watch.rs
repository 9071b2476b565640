use anyhow::Result;

use crate::commands::CommandReport;
use crate::sync::cycle;

#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    pub once: bool,
    pub daemon: bool,
}

fn describe_cycle(report: &mut CommandReport, cycle: &cycle::WatchCycleOutcome) {
    report.detail(format!("poll_interval_secs={}", cycle.poll_interval_secs));

    for outcome in &cycle.domains {
        if let Some(reason) = &outcome.skipped_reason {
            report.detail(format!("domain={} skipped reason={reason}", outcome.domain));
            continue;
        }

        report.detail(format!(
            "domain={} fetched_objects={} ledger_entries={} ledger_path={}",
            outcome.domain, outcome.fetched_objects, outcome.ledger_entries, outcome.ledger_path
        ));
        if let Some(ingest) = &outcome.ingest {
            report.detail(format!(
                "domain={} ingest.new_entries={} ingest.indexed={} ingest.skipped={} ingest.rejected={}",
                outcome.domain,
                ingest.new_ledger_entries,
                ingest.indexed_documents,
                ingest.skipped_unchanged,
                ingest.rejected_documents
            ));
        }
        if let Some(deletion) = &outcome.deletion {
            report.detail(format!(
                "domain={} reconcile.examined={} reconcile.to_delete={}",
                outcome.domain,
                deletion.examined,
                deletion.ids_to_delete.len()
            ));
            if let Some(dispatch) = &deletion.dispatch {
                report.detail(format!(
                    "domain={} dispatch.deleted={} dispatch.failed_chunks={} dispatch.failed_ids={}",
                    outcome.domain,
                    dispatch.deleted,
                    dispatch.failed_chunks,
                    dispatch.failed_ids.len()
                ));
            }
        }
    }

    for failure in &cycle.failures {
        report.issue(failure.clone());
    }
}

pub fn run(opts: &WatchOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("watch");

    if opts.once && opts.daemon {
        report.issue("invalid flags: use only one of --once or --daemon");
        return Ok(report);
    }

    if opts.daemon {
        report.detail("starting sync watcher in daemon mode");
        cycle::run_daemon()?;
        return Ok(report);
    }

    let cycle = cycle::run_watch_once()?;
    report.detail("sync watcher cycle completed");
    describe_cycle(&mut report, &cycle);

    Ok(report)
}
