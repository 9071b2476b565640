use crate::graph::client::GraphClient;
use crate::index::client::{BulkCreateOutcome, IndexClient};
use crate::index::document::IndexDocument;
use crate::sync::audit;
use crate::sync::config::{SyncConfig, load_config};
use crate::sync::dispatch::{self, DispatchOutcome, EntryDeleter};
use crate::sync::domain::Domain;
use crate::sync::ledger::{self, DomainLedger};
use crate::sync::lock;
use crate::sync::paths::{SyncPaths, resolve_paths};
use crate::sync::reconcile::{LiveSet, reconcile};
use crate::sync::source::{ObjectSource, SourceObject, TimeWindow};
use crate::sync::state::{self, DomainState};
use crate::sync::util::now_epoch_secs;
use crate::sync::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use std::thread;
use std::time::Duration;

const INGEST_BATCH_SIZE: usize = 100;

/// Document-side seam to the search index; the HTTP client implements
/// this, tests substitute a recorder.
pub trait DocumentSink {
    fn bulk_create(&self, documents: &[IndexDocument]) -> Result<BulkCreateOutcome>;
}

#[derive(Debug, Clone, Copy)]
pub struct CyclePlan {
    pub ingest: bool,
    pub reconcile: bool,
    pub dry_run: bool,
}

impl CyclePlan {
    pub fn full() -> Self {
        Self {
            ingest: true,
            reconcile: true,
            dry_run: false,
        }
    }

    pub fn ingest_only() -> Self {
        Self {
            ingest: true,
            reconcile: false,
            dry_run: false,
        }
    }

    pub fn reconcile_only(dry_run: bool) -> Self {
        Self {
            ingest: false,
            reconcile: true,
            dry_run,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IngestOutcome {
    pub new_ledger_entries: usize,
    pub indexed_documents: usize,
    pub skipped_unchanged: usize,
    pub rejected_documents: usize,
    pub failed_batches: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DeletionOutcome {
    pub examined: usize,
    pub ids_to_delete: Vec<String>,
    pub dispatch: Option<DispatchOutcome>,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct DomainCycleOutcome {
    pub domain: Domain,
    pub ledger_path: String,
    pub fetched_objects: usize,
    pub ledger_entries: usize,
    pub ingest: Option<IngestOutcome>,
    pub deletion: Option<DeletionOutcome>,
    pub skipped_reason: Option<String>,
}

fn skipped(domain: Domain, reason: &str) -> DomainCycleOutcome {
    DomainCycleOutcome {
        domain,
        ledger_path: String::new(),
        fetched_objects: 0,
        ledger_entries: 0,
        ingest: None,
        deletion: None,
        skipped_reason: Some(reason.to_string()),
    }
}

fn ingest_objects(
    domain: Domain,
    objects: &[SourceObject],
    ledger: &mut DomainLedger,
    state: &mut DomainState,
    sink: &dyn DocumentSink,
) -> IngestOutcome {
    let mut outcome = IngestOutcome::default();

    // The ledger mirrors everything discovered, containers included; the
    // index only receives content-bearing documents whose hash moved.
    let mut pending: Vec<(&SourceObject, IndexDocument, String)> = Vec::new();
    for object in objects {
        if ledger::insert(
            &mut ledger.global_keys,
            &object.id,
            object.kind,
            &object.parent_id,
            &object.super_parent_id,
        ) {
            outcome.new_ledger_entries += 1;
        }

        let Some(document) = &object.document else {
            continue;
        };
        let hash = document.content_hash();
        if state.indexed_hashes.get(&object.id) == Some(&hash) {
            outcome.skipped_unchanged += 1;
            continue;
        }
        pending.push((object, document.clone(), hash));
    }

    for batch in pending.chunks(INGEST_BATCH_SIZE) {
        let documents: Vec<IndexDocument> = batch.iter().map(|(_, doc, _)| doc.clone()).collect();
        match sink.bulk_create(&documents) {
            Ok(result) => {
                for (object, _, hash) in batch {
                    if result.rejected.iter().any(|id| id == &object.id) {
                        outcome.rejected_documents += 1;
                        continue;
                    }
                    outcome.indexed_documents += 1;
                    state
                        .indexed_hashes
                        .insert(object.id.clone(), hash.clone());
                }
            }
            Err(err) => {
                // Skip the hash update so the next cycle retries this batch.
                outcome.failed_batches += 1;
                warn::emit(WarnEvent {
                    code: "INGEST_BATCH_FAILED",
                    stage: "ingest",
                    domain: domain.label(),
                    object: &format!("batch_of_{}", batch.len()),
                    retry: "retry-next-cycle",
                    reason: "index-call-failed",
                    err: &format!("{err:#}"),
                });
            }
        }
    }

    outcome
}

/// One full pass for one domain: load → fetch live → ingest → snapshot
/// `delete_keys` → reconcile → dispatch deletes → persist. The ledger
/// file is only rewritten at the very end, so a crash mid-cycle leaves
/// the previous checkpoint intact and the next cycle redoes an
/// idempotent comparison.
pub fn run_domain_cycle(
    paths: &SyncPaths,
    cfg: &SyncConfig,
    domain: Domain,
    source: &dyn ObjectSource,
    sink: &dyn DocumentSink,
    deleter: &dyn EntryDeleter,
    plan: CyclePlan,
) -> Result<DomainCycleOutcome> {
    let Some(_lock) = lock::try_acquire(paths, domain)? else {
        audit::append_event(
            paths,
            "cycle",
            "skipped",
            &format!("domain={domain} reason=lock-held"),
        )?;
        return Ok(skipped(domain, "lock-held"));
    };

    let mut state = state::load(paths, domain)?;
    let mut ledger = ledger::load(paths, domain)?;
    let window = TimeWindow::lookback(cfg.source.lookback_days);

    // Live-fetch failure aborts this domain's cycle before any mutation;
    // the on-disk ledger stays at its pre-cycle checkpoint.
    let objects = source
        .fetch_objects(domain, &window)
        .with_context(|| format!("live fetch failed for domain {domain}"))?;

    let mut outcome = DomainCycleOutcome {
        domain,
        ledger_path: ledger::ledger_path(paths, domain).display().to_string(),
        fetched_objects: objects.len(),
        ledger_entries: 0,
        ingest: None,
        deletion: None,
        skipped_reason: None,
    };

    if plan.ingest {
        let ingest = ingest_objects(domain, &objects, &mut ledger, &mut state, sink);
        state.last_ingest_epoch_secs = Some(now_epoch_secs()?);
        audit::append_event(
            paths,
            "ingest",
            if ingest.failed_batches == 0 { "ok" } else { "degraded" },
            &format!(
                "domain={domain} objects={} new_entries={} indexed={} skipped={} rejected={} failed_batches={}",
                objects.len(),
                ingest.new_ledger_entries,
                ingest.indexed_documents,
                ingest.skipped_unchanged,
                ingest.rejected_documents,
                ingest.failed_batches
            ),
        )?;
        outcome.ingest = Some(ingest);
    }

    if plan.reconcile {
        // Freeze the traversal input; the walk mutates global_keys only.
        ledger.delete_keys = ledger.global_keys.clone();
        let live = LiveSet::from_ids(objects.iter().map(|o| o.id.clone()));
        let reconciled = reconcile(&mut ledger, &live);

        let mut deletion = DeletionOutcome {
            examined: reconciled.examined,
            ids_to_delete: reconciled.ids_to_delete,
            dispatch: None,
            dry_run: plan.dry_run,
        };

        if !plan.dry_run {
            let dispatched = dispatch::delete_in_batches(
                deleter,
                domain,
                &deletion.ids_to_delete,
                cfg.deletion.batch_size,
            );
            for id in &deletion.ids_to_delete {
                state.indexed_hashes.remove(id);
            }
            state.last_reconcile_epoch_secs = Some(now_epoch_secs()?);
            state.last_deleted_count = Some(dispatched.deleted);
            deletion.dispatch = Some(dispatched);
        }

        let status = match &deletion.dispatch {
            Some(d) if d.failed_chunks > 0 || !d.failed_ids.is_empty() => "degraded",
            _ => "ok",
        };
        audit::append_event(
            paths,
            "reconcile",
            status,
            &format!(
                "domain={domain} examined={} live={} to_delete={} exempt_retained={} dry_run={}",
                deletion.examined,
                live.len(),
                deletion.ids_to_delete.len(),
                reconciled.exempt_retained,
                deletion.dry_run
            ),
        )?;
        outcome.deletion = Some(deletion);
    }

    outcome.ledger_entries = ledger.global_keys.len();

    if !plan.dry_run {
        ledger::save(paths, domain, &ledger)?;
        state::save(paths, domain, &state)?;
    }

    Ok(outcome)
}

#[derive(Debug)]
pub struct WatchCycleOutcome {
    pub poll_interval_secs: u64,
    pub domains: Vec<DomainCycleOutcome>,
    pub failures: Vec<String>,
}

/// One wake-up: every enabled domain runs its cycle on its own thread.
/// A failing domain is logged and reported; the others still complete.
pub fn run_watch_once() -> Result<WatchCycleOutcome> {
    let cfg = load_config()?;
    let paths = resolve_paths()?;

    let mut handles = Vec::new();
    for domain in cfg.enabled_domains() {
        let thread_cfg = cfg.clone();
        let thread_paths = paths.clone();
        handles.push((
            domain,
            thread::spawn(move || -> Result<DomainCycleOutcome> {
                let source = GraphClient::from_config(&thread_cfg.source)?;
                let index = IndexClient::from_config(&thread_cfg.index)?;
                run_domain_cycle(
                    &thread_paths,
                    &thread_cfg,
                    domain,
                    &source,
                    &index,
                    &index,
                    CyclePlan::full(),
                )
            }),
        ));
    }

    let mut domains = Vec::new();
    let mut failures = Vec::new();
    for (domain, handle) in handles {
        match handle.join() {
            Ok(Ok(outcome)) => domains.push(outcome),
            Ok(Err(err)) => {
                audit::append_event(
                    &paths,
                    "cycle",
                    "degraded",
                    &format!("domain={domain} error={err:#}"),
                )?;
                failures.push(format!("domain={domain} error={err:#}"));
            }
            Err(_) => {
                failures.push(format!("domain={domain} error=cycle thread panicked"));
            }
        }
    }

    Ok(WatchCycleOutcome {
        poll_interval_secs: cfg.watcher.poll_interval_secs,
        domains,
        failures,
    })
}

pub fn run_daemon() -> Result<()> {
    loop {
        let cycle = run_watch_once()?;
        let sleep_for = Duration::from_secs(cycle.poll_interval_secs);
        thread::sleep(sleep_for);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::document::IndexDocument;
    use crate::sync::dispatch::{DeleteResponse, DeleteResult};
    use crate::sync::ledger::ObjectKind;
    use std::cell::RefCell;
    use tempfile::tempdir;

    struct FakeSource {
        objects: Vec<SourceObject>,
        fail: bool,
    }

    impl ObjectSource for FakeSource {
        fn fetch_objects(&self, _domain: Domain, _window: &TimeWindow) -> Result<Vec<SourceObject>> {
            if self.fail {
                anyhow::bail!("source unavailable");
            }
            Ok(self.objects.clone())
        }
    }

    #[derive(Default)]
    struct FakeSink {
        created: RefCell<Vec<String>>,
    }

    impl DocumentSink for FakeSink {
        fn bulk_create(&self, documents: &[IndexDocument]) -> Result<BulkCreateOutcome> {
            self.created
                .borrow_mut()
                .extend(documents.iter().map(|d| d.id.clone()));
            Ok(BulkCreateOutcome {
                rejected: Vec::new(),
            })
        }
    }

    #[derive(Default)]
    struct FakeDeleter {
        deleted: RefCell<Vec<String>>,
    }

    impl EntryDeleter for FakeDeleter {
        fn delete_entries(&self, ids: &[String]) -> Result<DeleteResponse> {
            self.deleted.borrow_mut().extend(ids.iter().cloned());
            Ok(DeleteResponse {
                results: ids
                    .iter()
                    .map(|id| DeleteResult {
                        id: id.clone(),
                        errors: Vec::new(),
                    })
                    .collect(),
            })
        }
    }

    fn paths_in(dir: &std::path::Path) -> SyncPaths {
        SyncPaths {
            sync_home: dir.to_path_buf(),
            ledgers_dir: dir.join("ledgers"),
            state_dir: dir.join("state"),
            logs_dir: dir.join("logs"),
            locks_dir: dir.join("locks"),
        }
    }

    fn message_object(id: &str, channel: &str, team: &str, body: &str) -> SourceObject {
        SourceObject {
            id: id.to_string(),
            kind: ObjectKind::ChannelMessage,
            parent_id: channel.to_string(),
            super_parent_id: team.to_string(),
            document: Some(
                IndexDocument::new(id, ObjectKind::ChannelMessage)
                    .title("msg")
                    .body(body),
            ),
        }
    }

    #[test]
    fn full_cycle_ingests_then_reconciles_and_persists() {
        let tmp = tempdir().expect("tempdir");
        let paths = paths_in(tmp.path());
        let cfg = SyncConfig::default();

        let source = FakeSource {
            objects: vec![
                SourceObject::container("t1".into(), ObjectKind::Team, "", ""),
                message_object("m1", "t1", "", "hello"),
            ],
            fail: false,
        };
        let sink = FakeSink::default();
        let deleter = FakeDeleter::default();

        let outcome = run_domain_cycle(
            &paths,
            &cfg,
            Domain::Teams,
            &source,
            &sink,
            &deleter,
            CyclePlan::full(),
        )
        .expect("cycle");

        assert_eq!(outcome.fetched_objects, 2);
        let ingest = outcome.ingest.expect("ingest ran");
        assert_eq!(ingest.new_ledger_entries, 2);
        assert_eq!(ingest.indexed_documents, 1);
        assert!(outcome.deletion.expect("deletion ran").ids_to_delete.is_empty());

        let ledger = ledger::load(&paths, Domain::Teams).expect("load");
        assert_eq!(ledger.global_keys.len(), 2);
        assert_eq!(ledger.delete_keys.len(), 2);
        assert!(deleter.deleted.borrow().is_empty());
    }

    #[test]
    fn second_cycle_skips_unchanged_documents() {
        let tmp = tempdir().expect("tempdir");
        let paths = paths_in(tmp.path());
        let cfg = SyncConfig::default();

        let source = FakeSource {
            objects: vec![message_object("m1", "", "", "hello")],
            fail: false,
        };
        let sink = FakeSink::default();
        let deleter = FakeDeleter::default();

        for _ in 0..2 {
            run_domain_cycle(
                &paths,
                &cfg,
                Domain::Teams,
                &source,
                &sink,
                &deleter,
                CyclePlan::full(),
            )
            .expect("cycle");
        }

        // Indexed once; the second pass saw an unchanged hash.
        assert_eq!(sink.created.borrow().len(), 1);
    }

    #[test]
    fn vanished_objects_are_dispatched_and_dropped_from_ledger() {
        let tmp = tempdir().expect("tempdir");
        let paths = paths_in(tmp.path());
        let cfg = SyncConfig::default();
        let sink = FakeSink::default();
        let deleter = FakeDeleter::default();

        let first = FakeSource {
            objects: vec![
                SourceObject::container("t1".into(), ObjectKind::Team, "", ""),
                message_object("m1", "t1", "", "hello"),
            ],
            fail: false,
        };
        run_domain_cycle(
            &paths,
            &cfg,
            Domain::Teams,
            &first,
            &sink,
            &deleter,
            CyclePlan::full(),
        )
        .expect("cycle");

        let second = FakeSource {
            objects: vec![SourceObject::container("t1".into(), ObjectKind::Team, "", "")],
            fail: false,
        };
        let outcome = run_domain_cycle(
            &paths,
            &cfg,
            Domain::Teams,
            &second,
            &sink,
            &deleter,
            CyclePlan::full(),
        )
        .expect("cycle");

        let deletion = outcome.deletion.expect("deletion ran");
        assert_eq!(deletion.ids_to_delete, vec!["m1".to_string()]);
        assert_eq!(deleter.deleted.borrow().as_slice(), ["m1".to_string()]);

        let ledger = ledger::load(&paths, Domain::Teams).expect("load");
        assert_eq!(ledger.global_keys.len(), 1);
        assert_eq!(ledger.global_keys[0].id, "t1");
    }

    #[test]
    fn failed_live_fetch_leaves_ledger_untouched() {
        let tmp = tempdir().expect("tempdir");
        let paths = paths_in(tmp.path());
        let cfg = SyncConfig::default();
        let sink = FakeSink::default();
        let deleter = FakeDeleter::default();

        let seeded = FakeSource {
            objects: vec![message_object("m1", "", "", "hello")],
            fail: false,
        };
        run_domain_cycle(
            &paths,
            &cfg,
            Domain::Teams,
            &seeded,
            &sink,
            &deleter,
            CyclePlan::full(),
        )
        .expect("cycle");
        let before = std::fs::read_to_string(ledger::ledger_path(&paths, Domain::Teams))
            .expect("read ledger");

        let failing = FakeSource {
            objects: Vec::new(),
            fail: true,
        };
        let err = run_domain_cycle(
            &paths,
            &cfg,
            Domain::Teams,
            &failing,
            &sink,
            &deleter,
            CyclePlan::full(),
        );
        assert!(err.is_err());

        let after = std::fs::read_to_string(ledger::ledger_path(&paths, Domain::Teams))
            .expect("read ledger");
        assert_eq!(before, after);
    }

    #[test]
    fn dry_run_reports_deletions_without_dispatch_or_persist() {
        let tmp = tempdir().expect("tempdir");
        let paths = paths_in(tmp.path());
        let cfg = SyncConfig::default();
        let sink = FakeSink::default();
        let deleter = FakeDeleter::default();

        let seeded = FakeSource {
            objects: vec![message_object("m1", "", "", "hello")],
            fail: false,
        };
        run_domain_cycle(
            &paths,
            &cfg,
            Domain::Teams,
            &seeded,
            &sink,
            &deleter,
            CyclePlan::full(),
        )
        .expect("cycle");

        let empty = FakeSource {
            objects: Vec::new(),
            fail: false,
        };
        let outcome = run_domain_cycle(
            &paths,
            &cfg,
            Domain::Teams,
            &empty,
            &sink,
            &deleter,
            CyclePlan::reconcile_only(true),
        )
        .expect("cycle");

        let deletion = outcome.deletion.expect("deletion ran");
        assert_eq!(deletion.ids_to_delete, vec!["m1".to_string()]);
        assert!(deletion.dispatch.is_none());
        assert!(deleter.deleted.borrow().is_empty());

        // Nothing persisted: the entry is still in the on-disk ledger.
        let ledger = ledger::load(&paths, Domain::Teams).expect("load");
        assert_eq!(ledger.global_keys.len(), 1);
    }
}
