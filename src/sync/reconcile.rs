use crate::sync::ledger::{DomainLedger, LedgerEntry};
use std::collections::{BTreeMap, BTreeSet};

/// Ids confirmed to exist at the source right now. Liveness is checked by
/// id only; parent linkage and kind never enter the comparison.
#[derive(Debug, Clone, Default)]
pub struct LiveSet {
    ids: BTreeSet<String>,
}

impl LiveSet {
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    /// Ids to retract from the index, in visitation order. May contain
    /// duplicates when the same id was ledgered under several parents.
    pub ids_to_delete: Vec<String>,
    pub examined: usize,
    pub exempt_retained: usize,
}

/// Diff the frozen `delete_keys` snapshot against the live set and drop
/// confirmed-dead entries from `global_keys`.
///
/// The walk is depth-first pre-order over parent linkage, starting at the
/// empty-string root. Every entry's children are visited unconditionally:
/// a live parent's children are still checked, and an orphaned parent's
/// children are judged on their own liveness rather than assumed dead.
/// Exempt kinds are never scheduled for deletion but are traversed.
pub fn reconcile(ledger: &mut DomainLedger, live: &LiveSet) -> ReconcileOutcome {
    let DomainLedger {
        global_keys,
        delete_keys,
    } = ledger;

    let children = child_index(delete_keys);
    let mut outcome = ReconcileOutcome::default();
    walk(&children, live, global_keys, "", "", &mut outcome);
    outcome
}

/// One pass over the snapshot builds the parent_id → children map, so
/// each recursion level is a lookup instead of a scan of the whole list.
/// Visitation order matches the snapshot's insertion order per level.
fn child_index(snapshot: &[LedgerEntry]) -> BTreeMap<&str, Vec<&LedgerEntry>> {
    let mut index: BTreeMap<&str, Vec<&LedgerEntry>> = BTreeMap::new();
    for entry in snapshot {
        index.entry(entry.parent_id.as_str()).or_default().push(entry);
    }
    index
}

fn walk<'a>(
    children: &BTreeMap<&str, Vec<&'a LedgerEntry>>,
    live: &LiveSet,
    global_keys: &mut Vec<LedgerEntry>,
    parent_id: &str,
    super_parent_id: &str,
    outcome: &mut ReconcileOutcome,
) {
    let Some(level) = children.get(parent_id) else {
        return;
    };

    for entry in level {
        outcome.examined += 1;

        if !live.contains(&entry.id) {
            if entry.kind.is_exempt() {
                outcome.exempt_retained += 1;
            } else {
                outcome.ids_to_delete.push(entry.id.clone());
                // Matched by full record, not id: a sibling entry with the
                // same id under another parent keeps its own slot.
                if let Some(pos) = global_keys.iter().position(|g| g == *entry) {
                    global_keys.remove(pos);
                }
            }
        }

        // A self-parented record would recurse forever; skip descending.
        if entry.id != parent_id {
            walk(
                children,
                live,
                global_keys,
                &entry.id,
                super_parent_id,
                outcome,
            );
        }
    }
}
