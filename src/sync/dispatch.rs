use crate::sync::domain::Domain;
use crate::sync::util::truncate_with_ellipsis;
use crate::sync::warn::{self, WarnEvent};
use anyhow::Result;
use serde::Deserialize;

pub const DELETE_BATCH_SIZE: usize = 100;

/// Per-id result of an index delete call.
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteResult {
    pub id: String,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteResponse {
    pub results: Vec<DeleteResult>,
}

/// The one index operation the deletion path needs. The HTTP client
/// implements this; tests substitute a recording fake.
pub trait EntryDeleter {
    fn delete_entries(&self, ids: &[String]) -> Result<DeleteResponse>;
}

#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    pub requested: usize,
    pub deleted: usize,
    pub failed_chunks: usize,
    pub failed_ids: Vec<String>,
}

/// Issue index deletes in bounded chunks. A chunk that errors out is
/// warned and abandoned; the remaining chunks are still attempted, so a
/// transient index failure never takes down the whole retraction pass.
pub fn delete_in_batches(
    deleter: &dyn EntryDeleter,
    domain: Domain,
    ids: &[String],
    batch_size: usize,
) -> DispatchOutcome {
    let mut outcome = DispatchOutcome {
        requested: ids.len(),
        ..DispatchOutcome::default()
    };

    for chunk in ids.chunks(batch_size.max(1)) {
        match deleter.delete_entries(chunk) {
            Ok(response) => {
                for result in response.results {
                    if result.errors.is_empty() {
                        outcome.deleted += 1;
                    } else {
                        warn::emit(WarnEvent {
                            code: "DELETE_REJECTED",
                            stage: "dispatch",
                            domain: domain.label(),
                            object: &result.id,
                            retry: "retry-next-cycle",
                            reason: "index-reported-errors",
                            err: &truncate_with_ellipsis(&result.errors.join("; "), 200),
                        });
                        outcome.failed_ids.push(result.id);
                    }
                }
            }
            Err(err) => {
                outcome.failed_chunks += 1;
                outcome.failed_ids.extend(chunk.iter().cloned());
                warn::emit(WarnEvent {
                    code: "DELETE_CHUNK_FAILED",
                    stage: "dispatch",
                    domain: domain.label(),
                    object: &format!("chunk_of_{}", chunk.len()),
                    retry: "remaining-chunks-still-run",
                    reason: "index-call-failed",
                    err: &truncate_with_ellipsis(&format!("{err:#}"), 200),
                });
            }
        }
    }

    outcome
}
