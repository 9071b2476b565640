use crate::sync::domain::Domain;
use crate::sync::paths::SyncPaths;
use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs;
use std::fs::File;
use std::path::PathBuf;

/// Exclusive per-domain lock. Only one cycle may touch a domain's ledger
/// at a time; a second process (or an overlapping daemon wake-up) must
/// skip the domain instead of corrupting the ledger file.
#[derive(Debug)]
pub struct DomainLock {
    file: File,
}

fn lock_path(paths: &SyncPaths, domain: Domain) -> PathBuf {
    paths.locks_dir.join(format!("{}.lock", domain.label()))
}

pub fn try_acquire(paths: &SyncPaths, domain: Domain) -> Result<Option<DomainLock>> {
    fs::create_dir_all(&paths.locks_dir)
        .with_context(|| format!("failed to create {}", paths.locks_dir.display()))?;

    let path = lock_path(paths, domain);
    let file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    match file.try_lock_exclusive() {
        Ok(()) => Ok(Some(DomainLock { file })),
        Err(_) => Ok(None),
    }
}

impl Drop for DomainLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
