use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct SyncPaths {
    pub sync_home: PathBuf,
    pub ledgers_dir: PathBuf,
    pub state_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub locks_dir: PathBuf,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<SyncPaths> {
    let home = required_home_dir()?;
    let sync_home = env_or_default_path("GRAPHSYNC_HOME", home.join(".graphsync"));

    let ledgers_dir = env_or_default_path("GRAPHSYNC_LEDGERS_DIR", sync_home.join("ledgers"));
    let state_dir = env_or_default_path("GRAPHSYNC_STATE_DIR", sync_home.join("state"));
    let logs_dir = env_or_default_path("GRAPHSYNC_LOGS_DIR", sync_home.join("logs"));
    let locks_dir = env_or_default_path("GRAPHSYNC_LOCKS_DIR", sync_home.join("locks"));

    Ok(SyncPaths {
        sync_home,
        ledgers_dir,
        state_dir,
        logs_dir,
        locks_dir,
    })
}
