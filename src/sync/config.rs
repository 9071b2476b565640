use crate::sync::domain::{ALL_DOMAINS, Domain};
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub poll_interval_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    pub login_url: String,
    pub tenant_id: String,
    pub client_id: String,
    /// Never read from the config file; env only (GRAPHSYNC_CLIENT_SECRET).
    #[serde(skip)]
    pub client_secret: String,
    pub lookback_days: u64,
    pub page_size: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://graph.microsoft.com".to_string(),
            login_url: "https://login.microsoftonline.com".to_string(),
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            lookback_days: 180,
            page_size: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub base_url: String,
    pub content_source_id: String,
    /// Env only (GRAPHSYNC_INDEX_API_KEY).
    #[serde(skip)]
    pub api_key: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            content_source_id: String::new(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeletionConfig {
    pub batch_size: usize,
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            batch_size: crate::sync::dispatch::DELETE_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainsConfig {
    pub teams: bool,
    pub user_chats: bool,
    pub calendar: bool,
}

impl Default for DomainsConfig {
    fn default() -> Self {
        Self {
            teams: true,
            user_chats: true,
            calendar: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncConfig {
    pub watcher: WatcherConfig,
    pub source: SourceConfig,
    pub index: IndexConfig,
    pub deletion: DeletionConfig,
    pub domains: DomainsConfig,
}

impl SyncConfig {
    pub fn domain_enabled(&self, domain: Domain) -> bool {
        match domain {
            Domain::Teams => self.domains.teams,
            Domain::UserChats => self.domains.user_chats,
            Domain::Calendar => self.domains.calendar,
        }
    }

    pub fn enabled_domains(&self) -> Vec<Domain> {
        ALL_DOMAINS
            .into_iter()
            .filter(|d| self.domain_enabled(*d))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialSyncConfig {
    watcher: Option<WatcherConfig>,
    source: Option<SourceConfig>,
    index: Option<IndexConfig>,
    deletion: Option<DeletionConfig>,
    domains: Option<DomainsConfig>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_usize(var: &str, fallback: usize) -> usize {
    match env::var(var) {
        Ok(v) => v.trim().parse::<usize>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => {
            let trimmed = v.trim();
            match trimmed {
                "1" | "true" | "TRUE" | "yes" | "on" => true,
                "0" | "false" | "FALSE" | "no" | "off" => false,
                _ => fallback,
            }
        }
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn validate(cfg: &SyncConfig) -> Result<()> {
    if cfg.watcher.poll_interval_secs == 0 {
        return Err(anyhow!(
            "invalid watcher poll interval: must be >= 1 second"
        ));
    }
    if cfg.deletion.batch_size == 0 || cfg.deletion.batch_size > 1000 {
        return Err(anyhow!(
            "invalid deletion batch size: require 1 <= batch_size <= 1000"
        ));
    }
    if cfg.source.lookback_days == 0 {
        return Err(anyhow!("invalid source lookback: must be >= 1 day"));
    }
    if cfg.source.page_size == 0 || cfg.source.page_size > 999 {
        return Err(anyhow!("invalid source page size: require 1 <= page_size <= 999"));
    }
    if cfg.source.base_url.trim().is_empty() {
        return Err(anyhow!("invalid source base url: cannot be empty"));
    }
    Ok(())
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("GRAPHSYNC_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let home = dirs::home_dir()?;
    Some(home.join(".graphsync").join("graphsync.toml"))
}

fn merge_file_config(base: &mut SyncConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    let parsed: PartialSyncConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse config {}: {err}", path.display()))?;
    if let Some(watcher) = parsed.watcher {
        base.watcher = watcher;
    }
    if let Some(source) = parsed.source {
        base.source = source;
    }
    if let Some(index) = parsed.index {
        base.index = index;
    }
    if let Some(deletion) = parsed.deletion {
        base.deletion = deletion;
    }
    if let Some(domains) = parsed.domains {
        base.domains = domains;
    }
    Ok(())
}

pub fn load_config() -> Result<SyncConfig> {
    let mut cfg = SyncConfig::default();
    merge_file_config(&mut cfg)?;

    cfg.watcher.poll_interval_secs =
        env_or_u64("GRAPHSYNC_POLL_INTERVAL_SECS", cfg.watcher.poll_interval_secs);
    cfg.source.base_url = env_or_string("GRAPHSYNC_SOURCE_BASE_URL", &cfg.source.base_url);
    cfg.source.login_url = env_or_string("GRAPHSYNC_LOGIN_URL", &cfg.source.login_url);
    cfg.source.tenant_id = env_or_string("GRAPHSYNC_TENANT_ID", &cfg.source.tenant_id);
    cfg.source.client_id = env_or_string("GRAPHSYNC_CLIENT_ID", &cfg.source.client_id);
    cfg.source.client_secret = env_or_string("GRAPHSYNC_CLIENT_SECRET", "");
    cfg.source.lookback_days = env_or_u64("GRAPHSYNC_LOOKBACK_DAYS", cfg.source.lookback_days);
    cfg.source.page_size = env_or_u64("GRAPHSYNC_PAGE_SIZE", cfg.source.page_size);
    cfg.index.base_url = env_or_string("GRAPHSYNC_INDEX_BASE_URL", &cfg.index.base_url);
    cfg.index.content_source_id = env_or_string(
        "GRAPHSYNC_INDEX_CONTENT_SOURCE_ID",
        &cfg.index.content_source_id,
    );
    cfg.index.api_key = env_or_string("GRAPHSYNC_INDEX_API_KEY", "");
    cfg.deletion.batch_size = env_or_usize("GRAPHSYNC_DELETE_BATCH_SIZE", cfg.deletion.batch_size);
    cfg.domains.teams = env_or_bool("GRAPHSYNC_DOMAIN_TEAMS", cfg.domains.teams);
    cfg.domains.user_chats = env_or_bool("GRAPHSYNC_DOMAIN_USER_CHATS", cfg.domains.user_chats);
    cfg.domains.calendar = env_or_bool("GRAPHSYNC_DOMAIN_CALENDAR", cfg.domains.calendar);

    validate(&cfg)?;
    Ok(cfg)
}
