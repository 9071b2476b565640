use crate::sync::domain::Domain;
use crate::sync::paths::SyncPaths;
use crate::sync::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// Closed set of object kinds the connector tracks. The wire form is the
/// snake_case label, stored in the ledger's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Team,
    Channel,
    ChannelMessage,
    ChannelDocument,
    ChannelTab,
    ChannelDrive,
    ChannelRoot,
    ChannelDriveItem,
    Chat,
    UserChatMessage,
    UserChatAttachment,
    UserChatDrive,
    UserChatDriveItem,
    UserChatTab,
    Meeting,
    MeetingRecording,
    User,
}

impl ObjectKind {
    /// Container and infrastructure kinds are never deleted by
    /// reconciliation: the source API does not expose them as
    /// independently listable objects, so absence from a snapshot does
    /// not imply deletion.
    pub fn is_exempt(self) -> bool {
        matches!(
            self,
            ObjectKind::User
                | ObjectKind::Chat
                | ObjectKind::UserChatDrive
                | ObjectKind::UserChatDriveItem
                | ObjectKind::ChannelDrive
                | ObjectKind::ChannelRoot
                | ObjectKind::ChannelDriveItem
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            ObjectKind::Team => "team",
            ObjectKind::Channel => "channel",
            ObjectKind::ChannelMessage => "channel_message",
            ObjectKind::ChannelDocument => "channel_document",
            ObjectKind::ChannelTab => "channel_tab",
            ObjectKind::ChannelDrive => "channel_drive",
            ObjectKind::ChannelRoot => "channel_root",
            ObjectKind::ChannelDriveItem => "channel_drive_item",
            ObjectKind::Chat => "chat",
            ObjectKind::UserChatMessage => "user_chat_message",
            ObjectKind::UserChatAttachment => "user_chat_attachment",
            ObjectKind::UserChatDrive => "user_chat_drive",
            ObjectKind::UserChatDriveItem => "user_chat_drive_item",
            ObjectKind::UserChatTab => "user_chat_tab",
            ObjectKind::Meeting => "meeting",
            ObjectKind::MeetingRecording => "meeting_recording",
            ObjectKind::User => "user",
        }
    }
}

/// One indexed object. A record is identified by the whole tuple; two
/// entries sharing an id under different parents are distinct records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ObjectKind,
    pub parent_id: String,
    pub super_parent_id: String,
}

/// Per-domain ledger. `global_keys` is the best-known set of indexed
/// objects and the only collection mutated during reconciliation;
/// `delete_keys` is the frozen traversal snapshot taken at cycle start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainLedger {
    pub global_keys: Vec<LedgerEntry>,
    pub delete_keys: Vec<LedgerEntry>,
}

pub fn ledger_path(paths: &SyncPaths, domain: Domain) -> PathBuf {
    paths.ledgers_dir.join(format!("{}.json", domain.label()))
}

/// Missing file yields an empty ledger. A malformed file is warned about
/// and replaced by an empty ledger rather than aborting the cycle —
/// liveness is rediscovered from scratch on the next pass.
pub fn load(paths: &SyncPaths, domain: Domain) -> Result<DomainLedger> {
    let file = ledger_path(paths, domain);
    if !file.exists() {
        return Ok(DomainLedger::default());
    }

    let raw =
        fs::read_to_string(&file).with_context(|| format!("failed to read {}", file.display()))?;
    match serde_json::from_str::<DomainLedger>(&raw) {
        Ok(parsed) => Ok(parsed),
        Err(err) => {
            warn::emit(WarnEvent {
                code: "LEDGER_CORRUPT",
                stage: "ledger-load",
                domain: domain.label(),
                object: &file.display().to_string(),
                retry: "rebuilt-next-cycle",
                reason: "malformed-json",
                err: &err.to_string(),
            });
            Ok(DomainLedger::default())
        }
    }
}

/// Atomic save: write to a temp file in the ledger directory, then
/// rename over the target. A crash mid-write leaves the previous ledger
/// intact.
pub fn save(paths: &SyncPaths, domain: Domain, ledger: &DomainLedger) -> Result<PathBuf> {
    let file = ledger_path(paths, domain);
    let dir = &paths.ledgers_dir;
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let data = serde_json::to_string_pretty(ledger)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    tmp.write_all(data.as_bytes())?;
    tmp.write_all(b"\n")?;
    tmp.persist(&file)
        .with_context(|| format!("failed to replace {}", file.display()))?;
    Ok(file)
}

/// Append a new entry iff no identical record exists. Returns whether the
/// collection changed, so callers can count fresh discoveries.
pub fn insert(
    entries: &mut Vec<LedgerEntry>,
    id: &str,
    kind: ObjectKind,
    parent_id: &str,
    super_parent_id: &str,
) -> bool {
    let candidate = LedgerEntry {
        id: id.to_string(),
        kind,
        parent_id: parent_id.to_string(),
        super_parent_id: super_parent_id.to_string(),
    };
    if entries.contains(&candidate) {
        return false;
    }
    entries.push(candidate);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn paths_in(dir: &std::path::Path) -> SyncPaths {
        SyncPaths {
            sync_home: dir.to_path_buf(),
            ledgers_dir: dir.join("ledgers"),
            state_dir: dir.join("state"),
            logs_dir: dir.join("logs"),
            locks_dir: dir.join("locks"),
        }
    }

    #[test]
    fn load_missing_file_yields_empty_ledger() {
        let tmp = tempdir().expect("tempdir");
        let ledger = load(&paths_in(tmp.path()), Domain::Teams).expect("load");
        assert!(ledger.global_keys.is_empty());
        assert!(ledger.delete_keys.is_empty());
    }

    #[test]
    fn load_malformed_file_falls_back_to_empty() {
        let tmp = tempdir().expect("tempdir");
        let paths = paths_in(tmp.path());
        fs::create_dir_all(&paths.ledgers_dir).expect("mkdir");
        fs::write(ledger_path(&paths, Domain::Teams), "{not json").expect("write");

        let ledger = load(&paths, Domain::Teams).expect("load");
        assert!(ledger.global_keys.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let tmp = tempdir().expect("tempdir");
        let paths = paths_in(tmp.path());

        let mut ledger = DomainLedger::default();
        insert(&mut ledger.global_keys, "t1", ObjectKind::Team, "", "");
        insert(&mut ledger.global_keys, "c1", ObjectKind::Channel, "t1", "");
        save(&paths, Domain::Teams, &ledger).expect("save");

        let reloaded = load(&paths, Domain::Teams).expect("load");
        assert_eq!(reloaded.global_keys, ledger.global_keys);
        assert!(reloaded.delete_keys.is_empty());
    }

    #[test]
    fn wire_format_uses_type_field_with_snake_case_kind() {
        let entry = LedgerEntry {
            id: "m1".into(),
            kind: ObjectKind::ChannelMessage,
            parent_id: "c1".into(),
            super_parent_id: "t1".into(),
        };
        let raw = serde_json::to_string(&entry).expect("serialize");
        assert!(raw.contains("\"type\":\"channel_message\""));
    }

    #[test]
    fn insert_is_idempotent_on_identical_records() {
        let mut entries = Vec::new();
        assert!(insert(&mut entries, "1", ObjectKind::Team, "", ""));
        assert!(!insert(&mut entries, "1", ObjectKind::Team, "", ""));
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn insert_keeps_same_id_under_different_parents() {
        let mut entries = Vec::new();
        assert!(insert(&mut entries, "tab1", ObjectKind::UserChatTab, "chatA", ""));
        assert!(insert(&mut entries, "tab1", ObjectKind::UserChatTab, "chatB", ""));
        assert_eq!(entries.len(), 2);
    }
}
