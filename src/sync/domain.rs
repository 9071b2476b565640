use anyhow::{Result, anyhow};

/// A sync domain owns one ledger file, one state file, and one lock file.
/// Domains never share mutable state and may run their cycles concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Domain {
    Teams,
    UserChats,
    Calendar,
}

pub const ALL_DOMAINS: [Domain; 3] = [Domain::Teams, Domain::UserChats, Domain::Calendar];

impl Domain {
    pub fn label(self) -> &'static str {
        match self {
            Domain::Teams => "teams",
            Domain::UserChats => "user_chats",
            Domain::Calendar => "calendar",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim() {
            "teams" => Ok(Domain::Teams),
            "user_chats" | "user-chats" | "chats" => Ok(Domain::UserChats),
            "calendar" => Ok(Domain::Calendar),
            other => Err(anyhow!(
                "unknown domain `{other}`: use teams, user_chats, or calendar"
            )),
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
