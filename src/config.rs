use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::grouping::GroupingMode;
use crate::message::FolderInfo;
use crate::sort::SortPreferences;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Quiet period before a regrouping pass runs.
    pub cooldown_ms: u64,
    pub grouping: GroupingMode,
    pub sort: SortPreferences,
    pub accounts: Vec<AccountConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cooldown_ms: 200,
            grouping: GroupingMode::Thread,
            sort: SortPreferences::default(),
            accounts: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
pub struct AccountConfig {
    pub name: String,
    /// Addresses that make a message "outgoing" for this account.
    #[serde(default)]
    pub identities: Vec<String>,
    #[serde(default)]
    pub folders: FolderConfig,
}

impl AccountConfig {
    pub fn is_identity(&self, email: &str) -> bool {
        self.identities
            .iter()
            .any(|id| id.eq_ignore_ascii_case(email))
    }

    /// Display name of a folder, with the role spelled out for special ones.
    pub fn folder_info(&self, folder: &str) -> FolderInfo {
        let f = &self.folders;
        let display_name = if folder == f.inbox {
            "Inbox".to_string()
        } else if folder == f.outbox {
            "Outbox".to_string()
        } else if folder == f.drafts {
            format!("{} (Drafts)", folder)
        } else if folder == f.sent {
            format!("{} (Sent)", folder)
        } else if folder == f.trash {
            format!("{} (Trash)", folder)
        } else if folder == f.spam {
            format!("{} (Spam)", folder)
        } else {
            folder.to_string()
        };
        FolderInfo {
            name: folder.to_string(),
            display_name,
        }
    }
}

// ---------------------------------------------------------------------------
// Folder mapping
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FolderConfig {
    pub inbox: String,
    pub outbox: String,
    pub drafts: String,
    pub sent: String,
    pub trash: String,
    pub spam: String,
}

impl Default for FolderConfig {
    fn default() -> Self {
        Self {
            inbox: "INBOX".to_string(),
            outbox: "Outbox".to_string(),
            drafts: "Drafts".to_string(),
            sent: "Sent".to_string(),
            trash: "Trash".to_string(),
            spam: "Spam".to_string(),
        }
    }
}

/// Look up `account` and describe `folder` within it.
pub fn resolve_folder(accounts: &[AccountConfig], account: &str, folder: &str) -> Result<FolderInfo> {
    if folder.is_empty() {
        bail!("empty folder name for account {}", account);
    }
    let acct = accounts
        .iter()
        .find(|a| a.name == account)
        .with_context(|| format!("unknown account {}", account))?;
    Ok(acct.folder_info(folder))
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn account(&self, name: &str) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| a.name == name)
    }

    /// Try to load the configuration file from, in order:
    ///
    /// 1. `$THREADLIST_CONFIG`
    /// 2. `$XDG_CONFIG_HOME/threadlist/config.toml`
    /// 3. `~/.config/threadlist/config.toml`
    ///
    /// If none of these paths exist, return a default `Config`.
    pub fn load() -> Result<Self> {
        if let Some(path) = Self::locate() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("failed to parse config file {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    fn locate() -> Option<PathBuf> {
        Self::candidate_paths().into_iter().find(|p| p.is_file())
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Ok(p) = std::env::var("THREADLIST_CONFIG") {
            paths.push(PathBuf::from(p));
        }

        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("threadlist").join("config.toml"));
        }

        if let Ok(home) = std::env::var("HOME") {
            paths.push(
                PathBuf::from(home)
                    .join(".config")
                    .join("threadlist")
                    .join("config.toml"),
            );
        }

        paths
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
