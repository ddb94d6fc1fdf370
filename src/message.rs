use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::config::{resolve_folder, AccountConfig};
use crate::headers::HeaderBlock;
use crate::sort::normalize_subject;

/// Stable identity of a message: account, folder and per-folder uid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub account: String,
    pub folder: String,
    pub uid: String,
}

impl MessageRef {
    pub fn new(account: impl Into<String>, folder: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            folder: folder.into(),
            uid: uid.into(),
        }
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.account, self.folder, self.uid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub name: Option<String>,
    pub email: String,
}

impl Address {
    /// Name only (for compact list views), falls back to email.
    pub fn short_display(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.email.clone())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} <{}>", name, self.email),
            None => write!(f, "{}", self.email),
        }
    }
}

/// Comma-separated short names, the way the list shows senders and recipients.
pub fn to_friendly(addresses: &[Address]) -> String {
    addresses
        .iter()
        .map(Address::short_display)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flag {
    Seen,
    Answered,
    Flagged,
    Deleted,
    DownloadedFull,
    DownloadedPartial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadState {
    #[default]
    NotDownloaded,
    Partial,
    Full,
}

/// A message as delivered by the storage and sync layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSnapshot {
    pub reference: MessageRef,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub from: Vec<Address>,
    #[serde(default)]
    pub to: Vec<Address>,
    #[serde(default)]
    pub sent_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub internal_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub flags: Vec<Flag>,
    #[serde(default)]
    pub attachment_count: u32,
    #[serde(default)]
    pub preview: String,
    #[serde(default)]
    pub headers: HeaderBlock,
}

impl MessageSnapshot {
    pub fn is_set(&self, flag: Flag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn is_deleted(&self) -> bool {
        self.is_set(Flag::Deleted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderInfo {
    pub name: String,
    pub display_name: String,
}

/// Per-message state held by the sorted collection.
///
/// Every field except the reference and the selection flag is derived from
/// the latest [`MessageSnapshot`] by [`MessageRecord::populate`].
#[derive(Debug, Clone)]
pub struct MessageRecord {
    reference: MessageRef,
    pub subject: String,
    pub sort_subject: String,
    pub sender: String,
    pub sort_counterparty: String,
    pub compare_date: DateTime<Utc>,
    pub date_label: String,
    pub preview: String,
    pub read: bool,
    pub answered: bool,
    pub flagged: bool,
    pub has_attachments: bool,
    pub download: DownloadState,
    pub folder: Option<FolderInfo>,
    pub headers: HeaderBlock,
    pub selected: bool,
}

impl MessageRecord {
    pub fn from_snapshot(snapshot: &MessageSnapshot, accounts: &[AccountConfig]) -> Self {
        let mut record = Self {
            reference: snapshot.reference.clone(),
            subject: String::new(),
            sort_subject: String::new(),
            sender: String::new(),
            sort_counterparty: String::new(),
            compare_date: DateTime::<Utc>::default(),
            date_label: String::new(),
            preview: String::new(),
            read: false,
            answered: false,
            flagged: false,
            has_attachments: false,
            download: DownloadState::NotDownloaded,
            folder: None,
            headers: HeaderBlock::default(),
            selected: false,
        };
        record.populate(snapshot, accounts);
        record
    }

    pub fn reference(&self) -> &MessageRef {
        &self.reference
    }

    pub(crate) fn rename_uid(&mut self, uid: String) {
        self.reference.uid = uid;
    }

    /// Re-derive every field from a fresh snapshot. Identity and selection
    /// are left alone.
    pub fn populate(&mut self, snapshot: &MessageSnapshot, accounts: &[AccountConfig]) {
        let reference = &self.reference;
        let account = accounts.iter().find(|a| a.name == reference.account);

        self.compare_date = snapshot
            .sent_date
            .or(snapshot.internal_date)
            .unwrap_or_default();
        self.date_label = date_display(self.compare_date, Utc::now());

        self.folder = match resolve_folder(accounts, &reference.account, &reference.folder) {
            Ok(info) => Some(info),
            Err(e) => {
                debug!(message = %reference, "folder lookup skipped: {e:#}");
                None
            }
        };

        let outgoing = snapshot
            .from
            .first()
            .zip(account)
            .is_some_and(|(addr, account)| account.is_identity(&addr.email));
        if outgoing {
            let recipients = to_friendly(&snapshot.to);
            self.sender = format!("To: {}", recipients);
            self.sort_counterparty = recipients.to_lowercase();
        } else {
            self.sender = to_friendly(&snapshot.from);
            self.sort_counterparty = self.sender.to_lowercase();
        }

        self.subject = snapshot.subject.clone();
        self.sort_subject = normalize_subject(&snapshot.subject);
        self.preview = snapshot.preview.clone();
        self.has_attachments = snapshot.attachment_count > 0;
        self.read = snapshot.is_set(Flag::Seen);
        self.answered = snapshot.is_set(Flag::Answered);
        self.flagged = snapshot.is_set(Flag::Flagged);
        self.download = if snapshot.is_set(Flag::DownloadedFull) {
            DownloadState::Full
        } else if snapshot.is_set(Flag::DownloadedPartial) {
            DownloadState::Partial
        } else {
            DownloadState::NotDownloaded
        };
        self.headers = snapshot.headers.clone();
    }

    pub fn is_unread(&self) -> bool {
        !self.read
    }
}

/// Compact date label relative to `now`.
pub fn date_display(date: DateTime<Utc>, now: DateTime<Utc>) -> String {
    if now.date_naive() == date.date_naive() {
        date.format("%H:%M").to_string()
    } else if (now - date).num_days() < 7 && date <= now {
        date.format("%a %H:%M").to_string()
    } else if now.format("%Y").to_string() == date.format("%Y").to_string() {
        date.format("%b %d").to_string()
    } else {
        date.format("%Y-%m-%d").to_string()
    }
}
