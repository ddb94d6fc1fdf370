use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::message::MessageRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Date,
    Subject,
    Sender,
    Flagged,
    Unread,
    Attachment,
}

impl SortKey {
    pub const ALL: [SortKey; 6] = [
        SortKey::Date,
        SortKey::Subject,
        SortKey::Sender,
        SortKey::Flagged,
        SortKey::Unread,
        SortKey::Attachment,
    ];

    /// The key after this one, wrapping around.
    pub fn next(self) -> SortKey {
        let idx = Self::ALL.iter().position(|k| *k == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }
}

/// A fully resolved comparator: active key plus the two direction flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderingPolicy {
    pub key: SortKey,
    pub ascending: bool,
    pub date_ascending: bool,
}

impl Default for OrderingPolicy {
    fn default() -> Self {
        Self {
            key: SortKey::Date,
            ascending: false,
            date_ascending: false,
        }
    }
}

impl OrderingPolicy {
    pub fn compare(&self, a: &MessageRecord, b: &MessageRecord) -> Ordering {
        let primary = match self.key {
            SortKey::Date => Ordering::Equal,
            SortKey::Subject => a.sort_subject.cmp(&b.sort_subject),
            SortKey::Sender => a.sort_counterparty.cmp(&b.sort_counterparty),
            // `true` first when ascending
            SortKey::Flagged => b.flagged.cmp(&a.flagged),
            SortKey::Attachment => b.has_attachments.cmp(&a.has_attachments),
            // unread first when ascending
            SortKey::Unread => a.read.cmp(&b.read),
        };
        if primary != Ordering::Equal {
            return if self.ascending {
                primary
            } else {
                primary.reverse()
            };
        }

        let by_date = a.compare_date.cmp(&b.compare_date);
        if self.date_ascending {
            by_date
        } else {
            by_date.reverse()
        }
    }
}

/// Per-key direction preferences, remembered across sort changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Directions {
    pub date: bool,
    pub subject: bool,
    pub sender: bool,
    pub flagged: bool,
    pub unread: bool,
    pub attachment: bool,
}

impl Default for Directions {
    fn default() -> Self {
        Self {
            date: false,
            subject: true,
            sender: true,
            flagged: true,
            unread: true,
            attachment: true,
        }
    }
}

impl Directions {
    pub fn get(&self, key: SortKey) -> bool {
        match key {
            SortKey::Date => self.date,
            SortKey::Subject => self.subject,
            SortKey::Sender => self.sender,
            SortKey::Flagged => self.flagged,
            SortKey::Unread => self.unread,
            SortKey::Attachment => self.attachment,
        }
    }

    pub fn set(&mut self, key: SortKey, ascending: bool) {
        let slot = match key {
            SortKey::Date => &mut self.date,
            SortKey::Subject => &mut self.subject,
            SortKey::Sender => &mut self.sender,
            SortKey::Flagged => &mut self.flagged,
            SortKey::Unread => &mut self.unread,
            SortKey::Attachment => &mut self.attachment,
        };
        *slot = ascending;
    }
}

/// The user's sort choice: `[sort]` in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SortPreferences {
    pub key: SortKey,
    pub ascending: Directions,
}

impl SortPreferences {
    pub fn policy(&self) -> OrderingPolicy {
        OrderingPolicy {
            key: self.key,
            ascending: self.ascending.get(self.key),
            date_ascending: self.ascending.get(SortKey::Date),
        }
    }

    /// Selecting the active key again flips its direction.
    pub fn change_sort(&mut self, key: SortKey) {
        if self.key == key {
            self.toggle_ascending();
        } else {
            self.key = key;
        }
    }

    pub fn toggle_ascending(&mut self) {
        let current = self.ascending.get(self.key);
        self.ascending.set(self.key, !current);
    }

    pub fn cycle(&mut self) {
        self.key = self.key.next();
    }
}

const REPLY_MARKERS: [&str; 4] = ["fwd", "re", "aw", "fw"];

/// Strip the leading chain of reply/forward markers (`Re:`, `AW:`, `Fwd:`...).
///
/// Returns the original subject if nothing would be left.
pub fn strip_reply_prefixes(subject: &str) -> &str {
    let mut rest = subject;
    while let Some(after) = strip_marker(rest.trim_start()) {
        rest = after;
    }
    let rest = rest.trim_start();
    if rest.is_empty() {
        subject
    } else {
        rest
    }
}

fn strip_marker(s: &str) -> Option<&str> {
    for marker in REPLY_MARKERS {
        let Some(head) = s.get(..marker.len()) else {
            continue;
        };
        if !head.eq_ignore_ascii_case(marker) {
            continue;
        }
        let after = &s[marker.len()..];
        if after.chars().next().is_some_and(char::is_alphanumeric) {
            continue;
        }
        return Some(after.trim_start_matches(|c: char| c.is_ascii_punctuation()));
    }
    None
}

/// Sort form of a subject: markers stripped, lower case.
pub fn normalize_subject(subject: &str) -> String {
    strip_reply_prefixes(subject).to_lowercase()
}
