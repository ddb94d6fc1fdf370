//! Message-id and reference extraction for conversation threading.

use mail_parser::{HeaderValue, MessageParser};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("raw header block is empty")]
    Empty,
    #[error("raw header block could not be parsed")]
    Unparseable,
    #[error("malformed message id {0:?}")]
    MalformedId(String),
}

/// Threading headers as delivered upstream: either values already pulled out
/// of the message, or the raw header block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderBlock {
    Raw {
        raw: String,
    },
    Parsed {
        #[serde(default)]
        message_id: Option<String>,
        /// Raw `References` header values; each may hold several ids.
        #[serde(default)]
        references: Vec<String>,
        #[serde(default)]
        in_reply_to: Vec<String>,
    },
}

impl Default for HeaderBlock {
    fn default() -> Self {
        HeaderBlock::Parsed {
            message_id: None,
            references: Vec::new(),
            in_reply_to: Vec::new(),
        }
    }
}

/// The labels one message contributes to the reference graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceInfo {
    pub message_id: Option<String>,
    pub references: Vec<String>,
}

impl ReferenceInfo {
    /// Own id first, then references. All are equivalent for clustering.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.message_id
            .iter()
            .chain(self.references.iter())
            .map(String::as_str)
    }
}

impl HeaderBlock {
    pub fn reference_info(&self) -> Result<ReferenceInfo, HeaderError> {
        match self {
            HeaderBlock::Parsed {
                message_id,
                references,
                in_reply_to,
            } => build_info(
                message_id.as_deref(),
                references,
                in_reply_to.first().map(String::as_str),
            ),
            HeaderBlock::Raw { raw } => {
                if raw.trim().is_empty() {
                    return Err(HeaderError::Empty);
                }
                let message = MessageParser::default()
                    .parse(raw.as_bytes())
                    .ok_or(HeaderError::Unparseable)?;
                let references = header_ids(message.references());
                let in_reply_to = header_ids(message.in_reply_to());
                build_info(
                    message.message_id(),
                    &references,
                    in_reply_to.first().map(String::as_str),
                )
            }
        }
    }
}

fn header_ids(value: &HeaderValue<'_>) -> Vec<String> {
    match value {
        HeaderValue::Text(id) => vec![id.to_string()],
        HeaderValue::TextList(ids) => ids.iter().map(|id| id.to_string()).collect(),
        _ => Vec::new(),
    }
}

fn build_info(
    message_id: Option<&str>,
    references: &[String],
    in_reply_to: Option<&str>,
) -> Result<ReferenceInfo, HeaderError> {
    let message_id = match message_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) if id.contains(char::is_whitespace) => {
            return Err(HeaderError::MalformedId(id.to_string()));
        }
        Some(id) => normalize_id(id),
        None => None,
    };

    let mut ids: Vec<String> = Vec::new();
    let tokens = references
        .iter()
        .flat_map(|value| value.split_whitespace())
        .chain(in_reply_to.into_iter().flat_map(str::split_whitespace).take(1));
    for token in tokens {
        if let Some(id) = normalize_id(token) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }

    Ok(ReferenceInfo {
        message_id,
        references: ids,
    })
}

/// Strip surrounding angle brackets so parsed and raw ids compare equal.
fn normalize_id(id: &str) -> Option<String> {
    let id = id.trim().trim_start_matches('<').trim_end_matches('>').trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}
