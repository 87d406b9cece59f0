/// Message model and conversation key derivation
use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};

/// Joins the two sorted participant ids; not expected to appear in ids
pub const KEY_SEPARATOR: char = '_';

/// Snapshot text after the backing message is soft-deleted
pub const DELETED_PLACEHOLDER: &str = "Message deleted";

/// Deterministic, order-independent conversation key for two accounts:
/// the ids sorted lexicographically and joined with [`KEY_SEPARATOR`].
/// `conversation_key(a, b) == conversation_key(b, a)` for all inputs.
pub fn conversation_key(a: &str, b: &str) -> Result<String> {
    if a.is_empty() || b.is_empty() {
        return Err(ChatError::InvalidAccount(
            "conversation key requires two resolved account ids".to_string(),
        ));
    }

    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    Ok(format!("{}{}{}", lo, KEY_SEPARATOR, hi))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
}

/// One entry in a conversation's append-only log. Immutable once created
/// except for the sender's edit/soft-delete and the recipient-driven seen
/// flag; the timestamp is the sort key and never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender: String,
    pub receiver: String,
    pub time_stamp: i64,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub seen: bool,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub deleted: bool,
}

/// Caller-supplied fields of a message about to be appended
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub sender: String,
    pub receiver: String,
    pub kind: MessageKind,
    pub text: String,
    pub attachment: Option<String>,
    pub reply_to: Option<String>,
}

impl OutgoingMessage {
    pub fn text(sender: &str, receiver: &str, text: &str) -> Self {
        Self {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            kind: MessageKind::Text,
            text: text.to_string(),
            attachment: None,
            reply_to: None,
        }
    }

    pub fn image(sender: &str, receiver: &str, url: &str) -> Self {
        Self {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            kind: MessageKind::Image,
            text: String::new(),
            attachment: Some(url.to_string()),
            reply_to: None,
        }
    }

    pub fn replying_to(mut self, message_id: &str) -> Self {
        self.reply_to = Some(message_id.to_string());
        self
    }
}

/// Denormalized copy of the most recent message, kept on the conversation
/// node and mirrored into both participants' inbox rows for O(1) previews
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub text: String,
    pub sender: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub seen: bool,
    pub time_stamp: i64,
}

impl From<&Message> for LastMessage {
    fn from(msg: &Message) -> Self {
        Self {
            text: msg.text.clone(),
            sender: msg.sender.clone(),
            kind: msg.kind,
            seen: msg.seen,
            time_stamp: msg.time_stamp,
        }
    }
}

/// The two participants of a conversation, in key (sorted) order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participants {
    pub a: String,
    pub b: String,
}

impl Participants {
    pub fn of(x: &str, y: &str) -> Self {
        let (a, b) = if x <= y { (x, y) } else { (y, x) };
        Self {
            a: a.to_string(),
            b: b.to_string(),
        }
    }

    pub fn other(&self, account_id: &str) -> &str {
        if self.a == account_id {
            &self.b
        } else {
            &self.a
        }
    }
}
