/// Chat operations: append-only message log, last-message snapshot,
/// unread counter protocol, and the denormalized inbox mirror.
///
/// Every mutation that touches conversation-level state writes identical
/// last-message content to the canonical conversation node and to both
/// participants' inbox rows. The writes are ordered but applied
/// independently (no multi-key transaction): a failure mid-sequence leaves
/// the log ahead of the summary until the next successful mutation, which
/// is a recoverable inconsistency rather than a fatal error.
use crate::error::{ChatError, Result};
use crate::identity::{IdentityResolver, Role};
use crate::message::{
    LastMessage, Message, OutgoingMessage, Participants, DELETED_PLACEHOLDER,
};
use crate::store::{StoreClient, Subscription};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(crate) fn messages_path(key: &str) -> String {
    format!("Conversations/{}/messages", key)
}

pub(crate) fn message_path(key: &str, message_id: &str) -> String {
    format!("Conversations/{}/messages/{}", key, message_id)
}

pub(crate) fn last_message_path(key: &str) -> String {
    format!("Conversations/{}/lastMessage", key)
}

pub(crate) fn unread_path(key: &str, account_id: &str) -> String {
    format!("Conversations/{}/unread/{}", key, account_id)
}

pub(crate) fn participants_path(key: &str) -> String {
    format!("Conversations/{}/participants", key)
}

pub(crate) fn inbox_row_path(account_id: &str, key: &str) -> String {
    format!("Inbox/{}/{}", account_id, key)
}

/// Denormalized per-viewer inbox row as stored under `Inbox/{viewer}/{key}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxRowDoc {
    pub counterpart: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterpart_role: Option<Role>,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub unread: u64,
    #[serde(default)]
    pub last_activity: i64,
}

#[derive(Clone)]
pub struct ChatService {
    store: Arc<StoreClient>,
    resolver: IdentityResolver,
}

impl ChatService {
    pub fn new(store: Arc<StoreClient>) -> Self {
        let resolver = IdentityResolver::new(store.clone());
        Self { store, resolver }
    }

    /// Append a message to the conversation log. Assigns the server push id
    /// as both ordering key and timestamp, then refreshes the last-message
    /// snapshot, the unread counters (receiver +1, sender forced to 0) and
    /// both inbox rows. Returns the generated message id.
    pub fn append(&self, key: &str, outgoing: OutgoingMessage) -> Result<String> {
        // A reply target must reference an existing message in this conversation
        if let Some(target) = &outgoing.reply_to {
            if self.store.get(&message_path(key, target))?.is_none() {
                return Err(ChatError::NotFound(format!(
                    "reply target {} in conversation {}",
                    target, key
                )));
            }
        }

        let push = self.store.push(&messages_path(key))?;
        let message = Message {
            id: push.id.clone(),
            sender: outgoing.sender,
            receiver: outgoing.receiver,
            time_stamp: push.at,
            kind: outgoing.kind,
            text: outgoing.text,
            attachment: outgoing.attachment,
            reply_to: outgoing.reply_to,
            seen: false,
            edited: false,
            deleted: false,
        };

        self.store
            .set(&message_path(key, &push.id), &serde_json::to_value(&message)?)?;

        // Conversation and rows are created lazily on the first send
        let participants = Participants::of(&message.sender, &message.receiver);
        self.store
            .set(&participants_path(key), &serde_json::to_value(&participants)?)?;

        let last = LastMessage::from(&message);
        self.store
            .set(&last_message_path(key), &serde_json::to_value(&last)?)?;

        // Read-then-increment against the stored value, not a server-side
        // atomic increment; racing sends from multiple devices can under-count
        let receiver_unread = self.unread(key, &message.receiver)? + 1;
        self.store
            .set(&unread_path(key, &message.receiver), &Value::from(receiver_unread))?;
        // Sending implies having seen the conversation up to now
        self.store
            .set(&unread_path(key, &message.sender), &Value::from(0u64))?;

        self.write_inbox_row(&message.sender, &message.receiver, key, &last, 0)?;
        self.write_inbox_row(&message.receiver, &message.sender, key, &last, receiver_unread)?;

        info!(
            "Appended message {} to {} ({} -> {})",
            push.id, key, message.sender, message.receiver
        );
        Ok(push.id)
    }

    /// Edit a message's text. Only the original sender may edit, and only
    /// while the message is not deleted. The timestamp is left untouched so
    /// editing never re-sorts the conversation's recency.
    pub fn edit(&self, key: &str, caller: &str, message_id: &str, new_text: &str) -> Result<()> {
        let mut message = self.load_message(key, message_id)?;

        if message.sender != caller {
            return Err(ChatError::PermissionDenied(
                "only the sender can edit a message".to_string(),
            ));
        }
        if message.deleted {
            return Err(ChatError::PermissionDenied(
                "cannot edit a deleted message".to_string(),
            ));
        }

        message.text = new_text.to_string();
        message.edited = true;
        self.store
            .set(&message_path(key, message_id), &serde_json::to_value(&message)?)?;

        self.refresh_snapshot_text(key, &message, new_text)?;

        info!("Edited message {} in {}", message_id, key);
        Ok(())
    }

    /// Soft-delete a message. Only the original sender may delete. Text and
    /// attachment are cleared; the entry stays in the log under its original
    /// timestamp. When the deleted message backs the last-message snapshot
    /// the snapshot text becomes a fixed placeholder in all locations.
    pub fn soft_delete(&self, key: &str, caller: &str, message_id: &str) -> Result<()> {
        let mut message = self.load_message(key, message_id)?;

        if message.sender != caller {
            return Err(ChatError::PermissionDenied(
                "only the sender can delete a message".to_string(),
            ));
        }

        message.deleted = true;
        message.text.clear();
        message.attachment = None;
        self.store
            .set(&message_path(key, message_id), &serde_json::to_value(&message)?)?;

        self.refresh_snapshot_text(key, &message, DELETED_PLACEHOLDER)?;

        info!("Soft-deleted message {} in {}", message_id, key);
        Ok(())
    }

    /// Zero the reader's unread counter (canonical map and the reader's
    /// inbox row) and flip the read-receipt seen flag on the snapshot when
    /// the reader is the last message's recipient. No-op for conversations
    /// that do not exist yet.
    pub fn mark_read(&self, key: &str, reader: &str) -> Result<()> {
        let Some(participants) = self.participants(key)? else {
            debug!("mark_read on empty conversation {}", key);
            return Ok(());
        };

        self.store
            .set(&unread_path(key, reader), &Value::from(0u64))?;
        let mut fields = Map::new();
        fields.insert("unread".to_string(), Value::from(0u64));
        self.store.update(&inbox_row_path(reader, key), fields)?;

        // Read receipt: the seen flag is independent of the unread counters
        // and only feeds the sender-side ticks
        if let Some(mut last) = self.last_message(key)? {
            if last.sender != reader && !last.seen {
                last.seen = true;
                let value = serde_json::to_value(&last)?;
                self.store.set(&last_message_path(key), &value)?;
                for viewer in [participants.a.as_str(), participants.b.as_str()] {
                    let mut fields = Map::new();
                    fields.insert("lastMessage".to_string(), value.clone());
                    self.store.update(&inbox_row_path(viewer, key), fields)?;
                }
            }
        }

        debug!("Marked {} read for {}", key, reader);
        Ok(())
    }

    /// All messages of a conversation, ascending by timestamp
    pub fn list(&self, key: &str) -> Result<Vec<Message>> {
        Ok(decode_log(self.store.get(&messages_path(key))?))
    }

    /// Live variant of [`list`](Self::list): re-emits the full recomputed
    /// ordered log on every underlying change. Simplicity over efficiency,
    /// acceptable at expected conversation sizes.
    pub fn watch_messages(&self, key: &str) -> MessageFeed {
        MessageFeed {
            sub: self.store.subscribe(&messages_path(key)),
        }
    }

    /// Current unread count for one participant (canonical location)
    pub fn unread(&self, key: &str, account_id: &str) -> Result<u64> {
        Ok(self
            .store
            .get(&unread_path(key, account_id))?
            .and_then(|v| v.as_u64())
            .unwrap_or(0))
    }

    /// Last-message snapshot from the canonical conversation node
    pub fn last_message(&self, key: &str) -> Result<Option<LastMessage>> {
        match self.store.get(&last_message_path(key))? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn participants(&self, key: &str) -> Result<Option<Participants>> {
        match self.store.get(&participants_path(key))? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    fn load_message(&self, key: &str, message_id: &str) -> Result<Message> {
        let value = self
            .store
            .get(&message_path(key, message_id))?
            .ok_or_else(|| {
                ChatError::NotFound(format!("message {} in conversation {}", message_id, key))
            })?;
        Ok(serde_json::from_value(value)?)
    }

    /// Refresh the snapshot text everywhere when `message` currently backs
    /// the snapshot. Matched by equal timestamp, not id.
    fn refresh_snapshot_text(&self, key: &str, message: &Message, text: &str) -> Result<()> {
        let Some(mut last) = self.last_message(key)? else {
            return Ok(());
        };
        if last.time_stamp != message.time_stamp {
            return Ok(());
        }

        last.text = text.to_string();
        let value = serde_json::to_value(&last)?;
        self.store.set(&last_message_path(key), &value)?;

        if let Some(participants) = self.participants(key)? {
            for viewer in [participants.a.as_str(), participants.b.as_str()] {
                let mut fields = Map::new();
                fields.insert("lastMessage".to_string(), value.clone());
                self.store.update(&inbox_row_path(viewer, key), fields)?;
            }
        }
        Ok(())
    }

    fn write_inbox_row(
        &self,
        viewer: &str,
        counterpart: &str,
        key: &str,
        last: &LastMessage,
        unread: u64,
    ) -> Result<()> {
        // Role lookup is best-effort; a missing account degrades to a row
        // without a role rather than failing the send
        let counterpart_role = match self.resolver.account(counterpart) {
            Ok(account) => Some(account.role),
            Err(_) => {
                warn!("No account record for counterpart {}", counterpart);
                None
            }
        };

        let row = InboxRowDoc {
            counterpart: counterpart.to_string(),
            counterpart_role,
            last_message: Some(last.clone()),
            unread,
            last_activity: last.time_stamp,
        };
        self.store
            .set(&inbox_row_path(viewer, key), &serde_json::to_value(&row)?)
    }
}

/// Ordered live feed over one conversation's message log
pub struct MessageFeed {
    sub: Subscription,
}

impl MessageFeed {
    /// Next full ordered log, or `None` once detached
    pub async fn next(&mut self) -> Option<Vec<Message>> {
        let event = self.sub.next().await?;
        Some(decode_log(event.snapshot))
    }

    /// Detach the underlying watcher. Idempotent.
    pub fn unsubscribe(&self) {
        self.sub.unsubscribe();
    }
}

fn decode_log(snapshot: Option<Value>) -> Vec<Message> {
    let Some(Value::Object(entries)) = snapshot else {
        return Vec::new();
    };

    let mut messages: Vec<Message> = entries
        .into_iter()
        .filter_map(|(_, value)| serde_json::from_value(value).ok())
        .collect();
    messages.sort_by(|a, b| {
        a.time_stamp
            .cmp(&b.time_stamp)
            .then_with(|| a.id.cmp(&b.id))
    });
    messages
}
