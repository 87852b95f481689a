use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use snafu::OptionExt;

use super::error::{InvariantViolationSnafu, NotFoundSnafu, StorageResult};
use super::ids::{ConversationId, MessageId};
use super::types::{
    ConversationRecord, ConversationSummary, DEFAULT_CONVERSATION_TITLE, MessagePatch,
    MessageRecord, MessageStatus, NewConversation, NewMessage,
};
use super::{ConversationStore, MessageStore};

#[derive(Debug, Clone)]
struct ConversationEntry {
    id: ConversationId,
    title: String,
    created_at_unix_seconds: u64,
    updated_at_unix_seconds: u64,
    // Logical clock tick of the last append; orders conversations touched within one second.
    last_activity: u64,
    messages: Vec<MessageRecord>,
}

impl ConversationEntry {
    fn to_record(&self) -> ConversationRecord {
        ConversationRecord {
            id: self.id,
            title: self.title.clone(),
            created_at_unix_seconds: self.created_at_unix_seconds,
            updated_at_unix_seconds: self.updated_at_unix_seconds,
            message_count: self.messages.len(),
        }
    }

    fn to_summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id,
            title: self.title.clone(),
            last_activity_unix_seconds: self.updated_at_unix_seconds,
            message_count: self.messages.len(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct MessageLocation {
    conversation_id: ConversationId,
    index: usize,
}

/// Process-local store. Messages are never removed, so indexes into a
/// conversation's message vector stay valid for the store's lifetime.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    conversations: HashMap<ConversationId, ConversationEntry>,
    message_locations: HashMap<MessageId, MessageLocation>,
    streaming_message: Option<MessageId>,
    next_seq: u64,
    activity_clock: u64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn tick_activity(&mut self) -> u64 {
        self.activity_clock = self.activity_clock.saturating_add(1);
        self.activity_clock
    }

    fn entry_mut(
        &mut self,
        conversation_id: ConversationId,
        stage: &'static str,
    ) -> StorageResult<&mut ConversationEntry> {
        self.conversations
            .get_mut(&conversation_id)
            .context(NotFoundSnafu {
                stage,
                entity: "conversation",
                id: conversation_id.to_string(),
            })
    }

    fn message_mut(
        &mut self,
        message_id: MessageId,
        stage: &'static str,
    ) -> StorageResult<&mut MessageRecord> {
        let location = *self
            .message_locations
            .get(&message_id)
            .context(NotFoundSnafu {
                stage,
                entity: "message",
                id: message_id.to_string(),
            })?;

        let entry = self.entry_mut(location.conversation_id, stage)?;
        let conversation_id = entry.id;
        entry
            .messages
            .get_mut(location.index)
            .with_context(|| InvariantViolationSnafu {
                stage,
                details: format!(
                    "message '{message_id}' indexed at {} past the end of conversation '{conversation_id}'",
                    location.index
                ),
            })
    }
}

impl ConversationStore for MemoryStorage {
    fn create_conversation(
        &mut self,
        input: NewConversation,
    ) -> StorageResult<ConversationRecord> {
        let title = input
            .title
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| DEFAULT_CONVERSATION_TITLE.to_string());

        let now = unix_timestamp_seconds();
        let entry = ConversationEntry {
            id: ConversationId::new_v7(),
            title,
            created_at_unix_seconds: now,
            updated_at_unix_seconds: now,
            last_activity: self.tick_activity(),
            messages: Vec::new(),
        };
        let record = entry.to_record();
        self.conversations.insert(entry.id, entry);

        tracing::debug!(conversation_id = %record.id, title = %record.title, "conversation created");
        Ok(record)
    }

    fn get_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> StorageResult<Option<ConversationRecord>> {
        Ok(self
            .conversations
            .get(&conversation_id)
            .map(ConversationEntry::to_record))
    }

    fn rename_conversation(
        &mut self,
        conversation_id: ConversationId,
        title: String,
    ) -> StorageResult<ConversationRecord> {
        let entry = self.entry_mut(conversation_id, "conversation-rename")?;
        let trimmed = title.trim();
        entry.title = if trimmed.is_empty() {
            DEFAULT_CONVERSATION_TITLE.to_string()
        } else {
            trimmed.to_string()
        };
        Ok(entry.to_record())
    }

    fn list_conversations(&self) -> StorageResult<Vec<ConversationSummary>> {
        let mut entries = self.conversations.values().collect::<Vec<_>>();
        // The logical clock is monotonic; wall-clock seconds can step backwards.
        entries.sort_by(|left, right| right.last_activity.cmp(&left.last_activity));
        Ok(entries.into_iter().map(ConversationEntry::to_summary).collect())
    }
}

impl MessageStore for MemoryStorage {
    fn append_message(
        &mut self,
        conversation_id: ConversationId,
        input: NewMessage,
    ) -> StorageResult<MessageRecord> {
        // Validate everything before mutating so a rejected append leaves no trace.
        if !self.conversations.contains_key(&conversation_id) {
            return NotFoundSnafu {
                stage: "message-append",
                entity: "conversation",
                id: conversation_id.to_string(),
            }
            .fail();
        }

        if input.status == MessageStatus::Streaming
            && let Some(active) = self.streaming_message
        {
            return InvariantViolationSnafu {
                stage: "message-append-streaming",
                details: format!("message '{active}' is already streaming"),
            }
            .fail();
        }

        self.next_seq = self.next_seq.saturating_add(1);
        let seq = self.next_seq;
        let activity = self.tick_activity();
        let now = unix_timestamp_seconds();
        let message_id = MessageId::new_v7();

        let record = MessageRecord {
            id: message_id,
            conversation_id,
            seq,
            role: input.role,
            content: input.content,
            status: input.status,
            attachment: input.attachment,
            model_id: input.model_id,
            used_retrieval: input.used_retrieval,
            created_at_unix_seconds: now,
        };

        let entry = self.entry_mut(conversation_id, "message-append-insert")?;
        entry.updated_at_unix_seconds = now;
        entry.last_activity = activity;
        let index = entry.messages.len();
        entry.messages.push(record.clone());

        self.message_locations.insert(
            message_id,
            MessageLocation {
                conversation_id,
                index,
            },
        );
        if record.status == MessageStatus::Streaming {
            self.streaming_message = Some(message_id);
        }

        Ok(record)
    }

    fn update_message_content(
        &mut self,
        message_id: MessageId,
        patch: MessagePatch,
    ) -> StorageResult<MessageRecord> {
        let streaming_message = self.streaming_message;
        let current_status = self.message_mut(message_id, "message-update")?.status;
        let next_status = patch.status.unwrap_or(current_status);

        if next_status == MessageStatus::Streaming
            && let Some(active) = streaming_message
            && active != message_id
        {
            return InvariantViolationSnafu {
                stage: "message-update-streaming",
                details: format!("message '{active}' is already streaming"),
            }
            .fail();
        }

        let message = self.message_mut(message_id, "message-update-apply")?;
        message.content = patch.content;
        message.status = next_status;
        let updated = message.clone();

        match next_status {
            MessageStatus::Streaming => self.streaming_message = Some(message_id),
            MessageStatus::Final if streaming_message == Some(message_id) => {
                self.streaming_message = None;
            }
            MessageStatus::Final => {}
        }

        Ok(updated)
    }

    fn get_message(&self, message_id: MessageId) -> StorageResult<Option<MessageRecord>> {
        let Some(location) = self.message_locations.get(&message_id) else {
            return Ok(None);
        };

        Ok(self
            .conversations
            .get(&location.conversation_id)
            .and_then(|entry| entry.messages.get(location.index))
            .cloned())
    }

    fn list_messages(&self, conversation_id: ConversationId) -> StorageResult<Vec<MessageRecord>> {
        let entry = self
            .conversations
            .get(&conversation_id)
            .context(NotFoundSnafu {
                stage: "message-list",
                entity: "conversation",
                id: conversation_id.to_string(),
            })?;
        Ok(entry.messages.clone())
    }

    fn streaming_message(&self) -> Option<MessageId> {
        self.streaming_message
    }
}

fn unix_timestamp_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}
