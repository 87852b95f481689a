use std::sync::{Arc, Mutex, PoisonError};

use parley_storage::{
    AttachmentRef, ConversationId, ConversationSummary, MessageId, MessageRecord, MessageRole,
    MessageStatus,
};

use crate::format::{RichText, format};

/// Display-ready copy of one message.
///
/// `rendered` is present only for final messages; streaming bodies are shown raw
/// until the last chunk lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSnapshot {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub role: MessageRole,
    pub content: String,
    pub status: MessageStatus,
    pub attachment: Option<AttachmentRef>,
    pub model_id: Option<String>,
    pub used_retrieval: bool,
    pub rendered: Option<RichText>,
}

impl MessageSnapshot {
    pub fn from_record(record: &MessageRecord) -> Self {
        Self {
            id: record.id,
            conversation_id: record.conversation_id,
            role: record.role,
            content: record.content.clone(),
            status: record.status,
            attachment: record.attachment.clone(),
            model_id: record.model_id.clone(),
            used_retrieval: record.used_retrieval,
            rendered: render_if_final(record),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageUpdate {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub content: String,
    pub status: MessageStatus,
    pub rendered: Option<RichText>,
}

impl MessageUpdate {
    pub fn from_record(record: &MessageRecord) -> Self {
        Self {
            message_id: record.id,
            conversation_id: record.conversation_id,
            content: record.content.clone(),
            status: record.status,
            rendered: render_if_final(record),
        }
    }
}

fn render_if_final(record: &MessageRecord) -> Option<RichText> {
    match record.status {
        MessageStatus::Final => Some(format(&record.content)),
        MessageStatus::Streaming => None,
    }
}

/// Display collaborator notified by a `ChatSession`. Every method defaults to a no-op.
pub trait SessionObserver: Send {
    fn conversation_list_changed(&mut self, _conversations: &[ConversationSummary]) {}

    /// The visible message list was replaced, e.g. after selecting a conversation.
    fn message_list_changed(
        &mut self,
        _conversation_id: Option<ConversationId>,
        _messages: &[MessageSnapshot],
    ) {
    }

    fn message_appended(&mut self, _conversation_id: ConversationId, _message: &MessageSnapshot) {}

    fn message_updated(&mut self, _update: &MessageUpdate) {}

    fn busy_changed(&mut self, _busy: bool) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Logs every notification through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn conversation_list_changed(&mut self, conversations: &[ConversationSummary]) {
        tracing::debug!(count = conversations.len(), "conversation list changed");
    }

    fn message_list_changed(
        &mut self,
        conversation_id: Option<ConversationId>,
        messages: &[MessageSnapshot],
    ) {
        tracing::debug!(
            conversation_id = ?conversation_id,
            count = messages.len(),
            "message list changed"
        );
    }

    fn message_appended(&mut self, conversation_id: ConversationId, message: &MessageSnapshot) {
        tracing::debug!(
            conversation_id = %conversation_id,
            message_id = %message.id,
            role = message.role.as_str(),
            status = ?message.status,
            "message appended"
        );
    }

    fn message_updated(&mut self, update: &MessageUpdate) {
        tracing::trace!(
            message_id = %update.message_id,
            content_len = update.content.len(),
            status = ?update.status,
            "message updated"
        );
    }

    fn busy_changed(&mut self, busy: bool) {
        tracing::debug!(busy, "busy indicator changed");
    }
}

/// One recorded notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ConversationListChanged(Vec<ConversationSummary>),
    MessageListChanged {
        conversation_id: Option<ConversationId>,
        messages: Vec<MessageSnapshot>,
    },
    MessageAppended {
        conversation_id: ConversationId,
        message: MessageSnapshot,
    },
    MessageUpdated(MessageUpdate),
    BusyChanged(bool),
}

/// Keeps every notification in memory. Clones share one log.
#[derive(Debug, Default, Clone)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.lock().clone()
    }

    pub fn take_events(&self) -> Vec<SessionEvent> {
        std::mem::take(&mut *self.lock())
    }

    /// Content of every update delivered for one message, in order.
    pub fn updates_for(&self, message_id: MessageId) -> Vec<MessageUpdate> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                SessionEvent::MessageUpdated(update) if update.message_id == message_id => {
                    Some(update.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub fn busy_transitions(&self) -> Vec<bool> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                SessionEvent::BusyChanged(busy) => Some(*busy),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<SessionEvent>> {
        // A panicking test thread must not hide the events recorded before it.
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, event: SessionEvent) {
        self.lock().push(event);
    }
}

impl SessionObserver for RecordingObserver {
    fn conversation_list_changed(&mut self, conversations: &[ConversationSummary]) {
        self.record(SessionEvent::ConversationListChanged(conversations.to_vec()));
    }

    fn message_list_changed(
        &mut self,
        conversation_id: Option<ConversationId>,
        messages: &[MessageSnapshot],
    ) {
        self.record(SessionEvent::MessageListChanged {
            conversation_id,
            messages: messages.to_vec(),
        });
    }

    fn message_appended(&mut self, conversation_id: ConversationId, message: &MessageSnapshot) {
        self.record(SessionEvent::MessageAppended {
            conversation_id,
            message: message.clone(),
        });
    }

    fn message_updated(&mut self, update: &MessageUpdate) {
        self.record(SessionEvent::MessageUpdated(update.clone()));
    }

    fn busy_changed(&mut self, busy: bool) {
        self.record(SessionEvent::BusyChanged(busy));
    }
}
