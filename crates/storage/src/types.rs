use super::ids::{ConversationId, MessageId};

/// Title given to conversations created without one.
pub const DEFAULT_CONVERSATION_TITLE: &str = "New Conversation";

/// Storage-local message role, decoupled from provider-facing role enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Whether a message body is still being revealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MessageStatus {
    #[default]
    Final,
    Streaming,
}

/// Opaque descriptor of a file attached to a user turn. The bytes never reach the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

impl AttachmentRef {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRecord {
    pub id: ConversationId,
    pub title: String,
    pub created_at_unix_seconds: u64,
    pub updated_at_unix_seconds: u64,
    pub message_count: usize,
}

/// Row shape for conversation-list renderers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub title: String,
    pub last_activity_unix_seconds: u64,
    pub message_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewConversation {
    pub title: Option<String>,
}

impl NewConversation {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub seq: u64,
    pub role: MessageRole,
    pub content: String,
    pub status: MessageStatus,
    pub attachment: Option<AttachmentRef>,
    /// Model the turn was addressed to.
    pub model_id: Option<String>,
    pub used_retrieval: bool,
    pub created_at_unix_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    pub status: MessageStatus,
    pub attachment: Option<AttachmentRef>,
    pub model_id: Option<String>,
    pub used_retrieval: bool,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            status: MessageStatus::Final,
            attachment: None,
            model_id: None,
            used_retrieval: false,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            status: MessageStatus::Final,
            attachment: None,
            model_id: None,
            used_retrieval: false,
        }
    }

    /// Empty assistant body that a stream will fill in.
    pub fn assistant_placeholder() -> Self {
        Self {
            role: MessageRole::Assistant,
            content: String::new(),
            status: MessageStatus::Streaming,
            attachment: None,
            model_id: None,
            used_retrieval: false,
        }
    }

    pub fn with_attachment(mut self, attachment: Option<AttachmentRef>) -> Self {
        self.attachment = attachment;
        self
    }

    pub fn with_model(mut self, model_id: impl Into<String>, used_retrieval: bool) -> Self {
        self.model_id = Some(model_id.into());
        self.used_retrieval = used_retrieval;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePatch {
    pub content: String,
    pub status: Option<MessageStatus>,
}

impl MessagePatch {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = Some(status);
        self
    }
}
