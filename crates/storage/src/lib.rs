pub mod error;
pub mod ids;
pub mod memory;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use ids::{ConversationId, MessageId};
pub use memory::MemoryStorage;
pub use types::{
    AttachmentRef, ConversationRecord, ConversationSummary, DEFAULT_CONVERSATION_TITLE,
    MessagePatch, MessageRecord, MessageRole, MessageStatus, NewConversation, NewMessage,
};

pub trait ConversationStore: Send {
    fn create_conversation(&mut self, input: NewConversation)
    -> StorageResult<ConversationRecord>;
    fn get_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> StorageResult<Option<ConversationRecord>>;
    fn rename_conversation(
        &mut self,
        conversation_id: ConversationId,
        title: String,
    ) -> StorageResult<ConversationRecord>;
    /// Most recently updated first.
    fn list_conversations(&self) -> StorageResult<Vec<ConversationSummary>>;
}

pub trait MessageStore: Send {
    fn append_message(
        &mut self,
        conversation_id: ConversationId,
        input: NewMessage,
    ) -> StorageResult<MessageRecord>;
    fn update_message_content(
        &mut self,
        message_id: MessageId,
        patch: MessagePatch,
    ) -> StorageResult<MessageRecord>;
    fn get_message(&self, message_id: MessageId) -> StorageResult<Option<MessageRecord>>;
    /// Insertion order, which is also display order.
    fn list_messages(&self, conversation_id: ConversationId) -> StorageResult<Vec<MessageRecord>>;
    fn streaming_message(&self) -> Option<MessageId>;
}

pub trait Storage: ConversationStore + MessageStore {}

impl<T> Storage for T where T: ConversationStore + MessageStore {}
