use parley_llm::ResponderError;
use parley_storage::{ConversationId, MessageId, StorageError};
use snafu::Snafu;

use crate::stream::{StreamError, StreamHandle};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("a reply is still streaming ({handle}); wait for it or cancel it"))]
    Busy {
        stage: &'static str,
        handle: StreamHandle,
    },
    #[snafu(display("message is empty"))]
    EmptyMessage { stage: &'static str },
    #[snafu(display("message has {length} characters; the limit is {max}"))]
    MessageTooLong {
        stage: &'static str,
        length: usize,
        max: usize,
    },
    #[snafu(display("attachment '{name}' rejected: {reason}"))]
    AttachmentRejected {
        stage: &'static str,
        name: String,
        reason: String,
    },
    #[snafu(display("conversation '{conversation_id}' was not found"))]
    ConversationNotFound {
        stage: &'static str,
        conversation_id: ConversationId,
    },
    #[snafu(display("store operation failed on `{stage}`: {source}"))]
    Store {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("stream operation failed on `{stage}`: {source}"))]
    Stream {
        stage: &'static str,
        source: StreamError,
    },
    #[snafu(display("responder failed for conversation '{conversation_id}': {source}"))]
    ResponderFailure {
        stage: &'static str,
        conversation_id: ConversationId,
        /// Assistant message that now carries the fallback notice.
        message_id: MessageId,
        source: ResponderError,
    },
}

impl SessionError {
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::ConversationNotFound { .. } => true,
            Self::Store { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
