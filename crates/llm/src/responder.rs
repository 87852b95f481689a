use std::future::Future;
use std::pin::Pin;

use snafu::Snafu;

/// Speaker role as seen by a responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
}

impl HistoryMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Per-turn options chosen by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    pub model_id: String,
    pub use_retrieval: bool,
    pub has_attachment: bool,
}

impl RequestOptions {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into().trim().to_string(),
            use_retrieval: false,
            has_attachment: false,
        }
    }

    pub fn with_retrieval(mut self, use_retrieval: bool) -> Self {
        self.use_retrieval = use_retrieval;
        self
    }

    pub fn with_attachment(mut self, has_attachment: bool) -> Self {
        self.has_attachment = has_attachment;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyRequest {
    pub messages: Vec<HistoryMessage>,
    pub options: RequestOptions,
    pub preamble: Option<String>,
}

impl ReplyRequest {
    pub fn new(messages: Vec<HistoryMessage>, options: RequestOptions) -> Self {
        Self {
            messages,
            options,
            preamble: None,
        }
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    /// Content of the newest user turn, which is what the reply answers.
    pub fn latest_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type ResponderResult<T> = Result<T, ResponderError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ResponderError {
    #[snafu(display("responder '{responder_id}' is not supported"))]
    UnsupportedResponder {
        stage: &'static str,
        responder_id: String,
    },
    #[snafu(display("model '{model_id}' is not supported"))]
    UnsupportedModel {
        stage: &'static str,
        model_id: String,
    },
    #[snafu(display("reply request has no user message"))]
    EmptyHistory { stage: &'static str },
    #[snafu(display("responder unavailable on `{stage}`: {details}"))]
    Unavailable {
        stage: &'static str,
        details: String,
    },
}

impl ResponderError {
    /// Builds an `Unavailable` error for responders living outside this crate.
    pub fn unavailable(stage: &'static str, details: impl Into<String>) -> Self {
        Self::Unavailable {
            stage,
            details: details.into(),
        }
    }
}

/// Produces the complete text of one assistant reply before streaming starts.
pub trait Responder: Send + Sync {
    fn id(&self) -> &str;
    fn respond<'a>(&'a self, request: ReplyRequest) -> BoxFuture<'a, ResponderResult<String>>;
}
