use futures::FutureExt;
use snafu::{OptionExt, ensure};

use super::model::ModelFamily;
use super::responder::{
    BoxFuture, EmptyHistorySnafu, ReplyRequest, Responder, ResponderResult, UnsupportedModelSnafu,
};

pub const CANNED_RESPONDER_ID: &str = "canned";

const DEFAULT_REPLY: &str = "I'm an AI assistant designed to help you with various tasks. I can help with creative problem-solving, data analysis, code generation, content creation, and much more. How can I assist you today?";

const CODE_REPLY: &str = "Here's a Python function to calculate Fibonacci numbers:\n\n```python\ndef fibonacci(n):\n    if n <= 1:\n        return n\n    return fibonacci(n-1) + fibonacci(n-2)\n\n# More efficient iterative version\ndef fibonacci_iterative(n):\n    if n <= 1:\n        return n\n    a, b = 0, 1\n    for _ in range(2, n + 1):\n        a, b = b, a + b\n    return b\n```\n\nThe recursive version is simple but inefficient for large numbers. The iterative version is much faster!";

const ANALYSIS_REPLY: &str = "I'd be happy to help analyze your data! To provide the most accurate insights, I'll need:\n\n1. **Data Format**: What type of data do you have? (CSV, JSON, Excel, etc.)\n2. **Data Size**: How many records/rows?\n3. **Analysis Goals**: What specific insights are you looking for?\n4. **Key Metrics**: Which variables or metrics are most important?\n\nOnce you provide this information, I can help with statistical analysis, visualization recommendations, and actionable insights.";

/// Keyword-matched replies that stand in for a model backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CannedReply {
    Default,
    Code,
    Analysis,
}

impl CannedReply {
    /// Picks a reply for the user's text; code keywords win over data keywords.
    pub fn for_prompt(prompt: &str) -> Self {
        let prompt = prompt.to_lowercase();
        if prompt.contains("python") || prompt.contains("code") {
            Self::Code
        } else if prompt.contains("data") || prompt.contains("analyze") {
            Self::Analysis
        } else {
            Self::Default
        }
    }

    pub fn text(self) -> &'static str {
        match self {
            Self::Default => DEFAULT_REPLY,
            Self::Code => CODE_REPLY,
            Self::Analysis => ANALYSIS_REPLY,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct CannedResponder;

impl CannedResponder {
    pub fn new() -> Self {
        Self
    }

    fn reply_for(request: &ReplyRequest) -> ResponderResult<&'static str> {
        ensure!(
            ModelFamily::of(&request.options.model_id).is_some(),
            UnsupportedModelSnafu {
                stage: "canned-route-model",
                model_id: request.options.model_id.clone(),
            }
        );

        let prompt = request.latest_user_message().context(EmptyHistorySnafu {
            stage: "canned-latest-user-message",
        })?;

        let reply = CannedReply::for_prompt(prompt);
        tracing::debug!(
            model_id = %request.options.model_id,
            use_retrieval = request.options.use_retrieval,
            has_attachment = request.options.has_attachment,
            history_len = request.messages.len(),
            reply = ?reply,
            "selected canned reply"
        );
        Ok(reply.text())
    }
}

impl Responder for CannedResponder {
    fn id(&self) -> &str {
        CANNED_RESPONDER_ID
    }

    fn respond<'a>(&'a self, request: ReplyRequest) -> BoxFuture<'a, ResponderResult<String>> {
        async move { Self::reply_for(&request).map(str::to_string) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::responder::{HistoryMessage, RequestOptions, ResponderError, Role};

    fn request(prompt: &str, model_id: &str) -> ReplyRequest {
        ReplyRequest::new(
            vec![
                HistoryMessage::new(Role::User, "earlier question about data"),
                HistoryMessage::new(Role::Assistant, "earlier answer"),
                HistoryMessage::new(Role::User, prompt),
            ],
            RequestOptions::new(model_id),
        )
    }

    #[test]
    fn keywords_pick_reply_case_insensitively() {
        assert_eq!(CannedReply::for_prompt("Write PYTHON please"), CannedReply::Code);
        assert_eq!(CannedReply::for_prompt("review my code"), CannedReply::Code);
        assert_eq!(CannedReply::for_prompt("Analyze this"), CannedReply::Analysis);
        assert_eq!(
            CannedReply::for_prompt("python data pipeline"),
            CannedReply::Code
        );
        assert_eq!(CannedReply::for_prompt("hello"), CannedReply::Default);
    }

    #[tokio::test]
    async fn answers_latest_user_turn_only() {
        let reply = CannedResponder::new()
            .respond(request("Write python code", "gpt-4"))
            .await
            .expect("reply");
        assert!(reply.contains("```python\n"));

        let reply = CannedResponder::new()
            .respond(request("hello there", "claude-3-opus-20240229"))
            .await
            .expect("reply");
        assert_eq!(reply, DEFAULT_REPLY);
    }

    #[tokio::test]
    async fn unknown_model_family_fails() {
        let error = CannedResponder::new()
            .respond(request("hello", "llama-3"))
            .await
            .expect_err("unsupported model");
        assert!(matches!(
            error,
            ResponderError::UnsupportedModel { ref model_id, .. } if model_id == "llama-3"
        ));
    }

    #[tokio::test]
    async fn history_without_user_turn_fails() {
        let request = ReplyRequest::new(
            vec![HistoryMessage::new(Role::Assistant, "only me")],
            RequestOptions::new("gpt-4"),
        );
        let error = CannedResponder::new()
            .respond(request)
            .await
            .expect_err("no user turn");
        assert!(matches!(error, ResponderError::EmptyHistory { .. }));
    }
}
