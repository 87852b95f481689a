use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;

use parley::format::Segment;
use parley::session::{
    ChatSession, MessageUpdate, RecordingObserver, SessionError, SessionEvent, TickOutcome,
    TurnRequest,
};
use parley::settings::{DEFAULT_FALLBACK_NOTICE, DEFAULT_SYSTEM_PROMPT, SessionSettings};
use parley::stream::{ManualTicks, StreamState, TickSource};
use parley_llm::{
    BoxFuture, CannedReply, CannedResponder, DEFAULT_MODEL, ReplyRequest, RequestOptions,
    Responder, ResponderError, ResponderResult,
};
use parley_storage::{AttachmentRef, ConversationId, MessageRole, MessageStatus};

/// Returns a fixed reply, or fails when none is configured.
struct ScriptedResponder {
    reply: Option<String>,
}

impl ScriptedResponder {
    fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
        }
    }

    fn failing() -> Self {
        Self { reply: None }
    }
}

impl Responder for ScriptedResponder {
    fn id(&self) -> &str {
        "scripted"
    }

    fn respond<'a>(&'a self, _request: ReplyRequest) -> BoxFuture<'a, ResponderResult<String>> {
        async move {
            match &self.reply {
                Some(reply) => Ok(reply.clone()),
                None => Err(ResponderError::unavailable(
                    "scripted-respond",
                    "backend offline",
                )),
            }
        }
        .boxed()
    }
}

/// Keeps every request it receives and replies "ok".
#[derive(Clone, Default)]
struct CapturingResponder {
    requests: Arc<Mutex<Vec<ReplyRequest>>>,
}

impl CapturingResponder {
    fn requests(&self) -> Vec<ReplyRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Responder for CapturingResponder {
    fn id(&self) -> &str {
        "capturing"
    }

    fn respond<'a>(&'a self, request: ReplyRequest) -> BoxFuture<'a, ResponderResult<String>> {
        async move {
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request);
            Ok("ok".to_string())
        }
        .boxed()
    }
}

fn session_with(responder: impl Responder + 'static) -> (ChatSession, RecordingObserver) {
    let observer = RecordingObserver::new();
    let session = ChatSession::new(
        SessionSettings::default(),
        Arc::new(responder),
        ManualTicks::new(),
    )
    .with_observer(observer.clone());
    (session, observer)
}

fn drain(session: &mut ChatSession) -> Vec<TickOutcome> {
    let mut outcomes = Vec::new();
    loop {
        let outcome = session.tick().expect("tick");
        if outcome == TickOutcome::Idle {
            return outcomes;
        }
        outcomes.push(outcome);
    }
}

fn last_update(updates: &[MessageUpdate]) -> &MessageUpdate {
    updates.last().expect("at least one update")
}

#[tokio::test]
async fn streaming_a_reply_yields_one_observation_per_char_plus_done() {
    let (mut session, observer) = session_with(CannedResponder::new());
    let reply = CannedReply::Default.text();

    let receipt = session
        .submit_user_turn(TurnRequest::new("hello"))
        .await
        .expect("turn");
    let outcomes = drain(&mut session);

    let updates = observer.updates_for(receipt.assistant_message_id);
    assert_eq!(updates.len(), reply.chars().count() + 1);
    assert_eq!(outcomes.len(), updates.len());
    assert!(matches!(
        outcomes.last(),
        Some(TickOutcome::Completed { message_id }) if *message_id == receipt.assistant_message_id
    ));

    let mut previous_len = 0;
    for update in &updates[..updates.len() - 1] {
        assert_eq!(update.status, MessageStatus::Streaming);
        assert!(update.rendered.is_none());
        assert!(reply.starts_with(&update.content));
        assert!(update.content.len() > previous_len);
        previous_len = update.content.len();
    }

    let done = last_update(&updates);
    assert_eq!(done.content, reply);
    assert_eq!(done.status, MessageStatus::Final);
    assert!(done.rendered.is_some());
    assert_eq!(session.stream_state(), StreamState::Completed(receipt.handle));
}

#[tokio::test]
async fn double_submit_observes_busy_and_keeps_one_user_message() {
    let (mut session, _) = session_with(CannedResponder::new());

    let receipt = session
        .submit_user_turn(TurnRequest::new("first"))
        .await
        .expect("first turn");
    session.tick().expect("tick");

    let error = session
        .submit_user_turn(TurnRequest::new("second"))
        .await
        .expect_err("second turn while streaming");
    assert!(error.is_busy());

    let messages = session
        .messages(receipt.conversation_id)
        .expect("messages");
    let user_messages = messages
        .iter()
        .filter(|message| message.role == MessageRole::User)
        .count();
    assert_eq!(user_messages, 1);
    assert_eq!(messages.len(), 2);

    drain(&mut session);
    session
        .submit_user_turn(TurnRequest::new("second"))
        .await
        .expect("accepted after completion");
}

#[tokio::test]
async fn cancel_keeps_the_last_delivered_prefix() {
    let (mut session, observer) = session_with(ScriptedResponder::replying("abcdefgh"));
    let receipt = session
        .submit_user_turn(TurnRequest::new("go"))
        .await
        .expect("turn");

    for _ in 0..3 {
        session.tick().expect("tick");
    }
    let cancelled = session.cancel_active_stream().expect("cancel");
    assert_eq!(cancelled, Some(receipt.assistant_message_id));
    let updates_at_cancel = observer.updates_for(receipt.assistant_message_id).len();

    assert_eq!(session.tick().expect("tick"), TickOutcome::Idle);
    assert_eq!(
        observer.updates_for(receipt.assistant_message_id).len(),
        updates_at_cancel
    );

    let message = session
        .message(receipt.assistant_message_id)
        .expect("get")
        .expect("exists");
    assert_eq!(message.content, "abc");
    assert_eq!(message.status, MessageStatus::Final);
    assert_eq!(session.stream_state(), StreamState::Cancelled(receipt.handle));
    assert!(!session.is_busy());
    assert_eq!(session.cancel_active_stream().expect("no-op"), None);
}

#[tokio::test]
async fn python_reply_renders_a_distinct_code_block() {
    let (mut session, observer) = session_with(CannedResponder::new());
    session.new_conversation().expect("new conversation");

    let receipt = session
        .submit_user_turn(TurnRequest::new("Write python code"))
        .await
        .expect("turn");
    drain(&mut session);

    let updates = observer.updates_for(receipt.assistant_message_id);
    let rendered = last_update(&updates)
        .rendered
        .clone()
        .expect("final reply is rendered");

    let blocks = rendered.code_blocks().collect::<Vec<_>>();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].0, Some("python"));
    assert!(blocks[0].1.starts_with("def fibonacci(n):\n    if n &lt;= 1:"));
    assert!(blocks[0].1.ends_with("return b"));

    let html = rendered.to_html();
    assert!(html.contains("<pre><code class=\"language-python\">def fibonacci(n):"));
    assert!(html.starts_with("Here&#39;s a Python function"));
    assert!(html.contains("return b</code></pre>"));
    assert!(!html.contains("```"));
}

#[tokio::test]
async fn responder_failure_posts_fallback_notice_and_returns_to_idle() {
    let (mut session, observer) = session_with(ScriptedResponder::failing());

    let error = session
        .submit_user_turn(TurnRequest::new("hello"))
        .await
        .expect_err("responder fails");
    let SessionError::ResponderFailure {
        conversation_id,
        message_id,
        ..
    } = error
    else {
        panic!("expected responder failure, got {error:?}");
    };

    let messages = session.messages(conversation_id).expect("messages");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].id, message_id);
    assert_eq!(messages[1].role, MessageRole::Assistant);
    assert_eq!(messages[1].content, DEFAULT_FALLBACK_NOTICE);
    assert_eq!(messages[1].status, MessageStatus::Final);

    assert!(!session.is_busy());
    assert_eq!(session.ticks().arm_count(), 0);
    assert_eq!(session.ticks().armed(), None);
    assert_eq!(observer.busy_transitions(), vec![true, false]);
    assert_eq!(session.tick().expect("tick"), TickOutcome::Idle);
}

#[tokio::test]
async fn unterminated_fence_stays_plain_text() {
    let reply = "abc ```python\nprint(1)";
    let (mut session, observer) = session_with(ScriptedResponder::replying(reply));

    let receipt = session
        .submit_user_turn(TurnRequest::new("go"))
        .await
        .expect("turn");
    drain(&mut session);

    let updates = observer.updates_for(receipt.assistant_message_id);
    let rendered = last_update(&updates).rendered.clone().expect("rendered");
    assert_eq!(rendered.segments(), &[Segment::Text(reply.to_string())]);
    assert_eq!(rendered.to_html(), reply);
}

#[tokio::test]
async fn tick_source_is_released_on_every_terminal_path() {
    let (mut session, _) = session_with(ScriptedResponder::replying("xyz"));

    let completed = session
        .submit_user_turn(TurnRequest::new("one"))
        .await
        .expect("turn");
    let armed = session.ticks().armed().expect("armed while streaming");
    assert_eq!(armed.handle, completed.handle);
    assert_eq!(armed.period, session.settings().stream.tick_interval());
    drain(&mut session);
    assert_eq!(session.ticks().armed(), None);

    let cancelled = session
        .submit_user_turn(TurnRequest::new("two"))
        .await
        .expect("turn");
    assert_ne!(cancelled.handle, completed.handle);
    session.tick().expect("tick");
    session.cancel_active_stream().expect("cancel");

    assert_eq!(session.ticks().armed(), None);
    assert_eq!(session.ticks().arm_count(), 2);
    assert_eq!(session.ticks().release_count(), 2);
}

#[tokio::test]
async fn selecting_conversations_replays_their_messages() {
    let (mut session, observer) = session_with(ScriptedResponder::replying("ok"));

    let first = session
        .submit_user_turn(TurnRequest::new("in first"))
        .await
        .expect("turn")
        .conversation_id;
    drain(&mut session);
    let second = session.new_conversation().expect("second");
    observer.take_events();

    session.select_conversation(first).expect("select first");
    let events = observer.take_events();
    let Some(SessionEvent::MessageListChanged {
        conversation_id,
        messages,
    }) = events.last()
    else {
        panic!("expected a message list change, got {events:?}");
    };
    assert_eq!(*conversation_id, Some(first));
    assert_eq!(
        messages
            .iter()
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>(),
        vec!["in first", "ok"]
    );

    session.select_conversation(first).expect("reselect");
    assert!(observer.events().is_empty());

    let listed = session.conversations().expect("list");
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().any(|summary| summary.id == second));
}

#[tokio::test]
async fn selecting_an_unknown_conversation_is_not_found() {
    let (mut session, _) = session_with(CannedResponder::new());
    let error = session
        .select_conversation(ConversationId::new_v7())
        .expect_err("unknown id");
    assert!(error.is_not_found());
    assert_eq!(session.active_conversation(), None);
}

#[tokio::test]
async fn turn_options_override_settings_then_fall_back_to_them() {
    let responder = CapturingResponder::default();
    let (mut session, _) = session_with(responder.clone());

    let first = session
        .submit_user_turn(
            TurnRequest::new("summarize the attached notes")
                .with_model("claude-3")
                .with_retrieval(true)
                .with_attachment(AttachmentRef::new("notes.csv", "text/csv", 10)),
        )
        .await
        .expect("first turn");
    drain(&mut session);
    session
        .submit_user_turn(TurnRequest::new("and without options?"))
        .await
        .expect("second turn");
    drain(&mut session);

    let requests = responder.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[0].options,
        RequestOptions::new("claude-3")
            .with_retrieval(true)
            .with_attachment(true)
    );
    assert_eq!(requests[1].options, RequestOptions::new(DEFAULT_MODEL));
    assert_eq!(requests[1].options.model_id, "gpt-4-turbo-preview");
    for request in &requests {
        assert_eq!(request.preamble.as_deref(), Some(DEFAULT_SYSTEM_PROMPT));
    }
    assert_eq!(
        requests[1].latest_user_message(),
        Some("and without options?")
    );

    let user_message = session
        .message(first.user_message_id)
        .expect("get")
        .expect("exists");
    assert_eq!(
        user_message.attachment,
        Some(AttachmentRef::new("notes.csv", "text/csv", 10))
    );
}
