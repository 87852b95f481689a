//! Per-turn orchestration of the conversation store and the stream controller.

pub mod error;
pub mod events;

use std::sync::Arc;

use parley_llm::{HistoryMessage, Model, ReplyRequest, RequestOptions, Responder, Role};
use parley_storage::{
    AttachmentRef, ConversationId, ConversationSummary, DEFAULT_CONVERSATION_TITLE,
    MemoryStorage, MessageId, MessagePatch, MessageRecord, MessageRole, MessageStatus,
    NewConversation, NewMessage, Storage,
};
use snafu::{OptionExt, ResultExt, ensure};

use crate::settings::SessionSettings;
use crate::stream::{
    ManualTicks, StreamController, StreamEvent, StreamHandle, StreamState, StreamTarget,
    TickSource,
};

pub use error::{SessionError, SessionResult};
pub use events::{
    MessageSnapshot, MessageUpdate, NoopObserver, RecordingObserver, SessionEvent,
    SessionObserver, TracingObserver,
};

use error::{
    AttachmentRejectedSnafu, BusySnafu, ConversationNotFoundSnafu, EmptyMessageSnafu,
    MessageTooLongSnafu, ResponderFailureSnafu, StoreSnafu, StreamSnafu,
};

/// One user turn as submitted by the input collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRequest {
    pub text: String,
    /// Falls back to the configured default model.
    pub model_id: Option<String>,
    /// Falls back to the configured default.
    pub use_retrieval: Option<bool>,
    pub attachment: Option<AttachmentRef>,
}

impl TurnRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model_id: None,
            use_retrieval: None,
            attachment: None,
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn with_retrieval(mut self, use_retrieval: bool) -> Self {
        self.use_retrieval = Some(use_retrieval);
        self
    }

    pub fn with_attachment(mut self, attachment: AttachmentRef) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

/// Ids created by an accepted turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnReceipt {
    pub conversation_id: ConversationId,
    pub user_message_id: MessageId,
    pub assistant_message_id: MessageId,
    pub handle: StreamHandle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing is streaming.
    Idle,
    Chunk {
        message_id: MessageId,
        content_len: usize,
    },
    Completed {
        message_id: MessageId,
    },
    /// The event belonged to a stream the session no longer tracks.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ActiveStream {
    handle: StreamHandle,
    target: StreamTarget,
}

pub struct ChatSession<T: TickSource = ManualTicks> {
    store: Box<dyn Storage>,
    responder: Arc<dyn Responder>,
    observer: Box<dyn SessionObserver>,
    ticks: T,
    stream: StreamController,
    settings: SessionSettings,
    active_conversation_id: Option<ConversationId>,
    active_stream: Option<ActiveStream>,
}

impl<T: TickSource> ChatSession<T> {
    pub fn new(settings: SessionSettings, responder: Arc<dyn Responder>, ticks: T) -> Self {
        let settings = settings.normalized();
        Self {
            store: Box::new(MemoryStorage::default()),
            responder,
            observer: Box::new(TracingObserver),
            ticks,
            stream: StreamController::new(settings.stream.chars_per_tick),
            settings,
            active_conversation_id: None,
            active_stream: None,
        }
    }

    pub fn with_store(mut self, store: Box<dyn Storage>) -> Self {
        self.store = store;
        self
    }

    pub fn with_observer(mut self, observer: impl SessionObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn ticks(&self) -> &T {
        &self.ticks
    }

    pub fn stream_state(&self) -> StreamState {
        self.stream.state()
    }

    /// Model catalog offered to the model selector.
    pub fn models(&self) -> Vec<Model> {
        self.settings.configured_models()
    }

    pub fn responder_id(&self) -> &str {
        self.responder.id()
    }

    pub fn is_busy(&self) -> bool {
        self.active_stream.is_some()
    }

    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.active_conversation_id
    }

    /// Assistant message currently receiving chunks.
    pub fn streaming_message(&self) -> Option<MessageId> {
        self.active_stream
            .map(|active_stream| active_stream.target.message_id)
    }

    pub fn conversations(&self) -> SessionResult<Vec<ConversationSummary>> {
        self.store.list_conversations().context(StoreSnafu {
            stage: "list-conversations",
        })
    }

    pub fn messages(&self, conversation_id: ConversationId) -> SessionResult<Vec<MessageRecord>> {
        self.store.list_messages(conversation_id).context(StoreSnafu {
            stage: "list-messages",
        })
    }

    pub fn message(&self, message_id: MessageId) -> SessionResult<Option<MessageRecord>> {
        self.store.get_message(message_id).context(StoreSnafu {
            stage: "get-message",
        })
    }

    /// Re-sends the conversation list, e.g. after the store was seeded externally.
    pub fn refresh_conversation_list(&mut self) -> SessionResult<()> {
        let conversations = self.conversations()?;
        self.observer.conversation_list_changed(&conversations);
        Ok(())
    }

    /// Starts an empty conversation and makes it active. A running stream is cancelled first.
    pub fn new_conversation(&mut self) -> SessionResult<ConversationId> {
        self.cancel_active_stream()?;

        let record = self
            .store
            .create_conversation(NewConversation::default())
            .context(StoreSnafu {
                stage: "new-conversation",
            })?;
        tracing::info!(conversation_id = %record.id, "conversation created");

        self.active_conversation_id = Some(record.id);
        self.observer.message_list_changed(Some(record.id), &[]);
        self.refresh_conversation_list()?;
        Ok(record.id)
    }

    /// Switches the visible conversation. Selecting the active one is a no-op.
    pub fn select_conversation(&mut self, conversation_id: ConversationId) -> SessionResult<()> {
        if self.active_conversation_id == Some(conversation_id) {
            return Ok(());
        }

        let exists = self
            .store
            .get_conversation(conversation_id)
            .context(StoreSnafu {
                stage: "select-conversation",
            })?
            .is_some();
        ensure!(
            exists,
            ConversationNotFoundSnafu {
                stage: "select-conversation",
                conversation_id,
            }
        );

        // Only one conversation is visible, so its reply must not keep streaming elsewhere.
        self.cancel_active_stream()?;

        let snapshots = self
            .messages(conversation_id)?
            .iter()
            .map(MessageSnapshot::from_record)
            .collect::<Vec<_>>();
        self.active_conversation_id = Some(conversation_id);
        tracing::debug!(
            conversation_id = %conversation_id,
            messages = snapshots.len(),
            "conversation selected"
        );
        self.observer
            .message_list_changed(Some(conversation_id), &snapshots);
        Ok(())
    }

    /// Runs steps one to five of a turn and leaves the reply streaming.
    ///
    /// Chunks are delivered by [`ChatSession::tick`]. Dropping the returned future while
    /// the responder is pending leaves the user message in place without a reply.
    pub async fn submit_user_turn(&mut self, request: TurnRequest) -> SessionResult<TurnReceipt> {
        if let Some(active_stream) = self.active_stream {
            tracing::debug!(handle = %active_stream.handle, "turn rejected while streaming");
            return BusySnafu {
                stage: "submit-turn",
                handle: active_stream.handle,
            }
            .fail();
        }

        let text = request.text.trim();
        ensure!(
            !text.is_empty(),
            EmptyMessageSnafu {
                stage: "submit-turn"
            }
        );
        let length = text.chars().count();
        ensure!(
            length <= self.settings.max_input_chars,
            MessageTooLongSnafu {
                stage: "submit-turn",
                length,
                max: self.settings.max_input_chars,
            }
        );
        if let Some(attachment) = &request.attachment
            && let Some(reason) = self.settings.attachments.rejection_reason(attachment)
        {
            tracing::info!(name = %attachment.name, reason = %reason, "attachment rejected");
            return AttachmentRejectedSnafu {
                stage: "submit-turn",
                name: attachment.name.clone(),
                reason,
            }
            .fail();
        }
        let text = text.to_string();
        let options = RequestOptions::new(
            request
                .model_id
                .clone()
                .unwrap_or_else(|| self.settings.default_model.clone()),
        )
        .with_retrieval(request.use_retrieval.unwrap_or(self.settings.use_retrieval))
        .with_attachment(request.attachment.is_some());

        let conversation_id = self.resolve_conversation(&text)?;
        let user_message = self
            .store
            .append_message(
                conversation_id,
                NewMessage::user(text)
                    .with_attachment(request.attachment.clone())
                    .with_model(options.model_id.clone(), options.use_retrieval),
            )
            .context(StoreSnafu {
                stage: "append-user-message",
            })?;
        self.notify_appended(&user_message);
        self.refresh_conversation_list()?;
        self.observer.busy_changed(true);

        let model_id = options.model_id.clone();
        let used_retrieval = options.use_retrieval;
        let reply_request = self.build_reply_request(conversation_id, options)?;

        tracing::debug!(
            conversation_id = %conversation_id,
            responder = self.responder.id(),
            model = %reply_request.options.model_id,
            history = reply_request.messages.len(),
            "requesting reply"
        );
        let reply = match self.responder.respond(reply_request).await {
            Ok(reply) => reply,
            Err(source) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %source,
                    "responder failed, posting fallback notice"
                );
                let notice = self
                    .store
                    .append_message(
                        conversation_id,
                        NewMessage::assistant(self.settings.fallback_notice.clone())
                            .with_model(model_id, used_retrieval),
                    )
                    .context(StoreSnafu {
                        stage: "append-fallback-notice",
                    });
                self.observer.busy_changed(false);
                let notice = notice?;
                self.notify_appended(&notice);
                self.refresh_conversation_list()?;
                return Err(source).context(ResponderFailureSnafu {
                    stage: "respond",
                    conversation_id,
                    message_id: notice.id,
                });
            }
        };

        let placeholder = match self.store.append_message(
            conversation_id,
            NewMessage::assistant_placeholder().with_model(model_id, used_retrieval),
        ) {
            Ok(placeholder) => placeholder,
            Err(source) => {
                self.observer.busy_changed(false);
                return Err(source).context(StoreSnafu {
                    stage: "append-assistant-placeholder",
                });
            }
        };
        self.notify_appended(&placeholder);

        let target = StreamTarget::new(conversation_id, placeholder.id);
        let handle = match self.stream.start(target, reply) {
            Ok(handle) => handle,
            Err(source) => {
                self.settle_message(placeholder.id, self.settings.fallback_notice.clone())?;
                self.observer.busy_changed(false);
                return Err(source).context(StreamSnafu {
                    stage: "start-stream",
                });
            }
        };
        self.ticks
            .arm(handle, self.settings.stream.tick_interval());
        self.active_stream = Some(ActiveStream { handle, target });

        Ok(TurnReceipt {
            conversation_id,
            user_message_id: user_message.id,
            assistant_message_id: placeholder.id,
            handle,
        })
    }

    /// Advances the running stream by one step.
    pub fn tick(&mut self) -> SessionResult<TickOutcome> {
        let Some(event) = self.stream.tick() else {
            return Ok(TickOutcome::Idle);
        };

        if !self.stream_event_is_current(event.handle()) {
            tracing::warn!(handle = %event.handle(), "dropping event for an untracked stream");
            return Ok(TickOutcome::Ignored);
        }

        match event {
            StreamEvent::Chunk { target, prefix, .. } => {
                let content_len = prefix.len();
                let patch = MessagePatch::content(prefix).with_status(MessageStatus::Streaming);
                let record = match self.store.update_message_content(target.message_id, patch) {
                    Ok(record) => record,
                    Err(source) => {
                        self.abort_active_stream();
                        return Err(source).context(StoreSnafu {
                            stage: "apply-stream-chunk",
                        });
                    }
                };
                self.observer
                    .message_updated(&MessageUpdate::from_record(&record));
                Ok(TickOutcome::Chunk {
                    message_id: target.message_id,
                    content_len,
                })
            }
            StreamEvent::Done {
                handle,
                target,
                text,
            } => {
                let patch = MessagePatch::content(text).with_status(MessageStatus::Final);
                let updated = self.store.update_message_content(target.message_id, patch);
                self.finish_stream(handle);
                let record = updated.context(StoreSnafu {
                    stage: "finalize-stream",
                })?;

                tracing::info!(
                    conversation_id = %target.conversation_id,
                    message_id = %target.message_id,
                    "reply completed"
                );
                self.observer
                    .message_updated(&MessageUpdate::from_record(&record));
                self.refresh_conversation_list()?;
                Ok(TickOutcome::Completed {
                    message_id: target.message_id,
                })
            }
        }
    }

    /// Stops the running stream and finalizes its message with the content delivered so far.
    ///
    /// Returns the settled message id, or `None` when nothing was streaming.
    pub fn cancel_active_stream(&mut self) -> SessionResult<Option<MessageId>> {
        let Some(active_stream) = self.active_stream else {
            return Ok(None);
        };

        let cancelled = self.stream.cancel(active_stream.handle);
        let message_id = active_stream.target.message_id;
        let settled = self
            .store
            .get_message(message_id)
            .context(StoreSnafu {
                stage: "cancel-stream-read",
            })
            .and_then(|record| {
                let content = record.map(|record| record.content).unwrap_or_default();
                self.settle_message(message_id, content)
            });
        self.finish_stream(active_stream.handle);

        cancelled.context(StreamSnafu {
            stage: "cancel-stream",
        })?;
        settled?;
        tracing::info!(
            conversation_id = %active_stream.target.conversation_id,
            message_id = %message_id,
            "reply cancelled"
        );
        Ok(Some(message_id))
    }

    fn stream_event_is_current(&self, handle: StreamHandle) -> bool {
        self.active_stream
            .is_some_and(|active_stream| active_stream.handle == handle)
    }

    fn resolve_conversation(&mut self, first_message: &str) -> SessionResult<ConversationId> {
        let title = truncate_title(first_message, self.settings.title_max_chars);

        let Some(conversation_id) = self.active_conversation_id else {
            let record = self
                .store
                .create_conversation(NewConversation::titled(title))
                .context(StoreSnafu {
                    stage: "create-conversation",
                })?;
            tracing::info!(conversation_id = %record.id, "conversation created for first message");
            self.active_conversation_id = Some(record.id);
            return Ok(record.id);
        };

        let record = self
            .store
            .get_conversation(conversation_id)
            .context(StoreSnafu {
                stage: "resolve-conversation",
            })?
            .context(ConversationNotFoundSnafu {
                stage: "resolve-conversation",
                conversation_id,
            })?;

        if record.message_count == 0 && record.title == DEFAULT_CONVERSATION_TITLE {
            self.store
                .rename_conversation(conversation_id, title)
                .context(StoreSnafu {
                    stage: "title-conversation",
                })?;
        }
        Ok(conversation_id)
    }

    fn build_reply_request(
        &self,
        conversation_id: ConversationId,
        options: RequestOptions,
    ) -> SessionResult<ReplyRequest> {
        let records = self.messages(conversation_id)?;
        let skip = records.len().saturating_sub(self.settings.history_limit);
        let history = records
            .into_iter()
            .skip(skip)
            .map(|record| HistoryMessage::new(history_role(record.role), record.content))
            .collect();

        let request = ReplyRequest::new(history, options);
        let preamble = self.settings.system_prompt.trim();
        if preamble.is_empty() {
            return Ok(request);
        }
        Ok(request.with_preamble(preamble))
    }

    fn settle_message(&mut self, message_id: MessageId, content: String) -> SessionResult<()> {
        let record = self
            .store
            .update_message_content(
                message_id,
                MessagePatch::content(content).with_status(MessageStatus::Final),
            )
            .context(StoreSnafu {
                stage: "settle-message",
            })?;
        self.observer
            .message_updated(&MessageUpdate::from_record(&record));
        Ok(())
    }

    // Terminal path after a failed chunk write. The message keeps its last stored content.
    fn abort_active_stream(&mut self) {
        let Some(active_stream) = self.active_stream else {
            return;
        };

        if let Err(error) = self.stream.cancel(active_stream.handle) {
            tracing::error!(handle = %active_stream.handle, error = %error, "abort found no running stream");
        }
        if let Ok(Some(record)) = self.store.get_message(active_stream.target.message_id)
            && let Err(error) = self.settle_message(record.id, record.content)
        {
            tracing::error!(message_id = %record.id, error = %error, "failed to settle aborted reply");
        }
        self.finish_stream(active_stream.handle);
    }

    fn finish_stream(&mut self, handle: StreamHandle) {
        self.ticks.release(handle);
        self.active_stream = None;
        self.observer.busy_changed(false);
    }

    fn notify_appended(&mut self, record: &MessageRecord) {
        self.observer
            .message_appended(record.conversation_id, &MessageSnapshot::from_record(record));
    }
}

fn history_role(role: MessageRole) -> Role {
    match role {
        MessageRole::User => Role::User,
        MessageRole::Assistant => Role::Assistant,
    }
}

fn truncate_title(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((offset, _)) => text[..offset].trim_end().to_string(),
        None => text.to_string(),
    }
}
