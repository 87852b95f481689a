use std::io::Write;

use parley::demo::seed_demo_conversations;
use parley::driver::{DriveOutcome, run_until_stopped};
use parley::session::{MessageSnapshot, MessageUpdate, SessionObserver, TurnRequest};
use parley::stream::ManualTicks;
use parley::{ChatSession, SessionSettings};
use parley_storage::{
    ConversationId, ConversationSummary, MemoryStorage, MessageRole, MessageStatus,
};
use snafu::{ResultExt, Whatever};
use tracing_subscriber::EnvFilter;

const DEFAULT_PROMPT: &str = "Write a Python function to calculate fibonacci numbers";

/// Prints streamed replies to stdout as they grow.
#[derive(Debug, Default)]
struct TerminalObserver {
    printed: usize,
}

impl SessionObserver for TerminalObserver {
    fn conversation_list_changed(&mut self, conversations: &[ConversationSummary]) {
        tracing::debug!(count = conversations.len(), "conversation list refreshed");
    }

    fn message_appended(&mut self, _conversation_id: ConversationId, message: &MessageSnapshot) {
        match message.role {
            MessageRole::User => println!("you> {}", message.content),
            MessageRole::Assistant if message.status == MessageStatus::Streaming => {
                self.printed = 0;
                print!("assistant> ");
            }
            MessageRole::Assistant => println!("assistant> {}", message.content),
        }
        flush_stdout();
    }

    fn message_updated(&mut self, update: &MessageUpdate) {
        // Cumulative prefixes arrive on char boundaries, so the slice is always valid.
        if let Some(suffix) = update.content.get(self.printed..) {
            print!("{suffix}");
            self.printed = update.content.len();
        }

        if update.status == MessageStatus::Final {
            println!();
            if let Some(rendered) = &update.rendered {
                for (language, code) in rendered.code_blocks() {
                    tracing::info!(
                        language = language.unwrap_or("text"),
                        code_len = code.len(),
                        "reply contains a code block"
                    );
                }
            }
        }
        flush_stdout();
    }
}

fn flush_stdout() {
    if let Err(error) = std::io::stdout().flush() {
        tracing::warn!(error = %error, "failed to flush stdout");
    }
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), Whatever> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = SessionSettings::load();
    let responder = parley_llm::create_responder(&settings.responder)
        .whatever_context("failed to create responder")?;

    let mut store = MemoryStorage::default();
    let seeded =
        seed_demo_conversations(&mut store).whatever_context("failed to seed demo data")?;
    tracing::info!(conversations = seeded.len(), "demo store ready");

    let mut session = ChatSession::new(settings, responder, ManualTicks::new())
        .with_store(Box::new(store))
        .with_observer(TerminalObserver::default());
    for summary in session
        .conversations()
        .whatever_context("failed to list conversations")?
    {
        println!("* {} ({} messages)", summary.title, summary.message_count);
    }
    println!();

    let prompt = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let prompt = if prompt.trim().is_empty() {
        DEFAULT_PROMPT.to_string()
    } else {
        prompt
    };

    session
        .new_conversation()
        .whatever_context("failed to start a conversation")?;
    let receipt = session
        .submit_user_turn(TurnRequest::new(prompt))
        .await
        .whatever_context("turn was rejected")?;

    let stop = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %error, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };
    let outcome = run_until_stopped(&mut session, stop)
        .await
        .whatever_context("streaming failed")?;
    if let DriveOutcome::Stopped { .. } = outcome {
        println!("[reply cancelled]");
    }

    tracing::info!(
        conversation_id = %receipt.conversation_id,
        message_id = %receipt.assistant_message_id,
        outcome = ?outcome,
        "done"
    );
    Ok(())
}
