#![deny(unsafe_code)]

pub mod demo;
/// Interval driver for streaming sessions.
pub mod driver;
/// Rich-text conversion of raw message bodies.
pub mod format;
/// Conversation, turn and streaming orchestration.
pub mod session;
pub mod settings;
/// Simulated incremental reply emission.
pub mod stream;

pub use format::{HtmlRenderer, PlainRenderer, Render, RichText, Segment, format};
pub use session::{
    ChatSession, SessionError, SessionObserver, TickOutcome, TurnReceipt, TurnRequest,
};
pub use settings::SessionSettings;
