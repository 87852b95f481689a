//! Simulated incremental emission of an assistant reply.
//!
//! The controller owns at most one running session and advances it only
//! when ticked, so cancellation is observed at the next tick boundary.

pub mod tick;

use parley_storage::{ConversationId, MessageId};
use snafu::{OptionExt, Snafu};

pub use tick::{ArmedTick, ManualTicks, TickSource};

pub const DEFAULT_CHARS_PER_TICK: usize = 1;

/// Identifier for one streaming session.
///
/// Never reused within a controller, so events from a finished session can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamHandle(pub u64);

impl StreamHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for StreamHandle {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "stream-{}", self.0)
    }
}

/// The message a stream writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
}

impl StreamTarget {
    pub const fn new(conversation_id: ConversationId, message_id: MessageId) -> Self {
        Self {
            conversation_id,
            message_id,
        }
    }
}

/// Lifecycle of the controller's most recent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    Running(StreamHandle),
    Completed(StreamHandle),
    Cancelled(StreamHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamTransition {
    Start(StreamHandle),
    Complete(StreamHandle),
    Cancel(StreamHandle),
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StreamError {
    #[snafu(display("{active} is still running; refusing to start {attempted}"))]
    AlreadyRunning {
        stage: &'static str,
        active: StreamHandle,
        attempted: StreamHandle,
    },
    #[snafu(display("no stream is running"))]
    NoActiveStream { stage: &'static str },
    #[snafu(display("{attempted} does not match running {active}"))]
    HandleMismatch {
        stage: &'static str,
        active: StreamHandle,
        attempted: StreamHandle,
    },
}

pub type StreamResult<T> = Result<T, StreamError>;

impl StreamState {
    pub fn running_handle(&self) -> Option<StreamHandle> {
        match self {
            Self::Running(handle) => Some(*handle),
            Self::Idle | Self::Completed(_) | Self::Cancelled(_) => None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running_handle().is_some()
    }

    /// Applies one transition. Terminal transitions must name the running handle exactly.
    pub fn apply(&self, transition: StreamTransition) -> StreamResult<Self> {
        match transition {
            StreamTransition::Start(handle) => match self {
                Self::Running(active) => AlreadyRunningSnafu {
                    stage: "stream-state-start",
                    active: *active,
                    attempted: handle,
                }
                .fail(),
                Self::Idle | Self::Completed(_) | Self::Cancelled(_) => Ok(Self::Running(handle)),
            },
            StreamTransition::Complete(handle) => {
                self.ensure_running(handle, "stream-state-complete")?;
                Ok(Self::Completed(handle))
            }
            StreamTransition::Cancel(handle) => {
                self.ensure_running(handle, "stream-state-cancel")?;
                Ok(Self::Cancelled(handle))
            }
        }
    }

    fn ensure_running(&self, handle: StreamHandle, stage: &'static str) -> StreamResult<()> {
        match self {
            Self::Running(active) if *active == handle => Ok(()),
            Self::Running(active) => HandleMismatchSnafu {
                stage,
                active: *active,
                attempted: handle,
            }
            .fail(),
            Self::Idle | Self::Completed(_) | Self::Cancelled(_) => {
                NoActiveStreamSnafu { stage }.fail()
            }
        }
    }
}

/// What one tick produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Cumulative prefix of the source text emitted so far.
    Chunk {
        handle: StreamHandle,
        target: StreamTarget,
        prefix: String,
    },
    /// Fired exactly once per completed session, never after a cancel.
    Done {
        handle: StreamHandle,
        target: StreamTarget,
        text: String,
    },
}

impl StreamEvent {
    pub fn handle(&self) -> StreamHandle {
        match self {
            Self::Chunk { handle, .. } | Self::Done { handle, .. } => *handle,
        }
    }

    pub fn target(&self) -> StreamTarget {
        match self {
            Self::Chunk { target, .. } | Self::Done { target, .. } => *target,
        }
    }
}

#[derive(Debug, Clone)]
struct StreamSession {
    handle: StreamHandle,
    target: StreamTarget,
    source: String,
    // Byte offset, always on a char boundary.
    cursor: usize,
}

impl StreamSession {
    fn advance(&mut self, chars: usize) -> &str {
        let remaining = &self.source[self.cursor..];
        let step = remaining
            .char_indices()
            .nth(chars)
            .map_or(remaining.len(), |(offset, _)| offset);
        self.cursor += step;
        &self.source[..self.cursor]
    }

    fn is_exhausted(&self) -> bool {
        self.cursor >= self.source.len()
    }
}

#[derive(Debug)]
pub struct StreamController {
    state: StreamState,
    session: Option<StreamSession>,
    next_handle: u64,
    chars_per_tick: usize,
}

impl Default for StreamController {
    fn default() -> Self {
        Self::new(DEFAULT_CHARS_PER_TICK)
    }
}

impl StreamController {
    pub fn new(chars_per_tick: usize) -> Self {
        Self {
            state: StreamState::Idle,
            session: None,
            next_handle: 1,
            chars_per_tick: chars_per_tick.max(1),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Emitted and total byte lengths of the running session.
    pub fn progress(&self) -> Option<(usize, usize)> {
        self.session
            .as_ref()
            .map(|session| (session.cursor, session.source.len()))
    }

    pub fn start(
        &mut self,
        target: StreamTarget,
        text: impl Into<String>,
    ) -> StreamResult<StreamHandle> {
        let handle = StreamHandle::new(self.next_handle);
        self.state = self.state.apply(StreamTransition::Start(handle))?;
        // Reserve the handle only after acceptance so rejected starts leave no gap.
        self.next_handle = self.next_handle.saturating_add(1);

        let source = text.into();
        tracing::debug!(
            handle = %handle,
            conversation_id = %target.conversation_id,
            message_id = %target.message_id,
            source_len = source.len(),
            "stream started"
        );
        self.session = Some(StreamSession {
            handle,
            target,
            source,
            cursor: 0,
        });
        Ok(handle)
    }

    /// Advances the running session by one step.
    ///
    /// Returns `None` when nothing is running, including after a cancel.
    pub fn tick(&mut self) -> Option<StreamEvent> {
        let session = self.session.as_mut()?;

        if !session.is_exhausted() {
            let prefix = session.advance(self.chars_per_tick).to_string();
            return Some(StreamEvent::Chunk {
                handle: session.handle,
                target: session.target,
                prefix,
            });
        }

        let session = self.session.take()?;
        match self.state.apply(StreamTransition::Complete(session.handle)) {
            Ok(next) => self.state = next,
            Err(error) => {
                tracing::error!(handle = %session.handle, error = %error, "stream completion rejected");
                return None;
            }
        }

        tracing::debug!(handle = %session.handle, "stream completed");
        Some(StreamEvent::Done {
            handle: session.handle,
            target: session.target,
            text: session.source,
        })
    }

    /// Stops the running session. Already delivered prefixes stay where they are.
    pub fn cancel(&mut self, handle: StreamHandle) -> StreamResult<StreamTarget> {
        let next = self.state.apply(StreamTransition::Cancel(handle))?;
        let session = self.session.take().context(NoActiveStreamSnafu {
            stage: "stream-cancel-session",
        })?;
        self.state = next;

        tracing::debug!(handle = %handle, emitted = session.cursor, "stream cancelled");
        Ok(session.target)
    }
}
