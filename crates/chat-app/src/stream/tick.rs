use std::time::Duration;

use super::StreamHandle;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(20);

/// A recurring tick registered for one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmedTick {
    pub handle: StreamHandle,
    pub period: Duration,
}

/// Scheduling capability that decides when a running stream advances.
///
/// Implementations hold at most one armed tick. Releasing must happen on every
/// terminal path, otherwise a leftover tick would keep writing into a finished message.
pub trait TickSource: Send {
    fn arm(&mut self, handle: StreamHandle, period: Duration);
    fn release(&mut self, handle: StreamHandle);
    fn armed(&self) -> Option<ArmedTick>;
}

/// Tick source driven by the caller, one `ChatSession::tick` at a time.
#[derive(Debug, Default, Clone)]
pub struct ManualTicks {
    armed: Option<ArmedTick>,
    arm_count: usize,
    release_count: usize,
}

impl ManualTicks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm_count(&self) -> usize {
        self.arm_count
    }

    pub fn release_count(&self) -> usize {
        self.release_count
    }
}

impl TickSource for ManualTicks {
    fn arm(&mut self, handle: StreamHandle, period: Duration) {
        if let Some(previous) = self.armed {
            tracing::warn!(
                previous = %previous.handle,
                next = %handle,
                "arming tick source that was never released; replacing previous tick"
            );
        }

        self.armed = Some(ArmedTick { handle, period });
        self.arm_count += 1;
    }

    fn release(&mut self, handle: StreamHandle) {
        match self.armed {
            Some(armed) if armed.handle == handle => {
                self.armed = None;
                self.release_count += 1;
            }
            Some(armed) => {
                tracing::warn!(
                    armed = %armed.handle,
                    requested = %handle,
                    "ignoring release for a tick that is not armed"
                );
            }
            None => {
                tracing::debug!(handle = %handle, "release on idle tick source");
            }
        }
    }

    fn armed(&self) -> Option<ArmedTick> {
        self.armed
    }
}
