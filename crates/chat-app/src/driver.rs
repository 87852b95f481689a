//! Wall-clock driver that feeds a session's armed tick from a tokio interval.

use std::future::Future;

use tokio::time::{MissedTickBehavior, interval};

use crate::session::{ChatSession, SessionResult, TickOutcome};
use crate::stream::TickSource;

/// How a driven stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveOutcome {
    /// Nothing was armed when the driver started.
    Idle,
    Completed { ticks: usize },
    Stopped { ticks: usize },
}

/// Ticks the session at the armed period until its stream finishes.
pub async fn run_until_idle<T: TickSource>(
    session: &mut ChatSession<T>,
) -> SessionResult<DriveOutcome> {
    run_until_stopped(session, std::future::pending()).await
}

/// Like [`run_until_idle`], but cancels the stream once `stop` resolves.
pub async fn run_until_stopped<T, S>(
    session: &mut ChatSession<T>,
    stop: S,
) -> SessionResult<DriveOutcome>
where
    T: TickSource,
    S: Future<Output = ()>,
{
    let Some(armed) = session.ticks().armed() else {
        return Ok(DriveOutcome::Idle);
    };

    let mut ticker = interval(armed.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first interval tick resolves immediately; the first chunk is due one period later.
    ticker.tick().await;

    tokio::pin!(stop);
    let mut ticks = 0;
    loop {
        tokio::select! {
            biased;
            () = &mut stop => {
                session.cancel_active_stream()?;
                tracing::debug!(handle = %armed.handle, ticks, "driver stopped");
                return Ok(DriveOutcome::Stopped { ticks });
            }
            _ = ticker.tick() => {
                ticks += 1;
                match session.tick()? {
                    TickOutcome::Chunk { .. } => {}
                    TickOutcome::Completed { .. } | TickOutcome::Idle => {
                        return Ok(DriveOutcome::Completed { ticks });
                    }
                    TickOutcome::Ignored => {
                        tracing::warn!(handle = %armed.handle, "driver saw an untracked stream event");
                    }
                }
            }
        }
    }
}
