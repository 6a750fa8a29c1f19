//! Idle auto-pauser
//!
//! Pauses a stream once no reader has touched it for a while, and
//! resumes it when the next reader shows up. Retirement stops while
//! paused, so an unattended station costs neither upstream fetches nor
//! segmenter runs.

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::debug;

/// Idle time after which the target is paused
pub const DEFAULT_PAUSE_TIMEOUT: Duration = Duration::from_secs(90);

/// How often idleness is checked
pub const DEFAULT_PAUSE_TICK: Duration = Duration::from_secs(15);

/// Anything that can be paused and resumed by reader activity
#[async_trait]
pub trait PauseResume: Send + Sync {
    async fn pause(&self) -> Result<()>;
    async fn resume(&self) -> Result<()>;
}

/// Signals reader activity to a running [`AutoPauser`]
#[derive(Clone)]
pub struct PauserHandle {
    reset_tx: mpsc::Sender<()>,
}

impl PauserHandle {
    /// Record reader activity. Never blocks; concurrent resets coalesce.
    pub fn reset(&self) {
        let _ = self.reset_tx.try_send(());
    }
}

/// Watches for reader inactivity and drives pause/resume on its target
pub struct AutoPauser {
    target: Arc<dyn PauseResume>,
    timeout: Duration,
    tick: Duration,
    reset_rx: mpsc::Receiver<()>,
}

impl AutoPauser {
    pub fn new(
        target: Arc<dyn PauseResume>,
        timeout: Duration,
        tick: Duration,
    ) -> (Self, PauserHandle) {
        let (reset_tx, reset_rx) = mpsc::channel(8);
        (
            Self {
                target,
                timeout,
                tick,
                reset_rx,
            },
            PauserHandle { reset_tx },
        )
    }

    /// Run until every [`PauserHandle`] is gone. Any error from the
    /// target's pause or resume aborts the loop and is returned.
    pub async fn run(mut self) -> Result<()> {
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_activity = Instant::now();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if Instant::now() <= last_activity + self.timeout {
                        continue;
                    }

                    debug!("no recent readers, pausing target");
                    self.target.pause().await?;

                    // Parked until a reader signals activity.
                    if self.reset_rx.recv().await.is_none() {
                        return Ok(());
                    }

                    self.target.resume().await?;
                    last_activity = Instant::now();
                    ticker.reset();
                    debug!("reader returned, target resumed");
                }

                reset = self.reset_rx.recv() => {
                    match reset {
                        Some(()) => last_activity = Instant::now(),
                        None => return Ok(()),
                    }
                }
            }
        }
    }
}
